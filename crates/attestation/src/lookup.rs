//! Allocation → Indexer Lookup

use crate::error::VerificationError;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

const ALLOCATION_QUERY: &str = r#"
query Allocation($id: ID!) {
  allocation(id: $id) {
    indexer {
      id
      defaultDisplayName
      url
    }
  }
}
"#;

/// Indexer operating an allocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationIdentity {
    /// Indexer address
    pub indexer_id: String,
    /// Display name, falling back to the indexer URL, then "Unknown"
    pub name: String,
}

/// Resolves an allocation id to the indexer behind it
#[async_trait]
pub trait IdentityLookup: Send + Sync {
    /// `Ok(None)` means the lookup ran but the allocation is unknown, or the
    /// credential needed for the lookup is not configured.
    async fn lookup(&self, allocation_id: &str)
        -> Result<Option<AllocationIdentity>, VerificationError>;
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    data: Option<LookupData>,
}

#[derive(Debug, Deserialize)]
struct LookupData {
    allocation: Option<AllocationNode>,
}

#[derive(Debug, Deserialize)]
struct AllocationNode {
    indexer: IndexerNode,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IndexerNode {
    id: String,
    default_display_name: Option<String>,
    url: Option<String>,
}

/// Looks allocations up on the network subgraph through the gateway
pub struct GatewayLookup {
    http: reqwest::Client,
    url: String,
    api_key: Option<String>,
}

impl GatewayLookup {
    /// Create a lookup against `{gateway}/api/subgraphs/id/{network_subgraph_id}`
    pub fn new(
        gateway_base: &str,
        network_subgraph_id: &str,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, VerificationError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| VerificationError::Lookup(e.to_string()))?;

        Ok(Self {
            http,
            url: format!(
                "{}/api/subgraphs/id/{}",
                gateway_base.trim_end_matches('/'),
                network_subgraph_id
            ),
            api_key: api_key.filter(|k| !k.is_empty()),
        })
    }
}

#[async_trait]
impl IdentityLookup for GatewayLookup {
    async fn lookup(
        &self,
        allocation_id: &str,
    ) -> Result<Option<AllocationIdentity>, VerificationError> {
        let Some(api_key) = &self.api_key else {
            debug!("No gateway key configured, skipping allocation lookup");
            return Ok(None);
        };

        let response = self
            .http
            .post(&self.url)
            .bearer_auth(api_key)
            .json(&json!({
                "query": ALLOCATION_QUERY,
                "variables": { "id": allocation_id },
            }))
            .send()
            .await
            .map_err(|e| VerificationError::Lookup(e.to_string()))?
            .error_for_status()
            .map_err(|e| VerificationError::Lookup(e.to_string()))?;

        let body: LookupResponse = response
            .json()
            .await
            .map_err(|e| VerificationError::Lookup(e.to_string()))?;

        Ok(body
            .data
            .and_then(|d| d.allocation)
            .map(|allocation| {
                let indexer = allocation.indexer;
                let name = indexer
                    .default_display_name
                    .filter(|n| !n.is_empty())
                    .or(indexer.url.filter(|u| !u.is_empty()))
                    .unwrap_or_else(|| "Unknown".to_string());
                AllocationIdentity {
                    indexer_id: indexer.id,
                    name,
                }
            }))
    }
}
