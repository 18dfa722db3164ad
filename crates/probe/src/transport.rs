//! GraphQL and JSON-RPC Transport

use crate::error::TransportError;
use async_trait::async_trait;
use attestation::ATTESTATION_HEADER;
use reqwest::header::{HeaderMap, AUTHORIZATION};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Body and headers of a GraphQL response
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResponse {
    pub data: Option<Value>,
    /// `errors[].message`, in order
    pub errors: Vec<String>,
    /// Raw signed receipt, when the responder attached one
    pub attestation: Option<String>,
}

/// Network access used by the probe
#[async_trait]
pub trait Transport: Send + Sync {
    /// POST a GraphQL query, with a bearer credential if given
    async fn query(
        &self,
        url: &str,
        query: &str,
        credential: Option<&str>,
    ) -> Result<QueryResponse, TransportError>;

    /// Latest block of `network`, or `None` when no RPC is configured for it
    async fn rpc_block_height(&self, network: &str) -> Result<Option<u64>, TransportError>;
}

/// `reqwest`-backed transport
pub struct HttpTransport {
    client: reqwest::Client,
    rpc_urls: HashMap<String, String>,
}

impl HttpTransport {
    /// Create a transport; every request is bounded by `timeout`
    pub fn new(rpc_urls: HashMap<String, String>, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, rpc_urls })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn query(
        &self,
        url: &str,
        query: &str,
        credential: Option<&str>,
    ) -> Result<QueryResponse, TransportError> {
        let mut request = self.client.post(url).json(&json!({ "query": query }));
        if let Some(key) = credential {
            request = request.header(AUTHORIZATION, format!("Bearer {key}"));
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            debug!(url, status = status.as_u16(), "GraphQL request rejected");
            return Err(TransportError::from_status(status.as_u16()));
        }

        let attestation = header_value(response.headers(), ATTESTATION_HEADER);
        let body: Value = response.json().await?;
        Ok(QueryResponse {
            data: body.get("data").filter(|d| !d.is_null()).cloned(),
            errors: error_messages(&body),
            attestation,
        })
    }

    async fn rpc_block_height(&self, network: &str) -> Result<Option<u64>, TransportError> {
        let Some(url) = self.rpc_urls.get(network) else {
            warn!(chain = network, "No RPC URL for chain");
            return Ok(None);
        };

        let response = self
            .client
            .post(url)
            .json(&json!({
                "jsonrpc": "2.0",
                "method": "eth_blockNumber",
                "params": [],
                "id": 1,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(TransportError::Rpc(response.status().as_u16().to_string()));
        }

        let body: Value = response.json().await?;
        if let Some(error) = body.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            return Err(TransportError::Rpc(message.to_string()));
        }

        let result = body
            .get("result")
            .and_then(Value::as_str)
            .ok_or_else(|| TransportError::Rpc("missing result".to_string()))?;
        parse_hex_quantity(result).map(Some)
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn error_messages(body: &Value) -> Vec<String> {
    body.get("errors")
        .and_then(Value::as_array)
        .map(|errors| {
            errors
                .iter()
                .map(|e| {
                    e.get("message")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown error")
                        .to_string()
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Parse an Ethereum hex quantity such as `0x1b4`
fn parse_hex_quantity(raw: &str) -> Result<u64, TransportError> {
    let digits = raw.strip_prefix("0x").unwrap_or(raw);
    u64::from_str_radix(digits, 16)
        .map_err(|e| TransportError::Rpc(format!("bad block number {raw}: {e}")))
}
