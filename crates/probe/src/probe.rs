//! Source Probe

use crate::credentials::CredentialChain;
use crate::error::{ProbeError, TransportError};
use crate::source::{CounterField, CounterUnit, Endpoint, Source, SourceKind};
use crate::transport::{QueryResponse, Transport};
use crate::META_QUERY;
use attestation::{AttestationVerifier, ResolvedIdentity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// What one successful probe observed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeSample {
    pub observed_at: DateTime<Utc>,
    /// Indexed block for sync sources, the KPI value (or first counter) otherwise
    pub metric_value: f64,
    /// Indexed block, when the response carried `_meta`
    pub indexed_block: Option<f64>,
    /// Chain head, when one could be obtained
    pub reference_value: Option<f64>,
    /// Source reports indexing errors
    pub flagged: bool,
    pub identity: Option<ResolvedIdentity>,
    /// Counter values of a counters source, in configured order
    pub counters: Vec<CounterReading>,
    /// `data` of the response the metric came from
    pub raw_payload: Value,
}

impl ProbeSample {
    /// `reference - indexed block`, when both are known
    pub fn lag(&self) -> Option<f64> {
        Some(self.reference_value? - self.indexed_block?)
    }
}

/// One counter read from a counters source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterReading {
    pub label: String,
    pub unit: CounterUnit,
    /// Stored as a decimal string; wei totals overflow JSON numbers
    #[serde(with = "decimal_string")]
    pub value: u128,
}

mod decimal_string {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        String::deserialize(deserializer)?.parse().map_err(de::Error::custom)
    }
}

/// Outcome of probing one source
#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub source_name: String,
    pub chain: String,
    pub outcome: Result<ProbeSample, ProbeError>,
}

impl ProbeResult {
    pub fn sample(&self) -> Option<&ProbeSample> {
        self.outcome.as_ref().ok()
    }

    pub fn error(&self) -> Option<&ProbeError> {
        self.outcome.as_ref().err()
    }
}

/// Fetches source state and the matching chain head
#[derive(Clone)]
pub struct SourceProbe {
    transport: Arc<dyn Transport>,
    credentials: CredentialChain,
    verifier: AttestationVerifier,
    gateway_base: String,
}

impl SourceProbe {
    pub fn new(
        transport: Arc<dyn Transport>,
        credentials: CredentialChain,
        verifier: AttestationVerifier,
        gateway_base: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            credentials,
            verifier,
            gateway_base: gateway_base.into(),
        }
    }

    /// Probe one source. Never fails; errors are carried in the result.
    pub async fn probe(&self, source: &Source) -> ProbeResult {
        let outcome = self.run(source).await;
        if let Err(e) = &outcome {
            warn!(source = %source.name, kind = e.kind(), error = %e, "Probe failed");
        }
        ProbeResult {
            source_name: source.name.clone(),
            chain: source.chain.clone(),
            outcome,
        }
    }

    async fn run(&self, source: &Source) -> Result<ProbeSample, ProbeError> {
        let endpoint = source
            .locator
            .resolve(&self.gateway_base)
            .ok_or_else(|| ProbeError::Configuration("URL missing".to_string()))?;

        match &source.kind {
            SourceKind::Sync => self.probe_sync(source, &endpoint).await,
            SourceKind::Kpi {
                query,
                value_pointer,
            } => {
                let (data, mut sample) = self.probe_custom(source, &endpoint, query).await?;
                sample.metric_value = data
                    .pointer(value_pointer)
                    .and_then(numeric)
                    .ok_or_else(|| ProbeError::Data(format!("No numeric value at {value_pointer}")))?;
                Ok(sample)
            }
            SourceKind::Counters { query, fields } => {
                let (data, mut sample) = self.probe_custom(source, &endpoint, query).await?;
                sample.counters = read_counters(&data, fields)?;
                sample.metric_value = sample.counters.first().map_or(0.0, |c| c.value as f64);
                Ok(sample)
            }
        }
    }

    async fn probe_sync(&self, source: &Source, endpoint: &Endpoint) -> Result<ProbeSample, ProbeError> {
        let (head, response) = tokio::join!(
            self.transport.rpc_block_height(&source.chain),
            self.query(endpoint, META_QUERY),
        );
        let response = response?;
        let head = head?;

        let data = checked_data(&response)?;
        let (block, flagged) =
            read_meta(data).ok_or_else(|| ProbeError::Data("No _meta in response".to_string()))?;

        let identity = self.verifier.resolve_identity(response.attestation.as_deref()).await;
        debug!(source = %source.name, block, head, flagged, "Sync probe complete");

        Ok(ProbeSample {
            observed_at: Utc::now(),
            metric_value: block as f64,
            indexed_block: Some(block as f64),
            reference_value: head.map(|h| h as f64),
            flagged,
            identity,
            counters: Vec::new(),
            raw_payload: data.clone(),
        })
    }

    /// Run a configured query. If the response also carries `_meta`, the
    /// sample gets the indexed block and chain head like a sync probe, and an
    /// RPC failure fails it; otherwise the chain head is ignored.
    async fn probe_custom(
        &self,
        source: &Source,
        endpoint: &Endpoint,
        query: &str,
    ) -> Result<(Value, ProbeSample), ProbeError> {
        let (head, response) = tokio::join!(
            self.transport.rpc_block_height(&source.chain),
            self.query(endpoint, query),
        );
        let response = response?;
        let data = checked_data(&response)?.clone();

        let (indexed_block, reference_value, flagged) = match read_meta(&data) {
            Some((block, flagged)) => (Some(block as f64), head?.map(|h| h as f64), flagged),
            None => (None, None, false),
        };

        let identity = self.verifier.resolve_identity(response.attestation.as_deref()).await;
        debug!(source = %source.name, ?indexed_block, flagged, "Custom probe complete");

        let sample = ProbeSample {
            observed_at: Utc::now(),
            metric_value: 0.0,
            indexed_block,
            reference_value,
            flagged,
            identity,
            counters: Vec::new(),
            raw_payload: data.clone(),
        };
        Ok((data, sample))
    }

    async fn query(&self, endpoint: &Endpoint, query: &str) -> Result<QueryResponse, TransportError> {
        let transport = &self.transport;
        if !endpoint.gateway {
            return transport.query(&endpoint.url, query, None).await;
        }

        self.credentials
            .try_each(|credential| async move {
                transport
                    .query(&endpoint.url, query, credential.as_deref())
                    .await
            })
            .await
    }
}

fn checked_data(response: &QueryResponse) -> Result<&Value, ProbeError> {
    if let Some(message) = response.errors.first() {
        return Err(ProbeError::Data(message.clone()));
    }
    response
        .data
        .as_ref()
        .ok_or_else(|| ProbeError::Data("Empty response".to_string()))
}

/// Block number and indexing-error flag from `_meta`, if present
fn read_meta(data: &Value) -> Option<(u64, bool)> {
    let meta = data.get("_meta").filter(|m| !m.is_null())?;
    let block = meta
        .pointer("/block/number")
        .and_then(Value::as_u64)
        .unwrap_or(0);
    let flagged = meta
        .get("hasIndexingErrors")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    Some((block, flagged))
}

fn read_counters(data: &Value, fields: &[CounterField]) -> Result<Vec<CounterReading>, ProbeError> {
    fields
        .iter()
        .map(|field| {
            let value = data
                .pointer(&field.pointer)
                .and_then(integer)
                .ok_or_else(|| ProbeError::Data(format!("No integer value at {}", field.pointer)))?;
            Ok(CounterReading {
                label: field.label.clone(),
                unit: field.unit,
                value,
            })
        })
        .collect()
}

/// Unsigned integers, as numbers or BigInt strings
fn integer(value: &Value) -> Option<u128> {
    match value {
        Value::Number(n) => n.as_u64().map(u128::from),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Numbers and numeric strings (subgraphs serialize BigInt/BigDecimal as strings)
fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
