//! Monitored Source Definitions

use serde::{Deserialize, Serialize};

/// How a source's URL is found
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "LocatorFields", into = "LocatorFields")]
pub enum Locator {
    /// Literal endpoint URL
    Url(String),
    /// Name of an environment variable holding the URL
    Env(String),
    /// Deployment id served through the gateway
    Gateway(String),
}

/// On-disk shape: `url`, `env` and `id` keys, first present wins
#[derive(Debug, Default, Serialize, Deserialize)]
struct LocatorFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    env: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
}

impl TryFrom<LocatorFields> for Locator {
    type Error = String;

    fn try_from(fields: LocatorFields) -> Result<Self, Self::Error> {
        let non_empty = |v: Option<String>| v.filter(|s| !s.trim().is_empty());
        if let Some(url) = non_empty(fields.url) {
            Ok(Locator::Url(url))
        } else if let Some(env) = non_empty(fields.env) {
            Ok(Locator::Env(env))
        } else if let Some(id) = non_empty(fields.id) {
            Ok(Locator::Gateway(id))
        } else {
            Err("source needs one of url, env or id".to_string())
        }
    }
}

impl From<Locator> for LocatorFields {
    fn from(locator: Locator) -> Self {
        match locator {
            Locator::Url(url) => LocatorFields { url: Some(url), ..Default::default() },
            Locator::Env(env) => LocatorFields { env: Some(env), ..Default::default() },
            Locator::Gateway(id) => LocatorFields { id: Some(id), ..Default::default() },
        }
    }
}

/// A resolved request target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub url: String,
    /// Credentials are only ever attached to gateway endpoints
    pub gateway: bool,
}

impl Locator {
    /// Resolve to a concrete endpoint, or `None` if nothing usable is configured
    pub fn resolve(&self, gateway_base: &str) -> Option<Endpoint> {
        let base = gateway_base.trim_end_matches('/');
        let url = match self {
            Locator::Url(url) => url.clone(),
            Locator::Env(var) => std::env::var(var).ok().filter(|v| !v.trim().is_empty())?,
            Locator::Gateway(id) => format!("{base}/api/subgraphs/id/{id}"),
        };
        let gateway = !base.is_empty() && url.starts_with(base);
        Some(Endpoint { url, gateway })
    }
}

/// What a probe measures
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceKind {
    /// Indexed block vs chain head, plus the indexing-error flag
    #[default]
    Sync,
    /// Custom query; the metric is the number found at `value_pointer`.
    /// A `_meta` block in the same response is checked like a sync source.
    Kpi { query: String, value_pointer: String },
    /// Custom query with several monotonic counters, each checked for drops
    Counters { query: String, fields: Vec<CounterField> },
}

/// One counter of a `Counters` source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterField {
    /// Short name used in alerts, e.g. `Fees`
    pub label: String,
    /// JSON pointer into the response `data`
    pub pointer: String,
    #[serde(default)]
    pub unit: CounterUnit,
}

/// How a counter is displayed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterUnit {
    #[default]
    Count,
    /// 18-decimal token amount
    Wei,
}

/// A monitored subgraph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub name: String,
    /// Network tag used to pick the chain-head RPC
    pub chain: String,
    #[serde(flatten)]
    pub locator: Locator,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default, skip_serializing_if = "is_sync")]
    pub kind: SourceKind,
    /// Running total the KPI value is added to each cycle, e.g. `ata`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<String>,
}

fn default_active() -> bool {
    true
}

fn is_sync(kind: &SourceKind) -> bool {
    *kind == SourceKind::Sync
}

impl Source {
    /// Active sync source addressed by gateway deployment id
    pub fn gateway(name: &str, chain: &str, deployment: &str) -> Self {
        Self {
            name: name.to_string(),
            chain: chain.to_string(),
            locator: Locator::Gateway(deployment.to_string()),
            active: true,
            kind: SourceKind::Sync,
            total: None,
        }
    }

    pub fn with_kind(self, kind: SourceKind) -> Self {
        Self { kind, ..self }
    }

    pub fn with_total(self, total: &str) -> Self {
        Self {
            total: Some(total.to_string()),
            ..self
        }
    }

    /// Active sync source at a literal URL
    pub fn url(name: &str, chain: &str, url: &str) -> Self {
        Self {
            locator: Locator::Url(url.to_string()),
            ..Self::gateway(name, chain, "")
        }
    }
}
