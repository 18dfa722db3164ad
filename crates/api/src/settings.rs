//! Runtime Settings
//!
//! Layered configuration: built-in defaults, then an optional TOML file
//! (`monitor.toml`, or the path in `MONITOR_CONFIG`), then environment
//! variables such as `MONITOR__POLL_INTERVAL_SECS=60` or
//! `MONITOR__RPC_URLS__GNOSIS=https://...`.

use config::{Config, ConfigError, Environment, File};
use probe::{CounterField, CounterUnit, Locator, Source, SourceKind};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming an explicit settings file
pub const CONFIG_PATH_ENV: &str = "MONITOR_CONFIG";

const ENV_PREFIX: &str = "MONITOR";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub poll_interval_secs: u64,
    pub flush_interval_secs: u64,
    /// Push URL of an external uptime monitor; no heartbeat when unset
    pub heartbeat_url: Option<String>,
    pub heartbeat_interval_secs: u64,
    /// Blocks behind the chain head before a source counts as lagging
    pub lag_threshold: f64,
    /// Probes running at once within a cycle
    pub concurrency: usize,
    /// Samples kept per source for inconsistency analysis
    pub analysis_window: usize,
    pub gateway_base: String,
    pub network_subgraph_id: String,
    /// Gateway API keys, tried in order
    pub api_keys: Vec<String>,
    /// JSON-RPC endpoint per chain
    pub rpc_urls: HashMap<String, String>,
    pub data_dir: PathBuf,
    /// Overrides `<data_dir>/monitor.sqlite`
    pub database_url: Option<String>,
    /// Delivery endpoint for alert batches; batches are only logged when unset
    pub webhook_url: Option<String>,
    pub bind_address: String,
    pub request_timeout_secs: u64,
    pub log_level: String,
    pub log_json: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            poll_interval_secs: 300,
            flush_interval_secs: 300,
            heartbeat_url: None,
            heartbeat_interval_secs: 120,
            lag_threshold: 100.0,
            concurrency: 20,
            analysis_window: 10,
            gateway_base: "https://gateway.thegraph.com".to_string(),
            network_subgraph_id: "DZz4kDTdmzWLWsV373w2bSmoar3umKKH9y82SUKr5qmp".to_string(),
            api_keys: Vec::new(),
            rpc_urls: HashMap::new(),
            data_dir: PathBuf::from("data"),
            database_url: None,
            webhook_url: None,
            bind_address: "0.0.0.0:8080".to_string(),
            request_timeout_secs: 20,
            log_level: "info".to_string(),
            log_json: false,
        }
    }
}

impl Settings {
    /// Load from `MONITOR_CONFIG` (or `monitor.toml` if present) and the
    /// process environment
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from);
        Self::load_from(path.as_deref(), env_source())
    }

    /// Load from an explicit file and environment source. A missing
    /// explicit file is an error; a missing `monitor.toml` is not.
    pub fn load_from(path: Option<&Path>, env: Environment) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name("monitor").required(false),
        };

        Config::builder()
            .add_source(file)
            .add_source(env)
            .build()?
            .try_deserialize()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn sources_file(&self) -> PathBuf {
        self.data_dir.join("sources.json")
    }

    pub fn database_url(&self) -> String {
        self.database_url.clone().unwrap_or_else(|| {
            format!("sqlite://{}", self.data_dir.join("monitor.sqlite").display())
        })
    }
}

fn env_source() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("api_keys")
}

/// Legacy fee counters, served by gateway deployment
pub const FEES_SUBGRAPH_ID: &str = "JCYjvfTErSkkFYjGedMHPnTcySpeB1Z81FLYUuEjWXK3";

// Every default query also asks for `_meta`, so one request feeds both the
// sync flags and the KPI value.
const META_FIELDS: &str = "_meta { block { number } hasIndexingErrors }";

fn kpi(fields: &str, pointer: &str) -> SourceKind {
    SourceKind::Kpi {
        query: format!("{{ {fields} {META_FIELDS} }}"),
        value_pointer: pointer.to_string(),
    }
}

fn ata() -> SourceKind {
    kpi(
        r#"globals(where: { id: "" }) { id totalAtaTransactions }"#,
        "/globals/0/totalAtaTransactions",
    )
}

fn registry() -> SourceKind {
    kpi(r#"global(id: "") { id txCount }"#, "/global/txCount")
}

fn fees_usd() -> SourceKind {
    kpi(r#"global(id: "") { id totalFeesInUSD }"#, "/global/totalFeesInUSD")
}

fn legacy_fees() -> SourceKind {
    let field = |label: &str, name: &str| CounterField {
        label: label.to_string(),
        pointer: format!("/global/{name}"),
        unit: CounterUnit::Wei,
    };
    SourceKind::Counters {
        query: format!(
            r#"{{ global(id: "") {{ totalFeesIn totalFeesInLegacyMech totalFeesInLegacyMechMarketPlace }} {META_FIELDS} }}"#
        ),
        fields: vec![
            field("Fees", "totalFeesIn"),
            field("Legacy", "totalFeesInLegacyMech"),
            field("Market", "totalFeesInLegacyMechMarketPlace"),
        ],
    }
}

fn from_env(name: &str, chain: &str, var: &str) -> Source {
    Source {
        locator: Locator::Env(var.to_string()),
        ..Source::gateway(name, chain, "")
    }
}

/// Sources written to a fresh sources file
pub fn default_sources() -> Vec<Source> {
    let mm = |name: &str, chain: &str, id: &str| {
        Source::gateway(name, chain, id)
            .with_kind(ata())
            .with_total("ata")
    };
    let reg = |name: &str, chain: &str, id: &str| {
        Source::gateway(name, chain, id)
            .with_kind(registry())
            .with_total("transactions")
    };

    vec![
        mm("Gnosis MM", "gnosis", "5uBbKaSyWZaenxc2frFWqSASoXP952Yh2HheDdczqVoM"),
        mm("Base MM", "base", "vqXaQBmE9KTwF68BAYPFs7HwjPLpqKjDbtx3wXjTH5p"),
        from_env("Legacy Mech", "gnosis", "NEXT_PUBLIC_GNOSIS_LM_SUBGRAPH_URL")
            .with_kind(ata())
            .with_total("ata"),
        Source::gateway("Gnosis New Mech Fees", "gnosis", "FVimvzJV7aFP3GLzhL8uTXsDmPD9Wzp6tEBtzPsHfd3K")
            .with_kind(fees_usd()),
        Source::gateway("Base New Mech Fees", "base", "8a7YpqVVhiJBfLjFMwtH3jmHFUMAahfeHHGbh9vU26Tk")
            .with_kind(fees_usd()),
        reg("Gnosis Registry", "gnosis", "GmDw6a6EfP6z58dzkw5WehpxjaiEKB6aZRk4TNUm3DPn"),
        reg("Base Registry", "base", "Baqj7bPWWQKw8HXwfqbMZnFhkSamuUYFa3JgCRYF8Tcr"),
        from_env("Mode Registry", "mode", "NEXT_PUBLIC_MODE_REGISTRY_SUBGRAPH_URL")
            .with_kind(registry())
            .with_total("transactions"),
        reg("Optimism Registry", "optimism", "BksA3aj8vX68TVs91ieDoGzFGASuLC7BaYo2HsGCea7p"),
        reg("Celo Registry", "celo", "BxkMNoiEHdbJDtrmMG1bqVvUfwVUWnf5bn47WnCdB1A4"),
        reg("Ethereum Registry", "mainnet", "89VhY3d7w6Ran1C86wkchzYNEG3rLBgWvyDUZMEFyjtQ"),
        reg("Polygon Registry", "matic", "HHRBjVWFT2bV7eNSRqbCNDtUVnLPt911hcp8mSe4z6KG"),
        reg("Arbitrum Registry", "arbitrum-one", "GpQfE1C5DzXz1KCFvvj6jZkuhpMouwtbf9yYSv2y2V4p"),
        Source::gateway("Legacy Fees", "gnosis", FEES_SUBGRAPH_ID).with_kind(legacy_fees()),
    ]
}
