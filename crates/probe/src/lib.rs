//! Subgraph Probe
//!
//! This crate fetches the state a subgraph reports about itself (indexed
//! block, indexing errors, KPI values or counters) together with an independent chain
//! head, and attaches the identity of the indexer that answered when the
//! response carries a signed attestation.

mod credentials;
mod error;
mod probe;
mod registry;
mod source;
mod transport;

pub use credentials::{Credential, CredentialChain};
pub use error::{ProbeError, RegistryError, TransportError};
pub use probe::{CounterReading, ProbeResult, ProbeSample, SourceProbe};
pub use registry::SourceRegistry;
pub use source::{CounterField, CounterUnit, Endpoint, Locator, Source, SourceKind};
pub use transport::{HttpTransport, QueryResponse, Transport};

/// GraphQL query for the indexing status every subgraph exposes
pub const META_QUERY: &str = "{ _meta { block { number } hasIndexingErrors } }";
