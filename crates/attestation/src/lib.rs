//! Query Attestation Verification
//!
//! Recovers the allocation that signed a gateway response and resolves it to
//! the indexer that operates it. Verification is best-effort: a missing or
//! malformed attestation yields no identity, never an error.

mod error;
mod lookup;
mod receipt;
mod verifier;

pub use error::VerificationError;
pub use lookup::{AllocationIdentity, GatewayLookup, IdentityLookup};
pub use receipt::{graph_protocol_domain, Attestation, Receipt};
pub use verifier::{AttestationVerifier, ResolvedIdentity};

/// Response header carrying the signed receipt
pub const ATTESTATION_HEADER: &str = "graph-attestation";
