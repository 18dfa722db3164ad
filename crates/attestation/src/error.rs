//! Verification Error Types

use thiserror::Error;

/// Reasons an attestation could not be turned into an identity.
///
/// These never escape [`crate::AttestationVerifier::resolve_identity`]; they
/// are logged at debug level and the sample simply carries no identity.
#[derive(Debug, Clone, Error)]
pub enum VerificationError {
    /// Payload was not valid JSON or a field had the wrong shape
    #[error("Malformed attestation payload: {0}")]
    Malformed(String),

    /// One of the six receipt fields was absent
    #[error("Attestation missing required field: {0}")]
    MissingField(&'static str),

    /// Signature components could not be recovered to a signer
    #[error("Signature recovery failed: {0}")]
    Recovery(String),

    /// The allocation lookup request failed
    #[error("Allocation lookup failed: {0}")]
    Lookup(String),
}
