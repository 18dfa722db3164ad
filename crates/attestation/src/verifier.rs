//! Attestation Verifier

use crate::lookup::IdentityLookup;
use crate::receipt::Attestation;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Who served a response, as far as it could be established
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedIdentity {
    /// Recovered allocation address (lower-case)
    pub proof_id: String,
    /// Indexer address, when the lookup succeeded
    pub identity_id: Option<String>,
    /// Indexer display name, when the lookup succeeded
    pub identity_name: Option<String>,
}

impl ResolvedIdentity {
    /// Stable key for rotation detection: the indexer when known, otherwise
    /// the allocation itself
    pub fn key(&self) -> &str {
        self.identity_id.as_deref().unwrap_or(&self.proof_id)
    }
}

/// Turns raw attestation headers into identities
#[derive(Clone)]
pub struct AttestationVerifier {
    lookup: Arc<dyn IdentityLookup>,
}

impl AttestationVerifier {
    /// Create a verifier backed by the given lookup
    pub fn new(lookup: Arc<dyn IdentityLookup>) -> Self {
        Self { lookup }
    }

    /// Resolve the identity behind an attestation header.
    ///
    /// Returns `None` when there is no header or it cannot be verified. A
    /// failed lookup still yields the recovered `proof_id`.
    pub async fn resolve_identity(&self, payload: Option<&str>) -> Option<ResolvedIdentity> {
        let payload = payload?;

        let proof_id = match Attestation::parse(payload).and_then(|a| a.allocation_id()) {
            Ok(id) => id,
            Err(e) => {
                debug!(error = %e, "Discarding unverifiable attestation");
                return None;
            }
        };

        match self.lookup.lookup(&proof_id).await {
            Ok(Some(identity)) => Some(ResolvedIdentity {
                proof_id,
                identity_id: Some(identity.indexer_id),
                identity_name: Some(identity.name),
            }),
            Ok(None) => Some(ResolvedIdentity {
                proof_id,
                identity_id: None,
                identity_name: None,
            }),
            Err(e) => {
                debug!(allocation = %proof_id, error = %e, "Allocation lookup failed");
                Some(ResolvedIdentity {
                    proof_id,
                    identity_id: None,
                    identity_name: None,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VerificationError;
    use crate::lookup::AllocationIdentity;
    use crate::receipt::tests::signed_payload;
    use alloy_signer_local::PrivateKeySigner;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts calls and answers with a fixed result
    struct StubLookup {
        calls: AtomicUsize,
        answer: Result<Option<AllocationIdentity>, VerificationError>,
    }

    impl StubLookup {
        fn new(answer: Result<Option<AllocationIdentity>, VerificationError>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                answer,
            })
        }
    }

    #[async_trait]
    impl IdentityLookup for StubLookup {
        async fn lookup(
            &self,
            _allocation_id: &str,
        ) -> Result<Option<AllocationIdentity>, VerificationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.answer.clone()
        }
    }

    fn signer() -> PrivateKeySigner {
        PrivateKeySigner::from_slice(&[42u8; 32]).unwrap()
    }

    #[tokio::test]
    async fn test_absent_payload_is_none() {
        let lookup = StubLookup::new(Ok(None));
        let verifier = AttestationVerifier::new(lookup.clone());

        assert_eq!(verifier.resolve_identity(None).await, None);
        assert_eq!(lookup.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_s_never_looks_up() {
        let lookup = StubLookup::new(Ok(None));
        let verifier = AttestationVerifier::new(lookup.clone());

        let mut payload: serde_json::Value =
            serde_json::from_str(&signed_payload(&signer())).unwrap();
        payload.as_object_mut().unwrap().remove("s");

        assert_eq!(verifier.resolve_identity(Some(&payload.to_string())).await, None);
        assert_eq!(lookup.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_resolved_identity() {
        let lookup = StubLookup::new(Ok(Some(AllocationIdentity {
            indexer_id: "0xindexer".into(),
            name: "Indexer One".into(),
        })));
        let verifier = AttestationVerifier::new(lookup.clone());

        let identity = verifier
            .resolve_identity(Some(&signed_payload(&signer())))
            .await
            .unwrap();

        assert_eq!(identity.proof_id, signer().address().to_string().to_lowercase());
        assert_eq!(identity.identity_name.as_deref(), Some("Indexer One"));
        assert_eq!(identity.key(), "0xindexer");
        assert_eq!(lookup.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_lookup_degrades_to_proof_id() {
        let lookup = StubLookup::new(Err(VerificationError::Lookup("timeout".into())));
        let verifier = AttestationVerifier::new(lookup);

        let identity = verifier
            .resolve_identity(Some(&signed_payload(&signer())))
            .await
            .unwrap();

        assert_eq!(identity.identity_id, None);
        assert_eq!(identity.key(), identity.proof_id);
    }
}
