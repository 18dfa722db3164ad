//! Ordered Credential Fallback

use crate::error::TransportError;
use std::fmt;
use std::future::Future;
use tracing::warn;

/// One API key, labelled for logs
#[derive(Clone)]
pub struct Credential {
    label: String,
    secret: String,
}

impl Credential {
    pub fn new(label: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            secret: secret.into(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("label", &self.label)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Credentials tried in order until one is accepted
///
/// Only an auth rejection (401/402/403) moves on to the next credential.
/// Any other failure, or the first success, ends the attempt.
#[derive(Debug, Clone, Default)]
pub struct CredentialChain {
    credentials: Vec<Credential>,
}

impl CredentialChain {
    pub fn new(credentials: Vec<Credential>) -> Self {
        Self { credentials }
    }

    /// Build from raw keys, skipping blanks; labels are `key1`, `key2`, ...
    pub fn from_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let credentials = keys
            .into_iter()
            .filter(|k| !k.as_ref().trim().is_empty())
            .enumerate()
            .map(|(i, k)| Credential::new(format!("key{}", i + 1), k.as_ref().trim()))
            .collect();
        Self { credentials }
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }

    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    /// First credential, if any
    pub fn primary(&self) -> Option<&Credential> {
        self.credentials.first()
    }

    /// Run `attempt` with each credential in turn
    ///
    /// An empty chain makes a single attempt without a credential.
    pub async fn try_each<T, F, Fut>(&self, mut attempt: F) -> Result<T, TransportError>
    where
        F: FnMut(Option<String>) -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        if self.credentials.is_empty() {
            return attempt(None).await;
        }

        let mut last_error = None;
        for credential in &self.credentials {
            match attempt(Some(credential.secret.clone())).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_auth_rejected() => {
                    warn!(credential = %credential.label, error = %e, "Credential rejected, trying next");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or(TransportError::AuthRejected { status: 401 }))
    }
}
