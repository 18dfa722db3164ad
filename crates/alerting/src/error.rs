//! Alerting Error Types

use storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AlertError {
    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),

    #[error("Delivery to {subscriber} failed: {reason}")]
    DeliveryError { subscriber: String, reason: String },
}
