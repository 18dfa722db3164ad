//! Scheduler Error Types

use alerting::AlertError;
use probe::RegistryError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Alert(#[from] AlertError),
}
