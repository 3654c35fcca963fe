// src/error.rs
use thiserror::Error;

use crate::config::ConfigError;
use crate::profile::ProfileError;
use crate::store::StoreError;
use tankctl_shared::ActuatorError;

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Actuator error: {0}")]
    Actuator(#[from] ActuatorError),
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
    #[error("Profile error: {0}")]
    Profile(#[from] ProfileError),
    /// Shutdown was requested. The only error a control loop lets escape.
    #[error("shutdown requested")]
    Cancelled,
}

impl ControlError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ControlError::Cancelled)
    }
}
