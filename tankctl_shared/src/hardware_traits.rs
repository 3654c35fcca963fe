// Trait-based interfaces for the valve driver and alarm (shared)

use crate::ValveChannel;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ActuatorError {
    #[error("valve {valve} did not respond: {reason}")]
    Unresponsive { valve: ValveChannel, reason: String },
}

/// Remote valve driver. Calls are synchronous from the controller's point of
/// view and may take an unspecified amount of time.
#[async_trait]
pub trait ValveActuator: Send + Sync {
    async fn turn_on(&self, valve: ValveChannel) -> Result<(), ActuatorError>;
    async fn turn_off(&self, valve: ValveChannel) -> Result<(), ActuatorError>;
    /// `None` when the driver does not know the current position.
    async fn get_state(&self, valve: ValveChannel) -> Result<Option<bool>, ActuatorError>;
}

/// Audible/visible annunciator driven by the warning regime.
#[async_trait]
pub trait Alarm: Send + Sync {
    async fn sound(&self, on: Duration) -> Result<(), ActuatorError>;
}
