// src/context.rs
use std::sync::Arc;

use crate::bus::TankBus;
use crate::config::{Config, ConfigSource};
use crate::error::ControlError;
use crate::hardware::ValveBank;
use crate::inhibit::InhibitGate;
use crate::shutdown::Shutdown;
use crate::store::SharedStore;

/// Handles every control task holds: shared state, the inhibit gate, the
/// valves, live configuration and the termination signal.
#[derive(Clone)]
pub struct ControlContext {
    pub bus: TankBus,
    pub gate: InhibitGate,
    pub valves: ValveBank,
    pub config: Arc<dyn ConfigSource>,
    pub shutdown: Shutdown,
}

impl ControlContext {
    pub fn new(
        store: Arc<dyn SharedStore>,
        valves: ValveBank,
        config: Arc<dyn ConfigSource>,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            bus: TankBus::new(store.clone()),
            gate: InhibitGate::new(store),
            valves,
            config,
            shutdown,
        }
    }

    /// Fresh configuration for this tick.
    pub fn settings(&self) -> Result<Config, ControlError> {
        Ok(self.config.settings()?)
    }
}
