// src/hardware/simulated.rs - In-process valve driver and buzzer
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tankctl_shared::{ActuatorError, Alarm, ValveActuator, ValveChannel};
use tokio::time::Instant;

/// One accepted valve command.
#[derive(Debug, Clone, PartialEq)]
pub struct ValveCommand {
    pub at: Instant,
    pub valve: ValveChannel,
    pub open: bool,
}

#[derive(Debug, Default)]
struct SimState {
    positions: HashMap<ValveChannel, bool>,
    commands: Vec<ValveCommand>,
    beeps: Vec<(Instant, Duration)>,
    failing: HashSet<ValveChannel>,
}

/// Valves that only exist in memory. Keeps a log of every accepted command
/// and alarm so tests and the simulator can inspect what the controller did.
#[derive(Debug, Clone, Default)]
pub struct SimulatedValves {
    inner: Arc<Mutex<SimState>>,
}

impl SimulatedValves {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_open(&self, valve: ValveChannel) -> bool {
        self.state().positions.get(&valve).copied().unwrap_or(false)
    }

    /// Open/closed for hot, cold and ambient, in that order.
    pub fn positions(&self) -> [bool; 3] {
        ValveChannel::ALL.map(|v| self.is_open(v))
    }

    pub fn commands(&self) -> Vec<ValveCommand> {
        self.state().commands.clone()
    }

    pub fn commands_for(&self, valve: ValveChannel) -> Vec<ValveCommand> {
        self.state().commands.iter().filter(|c| c.valve == valve).cloned().collect()
    }

    pub fn beeps(&self) -> Vec<(Instant, Duration)> {
        self.state().beeps.clone()
    }

    /// Make every command to `valve` fail until reset.
    pub fn set_failing(&self, valve: ValveChannel, failing: bool) {
        let mut state = self.state();
        if failing {
            state.failing.insert(valve);
        } else {
            state.failing.remove(&valve);
        }
    }

    /// Move a valve without going through the controller, like an operator
    /// at the manifold would.
    pub fn force_position(&self, valve: ValveChannel, open: bool) {
        self.state().positions.insert(valve, open);
    }

    fn set(&self, valve: ValveChannel, open: bool) -> Result<(), ActuatorError> {
        let mut state = self.state();
        if state.failing.contains(&valve) {
            return Err(ActuatorError::Unresponsive {
                valve,
                reason: "simulated fault".to_string(),
            });
        }
        let previous = state.positions.insert(valve, open).unwrap_or(false);
        if previous == open {
            tracing::trace!("{} already {}", valve, if open { "open" } else { "closed" });
        }
        state.commands.push(ValveCommand { at: Instant::now(), valve, open });
        Ok(())
    }
}

#[async_trait]
impl ValveActuator for SimulatedValves {
    async fn turn_on(&self, valve: ValveChannel) -> Result<(), ActuatorError> {
        self.set(valve, true)
    }

    async fn turn_off(&self, valve: ValveChannel) -> Result<(), ActuatorError> {
        self.set(valve, false)
    }

    async fn get_state(&self, valve: ValveChannel) -> Result<Option<bool>, ActuatorError> {
        Ok(self.state().positions.get(&valve).copied())
    }
}

#[async_trait]
impl Alarm for SimulatedValves {
    async fn sound(&self, on: Duration) -> Result<(), ActuatorError> {
        tracing::warn!("beep ({:?})", on);
        self.state().beeps.push((Instant::now(), on));
        Ok(())
    }
}
