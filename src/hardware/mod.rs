// src/hardware/mod.rs - Valve bank over the remote valve driver
pub mod simulated;

use std::sync::Arc;
use tankctl_shared::{ActuatorError, TankState, ValveActuator, ValveChannel};
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};

pub use simulated::{SimulatedValves, ValveCommand};

/// Longest a single driver call may take before it is abandoned.
pub const ACTUATOR_TIMEOUT: Duration = Duration::from_secs(1);

/// Statistics for valve command execution
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandStats {
    pub total_commands: u64,
    pub successful_commands: u64,
    pub failed_commands: u64,
    pub average_response_time: f64,
    pub total_response_time: f64,
}

/// The three tank valves behind one driver. Cheap to clone; clones share
/// the driver and the statistics.
#[derive(Clone)]
pub struct ValveBank {
    actuator: Arc<dyn ValveActuator>,
    command_stats: Arc<Mutex<CommandStats>>,
}

impl ValveBank {
    pub fn new(actuator: Arc<dyn ValveActuator>) -> Self {
        Self {
            actuator,
            command_stats: Arc::new(Mutex::new(CommandStats::default())),
        }
    }

    pub async fn turn_on(&self, valve: ValveChannel) -> Result<(), ActuatorError> {
        self.command(valve, true).await
    }

    pub async fn turn_off(&self, valve: ValveChannel) -> Result<(), ActuatorError> {
        self.command(valve, false).await
    }

    async fn command(&self, valve: ValveChannel, open: bool) -> Result<(), ActuatorError> {
        let start_time = Instant::now();
        tracing::info!("{} {}", valve, if open { "on" } else { "off" });

        let call = async {
            if open {
                self.actuator.turn_on(valve).await
            } else {
                self.actuator.turn_off(valve).await
            }
        };
        let result = match tokio::time::timeout(ACTUATOR_TIMEOUT, call).await {
            Ok(result) => result,
            Err(_) => Err(ActuatorError::Unresponsive {
                valve,
                reason: format!("no reply within {:?}", ACTUATOR_TIMEOUT),
            }),
        };

        let response_time = start_time.elapsed().as_secs_f64();
        let mut stats_guard = self.command_stats.lock().await;
        stats_guard.total_commands += 1;
        match &result {
            Ok(()) => {
                stats_guard.successful_commands += 1;
                stats_guard.total_response_time += response_time;
                stats_guard.average_response_time =
                    stats_guard.total_response_time / stats_guard.successful_commands as f64;
                tracing::debug!("{} command completed in {:.3}ms", valve, response_time * 1000.0);
            }
            Err(e) => {
                stats_guard.failed_commands += 1;
                tracing::error!("{} command failed: {}", valve, e);
            }
        }
        result
    }

    /// Drive all three valves to the positions of `state`. Closing commands go
    /// out before the opening one; every valve is attempted even when an
    /// earlier call fails, and the first failure is returned.
    pub async fn apply(&self, state: TankState) -> Result<(), ActuatorError> {
        let mut first_error = None;
        let closing = ValveChannel::ALL.into_iter().filter(|v| !state.valve_open(*v));
        for valve in closing {
            if let Err(e) = self.turn_off(valve).await {
                first_error.get_or_insert(e);
            }
        }
        if let Some(valve) = state.open_valve() {
            if let Err(e) = self.turn_on(valve).await {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Fail-safe: close every valve, ignoring the inhibit lock. Failures are
    /// logged and otherwise ignored.
    pub async fn force_all_off(&self) {
        tracing::info!("forcing all valves off");
        for valve in ValveChannel::ALL {
            let _ = self.turn_off(valve).await;
        }
    }

    /// Driver's view of `valve`; `None` when unknown or unreadable.
    pub async fn get_state(&self, valve: ValveChannel) -> Option<bool> {
        match tokio::time::timeout(ACTUATOR_TIMEOUT, self.actuator.get_state(valve)).await {
            Ok(Ok(state)) => state,
            Ok(Err(e)) => {
                tracing::debug!("{} state unknown: {}", valve, e);
                None
            }
            Err(_) => None,
        }
    }

    pub async fn get_command_stats(&self) -> CommandStats {
        let stats_guard = self.command_stats.lock().await;
        stats_guard.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bank() -> (SimulatedValves, ValveBank) {
        let valves = SimulatedValves::new();
        let bank = ValveBank::new(Arc::new(valves.clone()));
        (valves, bank)
    }

    #[tokio::test]
    async fn test_apply_each_state() {
        let (valves, bank) = bank();
        for state in TankState::ALL {
            bank.apply(state).await.unwrap();
            for valve in ValveChannel::ALL {
                assert_eq!(valves.is_open(valve), state.valve_open(valve), "{} {}", state, valve);
            }
        }
    }

    #[tokio::test]
    async fn test_apply_closes_before_opening() {
        let (valves, bank) = bank();
        bank.apply(TankState::Heating).await.unwrap();
        let log = valves.commands();
        assert_eq!(log.len(), 3);
        assert_eq!((log[2].valve, log[2].open), (ValveChannel::Hot, true));
        assert!(log[..2].iter().all(|c| !c.open));
    }

    #[tokio::test]
    async fn test_one_failing_valve_does_not_stop_the_others() {
        let (valves, bank) = bank();
        valves.set_failing(ValveChannel::Hot, true);
        bank.apply(TankState::Flush).await.unwrap_err();
        assert!(valves.is_open(ValveChannel::Ambient));

        let stats = bank.get_command_stats().await;
        assert_eq!(stats.total_commands, 3);
        assert_eq!(stats.failed_commands, 1);
        assert_eq!(stats.successful_commands, 2);
    }

    #[tokio::test]
    async fn test_force_all_off() {
        let (valves, bank) = bank();
        bank.turn_on(ValveChannel::Cold).await.unwrap();
        bank.turn_on(ValveChannel::Ambient).await.unwrap();
        bank.force_all_off().await;
        assert!(ValveChannel::ALL.iter().all(|v| !valves.is_open(*v)));
        assert_eq!(bank.get_state(ValveChannel::Cold).await, Some(false));
    }
}
