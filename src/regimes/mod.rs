// src/regimes/mod.rs
//! The three always-running control regimes.
//!
//! Each regime is a task that polls the tank mode every iteration, does its
//! work when its mode is active and otherwise idles with a short random
//! backoff. Failed iterations are logged and retried; only shutdown ends the
//! loop, after which [`Regime::on_exit`] puts the valves in a safe position.

pub mod deployed;
pub mod maintenance;
pub mod warning;

use async_trait::async_trait;
use std::time::Duration;
use tankctl_shared::{TankMode, TankState};

use crate::context::ControlContext;
use crate::error::ControlError;

pub use deployed::{DeployedRegime, power_levels};
pub use maintenance::MaintenanceRegime;
pub use warning::WarningRegime;

/// Pause after a failed iteration.
pub const ERROR_BACKOFF: Duration = Duration::from_secs(1);
/// Granularity of every long wait: mode changes are noticed within one step.
pub const HOLD_STEP: Duration = Duration::from_secs(1);
const MAX_IDLE_BACKOFF_SECOND: f64 = 3.0;

#[async_trait]
pub trait Regime: Send {
    fn name(&self) -> &'static str;

    fn context_mut(&mut self) -> &mut ControlContext;

    /// One iteration. `Err(Cancelled)` ends the regime.
    async fn step(&mut self) -> Result<(), ControlError>;

    /// Runs once when the loop ends, whatever the reason.
    async fn on_exit(&mut self) {
        fail_safe(self.context_mut()).await;
    }
}

/// Drive `regime` until shutdown.
pub async fn run_regime<R: Regime>(mut regime: R) {
    tracing::info!("{} regime started", regime.name());
    loop {
        match regime.step().await {
            Ok(()) => {}
            Err(ControlError::Cancelled) => break,
            Err(e) => {
                tracing::error!("{} tick failed: {}", regime.name(), e);
                if regime.context_mut().shutdown.sleep(ERROR_BACKOFF).await.is_err() {
                    break;
                }
            }
        }
    }
    tracing::info!("{} regime stopping", regime.name());
    regime.on_exit().await;
}

/// Close every valve and withdraw the power fractions so no mixer reopens one.
pub async fn fail_safe(ctx: &ControlContext) {
    ctx.valves.force_all_off().await;
    if let Err(e) = ctx.bus.clear_power_fractions().await {
        tracing::error!("failed to clear power fractions: {}", e);
    }
    ctx.bus.publish_tank_state(TankState::Neutral, HOLD_STEP * 2).await;
}

/// Random wait used by a regime whose mode is not active.
pub async fn idle_backoff(ctx: &mut ControlContext) -> Result<(), ControlError> {
    let wait = Duration::from_secs_f64(MAX_IDLE_BACKOFF_SECOND * rand::random::<f64>());
    ctx.shutdown.sleep(wait).await
}

/// Wait `duration` in [`HOLD_STEP`] slices, re-reading the tank mode after
/// each. Returns `Ok(false)` as soon as the mode is no longer `mode`.
pub async fn hold(ctx: &mut ControlContext, duration: Duration, mode: TankMode) -> Result<bool, ControlError> {
    let mut left = duration;
    while !left.is_zero() {
        let slice = left.min(HOLD_STEP);
        ctx.shutdown.sleep(slice).await?;
        left -= slice;
        match ctx.bus.tank_mode().await {
            Ok(current) if current != mode => {
                tracing::info!("tank mode changed to {}", current);
                return Ok(false);
            }
            Ok(_) => {}
            Err(e) => tracing::debug!("tank mode unreadable during hold: {}", e),
        }
    }
    Ok(true)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::config::{Config, StaticConfig};
    use crate::hardware::{SimulatedValves, ValveBank};
    use crate::shutdown::{self, ShutdownTrigger};
    use crate::store::MemoryStore;
    use std::sync::Arc;

    pub struct Rig {
        pub trigger: ShutdownTrigger,
        pub valves: SimulatedValves,
        pub config: Arc<StaticConfig>,
        pub ctx: ControlContext,
    }

    pub fn rig(config: Config) -> Rig {
        let (trigger, shutdown) = shutdown::channel();
        let valves = SimulatedValves::new();
        let config = Arc::new(StaticConfig::new(config));
        let ctx = ControlContext::new(
            Arc::new(MemoryStore::new()),
            ValveBank::new(Arc::new(valves.clone())),
            config.clone(),
            shutdown,
        );
        Rig { trigger, valves, config, ctx }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::rig;
    use super::*;
    use crate::config::Config;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_hold_runs_full_duration() {
        let mut r = rig(Config::default());
        r.ctx.bus.set_tank_mode(TankMode::Deployed).await.unwrap();
        let start = Instant::now();
        assert!(hold(&mut r.ctx, Duration::from_millis(3500), TankMode::Deployed).await.unwrap());
        assert_eq!(start.elapsed(), Duration::from_millis(3500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hold_ends_on_mode_change() {
        let mut r = rig(Config::default());
        r.ctx.bus.set_tank_mode(TankMode::Deployed).await.unwrap();
        let bus = r.ctx.bus.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(2500)).await;
            bus.set_tank_mode(TankMode::Maintenance).await.unwrap();
        });
        let start = Instant::now();
        assert!(!hold(&mut r.ctx, Duration::from_secs(60), TankMode::Deployed).await.unwrap());
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hold_cancelled() {
        let mut r = rig(Config::default());
        r.trigger.trigger();
        let result = hold(&mut r.ctx, Duration::from_secs(60), TankMode::Deployed).await;
        assert!(matches!(result, Err(ControlError::Cancelled)));
    }

    #[tokio::test]
    async fn test_fail_safe_closes_and_clears() {
        let r = rig(Config::default());
        for valve in tankctl_shared::ValveChannel::ALL {
            r.valves.force_position(valve, true);
            r.ctx.bus.set_power_fraction(valve, 0.5, Duration::from_secs(60)).await.unwrap();
        }
        fail_safe(&r.ctx).await;
        assert_eq!(r.valves.positions(), [false; 3]);
        for valve in tankctl_shared::ValveChannel::ALL {
            assert_eq!(r.ctx.bus.power_fraction(valve).await.unwrap(), None);
        }
        assert_eq!(r.ctx.bus.published_tank_state().await.unwrap(), Some(TankState::Neutral));
    }
}
