// src/regimes/maintenance.rs
use async_trait::async_trait;
use std::time::Duration;
use tankctl_shared::{TankMode, TankState};

use super::{HOLD_STEP, Regime, hold, idle_backoff};
use crate::context::ControlContext;
use crate::error::ControlError;

/// Self-test cycle: heat, cool, flush, then a long neutral rest.
///
/// Valves are driven directly through the valve bank; the mixers are kept
/// out by withdrawing every power fraction when a cycle starts.
pub struct MaintenanceRegime {
    ctx: ControlContext,
}

impl MaintenanceRegime {
    pub fn new(ctx: ControlContext) -> Self {
        Self { ctx }
    }

    /// One full cycle. Returns early when the tank leaves maintenance mode.
    pub async fn cycle(&mut self) -> Result<(), ControlError> {
        let config = self.ctx.settings()?.maintenance;
        self.ctx.bus.clear_setpoint().await?;
        self.ctx.bus.clear_power_fractions().await?;
        tracing::info!("maintenance cycle starting");

        if !self.act(TankState::Heating, Duration::from_secs(config.heat_second)).await? {
            return Ok(());
        }
        if !self.act(TankState::Cooling, Duration::from_secs(config.cool_second)).await? {
            return Ok(());
        }
        for _ in 0..config.flush_ticks {
            if !self.act(TankState::Flush, HOLD_STEP).await? {
                return Ok(());
            }
        }
        // neutral is re-applied every tick so a valve moved by hand gets closed
        for _ in 0..config.cycle_interval_second {
            if !self.act(TankState::Neutral, HOLD_STEP).await? {
                return Ok(());
            }
        }
        Ok(())
    }

    /// Apply `state` unless inhibited, then hold it for `duration`.
    async fn act(&mut self, state: TankState, duration: Duration) -> Result<bool, ControlError> {
        if self.ctx.gate.is_held().await {
            tracing::warn!("valve control inhibited, no op");
        } else {
            tracing::debug!("maintenance: {} for {:?}", state, duration);
            if let Err(e) = self.ctx.valves.apply(state).await {
                tracing::error!("maintenance could not apply {}: {}", state, e);
            }
            self.ctx.bus.publish_tank_state(state, duration + 2 * HOLD_STEP).await;
        }
        hold(&mut self.ctx, duration, TankMode::Maintenance).await
    }
}

#[async_trait]
impl Regime for MaintenanceRegime {
    fn name(&self) -> &'static str {
        "maintenance"
    }

    fn context_mut(&mut self) -> &mut ControlContext {
        &mut self.ctx
    }

    async fn step(&mut self) -> Result<(), ControlError> {
        if self.ctx.bus.tank_mode().await? != TankMode::Maintenance {
            return idle_backoff(&mut self.ctx).await;
        }
        self.cycle().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::regimes::run_regime;
    use crate::regimes::test_support::rig;
    use tankctl_shared::ValveChannel;
    use tokio::time::Instant;

    fn config() -> Config {
        let mut config = Config::default();
        config.maintenance.heat_second = 5;
        config.maintenance.cool_second = 5;
        config.maintenance.flush_ticks = 3;
        config.maintenance.cycle_interval_second = 20;
        config
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycle_order_and_length() {
        let r = rig(config());
        let mut regime = MaintenanceRegime::new(r.ctx.clone());
        let start = Instant::now();
        regime.cycle().await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_secs(5 + 5 + 3 + 20));

        let opened: Vec<_> = r
            .valves
            .commands()
            .into_iter()
            .filter(|c| c.open)
            .map(|c| ((c.at - start).as_secs(), c.valve))
            .collect();
        assert_eq!(
            opened,
            vec![
                (0, ValveChannel::Hot),
                (5, ValveChannel::Cold),
                (10, ValveChannel::Ambient),
                (11, ValveChannel::Ambient),
                (12, ValveChannel::Ambient),
            ]
        );
        assert_eq!(r.valves.positions(), [false; 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycle_withdraws_mixer_inputs() {
        let r = rig(config());
        r.ctx.bus.set_power_fraction(ValveChannel::Hot, 0.4, Duration::from_secs(600)).await.unwrap();
        r.ctx.bus.publish_setpoint(26.0, Duration::from_secs(600)).await;
        let mut regime = MaintenanceRegime::new(r.ctx.clone());
        let task = tokio::spawn(async move { regime.cycle().await });

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(r.ctx.bus.power_fraction(ValveChannel::Hot).await.unwrap(), None);
        assert_eq!(r.ctx.bus.store().get(crate::bus::SETPOINT_KEY).await.unwrap(), None);
        r.trigger.trigger();
        assert!(task.await.unwrap().unwrap_err().is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_neutral_republished_every_tick() {
        let r = rig(config());
        let mut regime = MaintenanceRegime::new(r.ctx.clone());
        let bus = r.ctx.bus.clone();
        let valves = r.valves.clone();
        let task = tokio::spawn(async move { regime.cycle().await });

        // into the neutral rest
        tokio::time::sleep(Duration::from_millis(15_500)).await;
        assert_eq!(bus.published_tank_state().await.unwrap(), Some(TankState::Neutral));
        valves.force_position(ValveChannel::Hot, true);
        bus.store().delete(crate::bus::TANK_STATE_KEY).await.unwrap();

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!valves.is_open(ValveChannel::Hot));
        assert_eq!(bus.published_tank_state().await.unwrap(), Some(TankState::Neutral));

        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_inhibit_blocks_direct_actuation() {
        let r = rig(config());
        r.ctx.gate.hold(Duration::from_secs(900)).await.unwrap();
        let mut regime = MaintenanceRegime::new(r.ctx.clone());
        regime.cycle().await.unwrap();
        assert!(r.valves.commands().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_leaving_maintenance_ends_cycle() {
        let r = rig(config());
        let mut regime = MaintenanceRegime::new(r.ctx.clone());
        let bus = r.ctx.bus.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(6500)).await;
            bus.set_tank_mode(TankMode::Deployed).await.unwrap();
        });
        let start = Instant::now();
        regime.cycle().await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_secs(7));
        assert!(r.valves.commands_for(ValveChannel::Ambient).iter().all(|c| !c.open));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_mid_heating_closes_all_valves() {
        let r = rig(config());
        let regime = MaintenanceRegime::new(r.ctx.clone());
        let task = tokio::spawn(run_regime(regime));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(r.valves.is_open(ValveChannel::Hot));

        let stop = Instant::now();
        r.trigger.trigger();
        task.await.unwrap();
        assert!(stop.elapsed() <= HOLD_STEP);
        assert_eq!(r.valves.positions(), [false; 3]);
        assert_eq!(r.ctx.bus.published_tank_state().await.unwrap(), Some(TankState::Neutral));
    }
}
