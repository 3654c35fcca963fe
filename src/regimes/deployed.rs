// src/regimes/deployed.rs
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tankctl_shared::{TankMode, TankState, ValveChannel};
use tokio::time::Instant;

use super::{Regime, hold, idle_backoff};
use crate::context::ControlContext;
use crate::error::ControlError;
use crate::estimator::{ControlGains, WindowedEstimator};
use crate::profile::SetpointSource;
use crate::thermostat::{ThermostatLimits, decide};

/// Power fraction per valve, in [`ValveChannel::ALL`] order, for `state`
/// given the estimator output `drive` (positive when the tank is too cold).
pub fn power_levels(state: TankState, drive: f64) -> [f64; 3] {
    let level = |x: f64| if x.is_nan() { 0.0 } else { x.clamp(0.0, 1.0) };
    ValveChannel::ALL.map(|valve| match (state, valve) {
        (TankState::Heating, ValveChannel::Hot) => level(drive),
        (TankState::Cooling, ValveChannel::Cold) => level(-drive),
        (TankState::Flush, ValveChannel::Ambient) => 1.0,
        _ => 0.0,
    })
}

/// Normal operation: follow the setpoint profile.
pub struct DeployedRegime {
    ctx: ControlContext,
    setpoints: Arc<dyn SetpointSource>,
    estimator: WindowedEstimator,
    state: TankState,
    epoch: Instant,
}

impl DeployedRegime {
    pub fn new(ctx: ControlContext, setpoints: Arc<dyn SetpointSource>) -> Self {
        let pid = crate::config::PidConfig::default();
        Self {
            ctx,
            setpoints,
            estimator: WindowedEstimator::new(
                ControlGains::new(pid.kp, pid.ki, pid.kd),
                pid.window_count,
                pid.window_second,
            ),
            state: TankState::Neutral,
            epoch: Instant::now(),
        }
    }

    /// Hysteresis memory carried into the next decision.
    pub fn state(&self) -> TankState {
        self.state
    }

    pub fn estimator(&self) -> &WindowedEstimator {
        &self.estimator
    }

    /// Decide and publish once, without holding for the period.
    pub async fn tick(&mut self) -> Result<TankState, ControlError> {
        let config = self.ctx.settings()?;
        let ttl = config.thermostat.loop_period() * 2;
        let pid = &config.pid;
        self.estimator.change_gains(ControlGains::new(pid.kp, pid.ki, pid.kd));
        self.estimator.set_window(pid.window_count, pid.window_second);

        let setpoint = match self.setpoints.lookup_setpoint(Utc::now()) {
            Ok(sp) => sp,
            Err(e) => {
                tracing::error!("setpoint lookup failed: {}", e);
                f64::NAN
            }
        };
        let temperature = self.ctx.bus.temperature().await;
        self.ctx.bus.publish_setpoint(setpoint, ttl).await;

        let limits = ThermostatLimits::from(&config.thermostat);
        let state = decide(setpoint, temperature, &limits, self.state);
        if state != self.state {
            tracing::info!("tank state {} -> {}", self.state, state);
        }
        self.state = state;

        let drive = if setpoint.is_nan() || temperature.is_nan() {
            tracing::warn!("setpoint {} / temperature {}; holding neutral", setpoint, temperature);
            0.0
        } else {
            let now = self.epoch.elapsed().as_secs_f64();
            self.estimator.weighted(now, setpoint - temperature)
        };
        tracing::info!("sp={:.2} t={:.2} state={} drive={:.3}", setpoint, temperature, state, drive);

        if self.ctx.gate.is_held().await {
            tracing::warn!("valve control inhibited, no op");
            return Ok(state);
        }
        self.ctx.bus.publish_tank_state(state, ttl).await;
        for (valve, fraction) in ValveChannel::ALL.into_iter().zip(power_levels(state, drive)) {
            self.ctx.bus.set_power_fraction(valve, fraction, ttl).await?;
        }
        Ok(state)
    }
}

#[async_trait]
impl Regime for DeployedRegime {
    fn name(&self) -> &'static str {
        "deployed"
    }

    fn context_mut(&mut self) -> &mut ControlContext {
        &mut self.ctx
    }

    async fn step(&mut self) -> Result<(), ControlError> {
        if self.ctx.bus.tank_mode().await? != TankMode::Deployed {
            return idle_backoff(&mut self.ctx).await;
        }
        self.tick().await?;
        let period = self.ctx.settings()?.thermostat.loop_period();
        hold(&mut self.ctx, period, TankMode::Deployed).await?;
        Ok(())
    }
}
