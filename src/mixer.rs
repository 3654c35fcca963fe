// src/mixer.rs
//! Duty-cycle mixer.
//!
//! One [`DutyCycleTender`] per valve turns the valve's power fraction into an
//! ON phase and an OFF phase within each loop period. Tenders start after a
//! random delay and add a little jitter between cycles, so the three valves
//! drift apart instead of switching together.

use std::time::Duration;
use tankctl_shared::ValveChannel;

use crate::context::ControlContext;
use crate::error::ControlError;

/// Wait used instead of a phase while the inhibit lock is held.
pub const INHIBIT_POLL: Duration = Duration::from_secs(1);
/// Pause after a failed cycle.
pub const ERROR_BACKOFF: Duration = Duration::from_secs(1);
const MAX_CYCLE_JITTER_MICROS: u64 = 1000;
const STARTUP_JITTER_FALLBACK: Duration = Duration::from_millis(2300);

/// ON/OFF split of one period.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DutyPlan {
    /// Fraction after clipping to [0, 1].
    pub fraction: f64,
    pub on: Duration,
    pub off: Duration,
    pub min_actuation: Duration,
}

impl DutyPlan {
    pub fn new(fraction: f64, period: Duration, min_actuation: Duration) -> Self {
        let clipped = if fraction.is_nan() { 0.0 } else { fraction.clamp(0.0, 1.0) };
        let on = period.mul_f64(clipped);
        Self {
            fraction: clipped,
            on,
            off: period.saturating_sub(on),
            min_actuation,
        }
    }

    /// Phases shorter than the valve's minimum dwell are not actuated.
    pub fn actuate_on(&self) -> bool {
        !self.on.is_zero() && self.on >= self.min_actuation
    }

    pub fn actuate_off(&self) -> bool {
        !self.off.is_zero() && self.off >= self.min_actuation
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseOutcome {
    Actuated,
    /// Command sent but the driver reported an error; the phase was still held.
    Failed,
    BelowThreshold,
    Inhibited,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CycleReport {
    /// No fraction defined; the valve was left alone for one period.
    Undefined,
    Ran {
        fraction: f64,
        on: PhaseOutcome,
        off: PhaseOutcome,
    },
}

pub struct DutyCycleTender {
    valve: ValveChannel,
    ctx: ControlContext,
}

impl DutyCycleTender {
    pub fn new(valve: ValveChannel, ctx: ControlContext) -> Self {
        Self { valve, ctx }
    }

    pub fn valve(&self) -> ValveChannel {
        self.valve
    }

    /// Run until shutdown, then close the valve whatever happened.
    pub async fn run(mut self) {
        let result = self.cycle_loop().await;
        tracing::info!("{} tender stopping ({:?})", self.valve, result.err());
        // always turn off the valve on exit
        let _ = self.ctx.valves.turn_off(self.valve).await;
    }

    async fn cycle_loop(&mut self) -> Result<(), ControlError> {
        let startup = self
            .ctx
            .config
            .settings()
            .and_then(|c| c.pwm.startup_jitter())
            .unwrap_or_else(|e| {
                tracing::warn!("{} startup jitter unavailable: {}", self.valve, e);
                STARTUP_JITTER_FALLBACK
            });
        self.ctx.shutdown.sleep(startup.mul_f64(rand::random::<f64>())).await?;

        loop {
            match self.run_cycle().await {
                Ok(report) => tracing::trace!("{} cycle: {:?}", self.valve, report),
                Err(ControlError::Cancelled) => return Err(ControlError::Cancelled),
                Err(e) => {
                    tracing::error!("{} cycle failed: {}", self.valve, e);
                    self.ctx.shutdown.sleep(ERROR_BACKOFF).await?;
                }
            }
            let jitter = Duration::from_micros(rand::random_range(0..MAX_CYCLE_JITTER_MICROS));
            self.ctx.shutdown.sleep(jitter).await?;
        }
    }

    /// One period: read the fraction, then the ON phase, then the OFF phase.
    /// Issues at most one ON and one OFF command.
    pub async fn run_cycle(&mut self) -> Result<CycleReport, ControlError> {
        let config = self.ctx.settings()?;
        let period = config.thermostat.loop_period();
        let min_actuation = config.pwm.min_actuation()?;

        let Some(fraction) = self.ctx.bus.power_fraction(self.valve).await? else {
            tracing::info!("pwm_{} undefined. No action.", self.valve);
            self.ctx.shutdown.sleep(period).await?;
            return Ok(CycleReport::Undefined);
        };

        let plan = DutyPlan::new(fraction, period, min_actuation);
        if plan.fraction != fraction {
            tracing::warn!("pwm_{}={} out of bound; clipped to {}", self.valve, fraction, plan.fraction);
        }
        tracing::info!("{}: {:.0}%", self.valve, 100.0 * plan.fraction);

        let on = self.phase(true, plan.on, plan.actuate_on()).await?;
        // the lock may have been taken during the ON phase; phase() checks again
        let off = self.phase(false, plan.off, plan.actuate_off()).await?;
        Ok(CycleReport::Ran { fraction: plan.fraction, on, off })
    }

    async fn phase(&mut self, open: bool, duration: Duration, actuate: bool) -> Result<PhaseOutcome, ControlError> {
        if self.ctx.gate.is_held().await {
            tracing::debug!("{} phase skipped, valve control inhibited", self.valve);
            self.ctx.shutdown.sleep(INHIBIT_POLL).await?;
            return Ok(PhaseOutcome::Inhibited);
        }
        if !actuate {
            return Ok(PhaseOutcome::BelowThreshold);
        }
        let result = if open {
            self.ctx.valves.turn_on(self.valve).await
        } else {
            self.ctx.valves.turn_off(self.valve).await
        };
        self.ctx.shutdown.sleep(duration).await?;
        Ok(match result {
            Ok(()) => PhaseOutcome::Actuated,
            Err(_) => PhaseOutcome::Failed,
        })
    }
}
