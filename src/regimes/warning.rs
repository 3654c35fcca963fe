// src/regimes/warning.rs
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tankctl_shared::Alarm;

use super::{HOLD_STEP, Regime};
use crate::context::ControlContext;
use crate::error::ControlError;

/// Sounds the alarm while the tank needs an operator's attention. Active in
/// every mode and never touches a valve.
pub struct WarningRegime {
    ctx: ControlContext,
    alarm: Arc<dyn Alarm>,
}

impl WarningRegime {
    pub fn new(ctx: ControlContext, alarm: Arc<dyn Alarm>) -> Self {
        Self { ctx, alarm }
    }

    /// Why the alarm should sound right now, if it should.
    pub async fn alarm_reason(&self) -> Option<String> {
        if let Err(e) = self.ctx.bus.tank_mode().await {
            return Some(format!("tank mode unreadable: {}", e));
        }
        if self.ctx.gate.is_held().await {
            return Some("valve control inhibited".to_string());
        }
        None
    }
}

#[async_trait]
impl Regime for WarningRegime {
    fn name(&self) -> &'static str {
        "warning"
    }

    fn context_mut(&mut self) -> &mut ControlContext {
        &mut self.ctx
    }

    async fn step(&mut self) -> Result<(), ControlError> {
        let config = self.ctx.settings()?.warning;
        let Some(reason) = self.alarm_reason().await else {
            return self.ctx.shutdown.sleep(HOLD_STEP).await;
        };
        tracing::warn!("alarm: {}", reason);
        let on = Duration::from_secs(config.beep_on_second);
        let off = Duration::from_secs(config.beep_off_second);
        if let Err(e) = self.alarm.sound(on).await {
            tracing::error!("alarm failed: {}", e);
        }
        self.ctx.shutdown.sleep(on + off).await
    }

    async fn on_exit(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::TANK_MODE_KEY;
    use crate::config::Config;
    use crate::regimes::run_regime;
    use crate::regimes::test_support::rig;

    fn config() -> Config {
        let mut config = Config::default();
        config.warning.beep_on_second = 1;
        config.warning.beep_off_second = 4;
        config
    }

    #[tokio::test(start_paused = true)]
    async fn test_quiet_without_reason() {
        let r = rig(config());
        let mut regime = WarningRegime::new(r.ctx.clone(), Arc::new(r.valves.clone()));
        for _ in 0..10 {
            regime.step().await.unwrap();
        }
        assert!(r.valves.beeps().is_empty());
        assert!(regime.alarm_reason().await.is_none());
        r.ctx.shutdown.check().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_beeps_while_inhibited() {
        let r = rig(config());
        r.ctx.gate.hold(Duration::from_secs(12)).await.unwrap();
        let regime = WarningRegime::new(r.ctx.clone(), Arc::new(r.valves.clone()));
        let task = tokio::spawn(run_regime(regime));

        tokio::time::sleep(Duration::from_secs(30)).await;
        r.trigger.trigger();
        task.await.unwrap();

        // at 0, 5 and 10 s; the lock expired at 12 s
        let beeps = r.valves.beeps();
        assert_eq!(beeps.len(), 3);
        assert!(beeps.iter().all(|(_, on)| *on == Duration::from_secs(1)));
        assert!(r.valves.commands().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_mode_raises_alarm() {
        let r = rig(config());
        r.ctx.bus.store().set(TANK_MODE_KEY, "\"sideways\"".to_string(), None).await.unwrap();
        let regime = WarningRegime::new(r.ctx.clone(), Arc::new(r.valves.clone()));
        let reason = regime.alarm_reason().await.unwrap();
        assert!(reason.contains("tank mode"), "{}", reason);
    }
}
