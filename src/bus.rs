// src/bus.rs
//! Typed access to the shared tank state.
//!
//! Values are JSON encoded under the key names the rest of the installation
//! (web panel, sensor service, telemetry relay) already uses.

use crate::store::{SharedStore, StoreError};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tankctl_shared::{TankMode, TankState, ValveChannel};

pub const TANK_MODE_KEY: &str = "tank_mode";
pub const TANK_STATE_KEY: &str = "tank_state";
pub const SETPOINT_KEY: &str = "setpoint";
pub const TEMPERATURE_KEY: &str = "t0c";
pub const INHIBIT_KEY: &str = "inhibit";

pub fn power_key(valve: ValveChannel) -> String {
    format!("pwm_{}", valve.as_str())
}

#[derive(Clone)]
pub struct TankBus {
    store: Arc<dyn SharedStore>,
}

impl TankBus {
    pub fn new(store: Arc<dyn SharedStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn SharedStore> {
        &self.store
    }

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.store.get(key).await? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|source| StoreError::Encoding { key: key.to_string(), source }),
            None => Ok(None),
        }
    }

    async fn set_json<T: Serialize>(&self, key: &str, value: &T, ttl: Option<Duration>) -> Result<(), StoreError> {
        let raw = serde_json::to_string(value)
            .map_err(|source| StoreError::Encoding { key: key.to_string(), source })?;
        self.store.set(key, raw, ttl).await
    }

    /// Current operating mode. An unset mode means a fresh installation, which
    /// starts in maintenance.
    pub async fn tank_mode(&self) -> Result<TankMode, StoreError> {
        match self.store.get(TANK_MODE_KEY).await? {
            None => {
                tracing::warn!("tank mode unset, defaulting to maintenance");
                Ok(TankMode::Maintenance)
            }
            Some(raw) => {
                let text = serde_json::from_str::<String>(&raw).unwrap_or(raw);
                text.parse().map_err(|_| StoreError::Invalid {
                    key: TANK_MODE_KEY.to_string(),
                    value: text,
                })
            }
        }
    }

    /// Operator action; the controller itself never calls this.
    pub async fn set_tank_mode(&self, mode: TankMode) -> Result<(), StoreError> {
        tracing::info!("tank mode -> {}", mode);
        self.set_json(TANK_MODE_KEY, &mode, None).await
    }

    /// Calibrated tank temperature, NaN when absent, stale or unreadable.
    pub async fn temperature(&self) -> f64 {
        match self.get_json::<Option<f64>>(TEMPERATURE_KEY).await {
            Ok(Some(Some(t))) => t,
            Ok(_) => f64::NAN,
            Err(e) => {
                tracing::error!("failed to read temperature: {}", e);
                f64::NAN
            }
        }
    }

    pub async fn publish_temperature(&self, celsius: f64, ttl: Duration) -> Result<(), StoreError> {
        self.set_json(TEMPERATURE_KEY, &celsius, Some(ttl)).await
    }

    /// Power fraction for `valve`; `None` means the mixer leaves the valve alone.
    pub async fn power_fraction(&self, valve: ValveChannel) -> Result<Option<f64>, StoreError> {
        self.get_json::<Option<f64>>(&power_key(valve)).await.map(Option::flatten)
    }

    pub async fn set_power_fraction(&self, valve: ValveChannel, fraction: f64, ttl: Duration) -> Result<(), StoreError> {
        self.set_json(&power_key(valve), &fraction, Some(ttl)).await
    }

    pub async fn clear_power_fractions(&self) -> Result<(), StoreError> {
        for valve in ValveChannel::ALL {
            self.store.delete(&power_key(valve)).await?;
        }
        Ok(())
    }

    /// Best-effort telemetry: failures are logged at debug level and dropped.
    pub async fn publish_tank_state(&self, state: TankState, ttl: Duration) {
        if let Err(e) = self.set_json(TANK_STATE_KEY, &state, Some(ttl)).await {
            tracing::debug!("tank state not published: {}", e);
        }
    }

    pub async fn published_tank_state(&self) -> Result<Option<TankState>, StoreError> {
        self.get_json(TANK_STATE_KEY).await
    }

    /// Best-effort telemetry; NaN is published as null.
    pub async fn publish_setpoint(&self, setpoint: f64, ttl: Duration) {
        let value = if setpoint.is_nan() { None } else { Some(setpoint) };
        if let Err(e) = self.set_json(SETPOINT_KEY, &value, Some(ttl)).await {
            tracing::debug!("setpoint not published: {}", e);
        }
    }

    pub async fn clear_setpoint(&self) -> Result<(), StoreError> {
        self.store.delete(SETPOINT_KEY).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn bus() -> TankBus {
        TankBus::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn test_mode_defaults_to_maintenance() {
        let bus = bus();
        assert_eq!(bus.tank_mode().await.unwrap(), TankMode::Maintenance);
        bus.set_tank_mode(TankMode::Deployed).await.unwrap();
        assert_eq!(bus.tank_mode().await.unwrap(), TankMode::Deployed);
    }

    #[tokio::test]
    async fn test_mode_accepts_bare_strings_and_rejects_garbage() {
        let bus = bus();
        bus.store().set(TANK_MODE_KEY, "deployed".into(), None).await.unwrap();
        assert_eq!(bus.tank_mode().await.unwrap(), TankMode::Deployed);
        bus.store().set(TANK_MODE_KEY, "\"paused\"".into(), None).await.unwrap();
        assert!(matches!(bus.tank_mode().await, Err(StoreError::Invalid { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_temperature_goes_nan_when_stale() {
        let bus = bus();
        assert!(bus.temperature().await.is_nan());
        bus.publish_temperature(26.5, Duration::from_secs(12)).await.unwrap();
        assert_eq!(bus.temperature().await, 26.5);
        tokio::time::advance(Duration::from_secs(13)).await;
        assert!(bus.temperature().await.is_nan());
    }

    #[tokio::test]
    async fn test_unparseable_temperature_is_nan() {
        let bus = bus();
        bus.store().set(TEMPERATURE_KEY, "warm".into(), None).await.unwrap();
        assert!(bus.temperature().await.is_nan());
    }

    #[tokio::test]
    async fn test_power_fractions() {
        let bus = bus();
        assert_eq!(bus.power_fraction(ValveChannel::Hot).await.unwrap(), None);
        bus.set_power_fraction(ValveChannel::Hot, 0.4, Duration::from_secs(20)).await.unwrap();
        assert_eq!(bus.power_fraction(ValveChannel::Hot).await.unwrap(), Some(0.4));
        assert_eq!(bus.store().get("pwm_hot").await.unwrap().as_deref(), Some("0.4"));
        bus.clear_power_fractions().await.unwrap();
        assert_eq!(bus.power_fraction(ValveChannel::Hot).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_publish_tank_state_and_setpoint() {
        let bus = bus();
        bus.publish_tank_state(TankState::Cooling, Duration::from_secs(5)).await;
        assert_eq!(bus.published_tank_state().await.unwrap(), Some(TankState::Cooling));
        bus.publish_setpoint(f64::NAN, Duration::from_secs(5)).await;
        assert_eq!(bus.store().get(SETPOINT_KEY).await.unwrap().as_deref(), Some("null"));
    }
}
