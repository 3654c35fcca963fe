//! # Controller Configuration
//!
//! Typed view of the operator's configuration file. Every regime re-reads the
//! configuration on each tick, so edits to the file take effect without a
//! restart.
//!
//! ## Example: TOML Configuration
//!
//! ```toml
//! [thermostat]
//! loop_period_second = 60
//! deadband_celsius = 0.2
//! high_alarm_celsius = 33.0
//! low_alarm_celsius = 18.0
//!
//! [pwm]
//! min_actuation_second = 2.0
//!
//! [pid]
//! kp = 2.0
//! window_count = 10
//! window_second = 120.0
//!
//! [maintenance]
//! cycle_interval_second = 3600
//! ```
//!
//! ## Example: Rust Usage
//!
//! ```rust
//! use tankctl::config::Config;
//! let config: Config = toml::from_str("[thermostat]\ndeadband_celsius = 0.5\n").unwrap();
//! assert_eq!(config.thermostat.deadband_celsius, 0.5);
//! assert_eq!(config.get("deadband_celsius").as_deref(), Some("0.5"));
//! assert!(config.validate().is_ok());
//! ```

// src/config.rs - Single configuration file
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main configuration struct for the tank controller.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub thermostat: ThermostatConfig,
    #[serde(default)]
    pub pwm: PwmConfig,
    #[serde(default)]
    pub pid: PidConfig,
    #[serde(default)]
    pub maintenance: MaintenanceConfig,
    #[serde(default)]
    pub warning: WarningConfig,
    #[serde(default)]
    pub profile: ProfileConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
}

/// Thermostat loop and alarm limits.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ThermostatConfig {
    /// Length of one deployed tick, which is also the duty-cycle period.
    #[serde(default = "default_loop_period_second")]
    pub loop_period_second: u64,
    #[serde(default = "default_deadband_celsius")]
    pub deadband_celsius: f64,
    #[serde(default = "default_high_alarm_celsius")]
    pub high_alarm_celsius: f64,
    #[serde(default = "default_low_alarm_celsius")]
    pub low_alarm_celsius: f64,
}

impl Default for ThermostatConfig {
    fn default() -> Self {
        Self {
            loop_period_second: default_loop_period_second(),
            deadband_celsius: default_deadband_celsius(),
            high_alarm_celsius: default_high_alarm_celsius(),
            low_alarm_celsius: default_low_alarm_celsius(),
        }
    }
}

/// Duty-cycle mixer settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PwmConfig {
    /// ON or OFF phases shorter than this are not actuated.
    #[serde(default = "default_min_actuation_second")]
    pub min_actuation_second: f64,
    /// Upper bound of the random delay before a mixer's first cycle.
    #[serde(default = "default_startup_jitter_second")]
    pub startup_jitter_second: f64,
}

impl Default for PwmConfig {
    fn default() -> Self {
        Self {
            min_actuation_second: default_min_actuation_second(),
            startup_jitter_second: default_startup_jitter_second(),
        }
    }
}

/// Estimator gains and history window.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PidConfig {
    #[serde(default = "default_kp")]
    pub kp: f64,
    #[serde(default)]
    pub ki: f64,
    #[serde(default)]
    pub kd: f64,
    #[serde(default = "default_window_count")]
    pub window_count: usize,
    #[serde(default = "default_window_second")]
    pub window_second: f64,
}

impl Default for PidConfig {
    fn default() -> Self {
        Self {
            kp: default_kp(),
            ki: 0.0,
            kd: 0.0,
            window_count: default_window_count(),
            window_second: default_window_second(),
        }
    }
}

/// Maintenance self-test choreography.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct MaintenanceConfig {
    #[serde(default = "default_heat_second")]
    pub heat_second: u64,
    #[serde(default = "default_cool_second")]
    pub cool_second: u64,
    /// Number of one-second flush ticks.
    #[serde(default = "default_flush_ticks")]
    pub flush_ticks: u64,
    /// Length of the Neutral hold that ends each cycle.
    #[serde(default = "default_cycle_interval_second")]
    pub cycle_interval_second: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            heat_second: default_heat_second(),
            cool_second: default_cool_second(),
            flush_ticks: default_flush_ticks(),
            cycle_interval_second: default_cycle_interval_second(),
        }
    }
}

/// Alarm duty and operator inhibit duration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct WarningConfig {
    #[serde(default = "default_beep_on_second")]
    pub beep_on_second: u64,
    #[serde(default = "default_beep_off_second")]
    pub beep_off_second: u64,
    #[serde(default = "default_inhibit_second")]
    pub inhibit_second: u64,
}

impl Default for WarningConfig {
    fn default() -> Self {
        Self {
            beep_on_second: default_beep_on_second(),
            beep_off_second: default_beep_off_second(),
            inhibit_second: default_inhibit_second(),
        }
    }
}

/// Setpoint profile location.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ProfileConfig {
    #[serde(default = "default_profile_path")]
    pub path: String,
    /// Offset of the profile's local time from UTC, in hours.
    #[serde(default = "default_utc_offset_hours")]
    pub utc_offset_hours: i32,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            path: default_profile_path(),
            utc_offset_hours: default_utc_offset_hours(),
        }
    }
}

/// Simulated tank used by `tankctl run`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SimulationConfig {
    #[serde(default = "default_initial_celsius")]
    pub initial_celsius: f64,
    #[serde(default = "default_hot_supply_celsius")]
    pub hot_supply_celsius: f64,
    #[serde(default = "default_cold_supply_celsius")]
    pub cold_supply_celsius: f64,
    #[serde(default = "default_ambient_supply_celsius")]
    pub ambient_supply_celsius: f64,
    #[serde(default = "default_room_celsius")]
    pub room_celsius: f64,
    /// Fraction of the tank volume exchanged per second by one open valve.
    #[serde(default = "default_exchange_rate")]
    pub exchange_rate: f64,
    /// Fraction of the tank/room difference lost per second.
    #[serde(default = "default_loss_rate")]
    pub loss_rate: f64,
    #[serde(default = "default_sensor_noise_celsius")]
    pub sensor_noise_celsius: f64,
    /// Fallback setpoint used when no profile file exists.
    #[serde(default)]
    pub setpoint_celsius: Option<f64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            initial_celsius: default_initial_celsius(),
            hot_supply_celsius: default_hot_supply_celsius(),
            cold_supply_celsius: default_cold_supply_celsius(),
            ambient_supply_celsius: default_ambient_supply_celsius(),
            room_celsius: default_room_celsius(),
            exchange_rate: default_exchange_rate(),
            loss_rate: default_loss_rate(),
            sensor_noise_celsius: default_sensor_noise_celsius(),
            setpoint_celsius: None,
        }
    }
}

fn default_loop_period_second() -> u64 { 60 }
fn default_deadband_celsius() -> f64 { 0.2 }
fn default_high_alarm_celsius() -> f64 { 35.0 }
fn default_low_alarm_celsius() -> f64 { 15.0 }
fn default_min_actuation_second() -> f64 { 2.0 }
fn default_startup_jitter_second() -> f64 { 2.3 }
fn default_kp() -> f64 { 2.0 }
fn default_window_count() -> usize { 10 }
fn default_window_second() -> f64 { 120.0 }
fn default_heat_second() -> u64 { 5 }
fn default_cool_second() -> u64 { 5 }
fn default_flush_ticks() -> u64 { 50 }
fn default_cycle_interval_second() -> u64 { 3600 }
fn default_beep_on_second() -> u64 { 1 }
fn default_beep_off_second() -> u64 { 9 }
fn default_inhibit_second() -> u64 { 15 * 60 }
fn default_profile_path() -> String { "profile.csv".to_string() }
fn default_utc_offset_hours() -> i32 { -10 }
fn default_initial_celsius() -> f64 { 24.0 }
fn default_hot_supply_celsius() -> f64 { 34.0 }
fn default_cold_supply_celsius() -> f64 { 17.0 }
fn default_ambient_supply_celsius() -> f64 { 25.0 }
fn default_room_celsius() -> f64 { 24.0 }
fn default_exchange_rate() -> f64 { 0.01 }
fn default_loss_rate() -> f64 { 0.0005 }
fn default_sensor_noise_celsius() -> f64 { 0.01 }

impl ThermostatConfig {
    pub fn loop_period(&self) -> Duration {
        Duration::from_secs(self.loop_period_second)
    }
}

impl PwmConfig {
    pub fn min_actuation(&self) -> Result<Duration, ConfigError> {
        seconds("pwm.min_actuation_second", self.min_actuation_second)
    }

    pub fn startup_jitter(&self) -> Result<Duration, ConfigError> {
        seconds("pwm.startup_jitter_second", self.startup_jitter_second)
    }
}

/// `value` seconds as a [`Duration`]. Negative, NaN, infinite and
/// out-of-range values are rejected instead of panicking.
pub fn seconds(field: &str, value: f64) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(value)
        .map_err(|e| ConfigError::Invalid(format!("{} = {} is not a duration: {}", field, value, e)))
}

impl Config {
    /// Check the settings the control loops rely on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = &self.thermostat;
        if t.loop_period_second == 0 {
            return Err(ConfigError::Invalid("thermostat.loop_period_second must be > 0".into()));
        }
        if !(t.deadband_celsius >= 0.0) {
            return Err(ConfigError::Invalid("thermostat.deadband_celsius must be >= 0".into()));
        }
        if !(t.low_alarm_celsius <= t.high_alarm_celsius) {
            return Err(ConfigError::Invalid(format!(
                "low alarm {} is above high alarm {}",
                t.low_alarm_celsius, t.high_alarm_celsius
            )));
        }
        self.pwm.min_actuation()?;
        self.pwm.startup_jitter()?;
        if self.pid.window_count == 0 || !(self.pid.window_second > 0.0) {
            return Err(ConfigError::Invalid("pid window must hold at least one sample".into()));
        }
        Ok(())
    }

    /// Look `key` up in every section and render it as a string.
    ///
    /// This is the flat `get_config(key)` view of the file; sections are
    /// searched by name and the first match wins.
    pub fn get(&self, key: &str) -> Option<String> {
        let rendered = toml::to_string(self).ok()?;
        let table: toml::Table = toml::from_str(&rendered).ok()?;
        if let Some(v) = table.get(key) {
            return Some(render(v));
        }
        table
            .values()
            .filter_map(|section| section.as_table())
            .find_map(|section| section.get(key).map(render))
    }
}

fn render(value: &toml::Value) -> String {
    match value {
        toml::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    match std::fs::read_to_string(path) {
        Ok(contents) => match toml::from_str::<Config>(&contents) {
            Ok(config) => {
                config.validate()?;
                Ok(config)
            }
            Err(e) => {
                tracing::error!("Failed to parse config TOML: {}", e);
                Err(ConfigError::Toml(e))
            }
        },
        Err(e) => {
            tracing::error!("Failed to read config file '{}': {}", path.display(), e);
            Err(ConfigError::Io(e))
        }
    }
}

/// Source of configuration, polled fresh on every tick.
pub trait ConfigSource: Send + Sync {
    fn settings(&self) -> Result<Config, ConfigError>;
}

/// Configuration file re-read on every poll.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    path: PathBuf,
}

impl ConfigFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigSource for ConfigFile {
    fn settings(&self) -> Result<Config, ConfigError> {
        load_config(&self.path)
    }
}

/// In-memory configuration that can be replaced while the controller runs.
#[derive(Debug, Default)]
pub struct StaticConfig {
    inner: RwLock<Config>,
}

impl StaticConfig {
    pub fn new(config: Config) -> Self {
        Self { inner: RwLock::new(config) }
    }

    pub fn replace(&self, config: Config) {
        match self.inner.write() {
            Ok(mut guard) => *guard = config,
            Err(poisoned) => *poisoned.into_inner() = config,
        }
    }
}

impl ConfigSource for StaticConfig {
    fn settings(&self) -> Result<Config, ConfigError> {
        let config = match self.inner.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        config.validate()?;
        Ok(config)
    }
}
