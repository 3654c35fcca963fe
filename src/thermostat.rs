// src/thermostat.rs
//! Hysteretic thermostat decision.
//!
//! [`decide`] is pure: the previous [`TankState`] goes in, the next one comes
//! out, and the caller threads it through successive ticks. Inside the
//! deadband the result depends on that previous state; everywhere else it is
//! a function of the readings alone.

use tankctl_shared::TankState;

/// Limits the decision is evaluated against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThermostatLimits {
    pub deadband: f64,
    pub high_alarm: f64,
    pub low_alarm: f64,
}

impl From<&crate::config::ThermostatConfig> for ThermostatLimits {
    fn from(config: &crate::config::ThermostatConfig) -> Self {
        Self {
            deadband: config.deadband_celsius,
            high_alarm: config.high_alarm_celsius,
            low_alarm: config.low_alarm_celsius,
        }
    }
}

/// Next valve regime. NaN stands for a missing setpoint or temperature.
pub fn decide(setpoint: f64, temperature: f64, limits: &ThermostatLimits, previous: TankState) -> TankState {
    let half = limits.deadband / 2.0;

    if setpoint.is_nan() {
        TankState::Neutral
    } else if temperature.is_nan() {
        TankState::Neutral
    } else if temperature > limits.high_alarm || temperature < limits.low_alarm {
        TankState::Flush
    } else if temperature >= setpoint + half {
        TankState::Cooling
    } else if temperature <= setpoint - half {
        TankState::Heating
    } else if temperature > setpoint && previous == TankState::Heating {
        // past the setpoint: release heating before the upper band edge
        TankState::Neutral
    } else if temperature <= setpoint && previous == TankState::Cooling {
        TankState::Neutral
    } else {
        previous
    }
}
