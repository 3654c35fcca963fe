// tankctl_shared: vocabulary types and hardware traits shared by the controller and drivers

pub mod hardware_traits;

pub use hardware_traits::{ActuatorError, Alarm, ValveActuator};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Operating mode of the tank. Owned by the operator; the controller only reads it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TankMode {
    Deployed,
    Maintenance,
}

impl TankMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TankMode::Deployed => "deployed",
            TankMode::Maintenance => "maintenance",
        }
    }
}

impl fmt::Display for TankMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TankMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "deployed" => Ok(TankMode::Deployed),
            "maintenance" => Ok(TankMode::Maintenance),
            other => Err(format!("{} is not a valid tank mode", other)),
        }
    }
}

/// Discrete valve regime. Also the hysteresis memory of the thermostat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TankState {
    #[default]
    Neutral,
    Heating,
    Cooling,
    Flush,
}

impl TankState {
    pub const ALL: [TankState; 4] = [
        TankState::Neutral,
        TankState::Heating,
        TankState::Cooling,
        TankState::Flush,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TankState::Neutral => "neutral",
            TankState::Heating => "heating",
            TankState::Cooling => "cooling",
            TankState::Flush => "flush",
        }
    }

    /// The valve left open in this regime, if any.
    pub fn open_valve(&self) -> Option<ValveChannel> {
        match self {
            TankState::Neutral => None,
            TankState::Heating => Some(ValveChannel::Hot),
            TankState::Cooling => Some(ValveChannel::Cold),
            TankState::Flush => Some(ValveChannel::Ambient),
        }
    }

    /// Desired on/off position of `valve` in this regime.
    pub fn valve_open(&self, valve: ValveChannel) -> bool {
        self.open_valve() == Some(valve)
    }
}

impl fmt::Display for TankState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TankState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TankState::ALL
            .into_iter()
            .find(|state| state.as_str() == s.trim())
            .ok_or_else(|| format!("unknown tank state {}", s))
    }
}

/// One physical on/off valve feeding the tank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValveChannel {
    Hot,
    Cold,
    Ambient,
}

impl ValveChannel {
    pub const ALL: [ValveChannel; 3] = [ValveChannel::Hot, ValveChannel::Cold, ValveChannel::Ambient];

    pub fn as_str(&self) -> &'static str {
        match self {
            ValveChannel::Hot => "hot",
            ValveChannel::Cold => "cold",
            ValveChannel::Ambient => "ambient",
        }
    }
}

impl fmt::Display for ValveChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_each_regime_opens_at_most_one_valve() {
        for state in TankState::ALL {
            let open = ValveChannel::ALL
                .iter()
                .filter(|v| state.valve_open(**v))
                .count();
            let expected = if state == TankState::Neutral { 0 } else { 1 };
            assert_eq!(open, expected, "{}", state);
        }
        assert!(TankState::Flush.valve_open(ValveChannel::Ambient));
        assert!(TankState::Heating.valve_open(ValveChannel::Hot));
        assert!(TankState::Cooling.valve_open(ValveChannel::Cold));
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("deployed".parse::<TankMode>(), Ok(TankMode::Deployed));
        assert_eq!(" Maintenance\n".parse::<TankMode>(), Ok(TankMode::Maintenance));
        assert!("paused".parse::<TankMode>().is_err());
    }

    #[test]
    fn test_state_round_trips_through_str() {
        assert_eq!("flush".parse::<TankState>(), Ok(TankState::Flush));
        assert!("boiling".parse::<TankState>().is_err());
    }
}
