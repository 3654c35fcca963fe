// src/sim/mod.rs
//! Simulated tank for bench runs.
//!
//! A first-order thermal model: each open valve exchanges part of the tank
//! volume with its supply per second, and the tank loses heat to the room.
//! [`run_plant`] steps the model once a second from the simulated valve
//! positions and publishes the reading the way the sensor service would.

use std::time::Duration;
use tankctl_shared::ValveChannel;

use crate::bus::TankBus;
use crate::config::SimulationConfig;
use crate::hardware::SimulatedValves;
use crate::shutdown::Shutdown;

pub const PLANT_STEP: Duration = Duration::from_secs(1);
/// A reading older than this is treated as missing by the controller.
pub const READING_TTL: Duration = Duration::from_secs(12);

#[derive(Debug, Clone, PartialEq)]
pub struct TankPlant {
    pub temperature: f64,
    config: SimulationConfig,
}

impl TankPlant {
    pub fn new(config: SimulationConfig) -> Self {
        Self {
            temperature: config.initial_celsius,
            config,
        }
    }

    fn supply(&self, valve: ValveChannel) -> f64 {
        match valve {
            ValveChannel::Hot => self.config.hot_supply_celsius,
            ValveChannel::Cold => self.config.cold_supply_celsius,
            ValveChannel::Ambient => self.config.ambient_supply_celsius,
        }
    }

    /// Advance `dt` seconds with the valves in `open` (hot, cold, ambient).
    pub fn update(&mut self, dt: f64, open: [bool; 3]) -> f64 {
        let c = &self.config;
        let exchange: f64 = ValveChannel::ALL
            .into_iter()
            .zip(open)
            .filter(|(_, is_open)| *is_open)
            .map(|(valve, _)| c.exchange_rate * (self.supply(valve) - self.temperature))
            .sum();
        let loss = c.loss_rate * (self.temperature - c.room_celsius);
        self.temperature += (exchange - loss) * dt;
        self.temperature
    }

    /// Sensor view of the tank: true temperature plus uniform noise.
    pub fn reading(&self) -> f64 {
        self.temperature + self.config.sensor_noise_celsius * (rand::random::<f64>() - 0.5)
    }
}

/// Step `plant` every second and publish its reading until shutdown.
pub async fn run_plant(mut plant: TankPlant, valves: SimulatedValves, bus: TankBus, mut shutdown: Shutdown) {
    tracing::info!("simulated tank at {:.2}C", plant.temperature);
    loop {
        let t = plant.update(PLANT_STEP.as_secs_f64(), valves.positions());
        tracing::trace!("tank {:.3}C", t);
        if let Err(e) = bus.publish_temperature(plant.reading(), READING_TTL).await {
            tracing::error!("failed to publish temperature: {}", e);
        }
        if shutdown.sleep(PLANT_STEP).await.is_err() {
            break;
        }
    }
    tracing::info!("simulated tank stopped at {:.2}C", plant.temperature);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shutdown;
    use crate::store::MemoryStore;
    use std::sync::Arc;

    fn quiet() -> SimulationConfig {
        SimulationConfig {
            sensor_noise_celsius: 0.0,
            ..SimulationConfig::default()
        }
    }

    #[test]
    fn test_hot_valve_warms_tank() {
        let mut plant = TankPlant::new(quiet());
        let before = plant.temperature;
        for _ in 0..60 {
            plant.update(1.0, [true, false, false]);
        }
        assert!(plant.temperature > before + 1.0);
        assert!(plant.temperature < quiet().hot_supply_celsius);
    }

    #[test]
    fn test_cold_valve_cools_tank() {
        let mut plant = TankPlant::new(quiet());
        plant.update(10.0, [false, true, false]);
        assert!(plant.temperature < quiet().initial_celsius);
    }

    #[test]
    fn test_closed_tank_drifts_to_room() {
        let mut plant = TankPlant::new(SimulationConfig {
            initial_celsius: 30.0,
            loss_rate: 0.01,
            ..quiet()
        });
        for _ in 0..2000 {
            plant.update(1.0, [false; 3]);
        }
        assert!((plant.temperature - quiet().room_celsius).abs() < 0.01);
    }

    #[tokio::test(start_paused = true)]
    async fn test_plant_publishes_reading() {
        let (trigger, rx) = shutdown::channel();
        let bus = TankBus::new(Arc::new(MemoryStore::new()));
        let task = tokio::spawn(run_plant(TankPlant::new(quiet()), SimulatedValves::new(), bus.clone(), rx));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        let t = bus.temperature().await;
        assert!((t - quiet().initial_celsius).abs() < 0.01, "{}", t);

        trigger.trigger();
        task.await.unwrap();
        tokio::time::sleep(READING_TTL).await;
        assert!(bus.temperature().await.is_nan());
    }
}
