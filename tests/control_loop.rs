// End-to-end tests of the regimes and mixers running together on virtual time

use std::sync::Arc;
use std::time::Duration;
use tankctl::config::{Config, StaticConfig};
use tankctl::hardware::{SimulatedValves, ValveBank};
use tankctl::profile::ConstantSetpoint;
use tankctl::sim::TankPlant;
use tankctl::store::MemoryStore;
use tankctl::{ModeSupervisor, TankMode, TankState, ValveChannel};
use tokio_test::assert_ok;

struct Tank {
    valves: SimulatedValves,
    supervisor: ModeSupervisor,
}

fn tank(config: Config, setpoint: f64) -> Tank {
    let valves = SimulatedValves::new();
    let supervisor = ModeSupervisor::new(
        Arc::new(MemoryStore::new()),
        ValveBank::new(Arc::new(valves.clone())),
        Arc::new(StaticConfig::new(config)),
        Arc::new(ConstantSetpoint(setpoint)),
        Arc::new(valves.clone()),
    );
    Tank { valves, supervisor }
}

fn fast_config() -> Config {
    let mut config = Config::default();
    config.thermostat.loop_period_second = 10;
    config.thermostat.deadband_celsius = 0.5;
    config.pwm.min_actuation_second = 2.0;
    config.pid.kp = 0.5;
    config.simulation.sensor_noise_celsius = 0.0;
    config
}

#[tokio::test(start_paused = true)]
async fn deployed_tank_is_heated_through_the_mixer() {
    let config = fast_config();
    let mut t = tank(config.clone(), 26.0);
    let bus = t.supervisor.context().bus;
    assert_ok!(bus.set_tank_mode(TankMode::Deployed).await);

    t.supervisor.spawn_plant(TankPlant::new(config.simulation.clone()), t.valves.clone());
    tokio::time::sleep(Duration::from_millis(100)).await;
    t.supervisor.start();

    tokio::time::sleep(Duration::from_secs(15)).await;
    assert_eq!(assert_ok!(bus.published_tank_state().await), Some(TankState::Heating));
    let hot_opened = t.valves.commands_for(ValveChannel::Hot).iter().filter(|c| c.open).count();
    assert!(hot_opened > 0);
    assert!(t.valves.commands_for(ValveChannel::Cold).iter().all(|c| !c.open));
    assert!(bus.temperature().await > config.simulation.initial_celsius);

    t.supervisor.shutdown().await;
    assert_eq!(t.valves.positions(), [false; 3]);
    assert_eq!(assert_ok!(bus.published_tank_state().await), Some(TankState::Neutral));
}

#[tokio::test(start_paused = true)]
async fn inhibit_suppresses_every_actuation_path() {
    let mut t = tank(fast_config(), 26.0);
    let ctx = t.supervisor.context();
    assert_ok!(ctx.gate.hold(Duration::from_secs(3600)).await);
    assert_ok!(ctx.bus.publish_temperature(20.0, Duration::from_secs(3600)).await);
    for valve in ValveChannel::ALL {
        assert_ok!(ctx.bus.set_power_fraction(valve, 0.5, Duration::from_secs(3600)).await);
    }

    // maintenance (unset mode) and the mixers would both actuate without the lock
    t.supervisor.start();
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(t.valves.commands().is_empty());
    assert!(!t.valves.beeps().is_empty());

    t.supervisor.shutdown().await;
    assert_eq!(t.valves.positions(), [false; 3]);
}

#[tokio::test(start_paused = true)]
async fn switching_to_maintenance_takes_valves_from_the_mixers() {
    let mut t = tank(fast_config(), 26.0);
    let bus = t.supervisor.context().bus;
    assert_ok!(bus.set_tank_mode(TankMode::Deployed).await);
    assert_ok!(bus.publish_temperature(24.0, Duration::from_secs(3600)).await);
    t.supervisor.start();

    tokio::time::sleep(Duration::from_secs(25)).await;
    assert_ok!(bus.set_tank_mode(TankMode::Maintenance).await);
    // maintenance notices within its idle backoff and withdraws the fractions
    tokio::time::sleep(Duration::from_secs(4)).await;
    for valve in ValveChannel::ALL {
        assert_eq!(assert_ok!(bus.power_fraction(valve).await), None);
    }

    t.supervisor.shutdown().await;
    assert_eq!(t.valves.positions(), [false; 3]);
}

#[tokio::test(start_paused = true)]
async fn shutdown_during_heating_closes_all_valves_promptly() {
    let mut t = tank(fast_config(), 26.0);
    t.supervisor.start();
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(t.valves.is_open(ValveChannel::Hot));

    let start = tokio::time::Instant::now();
    t.supervisor.shutdown().await;
    assert!(start.elapsed() <= Duration::from_secs(1));
    assert_eq!(t.valves.positions(), [false; 3]);
}
