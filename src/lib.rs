// src/lib.rs - Tank thermostat control engine
pub mod bus;
pub mod config;
pub mod context;
pub mod error;
pub mod estimator;
pub mod hardware;
pub mod inhibit;
pub mod mixer;
pub mod profile;
pub mod regimes;
pub mod shutdown;
pub mod sim;
pub mod store;
pub mod supervisor;
pub mod thermostat;

pub use config::Config;
pub use context::ControlContext;
pub use error::ControlError;
pub use supervisor::ModeSupervisor;
pub use tankctl_shared::{TankMode, TankState, ValveChannel};
