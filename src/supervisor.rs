// src/supervisor.rs
//! Owns every control task for one run.
//!
//! [`ModeSupervisor::start`] spawns the three regimes and one duty-cycle
//! tender per valve, each inside its own span. [`ModeSupervisor::shutdown`]
//! fires the termination signal, waits a bounded time for the tasks to
//! finish their own cleanup and then closes every valve regardless.

use std::sync::Arc;
use std::time::Duration;
use tankctl_shared::{Alarm, ValveChannel};
use tokio::task::JoinSet;
use tracing::Instrument;

use crate::config::ConfigSource;
use crate::context::ControlContext;
use crate::hardware::{SimulatedValves, ValveBank};
use crate::mixer::DutyCycleTender;
use crate::profile::SetpointSource;
use crate::regimes::{self, DeployedRegime, MaintenanceRegime, WarningRegime, run_regime};
use crate::shutdown::{self, ShutdownTrigger};
use crate::sim::{self, TankPlant};
use crate::store::SharedStore;

/// Longest shutdown waits for tasks before aborting them.
pub const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

pub struct ModeSupervisor {
    store: Arc<dyn SharedStore>,
    valves: ValveBank,
    config: Arc<dyn ConfigSource>,
    setpoints: Arc<dyn SetpointSource>,
    alarm: Arc<dyn Alarm>,
    trigger: ShutdownTrigger,
    tasks: JoinSet<()>,
}

impl ModeSupervisor {
    pub fn new(
        store: Arc<dyn SharedStore>,
        valves: ValveBank,
        config: Arc<dyn ConfigSource>,
        setpoints: Arc<dyn SetpointSource>,
        alarm: Arc<dyn Alarm>,
    ) -> Self {
        let (trigger, _) = shutdown::channel();
        Self {
            store,
            valves,
            config,
            setpoints,
            alarm,
            trigger,
            tasks: JoinSet::new(),
        }
    }

    /// A fresh context subscribed to this supervisor's termination signal.
    pub fn context(&self) -> ControlContext {
        ControlContext::new(
            self.store.clone(),
            self.valves.clone(),
            self.config.clone(),
            self.trigger.subscribe(),
        )
    }

    pub fn start(&mut self) {
        let deployed = DeployedRegime::new(self.context(), self.setpoints.clone());
        self.tasks
            .spawn(run_regime(deployed).instrument(tracing::info_span!("regime", name = "deployed")));
        let maintenance = MaintenanceRegime::new(self.context());
        self.tasks
            .spawn(run_regime(maintenance).instrument(tracing::info_span!("regime", name = "maintenance")));
        let warning = WarningRegime::new(self.context(), self.alarm.clone());
        self.tasks
            .spawn(run_regime(warning).instrument(tracing::info_span!("regime", name = "warning")));

        for valve in ValveChannel::ALL {
            let tender = DutyCycleTender::new(valve, self.context());
            self.tasks
                .spawn(tender.run().instrument(tracing::info_span!("mixer", valve = valve.as_str())));
        }
        tracing::info!("{} control tasks started", self.tasks.len());
    }

    /// Run the simulated tank alongside the controller.
    pub fn spawn_plant(&mut self, plant: TankPlant, valves: SimulatedValves) {
        let ctx = self.context();
        self.tasks
            .spawn(sim::run_plant(plant, valves, ctx.bus, ctx.shutdown).instrument(tracing::info_span!("plant")));
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Resolves when any task ends on its own, which only happens on a panic
    /// or after shutdown was requested elsewhere.
    pub async fn wait_for_exit(&mut self) {
        match self.tasks.join_next().await {
            Some(Err(e)) if e.is_panic() => tracing::error!("control task panicked: {}", e),
            Some(_) => tracing::warn!("control task exited"),
            None => std::future::pending::<()>().await,
        }
    }

    pub async fn shutdown(mut self) {
        tracing::info!("shutting down");
        self.trigger.trigger();

        let tasks = &mut self.tasks;
        let joined = tokio::time::timeout(JOIN_TIMEOUT, async {
            while let Some(result) = tasks.join_next().await {
                if let Err(e) = result {
                    tracing::error!("control task failed during shutdown: {}", e);
                }
            }
        })
        .await;
        if joined.is_err() {
            tracing::warn!("tasks still running after {:?}; aborting them", JOIN_TIMEOUT);
            self.tasks.shutdown().await;
        }

        regimes::fail_safe(&self.context()).await;
        tracing::info!("all valves closed");
    }
}
