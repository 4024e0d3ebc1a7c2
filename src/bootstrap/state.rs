//! Shared router state.
//!
//! The single wiring point for the core components: each one is built here
//! and handed its collaborators. Nothing reads configuration through a
//! global; reloads fan out through [`RouterState::apply_reload`].

use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::info;

use crate::config::Config;
use crate::forward::Forwarder;
use crate::handler::AppState;
use crate::load::LoadCounter;
use crate::observer::LatencyObserver;
use crate::qos::QoSManager;
use crate::scheduler::Scheduler;
use crate::stats::StatsAnalyzer;
use crate::tenant::TenantTable;

use super::Shutdown;

/// Wired core components, shared across the HTTP surface and the
/// background loops.
#[derive(Clone)]
pub struct RouterState {
    pub shutdown: Arc<Shutdown>,
    pub load: Arc<LoadCounter>,
    pub stats: Arc<StatsAnalyzer>,
    pub observer: Arc<LatencyObserver>,
    pub forwarder: Arc<Forwarder>,
    pub qos: Arc<QoSManager>,
    pub scheduler: Arc<Scheduler>,
    pub app: Arc<AppState>,
}

impl RouterState {
    /// Build and wire all components from configuration.
    pub fn new(config: Arc<Config>) -> anyhow::Result<Self> {
        let shutdown = Shutdown::new();
        let min_data_points = config.scheduler.user_behavior.min_data_points_for_baseline;

        let load = Arc::new(LoadCounter::new());
        let stats = Arc::new(StatsAnalyzer::new(min_data_points));
        let observer = Arc::new(LatencyObserver::new(
            config.qos.system_limits.latency_threshold,
            min_data_points,
        ));
        let forwarder = Arc::new(Forwarder::new(load.clone(), shutdown.clone())?);
        let qos = Arc::new(QoSManager::new(
            config.clone(),
            load.clone(),
            stats.clone(),
            observer.clone(),
        ));
        let scheduler = Arc::new(Scheduler::new(
            config.clone(),
            stats.clone(),
            load.clone(),
            observer.clone(),
            qos.clone(),
            forwarder.clone(),
        ));

        let app = Arc::new(AppState {
            tenants: RwLock::new(Arc::new(TenantTable::from_config(&config.tenants))),
            config: RwLock::new(config),
            scheduler: scheduler.clone(),
            qos: qos.clone(),
        });

        Ok(Self {
            shutdown,
            load,
            stats,
            observer,
            forwarder,
            qos,
            scheduler,
            app,
        })
    }

    /// Spawn the periodic background loops (stats, observer, QoS monitor).
    pub fn start_background(&self) -> Vec<JoinHandle<()>> {
        vec![
            tokio::spawn(self.stats.clone().run(self.shutdown.subscribe())),
            tokio::spawn(self.observer.clone().run(self.shutdown.subscribe())),
            tokio::spawn(self.qos.clone().run(self.shutdown.subscribe())),
        ]
    }

    /// Spawn the scheduler worker pool. The returned handle completes when
    /// all workers have drained after shutdown.
    pub fn start_workers(&self) -> JoinHandle<()> {
        tokio::spawn(self.scheduler.clone().run(self.shutdown.clone()))
    }

    /// Fan a reloaded configuration out to every component.
    pub fn apply_reload(&self, new: Arc<Config>) {
        let min_data_points = new.scheduler.user_behavior.min_data_points_for_baseline;

        self.app.apply_config(new.clone());
        self.qos.update_config(new.clone());
        self.scheduler.update_config(new.clone());
        self.stats.set_min_data_points(min_data_points);
        self.observer.set_min_data_points(min_data_points);
        self.observer
            .set_latency_threshold(new.qos.system_limits.latency_threshold);

        info!(tenants = new.tenants.len(), "configuration reload applied");
    }

    /// Drain deadline for scheduler workers on shutdown.
    pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);
}
