use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};

use crate::config::{Config, ConfigWatcher};
use crate::handler;

use super::state::RouterState;

/// Main botrouterd server.
///
/// Components:
/// - Webhook HTTP surface (axum) on the configured listen address
/// - Scheduler worker pool draining the priority queue
/// - Periodic loops: interval baselines, latency observer, QoS monitor
/// - Config watcher: hot reload on file change
pub struct Server {
    config: Arc<Config>,
    config_path: PathBuf,
}

impl Server {
    /// Create a new server instance.
    pub fn new(config: Config, config_path: PathBuf) -> Self {
        Self {
            config: Arc::new(config),
            config_path,
        }
    }

    /// Run the server until shutdown.
    pub async fn run(self) -> Result<()> {
        let state = RouterState::new(self.config.clone())?;
        let shutdown = state.shutdown.clone();

        let background = state.start_background();
        let workers = state.start_workers();

        // Config watcher
        let watcher_handle = if self.config.hot_reload.enabled {
            let mut watcher = ConfigWatcher::new(&self.config_path, (*self.config).clone())?;
            watcher.start()?;

            let reload_state = state.clone();
            let shutdown_rx = shutdown.subscribe();
            Some(tokio::spawn(async move {
                watcher
                    .run(shutdown_rx, move |config| reload_state.apply_reload(config))
                    .await;
            }))
        } else {
            None
        };

        // Shutdown on SIGINT/SIGTERM
        {
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                wait_for_signal().await;
                info!("shutdown signal received, starting graceful shutdown");
                shutdown.signal();
            });
        }

        // Webhook HTTP surface
        let listener = TcpListener::bind(self.config.listen)
            .await
            .with_context(|| format!("failed to bind {}", self.config.listen))?;

        info!(
            address = %self.config.listen,
            tenants = self.config.tenants.len(),
            workers = self.config.scheduler.worker_pool_size,
            hot_reload = self.config.hot_reload.enabled,
            "botrouterd started"
        );
        metrics::counter!("botrouterd.server.starts").increment(1);

        let app = handler::router(state.app.clone());
        let graceful = {
            let shutdown = shutdown.clone();
            async move { shutdown.wait().await }
        };

        axum::serve(listener, app)
            .with_graceful_shutdown(graceful)
            .await
            .context("webhook server failed")?;

        // Stopped accepting; give workers a bounded window to drain
        info!("waiting for scheduler workers to drain");
        if tokio::time::timeout(RouterState::DRAIN_TIMEOUT, workers)
            .await
            .is_err()
        {
            warn!(
                timeout_secs = RouterState::DRAIN_TIMEOUT.as_secs(),
                "drain deadline elapsed, exiting with workers still busy"
            );
        }

        for handle in background {
            if let Err(e) = handle.await {
                error!(error = %e, "background task terminated abnormally");
            }
        }
        if let Some(handle) = watcher_handle {
            let _ = handle.await;
        }

        info!("shutdown complete");
        Ok(())
    }
}

/// Wait for SIGINT or SIGTERM.
async fn wait_for_signal() {
    #[cfg(unix)]
    {
        let mut term = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(term) => term,
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                let _ = signal::ctrl_c().await;
                return;
            }
        };

        tokio::select! {
            _ = signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = signal::ctrl_c().await;
    }
}
