//! Dashboard server: static assets plus an on-demand, debounced snapshot
//! refresh endpoint backed by an external collector process.

use std::sync::Arc;

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod refresh;
pub mod server;
pub mod snapshot;

use config::DashboardConfig;
use refresh::{Invoker, ProcessInvoker, RefreshCoordinator};
use snapshot::SnapshotStore;

/// Shared application state available to every handler via `State<Arc<AppState>>`.
pub struct AppState {
    /// Sole gate in front of the collector.
    pub coordinator: Arc<RefreshCoordinator>,

    /// Where the collector leaves its output.
    pub store: SnapshotStore,
}

impl AppState {
    pub fn new(config: &DashboardConfig, invoker: Arc<dyn Invoker>) -> Self {
        Self {
            coordinator: Arc::new(RefreshCoordinator::new(
                invoker,
                config.debounce(),
                config.timeout(),
            )),
            store: SnapshotStore::new(config.snapshot.clone()),
        }
    }

    /// State wired to the real collector process described by `config`.
    pub fn from_config(config: &DashboardConfig) -> Self {
        Self::new(config, Arc::new(ProcessInvoker::from_config(config)))
    }
}
