pub mod config;
pub mod error;
pub mod ids;
pub mod ipc;
pub mod metrics;
pub mod registry;
pub mod tasks;
pub mod ws;

use std::sync::Arc;

use config::DaemonConfig;
use registry::SubscriptionRegistry;
use tasks::TaskStore;
use ws::EventBroadcaster;

/// Shared daemon state, created once at startup and handed to every
/// connection handler and background task. All registries live here; nothing
/// else holds global mutable state.
pub struct AppContext {
    pub config: Arc<DaemonConfig>,
    pub store: Arc<TaskStore>,
    pub registry: Arc<SubscriptionRegistry>,
    pub broadcaster: Arc<EventBroadcaster>,
    pub started_at: std::time::Instant,
    /// Supervisor channel for the best-effort restartSystem command.
    /// None when the daemon runs unsupervised.
    pub restart_tx: Option<tokio::sync::mpsc::UnboundedSender<()>>,
}

impl AppContext {
    /// Must run inside a tokio runtime: the broadcaster spawns its
    /// registrar task.
    pub fn new(
        config: DaemonConfig,
        restart_tx: Option<tokio::sync::mpsc::UnboundedSender<()>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config: Arc::new(config),
            store: Arc::new(TaskStore::new()),
            registry: Arc::new(SubscriptionRegistry::new()),
            broadcaster: EventBroadcaster::spawn(),
            started_at: std::time::Instant::now(),
            restart_tx,
        })
    }

    /// Fresh context on default config, no supervisor. Used by unit and
    /// integration tests.
    pub fn for_tests() -> Arc<Self> {
        Self::new(DaemonConfig::default(), None)
    }
}
