//! modeld - model-serving registry.
//!
//! Watches a directory-backed repository of versioned model artifacts,
//! loads and unloads them asynchronously through an external runtime seam,
//! and exposes per-version readiness state to protocol front ends.
//!
//! # Architecture
//!
//! - **Repository observer**: polls the model store and diffs it against the
//!   last-known snapshot, producing change events.
//! - **State store**: thread-safe model/version lifecycle map; the single
//!   source of truth for status queries.
//! - **Lifecycle controller**: reconciles events against tracked state,
//!   serialized per model, concurrent across models.
//! - **Status and health services**: read-only snapshot views consumed by
//!   HTTP/gRPC front ends and by inference dispatch.

pub mod config;
pub mod controller;
pub mod error;
pub mod health;
pub mod repository;
pub mod state;
pub mod status;
pub mod telemetry;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info};

use controller::{ControllerOptions, LifecycleController, ModelRuntime};
use error::RegistryError;
use health::HealthService;
use repository::{PollingObserver, RepositoryObserver};
use state::{ServerHandle, ServerState, StateStore};
use status::StatusService;

/// Registry configuration.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub model_store: PathBuf,
    pub server_id: String,
    /// Abort startup on the first model configuration error. When false,
    /// parse failures leave the server running as FAILED_TO_INITIALIZE.
    pub exit_on_error: bool,
    /// When the server failed to initialize, also report not-live.
    pub strict_readiness: bool,
    pub enable_repository_load: bool,
    pub enable_repository_unload: bool,
    pub poll_interval: Duration,
    pub load_timeout: Duration,
    pub event_queue_depth: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            model_store: PathBuf::from("models"),
            server_id: "inference:0".to_string(),
            exit_on_error: true,
            strict_readiness: true,
            enable_repository_load: true,
            enable_repository_unload: true,
            poll_interval: Duration::from_secs(15),
            load_timeout: Duration::from_secs(30),
            event_queue_depth: 64,
        }
    }
}

/// The registry instance: owns the state store, controller, observer, and
/// the shared server handle.
pub struct Registry {
    config: RegistryConfig,
    store: Arc<StateStore>,
    controller: Arc<LifecycleController>,
    server: Arc<ServerHandle>,
    observer: Mutex<PollingObserver>,
}

impl Registry {
    pub fn new(config: RegistryConfig, runtime: Arc<dyn ModelRuntime>) -> Arc<Self> {
        let store = Arc::new(StateStore::new());
        let server = ServerHandle::new(config.server_id.clone());
        let controller = Arc::new(LifecycleController::new(
            config.model_store.clone(),
            store.clone(),
            runtime,
            ControllerOptions {
                enable_repository_load: config.enable_repository_load,
                enable_repository_unload: config.enable_repository_unload,
                load_timeout: config.load_timeout,
            },
        ));
        let observer = Mutex::new(PollingObserver::new(config.model_store.clone()));
        Arc::new(Self {
            config,
            store,
            controller,
            server,
            observer,
        })
    }

    pub fn status(&self) -> StatusService {
        StatusService::new(self.store.clone(), self.server.clone())
    }

    pub fn health(&self) -> HealthService {
        HealthService::new(self.server.clone(), self.config.strict_readiness)
    }

    pub fn server_state(&self) -> ServerState {
        self.server.state()
    }

    /// Perform the initial full reconciliation and compute the startup
    /// outcome. With exit-on-error set, the first model configuration
    /// failure is returned and the caller is expected to terminate;
    /// otherwise parse failures leave the server FAILED_TO_INITIALIZE but
    /// still serving status for healthy models.
    pub async fn start(&self) -> Result<ServerState, RegistryError> {
        let events = self.observer.lock().await.poll().await;
        let mut failures = self.controller.apply_initial(events).await;

        let state = if failures.is_empty() {
            ServerState::Ready
        } else if self.config.exit_on_error {
            self.server.set_state(ServerState::FailedToInitialize);
            return Err(failures.remove(0));
        } else {
            ServerState::FailedToInitialize
        };
        self.server.set_state(state);
        info!(state = ?state, "model registry initialized");
        Ok(state)
    }

    /// Spawn the watcher/reconciler task pair: one poll loop producing
    /// event batches into a bounded queue, one consumer applying them.
    /// Cycles with no repository changes emit nothing.
    pub fn spawn(self: Arc<Self>) -> (JoinHandle<()>, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<Vec<repository::RepoEvent>>(
            self.config.event_queue_depth,
        );

        let producer = {
            let registry = Arc::clone(&self);
            tokio::spawn(async move {
                let mut observer = registry.observer.lock().await;
                loop {
                    tokio::time::sleep(registry.config.poll_interval).await;
                    let events = observer.poll().await;
                    if events.is_empty() {
                        continue;
                    }
                    if tx.send(events).await.is_err() {
                        error!("event queue closed, stopping repository poll loop");
                        break;
                    }
                }
            })
        };

        let consumer = {
            let registry = self;
            tokio::spawn(async move {
                while let Some(batch) = rx.recv().await {
                    registry.controller.apply(batch).await;
                }
            })
        };

        (producer, consumer)
    }
}
