//! Lifecycle controller: reconciles repository events against tracked state.
//!
//! Per (model, version) state machine:
//!
//! ```text
//! UNKNOWN --(directory observed, load enabled)--> LOADING
//! LOADING --(load succeeds)--> READY
//! LOADING --(load fails or times out)--> UNAVAILABLE
//! READY --(directory removed, unload enabled)--> UNLOADING
//! READY --(config reload excludes version)--> UNLOADING
//! UNLOADING --(unload completes)--> UNAVAILABLE
//! UNAVAILABLE --(re-observed or re-included)--> LOADING
//! ```
//!
//! Reconciliations for the same model are serialized through a per-key async
//! mutex; distinct models reconcile concurrently. A reconciliation that is
//! superseded by a newer config revision completes, but its READY commit is
//! discarded as stale.

mod runtime;

pub use runtime::{ArtifactRuntime, ModelRuntime, RuntimeError};

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::future::join_all;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::RegistryError;
use crate::repository::{list_versions, ModelConfig, RepoEvent};
use crate::state::{StateStore, VersionState};

/// Controller policy knobs, from server configuration.
#[derive(Debug, Clone)]
pub struct ControllerOptions {
    /// Load models/versions that appear in the repository after startup.
    pub enable_repository_load: bool,
    /// Unload versions whose directories disappear from the repository.
    pub enable_repository_unload: bool,
    /// Watchdog bound on a single runtime load call.
    pub load_timeout: Duration,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            enable_repository_load: true,
            enable_repository_unload: true,
            load_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReconcileMode {
    Startup,
    Poll,
}

#[derive(Debug, Default, Clone, Copy)]
struct Trigger {
    config_changed: bool,
}

/// Serializes per-model reconciliation and drives load/unload actions
/// through the [`ModelRuntime`] seam.
pub struct LifecycleController {
    root: PathBuf,
    store: Arc<StateStore>,
    runtime: Arc<dyn ModelRuntime>,
    options: ControllerOptions,
    locks: DashMap<String, Arc<Mutex<()>>>,
    revisions: DashMap<String, u64>,
}

impl LifecycleController {
    pub fn new(
        root: impl Into<PathBuf>,
        store: Arc<StateStore>,
        runtime: Arc<dyn ModelRuntime>,
        options: ControllerOptions,
    ) -> Self {
        Self {
            root: root.into(),
            store,
            runtime,
            options,
            locks: DashMap::new(),
            revisions: DashMap::new(),
        }
    }

    /// Apply one batch of repository events. Models reconcile concurrently;
    /// failures are logged per model and never block other models.
    pub async fn apply(&self, events: Vec<RepoEvent>) {
        for (model, result) in self.run(events, ReconcileMode::Poll).await {
            if let Err(e) = result {
                warn!(model = %model, error = %e, "reconciliation failed");
            }
        }
    }

    /// Apply the initial full-repository event batch. Load failures surface
    /// in status like any other, but configuration parse failures are
    /// collected so the server can decide between aborting startup and
    /// reporting FAILED_TO_INITIALIZE.
    pub async fn apply_initial(&self, events: Vec<RepoEvent>) -> Vec<RegistryError> {
        let mut failures = Vec::new();
        for (model, result) in self.run(events, ReconcileMode::Startup).await {
            if let Err(e) = result {
                warn!(model = %model, error = %e, "model failed to initialize");
                failures.push(e);
            }
        }
        failures
    }

    async fn run(
        &self,
        events: Vec<RepoEvent>,
        mode: ReconcileMode,
    ) -> Vec<(String, Result<(), RegistryError>)> {
        let triggers = self.intake(events);
        let tasks = triggers.into_iter().map(|(model, trigger)| async move {
            let result = self.reconcile(&model, trigger, mode).await;
            (model, result)
        });
        join_all(tasks).await
    }

    /// Group events by model. Config revisions are bumped here, before any
    /// per-model lock is taken, so an in-flight load for the same model
    /// observes the supersession at commit time.
    fn intake(&self, events: Vec<RepoEvent>) -> BTreeMap<String, Trigger> {
        let mut triggers: BTreeMap<String, Trigger> = BTreeMap::new();
        for event in events {
            match event {
                RepoEvent::ModelError { model, error } => {
                    warn!(model = %model, error = %error, "repository poll error");
                }
                RepoEvent::ConfigChanged { model } => {
                    self.bump_revision(&model);
                    triggers.entry(model).or_default().config_changed = true;
                }
                other => {
                    triggers.entry(other.model().to_string()).or_default();
                }
            }
        }
        triggers
    }

    fn model_lock(&self, model: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(model.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn revision(&self, model: &str) -> u64 {
        self.revisions.get(model).map(|r| *r).unwrap_or(0)
    }

    fn bump_revision(&self, model: &str) {
        *self.revisions.entry(model.to_string()).or_insert(0) += 1;
    }

    async fn reconcile(
        &self,
        model: &str,
        trigger: Trigger,
        mode: ReconcileMode,
    ) -> Result<(), RegistryError> {
        let lock = self.model_lock(model);
        let _guard = lock.lock().await;
        let revision = self.revision(model);

        let model_dir = self.root.join(model);
        if !model_dir.is_dir() {
            return self.reconcile_removed(model, revision).await;
        }

        let config = match ModelConfig::load(&model_dir, model) {
            Ok(config) => config,
            Err(e) => return self.reconcile_config_error(model, &model_dir, e, mode, revision),
        };

        let on_disk = list_versions(&model_dir).map_err(|e| RegistryError::RepositoryIo {
            model: model.to_string(),
            source: e,
        })?;
        let desired = config.versions_to_load(&on_disk);
        let tracked = self.store.get(model);
        let startup = mode == ReconcileMode::Startup;

        if tracked.is_none()
            && !startup
            && !trigger.config_changed
            && !self.options.enable_repository_load
        {
            debug!(model = %model, "ignoring new model, repository load is disabled");
            return Ok(());
        }

        // Unload pass: tracked versions no longer selected. A version still
        // on disk but excluded by the policy unloads regardless of the
        // dynamic-unload flag; config reload is an explicit operator action,
        // not repository drift.
        if let Some(snapshot) = &tracked {
            for (&version, snap) in &snapshot.versions {
                if desired.contains(&version) {
                    continue;
                }
                let directory_removed = !on_disk.contains(&version);
                if directory_removed && !self.options.enable_repository_unload {
                    debug!(
                        model = %model,
                        version,
                        "version directory removed but repository unload is disabled"
                    );
                    continue;
                }
                self.unload_version(model, version, snap.state, revision)
                    .await;
            }
        }

        // Load pass. READY versions that are still selected keep their
        // loaded artifact and execution counts.
        for &version in &desired {
            let current = tracked
                .as_ref()
                .and_then(|s| s.versions.get(&version))
                .map(|v| v.state);
            if current == Some(VersionState::Ready) {
                continue;
            }
            if current.is_none()
                && tracked.is_some()
                && !startup
                && !trigger.config_changed
                && !self.options.enable_repository_load
            {
                debug!(
                    model = %model,
                    version,
                    "ignoring new version, repository load is disabled"
                );
                continue;
            }
            let path = model_dir.join(version.to_string());
            if let Err(e) = self.load_version(model, version, &path, revision).await {
                warn!(model = %model, version, error = %e, "model version failed to load");
            }
        }

        Ok(())
    }

    /// Model directory is gone. Tracked entries survive as UNAVAILABLE with
    /// their execution counts preserved; an unknown model stays unknown,
    /// and a model that never served anything is dropped outright.
    async fn reconcile_removed(
        &self,
        model: &str,
        revision: u64,
    ) -> Result<(), RegistryError> {
        let Some(snapshot) = self.store.get(model) else {
            return Ok(());
        };
        if !self.options.enable_repository_unload {
            debug!(model = %model, "model directory removed but repository unload is disabled");
            return Ok(());
        }
        if self.store.remove_model(model) {
            info!(model = %model, "dropping model that never served");
            return Ok(());
        }
        for (&version, snap) in &snapshot.versions {
            self.unload_version(model, version, snap.state, revision)
                .await;
        }
        Ok(())
    }

    fn reconcile_config_error(
        &self,
        model: &str,
        model_dir: &Path,
        error: RegistryError,
        mode: ReconcileMode,
        revision: u64,
    ) -> Result<(), RegistryError> {
        match mode {
            ReconcileMode::Startup => {
                // Track whatever versions are on disk as UNAVAILABLE so the
                // model is distinguishable from one that never existed.
                if let Ok(on_disk) = list_versions(model_dir) {
                    for version in on_disk {
                        self.store
                            .upsert(model, version, VersionState::Unavailable, revision);
                    }
                }
                Err(error)
            }
            ReconcileMode::Poll => {
                if self.store.contains_model(model) {
                    // Keep serving the previously-loaded state; the operator
                    // fixes the config and the next poll picks it up.
                    warn!(
                        model = %model,
                        error = %error,
                        "config reload failed, keeping current state"
                    );
                    Ok(())
                } else {
                    Err(error)
                }
            }
        }
    }

    async fn unload_version(&self, model: &str, version: i64, state: VersionState, revision: u64) {
        match state {
            VersionState::Ready => {
                self.store
                    .upsert(model, version, VersionState::Unloading, revision);
                info!(model = %model, version, "unloading model version");
                self.runtime.unload(model, version).await;
                self.store
                    .upsert(model, version, VersionState::Unavailable, revision);
            }
            VersionState::Loading | VersionState::Unknown => {
                self.store
                    .upsert(model, version, VersionState::Unavailable, revision);
            }
            VersionState::Unloading | VersionState::Unavailable => {}
        }
    }

    /// Drive one version through LOADING and commit the outcome. A fresh
    /// load always resets execution statistics. The commit to READY is
    /// dropped if the model's config revision advanced while the load was
    /// in flight; the superseding reconciliation redoes it.
    async fn load_version(
        &self,
        model: &str,
        version: i64,
        path: &Path,
        revision: u64,
    ) -> Result<(), RegistryError> {
        self.store
            .upsert(model, version, VersionState::Loading, revision);
        self.store.reset_execution(model, version);
        info!(model = %model, version, "loading model version");

        let outcome = tokio::time::timeout(
            self.options.load_timeout,
            self.runtime.load(model, version, path),
        )
        .await;

        match outcome {
            Ok(Ok(())) => {
                if self.revision(model) == revision {
                    self.store
                        .upsert(model, version, VersionState::Ready, revision);
                    info!(model = %model, version, "model version ready");
                } else {
                    debug!(model = %model, version, "discarding stale load result");
                }
                Ok(())
            }
            Ok(Err(e)) => {
                self.store
                    .upsert(model, version, VersionState::Unavailable, revision);
                Err(RegistryError::ModelLoad {
                    model: model.to_string(),
                    version,
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                self.store
                    .upsert(model, version, VersionState::Unavailable, revision);
                Err(RegistryError::LoadTimeout {
                    model: model.to_string(),
                    version,
                })
            }
        }
    }
}
