//! Version state store: the single source of truth for status queries.
//!
//! Tracks per-model, per-version lifecycle state and execution statistics.
//! All reads return owned snapshots so a status query never observes a torn
//! write, and one `get_all` call sees one coherent view across every model.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Lifecycle state of a single model version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VersionState {
    Unknown,
    Loading,
    Ready,
    Unavailable,
    Unloading,
}

/// Process-wide server readiness, computed once at startup.
/// `FailedToInitialize` is sticky for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerState {
    Initializing,
    Ready,
    FailedToInitialize,
}

/// Point-in-time view of one version entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionSnapshot {
    pub state: VersionState,
    pub execution_count: u64,
    pub config_revision: u64,
}

/// Point-in-time view of one model and all its tracked versions.
#[derive(Debug, Clone)]
pub struct ModelSnapshot {
    pub name: String,
    pub versions: BTreeMap<i64, VersionSnapshot>,
}

#[derive(Debug)]
struct VersionEntry {
    state: VersionState,
    execution_count: u64,
    config_revision: u64,
    /// Reached READY at least once. Models where no version ever served
    /// may be dropped outright instead of lingering as UNAVAILABLE.
    served: bool,
}

/// Thread-safe map of model -> version -> lifecycle entry.
///
/// An entry exists once its directory has been observed and is never removed
/// merely because the directory disappears; it transitions to UNAVAILABLE
/// with its execution count preserved. This is what distinguishes "never
/// existed" from "existed then removed" in status queries.
pub struct StateStore {
    models: RwLock<HashMap<String, BTreeMap<i64, VersionEntry>>>,
}

impl StateStore {
    pub fn new() -> Self {
        Self {
            models: RwLock::new(HashMap::new()),
        }
    }

    /// Set the target state for a (model, version) entry, creating it if
    /// needed. Idempotent with respect to execution counts: applying the
    /// same state twice never touches statistics.
    pub fn upsert(&self, model: &str, version: i64, state: VersionState, config_revision: u64) {
        let mut models = self.models.write();
        let versions = models.entry(model.to_string()).or_default();
        match versions.get_mut(&version) {
            Some(entry) => {
                entry.state = state;
                entry.config_revision = config_revision;
                entry.served |= state == VersionState::Ready;
            }
            None => {
                versions.insert(
                    version,
                    VersionEntry {
                        state,
                        execution_count: 0,
                        config_revision,
                        served: state == VersionState::Ready,
                    },
                );
            }
        }
    }

    /// Drop a model's entries entirely. Only applies to models that were
    /// never successfully tracked: if any version ever reached READY the
    /// model keeps its terminal UNAVAILABLE status and this returns false.
    pub fn remove_model(&self, model: &str) -> bool {
        let mut models = self.models.write();
        let Some(versions) = models.get(model) else {
            return false;
        };
        if versions.values().any(|e| e.served) {
            return false;
        }
        models.remove(model);
        true
    }

    /// Reset execution statistics for a version. Called when a fresh load
    /// begins, never on state transitions that keep the loaded artifact.
    pub fn reset_execution(&self, model: &str, version: i64) {
        let mut models = self.models.write();
        if let Some(entry) = models.get_mut(model).and_then(|v| v.get_mut(&version)) {
            entry.execution_count = 0;
        }
    }

    /// Record one completed inference against an exact (model, version)
    /// pair. Returns false if the pair was never tracked.
    pub fn record_execution(&self, model: &str, version: i64) -> bool {
        let mut models = self.models.write();
        match models.get_mut(model).and_then(|v| v.get_mut(&version)) {
            Some(entry) => {
                entry.execution_count += 1;
                true
            }
            None => false,
        }
    }

    /// Snapshot of one model, or None if it was never tracked.
    pub fn get(&self, model: &str) -> Option<ModelSnapshot> {
        let models = self.models.read();
        models.get(model).map(|versions| ModelSnapshot {
            name: model.to_string(),
            versions: snapshot_versions(versions),
        })
    }

    /// Coherent snapshot of every tracked model, including models whose
    /// versions are all UNAVAILABLE.
    pub fn get_all(&self) -> Vec<ModelSnapshot> {
        let models = self.models.read();
        let mut out: Vec<ModelSnapshot> = models
            .iter()
            .map(|(name, versions)| ModelSnapshot {
                name: name.clone(),
                versions: snapshot_versions(versions),
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    pub fn contains_model(&self, model: &str) -> bool {
        self.models.read().contains_key(model)
    }

    pub fn is_ready(&self, model: &str, version: i64) -> bool {
        let models = self.models.read();
        models
            .get(model)
            .and_then(|v| v.get(&version))
            .map(|e| e.state == VersionState::Ready)
            .unwrap_or(false)
    }

    /// Numerically-highest READY version of a model, if any.
    pub fn latest_ready(&self, model: &str) -> Option<i64> {
        let models = self.models.read();
        models.get(model).and_then(|versions| {
            versions
                .iter()
                .rev()
                .find(|(_, e)| e.state == VersionState::Ready)
                .map(|(v, _)| *v)
        })
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

fn snapshot_versions(versions: &BTreeMap<i64, VersionEntry>) -> BTreeMap<i64, VersionSnapshot> {
    versions
        .iter()
        .map(|(v, e)| {
            (
                *v,
                VersionSnapshot {
                    state: e.state,
                    execution_count: e.execution_count,
                    config_revision: e.config_revision,
                },
            )
        })
        .collect()
}

/// Shared server identity and readiness, owned by the registry and passed
/// by `Arc` to status and health services. No ambient globals.
pub struct ServerHandle {
    state: RwLock<ServerState>,
    started: Instant,
    server_id: String,
    server_version: String,
}

impl ServerHandle {
    pub fn new(server_id: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            state: RwLock::new(ServerState::Initializing),
            started: Instant::now(),
            server_id: server_id.into(),
            server_version: env!("CARGO_PKG_VERSION").to_string(),
        })
    }

    pub fn state(&self) -> ServerState {
        *self.state.read()
    }

    /// Record the startup outcome. FailedToInitialize is sticky.
    pub fn set_state(&self, state: ServerState) {
        let mut current = self.state.write();
        if *current != ServerState::FailedToInitialize {
            *current = state;
        }
    }

    pub fn uptime_ns(&self) -> u64 {
        self.started.elapsed().as_nanos() as u64
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    pub fn server_version(&self) -> &str {
        &self.server_version
    }
}
