//! Read-only status query service consumed by protocol front ends and by
//! inference dispatch.
//!
//! Every call observes one coherent snapshot of the state store; a query is
//! never torn across concurrent reconciliations.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::RegistryError;
use crate::state::{ModelSnapshot, ServerHandle, ServerState, StateStore, VersionState};

/// Requested version value meaning "the latest READY version".
pub const LATEST_VERSION: i64 = -1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionStatus {
    pub ready_state: VersionState,
    pub execution_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelStatus {
    pub version_status: BTreeMap<i64, VersionStatus>,
}

/// Server-wide status payload returned to protocol front ends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub version: String,
    pub server_id: String,
    pub ready_state: ServerState,
    pub uptime_ns: u64,
    pub model_status: BTreeMap<String, ModelStatus>,
}

/// Snapshot interface over the state store and server handle.
#[derive(Clone)]
pub struct StatusService {
    store: Arc<StateStore>,
    server: Arc<ServerHandle>,
}

impl StatusService {
    pub fn new(store: Arc<StateStore>, server: Arc<ServerHandle>) -> Self {
        Self { store, server }
    }

    /// Status for one model, or for every tracked model when `model` is
    /// None. A model that was never tracked fails with UnknownModelStatus
    /// rather than returning an empty-but-present entry.
    pub fn get_server_status(
        &self,
        model: Option<&str>,
    ) -> Result<StatusResponse, RegistryError> {
        let snapshots = match model {
            Some(name) => {
                let snapshot =
                    self.store
                        .get(name)
                        .ok_or_else(|| RegistryError::UnknownModelStatus {
                            model: name.to_string(),
                        })?;
                vec![snapshot]
            }
            None => self.store.get_all(),
        };

        Ok(StatusResponse {
            version: self.server.server_version().to_string(),
            server_id: self.server.server_id().to_string(),
            ready_state: self.server.state(),
            uptime_ns: self.server.uptime_ns(),
            model_status: snapshots.into_iter().map(model_status).collect(),
        })
    }

    /// Whether an exact (model, version) pair is READY. `LATEST_VERSION`
    /// asks for the numerically-highest READY version.
    pub fn is_version_ready(&self, model: &str, version: i64) -> bool {
        if version == LATEST_VERSION {
            self.store.latest_ready(model).is_some()
        } else {
            self.store.is_ready(model, version)
        }
    }

    /// Gate an inference request. Returns the concrete version to dispatch
    /// to, or UnknownModel when the target is not READY.
    pub fn check_dispatch(&self, model: &str, version: i64) -> Result<i64, RegistryError> {
        let resolved = if version == LATEST_VERSION {
            self.store.latest_ready(model)
        } else if self.store.is_ready(model, version) {
            Some(version)
        } else {
            None
        };
        resolved.ok_or_else(|| RegistryError::UnknownModel {
            model: model.to_string(),
        })
    }

    /// Record one completed inference. Increments the execution count
    /// exactly once for the exact (model, version) pair; rejected requests
    /// must never reach this.
    pub fn record_inference(&self, model: &str, version: i64) -> Result<(), RegistryError> {
        if !self.store.is_ready(model, version) {
            return Err(RegistryError::UnknownModel {
                model: model.to_string(),
            });
        }
        self.store.record_execution(model, version);
        Ok(())
    }
}

fn model_status(snapshot: ModelSnapshot) -> (String, ModelStatus) {
    let version_status = snapshot
        .versions
        .into_iter()
        .map(|(version, snap)| {
            (
                version,
                VersionStatus {
                    ready_state: snap.state,
                    execution_count: snap.execution_count,
                },
            )
        })
        .collect();
    (snapshot.name, ModelStatus { version_status })
}
