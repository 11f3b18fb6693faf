//! Repository change observation.
//!
//! The polling implementation performs a full directory diff against its
//! last-known snapshot each cycle; no incremental filesystem events are
//! assumed, so editors that write-then-rename are observed as a single
//! config change. A push-based observer (e.g. inotify) can be substituted
//! behind the same trait without changing the controller.

use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use tracing::warn;

use super::{list_versions, CONFIG_FILE_NAME};

/// A single observed repository change. Events carry no state; the watcher
/// never mutates the state store directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepoEvent {
    VersionAdded {
        model: String,
        version: i64,
        path: PathBuf,
    },
    VersionRemoved {
        model: String,
        version: i64,
    },
    ConfigChanged {
        model: String,
    },
    ModelRemoved {
        model: String,
    },
    /// Per-model I/O failure; does not abort the poll cycle for other
    /// models and is retried implicitly on the next cycle.
    ModelError {
        model: String,
        error: String,
    },
}

impl RepoEvent {
    pub fn model(&self) -> &str {
        match self {
            RepoEvent::VersionAdded { model, .. }
            | RepoEvent::VersionRemoved { model, .. }
            | RepoEvent::ConfigChanged { model }
            | RepoEvent::ModelRemoved { model }
            | RepoEvent::ModelError { model, .. } => model,
        }
    }
}

/// Source of repository change events.
#[async_trait]
pub trait RepositoryObserver: Send {
    /// Observe the repository once and report changes since the previous
    /// observation. The first observation reports everything as added.
    async fn poll(&mut self) -> Vec<RepoEvent>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ConfigFingerprint {
    len: u64,
    modified: Option<SystemTime>,
}

#[derive(Debug, Clone)]
struct ModelSnap {
    config: Option<ConfigFingerprint>,
    versions: BTreeSet<i64>,
    path: PathBuf,
}

/// Polling observer: full snapshot diff per cycle.
pub struct PollingObserver {
    root: PathBuf,
    models: BTreeMap<String, ModelSnap>,
}

impl PollingObserver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            models: BTreeMap::new(),
        }
    }

    fn scan_model(path: &Path) -> io::Result<ModelSnap> {
        let config_path = path.join(CONFIG_FILE_NAME);
        let config = match std::fs::metadata(&config_path) {
            Ok(meta) => Some(ConfigFingerprint {
                len: meta.len(),
                modified: meta.modified().ok(),
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(e),
        };
        let versions = list_versions(path)?;
        Ok(ModelSnap {
            config,
            versions,
            path: path.to_path_buf(),
        })
    }

    /// Scan the repository root. Per-model scan failures become error
    /// entries; the failed model keeps its previous snapshot so a transient
    /// error never produces spurious removal events.
    fn scan(&self) -> io::Result<(BTreeMap<String, ModelSnap>, Vec<RepoEvent>)> {
        let mut snaps = BTreeMap::new();
        let mut errors = Vec::new();

        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            match Self::scan_model(&entry.path()) {
                Ok(snap) => {
                    snaps.insert(name, snap);
                }
                Err(e) => {
                    errors.push(RepoEvent::ModelError {
                        model: name.clone(),
                        error: e.to_string(),
                    });
                    if let Some(previous) = self.models.get(&name) {
                        snaps.insert(name, previous.clone());
                    }
                }
            }
        }

        Ok((snaps, errors))
    }

    fn diff(&self, new: &BTreeMap<String, ModelSnap>) -> Vec<RepoEvent> {
        let mut events = Vec::new();

        for (name, snap) in new {
            match self.models.get(name) {
                None => {
                    for version in &snap.versions {
                        events.push(RepoEvent::VersionAdded {
                            model: name.clone(),
                            version: *version,
                            path: snap.path.join(version.to_string()),
                        });
                    }
                }
                Some(old) => {
                    if old.config != snap.config {
                        events.push(RepoEvent::ConfigChanged {
                            model: name.clone(),
                        });
                    }
                    for version in snap.versions.difference(&old.versions) {
                        events.push(RepoEvent::VersionAdded {
                            model: name.clone(),
                            version: *version,
                            path: snap.path.join(version.to_string()),
                        });
                    }
                    for version in old.versions.difference(&snap.versions) {
                        events.push(RepoEvent::VersionRemoved {
                            model: name.clone(),
                            version: *version,
                        });
                    }
                }
            }
        }

        for name in self.models.keys() {
            if !new.contains_key(name) {
                events.push(RepoEvent::ModelRemoved {
                    model: name.clone(),
                });
            }
        }

        events
    }
}

#[async_trait]
impl RepositoryObserver for PollingObserver {
    async fn poll(&mut self) -> Vec<RepoEvent> {
        // Scanning is blocking filesystem I/O; repositories are small
        // enough that a full diff per cycle stays cheap.
        let (snaps, mut errors) = match self.scan() {
            Ok(result) => result,
            Err(e) => {
                // Root scan failure: keep the previous snapshot untouched
                // so a transiently unreadable store never mass-unloads.
                warn!(root = %self.root.display(), error = %e, "model store scan failed");
                return Vec::new();
            }
        };

        let mut events = self.diff(&snaps);
        events.append(&mut errors);
        self.models = snaps;
        events
    }
}
