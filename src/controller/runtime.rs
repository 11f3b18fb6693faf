//! Seam to the external inference runtime.
//!
//! The registry never executes inference itself; load and unload calls go
//! through this trait so protocol front ends and tests can substitute their
//! own runtime.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("artifact directory missing or empty: {0}")]
    ArtifactMissing(PathBuf),

    #[error("runtime load failed: {0}")]
    Failed(String),
}

/// Loads and unloads model versions on behalf of the controller. Load calls
/// are time-bounded by a controller-side watchdog, so implementations may
/// block on the underlying runtime without further protection.
#[async_trait]
pub trait ModelRuntime: Send + Sync {
    async fn load(&self, model: &str, version: i64, path: &Path) -> Result<(), RuntimeError>;

    async fn unload(&self, model: &str, version: i64);
}

/// Default runtime: validates that the version artifact directory exists and
/// is non-empty. Actual execution backends live behind protocol front ends.
pub struct ArtifactRuntime;

impl ArtifactRuntime {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ArtifactRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModelRuntime for ArtifactRuntime {
    async fn load(&self, _model: &str, _version: i64, path: &Path) -> Result<(), RuntimeError> {
        let mut entries = std::fs::read_dir(path)
            .map_err(|_| RuntimeError::ArtifactMissing(path.to_path_buf()))?;
        if entries.next().is_none() {
            return Err(RuntimeError::ArtifactMissing(path.to_path_buf()));
        }
        Ok(())
    }

    async fn unload(&self, _model: &str, _version: i64) {}
}
