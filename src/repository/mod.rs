//! Model repository access: configuration parsing and change observation.
//!
//! The repository layout is `<model_store>/<model_name>/config.toml` plus one
//! `<model_store>/<model_name>/<version>/` artifact directory per version.

mod config;
mod observer;

pub use config::{ModelConfig, SequenceBatching, VersionPolicy, CONFIG_FILE_NAME};
pub use observer::{PollingObserver, RepoEvent, RepositoryObserver};

use std::collections::BTreeSet;
use std::io;
use std::path::Path;

use tracing::warn;

/// List the integer-named version subdirectories of a model directory.
/// Non-integer subdirectories are skipped with a warning.
pub fn list_versions(model_dir: &Path) -> io::Result<BTreeSet<i64>> {
    let mut versions = BTreeSet::new();
    for entry in std::fs::read_dir(model_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name();
        let name = name.to_string_lossy();
        match name.parse::<i64>() {
            Ok(version) => {
                versions.insert(version);
            }
            Err(_) => {
                warn!(
                    directory = %name,
                    "skipping version directory that is not an integral number"
                );
            }
        }
    }
    Ok(versions)
}
