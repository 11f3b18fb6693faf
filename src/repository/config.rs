//! Model configuration parsing and version-policy evaluation.
//!
//! Each model directory carries a `config.toml` describing the platform,
//! batching limits, and which on-disk versions should be served.

use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::error;

use crate::error::RegistryError;

/// Repository configuration file name inside each model directory.
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Which on-disk versions of a model should be served.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionPolicy {
    /// Serve every version present in the model directory.
    All,
    /// Serve only the `num_versions` numerically-highest versions.
    Latest { num_versions: u32 },
    /// Serve exactly the listed versions that are present on disk.
    Specific { versions: Vec<i64> },
}

impl Default for VersionPolicy {
    fn default() -> Self {
        VersionPolicy::Latest { num_versions: 1 }
    }
}

/// Sequence-batching parameters for stateful models.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceBatching {
    /// Max time a sequence slot may sit idle before being reclaimed.
    #[serde(default)]
    pub max_sequence_idle_microseconds: u64,
}

/// Parsed model repository configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Model name. Autofilled from the directory name when omitted; when
    /// present it must equal the directory name.
    #[serde(default)]
    pub name: String,
    /// Serving platform identifier (opaque to the registry).
    pub platform: String,
    #[serde(default)]
    pub max_batch_size: u32,
    #[serde(default)]
    pub version_policy: VersionPolicy,
    /// Label files, relative to the model directory.
    #[serde(default)]
    pub label_files: Vec<String>,
    #[serde(default)]
    pub sequence_batching: Option<SequenceBatching>,
}

impl ModelConfig {
    /// Load and validate the configuration for the model rooted at
    /// `model_dir`. `model_name` is the directory name.
    pub fn load(model_dir: &Path, model_name: &str) -> Result<Self, RegistryError> {
        let path = model_dir.join(CONFIG_FILE_NAME);
        let content =
            std::fs::read_to_string(&path).map_err(|e| RegistryError::ConfigParse {
                model: model_name.to_string(),
                reason: format!("failed to read {}: {}", CONFIG_FILE_NAME, e),
            })?;
        let mut config: ModelConfig =
            toml::from_str(&content).map_err(|e| RegistryError::ConfigParse {
                model: model_name.to_string(),
                reason: e.to_string(),
            })?;

        if config.name.is_empty() {
            config.name = model_name.to_string();
        } else if config.name != model_name {
            // Directory name must equal model name; this also prevents two
            // different models from claiming the same name.
            return Err(RegistryError::ConfigParse {
                model: model_name.to_string(),
                reason: format!(
                    "unexpected directory name '{}' for model '{}', directory name must equal model name",
                    model_name, config.name
                ),
            });
        }

        if config.platform.is_empty() {
            return Err(RegistryError::ConfigParse {
                model: model_name.to_string(),
                reason: "platform must not be empty".to_string(),
            });
        }

        Ok(config)
    }

    /// Evaluate the version policy against the versions present on disk,
    /// returning the set that should be served.
    pub fn versions_to_load(&self, existing: &BTreeSet<i64>) -> BTreeSet<i64> {
        match &self.version_policy {
            VersionPolicy::All => existing.clone(),
            VersionPolicy::Latest { num_versions } => existing
                .iter()
                .rev()
                .take(*num_versions as usize)
                .copied()
                .collect(),
            VersionPolicy::Specific { versions } => {
                let mut selected = BTreeSet::new();
                for v in versions {
                    if existing.contains(v) {
                        selected.insert(*v);
                    } else {
                        error!(
                            model = %self.name,
                            version = v,
                            "version is specified for model, but the version directory is not present"
                        );
                    }
                }
                selected
            }
        }
    }
}
