//! Error taxonomy for the model registry.
//!
//! Repository I/O errors are per-model and non-fatal: the next poll cycle
//! retries them. Load failures surface in status as UNAVAILABLE and are not
//! retried until the repository changes again. There is no backoff machinery
//! anywhere; operators control retry cadence via the poll interval.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistryError {
    /// I/O failure scanning or reading a single model's directory. Other
    /// models in the same poll cycle are unaffected.
    #[error("repository error for model '{model}': {source}")]
    RepositoryIo {
        model: String,
        #[source]
        source: std::io::Error,
    },

    /// The model repository configuration could not be parsed. Fatal at
    /// startup when exit-on-error is set, otherwise the model's versions
    /// are marked unavailable and the server keeps serving status.
    #[error("invalid configuration for model '{model}': {reason}")]
    ConfigParse { model: String, reason: String },

    /// A version failed to load. The version transitions to UNAVAILABLE.
    #[error("failed to load model '{model}' version {version}: {reason}")]
    ModelLoad {
        model: String,
        version: i64,
        reason: String,
    },

    /// The runtime load call never returned within the watchdog window.
    #[error("load of model '{model}' version {version} timed out")]
    LoadTimeout { model: String, version: i64 },

    /// Status was requested for a model that was never tracked.
    #[error("no status available for unknown model '{model}'")]
    UnknownModelStatus { model: String },

    /// Inference dispatch targeted a model/version that is not READY.
    #[error("Inference request for unknown model '{model}'")]
    UnknownModel { model: String },
}

impl RegistryError {
    /// Model name the error is attributed to, for per-model log fields.
    pub fn model(&self) -> &str {
        match self {
            RegistryError::RepositoryIo { model, .. }
            | RegistryError::ConfigParse { model, .. }
            | RegistryError::ModelLoad { model, .. }
            | RegistryError::LoadTimeout { model, .. }
            | RegistryError::UnknownModelStatus { model }
            | RegistryError::UnknownModel { model } => model,
        }
    }
}
