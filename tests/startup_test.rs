//! Registry startup tests: exit-on-error behavior, FAILED_TO_INITIALIZE
//! reporting, and the spawned poll/reconcile task pair.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use modeld::controller::ArtifactRuntime;
use modeld::error::RegistryError;
use modeld::state::{ServerState, VersionState};
use modeld::{Registry, RegistryConfig};

fn create_model(root: &Path, name: &str, versions: &[i64]) -> PathBuf {
    let dir = root.join(name);
    fs::create_dir_all(&dir).unwrap();
    fs::write(
        dir.join("config.toml"),
        format!("name = \"{name}\"\nplatform = \"plan\"\nversion_policy = \"all\"\n"),
    )
    .unwrap();
    for v in versions {
        let vdir = dir.join(v.to_string());
        fs::create_dir_all(&vdir).unwrap();
        fs::write(vdir.join("model.bin"), b"weights").unwrap();
    }
    dir
}

fn config(store: &TempDir) -> RegistryConfig {
    RegistryConfig {
        model_store: store.path().to_path_buf(),
        poll_interval: Duration::from_millis(50),
        ..Default::default()
    }
}

#[tokio::test]
async fn healthy_store_initializes_ready() {
    let store = TempDir::new().unwrap();
    create_model(store.path(), "m", &[1, 2]);

    let registry = Registry::new(config(&store), Arc::new(ArtifactRuntime::new()));
    let state = registry.start().await.unwrap();

    assert_eq!(state, ServerState::Ready);
    assert!(registry.health().is_live());
    assert!(registry.health().is_ready());

    let response = registry.status().get_server_status(None).unwrap();
    assert_eq!(response.ready_state, ServerState::Ready);
    assert_eq!(response.model_status["m"].version_status.len(), 2);
}

#[tokio::test]
async fn config_parse_error_aborts_startup_when_exit_on_error() {
    let store = TempDir::new().unwrap();
    let dir = create_model(store.path(), "broken", &[1]);
    fs::write(dir.join("config.toml"), "platform = [this is not toml").unwrap();

    let registry = Registry::new(config(&store), Arc::new(ArtifactRuntime::new()));
    let err = registry.start().await.unwrap_err();

    assert!(matches!(err, RegistryError::ConfigParse { .. }));
    assert_eq!(registry.server_state(), ServerState::FailedToInitialize);
}

#[tokio::test]
async fn config_parse_error_noexit_keeps_serving() {
    let store = TempDir::new().unwrap();
    let dir = create_model(store.path(), "broken", &[1, 2]);
    fs::write(dir.join("config.toml"), "platform = [this is not toml").unwrap();
    create_model(store.path(), "healthy", &[1]);

    let registry_config = RegistryConfig {
        exit_on_error: false,
        ..config(&store)
    };
    let registry = Registry::new(registry_config, Arc::new(ArtifactRuntime::new()));
    let state = registry.start().await.unwrap();

    assert_eq!(state, ServerState::FailedToInitialize);

    // Strict readiness: neither live nor ready.
    assert!(!registry.health().is_live());
    assert!(!registry.health().is_ready());

    // The healthy model still serves status; the broken one is tracked
    // with its on-disk versions unavailable.
    let response = registry.status().get_server_status(None).unwrap();
    assert_eq!(response.ready_state, ServerState::FailedToInitialize);
    assert_eq!(
        response.model_status["healthy"].version_status[&1].ready_state,
        VersionState::Ready
    );
    assert_eq!(
        response.model_status["broken"].version_status[&1].ready_state,
        VersionState::Unavailable
    );
    assert_eq!(
        response.model_status["broken"].version_status[&2].ready_state,
        VersionState::Unavailable
    );
}

#[tokio::test]
async fn config_parse_error_noexit_nonstrict_reports_live() {
    let store = TempDir::new().unwrap();
    let dir = create_model(store.path(), "broken", &[1]);
    fs::write(dir.join("config.toml"), "platform = [this is not toml").unwrap();

    let registry_config = RegistryConfig {
        exit_on_error: false,
        strict_readiness: false,
        ..config(&store)
    };
    let registry = Registry::new(registry_config, Arc::new(ArtifactRuntime::new()));
    registry.start().await.unwrap();

    assert!(registry.health().is_live());
    assert!(!registry.health().is_ready());
}

#[tokio::test]
async fn model_load_failure_leaves_server_ready() {
    let store = TempDir::new().unwrap();
    let dir = create_model(store.path(), "m", &[1]);
    fs::remove_file(dir.join("1").join("model.bin")).unwrap();

    let registry = Registry::new(config(&store), Arc::new(ArtifactRuntime::new()));
    let state = registry.start().await.unwrap();

    // Load failures surface per version; they are not initialization errors.
    assert_eq!(state, ServerState::Ready);
    assert!(registry.health().is_live());

    let response = registry.status().get_server_status(Some("m")).unwrap();
    assert_eq!(
        response.model_status["m"].version_status[&1].ready_state,
        VersionState::Unavailable
    );

    let err = registry.status().check_dispatch("m", 1).unwrap_err();
    assert!(err
        .to_string()
        .starts_with("Inference request for unknown model"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn spawned_poll_loop_picks_up_repository_edits() {
    let store = TempDir::new().unwrap();
    create_model(store.path(), "first", &[1]);

    let registry = Registry::new(config(&store), Arc::new(ArtifactRuntime::new()));
    registry.start().await.unwrap();
    let (producer, consumer) = registry.clone().spawn();

    create_model(store.path(), "second", &[1]);

    let mut ready = false;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        if registry.status().is_version_ready("second", 1) {
            ready = true;
            break;
        }
    }
    assert!(ready, "dynamically added model never became ready");

    producer.abort();
    consumer.abort();
}
