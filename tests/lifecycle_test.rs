//! Lifecycle tests: dynamic load/unload under repository edits, with the
//! dynamic flags enabled and disabled.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use modeld::controller::{
    ArtifactRuntime, ControllerOptions, LifecycleController, ModelRuntime, RuntimeError,
};
use modeld::error::RegistryError;
use modeld::repository::{PollingObserver, RepositoryObserver};
use modeld::state::{ServerHandle, StateStore, VersionState};
use modeld::status::StatusService;

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

struct Harness {
    store_dir: TempDir,
    store: Arc<StateStore>,
    controller: LifecycleController,
    observer: PollingObserver,
}

impl Harness {
    fn new(options: ControllerOptions) -> Self {
        Self::with_runtime(options, Arc::new(ArtifactRuntime::new()))
    }

    fn with_runtime(options: ControllerOptions, runtime: Arc<dyn ModelRuntime>) -> Self {
        let store_dir = TempDir::new().unwrap();
        let store = Arc::new(StateStore::new());
        let controller = LifecycleController::new(
            store_dir.path(),
            store.clone(),
            runtime,
            options,
        );
        let observer = PollingObserver::new(store_dir.path());
        Self {
            store_dir,
            store,
            controller,
            observer,
        }
    }

    fn root(&self) -> &Path {
        self.store_dir.path()
    }

    async fn startup(&mut self) -> Vec<RegistryError> {
        let events = self.observer.poll().await;
        self.controller.apply_initial(events).await
    }

    async fn cycle(&mut self) {
        let events = self.observer.poll().await;
        self.controller.apply(events).await;
    }

    fn status(&self) -> StatusService {
        StatusService::new(self.store.clone(), ServerHandle::new("inference:0"))
    }

    fn state_of(&self, model: &str, version: i64) -> VersionState {
        self.store.get(model).unwrap().versions[&version].state
    }

    fn count_of(&self, model: &str, version: i64) -> u64 {
        self.store.get(model).unwrap().versions[&version].execution_count
    }
}

#[tokio::test]
async fn never_present_model_has_no_status() {
    let mut harness = Harness::new(ControllerOptions::default());
    harness.startup().await;

    let err = harness
        .status()
        .get_server_status(Some("ghost"))
        .unwrap_err();
    assert!(err
        .to_string()
        .starts_with("no status available for unknown model"));
}

#[tokio::test]
async fn added_model_reaches_ready_with_zero_count() {
    let mut harness = Harness::new(ControllerOptions::default());
    harness.startup().await;

    create_model(harness.root(), "m", &[1, 2]);
    harness.cycle().await;

    for version in [1, 2] {
        assert_eq!(harness.state_of("m", version), VersionState::Ready);
        assert_eq!(harness.count_of("m", version), 0);
    }
}

#[tokio::test]
async fn idle_cycles_cause_no_transitions() {
    let mut harness = Harness::new(ControllerOptions::default());
    create_model(harness.root(), "m", &[1]);
    harness.startup().await;

    harness.store.record_execution("m", 1);
    let before = harness.store.get("m").unwrap().versions.clone();

    for _ in 0..5 {
        harness.cycle().await;
    }

    assert_eq!(harness.store.get("m").unwrap().versions, before);
}

#[tokio::test]
async fn removed_version_goes_unavailable_and_preserves_count() {
    let mut harness = Harness::new(ControllerOptions::default());
    let dir = create_model(harness.root(), "m", &[1, 2, 3]);
    harness.startup().await;

    harness.store.record_execution("m", 1);
    harness.store.record_execution("m", 1);

    fs::remove_dir_all(dir.join("1")).unwrap();
    harness.cycle().await;

    assert_eq!(harness.state_of("m", 1), VersionState::Unavailable);
    assert_eq!(harness.count_of("m", 1), 2);
    assert_eq!(harness.state_of("m", 2), VersionState::Ready);
    assert_eq!(harness.state_of("m", 3), VersionState::Ready);

    // Inference dispatch against the removed version is rejected.
    let err = harness.status().check_dispatch("m", 1).unwrap_err();
    assert_eq!(
        err.to_string(),
        "Inference request for unknown model 'm'"
    );
}

#[tokio::test]
async fn unload_disabled_keeps_version_ready() {
    let options = ControllerOptions {
        enable_repository_unload: false,
        ..Default::default()
    };
    let mut harness = Harness::new(options);
    let dir = create_model(harness.root(), "m", &[3]);
    harness.startup().await;

    harness.store.record_execution("m", 3);
    fs::remove_dir_all(dir.join("3")).unwrap();
    harness.cycle().await;

    assert_eq!(harness.state_of("m", 3), VersionState::Ready);
    assert_eq!(harness.count_of("m", 3), 1);

    // The entry still serves and still counts executions.
    harness.status().record_inference("m", 3).unwrap();
    assert_eq!(harness.count_of("m", 3), 2);
}

#[tokio::test]
async fn model_removal_with_unload_disabled_is_ignored() {
    let options = ControllerOptions {
        enable_repository_unload: false,
        ..Default::default()
    };
    let mut harness = Harness::new(options);
    let dir = create_model(harness.root(), "m", &[1]);
    harness.startup().await;

    fs::remove_dir_all(&dir).unwrap();
    harness.cycle().await;

    assert_eq!(harness.state_of("m", 1), VersionState::Ready);
}

#[tokio::test]
async fn load_disabled_ignores_new_models_entirely() {
    let options = ControllerOptions {
        enable_repository_load: false,
        ..Default::default()
    };
    let mut harness = Harness::new(options);
    create_model(harness.root(), "preexisting", &[1]);
    harness.startup().await;

    // Startup reconciliation loads regardless of the flag.
    assert_eq!(harness.state_of("preexisting", 1), VersionState::Ready);

    create_model(harness.root(), "late", &[1]);
    harness.cycle().await;

    // No entry was created: status still reports unknown.
    let err = harness
        .status()
        .get_server_status(Some("late"))
        .unwrap_err();
    assert!(matches!(err, RegistryError::UnknownModelStatus { .. }));
}

#[tokio::test]
async fn load_disabled_ignores_new_versions_of_tracked_models() {
    let options = ControllerOptions {
        enable_repository_load: false,
        ..Default::default()
    };
    let mut harness = Harness::new(options);
    let dir = create_model(harness.root(), "m", &[1]);
    harness.startup().await;

    fs::create_dir(dir.join("2")).unwrap();
    fs::write(dir.join("2").join("model.bin"), b"weights").unwrap();
    harness.cycle().await;

    assert!(!harness.store.get("m").unwrap().versions.contains_key(&2));
    assert_eq!(harness.state_of("m", 1), VersionState::Ready);
}

#[tokio::test]
async fn readded_version_resets_execution_count() {
    let mut harness = Harness::new(ControllerOptions::default());
    let dir = create_model(harness.root(), "m", &[1]);
    harness.startup().await;

    harness.store.record_execution("m", 1);
    fs::remove_dir_all(dir.join("1")).unwrap();
    harness.cycle().await;
    assert_eq!(harness.state_of("m", 1), VersionState::Unavailable);
    assert_eq!(harness.count_of("m", 1), 1);

    let vdir = dir.join("1");
    fs::create_dir_all(&vdir).unwrap();
    fs::write(vdir.join("model.bin"), b"weights").unwrap();
    harness.cycle().await;

    assert_eq!(harness.state_of("m", 1), VersionState::Ready);
    assert_eq!(harness.count_of("m", 1), 0);
}

#[tokio::test]
async fn readded_model_resets_execution_counts() {
    let mut harness = Harness::new(ControllerOptions::default());
    let dir = create_model(harness.root(), "m", &[1]);
    harness.startup().await;

    harness.store.record_execution("m", 1);
    fs::remove_dir_all(&dir).unwrap();
    harness.cycle().await;
    assert_eq!(harness.state_of("m", 1), VersionState::Unavailable);

    create_model(harness.root(), "m", &[1]);
    harness.cycle().await;

    assert_eq!(harness.state_of("m", 1), VersionState::Ready);
    assert_eq!(harness.count_of("m", 1), 0);
}

#[tokio::test]
async fn empty_artifact_directory_fails_to_unavailable() {
    let mut harness = Harness::new(ControllerOptions::default());
    let dir = create_model(harness.root(), "m", &[1]);
    fs::remove_file(dir.join("1").join("model.bin")).unwrap();
    harness.startup().await;

    assert_eq!(harness.state_of("m", 1), VersionState::Unavailable);
}

#[tokio::test]
async fn removed_model_that_never_loaded_is_forgotten() {
    let mut harness = Harness::new(ControllerOptions::default());
    let dir = create_model(harness.root(), "m", &[1]);
    fs::remove_file(dir.join("1").join("model.bin")).unwrap();
    harness.startup().await;

    assert_eq!(harness.state_of("m", 1), VersionState::Unavailable);

    fs::remove_dir_all(&dir).unwrap();
    harness.cycle().await;

    // No version ever reached READY, so removing the directory drops the
    // model outright instead of keeping a terminal UNAVAILABLE entry.
    assert!(harness.store.get("m").is_none());
    let err = harness.status().get_server_status(Some("m")).unwrap_err();
    assert!(err
        .to_string()
        .starts_with("no status available for unknown model"));
}

struct SlowRuntime {
    delay: Duration,
}

#[async_trait]
impl ModelRuntime for SlowRuntime {
    async fn load(&self, _model: &str, _version: i64, _path: &Path) -> Result<(), RuntimeError> {
        tokio::time::sleep(self.delay).await;
        Ok(())
    }

    async fn unload(&self, _model: &str, _version: i64) {}
}

#[tokio::test]
async fn load_exceeding_watchdog_times_out_to_unavailable() {
    let options = ControllerOptions {
        load_timeout: Duration::from_millis(50),
        ..Default::default()
    };
    let runtime = Arc::new(SlowRuntime {
        delay: Duration::from_millis(500),
    });
    let mut harness = Harness::with_runtime(options, runtime);
    create_model(harness.root(), "m", &[1]);

    harness.startup().await;

    // Never left LOADING forever: the watchdog reported it unavailable.
    assert_eq!(harness.state_of("m", 1), VersionState::Unavailable);
}

struct CountingRuntime {
    loads: std::sync::atomic::AtomicUsize,
    delay: Duration,
}

#[async_trait]
impl ModelRuntime for CountingRuntime {
    async fn load(&self, _model: &str, _version: i64, _path: &Path) -> Result<(), RuntimeError> {
        self.loads
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(())
    }

    async fn unload(&self, _model: &str, _version: i64) {}
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn superseded_load_is_discarded_and_redone() {
    use modeld::repository::RepoEvent;

    let store_dir = TempDir::new().unwrap();
    create_model(store_dir.path(), "m", &[1]);

    let store = Arc::new(StateStore::new());
    let runtime = Arc::new(CountingRuntime {
        loads: std::sync::atomic::AtomicUsize::new(0),
        delay: Duration::from_millis(200),
    });
    let controller = Arc::new(LifecycleController::new(
        store_dir.path(),
        store.clone(),
        runtime.clone(),
        ControllerOptions::default(),
    ));
    let mut observer = PollingObserver::new(store_dir.path());

    let events = observer.poll().await;
    let first = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.apply(events).await })
    };

    // Let the first load get in flight, then supersede it with a config
    // reload for the same model.
    tokio::time::sleep(Duration::from_millis(50)).await;
    controller
        .apply(vec![RepoEvent::ConfigChanged {
            model: "m".to_string(),
        }])
        .await;
    first.await.unwrap();

    // The stale commit was dropped and the superseding reconciliation
    // reloaded the version.
    assert_eq!(
        store.get("m").unwrap().versions[&1].state,
        VersionState::Ready
    );
    assert_eq!(runtime.loads.load(std::sync::atomic::Ordering::SeqCst), 2);
}

#[tokio::test]
async fn one_model_load_failure_does_not_block_others() {
    let mut harness = Harness::new(ControllerOptions::default());
    let bad = create_model(harness.root(), "bad", &[1]);
    fs::remove_file(bad.join("1").join("model.bin")).unwrap();
    create_model(harness.root(), "good", &[1]);

    harness.startup().await;

    assert_eq!(harness.state_of("bad", 1), VersionState::Unavailable);
    assert_eq!(harness.state_of("good", 1), VersionState::Ready);
}
