use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use chrono::{Duration, Utc};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use patchup_common::lock::{LockInfo, LOCK_FILE};
use patchup_common::state_store::StateStore;
use patchup_common::{
    ArtifactCache, Launcher, RelocationStatus, Result, RunExit, UpdateOrchestrator, UpdateStep,
    UpdaterConfig, UpdaterError,
};

const PAYLOAD: &[u8] = b"MZ fresh installer payload";

/// Closed port; connections are refused immediately
const UNREACHABLE: &str = "http://127.0.0.1:9/manifest";

struct FakeServer {
    base: String,
    downloads: Arc<AtomicUsize>,
    _handle: tokio::task::JoinHandle<()>,
}

impl FakeServer {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    fn downloads(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }
}

/// Serves `manifest` (with `{base}` replaced by the server's own URL) at
/// `/manifest` and the installer at `/installer.exe`.
async fn start_server(manifest: &str) -> FakeServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let base = format!("http://{}", addr);

    let manifest = manifest.replace("{base}", &base);
    let downloads = Arc::new(AtomicUsize::new(0));
    let counter = downloads.clone();

    let app = Router::new()
        .route(
            "/manifest",
            get(move || {
                let body = manifest.clone();
                async move { body }
            }),
        )
        .route(
            "/installer.exe",
            get(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    PAYLOAD.to_vec()
                }
            }),
        )
        .route("/gone", get(|| async { StatusCode::NOT_FOUND }));

    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    FakeServer {
        base,
        downloads,
        _handle: handle,
    }
}

/// Announces 4096 bytes, sends a few, then hangs up.
async fn start_truncating_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 2048];
                let _ = socket.read(&mut buf).await;
                let _ = socket
                    .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 4096\r\n\r\npartial body")
                    .await;
                let _ = socket.shutdown().await;
            });
        }
    });

    addr
}

#[derive(Clone, Default)]
struct RecordingLauncher {
    launched: Arc<Mutex<Vec<PathBuf>>>,
    fail: bool,
}

impl Launcher for RecordingLauncher {
    fn launch(&self, path: &Path) -> Result<()> {
        if self.fail {
            return Err(UpdaterError::Launch {
                path: path.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "blocked"),
            });
        }
        self.launched.lock().unwrap().push(path.to_path_buf());
        Ok(())
    }
}

struct Harness {
    temp: TempDir,
    config: UpdaterConfig,
    launcher: RecordingLauncher,
}

impl Harness {
    fn new(manifest_url: &str) -> Self {
        let temp = TempDir::new().unwrap();
        let settings = temp.path().join("InstallerTraduzioneMRREVO");
        let mut config = UpdaterConfig::with_dirs(&settings, &settings);
        config.network.manifest_url = manifest_url.to_string();
        config.relocate = false;

        Self {
            temp,
            config,
            launcher: RecordingLauncher::default(),
        }
    }

    fn orchestrator(&self) -> UpdateOrchestrator {
        UpdateOrchestrator::new(self.config.clone(), Box::new(self.launcher.clone())).unwrap()
    }

    fn cache(&self) -> ArtifactCache {
        self.config.paths.artifact_cache()
    }

    fn state(&self) -> StateStore {
        StateStore::new(self.config.paths.state_file())
    }

    fn install(&self, version: &str) -> PathBuf {
        self.state().set_installed_version(version).unwrap();
        self.seed(version)
    }

    fn seed(&self, version: &str) -> PathBuf {
        let cache = self.cache();
        cache.ensure_dir().unwrap();
        let path = cache.path_for(version);
        std::fs::write(&path, format!("old installer {}", version)).unwrap();
        path
    }

    /// Write a cache lock on behalf of another run
    fn hold_lock(&self, holder: LockInfo) -> PathBuf {
        let cache = self.cache();
        cache.ensure_dir().unwrap();
        let path = cache.dir().join(LOCK_FILE);
        std::fs::write(&path, serde_json::to_string(&holder).unwrap()).unwrap();
        path
    }

    fn launched(&self) -> Vec<PathBuf> {
        self.launcher.launched.lock().unwrap().clone()
    }

    fn cached_versions(&self) -> Vec<String> {
        self.cache()
            .artifacts()
            .unwrap()
            .into_iter()
            .map(|a| a.version)
            .collect()
    }

    fn partials(&self) -> usize {
        std::fs::read_dir(self.cache().dir())
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .unwrap()
                    .file_name()
                    .to_string_lossy()
                    .ends_with(".part")
            })
            .count()
    }
}

#[tokio::test]
async fn newer_version_is_fetched_persisted_and_pruned() {
    let server = start_server("2\n{base}/installer.exe").await;
    let harness = Harness::new(&server.url("/manifest"));
    harness.install("1");

    let report = harness.orchestrator().run().await;

    assert_eq!(report.exit, RunExit::Launched);
    assert_eq!(report.exit_code(), 0);
    assert!(report.downloaded);
    assert_eq!(report.target_version.as_deref(), Some("2"));
    assert_eq!(
        report.steps,
        vec![
            UpdateStep::Start,
            UpdateStep::QueryRemote,
            UpdateStep::Compare,
            UpdateStep::Fetch,
            UpdateStep::PersistState,
            UpdateStep::Cleanup,
            UpdateStep::Launch,
            UpdateStep::Exit,
        ]
    );

    assert_eq!(server.downloads(), 1);
    assert_eq!(harness.state().get_installed_version(), "2");
    assert_eq!(harness.cached_versions(), vec!["2".to_string()]);

    let new_path = harness.cache().path_for("2");
    assert_eq!(std::fs::read(&new_path).unwrap(), PAYLOAD);
    assert_eq!(harness.launched(), vec![new_path.clone()]);
    assert_eq!(report.launched, Some(new_path));
    assert!(!harness.cache().dir().join(LOCK_FILE).exists());
}

#[tokio::test]
async fn offline_with_cached_installer_launches_it() {
    let harness = Harness::new(UNREACHABLE);
    let cached = harness.install("1");

    let report = harness.orchestrator().run().await;

    assert_eq!(report.exit_code(), 0);
    assert!(!report.downloaded);
    assert_eq!(
        report.steps,
        vec![
            UpdateStep::Start,
            UpdateStep::QueryRemote,
            UpdateStep::Compare,
            UpdateStep::Launch,
            UpdateStep::Exit,
        ]
    );
    assert_eq!(harness.launched(), vec![cached]);
    assert_eq!(harness.state().get_installed_version(), "1");
}

#[tokio::test]
async fn offline_without_cached_installer_exits_one() {
    let harness = Harness::new(UNREACHABLE);
    harness.state().set_installed_version("1").unwrap();

    let report = harness.orchestrator().run().await;

    assert_eq!(report.exit, RunExit::NoArtifact);
    assert_eq!(report.exit_code(), 1);
    assert!(report.launched.is_none());
    assert!(harness.launched().is_empty());
    assert!(!report.steps.contains(&UpdateStep::Launch));
}

#[tokio::test]
async fn single_line_manifest_is_treated_as_offline() {
    let server = start_server("2").await;

    let harness = Harness::new(&server.url("/manifest"));
    let cached = harness.install("1");
    let report = harness.orchestrator().run().await;
    assert_eq!(report.exit_code(), 0);
    assert_eq!(harness.launched(), vec![cached]);

    let empty = Harness::new(&server.url("/manifest"));
    empty.state().set_installed_version("1").unwrap();
    let report = empty.orchestrator().run().await;
    assert_eq!(report.exit_code(), 1);
    assert!(empty.launched().is_empty());

    assert_eq!(server.downloads(), 0);
}

#[tokio::test]
async fn manifest_404_is_treated_as_offline() {
    let server = start_server("2\n{base}/installer.exe").await;
    let harness = Harness::new(&server.url("/gone"));
    let cached = harness.install("1");

    let report = harness.orchestrator().run().await;
    assert_eq!(report.exit_code(), 0);
    assert_eq!(harness.launched(), vec![cached]);
    assert_eq!(server.downloads(), 0);
}

#[tokio::test]
async fn second_run_downloads_nothing() {
    let server = start_server("2\n{base}/installer.exe").await;
    let harness = Harness::new(&server.url("/manifest"));
    harness.install("1");

    let first = harness.orchestrator().run().await;
    assert!(first.downloaded);

    let second = harness.orchestrator().run().await;
    assert_eq!(second.exit_code(), 0);
    assert!(!second.downloaded);
    assert!(second.steps.contains(&UpdateStep::UseCached));
    assert!(!second.steps.contains(&UpdateStep::Fetch));

    assert_eq!(server.downloads(), 1);
    assert_eq!(harness.launched().len(), 2);
    assert_eq!(harness.cached_versions(), vec!["2".to_string()]);
}

#[tokio::test]
async fn missing_artifact_for_current_version_is_repaired() {
    let server = start_server("2\n{base}/installer.exe").await;
    let harness = Harness::new(&server.url("/manifest"));
    harness.state().set_installed_version("2").unwrap();

    let report = harness.orchestrator().run().await;

    assert_eq!(report.exit_code(), 0);
    assert!(report.downloaded);
    assert_eq!(server.downloads(), 1);
    assert_eq!(harness.state().get_installed_version(), "2");
}

#[tokio::test]
async fn interrupted_download_leaves_cache_untouched() {
    let truncating = start_truncating_server().await;
    let server = start_server(&format!("2\nhttp://{}/installer.exe", truncating)).await;
    let harness = Harness::new(&server.url("/manifest"));
    let previous = harness.install("1");

    let report = harness.orchestrator().run().await;

    assert!(matches!(report.exit, RunExit::FetchFailed(_)));
    assert_eq!(report.exit_code(), 1);
    assert!(!report.steps.contains(&UpdateStep::PersistState));
    assert!(harness.launched().is_empty());

    assert!(!harness.cache().path_for("2").exists());
    assert_eq!(harness.partials(), 0);
    assert_eq!(std::fs::read_to_string(&previous).unwrap(), "old installer 1");
    assert_eq!(harness.state().get_installed_version(), "1");
}

#[tokio::test]
async fn live_cache_lock_blocks_fetch() {
    let server = start_server("2\n{base}/installer.exe").await;
    let harness = Harness::new(&server.url("/manifest"));
    let previous = harness.install("1");

    // Held by a live process (this one)
    let lock_path = harness.hold_lock(LockInfo::new("fetch"));

    let report = harness.orchestrator().run().await;

    match &report.exit {
        RunExit::FetchFailed(reason) => assert!(reason.contains("lock"), "{}", reason),
        other => panic!("unexpected exit {:?}", other),
    }
    assert_eq!(server.downloads(), 0);
    assert!(previous.exists());
    assert_eq!(harness.cached_versions(), vec!["1".to_string()]);
    assert_eq!(harness.state().get_installed_version(), "1");
    assert!(lock_path.exists());
}

#[tokio::test]
async fn long_running_holder_keeps_lock_and_partial() {
    let server = start_server("2\n{base}/installer.exe").await;
    let harness = Harness::new(&server.url("/manifest"));
    let cached = harness.install("2");

    // A live run that started downloading 6 minutes ago
    let mut holder = LockInfo::new("fetch");
    holder.acquired_at = Utc::now() - Duration::seconds(360);
    let lock_path = harness.hold_lock(holder);
    let lock_before = std::fs::read_to_string(&lock_path).unwrap();
    let partial = harness.cache().dir().join(format!(
        "{}.deadbeef.part",
        harness.cache().file_name("3")
    ));
    std::fs::write(&partial, b"first half").unwrap();

    let report = harness.orchestrator().run().await;

    assert_eq!(report.exit, RunExit::Launched);
    assert_eq!(
        report.steps,
        vec![
            UpdateStep::Start,
            UpdateStep::QueryRemote,
            UpdateStep::Compare,
            UpdateStep::UseCached,
            UpdateStep::Launch,
            UpdateStep::Exit,
        ]
    );
    assert_eq!(harness.launched(), vec![cached]);
    assert_eq!(std::fs::read_to_string(&lock_path).unwrap(), lock_before);
    assert!(partial.exists());
}

#[tokio::test]
async fn contended_lock_skips_commit_but_launches_cached() {
    // Installed 3, manifest rolls back to 2 which is already cached
    let server = start_server("2\n{base}/installer.exe").await;
    let harness = Harness::new(&server.url("/manifest"));
    let installed = harness.install("3");
    let target = harness.seed("2");
    let stale = harness.seed("1");

    let lock_path = harness.hold_lock(LockInfo::new("fetch"));

    let report = harness.orchestrator().run().await;

    assert_eq!(report.exit_code(), 0);
    assert!(report.steps.contains(&UpdateStep::UseCached));
    assert!(!report.steps.contains(&UpdateStep::PersistState));
    assert!(!report.steps.contains(&UpdateStep::Cleanup));
    assert_eq!(harness.launched(), vec![target.clone()]);
    assert_eq!(report.launched, Some(target));

    assert_eq!(harness.state().get_installed_version(), "3");
    assert!(installed.exists());
    assert!(stale.exists());
    assert_eq!(
        harness.cached_versions(),
        vec!["1".to_string(), "2".to_string(), "3".to_string()]
    );
    assert!(lock_path.exists());
    assert_eq!(server.downloads(), 0);
}

#[tokio::test]
async fn relocation_copies_binary_to_settings_dir() {
    let harness = {
        let mut harness = Harness::new(UNREACHABLE);
        harness.config.relocate = true;
        harness
    };
    harness.install("1");

    let downloads = harness.temp.path().join("Downloads");
    std::fs::create_dir_all(&downloads).unwrap();
    let launched_from = downloads.join("updater-download");
    std::fs::write(&launched_from, b"updater binary").unwrap();

    let report = harness
        .orchestrator()
        .with_current_exe(&launched_from)
        .run()
        .await;

    assert_eq!(report.steps[1], UpdateStep::Relocate);
    let relocation = report.relocation.unwrap();
    assert_eq!(relocation.status, RelocationStatus::Copied);
    assert_eq!(relocation.path, harness.config.paths.stable_updater_path());

    std::fs::remove_dir_all(&downloads).unwrap();
    assert_eq!(std::fs::read(&relocation.path).unwrap(), b"updater binary");

    // The stable copy is not mistaken for a cached installer
    assert_eq!(harness.cached_versions(), vec!["1".to_string()]);
}

#[tokio::test]
async fn launch_failure_exits_one() {
    let harness = {
        let mut harness = Harness::new(UNREACHABLE);
        harness.launcher.fail = true;
        harness
    };
    harness.install("1");

    let report = harness.orchestrator().run().await;
    assert!(matches!(report.exit, RunExit::LaunchFailed(_)));
    assert_eq!(report.exit_code(), 1);
    assert!(report.launched.is_none());
}

#[tokio::test]
async fn entry_points_check_fetch_launch() {
    let server = start_server("3\n{base}/installer.exe").await;
    let harness = Harness::new(&server.url("/manifest"));
    harness.install("2");
    let orchestrator = harness.orchestrator();

    assert_eq!(orchestrator.installed_version(), "2");

    let check = orchestrator.check_for_update().await;
    assert_eq!(check.installed, "2");
    assert!(check.update_needed);
    let manifest = check.manifest.unwrap();
    assert_eq!(manifest.version, "3");

    let artifact = orchestrator.fetch_update(&manifest).await.unwrap();
    assert_eq!(artifact.path, harness.cache().path_for("3"));
    assert_eq!(orchestrator.installed_version(), "3");
    assert_eq!(harness.cached_versions(), vec!["3".to_string()]);
    assert!(harness.launched().is_empty());

    let check = orchestrator.check_for_update().await;
    assert!(!check.update_needed);

    let launched = orchestrator.launch_version("3").unwrap();
    assert_eq!(launched, artifact.path);
    assert_eq!(harness.launched(), vec![artifact.path]);

    let err = orchestrator.launch_version("2").unwrap_err();
    assert!(matches!(err, UpdaterError::Launch { .. }));
}

#[tokio::test]
async fn check_without_manifest_reports_no_update() {
    let harness = Harness::new(UNREACHABLE);
    let check = harness.orchestrator().check_for_update().await;
    assert_eq!(check.installed, "0");
    assert!(check.manifest.is_none());
    assert!(!check.update_needed);
}
