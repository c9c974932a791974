//! Update orchestrator
//!
//! One run walks:
//!
//! ```text
//! Start -> Relocate -> QueryRemote -> Compare -> {UseCached | Fetch}
//!       -> PersistState -> Cleanup -> Launch -> Exit
//! ```
//!
//! Steps are awaited one at a time. When the manifest cannot be obtained the
//! run falls back to the installed version and goes straight to Launch if that
//! artifact is cached. Fetch, PersistState and Cleanup run under the cache lock.

use std::fmt;
use std::path::PathBuf;
use tracing::{debug, error, info, warn};

use crate::artifact::{ArtifactCache, CachedArtifact};
use crate::config::UpdaterConfig;
use crate::error::{Result, UpdaterError};
use crate::fetcher::ArtifactFetcher;
use crate::janitor::CacheJanitor;
use crate::launcher::Launcher;
use crate::location::{LocationManager, Relocation};
use crate::lock::CacheLock;
use crate::manifest::{RemoteManifest, VersionOracle};
use crate::state_store::StateStore;
use crate::version::{is_valid_token, update_needed};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateStep {
    Start,
    Relocate,
    QueryRemote,
    Compare,
    UseCached,
    Fetch,
    PersistState,
    Cleanup,
    Launch,
    Exit,
}

impl UpdateStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateStep::Start => "start",
            UpdateStep::Relocate => "relocate",
            UpdateStep::QueryRemote => "query_remote",
            UpdateStep::Compare => "compare",
            UpdateStep::UseCached => "use_cached",
            UpdateStep::Fetch => "fetch",
            UpdateStep::PersistState => "persist_state",
            UpdateStep::Cleanup => "cleanup",
            UpdateStep::Launch => "launch",
            UpdateStep::Exit => "exit",
        }
    }
}

impl fmt::Display for UpdateStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunExit {
    /// The target artifact was started
    Launched,
    /// Offline and nothing cached for the installed version
    NoArtifact,
    FetchFailed(String),
    LaunchFailed(String),
}

impl RunExit {
    pub fn code(&self) -> i32 {
        match self {
            RunExit::Launched => 0,
            _ => 1,
        }
    }
}

impl fmt::Display for RunExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunExit::Launched => write!(f, "launched"),
            RunExit::NoArtifact => write!(f, "no runnable installer available"),
            RunExit::FetchFailed(reason) => write!(f, "fetch failed: {}", reason),
            RunExit::LaunchFailed(reason) => write!(f, "launch failed: {}", reason),
        }
    }
}

/// Trace of one orchestrator run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub steps: Vec<UpdateStep>,
    /// None when relocation is disabled
    pub relocation: Option<Relocation>,
    pub installed_version: String,
    pub target_version: Option<String>,
    pub downloaded: bool,
    pub launched: Option<PathBuf>,
    pub exit: RunExit,
}

impl RunReport {
    pub fn exit_code(&self) -> i32 {
        self.exit.code()
    }
}

/// Result of querying the remote manifest against local state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateCheck {
    pub installed: String,
    /// None when the manifest was unreachable or malformed
    pub manifest: Option<RemoteManifest>,
    /// Newer version online, or the target artifact is missing from the cache
    pub update_needed: bool,
}

pub struct UpdateOrchestrator {
    config: UpdaterConfig,
    state: StateStore,
    oracle: VersionOracle,
    fetcher: ArtifactFetcher,
    location: LocationManager,
    launcher: Box<dyn Launcher>,
    /// Stand-in for the running executable during relocation
    current_exe: Option<PathBuf>,
}

impl UpdateOrchestrator {
    pub fn new(config: UpdaterConfig, launcher: Box<dyn Launcher>) -> Result<Self> {
        config.validate()?;

        let state = StateStore::new(config.paths.state_file());
        let oracle = VersionOracle::from_config(&config.network)?;
        let fetcher = ArtifactFetcher::from_config(&config)?;
        let location = LocationManager::new(
            config.paths.settings_dir.clone(),
            config.paths.updater_file_name.clone(),
        );

        Ok(Self {
            config,
            state,
            oracle,
            fetcher,
            location,
            launcher,
            current_exe: None,
        })
    }

    /// Relocate `path` instead of the running executable
    pub fn with_current_exe(mut self, path: impl Into<PathBuf>) -> Self {
        self.current_exe = Some(path.into());
        self
    }

    pub fn config(&self) -> &UpdaterConfig {
        &self.config
    }

    pub fn cache(&self) -> &ArtifactCache {
        self.fetcher.cache()
    }

    pub fn installed_version(&self) -> String {
        self.state.get_installed_version()
    }

    pub async fn check_for_update(&self) -> UpdateCheck {
        let installed = self.installed_version();
        let manifest = self.oracle.fetch().await;
        let update_needed = manifest
            .as_ref()
            .map(|m| self.needs_fetch(&installed, m))
            .unwrap_or(false);

        UpdateCheck {
            installed,
            manifest,
            update_needed,
        }
    }

    /// Download `manifest`'s artifact, record it as installed and prune the
    /// cache. Fails without touching the cache if another run holds the lock.
    pub async fn fetch_update(&self, manifest: &RemoteManifest) -> Result<CachedArtifact> {
        let installed = self.installed_version();
        let mut steps = Vec::new();
        self.fetch_and_commit(manifest, &installed, &mut steps).await
    }

    /// Launch the cached artifact for `version`.
    pub fn launch_version(&self, version: &str) -> Result<PathBuf> {
        let artifact = self.cached(version).ok_or_else(|| UpdaterError::Launch {
            path: self.cache().path_for(version),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no cached installer"),
        })?;

        self.launcher.launch(&artifact.path)?;
        Ok(artifact.path)
    }

    /// Relocate the updater binary, per configuration.
    pub fn relocate(&self) -> Option<Relocation> {
        if !self.config.relocate {
            debug!("Relocation disabled");
            return None;
        }

        let relocation = match &self.current_exe {
            Some(exe) => self.location.ensure_stable_location_from(exe),
            None => self.location.ensure_stable_location(),
        };
        if !relocation.is_stable() {
            warn!(
                "Running from a non-canonical location; autostart at {} may be stale",
                relocation.path.display()
            );
        }
        Some(relocation)
    }

    /// One complete updater run.
    pub async fn run(&self) -> RunReport {
        let mut steps = vec![UpdateStep::Start];

        let relocation = if self.config.relocate {
            steps.push(UpdateStep::Relocate);
            self.relocate()
        } else {
            None
        };

        steps.push(UpdateStep::QueryRemote);
        let installed = self.installed_version();
        let manifest = self.oracle.fetch().await;

        steps.push(UpdateStep::Compare);
        let mut report = RunReport {
            steps: Vec::new(),
            relocation,
            installed_version: installed.clone(),
            target_version: None,
            downloaded: false,
            launched: None,
            exit: RunExit::NoArtifact,
        };

        let artifact = match manifest {
            None => {
                info!("No update information, falling back to installed version {}", installed);
                report.target_version = Some(installed.clone());
                self.cached(&installed)
            }
            Some(manifest) => {
                report.target_version = Some(manifest.version.clone());

                if self.needs_fetch(&installed, &manifest) {
                    info!("Updating installer {} -> {}", installed, manifest.version);
                    match self.fetch_and_commit(&manifest, &installed, &mut steps).await {
                        Ok(artifact) => {
                            report.downloaded = true;
                            Some(artifact)
                        }
                        Err(e) => {
                            error!("Fetch failed ({}): {}", e.kind(), e);
                            report.exit = RunExit::FetchFailed(e.to_string());
                            return self.finish(report, steps);
                        }
                    }
                } else {
                    steps.push(UpdateStep::UseCached);
                    info!("Installer {} already cached", manifest.version);
                    let artifact = self.cached(&manifest.version);
                    if artifact.is_some() {
                        match CacheLock::acquire(self.cache().dir(), UpdateStep::UseCached.as_str()) {
                            Ok(_lock) => self.commit(&manifest.version, &installed, &mut steps),
                            Err(e) => warn!("Skipping state update and cleanup: {}", e),
                        }
                    }
                    artifact
                }
            }
        };

        let Some(artifact) = artifact else {
            error!("No runnable installer available");
            report.exit = RunExit::NoArtifact;
            return self.finish(report, steps);
        };

        steps.push(UpdateStep::Launch);
        match self.launcher.launch(&artifact.path) {
            Ok(()) => {
                report.launched = Some(artifact.path);
                report.exit = RunExit::Launched;
            }
            Err(e) => {
                error!("{}", e);
                report.exit = RunExit::LaunchFailed(e.to_string());
            }
        }

        self.finish(report, steps)
    }

    fn finish(&self, mut report: RunReport, mut steps: Vec<UpdateStep>) -> RunReport {
        steps.push(UpdateStep::Exit);
        report.steps = steps;
        info!("Updater run finished: {} (exit {})", report.exit, report.exit_code());
        report
    }

    fn needs_fetch(&self, installed: &str, manifest: &RemoteManifest) -> bool {
        let newer = update_needed(installed, &manifest.version);
        let missing = self.cached(&manifest.version).is_none();
        debug!(
            "Compare: installed={} online={} newer={} missing={}",
            installed, manifest.version, newer, missing
        );
        newer || missing
    }

    fn cached(&self, version: &str) -> Option<CachedArtifact> {
        if !is_valid_token(version) {
            warn!("Ignoring unusable version token {:?}", version);
            return None;
        }
        self.cache().lookup(version)
    }

    async fn fetch_and_commit(
        &self,
        manifest: &RemoteManifest,
        installed: &str,
        steps: &mut Vec<UpdateStep>,
    ) -> Result<CachedArtifact> {
        steps.push(UpdateStep::Fetch);
        let mut lock = CacheLock::acquire(self.cache().dir(), UpdateStep::Fetch.as_str())?;

        let artifact = self
            .fetcher
            .download(&manifest.download_url, &manifest.version)
            .await?;

        if let Err(e) = lock.update_step(UpdateStep::PersistState.as_str()) {
            debug!("Could not update lock step: {}", e);
        }
        self.commit(&artifact.version, installed, steps);
        Ok(artifact)
    }

    /// PersistState then Cleanup; neither failure stops the run
    fn commit(&self, target: &str, installed: &str, steps: &mut Vec<UpdateStep>) {
        steps.push(UpdateStep::PersistState);
        if target != installed {
            if let Err(e) = self.state.set_installed_version(target) {
                warn!("Failed to persist installed version {}: {}", target, e);
            }
        }

        steps.push(UpdateStep::Cleanup);
        match CacheJanitor::new(self.cache().clone()).sweep(target) {
            Ok(report) if !report.failed.is_empty() => {
                warn!("Cache sweep left {} stale file(s) behind", report.failed.len())
            }
            Ok(report) => debug!("Cache sweep removed {} file(s)", report.removed.len()),
            Err(e) => warn!("Cache sweep failed: {}", e),
        }
    }
}
