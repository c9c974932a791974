//! Updater configuration
//!
//! Everything the core needs is passed in through `UpdaterConfig`, so tests can
//! point the updater at fake endpoints and temporary directories.
//!
//! Configuration lives in `<settings dir>/patchup.toml`. Every field is optional;
//! missing fields take the defaults below.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

use crate::artifact::ArtifactCache;
use crate::error::{Result, UpdaterError};
use crate::lock::LOCK_FILE;

/// Per-user folder holding the stable updater, the cache and the state file
pub const SETTINGS_FOLDER: &str = "InstallerTraduzioneMRREVO";

/// Config file name inside the settings folder
pub const CONFIG_FILE: &str = "patchup.toml";

/// Log file inside the settings folder
pub const LOG_FILE: &str = "updater.log";

/// Environment override for the manifest endpoint
pub const MANIFEST_URL_ENV: &str = "PATCHUP_MANIFEST_URL";

const DEFAULT_MANIFEST_URL: &str =
    "https://www.mrrevo.it/s/LrEJSBT9dWbRLYJ/download/launcher_info.txt";

/// Network settings for the manifest and artifact requests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Where the two-line manifest is published
    #[serde(default = "default_manifest_url")]
    pub manifest_url: String,

    /// Client identifier sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Whole-request bound for the manifest fetch
    #[serde(default = "default_manifest_timeout_secs")]
    pub manifest_timeout_secs: u64,

    /// Connect-phase bound for the artifact download
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Write buffer size while streaming the artifact
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

fn default_manifest_url() -> String {
    DEFAULT_MANIFEST_URL.to_string()
}

fn default_user_agent() -> String {
    format!("Mozilla/5.0 (compatible; patchup/{})", env!("CARGO_PKG_VERSION"))
}

fn default_manifest_timeout_secs() -> u64 {
    5
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_chunk_size() -> usize {
    8 * 1024
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            manifest_url: default_manifest_url(),
            user_agent: default_user_agent(),
            manifest_timeout_secs: default_manifest_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            chunk_size: default_chunk_size(),
        }
    }
}

impl NetworkConfig {
    pub fn manifest_timeout(&self) -> Duration {
        Duration::from_secs(self.manifest_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// On-disk layout
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Canonical per-user directory; the stable updater lives here
    #[serde(default = "default_settings_dir")]
    pub settings_dir: PathBuf,

    /// Artifact cache; defaults to the settings directory
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,

    /// File name of the stable updater binary
    #[serde(default = "default_updater_file_name")]
    pub updater_file_name: String,

    #[serde(default = "default_state_file_name")]
    pub state_file_name: String,

    /// Cached artifacts are named `<prefix><version><exe suffix>`
    #[serde(default = "default_artifact_prefix")]
    pub artifact_prefix: String,
}

fn default_settings_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(std::env::temp_dir)
        .join(SETTINGS_FOLDER)
}

fn default_updater_file_name() -> String {
    format!("AUTO Installer traduzione SC{}", std::env::consts::EXE_SUFFIX)
}

fn default_state_file_name() -> String {
    "installer_version.json".to_string()
}

fn default_artifact_prefix() -> String {
    "installer_".to_string()
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            settings_dir: default_settings_dir(),
            cache_dir: None,
            updater_file_name: default_updater_file_name(),
            state_file_name: default_state_file_name(),
            artifact_prefix: default_artifact_prefix(),
        }
    }
}

impl PathsConfig {
    pub fn cache_dir(&self) -> PathBuf {
        self.cache_dir
            .clone()
            .unwrap_or_else(|| self.settings_dir.clone())
    }

    pub fn state_file(&self) -> PathBuf {
        self.settings_dir.join(&self.state_file_name)
    }

    pub fn stable_updater_path(&self) -> PathBuf {
        self.settings_dir.join(&self.updater_file_name)
    }

    pub fn log_file(&self) -> PathBuf {
        self.settings_dir.join(LOG_FILE)
    }

    /// Artifact cache that ignores our own bookkeeping files
    pub fn artifact_cache(&self) -> ArtifactCache {
        let state_tmp = Path::new(&self.state_file_name)
            .with_extension("tmp")
            .to_string_lossy()
            .into_owned();

        ArtifactCache::new(self.cache_dir(), self.artifact_prefix.clone()).excluding([
            self.state_file_name.clone(),
            state_tmp,
            self.updater_file_name.clone(),
            CONFIG_FILE.to_string(),
            LOG_FILE.to_string(),
            LOCK_FILE.to_string(),
        ])
    }
}

/// Install-folder discovery settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// A candidate's path must contain this fragment
    #[serde(default = "default_marker_dir")]
    pub marker_dir: String,

    /// ...and the folder must directly contain this file
    #[serde(default = "default_marker_file")]
    pub marker_file: String,

    /// Upper bound on concurrently scanned volumes
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
}

fn default_marker_dir() -> String {
    "StarCitizen".to_string()
}

fn default_marker_file() -> String {
    "Data.p4k".to_string()
}

fn default_max_workers() -> usize {
    num_cpus::get().max(1)
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            marker_dir: default_marker_dir(),
            marker_file: default_marker_file(),
            max_workers: default_max_workers(),
        }
    }
}

/// Top-level configuration bundle handed to the orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdaterConfig {
    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub scan: ScanConfig,

    /// Copy the running binary to the stable location before each run
    #[serde(default = "default_relocate")]
    pub relocate: bool,
}

fn default_relocate() -> bool {
    true
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            paths: PathsConfig::default(),
            scan: ScanConfig::default(),
            relocate: default_relocate(),
        }
    }
}

impl UpdaterConfig {
    /// Load configuration.
    ///
    /// An explicit path must exist and parse. Without one, the file in the
    /// default settings directory is used when present; a broken default file
    /// is logged and ignored.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => Self::load_or_default(&default_settings_dir().join(CONFIG_FILE)),
        };

        if let Ok(url) = std::env::var(MANIFEST_URL_ENV) {
            if !url.trim().is_empty() {
                debug!("Manifest URL overridden by {}", MANIFEST_URL_ENV);
                config.network.manifest_url = url.trim().to_string();
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Read `path` if it exists; a broken file is logged and ignored.
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            debug!("No config at {}, using defaults", path.display());
            return Self::default();
        }
        Self::from_file(path).unwrap_or_else(|e| {
            warn!("Ignoring {}: {}", path.display(), e);
            Self::default()
        })
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| UpdaterError::fs(path, e))?;
        toml::from_str(&content)
            .map_err(|e| UpdaterError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Defaults rooted at explicit directories.
    pub fn with_dirs(settings_dir: impl Into<PathBuf>, cache_dir: impl Into<PathBuf>) -> Self {
        let mut config = Self::default();
        config.paths.settings_dir = settings_dir.into();
        config.paths.cache_dir = Some(cache_dir.into());
        config
    }

    pub fn validate(&self) -> Result<()> {
        if self.network.manifest_url.trim().is_empty() {
            return Err(UpdaterError::Config("network.manifest_url is empty".into()));
        }
        if self.network.chunk_size == 0 {
            return Err(UpdaterError::Config("network.chunk_size must be > 0".into()));
        }
        if self.paths.artifact_prefix.is_empty() {
            return Err(UpdaterError::Config("paths.artifact_prefix is empty".into()));
        }
        if self.paths.updater_file_name.is_empty() {
            return Err(UpdaterError::Config("paths.updater_file_name is empty".into()));
        }
        if self.scan.max_workers == 0 {
            return Err(UpdaterError::Config("scan.max_workers must be > 0".into()));
        }
        Ok(())
    }
}
