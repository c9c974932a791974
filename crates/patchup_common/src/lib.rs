//! Patchup Common - core of the translation installer self-updater.
//!
//! Keeps the updater binary at a stable per-user path, checks a remote
//! manifest for a newer installer, caches it by version and launches it.

pub mod artifact;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod install_scan;
pub mod janitor;
pub mod launcher;
pub mod location;
pub mod lock;
pub mod manifest;
pub mod orchestrator;
pub mod state_store;
pub mod version;

pub use artifact::{ArtifactCache, CachedArtifact};
pub use config::UpdaterConfig;
pub use error::{Result, UpdaterError};
pub use launcher::{Launcher, ProcessLauncher};
pub use location::{Relocation, RelocationStatus};
pub use manifest::RemoteManifest;
pub use orchestrator::{RunExit, RunReport, UpdateCheck, UpdateOrchestrator, UpdateStep};
