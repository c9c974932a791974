//! Stable location for the updater binary
//!
//! Autostart registration points at one canonical path. Whatever copy the user
//! launched, it copies itself there first. Failing to do so is never fatal: the
//! run continues from wherever it was started, and the status says so.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// How the relocation went
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelocationStatus {
    /// Already running from the canonical path
    AlreadyStable,
    /// Copied the running binary to the canonical path
    Copied,
    /// Could not copy; still running from a non-canonical path
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relocation {
    /// Always the canonical path, even when the copy failed
    pub path: PathBuf,
    pub status: RelocationStatus,
}

impl Relocation {
    pub fn is_stable(&self) -> bool {
        !matches!(self.status, RelocationStatus::Failed(_))
    }
}

pub struct LocationManager {
    stable_dir: PathBuf,
    file_name: String,
}

impl LocationManager {
    pub fn new(stable_dir: impl Into<PathBuf>, file_name: impl Into<String>) -> Self {
        Self {
            stable_dir: stable_dir.into(),
            file_name: file_name.into(),
        }
    }

    pub fn stable_path(&self) -> PathBuf {
        self.stable_dir.join(&self.file_name)
    }

    /// Relocate the currently running executable.
    pub fn ensure_stable_location(&self) -> Relocation {
        match std::env::current_exe() {
            Ok(current) => self.ensure_stable_location_from(&current),
            Err(e) => {
                warn!("Cannot resolve the running executable: {}", e);
                Relocation {
                    path: self.stable_path(),
                    status: RelocationStatus::Failed(e.to_string()),
                }
            }
        }
    }

    /// Relocate `current` to the stable path.
    pub fn ensure_stable_location_from(&self, current: &Path) -> Relocation {
        let stable = self.stable_path();

        if same_path(current, &stable) {
            debug!("Updater already at stable location {}", stable.display());
            return Relocation {
                path: stable,
                status: RelocationStatus::AlreadyStable,
            };
        }

        let status = match self.copy_into_place(current, &stable) {
            Ok(()) => {
                info!(
                    "Copied updater from {} to stable location {}",
                    current.display(),
                    stable.display()
                );
                RelocationStatus::Copied
            }
            Err(e) => {
                warn!(
                    "Failed to copy updater to stable location {}: {}",
                    stable.display(),
                    e
                );
                RelocationStatus::Failed(e.to_string())
            }
        };

        Relocation {
            path: stable,
            status,
        }
    }

    fn copy_into_place(&self, current: &Path, stable: &Path) -> io::Result<()> {
        fs::create_dir_all(&self.stable_dir)?;

        let source_meta = fs::metadata(current)?;
        let temp = stable.with_extension("relocate.tmp");

        let result = (|| {
            // fs::copy carries the permission bits over
            fs::copy(current, &temp)?;
            if let Ok(modified) = source_meta.modified() {
                File::options().write(true).open(&temp)?.set_modified(modified)?;
            }
            fs::rename(&temp, stable)
        })();

        if result.is_err() {
            let _ = fs::remove_file(&temp);
        }
        result
    }
}

/// Case-insensitive path equality, as on the platforms the updater ships for
fn same_path(a: &Path, b: &Path) -> bool {
    a.to_string_lossy().to_lowercase() == b.to_string_lossy().to_lowercase()
}
