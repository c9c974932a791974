//! Cache janitor - keeps exactly one cached installer.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

use crate::artifact::{ArtifactCache, CacheEntry};
use crate::error::Result;

/// Partial downloads written to more recently than this may belong to a
/// transfer still in progress
const PARTIAL_GRACE: Duration = Duration::from_secs(300);

/// Outcome of one sweep
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub kept: Option<PathBuf>,
    pub removed: Vec<PathBuf>,
    /// Recent partial downloads left in place
    pub in_flight: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
}

pub struct CacheJanitor {
    cache: ArtifactCache,
}

impl CacheJanitor {
    pub fn new(cache: ArtifactCache) -> Self {
        Self { cache }
    }

    /// Delete every cached artifact whose version is not exactly
    /// `current_version`, plus partial downloads nobody has written to lately.
    ///
    /// Listing the directory can fail; individual deletions cannot fail the sweep.
    pub fn sweep(&self, current_version: &str) -> Result<SweepReport> {
        let mut report = SweepReport::default();

        for entry in self.cache.entries()? {
            let path = match entry {
                CacheEntry::Artifact(artifact) if artifact.version == current_version => {
                    debug!("Keeping {}", artifact.path.display());
                    report.kept = Some(artifact.path);
                    continue;
                }
                CacheEntry::Artifact(artifact) => artifact.path,
                CacheEntry::Partial(path) if recently_written(&path) => {
                    debug!("Leaving in-flight download {}", path.display());
                    report.in_flight.push(path);
                    continue;
                }
                CacheEntry::Partial(path) => path,
            };

            match fs::remove_file(&path) {
                Ok(()) => {
                    info!("Removed stale installer {}", path.display());
                    report.removed.push(path);
                }
                Err(e) => {
                    warn!("Failed to remove {}: {}", path.display(), e);
                    report.failed.push((path, e.to_string()));
                }
            }
        }

        Ok(report)
    }
}

fn recently_written(path: &Path) -> bool {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .map(|modified| {
            SystemTime::now()
                .duration_since(modified)
                .unwrap_or(Duration::ZERO)
                < PARTIAL_GRACE
        })
        .unwrap_or(false)
}
