//! Install-folder discovery
//!
//! Walks every storage volume looking for game installations: folders whose
//! path contains the marker directory and which directly hold the marker file
//! (`.../StarCitizen/LIVE/Data.p4k`). One blocking walk per root, bounded by
//! a semaphore, all joined before the merged result is returned.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use sysinfo::Disks;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::ScanConfig;

/// A game installation found on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallCandidate {
    /// Folder base name, e.g. `LIVE` or `PTU`
    pub name: String,
    pub path: PathBuf,
}

/// Mount points of all storage volumes
pub fn volume_roots() -> Vec<PathBuf> {
    let disks = Disks::new_with_refreshed_list();
    let roots: BTreeSet<PathBuf> = disks
        .list()
        .iter()
        .map(|disk| disk.mount_point().to_path_buf())
        .collect();
    debug!("Found {} volume(s)", roots.len());
    roots.into_iter().collect()
}

/// Scan `roots` concurrently, keyed by absolute path.
pub async fn scan_install_folders(
    roots: Vec<PathBuf>,
    config: &ScanConfig,
) -> BTreeMap<PathBuf, InstallCandidate> {
    let semaphore = Arc::new(Semaphore::new(config.max_workers.max(1)));
    let mut tasks = JoinSet::new();

    for root in roots {
        let semaphore = semaphore.clone();
        let marker_dir = config.marker_dir.clone();
        let marker_file = config.marker_file.clone();

        tasks.spawn(async move {
            let _permit = semaphore.acquire_owned().await.ok()?;
            let walk_root = root.clone();
            match tokio::task::spawn_blocking(move || {
                scan_root(&walk_root, &marker_dir, &marker_file)
            })
            .await
            {
                Ok(found) => Some(found),
                Err(e) => {
                    warn!("Scan of {} failed: {}", root.display(), e);
                    None
                }
            }
        });
    }

    let mut candidates = BTreeMap::new();
    while let Some(res) = tasks.join_next().await {
        match res {
            Ok(Some(found)) => {
                for candidate in found {
                    candidates.entry(candidate.path.clone()).or_insert(candidate);
                }
            }
            Ok(None) => {}
            Err(e) => warn!("Scan task failed: {}", e),
        }
    }

    info!("Install scan found {} folder(s)", candidates.len());
    candidates
}

/// Blocking walk of one root
pub fn scan_root(root: &Path, marker_dir: &str, marker_file: &str) -> Vec<InstallCandidate> {
    debug!("Scanning {}", root.display());
    let mut found = Vec::new();

    for entry in WalkDir::new(root).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                debug!("Skipping unreadable entry: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_dir() {
            continue;
        }

        let path = entry.path();
        if !path.to_string_lossy().contains(marker_dir) || !path.join(marker_file).is_file() {
            continue;
        }

        let path = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        debug!("Install candidate {} at {}", name, path.display());
        found.push(InstallCandidate { name, path });
    }

    found
}
