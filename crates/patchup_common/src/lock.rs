//! Cache lock
//!
//! Serialises fetch, persist and cleanup across concurrent updater runs
//! sharing one cache directory. The lock file records who holds it. A live
//! holder keeps the lock for as long as it runs, however long a download
//! takes; a lock whose holder is gone or whose contents are unreadable is
//! reclaimed.
//!
//! The holder is identified by pid plus process start time, so a pid reused
//! by an unrelated process does not pin an abandoned lock.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process;
use sysinfo::{Pid, System};
use tracing::{debug, info, warn};

use crate::error::{Result, UpdaterError};
use crate::state_store::atomic_write;

pub const LOCK_FILE: &str = "cache.lock";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    pub pid: u32,
    /// Holder start time in seconds since the epoch; 0 if unknown
    #[serde(default)]
    pub started_at: u64,
    pub acquired_at: DateTime<Utc>,
    /// Step the holder was in
    pub step: String,
}

impl LockInfo {
    /// Lock record for the current process
    pub fn new(step: &str) -> Self {
        let pid = process::id();
        Self {
            pid,
            started_at: process_start_time(pid).unwrap_or(0),
            acquired_at: Utc::now(),
            step: step.to_string(),
        }
    }

    pub fn age_secs(&self) -> i64 {
        (Utc::now() - self.acquired_at).num_seconds().max(0)
    }

    /// The recorded process still runs and is the same process
    pub fn holder_alive(&self) -> bool {
        match process_start_time(self.pid) {
            None => false,
            Some(start) => self.started_at == 0 || start == self.started_at,
        }
    }
}

fn process_start_time(pid: u32) -> Option<u64> {
    let pid = Pid::from_u32(pid);
    let mut system = System::new();
    if !system.refresh_process(pid) {
        return None;
    }
    system.process(pid).map(|p| p.start_time())
}

/// Held cache lock; released on drop
#[derive(Debug)]
pub struct CacheLock {
    path: PathBuf,
}

impl CacheLock {
    /// Acquire the lock in `dir`, reclaiming an abandoned one.
    pub fn acquire(dir: &Path, step: &str) -> Result<Self> {
        fs::create_dir_all(dir).map_err(|e| UpdaterError::fs(dir, e))?;
        let path = dir.join(LOCK_FILE);

        if let Some((reason, snapshot)) = reclaimable(&path)? {
            info!("Reclaiming cache lock {} ({})", path.display(), reason);
            remove_if_unchanged(&path, &snapshot)?;
        }

        let info = LockInfo::new(step);
        let content = serde_json::to_string_pretty(&info)
            .map_err(|e| UpdaterError::Lock(e.to_string()))?;

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(UpdaterError::Lock(describe_holder(&path)));
            }
            Err(e) => return Err(UpdaterError::fs(&path, e)),
        };

        let written = file
            .write_all(content.as_bytes())
            .and_then(|_| file.sync_all());
        if let Err(e) = written {
            let _ = fs::remove_file(&path);
            return Err(UpdaterError::fs(&path, e));
        }

        debug!("Cache lock acquired: pid={} step={}", info.pid, step);
        Ok(Self { path })
    }

    /// Record the current step in the lock file
    pub fn update_step(&mut self, step: &str) -> io::Result<()> {
        let content = fs::read_to_string(&self.path)?;
        if let Ok(mut info) = serde_json::from_str::<LockInfo>(&content) {
            info.step = step.to_string();
            let new_content = serde_json::to_string_pretty(&info)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            // Readers must never see a half-written file and judge it corrupt
            atomic_write(&self.path, new_content.as_bytes())?;
        }
        Ok(())
    }

    /// True while the lock file still names this process
    pub fn is_held(&self) -> bool {
        read_info(&self.path)
            .ok()
            .flatten()
            .map(|info| info.pid == process::id())
            .unwrap_or(false)
    }
}

impl Drop for CacheLock {
    fn drop(&mut self) {
        if self.is_held() {
            match fs::remove_file(&self.path) {
                Ok(()) => debug!("Cache lock released"),
                Err(e) => warn!("Failed to release cache lock {}: {}", self.path.display(), e),
            }
        }
    }
}

fn read_raw(path: &Path) -> io::Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// `Ok(Some(info))` when present and parseable, `Ok(None)` when absent,
/// `Err` with the reason when unreadable or corrupt
fn read_info(path: &Path) -> std::result::Result<Option<LockInfo>, String> {
    match read_raw(path).map_err(|e| e.to_string())? {
        Some(content) => serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| e.to_string()),
        None => Ok(None),
    }
}

/// Why an existing lock may be taken over, with the contents it was judged
/// on. None if there is no lock; a lock error if a live holder has it.
fn reclaimable(path: &Path) -> Result<Option<(String, String)>> {
    let Some(content) = read_raw(path).map_err(|e| UpdaterError::fs(path, e))? else {
        return Ok(None);
    };

    match serde_json::from_str::<LockInfo>(&content) {
        Ok(holder) if !holder.holder_alive() => Ok(Some((
            format!("holder pid={} is gone", holder.pid),
            content,
        ))),
        Ok(holder) => Err(UpdaterError::Lock(format!(
            "held by pid {} for {}s (step: {})",
            holder.pid,
            holder.age_secs(),
            holder.step
        ))),
        Err(e) => Ok(Some((format!("corrupt: {}", e), content))),
    }
}

/// Remove the lock only if it still holds `snapshot`; another run may have
/// reclaimed it and written its own lock in the meantime
fn remove_if_unchanged(path: &Path, snapshot: &str) -> Result<()> {
    match read_raw(path).map_err(|e| UpdaterError::fs(path, e))? {
        None => Ok(()),
        Some(current) if current != snapshot => Err(UpdaterError::Lock(format!(
            "{} changed while being reclaimed",
            path.display()
        ))),
        Some(_) => match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(UpdaterError::fs(path, e)),
        },
    }
}

fn describe_holder(path: &Path) -> String {
    match read_info(path) {
        Ok(Some(holder)) => format!("held by pid {} (step: {})", holder.pid, holder.step),
        _ => format!("{} was created concurrently", path.display()),
    }
}
