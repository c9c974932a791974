//! Cached installer artifacts and their on-disk naming.
//!
//! An artifact for version `v` lives at `<cache dir>/<prefix><v><exe suffix>`,
//! e.g. `installer_2.exe` on Windows. In-flight downloads use
//! `<final name>.<uuid>.part` next to it.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{Result, UpdaterError};

/// Suffix of in-flight downloads
pub const PARTIAL_SUFFIX: &str = ".part";

/// A downloaded installer kept on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedArtifact {
    pub version: String,
    pub path: PathBuf,
}

/// What a file in the cache directory turned out to be
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEntry {
    Artifact(CachedArtifact),
    Partial(PathBuf),
}

#[derive(Debug, Clone)]
pub struct ArtifactCache {
    dir: PathBuf,
    prefix: String,
    extension: String,
    /// Bookkeeping files sharing the prefix (state file, lock...)
    excluded: Vec<String>,
}

impl ArtifactCache {
    /// Cache using the platform executable suffix
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self::with_extension(dir, prefix, std::env::consts::EXE_SUFFIX)
    }

    pub fn with_extension(
        dir: impl Into<PathBuf>,
        prefix: impl Into<String>,
        extension: impl Into<String>,
    ) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
            extension: extension.into(),
            excluded: Vec::new(),
        }
    }

    /// Never treat these file names as artifacts
    pub fn excluding<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excluded.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|e| UpdaterError::fs(&self.dir, e))
    }

    pub fn file_name(&self, version: &str) -> String {
        format!("{}{}{}", self.prefix, version, self.extension)
    }

    pub fn path_for(&self, version: &str) -> PathBuf {
        self.dir.join(self.file_name(version))
    }

    /// The cached artifact for `version`, if the file is present
    pub fn lookup(&self, version: &str) -> Option<CachedArtifact> {
        let path = self.path_for(version);
        if path.is_file() {
            Some(CachedArtifact {
                version: version.to_string(),
                path,
            })
        } else {
            None
        }
    }

    /// Classify a file name found in the cache directory
    pub fn classify(&self, file_name: &str) -> Option<CacheEntry> {
        if self.excluded.iter().any(|n| n == file_name) {
            return None;
        }
        let rest = file_name.strip_prefix(&self.prefix)?;

        if rest.ends_with(PARTIAL_SUFFIX) {
            return Some(CacheEntry::Partial(self.dir.join(file_name)));
        }

        let version = rest.strip_suffix(self.extension.as_str())?;
        if version.is_empty() {
            return None;
        }

        Some(CacheEntry::Artifact(CachedArtifact {
            version: version.to_string(),
            path: self.dir.join(file_name),
        }))
    }

    /// Every file in the cache directory matching the artifact pattern
    pub fn entries(&self) -> Result<Vec<CacheEntry>> {
        let read_dir = match fs::read_dir(&self.dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(UpdaterError::fs(&self.dir, e)),
        };

        let mut entries = Vec::new();
        for entry in read_dir {
            let entry = entry.map_err(|e| UpdaterError::fs(&self.dir, e))?;
            if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                debug!("Skipping non UTF-8 cache entry {:?}", entry.path());
                continue;
            };
            if let Some(classified) = self.classify(name) {
                entries.push(classified);
            }
        }
        entries.sort_by(|a, b| entry_path(a).cmp(entry_path(b)));
        Ok(entries)
    }

    pub fn artifacts(&self) -> Result<Vec<CachedArtifact>> {
        Ok(self
            .entries()?
            .into_iter()
            .filter_map(|e| match e {
                CacheEntry::Artifact(a) => Some(a),
                CacheEntry::Partial(_) => None,
            })
            .collect())
    }
}

fn entry_path(entry: &CacheEntry) -> &Path {
    match entry {
        CacheEntry::Artifact(a) => &a.path,
        CacheEntry::Partial(p) => p,
    }
}
