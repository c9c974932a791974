//! Artifact fetcher - streams a new installer into the cache.
//!
//! The body goes to `<final name>.<uuid>.part` in the cache directory and is
//! renamed onto the final name only after the whole body has been written and
//! synced. An interrupted transfer never leaves a file at the trusted name.
//!
//! No checksum or signature is verified before the artifact is trusted.

use reqwest::Client;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::{self, File};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::artifact::{ArtifactCache, CachedArtifact, PARTIAL_SUFFIX};
use crate::config::UpdaterConfig;
use crate::error::{Result, UpdaterError};
use crate::version::is_valid_token;

pub struct ArtifactFetcher {
    client: Client,
    cache: ArtifactCache,
    chunk_size: usize,
}

impl ArtifactFetcher {
    pub fn new(
        cache: ArtifactCache,
        user_agent: &str,
        connect_timeout: Duration,
        chunk_size: usize,
    ) -> Result<Self> {
        // Only the connect phase is bounded; large artifacts may take a while
        let client = Client::builder()
            .user_agent(user_agent)
            .connect_timeout(connect_timeout)
            .build()?;

        Ok(Self {
            client,
            cache,
            chunk_size: chunk_size.max(1),
        })
    }

    pub fn from_config(config: &UpdaterConfig) -> Result<Self> {
        Self::new(
            config.paths.artifact_cache(),
            &config.network.user_agent,
            config.network.connect_timeout(),
            config.network.chunk_size,
        )
    }

    pub fn cache(&self) -> &ArtifactCache {
        &self.cache
    }

    /// Download `url` as the artifact for `version`.
    pub async fn download(&self, url: &str, version: &str) -> Result<CachedArtifact> {
        if !is_valid_token(version) {
            return Err(UpdaterError::Format(format!(
                "version token {:?} is not usable as a file name",
                version
            )));
        }

        self.cache.ensure_dir()?;
        let final_path = self.cache.path_for(version);
        let temp_path = self.cache.dir().join(format!(
            "{}.{}{}",
            self.cache.file_name(version),
            Uuid::new_v4().simple(),
            PARTIAL_SUFFIX
        ));

        info!("Downloading installer {} from {}", version, url);

        let written = match self.stream_to(url, &temp_path).await {
            Ok(written) => written,
            Err(e) => {
                discard(&temp_path).await;
                return Err(e);
            }
        };

        if let Err(e) = finalize(&temp_path, &final_path).await {
            discard(&temp_path).await;
            return Err(e);
        }

        info!(
            "Installer {} downloaded ({} bytes) to {}",
            version,
            written,
            final_path.display()
        );

        Ok(CachedArtifact {
            version: version.to_string(),
            path: final_path,
        })
    }

    async fn stream_to(&self, url: &str, temp_path: &Path) -> Result<u64> {
        let mut response = self.client.get(url).send().await?;

        let status = response.status();
        debug!("Download status: {}", status);
        if !status.is_success() {
            return Err(UpdaterError::Network(format!(
                "download of {} returned {}",
                url, status
            )));
        }
        let expected = response.content_length();

        let file = File::create(temp_path)
            .await
            .map_err(|e| UpdaterError::fs(temp_path, e))?;
        let mut writer = BufWriter::with_capacity(self.chunk_size, file);

        let mut written: u64 = 0;
        while let Some(chunk) = response.chunk().await? {
            writer
                .write_all(&chunk)
                .await
                .map_err(|e| UpdaterError::fs(temp_path, e))?;
            written += chunk.len() as u64;
        }

        writer
            .flush()
            .await
            .map_err(|e| UpdaterError::fs(temp_path, e))?;
        writer
            .into_inner()
            .sync_all()
            .await
            .map_err(|e| UpdaterError::fs(temp_path, e))?;

        if let Some(expected) = expected {
            if expected != written {
                return Err(UpdaterError::Network(format!(
                    "truncated download: expected {} bytes, got {}",
                    expected, written
                )));
            }
        }

        Ok(written)
    }
}

async fn finalize(temp_path: &Path, final_path: &PathBuf) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(temp_path, std::fs::Permissions::from_mode(0o755))
            .await
            .map_err(|e| UpdaterError::fs(temp_path, e))?;
    }

    fs::rename(temp_path, final_path)
        .await
        .map_err(|e| UpdaterError::fs(final_path, e))
}

async fn discard(temp_path: &Path) {
    match fs::remove_file(temp_path).await {
        Ok(()) => debug!("Removed partial download {}", temp_path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove partial download {}: {}", temp_path.display(), e),
    }
}
