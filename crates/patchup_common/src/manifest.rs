//! Version oracle - fetches the remote two-line manifest.
//!
//! Manifest format (text/plain, UTF-8):
//!
//! ```text
//! <version>
//! <download-url>
//! ...anything else is ignored
//! ```
//!
//! Every failure here degrades to "no update information available"; callers
//! get `None` from [`VersionOracle::fetch`] and fall back to cached state.

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::NetworkConfig;
use crate::error::{Result, UpdaterError};
use crate::version::is_valid_token;

/// Latest published version and where to download it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteManifest {
    pub version: String,
    pub download_url: String,
}

/// Parse a manifest body.
pub fn parse_manifest(body: &str) -> Result<RemoteManifest> {
    let mut lines = body.trim().lines().map(str::trim);

    let version = lines.next().unwrap_or_default();
    let download_url = lines.next().unwrap_or_default();

    if version.is_empty() || download_url.is_empty() {
        return Err(UpdaterError::Format(format!(
            "expected at least two non-empty lines, got {:?}",
            body
        )));
    }

    if !is_valid_token(version) {
        return Err(UpdaterError::Format(format!(
            "version token {:?} is not usable as a file name",
            version
        )));
    }

    Ok(RemoteManifest {
        version: version.to_string(),
        download_url: download_url.to_string(),
    })
}

pub struct VersionOracle {
    client: Client,
    url: String,
}

impl VersionOracle {
    pub fn new(url: impl Into<String>, user_agent: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn from_config(network: &NetworkConfig) -> Result<Self> {
        Self::new(
            network.manifest_url.clone(),
            &network.user_agent,
            network.manifest_timeout(),
        )
    }

    /// Fetch the manifest, surfacing why it failed.
    pub async fn try_fetch(&self) -> Result<RemoteManifest> {
        debug!("Requesting manifest from {}", self.url);

        let response = self.client.get(&self.url).send().await?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(UpdaterError::Network(format!(
                "manifest endpoint returned {}",
                status
            )));
        }

        let body = response.text().await?;
        debug!("Manifest body: {:?}", body);
        parse_manifest(&body)
    }

    /// Fetch the manifest; any failure yields `None`.
    pub async fn fetch(&self) -> Option<RemoteManifest> {
        match self.try_fetch().await {
            Ok(manifest) => {
                info!(
                    "Remote manifest: version={} url={}",
                    manifest.version, manifest.download_url
                );
                Some(manifest)
            }
            Err(e) => {
                warn!("No update information available ({}): {}", e.kind(), e);
                None
            }
        }
    }
}

/// One-shot manifest query using the default client identifier
pub async fn fetch_manifest(url: &str, timeout: Duration) -> Option<RemoteManifest> {
    let user_agent = NetworkConfig::default().user_agent;
    match VersionOracle::new(url, &user_agent, timeout) {
        Ok(oracle) => oracle.fetch().await,
        Err(e) => {
            warn!("Cannot build manifest client: {}", e);
            None
        }
    }
}
