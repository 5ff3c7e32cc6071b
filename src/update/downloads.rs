use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{Mutex, OnceLock},
};

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use tokio::{
    fs::{File, create_dir_all, metadata, rename},
    io::AsyncWriteExt,
};
use tracing::{debug, info};

use crate::{archive, config::TargetVersion, error::DownloadError};

use super::{Downloader, VersionResolver};

pub const DOWNLOAD_LINKS_URL: &str =
    "https://net-secure.web.minecraft-services.net/api/v1.0/download/links";

/// Files and directories that belong to the operator and survive an update.
const PRESERVED: [&str; 4] = ["server.properties", "allowlist.json", "permissions.json", "worlds"];

#[derive(Debug, Deserialize)]
struct LinksManifest {
    result: LinksResult,
}

#[derive(Debug, Deserialize)]
struct LinksResult {
    links: Vec<DownloadLink>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DownloadLink {
    download_type: String,
    download_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Platform {
    Linux,
    Windows,
}

impl Platform {
    fn host() -> Self {
        if cfg!(windows) {
            Platform::Windows
        } else {
            Platform::Linux
        }
    }

    fn download_type(self, preview: bool) -> &'static str {
        match (self, preview) {
            (Platform::Linux, false) => "serverBedrockLinux",
            (Platform::Linux, true) => "serverBedrockPreviewLinux",
            (Platform::Windows, false) => "serverBedrockWindows",
            (Platform::Windows, true) => "serverBedrockPreviewWindows",
        }
    }

    fn bin_dir(self) -> &'static str {
        match self {
            Platform::Linux => "bin-linux",
            Platform::Windows => "bin-win",
        }
    }
}

/// Resolves and downloads official Bedrock Dedicated Server builds.
pub struct BedrockDownloads {
    client: reqwest::Client,
    links_url: String,
    download_dir: PathBuf,
    platform: Platform,
    /// Version to URL, filled by `resolve` so `download` fetches what was resolved.
    resolved: Mutex<HashMap<String, String>>,
}

impl BedrockDownloads {
    pub fn new(download_dir: impl Into<PathBuf>) -> Self {
        Self::with_links_url(download_dir, DOWNLOAD_LINKS_URL)
    }

    pub fn with_links_url(download_dir: impl Into<PathBuf>, links_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            links_url: links_url.into(),
            download_dir: download_dir.into(),
            platform: Platform::host(),
            resolved: Mutex::new(HashMap::new()),
        }
    }

    async fn load_links(&self) -> Result<Vec<DownloadLink>, DownloadError> {
        let resp = self
            .client
            .get(&self.links_url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| DownloadError::Network(e.to_string()))?;

        let manifest: LinksManifest = resp
            .json()
            .await
            .map_err(|e| DownloadError::Manifest(e.to_string()))?;

        Ok(manifest.result.links)
    }

    fn remember(&self, version: &str, url: &str) {
        self.resolved
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(version.to_string(), url.to_string());
    }

    fn url_for(&self, version: &str) -> String {
        self.resolved
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(version)
            .cloned()
            .unwrap_or_else(|| {
                format!(
                    "https://www.minecraft.net/bedrockdedicatedserver/{}/bedrock-server-{version}.zip",
                    self.platform.bin_dir()
                )
            })
    }
}

#[async_trait]
impl VersionResolver for BedrockDownloads {
    async fn resolve(&self, target: &TargetVersion) -> Result<String, DownloadError> {
        let preview = match target {
            TargetVersion::Exact(version) => return Ok(version.to_string()),
            TargetVersion::LatestStable => false,
            TargetVersion::LatestPreview => true,
        };

        let wanted = self.platform.download_type(preview);
        let links = self.load_links().await?;
        let link = links
            .iter()
            .find(|l| l.download_type == wanted)
            .ok_or_else(|| DownloadError::Manifest(format!("no {wanted} link published")))?;

        let version = version_from_url(&link.download_url).ok_or_else(|| {
            DownloadError::Manifest(format!("no version in {}", link.download_url))
        })?;

        debug!(target = %target, version, "Resolved server version");
        self.remember(&version, &link.download_url);
        Ok(version)
    }
}

#[async_trait]
impl Downloader for BedrockDownloads {
    async fn download(&self, version: &str) -> Result<PathBuf, DownloadError> {
        let dir = self.download_dir.join(version);
        let dest = dir.join(format!("bedrock-server-{version}.zip"));
        let io_err = |path: &Path, e: std::io::Error| DownloadError::Io {
            path: path.to_path_buf(),
            reason: e.to_string(),
        };

        if metadata(&dest).await.map(|m| m.is_file()).unwrap_or(false) {
            debug!(path = %dest.display(), "Using cached server archive");
            return Ok(dest);
        }

        create_dir_all(&dir).await.map_err(|e| io_err(&dir, e))?;

        let url = self.url_for(version);
        info!(url, "Downloading server archive");

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| DownloadError::Network(e.to_string()))?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(DownloadError::Version(version.to_string()));
        }
        let mut body = resp
            .error_for_status()
            .map_err(|e| DownloadError::Network(e.to_string()))?
            .bytes()
            .await
            .map_err(|e| DownloadError::Network(e.to_string()))?;

        // Keep partial downloads out of the cache.
        let partial = dir.join(format!("bedrock-server-{version}.zip.part"));
        let mut out = File::create(&partial)
            .await
            .map_err(|e| io_err(&partial, e))?;
        out.write_all_buf(&mut body)
            .await
            .map_err(|e| io_err(&partial, e))?;
        out.flush().await.map_err(|e| io_err(&partial, e))?;
        drop(out);
        rename(&partial, &dest).await.map_err(|e| io_err(&dest, e))?;

        Ok(dest)
    }

    async fn extract(&self, archive: &Path, dest: &Path) -> Result<(), DownloadError> {
        let src = archive.to_path_buf();
        let out = dest.to_path_buf();

        let written = tokio::task::spawn_blocking(move || {
            archive::unzip(&src, &out, &|rel: &Path| is_preserved(rel))
        })
        .await
        .map_err(|e| DownloadError::Archive {
            path: archive.to_path_buf(),
            reason: e.to_string(),
        })?
        .map_err(|reason| DownloadError::Archive {
            path: archive.to_path_buf(),
            reason,
        })?;

        info!(files = written, dest = %dest.display(), "Server archive extracted");
        Ok(())
    }
}

fn is_preserved(rel: &Path) -> bool {
    rel.components()
        .next()
        .and_then(|c| c.as_os_str().to_str())
        .is_some_and(|first| PRESERVED.contains(&first))
}

fn version_from_url(url: &str) -> Option<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"bedrock-server-(\d+(?:\.\d+){2,3})\.zip").expect("version pattern is valid")
    });
    re.captures(url).map(|c| c[1].to_string())
}
