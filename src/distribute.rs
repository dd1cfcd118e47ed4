//! Local cache of the extraction program, fetched over HTTP and verified
//! against a published SHA-256 checksum.

use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::config::DEFAULT_DOWNLOAD_TIMEOUT;
use crate::error::{Error, Result};

const PART_SUFFIX: &str = "part";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DistributorConfig {
    pub cache_dir: PathBuf,
    #[serde(with = "crate::config::duration_secs")]
    pub timeout: Duration,
}

impl DistributorConfig {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            ..Self::default()
        }
    }
}

impl Default for DistributorConfig {
    fn default() -> Self {
        Self {
            cache_dir: std::env::temp_dir().join("blockdump"),
            timeout: DEFAULT_DOWNLOAD_TIMEOUT,
        }
    }
}

/// Where an artifact came from and where its cached copy lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedArtifact {
    pub remote_uri: String,
    pub local_path: PathBuf,
    pub checksum_uri: String,
}

#[derive(Debug)]
pub struct FetchedArtifact {
    pub artifact: CachedArtifact,
    /// Opened at offset zero.
    pub file: File,
    /// False when the cached copy was reused without a network call.
    pub downloaded: bool,
}

pub struct ArtifactDistributor {
    config: DistributorConfig,
    client: reqwest::Client,
}

impl ArtifactDistributor {
    pub fn new(config: DistributorConfig) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &DistributorConfig {
        &self.config
    }

    pub fn cache_path(&self, remote_uri: &str) -> Result<PathBuf> {
        Ok(self.config.cache_dir.join(artifact_name(remote_uri)?))
    }

    /// Returns the cached artifact for `remote_uri`. An existing copy is
    /// reused as-is unless `force` is set; a fresh download is verified
    /// against the document at `checksum_uri` before it is returned.
    pub async fn fetch(
        &self,
        force: bool,
        remote_uri: &str,
        checksum_uri: &str,
    ) -> Result<FetchedArtifact> {
        if checksum_uri.trim().is_empty() {
            return Err(Error::Configuration(
                "a checksum URI is required to verify downloaded artifacts".to_string(),
            ));
        }
        let local_path = self.cache_path(remote_uri)?;
        let artifact = CachedArtifact {
            remote_uri: remote_uri.to_string(),
            local_path: local_path.clone(),
            checksum_uri: checksum_uri.to_string(),
        };

        if !force {
            match File::open(&local_path).await {
                Ok(file) => {
                    info!("using cached artifact {}", local_path.display());
                    return Ok(FetchedArtifact {
                        artifact,
                        file,
                        downloaded: false,
                    });
                }
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }

        fs::create_dir_all(&self.config.cache_dir).await?;
        self.download(remote_uri, &local_path).await?;

        let expected = self.fetch_checksum(checksum_uri).await?;
        if let Err(err) = verify_checksum(&local_path, &expected).await {
            if err.is_checksum_mismatch() {
                warn!("removing {} after checksum mismatch", local_path.display());
                if let Err(remove_err) = fs::remove_file(&local_path).await {
                    warn!("failed to remove {}: {}", local_path.display(), remove_err);
                }
            }
            return Err(err);
        }

        let file = File::open(&local_path).await?;
        Ok(FetchedArtifact {
            artifact,
            file,
            downloaded: true,
        })
    }

    async fn download(&self, remote_uri: &str, dest: &Path) -> Result<u64> {
        info!(
            "downloading {} to {} (timeout {:?})",
            remote_uri,
            dest.display(),
            self.config.timeout
        );
        let mut response = self
            .client
            .get(remote_uri)
            .send()
            .await
            .map_err(|err| self.http_error("download", err))?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Download {
                uri: remote_uri.to_string(),
                status: status.as_u16(),
            });
        }

        let part = part_path(dest);
        let mut out = File::create(&part).await?;
        let mut written = 0u64;
        loop {
            let chunk = match response.chunk().await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                Err(err) => {
                    drop(out);
                    let _ = fs::remove_file(&part).await;
                    return Err(self.http_error("download", err));
                }
            };
            out.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        out.flush().await?;
        out.sync_all().await?;
        drop(out);
        fs::rename(&part, dest).await?;

        info!("download completed: {} bytes", written);
        Ok(written)
    }

    async fn fetch_checksum(&self, checksum_uri: &str) -> Result<String> {
        debug!("fetching checksum from {}", checksum_uri);
        let response = self
            .client
            .get(checksum_uri)
            .send()
            .await
            .map_err(|err| self.http_error("checksum fetch", err))?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Download {
                uri: checksum_uri.to_string(),
                status: status.as_u16(),
            });
        }
        let body = response
            .text()
            .await
            .map_err(|err| self.http_error("checksum fetch", err))?;
        parse_checksum_document(&body)
    }

    fn http_error(&self, operation: &str, err: reqwest::Error) -> Error {
        if err.is_timeout() {
            Error::timeout(operation, self.config.timeout)
        } else {
            Error::Http(err)
        }
    }
}

/// Last path segment of `remote_uri`.
pub fn artifact_name(remote_uri: &str) -> Result<String> {
    let url = url::Url::parse(remote_uri)
        .map_err(|err| Error::Configuration(format!("invalid artifact URI {remote_uri}: {err}")))?;
    url.path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .map(str::to_string)
        .ok_or_else(|| Error::Configuration(format!("artifact URI {remote_uri} has no file name")))
}

/// First whitespace-separated token, lowercased. Accepts a bare digest or
/// `sha256sum` output.
pub fn parse_checksum_document(body: &str) -> Result<String> {
    let digest = body
        .split_whitespace()
        .next()
        .ok_or_else(|| Error::Configuration("checksum document is empty".to_string()))?
        .to_ascii_lowercase();
    if digest.len() != 64 || !digest.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(Error::Configuration(format!(
            "checksum document does not hold a sha256 digest: {digest}"
        )));
    }
    Ok(digest)
}

pub async fn sha256_file(path: &Path) -> Result<String> {
    let mut file = File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

pub async fn verify_checksum(path: &Path, expected: &str) -> Result<()> {
    let expected = expected.trim().to_ascii_lowercase();
    let actual = sha256_file(path).await?;
    if actual != expected {
        warn!(
            "checksum mismatch for {}: expected {}, actual {}",
            path.display(),
            expected,
            actual
        );
        return Err(Error::ChecksumMismatch { expected, actual });
    }
    info!("checksum verified for {}", path.display());
    Ok(())
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(PART_SUFFIX);
    dest.with_file_name(name)
}
