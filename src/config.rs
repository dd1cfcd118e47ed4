//! Operator-side configuration.
//!
//! Every field has a default so a JSON file only needs to name what it
//! changes. Command-line flags are applied on top of the loaded file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const DEFAULT_NAMESPACE: &str = "default";
pub const DEFAULT_CONTAINER: &str = "prometheus-server";
pub const DEFAULT_DATA_DIR: &str = "/data";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_EXEC_TIMEOUT: Duration = Duration::from_secs(30 * 60);
pub const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// Which container to operate on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TargetConfig {
    /// Default: "default"
    pub namespace: String,

    /// Required.
    pub pod: String,

    /// Default: "prometheus-server"
    pub container: Option<String>,

    /// Passed through to kubectl; kubectl's own resolution applies when unset.
    pub kubeconfig: Option<PathBuf>,

    pub context: Option<String>,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            pod: String::new(),
            container: Some(DEFAULT_CONTAINER.to_string()),
            kubeconfig: None,
            context: None,
        }
    }
}

/// Where the extraction program is published.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ArtifactSource {
    /// URI of the gzipped tar holding the extraction program.
    pub remote_uri: String,

    /// URI of its published SHA-256 digest.
    pub checksum_uri: String,

    /// Download again even when a cached copy exists.
    /// Default: false
    pub force: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DumpConfig {
    pub target: TargetConfig,

    /// Data directory inside the target container.
    /// Default: /data
    pub data_dir: String,

    /// Bound on the authorization probe and kubectl's API requests.
    /// Default: 10 s
    #[serde(with = "duration_secs")]
    pub request_timeout: Duration,

    /// Bound on each remote command, including the archive stream.
    /// Default: 30 min
    #[serde(with = "duration_secs")]
    pub exec_timeout: Duration,

    /// Bound on each artifact or checksum download.
    /// Default: 30 s
    #[serde(with = "duration_secs")]
    pub download_timeout: Duration,

    pub artifact: ArtifactSource,

    /// Local artifact cache.
    /// Default: <tmp>/blockdump
    pub cache_dir: PathBuf,

    pub debug: bool,
}

impl Default for DumpConfig {
    fn default() -> Self {
        Self {
            target: TargetConfig::default(),
            data_dir: DEFAULT_DATA_DIR.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            exec_timeout: DEFAULT_EXEC_TIMEOUT,
            download_timeout: DEFAULT_DOWNLOAD_TIMEOUT,
            artifact: ArtifactSource::default(),
            cache_dir: std::env::temp_dir().join("blockdump"),
            debug: false,
        }
    }
}

impl DumpConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw).map_err(|err| {
            Error::Configuration(format!("invalid config file {}: {err}", path.display()))
        })
    }

    /// Checks the fields every remote operation needs.
    pub fn validate(&self) -> Result<()> {
        if self.target.pod.trim().is_empty() {
            return Err(Error::Configuration("a target pod is required".to_string()));
        }
        if self.target.namespace.trim().is_empty() {
            return Err(Error::Configuration("a target namespace is required".to_string()));
        }
        if !self.data_dir.starts_with('/') {
            return Err(Error::Configuration(format!(
                "data directory must be an absolute path: {}",
                self.data_dir
            )));
        }
        Ok(())
    }
}

#[cfg(feature = "remote")]
impl DumpConfig {
    pub fn remote_target(&self) -> crate::remote::RemoteTarget {
        let mut target = crate::remote::RemoteTarget::new(&self.target.namespace, &self.target.pod)
            .with_request_timeout(self.request_timeout);
        if let Some(container) = self.target.container.as_deref().filter(|c| !c.is_empty()) {
            target = target.with_container(container);
        }
        target
    }

    pub fn distributor_config(&self) -> crate::distribute::DistributorConfig {
        crate::distribute::DistributorConfig {
            cache_dir: self.cache_dir.clone(),
            timeout: self.download_timeout,
        }
    }
}

/// `Duration` as whole seconds.
pub mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
