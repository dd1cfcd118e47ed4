//! Sequencing of the remote operations.
//!
//! Each operation authorizes first, so a denied probe never uploads or runs
//! anything. Once authorized, `extract` and `meta` always issue a cleanup of
//! the extraction program; its failure is logged and never replaces the
//! operation's own result.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::io::AsyncWrite;

use crate::config::{ArtifactSource, DumpConfig, DEFAULT_EXEC_TIMEOUT};
use crate::distribute::ArtifactDistributor;
use crate::error::{Error, Result};
use crate::remote::{extractor_path, ExecIo, RemoteChannel, RemoteCommand, RemoteExecutor, RemoteTarget};
use crate::time::{Clock, SystemClock, TimeRange};

/// Version an installed extractor must report to be reused.
pub const EXTRACTOR_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Everything one operation needs, resolved up front.
#[derive(Clone)]
pub struct OperationContext {
    pub target: RemoteTarget,
    /// Data directory inside the target.
    pub data_dir: String,
    /// Required by `extract` only.
    pub window: Option<TimeRange>,
    pub artifact: ArtifactSource,
    /// Deadline for each remote command; zero disables it.
    pub exec_timeout: Duration,
    pub debug: bool,
    pub clock: Arc<dyn Clock>,
}

impl OperationContext {
    pub fn new(target: RemoteTarget, data_dir: impl Into<String>) -> Self {
        Self {
            target,
            data_dir: data_dir.into(),
            window: None,
            artifact: ArtifactSource::default(),
            exec_timeout: DEFAULT_EXEC_TIMEOUT,
            debug: false,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn from_config(config: &DumpConfig) -> Self {
        Self {
            target: config.remote_target(),
            data_dir: config.data_dir.clone(),
            window: None,
            artifact: config.artifact.clone(),
            exec_timeout: config.exec_timeout,
            debug: config.debug,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_window(mut self, window: TimeRange) -> Self {
        self.window = Some(window);
        self
    }

    pub fn with_artifact(mut self, artifact: ArtifactSource) -> Self {
        self.artifact = artifact;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn extractor(&self) -> String {
        extractor_path(&self.data_dir)
    }

    /// Checks target and data directory. Runs before any I/O.
    pub fn validate(&self) -> Result<()> {
        self.target.validate()?;
        if !self.data_dir.starts_with('/') {
            return Err(Error::Configuration(format!(
                "data directory must be an absolute path: {}",
                self.data_dir
            )));
        }
        if self.data_dir.trim_end_matches('/').is_empty() {
            return Err(Error::Configuration(
                "data directory cannot be the filesystem root".to_string(),
            ));
        }
        Ok(())
    }

    fn validated_window(&self) -> Result<TimeRange> {
        let window = self
            .window
            .ok_or_else(|| Error::Configuration("a time window is required".to_string()))?;
        window.ensure_not_future(self.clock.as_ref())?;
        Ok(window)
    }
}

type Writer<'a> = &'a mut (dyn AsyncWrite + Send + Unpin);

pub struct Orchestrator<E> {
    context: OperationContext,
    channel: RemoteChannel<E>,
    distributor: ArtifactDistributor,
}

impl<E: RemoteExecutor> Orchestrator<E> {
    pub fn new(context: OperationContext, channel: RemoteChannel<E>, distributor: ArtifactDistributor) -> Self {
        Self {
            context,
            channel,
            distributor,
        }
    }

    pub fn context(&self) -> &OperationContext {
        &self.context
    }

    pub fn channel(&self) -> &RemoteChannel<E> {
        &self.channel
    }

    /// Streams the archive of the context's window to `stdout`.
    pub async fn extract(&mut self, stdout: Writer<'_>, stderr: Writer<'_>) -> Result<()> {
        self.context.validate()?;
        let window = self.context.validated_window()?;
        self.channel.authorize().await?;

        info!("dumping blocks in {} from {}", window, self.channel.target());
        let command = RemoteCommand::Extract {
            extractor: self.context.extractor(),
            data_dir: self.context.data_dir.clone(),
            window,
            debug: self.context.debug,
        };
        let result = self.run_extractor(&command, stdout, stderr).await;
        self.cleanup().await;
        result
    }

    /// Writes the target's catalog report to `stdout`.
    pub async fn meta(&mut self, stdout: Writer<'_>, stderr: Writer<'_>) -> Result<()> {
        self.context.validate()?;
        self.channel.authorize().await?;

        let command = RemoteCommand::Meta {
            extractor: self.context.extractor(),
            data_dir: self.context.data_dir.clone(),
            debug: self.context.debug,
        };
        let result = self.run_extractor(&command, stdout, stderr).await;
        self.cleanup().await;
        result
    }

    /// Replaces the target's data directory with the contents of a dump.
    pub async fn restore(&mut self, dump_path: &Path, stderr: Writer<'_>) -> Result<()> {
        self.context.validate()?;
        let mut dump = tokio::fs::File::open(dump_path).await.map_err(|err| {
            Error::Configuration(format!("can't open dump file {}: {err}", dump_path.display()))
        })?;
        self.channel.authorize().await?;

        let data_dir = self.context.data_dir.clone();
        let timeout = self.context.exec_timeout;
        info!("restoring {} into {}:{}", dump_path.display(), self.channel.target(), data_dir);

        let mut discard = tokio::io::sink();
        self.channel
            .exec(
                &RemoteCommand::ClearData {
                    data_dir: data_dir.clone(),
                },
                ExecIo::new().stdout(&mut discard).stderr(&mut *stderr),
                timeout,
            )
            .await?;
        self.channel
            .exec(
                &RemoteCommand::Upload { data_dir },
                ExecIo::new().stdin(&mut dump).stdout(&mut discard).stderr(stderr),
                timeout,
            )
            .await
    }

    async fn run_extractor(&mut self, command: &RemoteCommand, stdout: Writer<'_>, stderr: Writer<'_>) -> Result<()> {
        self.install_extractor(&mut *stderr).await?;
        let timeout = self.context.exec_timeout;
        self.channel
            .exec(command, ExecIo::new().stdout(stdout).stderr(stderr), timeout)
            .await
    }

    /// Uploads the extraction program unless a compatible one is installed.
    async fn install_extractor(&mut self, stderr: Writer<'_>) -> Result<()> {
        if self.has_compatible_extractor().await {
            info!("compatible extractor already present in {}", self.channel.target());
            return Ok(());
        }

        let artifact = &self.context.artifact;
        if artifact.remote_uri.trim().is_empty() {
            return Err(Error::Configuration(
                "an artifact URI is required to install the extractor".to_string(),
            ));
        }
        let mut fetched = self
            .distributor
            .fetch(artifact.force, &artifact.remote_uri, &artifact.checksum_uri)
            .await?;
        debug!(
            "uploading {} (downloaded: {})",
            fetched.artifact.local_path.display(),
            fetched.downloaded
        );

        let mut discard = tokio::io::sink();
        let command = RemoteCommand::Upload {
            data_dir: self.context.data_dir.clone(),
        };
        let timeout = self.context.exec_timeout;
        self.channel
            .exec(
                &command,
                ExecIo::new().stdin(&mut fetched.file).stdout(&mut discard).stderr(stderr),
                timeout,
            )
            .await
    }

    async fn has_compatible_extractor(&mut self) -> bool {
        let command = RemoteCommand::Probe {
            extractor: self.context.extractor(),
        };
        let mut version = Vec::new();
        let mut discard = tokio::io::sink();
        let probed = self
            .channel
            .exec(
                &command,
                ExecIo::new().stdout(&mut version).stderr(&mut discard),
                self.context.target.request_timeout,
            )
            .await;

        match probed {
            Ok(()) => {
                let reported = String::from_utf8_lossy(&version);
                let compatible = reported.contains(EXTRACTOR_VERSION);
                debug!("installed extractor reports {:?} (compatible: {})", reported.trim(), compatible);
                compatible
            }
            Err(err) => {
                debug!("no usable extractor installed: {}", err);
                false
            }
        }
    }

    async fn cleanup(&mut self) {
        let command = RemoteCommand::Cleanup {
            extractor: self.context.extractor(),
        };
        let mut discard_out = tokio::io::sink();
        let mut discard_err = tokio::io::sink();
        let timeout = self.context.target.request_timeout;
        if let Err(err) = self
            .channel
            .exec(
                &command,
                ExecIo::new().stdout(&mut discard_out).stderr(&mut discard_err),
                timeout,
            )
            .await
        {
            warn!("failed to remove extractor {}: {}", self.context.extractor(), err);
        }
    }
}
