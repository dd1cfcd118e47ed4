//! Command execution inside a target container.
//!
//! [`RemoteExecutor`] is the transport capability; [`KubectlExecutor`] is
//! the real one. [`RemoteChannel`] wraps an executor with the authorization
//! gate and the per-command timeout.

mod channel;
mod command;
mod kubectl;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::config::DEFAULT_REQUEST_TIMEOUT;
use crate::error::{Error, Result};

pub use channel::{ChannelState, RemoteChannel};
pub use command::{extractor_path, RemoteCommand, EXTRACTOR_NAME};
pub use kubectl::KubectlExecutor;

/// A container to run commands in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTarget {
    pub namespace: String,
    pub pod: String,
    pub container: Option<String>,
    pub request_timeout: Duration,
}

impl RemoteTarget {
    pub fn new(namespace: impl Into<String>, pod: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            pod: pod.into(),
            container: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_container(mut self, container: impl Into<String>) -> Self {
        self.container = Some(container.into());
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.pod.trim().is_empty() {
            return Err(Error::Configuration("a target pod is required".to_string()));
        }
        if self.namespace.trim().is_empty() {
            return Err(Error::Configuration("a target namespace is required".to_string()));
        }
        Ok(())
    }
}

impl fmt::Display for RemoteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.pod)?;
        if let Some(container) = &self.container {
            write!(f, "/{container}")?;
        }
        Ok(())
    }
}

/// Answer to "may the caller create the exec sub-resource?".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessReview {
    pub allowed: bool,
    pub reason: Option<String>,
}

impl AccessReview {
    pub fn allowed() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    pub fn denied(reason: Option<String>) -> Self {
        Self {
            allowed: false,
            reason,
        }
    }
}

pub type ExecReader<'a> = &'a mut (dyn AsyncRead + Send + Unpin);
pub type ExecWriter<'a> = &'a mut (dyn AsyncWrite + Send + Unpin);

/// Streams attached to one remote command. Absent streams are not opened.
#[derive(Default)]
pub struct ExecIo<'a> {
    pub stdin: Option<ExecReader<'a>>,
    pub stdout: Option<ExecWriter<'a>>,
    pub stderr: Option<ExecWriter<'a>>,
    pub tty: bool,
}

impl<'a> ExecIo<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stdin(mut self, reader: ExecReader<'a>) -> Self {
        self.stdin = Some(reader);
        self
    }

    pub fn stdout(mut self, writer: ExecWriter<'a>) -> Self {
        self.stdout = Some(writer);
        self
    }

    pub fn stderr(mut self, writer: ExecWriter<'a>) -> Self {
        self.stderr = Some(writer);
        self
    }
}

#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Dry-run permission check for exec in `namespace`.
    async fn review_access(&self, namespace: &str, timeout: Duration) -> Result<AccessReview>;

    /// Runs `argv` in `target`, wiring the given streams. A non-zero exit is
    /// a `RemoteCommand` error.
    async fn exec(&self, target: &RemoteTarget, argv: &[String], io: ExecIo<'_>) -> Result<()>;
}
