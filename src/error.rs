use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Rejected before any I/O: bad window, missing target fields, misuse of
    /// the remote channel.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("invalid data directory {}: {reason}", path.display())]
    InvalidDataDir { path: PathBuf, reason: String },

    #[error("no permissions to create exec subresource{}", reason_suffix(reason))]
    PermissionDenied { reason: Option<String> },

    #[error("checksum mismatch: expected {expected}, actual {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("download of {uri} failed with status {status}")]
    Download { uri: String, status: u16 },

    #[cfg(feature = "remote")]
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("remote command `{command}` exited with {}", exit_code(*code))]
    RemoteCommand { command: String, code: Option<i32> },

    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    /// The tar or gzip writer itself broke; the archive stream is unusable.
    #[error("archive stream failed: {0}")]
    Archive(#[source] std::io::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        Error::Timeout {
            operation: operation.into(),
            after,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }

    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Error::PermissionDenied { .. })
    }

    pub fn is_checksum_mismatch(&self) -> bool {
        matches!(self, Error::ChecksumMismatch { .. })
    }
}

fn reason_suffix(reason: &Option<String>) -> String {
    match reason {
        Some(reason) if !reason.is_empty() => format!(". reason: {reason}"),
        _ => String::new(),
    }
}

fn exit_code(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "no exit code".to_string(),
    }
}

pub type Result<T> = std::result::Result<T, Error>;
