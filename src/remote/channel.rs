use std::future::Future;
use std::time::Duration;

use log::{info, warn};

use super::{ExecIo, RemoteCommand, RemoteExecutor, RemoteTarget};
use crate::error::{Error, Result};

/// Lifecycle of a channel. `Denied` is terminal; after `Authorized` each
/// command moves through `Streaming` to `Completed` or `Failed`, and the next
/// command may start from either.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Idle,
    Authorizing,
    Denied,
    Authorized,
    Streaming,
    Completed,
    Failed,
}

impl ChannelState {
    pub fn is_authorized(self) -> bool {
        matches!(
            self,
            ChannelState::Authorized
                | ChannelState::Streaming
                | ChannelState::Completed
                | ChannelState::Failed
        )
    }
}

/// An executor bound to one target, gated by the exec permission probe.
pub struct RemoteChannel<E> {
    executor: E,
    target: RemoteTarget,
    state: ChannelState,
    denial: Option<String>,
}

impl<E: RemoteExecutor> RemoteChannel<E> {
    pub fn new(executor: E, target: RemoteTarget) -> Self {
        Self {
            executor,
            target,
            state: ChannelState::Idle,
            denial: None,
        }
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn target(&self) -> &RemoteTarget {
        &self.target
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    /// Runs the permission probe once. A denial is remembered and returned
    /// for every later call.
    pub async fn authorize(&mut self) -> Result<()> {
        match self.state {
            ChannelState::Denied => return Err(self.denied()),
            state if state.is_authorized() => return Ok(()),
            _ => {}
        }
        self.target.validate()?;

        let namespace = self.target.namespace.clone();
        let timeout = self.target.request_timeout;
        info!(
            "checking for exec permissions in namespace {} (timeout {:?})",
            namespace, timeout
        );
        self.state = ChannelState::Authorizing;

        let reviewed = with_deadline(
            "authorization probe",
            timeout,
            self.executor.review_access(&namespace, timeout),
        )
        .await;
        let review = match reviewed {
            Ok(review) => review,
            Err(err) => {
                self.state = ChannelState::Idle;
                return Err(err);
            }
        };

        if !review.allowed {
            self.state = ChannelState::Denied;
            self.denial = review.reason;
            let err = self.denied();
            warn!("{}", err);
            return Err(err);
        }

        self.state = ChannelState::Authorized;
        info!("confirmed exec permissions in namespace {}", namespace);
        Ok(())
    }

    /// Runs `command` in the target. Refused unless [`authorize`] succeeded.
    /// A zero `timeout` means no deadline.
    ///
    /// [`authorize`]: RemoteChannel::authorize
    pub async fn exec(&mut self, command: &RemoteCommand, io: ExecIo<'_>, timeout: Duration) -> Result<()> {
        match self.state {
            ChannelState::Denied => return Err(self.denied()),
            state if !state.is_authorized() => {
                return Err(Error::Configuration(format!(
                    "refusing to run {} before exec permissions are confirmed",
                    command.name()
                )))
            }
            _ => {}
        }

        let argv = command.argv();
        info!("sending exec request to {}: {}", self.target, argv.join(" "));
        self.state = ChannelState::Streaming;

        let operation = format!("{} command", command.name());
        let result = with_deadline(
            &operation,
            timeout,
            self.executor.exec(&self.target, &argv, io),
        )
        .await;

        self.state = match result {
            Ok(()) => ChannelState::Completed,
            Err(_) => ChannelState::Failed,
        };
        result
    }

    fn denied(&self) -> Error {
        Error::PermissionDenied {
            reason: self.denial.clone(),
        }
    }
}

async fn with_deadline<T>(
    operation: &str,
    timeout: Duration,
    future: impl Future<Output = Result<T>>,
) -> Result<T> {
    if timeout.is_zero() {
        return future.await;
    }
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => result,
        Err(_) => Err(Error::timeout(operation, timeout)),
    }
}
