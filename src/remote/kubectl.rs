use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::process::Command;

use super::{AccessReview, ExecIo, RemoteExecutor, RemoteTarget};
use crate::error::{Error, Result};

const KUBECTL: &str = "kubectl";

/// Runs commands through the `kubectl` binary, which owns credential and
/// cluster resolution.
#[derive(Debug, Clone)]
pub struct KubectlExecutor {
    program: PathBuf,
    kubeconfig: Option<PathBuf>,
    context: Option<String>,
}

impl Default for KubectlExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl KubectlExecutor {
    pub fn new() -> Self {
        Self {
            program: PathBuf::from(KUBECTL),
            kubeconfig: None,
            context: None,
        }
    }

    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_kubeconfig(mut self, kubeconfig: Option<PathBuf>) -> Self {
        self.kubeconfig = kubeconfig;
        self
    }

    pub fn with_context(mut self, context: Option<String>) -> Self {
        self.context = context;
        self
    }

    fn global_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(kubeconfig) = &self.kubeconfig {
            args.push(format!("--kubeconfig={}", kubeconfig.display()));
        }
        if let Some(context) = &self.context {
            args.push(format!("--context={context}"));
        }
        args
    }

    pub fn access_review_args(&self, namespace: &str, timeout: Duration) -> Vec<String> {
        let mut args = self.global_args();
        args.extend([
            "auth".to_string(),
            "can-i".to_string(),
            "create".to_string(),
            "pods".to_string(),
            "--subresource=exec".to_string(),
            format!("--namespace={namespace}"),
            format!("--request-timeout={}", go_duration(timeout)),
        ]);
        args
    }

    pub fn exec_args(&self, target: &RemoteTarget, argv: &[String], stdin: bool, tty: bool) -> Vec<String> {
        let mut args = self.global_args();
        args.push("exec".to_string());
        args.push(format!("--namespace={}", target.namespace));
        if let Some(container) = &target.container {
            args.push(format!("--container={container}"));
        }
        if stdin {
            args.push("--stdin".to_string());
        }
        if tty {
            args.push("--tty".to_string());
        }
        args.push(target.pod.clone());
        args.push("--".to_string());
        args.extend(argv.iter().cloned());
        args
    }

    fn command(&self, args: &[String]) -> Command {
        let mut command = Command::new(&self.program);
        command.args(args).kill_on_drop(true);
        command
    }
}

#[async_trait]
impl RemoteExecutor for KubectlExecutor {
    async fn review_access(&self, namespace: &str, timeout: Duration) -> Result<AccessReview> {
        let args = self.access_review_args(namespace, timeout);
        debug!("running {} {}", self.program.display(), args.join(" "));
        let output = self
            .command(&args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|err| spawn_error(&self.program, err))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        match parse_can_i(&stdout) {
            Some(review) => Ok(review),
            None => Err(Error::Transport(format!(
                "access review failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ))),
        }
    }

    async fn exec(&self, target: &RemoteTarget, argv: &[String], io: ExecIo<'_>) -> Result<()> {
        let ExecIo {
            stdin,
            stdout,
            stderr,
            tty,
        } = io;
        let args = self.exec_args(target, argv, stdin.is_some(), tty);
        debug!("running {} {}", self.program.display(), args.join(" "));

        let mut child = self
            .command(&args)
            .stdin(piped_if(stdin.is_some()))
            .stdout(piped_if(stdout.is_some()))
            .stderr(piped_if(stderr.is_some()))
            .spawn()
            .map_err(|err| spawn_error(&self.program, err))?;

        let child_stdin = child.stdin.take();
        let child_stdout = child.stdout.take();
        let child_stderr = child.stderr.take();

        let feed = async {
            if let (Some(src), Some(mut dst)) = (stdin, child_stdin) {
                match tokio::io::copy(src, &mut dst).await {
                    Ok(_) => dst.shutdown().await?,
                    // The remote side stopped reading; its exit status tells the rest.
                    Err(err) if err.kind() == io::ErrorKind::BrokenPipe => {}
                    Err(err) => return Err(err),
                }
            }
            Ok::<(), io::Error>(())
        };
        let (fed, out, err, status) = tokio::join!(
            feed,
            drain(child_stdout, stdout),
            drain(child_stderr, stderr),
            child.wait()
        );
        let status = status.map_err(|err| Error::Transport(format!("kubectl exec failed: {err}")))?;
        for copied in [fed, out, err] {
            copied.map_err(|err| Error::Transport(format!("exec stream failed: {err}")))?;
        }

        if !status.success() {
            return Err(Error::RemoteCommand {
                command: argv.join(" "),
                code: status.code(),
            });
        }
        Ok(())
    }
}

async fn drain<R>(source: Option<R>, sink: Option<&mut (dyn AsyncWrite + Send + Unpin)>) -> io::Result<()>
where
    R: AsyncRead + Unpin,
{
    if let (Some(mut source), Some(sink)) = (source, sink) {
        tokio::io::copy(&mut source, &mut *sink).await?;
        sink.flush().await?;
    }
    Ok(())
}

/// `kubectl auth can-i` prints `yes`, or `no` optionally followed by
/// ` - <reason>`.
fn parse_can_i(stdout: &str) -> Option<AccessReview> {
    let line = stdout.lines().next()?.trim();
    if line == "yes" {
        return Some(AccessReview::allowed());
    }
    let rest = line.strip_prefix("no")?;
    if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let reason = rest
        .trim_start()
        .strip_prefix('-')
        .map(|reason| reason.trim().to_string())
        .filter(|reason| !reason.is_empty());
    Some(AccessReview::denied(reason))
}

fn go_duration(duration: Duration) -> String {
    format!("{}ms", duration.as_millis())
}

fn piped_if(attached: bool) -> Stdio {
    if attached {
        Stdio::piped()
    } else {
        Stdio::null()
    }
}

fn spawn_error(program: &std::path::Path, err: io::Error) -> Error {
    Error::Transport(format!("failed to run {}: {err}", program.display()))
}
