use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use blockdump::{
    ArtifactDistributor, Clock, DumpConfig, KubectlExecutor, OperationContext, Orchestrator, RemoteChannel,
    SystemClock, TimeRange, Timestamp,
};
use clap::{Args, Parser, Subcommand};
use tokio::io::AsyncWriteExt;

const DEFAULT_WINDOW_SECS: i64 = 60 * 60;

#[derive(Parser)]
#[command(name = "kubectl-blockdump", version)]
#[command(about = "Dump, inspect and restore the TSDB blocks of a Prometheus pod")]
struct Cli {
    #[command(flatten)]
    options: GlobalArgs,

    /// Defaults to `dump`
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Args)]
struct GlobalArgs {
    /// Prometheus pod name
    #[arg(short = 'p', long, global = true)]
    pod: Option<String>,

    /// Namespace of the pod (default: default)
    #[arg(short = 'n', long, global = true)]
    namespace: Option<String>,

    /// Container running Prometheus (default: prometheus-server)
    #[arg(short = 'c', long, global = true)]
    container: Option<String>,

    /// Prometheus data directory inside the container (default: /data)
    #[arg(short = 'd', long, global = true)]
    data_dir: Option<String>,

    /// Path to the kubeconfig file
    #[arg(long, global = true)]
    kubeconfig: Option<PathBuf>,

    /// Kubeconfig context to use
    #[arg(long, global = true)]
    context: Option<String>,

    /// Seconds to wait on API requests and the permission check (default: 10)
    #[arg(long, global = true)]
    request_timeout: Option<u64>,

    /// Seconds each remote command may run (0 disables the limit)
    #[arg(long, global = true)]
    exec_timeout: Option<u64>,

    /// URI of the extraction program's tar.gz
    #[arg(long, global = true)]
    artifact_uri: Option<String>,

    /// URI of the artifact's SHA-256 digest
    #[arg(long, global = true)]
    checksum_uri: Option<String>,

    /// Download the artifact even when it is cached
    #[arg(long, global = true)]
    force_download: bool,

    /// Local artifact cache directory
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// JSON config file; flags take precedence over its values
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logs, and run the remote extractor in debug mode
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream the blocks overlapping a time window to stdout
    Dump(WindowArgs),
    /// Print the metadata of the head and persistent blocks
    Meta,
    /// Replace the pod's data directory with a previous dump
    Restore {
        /// Path to the dump file
        #[arg(short = 't', long)]
        dump_file: PathBuf,
    },
}

#[derive(Args, Default)]
struct WindowArgs {
    /// Min time (UTC) of the samples, "yyyy-mm-dd hh:mm:ss" (default: an hour ago)
    #[arg(long)]
    min_time: Option<String>,

    /// Max time (UTC) of the samples, "yyyy-mm-dd hh:mm:ss" (default: now)
    #[arg(long)]
    max_time: Option<String>,
}

impl GlobalArgs {
    fn into_config(self) -> Result<DumpConfig> {
        let mut config = match &self.config {
            Some(path) => DumpConfig::load(path)
                .with_context(|| format!("failed to load config {}", path.display()))?,
            None => DumpConfig::default(),
        };
        if let Some(pod) = self.pod {
            config.target.pod = pod;
        }
        if let Some(namespace) = self.namespace {
            config.target.namespace = namespace;
        }
        if let Some(container) = self.container {
            config.target.container = Some(container);
        }
        if self.kubeconfig.is_some() {
            config.target.kubeconfig = self.kubeconfig;
        }
        if self.context.is_some() {
            config.target.context = self.context;
        }
        if let Some(data_dir) = self.data_dir {
            config.data_dir = data_dir;
        }
        if let Some(secs) = self.request_timeout {
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.exec_timeout {
            config.exec_timeout = Duration::from_secs(secs);
        }
        if let Some(uri) = self.artifact_uri {
            config.artifact.remote_uri = uri;
        }
        if let Some(uri) = self.checksum_uri {
            config.artifact.checksum_uri = uri;
        }
        if let Some(cache_dir) = self.cache_dir {
            config.cache_dir = cache_dir;
        }
        config.artifact.force |= self.force_download;
        config.debug |= self.debug;
        Ok(config)
    }
}

impl WindowArgs {
    fn resolve(&self, clock: &dyn Clock) -> Result<TimeRange> {
        let start = self
            .min_time
            .as_deref()
            .map(Timestamp::parse)
            .transpose()
            .context("invalid --min-time")?;
        let end = self
            .max_time
            .as_deref()
            .map(Timestamp::parse)
            .transpose()
            .context("invalid --max-time")?;
        TimeRange::resolve(clock, start, end, DEFAULT_WINDOW_SECS).context("validation failed")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.options.into_config()?;

    let level = if config.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    config.validate().context("validation failed")?;

    let executor = KubectlExecutor::new()
        .with_kubeconfig(config.target.kubeconfig.clone())
        .with_context(config.target.context.clone());
    let channel = RemoteChannel::new(executor, config.remote_target());
    let distributor = ArtifactDistributor::new(config.distributor_config())
        .context("failed to build the download client")?;
    let context = OperationContext::from_config(&config);

    let mut stdout = tokio::io::stdout();
    let mut stderr = tokio::io::stderr();

    match cli.command.unwrap_or(Commands::Dump(WindowArgs::default())) {
        Commands::Dump(window) => {
            let window = window.resolve(&SystemClock)?;
            let mut orchestrator = Orchestrator::new(context.with_window(window), channel, distributor);
            orchestrator
                .extract(&mut stdout, &mut stderr)
                .await
                .context("dump failed")?;
        }
        Commands::Meta => {
            let mut orchestrator = Orchestrator::new(context, channel, distributor);
            orchestrator
                .meta(&mut stdout, &mut stderr)
                .await
                .context("meta failed")?;
        }
        Commands::Restore { dump_file } => {
            let mut orchestrator = Orchestrator::new(context, channel, distributor);
            orchestrator
                .restore(&dump_file, &mut stderr)
                .await
                .context("restore failed")?;
        }
    }

    stdout.flush().await?;
    Ok(())
}
