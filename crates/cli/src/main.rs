//! CLI binary supervising a search engine node.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::redundant_pub_crate)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use datanode_cluster::{OpensearchClusterClient, OpensearchClusterClientOptions};
use datanode_process::CommandLineOptions;
use datanode_supervisor::{
    ClusterRemovalOptions, ClusterRemovalTracer, HealthChecker, ManagedProcess, OpensearchProcess,
    OpensearchProcessOptions, ProcessEvent, ProcessState, ProcessWatchdog, TransitionLogger,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use url::Url;

/// CLI-specific error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Cluster client error
    #[error(transparent)]
    Cluster(#[from] datanode_cluster::Error),

    /// The process stopped and the watchdog did not bring it back.
    #[error("process terminated after {0} restarts")]
    ProcessTerminated(u32),

    /// Supervisor error
    #[error(transparent)]
    Supervisor(#[from] datanode_supervisor::Error),
}

#[derive(Clone, Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// Seconds between cluster health checks
    #[arg(long, default_value_t = 10, env = "DATANODE_HEALTH_CHECK_INTERVAL_SECS")]
    health_check_interval_secs: u64,

    /// Consecutive failed health checks before the node is considered failed
    #[arg(
        long,
        default_value_t = 10,
        env = "DATANODE_HEALTH_CHECK_FAILURE_THRESHOLD"
    )]
    health_check_failure_threshold: u32,

    /// Output lines retained per stream
    #[arg(long, default_value_t = 500, env = "DATANODE_LOGS_CAPACITY")]
    logs_capacity: usize,

    /// Automatic restarts after unexpected terminations
    #[arg(long, default_value_t = 3, env = "DATANODE_MAX_RESTARTS")]
    max_restarts: u32,

    /// Name of this node in the cluster
    #[arg(long, env = "DATANODE_NODE_NAME", required = true)]
    node_name: String,

    /// Arguments passed to the search engine
    #[arg(last = true)]
    opensearch_args: Vec<String>,

    /// Path to the search engine executable
    #[arg(long, env = "DATANODE_OPENSEARCH_BIN", required = true)]
    opensearch_bin: PathBuf,

    /// Environment variables for the search engine, as KEY=VALUE
    #[arg(long = "opensearch-env", value_parser = parse_env_var)]
    opensearch_env: Vec<(String, String)>,

    /// Password for the cluster REST API
    #[arg(
        long,
        env = "DATANODE_OPENSEARCH_PASSWORD",
        requires = "opensearch_username"
    )]
    opensearch_password: Option<String>,

    /// REST endpoint of the local node
    #[arg(
        long,
        default_value = "http://localhost:9200",
        env = "DATANODE_OPENSEARCH_URL"
    )]
    opensearch_url: Url,

    /// Username for the cluster REST API
    #[arg(long, env = "DATANODE_OPENSEARCH_USERNAME")]
    opensearch_username: Option<String>,

    /// Drain shards off this node before shutting down
    #[arg(long, env = "DATANODE_REMOVE_ON_SHUTDOWN")]
    remove_on_shutdown: bool,

    /// Seconds between shard relocation checks during removal
    #[arg(long, default_value_t = 10, env = "DATANODE_REMOVAL_POLL_INTERVAL_SECS")]
    removal_poll_interval_secs: u64,

    /// Seconds to wait for shards to drain before stopping anyway
    #[arg(long, default_value_t = 3600, env = "DATANODE_REMOVAL_TIMEOUT_SECS")]
    removal_timeout_secs: u64,

    /// Timeout in seconds for cluster REST requests
    #[arg(long, default_value_t = 10, env = "DATANODE_REQUEST_TIMEOUT_SECS")]
    request_timeout_secs: u64,

    /// Seconds to wait after SIGTERM before killing the search engine
    #[arg(long, default_value_t = 10, env = "DATANODE_STOP_TIMEOUT_SECS")]
    stop_timeout_secs: u64,

    /// Working directory of the search engine
    #[arg(long, env = "DATANODE_WORKING_DIR")]
    working_dir: Option<PathBuf>,
}

impl Args {
    fn command_line_options(&self) -> CommandLineOptions {
        let mut options = CommandLineOptions::new(&self.opensearch_bin, &self.opensearch_args)
            .with_name(&self.node_name)
            .with_stop_timeout(Duration::from_secs(self.stop_timeout_secs));

        if let Some(working_dir) = &self.working_dir {
            options = options.with_working_dir(working_dir);
        }

        for (key, value) in &self.opensearch_env {
            options = options.with_env(key, value);
        }

        options
    }

    fn credentials(&self) -> Option<(String, String)> {
        self.opensearch_username.as_ref().map(|username| {
            (
                username.clone(),
                self.opensearch_password.clone().unwrap_or_default(),
            )
        })
    }
}

fn parse_env_var(value: &str) -> Result<(String, String), String> {
    match value.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got `{value}`")),
    }
}

async fn run(args: Args, shutdown_token: CancellationToken) -> Result<(), Error> {
    let client = Arc::new(OpensearchClusterClient::new(
        OpensearchClusterClientOptions {
            base_url: args.opensearch_url.clone(),
            credentials: args.credentials(),
            request_timeout: Duration::from_secs(args.request_timeout_secs),
        },
    )?);

    let process = Arc::new(OpensearchProcess::new(
        OpensearchProcessOptions::new(&args.node_name)
            .with_health_check_failure_threshold(args.health_check_failure_threshold)
            .with_logs_capacity(args.logs_capacity),
    ));

    process.add_state_machine_tracer(Arc::new(TransitionLogger::new(&args.node_name)));

    let watchdog = Arc::new(ProcessWatchdog::new(&process, args.max_restarts));
    process.add_state_machine_tracer(watchdog.clone());

    process.add_state_machine_tracer(Arc::new(ClusterRemovalTracer::new(
        &process,
        client.clone(),
        ClusterRemovalOptions::new(&args.node_name)
            .with_poll_interval(Duration::from_secs(args.removal_poll_interval_secs)),
    )?));

    process.configure(args.command_line_options()).await?;

    let mut states = process.subscribe();
    process.start()?;

    let health_checker = HealthChecker::spawn(
        &process,
        client,
        Duration::from_secs(args.health_check_interval_secs),
    );

    let result = tokio::select! {
        () = shutdown_token.cancelled() => {
            shutdown(&process, &args).await;
            Ok(())
        }
        _ = states.wait_for(|state| {
            *state == ProcessState::Terminated
                && (!watchdog.is_active() || !process.info().alive)
        }) => {
            error!(restarts = watchdog.restarts(), "search engine is not running, exiting");
            Err(Error::ProcessTerminated(watchdog.restarts()))
        }
    };

    health_checker.shutdown().await;

    result
}

async fn shutdown(process: &OpensearchProcess, args: &Args) {
    if args.remove_on_shutdown && process.is_in_state(ProcessState::Available) {
        info!("Removing node from cluster before shutdown");

        let mut states = process.subscribe();
        process.on_event(ProcessEvent::ProcessRemove);

        let removed = states.wait_for(|state| *state == ProcessState::Terminated);
        if tokio::time::timeout(Duration::from_secs(args.removal_timeout_secs), removed)
            .await
            .is_err()
        {
            warn!("Shards did not drain in time, stopping anyway");
        }
    }

    // Also waits for a stop already started by the removal.
    process.stop().await;
}

async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => info!("Received SIGTERM"),
                _ = sigint.recv() => info!("Received SIGINT"),
            }
        }
        (Err(err), _) | (_, Err(err)) => {
            error!("Failed to install signal handlers: {}", err);
            let _ = tokio::signal::ctrl_c().await;
            info!("Received interrupt signal");
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    // Create shared shutdown token
    let shutdown_token = CancellationToken::new();

    let signal_shutdown_token = shutdown_token.clone();
    tokio::spawn(async move {
        wait_for_signal().await;

        info!("Shutting down");
        signal_shutdown_token.cancel();
    });

    run(args, shutdown_token).await
}
