use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use rewofs::client::{mount, Remote};
use rewofs::config::Settings;
use rewofs::server;
use rewofs::transport::Endpoint;

/// Mounts a remote directory tree over a message-based transport.
#[derive(Debug, Parser)]
#[command(name = "rewofs", version)]
struct Cli {
    /// Run as server, exporting this directory.
    #[arg(long, value_name = "DIR", requires = "listen", conflicts_with_all = ["mountpoint", "connect"])]
    serve: Option<PathBuf>,

    /// Endpoint the server accepts connections on.
    #[arg(long, value_name = "URI")]
    listen: Option<String>,

    /// Run as client, mounting the remote tree here.
    #[arg(long, value_name = "DIR", requires = "connect")]
    mountpoint: Option<PathBuf>,

    /// Endpoint of the server to connect to.
    #[arg(long, value_name = "URI")]
    connect: Option<String>,

    /// Optional TOML file with tunables.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env("REWOFS_LOG")
                .unwrap_or_else(|_| "rewofs=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let settings = match Settings::load(cli.config.as_deref()) {
        Ok(settings) => settings,
        Err(err) => {
            error!(%err, "bad configuration");
            return ExitCode::FAILURE;
        }
    };

    match (cli.serve, cli.listen, cli.mountpoint, cli.connect) {
        (Some(root), Some(listen), None, None) => run_server(root, &listen, settings),
        (None, None, Some(mountpoint), Some(connect)) => {
            run_client(mountpoint, &connect, settings)
        }
        _ => {
            error!("pass either --serve with --listen, or --mountpoint with --connect");
            ExitCode::FAILURE
        }
    }
}

fn run_server(root: PathBuf, listen: &str, settings: Settings) -> ExitCode {
    let endpoint: Endpoint = match listen.parse() {
        Ok(endpoint) => endpoint,
        Err(err) => {
            error!(%err, "bad --listen endpoint");
            return ExitCode::FAILURE;
        }
    };
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(err) => {
            error!(%err, "cannot start runtime");
            return ExitCode::FAILURE;
        }
    };
    match runtime.block_on(server::serve(root, &endpoint, &settings)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(%err, "server failed");
            ExitCode::FAILURE
        }
    }
}

fn run_client(mountpoint: PathBuf, connect: &str, settings: Settings) -> ExitCode {
    let endpoint: Endpoint = match connect.parse() {
        Ok(endpoint) => endpoint,
        Err(err) => {
            error!(%err, "bad --connect endpoint");
            return ExitCode::FAILURE;
        }
    };
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(err) => {
            error!(%err, "cannot start runtime");
            return ExitCode::FAILURE;
        }
    };
    let remote = match runtime.block_on(Remote::connect(endpoint, &settings)) {
        Ok(remote) => Arc::new(remote),
        Err(err) => {
            error!(%err, "cannot reach the server");
            return ExitCode::FAILURE;
        }
    };

    info!(mountpoint = %mountpoint.display(), "mounting");
    // Blocks until the filesystem is unmounted externally.
    match mount(remote, runtime.handle().clone(), &mountpoint) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(%err, "mount failed");
            ExitCode::FAILURE
        }
    }
}
