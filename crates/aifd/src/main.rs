//! aifd - daemon entry point.

use std::path::PathBuf;

use aifd::{Daemon, DaemonConfig};
use clap::Parser;
use tracing::error;
use tracing_subscriber::{fmt, EnvFilter};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Local developer-assistance daemon.
#[derive(Parser)]
#[command(name = "aifd")]
#[command(about = "Memory, retrieval, learning, and spec orchestration daemon")]
#[command(version)]
struct Cli {
    /// Data directory for the per-subsystem databases.
    #[arg(long, env = "AIFD_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Git root of the project to serve (default: current directory).
    #[arg(long, env = "AIFD_GIT_ROOT")]
    git_root: Option<PathBuf>,

    /// HTTP port (localhost only).
    #[arg(long, env = "AIFD_PORT", default_value_t = aifd::DEFAULT_PORT)]
    port: u16,
}

fn main() {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = DaemonConfig::default();
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }
    if let Some(git_root) = cli.git_root {
        config.git_root = git_root;
    }
    config.port = cli.port;

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("failed to create tokio runtime: {}", e);
            std::process::exit(1);
        }
    };

    runtime.block_on(async {
        match Daemon::new(config).await {
            Ok(daemon) => {
                tokio::select! {
                    result = daemon.run() => {
                        if let Err(e) = result {
                            error!("daemon error: {}", e);
                            std::process::exit(1);
                        }
                    }
                    _ = tokio::signal::ctrl_c() => {
                        tracing::info!("received SIGINT");
                        daemon.shutdown();
                    }
                }
            }
            Err(e) => {
                error!("failed to initialize daemon: {}", e);
                std::process::exit(1);
            }
        }
    });
}
