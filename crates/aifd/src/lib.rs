//! aifd - local developer-assistance daemon
//!
//! One stateful process carrying four durable capabilities: searchable
//! memory, unified retrieval over code and governance docs, a pattern
//! learning pipeline over version-control history, and worktree-isolated
//! spec orchestration. A CLI client (`aifctl`) bridges the tool surface;
//! hooks feed observations in over the local HTTP boundary.

pub mod analytics;
pub mod code_search;
pub mod coordinator;
pub mod git;
pub mod governance;
pub mod handlers;
pub mod heuristics;
pub mod learning;
pub mod memory;
pub mod retriever;
pub mod server;
pub mod storage;
pub mod syntactic;
pub mod worktree;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use aif_core::config::Config;
use coordinator::{Coordinator, CoordinatorConfig};
use learning::{LearningPipeline, LearningStore};
use memory::MemoryStore;
use retriever::Retriever;
use server::AppState;
use tracing::{info, warn};
use worktree::WorktreeManager;

/// Type alias for application-level errors with context.
pub type AppResult<T> = eyre::Result<T>;

/// Default HTTP port for the control plane.
pub const DEFAULT_PORT: u16 = 7401;

/// Daemon configuration.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Data directory holding the per-subsystem databases.
    pub data_dir: PathBuf,
    /// Git root of the project the daemon serves.
    pub git_root: PathBuf,
    /// HTTP port (localhost only).
    pub port: u16,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            git_root: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            port: DEFAULT_PORT,
        }
    }
}

/// Default data directory: `~/.ai-framework/data/`.
pub fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".ai-framework/data")
}

/// Daemon state: the open stores and their wiring.
#[derive(Debug)]
pub struct Daemon {
    config: DaemonConfig,
    state: Arc<AppState>,
    shutdown: tokio_util::sync::CancellationToken,
}

impl Daemon {
    /// Open every subsystem in its fixed order:
    /// memory → governance → embed cache → learning → coordinator.
    /// Teardown happens in reverse as the handles drop.
    pub async fn new(config: DaemonConfig) -> AppResult<Self> {
        let project = Config::load(&config.git_root)?;

        let memory = MemoryStore::open(&config.data_dir.join("memory.db")).await?;

        let governance = if project.retrieval.governance_enabled {
            Some(
                governance::GovernanceIndex::open(
                    &config.data_dir.join("governance.db"),
                    &config.git_root,
                )
                .await?,
            )
        } else {
            None
        };

        let code = if project.retrieval.code_enabled {
            Some(
                code_search::CodeSearch::open(
                    &project.retrieval.code_binary,
                    &config.git_root,
                    Duration::from_secs(project.retrieval.code_timeout_sec),
                    Some(&config.data_dir.join("embed_cache.db")),
                )
                .await?,
            )
        } else {
            None
        };

        let learning_store = LearningStore::open(&config.data_dir.join("learning.db")).await?;
        let learning = Arc::new(LearningPipeline::new(
            learning_store,
            memory.clone(),
            &config.git_root,
        ));

        let coordinator = Arc::new(Coordinator::new(
            &config.git_root,
            CoordinatorConfig {
                max_review_iterations: project.orchestration.max_review_iterations,
                stale_busy_hours: project.orchestration.stale_busy_hours,
            },
            WorktreeManager::new(&config.git_root, project.orchestration.base_branch.clone()),
            memory.clone(),
        ));

        let retriever = Retriever::new(code.clone(), governance.clone());

        let state = Arc::new(AppState {
            config: project,
            memory,
            governance,
            code,
            retriever,
            learning,
            coordinator,
        });

        Ok(Self {
            config,
            state,
            shutdown: tokio_util::sync::CancellationToken::new(),
        })
    }

    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    /// Run the daemon until shutdown.
    pub async fn run(&self) -> AppResult<()> {
        info!("aifd starting on port {}", self.config.port);
        info!("data directory: {}", self.config.data_dir.display());
        info!("git root: {}", self.config.git_root.display());

        write_port_lock(&self.config.data_dir, self.config.port)?;

        // Warm the governance index off the request path.
        if let Some(governance) = self.state.governance.clone() {
            tokio::spawn(async move {
                match governance.reindex().await {
                    Ok(report) => info!(
                        files = report.files_indexed,
                        chunks = report.chunks,
                        "governance index warmed"
                    ),
                    Err(e) => warn!(error = %e, "startup governance reindex failed"),
                }
            });
        }

        let state = Arc::clone(&self.state);
        let port = self.config.port;
        let shutdown = self.shutdown.clone();
        tokio::select! {
            result = server::start_server(state, port) => {
                if let Err(e) = result {
                    return Err(eyre::eyre!("HTTP server error: {e}"));
                }
            }
            () = shutdown.cancelled() => {
                info!("shutdown signal received");
            }
        }

        Ok(())
    }

    /// Signal the daemon to shut down.
    pub fn shutdown(&self) {
        info!("shutdown requested");
        self.shutdown.cancel();
    }
}

/// Record the bound port so hooks and the CLI can find the daemon.
fn write_port_lock(data_dir: &Path, port: u16) -> AppResult<()> {
    std::fs::create_dir_all(data_dir)?;
    std::fs::write(data_dir.join("port.lock"), port.to_string())?;
    Ok(())
}

/// Read the recorded port, if a daemon has run from this data directory.
pub fn read_port_lock(data_dir: &Path) -> Option<u16> {
    std::fs::read_to_string(data_dir.join("port.lock"))
        .ok()
        .and_then(|s| s.trim().parse().ok())
}
