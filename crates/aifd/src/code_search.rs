//! Code retrieval adapter: a thin wrapper over an external semantic
//! code-search binary.
//!
//! The binary speaks JSON on stdout (`status --json`, `search --json`,
//! `index`). A missing binary, non-zero exit, or unparseable output all
//! degrade to `BackendUnavailable`; callers treat that as "skip this
//! backend". Search results are cached in `embed_cache.db` keyed by
//! query + HEAD commit.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use aif_core::fingerprint::sha256_hex;
use aif_core::types::{Corpus, SearchHit};
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::git;
use crate::storage::{self, StorageError};

const EMBED_CACHE_SQL: &str = include_str!("../../../migrations/embed_cache.sql");

#[derive(Debug, Error)]
pub enum CodeSearchError {
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),
    #[error("search timed out after {0:?}")]
    Timeout(Duration),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, CodeSearchError>;

/// Backend status as reported by the binary, plus derived staleness.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendStatus {
    #[serde(default)]
    pub available: bool,
    #[serde(default)]
    pub last_indexed_commit: Option<String>,
    #[serde(default)]
    pub total_files: u64,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub last_indexed_at: Option<String>,
    /// Any tracked-file diff against `last_indexed_commit` means stale.
    #[serde(default)]
    pub stale: bool,
}

impl BackendStatus {
    fn unavailable() -> Self {
        Self {
            available: false,
            last_indexed_commit: None,
            total_files: 0,
            model: None,
            last_indexed_at: None,
            stale: false,
        }
    }
}

/// One raw result row from the binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawHit {
    path: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    snippet: String,
    score: f64,
}

/// Adapter over the configured search binary for one git root.
#[derive(Debug, Clone)]
pub struct CodeSearch {
    binary: PathBuf,
    git_root: PathBuf,
    timeout: Duration,
    cache: Pool<Sqlite>,
}

impl CodeSearch {
    pub async fn open(
        binary: &Path,
        git_root: &Path,
        timeout: Duration,
        cache_db: Option<&Path>,
    ) -> Result<Self> {
        let cache = storage::open_pool(cache_db).await?;
        storage::migrate(&cache, EMBED_CACHE_SQL).await?;
        Ok(Self {
            binary: binary.to_path_buf(),
            git_root: git_root.to_path_buf(),
            timeout,
            cache,
        })
    }

    async fn invoke(&self, args: &[&str]) -> Result<String> {
        let mut child = Command::new(&self.binary)
            .args(args)
            .current_dir(&self.git_root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CodeSearchError::BackendUnavailable(format!(
                "{}: {e}",
                self.binary.display()
            )))?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(CodeSearchError::BackendUnavailable(e.to_string())),
            Err(_) => return Err(CodeSearchError::Timeout(self.timeout)),
        };

        if !output.status.success() {
            return Err(CodeSearchError::BackendUnavailable(format!(
                "{} exited {}: {}",
                self.binary.display(),
                output.status.code().unwrap_or(-1),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Backend status; never errors, a broken backend reads as unavailable.
    pub async fn status(&self) -> BackendStatus {
        let stdout = match self.invoke(&["status", "--json"]).await {
            Ok(stdout) => stdout,
            Err(e) => {
                debug!(error = %e, "code backend status unavailable");
                return BackendStatus::unavailable();
            }
        };
        let mut status: BackendStatus = match serde_json::from_str(&stdout) {
            Ok(status) => status,
            Err(e) => {
                warn!(error = %e, "code backend emitted unparseable status");
                return BackendStatus::unavailable();
            }
        };
        status.available = true;
        status.stale = self.derive_stale(status.last_indexed_commit.as_deref()).await;
        status
    }

    async fn derive_stale(&self, last_indexed_commit: Option<&str>) -> bool {
        let Some(commit) = last_indexed_commit else {
            return true;
        };
        match git::changed_files(&self.git_root, commit).await {
            Ok(files) => !files.is_empty(),
            Err(_) => true,
        }
    }

    /// Ranked code search; scores are clamped into [0, 1].
    pub async fn search(&self, query: &str, top_k: u32) -> Result<Vec<SearchHit>> {
        let head = git::current_head(&self.git_root).await.unwrap_or_default();
        let cache_key = sha256_hex(format!("{query}\n{head}\n{top_k}").as_bytes());

        if let Some(cached) = self.cache_get(&cache_key, &head).await? {
            debug!(query = %query, "code search served from embed cache");
            return Ok(cached);
        }

        let limit = top_k.to_string();
        let stdout = self
            .invoke(&["search", "--json", "--limit", &limit, query])
            .await?;
        let raw: Vec<RawHit> = serde_json::from_str(&stdout)
            .map_err(|e| CodeSearchError::BackendUnavailable(format!("bad search output: {e}")))?;

        let hits: Vec<SearchHit> = raw
            .into_iter()
            .map(|r| SearchHit {
                corpus: Corpus::Code,
                title: r.title.unwrap_or_else(|| r.path.clone()),
                path: r.path,
                snippet: r.snippet,
                score: r.score.clamp(0.0, 1.0),
            })
            .collect();

        if !head.is_empty() {
            self.cache_put(&cache_key, &head, query, &hits).await?;
        }
        Ok(hits)
    }

    /// Ask the binary to (re)index; `full` forces a from-scratch build.
    pub async fn reindex(&self, full: bool) -> Result<()> {
        let args: &[&str] = if full { &["index", "--full"] } else { &["index"] };
        self.invoke(args).await?;
        Ok(())
    }

    async fn cache_get(&self, key: &str, head: &str) -> Result<Option<Vec<SearchHit>>> {
        let row: Option<(String, String)> = sqlx::query_as(
            "SELECT head_commit, results_json FROM search_cache WHERE cache_key = ?1",
        )
        .bind(key)
        .fetch_optional(&self.cache)
        .await?;
        match row {
            Some((cached_head, json)) if cached_head == head => {
                Ok(serde_json::from_str(&json).ok())
            }
            _ => Ok(None),
        }
    }

    async fn cache_put(&self, key: &str, head: &str, query: &str, hits: &[SearchHit]) -> Result<()> {
        let json = serde_json::to_string(hits)
            .map_err(|e| CodeSearchError::BackendUnavailable(e.to_string()))?;
        sqlx::query(
            "INSERT OR REPLACE INTO search_cache (cache_key, head_commit, query, results_json, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(key)
        .bind(head)
        .bind(query)
        .bind(&json)
        .bind(chrono::Utc::now().timestamp_millis())
        .execute(&self.cache)
        .await?;
        Ok(())
    }
}
