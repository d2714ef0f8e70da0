//! Worktree lifecycle for spec isolation.
//!
//! Each spec gets one physical worktree at
//! `<git_root>/.worktrees/spec-<slug>-<sha8>/` on branch `spec/<slug>`.
//! The path is always derived from slug + plan fingerprint, never stored,
//! so state and disk cannot drift apart.

use std::path::{Path, PathBuf};

use aif_core::fingerprint::{plan_fingerprint, sha8};
use thiserror::Error;
use tracing::{info, warn};

use crate::git::{self, GitError};

/// Config entries copied into new worktrees so subagents see the same rules.
const CONFIG_COPIES: [&str; 2] = [".claude", ".mcp.json"];

#[derive(Debug, Error)]
pub enum WorktreeError {
    #[error("git error: {0}")]
    Git(#[from] GitError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("worktree missing for slug: {0}")]
    Missing(String),
}

pub type Result<T> = std::result::Result<T, WorktreeError>;

/// Live status of a spec worktree.
#[derive(Debug, Clone, serde::Serialize)]
pub struct WorktreeStatus {
    pub path: String,
    pub branch: String,
    pub present: bool,
    pub dirty: bool,
    pub ahead: u32,
    pub behind: u32,
}

/// Result of a squash sync back onto the base branch.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SyncSummary {
    /// `--stat` output of the squash merge; staged, not committed.
    pub staged_summary: String,
    /// Label of the stash created when the base checkout was dirty.
    pub stash_label: Option<String>,
}

/// Manages worktrees under one git root.
#[derive(Debug, Clone)]
pub struct WorktreeManager {
    git_root: PathBuf,
    base_branch: String,
}

impl WorktreeManager {
    pub fn new(git_root: &Path, base_branch: impl Into<String>) -> Self {
        Self {
            git_root: git_root.to_path_buf(),
            base_branch: base_branch.into(),
        }
    }

    /// Derived worktree path for a slug + plan file.
    pub fn path_for(&self, slug: &str, plan_path: Option<&Path>) -> PathBuf {
        let fingerprint = plan_fingerprint(slug, plan_path);
        self.path_for_sha8(slug, &sha8(&fingerprint))
    }

    /// Derived worktree path when the sha8 is already known.
    pub fn path_for_sha8(&self, slug: &str, sha8: &str) -> PathBuf {
        self.git_root
            .join(".worktrees")
            .join(format!("spec-{slug}-{sha8}"))
    }

    pub fn branch_for(slug: &str) -> String {
        format!("spec/{slug}")
    }

    fn sha8_for(slug: &str, plan_path: Option<&Path>) -> String {
        sha8(&plan_fingerprint(slug, plan_path))
    }

    /// Whether the worktree exists on disk and git knows about it.
    pub async fn detect(&self, slug: &str, plan_path: Option<&Path>) -> Result<bool> {
        self.detect_sha8(slug, &Self::sha8_for(slug, plan_path)).await
    }

    /// [`Self::detect`] keyed by an already-computed sha8.
    pub async fn detect_sha8(&self, slug: &str, sha8: &str) -> Result<bool> {
        let path = self.path_for_sha8(slug, sha8);
        if !path.exists() {
            return Ok(false);
        }
        let out = git::run_git(&["worktree", "list", "--porcelain"], &self.git_root).await?;
        let canonical = path.canonicalize().unwrap_or(path);
        Ok(out
            .stdout
            .lines()
            .filter_map(|l| l.strip_prefix("worktree "))
            .any(|p| Path::new(p) == canonical))
    }

    /// Create the worktree for a spec; idempotent for identical plans.
    ///
    /// A dirty main checkout is stashed first with a labeled message.
    /// Governance tooling config is copied in so subagents see the same
    /// rules as the main checkout.
    pub async fn create(&self, slug: &str, plan_path: Option<&Path>) -> Result<PathBuf> {
        self.create_sha8(slug, &Self::sha8_for(slug, plan_path)).await
    }

    /// [`Self::create`] keyed by an already-computed sha8.
    pub async fn create_sha8(&self, slug: &str, sha8: &str) -> Result<PathBuf> {
        let path = self.path_for_sha8(slug, sha8);
        if self.detect_sha8(slug, sha8).await? {
            info!(slug = %slug, path = %path.display(), "worktree already present");
            return Ok(path);
        }

        self.ensure_area_excluded()?;

        if !git::is_working_tree_clean(&self.git_root).await? {
            let label = format!("aifd: pre-worktree {slug}");
            git::stash_push(&self.git_root, &label).await?;
            info!(slug = %slug, label = %label, "stashed dirty working tree");
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let branch = Self::branch_for(slug);
        let path_str = path.to_string_lossy().to_string();
        if git::branch_exists(&self.git_root, &branch).await? {
            // Branch survives from an earlier run; attach instead of -b.
            git::run_git(
                &["worktree", "add", &path_str, &branch],
                &self.git_root,
            )
            .await?;
        } else {
            git::run_git(
                &["worktree", "add", "-b", &branch, &path_str, &self.base_branch],
                &self.git_root,
            )
            .await?;
        }

        self.copy_tooling_config(&path)?;
        info!(slug = %slug, path = %path.display(), branch = %branch, "worktree created");
        Ok(path)
    }

    /// Keep the worktree area out of `git status` for the main checkout.
    /// Uses the repo-local exclude file, so no tracked file changes.
    fn ensure_area_excluded(&self) -> Result<()> {
        let info_dir = self.git_root.join(".git/info");
        if !self.git_root.join(".git").is_dir() {
            return Ok(());
        }
        std::fs::create_dir_all(&info_dir)?;
        let exclude = info_dir.join("exclude");
        let current = std::fs::read_to_string(&exclude).unwrap_or_default();
        if !current.lines().any(|l| l.trim() == ".worktrees/") {
            let mut updated = current;
            if !updated.is_empty() && !updated.ends_with('\n') {
                updated.push('\n');
            }
            updated.push_str(".worktrees/\n");
            std::fs::write(&exclude, updated)?;
        }
        Ok(())
    }

    fn copy_tooling_config(&self, worktree: &Path) -> Result<()> {
        for name in CONFIG_COPIES {
            let src = self.git_root.join(name);
            if !src.exists() {
                continue;
            }
            let dst = worktree.join(name);
            if src.is_dir() {
                copy_dir(&src, &dst)?;
            } else if !dst.exists() {
                std::fs::copy(&src, &dst)?;
            }
        }
        Ok(())
    }

    /// Unified diff of the spec branch against its merge base with base.
    pub async fn diff(&self, slug: &str) -> Result<String> {
        let branch = Self::branch_for(slug);
        if !git::branch_exists(&self.git_root, &branch).await? {
            return Err(WorktreeError::Missing(slug.to_string()));
        }
        let base = git::merge_base(&self.git_root, &self.base_branch, &branch).await?;
        let range = format!("{base}..{branch}");
        let out = git::run_git(&["diff", &range], &self.git_root).await?;
        Ok(out.stdout)
    }

    /// Squash the spec branch onto the base branch without committing.
    pub async fn sync(&self, slug: &str) -> Result<SyncSummary> {
        let branch = Self::branch_for(slug);
        if !git::branch_exists(&self.git_root, &branch).await? {
            return Err(WorktreeError::Missing(slug.to_string()));
        }

        let stash_label = if git::is_working_tree_clean(&self.git_root).await? {
            None
        } else {
            let label = format!("aifd: pre-sync {slug}");
            git::stash_push(&self.git_root, &label).await?;
            Some(label)
        };

        git::checkout(&self.git_root, &self.base_branch).await?;
        let out = git::run_git(
            &["merge", "--squash", "--stat", &branch],
            &self.git_root,
        )
        .await?;

        Ok(SyncSummary {
            staged_summary: out.stdout,
            stash_label,
        })
    }

    /// Remove the worktree and delete the spec branch.
    ///
    /// Directory removal retries once with a direct filesystem delete;
    /// a branch that is already gone is not an error.
    pub async fn cleanup(&self, slug: &str, plan_path: Option<&Path>) -> Result<()> {
        self.cleanup_sha8(slug, &Self::sha8_for(slug, plan_path)).await
    }

    /// [`Self::cleanup`] keyed by an already-computed sha8.
    pub async fn cleanup_sha8(&self, slug: &str, sha8: &str) -> Result<()> {
        let path = self.path_for_sha8(slug, sha8);
        let path_str = path.to_string_lossy().to_string();

        let removed = git::run_git_unchecked(
            &["worktree", "remove", "--force", &path_str],
            &self.git_root,
        )
        .await?;
        if removed.code != 0 {
            if path.exists() {
                warn!(slug = %slug, stderr = %removed.stderr.trim(), "worktree remove failed, deleting directly");
                std::fs::remove_dir_all(&path)?;
            }
            // Drop the now-stale administrative entry.
            let _ = git::run_git_unchecked(&["worktree", "prune"], &self.git_root).await?;
        }

        let branch = Self::branch_for(slug);
        let deleted =
            git::run_git_unchecked(&["branch", "-D", &branch], &self.git_root).await?;
        if deleted.code != 0 && !deleted.stderr.contains("not found") {
            return Err(GitError::CommandFailed(format!(
                "git branch -D {branch}: {}",
                deleted.stderr.trim()
            ))
            .into());
        }

        info!(slug = %slug, "worktree cleaned up");
        Ok(())
    }

    /// Live status for a spec worktree.
    pub async fn status(&self, slug: &str, plan_path: Option<&Path>) -> Result<WorktreeStatus> {
        self.status_sha8(slug, &Self::sha8_for(slug, plan_path)).await
    }

    /// [`Self::status`] keyed by an already-computed sha8.
    pub async fn status_sha8(&self, slug: &str, sha8: &str) -> Result<WorktreeStatus> {
        let path = self.path_for_sha8(slug, sha8);
        let branch = Self::branch_for(slug);
        let present = self.detect_sha8(slug, sha8).await?;

        let mut dirty = false;
        let mut ahead = 0;
        let mut behind = 0;

        if present {
            dirty = !git::is_working_tree_clean(&path).await?;
            let range = format!("{}...{}", self.base_branch, branch);
            let counts = git::run_git_unchecked(
                &["rev-list", "--left-right", "--count", &range],
                &self.git_root,
            )
            .await?;
            if counts.code == 0 {
                let mut parts = counts.stdout.split_whitespace();
                behind = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
                ahead = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
            }
        }

        Ok(WorktreeStatus {
            path: path.to_string_lossy().to_string(),
            branch,
            present,
            dirty,
            ahead,
            behind,
        })
    }
}

fn copy_dir(src: &Path, dst: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.path().is_dir() {
            copy_dir(&entry.path(), &target)?;
        } else if !target.exists() {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
