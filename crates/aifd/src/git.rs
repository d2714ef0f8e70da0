//! Git operations for the daemon.
//!
//! Everything goes through the single choke point [`run_git`] so tests can
//! simulate every failure mode in one place, and every invocation carries a
//! bounded deadline.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;

/// Default deadline for one git invocation.
pub const GIT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum GitError {
    #[error("git command failed: {0}")]
    CommandFailed(String),
    #[error("failed to execute git: {0}")]
    Execution(#[from] std::io::Error),
    #[error("git timed out after {0:?}")]
    Timeout(Duration),
    #[error("invalid utf-8 in git output")]
    InvalidUtf8,
    #[error("dirty working tree: {0}")]
    DirtyWorkingTree(String),
}

pub type Result<T> = std::result::Result<T, GitError>;

/// Raw output of one git invocation.
#[derive(Debug, Clone)]
pub struct GitOutput {
    pub stdout: String,
    pub stderr: String,
    pub code: i32,
}

/// Run git with the given args in `cwd`, bounded by [`GIT_TIMEOUT`].
///
/// Non-zero exit is returned as `CommandFailed` carrying stderr; callers
/// that tolerate specific failures use [`run_git_unchecked`].
pub async fn run_git(args: &[&str], cwd: &Path) -> Result<GitOutput> {
    let output = run_git_unchecked(args, cwd).await?;
    if output.code != 0 {
        return Err(GitError::CommandFailed(format!(
            "git {}: {}",
            args.join(" "),
            output.stderr.trim()
        )));
    }
    Ok(output)
}

/// Like [`run_git`] but non-zero exits are returned, not errors.
pub async fn run_git_unchecked(args: &[&str], cwd: &Path) -> Result<GitOutput> {
    let mut child = Command::new("git")
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let result = tokio::time::timeout(GIT_TIMEOUT, async {
        let out = child.wait_with_output().await?;
        Ok::<_, std::io::Error>(out)
    })
    .await;

    let output = match result {
        Ok(out) => out?,
        Err(_) => return Err(GitError::Timeout(GIT_TIMEOUT)),
    };

    Ok(GitOutput {
        stdout: String::from_utf8(output.stdout).map_err(|_| GitError::InvalidUtf8)?,
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        code: output.status.code().unwrap_or(-1),
    })
}

/// Current HEAD commit sha.
pub async fn current_head(cwd: &Path) -> Result<String> {
    let out = run_git(&["rev-parse", "HEAD"], cwd).await?;
    Ok(out.stdout.trim().to_string())
}

/// Files changed since a commit (names only, deduplicated by git).
pub async fn changed_files(cwd: &Path, since: &str) -> Result<Vec<String>> {
    let range = format!("{since}..HEAD");
    let out = run_git(&["diff", "--name-only", &range], cwd).await?;
    Ok(out
        .stdout
        .lines()
        .filter(|l| !l.is_empty())
        .map(ToString::to_string)
        .collect())
}

/// One parsed log entry.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub sha: String,
    pub message: String,
    pub author: String,
    pub timestamp: String,
}

/// Commits after `since` (exclusive), oldest first, capped at `max`.
pub async fn log(cwd: &Path, since: Option<&str>, max: u32) -> Result<Vec<LogEntry>> {
    let range;
    let mut args = vec!["log", "--format=%H|%s|%an|%aI", "--reverse"];
    if let Some(since) = since {
        range = format!("{since}..HEAD");
        args.push(&range);
    }
    let max_arg = format!("--max-count={max}");
    args.push(&max_arg);

    let out = run_git(&args, cwd).await?;
    Ok(out
        .stdout
        .lines()
        .filter_map(|line| {
            let parts: Vec<&str> = line.splitn(4, '|').collect();
            (parts.len() == 4).then(|| LogEntry {
                sha: parts[0].to_string(),
                message: parts[1].to_string(),
                author: parts[2].to_string(),
                timestamp: parts[3].to_string(),
            })
        })
        .collect())
}

/// Count of commits after `since`. Drives the analyze trigger.
pub async fn commits_since(cwd: &Path, since: &str) -> Result<usize> {
    let range = format!("{since}..HEAD");
    let out = run_git(&["rev-list", "--count", &range], cwd).await?;
    out.stdout
        .trim()
        .parse()
        .map_err(|_| GitError::CommandFailed("unparseable rev-list count".to_string()))
}

/// A single hunk of added lines from one commit.
#[derive(Debug, Clone)]
pub struct DiffHunk {
    pub file: String,
    pub start_line: u32,
    pub added_lines: Vec<String>,
}

/// Added-line hunks introduced by a commit.
pub async fn diff_hunks(cwd: &Path, sha: &str) -> Result<Vec<DiffHunk>> {
    let out = run_git(&["show", sha, "--unified=0", "--format="], cwd).await?;
    Ok(parse_hunks(&out.stdout))
}

fn parse_hunks(diff: &str) -> Vec<DiffHunk> {
    let mut hunks = Vec::new();
    let mut current_file: Option<String> = None;
    let mut current: Option<DiffHunk> = None;

    for line in diff.lines() {
        if let Some(rest) = line.strip_prefix("+++ b/") {
            if let Some(h) = current.take() {
                hunks.push(h);
            }
            current_file = Some(rest.to_string());
        } else if line.starts_with("@@") {
            if let Some(h) = current.take() {
                hunks.push(h);
            }
            // @@ -a,b +c,d @@ — the added-side start is c.
            let start = line
                .split('+')
                .nth(1)
                .and_then(|s| s.split([',', ' ']).next())
                .and_then(|s| s.parse().ok())
                .unwrap_or(0);
            if let Some(file) = &current_file {
                current = Some(DiffHunk {
                    file: file.clone(),
                    start_line: start,
                    added_lines: Vec::new(),
                });
            }
        } else if let Some(added) = line.strip_prefix('+') {
            if !line.starts_with("+++") {
                if let Some(h) = current.as_mut() {
                    h.added_lines.push(added.to_string());
                }
            }
        }
    }
    if let Some(h) = current.take() {
        hunks.push(h);
    }

    hunks.retain(|h| !h.added_lines.is_empty());
    hunks
}

/// Whether `git status --porcelain` reports nothing.
pub async fn is_working_tree_clean(cwd: &Path) -> Result<bool> {
    let out = run_git(&["status", "--porcelain"], cwd).await?;
    Ok(out.stdout.trim().is_empty())
}

/// Stash everything (including untracked) with a label. Returns the label.
pub async fn stash_push(cwd: &Path, label: &str) -> Result<String> {
    run_git(&["stash", "push", "--include-untracked", "-m", label], cwd).await?;
    Ok(label.to_string())
}

/// Whether a local branch exists.
pub async fn branch_exists(cwd: &Path, branch: &str) -> Result<bool> {
    let ref_name = format!("refs/heads/{branch}");
    let out = run_git_unchecked(&["rev-parse", "--verify", &ref_name], cwd).await?;
    Ok(out.code == 0)
}

/// Checkout an existing branch.
pub async fn checkout(cwd: &Path, branch: &str) -> Result<()> {
    run_git(&["checkout", branch], cwd).await?;
    Ok(())
}

/// Merge base of two refs.
pub async fn merge_base(cwd: &Path, a: &str, b: &str) -> Result<String> {
    let out = run_git(&["merge-base", a, b], cwd).await?;
    Ok(out.stdout.trim().to_string())
}
