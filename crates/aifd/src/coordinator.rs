//! Orchestration coordinator: the spec lifecycle state machine.
//!
//! Purely state-driven; generates no prompts and calls no model backends.
//! Transitions follow the fixed graph
//! planning → implementing → verifying → (fixing → implementing)* →
//! learning → done, with `aborted` reachable from any live phase.
//! Worktree side effects run before the state write, so a worktree failure
//! leaves the phase unchanged.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use aif_core::fingerprint::{self, plan_fingerprint, sha8};
use aif_core::types::{
    Complexity, EventKind, MemoryEvent, ReviewVerdict, SpecPhase, SpecState, Verdict,
};
use aif_core::verdict;
use chrono::{Duration, Utc};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::memory::MemoryStore;
use crate::worktree::{SyncSummary, WorktreeError, WorktreeManager};

/// Abort reason recorded when the fix loop is exhausted.
pub const REASON_UNFIXED: &str = "unfixed";

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("invalid transition: {op} not allowed in phase {phase}")]
    State { op: String, phase: String },
    #[error("spec not found: {0}")]
    NotFound(String),
    #[error("worktree error: {0}")]
    Worktree(#[from] WorktreeError),
    #[error("state persistence error: {0}")]
    Persistence(String),
}

pub type Result<T> = std::result::Result<T, CoordinatorError>;

/// Coordinator settings, sourced from the orchestration config section.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub max_review_iterations: u32,
    pub stale_busy_hours: u32,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_review_iterations: 3,
            stale_busy_hours: 4,
        }
    }
}

/// Outcome of `resolve_verify`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyOutcome {
    /// All verdicts passed; phase is now `learning`.
    Passed,
    /// At least one failure; the fix loop re-entered `implementing`.
    FixLoop,
    /// Fix loop exhausted; spec aborted with reason `unfixed`.
    Exhausted,
}

/// Per-slug runtime state that is not part of the persisted record.
#[derive(Debug, Default)]
struct SlugRuntime {
    verdicts: Vec<ReviewVerdict>,
}

/// Drives spec lifecycles for one git root.
#[derive(Debug)]
pub struct Coordinator {
    git_root: PathBuf,
    config: CoordinatorConfig,
    worktrees: WorktreeManager,
    memory: MemoryStore,
    /// Per-slug serialization of transitions; slugs are independent.
    locks: Mutex<HashMap<String, Arc<Mutex<SlugRuntime>>>>,
}

impl Coordinator {
    pub fn new(
        git_root: &Path,
        config: CoordinatorConfig,
        worktrees: WorktreeManager,
        memory: MemoryStore,
    ) -> Self {
        Self {
            git_root: git_root.to_path_buf(),
            config,
            worktrees,
            memory,
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn state_path(&self, slug: &str) -> PathBuf {
        self.git_root
            .join(".ai-framework/specs")
            .join(format!("{slug}.json"))
    }

    async fn slug_lock(&self, slug: &str) -> Arc<Mutex<SlugRuntime>> {
        let mut locks = self.locks.lock().await;
        Arc::clone(
            locks
                .entry(slug.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(SlugRuntime::default()))),
        )
    }

    /// Load persisted state for a slug.
    pub fn load(&self, slug: &str) -> Result<SpecState> {
        let path = self.state_path(slug);
        let content = std::fs::read_to_string(&path)
            .map_err(|_| CoordinatorError::NotFound(slug.to_string()))?;
        serde_json::from_str(&content)
            .map_err(|e| CoordinatorError::Persistence(format!("corrupt state for {slug}: {e}")))
    }

    /// Persist state; every transition lands here with a fresh `updated_at`.
    fn persist(&self, state: &mut SpecState) -> Result<()> {
        state.updated_at = Utc::now();
        let path = self.state_path(slug_of(state));
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| CoordinatorError::Persistence(e.to_string()))?;
        }
        let json = serde_json::to_string_pretty(state)
            .map_err(|e| CoordinatorError::Persistence(e.to_string()))?;
        std::fs::write(&path, json).map_err(|e| CoordinatorError::Persistence(e.to_string()))?;
        Ok(())
    }

    /// All persisted spec states under this git root.
    pub fn list(&self) -> Vec<SpecState> {
        let dir = self.git_root.join(".ai-framework/specs");
        let Ok(entries) = std::fs::read_dir(&dir) else {
            return Vec::new();
        };
        let mut states: Vec<SpecState> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().and_then(|x| x.to_str()) == Some("json"))
            .filter_map(|e| std::fs::read_to_string(e.path()).ok())
            .filter_map(|c| serde_json::from_str(&c).ok())
            .collect();
        states.sort_by(|a, b| a.slug.cmp(&b.slug));
        states
    }

    /// Create a new spec in `planning`.
    pub async fn start(&self, slug: &str, plan_path: Option<&Path>) -> Result<SpecState> {
        if !fingerprint::is_valid_slug(slug) {
            return Err(CoordinatorError::Validation(format!(
                "slug must be kebab-case: {slug}"
            )));
        }
        let lock = self.slug_lock(slug).await;
        let mut runtime = lock.lock().await;

        if let Ok(existing) = self.load(slug) {
            if !existing.phase.is_terminal() {
                return Err(CoordinatorError::State {
                    op: "start".to_string(),
                    phase: existing.phase.as_str().to_string(),
                });
            }
        }

        let plan_fp = plan_fingerprint(slug, plan_path);
        let now = Utc::now();
        let mut state = SpecState {
            slug: slug.to_string(),
            phase: SpecPhase::Planning,
            total_tasks: 0,
            completed_tasks: 0,
            review_iteration: 0,
            worktree_sha8: sha8(&plan_fp),
            plan_fingerprint: plan_fp,
            started_at: now,
            updated_at: now,
            abort_reason: None,
        };
        self.persist(&mut state)?;
        runtime.verdicts.clear();

        info!(slug = %slug, fingerprint = %state.worktree_sha8, "spec started");
        Ok(state)
    }

    /// Approve the plan; creates the worktree and enters `implementing`.
    pub async fn approve_plan(&self, slug: &str, total_tasks: u32) -> Result<SpecState> {
        if total_tasks == 0 {
            return Err(CoordinatorError::Validation(
                "total_tasks must be greater than zero".to_string(),
            ));
        }
        let lock = self.slug_lock(slug).await;
        let _runtime = lock.lock().await;

        let mut state = self.load(slug)?;
        require_phase(&state, SpecPhase::Planning, "approve_plan")?;

        // Worktree first; a failure leaves the phase at planning.
        self.worktrees
            .create_sha8(slug, &state.worktree_sha8)
            .await?;

        state.phase = SpecPhase::Implementing;
        state.total_tasks = total_tasks;
        self.persist(&mut state)?;
        info!(slug = %slug, total_tasks, "plan approved");
        Ok(state)
    }

    /// Record that task `n` is being worked on. No phase change.
    pub async fn start_task(&self, slug: &str, task: u32) -> Result<SpecState> {
        let lock = self.slug_lock(slug).await;
        let _runtime = lock.lock().await;

        let mut state = self.load(slug)?;
        require_phase(&state, SpecPhase::Implementing, "start_task")?;
        if task == 0 || task > state.total_tasks {
            return Err(CoordinatorError::Validation(format!(
                "task {task} out of range 1..={}",
                state.total_tasks
            )));
        }
        self.persist(&mut state)?;
        Ok(state)
    }

    /// Mark task `n` complete. Progress is monotonic.
    pub async fn complete_task(&self, slug: &str, task: u32) -> Result<SpecState> {
        let lock = self.slug_lock(slug).await;
        let _runtime = lock.lock().await;

        let mut state = self.load(slug)?;
        require_phase(&state, SpecPhase::Implementing, "complete_task")?;
        if task == 0 || task > state.total_tasks {
            return Err(CoordinatorError::Validation(format!(
                "task {task} out of range 1..={}",
                state.total_tasks
            )));
        }
        // completed_tasks only ever grows, and never past total_tasks.
        state.completed_tasks = (state.completed_tasks.max(task)).min(state.total_tasks);
        self.persist(&mut state)?;
        info!(slug = %slug, completed = state.completed_tasks, total = state.total_tasks, "task complete");
        Ok(state)
    }

    /// Enter `verifying` once every task is complete.
    pub async fn start_verify(&self, slug: &str) -> Result<SpecState> {
        let lock = self.slug_lock(slug).await;
        let mut runtime = lock.lock().await;

        let mut state = self.load(slug)?;
        require_phase(&state, SpecPhase::Implementing, "start_verify")?;
        if state.completed_tasks != state.total_tasks {
            return Err(CoordinatorError::Validation(format!(
                "cannot verify with {}/{} tasks complete",
                state.completed_tasks, state.total_tasks
            )));
        }
        state.phase = SpecPhase::Verifying;
        self.persist(&mut state)?;
        runtime.verdicts.clear();
        Ok(state)
    }

    /// Append a reviewer verdict to the current iteration set.
    pub async fn submit_verdict(&self, slug: &str, verdict: ReviewVerdict) -> Result<usize> {
        let lock = self.slug_lock(slug).await;
        let mut runtime = lock.lock().await;

        let state = self.load(slug)?;
        require_phase(&state, SpecPhase::Verifying, "submit_verdict")?;

        let verdict = ReviewVerdict {
            iteration: state.review_iteration,
            ..verdict
        };
        runtime.verdicts.push(verdict);
        Ok(runtime.verdicts.len())
    }

    /// Resolve the verify phase once the caller has collected all verdicts.
    ///
    /// All PASS → `learning` (with a worktree sync). Any FAIL within the
    /// iteration budget → `fixing` then straight back to `implementing`.
    /// Budget exhausted → `aborted` with reason `unfixed`.
    pub async fn resolve_verify(&self, slug: &str) -> Result<(SpecState, VerifyOutcome)> {
        let lock = self.slug_lock(slug).await;
        let mut runtime = lock.lock().await;

        let mut state = self.load(slug)?;
        require_phase(&state, SpecPhase::Verifying, "resolve_verify")?;
        if runtime.verdicts.is_empty() {
            return Err(CoordinatorError::Validation(
                "no verdicts submitted for this iteration".to_string(),
            ));
        }

        if verdict::aggregate(&runtime.verdicts) == Verdict::Pass {
            let state = self.enter_learning(&mut state, slug).await?;
            runtime.verdicts.clear();
            return Ok((state, VerifyOutcome::Passed));
        }

        if runtime.verdicts.iter().any(|v| v.verdict == Verdict::Fail)
            && state.review_iteration >= self.config.max_review_iterations
        {
            state.phase = SpecPhase::Aborted;
            state.abort_reason = Some(REASON_UNFIXED.to_string());
            self.persist(&mut state)?;
            warn!(slug = %slug, iterations = state.review_iteration, "fix loop exhausted");
            runtime.verdicts.clear();
            return Ok((state, VerifyOutcome::Exhausted));
        }

        // verifying → fixing → implementing; both transitions persist.
        state.phase = SpecPhase::Fixing;
        state.review_iteration += 1;
        self.persist(&mut state)?;
        state.phase = SpecPhase::Implementing;
        self.persist(&mut state)?;
        info!(slug = %slug, iteration = state.review_iteration, "entering fix loop");
        runtime.verdicts.clear();
        Ok((state, VerifyOutcome::FixLoop))
    }

    async fn enter_learning(&self, state: &mut SpecState, slug: &str) -> Result<SpecState> {
        // Worktree sync first; on failure the phase stays at verifying.
        self.sync_worktree(slug).await?;
        state.phase = SpecPhase::Learning;
        self.persist(state)?;
        Ok(state.clone())
    }

    async fn sync_worktree(&self, slug: &str) -> Result<SyncSummary> {
        Ok(self.worktrees.sync(slug).await?)
    }

    /// Explicit transition into `learning` (when the caller drives phases).
    pub async fn start_learn(&self, slug: &str) -> Result<SpecState> {
        let lock = self.slug_lock(slug).await;
        let _runtime = lock.lock().await;

        let mut state = self.load(slug)?;
        require_phase(&state, SpecPhase::Verifying, "start_learn")?;
        self.enter_learning(&mut state, slug).await
    }

    /// Finish the spec: clean the worktree, enter `done`, write a summary.
    pub async fn complete(&self, slug: &str) -> Result<SpecState> {
        let lock = self.slug_lock(slug).await;
        let _runtime = lock.lock().await;

        let mut state = self.load(slug)?;
        require_phase(&state, SpecPhase::Learning, "complete")?;

        self.worktrees
            .cleanup_sha8(slug, &state.worktree_sha8)
            .await?;

        state.phase = SpecPhase::Done;
        self.persist(&mut state)?;

        let summary = MemoryEvent::new(
            EventKind::Decision,
            format!(
                "spec {slug} done: {}/{} tasks, {} review iteration(s)",
                state.completed_tasks, state.total_tasks, state.review_iteration
            ),
        )
        .with_importance(0.6)
        .with_tags(vec!["orchestration".to_string(), slug.to_string()]);
        if let Err(e) = self.memory.save_event(&summary).await {
            warn!(slug = %slug, error = %e, "failed to record spec summary");
        }

        info!(slug = %slug, "spec complete");
        Ok(state)
    }

    /// Abort from any live phase. The worktree is left for the operator.
    pub async fn abort(&self, slug: &str, reason: Option<&str>) -> Result<SpecState> {
        let lock = self.slug_lock(slug).await;
        let mut runtime = lock.lock().await;

        let mut state = self.load(slug)?;
        if state.phase.is_terminal() {
            return Err(CoordinatorError::State {
                op: "abort".to_string(),
                phase: state.phase.as_str().to_string(),
            });
        }
        state.phase = SpecPhase::Aborted;
        state.abort_reason = Some(reason.unwrap_or("user_abort").to_string());
        self.persist(&mut state)?;
        runtime.verdicts.clear();
        warn!(slug = %slug, reason = %state.abort_reason.as_deref().unwrap_or(""), "spec aborted");
        Ok(state)
    }

    /// Worktree status for a spec, keyed by its recorded sha8.
    pub async fn worktree_status(
        &self,
        slug: &str,
        sha8: &str,
    ) -> Result<crate::worktree::WorktreeStatus> {
        Ok(self.worktrees.status_sha8(slug, sha8).await?)
    }

    /// Unified diff of the spec branch against its merge base.
    pub async fn worktree_diff(&self, slug: &str) -> Result<String> {
        Ok(self.worktrees.diff(slug).await?)
    }

    /// Stop-guard for session-exit probes.
    ///
    /// Busy iff any spec is implementing/verifying/fixing with a fresh
    /// `updated_at`; stale states never block an exit.
    pub fn is_busy(&self) -> bool {
        let horizon = Utc::now() - Duration::hours(i64::from(self.config.stale_busy_hours));
        self.list()
            .iter()
            .any(|s| s.phase.is_busy() && s.updated_at > horizon)
    }

    /// Advisory sizing of a spec. Pure: no state is touched.
    pub fn assess(&self, _slug: &str, files: &[String]) -> Complexity {
        let count = files.len();
        let distinct_dirs: usize = {
            let mut dirs: Vec<&str> = files
                .iter()
                .filter_map(|f| Path::new(f).parent().and_then(Path::to_str))
                .collect();
            dirs.sort_unstable();
            dirs.dedup();
            dirs.len()
        };
        match (count, distinct_dirs) {
            (0..=3, 0..=1) => Complexity::Simple,
            (0..=10, _) => Complexity::Standard,
            _ => Complexity::Complex,
        }
    }
}

fn slug_of(state: &SpecState) -> &str {
    &state.slug
}

fn require_phase(state: &SpecState, expected: SpecPhase, op: &str) -> Result<()> {
    if state.phase == expected {
        Ok(())
    } else {
        Err(CoordinatorError::State {
            op: op.to_string(),
            phase: state.phase.as_str().to_string(),
        })
    }
}
