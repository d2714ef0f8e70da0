//! Learning pipeline: pattern candidates, proposals, and decisions.
//!
//! Analyze reads version-control history, runs changes through the
//! syntactic analyzer and heuristic engine, and folds detections into
//! persistent candidates. Proposal generation applies the confidence,
//! cooldown, quota, and dedup filters; decisions write artifacts and feed
//! the prior-decision factor back into future confidence.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use aif_core::artifacts::{
    artifact_path, parse_frontmatter, render_artifact, rule_fingerprint, write_atomic,
    ArtifactFrontmatter,
};
use aif_core::config::Config;
use aif_core::fingerprint::slugify;
use aif_core::types::{
    CandidateStatus, CategorySource, Decision, Detection, EventKind, FailureCategory, HeuristicId,
    Id, MemoryEvent, PatternCandidate, Proposal, ProposalKind, ProposalStatus, RuleBaseline,
};
use chrono::{DateTime, Duration, Utc};
use sqlx::{Pool, Sqlite};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::analytics::AnalyticsStore;
use crate::git::{self, GitError};
use crate::heuristics::{ChangeWindow, ChangedFile, HeuristicEngine};
use crate::memory::MemoryStore;
use crate::storage::{self, StorageError};
use crate::syntactic::analyze_source;

const LEARNING_SQL: &str = include_str!("../../../migrations/learning.sql");

/// Window used when snapshotting a rule baseline.
const BASELINE_WINDOW_DAYS: u32 = 7;

/// Candidates below this many occurrences are not proposed, unless their
/// heuristic is meaningful in a single file.
const MIN_OCCURRENCES: u32 = 2;

#[derive(Debug, Error)]
pub enum LearningError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("git error: {0}")]
    Git(#[from] GitError),
    #[error("proposal not found: {0}")]
    ProposalNotFound(String),
    #[error("artifact error: {0}")]
    Artifact(#[from] aif_core::artifacts::ArtifactError),
    #[error("invalid decision: {0}")]
    InvalidDecision(String),
}

pub type Result<T> = std::result::Result<T, LearningError>;

/// Summary of one analyze pass.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct AnalyzeReport {
    pub commits_analyzed: usize,
    pub files_analyzed: usize,
    pub detections: usize,
    pub candidates_updated: usize,
    pub proposals_created: usize,
    pub skipped_warmup: bool,
    /// True when too few commits have landed since the last pass.
    pub skipped_trigger: bool,
}

/// Outcome of a decide call.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DecisionOutcome {
    pub proposal: Proposal,
    /// Written artifact, on accept.
    pub artifact_path: Option<String>,
    /// True when the proposal had already been decided; no side effects ran.
    pub already_decided: bool,
}

/// Persistent store over `learning.db`.
#[derive(Debug, Clone)]
pub struct LearningStore {
    pool: Pool<Sqlite>,
}

impl LearningStore {
    pub async fn open(db_path: &Path) -> Result<Self> {
        let pool = storage::open_pool(Some(db_path)).await?;
        storage::migrate(&pool, LEARNING_SQL).await?;
        Ok(Self { pool })
    }

    pub async fn open_in_memory() -> Result<Self> {
        let pool = storage::open_pool(None).await?;
        storage::migrate(&pool, LEARNING_SQL).await?;
        Ok(Self { pool })
    }

    /// The analytics tables live in the same database file.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    // --- Candidates ---

    /// Fold a detection into its candidate row.
    pub async fn upsert_candidate(
        &self,
        detection: &Detection,
        confidence: f64,
        now: DateTime<Utc>,
    ) -> Result<PatternCandidate> {
        let occurrences = detection.locations.len().max(1) as i64;
        let distinct = detection.distinct_files() as i64;
        let now_ms = now.timestamp_millis();

        sqlx::query(
            "INSERT INTO candidates (fingerprint, heuristic_id, first_seen, last_seen, \
             occurrence_count, distinct_files, confidence, cooldown_until, status, example_text) \
             VALUES (?1, ?2, ?3, ?3, ?4, ?5, ?6, NULL, 'new', ?7) \
             ON CONFLICT(fingerprint) DO UPDATE SET \
               last_seen = ?3, \
               occurrence_count = occurrence_count + ?4, \
               distinct_files = MAX(distinct_files, ?5), \
               confidence = ?6, \
               example_text = ?7",
        )
        .bind(&detection.fingerprint)
        .bind(detection.heuristic_id.as_str())
        .bind(now_ms)
        .bind(occurrences)
        .bind(distinct)
        .bind(confidence)
        .bind(&detection.example_text)
        .execute(&self.pool)
        .await?;

        self.get_candidate(&detection.fingerprint)
            .await?
            .ok_or_else(|| LearningError::ProposalNotFound(detection.fingerprint.clone()))
    }

    pub async fn get_candidate(&self, fingerprint: &str) -> Result<Option<PatternCandidate>> {
        let row = sqlx::query_as::<_, CandidateRow>(
            "SELECT fingerprint, heuristic_id, first_seen, last_seen, occurrence_count, \
             distinct_files, confidence, cooldown_until, status, example_text \
             FROM candidates WHERE fingerprint = ?1",
        )
        .bind(fingerprint)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(CandidateRow::into_candidate))
    }

    pub async fn list_candidates(&self) -> Result<Vec<PatternCandidate>> {
        let rows = sqlx::query_as::<_, CandidateRow>(
            "SELECT fingerprint, heuristic_id, first_seen, last_seen, occurrence_count, \
             distinct_files, confidence, cooldown_until, status, example_text \
             FROM candidates ORDER BY confidence DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(CandidateRow::into_candidate).collect())
    }

    pub async fn set_candidate_status(
        &self,
        fingerprint: &str,
        status: CandidateStatus,
    ) -> Result<()> {
        sqlx::query("UPDATE candidates SET status = ?1 WHERE fingerprint = ?2")
            .bind(status.as_str())
            .bind(fingerprint)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_cooldown(
        &self,
        fingerprint: &str,
        until: Option<DateTime<Utc>>,
    ) -> Result<()> {
        sqlx::query("UPDATE candidates SET cooldown_until = ?1 WHERE fingerprint = ?2")
            .bind(until.map(|t| t.timestamp_millis()))
            .bind(fingerprint)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // --- Prior decision factor ---

    /// Factor starts at 1.0, rises toward 1.5 on accepts, falls toward 0.5
    /// on rejects; ignores nudge down by a smaller step.
    pub async fn prior_factor(&self, fingerprint: &str) -> Result<f64> {
        let row: Option<(f64,)> =
            sqlx::query_as("SELECT factor FROM decision_history WHERE fingerprint = ?1")
                .bind(fingerprint)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map_or(1.0, |r| r.0))
    }

    pub async fn apply_decision_factor(&self, fingerprint: &str, decision: Decision) -> Result<f64> {
        let current = self.prior_factor(fingerprint).await?;
        let (delta, accepts, rejects, ignores) = match decision {
            Decision::Accept => (0.25, 1, 0, 0),
            Decision::Reject => (-0.25, 0, 1, 0),
            Decision::Ignore => (-0.10, 0, 0, 1),
            Decision::Snooze => (0.0, 0, 0, 0),
        };
        let updated = (current + delta).clamp(0.5, 1.5);
        sqlx::query(
            "INSERT INTO decision_history (fingerprint, factor, accepts, rejects, ignores, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
             ON CONFLICT(fingerprint) DO UPDATE SET \
               factor = ?2, accepts = accepts + ?3, rejects = rejects + ?4, \
               ignores = ignores + ?5, updated_at = ?6",
        )
        .bind(fingerprint)
        .bind(updated)
        .bind(accepts)
        .bind(rejects)
        .bind(ignores)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(updated)
    }

    // --- Proposals ---

    pub async fn insert_proposal(&self, proposal: &Proposal) -> Result<()> {
        sqlx::query(
            "INSERT INTO proposals (proposal_id, candidate_fingerprint, kind, title, rationale, \
             proposed_content, confidence, status, created_at, decided_at, edited_content) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, NULL, NULL)",
        )
        .bind(proposal.proposal_id.as_ref())
        .bind(&proposal.candidate_fingerprint)
        .bind(proposal.kind.as_str())
        .bind(&proposal.title)
        .bind(&proposal.rationale)
        .bind(&proposal.proposed_content)
        .bind(proposal.confidence)
        .bind(proposal.status.as_str())
        .bind(proposal.created_at.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_proposal(&self, proposal_id: &str) -> Result<Proposal> {
        let row = sqlx::query_as::<_, ProposalRow>(
            "SELECT proposal_id, candidate_fingerprint, kind, title, rationale, proposed_content, \
             confidence, status, created_at, decided_at, edited_content \
             FROM proposals WHERE proposal_id = ?1",
        )
        .bind(proposal_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| LearningError::ProposalNotFound(proposal_id.to_string()))?;
        Ok(row.into_proposal())
    }

    pub async fn list_proposals(
        &self,
        max_count: u32,
        min_confidence: f64,
        pending_only: bool,
    ) -> Result<Vec<Proposal>> {
        let rows = if pending_only {
            sqlx::query_as::<_, ProposalRow>(
                "SELECT proposal_id, candidate_fingerprint, kind, title, rationale, \
                 proposed_content, confidence, status, created_at, decided_at, edited_content \
                 FROM proposals WHERE status = 'pending' AND confidence >= ?1 \
                 ORDER BY confidence DESC LIMIT ?2",
            )
            .bind(min_confidence)
            .bind(i64::from(max_count))
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query_as::<_, ProposalRow>(
                "SELECT proposal_id, candidate_fingerprint, kind, title, rationale, \
                 proposed_content, confidence, status, created_at, decided_at, edited_content \
                 FROM proposals WHERE confidence >= ?1 \
                 ORDER BY created_at DESC LIMIT ?2",
            )
            .bind(min_confidence)
            .bind(i64::from(max_count))
            .fetch_all(&self.pool)
            .await?
        };
        Ok(rows.into_iter().map(ProposalRow::into_proposal).collect())
    }

    async fn mark_decided(
        &self,
        proposal_id: &str,
        status: ProposalStatus,
        edited_content: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE proposals SET status = ?1, decided_at = ?2, edited_content = ?3 \
             WHERE proposal_id = ?4",
        )
        .bind(status.as_str())
        .bind(Utc::now().timestamp_millis())
        .bind(edited_content)
        .bind(proposal_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn has_pending_for_fingerprint(&self, fingerprint: &str) -> Result<bool> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT 1 FROM proposals WHERE candidate_fingerprint = ?1 AND status = 'pending' LIMIT 1",
        )
        .bind(fingerprint)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    // --- Baselines & analysis state ---

    pub async fn insert_baseline(&self, baseline: &RuleBaseline) -> Result<()> {
        sqlx::query(
            "INSERT INTO rule_baselines (baseline_id, proposal_id, category, \
             baseline_failures_per_day, baseline_window_days, created_at, category_source) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(&baseline.baseline_id)
        .bind(baseline.proposal_id.as_ref())
        .bind(baseline.category.as_str())
        .bind(baseline.baseline_failures_per_day)
        .bind(i64::from(baseline.baseline_window_days))
        .bind(baseline.created_at.timestamp_millis())
        .bind(baseline.category_source.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_baselines(&self) -> Result<Vec<RuleBaseline>> {
        let rows: Vec<(String, String, String, f64, i64, i64, String)> = sqlx::query_as(
            "SELECT baseline_id, proposal_id, category, baseline_failures_per_day, \
             baseline_window_days, created_at, category_source FROM rule_baselines \
             ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(id, pid, cat, rate, window, created, source)| RuleBaseline {
                baseline_id: id,
                proposal_id: Id::from_string(pid),
                category: FailureCategory::parse(&cat),
                baseline_failures_per_day: rate,
                baseline_window_days: window as u32,
                created_at: DateTime::from_timestamp_millis(created).unwrap_or_default(),
                category_source: if source == "manual" {
                    CategorySource::Manual
                } else {
                    CategorySource::Heuristic
                },
            })
            .collect())
    }

    /// (last analyzed head, first run timestamp); initializes on first call.
    pub async fn analysis_state(&self, now: DateTime<Utc>) -> Result<(Option<String>, DateTime<Utc>)> {
        let row: Option<(Option<String>, i64)> =
            sqlx::query_as("SELECT last_analyzed_head, first_run_at FROM analysis_state WHERE id = 1")
                .fetch_optional(&self.pool)
                .await?;
        match row {
            Some((head, first_run)) => Ok((
                head,
                DateTime::from_timestamp_millis(first_run).unwrap_or(now),
            )),
            None => {
                sqlx::query(
                    "INSERT INTO analysis_state (id, last_analyzed_head, first_run_at, updated_at) \
                     VALUES (1, NULL, ?1, ?1)",
                )
                .bind(now.timestamp_millis())
                .execute(&self.pool)
                .await?;
                Ok((None, now))
            }
        }
    }

    pub async fn set_last_analyzed_head(&self, head: &str) -> Result<()> {
        sqlx::query(
            "UPDATE analysis_state SET last_analyzed_head = ?1, updated_at = ?2 WHERE id = 1",
        )
        .bind(head)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// The full pipeline over one git root.
#[derive(Debug)]
pub struct LearningPipeline {
    pub store: LearningStore,
    analytics: AnalyticsStore,
    memory: MemoryStore,
    git_root: PathBuf,
    engine: HeuristicEngine,
    /// Serializes decide() and project-graph read-modify-write.
    decide_lock: Mutex<()>,
}

impl LearningPipeline {
    pub fn new(store: LearningStore, memory: MemoryStore, git_root: &Path) -> Self {
        let analytics = AnalyticsStore::new(store.pool().clone());
        Self {
            store,
            analytics,
            memory,
            git_root: git_root.to_path_buf(),
            engine: HeuristicEngine::default(),
            decide_lock: Mutex::new(()),
        }
    }

    pub fn analytics(&self) -> &AnalyticsStore {
        &self.analytics
    }

    /// Analyze commits since the last run (or `since_commit`), fold
    /// detections into candidates, and generate proposals.
    ///
    /// Per-file analyzer errors are logged and skipped; the pass never
    /// fails because one file would not parse.
    pub async fn analyze(&self, config: &Config, since_commit: Option<&str>) -> Result<AnalyzeReport> {
        let now = Utc::now();
        let mut report = AnalyzeReport::default();

        let (stored_head, first_run) = self.store.analysis_state(now).await?;
        let head = git::current_head(&self.git_root).await?;

        let since = since_commit
            .map(ToString::to_string)
            .or(stored_head)
            .filter(|s| s != &head);

        // Hook-triggered passes wait for enough commits to accumulate; an
        // explicit since_commit always analyzes.
        if since_commit.is_none() {
            if let Some(since) = &since {
                let count = git::commits_since(&self.git_root, since).await?;
                if (count as u32) < config.learning.commits_per_trigger {
                    report.commits_analyzed = count;
                    report.skipped_trigger = true;
                    return Ok(report);
                }
            }
        }

        let window = match &since {
            Some(since) => {
                report.commits_analyzed = git::commits_since(&self.git_root, since).await?;
                self.build_window(since, now).await?
            }
            None => ChangeWindow::default(),
        };
        report.files_analyzed = window.files.len();

        let detections = self.engine.detect(&window);
        report.detections = detections.len();

        for detection in &detections {
            let prior = self.store.prior_factor(&detection.fingerprint).await?;
            let consistency = consistency_of(detection, &window);
            let conf = crate::heuristics::confidence(
                detection.heuristic_id,
                consistency,
                window.newest_commit_age_days,
                detection.distinct_files() as u32,
                prior,
            );
            self.store.upsert_candidate(detection, conf, now).await?;
            report.candidates_updated += 1;
        }

        self.store.set_last_analyzed_head(&head).await?;

        // Warmup: observe, but do not propose yet.
        let warmup = Duration::hours(i64::from(config.learning.warmup_hours));
        if now - first_run < warmup && config.learning.warmup_hours > 0 {
            info!(warmup_hours = config.learning.warmup_hours, "within warmup, skipping proposals");
            report.skipped_warmup = true;
            return Ok(report);
        }

        report.proposals_created = self.generate(config, now).await?;
        Ok(report)
    }

    async fn build_window(&self, since: &str, now: DateTime<Utc>) -> Result<ChangeWindow> {
        let mut added: HashMap<String, Vec<(u32, String)>> = HashMap::new();
        let mut new_files: Vec<String> = Vec::new();
        let mut newest_age_days = f64::MAX;

        let entries = git::log(&self.git_root, Some(since), 200).await?;
        for entry in &entries {
            if let Ok(age) = DateTime::parse_from_rfc3339(&entry.timestamp) {
                let days = (now - age.with_timezone(&Utc)).num_seconds() as f64 / 86_400.0;
                newest_age_days = newest_age_days.min(days.max(0.0));
            }
            match git::diff_hunks(&self.git_root, &entry.sha).await {
                Ok(hunks) => {
                    for hunk in hunks {
                        let lines = added.entry(hunk.file.clone()).or_default();
                        for (offset, line) in hunk.added_lines.iter().enumerate() {
                            lines.push((hunk.start_line + offset as u32, line.clone()));
                        }
                    }
                }
                Err(e) => warn!(sha = %entry.sha, error = %e, "skipping unreadable commit"),
            }
        }

        // Status letters tell us which files are new in the window.
        let range = format!("{since}..HEAD");
        if let Ok(out) = git::run_git(&["diff", "--name-status", &range], &self.git_root).await {
            for line in out.stdout.lines() {
                let mut parts = line.split_whitespace();
                if parts.next() == Some("A") {
                    if let Some(path) = parts.next() {
                        new_files.push(path.to_string());
                    }
                }
            }
        }

        let repo_files = git::run_git(&["ls-files"], &self.git_root)
            .await
            .map(|out| out.stdout.lines().map(ToString::to_string).collect())
            .unwrap_or_default();

        let mut files = Vec::new();
        for (path, added_lines) in added {
            let full = self.git_root.join(&path);
            let content = match std::fs::read_to_string(&full) {
                Ok(content) => content,
                Err(_) => {
                    // Deleted since, or binary; shapes come up empty.
                    String::new()
                }
            };
            let shapes = analyze_source(&path, &content);
            files.push(ChangedFile {
                is_new: new_files.contains(&path),
                path,
                shapes,
                added_lines,
            });
        }
        files.sort_by(|a, b| a.path.cmp(&b.path));

        Ok(ChangeWindow {
            files,
            repo_files,
            newest_commit_age_days: if newest_age_days == f64::MAX {
                0.0
            } else {
                newest_age_days
            },
        })
    }

    /// Generate up to `max_proposals_per_session` proposals from candidates.
    pub async fn generate(&self, config: &Config, now: DateTime<Utc>) -> Result<usize> {
        let min_confidence = config.min_confidence();
        let quota = config.learning.max_proposals_per_session as usize;
        let existing_rules = self.existing_rule_fingerprints();

        let mut created = 0usize;
        for candidate in self.store.list_candidates().await? {
            if created >= quota {
                break;
            }
            if candidate.status == CandidateStatus::Superseded {
                continue;
            }
            if candidate.confidence < min_confidence {
                continue;
            }
            if candidate.occurrence_count < MIN_OCCURRENCES
                && !candidate.heuristic_id.single_file_ok()
            {
                continue;
            }
            if candidate.distinct_files < 2 && !candidate.heuristic_id.single_file_ok() {
                continue;
            }
            if let Some(until) = candidate.cooldown_until {
                if until > now {
                    continue;
                }
            }
            if existing_rules.contains(&candidate.fingerprint) {
                continue;
            }
            if self
                .store
                .has_pending_for_fingerprint(&candidate.fingerprint)
                .await?
            {
                continue;
            }

            let proposal = build_proposal(&candidate, now)?;
            self.store.insert_proposal(&proposal).await?;
            self.store
                .set_candidate_status(&candidate.fingerprint, CandidateStatus::Proposed)
                .await?;
            created += 1;
        }

        if created > 0 {
            info!(count = created, "generated proposals");
        }
        Ok(created)
    }

    /// Fingerprints of rule files already on disk, from their frontmatter.
    fn existing_rule_fingerprints(&self) -> Vec<String> {
        let rules_dir = self.git_root.join(".claude/rules");
        let Ok(entries) = std::fs::read_dir(&rules_dir) else {
            return Vec::new();
        };
        entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().and_then(|x| x.to_str()) == Some("md"))
            .filter_map(|e| std::fs::read_to_string(e.path()).ok())
            .filter_map(|content| parse_frontmatter(&content).ok())
            .map(|(frontmatter, _)| rule_fingerprint(&frontmatter))
            .collect()
    }

    /// Apply a user decision. Idempotent: deciding an already-decided
    /// proposal returns the prior outcome without side effects.
    pub async fn decide(
        &self,
        config: &Config,
        proposal_id: &str,
        decision: Decision,
        edited_content: Option<String>,
    ) -> Result<DecisionOutcome> {
        let _guard = self.decide_lock.lock().await;

        let proposal = self.store.get_proposal(proposal_id).await?;
        if proposal.status.is_decided() {
            let artifact = (proposal.status == ProposalStatus::Accepted).then(|| {
                artifact_path(&self.git_root, proposal.kind, &artifact_slug(&proposal))
                    .to_string_lossy()
                    .to_string()
            });
            return Ok(DecisionOutcome {
                proposal,
                artifact_path: artifact,
                already_decided: true,
            });
        }

        let outcome = match decision {
            Decision::Accept => self.accept(config, &proposal, edited_content).await?,
            Decision::Reject | Decision::Ignore => {
                let until = Utc::now() + Duration::days(i64::from(config.learning.cooldown_days));
                self.store
                    .set_cooldown(&proposal.candidate_fingerprint, Some(until))
                    .await?;
                self.store
                    .apply_decision_factor(&proposal.candidate_fingerprint, decision)
                    .await?;
                self.store
                    .mark_decided(proposal_id, decision.resulting_status(), None)
                    .await?;

                let kind = if decision == Decision::Reject {
                    EventKind::RejectedPattern
                } else {
                    EventKind::Event
                };
                let event = MemoryEvent::new(
                    kind,
                    format!("{} proposal: {}", decision.as_str(), proposal.title),
                )
                .with_importance(0.5)
                .with_tags(vec!["learning".to_string()]);
                if let Err(e) = self.memory.save_event(&event).await {
                    warn!(error = %e, "failed to record decision event");
                }

                DecisionOutcome {
                    proposal: self.store.get_proposal(proposal_id).await?,
                    artifact_path: None,
                    already_decided: false,
                }
            }
            Decision::Snooze => {
                self.store
                    .mark_decided(proposal_id, ProposalStatus::Snoozed, None)
                    .await?;
                DecisionOutcome {
                    proposal: self.store.get_proposal(proposal_id).await?,
                    artifact_path: None,
                    already_decided: false,
                }
            }
        };

        Ok(outcome)
    }

    async fn accept(
        &self,
        _config: &Config,
        proposal: &Proposal,
        edited_content: Option<String>,
    ) -> Result<DecisionOutcome> {
        let slug = artifact_slug(proposal);
        let path = artifact_path(&self.git_root, proposal.kind, &slug);
        let content = edited_content
            .as_deref()
            .unwrap_or(&proposal.proposed_content);

        if proposal.kind == ProposalKind::ProjectGraph {
            self.merge_project_graph(&path, content)?;
        } else {
            write_atomic(&path, content.as_bytes())?;
        }

        let rel_path = path
            .strip_prefix(&self.git_root)
            .unwrap_or(&path)
            .to_string_lossy()
            .to_string();

        let event = MemoryEvent::new(
            EventKind::Decision,
            format!("accepted proposal: {}", proposal.title),
        )
        .with_importance(0.7)
        .with_tags(vec!["learning".to_string()])
        .with_ref("artifact_path", rel_path.clone());
        if let Err(e) = self.memory.save_event(&event).await {
            warn!(error = %e, "failed to record acceptance event");
        }

        // Snapshot the failure rate in the rule's domain.
        let category = category_for(proposal);
        let rate = self
            .analytics
            .failures_per_day(category, BASELINE_WINDOW_DAYS)
            .await
            .unwrap_or(0.0);
        let baseline = RuleBaseline::new(
            proposal.proposal_id.clone(),
            category,
            rate,
            BASELINE_WINDOW_DAYS,
            CategorySource::Heuristic,
        );
        self.store.insert_baseline(&baseline).await?;

        self.store
            .apply_decision_factor(&proposal.candidate_fingerprint, Decision::Accept)
            .await?;
        // An accepted artifact supersedes its candidate.
        self.store
            .set_candidate_status(&proposal.candidate_fingerprint, CandidateStatus::Superseded)
            .await?;
        self.store
            .mark_decided(
                proposal.proposal_id.as_ref(),
                ProposalStatus::Accepted,
                edited_content.as_deref(),
            )
            .await?;

        info!(proposal = %proposal.proposal_id, path = %rel_path, "artifact written");
        Ok(DecisionOutcome {
            proposal: self.store.get_proposal(proposal.proposal_id.as_ref()).await?,
            artifact_path: Some(rel_path),
            already_decided: false,
        })
    }

    /// Read-modify-write of project-graph.json; unknown keys preserved.
    /// Serialized by the decide lock, written atomically.
    fn merge_project_graph(&self, path: &Path, content: &str) -> Result<()> {
        let incoming: serde_json::Value = serde_json::from_str(content)?;
        let mut current: serde_json::Value = std::fs::read_to_string(path)
            .ok()
            .and_then(|c| serde_json::from_str(&c).ok())
            .unwrap_or_else(|| serde_json::json!({}));

        if let (Some(current_map), Some(incoming_map)) =
            (current.as_object_mut(), incoming.as_object())
        {
            for (key, value) in incoming_map {
                current_map.insert(key.clone(), value.clone());
            }
        }
        write_atomic(path, serde_json::to_string_pretty(&current)?.as_bytes())?;
        Ok(())
    }

    /// Stats for the learning surface.
    pub async fn stats(&self) -> Result<serde_json::Value> {
        let candidates = self.store.list_candidates().await?;
        let proposals = self.store.list_proposals(1000, 0.0, false).await?;
        let mut by_status: HashMap<&str, usize> = HashMap::new();
        for p in &proposals {
            *by_status.entry(p.status.as_str()).or_default() += 1;
        }
        Ok(serde_json::json!({
            "candidates": candidates.len(),
            "proposals": proposals.len(),
            "proposals_by_status": by_status,
        }))
    }
}

/// Share of occurrences that agree with the detected pattern.
fn consistency_of(detection: &Detection, window: &ChangeWindow) -> f64 {
    match detection.heuristic_id {
        // Peer-share evidence when present, else full consistency.
        HeuristicId::H2 => detection
            .raw_evidence
            .get("peer_share")
            .and_then(serde_json::Value::as_f64)
            .unwrap_or(1.0),
        HeuristicId::H3 => {
            let total = window
                .files
                .iter()
                .map(|f| f.shapes.functions.len())
                .sum::<usize>()
                .max(1);
            (detection.locations.len() as f64 / total as f64).clamp(0.0, 1.0)
        }
        _ => 1.0,
    }
}

fn category_for(proposal: &Proposal) -> FailureCategory {
    // The candidate fingerprint embeds the heuristic only indirectly, so
    // kind carries the mapping.
    match proposal.kind {
        ProposalKind::Rule => FailureCategory::Lint,
        ProposalKind::Adr => FailureCategory::Build,
        ProposalKind::Skill => FailureCategory::Test,
        ProposalKind::Template | ProposalKind::ProjectGraph => FailureCategory::Other,
    }
}

fn artifact_slug(proposal: &Proposal) -> String {
    let base = slugify(&proposal.title);
    if base.is_empty() {
        format!("proposal-{}", &proposal.candidate_fingerprint[..8.min(proposal.candidate_fingerprint.len())])
    } else {
        base
    }
}

fn kind_for(heuristic: HeuristicId) -> ProposalKind {
    match heuristic {
        HeuristicId::H1 | HeuristicId::H3 | HeuristicId::H4 | HeuristicId::H5 => ProposalKind::Rule,
        HeuristicId::H2 => ProposalKind::Adr,
        HeuristicId::H6 => ProposalKind::Skill,
        HeuristicId::H7 => ProposalKind::Template,
    }
}

fn title_for(candidate: &PatternCandidate) -> String {
    let fp8: String = candidate.fingerprint.chars().take(8).collect();
    match candidate.heuristic_id {
        HeuristicId::H1 => format!("Extract repeated pattern {fp8}"),
        HeuristicId::H2 => format!("Adopt standard pattern {fp8}"),
        HeuristicId::H3 => format!("Unify inconsistent pattern {fp8}"),
        HeuristicId::H4 => format!("Harden security shape {fp8}"),
        HeuristicId::H5 => format!("Avoid performance shape {fp8}"),
        HeuristicId::H6 => format!("Add tests for new files {fp8}"),
        HeuristicId::H7 => format!("Document new modules {fp8}"),
    }
}

/// Deterministic candidate → proposal mapping.
fn build_proposal(candidate: &PatternCandidate, now: DateTime<Utc>) -> Result<Proposal> {
    let kind = kind_for(candidate.heuristic_id);
    let title = title_for(candidate);
    let rationale = format!(
        "Seen {} time(s) across {} file(s) since {}. Example: {}",
        candidate.occurrence_count,
        candidate.distinct_files,
        candidate.first_seen.format("%Y-%m-%d"),
        truncate(&candidate.example_text, 160),
    );

    let proposal_id = Id::new();
    let frontmatter = ArtifactFrontmatter::new(
        slugify(&title),
        rationale.clone(),
        vec![candidate.heuristic_id.as_str().to_lowercase()],
        &proposal_id,
    );
    let body = format!(
        "# {title}\n\n{rationale}\n\n## Guidance\n\n\
         When this pattern appears, follow the repository convention instead \
         of re-deriving it:\n\n```\n{}\n```\n",
        truncate(&candidate.example_text, 400),
    );
    let proposed_content = if kind == ProposalKind::ProjectGraph {
        serde_json::to_string_pretty(&serde_json::json!({
            "patterns": { candidate.fingerprint.clone(): {
                "heuristic": candidate.heuristic_id.as_str(),
                "occurrences": candidate.occurrence_count,
            }}
        }))?
    } else {
        render_artifact(&frontmatter, &body)?
    };

    Ok(Proposal {
        proposal_id,
        candidate_fingerprint: candidate.fingerprint.clone(),
        kind,
        title,
        rationale,
        proposed_content,
        confidence: candidate.confidence,
        status: ProposalStatus::Pending,
        created_at: now,
        decided_at: None,
        edited_content: None,
    })
}

fn truncate(s: &str, max: usize) -> String {
    let truncated: String = s.chars().take(max).collect();
    truncated
}

// --- Row types ---

#[derive(sqlx::FromRow)]
struct CandidateRow {
    fingerprint: String,
    heuristic_id: String,
    first_seen: i64,
    last_seen: i64,
    occurrence_count: i64,
    distinct_files: i64,
    confidence: f64,
    cooldown_until: Option<i64>,
    status: String,
    example_text: String,
}

impl CandidateRow {
    fn into_candidate(self) -> PatternCandidate {
        PatternCandidate {
            fingerprint: self.fingerprint,
            heuristic_id: HeuristicId::parse(&self.heuristic_id).unwrap_or(HeuristicId::H1),
            first_seen: DateTime::from_timestamp_millis(self.first_seen).unwrap_or_default(),
            last_seen: DateTime::from_timestamp_millis(self.last_seen).unwrap_or_default(),
            occurrence_count: self.occurrence_count as u32,
            distinct_files: self.distinct_files as u32,
            confidence: self.confidence,
            cooldown_until: self.cooldown_until.and_then(DateTime::from_timestamp_millis),
            status: CandidateStatus::parse(&self.status),
            example_text: self.example_text,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ProposalRow {
    proposal_id: String,
    candidate_fingerprint: String,
    kind: String,
    title: String,
    rationale: String,
    proposed_content: String,
    confidence: f64,
    status: String,
    created_at: i64,
    decided_at: Option<i64>,
    edited_content: Option<String>,
}

impl ProposalRow {
    fn into_proposal(self) -> Proposal {
        Proposal {
            proposal_id: Id::from_string(self.proposal_id),
            candidate_fingerprint: self.candidate_fingerprint,
            kind: ProposalKind::parse(&self.kind).unwrap_or(ProposalKind::Rule),
            title: self.title,
            rationale: self.rationale,
            proposed_content: self.proposed_content,
            confidence: self.confidence,
            status: ProposalStatus::parse(&self.status),
            created_at: DateTime::from_timestamp_millis(self.created_at).unwrap_or_default(),
            decided_at: self.decided_at.and_then(DateTime::from_timestamp_millis),
            edited_content: self.edited_content,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aif_core::types::CodeLocation;
    use tempfile::TempDir;

    fn detection(fingerprint: &str, heuristic: HeuristicId, files: &[&str]) -> Detection {
        Detection {
            heuristic_id: heuristic,
            locations: files
                .iter()
                .map(|f| CodeLocation {
                    file: (*f).to_string(),
                    line: 1,
                })
                .collect(),
            fingerprint: fingerprint.to_string(),
            example_text: "example line".to_string(),
            raw_evidence: serde_json::Value::Null,
        }
    }

    async fn pipeline(dir: &TempDir) -> LearningPipeline {
        let store = LearningStore::open_in_memory().await.unwrap();
        let memory = MemoryStore::open_in_memory().await.unwrap();
        LearningPipeline::new(store, memory, dir.path())
    }

    fn config_no_warmup() -> Config {
        let mut config = Config::default();
        config.learning.warmup_hours = 0;
        config
    }

    async fn seed_candidate(
        pipeline: &LearningPipeline,
        fingerprint: &str,
        heuristic: HeuristicId,
        confidence: f64,
    ) -> PatternCandidate {
        let det = detection(fingerprint, heuristic, &["a.py", "b.py", "c.py"]);
        pipeline
            .store
            .upsert_candidate(&det, confidence, Utc::now())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn upsert_candidate_accumulates_occurrences() {
        let dir = TempDir::new().unwrap();
        let p = pipeline(&dir).await;
        let det = detection("fp-1", HeuristicId::H1, &["a.py", "b.py", "c.py"]);

        let first = p.store.upsert_candidate(&det, 0.6, Utc::now()).await.unwrap();
        assert_eq!(first.occurrence_count, 3);
        assert_eq!(first.distinct_files, 3);

        let second = p.store.upsert_candidate(&det, 0.7, Utc::now()).await.unwrap();
        assert_eq!(second.occurrence_count, 6);
        assert_eq!(second.distinct_files, 3);
        assert!((second.confidence - 0.7).abs() < 1e-9);
        assert_eq!(second.first_seen, first.first_seen);
    }

    #[tokio::test]
    async fn generate_respects_quota_and_confidence() {
        let dir = TempDir::new().unwrap();
        let p = pipeline(&dir).await;
        for i in 0..5 {
            seed_candidate(&p, &format!("fp-{i}"), HeuristicId::H1, 0.8).await;
        }
        seed_candidate(&p, "fp-low", HeuristicId::H1, 0.2).await;

        let created = p.generate(&config_no_warmup(), Utc::now()).await.unwrap();
        assert_eq!(created, 3); // max_proposals_per_session default

        let pending = p.store.list_proposals(10, 0.0, true).await.unwrap();
        assert_eq!(pending.len(), 3);
        assert!(pending.iter().all(|prop| prop.confidence >= 0.5));
    }

    #[tokio::test]
    async fn generate_skips_single_file_unless_exempt() {
        let dir = TempDir::new().unwrap();
        let p = pipeline(&dir).await;

        let single = detection("fp-single", HeuristicId::H1, &["only.py"]);
        p.store.upsert_candidate(&single, 0.9, Utc::now()).await.unwrap();

        let security = detection("fp-sec", HeuristicId::H4, &["only.py"]);
        p.store.upsert_candidate(&security, 0.9, Utc::now()).await.unwrap();

        let created = p.generate(&config_no_warmup(), Utc::now()).await.unwrap();
        assert_eq!(created, 1);
        let pending = p.store.list_proposals(10, 0.0, true).await.unwrap();
        assert_eq!(pending[0].kind, ProposalKind::Rule);
        assert_eq!(pending[0].candidate_fingerprint, "fp-sec");
    }

    #[tokio::test]
    async fn accept_writes_artifact_event_and_baseline() {
        let dir = TempDir::new().unwrap();
        let p = pipeline(&dir).await;
        seed_candidate(&p, "fp-acc", HeuristicId::H1, 0.8).await;
        let config = config_no_warmup();
        p.generate(&config, Utc::now()).await.unwrap();
        let proposal = p.store.list_proposals(1, 0.0, true).await.unwrap().remove(0);

        let outcome = p
            .decide(&config, proposal.proposal_id.as_ref(), Decision::Accept, None)
            .await
            .unwrap();
        assert!(!outcome.already_decided);
        assert_eq!(outcome.proposal.status, ProposalStatus::Accepted);

        let artifact = outcome.artifact_path.unwrap();
        assert!(artifact.starts_with(".claude/rules/learning-"));
        assert!(dir.path().join(&artifact).exists());

        // Memory event with importance 0.7 and the artifact ref.
        let hits = p.memory.search("accepted proposal", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!((hits[0].event.importance - 0.7).abs() < 1e-9);
        assert_eq!(
            hits[0].event.refs.get("artifact_path").map(String::as_str),
            Some(artifact.as_str())
        );

        // Baseline row landed with heuristic source.
        let baselines = p.store.list_baselines().await.unwrap();
        assert_eq!(baselines.len(), 1);
        assert_eq!(baselines[0].category_source, CategorySource::Heuristic);
        assert_eq!(baselines[0].baseline_window_days, 7);

        // Factor rose for the fingerprint.
        assert!((p.store.prior_factor("fp-acc").await.unwrap() - 1.25).abs() < 1e-9);
    }

    #[tokio::test]
    async fn decide_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let p = pipeline(&dir).await;
        seed_candidate(&p, "fp-idem", HeuristicId::H1, 0.8).await;
        let config = config_no_warmup();
        p.generate(&config, Utc::now()).await.unwrap();
        let proposal = p.store.list_proposals(1, 0.0, true).await.unwrap().remove(0);
        let id = proposal.proposal_id.to_string();

        p.decide(&config, &id, Decision::Reject, None).await.unwrap();
        let factor_after_first = p.store.prior_factor("fp-idem").await.unwrap();

        // Second decide returns prior outcome; no double factor decrement.
        let outcome = p.decide(&config, &id, Decision::Accept, None).await.unwrap();
        assert!(outcome.already_decided);
        assert_eq!(outcome.proposal.status, ProposalStatus::Rejected);
        assert!((p.store.prior_factor("fp-idem").await.unwrap() - factor_after_first).abs() < 1e-9);
    }

    #[tokio::test]
    async fn reject_sets_cooldown_blocking_regeneration() {
        let dir = TempDir::new().unwrap();
        let p = pipeline(&dir).await;
        seed_candidate(&p, "fp-cool", HeuristicId::H1, 0.8).await;
        let config = config_no_warmup();
        p.generate(&config, Utc::now()).await.unwrap();
        let proposal = p.store.list_proposals(1, 0.0, true).await.unwrap().remove(0);

        p.decide(&config, proposal.proposal_id.as_ref(), Decision::Reject, None)
            .await
            .unwrap();

        // Six days later: still cooling down, nothing is generated.
        let at_6d = Utc::now() + Duration::days(6);
        assert_eq!(p.generate(&config, at_6d).await.unwrap(), 0);

        // Eight days later: eligible again, with the reduced prior factor.
        let at_8d = Utc::now() + Duration::days(8);
        assert_eq!(p.generate(&config, at_8d).await.unwrap(), 1);
        assert!((p.store.prior_factor("fp-cool").await.unwrap() - 0.75).abs() < 1e-9);
    }

    #[tokio::test]
    async fn snooze_changes_nothing_but_status() {
        let dir = TempDir::new().unwrap();
        let p = pipeline(&dir).await;
        seed_candidate(&p, "fp-snz", HeuristicId::H1, 0.8).await;
        let config = config_no_warmup();
        p.generate(&config, Utc::now()).await.unwrap();
        let proposal = p.store.list_proposals(1, 0.0, true).await.unwrap().remove(0);

        let outcome = p
            .decide(&config, proposal.proposal_id.as_ref(), Decision::Snooze, None)
            .await
            .unwrap();
        assert_eq!(outcome.proposal.status, ProposalStatus::Snoozed);
        assert!((p.store.prior_factor("fp-snz").await.unwrap() - 1.0).abs() < 1e-9);
        let candidate = p.store.get_candidate("fp-snz").await.unwrap().unwrap();
        assert!(candidate.cooldown_until.is_none());
    }

    #[tokio::test]
    async fn accept_with_edited_content_substitutes() {
        let dir = TempDir::new().unwrap();
        let p = pipeline(&dir).await;
        seed_candidate(&p, "fp-edit", HeuristicId::H1, 0.8).await;
        let config = config_no_warmup();
        p.generate(&config, Utc::now()).await.unwrap();
        let proposal = p.store.list_proposals(1, 0.0, true).await.unwrap().remove(0);

        let edited = "---\nname: edited\ndescription: d\nsource: learning\nproposal_id: x\n---\n\n# Edited\n";
        let outcome = p
            .decide(
                &config,
                proposal.proposal_id.as_ref(),
                Decision::Accept,
                Some(edited.to_string()),
            )
            .await
            .unwrap();
        let written =
            std::fs::read_to_string(dir.path().join(outcome.artifact_path.unwrap())).unwrap();
        assert!(written.contains("# Edited"));
    }

    #[tokio::test]
    async fn existing_rule_fingerprint_suppresses_generation() {
        let dir = TempDir::new().unwrap();
        let p = pipeline(&dir).await;
        let config = config_no_warmup();

        seed_candidate(&p, "fp-dup", HeuristicId::H1, 0.8).await;
        p.generate(&config, Utc::now()).await.unwrap();
        let proposal = p.store.list_proposals(1, 0.0, true).await.unwrap().remove(0);
        p.decide(&config, proposal.proposal_id.as_ref(), Decision::Accept, None)
            .await
            .unwrap();

        // The same fingerprint resurfaces as a fresh candidate; the rule on
        // disk keeps it from being proposed again.
        let rule_file = std::fs::read_dir(dir.path().join(".claude/rules"))
            .unwrap()
            .next()
            .unwrap()
            .unwrap()
            .path();
        let (frontmatter, _) =
            parse_frontmatter(&std::fs::read_to_string(&rule_file).unwrap()).unwrap();
        let fp = rule_fingerprint(&frontmatter);

        let det = detection(&fp, HeuristicId::H1, &["a.py", "b.py", "c.py"]);
        p.store.upsert_candidate(&det, 0.9, Utc::now()).await.unwrap();
        assert_eq!(p.generate(&config, Utc::now() + Duration::days(30)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn project_graph_merge_preserves_existing_keys() {
        let dir = TempDir::new().unwrap();
        let p = pipeline(&dir).await;
        let graph_path = dir.path().join(".ai-framework/project-graph.json");
        std::fs::create_dir_all(graph_path.parent().unwrap()).unwrap();
        std::fs::write(&graph_path, r#"{"custom": {"keep": true}}"#).unwrap();

        p.merge_project_graph(&graph_path, r#"{"patterns": {"fp": {}}}"#)
            .unwrap();

        let merged: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&graph_path).unwrap()).unwrap();
        assert_eq!(merged["custom"]["keep"], serde_json::Value::Bool(true));
        assert!(merged["patterns"]["fp"].is_object());
    }

    #[tokio::test]
    async fn warmup_suppresses_proposals() {
        let dir = TempDir::new().unwrap();
        // A real repo so analyze can walk history.
        for args in [
            vec!["init", "-b", "main"],
            vec!["config", "user.email", "t@t.com"],
            vec!["config", "user.name", "T"],
        ] {
            crate::git::run_git(&args, dir.path()).await.unwrap();
        }
        std::fs::write(dir.path().join("a.py"), "def f(x):\n    pass\n").unwrap();
        crate::git::run_git(&["add", "."], dir.path()).await.unwrap();
        crate::git::run_git(&["commit", "-m", "init"], dir.path()).await.unwrap();

        let p = pipeline(&dir).await;
        let config = Config::default(); // warmup_hours = 24
        let report = p.analyze(&config, None).await.unwrap();
        assert!(report.skipped_warmup);
        assert_eq!(report.proposals_created, 0);
    }

    #[tokio::test]
    async fn hook_trigger_waits_for_enough_commits() {
        let dir = TempDir::new().unwrap();
        for args in [
            vec!["init", "-b", "main"],
            vec!["config", "user.email", "t@t.com"],
            vec!["config", "user.name", "T"],
        ] {
            crate::git::run_git(&args, dir.path()).await.unwrap();
        }
        std::fs::write(dir.path().join("a.py"), "def f(x):\n    pass\n").unwrap();
        crate::git::run_git(&["add", "."], dir.path()).await.unwrap();
        crate::git::run_git(&["commit", "-m", "init"], dir.path()).await.unwrap();

        let p = pipeline(&dir).await;
        let config = config_no_warmup(); // commits_per_trigger stays at 5

        // First pass records the head.
        p.analyze(&config, None).await.unwrap();
        let base = crate::git::current_head(dir.path()).await.unwrap();

        for name in ["b.py", "c.py"] {
            std::fs::write(dir.path().join(name), "def g(x):\n    pass\n").unwrap();
            crate::git::run_git(&["add", "."], dir.path()).await.unwrap();
            crate::git::run_git(&["commit", "-m", name], dir.path()).await.unwrap();
        }

        // Hook-style pass: only 2 of the 5 trigger commits have landed.
        let report = p.analyze(&config, None).await.unwrap();
        assert!(report.skipped_trigger);
        assert_eq!(report.commits_analyzed, 2);
        assert_eq!(report.files_analyzed, 0);

        // Explicit since bypasses the trigger.
        let report = p.analyze(&config, Some(&base)).await.unwrap();
        assert!(!report.skipped_trigger);
        assert_eq!(report.commits_analyzed, 2);
    }

    #[tokio::test]
    async fn analyze_walks_commits_and_updates_head() {
        let dir = TempDir::new().unwrap();
        for args in [
            vec!["init", "-b", "main"],
            vec!["config", "user.email", "t@t.com"],
            vec!["config", "user.name", "T"],
        ] {
            crate::git::run_git(&args, dir.path()).await.unwrap();
        }
        std::fs::write(dir.path().join("base.py"), "def base(x):\n    pass\n").unwrap();
        crate::git::run_git(&["add", "."], dir.path()).await.unwrap();
        crate::git::run_git(&["commit", "-m", "init"], dir.path()).await.unwrap();
        let base = crate::git::current_head(dir.path()).await.unwrap();

        for name in ["s1.py", "s2.py", "s3.py"] {
            std::fs::write(dir.path().join(name), "def handler(a, b):\n    pass\n").unwrap();
        }
        crate::git::run_git(&["add", "."], dir.path()).await.unwrap();
        crate::git::run_git(&["commit", "-m", "add handlers"], dir.path())
            .await
            .unwrap();

        let p = pipeline(&dir).await;
        let config = config_no_warmup();
        let report = p.analyze(&config, Some(&base)).await.unwrap();
        assert_eq!(report.commits_analyzed, 1);
        assert_eq!(report.files_analyzed, 3);
        assert!(report.detections >= 1); // H1 repeated shape at minimum
        assert!(report.candidates_updated >= 1);

        // The head is recorded; a re-run with no new commits analyzes nothing.
        let rerun = p.analyze(&config, None).await.unwrap();
        assert_eq!(rerun.commits_analyzed, 0);
        assert_eq!(rerun.files_analyzed, 0);
    }
}
