//! Core types for the assistance daemon.
//!
//! Covers the durable data model: memory events and sessions, spec
//! orchestration state, review verdicts, learning pipeline records, and
//! governance chunks.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for events, proposals, and baselines.
/// Uses `UUIDv7` for time-ordered lexicographic sorting.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id(pub String);

impl Id {
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }
}

impl Default for Id {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Id {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// --- Memory ---

/// Kind of a durable memory observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Decision,
    Discovery,
    Lesson,
    RejectedPattern,
    PatternCandidate,
    #[default]
    Event,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Decision => "decision",
            Self::Discovery => "discovery",
            Self::Lesson => "lesson",
            Self::RejectedPattern => "rejected_pattern",
            Self::PatternCandidate => "pattern_candidate",
            Self::Event => "event",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "decision" => Self::Decision,
            "discovery" => Self::Discovery,
            "lesson" => Self::Lesson,
            "rejected_pattern" => Self::RejectedPattern,
            "pattern_candidate" => Self::PatternCandidate,
            _ => Self::Event,
        }
    }
}

/// A durable observation. Created by hooks or the coordinator,
/// never mutated, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEvent {
    pub id: Id,
    pub created_at: DateTime<Utc>,
    pub kind: EventKind,
    pub text: String,
    /// Lowercased tags.
    pub tags: Vec<String>,
    /// Named references, e.g. `artifact_path`.
    pub refs: BTreeMap<String, String>,
    /// Importance in [0, 1].
    pub importance: f64,
    pub session_id: Option<String>,
}

impl MemoryEvent {
    /// Build a new event with normalized tags and clamped importance.
    pub fn new(kind: EventKind, text: impl Into<String>) -> Self {
        Self {
            id: Id::new(),
            created_at: Utc::now(),
            kind,
            text: text.into(),
            tags: Vec::new(),
            refs: BTreeMap::new(),
            importance: 0.5,
            session_id: None,
        }
    }

    pub fn with_importance(mut self, importance: f64) -> Self {
        self.importance = importance.clamp(0.0, 1.0);
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags.into_iter().map(|t| t.to_lowercase()).collect();
        self
    }

    pub fn with_ref(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.refs.insert(key.into(), value.into());
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// A contiguous assistant conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub project: Option<String>,
    pub initial_prompt: Option<String>,
}

// --- Orchestration ---

/// Lifecycle phase of an in-flight spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecPhase {
    Planning,
    Implementing,
    Verifying,
    Fixing,
    Learning,
    Done,
    Aborted,
}

impl SpecPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planning => "planning",
            Self::Implementing => "implementing",
            Self::Verifying => "verifying",
            Self::Fixing => "fixing",
            Self::Learning => "learning",
            Self::Done => "done",
            Self::Aborted => "aborted",
        }
    }

    /// Terminal phases accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Aborted)
    }

    /// Phases during which a session-exit probe must report busy.
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Implementing | Self::Verifying | Self::Fixing)
    }
}

/// Persistent state of one in-flight spec. One per slug per git root,
/// written to `.ai-framework/specs/<slug>.json` on every transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecState {
    pub slug: String,
    pub phase: SpecPhase,
    pub total_tasks: u32,
    /// Monotonic, never exceeds `total_tasks`.
    pub completed_tasks: u32,
    /// Monotonic count of verify→fix cycles.
    pub review_iteration: u32,
    /// Hex sha-256 over the plan file contents (or the slug if no plan).
    pub plan_fingerprint: String,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// First 8 hex chars of `plan_fingerprint`; keys the worktree path.
    pub worktree_sha8: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abort_reason: Option<String>,
}

/// Advisory pre-orchestration sizing. Pure classification, no state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Simple,
    Standard,
    Complex,
}

impl Complexity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Standard => "standard",
            Self::Complex => "complex",
        }
    }
}

// --- Review ---

/// Severity of a single reviewer finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    MustFix,
    ShouldFix,
    Suggestion,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MustFix => "must_fix",
            Self::ShouldFix => "should_fix",
            Self::Suggestion => "suggestion",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "must_fix" | "must-fix" => Some(Self::MustFix),
            "should_fix" | "should-fix" => Some(Self::ShouldFix),
            "suggestion" => Some(Self::Suggestion),
            _ => None,
        }
    }
}

/// One structured reviewer finding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub severity: Severity,
    pub location: String,
    pub message: String,
}

/// Reviewer decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Pass,
    Fail,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pass => "PASS",
            Self::Fail => "FAIL",
        }
    }
}

/// Output of one reviewer on one iteration.
/// Invariant: `verdict == Fail` iff at least one `must_fix` finding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewVerdict {
    pub reviewer_id: String,
    pub verdict: Verdict,
    pub findings: Vec<Finding>,
    pub iteration: u32,
}

// --- Learning ---

/// Heuristic rules of the pattern miner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HeuristicId {
    /// Repeated block: same normalized shape in several files.
    H1,
    /// Missing standard pattern relative to peers.
    H2,
    /// Inconsistent pattern: competing implementations of one concern.
    H3,
    /// Security shape.
    H4,
    /// Performance shape.
    H5,
    /// Test gap: new non-test file without a sibling test.
    H6,
    /// Doc gap: new top-level module without a descriptor.
    H7,
}

impl HeuristicId {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::H1 => "H1",
            Self::H2 => "H2",
            Self::H3 => "H3",
            Self::H4 => "H4",
            Self::H5 => "H5",
            Self::H6 => "H6",
            Self::H7 => "H7",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "H1" => Some(Self::H1),
            "H2" => Some(Self::H2),
            "H3" => Some(Self::H3),
            "H4" => Some(Self::H4),
            "H5" => Some(Self::H5),
            "H6" => Some(Self::H6),
            "H7" => Some(Self::H7),
            _ => None,
        }
    }

    /// Heuristics whose findings are meaningful even in a single file.
    pub fn single_file_ok(&self) -> bool {
        matches!(self, Self::H4 | Self::H6 | Self::H7)
    }
}

/// A file + line span referenced by a detection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeLocation {
    pub file: String,
    pub line: u32,
}

/// A structural observation about code changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    pub heuristic_id: HeuristicId,
    pub locations: Vec<CodeLocation>,
    /// Stable hash over the normalized shape; cross-run identity.
    pub fingerprint: String,
    pub example_text: String,
    pub raw_evidence: serde_json::Value,
}

impl Detection {
    pub fn distinct_files(&self) -> usize {
        let mut files: Vec<&str> = self.locations.iter().map(|l| l.file.as_str()).collect();
        files.sort_unstable();
        files.dedup();
        files.len()
    }
}

/// Candidate lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateStatus {
    #[default]
    New,
    Proposed,
    Superseded,
}

impl CandidateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Proposed => "proposed",
            Self::Superseded => "superseded",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "proposed" => Self::Proposed,
            "superseded" => Self::Superseded,
            _ => Self::New,
        }
    }
}

/// A detection that survived count/recency filters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternCandidate {
    pub fingerprint: String,
    pub heuristic_id: HeuristicId,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub occurrence_count: u32,
    pub distinct_files: u32,
    /// Confidence in [0, 1].
    pub confidence: f64,
    pub cooldown_until: Option<DateTime<Utc>>,
    pub status: CandidateStatus,
    pub example_text: String,
}

/// Kind of artifact a proposal would produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalKind {
    Rule,
    Adr,
    Template,
    Skill,
    ProjectGraph,
}

impl ProposalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rule => "rule",
            Self::Adr => "adr",
            Self::Template => "template",
            Self::Skill => "skill",
            Self::ProjectGraph => "project_graph",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "rule" => Some(Self::Rule),
            "adr" => Some(Self::Adr),
            "template" => Some(Self::Template),
            "skill" => Some(Self::Skill),
            "project_graph" => Some(Self::ProjectGraph),
            _ => None,
        }
    }
}

/// Proposal lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    #[default]
    Pending,
    Accepted,
    Rejected,
    Ignored,
    Snoozed,
}

impl ProposalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Ignored => "ignored",
            Self::Snoozed => "snoozed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "accepted" => Self::Accepted,
            "rejected" => Self::Rejected,
            "ignored" => Self::Ignored,
            "snoozed" => Self::Snoozed,
            _ => Self::Pending,
        }
    }

    pub fn is_decided(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// User decision on a proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Accept,
    Reject,
    Ignore,
    Snooze,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accept => "accept",
            Self::Reject => "reject",
            Self::Ignore => "ignore",
            Self::Snooze => "snooze",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "accept" => Some(Self::Accept),
            "reject" => Some(Self::Reject),
            "ignore" => Some(Self::Ignore),
            "snooze" => Some(Self::Snooze),
            _ => None,
        }
    }

    /// The status a proposal lands in after this decision.
    pub fn resulting_status(&self) -> ProposalStatus {
        match self {
            Self::Accept => ProposalStatus::Accepted,
            Self::Reject => ProposalStatus::Rejected,
            Self::Ignore => ProposalStatus::Ignored,
            Self::Snooze => ProposalStatus::Snoozed,
        }
    }
}

/// An actionable artifact suggestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
    pub proposal_id: Id,
    pub candidate_fingerprint: String,
    pub kind: ProposalKind,
    pub title: String,
    pub rationale: String,
    pub proposed_content: String,
    pub confidence: f64,
    pub status: ProposalStatus,
    pub created_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
    pub edited_content: Option<String>,
}

// --- Analytics ---

/// Category of a hook-observed failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    Lint,
    Test,
    TypeCheck,
    Tdd,
    Build,
    #[default]
    Other,
}

impl FailureCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lint => "lint",
            Self::Test => "test",
            Self::TypeCheck => "type_check",
            Self::Tdd => "tdd",
            Self::Build => "build",
            Self::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "lint" => Self::Lint,
            "test" => Self::Test,
            "type_check" => Self::TypeCheck,
            "tdd" => Self::Tdd,
            "build" => Self::Build,
            _ => Self::Other,
        }
    }
}

/// A hook observation of a lint/test/TDD failure, deduped per UTC day.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureEvent {
    pub category: FailureCategory,
    pub file_path: String,
    /// Truncated to 200 chars before hashing and storage.
    pub detail: String,
    pub day: NaiveDate,
    /// sha-256 over (category, file_path, detail[:200], day).
    pub signature_hash: String,
}

/// Where a baseline's failure category came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategorySource {
    Heuristic,
    Manual,
}

impl CategorySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Heuristic => "heuristic",
            Self::Manual => "manual",
        }
    }
}

/// Snapshot of a rule's domain failure rate at acceptance time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleBaseline {
    /// UUIDv4.
    pub baseline_id: String,
    pub proposal_id: Id,
    pub category: FailureCategory,
    pub baseline_failures_per_day: f64,
    pub baseline_window_days: u32,
    pub created_at: DateTime<Utc>,
    pub category_source: CategorySource,
}

impl RuleBaseline {
    pub fn new(
        proposal_id: Id,
        category: FailureCategory,
        baseline_failures_per_day: f64,
        baseline_window_days: u32,
        category_source: CategorySource,
    ) -> Self {
        Self {
            baseline_id: Uuid::new_v4().to_string(),
            proposal_id,
            category,
            baseline_failures_per_day,
            baseline_window_days,
            created_at: Utc::now(),
            category_source,
        }
    }
}

// --- Governance & retrieval ---

/// Governance document type; maps to a directory convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocType {
    Rule,
    Adr,
    Template,
    Skill,
    Agent,
    Architecture,
    Project,
}

impl DocType {
    pub const ALL: [Self; 7] = [
        Self::Rule,
        Self::Adr,
        Self::Template,
        Self::Skill,
        Self::Agent,
        Self::Architecture,
        Self::Project,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rule => "rule",
            Self::Adr => "adr",
            Self::Template => "template",
            Self::Skill => "skill",
            Self::Agent => "agent",
            Self::Architecture => "architecture",
            Self::Project => "project",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "rule" => Some(Self::Rule),
            "adr" => Some(Self::Adr),
            "template" => Some(Self::Template),
            "skill" => Some(Self::Skill),
            "agent" => Some(Self::Agent),
            "architecture" => Some(Self::Architecture),
            "project" => Some(Self::Project),
            _ => None,
        }
    }
}

/// One retrievable piece of a governance doc.
/// (file_path, chunk_index) is unique; content_hash tracks the body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernanceChunk {
    pub file_path: String,
    pub chunk_index: u32,
    pub doc_type: DocType,
    pub heading: String,
    pub body: String,
    pub content_hash: String,
}

/// Retrieval corpus routed to by the query classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Corpus {
    Code,
    Governance,
    #[default]
    Hybrid,
}

impl Corpus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::Governance => "governance",
            Self::Hybrid => "hybrid",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "code" => Some(Self::Code),
            "governance" => Some(Self::Governance),
            "hybrid" => Some(Self::Hybrid),
            _ => None,
        }
    }
}

/// A single ranked retrieval hit, regardless of corpus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub corpus: Corpus,
    pub path: String,
    pub title: String,
    pub snippet: String,
    /// Bounded score in [0, 1].
    pub score: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_generates_unique_values() {
        let id1 = Id::new();
        let id2 = Id::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn spec_phase_serializes_correctly() {
        assert_eq!(
            serde_json::to_string(&SpecPhase::Implementing).unwrap(),
            "\"implementing\""
        );
        assert_eq!(
            serde_json::to_string(&SpecPhase::Aborted).unwrap(),
            "\"aborted\""
        );
    }

    #[test]
    fn spec_phase_busy_set() {
        assert!(SpecPhase::Implementing.is_busy());
        assert!(SpecPhase::Verifying.is_busy());
        assert!(SpecPhase::Fixing.is_busy());
        assert!(!SpecPhase::Planning.is_busy());
        assert!(!SpecPhase::Learning.is_busy());
        assert!(!SpecPhase::Done.is_busy());
    }

    #[test]
    fn memory_event_clamps_importance() {
        let event = MemoryEvent::new(EventKind::Decision, "picked sqlite").with_importance(1.7);
        assert!((event.importance - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn memory_event_lowercases_tags() {
        let event = MemoryEvent::new(EventKind::Event, "x")
            .with_tags(vec!["Logging".to_string(), "HTTP".to_string()]);
        assert_eq!(event.tags, vec!["logging", "http"]);
    }

    #[test]
    fn severity_parse_accepts_variants() {
        assert_eq!(Severity::parse("must_fix"), Some(Severity::MustFix));
        assert_eq!(Severity::parse("MUST-FIX"), Some(Severity::MustFix));
        assert_eq!(Severity::parse("suggestion"), Some(Severity::Suggestion));
        assert_eq!(Severity::parse("nit"), None);
    }

    #[test]
    fn heuristic_single_file_exemptions() {
        assert!(HeuristicId::H4.single_file_ok());
        assert!(HeuristicId::H6.single_file_ok());
        assert!(HeuristicId::H7.single_file_ok());
        assert!(!HeuristicId::H1.single_file_ok());
    }

    #[test]
    fn decision_maps_to_status() {
        assert_eq!(Decision::Accept.resulting_status(), ProposalStatus::Accepted);
        assert_eq!(Decision::Reject.resulting_status(), ProposalStatus::Rejected);
        assert_eq!(Decision::Ignore.resulting_status(), ProposalStatus::Ignored);
        assert_eq!(Decision::Snooze.resulting_status(), ProposalStatus::Snoozed);
    }

    #[test]
    fn detection_distinct_files_dedupes() {
        let det = Detection {
            heuristic_id: HeuristicId::H1,
            locations: vec![
                CodeLocation { file: "a.rs".into(), line: 1 },
                CodeLocation { file: "a.rs".into(), line: 9 },
                CodeLocation { file: "b.rs".into(), line: 3 },
            ],
            fingerprint: "f".into(),
            example_text: String::new(),
            raw_evidence: serde_json::Value::Null,
        };
        assert_eq!(det.distinct_files(), 2);
    }

    #[test]
    fn corpus_parse_round_trips() {
        for corpus in [Corpus::Code, Corpus::Governance, Corpus::Hybrid] {
            assert_eq!(Corpus::parse(corpus.as_str()), Some(corpus));
        }
        assert_eq!(Corpus::parse("docs"), None);
    }
}
