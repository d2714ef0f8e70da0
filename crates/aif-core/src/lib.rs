//! aif-core - shared types for the assistance daemon
//!
//! Pure data model, configuration, fingerprinting, reviewer verdict
//! parsing, and artifact rendering. No IO beyond config/artifact files.

pub mod artifacts;
pub mod config;
pub mod fingerprint;
pub mod types;
pub mod verdict;

pub use config::{Config, ConfigError, Sensitivity};
pub use types::{
    CandidateStatus, CategorySource, CodeLocation, Complexity, Corpus, Decision, Detection,
    DocType, EventKind, FailureCategory, FailureEvent, Finding, GovernanceChunk, HeuristicId, Id,
    MemoryEvent, PatternCandidate, Proposal, ProposalKind, ProposalStatus, ReviewVerdict,
    RuleBaseline, SearchHit, Session, Severity, SpecPhase, SpecState, Verdict,
};
