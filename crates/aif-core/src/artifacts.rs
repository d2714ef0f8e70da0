//! Governance artifact rendering, parsing, and placement.
//!
//! Artifacts produced by the learning pipeline are markdown files with a
//! YAML frontmatter block. Rule files carry a fingerprint derived from
//! their frontmatter so regenerated candidates can be deduplicated against
//! rules that already exist on disk.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::fingerprint::{sha256_hex, shape_fingerprint};
use crate::types::{Id, ProposalKind};

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("missing frontmatter block")]
    MissingFrontmatter,
    #[error("invalid frontmatter yaml: {0}")]
    InvalidYaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, ArtifactError>;

/// Frontmatter carried by every generated artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactFrontmatter {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Always `learning` for generated artifacts.
    pub source: String,
    pub proposal_id: String,
}

impl ArtifactFrontmatter {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        tags: Vec<String>,
        proposal_id: &Id,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            tags,
            source: "learning".to_string(),
            proposal_id: proposal_id.to_string(),
        }
    }
}

/// Render a full artifact body: frontmatter block followed by markdown.
pub fn render_artifact(frontmatter: &ArtifactFrontmatter, body: &str) -> Result<String> {
    let yaml = serde_yaml::to_string(frontmatter)?;
    Ok(format!("---\n{yaml}---\n\n{body}"))
}

/// Parse the frontmatter block of an artifact file's contents.
pub fn parse_frontmatter(content: &str) -> Result<(ArtifactFrontmatter, String)> {
    let rest = content
        .strip_prefix("---\n")
        .or_else(|| content.strip_prefix("---\r\n"))
        .ok_or(ArtifactError::MissingFrontmatter)?;
    let end = rest
        .find("\n---")
        .ok_or(ArtifactError::MissingFrontmatter)?;
    let yaml = &rest[..=end];
    let frontmatter: ArtifactFrontmatter = serde_yaml::from_str(yaml)?;
    let body_start = rest[end + 1..]
        .find('\n')
        .map(|i| end + 2 + i)
        .unwrap_or(rest.len());
    let body = rest[body_start..].trim_start_matches('\n').to_string();
    Ok((frontmatter, body))
}

/// Fingerprint of a rule file, computed over its frontmatter name + tags.
///
/// Matches the shape fingerprints the heuristics emit for rule-kind
/// candidates, so an existing rule suppresses regeneration.
pub fn rule_fingerprint(frontmatter: &ArtifactFrontmatter) -> String {
    let mut tags = frontmatter.tags.clone();
    tags.sort();
    shape_fingerprint("rule", &format!("{}\n{}", frontmatter.name, tags.join(",")))
}

/// Canonical on-disk location for an artifact, relative to the git root.
pub fn artifact_path(git_root: &Path, kind: ProposalKind, slug: &str) -> PathBuf {
    match kind {
        ProposalKind::Rule => git_root.join(".claude/rules").join(format!("learning-{slug}.md")),
        ProposalKind::Adr => git_root.join("docs/decisions").join(format!("{slug}.md")),
        ProposalKind::Template => git_root.join(".claude/templates").join(format!("{slug}.md")),
        ProposalKind::Skill => git_root.join(".claude/skills").join(slug).join("prompt.md"),
        ProposalKind::ProjectGraph => git_root.join(".ai-framework/project-graph.json"),
    }
}

/// Write a file atomically: temp file in the target directory, then rename.
pub fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;
    let tmp = dir.join(format!(
        ".{}.tmp-{}",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("artifact"),
        sha256_hex(content).chars().take(8).collect::<String>()
    ));
    std::fs::write(&tmp, content)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
