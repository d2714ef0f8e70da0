//! Stable hashing helpers.
//!
//! Fingerprints give cross-run identity to plans, detected code shapes,
//! failure signatures, and rule files.

use std::path::Path;

use chrono::NaiveDate;
use sha2::{Digest, Sha256};

use crate::types::FailureCategory;

/// Hex sha-256 of arbitrary bytes.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Fingerprint for a plan: sha-256 over the plan file contents if the file
/// exists, otherwise over the slug itself.
pub fn plan_fingerprint(slug: &str, plan_path: Option<&Path>) -> String {
    if let Some(path) = plan_path {
        if let Ok(bytes) = std::fs::read(path) {
            return sha256_hex(&bytes);
        }
    }
    sha256_hex(slug.as_bytes())
}

/// First 8 hex chars of a fingerprint; keys worktree directory names.
pub fn sha8(fingerprint: &str) -> String {
    fingerprint.chars().take(8).collect()
}

/// Stable fingerprint over a normalized code shape.
///
/// The shape string must already be normalized (identifiers canonicalized,
/// whitespace collapsed) so the same structure hashes identically across
/// commits and files.
pub fn shape_fingerprint(heuristic: &str, shape: &str) -> String {
    sha256_hex(format!("{heuristic}\n{shape}").as_bytes())
}

/// Per-day failure signature: (category, file, detail[:200], day).
pub fn failure_signature(
    category: FailureCategory,
    file_path: &str,
    detail: &str,
    day: NaiveDate,
) -> String {
    let detail: String = detail.chars().take(200).collect();
    sha256_hex(format!("{}\n{}\n{}\n{}", category.as_str(), file_path, detail, day).as_bytes())
}

/// Validate a kebab-case slug: lowercase ascii alphanumerics and single
/// hyphens, no leading/trailing hyphen.
pub fn is_valid_slug(slug: &str) -> bool {
    !slug.is_empty()
        && !slug.starts_with('-')
        && !slug.ends_with('-')
        && !slug.contains("--")
        && slug
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

/// Turn free text into a kebab-case slug.
pub fn slugify(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn sha256_hex_is_stable() {
        assert_eq!(
            sha256_hex(b"hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn plan_fingerprint_prefers_file_contents() {
        let dir = TempDir::new().unwrap();
        let plan = dir.path().join("plan.md");
        std::fs::write(&plan, "## Tasks\n- [ ] one\n").unwrap();

        let from_file = plan_fingerprint("add-logging", Some(&plan));
        let from_slug = plan_fingerprint("add-logging", None);
        assert_ne!(from_file, from_slug);
        assert_eq!(from_file, plan_fingerprint("other-slug", Some(&plan)));
    }

    #[test]
    fn plan_fingerprint_stable_for_identical_contents() {
        let dir = TempDir::new().unwrap();
        let plan = dir.path().join("plan.md");
        std::fs::write(&plan, "same").unwrap();
        assert_eq!(
            plan_fingerprint("s", Some(&plan)),
            plan_fingerprint("s", Some(&plan))
        );
    }

    #[test]
    fn sha8_takes_prefix() {
        assert_eq!(sha8("abcdef0123456789"), "abcdef01");
    }

    #[test]
    fn failure_signature_truncates_detail() {
        let day = NaiveDate::from_ymd_opt(2026, 7, 1).unwrap();
        let long = "x".repeat(500);
        let truncated = "x".repeat(200);
        assert_eq!(
            failure_signature(FailureCategory::Lint, "src/a.rs", &long, day),
            failure_signature(FailureCategory::Lint, "src/a.rs", &truncated, day)
        );
    }

    #[test]
    fn slug_validation() {
        assert!(is_valid_slug("add-logging"));
        assert!(is_valid_slug("fix2"));
        assert!(!is_valid_slug("Add-Logging"));
        assert!(!is_valid_slug("-leading"));
        assert!(!is_valid_slug("trailing-"));
        assert!(!is_valid_slug("double--hyphen"));
        assert!(!is_valid_slug(""));
    }

    #[test]
    fn slugify_collapses() {
        assert_eq!(slugify("Add Logging!"), "add-logging");
        assert_eq!(slugify("  spaces  "), "spaces");
    }
}
