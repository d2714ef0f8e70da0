//! Reviewer output parsing and aggregation.
//!
//! The contract with reviewers is strict: the output contains a line
//! matching `Verdict: PASS` or `Verdict: FAIL` (case-insensitive) and
//! findings as pipe-separated rows `severity | location | message`.
//! Everything else is ignored.

use crate::types::{Finding, ReviewVerdict, Severity, Verdict};

/// Synthetic finding message used when no verdict line is present.
pub const MALFORMED_FINDING: &str = "reviewer_output_malformed";

/// Parse one reviewer's raw output into a structured verdict.
///
/// Normalization keeps the invariant `Fail` ⇔ at least one `must_fix`:
/// a FAIL with no must_fix rows gains a synthetic finding, and a PASS
/// that nevertheless lists must_fix rows is downgraded to FAIL.
pub fn parse_verdict(reviewer_id: &str, text: &str, iteration: u32) -> ReviewVerdict {
    let mut verdict_line: Option<Verdict> = None;
    let mut findings: Vec<Finding> = Vec::new();

    for line in text.lines() {
        let trimmed = line.trim().trim_start_matches(['-', '*', '|']).trim();
        if let Some(rest) = strip_prefix_ci(trimmed, "verdict:") {
            match rest.trim().to_uppercase().as_str() {
                s if s.starts_with("PASS") => verdict_line = Some(Verdict::Pass),
                s if s.starts_with("FAIL") => verdict_line = Some(Verdict::Fail),
                _ => {}
            }
            continue;
        }
        if let Some(finding) = parse_finding_row(trimmed) {
            findings.push(finding);
        }
    }

    let has_must_fix = findings.iter().any(|f| f.severity == Severity::MustFix);

    let verdict = match verdict_line {
        Some(Verdict::Pass) if has_must_fix => Verdict::Fail,
        Some(v) => v,
        None => {
            findings.push(Finding {
                severity: Severity::MustFix,
                location: String::new(),
                message: MALFORMED_FINDING.to_string(),
            });
            Verdict::Fail
        }
    };

    let mut parsed = ReviewVerdict {
        reviewer_id: reviewer_id.to_string(),
        verdict,
        findings,
        iteration,
    };

    if parsed.verdict == Verdict::Fail
        && !parsed.findings.iter().any(|f| f.severity == Severity::MustFix)
    {
        parsed.findings.push(Finding {
            severity: Severity::MustFix,
            location: String::new(),
            message: "fail_without_findings".to_string(),
        });
    }

    parsed
}

fn strip_prefix_ci<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    let head = line.get(..prefix.len())?;
    if head.eq_ignore_ascii_case(prefix) {
        Some(&line[prefix.len()..])
    } else {
        None
    }
}

/// A findings row is `severity | location | message`; trailing cells beyond
/// the third are folded into the message.
fn parse_finding_row(line: &str) -> Option<Finding> {
    let cells: Vec<&str> = line.split('|').map(str::trim).filter(|c| !c.is_empty()).collect();
    if cells.len() < 3 {
        return None;
    }
    let severity = Severity::parse(cells[0])?;
    Some(Finding {
        severity,
        location: cells[1].to_string(),
        message: cells[2..].join(" | "),
    })
}

/// PASS iff every verdict is PASS and none carries a `must_fix` finding.
pub fn aggregate(verdicts: &[ReviewVerdict]) -> Verdict {
    let all_pass = verdicts.iter().all(|v| {
        v.verdict == Verdict::Pass && !v.findings.iter().any(|f| f.severity == Severity::MustFix)
    });
    if !verdicts.is_empty() && all_pass {
        Verdict::Pass
    } else {
        Verdict::Fail
    }
}

/// Whether the fix loop should run another iteration.
pub fn needs_fix_loop(verdicts: &[ReviewVerdict], iteration: u32, max_iterations: u32) -> bool {
    aggregate(verdicts) == Verdict::Fail && iteration < max_iterations
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pass_verdict() {
        let text = "Looked at the diff.\nVerdict: PASS\n";
        let parsed = parse_verdict("reviewer-a", text, 0);
        assert_eq!(parsed.verdict, Verdict::Pass);
        assert!(parsed.findings.is_empty());
    }

    #[test]
    fn verdict_line_is_case_insensitive() {
        let parsed = parse_verdict("r", "verdict: fail\nmust_fix | src/a.rs:10 | broken", 1);
        assert_eq!(parsed.verdict, Verdict::Fail);
        assert_eq!(parsed.iteration, 1);
    }

    #[test]
    fn parses_findings_rows() {
        let text = "\
Verdict: FAIL
must_fix | src/server.rs:42 | unchecked unwrap on request body
should_fix | src/git.rs:10 | missing context in error
suggestion | README.md | add an example
";
        let parsed = parse_verdict("r", text, 0);
        assert_eq!(parsed.findings.len(), 3);
        assert_eq!(parsed.findings[0].severity, Severity::MustFix);
        assert_eq!(parsed.findings[0].location, "src/server.rs:42");
        assert_eq!(parsed.findings[2].severity, Severity::Suggestion);
    }

    #[test]
    fn table_rows_with_outer_pipes_parse() {
        let text = "Verdict: FAIL\n| must_fix | src/x.rs:1 | bad |";
        let parsed = parse_verdict("r", text, 0);
        assert_eq!(parsed.findings.len(), 1);
        assert_eq!(parsed.findings[0].message, "bad");
    }

    #[test]
    fn missing_verdict_line_fails_with_synthetic_finding() {
        let parsed = parse_verdict("r", "looks fine to me", 0);
        assert_eq!(parsed.verdict, Verdict::Fail);
        assert_eq!(parsed.findings.len(), 1);
        assert_eq!(parsed.findings[0].severity, Severity::MustFix);
        assert_eq!(parsed.findings[0].message, MALFORMED_FINDING);
    }

    #[test]
    fn pass_with_must_fix_is_downgraded() {
        let text = "Verdict: PASS\nmust_fix | a.rs | actually broken";
        let parsed = parse_verdict("r", text, 0);
        assert_eq!(parsed.verdict, Verdict::Fail);
    }

    #[test]
    fn fail_without_must_fix_gains_synthetic() {
        let text = "Verdict: FAIL\nsuggestion | a.rs | prefer iterators";
        let parsed = parse_verdict("r", text, 0);
        assert!(parsed.findings.iter().any(|f| f.severity == Severity::MustFix));
    }

    #[test]
    fn unrelated_lines_are_ignored() {
        let text = "intro | not | a finding row? no severity\nVerdict: PASS\n";
        let parsed = parse_verdict("r", text, 0);
        assert_eq!(parsed.verdict, Verdict::Pass);
        assert!(parsed.findings.is_empty());
    }

    #[test]
    fn aggregate_requires_all_pass() {
        let pass = parse_verdict("a", "Verdict: PASS", 0);
        let fail = parse_verdict("b", "Verdict: FAIL\nmust_fix | x | y", 0);
        assert_eq!(aggregate(&[pass.clone()]), Verdict::Pass);
        assert_eq!(aggregate(&[pass, fail]), Verdict::Fail);
        assert_eq!(aggregate(&[]), Verdict::Fail);
    }

    #[test]
    fn needs_fix_loop_respects_bounds() {
        let fail = parse_verdict("b", "Verdict: FAIL\nmust_fix | x | y", 0);
        assert!(needs_fix_loop(&[fail.clone()], 0, 3));
        assert!(needs_fix_loop(&[fail.clone()], 2, 3));
        assert!(!needs_fix_loop(&[fail], 3, 3));
        let pass = parse_verdict("a", "Verdict: PASS", 0);
        assert!(!needs_fix_loop(&[pass], 0, 3));
    }
}
