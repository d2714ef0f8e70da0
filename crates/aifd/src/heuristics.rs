//! Heuristic engine: seven scoring rules over a change window.
//!
//! Consumes syntactic shapes plus raw added lines and emits detections
//! with stable fingerprints. Confidence combines a per-heuristic base with
//! consistency, recency decay, cross-file scope, and the accept/reject
//! history for the fingerprint.

use std::collections::HashMap;

use aif_core::fingerprint::shape_fingerprint;
use aif_core::types::{CodeLocation, Detection, HeuristicId};
use regex::Regex;
use serde_json::json;
use std::sync::OnceLock;

use crate::syntactic::FileShapes;

/// Half-life of the recency decay, in days of commit age.
const RECENCY_HALF_LIFE_DAYS: f64 = 14.0;

/// One changed file in the analysis window.
#[derive(Debug, Clone)]
pub struct ChangedFile {
    pub path: String,
    pub shapes: FileShapes,
    /// (line number, text) of added lines.
    pub added_lines: Vec<(u32, String)>,
    pub is_new: bool,
}

/// The full input to one detection pass.
#[derive(Debug, Clone, Default)]
pub struct ChangeWindow {
    pub files: Vec<ChangedFile>,
    /// All tracked files in the repository, for sibling/descriptor checks.
    pub repo_files: Vec<String>,
    /// Age of the newest commit in the window, in days.
    pub newest_commit_age_days: f64,
}

impl Default for ChangedFile {
    fn default() -> Self {
        Self {
            path: String::new(),
            shapes: crate::syntactic::analyze_source("", ""),
            added_lines: Vec::new(),
            is_new: false,
        }
    }
}

/// Base confidence per heuristic.
fn base(heuristic: HeuristicId) -> f64 {
    match heuristic {
        HeuristicId::H1 => 0.70,
        HeuristicId::H2 => 0.60,
        HeuristicId::H3 => 0.60,
        HeuristicId::H4 => 0.85,
        HeuristicId::H5 => 0.70,
        HeuristicId::H6 => 0.75,
        HeuristicId::H7 => 0.65,
    }
}

/// Confidence = base × consistency × recency × scope × prior, in [0, 1].
pub fn confidence(
    heuristic: HeuristicId,
    consistency: f64,
    age_days: f64,
    distinct_files: u32,
    prior_decision_factor: f64,
) -> f64 {
    let recency = 0.5_f64.powf(age_days.max(0.0) / RECENCY_HALF_LIFE_DAYS);
    let scope = (0.4 + f64::from(distinct_files) / 10.0).min(1.0);
    (base(heuristic) * consistency.clamp(0.0, 1.0) * recency * scope * prior_decision_factor)
        .clamp(0.0, 1.0)
}

/// Detection pass settings.
#[derive(Debug, Clone)]
pub struct HeuristicEngine {
    /// H1: minimum files sharing a shape (moderate sensitivity).
    pub min_repeat_files: usize,
    /// H2: share of peers that must carry a pattern for it to be standard.
    pub peer_share: f64,
}

impl Default for HeuristicEngine {
    fn default() -> Self {
        Self {
            min_repeat_files: 3,
            peer_share: 0.75,
        }
    }
}

impl HeuristicEngine {
    /// Run all seven rules over the window.
    pub fn detect(&self, window: &ChangeWindow) -> Vec<Detection> {
        let mut detections = Vec::new();
        detections.extend(self.repeated_blocks(window));
        detections.extend(self.missing_standard_pattern(window));
        detections.extend(self.inconsistent_naming(window));
        detections.extend(self.security_shapes(window));
        detections.extend(self.performance_shapes(window));
        detections.extend(self.test_gaps(window));
        detections.extend(self.doc_gaps(window));
        detections
    }

    /// H1: the same normalized shape in at least `min_repeat_files` files.
    fn repeated_blocks(&self, window: &ChangeWindow) -> Vec<Detection> {
        let mut by_shape: HashMap<String, Vec<&ChangedFile>> = HashMap::new();
        for file in &window.files {
            let shape = file.shapes.normalized();
            if !shape.is_empty() {
                by_shape.entry(shape).or_default().push(file);
            }
        }

        let mut out = Vec::new();
        for (shape, files) in by_shape {
            let mut distinct: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
            distinct.sort_unstable();
            distinct.dedup();
            if distinct.len() < self.min_repeat_files {
                continue;
            }
            out.push(Detection {
                heuristic_id: HeuristicId::H1,
                locations: files
                    .iter()
                    .map(|f| CodeLocation {
                        file: f.path.clone(),
                        line: f.shapes.functions.first().map_or(1, |fun| fun.line),
                    })
                    .collect(),
                fingerprint: shape_fingerprint("H1", &shape),
                example_text: files[0]
                    .added_lines
                    .first()
                    .map(|(_, l)| l.clone())
                    .unwrap_or_default(),
                raw_evidence: json!({ "shape": shape, "files": distinct }),
            });
        }
        out
    }

    /// H2: a file missing an import that ≥`peer_share` of its peers carry.
    ///
    /// Peers are changed files with the same extension; the window needs at
    /// least four of them before anything counts as standard.
    fn missing_standard_pattern(&self, window: &ChangeWindow) -> Vec<Detection> {
        let mut by_ext: HashMap<&str, Vec<&ChangedFile>> = HashMap::new();
        for file in &window.files {
            if let Some(ext) = file.path.rsplit('.').next() {
                by_ext.entry(ext).or_default().push(file);
            }
        }

        let mut out = Vec::new();
        for (ext, peers) in by_ext {
            if peers.len() < 4 {
                continue;
            }
            let mut import_counts: HashMap<&str, usize> = HashMap::new();
            for peer in &peers {
                let mut seen: Vec<&str> = peer.shapes.imports.iter().map(|i| i.module.as_str()).collect();
                seen.sort_unstable();
                seen.dedup();
                for module in seen {
                    *import_counts.entry(module).or_default() += 1;
                }
            }
            for (module, count) in import_counts {
                let share = count as f64 / peers.len() as f64;
                if share < self.peer_share {
                    continue;
                }
                let missing: Vec<&&ChangedFile> = peers
                    .iter()
                    .filter(|p| !p.shapes.imports.iter().any(|i| i.module == module))
                    .collect();
                for file in missing {
                    out.push(Detection {
                        heuristic_id: HeuristicId::H2,
                        locations: vec![CodeLocation {
                            file: file.path.clone(),
                            line: 1,
                        }],
                        fingerprint: shape_fingerprint("H2", &format!("{ext}:{module}")),
                        example_text: format!("missing `{module}` used by {count} peer files"),
                        raw_evidence: json!({
                            "module": module,
                            "extension": ext,
                            "peer_share": share,
                        }),
                    });
                }
            }
        }
        out
    }

    /// H3: competing naming conventions among added functions.
    fn inconsistent_naming(&self, window: &ChangeWindow) -> Vec<Detection> {
        let mut snake: Vec<CodeLocation> = Vec::new();
        let mut camel: Vec<CodeLocation> = Vec::new();

        for file in &window.files {
            for fun in &file.shapes.functions {
                let name = fun.name.trim_start_matches('_');
                let has_underscore = name.contains('_');
                let has_inner_upper = name.chars().skip(1).any(char::is_uppercase);
                let location = CodeLocation {
                    file: file.path.clone(),
                    line: fun.line,
                };
                if has_underscore && !has_inner_upper {
                    snake.push(location);
                } else if has_inner_upper && !has_underscore {
                    camel.push(location);
                }
            }
        }

        if snake.is_empty() || camel.is_empty() {
            return Vec::new();
        }
        let minority = snake.len().min(camel.len());
        let mut locations = snake;
        locations.extend(camel);
        vec![Detection {
            heuristic_id: HeuristicId::H3,
            fingerprint: shape_fingerprint("H3", "function-naming"),
            example_text: format!("{minority} function(s) use the minority naming style"),
            raw_evidence: json!({ "concern": "function_naming" }),
            locations,
        }]
    }

    /// H4: recognizable security anti-patterns in added lines.
    fn security_shapes(&self, window: &ChangeWindow) -> Vec<Detection> {
        let res = security_regexes();
        let mut out = Vec::new();
        for file in &window.files {
            for (line_no, line) in &file.added_lines {
                let shape = if res.sql_concat.is_match(line) {
                    Some("sql-string-assembly")
                } else if res.path_traversal.is_match(line) {
                    Some("unchecked-path-join")
                } else {
                    None
                };
                if let Some(shape) = shape {
                    out.push(Detection {
                        heuristic_id: HeuristicId::H4,
                        locations: vec![CodeLocation {
                            file: file.path.clone(),
                            line: *line_no,
                        }],
                        fingerprint: shape_fingerprint("H4", shape),
                        example_text: line.trim().to_string(),
                        raw_evidence: json!({ "shape": shape }),
                    });
                }
            }
        }
        out
    }

    /// H5: nested loop over a collection followed by IO, or the same query
    /// repeated inside a loop body.
    fn performance_shapes(&self, window: &ChangeWindow) -> Vec<Detection> {
        let res = security_regexes();
        let mut out = Vec::new();
        for file in &window.files {
            let mut loop_depth = 0usize;
            let mut last_indent = 0usize;
            for (line_no, line) in &file.added_lines {
                let indent = line.len() - line.trim_start().len();
                if indent <= last_indent && loop_depth > 0 && !line.trim().is_empty() && !res.loop_start.is_match(line) {
                    // Dedent closes open loops in indentation languages.
                    loop_depth = loop_depth.saturating_sub(1);
                }
                if res.loop_start.is_match(line) {
                    loop_depth += 1;
                    last_indent = indent;
                    continue;
                }
                if loop_depth >= 1 && res.io_call.is_match(line) {
                    let shape = if loop_depth >= 2 { "nested-loop-io" } else { "query-in-loop" };
                    if loop_depth >= 2 || res.query_call.is_match(line) {
                        out.push(Detection {
                            heuristic_id: HeuristicId::H5,
                            locations: vec![CodeLocation {
                                file: file.path.clone(),
                                line: *line_no,
                            }],
                            fingerprint: shape_fingerprint("H5", shape),
                            example_text: line.trim().to_string(),
                            raw_evidence: json!({ "shape": shape, "loop_depth": loop_depth }),
                        });
                    }
                }
            }
        }
        out
    }

    /// H6: a new non-test file with no sibling test anywhere in the repo.
    fn test_gaps(&self, window: &ChangeWindow) -> Vec<Detection> {
        let mut known: Vec<&str> = window.repo_files.iter().map(String::as_str).collect();
        known.extend(window.files.iter().map(|f| f.path.as_str()));

        let mut out = Vec::new();
        for file in &window.files {
            if !file.is_new || is_test_file(&file.path) || !is_source_file(&file.path) {
                continue;
            }
            if has_sibling_test(&file.path, &known) {
                continue;
            }
            out.push(Detection {
                heuristic_id: HeuristicId::H6,
                locations: vec![CodeLocation {
                    file: file.path.clone(),
                    line: 1,
                }],
                fingerprint: shape_fingerprint("H6", &file.path),
                example_text: format!("new file {} has no sibling test", file.path),
                raw_evidence: json!({ "file": file.path }),
            });
        }
        out
    }

    /// H7: a new top-level module directory without a descriptor file.
    fn doc_gaps(&self, window: &ChangeWindow) -> Vec<Detection> {
        let mut known: Vec<&str> = window.repo_files.iter().map(String::as_str).collect();
        known.extend(window.files.iter().map(|f| f.path.as_str()));

        let mut out = Vec::new();
        let mut seen_dirs: Vec<String> = Vec::new();
        for file in &window.files {
            if !file.is_new {
                continue;
            }
            let Some(dir) = top_level_module(&file.path) else {
                continue;
            };
            if seen_dirs.contains(&dir) {
                continue;
            }
            // The directory is new iff nothing under it predates the window.
            let predates = window
                .repo_files
                .iter()
                .any(|f| f.starts_with(&format!("{dir}/")));
            if predates {
                continue;
            }
            let has_descriptor = known.iter().any(|f| {
                f.starts_with(&format!("{dir}/"))
                    && matches!(
                        f.rsplit('/').next(),
                        Some("README.md" | "__init__.py" | "mod.rs" | "index.md")
                    )
            });
            if has_descriptor {
                continue;
            }
            seen_dirs.push(dir.clone());
            out.push(Detection {
                heuristic_id: HeuristicId::H7,
                locations: vec![CodeLocation {
                    file: file.path.clone(),
                    line: 1,
                }],
                fingerprint: shape_fingerprint("H7", &dir),
                example_text: format!("new module {dir} has no descriptor file"),
                raw_evidence: json!({ "module": dir }),
            });
        }
        out
    }
}

fn is_test_file(path: &str) -> bool {
    let name = path.rsplit('/').next().unwrap_or(path);
    path.contains("tests/")
        || path.contains("test/")
        || name.starts_with("test_")
        || name.contains("_test.")
        || name.contains(".test.")
        || name.contains(".spec.")
}

fn is_source_file(path: &str) -> bool {
    matches!(
        path.rsplit('.').next(),
        Some("py" | "rs" | "js" | "jsx" | "ts" | "tsx" | "go")
    )
}

fn has_sibling_test(path: &str, known: &[&str]) -> bool {
    let stem = path
        .rsplit('/')
        .next()
        .and_then(|n| n.split('.').next())
        .unwrap_or("");
    if stem.is_empty() {
        return false;
    }
    known.iter().any(|f| is_test_file(f) && f.contains(stem))
}

/// Top-level module dir for paths like `src/<mod>/...` or `<pkg>/<mod>/...`.
fn top_level_module(path: &str) -> Option<String> {
    let parts: Vec<&str> = path.split('/').collect();
    if parts.len() < 3 {
        return None;
    }
    match parts[0] {
        "src" | "lib" | "packages" | "apps" => Some(format!("{}/{}", parts[0], parts[1])),
        _ => None,
    }
}

struct SecurityRegexes {
    sql_concat: Regex,
    path_traversal: Regex,
    loop_start: Regex,
    io_call: Regex,
    query_call: Regex,
}

fn security_regexes() -> &'static SecurityRegexes {
    static RES: OnceLock<SecurityRegexes> = OnceLock::new();
    RES.get_or_init(|| SecurityRegexes {
        sql_concat: Regex::new(
            r#"(?i)(select |insert |update |delete ).*("\s*\+|\+\s*"|%s|format!?\(|f")"#,
        )
        .unwrap(),
        path_traversal: Regex::new(r"(?i)(join|open)\([^)]*(request|input|params|args)\.").unwrap(),
        loop_start: Regex::new(r"^\s*(for\s|while\s|\.for_each|loop\s*\{)").unwrap(),
        io_call: Regex::new(r"(?i)(query|fetch|execute|request|\.get\(|\.post\(|open\(|read\()").unwrap(),
        query_call: Regex::new(r"(?i)(query|execute|fetch)").unwrap(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntactic::analyze_source;

    fn changed(path: &str, source: &str, is_new: bool) -> ChangedFile {
        ChangedFile {
            path: path.to_string(),
            shapes: analyze_source(path, source),
            added_lines: source
                .lines()
                .enumerate()
                .map(|(i, l)| ((i + 1) as u32, l.to_string()))
                .collect(),
            is_new,
        }
    }

    #[test]
    fn confidence_is_clamped_and_decays() {
        let fresh = confidence(HeuristicId::H4, 1.0, 0.0, 10, 1.5);
        let old = confidence(HeuristicId::H4, 1.0, 60.0, 10, 1.5);
        assert!(fresh <= 1.0);
        assert!(old < fresh);
        assert!(confidence(HeuristicId::H1, 0.0, 0.0, 1, 1.0) == 0.0);
    }

    #[test]
    fn confidence_half_life_halves_at_fourteen_days() {
        let now = confidence(HeuristicId::H1, 1.0, 0.0, 3, 1.0);
        let later = confidence(HeuristicId::H1, 1.0, 14.0, 3, 1.0);
        assert!((later / now - 0.5).abs() < 1e-9);
    }

    #[test]
    fn h1_requires_three_files_with_same_shape() {
        let src = "def handler(a, b):\n    pass\n";
        let window = ChangeWindow {
            files: vec![
                changed("a.py", src, false),
                changed("b.py", src, false),
                changed("c.py", src, false),
            ],
            ..Default::default()
        };
        let engine = HeuristicEngine::default();
        let detections = engine.repeated_blocks(&window);
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].heuristic_id, HeuristicId::H1);
        assert_eq!(detections[0].distinct_files(), 3);

        let window_two = ChangeWindow {
            files: vec![changed("a.py", src, false), changed("b.py", src, false)],
            ..Default::default()
        };
        assert!(engine.repeated_blocks(&window_two).is_empty());
    }

    #[test]
    fn h2_flags_missing_standard_import() {
        let with = "import logging\ndef svc(x):\n    pass\n";
        let without = "def svc(x):\n    pass\n";
        let window = ChangeWindow {
            files: vec![
                changed("s1.py", with, false),
                changed("s2.py", with, false),
                changed("s3.py", with, false),
                changed("s4.py", without, false),
            ],
            ..Default::default()
        };
        let detections = HeuristicEngine::default().missing_standard_pattern(&window);
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].locations[0].file, "s4.py");
        assert!(detections[0].example_text.contains("logging"));
    }

    #[test]
    fn h3_detects_competing_naming() {
        let window = ChangeWindow {
            files: vec![
                changed("a.py", "def fetch_user(x):\n    pass\n", false),
                changed("b.py", "def fetchAccount(x):\n    pass\n", false),
            ],
            ..Default::default()
        };
        let detections = HeuristicEngine::default().inconsistent_naming(&window);
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].locations.len(), 2);
    }

    #[test]
    fn h3_silent_when_consistent() {
        let window = ChangeWindow {
            files: vec![
                changed("a.py", "def fetch_user(x):\n    pass\n", false),
                changed("b.py", "def fetch_account(x):\n    pass\n", false),
            ],
            ..Default::default()
        };
        assert!(HeuristicEngine::default().inconsistent_naming(&window).is_empty());
    }

    #[test]
    fn h4_flags_sql_assembly_and_path_join() {
        let src = "\
cursor.execute(\"SELECT * FROM users WHERE id = \" + user_id)
path = os.path.join(base, request.args['name'])
";
        let window = ChangeWindow {
            files: vec![changed("app.py", src, false)],
            ..Default::default()
        };
        let detections = HeuristicEngine::default().security_shapes(&window);
        assert_eq!(detections.len(), 2);
        assert!(detections.iter().all(|d| d.heuristic_id == HeuristicId::H4));
    }

    #[test]
    fn h5_flags_query_in_loop() {
        let src = "\
for user in users:
    row = db.query(user.id)
";
        let window = ChangeWindow {
            files: vec![changed("jobs.py", src, false)],
            ..Default::default()
        };
        let detections = HeuristicEngine::default().performance_shapes(&window);
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].heuristic_id, HeuristicId::H5);
    }

    #[test]
    fn h6_flags_new_file_without_test() {
        let window = ChangeWindow {
            files: vec![changed("src/billing.py", "def charge(x):\n    pass\n", true)],
            repo_files: vec!["src/other.py".to_string()],
            ..Default::default()
        };
        let detections = HeuristicEngine::default().test_gaps(&window);
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].heuristic_id, HeuristicId::H6);
    }

    #[test]
    fn h6_quiet_when_sibling_test_exists() {
        let window = ChangeWindow {
            files: vec![changed("src/billing.py", "def charge(x):\n    pass\n", true)],
            repo_files: vec!["tests/test_billing.py".to_string()],
            ..Default::default()
        };
        assert!(HeuristicEngine::default().test_gaps(&window).is_empty());
    }

    #[test]
    fn h7_flags_new_module_without_descriptor() {
        let window = ChangeWindow {
            files: vec![changed("src/payments/stripe.py", "def pay(x):\n    pass\n", true)],
            repo_files: vec!["src/core/main.py".to_string()],
            ..Default::default()
        };
        let detections = HeuristicEngine::default().doc_gaps(&window);
        assert_eq!(detections.len(), 1);
        assert!(detections[0].example_text.contains("src/payments"));
    }

    #[test]
    fn h7_quiet_with_descriptor_or_existing_module() {
        let engine = HeuristicEngine::default();
        let with_readme = ChangeWindow {
            files: vec![
                changed("src/payments/stripe.py", "def pay(x):\n    pass\n", true),
                changed("src/payments/README.md", "# Payments\n", true),
            ],
            ..Default::default()
        };
        assert!(engine.doc_gaps(&with_readme).is_empty());

        let existing = ChangeWindow {
            files: vec![changed("src/payments/stripe.py", "def pay(x):\n    pass\n", true)],
            repo_files: vec!["src/payments/old.py".to_string()],
            ..Default::default()
        };
        assert!(engine.doc_gaps(&existing).is_empty());
    }

    #[test]
    fn fingerprints_are_stable_across_runs() {
        let src = "def handler(a, b):\n    pass\n";
        let window = ChangeWindow {
            files: vec![
                changed("a.py", src, false),
                changed("b.py", src, false),
                changed("c.py", src, false),
            ],
            ..Default::default()
        };
        let engine = HeuristicEngine::default();
        let first = engine.detect(&window);
        let second = engine.detect(&window);
        let fp1: Vec<&str> = first.iter().map(|d| d.fingerprint.as_str()).collect();
        let fp2: Vec<&str> = second.iter().map(|d| d.fingerprint.as_str()).collect();
        assert_eq!(fp1, fp2);
    }
}
