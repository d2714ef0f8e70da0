//! Syntactic analyzer: language-normalized shapes over changed files.
//!
//! Python gets an indentation-aware walker (high confidence); Rust,
//! JavaScript/TypeScript, and Go fall back to regex extraction of the same
//! shapes with lower confidence. Malformed input yields an empty result,
//! never an error.

use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;
use tracing::warn;

/// Files above this size are skipped with a logged observation.
pub const MAX_FILE_BYTES: usize = 1024 * 1024;

/// Source language, detected by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    Python,
    Rust,
    JavaScript,
    Go,
    Unknown,
}

impl Language {
    pub fn from_path(path: &str) -> Self {
        match path.rsplit('.').next() {
            Some("py") => Self::Python,
            Some("rs") => Self::Rust,
            Some("js" | "jsx" | "ts" | "tsx" | "mjs") => Self::JavaScript,
            Some("go") => Self::Go,
            _ => Self::Unknown,
        }
    }

    /// Extraction confidence: proper walker beats regex fallback.
    pub fn confidence(&self) -> f64 {
        match self {
            Self::Python => 0.9,
            Self::Rust | Self::JavaScript | Self::Go => 0.6,
            Self::Unknown => 0.0,
        }
    }
}

/// A function signature: name, arity, parameter names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FunctionShape {
    pub name: String,
    pub arity: usize,
    pub params: Vec<String>,
    pub line: u32,
}

/// A class and its bases; `overrides` lists well-known redefined methods.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassShape {
    pub name: String,
    pub bases: Vec<String>,
    pub overrides: Vec<String>,
    pub line: u32,
}

/// An error-handling site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorShape {
    pub caught_types: Vec<String>,
    pub rethrows: bool,
    /// Catch-everything handler (bare `except`, `catch (e)` with no check).
    pub broad_catch: bool,
    pub line: u32,
}

/// An import site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportShape {
    pub module: String,
    pub line: u32,
}

/// Normalized shapes of one file.
#[derive(Debug, Clone, Serialize)]
pub struct FileShapes {
    pub language: Language,
    pub confidence: f64,
    pub functions: Vec<FunctionShape>,
    pub classes: Vec<ClassShape>,
    pub error_handling: Vec<ErrorShape>,
    pub imports: Vec<ImportShape>,
}

impl FileShapes {
    fn empty(language: Language) -> Self {
        Self {
            language,
            confidence: 0.0,
            functions: Vec::new(),
            classes: Vec::new(),
            error_handling: Vec::new(),
            imports: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
            && self.classes.is_empty()
            && self.error_handling.is_empty()
            && self.imports.is_empty()
    }

    /// Canonical shape string for fingerprinting: structure, not names.
    pub fn normalized(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        for f in &self.functions {
            parts.push(format!("fn/{}", f.arity));
        }
        for c in &self.classes {
            parts.push(format!("class/{}b/{}o", c.bases.len(), c.overrides.len()));
        }
        for e in &self.error_handling {
            parts.push(format!(
                "err/{}c/{}{}",
                e.caught_types.len(),
                u8::from(e.rethrows),
                u8::from(e.broad_catch)
            ));
        }
        parts.join(";")
    }
}

/// Extract shapes from a file's contents.
///
/// Binary content (NUL bytes) and oversized files are skipped.
pub fn analyze_source(path: &str, content: &str) -> FileShapes {
    let language = Language::from_path(path);
    if content.len() > MAX_FILE_BYTES {
        warn!(path = %path, bytes = content.len(), "skipping oversized file");
        return FileShapes::empty(language);
    }
    if content.contains('\0') {
        warn!(path = %path, "skipping binary file");
        return FileShapes::empty(language);
    }

    let mut shapes = match language {
        Language::Python => analyze_python(content),
        Language::Rust => analyze_rust(content),
        Language::JavaScript => analyze_javascript(content),
        Language::Go => analyze_go(content),
        Language::Unknown => FileShapes::empty(Language::Unknown),
    };
    shapes.confidence = if shapes.is_empty() {
        0.0
    } else {
        language.confidence()
    };
    shapes
}

/// Well-known override targets checked for class shapes.
const KNOWN_OVERRIDES: [&str; 6] = ["__init__", "__str__", "__repr__", "__eq__", "setup", "run"];

fn analyze_python(content: &str) -> FileShapes {
    let mut shapes = FileShapes::empty(Language::Python);

    // (indent, class index) stack so methods attach to their class.
    let mut class_stack: Vec<(usize, usize)> = Vec::new();
    let mut last_except: Option<usize> = None;

    for (idx, raw) in content.lines().enumerate() {
        let line_no = (idx + 1) as u32;
        let indent = raw.len() - raw.trim_start().len();
        let line = raw.trim_start();

        while let Some(&(class_indent, _)) = class_stack.last() {
            if !line.is_empty() && indent <= class_indent {
                class_stack.pop();
            } else {
                break;
            }
        }

        if let Some(rest) = line.strip_prefix("class ") {
            let name_end = rest.find(['(', ':']).unwrap_or(rest.len());
            let name = rest[..name_end].trim().to_string();
            let bases = rest[name_end..]
                .trim_start_matches('(')
                .split([')', ':'])
                .next()
                .unwrap_or("")
                .split(',')
                .map(str::trim)
                .filter(|b| !b.is_empty() && *b != "object")
                .map(ToString::to_string)
                .collect();
            shapes.classes.push(ClassShape {
                name,
                bases,
                overrides: Vec::new(),
                line: line_no,
            });
            class_stack.push((indent, shapes.classes.len() - 1));
        } else if let Some(rest) = strip_def(line) {
            if let Some((name, params)) = parse_params(rest) {
                if let Some(&(_, class_idx)) = class_stack.last() {
                    if KNOWN_OVERRIDES.contains(&name.as_str()) {
                        shapes.classes[class_idx].overrides.push(name.clone());
                    }
                }
                let params: Vec<String> = params
                    .into_iter()
                    .filter(|p| p != "self" && p != "cls")
                    .collect();
                shapes.functions.push(FunctionShape {
                    name,
                    arity: params.len(),
                    params,
                    line: line_no,
                });
            }
        } else if line.starts_with("except") {
            let after = line.trim_start_matches("except").trim();
            let broad = after.is_empty()
                || after == ":"
                || after.starts_with("Exception")
                || after.starts_with("BaseException");
            let caught: Vec<String> = after
                .trim_end_matches(':')
                .split(" as ")
                .next()
                .unwrap_or("")
                .trim_matches(['(', ')'])
                .split(',')
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(ToString::to_string)
                .collect();
            shapes.error_handling.push(ErrorShape {
                caught_types: caught,
                rethrows: false,
                broad_catch: broad,
                line: line_no,
            });
            last_except = Some(shapes.error_handling.len() - 1);
        } else if line.starts_with("raise") {
            if let Some(i) = last_except {
                shapes.error_handling[i].rethrows = true;
            }
        } else if let Some(rest) = line.strip_prefix("import ") {
            shapes.imports.push(ImportShape {
                module: rest.split(" as ").next().unwrap_or(rest).trim().to_string(),
                line: line_no,
            });
        } else if let Some(rest) = line.strip_prefix("from ") {
            if let Some(module) = rest.split(" import ").next() {
                shapes.imports.push(ImportShape {
                    module: module.trim().to_string(),
                    line: line_no,
                });
            }
        }
    }

    shapes
}

fn strip_def(line: &str) -> Option<&str> {
    line.strip_prefix("def ")
        .or_else(|| line.strip_prefix("async def "))
}

/// Split `name(p1, p2, ...)` into the name and parameter names.
fn parse_params(signature: &str) -> Option<(String, Vec<String>)> {
    let open = signature.find('(')?;
    let close = signature.rfind(')')?;
    if close < open {
        return None;
    }
    let name = signature[..open].trim().to_string();
    if name.is_empty() {
        return None;
    }
    let params = signature[open + 1..close]
        .split(',')
        .map(|p| {
            p.split([':', '='])
                .next()
                .unwrap_or("")
                .trim()
                .trim_start_matches(['*', '&'])
                .to_string()
        })
        .filter(|p| !p.is_empty())
        .collect();
    Some((name, params))
}

fn regex_set() -> &'static RegexSet {
    static SET: OnceLock<RegexSet> = OnceLock::new();
    SET.get_or_init(RegexSet::new)
}

struct RegexSet {
    rust_fn: Regex,
    rust_use: Regex,
    rust_unwrap: Regex,
    js_fn: Regex,
    js_arrow: Regex,
    js_catch: Regex,
    js_import: Regex,
    go_fn: Regex,
    go_import: Regex,
    go_err: Regex,
}

impl RegexSet {
    fn new() -> Self {
        Self {
            rust_fn: Regex::new(r"(?m)^\s*(?:pub\s+)?(?:async\s+)?fn\s+(\w+)\s*(?:<[^>]*>)?\s*\(([^)]*)").unwrap(),
            rust_use: Regex::new(r"(?m)^\s*use\s+([\w:]+)").unwrap(),
            rust_unwrap: Regex::new(r"\.(unwrap|expect)\(").unwrap(),
            js_fn: Regex::new(r"(?m)(?:async\s+)?function\s+(\w+)\s*\(([^)]*)").unwrap(),
            js_arrow: Regex::new(r"(?m)(?:const|let)\s+(\w+)\s*=\s*(?:async\s*)?\(([^)]*)\)\s*=>").unwrap(),
            js_catch: Regex::new(r"catch\s*\(\s*(\w*)").unwrap(),
            js_import: Regex::new(r#"(?m)^\s*import\s+.*?from\s+['"]([^'"]+)['"]"#).unwrap(),
            go_fn: Regex::new(r"(?m)^func\s+(?:\([^)]*\)\s*)?(\w+)\s*\(([^)]*)").unwrap(),
            go_import: Regex::new(r#"(?m)^\s*(?:import\s+)?"([\w./-]+)"$"#).unwrap(),
            go_err: Regex::new(r"if\s+err\s*!=\s*nil").unwrap(),
        }
    }
}

fn line_of(content: &str, byte_offset: usize) -> u32 {
    (content[..byte_offset].matches('\n').count() + 1) as u32
}

fn analyze_rust(content: &str) -> FileShapes {
    let mut shapes = FileShapes::empty(Language::Rust);
    let re = regex_set();

    for cap in re.rust_fn.captures_iter(content) {
        let whole = cap.get(0).unwrap();
        let params: Vec<String> = cap[2]
            .split(',')
            .map(|p| {
                let name = p.split(':').next().unwrap_or("").trim();
                name.strip_prefix("mut ").unwrap_or(name).trim_start_matches('&').to_string()
            })
            .filter(|p| !p.is_empty() && p != "self")
            .collect();
        shapes.functions.push(FunctionShape {
            name: cap[1].to_string(),
            arity: params.len(),
            params,
            line: line_of(content, whole.start()),
        });
    }
    for cap in re.rust_use.captures_iter(content) {
        let whole = cap.get(0).unwrap();
        shapes.imports.push(ImportShape {
            module: cap[1].to_string(),
            line: line_of(content, whole.start()),
        });
    }
    for m in re.rust_unwrap.find_iter(content) {
        shapes.error_handling.push(ErrorShape {
            caught_types: Vec::new(),
            rethrows: false,
            broad_catch: true,
            line: line_of(content, m.start()),
        });
    }

    shapes
}

fn analyze_javascript(content: &str) -> FileShapes {
    let mut shapes = FileShapes::empty(Language::JavaScript);
    let re = regex_set();

    for cap in re.js_fn.captures_iter(content).chain(re.js_arrow.captures_iter(content)) {
        let whole = cap.get(0).unwrap();
        let params: Vec<String> = cap[2]
            .split(',')
            .map(|p| p.split(['=', ':']).next().unwrap_or("").trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();
        shapes.functions.push(FunctionShape {
            name: cap[1].to_string(),
            arity: params.len(),
            params,
            line: line_of(content, whole.start()),
        });
    }
    for cap in re.js_catch.captures_iter(content) {
        let whole = cap.get(0).unwrap();
        shapes.error_handling.push(ErrorShape {
            caught_types: Vec::new(),
            rethrows: false,
            broad_catch: true,
            line: line_of(content, whole.start()),
        });
    }
    for cap in re.js_import.captures_iter(content) {
        let whole = cap.get(0).unwrap();
        shapes.imports.push(ImportShape {
            module: cap[1].to_string(),
            line: line_of(content, whole.start()),
        });
    }

    shapes
}

fn analyze_go(content: &str) -> FileShapes {
    let mut shapes = FileShapes::empty(Language::Go);
    let re = regex_set();

    for cap in re.go_fn.captures_iter(content) {
        let whole = cap.get(0).unwrap();
        let params: Vec<String> = cap[2]
            .split(',')
            .map(|p| p.split_whitespace().next().unwrap_or("").to_string())
            .filter(|p| !p.is_empty())
            .collect();
        shapes.functions.push(FunctionShape {
            name: cap[1].to_string(),
            arity: params.len(),
            params,
            line: line_of(content, whole.start()),
        });
    }
    for cap in re.go_import.captures_iter(content) {
        let whole = cap.get(0).unwrap();
        shapes.imports.push(ImportShape {
            module: cap[1].to_string(),
            line: line_of(content, whole.start()),
        });
    }
    for m in re.go_err.find_iter(content) {
        shapes.error_handling.push(ErrorShape {
            caught_types: vec!["error".to_string()],
            rethrows: false,
            broad_catch: false,
            line: line_of(content, m.start()),
        });
    }

    shapes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn python_functions_and_arity() {
        let src = "\
def handler(request, timeout=30):
    return request

async def fetch(url):
    pass
";
        let shapes = analyze_source("app.py", src);
        assert_eq!(shapes.language, Language::Python);
        assert_eq!(shapes.functions.len(), 2);
        assert_eq!(shapes.functions[0].name, "handler");
        assert_eq!(shapes.functions[0].arity, 2);
        assert_eq!(shapes.functions[1].name, "fetch");
        assert!((shapes.confidence - 0.9).abs() < 1e-9);
    }

    #[test]
    fn python_classes_track_bases_and_overrides() {
        let src = "\
class Worker(BaseWorker, Mixin):
    def __init__(self, queue):
        self.queue = queue

    def run(self):
        pass

def free_function():
    pass
";
        let shapes = analyze_source("worker.py", src);
        assert_eq!(shapes.classes.len(), 1);
        assert_eq!(shapes.classes[0].bases, vec!["BaseWorker", "Mixin"]);
        assert_eq!(shapes.classes[0].overrides, vec!["__init__", "run"]);
        // Methods drop self from arity.
        assert_eq!(shapes.functions[0].arity, 1);
        // free_function is outside the class.
        assert_eq!(shapes.functions.len(), 3);
    }

    #[test]
    fn python_error_shapes() {
        let src = "\
try:
    risky()
except ValueError as e:
    raise
try:
    other()
except:
    pass
";
        let shapes = analyze_source("err.py", src);
        assert_eq!(shapes.error_handling.len(), 2);
        assert_eq!(shapes.error_handling[0].caught_types, vec!["ValueError"]);
        assert!(shapes.error_handling[0].rethrows);
        assert!(!shapes.error_handling[0].broad_catch);
        assert!(shapes.error_handling[1].broad_catch);
    }

    #[test]
    fn python_imports() {
        let src = "import os\nfrom pathlib import Path\nimport numpy as np\n";
        let shapes = analyze_source("i.py", src);
        let modules: Vec<&str> = shapes.imports.iter().map(|i| i.module.as_str()).collect();
        assert_eq!(modules, vec!["os", "pathlib", "numpy"]);
    }

    #[test]
    fn rust_fallback_extracts_functions_and_uses() {
        let src = "\
use std::collections::HashMap;

pub async fn handle(req: Request, state: &State) -> Response {
    req.body.unwrap()
}
";
        let shapes = analyze_source("lib.rs", src);
        assert_eq!(shapes.language, Language::Rust);
        assert_eq!(shapes.functions.len(), 1);
        assert_eq!(shapes.functions[0].name, "handle");
        assert_eq!(shapes.functions[0].arity, 2);
        assert_eq!(shapes.imports[0].module, "std::collections::HashMap");
        assert_eq!(shapes.error_handling.len(), 1);
        assert!(shapes.error_handling[0].broad_catch);
        assert!((shapes.confidence - 0.6).abs() < 1e-9);
    }

    #[test]
    fn javascript_fallback_handles_arrows_and_catch() {
        let src = "\
import { api } from './api';

function save(data, options) {
  try { api.post(data); } catch (e) { console.log(e); }
}

const load = async (id) => api.get(id);
";
        let shapes = analyze_source("app.ts", src);
        assert_eq!(shapes.functions.len(), 2);
        assert_eq!(shapes.functions[0].name, "save");
        assert_eq!(shapes.functions[1].name, "load");
        assert_eq!(shapes.error_handling.len(), 1);
        assert_eq!(shapes.imports[0].module, "./api");
    }

    #[test]
    fn go_fallback_counts_err_checks() {
        let src = "\
func Fetch(url string, retries int) error {
\tif err != nil {
\t\treturn err
\t}
\treturn nil
}
";
        let shapes = analyze_source("fetch.go", src);
        assert_eq!(shapes.functions.len(), 1);
        assert_eq!(shapes.functions[0].arity, 2);
        assert_eq!(shapes.error_handling.len(), 1);
        assert!(!shapes.error_handling[0].broad_catch);
    }

    #[test]
    fn binary_and_oversized_input_yield_empty() {
        let shapes = analyze_source("blob.py", "def x():\0binary");
        assert!(shapes.is_empty());

        let big = "x".repeat(MAX_FILE_BYTES + 1);
        let shapes = analyze_source("big.py", &big);
        assert!(shapes.is_empty());
    }

    #[test]
    fn unknown_language_yields_empty() {
        let shapes = analyze_source("data.csv", "a,b,c\n1,2,3\n");
        assert!(shapes.is_empty());
        assert_eq!(shapes.language, Language::Unknown);
    }

    #[test]
    fn malformed_python_does_not_panic() {
        let shapes = analyze_source("bad.py", "def (((\nclass :\nexcept\n");
        // Whatever is salvaged, nothing crashes.
        assert!(shapes.functions.is_empty());
    }

    #[test]
    fn normalized_shape_is_name_independent() {
        let a = analyze_source("a.py", "def first(x, y):\n    pass\n");
        let b = analyze_source("b.py", "def second(p, q):\n    pass\n");
        assert_eq!(a.normalized(), b.normalized());
    }
}
