//! Unified retriever: query classification, fan-out, and result merge.
//!
//! Code queries go to the code backend, governance queries to the doc
//! index, and everything else fans out to both concurrently. The merge
//! guarantees each corpus a floor of ⌈top_k/2⌉ slots before the remainder
//! is filled by score. One dead backend degrades a hybrid query instead of
//! failing it.

use aif_core::types::{Corpus, DocType, SearchHit};
use tracing::warn;

use crate::code_search::CodeSearch;
use crate::governance::GovernanceIndex;

/// Keywords that route a query to the code corpus.
const CODE_KEYWORDS: [&str; 4] = ["function", "class", "import", "endpoint"];

/// Keywords that route a query to the governance corpus.
const GOVERNANCE_KEYWORDS: [&str; 6] =
    ["rule", "adr", "decision", "policy", "standard", "convention"];

/// Classify a free-form query into a corpus choice.
pub fn classify(query: &str) -> Corpus {
    let lower = query.to_lowercase();
    let mut code = false;
    let mut governance = false;

    for token in lower.split_whitespace() {
        if CODE_KEYWORDS.contains(&token) {
            code = true;
        }
        if GOVERNANCE_KEYWORDS.contains(&token.trim_end_matches('s')) {
            governance = true;
        }
        if looks_like_path(token) || looks_like_identifier(token) {
            code = true;
        }
    }

    match (code, governance) {
        (true, false) => Corpus::Code,
        (false, true) => Corpus::Governance,
        _ => Corpus::Hybrid,
    }
}

fn looks_like_path(token: &str) -> bool {
    (token.contains('/') && token.len() > 2)
        || token.ends_with(".rs")
        || token.ends_with(".py")
        || token.ends_with(".ts")
        || token.ends_with(".go")
}

fn looks_like_identifier(token: &str) -> bool {
    let token = token.trim_matches(|c: char| !c.is_ascii_alphanumeric() && c != '_' && c != ':');
    if token.contains("::") || token.ends_with("()") {
        return true;
    }
    // snake_case or CamelCase shapes.
    let has_underscore = token.contains('_') && token.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    let camel = token.len() > 2
        && token.chars().next().is_some_and(char::is_uppercase)
        && token.chars().skip(1).any(char::is_uppercase)
        && token.chars().all(char::is_alphanumeric);
    has_underscore || camel
}

/// Result of a unified search, including which corpus was chosen.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RetrievalResult {
    pub corpus: Corpus,
    pub hits: Vec<SearchHit>,
    /// Backends that were skipped because they were unavailable.
    pub degraded: Vec<String>,
}

/// Composes the two corpus adapters behind one query contract.
#[derive(Debug, Clone)]
pub struct Retriever {
    code: Option<CodeSearch>,
    governance: Option<GovernanceIndex>,
}

impl Retriever {
    pub fn new(code: Option<CodeSearch>, governance: Option<GovernanceIndex>) -> Self {
        Self { code, governance }
    }

    /// Search the requested corpus (or classify when unset).
    pub async fn search(
        &self,
        query: &str,
        corpus: Option<Corpus>,
        top_k: u32,
    ) -> RetrievalResult {
        let corpus = corpus.unwrap_or_else(|| classify(query));
        match corpus {
            Corpus::Code => {
                let (hits, degraded) = self.search_code(query, top_k).await;
                RetrievalResult {
                    corpus,
                    hits,
                    degraded,
                }
            }
            Corpus::Governance => {
                let (hits, degraded) = self.search_governance(query, None, top_k).await;
                RetrievalResult {
                    corpus,
                    hits,
                    degraded,
                }
            }
            Corpus::Hybrid => {
                let (code_result, governance_result) = tokio::join!(
                    self.search_code(query, top_k),
                    self.search_governance(query, None, top_k),
                );
                let mut degraded = code_result.1;
                degraded.extend(governance_result.1);
                RetrievalResult {
                    corpus,
                    hits: merge(code_result.0, governance_result.0, top_k),
                    degraded,
                }
            }
        }
    }

    async fn search_code(&self, query: &str, top_k: u32) -> (Vec<SearchHit>, Vec<String>) {
        let Some(code) = &self.code else {
            return (Vec::new(), vec!["code".to_string()]);
        };
        match code.search(query, top_k).await {
            Ok(hits) => (hits, Vec::new()),
            Err(e) => {
                warn!(error = %e, "code backend degraded, skipping");
                (Vec::new(), vec!["code".to_string()])
            }
        }
    }

    async fn search_governance(
        &self,
        query: &str,
        doc_type: Option<DocType>,
        top_k: u32,
    ) -> (Vec<SearchHit>, Vec<String>) {
        let Some(governance) = &self.governance else {
            return (Vec::new(), vec!["governance".to_string()]);
        };
        match governance.search(query, doc_type, top_k).await {
            Ok(hits) => (hits, Vec::new()),
            Err(e) => {
                warn!(error = %e, "governance backend degraded, skipping");
                (Vec::new(), vec!["governance".to_string()])
            }
        }
    }
}

/// Merge two ranked lists with a per-corpus floor of ⌈top_k/2⌉.
///
/// Each corpus keeps up to the floor of its best hits; the remaining slots
/// go to the higher-scoring tail across both corpora.
fn merge(code: Vec<SearchHit>, governance: Vec<SearchHit>, top_k: u32) -> Vec<SearchHit> {
    let top_k = top_k as usize;
    let floor = top_k.div_ceil(2);

    let mut code = code;
    let mut governance = governance;
    code.sort_by(|a, b| b.score.total_cmp(&a.score));
    governance.sort_by(|a, b| b.score.total_cmp(&a.score));

    let code_take = code.len().min(floor);
    let governance_take = governance.len().min(floor);

    let mut merged: Vec<SearchHit> = Vec::with_capacity(top_k);
    let mut code_tail = code.split_off(code_take);
    let mut governance_tail = governance.split_off(governance_take);
    merged.extend(code);
    merged.extend(governance);

    // Pad with the best of the remainder.
    let mut tail: Vec<SearchHit> = Vec::new();
    tail.append(&mut code_tail);
    tail.append(&mut governance_tail);
    tail.sort_by(|a, b| b.score.total_cmp(&a.score));
    for hit in tail {
        if merged.len() >= top_k {
            break;
        }
        merged.push(hit);
    }

    merged.sort_by(|a, b| b.score.total_cmp(&a.score));
    merged.truncate(top_k);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(corpus: Corpus, path: &str, score: f64) -> SearchHit {
        SearchHit {
            corpus,
            path: path.to_string(),
            title: path.to_string(),
            snippet: String::new(),
            score,
        }
    }

    #[test]
    fn classify_routes_code_queries() {
        assert_eq!(classify("where is the function parse_verdict"), Corpus::Code);
        assert_eq!(classify("src/server.rs handler"), Corpus::Code);
        assert_eq!(classify("HttpServer::bind usage"), Corpus::Code);
        assert_eq!(classify("what does fetch_events() do"), Corpus::Code);
    }

    #[test]
    fn classify_routes_governance_queries() {
        assert_eq!(classify("error handling convention"), Corpus::Governance);
        assert_eq!(classify("what is the logging policy"), Corpus::Governance);
        assert_eq!(classify("adr about storage"), Corpus::Governance);
    }

    #[test]
    fn classify_defaults_to_hybrid() {
        assert_eq!(classify("how does retry work"), Corpus::Hybrid);
        // Mixed signals also go hybrid.
        assert_eq!(classify("naming convention for parse_verdict"), Corpus::Hybrid);
    }

    #[test]
    fn merge_guarantees_per_corpus_floor() {
        let code: Vec<SearchHit> = (0..8)
            .map(|i| hit(Corpus::Code, &format!("c{i}"), 0.9 - i as f64 * 0.01))
            .collect();
        let governance = vec![
            hit(Corpus::Governance, "g0", 0.3),
            hit(Corpus::Governance, "g1", 0.2),
        ];

        let merged = merge(code, governance, 6);
        assert_eq!(merged.len(), 6);
        let governance_count = merged
            .iter()
            .filter(|h| h.corpus == Corpus::Governance)
            .count();
        // Both governance hits survive despite lower scores: floor is 3.
        assert_eq!(governance_count, 2);
    }

    #[test]
    fn merge_pads_with_higher_scoring_tail() {
        let code: Vec<SearchHit> = (0..6)
            .map(|i| hit(Corpus::Code, &format!("c{i}"), 0.9 - i as f64 * 0.01))
            .collect();
        let governance = vec![hit(Corpus::Governance, "g0", 0.5)];

        let merged = merge(code, governance, 6);
        assert_eq!(merged.len(), 6);
        // Floor used 3 code + 1 governance; padding picks the best code tail.
        let code_count = merged.iter().filter(|h| h.corpus == Corpus::Code).count();
        assert_eq!(code_count, 5);
    }

    #[test]
    fn merge_is_sorted_and_truncated() {
        let code = vec![hit(Corpus::Code, "c", 0.4)];
        let governance = vec![hit(Corpus::Governance, "g", 0.8)];
        let merged = merge(code, governance, 1);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].path, "g");
    }

    #[tokio::test]
    async fn hybrid_with_no_backends_degrades_to_empty() {
        let retriever = Retriever::new(None, None);
        let result = retriever.search("anything", Some(Corpus::Hybrid), 10).await;
        assert!(result.hits.is_empty());
        assert_eq!(result.degraded, vec!["code", "governance"]);
    }

    #[tokio::test]
    async fn governance_only_search_works_without_code_backend() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".claude/rules")).unwrap();
        std::fs::write(
            dir.path().join(".claude/rules/err.md"),
            "# Error handling convention\nAlways propagate with question mark.\n",
        )
        .unwrap();
        let governance = GovernanceIndex::open_in_memory(dir.path()).await.unwrap();
        governance.reindex().await.unwrap();

        let retriever = Retriever::new(None, Some(governance));
        let result = retriever
            .search("error handling convention", Some(Corpus::Hybrid), 10)
            .await;
        assert_eq!(result.hits.len(), 1);
        assert_eq!(result.degraded, vec!["code"]);
        assert_eq!(result.hits[0].corpus, Corpus::Governance);
    }
}
