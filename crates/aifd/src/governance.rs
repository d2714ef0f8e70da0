//! Governance index: markdown docs chunked by heading, keyword-ranked.
//!
//! Crawls the doc_type directory convention under the git root, detects
//! changes by content hash, and keeps per-file updates in one transaction
//! so an interrupted run never leaves a partially chunked file.

use std::path::{Path, PathBuf};

use aif_core::fingerprint::sha256_hex;
use aif_core::types::{Corpus, DocType, GovernanceChunk, SearchHit};
use chrono::Utc;
use sqlx::{Pool, Sqlite};
use tracing::{debug, warn};

use crate::storage::{self, fts_match_expr, normalize_rank, Result};

const GOVERNANCE_SQL: &str = include_str!("../../../migrations/governance.sql");

/// Directory convention, relative to the git root.
pub fn doc_type_root(doc_type: DocType) -> &'static str {
    match doc_type {
        DocType::Rule => ".claude/rules",
        DocType::Adr => "docs/decisions",
        DocType::Template => ".claude/templates",
        DocType::Skill => ".claude/skills",
        DocType::Agent => ".claude/agents",
        DocType::Architecture => "docs/architecture",
        DocType::Project => "docs",
    }
}

/// Summary of one indexing pass.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct IndexReport {
    pub files_scanned: usize,
    pub files_indexed: usize,
    pub files_removed: usize,
    pub chunks: usize,
}

/// Handle over the governance database. Cheap to clone.
#[derive(Debug, Clone)]
pub struct GovernanceIndex {
    pool: Pool<Sqlite>,
    git_root: PathBuf,
}

impl GovernanceIndex {
    pub async fn open(db_path: &Path, git_root: &Path) -> Result<Self> {
        let pool = storage::open_pool(Some(db_path)).await?;
        storage::migrate(&pool, GOVERNANCE_SQL).await?;
        Ok(Self {
            pool,
            git_root: git_root.to_path_buf(),
        })
    }

    pub async fn open_in_memory(git_root: &Path) -> Result<Self> {
        let pool = storage::open_pool(None).await?;
        storage::migrate(&pool, GOVERNANCE_SQL).await?;
        Ok(Self {
            pool,
            git_root: git_root.to_path_buf(),
        })
    }

    /// Crawl all doc roots, re-chunk changed files, drop stale entries.
    pub async fn reindex(&self) -> Result<IndexReport> {
        let mut report = IndexReport::default();
        let mut seen: Vec<String> = Vec::new();

        for doc_type in DocType::ALL {
            let root = self.git_root.join(doc_type_root(doc_type));
            let mut files = Vec::new();
            collect_markdown(&root, &mut files);

            for path in files {
                let rel = path
                    .strip_prefix(&self.git_root)
                    .unwrap_or(&path)
                    .to_string_lossy()
                    .to_string();

                // `docs/` doubles as the project root; more specific doc
                // types under it (decisions, architecture) win.
                if doc_type == DocType::Project && seen.contains(&rel) {
                    continue;
                }

                report.files_scanned += 1;
                seen.push(rel.clone());

                let bytes = match std::fs::read(&path) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "skipping unreadable doc");
                        continue;
                    }
                };
                let hash = sha256_hex(&bytes);

                let stored: Option<(String,)> =
                    sqlx::query_as("SELECT content_hash FROM files WHERE file_path = ?1")
                        .bind(&rel)
                        .fetch_optional(&self.pool)
                        .await?;
                if stored.as_ref().map(|s| s.0.as_str()) == Some(hash.as_str()) {
                    continue;
                }

                let content = String::from_utf8_lossy(&bytes);
                let chunks = chunk_markdown(&rel, doc_type, &content, &hash);
                self.replace_file(&rel, doc_type, &hash, &chunks).await?;
                report.files_indexed += 1;
                report.chunks += chunks.len();
            }
        }

        // Remove files that disappeared from disk.
        let indexed: Vec<(String,)> = sqlx::query_as("SELECT file_path FROM files")
            .fetch_all(&self.pool)
            .await?;
        for (file_path,) in indexed {
            if !seen.contains(&file_path) {
                self.remove_file(&file_path).await?;
                report.files_removed += 1;
            }
        }

        debug!(
            scanned = report.files_scanned,
            indexed = report.files_indexed,
            removed = report.files_removed,
            "governance reindex complete"
        );
        Ok(report)
    }

    /// Delete-and-reinsert all chunks for one file in a single transaction.
    async fn replace_file(
        &self,
        file_path: &str,
        doc_type: DocType,
        content_hash: &str,
        chunks: &[GovernanceChunk],
    ) -> Result<()> {
        let now = Utc::now().timestamp_millis();
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM chunks WHERE file_path = ?1")
            .bind(file_path)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM chunks_fts WHERE file_path = ?1")
            .bind(file_path)
            .execute(&mut *tx)
            .await?;

        for chunk in chunks {
            sqlx::query(
                "INSERT INTO chunks (file_path, chunk_index, doc_type, heading, body, content_hash, indexed_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )
            .bind(&chunk.file_path)
            .bind(i64::from(chunk.chunk_index))
            .bind(chunk.doc_type.as_str())
            .bind(&chunk.heading)
            .bind(&chunk.body)
            .bind(&chunk.content_hash)
            .bind(now)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "INSERT INTO chunks_fts (file_path, chunk_index, heading, body) \
                 VALUES (?1, ?2, ?3, ?4)",
            )
            .bind(&chunk.file_path)
            .bind(i64::from(chunk.chunk_index))
            .bind(&chunk.heading)
            .bind(&chunk.body)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            "INSERT INTO files (file_path, doc_type, content_hash, indexed_at) VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT(file_path) DO UPDATE SET content_hash = ?3, indexed_at = ?4",
        )
        .bind(file_path)
        .bind(doc_type.as_str())
        .bind(content_hash)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn remove_file(&self, file_path: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM chunks WHERE file_path = ?1")
            .bind(file_path)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM chunks_fts WHERE file_path = ?1")
            .bind(file_path)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM files WHERE file_path = ?1")
            .bind(file_path)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Ranked search over chunk headings and bodies.
    pub async fn search(
        &self,
        query: &str,
        doc_type: Option<DocType>,
        top_k: u32,
    ) -> Result<Vec<SearchHit>> {
        let expr = fts_match_expr(query);
        if expr.is_empty() {
            return Ok(Vec::new());
        }

        // bm25 ranks first; ties break toward the most recently indexed.
        let rows: Vec<(String, i64, f64)> = match doc_type {
            Some(doc_type) => {
                sqlx::query_as(
                    "SELECT chunks_fts.file_path, chunks_fts.chunk_index, bm25(chunks_fts) AS rank \
                     FROM chunks_fts \
                     JOIN chunks c ON c.file_path = chunks_fts.file_path \
                       AND c.chunk_index = chunks_fts.chunk_index \
                     WHERE chunks_fts MATCH ?1 AND c.doc_type = ?2 \
                     ORDER BY rank, c.indexed_at DESC LIMIT ?3",
                )
                .bind(&expr)
                .bind(doc_type.as_str())
                .bind(i64::from(top_k))
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as(
                    "SELECT chunks_fts.file_path, chunks_fts.chunk_index, bm25(chunks_fts) AS rank \
                     FROM chunks_fts \
                     JOIN chunks c ON c.file_path = chunks_fts.file_path \
                       AND c.chunk_index = chunks_fts.chunk_index \
                     WHERE chunks_fts MATCH ?1 \
                     ORDER BY rank, c.indexed_at DESC LIMIT ?2",
                )
                .bind(&expr)
                .bind(i64::from(top_k))
                .fetch_all(&self.pool)
                .await?
            }
        };

        let mut hits = Vec::with_capacity(rows.len());
        for (file_path, chunk_index, rank) in rows {
            let chunk: Option<(String, String)> = sqlx::query_as(
                "SELECT heading, body FROM chunks WHERE file_path = ?1 AND chunk_index = ?2",
            )
            .bind(&file_path)
            .bind(chunk_index)
            .fetch_optional(&self.pool)
            .await?;
            if let Some((heading, body)) = chunk {
                hits.push(SearchHit {
                    corpus: Corpus::Governance,
                    path: file_path,
                    title: heading,
                    snippet: snippet_of(&body),
                    score: normalize_rank(rank),
                });
            }
        }
        Ok(hits)
    }

    /// All chunks currently stored for a file, in order.
    pub async fn chunks_for(&self, file_path: &str) -> Result<Vec<GovernanceChunk>> {
        let rows: Vec<(String, i64, String, String, String, String)> = sqlx::query_as(
            "SELECT file_path, chunk_index, doc_type, heading, body, content_hash \
             FROM chunks WHERE file_path = ?1 ORDER BY chunk_index",
        )
        .bind(file_path)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(file_path, chunk_index, doc_type, heading, body, content_hash)| {
                GovernanceChunk {
                    file_path,
                    chunk_index: chunk_index as u32,
                    doc_type: DocType::parse(&doc_type).unwrap_or(DocType::Project),
                    heading,
                    body,
                    content_hash,
                }
            })
            .collect())
    }

    /// Number of indexed chunks across all files.
    pub async fn chunk_count(&self) -> Result<u64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0 as u64)
    }
}

/// First ~200 chars of a chunk body, cut at a char boundary.
fn snippet_of(body: &str) -> String {
    let mut snippet: String = body.chars().take(200).collect();
    if snippet.len() < body.len() {
        snippet.push('…');
    }
    snippet
}

/// Recursively collect `.md` files under a root.
fn collect_markdown(root: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(root) else {
        return;
    };
    let mut paths: Vec<PathBuf> = entries.filter_map(|e| e.ok()).map(|e| e.path()).collect();
    paths.sort();
    for path in paths {
        if path.is_dir() {
            collect_markdown(&path, out);
        } else if path.extension().and_then(|e| e.to_str()) == Some("md") {
            out.push(path);
        }
    }
}

/// Split markdown at top-level `# ` heading lines.
///
/// Content before the first heading becomes chunk 0 with an empty heading;
/// every chunk carries the file's content hash.
fn chunk_markdown(
    file_path: &str,
    doc_type: DocType,
    content: &str,
    content_hash: &str,
) -> Vec<GovernanceChunk> {
    let mut chunks: Vec<GovernanceChunk> = Vec::new();
    let mut heading = String::new();
    let mut body: Vec<&str> = Vec::new();

    let push = |heading: &str, body: &[&str], chunks: &mut Vec<GovernanceChunk>| {
        let text = body.join("\n").trim().to_string();
        if text.is_empty() && heading.is_empty() {
            return;
        }
        chunks.push(GovernanceChunk {
            file_path: file_path.to_string(),
            chunk_index: chunks.len() as u32,
            doc_type,
            heading: heading.to_string(),
            body: text,
            content_hash: content_hash.to_string(),
        });
    };

    for line in content.lines() {
        if let Some(rest) = line.strip_prefix("# ") {
            push(&heading, &body, &mut chunks);
            heading = rest.trim().to_string();
            body.clear();
        } else {
            body.push(line);
        }
    }
    push(&heading, &body, &mut chunks);

    chunks
}
