//! Memory store: durable observations and sessions.
//!
//! Events are append-only; search goes through an FTS5 index with a porter
//! stemmer so "handling" matches "handle". Readers sort explicitly since
//! appends carry no ordering guarantee beyond `created_at`.

use std::collections::BTreeMap;
use std::path::Path;

use aif_core::types::{EventKind, Id, MemoryEvent, Session};
use chrono::{DateTime, Utc};
use sqlx::{Pool, Sqlite};

use crate::storage::{self, fts_match_expr, normalize_rank, Result, StorageError};

const MEMORY_SQL: &str = include_str!("../../../migrations/memory.sql");

const EVENT_COLUMNS: &str =
    "id, created_at, kind, text, tags_json, refs_json, importance, session_id";

/// Handle over the memory database. Cheap to clone.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    pool: Pool<Sqlite>,
}

/// A scored search result.
#[derive(Debug, Clone)]
pub struct ScoredEvent {
    pub event: MemoryEvent,
    pub score: f64,
}

impl MemoryStore {
    /// Open `memory.db` under the data directory and migrate.
    pub async fn open(db_path: &Path) -> Result<Self> {
        let pool = storage::open_pool(Some(db_path)).await?;
        storage::migrate(&pool, MEMORY_SQL).await?;
        Ok(Self { pool })
    }

    /// In-memory variant for tests.
    pub async fn open_in_memory() -> Result<Self> {
        let pool = storage::open_pool(None).await?;
        storage::migrate(&pool, MEMORY_SQL).await?;
        Ok(Self { pool })
    }

    /// Append an event. Events are never mutated or deleted.
    pub async fn save_event(&self, event: &MemoryEvent) -> Result<()> {
        let tags_json = serde_json::to_string(&event.tags)?;
        let refs_json = serde_json::to_string(&event.refs)?;

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO events (id, created_at, kind, text, tags_json, refs_json, importance, session_id) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(event.id.as_ref())
        .bind(event.created_at.timestamp_millis())
        .bind(event.kind.as_str())
        .bind(&event.text)
        .bind(&tags_json)
        .bind(&refs_json)
        .bind(event.importance)
        .bind(&event.session_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("INSERT INTO events_fts (event_id, text) VALUES (?1, ?2)")
            .bind(event.id.as_ref())
            .bind(&event.text)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(())
    }

    /// Full-text search over event text, best first.
    pub async fn search(&self, query: &str, limit: u32) -> Result<Vec<ScoredEvent>> {
        let expr = fts_match_expr(query);
        if expr.is_empty() {
            return Ok(Vec::new());
        }

        let rows: Vec<(String, f64)> = sqlx::query_as(
            "SELECT event_id, bm25(events_fts) AS rank FROM events_fts \
             WHERE events_fts MATCH ?1 ORDER BY rank LIMIT ?2",
        )
        .bind(&expr)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        let mut results = Vec::with_capacity(rows.len());
        for (event_id, rank) in rows {
            if let Some(event) = self.get_event(&Id::from_string(event_id)).await? {
                results.push(ScoredEvent {
                    event,
                    score: normalize_rank(rank),
                });
            }
        }
        Ok(results)
    }

    /// Events within `[since, until]`, oldest first.
    pub async fn timeline(
        &self,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
        limit: u32,
    ) -> Result<Vec<MemoryEvent>> {
        let since_ms = since.map_or(0, |t| t.timestamp_millis());
        let until_ms = until.map_or(i64::MAX, |t| t.timestamp_millis());

        let query = format!(
            "SELECT {EVENT_COLUMNS} FROM events \
             WHERE created_at >= ?1 AND created_at <= ?2 \
             ORDER BY created_at ASC LIMIT ?3"
        );
        let rows = sqlx::query_as::<_, EventRow>(&query)
            .bind(since_ms)
            .bind(until_ms)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(EventRow::into_event).collect()
    }

    /// Fetch a single event by id.
    pub async fn get_event(&self, id: &Id) -> Result<Option<MemoryEvent>> {
        let query = format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = ?1");
        let row = sqlx::query_as::<_, EventRow>(&query)
            .bind(id.as_ref())
            .fetch_optional(&self.pool)
            .await?;
        row.map(EventRow::into_event).transpose()
    }

    /// Fetch several events by id; unknown ids are silently dropped.
    pub async fn fetch_events(&self, ids: &[Id]) -> Result<Vec<MemoryEvent>> {
        let mut events = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(event) = self.get_event(id).await? {
                events.push(event);
            }
        }
        Ok(events)
    }

    /// Create or return a session. A missing id maps to `"default"`.
    pub async fn init_session(
        &self,
        session_id: Option<&str>,
        project: Option<&str>,
        initial_prompt: Option<&str>,
    ) -> Result<Session> {
        let session_id = session_id.unwrap_or("default");
        if let Some(existing) = self.get_session(session_id).await? {
            return Ok(existing);
        }

        let session = Session {
            session_id: session_id.to_string(),
            started_at: Utc::now(),
            ended_at: None,
            project: project.map(ToString::to_string),
            initial_prompt: initial_prompt.map(ToString::to_string),
        };

        sqlx::query(
            "INSERT INTO sessions (session_id, started_at, ended_at, project, initial_prompt) \
             VALUES (?1, ?2, NULL, ?3, ?4)",
        )
        .bind(&session.session_id)
        .bind(session.started_at.timestamp_millis())
        .bind(&session.project)
        .bind(&session.initial_prompt)
        .execute(&self.pool)
        .await?;

        Ok(session)
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        let row = sqlx::query_as::<_, SessionRow>(
            "SELECT session_id, started_at, ended_at, project, initial_prompt \
             FROM sessions WHERE session_id = ?1",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(SessionRow::into_session))
    }

    /// Mark a session ended. `ended_at` never precedes `started_at`.
    pub async fn end_session(&self, session_id: &str) -> Result<()> {
        let session = self
            .get_session(session_id)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("session: {session_id}")))?;
        let ended_at = Utc::now().max(session.started_at);
        sqlx::query("UPDATE sessions SET ended_at = ?1 WHERE session_id = ?2")
            .bind(ended_at.timestamp_millis())
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Most recent sessions first.
    pub async fn list_sessions(&self, limit: u32) -> Result<Vec<Session>> {
        let rows = sqlx::query_as::<_, SessionRow>(
            "SELECT session_id, started_at, ended_at, project, initial_prompt \
             FROM sessions ORDER BY started_at DESC LIMIT ?1",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(SessionRow::into_session).collect())
    }
}

#[derive(sqlx::FromRow)]
struct EventRow {
    id: String,
    created_at: i64,
    kind: String,
    text: String,
    tags_json: String,
    refs_json: String,
    importance: f64,
    session_id: Option<String>,
}

impl EventRow {
    fn into_event(self) -> Result<MemoryEvent> {
        let tags: Vec<String> = serde_json::from_str(&self.tags_json)?;
        let refs: BTreeMap<String, String> = serde_json::from_str(&self.refs_json)?;
        Ok(MemoryEvent {
            id: Id::from_string(self.id),
            created_at: DateTime::from_timestamp_millis(self.created_at).unwrap_or_default(),
            kind: EventKind::parse(&self.kind),
            text: self.text,
            tags,
            refs,
            importance: self.importance,
            session_id: self.session_id,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    session_id: String,
    started_at: i64,
    ended_at: Option<i64>,
    project: Option<String>,
    initial_prompt: Option<String>,
}

impl SessionRow {
    fn into_session(self) -> Session {
        Session {
            session_id: self.session_id,
            started_at: DateTime::from_timestamp_millis(self.started_at).unwrap_or_default(),
            ended_at: self.ended_at.and_then(DateTime::from_timestamp_millis),
            project: self.project,
            initial_prompt: self.initial_prompt,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> MemoryStore {
        MemoryStore::open_in_memory().await.unwrap()
    }

    #[tokio::test]
    async fn save_then_search_by_exact_text() {
        let store = store().await;
        let event = MemoryEvent::new(EventKind::Lesson, "always stash before worktree sync")
            .with_importance(0.8);
        store.save_event(&event).await.unwrap();

        let hits = store.search("worktree sync", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].event.id, event.id);
        assert!(hits[0].score > 0.0 && hits[0].score <= 1.0);
    }

    #[tokio::test]
    async fn search_matches_stemmed_terms() {
        let store = store().await;
        let event = MemoryEvent::new(EventKind::Discovery, "retries fixed the flaky handling");
        store.save_event(&event).await.unwrap();

        // Porter stemming folds "handle" into "handling".
        let hits = store.search("handle", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn search_with_punctuation_does_not_error() {
        let store = store().await;
        store
            .save_event(&MemoryEvent::new(EventKind::Event, "calls foo_bar() in a loop"))
            .await
            .unwrap();
        let hits = store.search("foo_bar()", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn timeline_filters_and_sorts() {
        let store = store().await;
        let mut early = MemoryEvent::new(EventKind::Event, "early");
        early.created_at = DateTime::from_timestamp_millis(1_000).unwrap();
        let mut late = MemoryEvent::new(EventKind::Event, "late");
        late.created_at = DateTime::from_timestamp_millis(5_000).unwrap();
        store.save_event(&late).await.unwrap();
        store.save_event(&early).await.unwrap();

        let all = store.timeline(None, None, 10).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].text, "early");

        let since = store
            .timeline(DateTime::from_timestamp_millis(2_000), None, 10)
            .await
            .unwrap();
        assert_eq!(since.len(), 1);
        assert_eq!(since[0].text, "late");
    }

    #[tokio::test]
    async fn fetch_events_drops_unknown_ids() {
        let store = store().await;
        let event = MemoryEvent::new(EventKind::Decision, "kept sqlite");
        store.save_event(&event).await.unwrap();

        let fetched = store
            .fetch_events(&[event.id.clone(), Id::new()])
            .await
            .unwrap();
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].refs, BTreeMap::new());
    }

    #[tokio::test]
    async fn event_round_trips_tags_and_refs() {
        let store = store().await;
        let event = MemoryEvent::new(EventKind::Decision, "accepted rule")
            .with_tags(vec!["Learning".to_string()])
            .with_ref("artifact_path", ".claude/rules/learning-x.md")
            .with_session("sess-1");
        store.save_event(&event).await.unwrap();

        let fetched = store.get_event(&event.id).await.unwrap().unwrap();
        assert_eq!(fetched.tags, vec!["learning"]);
        assert_eq!(
            fetched.refs.get("artifact_path").map(String::as_str),
            Some(".claude/rules/learning-x.md")
        );
        assert_eq!(fetched.session_id.as_deref(), Some("sess-1"));
    }

    #[tokio::test]
    async fn init_session_defaults_and_is_idempotent() {
        let store = store().await;
        let first = store.init_session(None, Some("demo"), None).await.unwrap();
        assert_eq!(first.session_id, "default");

        let second = store.init_session(None, None, None).await.unwrap();
        assert_eq!(second.session_id, "default");
        assert_eq!(second.project.as_deref(), Some("demo"));

        let listed = store.list_sessions(10).await.unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn end_session_sets_ended_at() {
        let store = store().await;
        store.init_session(Some("s1"), None, None).await.unwrap();
        store.end_session("s1").await.unwrap();
        let session = store.get_session("s1").await.unwrap().unwrap();
        let ended = session.ended_at.unwrap();
        assert!(ended >= session.started_at);
    }

    #[tokio::test]
    async fn end_unknown_session_is_not_found() {
        let store = store().await;
        let err = store.end_session("ghost").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }
}
