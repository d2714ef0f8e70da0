//! Analytics: failure-event dedupe, trends, and rule effectiveness.
//!
//! Failure events arrive from hooks and are deduped per UTC day by their
//! signature hash. Effectiveness compares a rule's current failure rate in
//! its category against the baseline snapshotted at acceptance.

use aif_core::fingerprint::failure_signature;
use aif_core::types::{FailureCategory, FailureEvent, RuleBaseline};
use chrono::{Duration, NaiveDate, Utc};
use serde::Serialize;
use sqlx::{Pool, Sqlite};

use crate::storage::Result;

/// Effectiveness verdict thresholds.
const EFFECTIVE_ABOVE: f64 = 0.6;
const INEFFECTIVE_BELOW: f64 = 0.4;

/// Store over the analytics tables (shared with `learning.db`).
#[derive(Debug, Clone)]
pub struct AnalyticsStore {
    pool: Pool<Sqlite>,
}

/// Aggregate failure counts for a window.
#[derive(Debug, Clone, Serialize)]
pub struct FailureSummary {
    pub window_days: u32,
    pub total: u64,
    pub by_category: Vec<(String, u64)>,
}

/// One day's failure count.
#[derive(Debug, Clone, Serialize)]
pub struct TrendPoint {
    pub day: NaiveDate,
    pub count: u64,
}

/// A file ranked by failure count.
#[derive(Debug, Clone, Serialize)]
pub struct Hotspot {
    pub file_path: String,
    pub count: u64,
}

/// Effectiveness of one accepted rule.
#[derive(Debug, Clone, Serialize)]
pub struct Effectiveness {
    pub proposal_id: String,
    pub category: String,
    pub baseline_failures_per_day: f64,
    pub current_failures_per_day: f64,
    pub score: f64,
    pub verdict: String,
}

/// score = clamp(1 − ratio/2, 0, 1); non-increasing in the current rate.
pub fn effectiveness_score(current_per_day: f64, baseline_per_day: f64) -> f64 {
    let ratio = current_per_day / baseline_per_day.max(0.01);
    (1.0 - ratio / 2.0).clamp(0.0, 1.0)
}

/// effective > 0.6, neutral 0.4..=0.6, ineffective < 0.4.
pub fn effectiveness_verdict(score: f64) -> &'static str {
    if score > EFFECTIVE_ABOVE {
        "effective"
    } else if score < INEFFECTIVE_BELOW {
        "ineffective"
    } else {
        "neutral"
    }
}

impl AnalyticsStore {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    /// Record a failure event; at most one row per signature per day.
    /// Returns false when the event was a same-day duplicate.
    pub async fn record_failure(
        &self,
        category: FailureCategory,
        file_path: &str,
        detail: &str,
    ) -> Result<bool> {
        let day = Utc::now().date_naive();
        let event = FailureEvent {
            category,
            file_path: file_path.to_string(),
            detail: detail.chars().take(200).collect(),
            day,
            signature_hash: failure_signature(category, file_path, detail, day),
        };

        let result = sqlx::query(
            "INSERT OR IGNORE INTO failure_events (signature_hash, category, file_path, detail, day) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(&event.signature_hash)
        .bind(event.category.as_str())
        .bind(&event.file_path)
        .bind(&event.detail)
        .bind(event.day.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Failure totals over the last `days`, bucketed by category.
    pub async fn summary(&self, days: u32) -> Result<FailureSummary> {
        let floor = day_floor(days);
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT category, COUNT(*) FROM failure_events WHERE day >= ?1 \
             GROUP BY category ORDER BY COUNT(*) DESC",
        )
        .bind(&floor)
        .fetch_all(&self.pool)
        .await?;

        let total = rows.iter().map(|(_, c)| *c as u64).sum();
        Ok(FailureSummary {
            window_days: days,
            total,
            by_category: rows.into_iter().map(|(c, n)| (c, n as u64)).collect(),
        })
    }

    /// Per-day counts over the last `days`, bucketed on UTC date.
    pub async fn trend(&self, days: u32) -> Result<Vec<TrendPoint>> {
        let floor = day_floor(days);
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT day, COUNT(*) FROM failure_events WHERE day >= ?1 GROUP BY day ORDER BY day",
        )
        .bind(&floor)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .filter_map(|(day, count)| {
                day.parse()
                    .ok()
                    .map(|day| TrendPoint { day, count: count as u64 })
            })
            .collect())
    }

    /// Files with the most failures in the window.
    pub async fn hotspots(&self, days: u32, top: u32) -> Result<Vec<Hotspot>> {
        let floor = day_floor(days);
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT file_path, COUNT(*) FROM failure_events WHERE day >= ?1 \
             GROUP BY file_path ORDER BY COUNT(*) DESC, file_path LIMIT ?2",
        )
        .bind(&floor)
        .bind(i64::from(top))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(file_path, count)| Hotspot {
                file_path,
                count: count as u64,
            })
            .collect())
    }

    /// Average failures per day for one category over a window.
    pub async fn failures_per_day(&self, category: FailureCategory, days: u32) -> Result<f64> {
        let floor = day_floor(days);
        let count: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM failure_events WHERE category = ?1 AND day >= ?2",
        )
        .bind(category.as_str())
        .bind(&floor)
        .fetch_one(&self.pool)
        .await?;
        Ok(count.0 as f64 / f64::from(days.max(1)))
    }

    /// Score every baseline against the current rate in its category.
    pub async fn effectiveness(&self, baselines: &[RuleBaseline]) -> Result<Vec<Effectiveness>> {
        let mut out = Vec::with_capacity(baselines.len());
        for baseline in baselines {
            let current = self
                .failures_per_day(baseline.category, baseline.baseline_window_days)
                .await?;
            let score = effectiveness_score(current, baseline.baseline_failures_per_day);
            out.push(Effectiveness {
                proposal_id: baseline.proposal_id.to_string(),
                category: baseline.category.as_str().to_string(),
                baseline_failures_per_day: baseline.baseline_failures_per_day,
                current_failures_per_day: current,
                score,
                verdict: effectiveness_verdict(score).to_string(),
            });
        }
        Ok(out)
    }
}

/// Inclusive lower bound for a day window, as the stored `YYYY-MM-DD` text.
fn day_floor(days: u32) -> String {
    (Utc::now().date_naive() - Duration::days(i64::from(days.saturating_sub(1)))).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage;

    const LEARNING_SQL: &str = include_str!("../../../migrations/learning.sql");

    async fn store() -> AnalyticsStore {
        let pool = storage::open_pool(None).await.unwrap();
        storage::migrate(&pool, LEARNING_SQL).await.unwrap();
        AnalyticsStore::new(pool)
    }

    #[tokio::test]
    async fn same_day_duplicates_are_ignored() {
        let analytics = store().await;
        assert!(analytics
            .record_failure(FailureCategory::Lint, "src/a.rs", "unused import")
            .await
            .unwrap());
        assert!(!analytics
            .record_failure(FailureCategory::Lint, "src/a.rs", "unused import")
            .await
            .unwrap());

        let summary = analytics.summary(7).await.unwrap();
        assert_eq!(summary.total, 1);
    }

    #[tokio::test]
    async fn different_detail_is_a_new_event() {
        let analytics = store().await;
        analytics
            .record_failure(FailureCategory::Test, "src/a.rs", "first failure")
            .await
            .unwrap();
        analytics
            .record_failure(FailureCategory::Test, "src/a.rs", "second failure")
            .await
            .unwrap();

        let summary = analytics.summary(7).await.unwrap();
        assert_eq!(summary.total, 2);
        assert_eq!(summary.by_category[0].0, "test");
    }

    #[tokio::test]
    async fn detail_truncation_dedupes_long_messages() {
        let analytics = store().await;
        let long_a = format!("{}tail-a", "x".repeat(200));
        let long_b = format!("{}tail-b", "x".repeat(200));
        assert!(analytics
            .record_failure(FailureCategory::Build, "m.rs", &long_a)
            .await
            .unwrap());
        // Identical in the first 200 chars: same signature, ignored.
        assert!(!analytics
            .record_failure(FailureCategory::Build, "m.rs", &long_b)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn trend_buckets_by_day() {
        let analytics = store().await;
        analytics
            .record_failure(FailureCategory::Lint, "a.rs", "x")
            .await
            .unwrap();
        analytics
            .record_failure(FailureCategory::Lint, "b.rs", "y")
            .await
            .unwrap();

        let trend = analytics.trend(7).await.unwrap();
        assert_eq!(trend.len(), 1);
        assert_eq!(trend[0].count, 2);
        assert_eq!(trend[0].day, Utc::now().date_naive());
    }

    #[tokio::test]
    async fn hotspots_rank_files() {
        let analytics = store().await;
        for detail in ["one", "two", "three"] {
            analytics
                .record_failure(FailureCategory::Lint, "hot.rs", detail)
                .await
                .unwrap();
        }
        analytics
            .record_failure(FailureCategory::Lint, "cold.rs", "only")
            .await
            .unwrap();

        let hotspots = analytics.hotspots(7, 10).await.unwrap();
        assert_eq!(hotspots[0].file_path, "hot.rs");
        assert_eq!(hotspots[0].count, 3);
        assert_eq!(hotspots[1].file_path, "cold.rs");
    }

    #[test]
    fn score_is_monotonic_in_current_rate() {
        let baseline = 2.0;
        let mut last = f64::MAX;
        for current in [0.0, 0.5, 1.0, 2.0, 4.0, 8.0] {
            let score = effectiveness_score(current, baseline);
            assert!(score <= last, "score must be non-increasing");
            assert!((0.0..=1.0).contains(&score));
            last = score;
        }
    }

    #[test]
    fn score_handles_zero_baseline() {
        // max(baseline, 0.01) keeps the ratio finite.
        let score = effectiveness_score(0.0, 0.0);
        assert!((score - 1.0).abs() < 1e-9);
        assert!(effectiveness_score(1.0, 0.0) <= 0.0 + 1e-9);
    }

    #[test]
    fn verdict_thresholds() {
        assert_eq!(effectiveness_verdict(0.9), "effective");
        assert_eq!(effectiveness_verdict(0.61), "effective");
        assert_eq!(effectiveness_verdict(0.5), "neutral");
        assert_eq!(effectiveness_verdict(0.4), "neutral");
        assert_eq!(effectiveness_verdict(0.39), "ineffective");
    }

    #[tokio::test]
    async fn effectiveness_for_baselines() {
        let analytics = store().await;
        analytics
            .record_failure(FailureCategory::Lint, "a.rs", "still failing")
            .await
            .unwrap();

        let baseline = RuleBaseline::new(
            aif_core::types::Id::new(),
            FailureCategory::Lint,
            2.0,
            7,
            aif_core::types::CategorySource::Heuristic,
        );
        let scored = analytics.effectiveness(&[baseline]).await.unwrap();
        assert_eq!(scored.len(), 1);
        // 1 failure over 7 days ≈ 0.14/day against baseline 2/day: effective.
        assert_eq!(scored[0].verdict, "effective");
        assert!(scored[0].score > 0.9);
    }
}
