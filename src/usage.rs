//! Daily usage accounting and limits.
//!
//! One row per UTC day in `usage_daily`. Increments are single upserts, so
//! concurrent queries never lose counts.

use anyhow::Result;
use chrono::Utc;
use sqlx::{Row, SqlitePool};

use crate::config::LimitsConfig;

/// Totals for a single day.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DailyUsage {
    pub day: String,
    pub queries: i64,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cost_usd: f64,
}

impl DailyUsage {
    pub fn total_tokens(&self) -> i64 {
        self.input_tokens + self.output_tokens
    }
}

#[derive(Clone)]
pub struct CostTracker {
    pool: SqlitePool,
    limits: LimitsConfig,
}

pub fn today_key() -> String {
    Utc::now().date_naive().format("%Y-%m-%d").to_string()
}

impl CostTracker {
    pub fn new(pool: SqlitePool, limits: LimitsConfig) -> Self {
        Self { pool, limits }
    }

    pub async fn today(&self) -> Result<DailyUsage> {
        let day = today_key();
        let row = sqlx::query(
            "SELECT queries, input_tokens, output_tokens, cost_usd FROM usage_daily WHERE day = ?",
        )
        .bind(&day)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match row {
            Some(row) => DailyUsage {
                day,
                queries: row.get("queries"),
                input_tokens: row.get("input_tokens"),
                output_tokens: row.get("output_tokens"),
                cost_usd: row.get("cost_usd"),
            },
            None => DailyUsage {
                day,
                ..Default::default()
            },
        })
    }

    /// `Err(message)` when today's query count or spend has hit its limit.
    pub async fn check_limits(&self) -> Result<std::result::Result<(), String>> {
        let usage = self.today().await?;

        if usage.queries >= self.limits.max_daily_queries {
            return Ok(Err(format!(
                "Daily query limit ({}) reached. Try again tomorrow.",
                self.limits.max_daily_queries
            )));
        }
        if usage.cost_usd >= self.limits.max_daily_cost_usd {
            return Ok(Err(format!(
                "Daily cost limit (${:.2}) reached. Try again tomorrow.",
                self.limits.max_daily_cost_usd
            )));
        }
        Ok(Ok(()))
    }

    pub async fn track_query(
        &self,
        input_tokens: i64,
        output_tokens: i64,
        cost_usd: f64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO usage_daily (day, queries, input_tokens, output_tokens, cost_usd, started_at)
            VALUES (?, 1, ?, ?, ?, ?)
            ON CONFLICT(day) DO UPDATE SET
                queries = queries + 1,
                input_tokens = input_tokens + excluded.input_tokens,
                output_tokens = output_tokens + excluded.output_tokens,
                cost_usd = cost_usd + excluded.cost_usd
            "#,
        )
        .bind(today_key())
        .bind(input_tokens)
        .bind(output_tokens)
        .bind(cost_usd)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use tempfile::TempDir;

    async fn tracker(limits: LimitsConfig) -> (TempDir, CostTracker) {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::minimal();
        config.db.path = tmp.path().join("usage.sqlite");
        let pool = crate::db::connect(&config).await.unwrap();
        crate::migrate::migrate_pool(&pool).await.unwrap();
        (tmp, CostTracker::new(pool, limits))
    }

    #[tokio::test]
    async fn test_fresh_day_is_zero() {
        let (_tmp, t) = tracker(LimitsConfig::default()).await;
        let usage = t.today().await.unwrap();
        assert_eq!(usage.queries, 0);
        assert_eq!(usage.day, today_key());
        assert!(t.check_limits().await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_track_accumulates() {
        let (_tmp, t) = tracker(LimitsConfig::default()).await;
        t.track_query(100, 20, 0.01).await.unwrap();
        t.track_query(50, 30, 0.02).await.unwrap();
        let usage = t.today().await.unwrap();
        assert_eq!(usage.queries, 2);
        assert_eq!(usage.total_tokens(), 200);
        assert!((usage.cost_usd - 0.03).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_query_limit() {
        let limits = LimitsConfig {
            max_daily_queries: 1,
            ..LimitsConfig::default()
        };
        let (_tmp, t) = tracker(limits).await;
        t.track_query(1, 1, 0.0).await.unwrap();
        let msg = t.check_limits().await.unwrap().unwrap_err();
        assert_eq!(msg, "Daily query limit (1) reached. Try again tomorrow.");
    }

    #[tokio::test]
    async fn test_cost_limit() {
        let limits = LimitsConfig {
            max_daily_cost_usd: 0.5,
            ..LimitsConfig::default()
        };
        let (_tmp, t) = tracker(limits).await;
        t.track_query(1, 1, 0.75).await.unwrap();
        let msg = t.check_limits().await.unwrap().unwrap_err();
        assert_eq!(msg, "Daily cost limit ($0.50) reached. Try again tomorrow.");
    }
}
