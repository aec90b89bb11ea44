//! Background status polling for the usage bar.
//!
//! Readiness, system info, and usage refresh on independent timers and
//! publish a [`StatusSnapshot`] through a watch channel. Purely
//! presentational: a failed poll keeps the previous value.

use console::style;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::cache::DataCache;
use crate::models::{ReadinessResponse, SystemInfoResponse, UsageResponse};

pub const READINESS_INTERVAL: Duration = Duration::from_secs(30);
pub const SYSTEM_INFO_INTERVAL: Duration = Duration::from_secs(300);
pub const USAGE_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Default)]
pub struct StatusSnapshot {
    pub readiness: Option<ReadinessResponse>,
    pub info: Option<SystemInfoResponse>,
    pub usage: Option<UsageResponse>,
}

/// One-line summary: quota consumption, spend, stored documents, model,
/// and readiness.
pub fn status_line(snapshot: &StatusSnapshot) -> String {
    let mut parts = Vec::new();

    match (&snapshot.usage, &snapshot.info) {
        (Some(u), Some(i)) => parts.push(format!(
            "queries {}/{}",
            u.queries_today, i.limits.max_daily_queries
        )),
        (Some(u), None) => parts.push(format!("queries {}", u.queries_today)),
        _ => {}
    }
    if let Some(ref u) = snapshot.usage {
        parts.push(format!("${:.4} today", u.total_cost_usd));
        parts.push(format!("{} docs", u.documents_stored));
    }
    if let Some(ref i) = snapshot.info {
        parts.push(i.pricing.llm_model.clone());
    }

    let ready = match snapshot.readiness {
        Some(ref r) if r.ready => style("● ready").green().to_string(),
        Some(_) => style("● degraded").yellow().to_string(),
        None => style("● unknown").dim().to_string(),
    };
    parts.push(ready);

    parts.join("  ·  ")
}

/// Loads every status resource once, skipping failures.
pub async fn snapshot_now(cache: &DataCache, cancel: &CancellationToken) -> StatusSnapshot {
    StatusSnapshot {
        readiness: cache.readiness(cancel).await.ok(),
        info: cache.system_info(cancel).await.ok(),
        usage: cache.usage(cancel).await.ok(),
    }
}

/// Spawns the poller. It runs until `cancel` fires.
pub fn spawn_status_poller(
    cache: Arc<DataCache>,
    cancel: CancellationToken,
) -> (JoinHandle<()>, watch::Receiver<StatusSnapshot>) {
    let (tx, rx) = watch::channel(StatusSnapshot::default());

    let handle = tokio::spawn(async move {
        let mut readiness_tick = tokio::time::interval(READINESS_INTERVAL);
        let mut info_tick = tokio::time::interval(SYSTEM_INFO_INTERVAL);
        let mut usage_tick = tokio::time::interval(USAGE_INTERVAL);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = readiness_tick.tick() => {
                    cache.invalidate_readiness().await;
                    match cache.readiness(&cancel).await {
                        Ok(r) => tx.send_modify(|s| s.readiness = Some(r)),
                        Err(e) => debug!(error = %e, "readiness poll failed"),
                    }
                }
                _ = info_tick.tick() => {
                    cache.invalidate_info().await;
                    match cache.system_info(&cancel).await {
                        Ok(i) => tx.send_modify(|s| s.info = Some(i)),
                        Err(e) => debug!(error = %e, "system info poll failed"),
                    }
                }
                _ = usage_tick.tick() => {
                    cache.invalidate_usage().await;
                    match cache.usage(&cancel).await {
                        Ok(u) => tx.send_modify(|s| s.usage = Some(u)),
                        Err(e) => debug!(error = %e, "usage poll failed"),
                    }
                }
            }
        }
    });

    (handle, rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ComponentStatus, PricingInfo, SystemLimits};
    use console::strip_ansi_codes;

    fn info() -> SystemInfoResponse {
        SystemInfoResponse {
            limits: SystemLimits {
                max_documents: 10,
                max_pages_per_document: 200,
                max_file_size_mb: 10,
                max_question_length: 500,
                max_daily_queries: 100,
            },
            pricing: PricingInfo {
                llm_model: "gpt-4o-mini".into(),
                input_token_cost_per_1k: 0.00015,
                output_token_cost_per_1k: 0.0006,
                embedding_model: "text-embedding-3-small".into(),
            },
            version: "0.1.0".into(),
            environment: "development".into(),
        }
    }

    #[test]
    fn test_status_line_full() {
        let snapshot = StatusSnapshot {
            readiness: Some(ReadinessResponse {
                ready: true,
                components: ComponentStatus {
                    vector_store: true,
                    embedding_model: true,
                    llm_api: true,
                },
            }),
            info: Some(info()),
            usage: Some(UsageResponse {
                period: "2026-10-19".into(),
                queries_today: 3,
                total_tokens_used: 4200,
                total_cost_usd: 0.0123,
                documents_stored: 2,
            }),
        };
        let line = strip_ansi_codes(&status_line(&snapshot)).to_string();
        assert_eq!(
            line,
            "queries 3/100  ·  $0.0123 today  ·  2 docs  ·  gpt-4o-mini  ·  ● ready"
        );
    }

    #[test]
    fn test_status_line_empty() {
        let line = strip_ansi_codes(&status_line(&StatusSnapshot::default())).to_string();
        assert_eq!(line, "● unknown");
    }

    #[test]
    fn test_intervals() {
        assert_eq!(READINESS_INTERVAL.as_secs(), 30);
        assert_eq!(SYSTEM_INFO_INTERVAL.as_secs(), 300);
        assert_eq!(USAGE_INTERVAL.as_secs(), 60);
    }
}
