use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use super::orchestrator::{ScanEngine, ScanSummary};
use crate::api::health::HealthState;
use crate::error::{AppError, Result};
use crate::types::ScanTrigger;

/// Outcome of one shop in a batch run.
#[derive(Debug, Clone, Serialize)]
pub struct ShopScanResult {
    pub shop_id: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<ScanSummary>,
}

/// Scans every due shop, one at a time. A failing shop is reported and the
/// batch moves on.
pub async fn run_due_scans(engine: &ScanEngine, now: DateTime<Utc>) -> Result<Vec<ShopScanResult>> {
    let shops = engine.store().due_shops(now).await?;
    let mut results = Vec::with_capacity(shops.len());

    for shop in &shops {
        let result = match engine.run_exclusive(shop, ScanTrigger::Automatic, now).await {
            Ok(summary) => ShopScanResult {
                shop_id: shop.shop_id.clone(),
                ok: summary.ok,
                error: summary.error.clone(),
                summary: Some(summary),
            },
            Err(AppError::Conflict(reason)) => ShopScanResult {
                shop_id: shop.shop_id.clone(),
                ok: false,
                error: Some(reason),
                summary: None,
            },
            Err(e) => ShopScanResult {
                shop_id: shop.shop_id.clone(),
                ok: false,
                error: Some(e.to_string()),
                summary: None,
            },
        };
        results.push(result);
    }

    Ok(results)
}

/// Background task that runs the due-shop batch on a fixed interval.
pub struct ScanSweeper {
    engine: Arc<ScanEngine>,
    health: Arc<HealthState>,
    interval_secs: u64,
}

impl ScanSweeper {
    pub fn new(engine: Arc<ScanEngine>, health: Arc<HealthState>, interval_secs: u64) -> Self {
        Self {
            engine,
            health,
            interval_secs,
        }
    }

    pub async fn run(self) {
        let mut interval = tokio::time::interval(Duration::from_secs(self.interval_secs.max(1)));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            let now = Utc::now();
            match run_due_scans(&self.engine, now).await {
                Ok(results) => {
                    let failed = results.iter().filter(|r| !r.ok).count();
                    self.health.record_sweep(now, results.len(), failed);
                    if results.is_empty() {
                        continue;
                    }
                    if failed > 0 {
                        warn!("[SWEEP] {} shops scanned, {failed} failed", results.len());
                    } else {
                        info!("[SWEEP] {} shops scanned", results.len());
                    }
                }
                Err(e) => error!("[SWEEP] could not list due shops: {e}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::testing::{MemoryStore, StaticSource};
    use crate::collab::InsightStore;
    use crate::config::SalesDriftVariant;
    use crate::detector::{DetectorOptions, DetectorRegistry};
    use crate::types::{ScanRunRecord, ScanStatus, ShopCredentials};
    use chrono::{Duration as ChronoDuration, TimeZone};
    use serde_json::json;

    fn shop(id: &str, token: &str) -> ShopCredentials {
        ShopCredentials {
            shop_id: id.to_string(),
            shop_domain: format!("{id}.myshopify.com"),
            access_token: token.to_string(),
            timezone: Some("UTC".to_string()),
        }
    }

    fn engine(store: Arc<MemoryStore>, payload: Option<serde_json::Value>) -> ScanEngine {
        ScanEngine::new(
            Arc::new(StaticSource { payload }),
            store,
            None,
            DetectorRegistry::standard(SalesDriftVariant::Weekday),
            DetectorOptions::default(),
            60,
        )
    }

    #[tokio::test]
    async fn only_due_shops_with_tokens_are_scanned() {
        let now = Utc.with_ymd_and_hms(2024, 6, 12, 12, 0, 0).unwrap();
        let store = Arc::new(MemoryStore::default());
        store.with(|s| {
            s.shops = vec![shop("a", "tok"), shop("b", "tok"), shop("c", "")];
            s.scan_runs.insert(
                "b".to_string(),
                ScanRunRecord {
                    shop_id: "b".to_string(),
                    last_scan_at: now,
                    next_scan_at: now + ChronoDuration::hours(3),
                    last_scan_status: ScanStatus::Ok,
                    last_scan_summary: json!({}),
                },
            );
        });
        let engine = engine(store.clone(), Some(json!({"orders": [], "products": []})));

        let results = run_due_scans(&engine, now).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].shop_id, "a");
        assert!(results[0].ok);

        // "a" is now scheduled for 11:00 UTC tomorrow and no longer due.
        let run = store.get_scan_run("a").await.unwrap().unwrap();
        assert_eq!(run.next_scan_at, Utc.with_ymd_and_hms(2024, 6, 13, 11, 0, 0).unwrap());
        assert!(run_due_scans(&engine, now).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn one_failing_shop_does_not_stop_the_batch() {
        let now = Utc.with_ymd_and_hms(2024, 6, 12, 12, 0, 0).unwrap();
        let store = Arc::new(MemoryStore::default());
        store.with(|s| s.shops = vec![shop("a", "tok"), shop("b", "tok")]);
        let engine = engine(store.clone(), None);

        let results = run_due_scans(&engine, now).await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| !r.ok));
        assert!(results[0].error.as_deref().unwrap().contains("fetch_failed"));
        store.with(|s| assert_eq!(s.scan_runs.len(), 2));
    }
}
