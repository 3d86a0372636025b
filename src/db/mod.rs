pub mod models;

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use tracing::debug;

use crate::collab::InsightStore;
use crate::config::thresholds::PRICE_SNAPSHOT_RETENTION_DAYS;
use crate::error::Result;
use crate::types::{CanonicalInsight, DigestSettings, PriceSnapshot, ScanRunRecord, Severity, ShopCredentials};
use models::{to_millis, DigestSettingsRow, InsightRow, PriceSnapshotRow, ScanRunRow, ShopRow};

fn severity_rank(s: Severity) -> i64 {
    match s {
        Severity::High => 3,
        Severity::Medium => 2,
        Severity::Low => 1,
    }
}

const INSIGHT_COLUMNS: &str = "shop_id, type, title, description, severity, suggested_action, \
     confidence, evidence, metrics, items_preview, raw, evaluated_at";

/// SQLite-backed `InsightStore`.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Opens (creating if needed) the database file and applies pending migrations.
    pub async fn connect(db_path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{db_path}"))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        debug!("Opening SQLite database at {db_path}");
        let pool = SqlitePoolOptions::new().max_connections(5).connect_with(options).await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self::new(pool))
    }
}

#[async_trait]
impl InsightStore for SqliteStore {
    async fn persist_insights(&self, rows: &[CanonicalInsight]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for insight in rows {
            let evidence = insight.evidence.as_ref().map(serde_json::to_string).transpose()?;
            let metrics = insight.metrics.as_ref().map(serde_json::to_string).transpose()?;
            let items = insight.items_preview.as_ref().map(serde_json::to_string).transpose()?;
            sqlx::query(
                r#"
                INSERT INTO insights (
                    shop_id, type, title, description, severity, severity_rank,
                    suggested_action, confidence, evidence, metrics, items_preview,
                    raw, evaluated_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(shop_id, type) DO UPDATE SET
                    title = excluded.title,
                    description = excluded.description,
                    severity = excluded.severity,
                    severity_rank = excluded.severity_rank,
                    suggested_action = excluded.suggested_action,
                    confidence = excluded.confidence,
                    evidence = excluded.evidence,
                    metrics = excluded.metrics,
                    items_preview = excluded.items_preview,
                    raw = excluded.raw,
                    evaluated_at = excluded.evaluated_at
                "#,
            )
            .bind(&insight.shop_id)
            .bind(&insight.kind)
            .bind(&insight.title)
            .bind(&insight.description)
            .bind(insight.severity.as_str())
            .bind(severity_rank(insight.severity))
            .bind(&insight.suggested_action)
            .bind(insight.confidence.as_str())
            .bind(evidence)
            .bind(metrics)
            .bind(items)
            .bind(serde_json::to_string(&insight.raw)?)
            .bind(to_millis(insight.evaluated_at))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn query_recent_insight(&self, shop_id: &str, kind: &str, since: DateTime<Utc>) -> Result<bool> {
        let found: Option<(i64,)> =
            sqlx::query_as("SELECT 1 FROM insights WHERE shop_id = ? AND type = ? AND evaluated_at >= ?")
                .bind(shop_id)
                .bind(kind)
                .bind(to_millis(since))
                .fetch_optional(&self.pool)
                .await?;
        Ok(found.is_some())
    }

    async fn persist_scan_run(&self, record: &ScanRunRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO scan_runs (shop_id, last_scan_at, next_scan_at, last_scan_status, last_scan_summary)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(shop_id) DO UPDATE SET
                last_scan_at = excluded.last_scan_at,
                next_scan_at = excluded.next_scan_at,
                last_scan_status = excluded.last_scan_status,
                last_scan_summary = excluded.last_scan_summary
            "#,
        )
        .bind(&record.shop_id)
        .bind(to_millis(record.last_scan_at))
        .bind(to_millis(record.next_scan_at))
        .bind(record.last_scan_status.to_string())
        .bind(serde_json::to_string(&record.last_scan_summary)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_scan_run(&self, shop_id: &str) -> Result<Option<ScanRunRecord>> {
        sqlx::query_as::<_, ScanRunRow>("SELECT * FROM scan_runs WHERE shop_id = ?")
            .bind(shop_id)
            .fetch_optional(&self.pool)
            .await?
            .map(ScanRunRow::into_record)
            .transpose()
    }

    async fn get_digest_settings(&self, shop_id: &str) -> Result<Option<DigestSettings>> {
        let row = sqlx::query_as::<_, DigestSettingsRow>(
            "SELECT shop_id, email, daily_enabled, weekly_enabled FROM digest_settings WHERE shop_id = ?",
        )
        .bind(shop_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn actionable_insights(&self, shop_id: &str) -> Result<Vec<CanonicalInsight>> {
        let rows = sqlx::query_as::<_, InsightRow>(&format!(
            "SELECT {INSIGHT_COLUMNS} FROM insights
             WHERE shop_id = ? AND severity_rank >= ?
             ORDER BY severity_rank DESC, type ASC"
        ))
        .bind(shop_id)
        .bind(severity_rank(Severity::Medium))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(InsightRow::into_insight).collect()
    }

    async fn list_insights(&self, shop_id: &str) -> Result<Vec<CanonicalInsight>> {
        let rows = sqlx::query_as::<_, InsightRow>(&format!(
            "SELECT {INSIGHT_COLUMNS} FROM insights WHERE shop_id = ? ORDER BY evaluated_at DESC, type ASC"
        ))
        .bind(shop_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(InsightRow::into_insight).collect()
    }

    async fn get_shop(&self, shop_id: &str) -> Result<Option<ShopCredentials>> {
        let row = sqlx::query_as::<_, ShopRow>(
            "SELECT shop_id, shop_domain, access_token, timezone FROM shops WHERE shop_id = ?",
        )
        .bind(shop_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn due_shops(&self, now: DateTime<Utc>) -> Result<Vec<ShopCredentials>> {
        let rows = sqlx::query_as::<_, ShopRow>(
            r#"
            SELECT s.shop_id, s.shop_domain, s.access_token, s.timezone
            FROM shops s
            LEFT JOIN scan_runs r ON r.shop_id = s.shop_id
            WHERE s.access_token != '' AND (r.next_scan_at IS NULL OR r.next_scan_at <= ?)
            ORDER BY COALESCE(r.next_scan_at, 0) ASC, s.shop_id ASC
            "#,
        )
        .bind(to_millis(now))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn price_history(&self, shop_id: &str, since: DateTime<Utc>) -> Result<Vec<PriceSnapshot>> {
        let rows = sqlx::query_as::<_, PriceSnapshotRow>(
            "SELECT product_id, price, captured_at FROM price_snapshots
             WHERE shop_id = ? AND captured_at >= ?
             ORDER BY captured_at ASC",
        )
        .bind(shop_id)
        .bind(to_millis(since))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn record_price_snapshots(&self, shop_id: &str, snapshots: &[PriceSnapshot]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for snap in snapshots {
            sqlx::query("INSERT INTO price_snapshots (shop_id, product_id, price, captured_at) VALUES (?, ?, ?, ?)")
                .bind(shop_id)
                .bind(&snap.product_id)
                .bind(snap.price)
                .bind(to_millis(snap.captured_at))
                .execute(&mut *tx)
                .await?;
        }
        if let Some(newest) = snapshots.iter().map(|snap| snap.captured_at).max() {
            let cutoff = newest - Duration::days(PRICE_SNAPSHOT_RETENTION_DAYS);
            let pruned = sqlx::query("DELETE FROM price_snapshots WHERE shop_id = ? AND captured_at < ?")
                .bind(shop_id)
                .bind(to_millis(cutoff))
                .execute(&mut *tx)
                .await?
                .rows_affected();
            if pruned > 0 {
                debug!(shop_id, pruned, "Pruned expired price snapshots");
            }
        }
        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Confidence, ScanStatus};
    use chrono::TimeZone;
    use serde_json::json;

    async fn store() -> SqliteStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        SqliteStore::new(pool)
    }

    async fn add_shop(store: &SqliteStore, shop_id: &str, token: &str) {
        sqlx::query("INSERT INTO shops (shop_id, shop_domain, access_token, timezone, created_at) VALUES (?, ?, ?, ?, 0)")
            .bind(shop_id)
            .bind(format!("{shop_id}.myshopify.com"))
            .bind(token)
            .bind("America/New_York")
            .execute(&store.pool)
            .await
            .unwrap();
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 12, 12, 0, 0).unwrap()
    }

    fn insight(kind: &str, severity: Severity, evaluated_at: DateTime<Utc>) -> CanonicalInsight {
        CanonicalInsight {
            shop_id: "shop-1".to_string(),
            kind: kind.to_string(),
            title: format!("{kind} title"),
            description: "desc".to_string(),
            severity,
            suggested_action: "act".to_string(),
            confidence: Confidence::High,
            evidence: Some(json!({"window_days": 14})),
            metrics: None,
            items_preview: Some(vec![json!({"product_id": "1"})]),
            evaluated_at,
            raw: json!({"type": kind}),
        }
    }

    #[tokio::test]
    async fn insights_upsert_per_shop_and_type() {
        let store = store().await;
        let first = insight("dead_inventory", Severity::Low, now() - Duration::days(10));
        store.persist_insights(&[first]).await.unwrap();

        let second = insight("dead_inventory", Severity::High, now());
        store.persist_insights(&[second.clone()]).await.unwrap();

        let rows = store.list_insights("shop-1").await.unwrap();
        assert_eq!(rows, vec![second]);
    }

    #[tokio::test]
    async fn recent_insight_lookup_respects_since() {
        let store = store().await;
        store
            .persist_insights(&[insight("inventory_velocity_risk", Severity::High, now() - Duration::hours(4))])
            .await
            .unwrap();

        let six = now() - Duration::hours(6);
        let three = now() - Duration::hours(3);
        assert!(store.query_recent_insight("shop-1", "inventory_velocity_risk", six).await.unwrap());
        assert!(!store.query_recent_insight("shop-1", "inventory_velocity_risk", three).await.unwrap());
        assert!(!store.query_recent_insight("shop-1", "dead_inventory", six).await.unwrap());
    }

    #[tokio::test]
    async fn actionable_insights_skip_low_and_sort_by_severity() {
        let store = store().await;
        store
            .persist_insights(&[
                insight("price_volatility_risk", Severity::Low, now()),
                insight("product_concentration_risk", Severity::Medium, now()),
                insight("dead_inventory", Severity::High, now()),
            ])
            .await
            .unwrap();

        let kinds: Vec<String> = store
            .actionable_insights("shop-1")
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.kind)
            .collect();
        assert_eq!(kinds, vec!["dead_inventory", "product_concentration_risk"]);
    }

    #[tokio::test]
    async fn scan_run_is_a_rolling_snapshot() {
        let store = store().await;
        let mut record = ScanRunRecord {
            shop_id: "shop-1".to_string(),
            last_scan_at: now(),
            next_scan_at: now() + Duration::hours(20),
            last_scan_status: ScanStatus::Error,
            last_scan_summary: json!({"error": "timeout"}),
        };
        store.persist_scan_run(&record).await.unwrap();
        record.last_scan_status = ScanStatus::Ok;
        record.last_scan_summary = json!({"inserted": 2});
        store.persist_scan_run(&record).await.unwrap();

        assert_eq!(store.get_scan_run("shop-1").await.unwrap(), Some(record));
        assert_eq!(store.get_scan_run("shop-2").await.unwrap(), None);
    }

    #[tokio::test]
    async fn due_shops_need_a_token_and_an_elapsed_schedule() {
        let store = store().await;
        add_shop(&store, "never-scanned", "tok").await;
        add_shop(&store, "scheduled-later", "tok").await;
        add_shop(&store, "overdue", "tok").await;
        add_shop(&store, "uninstalled", "").await;

        for (shop, next) in [("scheduled-later", now() + Duration::hours(1)), ("overdue", now() - Duration::hours(1))] {
            store
                .persist_scan_run(&ScanRunRecord {
                    shop_id: shop.to_string(),
                    last_scan_at: now() - Duration::days(1),
                    next_scan_at: next,
                    last_scan_status: ScanStatus::Ok,
                    last_scan_summary: json!({}),
                })
                .await
                .unwrap();
        }

        let due: Vec<String> = store.due_shops(now()).await.unwrap().into_iter().map(|s| s.shop_id).collect();
        assert_eq!(due, vec!["never-scanned", "overdue"]);

        let shop = store.get_shop("overdue").await.unwrap().unwrap();
        assert_eq!(shop.timezone.as_deref(), Some("America/New_York"));
    }

    #[tokio::test]
    async fn digest_settings_are_read_back() {
        let store = store().await;
        add_shop(&store, "shop-1", "tok").await;
        sqlx::query("INSERT INTO digest_settings (shop_id, email, daily_enabled, weekly_enabled) VALUES (?, ?, 1, 0)")
            .bind("shop-1")
            .bind("owner@example.com")
            .execute(&store.pool)
            .await
            .unwrap();

        let settings = store.get_digest_settings("shop-1").await.unwrap().unwrap();
        assert!(settings.daily_enabled);
        assert!(!settings.weekly_enabled);
        assert_eq!(settings.email.as_deref(), Some("owner@example.com"));
        assert!(store.get_digest_settings("shop-2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn price_history_filters_by_shop_and_time() {
        let store = store().await;
        let snap = |pid: &str, price: f64, days: i64| PriceSnapshot {
            product_id: pid.to_string(),
            price,
            captured_at: now() - Duration::days(days),
        };
        store
            .record_price_snapshots("shop-1", &[snap("a", 10.0, 20), snap("a", 12.0, 2), snap("b", 5.0, 1)])
            .await
            .unwrap();
        store.record_price_snapshots("shop-2", &[snap("a", 99.0, 1)]).await.unwrap();

        let history = store.price_history("shop-1", now() - Duration::days(7)).await.unwrap();
        assert_eq!(history, vec![snap("a", 12.0, 2), snap("b", 5.0, 1)]);
    }

    #[tokio::test]
    async fn price_snapshots_are_pruned_past_retention() {
        let store = store().await;
        let start = now() - Duration::days(364);
        for day in 0..365 {
            let at = start + Duration::days(day);
            let batch: Vec<PriceSnapshot> = (0..20)
                .map(|p| PriceSnapshot {
                    product_id: format!("p{p}"),
                    price: 10.0 + (day % 3) as f64,
                    captured_at: at,
                })
                .collect();
            store.record_price_snapshots("shop-1", &batch).await.unwrap();
        }
        store
            .record_price_snapshots(
                "shop-2",
                &[PriceSnapshot { product_id: "x".to_string(), price: 1.0, captured_at: start }],
            )
            .await
            .unwrap();

        let (rows,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM price_snapshots WHERE shop_id = 'shop-1'")
            .fetch_one(&store.pool)
            .await
            .unwrap();
        // Retention window plus the day it ends on.
        assert_eq!(rows, 20 * (PRICE_SNAPSHOT_RETENTION_DAYS + 1));

        // Other shops are untouched by shop-1's pruning.
        let (other,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM price_snapshots WHERE shop_id = 'shop-2'")
            .fetch_one(&store.pool)
            .await
            .unwrap();
        assert_eq!(other, 1);

        let history = store.price_history("shop-1", now() - Duration::days(7)).await.unwrap();
        assert_eq!(history.len(), 20 * 8);
    }
}
