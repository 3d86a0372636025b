//! Interfaces to everything the scan engine does not own: upstream shop data,
//! persistence and mail delivery.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::Result;
use crate::types::{CanonicalInsight, DigestSettings, PriceSnapshot, ScanRunRecord, ShopCredentials};

/// Source of raw shop payloads. Errors abort that shop's scan.
#[async_trait]
pub trait ShopDataSource: Send + Sync {
    async fn fetch_shop_payload(&self, shop: &ShopCredentials, since: DateTime<Utc>) -> Result<Value>;
}

#[async_trait]
pub trait InsightStore: Send + Sync {
    /// Upsert keyed by `(shop_id, type)`: a new insight replaces the previous one.
    async fn persist_insights(&self, rows: &[CanonicalInsight]) -> Result<()>;

    /// Whether an insight of `kind` was recorded for the shop at or after `since`.
    async fn query_recent_insight(&self, shop_id: &str, kind: &str, since: DateTime<Utc>) -> Result<bool>;

    async fn persist_scan_run(&self, record: &ScanRunRecord) -> Result<()>;

    async fn get_scan_run(&self, shop_id: &str) -> Result<Option<ScanRunRecord>>;

    async fn get_digest_settings(&self, shop_id: &str) -> Result<Option<DigestSettings>>;

    /// High and medium severity insights, most severe first.
    async fn actionable_insights(&self, shop_id: &str) -> Result<Vec<CanonicalInsight>>;

    async fn list_insights(&self, shop_id: &str) -> Result<Vec<CanonicalInsight>>;

    async fn get_shop(&self, shop_id: &str) -> Result<Option<ShopCredentials>>;

    /// Shops with an access token whose `next_scan_at` is unset or not after `now`.
    async fn due_shops(&self, now: DateTime<Utc>) -> Result<Vec<ShopCredentials>>;

    async fn price_history(&self, shop_id: &str, since: DateTime<Utc>) -> Result<Vec<PriceSnapshot>>;

    async fn record_price_snapshots(&self, shop_id: &str, snapshots: &[PriceSnapshot]) -> Result<()>;
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_digest_email(&self, to: &str, subject: &str, body: &str) -> Result<()>;
}
