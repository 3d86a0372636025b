//! Row types for the tables in `migrations/`. Timestamps are stored as unix
//! milliseconds and JSON payloads as TEXT.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::Result;
use crate::types::{
    CanonicalInsight, Confidence, DigestSettings, PriceSnapshot, ScanRunRecord, ScanStatus, Severity,
    ShopCredentials,
};

pub fn to_millis(t: DateTime<Utc>) -> i64 {
    t.timestamp_millis()
}

pub fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn parse_json(text: Option<&str>) -> Result<Option<Value>> {
    text.map(serde_json::from_str).transpose().map_err(Into::into)
}

#[derive(Debug, sqlx::FromRow)]
pub struct InsightRow {
    pub shop_id: String,
    #[sqlx(rename = "type")]
    pub kind: String,
    pub title: String,
    pub description: String,
    pub severity: String,
    pub suggested_action: String,
    pub confidence: String,
    pub evidence: Option<String>,
    pub metrics: Option<String>,
    pub items_preview: Option<String>,
    pub raw: String,
    pub evaluated_at: i64,
}

impl InsightRow {
    pub fn into_insight(self) -> Result<CanonicalInsight> {
        let items_preview = match parse_json(self.items_preview.as_deref())? {
            Some(Value::Array(items)) => Some(items),
            _ => None,
        };
        Ok(CanonicalInsight {
            severity: Severity::parse(&self.severity).unwrap_or(Severity::Medium),
            confidence: Confidence::parse(&self.confidence).unwrap_or(Confidence::Medium),
            evidence: parse_json(self.evidence.as_deref())?,
            metrics: parse_json(self.metrics.as_deref())?,
            items_preview,
            raw: serde_json::from_str(&self.raw)?,
            evaluated_at: from_millis(self.evaluated_at),
            shop_id: self.shop_id,
            kind: self.kind,
            title: self.title,
            description: self.description,
            suggested_action: self.suggested_action,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct ScanRunRow {
    pub shop_id: String,
    pub last_scan_at: i64,
    pub next_scan_at: i64,
    pub last_scan_status: String,
    pub last_scan_summary: String,
}

impl ScanRunRow {
    pub fn into_record(self) -> Result<ScanRunRecord> {
        let status = if self.last_scan_status == "ok" { ScanStatus::Ok } else { ScanStatus::Error };
        Ok(ScanRunRecord {
            last_scan_at: from_millis(self.last_scan_at),
            next_scan_at: from_millis(self.next_scan_at),
            last_scan_status: status,
            last_scan_summary: serde_json::from_str(&self.last_scan_summary)?,
            shop_id: self.shop_id,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct ShopRow {
    pub shop_id: String,
    pub shop_domain: String,
    pub access_token: String,
    pub timezone: Option<String>,
}

impl From<ShopRow> for ShopCredentials {
    fn from(row: ShopRow) -> Self {
        ShopCredentials {
            shop_id: row.shop_id,
            shop_domain: row.shop_domain,
            access_token: row.access_token,
            timezone: row.timezone,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct DigestSettingsRow {
    pub shop_id: String,
    pub email: Option<String>,
    pub daily_enabled: bool,
    pub weekly_enabled: bool,
}

impl From<DigestSettingsRow> for DigestSettings {
    fn from(row: DigestSettingsRow) -> Self {
        DigestSettings {
            shop_id: row.shop_id,
            email: row.email,
            daily_enabled: row.daily_enabled,
            weekly_enabled: row.weekly_enabled,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct PriceSnapshotRow {
    pub product_id: String,
    pub price: f64,
    pub captured_at: i64,
}

impl From<PriceSnapshotRow> for PriceSnapshot {
    fn from(row: PriceSnapshotRow) -> Self {
        PriceSnapshot {
            product_id: row.product_id,
            price: row.price,
            captured_at: from_millis(row.captured_at),
        }
    }
}
