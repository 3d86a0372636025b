use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Shop data snapshot
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub product_id: Option<String>,
    pub quantity: u32,
    pub revenue: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub created_at: DateTime<Utc>,
    /// Cancelled orders stay in the context; detectors decide whether to count them.
    pub cancelled_at: Option<DateTime<Utc>>,
    pub total_price: f64,
    pub line_items: Vec<LineItem>,
}

impl Order {
    pub fn is_cancelled(&self) -> bool {
        self.cancelled_at.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub title: String,
    pub price: f64,
    /// Upstream occasionally reports negative stock; it is kept as-is.
    pub inventory_quantity: i64,
    pub status: String,
    /// Line-item revenue summed over every non-cancelled order in the payload.
    pub historical_revenue: f64,
    pub historical_units: u64,
}

impl Product {
    pub fn is_active(&self) -> bool {
        self.status.eq_ignore_ascii_case("active")
    }
}

/// One observed price for a product at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSnapshot {
    pub product_id: String,
    pub price: f64,
    pub captured_at: DateTime<Utc>,
}

/// Normalized snapshot of one shop, built once per scan and shared by every detector.
#[derive(Debug, Clone)]
pub struct InsightContext {
    pub shop_id: String,
    /// IANA zone name, `"UTC"` when upstream did not provide one.
    pub shop_timezone: String,
    pub now: DateTime<Utc>,
    pub orders: Vec<Order>,
    pub products: Vec<Product>,
    pub price_history: Vec<PriceSnapshot>,
}

// ---------------------------------------------------------------------------
// Insight classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "high" => Some(Severity::High),
            "medium" => Some(Severity::Medium),
            "low" => Some(Severity::Low),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "high" => Some(Confidence::High),
            "medium" => Some(Confidence::Medium),
            "low" => Some(Confidence::Low),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::High => "high",
            Confidence::Medium => "medium",
            Confidence::Low => "low",
        }
    }
}

impl std::fmt::Display for Confidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Insight types produced by the built-in detectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightType {
    SalesRhythmDrift,
    SalesWindowDrift,
    InventoryVelocityRisk,
    DeadInventory,
    PriceVolatilityRisk,
    ProductConcentrationRisk,
}

impl InsightType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InsightType::SalesRhythmDrift => "sales_rhythm_drift",
            InsightType::SalesWindowDrift => "sales_window_drift",
            InsightType::InventoryVelocityRisk => "inventory_velocity_risk",
            InsightType::DeadInventory => "dead_inventory",
            InsightType::PriceVolatilityRisk => "price_volatility_risk",
            InsightType::ProductConcentrationRisk => "product_concentration_risk",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "sales_rhythm_drift" => Some(InsightType::SalesRhythmDrift),
            "sales_window_drift" => Some(InsightType::SalesWindowDrift),
            "inventory_velocity_risk" => Some(InsightType::InventoryVelocityRisk),
            "dead_inventory" => Some(InsightType::DeadInventory),
            "price_volatility_risk" => Some(InsightType::PriceVolatilityRisk),
            "product_concentration_risk" => Some(InsightType::ProductConcentrationRisk),
            _ => None,
        }
    }
}

impl std::fmt::Display for InsightType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Detector output and the persisted form
// ---------------------------------------------------------------------------

/// Raw detector output. Nothing here is trusted until the normalizer accepts it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub indicators: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evaluated_at: Option<DateTime<Utc>>,
}

/// The only insight shape that is ever persisted. Built exclusively by
/// `normalizer::normalize`, which enforces the publish gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalInsight {
    pub shop_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub description: String,
    pub severity: Severity,
    pub suggested_action: String,
    pub confidence: Confidence,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items_preview: Option<Vec<serde_json::Value>>,
    pub evaluated_at: DateTime<Utc>,
    pub raw: serde_json::Value,
}

impl From<&CanonicalInsight> for Candidate {
    fn from(insight: &CanonicalInsight) -> Self {
        Candidate {
            kind: Some(insight.kind.clone()),
            title: Some(insight.title.clone()),
            description: Some(insight.description.clone()),
            summary: None,
            severity: Some(insight.severity.as_str().to_string()),
            suggested_action: Some(insight.suggested_action.clone()),
            confidence: Some(insight.confidence.as_str().to_string()),
            metrics: insight.metrics.clone(),
            indicators: insight.evidence.clone(),
            items: insight.items_preview.clone().unwrap_or_default(),
            evaluated_at: Some(insight.evaluated_at),
        }
    }
}

// ---------------------------------------------------------------------------
// Scan bookkeeping
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Ok,
    Error,
}

impl std::fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanStatus::Ok => write!(f, "ok"),
            ScanStatus::Error => write!(f, "error"),
        }
    }
}

/// Rolling per-shop snapshot of the latest scan; upserted, never appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanRunRecord {
    pub shop_id: String,
    pub last_scan_at: DateTime<Utc>,
    pub next_scan_at: DateTime<Utc>,
    pub last_scan_status: ScanStatus,
    pub last_scan_summary: serde_json::Value,
}

/// Owned by the host application; the engine only reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DigestSettings {
    pub shop_id: String,
    pub email: Option<String>,
    pub daily_enabled: bool,
    pub weekly_enabled: bool,
}

/// What the engine needs to reach one shop's upstream data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShopCredentials {
    pub shop_id: String,
    pub shop_domain: String,
    pub access_token: String,
    /// Timezone known to the host app, used when the payload carries none.
    pub timezone: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanTrigger {
    Manual,
    Automatic,
}

impl std::fmt::Display for ScanTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanTrigger::Manual => write!(f, "manual"),
            ScanTrigger::Automatic => write!(f, "automatic"),
        }
    }
}

impl InsightContext {
    /// Shop timezone, falling back to UTC when the stored name is not a known IANA zone.
    pub fn tz(&self) -> chrono_tz::Tz {
        self.shop_timezone.parse().unwrap_or(chrono_tz::UTC)
    }
}
