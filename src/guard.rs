//! Per-(shop, insight type) suppression windows.

use chrono::{DateTime, Duration, Utc};
use tracing::warn;

use crate::collab::InsightStore;
use crate::config::guard_hours;
use crate::types::InsightType;

/// Guard window for an insight type. Types recheck at different cadences.
pub fn guard_hours_for(kind: &str) -> i64 {
    match InsightType::from_key(kind) {
        Some(InsightType::SalesRhythmDrift) | Some(InsightType::SalesWindowDrift) => guard_hours::SALES,
        Some(InsightType::InventoryVelocityRisk) => guard_hours::INVENTORY,
        Some(InsightType::DeadInventory) => guard_hours::DEAD_INVENTORY,
        Some(InsightType::PriceVolatilityRisk) => guard_hours::PRICE_VOLATILITY,
        Some(InsightType::ProductConcentrationRisk) => guard_hours::CONCENTRATION,
        None => guard_hours::DEFAULT,
    }
}

pub struct IdempotencyGuard<'a> {
    store: &'a dyn InsightStore,
    now: DateTime<Utc>,
}

impl<'a> IdempotencyGuard<'a> {
    pub fn new(store: &'a dyn InsightStore, now: DateTime<Utc>) -> Self {
        Self { store, now }
    }

    /// Whether an insight of `kind` was recorded for the shop within the last `hours`.
    /// A failed lookup answers `false` so the insert goes ahead: a duplicate alert
    /// is preferred over a lost one.
    pub async fn already_recent(&self, shop_id: &str, kind: &str, hours: i64) -> bool {
        let since = self.now - Duration::hours(hours);
        match self.store.query_recent_insight(shop_id, kind, since).await {
            Ok(found) => found,
            Err(e) => {
                warn!(shop_id, kind, "[GUARD] lookup failed, allowing insert: {e}");
                false
            }
        }
    }
}
