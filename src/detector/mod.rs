pub mod concentration;
pub mod dead_inventory;
pub mod inventory;
pub mod price_volatility;
pub mod sales_rhythm;
pub mod sales_window;

use crate::config::{thresholds, Config, SalesDriftVariant};
use crate::types::{Candidate, InsightContext, InsightType};

/// Per-scan tunables shared by all detectors.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorOptions {
    pub rhythm_lookback_days: i64,
    pub velocity_window_days: i64,
    pub dead_min_stock: i64,
    pub price_lookback_days: i64,
    pub concentration_window_days: i64,
}

impl Default for DetectorOptions {
    fn default() -> Self {
        Self {
            rhythm_lookback_days: thresholds::RHYTHM_LOOKBACK_DAYS,
            velocity_window_days: thresholds::VELOCITY_WINDOW_DAYS,
            dead_min_stock: thresholds::DEAD_MIN_STOCK,
            price_lookback_days: thresholds::PRICE_LOOKBACK_DAYS,
            concentration_window_days: thresholds::CONCENTRATION_WINDOW_DAYS,
        }
    }
}

impl DetectorOptions {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            velocity_window_days: cfg.inventory_velocity_window_days,
            ..Self::default()
        }
    }
}

/// The fixed set of detectors. Dispatch is a plain `match`; every variant is a pure
/// function of the context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorKind {
    SalesRhythmDrift,
    SalesWindowDrift,
    InventoryVelocityRisk,
    DeadInventory,
    PriceVolatilityRisk,
    ProductConcentrationRisk,
}

impl DetectorKind {
    pub fn insight_type(&self) -> InsightType {
        match self {
            DetectorKind::SalesRhythmDrift => InsightType::SalesRhythmDrift,
            DetectorKind::SalesWindowDrift => InsightType::SalesWindowDrift,
            DetectorKind::InventoryVelocityRisk => InsightType::InventoryVelocityRisk,
            DetectorKind::DeadInventory => InsightType::DeadInventory,
            DetectorKind::PriceVolatilityRisk => InsightType::PriceVolatilityRisk,
            DetectorKind::ProductConcentrationRisk => InsightType::ProductConcentrationRisk,
        }
    }

    /// `None` means no actionable signal, never an error.
    pub fn evaluate(&self, ctx: &InsightContext, opts: &DetectorOptions) -> Option<Candidate> {
        match self {
            DetectorKind::SalesRhythmDrift => sales_rhythm::evaluate(ctx, opts),
            DetectorKind::SalesWindowDrift => sales_window::evaluate(ctx, opts),
            DetectorKind::InventoryVelocityRisk => inventory::evaluate(ctx, opts),
            DetectorKind::DeadInventory => dead_inventory::evaluate(ctx, opts),
            DetectorKind::PriceVolatilityRisk => price_volatility::evaluate(ctx, opts),
            DetectorKind::ProductConcentrationRisk => concentration::evaluate(ctx, opts),
        }
    }
}

/// Ordered list of active detectors. Evaluation order is the list order and is
/// reported in scan summaries.
#[derive(Debug, Clone)]
pub struct DetectorRegistry {
    detectors: Vec<DetectorKind>,
}

impl DetectorRegistry {
    pub fn new(detectors: Vec<DetectorKind>) -> Self {
        Self { detectors }
    }

    /// Production set. Exactly one of the two sales-drift formulations is active.
    pub fn standard(variant: SalesDriftVariant) -> Self {
        let sales = match variant {
            SalesDriftVariant::Weekday => DetectorKind::SalesRhythmDrift,
            SalesDriftVariant::Window => DetectorKind::SalesWindowDrift,
        };
        Self::new(vec![
            sales,
            DetectorKind::InventoryVelocityRisk,
            DetectorKind::DeadInventory,
            DetectorKind::PriceVolatilityRisk,
            DetectorKind::ProductConcentrationRisk,
        ])
    }

    pub fn iter(&self) -> impl Iterator<Item = DetectorKind> + '_ {
        self.detectors.iter().copied()
    }
}

pub(crate) fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
