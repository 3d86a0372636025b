//! Inventory pressure: days of supply when sales velocity is known, lowest stock
//! levels when it is not.

use std::collections::{HashMap, HashSet};

use chrono::Duration;
use serde::Serialize;
use serde_json::json;

use super::{round2, DetectorOptions};
use crate::config::thresholds::*;
use crate::types::{Candidate, InsightContext, InsightType, Product, Severity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PressureMode {
    Velocity,
    LowStock,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StockRisk {
    pub product_id: String,
    pub title: String,
    pub inventory: i64,
    pub units_in_window: u64,
    pub daily_rate: f64,
    /// Only set in velocity mode.
    pub days_of_supply: Option<f64>,
    pub severity: Severity,
}

/// Sold before, nothing left to sell.
fn stocked_out_seller(p: &Product) -> bool {
    p.inventory_quantity <= 0 && p.historical_units > 0
}

pub fn evaluate(ctx: &InsightContext, opts: &DetectorOptions) -> Option<Candidate> {
    let window_days = opts.velocity_window_days.max(1);
    let since = ctx.now - Duration::days(window_days);

    let known: HashSet<&str> = ctx.products.iter().map(|p| p.id.as_str()).collect();
    let mut linked = false;
    let mut units: HashMap<&str, u64> = HashMap::new();
    for order in ctx.orders.iter().filter(|o| !o.is_cancelled()) {
        for item in &order.line_items {
            let Some(pid) = item.product_id.as_deref().filter(|pid| known.contains(pid)) else {
                continue;
            };
            linked = true;
            if order.created_at > since && order.created_at <= ctx.now {
                *units.entry(pid).or_default() += u64::from(item.quantity);
            }
        }
    }

    let has_velocity = linked && units.values().any(|&u| u > 0);
    let active = ctx.products.iter().filter(|p| p.is_active());

    let (mode, mut risks) = if has_velocity {
        let risks: Vec<StockRisk> = active
            .filter_map(|p| {
                let sold = units.get(p.id.as_str()).copied().unwrap_or(0);
                if sold == 0 {
                    return stocked_out_seller(p).then(|| risk(p, 0, 0.0, Some(0.0), Severity::High));
                }
                let rate = sold as f64 / window_days as f64;
                let supply = p.inventory_quantity.max(0) as f64 / rate;
                let severity = if supply < SUPPLY_HIGH_DAYS {
                    Severity::High
                } else if supply < SUPPLY_MEDIUM_DAYS {
                    Severity::Medium
                } else {
                    return None;
                };
                Some(risk(p, sold, rate, Some(supply), severity))
            })
            .collect();
        (PressureMode::Velocity, risks)
    } else {
        let risks: Vec<StockRisk> = active
            .filter_map(|p| {
                let severity = if stocked_out_seller(p) || p.inventory_quantity <= LOW_STOCK_HIGH_UNITS {
                    Severity::High
                } else if p.inventory_quantity <= LOW_STOCK_MEDIUM_UNITS {
                    Severity::Medium
                } else {
                    return None;
                };
                Some(risk(p, 0, 0.0, None, severity))
            })
            .collect();
        // A single low SKU is noise unless it is a proven seller that ran out.
        let proven_out = ctx.products.iter().any(|p| p.is_active() && stocked_out_seller(p));
        if risks.len() < LOW_STOCK_MIN_ITEMS && !proven_out {
            return None;
        }
        (PressureMode::LowStock, risks)
    };

    if risks.is_empty() {
        return None;
    }

    match mode {
        PressureMode::Velocity => risks.sort_by(|a, b| {
            a.days_of_supply
                .unwrap_or(0.0)
                .partial_cmp(&b.days_of_supply.unwrap_or(0.0))
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.daily_rate.partial_cmp(&a.daily_rate).unwrap_or(std::cmp::Ordering::Equal))
                .then_with(|| a.title.cmp(&b.title))
        }),
        PressureMode::LowStock => risks.sort_by(|a, b| {
            a.inventory.cmp(&b.inventory).then_with(|| a.title.cmp(&b.title))
        }),
    }

    let severity = risks.iter().map(|r| r.severity).max().unwrap_or(Severity::Medium);
    let high_count = risks.iter().filter(|r| r.severity == Severity::High).count();
    let lead = &risks[0];

    let description = match mode {
        PressureMode::Velocity => format!(
            "{} products could sell out within a week at the current sales pace; \"{}\" has about {:.1} days of stock left.",
            risks.len(),
            lead.title,
            lead.days_of_supply.unwrap_or(0.0),
        ),
        PressureMode::LowStock => format!(
            "{} products are running low on stock; \"{}\" has {} units left.",
            risks.len(),
            lead.title,
            lead.inventory,
        ),
    };

    let items = risks
        .iter()
        .take(10)
        .map(|r| {
            json!({
                "product_id": r.product_id,
                "title": r.title,
                "inventory": r.inventory,
                "units_in_window": r.units_in_window,
                "daily_rate": round2(r.daily_rate),
                "days_of_supply": r.days_of_supply.map(round2),
                "severity": r.severity,
            })
        })
        .collect();

    Some(Candidate {
        kind: Some(InsightType::InventoryVelocityRisk.as_str().to_string()),
        title: Some(format!("{} products at risk of stocking out", risks.len())),
        description: Some(description),
        severity: Some(severity.as_str().to_string()),
        suggested_action: Some(
            "Reorder the listed products now, or slow demand with ad spend or bundling until stock arrives."
                .to_string(),
        ),
        metrics: Some(json!({
            "flagged": risks.len(),
            "high": high_count,
            "medium": risks.len() - high_count,
            "window_days": window_days,
        })),
        indicators: Some(json!({ "mode": mode })),
        items,
        evaluated_at: Some(ctx.now),
        ..Candidate::default()
    })
}

fn risk(p: &Product, sold: u64, rate: f64, supply: Option<f64>, severity: Severity) -> StockRisk {
    StockRisk {
        product_id: p.id.clone(),
        title: p.title.clone(),
        inventory: p.inventory_quantity,
        units_in_window: sold,
        daily_rate: rate,
        days_of_supply: supply,
        severity,
    }
}
