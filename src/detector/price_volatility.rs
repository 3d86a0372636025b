//! Price churn over recent price snapshots.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::Duration;
use serde_json::json;

use super::{round2, DetectorOptions};
use crate::config::thresholds::*;
use crate::types::{Candidate, InsightContext, InsightType, Severity};

#[derive(Debug, Clone, PartialEq)]
struct Volatility {
    product_id: String,
    title: String,
    observations: usize,
    distinct_prices: usize,
    min_price: f64,
    max_price: f64,
    swing: f64,
}

fn swing(min: f64, max: f64) -> f64 {
    if min > 0.0 {
        (max - min) / min
    } else if max > 0.0 {
        1.0
    } else {
        0.0
    }
}

pub fn evaluate(ctx: &InsightContext, opts: &DetectorOptions) -> Option<Candidate> {
    let since = ctx.now - Duration::days(opts.price_lookback_days);

    // BTreeMap keeps product order stable for equal swings.
    let mut series: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    for snap in ctx
        .price_history
        .iter()
        .filter(|s| s.captured_at >= since && s.captured_at <= ctx.now && s.price.is_finite())
    {
        series.entry(snap.product_id.as_str()).or_default().push(snap.price);
    }
    // The live catalog price is the latest observation.
    for p in &ctx.products {
        if let Some(prices) = series.get_mut(p.id.as_str()) {
            prices.push(p.price);
        }
    }

    let titles: HashMap<&str, &str> = ctx.products.iter().map(|p| (p.id.as_str(), p.title.as_str())).collect();

    let mut flagged: Vec<Volatility> = series
        .into_iter()
        .filter(|(_, prices)| prices.len() >= 2)
        .filter_map(|(pid, prices)| {
            let distinct: BTreeSet<i64> = prices.iter().map(|p| (p * 100.0).round() as i64).collect();
            let min = prices.iter().copied().fold(f64::INFINITY, f64::min);
            let max = prices.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let s = swing(min, max);
            if distinct.len() < PRICE_MIN_DISTINCT && s < PRICE_MIN_SWING {
                return None;
            }
            Some(Volatility {
                product_id: pid.to_string(),
                title: titles.get(pid).map(|t| t.to_string()).unwrap_or_else(|| pid.to_string()),
                observations: prices.len(),
                distinct_prices: distinct.len(),
                min_price: min,
                max_price: max,
                swing: s,
            })
        })
        .collect();

    if flagged.is_empty() {
        return None;
    }

    flagged.sort_by(|a, b| {
        b.swing
            .partial_cmp(&a.swing)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.distinct_prices.cmp(&a.distinct_prices))
    });

    let max_swing = flagged.iter().map(|v| v.swing).fold(0.0, f64::max);
    let max_distinct = flagged.iter().map(|v| v.distinct_prices).max().unwrap_or(0);
    let severity = if max_swing >= PRICE_HIGH_SWING || max_distinct >= PRICE_HIGH_DISTINCT {
        Severity::High
    } else if max_swing >= PRICE_MEDIUM_SWING || max_distinct >= PRICE_MEDIUM_DISTINCT {
        Severity::Medium
    } else {
        Severity::Low
    };
    let lead = &flagged[0];

    Some(Candidate {
        kind: Some(InsightType::PriceVolatilityRisk.as_str().to_string()),
        title: Some(format!("Prices changed repeatedly on {} products", flagged.len())),
        summary: Some(format!(
            "\"{}\" moved between ${:.2} and ${:.2} ({} different prices) in the last {} days.",
            lead.title, lead.min_price, lead.max_price, lead.distinct_prices, opts.price_lookback_days,
        )),
        severity: Some(severity.as_str().to_string()),
        suggested_action: Some(
            "Confirm these changes were intended; check repricing apps, discount automations and bulk edits for conflicting rules."
                .to_string(),
        ),
        metrics: Some(json!({
            "flagged": flagged.len(),
            "max_swing_pct": round2(max_swing * 100.0),
            "max_distinct_prices": max_distinct,
        })),
        indicators: Some(json!({ "lookback_days": opts.price_lookback_days })),
        items: flagged
            .iter()
            .take(10)
            .map(|v| {
                json!({
                    "product_id": v.product_id,
                    "title": v.title,
                    "observations": v.observations,
                    "distinct_prices": v.distinct_prices,
                    "min_price": round2(v.min_price),
                    "max_price": round2(v.max_price),
                    "swing_pct": round2(v.swing * 100.0),
                })
            })
            .collect(),
        evaluated_at: Some(ctx.now),
        ..Candidate::default()
    })
}
