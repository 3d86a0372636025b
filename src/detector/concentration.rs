//! Revenue concentration in a handful of products.

use std::collections::HashMap;

use chrono::Duration;
use serde_json::json;

use super::{round2, DetectorOptions};
use crate::config::thresholds::*;
use crate::types::{Candidate, InsightContext, InsightType, Severity};

#[derive(Debug, Clone, Copy, Default)]
struct ProductSales {
    revenue: f64,
    units: u64,
}

pub fn evaluate(ctx: &InsightContext, opts: &DetectorOptions) -> Option<Candidate> {
    let since = ctx.now - Duration::days(opts.concentration_window_days);

    let mut sales: HashMap<&str, ProductSales> = HashMap::new();
    for order in ctx
        .orders
        .iter()
        .filter(|o| !o.is_cancelled() && o.created_at > since && o.created_at <= ctx.now)
    {
        for item in &order.line_items {
            let Some(pid) = item.product_id.as_deref() else {
                continue;
            };
            let entry = sales.entry(pid).or_default();
            entry.revenue += item.revenue;
            entry.units += u64::from(item.quantity);
        }
    }

    let total_revenue: f64 = sales.values().map(|s| s.revenue).sum();
    let total_units: u64 = sales.values().map(|s| s.units).sum();
    if total_units < CONCENTRATION_MIN_UNITS && total_revenue < CONCENTRATION_MIN_REVENUE {
        return None;
    }

    // Revenue share, or unit share for shops selling at $0.
    let by_revenue = total_revenue > 0.0;
    let mut shares: Vec<(&str, f64)> = sales
        .iter()
        .map(|(pid, s)| {
            let share = if by_revenue {
                s.revenue / total_revenue
            } else {
                s.units as f64 / total_units.max(1) as f64
            };
            (*pid, share)
        })
        .collect();
    shares.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(b.0))
    });

    let top1 = shares.first().map(|s| s.1).unwrap_or(0.0);
    let top3: f64 = shares.iter().take(3).map(|s| s.1).sum();

    let severity = if top1 >= CONCENTRATION_HIGH_TOP1 {
        Severity::High
    } else if top3 >= CONCENTRATION_MEDIUM_TOP3 {
        Severity::Medium
    } else if top3 >= CONCENTRATION_LOW_TOP3 {
        Severity::Low
    } else {
        return None;
    };

    let titles: HashMap<&str, &str> = ctx.products.iter().map(|p| (p.id.as_str(), p.title.as_str())).collect();
    let title_of = |pid: &str| titles.get(pid).map(|t| t.to_string()).unwrap_or_else(|| pid.to_string());
    let basis = if by_revenue { "revenue" } else { "units sold" };

    let description = if severity == Severity::High {
        format!(
            "\"{}\" brought in {:.0}% of {basis} over the last {} days.",
            title_of(shares[0].0),
            top1 * 100.0,
            opts.concentration_window_days,
        )
    } else {
        format!(
            "The top {} products brought in {:.0}% of {basis} over the last {} days.",
            shares.len().min(3),
            top3 * 100.0,
            opts.concentration_window_days,
        )
    };

    Some(Candidate {
        kind: Some(InsightType::ProductConcentrationRisk.as_str().to_string()),
        title: Some("Sales depend on very few products".to_string()),
        description: Some(description),
        severity: Some(severity.as_str().to_string()),
        suggested_action: Some(
            "Protect stock on the top sellers and promote the next best products to spread demand.".to_string(),
        ),
        metrics: Some(json!({
            "top1_share_pct": round2(top1 * 100.0),
            "top3_share_pct": round2(top3 * 100.0),
            "total_revenue": round2(total_revenue),
            "total_units": total_units,
            "products_sold": shares.len(),
        })),
        indicators: Some(json!({
            "basis": if by_revenue { "revenue" } else { "units" },
            "window_days": opts.concentration_window_days,
        })),
        items: shares
            .iter()
            .take(3)
            .map(|(pid, share)| {
                let s = sales.get(pid).copied().unwrap_or_default();
                json!({
                    "product_id": pid,
                    "title": title_of(pid),
                    "share_pct": round2(share * 100.0),
                    "revenue": round2(s.revenue),
                    "units": s.units,
                })
            })
            .collect(),
        evaluated_at: Some(ctx.now),
        ..Candidate::default()
    })
}
