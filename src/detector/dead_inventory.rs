//! Dead inventory: stocked active products that are not turning into sales.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::json;

use super::{round2, DetectorOptions};
use crate::config::thresholds::*;
use crate::types::{Candidate, InsightContext, InsightType, Product, Severity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadBucket {
    /// No sale anywhere in the observable horizon.
    NeverSold,
    /// Sold within 90 days, but not in the last 30.
    StoppedSelling,
    /// Still selling, too slowly for the stock on hand.
    SlowMover,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeadItem {
    pub product_id: String,
    pub title: String,
    pub inventory: i64,
    pub cash_trapped: f64,
    pub bucket: DeadBucket,
    pub last_sale_at: Option<DateTime<Utc>>,
    pub units_30d: u64,
}

fn is_gift_card(title: &str) -> bool {
    let t = title.to_ascii_lowercase();
    t.contains("gift card") || t.contains("giftcard") || t.contains("gift-card")
}

#[derive(Default)]
struct SalesTrace {
    last_sale_at: Option<DateTime<Utc>>,
    units_30d: u64,
}

fn classify(p: &Product, trace: Option<&SalesTrace>, now: DateTime<Utc>) -> Option<DeadBucket> {
    let Some(last) = trace.and_then(|t| t.last_sale_at) else {
        return Some(DeadBucket::NeverSold);
    };
    let idle = now - last;
    if idle > Duration::days(DEAD_HORIZON_DAYS) {
        return Some(DeadBucket::NeverSold);
    }
    if idle > Duration::days(DEAD_STOPPED_DAYS) {
        return Some(DeadBucket::StoppedSelling);
    }
    let units = trace.map(|t| t.units_30d).unwrap_or(0);
    if units == 0 {
        return Some(DeadBucket::StoppedSelling);
    }
    let daily = units as f64 / DEAD_STOPPED_DAYS as f64;
    let cover_days = p.inventory_quantity as f64 / daily;
    (cover_days > DEAD_SLOW_COVER_DAYS).then_some(DeadBucket::SlowMover)
}

pub fn evaluate(ctx: &InsightContext, opts: &DetectorOptions) -> Option<Candidate> {
    let recent_cutoff = ctx.now - Duration::days(DEAD_STOPPED_DAYS);

    let mut traces: HashMap<&str, SalesTrace> = HashMap::new();
    for order in ctx.orders.iter().filter(|o| !o.is_cancelled() && o.created_at <= ctx.now) {
        for item in order.line_items.iter().filter(|li| li.quantity > 0) {
            let Some(pid) = item.product_id.as_deref() else {
                continue;
            };
            let trace = traces.entry(pid).or_default();
            if trace.last_sale_at.map_or(true, |t| order.created_at > t) {
                trace.last_sale_at = Some(order.created_at);
            }
            if order.created_at > recent_cutoff {
                trace.units_30d += u64::from(item.quantity);
            }
        }
    }

    let mut items: Vec<DeadItem> = ctx
        .products
        .iter()
        .filter(|p| p.is_active() && !is_gift_card(&p.title) && p.inventory_quantity >= opts.dead_min_stock)
        .filter_map(|p| {
            let trace = traces.get(p.id.as_str());
            let bucket = classify(p, trace, ctx.now)?;
            Some(DeadItem {
                product_id: p.id.clone(),
                title: p.title.clone(),
                inventory: p.inventory_quantity,
                cash_trapped: p.inventory_quantity as f64 * p.price,
                bucket,
                last_sale_at: trace.and_then(|t| t.last_sale_at),
                units_30d: trace.map(|t| t.units_30d).unwrap_or(0),
            })
        })
        .collect();

    if items.is_empty() {
        return None;
    }

    items.sort_by(|a, b| {
        b.cash_trapped
            .partial_cmp(&a.cash_trapped)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.title.cmp(&b.title))
    });

    let cash_trapped: f64 = items.iter().map(|i| i.cash_trapped).sum();
    let severity = if cash_trapped >= DEAD_HIGH_CASH {
        Severity::High
    } else if items.len() >= DEAD_MEDIUM_ITEMS {
        Severity::Medium
    } else {
        Severity::Low
    };
    let count = |bucket: DeadBucket| items.iter().filter(|i| i.bucket == bucket).count();

    Some(Candidate {
        kind: Some(InsightType::DeadInventory.as_str().to_string()),
        title: Some(format!("{} products are tying up ${:.0} in stock", items.len(), cash_trapped)),
        description: Some(format!(
            "{} never sold, {} stopped selling in the last 30 days and {} are moving too slowly for the stock on hand.",
            count(DeadBucket::NeverSold),
            count(DeadBucket::StoppedSelling),
            count(DeadBucket::SlowMover),
        )),
        severity: Some(severity.as_str().to_string()),
        suggested_action: Some(
            "Run a markdown or bundle on the listed products, feature them in merchandising, or pause reorders until stock clears."
                .to_string(),
        ),
        metrics: Some(json!({
            "flagged": items.len(),
            "cash_trapped": round2(cash_trapped),
            "never_sold": count(DeadBucket::NeverSold),
            "stopped_selling": count(DeadBucket::StoppedSelling),
            "slow_mover": count(DeadBucket::SlowMover),
        })),
        indicators: Some(json!({ "min_stock": opts.dead_min_stock })),
        items: items
            .iter()
            .take(10)
            .map(|i| {
                json!({
                    "product_id": i.product_id,
                    "title": i.title,
                    "inventory": i.inventory,
                    "cash_trapped": round2(i.cash_trapped),
                    "bucket": i.bucket,
                    "last_sale_at": i.last_sale_at,
                    "units_30d": i.units_30d,
                })
            })
            .collect(),
        evaluated_at: Some(ctx.now),
        ..Candidate::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::fixtures::{context, order, product};
    use crate::detector::inventory;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 12, 12, 0, 0).unwrap()
    }

    fn days_ago(d: i64) -> DateTime<Utc> {
        now() - Duration::days(d)
    }

    #[test]
    fn buckets_products_by_last_sale() {
        let orders = vec![
            order("o1", days_ago(45), &[("stopped", 2, 40.0)]),
            order("o2", days_ago(5), &[("slow", 1, 20.0)]),
            order("o3", days_ago(2), &[("fast", 20, 200.0)]),
        ];
        let products = vec![
            product("never", "Never", 10.0, 20),
            product("stopped", "Stopped", 20.0, 15),
            product("slow", "Slow", 20.0, 50),
            product("fast", "Fast", 10.0, 30),
            product("thin", "Thin", 10.0, 4),
        ];
        let ctx = context(now(), orders, products);

        let c = evaluate(&ctx, &DetectorOptions::default()).expect("candidate");
        let metrics = c.metrics.unwrap();
        assert_eq!(metrics["never_sold"], 1);
        assert_eq!(metrics["stopped_selling"], 1);
        assert_eq!(metrics["slow_mover"], 1);
        // 200 + 300 + 1000
        assert_eq!(metrics["cash_trapped"], 1500.0);
        assert_eq!(c.severity.as_deref(), Some("high"));
        assert_eq!(c.items[0]["product_id"], "slow");
    }

    #[test]
    fn severity_steps_down_with_cash() {
        let products = vec![
            product("a", "A", 2.0, 10),
            product("b", "B", 2.0, 10),
            product("c", "C", 2.0, 10),
        ];
        let c = evaluate(&context(now(), Vec::new(), products), &DetectorOptions::default()).unwrap();
        assert_eq!(c.severity.as_deref(), Some("medium"));

        let products = vec![product("a", "A", 2.0, 10)];
        let c = evaluate(&context(now(), Vec::new(), products), &DetectorOptions::default()).unwrap();
        assert_eq!(c.severity.as_deref(), Some("low"));
    }

    #[test]
    fn skips_gift_cards_drafts_and_thin_stock() {
        let mut draft = product("d", "Draft tee", 10.0, 50);
        draft.status = "draft".to_string();
        let products = vec![
            product("g", "Store Gift Card", 25.0, 1000),
            draft,
            product("t", "Thin", 10.0, 9),
        ];
        assert!(evaluate(&context(now(), Vec::new(), products), &DetectorOptions::default()).is_none());
    }

    #[test]
    fn cancelled_orders_do_not_count_as_sales() {
        let mut cancelled = order("o1", days_ago(3), &[("a", 5, 50.0)]);
        cancelled.cancelled_at = Some(days_ago(3));
        let ctx = context(now(), vec![cancelled], vec![product("a", "A", 10.0, 20)]);
        let c = evaluate(&ctx, &DetectorOptions::default()).unwrap();
        assert_eq!(c.metrics.unwrap()["never_sold"], 1);
    }

    #[test]
    fn sold_out_seller_is_inventory_risk_not_dead_stock() {
        let mut sold_out = product("z", "Zed", 15.0, 0);
        sold_out.historical_units = 4;
        sold_out.historical_revenue = 60.0;
        let ctx = context(
            now(),
            vec![order("o1", days_ago(20), &[("z", 4, 60.0)])],
            vec![sold_out],
        );

        assert!(evaluate(&ctx, &DetectorOptions::default()).is_none());
        let risk = inventory::evaluate(&ctx, &DetectorOptions::default()).expect("inventory risk");
        assert_eq!(risk.severity.as_deref(), Some("high"));
    }
}
