//! Sales drift as a trailing 7-day vs prior 7-day comparison.
//!
//! Older formulation of the sales detector, kept selectable through
//! `SCAN_SALES_DRIFT_VARIANT=window`.

use chrono::{DateTime, Duration, Utc};
use serde_json::json;

use super::{round2, DetectorOptions};
use crate::config::thresholds::*;
use crate::types::{Candidate, InsightContext, InsightType, Order, Severity};

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct WindowStats {
    orders: usize,
    cancelled: usize,
    /// Sum of non-cancelled order totals.
    gross: f64,
}

impl WindowStats {
    fn collect<'a>(orders: impl Iterator<Item = &'a Order>, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        let mut stats = WindowStats::default();
        for order in orders.filter(|o| o.created_at > from && o.created_at <= to) {
            stats.orders += 1;
            if order.is_cancelled() {
                stats.cancelled += 1;
            } else {
                stats.gross += order.total_price;
            }
        }
        stats
    }

    fn cancel_rate(&self) -> f64 {
        if self.orders == 0 {
            0.0
        } else {
            self.cancelled as f64 / self.orders as f64
        }
    }
}

fn drop_ratio(prior: f64, current: f64) -> f64 {
    if prior > 0.0 {
        (prior - current) / prior
    } else {
        0.0
    }
}

pub fn evaluate(ctx: &InsightContext, _opts: &DetectorOptions) -> Option<Candidate> {
    let window = Duration::days(WINDOW_DAYS);
    let current = WindowStats::collect(ctx.orders.iter(), ctx.now - window, ctx.now);
    let prior = WindowStats::collect(ctx.orders.iter(), ctx.now - window - window, ctx.now - window);

    if prior.orders < WINDOW_MIN_BASELINE_ORDERS {
        return None;
    }

    let orders_down = drop_ratio(prior.orders as f64, current.orders as f64);
    let gross_down = drop_ratio(prior.gross, current.gross);
    let prior_rate = prior.cancel_rate();
    let current_rate = current.cancel_rate();

    let cancel_spike_high = current_rate >= WINDOW_CANCEL_HIGH_MIN_RATE
        && current_rate >= WINDOW_CANCEL_HIGH_MULTIPLIER * prior_rate;
    let cancel_spike_medium =
        current_rate > 0.0 && current_rate >= WINDOW_CANCEL_MEDIUM_MULTIPLIER * prior_rate;

    let severity = if orders_down >= WINDOW_HIGH_DROP && (gross_down >= WINDOW_HIGH_DROP || cancel_spike_high) {
        Severity::High
    } else if orders_down >= WINDOW_MEDIUM_DROP || cancel_spike_medium {
        Severity::Medium
    } else if orders_down >= WINDOW_LOW_DROP || gross_down >= WINDOW_LOW_DROP {
        Severity::Low
    } else {
        return None;
    };

    let description = if orders_down > 0.0 {
        format!(
            "{} orders in the last 7 days versus {} the week before ({:.0}% fewer); revenue is down {:.0}%.",
            current.orders,
            prior.orders,
            orders_down * 100.0,
            gross_down.max(0.0) * 100.0,
        )
    } else {
        format!(
            "Cancellations rose to {:.0}% of orders in the last 7 days, from {:.0}% the week before.",
            current_rate * 100.0,
            prior_rate * 100.0,
        )
    };

    Some(Candidate {
        kind: Some(InsightType::SalesWindowDrift.as_str().to_string()),
        title: Some("Sales slowed compared with last week".to_string()),
        description: Some(description),
        severity: Some(severity.as_str().to_string()),
        suggested_action: Some(
            "Compare traffic and conversion with last week, check stock on best sellers and review recent cancellations for a common cause."
                .to_string(),
        ),
        metrics: Some(json!({
            "orders_current": current.orders,
            "orders_prior": prior.orders,
            "orders_down_pct": round2(orders_down * 100.0),
            "gross_current": round2(current.gross),
            "gross_prior": round2(prior.gross),
            "gross_down_pct": round2(gross_down * 100.0),
            "cancel_rate_current": round2(current_rate),
            "cancel_rate_prior": round2(prior_rate),
        })),
        indicators: Some(json!({
            "window_days": WINDOW_DAYS,
            "cancellation_spike": cancel_spike_medium,
        })),
        evaluated_at: Some(ctx.now),
        ..Candidate::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::fixtures::{context, order};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 12, 12, 0, 0).unwrap()
    }

    /// `count` orders worth `each` spread over the window ending `days_ago` days back.
    fn window_orders(prefix: &str, days_ago: i64, count: usize, each: f64) -> Vec<Order> {
        (0..count)
            .map(|i| {
                let at = now() - Duration::days(days_ago) - Duration::hours(1 + i as i64);
                order(&format!("{prefix}-{i}"), at, &[("p1", 1, each)])
            })
            .collect()
    }

    fn eval(orders: Vec<Order>) -> Option<Candidate> {
        evaluate(&context(now(), orders, Vec::new()), &DetectorOptions::default())
    }

    #[test]
    fn requires_five_prior_orders() {
        let mut orders = window_orders("prior", 7, 4, 20.0);
        orders.extend(window_orders("cur", 0, 0, 20.0));
        assert!(eval(orders).is_none());
    }

    #[test]
    fn orders_and_revenue_collapse_is_high() {
        let mut orders = window_orders("prior", 7, 20, 20.0);
        orders.extend(window_orders("cur", 0, 10, 20.0));
        let c = eval(orders).expect("candidate");
        assert_eq!(c.severity.as_deref(), Some("high"));
    }

    #[test]
    fn orders_down_with_stable_revenue_is_medium() {
        let mut orders = window_orders("prior", 7, 20, 20.0);
        // 40% fewer orders but larger baskets keep revenue flat.
        orders.extend(window_orders("cur", 0, 12, 34.0));
        let c = eval(orders).expect("candidate");
        assert_eq!(c.severity.as_deref(), Some("medium"));
    }

    #[test]
    fn cancellation_spike_with_order_drop_is_high() {
        let mut orders = window_orders("prior", 7, 20, 20.0);
        let mut current = window_orders("cur", 0, 13, 30.0);
        for o in current.iter_mut().take(2) {
            o.cancelled_at = Some(o.created_at);
        }
        orders.extend(current);
        // orders down 35%, gross down 17%, cancel rate 15% vs 0%
        let c = eval(orders).expect("candidate");
        assert_eq!(c.severity.as_deref(), Some("high"));
    }

    #[test]
    fn small_revenue_dip_is_low() {
        let mut orders = window_orders("prior", 7, 20, 20.0);
        orders.extend(window_orders("cur", 0, 19, 18.0));
        let c = eval(orders).expect("candidate");
        assert_eq!(c.severity.as_deref(), Some("low"));
    }

    #[test]
    fn steady_sales_produce_nothing() {
        let mut orders = window_orders("prior", 7, 20, 20.0);
        orders.extend(window_orders("cur", 0, 20, 20.0));
        assert!(eval(orders).is_none());
    }
}
