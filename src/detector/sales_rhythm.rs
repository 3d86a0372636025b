//! Sales rhythm drift against a same-weekday baseline.
//!
//! "Today so far" is compared with what the same weekday looked like at the same
//! minute-of-day over the trailing lookback. Everything is evaluated on the shop's
//! wall clock.

use std::collections::HashMap;

use chrono::{Datelike, Duration, NaiveDate, Timelike};
use serde::Serialize;
use serde_json::json;

use super::{round2, DetectorOptions};
use crate::config::thresholds::*;
use crate::stats;
use crate::types::{Candidate, InsightContext, InsightType, Severity};

/// Full outcome of the baseline comparison, including the "not detected" cases.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RhythmAnalysis {
    pub detected: bool,
    /// Why detection was skipped or did not fire.
    pub reason: Option<&'static str>,
    pub severity: Option<Severity>,
    pub orders_today_so_far: usize,
    pub baseline_days: usize,
    pub baseline_median: f64,
    pub baseline_iqr: f64,
    pub expected_low: f64,
    pub ratio: Option<f64>,
    pub day_progress: f64,
    pub minute_of_day: u32,
    pub weekday: String,
}

pub fn analyze(ctx: &InsightContext, opts: &DetectorOptions) -> RhythmAnalysis {
    let tz = ctx.tz();
    let local_now = ctx.now.with_timezone(&tz);
    let today = local_now.date_naive();
    let minute_of_day = local_now.hour() * 60 + local_now.minute();
    let day_progress = f64::from(minute_of_day) / 1440.0;

    let mut analysis = RhythmAnalysis {
        detected: false,
        reason: None,
        severity: None,
        orders_today_so_far: 0,
        baseline_days: 0,
        baseline_median: 0.0,
        baseline_iqr: 0.0,
        expected_low: 0.0,
        ratio: None,
        day_progress,
        minute_of_day,
        weekday: local_now.weekday().to_string(),
    };

    if day_progress < RHYTHM_MIN_DAY_PROGRESS {
        analysis.reason = Some("too_early");
        return analysis;
    }

    // local date → minute-of-day of each order placed that day
    let mut by_day: HashMap<NaiveDate, Vec<u32>> = HashMap::new();
    for order in ctx.orders.iter().filter(|o| !o.is_cancelled() && o.created_at <= ctx.now) {
        let local = order.created_at.with_timezone(&tz);
        by_day
            .entry(local.date_naive())
            .or_default()
            .push(local.hour() * 60 + local.minute());
    }

    let so_far = |minutes: &Vec<u32>| minutes.iter().filter(|&&m| m <= minute_of_day).count();

    analysis.orders_today_so_far = by_day.get(&today).map(so_far).unwrap_or(0);

    let weeks = opts.rhythm_lookback_days / 7;
    let baseline: Vec<f64> = (1..=weeks)
        .filter_map(|week| {
            let day = today - Duration::days(7 * week);
            let minutes = by_day.get(&day)?;
            (minutes.len() >= RHYTHM_MIN_DAY_ORDERS).then(|| so_far(minutes) as f64)
        })
        .collect();

    analysis.baseline_days = baseline.len();
    if baseline.len() < RHYTHM_MIN_BASELINE_DAYS {
        analysis.reason = Some("insufficient_baseline");
        return analysis;
    }

    let median = stats::median(&baseline);
    let iqr = stats::iqr(&baseline);
    analysis.baseline_median = median;
    analysis.baseline_iqr = iqr;
    analysis.expected_low = median - RHYTHM_IQR_FENCE * iqr;

    if median < RHYTHM_MIN_BASELINE_MEDIAN {
        analysis.reason = Some("low_volume");
        return analysis;
    }

    let today_count = analysis.orders_today_so_far as f64;
    let ratio = today_count / median;
    analysis.ratio = Some(ratio);

    if today_count < analysis.expected_low && ratio <= RHYTHM_DROP_RATIO {
        analysis.detected = true;
        analysis.severity = Some(if ratio <= RHYTHM_HIGH_RATIO {
            Severity::High
        } else {
            Severity::Medium
        });
    } else {
        analysis.reason = Some("within_expected_range");
    }
    analysis
}

pub fn evaluate(ctx: &InsightContext, opts: &DetectorOptions) -> Option<Candidate> {
    let a = analyze(ctx, opts);
    if !a.detected {
        return None;
    }
    let severity = a.severity?;
    let ratio = a.ratio.unwrap_or(0.0);
    let pct_of_normal = (ratio * 100.0).round();

    Some(Candidate {
        kind: Some(InsightType::SalesRhythmDrift.as_str().to_string()),
        title: Some(format!("Orders are running behind a typical {}", a.weekday_name())),
        description: Some(format!(
            "{} orders so far today versus a typical {:.0} by this time on a {} ({pct_of_normal:.0}% of normal).",
            a.orders_today_so_far,
            a.baseline_median,
            a.weekday_name(),
        )),
        severity: Some(severity.as_str().to_string()),
        suggested_action: Some(
            "Check checkout, payment and storefront availability, and review any theme, app or pricing change made today."
                .to_string(),
        ),
        metrics: Some(json!({
            "orders_today_so_far": a.orders_today_so_far,
            "baseline_median": round2(a.baseline_median),
            "baseline_iqr": round2(a.baseline_iqr),
            "expected_low": round2(a.expected_low),
            "ratio": round2(ratio),
            "baseline_days": a.baseline_days,
        })),
        indicators: Some(json!({
            "weekday": a.weekday,
            "minute_of_day": a.minute_of_day,
            "day_progress": round2(a.day_progress),
            "lookback_days": opts.rhythm_lookback_days,
        })),
        evaluated_at: Some(ctx.now),
        ..Candidate::default()
    })
}

impl RhythmAnalysis {
    fn weekday_name(&self) -> &'static str {
        match self.weekday.as_str() {
            "Mon" => "Monday",
            "Tue" => "Tuesday",
            "Wed" => "Wednesday",
            "Thu" => "Thursday",
            "Fri" => "Friday",
            "Sat" => "Saturday",
            _ => "Sunday",
        }
    }
}
