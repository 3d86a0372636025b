use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashSet;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::schedule::{local_day_key, next_run_at};
use crate::api::latency::ScanLatency;
use crate::collab::{InsightStore, Mailer, ShopDataSource};
use crate::config::{thresholds, Config};
use crate::context::{build_context, BuildDiagnostics};
use crate::detector::{DetectorOptions, DetectorRegistry};
use crate::error::{AppError, Result};
use crate::guard::{guard_hours_for, IdempotencyGuard};
use crate::mailer::{compose_digest, is_valid_recipient};
use crate::normalizer::normalize;
use crate::types::{
    CanonicalInsight, PriceSnapshot, ScanRunRecord, ScanStatus, ScanTrigger, ShopCredentials,
};

/// Key inside `last_scan_summary` holding the shop-local day a digest went out.
pub const DIGEST_MARKER_KEY: &str = "digest_sent_day";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkipEntry {
    #[serde(rename = "type")]
    pub kind: String,
    /// `contract_incomplete` or `guard_<hours>h`.
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DigestOutcome {
    /// Manual scans never send mail.
    NotAttempted,
    NoMailer,
    Disabled,
    NoRecipient,
    InvalidRecipient,
    NothingActionable,
    AlreadySent,
    Sent,
    Failed,
}

/// Everything one scan did, returned to the caller and stored as `last_scan_summary`.
#[derive(Debug, Clone, Serialize)]
pub struct ScanSummary {
    pub shop_id: String,
    pub trigger: ScanTrigger,
    pub ok: bool,
    pub scanned_at: DateTime<Utc>,
    pub timezone: Option<String>,
    pub detectors_run: Vec<String>,
    /// Detectors that produced a candidate this run.
    pub candidates: usize,
    pub inserted_count: usize,
    pub skipped_count: usize,
    pub inserted: Vec<String>,
    pub skipped: Vec<SkipEntry>,
    pub price_snapshots: usize,
    pub next_scan_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<BuildDiagnostics>,
    pub digest: DigestOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest_sent_day: Option<String>,
    pub duration_ms: u64,
}

impl ScanSummary {
    fn new(shop_id: &str, trigger: ScanTrigger, now: DateTime<Utc>) -> Self {
        Self {
            shop_id: shop_id.to_string(),
            trigger,
            ok: false,
            scanned_at: now,
            timezone: None,
            detectors_run: Vec::new(),
            candidates: 0,
            inserted_count: 0,
            skipped_count: 0,
            inserted: Vec::new(),
            skipped: Vec::new(),
            price_snapshots: 0,
            next_scan_at: None,
            error: None,
            context: None,
            digest: DigestOutcome::NotAttempted,
            digest_sent_day: None,
            duration_ms: 0,
        }
    }
}

/// Releases the shop's in-flight slot when dropped.
struct InFlightSlot<'a> {
    set: &'a DashSet<String>,
    shop_id: String,
}

impl<'a> InFlightSlot<'a> {
    fn claim(set: &'a DashSet<String>, shop_id: &str) -> Option<Self> {
        set.insert(shop_id.to_string()).then(|| Self {
            set,
            shop_id: shop_id.to_string(),
        })
    }
}

impl Drop for InFlightSlot<'_> {
    fn drop(&mut self) {
        self.set.remove(&self.shop_id);
    }
}

/// Runs the full fetch → detect → gate → persist → schedule → digest pipeline for one
/// shop. Steps run strictly in sequence; only a failed fetch or a failed insight write
/// marks the scan as failed.
pub struct ScanEngine {
    source: Arc<dyn ShopDataSource>,
    store: Arc<dyn InsightStore>,
    mailer: Option<Arc<dyn Mailer>>,
    registry: DetectorRegistry,
    options: DetectorOptions,
    /// Days of orders requested per fetch; never shorter than any detector horizon.
    fetch_window_days: i64,
    in_flight: DashSet<String>,
    latency: Arc<ScanLatency>,
}

impl ScanEngine {
    pub fn new(
        source: Arc<dyn ShopDataSource>,
        store: Arc<dyn InsightStore>,
        mailer: Option<Arc<dyn Mailer>>,
        registry: DetectorRegistry,
        options: DetectorOptions,
        lookback_days: i64,
    ) -> Self {
        Self {
            source,
            store,
            mailer,
            registry,
            options,
            fetch_window_days: lookback_days
                .max(thresholds::DEAD_HORIZON_DAYS)
                .max(thresholds::RHYTHM_LOOKBACK_DAYS),
            in_flight: DashSet::new(),
            latency: Arc::new(ScanLatency::new()),
        }
    }

    pub fn from_config(
        cfg: &Config,
        source: Arc<dyn ShopDataSource>,
        store: Arc<dyn InsightStore>,
        mailer: Option<Arc<dyn Mailer>>,
    ) -> Self {
        Self::new(
            source,
            store,
            mailer,
            DetectorRegistry::standard(cfg.sales_drift_variant),
            DetectorOptions::from_config(cfg),
            cfg.scan_lookback_days,
        )
    }

    pub fn store(&self) -> &Arc<dyn InsightStore> {
        &self.store
    }

    pub fn latency(&self) -> &Arc<ScanLatency> {
        &self.latency
    }

    pub fn is_scanning(&self, shop_id: &str) -> bool {
        self.in_flight.contains(shop_id)
    }

    /// Scans unless the same shop is already being scanned, in which case the
    /// caller gets `Conflict("scan_in_progress")`.
    pub async fn run_exclusive(
        &self,
        shop: &ShopCredentials,
        trigger: ScanTrigger,
        now: DateTime<Utc>,
    ) -> Result<ScanSummary> {
        let Some(_slot) = InFlightSlot::claim(&self.in_flight, &shop.shop_id) else {
            return Err(AppError::Conflict("scan_in_progress".to_string()));
        };
        Ok(self.scan_shop(shop, trigger, now).await)
    }

    pub async fn scan_shop(
        &self,
        shop: &ShopCredentials,
        trigger: ScanTrigger,
        now: DateTime<Utc>,
    ) -> ScanSummary {
        let started = Instant::now();
        let shop_id = shop.shop_id.as_str();
        let mut summary = ScanSummary::new(shop_id, trigger, now);

        let previous = match self.store.get_scan_run(shop_id).await {
            Ok(record) => record,
            Err(e) => {
                warn!(shop_id, "[SCAN] could not load previous scan run: {e}");
                None
            }
        };
        let fallback_tz = shop.timezone.as_deref().unwrap_or("UTC");
        // A digest already sent today stays recorded whatever this run does.
        let previous_digest = previous_digest_day(previous.as_ref());
        let today = local_day_key(fallback_tz, now);
        summary.digest_sent_day = previous_digest.clone().filter(|day| *day == today);

        let since = now - Duration::days(self.fetch_window_days);
        let payload = match self.source.fetch_shop_payload(shop, since).await {
            Ok(payload) => payload,
            Err(e) => {
                summary.error = Some(format!("fetch_failed: {e}"));
                return self.finish_failed(summary, fallback_tz, started).await;
            }
        };

        let history_since = now - Duration::days(self.options.price_lookback_days);
        let price_history = match self.store.price_history(shop_id, history_since).await {
            Ok(history) => history,
            Err(e) => {
                warn!(shop_id, "[SCAN] price history unavailable, continuing without it: {e}");
                Vec::new()
            }
        };

        let (ctx, diagnostics) = build_context(shop_id, &payload, shop.timezone.as_deref(), now, price_history);
        summary.timezone = Some(ctx.shop_timezone.clone());
        summary.context = Some(diagnostics);
        let today = local_day_key(&ctx.shop_timezone, now);
        summary.digest_sent_day = previous_digest.filter(|day| *day == today);

        let guard = IdempotencyGuard::new(self.store.as_ref(), now);
        let mut accepted: Vec<CanonicalInsight> = Vec::new();
        for detector in self.registry.iter() {
            let kind = detector.insight_type().as_str();
            summary.detectors_run.push(kind.to_string());

            let Some(candidate) = detector.evaluate(&ctx, &self.options) else {
                continue;
            };
            summary.candidates += 1;
            let insight = match normalize(shop_id, &candidate, now) {
                Ok(insight) => insight,
                Err(rejection) => {
                    debug!(shop_id, kind, "[SCAN] candidate rejected: {rejection}");
                    summary.skipped.push(SkipEntry {
                        kind: kind.to_string(),
                        reason: rejection.reason().to_string(),
                    });
                    continue;
                }
            };
            let hours = guard_hours_for(&insight.kind);
            if guard.already_recent(shop_id, &insight.kind, hours).await {
                summary.skipped.push(SkipEntry {
                    kind: insight.kind.clone(),
                    reason: format!("guard_{hours}h"),
                });
                continue;
            }
            accepted.push(insight);
        }

        if !accepted.is_empty() {
            if let Err(e) = self.store.persist_insights(&accepted).await {
                summary.error = Some(format!("persist_failed: {e}"));
                return self.finish_failed(summary, &ctx.shop_timezone, started).await;
            }
        }
        summary.inserted = accepted.iter().map(|i| i.kind.clone()).collect();
        summary.inserted_count = summary.inserted.len();
        summary.skipped_count = summary.skipped.len();

        let snapshots: Vec<PriceSnapshot> = ctx
            .products
            .iter()
            .filter(|p| p.price.is_finite() && p.price >= 0.0)
            .map(|p| PriceSnapshot {
                product_id: p.id.clone(),
                price: p.price,
                captured_at: now,
            })
            .collect();
        match self.store.record_price_snapshots(shop_id, &snapshots).await {
            Ok(()) => summary.price_snapshots = snapshots.len(),
            Err(e) => warn!(shop_id, "[SCAN] price snapshots not recorded: {e}"),
        }

        let next = next_run_at(&ctx.shop_timezone, now);
        summary.next_scan_at = Some(next);
        summary.ok = true;
        self.write_scan_run(&summary, next).await;

        if trigger == ScanTrigger::Automatic {
            summary.digest = self.deliver_digest(shop, &today, summary.digest_sent_day.as_deref()).await;
            if summary.digest == DigestOutcome::Sent {
                summary.digest_sent_day = Some(today);
                self.write_scan_run(&summary, next).await;
            }
        }

        summary.duration_ms = elapsed_ms(started);
        self.latency.record(started.elapsed());
        info!(
            shop_id,
            trigger = %trigger,
            inserted = summary.inserted.len(),
            skipped = summary.skipped.len(),
            digest = ?summary.digest,
            "[SCAN] done in {}ms, next scan {}",
            summary.duration_ms,
            next.to_rfc3339(),
        );
        summary
    }

    async fn finish_failed(&self, mut summary: ScanSummary, tz_name: &str, started: Instant) -> ScanSummary {
        let next = next_run_at(tz_name, summary.scanned_at);
        summary.ok = false;
        summary.skipped_count = summary.skipped.len();
        summary.next_scan_at = Some(next);
        summary.duration_ms = elapsed_ms(started);
        warn!(
            shop_id = %summary.shop_id,
            trigger = %summary.trigger,
            "[SCAN] failed: {}",
            summary.error.as_deref().unwrap_or("unknown"),
        );
        self.write_scan_run(&summary, next).await;
        summary
    }

    async fn write_scan_run(&self, summary: &ScanSummary, next: DateTime<Utc>) {
        let record = ScanRunRecord {
            shop_id: summary.shop_id.clone(),
            last_scan_at: summary.scanned_at,
            next_scan_at: next,
            last_scan_status: if summary.ok { ScanStatus::Ok } else { ScanStatus::Error },
            last_scan_summary: serde_json::to_value(summary).unwrap_or(Value::Null),
        };
        if let Err(e) = self.store.persist_scan_run(&record).await {
            warn!(shop_id = %summary.shop_id, "[SCAN] scan run not recorded: {e}");
        }
    }

    /// Never fails the scan; every problem maps to an outcome and a log line.
    async fn deliver_digest(&self, shop: &ShopCredentials, day_key: &str, sent_day: Option<&str>) -> DigestOutcome {
        let shop_id = shop.shop_id.as_str();
        if sent_day == Some(day_key) {
            return DigestOutcome::AlreadySent;
        }
        let Some(mailer) = self.mailer.as_ref() else {
            return DigestOutcome::NoMailer;
        };

        let settings = match self.store.get_digest_settings(shop_id).await {
            Ok(Some(settings)) if settings.daily_enabled => settings,
            Ok(_) => return DigestOutcome::Disabled,
            Err(e) => {
                warn!(shop_id, "[DIGEST] settings lookup failed: {e}");
                return DigestOutcome::Failed;
            }
        };
        let recipient = match settings.email.as_deref().map(str::trim) {
            None | Some("") => return DigestOutcome::NoRecipient,
            Some(email) if !is_valid_recipient(email) => {
                warn!(shop_id, "[DIGEST] invalid recipient `{email}`");
                return DigestOutcome::InvalidRecipient;
            }
            Some(email) => email,
        };

        let insights = match self.store.actionable_insights(shop_id).await {
            Ok(insights) if insights.is_empty() => return DigestOutcome::NothingActionable,
            Ok(insights) => insights,
            Err(e) => {
                warn!(shop_id, "[DIGEST] could not load actionable insights: {e}");
                return DigestOutcome::Failed;
            }
        };

        let (subject, body) = compose_digest(&shop.shop_domain, day_key, &insights);
        match mailer.send_digest_email(recipient, &subject, &body).await {
            Ok(()) => {
                info!(shop_id, day_key, insights = insights.len(), "[DIGEST] sent");
                DigestOutcome::Sent
            }
            Err(e) => {
                warn!(shop_id, "[DIGEST] send failed: {e}");
                DigestOutcome::Failed
            }
        }
    }
}

fn previous_digest_day(record: Option<&ScanRunRecord>) -> Option<String> {
    record
        .and_then(|r| r.last_scan_summary.get(DIGEST_MARKER_KEY))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis().min(u128::from(u64::MAX)) as u64
}
