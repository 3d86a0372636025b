//! Publish gate between detectors and storage.
//!
//! A candidate becomes a `CanonicalInsight` only if it can both explain itself
//! (type, title, description) and say what to do (suggested action). Everything else
//! is coerced or cleaned; nothing is invented.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::types::{Candidate, CanonicalInsight, Confidence, InsightType, Severity};

/// Arrays inside metrics/evidence are capped at this many elements.
pub const MAX_ARRAY_LEN: usize = 10;

pub const MAX_ITEMS_PREVIEW: usize = 5;

/// Why a candidate was refused. Every variant is reported as `contract_incomplete`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    MissingType,
    MissingTitle,
    MissingDescription,
    MissingSuggestedAction,
}

impl Rejection {
    pub fn reason(&self) -> &'static str {
        "contract_incomplete"
    }

    pub fn missing_field(&self) -> &'static str {
        match self {
            Rejection::MissingType => "type",
            Rejection::MissingTitle => "title",
            Rejection::MissingDescription => "description",
            Rejection::MissingSuggestedAction => "suggested_action",
        }
    }
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (missing {})", self.reason(), self.missing_field())
    }
}

/// Confidence used when a detector does not state one.
pub fn default_confidence(kind: &str) -> Confidence {
    match InsightType::from_key(kind) {
        Some(InsightType::InventoryVelocityRisk)
        | Some(InsightType::DeadInventory)
        | Some(InsightType::ProductConcentrationRisk) => Confidence::High,
        Some(InsightType::SalesRhythmDrift)
        | Some(InsightType::SalesWindowDrift)
        | Some(InsightType::PriceVolatilityRisk) => Confidence::Medium,
        None => Confidence::Medium,
    }
}

fn non_empty(v: Option<&String>) -> Option<String> {
    v.map(|s| s.trim()).filter(|s| !s.is_empty()).map(str::to_string)
}

/// Deep-cleans a JSON value: nulls removed, strings trimmed, arrays capped at
/// `MAX_ARRAY_LEN`, empty objects dropped. `None` means nothing is left.
/// Cleaning an already-clean value returns it unchanged.
pub fn clean_value(v: &Value) -> Option<Value> {
    match v {
        Value::Null => None,
        Value::String(s) => Some(Value::String(s.trim().to_string())),
        Value::Array(items) => Some(Value::Array(
            items.iter().filter_map(clean_value).take(MAX_ARRAY_LEN).collect(),
        )),
        Value::Object(map) => {
            let cleaned: Map<String, Value> = map
                .iter()
                .filter_map(|(k, v)| clean_value(v).map(|v| (k.clone(), v)))
                .collect();
            (!cleaned.is_empty()).then_some(Value::Object(cleaned))
        }
        other => Some(other.clone()),
    }
}

/// Metrics and evidence must be objects; anything else is dropped.
fn clean_object(v: Option<&Value>) -> Option<Value> {
    v.filter(|v| v.is_object()).and_then(clean_value)
}

pub fn normalize(
    shop_id: &str,
    candidate: &Candidate,
    now: DateTime<Utc>,
) -> Result<CanonicalInsight, Rejection> {
    let kind = non_empty(candidate.kind.as_ref()).ok_or(Rejection::MissingType)?;
    let title = non_empty(candidate.title.as_ref()).ok_or(Rejection::MissingTitle)?;
    let description = non_empty(candidate.description.as_ref())
        .or_else(|| non_empty(candidate.summary.as_ref()))
        .ok_or(Rejection::MissingDescription)?;
    let suggested_action =
        non_empty(candidate.suggested_action.as_ref()).ok_or(Rejection::MissingSuggestedAction)?;

    let severity = candidate
        .severity
        .as_deref()
        .and_then(Severity::parse)
        .unwrap_or(Severity::Medium);
    let confidence = candidate
        .confidence
        .as_deref()
        .and_then(Confidence::parse)
        .unwrap_or_else(|| default_confidence(&kind));

    let items_preview: Vec<Value> = candidate
        .items
        .iter()
        .filter_map(clean_value)
        .take(MAX_ITEMS_PREVIEW)
        .collect();

    Ok(CanonicalInsight {
        shop_id: shop_id.to_string(),
        kind,
        title,
        description,
        severity,
        suggested_action,
        confidence,
        evidence: clean_object(candidate.indicators.as_ref()),
        metrics: clean_object(candidate.metrics.as_ref()),
        items_preview: (!items_preview.is_empty()).then_some(items_preview),
        evaluated_at: candidate.evaluated_at.unwrap_or(now),
        raw: serde_json::to_value(candidate).unwrap_or(Value::Null),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 12, 12, 0, 0).unwrap()
    }

    fn complete() -> Candidate {
        Candidate {
            kind: Some(" dead_inventory ".to_string()),
            title: Some("Stock is stuck".to_string()),
            description: Some("Three products have not sold.".to_string()),
            severity: Some("HIGH".to_string()),
            suggested_action: Some("Mark them down.".to_string()),
            metrics: Some(json!({
                "flagged": 3,
                "note": "  padded  ",
                "missing": null,
                "nested": {"gone": null},
                "series": (0..15).collect::<Vec<_>>(),
            })),
            indicators: Some(json!({"min_stock": 10})),
            items: (0..8).map(|i| json!({"product_id": i, "title": null})).collect(),
            ..Candidate::default()
        }
    }

    fn same_except_raw(a: &CanonicalInsight, b: &CanonicalInsight) -> bool {
        CanonicalInsight { raw: Value::Null, ..a.clone() } == CanonicalInsight { raw: Value::Null, ..b.clone() }
    }

    #[test]
    fn accepts_and_cleans_a_complete_candidate() {
        let insight = normalize("shop-1", &complete(), now()).expect("accepted");
        assert_eq!(insight.kind, "dead_inventory");
        assert_eq!(insight.severity, Severity::High);
        assert_eq!(insight.confidence, Confidence::High);
        assert_eq!(insight.evaluated_at, now());

        let metrics = insight.metrics.unwrap();
        assert_eq!(metrics["note"], "padded");
        assert!(metrics.get("missing").is_none());
        assert!(metrics.get("nested").is_none());
        assert_eq!(metrics["series"].as_array().unwrap().len(), MAX_ARRAY_LEN);

        let preview = insight.items_preview.unwrap();
        assert_eq!(preview.len(), MAX_ITEMS_PREVIEW);
        assert!(preview[0].get("title").is_none());
        assert_eq!(insight.raw["type"], " dead_inventory ");
    }

    #[test]
    fn empty_suggested_action_is_rejected() {
        let mut c = complete();
        c.suggested_action = Some("   ".to_string());
        assert_eq!(normalize("shop-1", &c, now()), Err(Rejection::MissingSuggestedAction));

        c.suggested_action = None;
        let err = normalize("shop-1", &c, now()).unwrap_err();
        assert_eq!(err.reason(), "contract_incomplete");
    }

    #[test]
    fn each_text_field_gates_publication() {
        let mut c = complete();
        c.kind = None;
        assert_eq!(normalize("s", &c, now()), Err(Rejection::MissingType));

        let mut c = complete();
        c.title = Some(String::new());
        assert_eq!(normalize("s", &c, now()), Err(Rejection::MissingTitle));

        let mut c = complete();
        c.description = None;
        assert_eq!(normalize("s", &c, now()), Err(Rejection::MissingDescription));
    }

    #[test]
    fn summary_stands_in_for_description() {
        let mut c = complete();
        c.description = Some(" ".to_string());
        c.summary = Some("From the summary".to_string());
        let insight = normalize("s", &c, now()).unwrap();
        assert_eq!(insight.description, "From the summary");
    }

    #[test]
    fn severity_and_confidence_defaults() {
        let mut c = complete();
        c.severity = Some("critical".to_string());
        c.kind = Some("sales_rhythm_drift".to_string());
        let insight = normalize("s", &c, now()).unwrap();
        assert_eq!(insight.severity, Severity::Medium);
        assert_eq!(insight.confidence, Confidence::Medium);

        c.severity = None;
        c.confidence = Some("low".to_string());
        let insight = normalize("s", &c, now()).unwrap();
        assert_eq!(insight.severity, Severity::Medium);
        assert_eq!(insight.confidence, Confidence::Low);
    }

    #[test]
    fn metrics_that_clean_to_nothing_are_dropped() {
        let mut c = complete();
        c.metrics = Some(json!({"a": null, "b": {"c": null}}));
        c.indicators = Some(json!(["not", "an", "object"]));
        let insight = normalize("s", &c, now()).unwrap();
        assert!(insight.metrics.is_none());
        assert!(insight.evidence.is_none());
    }

    #[test]
    fn normalizing_twice_changes_nothing() {
        let first = normalize("shop-1", &complete(), now()).unwrap();
        let later = now() + chrono::Duration::hours(3);
        let second = normalize("shop-1", &Candidate::from(&first), later).unwrap();
        assert!(same_except_raw(&first, &second), "{first:?}\n{second:?}");
    }

    #[test]
    fn cleaning_is_idempotent() {
        let messy = json!({
            "a": " x ",
            "b": [null, {"c": null}, {"d": " y "}, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11],
            "e": {"f": {"g": null}},
        });
        let once = clean_value(&messy).unwrap();
        assert_eq!(clean_value(&once), Some(once.clone()));
        assert_eq!(once["b"].as_array().unwrap().len(), MAX_ARRAY_LEN);
        assert!(once.get("e").is_none());
    }
}
