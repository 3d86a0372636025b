//! Builds the canonical `InsightContext` from an upstream payload.
//!
//! This is the only place that knows about upstream field naming. Orders and products
//! may arrive as plain arrays, GraphQL connections (`{edges: [{node}]}` or `{nodes: []}`),
//! with snake_case or camelCase keys, and with numeric, string or `gid://` ids.
//! Detectors only ever see the normalized shape.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::types::{InsightContext, LineItem, Order, PriceSnapshot, Product};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BuildDiagnostics {
    pub orders_seen: usize,
    pub orders_kept: usize,
    pub orders_skipped: usize,
    pub orders_duplicate: usize,
    pub products_seen: usize,
    pub products_kept: usize,
    pub products_skipped: usize,
    pub products_duplicate: usize,
    /// `payload`, `credentials` or `default`.
    pub timezone_source: &'static str,
}

pub fn build_context(
    shop_id: &str,
    payload: &Value,
    fallback_timezone: Option<&str>,
    now: DateTime<Utc>,
    price_history: Vec<PriceSnapshot>,
) -> (InsightContext, BuildDiagnostics) {
    let mut diag = BuildDiagnostics::default();

    let (shop_timezone, timezone_source) = resolve_timezone(payload, fallback_timezone);
    diag.timezone_source = timezone_source;

    let mut orders = Vec::new();
    let mut seen_orders = HashSet::new();
    for raw in collection(payload.get("orders")) {
        diag.orders_seen += 1;
        let Some(order) = parse_order(raw) else {
            diag.orders_skipped += 1;
            continue;
        };
        if !seen_orders.insert(order.id.clone()) {
            diag.orders_duplicate += 1;
            continue;
        }
        orders.push(order);
    }

    let mut totals: HashMap<&str, (f64, u64)> = HashMap::new();
    for order in &orders {
        for item in &order.line_items {
            if let Some(pid) = item.product_id.as_deref() {
                let entry = totals.entry(pid).or_default();
                entry.0 += item.revenue;
                entry.1 += u64::from(item.quantity);
            }
        }
    }

    let mut products = Vec::new();
    let mut seen_products = HashSet::new();
    for raw in collection(payload.get("products")) {
        diag.products_seen += 1;
        let Some(mut product) = parse_product(raw) else {
            diag.products_skipped += 1;
            continue;
        };
        if !seen_products.insert(product.id.clone()) {
            diag.products_duplicate += 1;
            continue;
        }
        if let Some(&(revenue, units)) = totals.get(product.id.as_str()) {
            product.historical_revenue = revenue;
            product.historical_units = units;
        }
        products.push(product);
    }

    diag.orders_kept = orders.len();
    diag.products_kept = products.len();

    if diag.orders_skipped > 0 || diag.products_skipped > 0 {
        debug!(
            shop_id,
            orders_skipped = diag.orders_skipped,
            products_skipped = diag.products_skipped,
            "[CONTEXT] skipped malformed upstream records"
        );
    }

    let ctx = InsightContext {
        shop_id: shop_id.to_string(),
        shop_timezone,
        now,
        orders,
        products,
        price_history,
    };
    (ctx, diag)
}

fn resolve_timezone(payload: &Value, fallback: Option<&str>) -> (String, &'static str) {
    let from_payload = payload
        .get("shop")
        .and_then(|shop| field(shop, &["iana_timezone", "ianaTimezone", "timezone"]))
        .or_else(|| field(payload, &["shopTimezone", "shop_timezone", "timezone"]))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|tz| !tz.is_empty());

    if let Some(tz) = from_payload {
        return (tz.to_string(), "payload");
    }
    match fallback.map(str::trim).filter(|tz| !tz.is_empty()) {
        Some(tz) => (tz.to_string(), "credentials"),
        None => ("UTC".to_string(), "default"),
    }
}

fn parse_order(raw: &Value) -> Option<Order> {
    if !raw.is_object() {
        return None;
    }
    let id = field(raw, &["id", "legacyResourceId"]).and_then(as_id)?;
    let created_at = field(raw, &["created_at", "createdAt", "processed_at", "processedAt"])
        .and_then(parse_time)?;
    let cancelled_at = field(raw, &["cancelled_at", "cancelledAt"]).and_then(parse_time);
    let total_price = money(raw, &[
        "total_price",
        "totalPrice",
        "current_total_price",
        "totalPriceSet",
        "currentTotalPriceSet",
    ]);

    let line_items = collection(field(raw, &["line_items", "lineItems"]))
        .into_iter()
        .filter_map(parse_line_item)
        .collect();

    Some(Order {
        id,
        created_at,
        cancelled_at,
        total_price,
        line_items,
    })
}

fn parse_line_item(raw: &Value) -> Option<LineItem> {
    if !raw.is_object() {
        return None;
    }
    let product_id = field(raw, &["product_id", "productId"])
        .and_then(as_id)
        .or_else(|| raw.get("product").and_then(|p| p.get("id")).and_then(as_id))
        .or_else(|| {
            raw.get("variant")
                .and_then(|v| v.get("product"))
                .and_then(|p| p.get("id"))
                .and_then(as_id)
        });

    let quantity = field(raw, &["quantity", "current_quantity", "currentQuantity"])
        .and_then(as_number)
        .filter(|q| *q > 0.0)
        .map(|q| q.round().min(f64::from(u32::MAX)) as u32)
        .unwrap_or(0);

    let revenue = match field(raw, &["revenue"]).and_then(as_number) {
        Some(r) => r,
        None => {
            let unit = money(raw, &["price", "originalUnitPrice", "originalUnitPriceSet"]);
            if unit > 0.0 {
                unit * f64::from(quantity)
            } else {
                money(raw, &["originalTotalSet", "discountedTotalSet", "total"])
            }
        }
    };

    Some(LineItem {
        product_id,
        quantity,
        revenue: revenue.max(0.0),
    })
}

fn parse_product(raw: &Value) -> Option<Product> {
    if !raw.is_object() {
        return None;
    }
    let id = field(raw, &["id", "legacyResourceId"]).and_then(as_id)?;
    let title = field(raw, &["title", "name"])
        .and_then(Value::as_str)
        .map(|t| t.trim().to_string())
        .unwrap_or_default();
    let status = field(raw, &["status"])
        .and_then(Value::as_str)
        .map(|s| s.trim().to_ascii_lowercase())
        .unwrap_or_else(|| "active".to_string());

    let variants = collection(raw.get("variants"));

    let price = field(raw, &["price"])
        .and_then(as_number)
        .or_else(|| variants.first().and_then(|v| field(v, &["price"])).and_then(as_number))
        .or_else(|| {
            raw.get("priceRangeV2")
                .or_else(|| raw.get("priceRange"))
                .and_then(|r| r.get("minVariantPrice"))
                .and_then(as_number)
        })
        .unwrap_or(0.0)
        .max(0.0);

    let inventory_quantity = field(raw, &["inventory_quantity", "inventoryQuantity", "totalInventory"])
        .and_then(as_number)
        .map(|q| q.round() as i64)
        .unwrap_or_else(|| {
            variants
                .iter()
                .filter_map(|v| field(v, &["inventory_quantity", "inventoryQuantity"]))
                .filter_map(as_number)
                .map(|q| q.round() as i64)
                .sum()
        });

    Some(Product {
        id,
        title,
        price,
        inventory_quantity,
        status,
        historical_revenue: 0.0,
        historical_units: 0,
    })
}

// ---------------------------------------------------------------------------
// Shape-tolerant accessors
// ---------------------------------------------------------------------------

/// Flattens an array, `{edges: [{node}]}` or `{nodes: [...]}` into its elements.
fn collection(v: Option<&Value>) -> Vec<&Value> {
    match v {
        Some(Value::Array(items)) => items.iter().collect(),
        Some(Value::Object(map)) => {
            if let Some(Value::Array(edges)) = map.get("edges") {
                edges.iter().filter_map(|e| e.get("node")).collect()
            } else if let Some(Value::Array(nodes)) = map.get("nodes") {
                nodes.iter().collect()
            } else {
                Vec::new()
            }
        }
        _ => Vec::new(),
    }
}

/// First non-null value among the candidate keys.
fn field<'a>(v: &'a Value, names: &[&str]) -> Option<&'a Value> {
    names.iter().find_map(|name| v.get(*name).filter(|x| !x.is_null()))
}

/// Numbers, numeric strings and money objects (`{amount}` / `{shopMoney: {amount}}`).
fn as_number(v: &Value) -> Option<f64> {
    let n = match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Object(map) => map
            .get("amount")
            .or_else(|| map.get("shopMoney"))
            .and_then(as_number),
        _ => None,
    }?;
    n.is_finite().then_some(n)
}

fn money(v: &Value, names: &[&str]) -> f64 {
    field(v, names).and_then(as_number).unwrap_or(0.0)
}

fn as_id(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => {
            let s = s.trim();
            let id = if s.starts_with("gid://") {
                s.rsplit('/').next().unwrap_or(s)
            } else {
                s
            };
            (!id.is_empty()).then(|| id.to_string())
        }
        Value::Number(n) => {
            if let Some(i) = n.as_u64() {
                Some(i.to_string())
            } else if let Some(i) = n.as_i64() {
                Some(i.to_string())
            } else {
                n.as_f64()
                    .filter(|f| f.is_finite() && f.fract() == 0.0)
                    .map(|f| format!("{f:.0}"))
            }
        }
        _ => None,
    }
}

fn parse_time(v: &Value) -> Option<DateTime<Utc>> {
    let s = v.as_str()?.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Some(t.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 12, 15, 0, 0).unwrap()
    }

    #[test]
    fn builds_from_rest_shape() {
        let payload = json!({
            "shop": {"iana_timezone": "America/New_York"},
            "orders": [
                {
                    "id": 1001,
                    "created_at": "2024-06-10T10:00:00-04:00",
                    "cancelled_at": null,
                    "total_price": "45.50",
                    "line_items": [
                        {"product_id": 7, "quantity": 2, "price": "10.00"},
                        {"product_id": 8, "quantity": 1, "price": "25.50"}
                    ]
                }
            ],
            "products": [
                {"id": 7, "title": "Mug", "status": "active",
                 "variants": [{"price": "10.00", "inventory_quantity": 4},
                              {"price": "12.00", "inventory_quantity": 3}]},
                {"id": 8, "title": "Poster", "price": 25.5, "inventory_quantity": -2}
            ]
        });

        let (ctx, diag) = build_context("shop-1", &payload, None, now(), Vec::new());
        assert_eq!(ctx.shop_timezone, "America/New_York");
        assert_eq!(diag.timezone_source, "payload");
        assert_eq!(ctx.orders.len(), 1);
        assert_eq!(ctx.orders[0].id, "1001");
        assert!((ctx.orders[0].total_price - 45.5).abs() < 1e-9);

        let mug = &ctx.products[0];
        assert_eq!(mug.inventory_quantity, 7);
        assert!((mug.price - 10.0).abs() < 1e-9);
        assert!((mug.historical_revenue - 20.0).abs() < 1e-9);
        assert_eq!(mug.historical_units, 2);

        let poster = &ctx.products[1];
        assert_eq!(poster.inventory_quantity, -2);
        assert_eq!(poster.status, "active");
    }

    #[test]
    fn builds_from_graphql_connections() {
        let payload = json!({
            "orders": {"edges": [{"node": {
                "id": "gid://shopify/Order/55",
                "createdAt": "2024-06-11T09:00:00Z",
                "cancelledAt": "2024-06-11T10:00:00Z",
                "totalPriceSet": {"shopMoney": {"amount": "30.00"}},
                "lineItems": {"nodes": [
                    {"product": {"id": "gid://shopify/Product/9"}, "quantity": 3,
                     "originalTotalSet": {"shopMoney": {"amount": "30.00"}}}
                ]}
            }}]},
            "products": {"nodes": [
                {"id": "gid://shopify/Product/9", "title": "Cap", "status": "ACTIVE",
                 "totalInventory": 12,
                 "priceRangeV2": {"minVariantPrice": {"amount": "10.00"}}}
            ]}
        });

        let (ctx, _) = build_context("shop-1", &payload, Some("Europe/Berlin"), now(), Vec::new());
        assert_eq!(ctx.shop_timezone, "Europe/Berlin");
        let order = &ctx.orders[0];
        assert_eq!(order.id, "55");
        assert!(order.is_cancelled());
        assert_eq!(order.line_items[0].product_id.as_deref(), Some("9"));
        assert!((order.line_items[0].revenue - 30.0).abs() < 1e-9);

        let cap = &ctx.products[0];
        assert_eq!(cap.id, "9");
        assert!(cap.is_active());
        assert_eq!(cap.inventory_quantity, 12);
        // Cancelled orders still count toward historical sales.
        assert_eq!(cap.historical_units, 3);
        assert!((cap.historical_revenue - 30.0).abs() < 1e-9);
    }

    #[test]
    fn historical_totals_span_cancelled_and_live_orders() {
        let payload = json!({
            "orders": [
                {"id": 1, "created_at": "2024-06-01T09:00:00Z", "cancelled_at": "2024-06-01T12:00:00Z",
                 "line_items": [{"product_id": 7, "quantity": 2, "price": "20.00"}]},
                {"id": 2, "created_at": "2024-06-05T09:00:00Z",
                 "line_items": [{"product_id": 7, "quantity": 1, "price": "20.00"}]}
            ],
            "products": [{"id": 7, "title": "Lamp", "price": "20.00", "inventory_quantity": 0}]
        });

        let (ctx, _) = build_context("shop-1", &payload, None, now(), Vec::new());
        assert_eq!(ctx.orders.len(), 2);
        assert!(ctx.orders[0].is_cancelled());
        let lamp = &ctx.products[0];
        assert_eq!(lamp.historical_units, 3);
        assert!((lamp.historical_revenue - 60.0).abs() < 1e-9);
    }

    #[test]
    fn malformed_records_are_skipped_not_fatal() {
        let payload = json!({
            "orders": [
                {"id": 1, "created_at": "not a date"},
                {"created_at": "2024-06-11T09:00:00Z"},
                "garbage",
                {"id": 2, "created_at": "2024-06-11T09:00:00Z", "total_price": "abc",
                 "line_items": [{"product_id": 3, "quantity": "x", "price": null}]},
                {"id": 2, "created_at": "2024-06-11T10:00:00Z"}
            ],
            "products": [{"title": "no id"}, {"id": 3, "price": "oops"}]
        });

        let (ctx, diag) = build_context("shop-1", &payload, None, now(), Vec::new());
        assert_eq!(ctx.shop_timezone, "UTC");
        assert_eq!(diag.timezone_source, "default");
        assert_eq!(diag.orders_seen, 5);
        assert_eq!(diag.orders_skipped, 3);
        assert_eq!(diag.orders_duplicate, 1);
        assert_eq!(ctx.orders.len(), 1);
        assert_eq!(ctx.orders[0].total_price, 0.0);
        assert_eq!(ctx.orders[0].line_items[0].quantity, 0);
        assert_eq!(ctx.orders[0].line_items[0].revenue, 0.0);
        assert_eq!(diag.products_skipped, 1);
        assert_eq!(ctx.products[0].price, 0.0);
    }

    #[test]
    fn missing_collections_yield_empty_context() {
        let (ctx, diag) = build_context("shop-1", &json!({}), None, now(), Vec::new());
        assert!(ctx.orders.is_empty());
        assert!(ctx.products.is_empty());
        assert_eq!(diag, BuildDiagnostics { timezone_source: "default", ..Default::default() });
    }
}
