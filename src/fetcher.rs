use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::header::LINK;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::collab::ShopDataSource;
use crate::config::{FETCH_PAGE_SIZE, MAX_FETCH_PAGES};
use crate::error::{AppError, Result};
use crate::types::ShopCredentials;

/// Pulls shop, order and product data from the Shopify Admin REST API and
/// assembles them into one payload for `context::build_context`.
pub struct ShopifyFetcher {
    client: reqwest::Client,
    api_version: String,
}

impl ShopifyFetcher {
    pub fn new(api_version: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            api_version: api_version.to_string(),
        })
    }

    fn base_url(&self, shop: &ShopCredentials) -> String {
        format!("https://{}/admin/api/{}", shop.shop_domain, self.api_version)
    }

    async fn get(&self, shop: &ShopCredentials, url: &str) -> Result<reqwest::Response> {
        let resp = self
            .client
            .get(url)
            .header("X-Shopify-Access-Token", &shop.access_token)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(AppError::Upstream(format!(
                "{} returned {status} for {}",
                shop.shop_domain,
                url.split('?').next().unwrap_or(url)
            )));
        }
        Ok(resp)
    }

    /// Follows `Link: rel="next"` pagination, collecting the array under `key`.
    async fn fetch_all(&self, shop: &ShopCredentials, first_url: String, key: &str) -> Result<Vec<Value>> {
        let mut items = Vec::new();
        let mut next = Some(first_url);
        let mut pages = 0usize;

        while let Some(url) = next.take() {
            if pages >= MAX_FETCH_PAGES {
                warn!(
                    shop_id = %shop.shop_id,
                    "[FETCH] {key}: stopped after {MAX_FETCH_PAGES} pages ({} records)",
                    items.len()
                );
                break;
            }
            let resp = self.get(shop, &url).await?;
            next = resp
                .headers()
                .get(LINK)
                .and_then(|h| h.to_str().ok())
                .and_then(next_page_url);
            let body: Value = resp.json().await?;
            match body.get(key) {
                Some(Value::Array(page)) => items.extend(page.iter().cloned()),
                _ => {
                    return Err(AppError::Upstream(format!(
                        "{} response had no `{key}` array",
                        shop.shop_domain
                    )))
                }
            }
            pages += 1;
        }

        debug!(shop_id = %shop.shop_id, "[FETCH] {key}: {} records over {pages} pages", items.len());
        Ok(items)
    }
}

#[async_trait]
impl ShopDataSource for ShopifyFetcher {
    async fn fetch_shop_payload(&self, shop: &ShopCredentials, since: DateTime<Utc>) -> Result<Value> {
        let base = self.base_url(shop);

        let shop_body: Value = self.get(shop, &format!("{base}/shop.json")).await?.json().await?;

        let orders_url = format!(
            "{base}/orders.json?status=any&limit={FETCH_PAGE_SIZE}&created_at_min={}",
            since.to_rfc3339_opts(SecondsFormat::Secs, true)
        );
        let orders = self.fetch_all(shop, orders_url, "orders").await?;

        let products_url = format!("{base}/products.json?limit={FETCH_PAGE_SIZE}");
        let products = self.fetch_all(shop, products_url, "products").await?;

        Ok(json!({
            "shop": shop_body.get("shop").cloned().unwrap_or(Value::Null),
            "orders": orders,
            "products": products,
        }))
    }
}

/// Extracts the `rel="next"` target from a Shopify `Link` header.
pub fn next_page_url(header: &str) -> Option<String> {
    header.split(',').find_map(|part| {
        let mut pieces = part.split(';');
        let target = pieces.next()?.trim();
        let is_next = pieces.any(|p| p.trim().eq_ignore_ascii_case("rel=\"next\""));
        if !is_next {
            return None;
        }
        target
            .strip_prefix('<')
            .and_then(|t| t.strip_suffix('>'))
            .map(str::to_string)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_link_is_found_among_previous() {
        let header = "<https://a.myshopify.com/admin/api/2024-10/orders.json?page_info=abc&limit=250>; rel=\"previous\", \
                      <https://a.myshopify.com/admin/api/2024-10/orders.json?page_info=def&limit=250>; rel=\"next\"";
        assert_eq!(
            next_page_url(header).as_deref(),
            Some("https://a.myshopify.com/admin/api/2024-10/orders.json?page_info=def&limit=250")
        );
    }

    #[test]
    fn last_page_has_no_next_link() {
        let header = "<https://a.myshopify.com/admin/api/2024-10/orders.json?page_info=abc>; rel=\"previous\"";
        assert_eq!(next_page_url(header), None);
        assert_eq!(next_page_url(""), None);
    }

    #[test]
    fn base_url_uses_shop_domain_and_version() {
        let fetcher = ShopifyFetcher::new("2024-10").unwrap();
        let shop = ShopCredentials {
            shop_id: "1".to_string(),
            shop_domain: "demo.myshopify.com".to_string(),
            access_token: "tok".to_string(),
            timezone: None,
        };
        assert_eq!(fetcher.base_url(&shop), "https://demo.myshopify.com/admin/api/2024-10");
    }
}
