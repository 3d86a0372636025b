use std::fmt::Write as _;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::collab::Mailer;
use crate::config::MailConfig;
use crate::error::{AppError, Result};
use crate::types::CanonicalInsight;

#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    text: &'a str,
}

/// Posts digest emails to a transactional mail API as JSON with a bearer key.
pub struct HttpMailer {
    client: reqwest::Client,
    config: MailConfig,
}

impl HttpMailer {
    pub fn new(config: MailConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send_digest_email(&self, to: &str, subject: &str, body: &str) -> Result<()> {
        let request = SendRequest {
            from: &self.config.from,
            to,
            subject,
            text: body,
        };
        let resp = self
            .client
            .post(&self.config.api_url)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            return Err(AppError::Mail(format!("mail API returned {status}: {}", detail.trim())));
        }
        Ok(())
    }
}

/// Minimal shape check: one `@`, non-empty local part, dotted domain, no whitespace.
pub fn is_valid_recipient(email: &str) -> bool {
    let email = email.trim();
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        }
        None => false,
    }
}

/// Subject and plain-text body for a daily digest. `insights` are expected most
/// severe first.
pub fn compose_digest(shop_domain: &str, day_key: &str, insights: &[CanonicalInsight]) -> (String, String) {
    let subject = match insights.len() {
        1 => format!("1 insight needs your attention for {shop_domain} ({day_key})"),
        n => format!("{n} insights need your attention for {shop_domain} ({day_key})"),
    };

    let mut body = format!("Here is what stood out in {shop_domain} today.\n");
    for insight in insights {
        let _ = write!(
            body,
            "\n[{}] {}\n{}\nNext step: {}\n",
            insight.severity.as_str().to_uppercase(),
            insight.title,
            insight.description,
            insight.suggested_action,
        );
    }
    (subject, body)
}
