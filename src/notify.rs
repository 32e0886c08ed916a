//! Chat webhook notification
//!
//! Posts a Slack Block Kit message summarizing the exported records: a
//! headline plus one section per record, optionally with an image accessory.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::schema::ValidatedRecord;

pub const WEBHOOK_ENV: &str = "SLACK_WEBHOOK_URL";
const DELIVERY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("no webhook URL configured (pass --webhook or set {WEBHOOK_ENV})")]
    MissingWebhook,
    #[error("invalid webhook URL {value:?}: {reason}")]
    InvalidWebhook { value: String, reason: String },
    #[error("site `{site}` needs the renderer, build with the `browser` feature")]
    RendererUnavailable { site: String },
}

/// Webhook delivery failed; the export itself is unaffected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", describe_delivery(.status, .message))]
pub struct DeliveryError {
    pub status: Option<u16>,
    pub message: String,
}

fn describe_delivery(status: &Option<u16>, message: &str) -> String {
    match status {
        Some(code) => format!("webhook answered HTTP {code}: {message}"),
        None => format!("webhook delivery failed: {message}"),
    }
}

/// A checked http(s) webhook endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookUrl(Url);

impl WebhookUrl {
    /// Fails on a missing, blank, unparseable or non-http(s) value
    pub fn parse(raw: Option<&str>) -> Result<Self, ConfigError> {
        let raw = raw.map(str::trim).filter(|s| !s.is_empty());
        let raw = raw.ok_or(ConfigError::MissingWebhook)?;

        let invalid = |reason: String| ConfigError::InvalidWebhook {
            value: raw.to_string(),
            reason,
        };

        let url = Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
        match url.scheme() {
            "https" | "http" => {}
            other => return Err(invalid(format!("unsupported scheme `{other}`"))),
        }
        if url.host_str().is_none() {
            return Err(invalid("missing host".to_string()));
        }
        Ok(Self(url))
    }

    pub fn as_url(&self) -> &Url {
        &self.0
    }
}

/// How records are laid out in the chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageLayout {
    /// Top-level message text
    pub headline: String,
    /// Section text; `{field}` or `{field|fallback}` placeholders
    pub template: String,
    /// Field holding an image URL shown next to each section
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_field: Option<String>,
    /// Field used as the image alt text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt_field: Option<String>,
}

impl MessageLayout {
    pub fn payload(&self, records: &[ValidatedRecord]) -> Value {
        let blocks: Vec<Value> = records.iter().map(|r| self.section(r)).collect();
        json!({
            "text": self.headline,
            "blocks": blocks,
        })
    }

    fn section(&self, record: &ValidatedRecord) -> Value {
        let mut section = json!({
            "type": "section",
            "text": {
                "type": "mrkdwn",
                "text": render_template(&self.template, record),
            },
        });

        let image = self
            .image_field
            .as_deref()
            .and_then(|f| record.get(f))
            .filter(|v| !v.is_empty());

        // Slack rejects image accessories with an empty URL
        if let Some(image_url) = image {
            let alt = self
                .alt_field
                .as_deref()
                .and_then(|f| record.get(f))
                .filter(|v| !v.is_empty())
                .unwrap_or("image");
            section["accessory"] = json!({
                "type": "image",
                "image_url": image_url,
                "alt_text": alt,
            });
        }

        section
    }
}

/// Fill `{field}` / `{field|fallback}` placeholders from a record.
/// Unknown fields and unterminated braces are left as written.
pub fn render_template(template: &str, record: &ValidatedRecord) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];

        let Some(close) = after.find('}') else {
            out.push_str(&rest[open..]);
            return out;
        };

        let placeholder = &after[..close];
        let (name, fallback) = match placeholder.split_once('|') {
            Some((name, fallback)) => (name.trim(), Some(fallback)),
            None => (placeholder.trim(), None),
        };

        match (record.get(name), fallback) {
            (Some(value), Some(fallback)) if value.is_empty() => out.push_str(fallback),
            (Some(value), _) => out.push_str(value),
            (None, _) => {
                out.push('{');
                out.push_str(placeholder);
                out.push('}');
            }
        }

        rest = &after[close + 1..];
    }

    out.push_str(rest);
    out
}

/// Receives the validated records of a finished export
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, records: &[ValidatedRecord]) -> Result<(), DeliveryError>;
}

/// Slack incoming-webhook notifier
pub struct SlackNotifier {
    client: reqwest::Client,
    webhook: WebhookUrl,
    layout: MessageLayout,
}

impl SlackNotifier {
    pub fn new(webhook: WebhookUrl, layout: MessageLayout) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .timeout(DELIVERY_TIMEOUT)
            .build()
            .map_err(|e| ConfigError::InvalidWebhook {
                value: webhook.as_url().to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            client,
            webhook,
            layout,
        })
    }

    pub fn layout(&self) -> &MessageLayout {
        &self.layout
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    async fn notify(&self, records: &[ValidatedRecord]) -> Result<(), DeliveryError> {
        let payload = self.layout.payload(records);
        debug!("Sending the following data to Slack: {}", payload);

        let response = self
            .client
            .post(self.webhook.as_url().clone())
            .json(&payload)
            .send()
            .await
            .map_err(|e| DeliveryError {
                status: None,
                message: e.to_string(),
            })?;

        let status = response.status();
        info!("Slack response status: {}", status);

        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        let message = if body.trim().is_empty() {
            status.canonical_reason().unwrap_or("unexpected status").to_string()
        } else {
            body.trim().to_string()
        };
        Err(DeliveryError {
            status: Some(status.as_u16()),
            message,
        })
    }
}
