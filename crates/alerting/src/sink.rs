//! Notification Sinks

use crate::error::AlertError;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use std::time::Duration;
use tracing::info;

/// Pointer to the full report behind a digest
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attachment {
    pub report_id: String,
}

/// Delivers one message to one subscriber
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(
        &self,
        subscriber: &str,
        text: &str,
        attachment: Option<&Attachment>,
    ) -> Result<(), AlertError>;
}

/// POSTs `{ subscriber, text, report_id }` as JSON to a webhook
pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookSink {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: reqwest::Client::builder().timeout(timeout).build()?,
            url: url.into(),
        })
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    async fn send(
        &self,
        subscriber: &str,
        text: &str,
        attachment: Option<&Attachment>,
    ) -> Result<(), AlertError> {
        let failed = |reason: String| AlertError::DeliveryError {
            subscriber: subscriber.to_string(),
            reason,
        };

        let response = self
            .client
            .post(&self.url)
            .json(&json!({
                "subscriber": subscriber,
                "text": text,
                "report_id": attachment.map(|a| a.report_id.as_str()),
            }))
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(failed(format!("HTTP {}", response.status().as_u16())));
        }
        Ok(())
    }
}

/// Writes notifications to the log; used when no webhook is configured
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn send(
        &self,
        subscriber: &str,
        text: &str,
        attachment: Option<&Attachment>,
    ) -> Result<(), AlertError> {
        info!(
            subscriber,
            report = attachment.map(|a| a.report_id.as_str()),
            "Notification: {}",
            text
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_webhook_posts_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(body_json(json!({
                "subscriber": "42",
                "text": "hello",
                "report_id": "rep-1-abcdef",
            })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let sink = WebhookSink::new(format!("{}/hook", server.uri()), Duration::from_secs(2)).unwrap();
        let attachment = Attachment {
            report_id: "rep-1-abcdef".to_string(),
        };
        sink.send("42", "hello", Some(&attachment)).await.unwrap();
    }

    #[tokio::test]
    async fn test_webhook_failure_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let sink = WebhookSink::new(server.uri(), Duration::from_secs(2)).unwrap();
        let result = sink.send("42", "hello", None).await;
        assert!(matches!(result, Err(AlertError::DeliveryError { reason, .. }) if reason == "HTTP 500"));
    }
}
