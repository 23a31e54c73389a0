//! Markdown webhook channel.
//!
//! Posts `{"msgtype":"markdown","markdown":{"title","text"}}` to a robot
//! webhook and decodes the `{errcode, errmsg}` acknowledgement.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use crate::application::ports::{ChannelError, ChannelReceipt, NotificationChannelPort};
use crate::infrastructure::config::PushConfig;

const CHANNEL_NAME: &str = "webhook";

#[derive(Serialize)]
struct MarkdownBody<'a> {
    title: &'a str,
    text: &'a str,
}

#[derive(Serialize)]
struct MarkdownMessage<'a> {
    msgtype: &'static str,
    markdown: MarkdownBody<'a>,
}

/// Webhook notification channel.
#[derive(Debug, Clone)]
pub struct WebhookChannel {
    client: Client,
    webhook: String,
}

impl WebhookChannel {
    /// Create a channel posting to `webhook`.
    ///
    /// A zero timeout means 5 seconds.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Transport`] if the HTTP client cannot be built.
    pub fn new(webhook: impl Into<String>, timeout: Duration) -> Result<Self, ChannelError> {
        let timeout = if timeout.is_zero() {
            Duration::from_secs(5)
        } else {
            timeout
        };
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ChannelError::Transport {
                message: e.to_string(),
            })?;
        Ok(Self {
            client,
            webhook: webhook.into().trim().to_string(),
        })
    }

    /// Create a channel from the `push` config section.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Transport`] if the HTTP client cannot be built.
    pub fn from_config(config: &PushConfig) -> Result<Self, ChannelError> {
        Self::new(config.webhook.clone(), config.timeout())
    }

    /// Whether a webhook URL is set.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        !self.webhook.is_empty()
    }
}

#[async_trait]
impl NotificationChannelPort for WebhookChannel {
    fn name(&self) -> &str {
        CHANNEL_NAME
    }

    async fn send(&self, title: &str, markdown: &str) -> Result<ChannelReceipt, ChannelError> {
        if !self.is_configured() {
            return Err(ChannelError::NotConfigured);
        }

        let body = MarkdownMessage {
            msgtype: "markdown",
            markdown: MarkdownBody {
                title,
                text: markdown,
            },
        };

        let response = self
            .client
            .post(&self.webhook)
            .json(&body)
            .send()
            .await
            .map_err(|e| ChannelError::Transport {
                message: e.to_string(),
            })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ChannelError::Transport {
                message: e.to_string(),
            })?;

        if !status.is_success() {
            return Err(ChannelError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        let receipt: ChannelReceipt =
            serde_json::from_str(&text).map_err(|e| ChannelError::Decode {
                message: e.to_string(),
            })?;

        if !receipt.is_ok() {
            tracing::warn!(
                errcode = receipt.errcode,
                errmsg = %receipt.errmsg,
                "Webhook rejected message"
            );
        }
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn channel(server: &MockServer) -> WebhookChannel {
        WebhookChannel::new(format!("{}/robot/send", server.uri()), Duration::ZERO).unwrap()
    }

    #[tokio::test]
    async fn posts_markdown_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/robot/send"))
            .and(body_json(serde_json::json!({
                "msgtype": "markdown",
                "markdown": {"title": "Index drop", "text": "### body"}
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"errcode": 0, "errmsg": "ok"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let receipt = channel(&server).send("Index drop", "### body").await.unwrap();
        assert!(receipt.is_ok());
        assert_eq!(receipt.errmsg, "ok");
    }

    #[tokio::test]
    async fn non_zero_errcode_is_a_receipt() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"errcode": 310_000, "errmsg": "keywords not in content"})),
            )
            .mount(&server)
            .await;

        let receipt = channel(&server).send("t", "b").await.unwrap();
        assert_eq!(receipt.errcode, 310_000);
        assert!(!receipt.is_ok());
    }

    #[tokio::test]
    async fn http_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        let err = channel(&server).send("t", "b").await.unwrap_err();
        assert!(matches!(err, ChannelError::Status { status: 502, .. }));
    }

    #[tokio::test]
    async fn undecodable_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let err = channel(&server).send("t", "b").await.unwrap_err();
        assert!(matches!(err, ChannelError::Decode { .. }));
    }

    #[tokio::test]
    async fn empty_webhook_is_not_configured() {
        let ch = WebhookChannel::from_config(&PushConfig::default()).unwrap();
        assert!(!ch.is_configured());
        let err = ch.send("t", "b").await.unwrap_err();
        assert!(matches!(err, ChannelError::NotConfigured));
        assert_eq!(err.to_string(), "client not configured");
    }
}
