//! Notification Channel Port (Driven Port)
//!
//! Delivers a titled markdown message. A transport failure and a non-zero
//! channel error code are distinct outcomes: the first is an `Err`, the
//! second an `Ok` receipt carrying the code.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Channel-level acknowledgement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelReceipt {
    /// Zero on success.
    #[serde(default)]
    pub errcode: i64,
    /// Channel message.
    #[serde(default)]
    pub errmsg: String,
}

impl ChannelReceipt {
    /// Whether the channel accepted the message.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        self.errcode == 0
    }
}

/// Channel delivery error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ChannelError {
    /// No endpoint configured.
    #[error("client not configured")]
    NotConfigured,

    /// Network or timeout failure.
    #[error("transport error: {message}")]
    Transport { message: String },

    /// Non-success HTTP status.
    #[error("http status {status}: {body}")]
    Status { status: u16, body: String },

    /// Response body could not be decoded.
    #[error("decode response: {message}")]
    Decode { message: String },
}

/// Port for outbound notifications.
#[async_trait]
pub trait NotificationChannelPort: Send + Sync {
    /// Name recorded in the audit `channel` column.
    fn name(&self) -> &str;

    /// Deliver one markdown message.
    async fn send(&self, title: &str, markdown: &str) -> Result<ChannelReceipt, ChannelError>;
}

/// A delivered message captured by [`RecordingChannel`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    /// Title.
    pub title: String,
    /// Body.
    pub markdown: String,
}

/// Channel that records messages instead of sending them.
#[derive(Debug, Default)]
pub struct RecordingChannel {
    sent: Mutex<Vec<SentMessage>>,
    errcode: Mutex<i64>,
    failure: Mutex<Option<ChannelError>>,
}

impl RecordingChannel {
    /// Create a channel that accepts everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reply with this error code to every subsequent send.
    pub fn reply_with_errcode(&self, errcode: i64) {
        *self.errcode.lock() = errcode;
    }

    /// Fail every subsequent send with this error.
    pub fn fail_with(&self, error: ChannelError) {
        *self.failure.lock() = Some(error);
    }

    /// Messages delivered so far.
    #[must_use]
    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl NotificationChannelPort for RecordingChannel {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send(&self, title: &str, markdown: &str) -> Result<ChannelReceipt, ChannelError> {
        if let Some(err) = self.failure.lock().clone() {
            return Err(err);
        }
        self.sent.lock().push(SentMessage {
            title: title.to_string(),
            markdown: markdown.to_string(),
        });
        let errcode = *self.errcode.lock();
        Ok(ChannelReceipt {
            errcode,
            errmsg: if errcode == 0 { "ok" } else { "rejected" }.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn recording_channel_captures_and_fails_on_demand() {
        let channel = RecordingChannel::new();
        let receipt = channel.send("t", "body").await.unwrap();
        assert!(receipt.is_ok());
        assert_eq!(channel.sent().len(), 1);

        channel.reply_with_errcode(310_000);
        let receipt = channel.send("t", "body").await.unwrap();
        assert!(!receipt.is_ok());

        channel.fail_with(ChannelError::Transport {
            message: "timeout".to_string(),
        });
        assert!(channel.send("t", "body").await.is_err());
        assert_eq!(channel.sent().len(), 2);
    }
}
