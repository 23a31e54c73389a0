//! Notification channel adapters.

mod webhook;

pub use webhook::WebhookChannel;
