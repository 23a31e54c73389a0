//! HTTP API errors.
//!
//! Every error renders as `{"ok": false, "error": "..."}` with a status
//! chosen by kind.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::application::ports::StoreError;

/// Error returned by a handler.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HttpApiError {
    /// Malformed input. 400.
    #[error("{0}")]
    BadRequest(String),

    /// A collaborator is not wired in. 500.
    #[error("{0} not configured")]
    NotConfigured(&'static str),

    /// Storage failure. 500.
    #[error("{0}")]
    Internal(String),

    /// Resource does not exist. 404.
    #[error("{0}")]
    NotFound(String),

    /// An upstream call failed. 502.
    #[error("{message}")]
    Upstream {
        /// Error text.
        message: String,
        /// Channel error code, when the channel answered.
        channel_errcode: Option<i64>,
        /// Channel error message, when the channel answered.
        channel_errmsg: Option<String>,
    },
}

impl From<StoreError> for HttpApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::InvalidDate { .. } => Self::BadRequest(e.to_string()),
            StoreError::Database { .. } | StoreError::Decode { .. } => Self::Internal(e.to_string()),
        }
    }
}

impl HttpApiError {
    /// Upstream failure without a channel receipt.
    #[must_use]
    pub fn upstream(message: impl Into<String>) -> Self {
        Self::Upstream {
            message: message.into(),
            channel_errcode: None,
            channel_errmsg: None,
        }
    }

    /// Status code for this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotConfigured(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Upstream { .. } => StatusCode::BAD_GATEWAY,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    ok: bool,
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    channel_errcode: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    channel_errmsg: Option<String>,
}

impl IntoResponse for HttpApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error = self.to_string();
        let (channel_errcode, channel_errmsg) = match self {
            Self::Upstream {
                channel_errcode,
                channel_errmsg,
                ..
            } => (channel_errcode, channel_errmsg),
            _ => (None, None),
        };
        let body = ErrorBody {
            ok: false,
            error,
            channel_errcode,
            channel_errmsg,
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(
            HttpApiError::BadRequest("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            HttpApiError::NotConfigured("store").status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            HttpApiError::NotFound("plan not found".into()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(HttpApiError::upstream("boom").status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn store_errors_split_by_kind() {
        let bad = HttpApiError::from(StoreError::InvalidDate {
            date: "2024-13-01".into(),
        });
        assert_eq!(bad.status(), StatusCode::BAD_REQUEST);
        let db = HttpApiError::from(StoreError::Database {
            message: "locked".into(),
        });
        assert_eq!(db.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn not_configured_message() {
        assert_eq!(
            HttpApiError::NotConfigured("store").to_string(),
            "store not configured"
        );
    }
}
