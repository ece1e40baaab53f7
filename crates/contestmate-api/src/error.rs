use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{endpoint} timed out")]
    Timeout { endpoint: &'static str },

    #[error("{endpoint} unreachable: {reason}")]
    Connect {
        endpoint: &'static str,
        reason: reqwest::Error,
    },

    #[error("{endpoint} returned {status}: {message}")]
    Status {
        endpoint: &'static str,
        status: StatusCode,
        message: String,
    },

    #[error("{endpoint} sent an unreadable body: {reason}")]
    Body {
        endpoint: &'static str,
        reason: reqwest::Error,
    },

    #[error(transparent)]
    Request(#[from] reqwest::Error),
}

impl ApiError {
    pub(crate) fn send(endpoint: &'static str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout { endpoint }
        } else if err.is_connect() {
            Self::Connect {
                endpoint,
                reason: err,
            }
        } else {
            Self::Request(err)
        }
    }

    /// The backend answers failures with `{"error": ..., "message": ...}`;
    /// fall back to the raw body when it does not.
    pub(crate) fn status(endpoint: &'static str, status: StatusCode, body: &str) -> Self {
        let message = serde_json::from_str::<ErrorBody>(body)
            .ok()
            .and_then(|b| b.error.or(b.message))
            .unwrap_or_else(|| body.trim().to_string());
        Self::Status {
            endpoint,
            status,
            message,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Status { status, .. } if *status == StatusCode::UNAUTHORIZED)
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    error: Option<String>,
    message: Option<String>,
}
