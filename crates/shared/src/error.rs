use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Unauthorized,
    NotFound,
    RateLimited,
    Internal,
}

/// Failure reported by the remote client.
///
/// Cloneable so a single failed fetch can be handed to several waiters.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    #[error("bad credentials: {0}")]
    BadCredentials(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("unexpected response to {request}: got {actual}")]
    UnexpectedResponse {
        request: &'static str,
        actual: &'static str,
    },
    #[error("{code:?}: {message}")]
    Remote { code: ErrorCode, message: String },
}

impl RemoteError {
    pub fn remote(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Remote {
            code,
            message: message.into(),
        }
    }

    pub fn is_credential_error(&self) -> bool {
        matches!(
            self,
            Self::BadCredentials(_)
                | Self::Remote {
                    code: ErrorCode::Unauthorized,
                    ..
                }
        )
    }
}
