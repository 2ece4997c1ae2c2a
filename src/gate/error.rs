use axum::{
    http::{header::RETRY_AFTER, StatusCode},
    response::{IntoResponse, Redirect, Response},
};
use std::time::Duration;
use thiserror::Error;
use tracing::error;

use super::login_location;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum GateError {
    #[error("invalid username or password")]
    InvalidCredentials,
    #[error("csrf token missing or invalid")]
    CsrfMismatch,
    #[error("too many failed login attempts")]
    LockedOut { retry_after: Option<Duration> },
    /// Answered with a redirect to the login page that returns to `next`.
    #[error("session absent or expired")]
    SessionInvalid { next: String },
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
    #[error("random source failure: {0}")]
    Entropy(#[from] rand::Error),
    #[error("invalid header value: {0}")]
    Header(#[from] axum::http::header::InvalidHeaderValue),
}

impl GateError {
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::InvalidCredentials => StatusCode::UNAUTHORIZED,
            Self::CsrfMismatch => StatusCode::BAD_REQUEST,
            Self::LockedOut { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::SessionInvalid { .. } => StatusCode::SEE_OTHER,
            Self::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Configuration(_) | Self::Entropy(_) | Self::Header(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

// Bodies stay generic; details only go to the log.
impl IntoResponse for GateError {
    fn into_response(self) -> Response {
        match self {
            Self::SessionInvalid { next } => {
                Redirect::to(&login_location(&next)).into_response()
            }
            Self::Store(_) | Self::Configuration(_) | Self::Entropy(_) | Self::Header(_) => {
                error!("Request denied: {self}");
                (self.status(), "Service temporarily unavailable").into_response()
            }
            Self::LockedOut {
                retry_after: Some(retry_after),
            } => (
                self.status(),
                [(RETRY_AFTER, retry_after.as_secs().max(1).to_string())],
                self.to_string(),
            )
                .into_response(),
            Self::InvalidCredentials | Self::CsrfMismatch | Self::LockedOut { .. } => {
                (self.status(), self.to_string()).into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header::LOCATION;

    #[test]
    fn session_invalid_redirects_to_login() {
        let response = GateError::SessionInvalid {
            next: "/".to_string(),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(
            response.headers().get(LOCATION).and_then(|v| v.to_str().ok()),
            Some("/login")
        );

        let response = GateError::SessionInvalid {
            next: "/menu?day=1".to_string(),
        }
        .into_response();
        assert_eq!(
            response.headers().get(LOCATION).and_then(|v| v.to_str().ok()),
            Some("/login?next=%2Fmenu%3Fday%3D1")
        );
    }

    #[test]
    fn storage_failures_deny() {
        let response = GateError::Store(StoreError::Unavailable).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn lockout_carries_retry_after() {
        let response = GateError::LockedOut {
            retry_after: Some(Duration::from_secs(90)),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok()),
            Some("90")
        );
    }

    #[test]
    fn statuses() {
        assert_eq!(
            GateError::InvalidCredentials.status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(GateError::CsrfMismatch.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            GateError::LockedOut { retry_after: None }.status(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }
}
