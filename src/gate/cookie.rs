//! Session cookie handling. The cookie holds the opaque session id and nothing else.

use axum::http::{
    header::{InvalidHeaderValue, COOKIE},
    HeaderMap, HeaderValue,
};
use std::time::Duration;

use super::session::SessionId;

pub const SESSION_COOKIE_NAME: &str = "vestibule_session";

#[derive(Clone, Copy, Debug)]
pub struct CookieManager {
    secure: bool,
    max_age: Duration,
}

impl CookieManager {
    #[must_use]
    pub fn new(secure: bool, max_age: Duration) -> Self {
        Self { secure, max_age }
    }

    /// Build the `Set-Cookie` value for `id`.
    ///
    /// # Errors
    /// Returns an error if the value is not a valid header.
    pub fn set_session_cookie(&self, id: &SessionId) -> Result<HeaderValue, InvalidHeaderValue> {
        self.build(id.as_str(), self.max_age.as_secs())
    }

    /// # Errors
    /// Returns an error if the value is not a valid header.
    pub fn clear_session_cookie(&self) -> Result<HeaderValue, InvalidHeaderValue> {
        self.build("", 0)
    }

    fn build(&self, value: &str, max_age: u64) -> Result<HeaderValue, InvalidHeaderValue> {
        let mut cookie = format!(
            "{SESSION_COOKIE_NAME}={value}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age}"
        );
        if self.secure {
            cookie.push_str("; Secure");
        }
        HeaderValue::from_str(&cookie)
    }

    /// Malformed or foreign values are treated the same as a missing cookie.
    #[must_use]
    pub fn read_session_id(&self, headers: &HeaderMap) -> Option<SessionId> {
        headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|header| header.to_str().ok())
            .flat_map(|value| value.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .filter(|(key, _)| key.trim() == SESSION_COOKIE_NAME)
            .find_map(|(_, value)| SessionId::parse(value.trim()))
    }
}
