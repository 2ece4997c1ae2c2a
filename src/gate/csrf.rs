//! Anti-forgery tokens bound to a session's CSRF secret.
//!
//! The token is `HMAC-SHA256(signing secret, "csrf:" || session CSRF secret)`.
//! Forging one needs both the per-session secret and the server secret, and
//! rotating either invalidates every outstanding token.

use base64ct::{Base64UrlUnpadded, Encoding};

use super::{session::Session, signing::SigningKey};

const DOMAIN: &[u8] = b"csrf:";

#[derive(Clone, Debug)]
pub struct CsrfTokens {
    key: SigningKey,
}

impl CsrfTokens {
    #[must_use]
    pub fn new(key: SigningKey) -> Self {
        Self { key }
    }

    /// Token for the form rendered to the holder of `session`.
    #[must_use]
    pub fn issue(&self, session: &Session) -> Option<String> {
        let secret = session.csrf_secret.as_deref()?;
        let tag = self.key.sign(DOMAIN, secret.as_bytes())?;
        Some(Base64UrlUnpadded::encode_string(&tag))
    }

    /// Fails closed: no session, no secret, or an undecodable token is invalid.
    #[must_use]
    pub fn validate(&self, session: Option<&Session>, token: &str) -> bool {
        let Some(secret) = session.and_then(|session| session.csrf_secret.as_deref()) else {
            return false;
        };
        let Ok(tag) = Base64UrlUnpadded::decode_vec(token.trim()) else {
            return false;
        };
        self.key.verify(DOMAIN, secret.as_bytes(), &tag)
    }
}
