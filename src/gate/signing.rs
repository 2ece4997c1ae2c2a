//! Keyed hashing with the session signing secret.

use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;

use super::error::GateError;

type HmacSha256 = Hmac<Sha256>;

/// Minimum accepted length of the signing secret, in bytes.
pub const MIN_SECRET_LEN: usize = 32;

#[derive(Clone, Debug)]
pub struct SigningKey {
    secret: SecretString,
}

impl SigningKey {
    /// # Errors
    /// Returns a configuration error if the secret is shorter than [`MIN_SECRET_LEN`].
    pub fn new(secret: SecretString) -> Result<Self, GateError> {
        if secret.expose_secret().len() < MIN_SECRET_LEN {
            return Err(GateError::Configuration(format!(
                "session secret must be at least {MIN_SECRET_LEN} bytes"
            )));
        }
        Ok(Self { secret })
    }

    fn mac(&self, domain: &[u8], message: &[u8]) -> Option<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(self.secret.expose_secret().as_bytes()).ok()?;
        mac.update(domain);
        mac.update(message);
        Some(mac)
    }

    /// HMAC-SHA256 over `domain || message`.
    #[must_use]
    pub fn sign(&self, domain: &[u8], message: &[u8]) -> Option<Vec<u8>> {
        self.mac(domain, message)
            .map(|mac| mac.finalize().into_bytes().to_vec())
    }

    /// Constant-time check of `tag` against `sign(domain, message)`.
    #[must_use]
    pub fn verify(&self, domain: &[u8], message: &[u8], tag: &[u8]) -> bool {
        self.mac(domain, message)
            .is_some_and(|mac| mac.verify_slice(tag).is_ok())
    }

    /// Stable, non-reversible identifier of the secret, used to detect rotation.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        self.sign(b"fingerprint:", b"")
            .map(hex::encode)
            .unwrap_or_default()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn key(secret: &str) -> SigningKey {
        SigningKey::new(SecretString::from(secret.to_string())).unwrap()
    }

    #[test]
    fn short_secrets_are_rejected() {
        let result = SigningKey::new(SecretString::from("short".to_string()));
        assert!(matches!(result, Err(GateError::Configuration(_))));
    }

    #[test]
    fn sign_and_verify() {
        let key = key("0123456789abcdef0123456789abcdef");
        let tag = key.sign(b"csrf:", b"secret").unwrap();
        assert!(key.verify(b"csrf:", b"secret", &tag));
        assert!(!key.verify(b"csrf:", b"other", &tag));
        assert!(!key.verify(b"other:", b"secret", &tag));
        assert!(!key.verify(b"csrf:", b"secret", &tag[..16]));
    }

    #[test]
    fn fingerprint_changes_with_secret() {
        let first = key("0123456789abcdef0123456789abcdef");
        let second = key("fedcba9876543210fedcba9876543210");
        assert_eq!(first.fingerprint(), first.fingerprint());
        assert_ne!(first.fingerprint(), second.fingerprint());
        assert_eq!(first.fingerprint().len(), 64);
    }
}
