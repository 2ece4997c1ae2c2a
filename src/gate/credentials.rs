//! Administrator credential check against an Argon2 PHC hash.
//!
//! A submitted identity that does not match still costs one full Argon2
//! verification (against a decoy hash built with the same parameters), so the
//! response time does not reveal whether the name was right.

use argon2::{
    password_hash::{PasswordHashString, SaltString},
    Algorithm, Argon2, Params, PasswordHash, PasswordHasher, PasswordVerifier, Version,
};
use rand::{rngs::OsRng, RngCore};
use secrecy::{ExposeSecret, SecretString};
use tracing::error;

use super::error::GateError;

#[derive(Debug)]
pub struct CredentialVerifier {
    identity: String,
    password_hash: PasswordHashString,
    decoy_hash: PasswordHashString,
}

impl CredentialVerifier {
    /// # Errors
    /// Returns a configuration error if the identity is empty or the hash is
    /// not a valid Argon2 PHC string.
    pub fn new(identity: String, password_hash: &str) -> Result<Self, GateError> {
        if identity.trim().is_empty() {
            return Err(GateError::Configuration(
                "admin username must not be empty".to_string(),
            ));
        }

        let parsed = PasswordHash::new(password_hash.trim()).map_err(|err| {
            GateError::Configuration(format!("invalid admin password hash: {err}"))
        })?;
        let algorithm = Algorithm::new(parsed.algorithm.as_str()).map_err(|err| {
            GateError::Configuration(format!("admin password hash is not argon2: {err}"))
        })?;
        let params = Params::try_from(&parsed).map_err(|err| {
            GateError::Configuration(format!("invalid argon2 parameters: {err}"))
        })?;
        if parsed.hash.is_none() || parsed.salt.is_none() {
            return Err(GateError::Configuration(
                "admin password hash is missing its salt or digest".to_string(),
            ));
        }

        let decoy_hash = decoy_hash(algorithm, params)?;

        Ok(Self {
            identity,
            password_hash: parsed.serialize(),
            decoy_hash,
        })
    }

    #[must_use]
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Check `identity` / `password`. Never errors; any failure is `false`.
    pub async fn verify(&self, identity: &str, password: &SecretString) -> bool {
        let identity_matches = identity == self.identity;
        let hash = if identity_matches {
            self.password_hash.clone()
        } else {
            self.decoy_hash.clone()
        };
        let password = password.clone();

        // argon2 blocks; run it on the blocking pool
        let outcome = tokio::task::spawn_blocking(move || {
            Argon2::default()
                .verify_password(password.expose_secret().as_bytes(), &hash.password_hash())
                .is_ok()
        })
        .await;

        match outcome {
            Ok(password_matches) => identity_matches && password_matches,
            Err(err) => {
                error!("Password verification task failed: {err}");
                false
            }
        }
    }
}

fn decoy_hash(algorithm: Algorithm, params: Params) -> Result<PasswordHashString, GateError> {
    let mut decoy = [0u8; 32];
    OsRng.try_fill_bytes(&mut decoy)?;
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::new(algorithm, Version::V0x13, params)
        .hash_password(&decoy, &salt)
        .map_err(|err| GateError::Configuration(format!("failed to build decoy hash: {err}")))?;
    Ok(hash.serialize())
}

/// Hash `password` into a PHC string suitable for the admin password setting.
///
/// # Errors
/// Returns an error if hashing fails.
pub fn hash_password(password: &str, params: Params) -> Result<String, GateError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| GateError::Configuration(format!("failed to hash password: {err}")))
}
