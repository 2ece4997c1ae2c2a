//! Brute-force protection for the login form.
//!
//! Flow Overview:
//! 1) Every attempt first compares the current time against the lockout record.
//! 2) Before the password is checked the attempt takes a slot by incrementing a
//!    counter whose window opens with the first attempt. Slots past the
//!    threshold are refused, so concurrent attempts cannot outrun the count.
//! 3) A failure on the last slot, or a refused slot, writes a lockout record
//!    holding the unix time it ends and resets the counter.
//! 4) A successful login clears both records.
//!
//! Identifiers are opaque strings; [`LockoutPolicy`] decides which ones a login
//! attempt is counted against. Storage failures fail closed.

use sha2::{Digest, Sha256};
use std::{str::FromStr, sync::Arc, time::Duration};
use tracing::{error, warn};

use super::error::GateError;
use crate::store::{
    clock::{seconds, Clock},
    KeyValueStore, SetMode,
};

const ATTEMPTS_PREFIX: &str = "vestibule:attempts:";
const LOCKOUT_PREFIX: &str = "vestibule:lockout:";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockoutPolicy {
    /// Count failures per client address.
    Address,
    /// Count failures per (client address, submitted username) pair.
    AddressIdentity,
    /// Count address and username independently; either can lock.
    Separate,
}

impl LockoutPolicy {
    pub const VALUES: [&'static str; 3] = ["address", "address-identity", "separate"];

    #[must_use]
    pub fn identifiers(self, address: &str, identity: &str) -> Vec<String> {
        match self {
            Self::Address => vec![format!("ip:{address}")],
            Self::AddressIdentity => vec![format!("ip-user:{address}|{identity}")],
            Self::Separate => vec![format!("ip:{address}"), format!("user:{identity}")],
        }
    }
}

impl FromStr for LockoutPolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "address" => Ok(Self::Address),
            "address-identity" => Ok(Self::AddressIdentity),
            "separate" => Ok(Self::Separate),
            other => Err(format!("unknown lockout policy: {other}")),
        }
    }
}

/// Attempt history of one identifier.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoginAttemptRecord {
    /// Attempts counted in the current window, this one included.
    pub failures: u64,
    pub window_started_at: i64,
    pub locked_until: Option<i64>,
}

/// Slot taken for one identifier before the password is checked.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttemptReservation {
    identifier: String,
    record: LoginAttemptRecord,
}

impl AttemptReservation {
    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    #[must_use]
    pub fn attempt(&self) -> u64 {
        self.record.failures
    }
}

#[derive(Debug)]
pub enum Admission {
    /// The attempt may be verified; report its outcome for every reservation.
    Allowed(Vec<AttemptReservation>),
    Locked(Duration),
}

#[derive(Debug)]
pub struct BruteForceGuard {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    threshold: u64,
    window: Duration,
    lockout: Duration,
}

fn key(prefix: &str, identifier: &str) -> String {
    format!(
        "{prefix}{}",
        hex::encode(Sha256::digest(identifier.as_bytes()))
    )
}

impl BruteForceGuard {
    #[must_use]
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        threshold: u32,
        window: Duration,
        lockout: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            threshold: u64::from(threshold.max(1)),
            window,
            lockout,
        }
    }

    pub async fn is_locked(&self, identifier: &str) -> bool {
        self.lockout_remaining(identifier).await.is_some()
    }

    /// Time left on an active lockout, `None` when attempts are allowed.
    pub async fn lockout_remaining(&self, identifier: &str) -> Option<Duration> {
        let record = match self.store.get(&key(LOCKOUT_PREFIX, identifier)).await {
            Ok(record) => record?,
            Err(err) => {
                error!("Lockout lookup failed, denying attempt: {err}");
                return Some(self.lockout);
            }
        };

        let Ok(until) = record.parse::<i64>() else {
            warn!("Unreadable lockout record, denying attempt");
            return Some(self.lockout);
        };

        let remaining = until.saturating_sub(self.clock.now());
        (remaining > 0).then(|| Duration::from_secs(u64::try_from(remaining).unwrap_or(0)))
    }

    /// Longest active lockout across `identifiers`.
    pub async fn lockout_remaining_any(&self, identifiers: &[String]) -> Option<Duration> {
        let mut longest: Option<Duration> = None;
        for identifier in identifiers {
            if let Some(remaining) = self.lockout_remaining(identifier).await {
                longest = Some(longest.map_or(remaining, |current| current.max(remaining)));
            }
        }
        longest
    }

    /// Take an attempt slot for every identifier. At most `threshold` attempts
    /// per identifier are admitted in a window, however many run at once.
    ///
    /// # Errors
    /// Returns an error if the store cannot be reached.
    pub async fn admit(&self, identifiers: &[String]) -> Result<Admission, GateError> {
        if let Some(remaining) = self.lockout_remaining_any(identifiers).await {
            return Ok(Admission::Locked(remaining));
        }

        let mut reservations = Vec::with_capacity(identifiers.len());
        for identifier in identifiers {
            let counter = self
                .store
                .increment(&key(ATTEMPTS_PREFIX, identifier), self.window)
                .await?;

            if counter.value > self.threshold {
                self.lock(identifier, counter.value, SetMode::IfAbsent).await?;
                let remaining = self
                    .lockout_remaining(identifier)
                    .await
                    .unwrap_or(self.lockout);
                return Ok(Admission::Locked(remaining));
            }

            let now = self.clock.now();
            let elapsed = seconds(self.window).saturating_sub(seconds(counter.expires_in));
            reservations.push(AttemptReservation {
                identifier: identifier.clone(),
                record: LoginAttemptRecord {
                    failures: counter.value,
                    window_started_at: now.saturating_sub(elapsed),
                    locked_until: None,
                },
            });
        }

        // the counter may have been reset by a lockout written meanwhile
        if let Some(remaining) = self.lockout_remaining_any(identifiers).await {
            return Ok(Admission::Locked(remaining));
        }

        Ok(Admission::Allowed(reservations))
    }

    /// Report a failed verification for an admitted attempt.
    ///
    /// # Errors
    /// Returns an error if the store cannot be reached.
    pub async fn record_failure(
        &self,
        reservation: &AttemptReservation,
    ) -> Result<LoginAttemptRecord, GateError> {
        let mut record = reservation.record.clone();
        if record.failures >= self.threshold {
            let until = self
                .lock(&reservation.identifier, record.failures, SetMode::Always)
                .await?;
            record.locked_until = Some(until);
        }
        Ok(record)
    }

    /// # Errors
    /// Returns an error if the store cannot be reached.
    pub async fn record_success(&self, identifier: &str) -> Result<(), GateError> {
        self.store.delete(&key(ATTEMPTS_PREFIX, identifier)).await?;
        self.store.delete(&key(LOCKOUT_PREFIX, identifier)).await?;
        Ok(())
    }

    // The lockout record is written before the counter is reset, so an
    // attempt counted after the reset still sees the lockout.
    async fn lock(&self, identifier: &str, attempts: u64, mode: SetMode) -> Result<i64, GateError> {
        let until = self.clock.now().saturating_add(seconds(self.lockout));
        let written = self
            .store
            .set(
                &key(LOCKOUT_PREFIX, identifier),
                until.to_string(),
                self.lockout,
                mode,
            )
            .await?;
        self.store.delete(&key(ATTEMPTS_PREFIX, identifier)).await?;
        if written {
            warn!(
                attempts,
                lockout_seconds = self.lockout.as_secs(),
                "Login identifier locked out"
            );
        }
        Ok(until)
    }
}
