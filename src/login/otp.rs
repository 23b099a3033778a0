//! One-time passcode authorities.
//!
//! Passcodes are either delegated to the auth provider or issued locally. The
//! local authority keeps its state in an injected [`OtpStore`] and enforces the
//! expiry, attempt and lockout rules itself.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::LoginError;
use crate::backend::{AuthProvider, BackendError, PasscodeTarget};

pub const CODE_LENGTH: usize = 6;
const EXPIRY_MINUTES: i64 = 5;
const MAX_ATTEMPTS: u32 = 5;
const LOCK_MINUTES: i64 = 15;

/// Sends and checks passcodes for a login target.
#[async_trait]
pub trait PasscodeAuthority: Send + Sync {
    async fn send(&self, target: &PasscodeTarget) -> Result<(), LoginError>;

    async fn verify(&self, target: &PasscodeTarget, code: &str) -> Result<(), LoginError>;
}

/// Passcodes handled by the hosted auth provider.
pub struct ProviderPasscodes {
    auth: Arc<dyn AuthProvider>,
}

impl ProviderPasscodes {
    #[must_use]
    pub fn new(auth: Arc<dyn AuthProvider>) -> Self {
        Self { auth }
    }
}

fn provider_error(err: BackendError) -> LoginError {
    match err {
        BackendError::Rejected { message, .. } => LoginError::Passcode(message),
        other => LoginError::Backend(other.user_message()),
    }
}

#[async_trait]
impl PasscodeAuthority for ProviderPasscodes {
    async fn send(&self, target: &PasscodeTarget) -> Result<(), LoginError> {
        self.auth
            .send_one_time_passcode(target)
            .await
            .map_err(provider_error)
    }

    async fn verify(&self, target: &PasscodeTarget, code: &str) -> Result<(), LoginError> {
        self.auth
            .verify_one_time_passcode(target, code)
            .await
            .map(|identity| debug!(identity_id = %identity.id, "passcode accepted"))
            .map_err(provider_error)
    }
}

/// State of the passcode issued to one address.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtpRecord {
    pub code: String,
    pub expires_at: DateTime<Utc>,
    pub attempts: u32,
    pub locked_until: Option<DateTime<Utc>>,
}

pub trait OtpStore: Send + Sync {
    fn get(&self, address: &str) -> Option<OtpRecord>;
    fn put(&self, address: &str, record: OtpRecord);
    fn remove(&self, address: &str);
}

#[derive(Debug, Default)]
pub struct MemoryOtpStore {
    records: Mutex<HashMap<String, OtpRecord>>,
}

impl MemoryOtpStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl OtpStore for MemoryOtpStore {
    fn get(&self, address: &str) -> Option<OtpRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(address)
            .cloned()
    }

    fn put(&self, address: &str, record: OtpRecord) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(address.to_string(), record);
    }

    fn remove(&self, address: &str) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(address);
    }
}

/// A passcode handed to the delivery channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Delivery {
    pub target: PasscodeTarget,
    pub code: String,
}

/// Locally issued passcodes, delivered through an outbox channel.
pub struct LocalPasscodes {
    store: Arc<dyn OtpStore>,
    outbox: mpsc::UnboundedSender<Delivery>,
}

impl LocalPasscodes {
    /// Returns the authority and the receiving end of its outbox.
    #[must_use]
    pub fn new(store: Arc<dyn OtpStore>) -> (Self, mpsc::UnboundedReceiver<Delivery>) {
        let (outbox, deliveries) = mpsc::unbounded_channel();
        (Self { store, outbox }, deliveries)
    }
}

fn minutes_left(until: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    let seconds = (until - now).num_seconds().max(0);
    (seconds + 59) / 60
}

fn locked(minutes: i64) -> LoginError {
    LoginError::Passcode(format!(
        "Too many failed attempts. Please try again in {minutes} minutes."
    ))
}

#[async_trait]
impl PasscodeAuthority for LocalPasscodes {
    async fn send(&self, target: &PasscodeTarget) -> Result<(), LoginError> {
        let address = target.address();
        let now = Utc::now();

        if let Some(until) = self.store.get(address).and_then(|record| record.locked_until) {
            if until > now {
                return Err(locked(minutes_left(until, now)));
            }
        }

        let code = format!("{:06}", rand::thread_rng().gen_range(0..1_000_000));
        self.store.put(
            address,
            OtpRecord {
                code: code.clone(),
                expires_at: now + Duration::minutes(EXPIRY_MINUTES),
                attempts: 0,
                locked_until: None,
            },
        );

        self.outbox
            .send(Delivery {
                target: target.clone(),
                code,
            })
            .map_err(|_| LoginError::Backend("passcode delivery is unavailable".to_string()))?;

        info!("passcode issued");
        Ok(())
    }

    async fn verify(&self, target: &PasscodeTarget, code: &str) -> Result<(), LoginError> {
        let address = target.address();
        let now = Utc::now();

        let mut record = self.store.get(address).ok_or(LoginError::NoPendingPasscode)?;

        if let Some(until) = record.locked_until {
            if until > now {
                return Err(locked(minutes_left(until, now)));
            }
        }

        if record.expires_at <= now {
            self.store.remove(address);
            return Err(LoginError::Passcode(
                "Code has expired. Please request a new one.".to_string(),
            ));
        }

        if record.code != code {
            record.attempts += 1;
            if record.attempts >= MAX_ATTEMPTS {
                record.locked_until = Some(now + Duration::minutes(LOCK_MINUTES));
                self.store.put(address, record);
                warn!("passcode locked after repeated failures");
                return Err(locked(LOCK_MINUTES));
            }
            let remaining = MAX_ATTEMPTS - record.attempts;
            self.store.put(address, record);
            return Err(LoginError::Passcode(format!(
                "Invalid code. {remaining} attempts remaining."
            )));
        }

        self.store.remove(address);
        Ok(())
    }
}
