//! Collaborator contracts consumed by the registration and login flows.
//!
//! Every external system the client talks to sits behind one of the traits in
//! this module: the identity-verification provider, the government record
//! source, the hosted auth provider, the application user store and the
//! durable key-value storage. Two strategies implement them:
//!
//! - [`http`] and [`auth`] talk to the hosted backend over HTTP.
//! - [`memory`] keeps everything in process, used by the `mock` backend and
//!   by tests.
//!
//! [`Backends`] bundles one strategy so it can be chosen once at startup and
//! injected everywhere else.

pub mod auth;
pub mod file;
pub mod http;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::registration::types::{AccountStatus, SessionStatus, VerifiedFields};

/// Failure reported by a remote collaborator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("network error: {0}")]
    Transport(String),
    #[error("{message}")]
    Rejected { status: u16, message: String },
    #[error("not found")]
    NotFound,
    #[error("{0}")]
    AlreadyExists(String),
    #[error("invalid response: {0}")]
    Decode(String),
}

impl BackendError {
    /// Message suitable for showing to the user as-is.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Rejected { message, .. } | Self::AlreadyExists(message) => message.clone(),
            other => other.to_string(),
        }
    }
}

/// Failure reading or writing durable storage.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Generic string key-value persistence with no transactional guarantees.
#[async_trait]
pub trait DurableStorage: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    async fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// Session handle returned by the verification provider.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreatedSession {
    pub session_id: String,
    pub verification_url: String,
}

/// Decision snapshot for one verification session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionResult {
    pub status: SessionStatus,
    pub verified_fields: Option<VerifiedFields>,
    /// When the provider created the session, if it reports it.
    pub created_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait VerificationProvider: Send + Sync {
    async fn create_session(
        &self,
        language: &str,
        return_url: &str,
    ) -> Result<CreatedSession, BackendError>;

    async fn get_session_result(&self, session_id: &str) -> Result<SessionResult, BackendError>;
}

/// Images captured on-device for the local verification path.
#[derive(Clone, Debug, Default)]
pub struct DocumentCapture {
    pub front_image: Vec<u8>,
    pub back_image: Option<Vec<u8>>,
}

/// Data extracted from a captured identity document.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DocumentCheck {
    pub document_number: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub date_of_birth: Option<String>,
}

#[async_trait]
pub trait DocumentVerifier: Send + Sync {
    async fn verify_document(&self, capture: &DocumentCapture)
        -> Result<DocumentCheck, BackendError>;
}

/// Official record for one national id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GovernmentRecord {
    pub name: String,
    pub surname: String,
    pub date_of_birth: String,
    pub phone_number: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Returns `Ok(None)` when no record exists for the id.
    async fn lookup_by_national_id(
        &self,
        national_id: &str,
    ) -> Result<Option<GovernmentRecord>, BackendError>;
}

/// Identity as known by the auth provider.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuthIdentity {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default, rename = "user_metadata")]
    pub metadata: serde_json::Value,
}

/// Request to create a new auth identity.
#[derive(Clone, Debug)]
pub struct NewIdentity {
    pub email: String,
    pub phone: String,
    pub password: SecretString,
    pub metadata: serde_json::Value,
}

/// Where a one-time passcode is delivered.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PasscodeTarget {
    Email(String),
    Sms(String),
}

impl PasscodeTarget {
    /// Classify a login identifier: anything containing `@` is an email.
    #[must_use]
    pub fn from_identifier(identifier: &str) -> Self {
        let identifier = identifier.trim();
        if identifier.contains('@') {
            Self::Email(identifier.to_string())
        } else {
            Self::Sms(identifier.to_string())
        }
    }

    #[must_use]
    pub fn address(&self) -> &str {
        match self {
            Self::Email(value) | Self::Sms(value) => value,
        }
    }
}

#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Fails with [`BackendError::AlreadyExists`] when the identity is already registered.
    async fn create_identity(&self, request: &NewIdentity) -> Result<AuthIdentity, BackendError>;

    async fn sign_in(&self, email: &str, password: &SecretString)
        -> Result<AuthIdentity, BackendError>;

    /// Merge `metadata` into the identity's user metadata.
    async fn update_identity(
        &self,
        identity_id: &str,
        metadata: &serde_json::Value,
    ) -> Result<(), BackendError>;

    async fn send_one_time_passcode(&self, target: &PasscodeTarget) -> Result<(), BackendError>;

    async fn verify_one_time_passcode(
        &self,
        target: &PasscodeTarget,
        code: &str,
    ) -> Result<AuthIdentity, BackendError>;

    async fn sign_out(&self) -> Result<(), BackendError>;

    async fn current_identity(&self) -> Result<Option<AuthIdentity>, BackendError>;
}

/// Application-level user record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    #[serde(alias = "id")]
    pub user_id: String,
    pub phone_number: String,
    #[serde(default)]
    pub email: Option<String>,
    pub name: String,
    pub surname: String,
    pub date_of_birth: String,
    #[serde(default)]
    pub national_id: Option<String>,
    pub status: AccountStatus,
}

/// Partial update of a [`UserRecord`].
#[derive(Clone, Debug, Default, Serialize)]
pub struct UserUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<AccountStatus>,
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Fails with [`BackendError::AlreadyExists`] when a record with the same
    /// id, phone number, email or national id exists.
    async fn create(&self, record: &UserRecord) -> Result<UserRecord, BackendError>;

    async fn get_by_id(&self, user_id: &str) -> Result<Option<UserRecord>, BackendError>;

    async fn get_by_national_id(
        &self,
        national_id: &str,
    ) -> Result<Option<UserRecord>, BackendError>;

    async fn get_by_phone_or_email(
        &self,
        phone_or_email: &str,
    ) -> Result<Option<UserRecord>, BackendError>;

    async fn update(&self, user_id: &str, update: &UserUpdate) -> Result<UserRecord, BackendError>;
}

/// One complete set of collaborators, selected at startup.
#[derive(Clone)]
pub struct Backends {
    pub storage: Arc<dyn DurableStorage>,
    pub verification: Arc<dyn VerificationProvider>,
    pub documents: Arc<dyn DocumentVerifier>,
    pub records: Arc<dyn RecordSource>,
    pub auth: Arc<dyn AuthProvider>,
    pub users: Arc<dyn UserStore>,
}

impl std::fmt::Debug for Backends {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backends").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passcode_target_classifies_identifier() {
        assert_eq!(
            PasscodeTarget::from_identifier(" ada@example.com "),
            PasscodeTarget::Email("ada@example.com".to_string())
        );
        assert_eq!(
            PasscodeTarget::from_identifier("+15550000"),
            PasscodeTarget::Sms("+15550000".to_string())
        );
        assert_eq!(PasscodeTarget::from_identifier("+15550000").address(), "+15550000");
    }

    #[test]
    fn backend_error_user_message_is_verbatim() {
        let err = BackendError::Rejected {
            status: 422,
            message: "Password should be at least 6 characters".to_string(),
        };
        assert_eq!(err.user_message(), "Password should be at least 6 characters");
        assert_eq!(
            BackendError::Transport("connection refused".to_string()).user_message(),
            "network error: connection refused"
        );
    }
}
