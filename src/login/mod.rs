//! Passcode login for registered voters and the persisted login session.

pub mod otp;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::backend::{AuthProvider, BackendError, Backends, DurableStorage, PasscodeTarget, UserRecord, UserStore};
use crate::registration::error::ErrorKind;
use otp::{PasscodeAuthority, CODE_LENGTH};

/// Storage key of the persisted login session.
pub const SESSION_KEY: &str = "sovs.session";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LoginError {
    #[error("Please enter your phone number or email")]
    IdentifierRequired,
    #[error("No account found with this phone number or email")]
    NoAccountFound,
    #[error("Please wait {seconds} seconds before requesting a new code")]
    ResendCooldown { seconds: u64 },
    #[error("Please enter the 6-digit code")]
    InvalidCodeFormat,
    #[error("No verification code has been requested")]
    NoPendingPasscode,
    #[error("{0}")]
    Passcode(String),
    #[error("{0}")]
    Backend(String),
}

impl LoginError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::IdentifierRequired
            | Self::ResendCooldown { .. }
            | Self::InvalidCodeFormat
            | Self::NoPendingPasscode => ErrorKind::Validation,
            Self::NoAccountFound | Self::Passcode(_) => ErrorKind::RecoverableExternal,
            Self::Backend(_) => ErrorKind::FatalExternal,
        }
    }
}

/// Signed-in voter.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginSession {
    pub user: UserRecord,
    pub logged_in_at: DateTime<Utc>,
}

struct PendingLogin {
    target: PasscodeTarget,
    user: UserRecord,
    sent_at: Instant,
}

pub struct LoginFlow {
    users: Arc<dyn UserStore>,
    auth: Arc<dyn AuthProvider>,
    storage: Arc<dyn DurableStorage>,
    passcodes: Arc<dyn PasscodeAuthority>,
    resend_cooldown: Duration,
    pending: Option<PendingLogin>,
}

impl LoginFlow {
    #[must_use]
    pub fn new(
        backends: &Backends,
        passcodes: Arc<dyn PasscodeAuthority>,
        resend_cooldown: Duration,
    ) -> Self {
        Self {
            users: backends.users.clone(),
            auth: backends.auth.clone(),
            storage: backends.storage.clone(),
            passcodes,
            resend_cooldown,
            pending: None,
        }
    }

    /// Send a passcode to a registered phone number or email.
    ///
    /// # Errors
    /// Fails when the identifier is blank, unknown, still in its resend
    /// cooldown, or the passcode cannot be sent.
    pub async fn request_passcode(&mut self, identifier: &str) -> Result<PasscodeTarget, LoginError> {
        let identifier = identifier.trim();
        if identifier.is_empty() {
            return Err(LoginError::IdentifierRequired);
        }

        let target = PasscodeTarget::from_identifier(identifier);
        if let Some(pending) = &self.pending {
            let elapsed = pending.sent_at.elapsed();
            if pending.target == target && elapsed < self.resend_cooldown {
                let remaining = self.resend_cooldown - elapsed;
                return Err(LoginError::ResendCooldown {
                    seconds: remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0),
                });
            }
        }

        let user = match self.users.get_by_phone_or_email(identifier).await {
            Ok(Some(user)) => user,
            Ok(None) | Err(BackendError::NotFound) => return Err(LoginError::NoAccountFound),
            Err(err) => return Err(LoginError::Backend(err.user_message())),
        };

        self.passcodes.send(&target).await?;
        debug!(user_id = %user.user_id, "passcode sent");

        self.pending = Some(PendingLogin {
            target: target.clone(),
            user,
            sent_at: Instant::now(),
        });
        Ok(target)
    }

    /// Check the passcode and persist the login session.
    ///
    /// # Errors
    /// Fails when the code is malformed, no passcode was requested, or the
    /// authority rejects it.
    pub async fn verify_passcode(&mut self, code: &str) -> Result<LoginSession, LoginError> {
        let code = code.trim();
        if code.len() != CODE_LENGTH || !code.chars().all(|c| c.is_ascii_digit()) {
            return Err(LoginError::InvalidCodeFormat);
        }

        let pending = self.pending.as_ref().ok_or(LoginError::NoPendingPasscode)?;
        self.passcodes.verify(&pending.target, code).await?;

        let session = LoginSession {
            user: pending.user.clone(),
            logged_in_at: Utc::now(),
        };
        self.pending = None;

        match serde_json::to_string(&session) {
            Ok(encoded) => {
                if let Err(err) = self.storage.set(SESSION_KEY, &encoded).await {
                    warn!("Failed to persist login session: {err}");
                }
            }
            Err(err) => warn!("Failed to encode login session: {err}"),
        }

        info!(user_id = %session.user.user_id, "voter logged in");
        Ok(session)
    }

    /// Session persisted by a previous login, if any.
    pub async fn current_session(&self) -> Option<LoginSession> {
        let raw = match self.storage.get(SESSION_KEY).await {
            Ok(raw) => raw?,
            Err(err) => {
                warn!("Failed to read login session: {err}");
                return None;
            }
        };

        serde_json::from_str(&raw)
            .map_err(|err| warn!("Discarding unreadable login session: {err}"))
            .ok()
    }

    pub async fn sign_out(&mut self) {
        self.pending = None;
        if let Err(err) = self.auth.sign_out().await {
            warn!("Auth provider sign out failed: {err}");
        }
        if let Err(err) = self.storage.remove(SESSION_KEY).await {
            warn!("Failed to remove login session: {err}");
        }
        info!("voter signed out");
    }
}

impl std::fmt::Debug for LoginFlow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginFlow")
            .field("resend_cooldown", &self.resend_cooldown)
            .field("pending", &self.pending.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::otp::{LocalPasscodes, MemoryOtpStore, ProviderPasscodes};
    use super::*;
    use crate::backend::memory::InMemoryBackends;
    use anyhow::{Context, Result};

    const COOLDOWN: Duration = Duration::from_secs(60);

    async fn local_flow() -> Result<(
        InMemoryBackends,
        LoginFlow,
        tokio::sync::mpsc::UnboundedReceiver<otp::Delivery>,
    )> {
        let fakes = InMemoryBackends::new().with_demo_voter().await?;
        let (passcodes, deliveries) = LocalPasscodes::new(Arc::new(MemoryOtpStore::new()));
        let flow = LoginFlow::new(&fakes.backends(), Arc::new(passcodes), COOLDOWN);
        Ok((fakes, flow, deliveries))
    }

    #[tokio::test(start_paused = true)]
    async fn passcode_login_persists_session() -> Result<()> {
        let (fakes, mut flow, mut deliveries) = local_flow().await?;

        let target = flow.request_passcode(" +1987654321 ").await?;
        assert_eq!(target, PasscodeTarget::Sms("+1987654321".to_string()));
        let code = deliveries.recv().await.context("no delivery")?.code;

        let session = flow.verify_passcode(&code).await?;
        assert_eq!(session.user.name, "Jane");
        assert!(fakes.storage.value(SESSION_KEY).is_some());
        assert_eq!(flow.current_session().await, Some(session));

        flow.sign_out().await;
        assert!(flow.current_session().await.is_none());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_identifier_has_no_account() -> Result<()> {
        let (_fakes, mut flow, _deliveries) = local_flow().await?;
        assert_eq!(
            flow.request_passcode("nobody@example.com").await,
            Err(LoginError::NoAccountFound)
        );
        assert_eq!(flow.request_passcode("   ").await, Err(LoginError::IdentifierRequired));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn resend_waits_for_cooldown() -> Result<()> {
        let (_fakes, mut flow, _deliveries) = local_flow().await?;
        flow.request_passcode("+1987654321").await?;

        tokio::time::sleep(Duration::from_secs(45)).await;
        assert_eq!(
            flow.request_passcode("+1987654321").await,
            Err(LoginError::ResendCooldown { seconds: 15 })
        );

        tokio::time::sleep(Duration::from_secs(15)).await;
        assert!(flow.request_passcode("+1987654321").await.is_ok());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn code_format_is_checked_first() -> Result<()> {
        let (_fakes, mut flow, _deliveries) = local_flow().await?;
        assert_eq!(flow.verify_passcode("12345").await, Err(LoginError::InvalidCodeFormat));
        assert_eq!(flow.verify_passcode("12a456").await, Err(LoginError::InvalidCodeFormat));
        assert_eq!(flow.verify_passcode("123456").await, Err(LoginError::NoPendingPasscode));
        assert_eq!(LoginError::InvalidCodeFormat.kind(), ErrorKind::Validation);
        Ok(())
    }

    #[tokio::test]
    async fn provider_passcodes_use_auth_provider() -> Result<()> {
        let fakes = InMemoryBackends::new().with_demo_voter().await?;
        let passcodes = ProviderPasscodes::new(fakes.auth.clone());
        let mut flow = LoginFlow::new(&fakes.backends(), Arc::new(passcodes), COOLDOWN);

        let target = flow.request_passcode("jane.smith@sovs.local").await?;
        assert!(matches!(target, PasscodeTarget::Email(_)));

        assert!(matches!(
            flow.verify_passcode("000000").await,
            Err(LoginError::Passcode(_))
        ));
        let code = fakes.auth.last_passcode(&target).context("no passcode")?;
        let session = flow.verify_passcode(&code).await?;
        assert_eq!(session.user.phone_number, "+1987654321");
        Ok(())
    }
}
