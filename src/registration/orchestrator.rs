//! Registration state machine.
//!
//! ```text
//! CapturingIdentity ──start/capture──▶ AwaitingVerification ──approved──▶ ConfirmingDetails
//!        ▲                                     │ declined/expired                 │ confirm
//!        └─────────────────────────────────────┘                                  ▼
//!                                   Completed ◀──ok── Provisioning ◀──submit── SettingCredentials
//! ```
//!
//! Local capture skips `AwaitingVerification` and goes straight to
//! `ConfirmingDetails`. Validation failures leave the state untouched;
//! provisioning failures route back to the step that can fix them.

use std::fmt;

use async_trait::async_trait;
use secrecy::SecretString;
use tracing::{debug, info, warn};
use url::Url;

use super::capture::IdentityCapture;
use super::config::RegistrationConfig;
use super::error::{FlowError, ProvisionError, VerificationError};
use super::form_cache::FormCache;
use super::provisioner::AccountProvisioner;
use super::reconciler::{CallbackReconciler, PollHandle, ReconcilerEvent};
use super::types::{
    ContactInfo, Credentials, DraftPatch, ProvisionedAccount, RegistrationDraft, VerifiedIdentity,
};
use super::validation::{require_national_id, validate_contact, validate_password};
use super::verification::{StartedSession, VerificationClient};
use crate::backend::{Backends, DocumentCapture};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    CapturingIdentity,
    AwaitingVerification,
    ConfirmingDetails,
    SettingCredentials,
    Provisioning,
    Completed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stage = match self {
            Self::CapturingIdentity => "capturing identity",
            Self::AwaitingVerification => "awaiting verification",
            Self::ConfirmingDetails => "confirming details",
            Self::SettingCredentials => "setting credentials",
            Self::Provisioning => "provisioning",
            Self::Completed => "completed",
        };
        f.write_str(stage)
    }
}

#[derive(Clone, Debug)]
pub enum RegistrationState {
    CapturingIdentity,
    AwaitingVerification {
        session_id: String,
    },
    ConfirmingDetails {
        identity: VerifiedIdentity,
    },
    SettingCredentials {
        identity: VerifiedIdentity,
        contact: ContactInfo,
    },
    Provisioning {
        identity: VerifiedIdentity,
        contact: ContactInfo,
    },
    Completed {
        account: ProvisionedAccount,
    },
}

impl RegistrationState {
    #[must_use]
    pub fn stage(&self) -> Stage {
        match self {
            Self::CapturingIdentity => Stage::CapturingIdentity,
            Self::AwaitingVerification { .. } => Stage::AwaitingVerification,
            Self::ConfirmingDetails { .. } => Stage::ConfirmingDetails,
            Self::SettingCredentials { .. } => Stage::SettingCredentials,
            Self::Provisioning { .. } => Stage::Provisioning,
            Self::Completed { .. } => Stage::Completed,
        }
    }

    /// Verification session the current state belongs to.
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        match self {
            Self::CapturingIdentity | Self::Completed { .. } => None,
            Self::AwaitingVerification { session_id } => Some(session_id),
            Self::ConfirmingDetails { identity }
            | Self::SettingCredentials { identity, .. }
            | Self::Provisioning { identity, .. } => Some(&identity.session_id),
        }
    }
}

/// How the applicant proves their identity.
#[derive(Clone, Debug)]
pub enum IdentitySource {
    /// Hosted verification; the provider redirects to `return_url` when done.
    Redirect { language: String, return_url: Url },
    /// Document captured on the device.
    Document(DocumentCapture),
}

/// Supplies input to the flow and displays its results.
///
/// Returning `None` from an input method means the applicant backed out.
#[async_trait]
pub trait ScreenHost: Send {
    async fn identity_source(&mut self) -> Option<IdentitySource>;

    async fn open_verification(&mut self, session: &StartedSession);

    async fn contact_details(
        &mut self,
        identity: &VerifiedIdentity,
        draft: Option<&RegistrationDraft>,
    ) -> Option<(String, String)>;

    async fn credentials(&mut self) -> Option<(SecretString, SecretString)>;

    async fn show_error(&mut self, error: &FlowError);

    async fn completed(&mut self, account: &ProvisionedAccount);
}

pub struct RegistrationFlow {
    config: RegistrationConfig,
    cache: FormCache,
    client: VerificationClient,
    reconciler: CallbackReconciler,
    capture: IdentityCapture,
    provisioner: AccountProvisioner,
    state: RegistrationState,
    poll: Option<PollHandle>,
}

impl RegistrationFlow {
    #[must_use]
    pub fn new(backends: &Backends, config: RegistrationConfig) -> Self {
        let cache = FormCache::new(backends.storage.clone(), config.debounce());
        let client = VerificationClient::new(backends.verification.clone(), cache.clone());
        let reconciler =
            CallbackReconciler::new(client.clone(), cache.clone(), config.poll_interval());
        let capture = IdentityCapture::new(backends.documents.clone(), backends.records.clone());
        let provisioner = AccountProvisioner::new(
            backends.records.clone(),
            backends.auth.clone(),
            backends.users.clone(),
            config.placeholder_email_domain(),
        );

        Self {
            config,
            cache,
            client,
            reconciler,
            capture,
            provisioner,
            state: RegistrationState::CapturingIdentity,
            poll: None,
        }
    }

    #[must_use]
    pub fn state(&self) -> &RegistrationState {
        &self.state
    }

    #[must_use]
    pub fn stage(&self) -> Stage {
        self.state.stage()
    }

    #[must_use]
    pub fn config(&self) -> &RegistrationConfig {
        &self.config
    }

    fn invalid(&self, action: &'static str) -> FlowError {
        FlowError::InvalidTransition {
            stage: self.stage(),
            action,
        }
    }

    fn stop_polling(&mut self) {
        if let Some(poll) = self.poll.take() {
            poll.cancel();
        }
    }

    /// Pick up a verification left in progress, from the callback or the session slot.
    ///
    /// Returns the resumed session id, if any.
    ///
    /// # Errors
    /// Fails when called outside `CapturingIdentity`.
    pub async fn resume(&mut self, callback: Option<&Url>) -> Result<Option<String>, FlowError> {
        if self.stage() != Stage::CapturingIdentity {
            return Err(self.invalid("resume verification"));
        }

        let Some(poll) = self.reconciler.mount(callback).await else {
            return Ok(None);
        };

        let session_id = poll.session_id().to_string();
        info!(%session_id, "resuming verification");
        self.poll = Some(poll);
        self.state = RegistrationState::AwaitingVerification {
            session_id: session_id.clone(),
        };
        Ok(Some(session_id))
    }

    /// Start a hosted verification session and begin polling it.
    ///
    /// # Errors
    /// Fails outside `CapturingIdentity` or when the session cannot be created.
    pub async fn start_verification(
        &mut self,
        language: &str,
        return_url: &Url,
    ) -> Result<StartedSession, FlowError> {
        if self.stage() != Stage::CapturingIdentity {
            return Err(self.invalid("start verification"));
        }

        let started = self.client.start(language, return_url).await?;
        self.stop_polling();
        self.poll = Some(self.reconciler.spawn(started.session_id.clone()));
        self.state = RegistrationState::AwaitingVerification {
            session_id: started.session_id.clone(),
        };
        Ok(started)
    }

    /// Verify a captured document locally and move on to the contact details.
    ///
    /// # Errors
    /// Fails outside `CapturingIdentity` or when capture or the registry lookup fails.
    pub async fn capture_identity(&mut self, capture: &DocumentCapture) -> Result<(), FlowError> {
        if self.stage() != Stage::CapturingIdentity {
            return Err(self.invalid("capture identity"));
        }

        let identity = self.capture.capture(capture).await?;
        self.enter_confirming(identity).await;
        Ok(())
    }

    /// Wait for the reconciler's terminal event for the session being awaited.
    pub async fn next_verification_event(&mut self) -> Option<ReconcilerEvent> {
        match self.poll.as_mut() {
            Some(poll) => poll.next_event().await,
            None => None,
        }
    }

    /// Apply a reconciler outcome.
    ///
    /// # Errors
    /// A rejection is returned as the matching [`VerificationError`] after the
    /// flow has been reset to `CapturingIdentity`.
    pub async fn apply_verification(&mut self, event: ReconcilerEvent) -> Result<(), FlowError> {
        let RegistrationState::AwaitingVerification { session_id } = &self.state else {
            return Err(self.invalid("apply verification result"));
        };
        if event.session_id() != session_id {
            return Err(FlowError::SessionMismatch(event.session_id().to_string()));
        }

        self.stop_polling();
        match event {
            ReconcilerEvent::Approved { identity, .. } => {
                self.enter_confirming(identity).await;
                Ok(())
            }
            ReconcilerEvent::Rejected { reason, .. } => {
                self.cache.forget_session().await;
                self.state = RegistrationState::CapturingIdentity;
                Err(VerificationError::from(reason).into())
            }
        }
    }

    async fn enter_confirming(&mut self, identity: VerifiedIdentity) {
        self.cache
            .save(&identity.session_id, DraftPatch::default())
            .await;
        debug!(session_id = %identity.session_id, "confirming details");
        self.state = RegistrationState::ConfirmingDetails { identity };
    }

    /// Stage a contact edit without validating it.
    ///
    /// # Errors
    /// Fails outside `ConfirmingDetails`.
    pub async fn stage_contact(&self, phone_number: &str, email: &str) -> Result<(), FlowError> {
        let RegistrationState::ConfirmingDetails { identity } = &self.state else {
            return Err(self.invalid("edit contact details"));
        };
        self.cache
            .save(&identity.session_id, DraftPatch::contact(phone_number, email))
            .await;
        Ok(())
    }

    /// Validate and confirm the contact details.
    ///
    /// # Errors
    /// Validation errors leave the flow in `ConfirmingDetails`.
    pub async fn confirm_details(
        &mut self,
        phone_number: &str,
        email: &str,
    ) -> Result<ContactInfo, FlowError> {
        let RegistrationState::ConfirmingDetails { identity } = &self.state else {
            return Err(self.invalid("confirm details"));
        };

        let contact = validate_contact(phone_number, email)?;
        self.cache
            .save(
                &identity.session_id,
                DraftPatch::contact(&contact.phone_number, contact.email.as_deref().unwrap_or("")),
            )
            .await;

        self.state = RegistrationState::SettingCredentials {
            identity: identity.clone(),
            contact: contact.clone(),
        };
        Ok(contact)
    }

    /// Go back from the password step to edit the contact details.
    ///
    /// # Errors
    /// Fails outside `SettingCredentials`.
    pub fn edit_details(&mut self) -> Result<(), FlowError> {
        let RegistrationState::SettingCredentials { identity, .. } = &self.state else {
            return Err(self.invalid("edit details"));
        };
        self.state = RegistrationState::ConfirmingDetails {
            identity: identity.clone(),
        };
        Ok(())
    }

    /// Validate the password and provision the account.
    ///
    /// # Errors
    /// - Validation errors leave the flow in `SettingCredentials`.
    /// - A missing or unknown national id resets the flow to `CapturingIdentity`.
    /// - A duplicate account routes back to `ConfirmingDetails`.
    /// - Other provisioning failures stay in `SettingCredentials` for a retry.
    pub async fn submit_credentials(
        &mut self,
        password: SecretString,
        confirmation: SecretString,
    ) -> Result<ProvisionedAccount, FlowError> {
        let RegistrationState::SettingCredentials { identity, contact } = &self.state else {
            return Err(self.invalid("submit credentials"));
        };
        let identity = identity.clone();
        let contact = contact.clone();

        validate_password(&password, &confirmation, self.config.min_password_length())?;
        if let Err(err) = require_national_id(&identity) {
            self.restart_session(&identity.session_id).await;
            return Err(err.into());
        }

        self.cache
            .save(
                &identity.session_id,
                DraftPatch {
                    password: Some(password.clone()),
                    ..DraftPatch::default()
                },
            )
            .await;

        self.state = RegistrationState::Provisioning {
            identity: identity.clone(),
            contact: contact.clone(),
        };

        let credentials = Credentials { password };
        match self
            .provisioner
            .provision(&identity, &contact, &credentials)
            .await
        {
            Ok(account) => {
                self.cache.clear(&identity.session_id).await;
                self.cache.forget_session().await;
                info!(account_id = %account.account_id, "registration completed");
                self.state = RegistrationState::Completed {
                    account: account.clone(),
                };
                Ok(account)
            }
            Err(err) => {
                warn!("Provisioning failed: {err}");
                match &err {
                    ProvisionError::NationalIdNotFound => {
                        self.restart_session(&identity.session_id).await;
                    }
                    ProvisionError::DuplicateAccount(_) => {
                        self.state = RegistrationState::ConfirmingDetails { identity };
                    }
                    ProvisionError::AuthProviderError(_)
                    | ProvisionError::RecordCreationFailed(_)
                    | ProvisionError::Unavailable(_) => {
                        self.state = RegistrationState::SettingCredentials { identity, contact };
                    }
                }
                Err(err.into())
            }
        }
    }

    async fn restart_session(&mut self, session_id: &str) {
        self.cache.clear(session_id).await;
        self.cache.forget_session().await;
        self.state = RegistrationState::CapturingIdentity;
    }

    /// Abandon the registration: drop the draft and the remembered session.
    pub async fn cancel(&mut self) {
        self.stop_polling();
        if let Some(session_id) = self.state.session_id().map(str::to_string) {
            self.cache.clear(&session_id).await;
        }
        self.cache.forget_session().await;
        self.state = RegistrationState::CapturingIdentity;
        info!("registration cancelled");
    }

    /// Draft staged for the current session, if any.
    pub async fn load_draft(&self) -> Option<RegistrationDraft> {
        let session_id = self.state.session_id()?;
        self.cache.load(session_id).await
    }

    /// Drive `host` through the flow until an account exists or the applicant gives up.
    ///
    /// # Errors
    /// Returns [`FlowError::Cancelled`] when the host backs out.
    pub async fn run<H: ScreenHost + ?Sized>(
        &mut self,
        host: &mut H,
        callback: Option<&Url>,
    ) -> Result<ProvisionedAccount, FlowError> {
        if self.stage() == Stage::CapturingIdentity {
            self.resume(callback).await?;
        }

        loop {
            match self.state.clone() {
                RegistrationState::CapturingIdentity => {
                    let Some(source) = host.identity_source().await else {
                        self.cancel().await;
                        return Err(FlowError::Cancelled);
                    };
                    let result = match source {
                        IdentitySource::Redirect {
                            language,
                            return_url,
                        } => match self.start_verification(&language, &return_url).await {
                            Ok(started) => {
                                host.open_verification(&started).await;
                                Ok(())
                            }
                            Err(err) => Err(err),
                        },
                        IdentitySource::Document(capture) => self.capture_identity(&capture).await,
                    };
                    if let Err(err) = result {
                        host.show_error(&err).await;
                    }
                }
                RegistrationState::AwaitingVerification { session_id } => {
                    match self.next_verification_event().await {
                        Some(event) => {
                            if let Err(err) = self.apply_verification(event).await {
                                host.show_error(&err).await;
                            }
                        }
                        None => {
                            warn!(%session_id, "verification polling ended without a result");
                            self.stop_polling();
                            self.restart_session(&session_id).await;
                        }
                    }
                }
                RegistrationState::ConfirmingDetails { identity } => {
                    let draft = self.load_draft().await;
                    let Some((phone_number, email)) =
                        host.contact_details(&identity, draft.as_ref()).await
                    else {
                        self.cancel().await;
                        return Err(FlowError::Cancelled);
                    };
                    if let Err(err) = self.confirm_details(&phone_number, &email).await {
                        self.stage_contact(&phone_number, &email).await?;
                        host.show_error(&err).await;
                    }
                }
                RegistrationState::SettingCredentials { .. } => {
                    let Some((password, confirmation)) = host.credentials().await else {
                        self.edit_details()?;
                        continue;
                    };
                    match self.submit_credentials(password, confirmation).await {
                        Ok(account) => {
                            host.completed(&account).await;
                            return Ok(account);
                        }
                        Err(err) => host.show_error(&err).await,
                    }
                }
                RegistrationState::Provisioning { .. } => {
                    return Err(self.invalid("resume provisioning"));
                }
                RegistrationState::Completed { account } => return Ok(account),
            }
        }
    }
}

impl fmt::Debug for RegistrationFlow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistrationFlow")
            .field("stage", &self.stage())
            .finish_non_exhaustive()
    }
}
