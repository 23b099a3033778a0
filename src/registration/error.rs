use thiserror::Error;

use super::orchestrator::Stage;

/// How a failure should be presented and recovered from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// User-correctable input; shown inline, state unchanged.
    Validation,
    /// Routes back to an earlier step with staged input preserved.
    RecoverableExternal,
    /// Collaborator or transport failure; surfaced with a retry affordance.
    FatalExternal,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Phone number is required")]
    PhoneRequired,
    #[error("Please enter a valid email address")]
    InvalidEmail,
    #[error("Password is required")]
    PasswordRequired,
    #[error("Password must be at least {min} characters long")]
    PasswordTooShort { min: usize },
    #[error("Passwords do not match")]
    PasswordMismatch,
    #[error("National id (document number) is required. Please restart verification.")]
    NationalIdMissing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    Declined,
    Expired,
    IncompleteIdentity,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VerificationError {
    #[error("Failed to create verification session: {0}")]
    CreateSessionFailed(String),
    #[error("Failed to retrieve session results: {0}")]
    ResultFetchFailed(String),
    #[error("Your identity verification was declined. Please ensure your ID is valid and try again.")]
    Declined,
    #[error("Your verification session expired. Please start again.")]
    Expired,
    #[error("Could not extract required information from the verification. Please try again.")]
    IncompleteIdentity,
    #[error("Verification failed: {0}")]
    CaptureFailed(String),
}

impl From<RejectReason> for VerificationError {
    fn from(reason: RejectReason) -> Self {
        match reason {
            RejectReason::Declined => Self::Declined,
            RejectReason::Expired => Self::Expired,
            RejectReason::IncompleteIdentity => Self::IncompleteIdentity,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProvisionError {
    #[error("National id was not found in the government registry. Please restart verification.")]
    NationalIdNotFound,
    #[error("{0}")]
    AuthProviderError(String),
    #[error("An account with this phone number or email already exists: {0}")]
    DuplicateAccount(String),
    #[error("Failed to create user record: {0}")]
    RecordCreationFailed(String),
    #[error("Registry is unavailable: {0}")]
    Unavailable(String),
}

impl ProvisionError {
    /// Whether the verified identity itself must be redone.
    #[must_use]
    pub fn restarts_session(&self) -> bool {
        matches!(self, Self::NationalIdNotFound)
    }
}

/// Error surfaced to the screen host by the orchestrator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FlowError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Verification(#[from] VerificationError),
    #[error(transparent)]
    Provision(#[from] ProvisionError),
    #[error("cannot {action} while {stage}")]
    InvalidTransition { stage: Stage, action: &'static str },
    #[error("verification session {0} does not belong to this registration")]
    SessionMismatch(String),
    #[error("registration cancelled")]
    Cancelled,
}

impl FlowError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(ValidationError::NationalIdMissing) => ErrorKind::RecoverableExternal,
            Self::Validation(_) | Self::InvalidTransition { .. } | Self::Cancelled => {
                ErrorKind::Validation
            }
            Self::Verification(
                VerificationError::CreateSessionFailed(_) | VerificationError::ResultFetchFailed(_),
            )
            | Self::Provision(
                ProvisionError::AuthProviderError(_)
                | ProvisionError::RecordCreationFailed(_)
                | ProvisionError::Unavailable(_),
            ) => ErrorKind::FatalExternal,
            Self::Verification(_) | Self::Provision(_) | Self::SessionMismatch(_) => {
                ErrorKind::RecoverableExternal
            }
        }
    }
}
