//! Resumable voter registration.
//!
//! Components, leaf to root:
//!
//! - [`form_cache`]: debounced persistence of in-progress drafts.
//! - [`verification`]: client for the identity-verification provider.
//! - [`reconciler`]: resumes and polls verification sessions.
//! - [`capture`]: on-device document capture and registry lookup.
//! - [`provisioner`]: idempotent account creation.
//! - [`orchestrator`]: the state machine tying the above together.

pub mod capture;
pub mod config;
pub mod error;
pub mod form_cache;
pub mod orchestrator;
pub mod provisioner;
pub mod reconciler;
pub mod types;
pub mod validation;
pub mod verification;

pub use config::RegistrationConfig;
pub use error::{ErrorKind, FlowError, ProvisionError, ValidationError, VerificationError};
pub use form_cache::FormCache;
pub use orchestrator::{IdentitySource, RegistrationFlow, RegistrationState, ScreenHost, Stage};
pub use provisioner::AccountProvisioner;
pub use reconciler::{CallbackReconciler, PollHandle, ReconcilerEvent};
pub use types::{ProvisionedAccount, VerifiedIdentity};
pub use verification::{StartedSession, VerificationClient};
