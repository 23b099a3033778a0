//! On-device identity capture as an alternative to the hosted redirect.
//!
//! The document verifier reads the document number from the captured images;
//! the government registry then fills in whatever the document did not yield.

use std::sync::Arc;

use tracing::{info, instrument, warn};
use ulid::Ulid;

use super::error::{FlowError, ProvisionError, VerificationError};
use super::types::VerifiedIdentity;
use crate::backend::{BackendError, DocumentCapture, DocumentVerifier, RecordSource};

/// Prefix of session ids minted for locally captured identities.
pub const LOCAL_SESSION_PREFIX: &str = "local-";

#[derive(Clone)]
pub struct IdentityCapture {
    documents: Arc<dyn DocumentVerifier>,
    records: Arc<dyn RecordSource>,
}

impl IdentityCapture {
    #[must_use]
    pub fn new(documents: Arc<dyn DocumentVerifier>, records: Arc<dyn RecordSource>) -> Self {
        Self { documents, records }
    }

    /// # Errors
    /// - [`VerificationError::CaptureFailed`] when the document cannot be read.
    /// - [`VerificationError::IncompleteIdentity`] when no document number was found.
    /// - [`ProvisionError::NationalIdNotFound`] when the registry has no record.
    /// - [`ProvisionError::Unavailable`] when the registry cannot be reached.
    #[instrument(skip_all)]
    pub async fn capture(&self, capture: &DocumentCapture) -> Result<VerifiedIdentity, FlowError> {
        if capture.front_image.is_empty() {
            return Err(VerificationError::CaptureFailed("document image is empty".to_string()).into());
        }

        let check = self
            .documents
            .verify_document(capture)
            .await
            .map_err(|err| VerificationError::CaptureFailed(err.user_message()))?;

        let document_number = check.document_number.trim().to_string();
        if document_number.is_empty() {
            return Err(VerificationError::IncompleteIdentity.into());
        }

        let record = match self.records.lookup_by_national_id(&document_number).await {
            Ok(Some(record)) => record,
            Ok(None) | Err(BackendError::NotFound) => {
                warn!("captured document not found in registry");
                return Err(ProvisionError::NationalIdNotFound.into());
            }
            Err(err) => return Err(ProvisionError::Unavailable(err.user_message()).into()),
        };

        let pick = |extracted: Option<String>, official: String| {
            extracted
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or(official)
        };

        let session_id = format!("{LOCAL_SESSION_PREFIX}{}", Ulid::new().to_string().to_lowercase());
        info!(%session_id, "identity captured locally");

        Ok(VerifiedIdentity {
            session_id,
            first_name: pick(check.first_name, record.name),
            last_name: pick(check.last_name, record.surname),
            date_of_birth: pick(check.date_of_birth, record.date_of_birth),
            document_number,
        })
    }
}

impl std::fmt::Debug for IdentityCapture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityCapture").finish_non_exhaustive()
    }
}
