//! Thin client over the verification provider.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};
use url::Url;

use super::error::VerificationError;
use super::form_cache::FormCache;
use super::types::{SessionStatus, VerificationSession};
use crate::backend::{BackendError, SessionResult, VerificationProvider};

/// Query parameter carrying the session id on the return deep link.
pub const SESSION_ID_PARAM: &str = "session_id";

/// A hosted verification session the applicant still has to complete.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StartedSession {
    pub session_id: String,
    pub redirect_url: Url,
}

#[derive(Clone)]
pub struct VerificationClient {
    provider: Arc<dyn VerificationProvider>,
    cache: FormCache,
}

impl VerificationClient {
    #[must_use]
    pub fn new(provider: Arc<dyn VerificationProvider>, cache: FormCache) -> Self {
        Self { provider, cache }
    }

    /// Create a session and remember it so the flow can resume after a reload.
    ///
    /// # Errors
    /// Returns [`VerificationError::CreateSessionFailed`] when the provider
    /// rejects the request or hands back an unusable redirect.
    pub async fn start(
        &self,
        language: &str,
        return_url: &Url,
    ) -> Result<StartedSession, VerificationError> {
        let created = self
            .provider
            .create_session(language, return_url.as_str())
            .await
            .map_err(|err| VerificationError::CreateSessionFailed(err.user_message()))?;

        let session_id = created.session_id.trim().to_string();
        if session_id.is_empty() {
            return Err(VerificationError::CreateSessionFailed(
                "provider returned an empty session id".to_string(),
            ));
        }

        let redirect_url = Url::parse(&created.verification_url).map_err(|err| {
            VerificationError::CreateSessionFailed(format!("invalid verification url: {err}"))
        })?;

        self.cache.remember_session(&session_id).await;
        info!(%session_id, "verification session created");

        Ok(StartedSession {
            session_id,
            redirect_url,
        })
    }

    /// Fetch the current decision for a session. Fields are only kept when approved.
    ///
    /// A session the provider no longer knows is reported as expired.
    ///
    /// # Errors
    /// Returns [`VerificationError::ResultFetchFailed`] on transport or decode failures.
    pub async fn fetch_result(
        &self,
        session_id: &str,
    ) -> Result<VerificationSession, VerificationError> {
        let result = match self.provider.get_session_result(session_id).await {
            Ok(result) => result,
            Err(BackendError::NotFound) => {
                warn!(%session_id, "verification session unknown to the provider");
                SessionResult {
                    status: SessionStatus::Expired,
                    verified_fields: None,
                    created_at: None,
                }
            }
            Err(err) => return Err(VerificationError::ResultFetchFailed(err.user_message())),
        };

        debug!(%session_id, status = ?result.status, "verification result fetched");

        let verified_fields = if result.status == SessionStatus::Approved {
            result.verified_fields
        } else {
            None
        };

        Ok(VerificationSession {
            session_id: session_id.to_string(),
            created_at: result.created_at.unwrap_or_else(Utc::now),
            status: result.status,
            verified_fields,
        })
    }
}

/// Extract the session id carried by a return deep link, if any.
#[must_use]
pub fn session_id_from_callback(callback: &Url) -> Option<String> {
    callback
        .query_pairs()
        .find(|(key, _)| key == SESSION_ID_PARAM)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

impl std::fmt::Debug for VerificationClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerificationClient").finish_non_exhaustive()
    }
}
