//! Data carried through the registration flow.

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

/// Lifecycle of a verification session at the provider.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    Created,
    Pending,
    Approved,
    Declined,
    Expired,
}

impl SessionStatus {
    /// Map the provider's textual decision onto a status.
    ///
    /// Unknown values are treated as still pending so polling continues.
    #[must_use]
    pub fn from_provider(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "approved" => Self::Approved,
            "declined" => Self::Declined,
            "expired" | "abandoned" => Self::Expired,
            "not started" | "not_started" | "created" => Self::Created,
            _ => Self::Pending,
        }
    }

    /// No further polling is needed once a session reaches one of these.
    #[must_use]
    pub fn is_final(self) -> bool {
        matches!(self, Self::Approved | Self::Declined | Self::Expired)
    }
}

/// Identity fields extracted by the verification provider.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiedFields {
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub date_of_birth: Option<String>,
    #[serde(default)]
    pub document_number: Option<String>,
}

impl VerifiedFields {
    /// Returns the complete identity, or `None` when any field is missing or blank.
    #[must_use]
    pub fn complete(&self, session_id: &str) -> Option<VerifiedIdentity> {
        let present = |value: &Option<String>| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };

        Some(VerifiedIdentity {
            session_id: session_id.to_string(),
            first_name: present(&self.first_name)?,
            last_name: present(&self.last_name)?,
            date_of_birth: present(&self.date_of_birth)?,
            document_number: present(&self.document_number)?,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerificationSession {
    pub session_id: String,
    /// Provider-reported creation time; the fetch time when it reports none.
    pub created_at: DateTime<Utc>,
    pub status: SessionStatus,
    /// Only present when `status` is [`SessionStatus::Approved`].
    pub verified_fields: Option<VerifiedFields>,
}

/// Verified identity handed from verification to provisioning.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiedIdentity {
    pub session_id: String,
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: String,
    pub document_number: String,
}

/// Contact details confirmed by the applicant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContactInfo {
    pub phone_number: String,
    pub email: Option<String>,
}

/// Password chosen by the applicant. Never logged or persisted.
#[derive(Clone)]
pub struct Credentials {
    pub password: SecretString,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("password", &"***")
            .finish()
    }
}

/// Locally staged, not yet submitted registration fields.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegistrationDraft {
    pub session_id: String,
    #[serde(default)]
    pub phone_number: String,
    #[serde(default)]
    pub email: Option<String>,
    /// Staged in memory only.
    #[serde(skip)]
    pub password: Option<SecretString>,
    pub updated_at: DateTime<Utc>,
}

impl RegistrationDraft {
    #[must_use]
    pub fn new(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            phone_number: String::new(),
            email: None,
            password: None,
            updated_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.phone_number.is_empty() && self.email.is_none() && self.password.is_none()
    }

    /// Merge the fields present in `patch`, leaving the others untouched.
    pub fn apply(&mut self, patch: DraftPatch) {
        if let Some(phone_number) = patch.phone_number {
            self.phone_number = phone_number;
        }
        if let Some(email) = patch.email {
            let email = email.trim().to_string();
            self.email = if email.is_empty() { None } else { Some(email) };
        }
        if let Some(password) = patch.password {
            self.password = Some(password);
        }
        self.updated_at = Utc::now();
    }
}

/// Field edits to merge into a [`RegistrationDraft`].
#[derive(Clone, Default)]
pub struct DraftPatch {
    pub phone_number: Option<String>,
    /// An empty string clears the stored email.
    pub email: Option<String>,
    pub password: Option<SecretString>,
}

impl DraftPatch {
    #[must_use]
    pub fn contact(phone_number: &str, email: &str) -> Self {
        Self {
            phone_number: Some(phone_number.to_string()),
            email: Some(email.to_string()),
            password: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Pending,
    Verified,
    Suspended,
}

/// Durable account spanning the auth identity and the application user record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProvisionedAccount {
    pub account_id: String,
    pub phone_number: String,
    pub email: Option<String>,
    pub name: String,
    pub surname: String,
    pub date_of_birth: String,
    pub national_id: String,
    pub status: AccountStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_status_maps_provider_values() {
        assert_eq!(SessionStatus::from_provider("Approved"), SessionStatus::Approved);
        assert_eq!(SessionStatus::from_provider("DECLINED"), SessionStatus::Declined);
        assert_eq!(SessionStatus::from_provider("Abandoned"), SessionStatus::Expired);
        assert_eq!(SessionStatus::from_provider("Not Started"), SessionStatus::Created);
        assert_eq!(SessionStatus::from_provider("In Review"), SessionStatus::Pending);
        assert!(!SessionStatus::Pending.is_final());
        assert!(SessionStatus::Expired.is_final());
    }

    #[test]
    fn verified_fields_require_every_value() {
        let fields = VerifiedFields {
            first_name: Some("Ada".to_string()),
            last_name: Some("Lovelace".to_string()),
            date_of_birth: Some("1990-01-01".to_string()),
            document_number: Some("D123".to_string()),
        };
        let identity = fields.complete("s-1");
        assert_eq!(
            identity.as_ref().map(|identity| identity.document_number.as_str()),
            Some("D123")
        );

        let missing = VerifiedFields {
            document_number: Some("  ".to_string()),
            ..fields
        };
        assert!(missing.complete("s-1").is_none());
    }

    #[test]
    fn draft_apply_merges_and_clears_email() {
        let mut draft = RegistrationDraft::new("s-1");
        assert!(draft.is_empty());

        draft.apply(DraftPatch::contact("+15550000", "ada@example.com"));
        assert_eq!(draft.phone_number, "+15550000");
        assert_eq!(draft.email.as_deref(), Some("ada@example.com"));

        draft.apply(DraftPatch {
            email: Some(" ".to_string()),
            ..DraftPatch::default()
        });
        assert_eq!(draft.phone_number, "+15550000");
        assert_eq!(draft.email, None);
    }

    #[test]
    fn draft_serialization_skips_password() -> anyhow::Result<()> {
        let mut draft = RegistrationDraft::new("s-1");
        draft.apply(DraftPatch {
            password: Some(SecretString::from("Password1!".to_string())),
            ..DraftPatch::default()
        });
        let encoded = serde_json::to_string(&draft)?;
        assert!(!encoded.contains("Password1!"));
        assert!(!encoded.contains("password"));
        Ok(())
    }

    #[test]
    fn credentials_debug_is_redacted() {
        let credentials = Credentials {
            password: SecretString::from("Password1!".to_string()),
        };
        assert!(!format!("{credentials:?}").contains("Password1!"));
    }
}
