//! Account provisioning across the auth provider and the application user store.
//!
//! The auth identity id is the account id: the application record is created
//! under the same id and the identity's metadata points back at it. Every step
//! tolerates having already happened, so re-running a provisioning that was
//! interrupted (or submitted twice) converges on the same account.

use std::sync::Arc;

use secrecy::SecretString;
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use super::error::ProvisionError;
use super::types::{AccountStatus, ContactInfo, Credentials, ProvisionedAccount, VerifiedIdentity};
use super::validation::require_national_id;
use crate::backend::{
    AuthIdentity, AuthProvider, BackendError, GovernmentRecord, NewIdentity, RecordSource,
    UserRecord, UserStore,
};

#[derive(Clone)]
pub struct AccountProvisioner {
    records: Arc<dyn RecordSource>,
    auth: Arc<dyn AuthProvider>,
    users: Arc<dyn UserStore>,
    placeholder_domain: String,
}

impl AccountProvisioner {
    #[must_use]
    pub fn new(
        records: Arc<dyn RecordSource>,
        auth: Arc<dyn AuthProvider>,
        users: Arc<dyn UserStore>,
        placeholder_domain: &str,
    ) -> Self {
        Self {
            records,
            auth,
            users,
            placeholder_domain: placeholder_domain.to_string(),
        }
    }

    /// Email used for the auth identity when the applicant gave none.
    #[must_use]
    pub fn placeholder_email(&self, phone_number: &str) -> String {
        let digits: String = phone_number.chars().filter(char::is_ascii_digit).collect();
        format!("{digits}@{}", self.placeholder_domain)
    }

    /// Create (or recover) the account for a verified identity.
    ///
    /// # Errors
    /// - [`ProvisionError::NationalIdNotFound`] before anything is created when
    ///   the registry has no record for the document number.
    /// - [`ProvisionError::DuplicateAccount`] before anything is created when
    ///   the national id or a contact detail is bound to another account, or
    ///   when the identity exists and the submitted credentials do not recover it.
    /// - [`ProvisionError::AuthProviderError`] with the provider's message.
    /// - [`ProvisionError::RecordCreationFailed`] when the user record cannot
    ///   be created or found.
    #[instrument(skip(self, contact, credentials), fields(session_id = %identity.session_id))]
    pub async fn provision(
        &self,
        identity: &VerifiedIdentity,
        contact: &ContactInfo,
        credentials: &Credentials,
    ) -> Result<ProvisionedAccount, ProvisionError> {
        let national_id = require_national_id(identity)
            .map_err(|_| ProvisionError::NationalIdNotFound)?
            .to_string();

        let record = self.lookup(&national_id).await?;
        self.check_ownership(&national_id, contact).await?;

        let email = contact
            .email
            .clone()
            .unwrap_or_else(|| self.placeholder_email(&contact.phone_number));

        let auth_identity = self
            .ensure_identity(identity, contact, &email, &credentials.password)
            .await?;
        let account_id = auth_identity.id.clone();

        let user = self
            .ensure_user_record(&account_id, identity, contact, &national_id, &record)
            .await?;

        self.auth
            .update_identity(&account_id, &json!({ "user_id": user.user_id }))
            .await
            .map_err(|err| ProvisionError::AuthProviderError(err.user_message()))?;

        info!(%account_id, "account provisioned");

        Ok(ProvisionedAccount {
            account_id,
            phone_number: user.phone_number,
            email: user.email,
            name: user.name,
            surname: user.surname,
            date_of_birth: user.date_of_birth,
            national_id,
            status: user.status,
        })
    }

    async fn lookup(&self, national_id: &str) -> Result<GovernmentRecord, ProvisionError> {
        match self.records.lookup_by_national_id(national_id).await {
            Ok(Some(record)) => Ok(record),
            Ok(None) | Err(BackendError::NotFound) => {
                warn!("national id not found in registry");
                Err(ProvisionError::NationalIdNotFound)
            }
            Err(err) => Err(ProvisionError::Unavailable(err.user_message())),
        }
    }

    /// Refuse a national id or contact detail already bound to another applicant.
    ///
    /// A record for the same national id and phone number is this applicant's
    /// own earlier attempt and is left for the later steps to converge on.
    async fn check_ownership(
        &self,
        national_id: &str,
        contact: &ContactInfo,
    ) -> Result<(), ProvisionError> {
        let by_national_id = owner(self.users.get_by_national_id(national_id).await)?;
        if let Some(existing) = by_national_id {
            if existing.phone_number != contact.phone_number {
                warn!(user_id = %existing.user_id, "national id already registered");
                return Err(ProvisionError::DuplicateAccount(
                    "national id is registered to another account".to_string(),
                ));
            }
        }

        let mut claims = vec![("phone number", contact.phone_number.as_str())];
        if let Some(email) = &contact.email {
            claims.push(("email", email.as_str()));
        }
        for (field, value) in claims {
            let existing = owner(self.users.get_by_phone_or_email(value).await)?;
            if let Some(existing) = existing {
                if existing.national_id.as_deref() != Some(national_id) {
                    warn!(user_id = %existing.user_id, field, "contact detail already registered");
                    return Err(ProvisionError::DuplicateAccount(format!(
                        "{field} is registered to another account"
                    )));
                }
            }
        }
        Ok(())
    }

    async fn ensure_identity(
        &self,
        identity: &VerifiedIdentity,
        contact: &ContactInfo,
        email: &str,
        password: &SecretString,
    ) -> Result<AuthIdentity, ProvisionError> {
        let request = NewIdentity {
            email: email.to_string(),
            phone: contact.phone_number.clone(),
            password: password.clone(),
            metadata: json!({
                "first_name": identity.first_name,
                "last_name": identity.last_name,
                "date_of_birth": identity.date_of_birth,
                "national_id": identity.document_number,
                "verification_session_id": identity.session_id,
            }),
        };

        match self.auth.create_identity(&request).await {
            Ok(created) => {
                debug!(account_id = %created.id, "auth identity created");
                Ok(created)
            }
            Err(BackendError::AlreadyExists(message)) => {
                debug!("auth identity exists, recovering with submitted credentials");
                self.auth.sign_in(email, password).await.map_err(|err| {
                    warn!("Failed to recover existing identity: {err}");
                    ProvisionError::DuplicateAccount(message)
                })
            }
            Err(err) => Err(ProvisionError::AuthProviderError(err.user_message())),
        }
    }

    async fn ensure_user_record(
        &self,
        account_id: &str,
        identity: &VerifiedIdentity,
        contact: &ContactInfo,
        national_id: &str,
        record: &GovernmentRecord,
    ) -> Result<UserRecord, ProvisionError> {
        if let Some(existing) = self.find_by_id(account_id).await? {
            debug!(%account_id, "user record already exists");
            return Ok(existing);
        }

        let new_record = UserRecord {
            user_id: account_id.to_string(),
            phone_number: contact.phone_number.clone(),
            email: contact.email.clone(),
            name: non_empty_or(&identity.first_name, &record.name),
            surname: non_empty_or(&identity.last_name, &record.surname),
            date_of_birth: non_empty_or(&identity.date_of_birth, &record.date_of_birth),
            national_id: Some(national_id.to_string()),
            status: AccountStatus::Pending,
        };

        match self.users.create(&new_record).await {
            Ok(created) => Ok(created),
            Err(BackendError::AlreadyExists(message)) => {
                // Lost a race with a concurrent submit; accept the record if it is ours.
                self.find_by_id(account_id)
                    .await?
                    .ok_or(ProvisionError::DuplicateAccount(message))
            }
            Err(err) => Err(ProvisionError::RecordCreationFailed(err.user_message())),
        }
    }

    async fn find_by_id(&self, account_id: &str) -> Result<Option<UserRecord>, ProvisionError> {
        match self.users.get_by_id(account_id).await {
            Ok(found) => Ok(found),
            Err(BackendError::NotFound) => Ok(None),
            Err(err) => Err(ProvisionError::RecordCreationFailed(err.user_message())),
        }
    }
}

fn owner(lookup: Result<Option<UserRecord>, BackendError>) -> Result<Option<UserRecord>, ProvisionError> {
    match lookup {
        Ok(found) => Ok(found),
        Err(BackendError::NotFound) => Ok(None),
        Err(err) => Err(ProvisionError::Unavailable(err.user_message())),
    }
}

fn non_empty_or(value: &str, fallback: &str) -> String {
    if value.trim().is_empty() {
        fallback.to_string()
    } else {
        value.trim().to_string()
    }
}

impl std::fmt::Debug for AccountProvisioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountProvisioner")
            .field("placeholder_domain", &self.placeholder_domain)
            .finish_non_exhaustive()
    }
}
