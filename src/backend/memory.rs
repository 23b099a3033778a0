//! In-process collaborators.
//!
//! Deterministic fakes for every backend contract. They back the `mock`
//! backend of the CLI and the test suites, and expose a few inspection and
//! fault-injection helpers for the latter.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use secrecy::{ExposeSecret, SecretString};
use tracing::debug;
use url::Url;
use uuid::Uuid;

use super::{
    AuthIdentity, AuthProvider, BackendError, Backends, CreatedSession, DocumentCapture,
    DocumentCheck, DocumentVerifier, DurableStorage, GovernmentRecord, NewIdentity,
    PasscodeTarget, RecordSource, SessionResult, StorageError, UserRecord, UserStore, UserUpdate,
};
use crate::registration::types::{AccountStatus, SessionStatus, VerifiedFields};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Key-value storage kept in a map; optionally fails every call.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, String>>,
    writes: Mutex<HashMap<String, usize>>,
    failing: bool,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Storage whose every operation fails, as an unavailable browser store would.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    /// Number of successful writes to `key`.
    #[must_use]
    pub fn writes(&self, key: &str) -> usize {
        lock(&self.writes).get(key).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn value(&self, key: &str) -> Option<String> {
        lock(&self.entries).get(key).cloned()
    }

    fn check(&self) -> Result<(), StorageError> {
        if self.failing {
            Err(StorageError::Unavailable("storage disabled".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl DurableStorage for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.check()?;
        Ok(self.value(key))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.check()?;
        lock(&self.entries).insert(key.to_string(), value.to_string());
        *lock(&self.writes).entry(key.to_string()).or_default() += 1;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.check()?;
        lock(&self.entries).remove(key);
        Ok(())
    }
}

/// Verification provider answering from per-session scripts.
///
/// Each session holds a queue of results; the last one is sticky so a
/// terminal status keeps being reported.
#[derive(Debug, Default)]
pub struct MockVerificationProvider {
    scripts: Mutex<HashMap<String, VecDeque<Result<SessionResult, BackendError>>>>,
    polls: Mutex<HashMap<String, usize>>,
    created: Mutex<HashMap<String, DateTime<Utc>>>,
    create_failure: Mutex<Option<String>>,
    latency: Mutex<Duration>,
    auto_approve: Option<VerifiedFields>,
    sessions: AtomicU64,
}

impl MockVerificationProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sessions created through this provider report pending once, then approve with `fields`.
    #[must_use]
    pub fn with_auto_approve(mut self, fields: VerifiedFields) -> Self {
        self.auto_approve = Some(fields);
        self
    }

    pub fn script(&self, session_id: &str, status: SessionStatus, verified_fields: Option<VerifiedFields>) {
        lock(&self.scripts)
            .entry(session_id.to_string())
            .or_default()
            .push_back(Ok(SessionResult {
                status,
                verified_fields,
                created_at: None,
            }));
    }

    pub fn fail_next(&self, session_id: &str, message: &str) {
        lock(&self.scripts)
            .entry(session_id.to_string())
            .or_default()
            .push_back(Err(BackendError::Transport(message.to_string())));
    }

    pub fn fail_create(&self, message: &str) {
        *lock(&self.create_failure) = Some(message.to_string());
    }

    pub fn set_latency(&self, latency: Duration) {
        *lock(&self.latency) = latency;
    }

    /// Number of result fetches issued for `session_id`.
    #[must_use]
    pub fn polls(&self, session_id: &str) -> usize {
        lock(&self.polls).get(session_id).copied().unwrap_or(0)
    }

    /// Creation time of a session opened through [`Self::create_session`].
    #[must_use]
    pub fn created_at(&self, session_id: &str) -> Option<DateTime<Utc>> {
        lock(&self.created).get(session_id).copied()
    }
}

#[async_trait]
impl super::VerificationProvider for MockVerificationProvider {
    async fn create_session(
        &self,
        language: &str,
        return_url: &str,
    ) -> Result<CreatedSession, BackendError> {
        if let Some(message) = lock(&self.create_failure).clone() {
            return Err(BackendError::Rejected {
                status: 502,
                message,
            });
        }

        let number = self.sessions.fetch_add(1, Ordering::SeqCst) + 1;
        let session_id = format!("mock-session-{number}");
        lock(&self.created).insert(session_id.clone(), Utc::now());

        let mut verification_url = Url::parse("https://verify.mock.sovs.local/session/")
            .and_then(|base| base.join(&session_id))
            .map_err(|err| BackendError::Decode(err.to_string()))?;
        verification_url
            .query_pairs_mut()
            .append_pair("lang", language)
            .append_pair("return_url", return_url);

        if let Some(fields) = &self.auto_approve {
            self.script(&session_id, SessionStatus::Pending, None);
            self.script(&session_id, SessionStatus::Approved, Some(fields.clone()));
        }

        debug!(%session_id, "mock verification session created");
        Ok(CreatedSession {
            session_id,
            verification_url: verification_url.to_string(),
        })
    }

    async fn get_session_result(&self, session_id: &str) -> Result<SessionResult, BackendError> {
        *lock(&self.polls).entry(session_id.to_string()).or_default() += 1;

        let latency = *lock(&self.latency);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let created_at = self.created_at(session_id);
        let mut scripts = lock(&self.scripts);
        let queue = scripts.get_mut(session_id).ok_or(BackendError::NotFound)?;
        let next = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        next.unwrap_or(Err(BackendError::NotFound))
            .map(|result| SessionResult {
                created_at: result.created_at.or(created_at),
                ..result
            })
    }
}

/// Document verifier returning a fixed outcome.
#[derive(Debug)]
pub struct MockDocumentVerifier {
    outcome: Result<DocumentCheck, BackendError>,
}

impl MockDocumentVerifier {
    #[must_use]
    pub fn new(outcome: Result<DocumentCheck, BackendError>) -> Self {
        Self { outcome }
    }

    /// Verifier that reads `document_number` from any document.
    #[must_use]
    pub fn reading(document_number: &str) -> Self {
        Self::new(Ok(DocumentCheck {
            document_number: document_number.to_string(),
            ..DocumentCheck::default()
        }))
    }
}

#[async_trait]
impl DocumentVerifier for MockDocumentVerifier {
    async fn verify_document(
        &self,
        _capture: &DocumentCapture,
    ) -> Result<DocumentCheck, BackendError> {
        self.outcome.clone()
    }
}

/// Government registry backed by a map.
#[derive(Debug, Default)]
pub struct MemoryRecordSource {
    records: Mutex<HashMap<String, GovernmentRecord>>,
    unavailable: AtomicBool,
}

impl MemoryRecordSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the demo voters.
    #[must_use]
    pub fn seeded() -> Self {
        let source = Self::new();
        source.insert(
            "NID1234567890",
            GovernmentRecord {
                name: "John".to_string(),
                surname: "Doe".to_string(),
                date_of_birth: "1990-05-15".to_string(),
                phone_number: "+1234567890".to_string(),
                email: Some("john.doe@example.com".to_string()),
            },
        );
        source.insert(
            "NID0987654321",
            GovernmentRecord {
                name: "Jane".to_string(),
                surname: "Smith".to_string(),
                date_of_birth: "1985-03-22".to_string(),
                phone_number: "+1987654321".to_string(),
                email: None,
            },
        );
        source.insert(
            "NID5555555555",
            GovernmentRecord {
                name: "Alice".to_string(),
                surname: "Johnson".to_string(),
                date_of_birth: "1992-11-08".to_string(),
                phone_number: "+1555555555".to_string(),
                email: Some("alice.j@example.com".to_string()),
            },
        );
        source
    }

    pub fn insert(&self, national_id: &str, record: GovernmentRecord) {
        lock(&self.records).insert(national_id.to_string(), record);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

#[async_trait]
impl RecordSource for MemoryRecordSource {
    async fn lookup_by_national_id(
        &self,
        national_id: &str,
    ) -> Result<Option<GovernmentRecord>, BackendError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(BackendError::Transport("registry unreachable".to_string()));
        }
        Ok(lock(&self.records).get(national_id.trim()).cloned())
    }
}

struct StoredIdentity {
    identity: AuthIdentity,
    password: SecretString,
}

#[derive(Default)]
struct AuthState {
    identities: Vec<StoredIdentity>,
    current: Option<String>,
    passcodes: HashMap<PasscodeTarget, String>,
    create_failure: Option<BackendError>,
    create_calls: usize,
}

impl AuthState {
    fn find_by_target(&self, target: &PasscodeTarget) -> Option<&StoredIdentity> {
        self.identities.iter().find(|stored| match target {
            PasscodeTarget::Email(email) => stored
                .identity
                .email
                .as_deref()
                .is_some_and(|known| known.eq_ignore_ascii_case(email)),
            PasscodeTarget::Sms(phone) => stored.identity.phone.as_deref() == Some(phone.as_str()),
        })
    }
}

/// Auth provider keeping identities in memory.
#[derive(Default)]
pub struct MemoryAuthProvider {
    state: Mutex<AuthState>,
}

impl MemoryAuthProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn identity(&self, identity_id: &str) -> Option<AuthIdentity> {
        lock(&self.state)
            .identities
            .iter()
            .find(|stored| stored.identity.id == identity_id)
            .map(|stored| stored.identity.clone())
    }

    #[must_use]
    pub fn identity_count(&self) -> usize {
        lock(&self.state).identities.len()
    }

    /// Number of `create_identity` calls received, failed ones included.
    #[must_use]
    pub fn create_calls(&self) -> usize {
        lock(&self.state).create_calls
    }

    /// Make every following `create_identity` call fail with `error`.
    pub fn fail_create(&self, error: BackendError) {
        lock(&self.state).create_failure = Some(error);
    }

    /// Passcode most recently sent to `target`.
    #[must_use]
    pub fn last_passcode(&self, target: &PasscodeTarget) -> Option<String> {
        lock(&self.state).passcodes.get(target).cloned()
    }
}

impl std::fmt::Debug for MemoryAuthProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryAuthProvider")
            .field("identities", &self.identity_count())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl AuthProvider for MemoryAuthProvider {
    async fn create_identity(&self, request: &NewIdentity) -> Result<AuthIdentity, BackendError> {
        let mut state = lock(&self.state);
        state.create_calls += 1;

        if let Some(error) = state.create_failure.clone() {
            return Err(error);
        }

        let taken = state.identities.iter().any(|stored| {
            stored
                .identity
                .email
                .as_deref()
                .is_some_and(|email| email.eq_ignore_ascii_case(&request.email))
                || stored.identity.phone.as_deref() == Some(request.phone.as_str())
        });
        if taken {
            return Err(BackendError::AlreadyExists(
                "User already registered".to_string(),
            ));
        }

        let identity = AuthIdentity {
            id: Uuid::new_v4().to_string(),
            email: Some(request.email.clone()),
            phone: Some(request.phone.clone()),
            metadata: request.metadata.clone(),
        };
        state.current = Some(identity.id.clone());
        state.identities.push(StoredIdentity {
            identity: identity.clone(),
            password: request.password.clone(),
        });
        Ok(identity)
    }

    async fn sign_in(
        &self,
        email: &str,
        password: &SecretString,
    ) -> Result<AuthIdentity, BackendError> {
        let mut state = lock(&self.state);
        let identity = state
            .find_by_target(&PasscodeTarget::Email(email.to_string()))
            .filter(|stored| stored.password.expose_secret() == password.expose_secret())
            .map(|stored| stored.identity.clone())
            .ok_or_else(|| BackendError::Rejected {
                status: 400,
                message: "Invalid login credentials".to_string(),
            })?;
        state.current = Some(identity.id.clone());
        Ok(identity)
    }

    async fn update_identity(
        &self,
        identity_id: &str,
        metadata: &serde_json::Value,
    ) -> Result<(), BackendError> {
        let mut state = lock(&self.state);
        let stored = state
            .identities
            .iter_mut()
            .find(|stored| stored.identity.id == identity_id)
            .ok_or(BackendError::NotFound)?;

        match (&mut stored.identity.metadata, metadata) {
            (serde_json::Value::Object(current), serde_json::Value::Object(update)) => {
                current.extend(update.clone());
            }
            (current, update) => *current = update.clone(),
        }
        Ok(())
    }

    async fn send_one_time_passcode(&self, target: &PasscodeTarget) -> Result<(), BackendError> {
        let mut state = lock(&self.state);
        if state.find_by_target(target).is_none() {
            return Err(BackendError::Rejected {
                status: 422,
                message: "Signups not allowed for otp".to_string(),
            });
        }
        let code = format!("{:06}", rand::thread_rng().gen_range(0..1_000_000));
        state.passcodes.insert(target.clone(), code);
        Ok(())
    }

    async fn verify_one_time_passcode(
        &self,
        target: &PasscodeTarget,
        code: &str,
    ) -> Result<AuthIdentity, BackendError> {
        let mut state = lock(&self.state);
        if state.passcodes.get(target).map(String::as_str) != Some(code) {
            return Err(BackendError::Rejected {
                status: 403,
                message: "Token has expired or is invalid".to_string(),
            });
        }
        state.passcodes.remove(target);

        let identity = state
            .find_by_target(target)
            .map(|stored| stored.identity.clone())
            .ok_or(BackendError::NotFound)?;
        state.current = Some(identity.id.clone());
        Ok(identity)
    }

    async fn sign_out(&self) -> Result<(), BackendError> {
        lock(&self.state).current = None;
        Ok(())
    }

    async fn current_identity(&self) -> Result<Option<AuthIdentity>, BackendError> {
        let state = lock(&self.state);
        Ok(state.current.as_ref().and_then(|current| {
            state
                .identities
                .iter()
                .find(|stored| &stored.identity.id == current)
                .map(|stored| stored.identity.clone())
        }))
    }
}

/// Application user store backed by a list.
#[derive(Debug, Default)]
pub struct MemoryUserStore {
    users: Mutex<Vec<UserRecord>>,
}

impl MemoryUserStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.users).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn same_email(a: Option<&str>, b: Option<&str>) -> bool {
    matches!((a, b), (Some(a), Some(b)) if a.eq_ignore_ascii_case(b))
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn create(&self, record: &UserRecord) -> Result<UserRecord, BackendError> {
        let mut users = lock(&self.users);
        let conflict = users.iter().any(|user| {
            user.user_id == record.user_id
                || user.phone_number == record.phone_number
                || same_email(user.email.as_deref(), record.email.as_deref())
                || (record.national_id.is_some() && user.national_id == record.national_id)
        });
        if conflict {
            return Err(BackendError::AlreadyExists(
                "User with this phone number, email or national id already exists".to_string(),
            ));
        }
        users.push(record.clone());
        Ok(record.clone())
    }

    async fn get_by_id(&self, user_id: &str) -> Result<Option<UserRecord>, BackendError> {
        Ok(lock(&self.users)
            .iter()
            .find(|user| user.user_id == user_id)
            .cloned())
    }

    async fn get_by_national_id(
        &self,
        national_id: &str,
    ) -> Result<Option<UserRecord>, BackendError> {
        let needle = national_id.trim();
        Ok(lock(&self.users)
            .iter()
            .find(|user| user.national_id.as_deref() == Some(needle))
            .cloned())
    }

    async fn get_by_phone_or_email(
        &self,
        phone_or_email: &str,
    ) -> Result<Option<UserRecord>, BackendError> {
        let needle = phone_or_email.trim();
        Ok(lock(&self.users)
            .iter()
            .find(|user| user.phone_number == needle || same_email(user.email.as_deref(), Some(needle)))
            .cloned())
    }

    async fn update(&self, user_id: &str, update: &UserUpdate) -> Result<UserRecord, BackendError> {
        let mut users = lock(&self.users);
        let user = users
            .iter_mut()
            .find(|user| user.user_id == user_id)
            .ok_or(BackendError::NotFound)?;

        if let Some(phone_number) = &update.phone_number {
            user.phone_number.clone_from(phone_number);
        }
        if let Some(email) = &update.email {
            user.email = Some(email.clone());
        }
        if let Some(status) = update.status {
            user.status = status;
        }
        Ok(user.clone())
    }
}

/// Concrete in-memory collaborators, kept typed for inspection.
#[derive(Clone, Debug)]
pub struct InMemoryBackends {
    pub storage: Arc<MemoryStorage>,
    pub verification: Arc<MockVerificationProvider>,
    pub documents: Arc<MockDocumentVerifier>,
    pub records: Arc<MemoryRecordSource>,
    pub auth: Arc<MemoryAuthProvider>,
    pub users: Arc<MemoryUserStore>,
}

impl Default for InMemoryBackends {
    fn default() -> Self {
        Self::new()
    }
}

const DEMO_NATIONAL_ID: &str = "NID1234567890";

impl InMemoryBackends {
    /// Fakes with the seeded registry and a provider that approves every
    /// session as the first demo voter.
    #[must_use]
    pub fn new() -> Self {
        let verification = MockVerificationProvider::new().with_auto_approve(VerifiedFields {
            first_name: Some("John".to_string()),
            last_name: Some("Doe".to_string()),
            date_of_birth: Some("1990-05-15".to_string()),
            document_number: Some(DEMO_NATIONAL_ID.to_string()),
        });

        Self {
            storage: Arc::new(MemoryStorage::new()),
            verification: Arc::new(verification),
            documents: Arc::new(MockDocumentVerifier::reading(DEMO_NATIONAL_ID)),
            records: Arc::new(MemoryRecordSource::seeded()),
            auth: Arc::new(MemoryAuthProvider::new()),
            users: Arc::new(MemoryUserStore::new()),
        }
    }

    #[must_use]
    pub fn with_verification(mut self, verification: Arc<MockVerificationProvider>) -> Self {
        self.verification = verification;
        self
    }

    /// Register the second demo voter so OTP login works out of the box.
    ///
    /// # Errors
    /// Fails if the voter is already registered.
    pub async fn with_demo_voter(self) -> Result<Self, BackendError> {
        let identity = self
            .auth
            .create_identity(&NewIdentity {
                email: "jane.smith@sovs.local".to_string(),
                phone: "+1987654321".to_string(),
                password: SecretString::from(Uuid::new_v4().to_string()),
                metadata: serde_json::json!({ "national_id": "NID0987654321" }),
            })
            .await?;
        self.users
            .create(&UserRecord {
                user_id: identity.id,
                phone_number: "+1987654321".to_string(),
                email: Some("jane.smith@sovs.local".to_string()),
                name: "Jane".to_string(),
                surname: "Smith".to_string(),
                date_of_birth: "1985-03-22".to_string(),
                national_id: Some("NID0987654321".to_string()),
                status: AccountStatus::Verified,
            })
            .await?;
        self.auth.sign_out().await?;
        Ok(self)
    }

    #[must_use]
    pub fn backends(&self) -> Backends {
        Backends {
            storage: self.storage.clone(),
            verification: self.verification.clone(),
            documents: self.documents.clone(),
            records: self.records.clone(),
            auth: self.auth.clone(),
            users: self.users.clone(),
        }
    }
}

impl Backends {
    /// Fresh in-memory collaborators.
    #[must_use]
    pub fn in_memory() -> Self {
        InMemoryBackends::new().backends()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::VerificationProvider;
    use anyhow::Result;

    fn new_identity(email: &str, phone: &str, password: &str) -> NewIdentity {
        NewIdentity {
            email: email.to_string(),
            phone: phone.to_string(),
            password: SecretString::from(password.to_string()),
            metadata: serde_json::json!({ "first_name": "Ada" }),
        }
    }

    #[tokio::test]
    async fn auth_rejects_duplicates_and_recovers_by_sign_in() -> Result<()> {
        let auth = MemoryAuthProvider::new();
        let created = auth
            .create_identity(&new_identity("ada@example.com", "+15550000", "Password1!"))
            .await?;

        let duplicate = auth
            .create_identity(&new_identity("ADA@example.com", "+15559999", "Password1!"))
            .await;
        assert!(matches!(duplicate, Err(BackendError::AlreadyExists(_))));

        let signed_in = auth
            .sign_in("ada@example.com", &SecretString::from("Password1!".to_string()))
            .await?;
        assert_eq!(signed_in.id, created.id);

        let wrong = auth
            .sign_in("ada@example.com", &SecretString::from("nope".to_string()))
            .await;
        assert!(matches!(wrong, Err(BackendError::Rejected { status: 400, .. })));
        Ok(())
    }

    #[tokio::test]
    async fn auth_metadata_is_merged() -> Result<()> {
        let auth = MemoryAuthProvider::new();
        let created = auth
            .create_identity(&new_identity("ada@example.com", "+15550000", "Password1!"))
            .await?;
        auth.update_identity(&created.id, &serde_json::json!({ "user_id": created.id }))
            .await?;

        let metadata = auth.identity(&created.id).map(|identity| identity.metadata);
        assert_eq!(
            metadata,
            Some(serde_json::json!({ "first_name": "Ada", "user_id": created.id }))
        );
        Ok(())
    }

    #[tokio::test]
    async fn auth_passcode_round_trip() -> Result<()> {
        let auth = MemoryAuthProvider::new();
        auth.create_identity(&new_identity("ada@example.com", "+15550000", "Password1!"))
            .await?;
        auth.sign_out().await?;

        let target = PasscodeTarget::Sms("+15550000".to_string());
        auth.send_one_time_passcode(&target).await?;
        let code = auth.last_passcode(&target).unwrap_or_default();
        assert_eq!(code.len(), 6);

        let identity = auth.verify_one_time_passcode(&target, &code).await?;
        assert_eq!(auth.current_identity().await?, Some(identity));
        assert!(auth.verify_one_time_passcode(&target, &code).await.is_err());

        let unknown = PasscodeTarget::Sms("+19999999".to_string());
        assert!(auth.send_one_time_passcode(&unknown).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn user_store_enforces_unique_contact() -> Result<()> {
        let users = MemoryUserStore::new();
        let record = UserRecord {
            user_id: "u-1".to_string(),
            phone_number: "+15550000".to_string(),
            email: Some("ada@example.com".to_string()),
            name: "Ada".to_string(),
            surname: "Lovelace".to_string(),
            date_of_birth: "1990-01-01".to_string(),
            national_id: Some("D123".to_string()),
            status: AccountStatus::Pending,
        };
        users.create(&record).await?;

        let clash = UserRecord {
            user_id: "u-2".to_string(),
            phone_number: "+15559999".to_string(),
            ..record.clone()
        };
        assert!(matches!(
            users.create(&clash).await,
            Err(BackendError::AlreadyExists(_))
        ));

        let same_document = UserRecord {
            user_id: "u-3".to_string(),
            phone_number: "+15551111".to_string(),
            email: None,
            ..record.clone()
        };
        assert!(matches!(
            users.create(&same_document).await,
            Err(BackendError::AlreadyExists(_))
        ));
        assert_eq!(users.get_by_national_id(" D123 ").await?, Some(record.clone()));
        assert_eq!(users.get_by_national_id("D999").await?, None);

        assert_eq!(
            users.get_by_phone_or_email("ADA@example.com").await?,
            Some(record.clone())
        );
        let updated = users
            .update(
                "u-1",
                &UserUpdate {
                    status: Some(AccountStatus::Verified),
                    ..UserUpdate::default()
                },
            )
            .await?;
        assert_eq!(updated.status, AccountStatus::Verified);
        assert_eq!(users.update("u-9", &UserUpdate::default()).await, Err(BackendError::NotFound));
        Ok(())
    }

    #[tokio::test]
    async fn auto_approving_provider_scripts_new_sessions() -> Result<()> {
        let fakes = InMemoryBackends::new();
        let created = fakes
            .verification
            .create_session("en", "sovs://verify")
            .await?;
        assert!(created.verification_url.contains(&created.session_id));

        let first = fakes.verification.get_session_result(&created.session_id).await?;
        let second = fakes.verification.get_session_result(&created.session_id).await?;
        assert_eq!(first.status, SessionStatus::Pending);
        assert_eq!(second.status, SessionStatus::Approved);
        assert_eq!(
            fakes.verification.get_session_result("unknown").await,
            Err(BackendError::NotFound)
        );
        Ok(())
    }

    #[tokio::test]
    async fn demo_voter_can_receive_passcode() -> Result<()> {
        let fakes = InMemoryBackends::new().with_demo_voter().await?;
        let target = PasscodeTarget::Sms("+1987654321".to_string());
        fakes.auth.send_one_time_passcode(&target).await?;
        assert!(fakes.auth.last_passcode(&target).is_some());
        assert!(fakes.users.get_by_phone_or_email("+1987654321").await?.is_some());
        Ok(())
    }
}
