//! Hosted backend functions over HTTP.
//!
//! Every call carries the project's anon key both as `apikey` and as bearer
//! token. Non-2xx responses are turned into [`BackendError`]s carrying the
//! message from the response body.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{multipart, Client, Method, RequestBuilder, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use tracing::{debug, info_span, instrument, Instrument};
use url::Url;

use super::{
    BackendError, CreatedSession, DocumentCapture, DocumentCheck, DocumentVerifier,
    GovernmentRecord, RecordSource, SessionResult, UserRecord, UserStore, UserUpdate,
    VerificationProvider,
};
use crate::registration::types::{SessionStatus, VerifiedFields};
use crate::APP_USER_AGENT;

/// Role assigned to accounts created through registration.
const VOTER_ROLE_ID: u8 = 1;

pub(crate) fn build_client() -> Result<Client, BackendError> {
    Client::builder()
        .user_agent(APP_USER_AGENT)
        .build()
        .map_err(|err| BackendError::Transport(err.to_string()))
}

/// Resolve `path` against `base`, treating `base` as a directory.
pub(crate) fn endpoint_url(base: &Url, path: &str) -> Result<Url, BackendError> {
    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base.join(path)
        .map_err(|err| BackendError::Transport(format!("invalid endpoint {path}: {err}")))
}

/// Pull a human-readable message out of an error body.
pub(crate) fn error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    ["error", "msg", "message", "error_description"]
        .iter()
        .find_map(|field| value.get(field).and_then(Value::as_str))
        .map(str::to_string)
}

pub(crate) fn classify(status: StatusCode, body: &str) -> BackendError {
    let message =
        error_message(body).unwrap_or_else(|| format!("HTTP error! status: {}", status.as_u16()));
    let lowered = message.to_lowercase();

    if status == StatusCode::NOT_FOUND {
        BackendError::NotFound
    } else if status == StatusCode::CONFLICT
        || lowered.contains("already registered")
        || lowered.contains("already exists")
        || body.contains("user_already_exists")
    {
        BackendError::AlreadyExists(message)
    } else {
        BackendError::Rejected {
            status: status.as_u16(),
            message,
        }
    }
}

/// Send `request` and decode the JSON body, mapping failures to [`BackendError`].
pub(crate) async fn execute(request: RequestBuilder, method: &Method, url: &Url) -> Result<Value, BackendError> {
    let span = info_span!("backend.request", http.method = %method, url = %url);

    let response = request
        .send()
        .instrument(span)
        .await
        .map_err(|err| BackendError::Transport(err.to_string()))?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|err| BackendError::Transport(err.to_string()))?;

    if !status.is_success() {
        debug!(%status, "backend request failed");
        return Err(classify(status, &body));
    }

    if body.trim().is_empty() {
        return Ok(Value::Null);
    }

    let value: Value =
        serde_json::from_str(&body).map_err(|err| BackendError::Decode(err.to_string()))?;

    // Functions report some failures as `{"success": false, "error": ...}` with a 200.
    if value.get("success").and_then(Value::as_bool) == Some(false) {
        return Err(BackendError::Rejected {
            status: status.as_u16(),
            message: error_message(&body).unwrap_or_else(|| "request failed".to_string()),
        });
    }

    Ok(value)
}

fn decode<T: serde::de::DeserializeOwned>(value: Value) -> Result<T, BackendError> {
    serde_json::from_value(value).map_err(|err| BackendError::Decode(err.to_string()))
}

fn string_field(value: &Value, field: &str) -> Option<String> {
    value
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Accepts both `{"user": {...}}` envelopes and bare records.
fn user_from(value: Value) -> Result<Option<UserRecord>, BackendError> {
    let user = match value {
        Value::Object(mut object) if object.contains_key("user") => {
            object.remove("user").unwrap_or(Value::Null)
        }
        other => other,
    };
    if user.is_null() {
        Ok(None)
    } else {
        decode(user).map(Some)
    }
}

/// Client for the backend's cloud functions.
pub struct FunctionsClient {
    client: Client,
    base_url: Url,
    anon_key: SecretString,
}

impl FunctionsClient {
    /// # Errors
    /// Fails when the HTTP client cannot be built.
    pub fn new(base_url: Url, anon_key: SecretString) -> Result<Self, BackendError> {
        Ok(Self {
            client: build_client()?,
            base_url,
            anon_key,
        })
    }

    fn request(&self, method: &Method, url: &Url) -> RequestBuilder {
        self.client
            .request(method.clone(), url.clone())
            .header("apikey", self.anon_key.expose_secret())
            .bearer_auth(self.anon_key.expose_secret())
    }

    async fn call(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<Value>,
    ) -> Result<Value, BackendError> {
        let mut url = endpoint_url(&self.base_url, path)?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }

        let mut request = self.request(&method, &url);
        if let Some(body) = body {
            request = request.json(&body);
        }
        execute(request, &method, &url).await
    }
}

impl std::fmt::Debug for FunctionsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionsClient")
            .field("base_url", &self.base_url.as_str())
            .field("anon_key", &"***")
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl VerificationProvider for FunctionsClient {
    #[instrument(skip(self))]
    async fn create_session(
        &self,
        language: &str,
        return_url: &str,
    ) -> Result<CreatedSession, BackendError> {
        let value = self
            .call(
                Method::POST,
                "didit-session",
                &[],
                Some(json!({ "language": language, "callback": return_url })),
            )
            .await?;

        let session_id = string_field(&value, "session_id")
            .ok_or_else(|| BackendError::Decode("response has no session_id".to_string()))?;
        let verification_url = string_field(&value, "url")
            .or_else(|| string_field(&value, "verification_url"))
            .ok_or_else(|| BackendError::Decode("response has no verification url".to_string()))?;

        Ok(CreatedSession {
            session_id,
            verification_url,
        })
    }

    #[instrument(skip(self))]
    async fn get_session_result(&self, session_id: &str) -> Result<SessionResult, BackendError> {
        let value = self
            .call(
                Method::GET,
                "didit-session-results",
                &[("session_id", session_id)],
                None,
            )
            .await?;

        let status = string_field(&value, "status")
            .or_else(|| string_field(&value, "decision_status"))
            .map_or(SessionStatus::Pending, |status| SessionStatus::from_provider(&status));

        let verified_fields = match value.get("user_data") {
            Some(user_data) if !user_data.is_null() => Some(decode::<VerifiedFields>(user_data.clone())?),
            _ => None,
        };

        let created_at = string_field(&value, "created_at")
            .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
            .map(|created| created.with_timezone(&Utc));

        Ok(SessionResult {
            status,
            verified_fields,
            created_at,
        })
    }
}

#[async_trait]
impl DocumentVerifier for FunctionsClient {
    #[instrument(skip_all)]
    async fn verify_document(
        &self,
        capture: &DocumentCapture,
    ) -> Result<DocumentCheck, BackendError> {
        let image = |bytes: &[u8], name: &'static str| {
            multipart::Part::bytes(bytes.to_vec())
                .file_name(name)
                .mime_str("image/jpeg")
                .map_err(|err| BackendError::Transport(err.to_string()))
        };

        let mut form = multipart::Form::new().part("front_image", image(&capture.front_image, "front_image.jpg")?);
        if let Some(back) = &capture.back_image {
            form = form.part("back_image", image(back, "back_image.jpg")?);
        }

        let url = endpoint_url(&self.base_url, "didit-verify")?;
        let request = self.request(&Method::POST, &url).multipart(form);
        let value = execute(request, &Method::POST, &url).await?;

        let data = value.get("data").cloned().unwrap_or(Value::Null);
        let document_number = string_field(&data, "document_number").unwrap_or_default();

        Ok(DocumentCheck {
            document_number,
            first_name: string_field(&data, "first_name"),
            last_name: string_field(&data, "last_name"),
            date_of_birth: string_field(&data, "date_of_birth"),
        })
    }
}

#[async_trait]
impl RecordSource for FunctionsClient {
    #[instrument(skip(self))]
    async fn lookup_by_national_id(
        &self,
        national_id: &str,
    ) -> Result<Option<GovernmentRecord>, BackendError> {
        let path = format!("government-db/{}", national_id.trim());
        match self.call(Method::GET, &path, &[], None).await {
            Ok(Value::Null) | Err(BackendError::NotFound) => Ok(None),
            Ok(Value::Object(mut object)) if object.contains_key("record") => {
                decode(object.remove("record").unwrap_or(Value::Null)).map(Some)
            }
            Ok(value) => decode(value).map(Some),
            Err(err) => Err(err),
        }
    }
}

#[async_trait]
impl UserStore for FunctionsClient {
    #[instrument(skip(self, record), fields(user_id = %record.user_id))]
    async fn create(&self, record: &UserRecord) -> Result<UserRecord, BackendError> {
        let body = json!({
            "user_id": record.user_id,
            "email": record.email,
            "phone_number": record.phone_number,
            "name": record.name,
            "surname": record.surname,
            "date_of_birth": record.date_of_birth,
            "national_id": record.national_id,
            "status": record.status,
            "role_id": VOTER_ROLE_ID,
        });
        let value = self.call(Method::POST, "register-voter", &[], Some(body)).await?;
        Ok(user_from(value).ok().flatten().unwrap_or_else(|| record.clone()))
    }

    #[instrument(skip(self))]
    async fn get_by_id(&self, user_id: &str) -> Result<Option<UserRecord>, BackendError> {
        match self.call(Method::GET, &format!("users/{user_id}"), &[], None).await {
            Ok(value) => user_from(value),
            Err(BackendError::NotFound) => Ok(None),
            Err(err) => Err(err),
        }
    }

    #[instrument(skip(self, national_id))]
    async fn get_by_national_id(
        &self,
        national_id: &str,
    ) -> Result<Option<UserRecord>, BackendError> {
        match self
            .call(Method::GET, "find-user", &[("national_id", national_id)], None)
            .await
        {
            Ok(value) => user_from(value),
            Err(BackendError::NotFound) => Ok(None),
            Err(err) => Err(err),
        }
    }

    #[instrument(skip(self))]
    async fn get_by_phone_or_email(
        &self,
        phone_or_email: &str,
    ) -> Result<Option<UserRecord>, BackendError> {
        match self
            .call(Method::GET, "find-user", &[("phone_or_email", phone_or_email)], None)
            .await
        {
            Ok(value) => user_from(value),
            Err(BackendError::NotFound) => Ok(None),
            Err(err) => Err(err),
        }
    }

    #[instrument(skip(self, update))]
    async fn update(&self, user_id: &str, update: &UserUpdate) -> Result<UserRecord, BackendError> {
        let body = serde_json::to_value(update).map_err(|err| BackendError::Decode(err.to_string()))?;
        let value = self
            .call(Method::PUT, &format!("users/{user_id}"), &[], Some(body))
            .await?;
        user_from(value)?.ok_or(BackendError::NotFound)
    }
}
