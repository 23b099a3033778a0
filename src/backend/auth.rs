//! Hosted auth provider over its REST API.
//!
//! Sign-up, password and passcode logins return an access token that is kept
//! in memory; metadata updates, the current-identity lookup and logout act on
//! that session.

use std::sync::Mutex;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use tracing::{debug, instrument};
use url::Url;

use super::http::{build_client, endpoint_url, execute};
use super::{AuthIdentity, AuthProvider, BackendError, NewIdentity, PasscodeTarget};

struct AuthSession {
    access_token: SecretString,
    identity: AuthIdentity,
}

pub struct AuthClient {
    client: Client,
    base_url: Url,
    anon_key: SecretString,
    session: Mutex<Option<AuthSession>>,
}

impl AuthClient {
    /// # Errors
    /// Fails when the HTTP client cannot be built.
    pub fn new(base_url: Url, anon_key: SecretString) -> Result<Self, BackendError> {
        Ok(Self {
            client: build_client()?,
            base_url,
            anon_key,
            session: Mutex::new(None),
        })
    }

    fn access_token(&self) -> Option<SecretString> {
        self.session
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .as_ref()
            .map(|session| session.access_token.clone())
    }

    fn store_session(&self, session: Option<AuthSession>) {
        *self
            .session
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = session;
    }

    async fn call(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        bearer: Option<&SecretString>,
    ) -> Result<Value, BackendError> {
        let url = endpoint_url(&self.base_url, path)?;
        let token = bearer.unwrap_or(&self.anon_key);

        let mut request: RequestBuilder = self
            .client
            .request(method.clone(), url.clone())
            .header("apikey", self.anon_key.expose_secret())
            .bearer_auth(token.expose_secret());
        if let Some(body) = body {
            request = request.json(&body);
        }
        execute(request, &method, &url).await
    }

    fn require_token(&self) -> Result<SecretString, BackendError> {
        self.access_token().ok_or_else(|| BackendError::Rejected {
            status: 401,
            message: "Auth session missing!".to_string(),
        })
    }

    /// Keep the session from a token response and return its identity.
    fn accept_session(&self, value: Value) -> Result<AuthIdentity, BackendError> {
        let identity = identity_from(&value)?;
        if let Some(token) = value.get("access_token").and_then(Value::as_str) {
            self.store_session(Some(AuthSession {
                access_token: SecretString::from(token.to_string()),
                identity: identity.clone(),
            }));
        }
        Ok(identity)
    }
}

/// Token responses nest the identity under `user`; sign-up without a session returns it bare.
fn identity_from(value: &Value) -> Result<AuthIdentity, BackendError> {
    let user = value.get("user").filter(|user| !user.is_null()).unwrap_or(value);
    serde_json::from_value(user.clone()).map_err(|err| BackendError::Decode(err.to_string()))
}

fn target_body(target: &PasscodeTarget) -> Value {
    match target {
        PasscodeTarget::Email(email) => json!({ "email": email }),
        PasscodeTarget::Sms(phone) => json!({ "phone": phone }),
    }
}

impl std::fmt::Debug for AuthClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthClient")
            .field("base_url", &self.base_url.as_str())
            .field("anon_key", &"***")
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl AuthProvider for AuthClient {
    #[instrument(skip(self, request), fields(email = %request.email))]
    async fn create_identity(&self, request: &NewIdentity) -> Result<AuthIdentity, BackendError> {
        let body = json!({
            "email": request.email,
            "phone": request.phone,
            "password": request.password.expose_secret(),
            "data": request.metadata,
        });
        let value = self.call(Method::POST, "signup", Some(body), None).await?;
        let identity = self.accept_session(value)?;
        debug!(identity_id = %identity.id, "auth identity created");
        Ok(identity)
    }

    #[instrument(skip(self, password))]
    async fn sign_in(
        &self,
        email: &str,
        password: &SecretString,
    ) -> Result<AuthIdentity, BackendError> {
        let body = json!({ "email": email, "password": password.expose_secret() });
        let value = self
            .call(Method::POST, "token?grant_type=password", Some(body), None)
            .await?;
        self.accept_session(value)
    }

    #[instrument(skip(self, metadata))]
    async fn update_identity(
        &self,
        identity_id: &str,
        metadata: &Value,
    ) -> Result<(), BackendError> {
        let token = self.require_token()?;
        let value = self
            .call(Method::PUT, "user", Some(json!({ "data": metadata })), Some(&token))
            .await?;

        let updated = identity_from(&value)?;
        if updated.id != identity_id {
            return Err(BackendError::Rejected {
                status: 403,
                message: "signed-in identity does not match the account being updated".to_string(),
            });
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn send_one_time_passcode(&self, target: &PasscodeTarget) -> Result<(), BackendError> {
        let mut body = target_body(target);
        body["create_user"] = Value::Bool(false);
        self.call(Method::POST, "otp", Some(body), None).await?;
        Ok(())
    }

    #[instrument(skip(self, code))]
    async fn verify_one_time_passcode(
        &self,
        target: &PasscodeTarget,
        code: &str,
    ) -> Result<AuthIdentity, BackendError> {
        let mut body = target_body(target);
        body["token"] = Value::String(code.to_string());
        body["type"] = Value::String(
            match target {
                PasscodeTarget::Email(_) => "email",
                PasscodeTarget::Sms(_) => "sms",
            }
            .to_string(),
        );
        let value = self.call(Method::POST, "verify", Some(body), None).await?;
        self.accept_session(value)
    }

    #[instrument(skip(self))]
    async fn sign_out(&self) -> Result<(), BackendError> {
        let Some(token) = self.access_token() else {
            return Ok(());
        };
        self.store_session(None);
        self.call(Method::POST, "logout", None, Some(&token)).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn current_identity(&self) -> Result<Option<AuthIdentity>, BackendError> {
        let Some(token) = self.access_token() else {
            return Ok(None);
        };
        match self.call(Method::GET, "user", None, Some(&token)).await {
            Ok(value) => identity_from(&value).map(Some),
            Err(BackendError::Rejected { status: 401, .. }) => {
                self.store_session(None);
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }
}

impl AuthClient {
    /// Identity of the in-memory session, without a network round trip.
    #[must_use]
    pub fn cached_identity(&self) -> Option<AuthIdentity> {
        self.session
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .as_ref()
            .map(|session| session.identity.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    #[test]
    fn identity_is_read_from_either_shape() -> Result<()> {
        let token_response = json!({
            "access_token": "t",
            "user": { "id": "u-1", "email": "ada@example.com", "user_metadata": { "user_id": "u-1" } }
        });
        let identity = identity_from(&token_response)?;
        assert_eq!(identity.id, "u-1");
        assert_eq!(identity.metadata["user_id"], "u-1");

        let bare = json!({ "id": "u-2", "phone": "15550000" });
        assert_eq!(identity_from(&bare)?.phone.as_deref(), Some("15550000"));
        Ok(())
    }

    #[test]
    fn passcode_bodies_match_channel() {
        assert_eq!(
            target_body(&PasscodeTarget::Email("ada@example.com".to_string())),
            json!({ "email": "ada@example.com" })
        );
        assert_eq!(
            target_body(&PasscodeTarget::Sms("+15550000".to_string())),
            json!({ "phone": "+15550000" })
        );
    }

    #[tokio::test]
    async fn session_is_kept_from_token_response() -> Result<()> {
        let client = AuthClient::new(Url::parse("http://127.0.0.1:9/auth/v1")?, SecretString::from("anon".to_string()))?;
        assert!(client.current_identity().await?.is_none());
        assert!(client.require_token().is_err());

        let identity = client.accept_session(json!({
            "access_token": "token",
            "user": { "id": "u-1" }
        }))?;
        assert_eq!(client.cached_identity(), Some(identity));
        assert!(client.require_token().is_ok());
        Ok(())
    }
}
