//! Identity provider client and session events.
//!
//! The relay never talks to the identity provider's HTTP API directly. It
//! consumes the [`IdentityProvider`] trait: a session-state query, an access
//! token source for the other adapters, and a broadcast stream of
//! [`AuthEvent`]s that drives the signed-in/signed-out transitions.

use std::fmt;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{broadcast, Mutex as AsyncMutex, RwLock};

use crate::util::{describe_http_failure, normalize_text_option, unix_timestamp_now};

const EXPIRY_SKEW_SECONDS: i64 = 60;
const EVENT_CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    pub email: Option<String>,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSession {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: i64,
    pub user: AuthUser,
}

impl AuthSession {
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at <= unix_timestamp_now() + EXPIRY_SKEW_SECONDS
    }
}

impl fmt::Debug for AuthSession {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AuthSession")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .field("user", &self.user)
            .finish()
    }
}

/// Session notifications published by an identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    SignedIn(AuthUser),
    SignedOut,
    SessionExpired,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Identity provider is not configured.")]
    NotConfigured,
    #[error("Invalid auth configuration: {0}")]
    InvalidConfiguration(&'static str),
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Failed to parse JSON payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Auth API error: {0}")]
    Api(String),
    #[error("Session storage error: {0}")]
    SessionStore(String),
    #[error("No active session")]
    NotSignedIn,
}

pub type AuthResult<T> = Result<T, AuthError>;

/// Where a provider keeps the session between process runs.
pub trait SessionPersistence: Send + Sync + 'static {
    fn load_session(&self) -> AuthResult<Option<AuthSession>>;
    fn save_session(&self, session: &AuthSession) -> AuthResult<()>;
    fn clear_session(&self) -> AuthResult<()>;
}

/// Process-local session storage.
#[derive(Debug, Clone, Default)]
pub struct MemorySessionStore {
    session: Arc<Mutex<Option<AuthSession>>>,
}

impl SessionPersistence for MemorySessionStore {
    fn load_session(&self) -> AuthResult<Option<AuthSession>> {
        let guard = self
            .session
            .lock()
            .map_err(|error| AuthError::SessionStore(error.to_string()))?;
        Ok(guard.clone())
    }

    fn save_session(&self, session: &AuthSession) -> AuthResult<()> {
        let mut guard = self
            .session
            .lock()
            .map_err(|error| AuthError::SessionStore(error.to_string()))?;
        *guard = Some(session.clone());
        Ok(())
    }

    fn clear_session(&self) -> AuthResult<()> {
        let mut guard = self
            .session
            .lock()
            .map_err(|error| AuthError::SessionStore(error.to_string()))?;
        *guard = None;
        Ok(())
    }
}

/// Remote identity provider as seen by the relay.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn sign_in(&self, email: &str, password: &str) -> AuthResult<AuthSession>;

    async fn sign_out(&self) -> AuthResult<()>;

    /// The current session, if any. Does not touch the network.
    async fn current_session(&self) -> Option<AuthSession>;

    /// A valid access token, refreshing the session when it is about to expire.
    async fn access_token(&self) -> AuthResult<String>;

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent>;
}

/// GoTrue-compatible (`/auth/v1`) identity provider.
pub struct SupabaseIdentityProvider<S: SessionPersistence> {
    auth_url: String,
    anon_key: String,
    client: Client,
    store: S,
    session: RwLock<Option<AuthSession>>,
    /// Held for the duration of a token refresh; refresh tokens are single-use.
    refreshing: AsyncMutex<()>,
    events: broadcast::Sender<AuthEvent>,
}

impl<S: SessionPersistence> SupabaseIdentityProvider<S> {
    pub fn new(url: impl AsRef<str>, anon_key: impl Into<String>, store: S) -> AuthResult<Self> {
        let auth_url = normalize_auth_url(url.as_ref())?;
        let anon_key = anon_key.into().trim().to_string();
        if anon_key.is_empty() {
            return Err(AuthError::InvalidConfiguration("API key must not be empty"));
        }

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Ok(Self {
            auth_url,
            anon_key,
            client: Client::builder().build()?,
            store,
            session: RwLock::new(None),
            refreshing: AsyncMutex::new(()),
            events,
        })
    }

    /// Load the persisted session, refreshing it if expired.
    ///
    /// Publishes `SignedIn` when a usable session was restored.
    pub async fn restore_session(&self) -> AuthResult<Option<AuthSession>> {
        let Some(stored_session) = self.store.load_session()? else {
            return Ok(None);
        };

        let session = if stored_session.is_expired() {
            match self.refresh_session(&stored_session.refresh_token).await {
                Ok(refreshed) => refreshed,
                Err(error) => {
                    tracing::warn!("Failed to refresh persisted session: {}", error);
                    self.store.clear_session()?;
                    return Ok(None);
                }
            }
        } else {
            stored_session
        };

        *self.session.write().await = Some(session.clone());
        self.publish(AuthEvent::SignedIn(session.user.clone()));
        Ok(Some(session))
    }

    pub async fn refresh_session(&self, refresh_token: &str) -> AuthResult<AuthSession> {
        let session = self.request_refresh(refresh_token).await?;
        self.store.save_session(&session)?;
        Ok(session)
    }

    async fn request_refresh(&self, refresh_token: &str) -> AuthResult<AuthSession> {
        if refresh_token.trim().is_empty() {
            return Err(AuthError::InvalidConfiguration(
                "Refresh token must not be empty",
            ));
        }

        let payload = serde_json::json!({
            "refresh_token": refresh_token,
        });
        let request = self.public_request(
            self.client
                .post(format!("{}/token", self.auth_url))
                .query(&[("grant_type", "refresh_token")])
                .json(&payload),
        );
        self.send_auth_request(request).await?.into_session()
    }

    fn public_request(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {}", self.anon_key))
    }

    async fn send_auth_request(&self, request: RequestBuilder) -> AuthResult<AuthTokenResponse> {
        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Api(describe_http_failure(status, &body)));
        }
        Ok(response.json::<AuthTokenResponse>().await?)
    }

    async fn drop_session(&self, event: AuthEvent) -> AuthResult<()> {
        *self.session.write().await = None;
        let cleared = self.store.clear_session();
        self.publish(event);
        cleared
    }

    fn publish(&self, event: AuthEvent) {
        tracing::debug!(?event, "Publishing auth event");
        // No receivers is not an error: nobody is watching the session yet.
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl<S: SessionPersistence> IdentityProvider for SupabaseIdentityProvider<S> {
    async fn sign_in(&self, email: &str, password: &str) -> AuthResult<AuthSession> {
        validate_credentials(email, password)?;

        let payload = serde_json::json!({
            "email": email.trim(),
            "password": password,
        });
        let request = self.public_request(
            self.client
                .post(format!("{}/token", self.auth_url))
                .query(&[("grant_type", "password")])
                .json(&payload),
        );

        let session = self.send_auth_request(request).await?.into_session()?;
        self.store.save_session(&session)?;
        *self.session.write().await = Some(session.clone());
        tracing::info!(user_id = %session.user.id, "Signed in");
        self.publish(AuthEvent::SignedIn(session.user.clone()));
        Ok(session)
    }

    async fn sign_out(&self) -> AuthResult<()> {
        let current = self.session.read().await.clone();
        let remote_result = match current {
            Some(session) => {
                let response = self
                    .client
                    .post(format!("{}/logout", self.auth_url))
                    .header("apikey", &self.anon_key)
                    .bearer_auth(&session.access_token)
                    .send()
                    .await;
                match response {
                    Ok(response)
                        if response.status().is_success()
                            || response.status() == StatusCode::UNAUTHORIZED =>
                    {
                        Ok(())
                    }
                    Ok(response) => {
                        let status = response.status();
                        let body = response.text().await.unwrap_or_default();
                        Err(AuthError::Api(describe_http_failure(status, &body)))
                    }
                    Err(error) => Err(AuthError::Http(error)),
                }
            }
            None => Ok(()),
        };

        // The local session is dropped even when the remote logout failed.
        self.drop_session(AuthEvent::SignedOut).await?;
        tracing::info!("Signed out");
        remote_result
    }

    async fn current_session(&self) -> Option<AuthSession> {
        self.session.read().await.clone()
    }

    async fn access_token(&self) -> AuthResult<String> {
        let Some(session) = self.session.read().await.clone() else {
            return Err(AuthError::NotSignedIn);
        };
        if !session.is_expired() {
            return Ok(session.access_token);
        }

        let _refreshing = self.refreshing.lock().await;
        // Another caller may have refreshed or dropped the session while we waited.
        let Some(session) = self.session.read().await.clone() else {
            return Err(AuthError::NotSignedIn);
        };
        if !session.is_expired() {
            return Ok(session.access_token);
        }

        match self.request_refresh(&session.refresh_token).await {
            Ok(refreshed) => {
                let mut current = self.session.write().await;
                match current.as_ref() {
                    Some(active) if active.refresh_token == session.refresh_token => {
                        self.store.save_session(&refreshed)?;
                        let token = refreshed.access_token.clone();
                        *current = Some(refreshed);
                        Ok(token)
                    }
                    // Signed in again while refreshing.
                    Some(active) => Ok(active.access_token.clone()),
                    None => Err(AuthError::NotSignedIn),
                }
            }
            Err(error) => {
                let unchanged = self
                    .session
                    .read()
                    .await
                    .as_ref()
                    .is_some_and(|active| active.refresh_token == session.refresh_token);
                if unchanged {
                    tracing::warn!("Session refresh failed; treating session as expired: {}", error);
                    self.drop_session(AuthEvent::SessionExpired).await?;
                }
                Err(error)
            }
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}

pub fn normalize_auth_url(url: &str) -> AuthResult<String> {
    let trimmed = url.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(AuthError::InvalidConfiguration("Auth URL must not be empty"));
    }
    if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
        return Err(AuthError::InvalidConfiguration(
            "Auth URL must include http:// or https://",
        ));
    }
    if trimmed.ends_with("/auth/v1") {
        Ok(trimmed.to_string())
    } else {
        Ok(format!("{trimmed}/auth/v1"))
    }
}

fn validate_credentials(email: &str, password: &str) -> AuthResult<()> {
    if normalize_text_option(Some(email.to_string())).is_none() {
        return Err(AuthError::Api("Email is required".to_string()));
    }
    if password.trim().is_empty() {
        return Err(AuthError::Api("Password is required".to_string()));
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct AuthTokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_at: Option<i64>,
    expires_in: Option<i64>,
    user: Option<AuthTokenUser>,
}

impl AuthTokenResponse {
    fn into_session(self) -> AuthResult<AuthSession> {
        let expires_at = self.expires_at.or_else(|| {
            self.expires_in
                .map(|expires_in| unix_timestamp_now().saturating_add(expires_in))
        });

        match (self.access_token, self.refresh_token, expires_at, self.user) {
            (Some(access_token), Some(refresh_token), Some(expires_at), Some(user)) => {
                Ok(AuthSession {
                    access_token,
                    refresh_token,
                    expires_at,
                    user: user.into(),
                })
            }
            _ => Err(AuthError::Api(
                "Auth response did not include an active session".to_string(),
            )),
        }
    }
}

#[derive(Debug, Deserialize)]
struct AuthTokenUser {
    id: String,
    email: Option<String>,
}

impl From<AuthTokenUser> for AuthUser {
    fn from(value: AuthTokenUser) -> Self {
        Self {
            id: value.id,
            email: value.email,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn token_body(access_token: &str) -> serde_json::Value {
        json!({
            "access_token": access_token,
            "token_type": "bearer",
            "expires_in": 3600,
            "refresh_token": "refresh-1",
            "user": { "id": "user-1", "email": "user@example.com" }
        })
    }

    fn session(expires_at: i64) -> AuthSession {
        AuthSession {
            access_token: "stale-access".to_string(),
            refresh_token: "refresh-0".to_string(),
            expires_at,
            user: AuthUser {
                id: "user-1".to_string(),
                email: None,
            },
        }
    }

    #[test]
    fn normalize_auth_url_appends_auth_path() {
        let normalized = normalize_auth_url("https://demo.example.com").unwrap();
        assert_eq!(normalized, "https://demo.example.com/auth/v1");
    }

    #[test]
    fn normalize_auth_url_keeps_existing_auth_path() {
        let normalized = normalize_auth_url("https://demo.example.com/auth/v1/").unwrap();
        assert_eq!(normalized, "https://demo.example.com/auth/v1");
    }

    #[test]
    fn new_rejects_empty_api_key() {
        let result =
            SupabaseIdentityProvider::new("https://demo.example.com", " ", MemorySessionStore::default());
        assert!(matches!(result, Err(AuthError::InvalidConfiguration(_))));
    }

    #[test]
    fn session_debug_redacts_tokens() {
        let session = AuthSession {
            access_token: "secret-access-token".to_string(),
            refresh_token: "secret-refresh-token".to_string(),
            expires_at: 1_700_000_000,
            user: AuthUser {
                id: "user".to_string(),
                email: None,
            },
        };
        let rendered = format!("{session:?}");
        assert!(!rendered.contains("secret-access-token"));
        assert!(!rendered.contains("secret-refresh-token"));
        assert!(rendered.contains("[REDACTED]"));
    }

    #[test]
    fn response_without_tokens_is_an_error() {
        let response = AuthTokenResponse {
            access_token: None,
            refresh_token: None,
            expires_at: None,
            expires_in: None,
            user: Some(AuthTokenUser {
                id: "user".to_string(),
                email: None,
            }),
        };
        assert!(response.into_session().is_err());
    }

    #[tokio::test]
    async fn sign_in_persists_session_and_publishes_event() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .and(query_param("grant_type", "password"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("access-1")))
            .expect(1)
            .mount(&server)
            .await;

        let store = MemorySessionStore::default();
        let provider = SupabaseIdentityProvider::new(server.uri(), "anon", store.clone()).unwrap();
        let mut events = provider.subscribe();

        let session = provider.sign_in("user@example.com", "pw").await.unwrap();
        assert_eq!(session.access_token, "access-1");
        assert_eq!(store.load_session().unwrap(), Some(session.clone()));
        assert_eq!(provider.access_token().await.unwrap(), "access-1");
        assert_eq!(
            events.recv().await.unwrap(),
            AuthEvent::SignedIn(session.user)
        );
    }

    #[tokio::test]
    async fn sign_in_surfaces_api_error_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": "invalid_grant",
                "error_description": "Invalid login credentials"
            })))
            .mount(&server)
            .await;

        let provider =
            SupabaseIdentityProvider::new(server.uri(), "anon", MemorySessionStore::default())
                .unwrap();
        let error = provider.sign_in("user@example.com", "bad").await.unwrap_err();
        assert_eq!(
            error.to_string(),
            "Auth API error: Invalid login credentials (400)"
        );
        assert!(provider.current_session().await.is_none());
    }

    #[tokio::test]
    async fn sign_out_clears_session_even_when_logout_fails() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("access-1")))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/logout"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let store = MemorySessionStore::default();
        let provider = SupabaseIdentityProvider::new(server.uri(), "anon", store.clone()).unwrap();
        provider.sign_in("user@example.com", "pw").await.unwrap();
        let mut events = provider.subscribe();

        assert!(provider.sign_out().await.is_err());
        assert!(provider.current_session().await.is_none());
        assert_eq!(store.load_session().unwrap(), None);
        assert_eq!(events.recv().await.unwrap(), AuthEvent::SignedOut);
    }

    #[tokio::test]
    async fn restore_session_refreshes_expired_session() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .and(query_param("grant_type", "refresh_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("fresh-access")))
            .expect(1)
            .mount(&server)
            .await;

        let store = MemorySessionStore::default();
        store.save_session(&session(0)).unwrap();
        let provider = SupabaseIdentityProvider::new(server.uri(), "anon", store.clone()).unwrap();
        let mut events = provider.subscribe();

        let restored = provider.restore_session().await.unwrap().unwrap();
        assert_eq!(restored.access_token, "fresh-access");
        assert!(matches!(events.recv().await.unwrap(), AuthEvent::SignedIn(_)));
    }

    #[tokio::test]
    async fn access_token_refresh_failure_expires_session() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .and(query_param("grant_type", "password"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "short-lived",
                "refresh_token": "refresh-1",
                "expires_at": 0,
                "user": { "id": "user-1" }
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .and(query_param("grant_type", "refresh_token"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let provider =
            SupabaseIdentityProvider::new(server.uri(), "anon", MemorySessionStore::default())
                .unwrap();
        provider.sign_in("user@example.com", "pw").await.unwrap();
        let mut events = provider.subscribe();

        assert!(provider.access_token().await.is_err());
        assert!(provider.current_session().await.is_none());
        assert_eq!(events.recv().await.unwrap(), AuthEvent::SessionExpired);
    }

    #[tokio::test]
    async fn concurrent_access_token_calls_share_one_refresh() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .and(query_param("grant_type", "password"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "short-lived",
                "refresh_token": "refresh-1",
                "expires_at": 0,
                "user": { "id": "user-1" }
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .and(query_param("grant_type", "refresh_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("fresh-access")))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .and(query_param("grant_type", "refresh_token"))
            .respond_with(
                ResponseTemplate::new(400).set_body_json(json!({ "msg": "Already Used" })),
            )
            .expect(0)
            .mount(&server)
            .await;

        let store = MemorySessionStore::default();
        let provider = SupabaseIdentityProvider::new(server.uri(), "anon", store.clone()).unwrap();
        provider.sign_in("user@example.com", "pw").await.unwrap();
        let mut events = provider.subscribe();

        let results = tokio::join!(
            provider.access_token(),
            provider.access_token(),
            provider.access_token(),
            provider.access_token(),
        );
        for result in [results.0, results.1, results.2, results.3] {
            assert_eq!(result.unwrap(), "fresh-access");
        }

        let current = provider.current_session().await.unwrap();
        assert_eq!(current.access_token, "fresh-access");
        assert_eq!(
            store.load_session().unwrap().unwrap().access_token,
            "fresh-access"
        );
        assert!(matches!(
            events.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn refresh_completing_after_sign_out_does_not_restore_session() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .and(query_param("grant_type", "password"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "short-lived",
                "refresh_token": "refresh-1",
                "expires_at": 0,
                "user": { "id": "user-1" }
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .and(query_param("grant_type", "refresh_token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(token_body("fresh-access"))
                    .set_delay(std::time::Duration::from_millis(200)),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/logout"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let store = MemorySessionStore::default();
        let provider = SupabaseIdentityProvider::new(server.uri(), "anon", store.clone()).unwrap();
        provider.sign_in("user@example.com", "pw").await.unwrap();

        let (token, signed_out) = tokio::join!(provider.access_token(), async {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            provider.sign_out().await
        });
        signed_out.unwrap();

        assert!(matches!(token, Err(AuthError::NotSignedIn)));
        assert!(provider.current_session().await.is_none());
        assert_eq!(store.load_session().unwrap(), None);
    }

    #[tokio::test]
    async fn access_token_without_session_is_not_signed_in() {
        let provider = SupabaseIdentityProvider::new(
            "https://demo.example.com",
            "anon",
            MemorySessionStore::default(),
        )
        .unwrap();
        assert!(matches!(
            provider.access_token().await,
            Err(AuthError::NotSignedIn)
        ));
    }
}
