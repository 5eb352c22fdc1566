//! GoTrue auth client.
//!
//! Uses OAuth 2.0 with PKCE for both magic links and social providers.
//!
//! # Flow
//!
//! 1. `sign_in_with_otp()` / `sign_in_with_oauth()` store a PKCE verifier in
//!    local storage and send the shopper off with the matching challenge
//! 2. The backend redirects back to the storefront with `?code=...`
//! 3. `exchange_code_for_session()` trades the code and verifier for a session
//! 4. The session is persisted under `sb-<project-ref>-auth-token` and every
//!    change is published to `subscribe()`

use std::sync::Arc;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::Rng;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, info, instrument, warn};
use url::Url;

use dulcenube_core::Email;

use super::types::{AuthChangeEvent, AuthEvent, Session, User};
use super::{SupabaseError, read_empty, read_json};
use crate::config::{SupabaseConfig, api_key};
use crate::session::AuthProvider;
use crate::storage::Storage;

/// Length of the PKCE code verifier.
const CODE_VERIFIER_LENGTH: usize = 56;

/// Capacity of the auth event channel.
const EVENT_CHANNEL_CAPACITY: usize = 32;

// =============================================================================
// PKCE
// =============================================================================

/// Generate a PKCE code verifier from the RFC 7636 unreserved alphabet.
fn generate_code_verifier() -> String {
    const CHARSET: &[u8] =
        b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-._~";
    let mut rng = rand::rng();
    (0..CODE_VERIFIER_LENGTH)
        .map(|_| {
            let idx = rng.random_range(0..CHARSET.len());
            CHARSET.get(idx).map_or('a', |&b| char::from(b))
        })
        .collect()
}

/// S256 code challenge for a verifier.
fn code_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// Read the `exp` claim of a JWT without verifying it.
fn jwt_expiry(token: &str) -> Option<i64> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    claims.get("exp")?.as_i64()
}

// =============================================================================
// Request bodies
// =============================================================================

#[derive(Serialize)]
struct PkceGrant<'a> {
    auth_code: &'a str,
    code_verifier: &'a str,
}

#[derive(Serialize)]
struct RefreshGrant<'a> {
    refresh_token: &'a str,
}

#[derive(Serialize)]
struct OtpRequest<'a> {
    email: &'a str,
    create_user: bool,
    data: serde_json::Map<String, serde_json::Value>,
    code_challenge: &'a str,
    code_challenge_method: &'static str,
}

// =============================================================================
// AuthClient
// =============================================================================

/// Client for the GoTrue auth API.
///
/// Cloning is cheap; clones share the current session and event channel.
#[derive(Clone)]
pub struct AuthClient {
    inner: Arc<AuthClientInner>,
}

struct AuthClientInner {
    client: reqwest::Client,
    auth_url: Url,
    api_key: String,
    storage: Arc<dyn Storage>,
    storage_key: String,
    events: broadcast::Sender<AuthEvent>,
    current: RwLock<Option<Session>>,
}

impl std::fmt::Debug for AuthClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthClient")
            .field("auth_url", &self.inner.auth_url.as_str())
            .field("storage_key", &self.inner.storage_key)
            .finish_non_exhaustive()
    }
}

impl AuthClient {
    /// Create a new auth client persisting its session in `storage`.
    #[must_use]
    pub fn new(config: &SupabaseConfig, storage: Arc<dyn Storage>) -> Self {
        let auth_url = config
            .url
            .join("auth/v1/")
            .unwrap_or_else(|_| config.url.clone());
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            inner: Arc::new(AuthClientInner {
                client: reqwest::Client::new(),
                auth_url,
                api_key: api_key(config).to_string(),
                storage,
                storage_key: config.session_storage_key(),
                events,
                current: RwLock::new(None),
            }),
        }
    }

    /// Local storage key holding the persisted session.
    #[must_use]
    pub fn storage_key(&self) -> &str {
        &self.inner.storage_key
    }

    fn verifier_key(&self) -> String {
        format!("{}-code-verifier", self.inner.storage_key)
    }

    fn endpoint(&self, path: &str) -> Result<Url, SupabaseError> {
        Ok(self.inner.auth_url.join(path)?)
    }

    fn request(&self, method: reqwest::Method, url: Url, bearer: Option<&str>) -> reqwest::RequestBuilder {
        let token = bearer.unwrap_or(&self.inner.api_key);
        self.inner
            .client
            .request(method, url)
            .header("apikey", &self.inner.api_key)
            .bearer_auth(token)
    }

    /// Subscribe to session changes.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.inner.events.subscribe()
    }

    /// Access token of the current in-memory session.
    pub async fn access_token(&self) -> Option<String> {
        self.inner
            .current
            .read()
            .await
            .as_ref()
            .map(|s| s.access_token.clone())
    }

    // -------------------------------------------------------------------------
    // Session persistence
    // -------------------------------------------------------------------------

    fn emit(&self, kind: AuthChangeEvent, session: Option<Session>) {
        debug!(event = %kind, "Auth state change");
        if self.inner.events.send(AuthEvent::new(kind, session)).is_err() {
            debug!("No auth event subscribers");
        }
    }

    fn load_persisted(&self) -> Option<Session> {
        let raw = self.inner.storage.get_item(&self.inner.storage_key)?;
        match serde_json::from_str::<Session>(&raw) {
            Ok(session) => Some(session),
            Err(e) => {
                warn!(error = %e, "Discarding unreadable persisted session");
                if let Err(e) = self.inner.storage.remove_item(&self.inner.storage_key) {
                    warn!(error = %e, "Failed to remove unreadable session");
                }
                None
            }
        }
    }

    async fn save_session(&self, session: &Session) -> Result<(), SupabaseError> {
        let json = serde_json::to_string(session)?;
        self.inner
            .storage
            .set_item(&self.inner.storage_key, &json)?;
        *self.inner.current.write().await = Some(session.clone());
        Ok(())
    }

    async fn remove_session(&self) {
        *self.inner.current.write().await = None;
        if let Err(e) = self.inner.storage.remove_item(&self.inner.storage_key) {
            warn!(error = %e, "Failed to remove persisted session");
        }
    }

    /// Generate a PKCE pair, storing the verifier for the later exchange.
    fn start_pkce(&self) -> Result<String, SupabaseError> {
        let verifier = generate_code_verifier();
        self.inner
            .storage
            .set_item(&self.verifier_key(), &verifier)?;
        Ok(code_challenge(&verifier))
    }

    // -------------------------------------------------------------------------
    // Session API
    // -------------------------------------------------------------------------

    /// Get the current session, loading it from storage and refreshing it if
    /// the access token has expired.
    ///
    /// # Errors
    ///
    /// Returns an error if an expired session could not be refreshed; the
    /// stale session is removed and `SignedOut` is published.
    #[instrument(skip(self))]
    pub async fn get_session(&self) -> Result<Option<Session>, SupabaseError> {
        let cached = self.inner.current.read().await.clone();
        let Some(session) = cached.or_else(|| self.load_persisted()) else {
            return Ok(None);
        };

        if !session.is_expired() {
            *self.inner.current.write().await = Some(session.clone());
            return Ok(Some(session));
        }

        debug!("Persisted session expired, refreshing");
        match self.refresh_with(&session.refresh_token).await {
            Ok(refreshed) => Ok(Some(refreshed)),
            Err(e) => {
                warn!(error = %e, "Session refresh failed, signing out locally");
                self.remove_session().await;
                self.emit(AuthChangeEvent::SignedOut, None);
                Err(e)
            }
        }
    }

    /// Exchange an authorization code for a session using the stored PKCE
    /// verifier.
    ///
    /// # Errors
    ///
    /// Returns an error if no verifier is stored or the backend rejects the
    /// code.
    #[instrument(skip(self, code))]
    pub async fn exchange_code_for_session(&self, code: &str) -> Result<Session, SupabaseError> {
        let verifier_key = self.verifier_key();
        let verifier = self
            .inner
            .storage
            .get_item(&verifier_key)
            .ok_or_else(|| SupabaseError::Auth("no PKCE code verifier stored".to_string()))?;

        let mut url = self.endpoint("token")?;
        url.query_pairs_mut().append_pair("grant_type", "pkce");

        let response = self
            .request(reqwest::Method::POST, url, None)
            .json(&PkceGrant {
                auth_code: code,
                code_verifier: &verifier,
            })
            .send()
            .await?;
        let session = read_json::<Session>(response)
            .await?
            .with_expiry_from(chrono::Utc::now().timestamp());

        if let Err(e) = self.inner.storage.remove_item(&verifier_key) {
            warn!(error = %e, "Failed to remove PKCE verifier");
        }
        self.save_session(&session).await?;
        info!(user_id = %session.user_id(), "Signed in with authorization code");
        self.emit(AuthChangeEvent::SignedIn, Some(session.clone()));
        Ok(session)
    }

    /// Install a session from an access/refresh token pair.
    ///
    /// Expired access tokens are refreshed; otherwise the user is fetched with
    /// the access token.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend rejects the tokens.
    #[instrument(skip_all)]
    pub async fn set_session(
        &self,
        access_token: &str,
        refresh_token: &str,
    ) -> Result<Session, SupabaseError> {
        let now = chrono::Utc::now().timestamp();
        let expires_at = jwt_expiry(access_token);

        if expires_at.is_some_and(|exp| exp <= now) {
            debug!("Provided access token expired, refreshing");
            return self.refresh_with(refresh_token).await;
        }

        let user = self.get_user(access_token).await?;
        let session = Session {
            access_token: access_token.to_string(),
            refresh_token: refresh_token.to_string(),
            expires_in: expires_at.map_or(0, |exp| exp - now),
            expires_at,
            token_type: "bearer".to_string(),
            user,
            provider_token: None,
        };

        self.save_session(&session).await?;
        info!(user_id = %session.user_id(), "Installed session from redirect tokens");
        self.emit(AuthChangeEvent::SignedIn, Some(session.clone()));
        Ok(session)
    }

    /// Refresh the current session.
    ///
    /// # Errors
    ///
    /// Returns `SupabaseError::Auth` if there is no session, or the backend
    /// error if the refresh token is rejected.
    #[instrument(skip(self))]
    pub async fn refresh_session(&self) -> Result<Session, SupabaseError> {
        let cached = self.inner.current.read().await.clone();
        let session = cached
            .or_else(|| self.load_persisted())
            .ok_or_else(|| SupabaseError::Auth("no session to refresh".to_string()))?;
        self.refresh_with(&session.refresh_token).await
    }

    async fn refresh_with(&self, refresh_token: &str) -> Result<Session, SupabaseError> {
        let mut url = self.endpoint("token")?;
        url.query_pairs_mut().append_pair("grant_type", "refresh_token");

        let response = self
            .request(reqwest::Method::POST, url, None)
            .json(&RefreshGrant { refresh_token })
            .send()
            .await?;
        let session = read_json::<Session>(response)
            .await?
            .with_expiry_from(chrono::Utc::now().timestamp());

        self.save_session(&session).await?;
        debug!(user_id = %session.user_id(), "Session refreshed");
        self.emit(AuthChangeEvent::TokenRefreshed, Some(session.clone()));
        Ok(session)
    }

    /// Sign out. The local session is always cleared; a failed remote logout
    /// is only logged.
    ///
    /// # Errors
    ///
    /// Currently infallible; kept fallible for callers that treat sign-out as
    /// a user action.
    #[instrument(skip(self))]
    pub async fn sign_out(&self) -> Result<(), SupabaseError> {
        let cached = self.inner.current.read().await.clone();
        if let Some(session) = cached.or_else(|| self.load_persisted()) {
            if let Err(e) = self.remote_logout(&session.access_token).await {
                warn!(error = %e, "Remote sign-out failed");
            }
        }

        self.remove_session().await;
        info!("Signed out");
        self.emit(AuthChangeEvent::SignedOut, None);
        Ok(())
    }

    async fn remote_logout(&self, access_token: &str) -> Result<(), SupabaseError> {
        let mut url = self.endpoint("logout")?;
        url.query_pairs_mut().append_pair("scope", "global");
        let response = self
            .request(reqwest::Method::POST, url, Some(access_token))
            .send()
            .await?;
        read_empty(response).await
    }

    /// Send a magic link to `email`, creating the user if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the verifier cannot be stored or the backend
    /// rejects the request (including rate limiting).
    #[instrument(skip(self, email), fields(email_domain = %email.domain()))]
    pub async fn sign_in_with_otp(
        &self,
        email: &Email,
        redirect_to: &Url,
    ) -> Result<(), SupabaseError> {
        let challenge = self.start_pkce()?;

        let mut url = self.endpoint("otp")?;
        url.query_pairs_mut()
            .append_pair("redirect_to", redirect_to.as_str());

        let response = self
            .request(reqwest::Method::POST, url, None)
            .json(&OtpRequest {
                email: email.as_str(),
                create_user: true,
                data: serde_json::Map::new(),
                code_challenge: &challenge,
                code_challenge_method: "s256",
            })
            .send()
            .await?;
        read_empty(response).await?;

        info!("Magic link requested");
        Ok(())
    }

    /// Build the provider authorize URL for a social sign-in.
    ///
    /// # Errors
    ///
    /// Returns an error if the verifier cannot be stored.
    pub fn sign_in_with_oauth(&self, provider: &str, redirect_to: &Url) -> Result<Url, SupabaseError> {
        let challenge = self.start_pkce()?;

        let mut url = self.endpoint("authorize")?;
        url.query_pairs_mut()
            .append_pair("provider", provider)
            .append_pair("redirect_to", redirect_to.as_str())
            .append_pair("code_challenge", &challenge)
            .append_pair("code_challenge_method", "s256");

        debug!(provider, "Built OAuth authorize URL");
        Ok(url)
    }

    /// Fetch the user owning `access_token`.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is rejected.
    #[instrument(skip_all)]
    pub async fn get_user(&self, access_token: &str) -> Result<User, SupabaseError> {
        let url = self.endpoint("user")?;
        let response = self
            .request(reqwest::Method::GET, url, Some(access_token))
            .send()
            .await?;
        read_json::<User>(response).await
    }
}

impl AuthProvider for AuthClient {
    fn get_session(
        &self,
    ) -> impl Future<Output = Result<Option<Session>, SupabaseError>> + Send {
        Self::get_session(self)
    }

    fn exchange_code_for_session(
        &self,
        code: &str,
    ) -> impl Future<Output = Result<Session, SupabaseError>> + Send {
        Self::exchange_code_for_session(self, code)
    }

    fn set_session(
        &self,
        access_token: &str,
        refresh_token: &str,
    ) -> impl Future<Output = Result<Session, SupabaseError>> + Send {
        Self::set_session(self, access_token, refresh_token)
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        Self::subscribe(self)
    }
}
