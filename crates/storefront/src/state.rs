//! Storefront context shared across commands.

use std::sync::Arc;

use tracing::info;
use url::Url;

use dulcenube_core::Email;

use crate::account::AccountService;
use crate::cart::CartStore;
use crate::catalog::CatalogService;
use crate::checkout::CheckoutService;
use crate::config::StorefrontConfig;
use crate::error::AppError;
use crate::profile::ProfileService;
use crate::session::{AuthState, Bootstrapped, bootstrap};
use crate::storage::{FileStorage, MemoryStorage, Storage, StorageError};
use crate::supabase::{AuthClient, RestClient, Session};

/// OAuth provider offered on the sign-in screen.
pub const SOCIAL_PROVIDER: &str = "google";

/// Clients, services and storage for one storefront process.
///
/// This struct is cheaply cloneable via `Arc`. Local storage is durable
/// across runs; tab storage lives as long as the process.
#[derive(Clone)]
pub struct Storefront {
    inner: Arc<StorefrontInner>,
}

struct StorefrontInner {
    config: StorefrontConfig,
    local_storage: Arc<dyn Storage>,
    tab_storage: MemoryStorage,
    auth: AuthClient,
    rest: RestClient,
    catalog: CatalogService,
    checkout: CheckoutService,
    account: AccountService,
    profiles: Arc<ProfileService>,
}

impl std::fmt::Debug for Storefront {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storefront")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl Storefront {
    /// Create the storefront with file-backed local storage in
    /// `config.data_dir`, scoped to the storefront origin.
    ///
    /// # Errors
    ///
    /// Returns an error if the data directory cannot be opened.
    pub fn new(config: StorefrontConfig) -> Result<Self, StorageError> {
        let origin = config.base_url.origin().ascii_serialization();
        let local = FileStorage::open(&config.data_dir, &origin)?;
        Ok(Self::with_storage(config, Arc::new(local)))
    }

    /// Create the storefront on top of an existing local storage.
    #[must_use]
    pub fn with_storage(config: StorefrontConfig, local_storage: Arc<dyn Storage>) -> Self {
        let auth = AuthClient::new(&config.supabase, Arc::clone(&local_storage));
        let rest = RestClient::new(&config.supabase);

        Self {
            inner: Arc::new(StorefrontInner {
                catalog: CatalogService::new(rest.clone(), config.store.clone()),
                checkout: CheckoutService::new(rest.clone()),
                account: AccountService::new(rest.clone()),
                profiles: Arc::new(ProfileService::new(rest.clone())),
                tab_storage: MemoryStorage::new(),
                config,
                local_storage,
                auth,
                rest,
            }),
        }
    }

    /// Run the start-up session bootstrap against `location`.
    pub async fn bootstrap(&self, location: &Url) -> Bootstrapped {
        bootstrap(&self.inner.auth, &self.inner.tab_storage, location).await
    }

    /// Publish `initial` and keep the auth state current for as long as the
    /// returned handle lives.
    #[must_use]
    pub fn start_auth_state(&self, initial: Option<Session>) -> AuthState<ProfileService> {
        AuthState::start(
            initial,
            self.inner.auth.subscribe(),
            Arc::clone(&self.inner.profiles),
        )
    }

    /// Load the cart from local storage.
    #[must_use]
    pub fn cart(&self) -> CartStore {
        CartStore::load(Arc::clone(&self.inner.local_storage))
    }

    /// Data client acting as `session`'s user, or anonymously.
    #[must_use]
    pub fn rest_for(&self, session: Option<&Session>) -> RestClient {
        session.map_or_else(
            || self.inner.rest.clone(),
            |s| self.inner.rest.with_access_token(&s.access_token),
        )
    }

    /// Email a magic link that signs the shopper in (creating the account
    /// on first use).
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidEmail` for a malformed address and
    /// `AppError::Backend` if the request is rejected.
    pub async fn send_magic_link(&self, email: &str) -> Result<Email, AppError> {
        let email = Email::parse(email)?;
        self.inner
            .auth
            .sign_in_with_otp(&email, &self.inner.config.base_url)
            .await?;
        info!(email_domain = %email.domain(), "Magic link sent");
        Ok(email)
    }

    /// Authorize URL for the social sign-in provider.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Backend` if the PKCE verifier cannot be stored.
    pub fn social_sign_in_url(&self) -> Result<Url, AppError> {
        Ok(self
            .inner
            .auth
            .sign_in_with_oauth(SOCIAL_PROVIDER, &self.inner.config.base_url)?)
    }

    /// Sign out and forget the persisted session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Backend` if sign-out fails.
    pub async fn sign_out(&self) -> Result<(), AppError> {
        self.inner.auth.sign_out().await?;
        Ok(())
    }

    #[must_use]
    pub fn config(&self) -> &StorefrontConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn auth(&self) -> &AuthClient {
        &self.inner.auth
    }

    #[must_use]
    pub fn catalog(&self) -> &CatalogService {
        &self.inner.catalog
    }

    #[must_use]
    pub fn checkout(&self) -> &CheckoutService {
        &self.inner.checkout
    }

    #[must_use]
    pub fn account(&self) -> &AccountService {
        &self.inner.account
    }

    #[must_use]
    pub fn profiles(&self) -> &ProfileService {
        &self.inner.profiles
    }

    /// Durable local storage.
    #[must_use]
    pub fn local_storage(&self) -> &dyn Storage {
        self.inner.local_storage.as_ref()
    }

    /// Per-process tab storage.
    #[must_use]
    pub fn tab_storage(&self) -> &dyn Storage {
        &self.inner.tab_storage
    }
}
