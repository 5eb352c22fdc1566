//! Command implementations.

pub mod account;
pub mod auth;
pub mod cart;
pub mod catalog;
pub mod checkout;
pub mod support;

use url::Url;

use dulcenube_storefront::profile::{Profile, ProfileService};
use dulcenube_storefront::session::{AuthSnapshot, AuthState, Bootstrapped};
use dulcenube_storefront::supabase::Session;
use dulcenube_storefront::{AppError, Storefront};

/// A started storefront: bootstrapped session plus live auth state.
pub struct Context {
    pub storefront: Storefront,
    pub bootstrapped: Bootstrapped,
    auth: AuthState<ProfileService>,
}

impl Context {
    /// Bootstrap the session from `location` and wait for the profile.
    pub async fn start(storefront: Storefront, location: &Url) -> Self {
        let bootstrapped = storefront.bootstrap(location).await;
        let auth = storefront.start_auth_state(bootstrapped.session.clone());
        auth.settled().await;

        Self {
            storefront,
            bootstrapped,
            auth,
        }
    }

    /// Latest published auth state.
    pub fn snapshot(&self) -> AuthSnapshot {
        self.auth.snapshot()
    }

    /// The signed-in session, or `Unauthorized`.
    pub fn require_session(&self) -> Result<Session, AppError> {
        self.snapshot()
            .session
            .ok_or_else(|| AppError::Unauthorized("no signed-in session".to_string()))
    }

    /// Stop listening for auth events.
    pub fn finish(self) {
        self.auth.shutdown();
    }
}

/// Greeting line for the signed-in shopper.
pub fn greeting(session: &Session, profile: Option<&Profile>) -> String {
    let name = profile.map_or_else(
        || session.user.email.as_deref().unwrap_or("Usuario"),
        |p| p.display_name(&session.user),
    );
    format!("Hola, {name}")
}
