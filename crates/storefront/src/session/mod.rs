//! Session bootstrap and published auth state.
//!
//! - [`redirect`] - Finding and scrubbing auth artifacts in a redirect URL
//! - [`bootstrap`] - One-shot start-up reconciliation of redirect artifacts
//!   with the backend session
//! - [`state`] - Published session/profile snapshot kept current by the
//!   backend's session-change stream
//!
//! The backend is reached through [`AuthProvider`] and profiles through
//! [`ProfileLoader`], so both can be replaced in tests.

pub mod bootstrap;
pub mod redirect;
pub mod state;

pub use bootstrap::{Bootstrapped, PROCESSED_CODE_KEY, bootstrap};
pub use redirect::{OAUTH_PARAMS, RedirectArtifacts, RedirectError, TokenPair, inspect, scrub};
pub use state::{AuthSnapshot, AuthState};

use tokio::sync::broadcast;

use crate::profile::Profile;
use crate::supabase::{AuthEvent, Session, SupabaseError};

/// The auth operations the bootstrap and auth state depend on.
pub trait AuthProvider: Send + Sync {
    /// The persisted session, refreshed if expired.
    fn get_session(&self) -> impl Future<Output = Result<Option<Session>, SupabaseError>> + Send;

    /// Trade an authorization code for a session.
    fn exchange_code_for_session(
        &self,
        code: &str,
    ) -> impl Future<Output = Result<Session, SupabaseError>> + Send;

    /// Install a session from an access/refresh token pair.
    fn set_session(
        &self,
        access_token: &str,
        refresh_token: &str,
    ) -> impl Future<Output = Result<Session, SupabaseError>> + Send;

    /// Stream of session changes.
    fn subscribe(&self) -> broadcast::Receiver<AuthEvent>;
}

/// Loads the profile belonging to a session.
pub trait ProfileLoader: Send + Sync {
    /// Ensure a profile row exists for the session's user and read it back.
    ///
    /// Failures are absorbed: `None` means "no profile available", never
    /// "session invalid".
    fn reconcile(&self, session: &Session) -> impl Future<Output = Option<Profile>> + Send;
}
