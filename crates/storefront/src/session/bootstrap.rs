//! Start-up session bootstrap.
//!
//! Runs once per application start, before anything reads the session:
//!
//! 1. Inspect the URL for a code, a token pair, or an error
//! 2. Exchange the code unless this tab already exchanged it
//! 3. Install a fragment token pair
//! 4. Scrub auth parameters from the URL
//! 5. Converge on whatever session the backend reports as persisted
//!
//! Every failure is logged and absorbed; the result always carries a usable
//! (possibly absent) session and the scrubbed URL.

use tracing::{debug, info, instrument, warn};
use url::Url;

use super::AuthProvider;
use super::redirect::{inspect, scrub};
use crate::storage::Storage;
use crate::supabase::Session;

/// Session storage key recording the last exchanged authorization code.
pub const PROCESSED_CODE_KEY: &str = "dulcenube_oauth_processed_code";

/// Outcome of [`bootstrap`].
#[derive(Debug, Clone)]
pub struct Bootstrapped {
    /// The converged session, `None` when signed out or unreachable.
    pub session: Option<Session>,
    /// The URL with auth parameters removed.
    pub location: Url,
    /// Whether a code was exchanged during this run.
    pub code_exchanged: bool,
    /// Whether a fragment token pair was installed during this run.
    pub tokens_installed: bool,
}

/// Reconcile redirect artifacts in `location` with the backend session.
///
/// `session_storage` is the per-tab store guarding against exchanging the
/// same code twice.
#[instrument(skip_all, fields(path = %location.path()))]
pub async fn bootstrap<A>(auth: &A, session_storage: &dyn Storage, location: &Url) -> Bootstrapped
where
    A: AuthProvider,
{
    let artifacts = inspect(location);

    if let Some(error) = &artifacts.error {
        warn!(
            error = %error.error,
            error_code = error.error_code.as_deref().unwrap_or(""),
            description = error.description.as_deref().unwrap_or(""),
            "Auth redirect reported an error"
        );
    }

    let mut code_exchanged = false;
    if let Some(code) = &artifacts.code {
        let processed = session_storage.get_item(PROCESSED_CODE_KEY);
        if processed.as_deref() == Some(code.as_str()) {
            debug!("Authorization code already exchanged in this tab");
        } else {
            match auth.exchange_code_for_session(code).await {
                Ok(session) => {
                    info!(user_id = %session.user_id(), "Exchanged authorization code");
                    code_exchanged = true;
                    if let Err(e) = session_storage.set_item(PROCESSED_CODE_KEY, code) {
                        warn!(error = %e, "Failed to record processed authorization code");
                    }
                }
                Err(e) => warn!(error = %e, "Authorization code exchange failed"),
            }
        }
    }

    let mut tokens_installed = false;
    if let Some(tokens) = &artifacts.tokens {
        match auth
            .set_session(&tokens.access_token, &tokens.refresh_token)
            .await
        {
            Ok(session) => {
                info!(user_id = %session.user_id(), "Installed session from redirect tokens");
                tokens_installed = true;
            }
            Err(e) => warn!(error = %e, "Failed to install redirect tokens"),
        }
    }

    let location = scrub(location);

    let session = match auth.get_session().await {
        Ok(session) => session,
        Err(e) => {
            warn!(error = %e, "Could not resolve persisted session");
            None
        }
    };

    Bootstrapped {
        session,
        location,
        code_exchanged,
        tokens_installed,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::session::testing::{FakeAuth, session_for};
    use crate::storage::MemoryStorage;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_code_is_exchanged_once_per_tab() {
        let auth = FakeAuth::new(&["ABC123"]);
        let tab = MemoryStorage::new();
        let location = url("http://localhost:5173/?code=ABC123");

        let first = bootstrap(&auth, &tab, &location).await;
        assert!(first.code_exchanged);
        assert_eq!(first.location.as_str(), "http://localhost:5173/");
        assert_eq!(
            first.session.as_ref().map(|s| s.user_id().as_str()),
            Some("user-code")
        );
        assert_eq!(tab.get_item(PROCESSED_CODE_KEY).as_deref(), Some("ABC123"));

        // Re-running with the same URL (e.g. a reload before the address bar
        // was replaced) must not spend the code again.
        let second = bootstrap(&auth, &tab, &location).await;
        assert!(!second.code_exchanged);
        assert!(second.session.is_some());
        assert_eq!(auth.exchanges(), 1);
    }

    #[tokio::test]
    async fn test_new_tab_exchanges_again() {
        let auth = FakeAuth::new(&["ABC123"]);
        let location = url("http://localhost:5173/?code=ABC123");

        bootstrap(&auth, &MemoryStorage::new(), &location).await;
        bootstrap(&auth, &MemoryStorage::new(), &location).await;
        assert_eq!(auth.exchanges(), 2);
    }

    #[tokio::test]
    async fn test_failed_exchange_is_not_recorded() {
        let auth = FakeAuth::new(&[]);
        let tab = MemoryStorage::new();
        let location = url("http://localhost:5173/#/cuenta?code=BAD&tab=pedidos");

        let result = bootstrap(&auth, &tab, &location).await;
        assert!(!result.code_exchanged);
        assert!(result.session.is_none());
        assert_eq!(
            result.location.as_str(),
            "http://localhost:5173/#/cuenta?tab=pedidos"
        );
        assert!(tab.get_item(PROCESSED_CODE_KEY).is_none());

        bootstrap(&auth, &tab, &location).await;
        assert_eq!(auth.exchanges(), 2);
    }

    #[tokio::test]
    async fn test_fragment_tokens_are_installed_and_scrubbed() {
        let auth = FakeAuth::new(&[]);
        let tab = MemoryStorage::new();
        let location = url(
            "http://localhost:5173/#access_token=T1&refresh_token=T2&expires_in=3600&tab=pedidos",
        );

        let result = bootstrap(&auth, &tab, &location).await;
        assert!(result.tokens_installed);
        assert_eq!(
            *auth.set_session_calls.lock().unwrap(),
            vec![("T1".to_string(), "T2".to_string())]
        );
        let session = result.session.unwrap();
        assert_eq!(session.access_token, "T1");
        assert_eq!(session.refresh_token, "T2");
        assert_eq!(result.location.as_str(), "http://localhost:5173/#tab=pedidos");
        assert_eq!(auth.exchanges(), 0);
    }

    #[tokio::test]
    async fn test_plain_start_converges_on_persisted_session() {
        let auth = FakeAuth::new(&[]);
        *auth.session.lock().unwrap() = Some(session_for("persisted", "a", "r"));
        let location = url("http://localhost:5173/#/carrito");

        let result = bootstrap(&auth, &MemoryStorage::new(), &location).await;
        assert_eq!(result.location, location);
        assert_eq!(
            result.session.as_ref().map(|s| s.user_id().as_str()),
            Some("persisted")
        );
        assert!(!result.code_exchanged);
        assert!(!result.tokens_installed);
    }

    #[tokio::test]
    async fn test_session_error_degrades_to_signed_out() {
        let mut auth = FakeAuth::new(&[]);
        auth.fail_get_session = true;

        let result = bootstrap(
            &auth,
            &MemoryStorage::new(),
            &url("http://localhost:5173/?error=access_denied&error_description=Denied"),
        )
        .await;
        assert!(result.session.is_none());
        assert_eq!(result.location.as_str(), "http://localhost:5173/");
    }
}
