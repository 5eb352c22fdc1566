//! Published auth state.
//!
//! [`AuthState`] owns the current session and profile. It listens to the
//! backend's session-change stream for the lifetime of the application and
//! republishes on every event. Whenever the signed-in user changes, profile
//! reconciliation is re-run; results that arrive after a newer change are
//! discarded.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use dulcenube_core::UserId;

use super::ProfileLoader;
use crate::error::{clear_sentry_user, set_sentry_user};
use crate::profile::Profile;
use crate::supabase::{AuthEvent, Session, User};

/// Snapshot of the published auth state.
///
/// `profile` is always `None` while `session` is `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthSnapshot {
    pub session: Option<Session>,
    pub profile: Option<Profile>,
    /// A profile reconciliation is in flight.
    pub profile_loading: bool,
}

impl AuthSnapshot {
    #[must_use]
    pub fn user(&self) -> Option<&User> {
        self.session.as_ref().map(|s| &s.user)
    }

    #[must_use]
    pub fn user_id(&self) -> Option<&UserId> {
        self.session.as_ref().map(Session::user_id)
    }
}

struct Shared<L> {
    tx: watch::Sender<AuthSnapshot>,
    loader: Arc<L>,
    generation: AtomicU64,
    reconciling: Mutex<Option<JoinHandle<()>>>,
}

/// Session and profile state kept current by the auth event stream.
pub struct AuthState<L: ProfileLoader + 'static> {
    shared: Arc<Shared<L>>,
    listener: JoinHandle<()>,
}

impl<L: ProfileLoader + 'static> std::fmt::Debug for AuthState<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthState")
            .field("snapshot", &*self.shared.tx.borrow())
            .finish_non_exhaustive()
    }
}

impl<L: ProfileLoader + 'static> AuthState<L> {
    /// Publish `initial` and start listening to `events`.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn start(
        initial: Option<Session>,
        events: broadcast::Receiver<AuthEvent>,
        loader: Arc<L>,
    ) -> Self {
        let (tx, _) = watch::channel(AuthSnapshot::default());
        let shared = Arc::new(Shared {
            tx,
            loader,
            generation: AtomicU64::new(0),
            reconciling: Mutex::new(None),
        });

        apply(&shared, initial);
        let listener = tokio::spawn(listen(Arc::clone(&shared), events));

        Self { shared, listener }
    }

    /// Watch the published state.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<AuthSnapshot> {
        self.shared.tx.subscribe()
    }

    /// Current published state.
    #[must_use]
    pub fn snapshot(&self) -> AuthSnapshot {
        self.shared.tx.borrow().clone()
    }

    /// Wait until no profile reconciliation is in flight.
    pub async fn settled(&self) -> AuthSnapshot {
        let mut rx = self.subscribe();
        let result = rx.wait_for(|s| !s.profile_loading).await;
        match result {
            Ok(snapshot) => snapshot.clone(),
            Err(_) => self.snapshot(),
        }
    }

    /// Publish a session directly, as if the backend had reported it.
    pub fn publish(&self, session: Option<Session>) {
        apply(&self.shared, session);
    }

    /// Stop listening and cancel any in-flight reconciliation.
    pub fn shutdown(&self) {
        self.listener.abort();
        if let Some(task) = self
            .shared
            .reconciling
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
    }
}

impl<L: ProfileLoader + 'static> Drop for AuthState<L> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn listen<L: ProfileLoader + 'static>(
    shared: Arc<Shared<L>>,
    mut events: broadcast::Receiver<AuthEvent>,
) {
    loop {
        match events.recv().await {
            Ok(event) => {
                debug!(event = %event.kind, "Republishing auth state");
                apply(&shared, event.session);
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Auth event listener lagged");
            }
            Err(broadcast::error::RecvError::Closed) => {
                debug!("Auth event stream closed");
                break;
            }
        }
    }
}

/// Publish `session`, re-running profile reconciliation when the user
/// identity changed.
///
/// The identity comparison and the generation bump happen under the watch
/// lock, so a reconcile task can never observe the new session with the old
/// generation.
fn apply<L: ProfileLoader + 'static>(shared: &Arc<Shared<L>>, session: Option<Session>) {
    match &session {
        Some(s) => set_sentry_user(s.user_id(), s.user.email.as_deref()),
        None => clear_sentry_user(),
    }

    let mut changed_generation = None;
    shared.tx.send_modify(|snapshot| {
        let identity_changed = snapshot.user_id() != session.as_ref().map(Session::user_id);
        snapshot.session.clone_from(&session);
        if session.is_none() || identity_changed {
            snapshot.profile = None;
        }
        if identity_changed {
            snapshot.profile_loading = session.is_some();
            changed_generation = Some(shared.generation.fetch_add(1, Ordering::SeqCst) + 1);
        }
    });

    let Some(generation) = changed_generation else {
        return;
    };

    let mut reconciling = shared
        .reconciling
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    if let Some(task) = reconciling.take() {
        task.abort();
    }

    let Some(session) = session else {
        return;
    };

    let task_shared = Arc::clone(shared);
    *reconciling = Some(tokio::spawn(async move {
        let profile = task_shared.loader.reconcile(&session).await;
        let published = publish_profile(
            &task_shared.tx,
            &task_shared.generation,
            generation,
            session.user_id(),
            profile,
        );
        if !published {
            debug!("Discarding stale profile result");
        }
    }));
}

/// Write a reconciled profile unless a newer identity change happened or the
/// published session no longer belongs to `user_id`. Both checks run under
/// the watch lock.
fn publish_profile(
    tx: &watch::Sender<AuthSnapshot>,
    current_generation: &AtomicU64,
    generation: u64,
    user_id: &UserId,
    profile: Option<Profile>,
) -> bool {
    tx.send_if_modified(|snapshot| {
        if current_generation.load(Ordering::SeqCst) != generation
            || snapshot.user_id() != Some(user_id)
        {
            return false;
        }
        snapshot.profile = profile;
        snapshot.profile_loading = false;
        true
    })
}
