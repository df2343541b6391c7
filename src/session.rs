use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::models::{self, Route};
use crate::nav::Navigator;
use crate::scapi::{self, AuthSubscription, Backend};

/// Who is using the current view. Owned by the view, discarded with it.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionContext {
    pub identity: models::Identity,
    /// `None` until fetched, or if the profile row is missing.
    pub profile: Option<models::Profile>,
}

impl SessionContext {
    pub fn username(&self) -> Option<&str> {
        self.profile.as_ref().map(|profile| profile.username.as_str())
    }
}

pub type SharedSession = Arc<RwLock<Option<SessionContext>>>;

/// Reads a clone of the shared session, recovering from a poisoned lock.
pub fn snapshot(session: &SharedSession) -> Option<SessionContext> {
    session.read().unwrap_or_else(PoisonError::into_inner).clone()
}

fn replace(session: &SharedSession, context: Option<SessionContext>) {
    *session.write().unwrap_or_else(PoisonError::into_inner) = context;
}

/// Fetches the profile for `identity`. Failures are logged and tolerated.
async fn load_profile(backend: &dyn Backend, identity: &models::Identity) -> Option<models::Profile> {
    scapi::fetch_profile(backend, &identity.id)
        .await
        .inspect_err(|err| log::warn!("[load_profile] Profile error for {}: {err}", identity.id))
        .ok()
}

/// Gates a view on an authenticated session.
pub struct SessionGuard {
    backend: Arc<dyn Backend>,
    navigator: Navigator,
    context: SharedSession,
}

impl SessionGuard {
    pub fn new(backend: Arc<dyn Backend>, navigator: Navigator) -> Self {
        Self { backend, navigator, context: Arc::new(RwLock::new(None)) }
    }

    pub fn context(&self) -> SharedSession {
        Arc::clone(&self.context)
    }

    /// Resolves the current session.
    ///
    /// Returns `None` after redirecting to the auth route when there is no
    /// session or it could not be read.
    pub async fn activate(&self) -> Option<SessionContext> {
        log::trace!("[activate] Checking session...");
        let session = match self.backend.get_session().await {
            Ok(Some(session)) => session,
            Ok(None) => {
                log::info!("No active session, redirecting to sign in.");
                self.navigator.navigate(Route::Auth);
                return None;
            }
            Err(err) => {
                log::error!("[activate] Auth error: {err}");
                self.navigator.navigate(Route::Auth);
                return None;
            }
        };

        replace(&self.context, Some(SessionContext { identity: session.user.clone(), profile: None }));

        let profile = load_profile(self.backend.as_ref(), &session.user).await;
        let context = SessionContext { identity: session.user, profile };
        replace(&self.context, Some(context.clone()));

        Some(context)
    }

    /// Follows auth-state transitions until the session ends.
    ///
    /// The subscription is taken before this returns, so no transition after
    /// the call is missed. Aborting the handle releases the subscription.
    pub fn watch(&self) -> JoinHandle<()> {
        let events = self.backend.on_auth_state_change();
        let backend = Arc::clone(&self.backend);
        let navigator = self.navigator.clone();
        let context = Arc::clone(&self.context);

        tokio::spawn(follow_auth_state(events, backend, navigator, context))
    }
}

async fn follow_auth_state(
    mut events: AuthSubscription,
    backend: Arc<dyn Backend>,
    navigator: Navigator,
    context: SharedSession,
) {
    loop {
        let session = match events.recv().await {
            Ok(event) => {
                log::trace!("[follow_auth_state] Auth event: {:?}", event.change);
                event.session
            }
            Err(RecvError::Lagged(missed)) => {
                log::warn!("[follow_auth_state] Missed {missed} auth events, re-reading session.");
                backend.get_session().await.ok().flatten()
            }
            Err(RecvError::Closed) => break,
        };

        let Some(session) = session else {
            replace(&context, None);
            navigator.navigate(Route::Auth);
            break;
        };

        let known_profile = snapshot(&context)
            .filter(|current| current.identity.id == session.user.id)
            .and_then(|current| current.profile);

        let profile = match known_profile {
            Some(profile) => Some(profile),
            None => load_profile(backend.as_ref(), &session.user).await,
        };

        replace(&context, Some(SessionContext { identity: session.user, profile }));
    }
}

/// Sends signed-in visitors of the landing route straight to `contest_id`.
///
/// Returns `true` if it navigated right away. Otherwise the returned task
/// navigates on the first sign-in; abort it when leaving the landing route.
pub async fn land(
    backend: Arc<dyn Backend>,
    navigator: Navigator,
    contest_id: String,
) -> (bool, Option<JoinHandle<()>>) {
    let mut events = backend.on_auth_state_change();

    if let Ok(Some(_)) = backend.get_session().await {
        navigator.navigate(Route::Contest(contest_id));
        return (true, None);
    }

    let task = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) if event.session.is_some() => {
                    navigator.navigate(Route::Contest(contest_id));
                    break;
                }
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    });

    (false, Some(task))
}
