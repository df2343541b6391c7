use std::sync::{Arc, LazyLock};

use regex::Regex;
use thiserror::Error;

use crate::models::{self, Route};
use crate::nav::Navigator;
use crate::notify::Notifier;
use crate::scapi::{self, Backend, BackendError};

pub const MIN_PASSWORD_LENGTH: usize = 6;

static EMAIL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern is a valid regex")
});

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    /// Rejected locally; no request was made.
    #[error("{0}")]
    Invalid(String),

    /// The backend refused; carries the user-facing message.
    #[error("{0}")]
    Rejected(String),
}

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_REGEX.is_match(email)
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn invalid(message: &str) -> AuthError {
    AuthError::Invalid(message.to_string())
}

fn validate_sign_up(email: &str, password: &str, username: &str) -> Result<(), AuthError> {
    if email.is_empty() || password.is_empty() || username.is_empty() {
        return Err(invalid("Please fill in all fields"));
    }
    if !is_valid_email(email) {
        return Err(invalid("Please enter a valid email address"));
    }
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(invalid("Password must be at least 6 characters"));
    }
    Ok(())
}

fn validate_sign_in(email: &str, password: &str) -> Result<(), AuthError> {
    if email.is_empty() || password.is_empty() {
        return Err(invalid("Please fill in all fields"));
    }
    if !is_valid_email(email) {
        return Err(invalid("Please enter a valid email address"));
    }
    Ok(())
}

fn remap_sign_up_error(err: &BackendError) -> String {
    let message = err.message();
    if message.contains("already registered") {
        String::from("This email is already registered. Please sign in instead.")
    } else if message.contains("invalid") {
        String::from("Please enter a valid email address")
    } else if message.is_empty() {
        String::from("Failed to create account. Please try again.")
    } else {
        message
    }
}

fn remap_sign_in_error(err: &BackendError) -> String {
    let message = err.message();
    if message.contains("Invalid login credentials") {
        String::from("Invalid email or password.")
    } else if message.contains("Email not confirmed") {
        String::from("Please confirm your email first.")
    } else if message.is_empty() {
        String::from("Failed to sign in. Please try again.")
    } else {
        message
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SignUpOutcome {
    /// Account is usable right away; a profile row was attempted.
    Active(models::Identity),
    /// Account exists but its email still has to be confirmed.
    ConfirmationPending(models::Identity),
}

/// Registers an account and, for already-confirmed accounts, its profile.
pub async fn sign_up(
    backend: &dyn Backend,
    email: &str,
    password: &str,
    username: &str,
) -> Result<SignUpOutcome, AuthError> {
    validate_sign_up(email, password, username)?;

    let identity = backend
        .sign_up(&normalize_email(email), password, username)
        .await
        .map_err(|err| {
            log::error!("[sign_up] Signup error: {err}");
            AuthError::Rejected(remap_sign_up_error(&err))
        })?;

    if !identity.is_confirmed() {
        log::info!("Account {} created, awaiting email confirmation.", identity.id);
        return Ok(SignUpOutcome::ConfirmationPending(identity));
    }

    let profile = models::Profile { user_id: identity.id.clone(), username: username.to_string() };

    // A missing profile only costs the username on the leaderboard.
    match scapi::insert_profile(backend, &profile).await {
        Ok(()) => log::info!("Profile {} created for {}.", profile.username, identity.id),
        Err(err) => log::error!("[sign_up] Profile error: {err}"),
    }

    Ok(SignUpOutcome::Active(identity))
}

pub async fn sign_in(
    backend: &dyn Backend,
    email: &str,
    password: &str,
) -> Result<models::Session, AuthError> {
    validate_sign_in(email, password)?;

    backend
        .sign_in_with_password(&normalize_email(email), password)
        .await
        .map_err(|err| {
            log::error!("[sign_in] Signin error: {err}");
            AuthError::Rejected(remap_sign_in_error(&err))
        })
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AuthTab {
    #[default]
    SignIn,
    SignUp,
}

/// State behind the sign-in / sign-up screen.
pub struct AuthFlow {
    backend: Arc<dyn Backend>,
    navigator: Navigator,
    notifier: Notifier,
    tab: AuthTab,
    username: String,
    loading: bool,
}

impl AuthFlow {
    pub fn new(backend: Arc<dyn Backend>, navigator: Navigator, notifier: Notifier) -> Self {
        Self {
            backend,
            navigator,
            notifier,
            tab: AuthTab::default(),
            username: String::new(),
            loading: false,
        }
    }

    pub fn tab(&self) -> AuthTab {
        self.tab
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    /// Switching to sign-in forgets the username typed for sign-up.
    pub fn set_tab(&mut self, tab: AuthTab) {
        self.tab = tab;
        if tab == AuthTab::SignIn {
            self.username.clear();
        }
    }

    pub fn set_username(&mut self, username: &str) {
        self.username = username.to_string();
    }

    pub async fn submit_sign_up(&mut self, email: &str, password: &str) -> Result<SignUpOutcome, AuthError> {
        self.set_tab(AuthTab::SignUp);
        self.loading = true;
        let username = self.username.clone();
        let result = sign_up(self.backend.as_ref(), email, password, &username).await;
        self.loading = false;

        match &result {
            Ok(SignUpOutcome::Active(_)) => {
                self.notifier.info("Account created!", "Welcome to Shodh-a-Code!");
                self.navigator.navigate(Route::Home);
            }
            Ok(SignUpOutcome::ConfirmationPending(_)) => {
                self.notifier.info(
                    "Check your email",
                    "We've sent you a confirmation link. Please check your email.",
                );
                self.set_tab(AuthTab::SignIn);
            }
            Err(err) => self.notifier.error("Error", &err.to_string()),
        }

        result
    }

    pub async fn submit_sign_in(&mut self, email: &str, password: &str) -> Result<models::Session, AuthError> {
        self.set_tab(AuthTab::SignIn);
        self.loading = true;
        let result = sign_in(self.backend.as_ref(), email, password).await;
        self.loading = false;

        match &result {
            Ok(_) => {
                self.notifier.info("Welcome back!", "Successfully signed in.");
                self.navigator.navigate(Route::Home);
            }
            Err(err) => self.notifier.error("Error", &err.to_string()),
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::{self, Variant};
    use crate::scapi::Table;
    use crate::scapi::fake::FakeBackend;

    fn flow(backend: &Arc<FakeBackend>) -> (AuthFlow, crate::nav::RouteWatch, notify::NotificationFeed) {
        let (navigator, watch) = Navigator::new(Route::Auth);
        let (notifier, feed) = Notifier::channel();
        (AuthFlow::new(backend.clone(), navigator, notifier), watch, feed)
    }

    #[test]
    fn email_pattern_needs_at_and_domain() {
        assert!(is_valid_email("user@test.com"));
        for bad in ["", "user", "user@", "user@test", "@test.com", "us er@test.com", "user@@test.com"] {
            assert!(!is_valid_email(bad), "{bad} should be rejected");
        }
    }

    #[tokio::test]
    async fn malformed_emails_never_reach_the_backend() {
        let backend = FakeBackend::new();
        for bad in ["user", "user@", "user@test", "a b@c.d"] {
            assert_eq!(
                sign_in(&backend, bad, "secret1").await,
                Err(AuthError::Invalid("Please enter a valid email address".into()))
            );
            assert!(matches!(sign_up(&backend, bad, "secret1", "alice").await, Err(AuthError::Invalid(_))));
        }
        assert_eq!(backend.total_calls(), 0);
    }

    #[tokio::test]
    async fn short_passwords_are_rejected_locally() {
        let backend = FakeBackend::new();
        for password in ["a", "12345", "ábcdé"] {
            assert_eq!(
                sign_up(&backend, "user@test.com", password, "alice").await,
                Err(AuthError::Invalid("Password must be at least 6 characters".into()))
            );
        }
        assert_eq!(backend.calls("sign_up"), 0);
    }

    #[tokio::test]
    async fn empty_fields_are_rejected_locally() {
        let backend = FakeBackend::new();
        assert_eq!(
            sign_up(&backend, "user@test.com", "secret1", "").await,
            Err(AuthError::Invalid("Please fill in all fields".into()))
        );
        assert_eq!(
            sign_in(&backend, "", "secret1").await,
            Err(AuthError::Invalid("Please fill in all fields".into()))
        );
        assert_eq!(backend.total_calls(), 0);
    }

    #[tokio::test]
    async fn confirmed_sign_up_creates_profile_and_goes_home() {
        let backend = Arc::new(FakeBackend::new());
        let (mut flow, watch, mut feed) = flow(&backend);
        flow.set_username("alice");

        let outcome = flow.submit_sign_up("User@Test.com", "secret1").await.unwrap();
        assert!(matches!(outcome, SignUpOutcome::Active(_)));
        assert_eq!(*watch.borrow(), Route::Home);

        let profiles = backend.rows(Table::Profiles);
        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles[0]["username"], "alice");
        assert_eq!(notify::drain(&mut feed)[0].title, "Account created!");
    }

    #[tokio::test]
    async fn sign_up_needing_confirmation_switches_to_sign_in_tab() {
        let backend = Arc::new(FakeBackend::new());
        backend.require_confirmation(true);
        let (mut flow, watch, mut feed) = flow(&backend);
        flow.set_tab(AuthTab::SignUp);
        flow.set_username("alice");

        let outcome = flow.submit_sign_up("user@test.com", "secret1").await.unwrap();

        let SignUpOutcome::ConfirmationPending(identity) = &outcome else {
            panic!("expected a pending confirmation, got {outcome:?}");
        };
        assert!(!identity.is_confirmed());
        assert_eq!(outcome, SignUpOutcome::ConfirmationPending(identity.clone()));
        assert_eq!(flow.tab(), AuthTab::SignIn);
        assert_eq!(flow.username(), "");
        assert!(!flow.is_loading());
        assert!(backend.rows(Table::Profiles).is_empty());
        assert_eq!(*watch.borrow(), Route::Auth);
        assert_eq!(notify::drain(&mut feed)[0].title, "Check your email");
    }

    #[tokio::test]
    async fn profile_failure_at_sign_up_is_tolerated() {
        let backend = Arc::new(FakeBackend::new());
        backend.fail("insert:profiles", "duplicate key value");
        let (mut flow, watch, _feed) = flow(&backend);
        flow.set_username("alice");

        assert!(flow.submit_sign_up("user@test.com", "secret1").await.is_ok());
        assert_eq!(*watch.borrow(), Route::Home);
    }

    #[tokio::test]
    async fn duplicate_sign_up_is_remapped() {
        let backend = FakeBackend::new();
        sign_up(&backend, "user@test.com", "secret1", "alice").await.unwrap();

        assert_eq!(
            sign_up(&backend, "user@test.com", "secret1", "alice").await,
            Err(AuthError::Rejected("This email is already registered. Please sign in instead.".into()))
        );
    }

    #[tokio::test]
    async fn sign_in_errors_are_remapped() {
        let backend = Arc::new(FakeBackend::new());
        backend.require_confirmation(true);
        sign_up(backend.as_ref(), "user@test.com", "secret1", "alice").await.unwrap();

        assert_eq!(
            sign_in(backend.as_ref(), "user@test.com", "secret1").await,
            Err(AuthError::Rejected("Please confirm your email first.".into()))
        );
        assert_eq!(
            sign_in(backend.as_ref(), "user@test.com", "wrong-password").await,
            Err(AuthError::Rejected("Invalid email or password.".into()))
        );

        backend.fail("sign_in", "Service unavailable");
        assert_eq!(
            sign_in(backend.as_ref(), "user@test.com", "secret1").await,
            Err(AuthError::Rejected("Service unavailable".into()))
        );
    }

    #[tokio::test]
    async fn confirmed_sign_in_goes_home() {
        let backend = Arc::new(FakeBackend::new());
        backend.require_confirmation(true);
        sign_up(backend.as_ref(), "user@test.com", "secret1", "alice").await.unwrap();
        backend.confirm_email("user@test.com");
        let (mut flow, watch, mut feed) = flow(&backend);

        let session = flow.submit_sign_in("USER@test.com", "secret1").await.unwrap();
        assert_eq!(session.user.email.as_deref(), Some("user@test.com"));
        assert_eq!(*watch.borrow(), Route::Home);

        let notifications = notify::drain(&mut feed);
        assert_eq!(notifications[0].title, "Welcome back!");
        assert_eq!(notifications[0].variant, Variant::Default);
    }
}
