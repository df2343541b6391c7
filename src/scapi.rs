use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::models;

pub mod client;
#[cfg(test)]
pub mod fake;

pub use client::HostedBackend;

pub type BackendResult<T> = Result<T, BackendError>;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("{message}")]
    Api { status: u16, message: String },

    #[error("Request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Malformed response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Invalid backend configuration: {0}")]
    Config(String),

    #[error("Not signed in.")]
    NotSignedIn,

    #[error("Expected a single {table} row, found {found}")]
    RowCount { table: &'static str, found: usize },
}

impl BackendError {
    /// The message the backend returned, as used for user-facing remapping.
    pub fn message(&self) -> String {
        match self {
            BackendError::Api { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

/// Collections the front-end reads from or writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Profiles,
    Problems,
    Submissions,
}

impl Table {
    pub fn name(&self) -> &'static str {
        match self {
            Table::Profiles => "profiles",
            Table::Problems => "problems",
            Table::Submissions => "submissions",
        }
    }
}

/// Equality filter on a single column, e.g. `contest_id = X`.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub column: &'static str,
    pub value: String,
}

impl Filter {
    pub fn eq(column: &'static str, value: impl Into<String>) -> Self {
        Self { column, value: value.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthChange {
    SignedIn,
    SignedOut,
    TokenRefreshed,
}

/// A session transition pushed by the auth service.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthEvent {
    pub change: AuthChange,
    pub session: Option<models::Session>,
}

/// Live subscription to auth-state transitions. Dropping it unsubscribes.
pub type AuthSubscription = broadcast::Receiver<AuthEvent>;

/// Request/response boundary to the hosted data-and-auth service.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Registers a new account. `username` travels as user metadata.
    async fn sign_up(&self, email: &str, password: &str, username: &str)
        -> BackendResult<models::Identity>;

    async fn sign_in_with_password(&self, email: &str, password: &str)
        -> BackendResult<models::Session>;

    async fn sign_out(&self) -> BackendResult<()>;

    async fn get_session(&self) -> BackendResult<Option<models::Session>>;

    fn on_auth_state_change(&self) -> AuthSubscription;

    async fn select(&self, table: Table, filter: &Filter) -> BackendResult<Vec<Value>>;

    async fn insert(&self, table: Table, row: Value) -> BackendResult<()>;

    /// Calls a named server-side function.
    async fn rpc(&self, function: &str, params: Value) -> BackendResult<Value>;
}

const LEADERBOARD_FUNCTION: &str = "get_contest_leaderboard";

fn decode_rows<T: DeserializeOwned>(rows: Vec<Value>) -> BackendResult<Vec<T>> {
    rows.into_iter()
        .map(|row| serde_json::from_value::<T>(row).map_err(BackendError::from))
        .collect()
}

async fn insert_row<T: Serialize + Sync>(
    backend: &dyn Backend,
    table: Table,
    row: &T,
) -> BackendResult<()> {
    backend.insert(table, serde_json::to_value(row)?).await
}

/// Fetches the profile of `user_id`. Anything but exactly one row is an error.
pub async fn fetch_profile(backend: &dyn Backend, user_id: &str) -> BackendResult<models::Profile> {
    log::trace!("[fetch_profile] Fetching profile for {user_id}...");
    let rows = backend
        .select(Table::Profiles, &Filter::eq("user_id", user_id))
        .await?;

    let mut profiles = decode_rows::<models::Profile>(rows)?;
    match profiles.len() {
        1 => Ok(profiles.remove(0)),
        found => Err(BackendError::RowCount { table: Table::Profiles.name(), found }),
    }
}

pub async fn insert_profile(backend: &dyn Backend, profile: &models::Profile) -> BackendResult<()> {
    log::trace!("[insert_profile] Inserting profile {} for {}...", profile.username, profile.user_id);
    insert_row(backend, Table::Profiles, profile).await
}

/// Fetches every problem of a contest, in the order the backend returns them.
pub async fn fetch_problems(
    backend: &dyn Backend,
    contest_id: &str,
) -> BackendResult<Vec<models::Problem>> {
    log::trace!("[fetch_problems] Fetching problems for contest {contest_id}...");
    let rows = backend
        .select(Table::Problems, &Filter::eq("contest_id", contest_id))
        .await?;

    decode_rows(rows)
}

pub async fn insert_submission(
    backend: &dyn Backend,
    submission: &models::Submission,
) -> BackendResult<()> {
    log::trace!("[insert_submission] Inserting submission for problem {}...", submission.problem_id);
    insert_row(backend, Table::Submissions, submission).await
}

/// Fetches the ranked aggregate for a contest. Ordering is the backend's.
pub async fn fetch_leaderboard(
    backend: &dyn Backend,
    contest_id: &str,
) -> BackendResult<Vec<models::LeaderboardEntry>> {
    log::trace!("[fetch_leaderboard] Fetching leaderboard for contest {contest_id}...");
    let params = serde_json::json!({ "contest_id_param": contest_id });

    match backend.rpc(LEADERBOARD_FUNCTION, params).await? {
        Value::Null => Ok(Vec::new()),
        Value::Array(rows) => decode_rows(rows),
        other => Err(BackendError::Api {
            status: 200,
            message: format!("Expected an array from {LEADERBOARD_FUNCTION}, got {other}"),
        }),
    }
}
