//! In-memory stand-in for the hosted backend, used by the test suites.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;

use crate::models;
use crate::scapi::{
    AuthChange, AuthEvent, AuthSubscription, Backend, BackendError, BackendResult, Filter, Table,
};

struct Account {
    password: String,
    identity: models::Identity,
}

pub struct FakeBackend {
    accounts: Mutex<HashMap<String, Account>>,
    confirmation_required: AtomicBool,
    next_user: AtomicUsize,
    session: Mutex<Option<models::Session>>,
    events: broadcast::Sender<AuthEvent>,
    tables: Mutex<HashMap<Table, Vec<Value>>>,
    calls: Mutex<HashMap<String, usize>>,
    failures: Mutex<HashMap<String, String>>,
    scripted_rpc: Mutex<VecDeque<(Duration, Value)>>,
    unreachable: Mutex<HashSet<String>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            accounts: Mutex::new(HashMap::new()),
            confirmation_required: AtomicBool::new(false),
            next_user: AtomicUsize::new(1),
            session: Mutex::new(None),
            events,
            tables: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
            scripted_rpc: Mutex::new(VecDeque::new()),
            unreachable: Mutex::new(HashSet::new()),
        }
    }

    /// A backend with an already signed-in, confirmed user `user_id`.
    pub fn signed_in_as(user_id: &str) -> Self {
        let backend = Self::new();
        *backend.session.lock().unwrap() = Some(Self::session_for(models::Identity {
            id: user_id.to_string(),
            email: Some(format!("{user_id}@test.com")),
            email_confirmed_at: Some(Utc::now()),
        }));
        backend
    }

    fn session_for(identity: models::Identity) -> models::Session {
        models::Session {
            access_token: format!("token-{}", identity.id),
            refresh_token: None,
            expires_at: None,
            user: identity,
        }
    }

    pub fn require_confirmation(&self, required: bool) {
        self.confirmation_required.store(required, Ordering::SeqCst);
    }

    pub fn confirm_email(&self, email: &str) {
        if let Some(account) = self.accounts.lock().unwrap().get_mut(email) {
            account.identity.email_confirmed_at = Some(Utc::now());
        }
    }

    /// Makes every later call of `op` fail with `message`.
    pub fn fail(&self, op: &str, message: &str) {
        self.failures.lock().unwrap().insert(op.to_string(), message.to_string());
    }

    pub fn recover(&self, op: &str) {
        self.failures.lock().unwrap().remove(op);
    }

    /// Number of times `op` was called, successful or not.
    pub fn calls(&self, op: &str) -> usize {
        self.calls.lock().unwrap().get(op).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    /// Queues a canned RPC answer that resolves after `delay`.
    pub fn script_rpc(&self, delay: Duration, response: Value) {
        self.scripted_rpc.lock().unwrap().push_back((delay, response));
    }

    /// Marks `op` as hanging forever, like a request that never resolves.
    pub fn hang(&self, op: &str) {
        self.unreachable.lock().unwrap().insert(op.to_string());
    }

    pub fn rows(&self, table: Table) -> Vec<Value> {
        self.tables.lock().unwrap().get(&table).cloned().unwrap_or_default()
    }

    pub fn add_problem(&self, contest_id: &str, id: &str, title: &str, score: i64) {
        self.tables.lock().unwrap().entry(Table::Problems).or_default().push(serde_json::json!({
            "id": id,
            "contest_id": contest_id,
            "title": title,
            "description": format!("Solve {title}"),
            "test_cases": [{ "input": "1 2", "expectedOutput": "3" }],
            "score": score,
        }));
    }

    pub fn add_profile(&self, user_id: &str, username: &str) {
        self.tables.lock().unwrap().entry(Table::Profiles).or_default().push(serde_json::json!({
            "user_id": user_id,
            "username": username,
        }));
    }

    /// Simulates a session ending on the server side.
    pub fn expire_session(&self) {
        *self.session.lock().unwrap() = None;
        let _ = self.events.send(AuthEvent { change: AuthChange::SignedOut, session: None });
    }

    async fn enter(&self, op: &str) -> BackendResult<()> {
        *self.calls.lock().unwrap().entry(op.to_string()).or_default() += 1;

        let hangs = self.unreachable.lock().unwrap().contains(op);
        if hangs {
            std::future::pending::<()>().await;
        }

        match self.failures.lock().unwrap().get(op) {
            Some(message) => Err(BackendError::Api { status: 400, message: message.clone() }),
            None => Ok(()),
        }
    }

    fn store_session(&self, session: Option<models::Session>, change: AuthChange) {
        *self.session.lock().unwrap() = session.clone();
        let _ = self.events.send(AuthEvent { change, session });
    }

    /// Sum of scores per user, highest first, ties by user id.
    fn leaderboard(&self, contest_id: &str) -> Value {
        let tables = self.tables.lock().unwrap();
        let mut totals: HashMap<String, i64> = HashMap::new();
        for row in tables.get(&Table::Submissions).into_iter().flatten() {
            if row["contest_id"] == contest_id {
                let user_id = row["user_id"].as_str().unwrap_or_default().to_string();
                *totals.entry(user_id).or_default() += row["score"].as_i64().unwrap_or(0);
            }
        }

        let username_of = |user_id: &str| {
            tables
                .get(&Table::Profiles)
                .into_iter()
                .flatten()
                .find(|profile| profile["user_id"] == user_id)
                .map(|profile| profile["username"].clone())
                .unwrap_or(Value::Null)
        };

        let mut ranked = totals.into_iter().collect::<Vec<_>>();
        ranked.sort_by(|(a_id, a), (b_id, b)| b.cmp(a).then_with(|| a_id.cmp(b_id)));

        Value::Array(
            ranked
                .into_iter()
                .map(|(user_id, total)| {
                    serde_json::json!({
                        "user_id": user_id,
                        "username": username_of(&user_id),
                        "total_score": total,
                    })
                })
                .collect(),
        )
    }
}

#[async_trait]
impl Backend for FakeBackend {
    async fn sign_up(&self, email: &str, password: &str, _username: &str)
        -> BackendResult<models::Identity>
    {
        self.enter("sign_up").await?;

        let mut accounts = self.accounts.lock().unwrap();
        if accounts.contains_key(email) {
            return Err(BackendError::Api { status: 422, message: "User already registered".into() });
        }

        let confirmed = !self.confirmation_required.load(Ordering::SeqCst);
        let identity = models::Identity {
            id: format!("user-{}", self.next_user.fetch_add(1, Ordering::SeqCst)),
            email: Some(email.to_string()),
            email_confirmed_at: confirmed.then(Utc::now),
        };

        accounts.insert(email.to_string(), Account {
            password: password.to_string(),
            identity: identity.clone(),
        });
        drop(accounts);

        if confirmed {
            self.store_session(Some(Self::session_for(identity.clone())), AuthChange::SignedIn);
        }

        Ok(identity)
    }

    async fn sign_in_with_password(&self, email: &str, password: &str)
        -> BackendResult<models::Session>
    {
        self.enter("sign_in").await?;

        let identity = {
            let accounts = self.accounts.lock().unwrap();
            match accounts.get(email) {
                Some(account) if account.password == password => account.identity.clone(),
                _ => {
                    return Err(BackendError::Api {
                        status: 400,
                        message: "Invalid login credentials".into(),
                    });
                }
            }
        };

        if !identity.is_confirmed() {
            return Err(BackendError::Api { status: 400, message: "Email not confirmed".into() });
        }

        let session = Self::session_for(identity);
        self.store_session(Some(session.clone()), AuthChange::SignedIn);
        Ok(session)
    }

    async fn sign_out(&self) -> BackendResult<()> {
        self.enter("sign_out").await?;
        self.store_session(None, AuthChange::SignedOut);
        Ok(())
    }

    async fn get_session(&self) -> BackendResult<Option<models::Session>> {
        self.enter("get_session").await?;
        Ok(self.session.lock().unwrap().clone())
    }

    fn on_auth_state_change(&self) -> AuthSubscription {
        self.events.subscribe()
    }

    async fn select(&self, table: Table, filter: &Filter) -> BackendResult<Vec<Value>> {
        self.enter(&format!("select:{}", table.name())).await?;

        Ok(self
            .rows(table)
            .into_iter()
            .filter(|row| row[filter.column] == filter.value.as_str())
            .collect())
    }

    async fn insert(&self, table: Table, row: Value) -> BackendResult<()> {
        self.enter(&format!("insert:{}", table.name())).await?;
        self.tables.lock().unwrap().entry(table).or_default().push(row);
        Ok(())
    }

    async fn rpc(&self, function: &str, params: Value) -> BackendResult<Value> {
        self.enter("rpc").await?;

        let scripted = self.scripted_rpc.lock().unwrap().pop_front();
        if let Some((delay, response)) = scripted {
            tokio::time::sleep(delay).await;
            return Ok(response);
        }

        match function {
            "get_contest_leaderboard" => {
                let contest_id = params["contest_id_param"].as_str().unwrap_or_default();
                Ok(self.leaderboard(contest_id))
            }
            other => Err(BackendError::Api { status: 404, message: format!("No function {other}") }),
        }
    }
}
