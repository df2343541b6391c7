use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::Value;
use std::sync::{PoisonError, RwLock};
use tokio::sync::{Mutex, broadcast};

use crate::models;
use crate::scapi::{
    AuthChange, AuthEvent, AuthSubscription, Backend, BackendError, BackendResult, Filter, Table,
};

const AUTH_EVENT_CAPACITY: usize = 16;

#[derive(Deserialize)]
struct ErrorBody {
    msg: Option<String>,
    message: Option<String>,
    error_description: Option<String>,
    error: Option<String>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    expires_at: Option<i64>,
    user: models::Identity,
}

impl From<TokenResponse> for models::Session {
    fn from(token: TokenResponse) -> Self {
        let expires_at = token
            .expires_at
            .or_else(|| token.expires_in.map(|secs| Utc::now().timestamp() + secs));

        Self {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_at,
            user: token.user,
        }
    }
}

/// Picks the most specific message out of an error response body.
fn parse_error_message(status: u16, body: &str) -> String {
    serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.msg.or(b.message).or(b.error_description).or(b.error))
        .unwrap_or_else(|| {
            if body.trim().is_empty() {
                format!("Request failed with status {status}")
            } else {
                body.trim().to_string()
            }
        })
}

async fn check(response: Response) -> BackendResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = parse_error_message(status.as_u16(), &body);
    log::debug!("[check] Backend answered {status}: {message}");

    Err(BackendError::Api { status: status.as_u16(), message })
}

/// Reads a body that may legitimately be empty.
async fn read_json(response: Response) -> BackendResult<Value> {
    let text = response.text().await?;
    if text.trim().is_empty() {
        Ok(Value::Null)
    } else {
        Ok(serde_json::from_str(&text)?)
    }
}

/// Client for the hosted auth + REST service.
///
/// Holds the current session in memory only; nothing survives the process.
pub struct HostedBackend {
    http: Client,
    base_url: String,
    api_key: String,
    session: RwLock<Option<models::Session>>,
    /// Held while an expired session is being exchanged for a new one.
    refreshing: Mutex<()>,
    events: broadcast::Sender<AuthEvent>,
}

impl HostedBackend {
    pub fn new(base_url: &str, api_key: &str) -> BackendResult<Self> {
        Self::with_client(Client::new(), base_url, api_key)
    }

    fn with_client(http: Client, base_url: &str, api_key: &str) -> BackendResult<Self> {
        let base_url = base_url.trim_end_matches('/').to_string();
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(BackendError::Config(format!("Not an http(s) URL: {base_url}")));
        }

        HeaderValue::from_str(api_key)
            .map_err(|_| BackendError::Config(String::from("API key is not a valid header value")))?;

        let (events, _) = broadcast::channel(AUTH_EVENT_CAPACITY);

        Ok(Self {
            http,
            base_url,
            api_key: api_key.to_string(),
            session: RwLock::new(None),
            refreshing: Mutex::new(()),
            events,
        })
    }

    fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.base_url, path)
    }

    fn rest_url(&self, path: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, path)
    }

    fn current_session(&self) -> Option<models::Session> {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn store_session(&self, session: Option<models::Session>, change: AuthChange) {
        *self.session.write().unwrap_or_else(PoisonError::into_inner) = session.clone();

        // No receivers is fine: nobody is watching auth state right now.
        let _ = self.events.send(AuthEvent { change, session });
    }

    /// Headers for every request: the API key, and `bearer` as the authorization.
    fn headers(&self, bearer: &str) -> BackendResult<HeaderMap> {
        let invalid = |what: &str| BackendError::Config(format!("{what} is not a valid header value"));

        Ok(HeaderMap::from_iter([
            (header::CONTENT_TYPE, HeaderValue::from_static("application/json")),
            (
                HeaderName::from_static("apikey"),
                HeaderValue::from_str(&self.api_key).map_err(|_| invalid("API key"))?,
            ),
            (
                header::AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {bearer}")).map_err(|_| invalid("Access token"))?,
            ),
        ]))
    }

    async fn send_as(&self, request: RequestBuilder, bearer: &str) -> BackendResult<Response> {
        check(request.headers(self.headers(bearer)?).send().await?).await
    }

    /// Sends on behalf of the signed-in user, refreshing an expired token first.
    ///
    /// Falls back to the API key when nobody is signed in.
    async fn send(&self, request: RequestBuilder) -> BackendResult<Response> {
        let bearer = match self.get_session().await {
            Ok(Some(session)) => session.access_token,
            Ok(None) => self.api_key.clone(),
            Err(err) => {
                log::warn!("[send] Sending without a user token: {err}");
                self.api_key.clone()
            }
        };

        self.send_as(request, &bearer).await
    }

    /// Sends with the API key only, for the auth endpoints.
    async fn send_anonymous(&self, request: RequestBuilder) -> BackendResult<Response> {
        self.send_as(request, &self.api_key).await
    }

    async fn refresh(&self, refresh_token: &str) -> BackendResult<models::Session> {
        log::trace!("[refresh] Refreshing access token...");
        let request = self
            .http
            .post(self.auth_url("token"))
            .query(&[("grant_type", "refresh_token")])
            .json(&serde_json::json!({ "refresh_token": refresh_token }));

        let token = self.send_anonymous(request).await?.json::<TokenResponse>().await?;
        Ok(token.into())
    }
}

#[async_trait]
impl Backend for HostedBackend {
    async fn sign_up(&self, email: &str, password: &str, username: &str)
        -> BackendResult<models::Identity>
    {
        let body = serde_json::json!({
            "email": email,
            "password": password,
            "data": { "username": username },
        });

        let request = self.http.post(self.auth_url("signup")).json(&body);
        let response = read_json(self.send_anonymous(request).await?).await?;

        // Accounts that need no confirmation come back with a session attached.
        if response.get("access_token").is_some() {
            let session = models::Session::from(serde_json::from_value::<TokenResponse>(response)?);
            let identity = session.user.clone();
            log::info!("Signed up and signed in as {}", identity.id);
            self.store_session(Some(session), AuthChange::SignedIn);
            return Ok(identity);
        }

        let identity = match response.get("user").filter(|user| user.is_object()) {
            Some(user) => serde_json::from_value::<models::Identity>(user.clone())?,
            None => serde_json::from_value::<models::Identity>(response)?,
        };

        Ok(identity)
    }

    async fn sign_in_with_password(&self, email: &str, password: &str)
        -> BackendResult<models::Session>
    {
        let request = self
            .http
            .post(self.auth_url("token"))
            .query(&[("grant_type", "password")])
            .json(&serde_json::json!({ "email": email, "password": password }));

        let session = models::Session::from(self.send_anonymous(request).await?.json::<TokenResponse>().await?);
        log::info!("Signed in as {}", session.user.id);
        self.store_session(Some(session.clone()), AuthChange::SignedIn);

        Ok(session)
    }

    async fn sign_out(&self) -> BackendResult<()> {
        let Some(session) = self.current_session() else {
            return Ok(());
        };

        let result = self
            .send_as(self.http.post(self.auth_url("logout")), &session.access_token)
            .await;

        // The local session is dropped even if the server could not be told.
        self.store_session(None, AuthChange::SignedOut);
        log::info!("Signed out.");

        result.map(|_| ())
    }

    async fn get_session(&self) -> BackendResult<Option<models::Session>> {
        match self.current_session() {
            None => return Ok(None),
            Some(session) if !session.is_expired() => return Ok(Some(session)),
            Some(_) => {}
        }

        // Concurrent callers wait here; only the first one exchanges the token.
        let _refreshing = self.refreshing.lock().await;
        let Some(session) = self.current_session() else {
            return Ok(None);
        };
        if !session.is_expired() {
            return Ok(Some(session));
        }

        let Some(refresh_token) = session.refresh_token.as_deref() else {
            self.store_session(None, AuthChange::SignedOut);
            return Ok(None);
        };

        match self.refresh(refresh_token).await {
            Ok(refreshed) => {
                self.store_session(Some(refreshed.clone()), AuthChange::TokenRefreshed);
                Ok(Some(refreshed))
            }
            Err(err) => {
                log::warn!("[get_session] Could not refresh session: {err}");
                self.store_session(None, AuthChange::SignedOut);
                Err(err)
            }
        }
    }

    fn on_auth_state_change(&self) -> AuthSubscription {
        self.events.subscribe()
    }

    async fn select(&self, table: Table, filter: &Filter) -> BackendResult<Vec<Value>> {
        let request = self
            .http
            .get(self.rest_url(table.name()))
            .query(&[
                ("select", String::from("*")),
                (filter.column, format!("eq.{}", filter.value)),
            ]);

        Ok(self.send(request).await?.json::<Vec<Value>>().await?)
    }

    async fn insert(&self, table: Table, row: Value) -> BackendResult<()> {
        let request = self
            .http
            .post(self.rest_url(table.name()))
            .header("Prefer", "return=minimal")
            .json(&row);

        self.send(request).await?;
        Ok(())
    }

    async fn rpc(&self, function: &str, params: Value) -> BackendResult<Value> {
        let request = self
            .http
            .post(self.rest_url(&format!("rpc/{function}")))
            .json(&params);

        read_json(self.send(request).await?).await
    }
}
