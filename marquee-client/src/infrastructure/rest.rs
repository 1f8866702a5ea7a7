//! HTTP backend for the hosted service
//!
//! Rows go through the REST gateway (`/rest/v1/<table>`), sessions through the
//! auth gateway (`/auth/v1/...`). The session is held locally and attached as
//! the bearer token on every row request; without one the anon key is used.
//! Auth-state events are raised locally whenever this client signs in, signs
//! out or refreshes. Row changes made through this client are echoed to its
//! own change subscriptions; changes made elsewhere are not observed.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use marquee_config::Config;
use marquee_config::models::DEFAULT_SCHEMA;
use marquee_model::{
    AuthChange, AuthEventKind, AuthUser, ChangeKind, Record, RowChange, Session,
};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use url::Url;

use super::backend::{
    AuthGateway, BackendError, BackendResult, ChangeFeed, ChannelSpec, Filter,
    RowStore,
};
use super::subscription::{ListenerHub, Subscription};

/// Sessions this close to expiry are refreshed before being handed out.
const REFRESH_LEEWAY_SECS: i64 = 60;

/// Client for the hosted REST and auth gateways.
#[derive(Clone)]
pub struct RestBackend {
    client: Client,
    base_url: Url,
    anon_key: String,
    schema: String,
    session: Arc<RwLock<Option<Session>>>,
    /// Held across a refresh-token exchange; refresh tokens are single use.
    refresh_lock: Arc<Mutex<()>>,
    auth_hub: Arc<ListenerHub<AuthChange>>,
    change_hub: Arc<ListenerHub<RowChange>>,
}

impl std::fmt::Debug for RestBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestBackend")
            .field("base_url", &self.base_url.as_str())
            .field("schema", &self.schema)
            .field(
                "has_session",
                &self
                    .session
                    .try_read()
                    .map(|s| s.is_some())
                    .unwrap_or(false),
            )
            .finish()
    }
}

impl RestBackend {
    pub fn new(
        base_url: Url,
        anon_key: impl Into<String>,
        request_timeout: Duration,
    ) -> BackendResult<Self> {
        let client = Client::builder().timeout(request_timeout).build()?;

        // `Url::join` replaces the last path segment unless the base ends in '/'.
        let mut base_url = base_url;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        info!(base_url = %base_url, "creating REST backend");

        Ok(Self {
            client,
            base_url,
            anon_key: anon_key.into(),
            schema: DEFAULT_SCHEMA.to_string(),
            session: Arc::new(RwLock::new(None)),
            refresh_lock: Arc::new(Mutex::new(())),
            auth_hub: ListenerHub::new(),
            change_hub: ListenerHub::new(),
        })
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }

    pub fn from_config(config: &Config) -> BackendResult<Self> {
        Ok(Self::new(
            config.backend.url.clone(),
            config.backend.anon_key.clone(),
            config.backend.request_timeout,
        )?
        .with_schema(config.tables.schema.clone()))
    }

    /// `/rest/v1/<table>?select=*&<column>=eq.<value>...`
    pub fn rows_url(&self, table: &str, filters: &[Filter]) -> BackendResult<Url> {
        let mut url = self.base_url.join(&format!("rest/v1/{table}"))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("select", "*");
            for filter in filters {
                query.append_pair(&filter.column, &filter.operand());
            }
        }
        Ok(url)
    }

    fn auth_url(&self, path: &str) -> BackendResult<Url> {
        Ok(self.base_url.join(&format!("auth/v1/{path}"))?)
    }

    /// The locally held session, without refreshing it.
    pub async fn current_session(&self) -> Option<Session> {
        self.session.read().await.clone()
    }

    pub async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> BackendResult<Session> {
        let session = self
            .request_token(
                "password",
                json!({ "email": email, "password": password }),
            )
            .await?;
        info!(user = ?session.user_id().map(|id| id.as_str()), "signed in");
        self.install(AuthEventKind::SignedIn, Some(session.clone()))
            .await;
        Ok(session)
    }

    /// Exchange the held refresh token for a new session.
    pub async fn refresh_session(&self) -> BackendResult<Session> {
        let _exchange = self.refresh_lock.lock().await;
        self.exchange_refresh_token().await
    }

    /// Caller holds `refresh_lock`.
    async fn exchange_refresh_token(&self) -> BackendResult<Session> {
        let refresh_token = self
            .session
            .read()
            .await
            .as_ref()
            .and_then(|s| s.refresh_token.clone())
            .ok_or(BackendError::NotAuthenticated)?;

        let session = self
            .request_token(
                "refresh_token",
                json!({ "refresh_token": refresh_token }),
            )
            .await?;
        self.install(AuthEventKind::TokenRefreshed, Some(session.clone()))
            .await;
        Ok(session)
    }

    /// Revoke the session server-side (best effort) and clear it locally.
    pub async fn sign_out(&self) -> BackendResult<()> {
        let current = self.session.read().await.clone();
        if let Some(session) = current {
            let url = self.auth_url("logout")?;
            let outcome = self
                .client
                .post(url)
                .header("apikey", self.anon_key.as_str())
                .bearer_auth(&session.access_token)
                .send()
                .await;
            match outcome {
                Ok(response) if response.status().is_success() => {}
                Ok(response) => warn!(
                    status = %response.status(),
                    "logout rejected; clearing local session anyway"
                ),
                Err(e) => warn!(
                    error = %e,
                    "logout request failed; clearing local session anyway"
                ),
            }
        }
        self.install(AuthEventKind::SignedOut, None).await;
        Ok(())
    }

    async fn install(&self, event: AuthEventKind, session: Option<Session>) {
        *self.session.write().await = session.clone();
        let delivered = self.auth_hub.publish(&AuthChange { event, session });
        debug!(?event, delivered, "auth state changed");
    }

    async fn request_token(
        &self,
        grant_type: &str,
        body: serde_json::Value,
    ) -> BackendResult<Session> {
        let url = self.auth_url(&format!("token?grant_type={grant_type}"))?;
        let response = self
            .client
            .post(url)
            .header("apikey", self.anon_key.as_str())
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(BackendError::Status {
                status: status.as_u16(),
                body: text,
            });
        }
        let token: TokenResponse = serde_json::from_str(&text)?;
        Ok(token.into_session(Utc::now()))
    }

    /// Attach the anon key plus the session (or anon) bearer token.
    async fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        let bearer = match self.session.read().await.as_ref() {
            Some(session) => session.access_token.clone(),
            None => self.anon_key.clone(),
        };
        builder
            .header("apikey", self.anon_key.as_str())
            .bearer_auth(bearer)
    }

    async fn send_rows(&self, request: RequestBuilder) -> BackendResult<Vec<Record>> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if status == StatusCode::UNAUTHORIZED {
            return Err(BackendError::NotAuthenticated);
        }
        if !status.is_success() {
            return Err(BackendError::Status {
                status: status.as_u16(),
                body,
            });
        }
        if body.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&body)?)
    }

    fn echo(&self, table: &str, kind: ChangeKind, new: Option<Record>, old: Option<Record>) {
        self.change_hub.publish(&RowChange {
            kind,
            schema: self.schema.clone(),
            table: table.to_string(),
            new,
            old,
        });
    }
}

/// Body of a successful `/auth/v1/token` call.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    #[serde(default)]
    user: Option<AuthUser>,
}

impl TokenResponse {
    fn into_session(self, now: DateTime<Utc>) -> Session {
        let expires_at = self
            .expires_at
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .or_else(|| {
                self.expires_in
                    .map(|secs| now + chrono::Duration::seconds(secs))
            });
        Session {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            token_type: self.token_type,
            expires_at,
            user: self.user,
        }
    }
}

fn needs_refresh(session: &Session) -> bool {
    session.refresh_token.is_some() && session.expires_within(REFRESH_LEEWAY_SECS)
}

#[async_trait]
impl RowStore for RestBackend {
    async fn select_eq(&self, table: &str, filters: &[Filter]) -> BackendResult<Vec<Record>> {
        let url = self.rows_url(table, filters)?;
        debug!(table, %url, "select");
        let request = self
            .authorize(
                self.client
                    .get(url)
                    .header("Accept-Profile", self.schema.as_str()),
            )
            .await;
        self.send_rows(request).await
    }

    async fn insert(&self, table: &str, record: Record) -> BackendResult<Vec<Record>> {
        let url = self.rows_url(table, &[])?;
        debug!(table, "insert");
        let request = self
            .authorize(
                self.client
                    .post(url)
                    .header("Content-Profile", self.schema.as_str())
                    .header("Prefer", "return=representation")
                    .json(&record),
            )
            .await;
        let rows = self.send_rows(request).await?;
        for row in &rows {
            self.echo(table, ChangeKind::Insert, Some(row.clone()), None);
        }
        Ok(rows)
    }

    async fn delete_eq(&self, table: &str, filters: &[Filter]) -> BackendResult<Vec<Record>> {
        let url = self.rows_url(table, filters)?;
        debug!(table, %url, "delete");
        let request = self
            .authorize(
                self.client
                    .delete(url)
                    .header("Content-Profile", self.schema.as_str())
                    .header("Prefer", "return=representation"),
            )
            .await;
        let rows = self.send_rows(request).await?;
        for row in &rows {
            self.echo(table, ChangeKind::Delete, None, Some(row.clone()));
        }
        Ok(rows)
    }
}

#[async_trait]
impl AuthGateway for RestBackend {
    async fn get_session(&self) -> BackendResult<Option<Session>> {
        let current = self.session.read().await.clone();
        if !current.as_ref().is_some_and(needs_refresh) {
            return Ok(current);
        }

        let _exchange = self.refresh_lock.lock().await;
        // Whoever held the lock before us may already have refreshed.
        let current = self.session.read().await.clone();
        match current {
            Some(session) if needs_refresh(&session) => {
                debug!("session near expiry; refreshing");
                self.exchange_refresh_token().await.map(Some)
            }
            other => Ok(other),
        }
    }

    async fn on_auth_state_change(&self) -> BackendResult<Subscription<AuthChange>> {
        Ok(self.auth_hub.register("auth", |_| true))
    }
}

#[async_trait]
impl ChangeFeed for RestBackend {
    async fn subscribe(&self, spec: ChannelSpec) -> BackendResult<Subscription<RowChange>> {
        let label = spec.label();
        Ok(self
            .change_hub
            .register(label, move |change| spec.admits(change)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::task::JoinHandle;

    fn backend(base: &str) -> RestBackend {
        RestBackend::new(
            Url::parse(base).unwrap(),
            "anon-key",
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn rows_url_carries_select_and_filters() {
        let rest = backend("https://project.example.co");
        let url = rest
            .rows_url(
                "favorites",
                &[Filter::eq("user_id", "u1"), Filter::eq("movie_id", 550)],
            )
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://project.example.co/rest/v1/favorites?select=*&user_id=eq.u1&movie_id=eq.550"
        );
    }

    #[test]
    fn base_path_is_preserved() {
        let rest = backend("https://gateway.example.co/project");
        let url = rest.rows_url("favorites", &[]).unwrap();
        assert_eq!(
            url.as_str(),
            "https://gateway.example.co/project/rest/v1/favorites?select=*"
        );
    }

    #[test]
    fn token_expiry_prefers_absolute_timestamp() {
        let now = Utc::now();
        let absolute: TokenResponse = serde_json::from_value(json!({
            "access_token": "a",
            "expires_in": 3600,
            "expires_at": 1_700_000_000,
            "user": { "id": "u1", "email": "u1@example.com", "role": "authenticated" }
        }))
        .unwrap();
        let session = absolute.into_session(now);
        assert_eq!(session.expires_at.map(|t| t.timestamp()), Some(1_700_000_000));
        assert_eq!(session.user_id().map(|id| id.as_str()), Some("u1"));

        let relative: TokenResponse =
            serde_json::from_value(json!({ "access_token": "a", "expires_in": 60 })).unwrap();
        let session = relative.into_session(now);
        assert_eq!(session.expires_at, Some(now + chrono::Duration::seconds(60)));
        assert!(session.user.is_none());
    }

    #[tokio::test]
    async fn no_session_is_reported_without_network() {
        let rest = backend("https://project.example.co");
        assert_eq!(rest.get_session().await.unwrap(), None);
    }

    /// Serve `replies` in order, one per connection, and hand back the head
    /// of every request received.
    async fn serve(replies: Vec<(u16, &'static str)>) -> (RestBackend, JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let task = tokio::spawn(async move {
            let mut heads = Vec::new();
            for (status, body) in replies {
                let (mut socket, _) = listener.accept().await.unwrap();
                heads.push(read_request(&mut socket).await);
                let reason = StatusCode::from_u16(status)
                    .ok()
                    .and_then(|s| s.canonical_reason())
                    .unwrap_or("Unknown");
                let reply = format!(
                    "HTTP/1.1 {status} {reason}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                socket.write_all(reply.as_bytes()).await.unwrap();
                socket.shutdown().await.unwrap();
            }
            heads
        });
        (backend(&base), task)
    }

    async fn read_request(socket: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            buf.extend_from_slice(&chunk[..n]);
            let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
                assert!(n > 0, "connection closed before request head");
                continue;
            };
            let head = String::from_utf8_lossy(&buf[..end]).to_string();
            let length = head
                .lines()
                .filter_map(|line| line.split_once(':'))
                .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
                .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                .unwrap_or(0);
            while buf.len() < end + 4 + length {
                let n = socket.read(&mut chunk).await.unwrap();
                assert!(n > 0, "connection closed before request body");
                buf.extend_from_slice(&chunk[..n]);
            }
            return head;
        }
    }

    fn header<'a>(head: &'a str, name: &str) -> Option<&'a str> {
        head.lines()
            .filter_map(|line| line.split_once(':'))
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.trim())
    }

    #[tokio::test]
    async fn select_sends_keys_and_schema_and_decodes_rows() {
        let (rest, server) = serve(vec![(200, r#"[{"user_id":"u1","movie_id":550}]"#)]).await;

        let rows = rest
            .select_eq("favorites", &[Filter::eq("user_id", "u1")])
            .await
            .unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("movie_id"), Some(&json!(550)));
        let heads = server.await.unwrap();
        assert!(heads[0].starts_with("GET /rest/v1/favorites?select=*&user_id=eq.u1 "));
        assert_eq!(header(&heads[0], "apikey"), Some("anon-key"));
        assert_eq!(header(&heads[0], "authorization"), Some("Bearer anon-key"));
        assert_eq!(header(&heads[0], "accept-profile"), Some("public"));
    }

    #[tokio::test]
    async fn unauthorized_maps_to_not_authenticated() {
        let (rest, server) = serve(vec![(401, r#"{"message":"JWT expired"}"#)]).await;

        let err = rest.select_eq("favorites", &[]).await.unwrap_err();

        assert!(matches!(err, BackendError::NotAuthenticated), "{err:?}");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn other_failures_keep_status_and_body() {
        let (rest, server) = serve(vec![(409, r#"{"code":"23505"}"#)]).await;

        let err = rest.insert("favorites", Record::new()).await.unwrap_err();

        match err {
            BackendError::Status { status, body } => {
                assert_eq!(status, 409);
                assert!(body.contains("23505"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        server.await.unwrap();
    }

    #[tokio::test]
    async fn empty_body_is_no_rows() {
        let (rest, server) = serve(vec![(200, ""), (200, "  \n")]).await;

        assert!(rest.delete_eq("favorites", &[]).await.unwrap().is_empty());
        assert!(rest.select_eq("favorites", &[]).await.unwrap().is_empty());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn mutations_are_echoed_to_matching_subscriptions() {
        let row = r#"[{"user_id":"u1","movie_id":550}]"#;
        let (rest, server) = serve(vec![(201, row), (200, row), (500, "boom")]).await;
        let mut mine = rest
            .subscribe(
                ChannelSpec::table("public", "favorites").with_filter(Filter::eq("user_id", "u1")),
            )
            .await
            .unwrap();

        rest.insert("favorites", Record::new()).await.unwrap();
        rest.delete_eq("favorites", &[Filter::eq("movie_id", 550)])
            .await
            .unwrap();
        assert!(rest.insert("favorites", Record::new()).await.is_err());

        let inserted = mine.next().await.unwrap();
        assert_eq!(inserted.kind, ChangeKind::Insert);
        assert_eq!(inserted.new.unwrap().get("movie_id"), Some(&json!(550)));
        let deleted = mine.next().await.unwrap();
        assert_eq!(deleted.kind, ChangeKind::Delete);
        assert!(deleted.new.is_none());
        assert_eq!(deleted.old.unwrap().get("user_id"), Some(&json!("u1")));
        assert!(mine.try_next().is_none());

        let heads = server.await.unwrap();
        assert!(heads[0].starts_with("POST /rest/v1/favorites?select=* "));
        assert_eq!(header(&heads[0], "prefer"), Some("return=representation"));
        assert!(heads[1].starts_with("DELETE /rest/v1/favorites?select=*&movie_id=eq.550 "));
        mine.close().await.unwrap();
    }

    #[tokio::test]
    async fn concurrent_reads_near_expiry_refresh_once() {
        let (rest, server) = serve(vec![(
            200,
            r#"{"access_token":"fresh","refresh_token":"r2","expires_in":3600,"user":{"id":"u1"}}"#,
        )])
        .await;
        let mut stale = Session::for_user(
            "old",
            AuthUser {
                id: marquee_model::UserId::new("u1").unwrap(),
                email: None,
            },
        );
        stale.refresh_token = Some("r1".to_string());
        stale.expires_at = Some(Utc::now() + chrono::Duration::seconds(5));
        *rest.session.write().await = Some(stale);
        let mut events = rest.on_auth_state_change().await.unwrap();

        let (first, second) = tokio::join!(rest.get_session(), rest.get_session());

        assert_eq!(first.unwrap().unwrap().access_token, "fresh");
        assert_eq!(second.unwrap().unwrap().access_token, "fresh");
        let heads = server.await.unwrap();
        assert_eq!(heads.len(), 1);
        assert!(heads[0].starts_with("POST /auth/v1/token?grant_type=refresh_token "));
        assert_eq!(events.next().await.unwrap().event, AuthEventKind::TokenRefreshed);
        assert!(events.try_next().is_none());
        events.close().await.unwrap();
    }

    #[tokio::test]
    async fn signing_out_without_session_still_notifies() {
        let rest = backend("https://project.example.co");
        let mut events = rest.on_auth_state_change().await.unwrap();

        rest.sign_out().await.unwrap();

        let change = events.next().await.unwrap();
        assert_eq!(change.event, AuthEventKind::SignedOut);
        assert!(change.session.is_none());
        events.close().await.unwrap();
    }
}
