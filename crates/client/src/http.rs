//! The authenticated request pipeline.
//!
//! Every request goes out with the stored access token. A 401 is recovered
//! from at most once per request: the token pair is refreshed through the
//! [`RefreshCoordinator`] and the request is resent with the new token. When
//! the refresh itself fails the session is over, the tokens are cleared and
//! the [`Navigator`] is sent to the login location.

use crate::refresh::RefreshCoordinator;
use bytes::Bytes;
use labdesk_config::Config;
use labdesk_types::{LabError, Navigator, TokenStore, traits::Result};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde_json::Value;
use std::{sync::Arc, time::Duration};

/// Path of the credential exchange endpoint.
pub const LOGIN_PATH: &str = "/auth/login";
/// Path of the account creation endpoint.
pub const REGISTER_PATH: &str = "/auth/register";
/// Path of the token refresh endpoint.
pub const REFRESH_PATH: &str = "/auth/refresh";

/// Query signal appended to the login location on session expiry.
pub const SESSION_EXPIRED_QUERY: &str = "session_expired=true";

/// A file attached as a multipart form part.
#[derive(Debug, Clone)]
pub struct FilePart {
    pub field: String,
    pub file_name: String,
    pub bytes: Bytes,
    pub mime: Option<String>,
}

/// Request payload, kept in rebuildable form so a request can be resent.
#[derive(Debug, Clone, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Json(Value),
    Form(Vec<(String, String)>),
    Multipart(FilePart),
}

/// Description of one backend call.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: RequestBody,
    /// Set once the request has been resent after a refresh.
    retried: bool,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: RequestBody::Empty,
            retried: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    #[must_use]
    pub fn query(mut self, params: &[(&str, &str)]) -> Self {
        self.query
            .extend(params.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())));
        self
    }

    #[must_use]
    pub fn json(mut self, body: Value) -> Self {
        self.body = RequestBody::Json(body);
        self
    }

    #[must_use]
    pub fn form(mut self, fields: &[(&str, &str)]) -> Self {
        self.body = RequestBody::Form(
            fields
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
        );
        self
    }

    #[must_use]
    pub fn multipart(mut self, part: FilePart) -> Self {
        self.body = RequestBody::Multipart(part);
        self
    }

    /// Whether this request has already been resent after a refresh.
    #[must_use]
    pub fn is_retried(&self) -> bool {
        self.retried
    }

    /// Login and registration never trigger a refresh.
    fn targets_credentials_endpoint(&self) -> bool {
        let path = self.path.split('?').next().unwrap_or(&self.path);
        path.ends_with(LOGIN_PATH) || path.ends_with(REGISTER_PATH)
    }
}

/// HTTP client that owns the bearer/401 policy for one session.
pub struct SessionHttp {
    http: Client,
    base_url: String,
    stream_timeout: Duration,
    store: Arc<dyn TokenStore>,
    navigator: Arc<dyn Navigator>,
    refresher: RefreshCoordinator,
    config: Config,
}

impl SessionHttp {
    /// Builds the pipeline from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`LabError::Http`] if the underlying HTTP client cannot be built.
    pub fn new(
        config: &Config,
        store: Arc<dyn TokenStore>,
        navigator: Arc<dyn Navigator>,
    ) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let http = Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()?;
        let base_url = config.base_url.trim_end_matches('/').to_string();
        let refresher = RefreshCoordinator::new(
            http.clone(),
            format!("{base_url}{REFRESH_PATH}"),
            Arc::clone(&store),
        );
        Ok(Self {
            http,
            base_url,
            stream_timeout: Duration::from_secs(config.stream_timeout_secs),
            store,
            navigator,
            refresher,
            config: config.clone(),
        })
    }

    /// The token store this session reads and writes.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn TokenStore> {
        &self.store
    }

    /// Where an expired session is sent.
    #[must_use]
    pub fn navigator(&self) -> &Arc<dyn Navigator> {
        &self.navigator
    }

    /// The refresh coordinator shared by every request of this session.
    #[must_use]
    pub fn refresher(&self) -> &RefreshCoordinator {
        &self.refresher
    }

    /// Absolute URL for an API path.
    #[must_use]
    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Reads the access token; an unreadable value counts as absent.
    async fn access_token(&self) -> Option<String> {
        match self.store.access_token().await {
            Ok(token) => token,
            Err(e) => {
                tracing::warn!(error = %e, "access token unreadable, sending unauthenticated");
                None
            }
        }
    }

    fn build(&self, request: &ApiRequest, token: Option<&str>) -> Result<RequestBuilder> {
        let mut builder = self
            .http
            .request(request.method.clone(), self.url(&request.path));
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(token) = token {
            builder = builder.bearer_auth(token);
        }
        Ok(match &request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(body) => builder.json(body),
            RequestBody::Form(fields) => builder.form(fields),
            RequestBody::Multipart(file) => {
                let mut part = reqwest::multipart::Part::bytes(file.bytes.to_vec())
                    .file_name(file.file_name.clone());
                if let Some(mime) = &file.mime {
                    part = part.mime_str(mime)?;
                }
                builder.multipart(reqwest::multipart::Form::new().part(file.field.clone(), part))
            }
        })
    }

    /// Sends `request` through the bearer/401 policy.
    ///
    /// Returns the response only for a success status.
    ///
    /// # Errors
    ///
    /// - [`LabError::AuthExpired`] for a 401 that may not be refreshed (credential
    ///   endpoints, or the resent request failing again).
    /// - [`LabError::RefreshFailed`] / [`LabError::NoRefreshToken`] when the
    ///   refresh fails; the session has then been expired.
    /// - [`LabError::Upstream`] for any other non-success status.
    /// - [`LabError::Http`] on transport failure.
    pub async fn execute(&self, mut request: ApiRequest) -> Result<Response> {
        let token = self.access_token().await;
        tracing::debug!(method = %request.method, path = %request.path, "sending request");
        let resp = self.build(&request, token.as_deref())?.send().await?;

        if resp.status() != StatusCode::UNAUTHORIZED
            || request.retried
            || request.targets_credentials_endpoint()
        {
            return Self::check(resp, &request).await;
        }

        request.retried = true;
        tracing::debug!(path = %request.path, "401 received, refreshing token");
        let pair = match self.refresher.refresh().await {
            Ok(pair) => pair,
            Err(e) => {
                self.expire_session().await;
                return Err(e);
            }
        };

        let resp = self
            .build(&request, Some(&pair.access_token))?
            .send()
            .await?;
        Self::check(resp, &request).await
    }

    async fn check(resp: Response, request: &ApiRequest) -> Result<Response> {
        let status = resp.status();
        if status.is_success() {
            Ok(resp)
        } else if status == StatusCode::UNAUTHORIZED {
            Err(LabError::AuthExpired {
                path: request.path.clone(),
            })
        } else {
            let body = resp.text().await.unwrap_or_default();
            Err(LabError::Upstream {
                status: status.as_u16(),
                body,
            })
        }
    }

    /// Clears the tokens and bounces a protected location to login.
    async fn expire_session(&self) {
        if let Err(e) = self.store.clear_tokens().await {
            tracing::warn!(error = %e, "failed to clear tokens");
        }
        let location = self.navigator.current_location();
        if self.config.is_public_location(&location) {
            tracing::info!(%location, "session expired on a public location");
            return;
        }
        tracing::warn!(%location, "session expired, redirecting to login");
        self.navigator.save_return_path(&location);
        self.navigator
            .navigate(&format!("{}?{SESSION_EXPIRED_QUERY}", self.config.login_location));
    }

    /// Sends `request` with the current token and returns the raw response,
    /// bypassing the 401 policy. Used for streaming bodies.
    ///
    /// `stream_timeout_secs` bounds the whole exchange including the body, so
    /// a reply still streaming when it elapses ends as a transport error.
    ///
    /// # Errors
    ///
    /// Returns [`LabError::StreamTransport`] on a transport failure or a
    /// non-success status.
    pub async fn open_stream(&self, request: &ApiRequest) -> Result<Response> {
        let token = self.access_token().await;
        let resp = self
            .build(request, token.as_deref())?
            .timeout(self.stream_timeout)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| LabError::StreamTransport(format!("stream request failed: {e}")))?;
        let status = resp.status();
        if status.is_success() {
            Ok(resp)
        } else {
            Err(LabError::StreamTransport(format!(
                "stream request returned status {}",
                status.as_u16()
            )))
        }
    }

    /// Sends `request` and decodes a JSON body; an empty body yields `null`.
    ///
    /// # Errors
    ///
    /// As [`SessionHttp::execute`], plus [`LabError::Serialization`] for a
    /// malformed body.
    pub async fn json(&self, request: ApiRequest) -> Result<Value> {
        let bytes = self.execute(request).await?.bytes().await?;
        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Sends `request` and returns the raw body.
    ///
    /// # Errors
    ///
    /// As [`SessionHttp::execute`].
    pub async fn bytes(&self, request: ApiRequest) -> Result<Bytes> {
        Ok(self.execute(request).await?.bytes().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::navigation::InMemoryNavigator;
    use labdesk_store::InMemoryTokenStore;
    use labdesk_types::TokenPair;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn session(
        server: &MockServer,
        store: Arc<InMemoryTokenStore>,
        nav: Arc<InMemoryNavigator>,
    ) -> SessionHttp {
        let config = Config {
            base_url: format!("{}/api", server.uri()),
            ..Config::default()
        };
        SessionHttp::new(&config, store, nav).unwrap()
    }

    #[test]
    fn test_credentials_endpoint_detection() {
        assert!(ApiRequest::post(LOGIN_PATH).targets_credentials_endpoint());
        assert!(ApiRequest::post(REGISTER_PATH).targets_credentials_endpoint());
        assert!(!ApiRequest::get("/projects").targets_credentials_endpoint());
        assert!(!ApiRequest::post(REFRESH_PATH).targets_credentials_endpoint());
    }

    #[tokio::test]
    async fn test_unauthenticated_when_no_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/health"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .mount(&server)
            .await;

        let s = session(
            &server,
            Arc::new(InMemoryTokenStore::new()),
            Arc::new(InMemoryNavigator::new("/")),
        );
        let body = s.json(ApiRequest::get("/health")).await.unwrap();
        assert_eq!(body["ok"], true);
        let received = server.received_requests().await.unwrap();
        assert!(received[0].headers.get("authorization").is_none());
    }

    #[tokio::test]
    async fn test_login_401_never_refreshes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/auth/login"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/auth/refresh"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let store = Arc::new(InMemoryTokenStore::with_tokens(TokenPair::new("a1", "r1")));
        let nav = Arc::new(InMemoryNavigator::new("/login"));
        let s = session(&server, Arc::clone(&store), Arc::clone(&nav));
        let err = s
            .execute(ApiRequest::post(LOGIN_PATH).form(&[("username", "u"), ("password", "p")]))
            .await
            .unwrap_err();
        assert!(matches!(err, LabError::AuthExpired { .. }));
        assert!(store.load_pair().await.unwrap().is_some());
        assert!(nav.history().is_empty());
        server.verify().await;
    }

    #[tokio::test]
    async fn test_second_401_after_retry_is_final() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tasks"))
            .respond_with(ResponseTemplate::new(401))
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/auth/refresh"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"access_token": "a2", "refresh_token": "r2"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let store = Arc::new(InMemoryTokenStore::with_tokens(TokenPair::new("a1", "r1")));
        let s = session(
            &server,
            Arc::clone(&store),
            Arc::new(InMemoryNavigator::new("/tasks")),
        );
        let err = s.execute(ApiRequest::get("/tasks")).await.unwrap_err();
        assert!(matches!(err, LabError::AuthExpired { .. }));
        // The refreshed pair is kept: only a failed refresh clears tokens.
        assert_eq!(store.access_token().await.unwrap().as_deref(), Some("a2"));
        server.verify().await;
    }

    #[tokio::test]
    async fn test_non_401_error_propagates_unchanged() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/ideas/9"))
            .and(header("authorization", "Bearer a1"))
            .respond_with(ResponseTemplate::new(404).set_body_string("no such idea"))
            .mount(&server)
            .await;

        let s = session(
            &server,
            Arc::new(InMemoryTokenStore::with_tokens(TokenPair::new("a1", "r1"))),
            Arc::new(InMemoryNavigator::new("/ideas")),
        );
        let err = s.execute(ApiRequest::get("/ideas/9")).await.unwrap_err();
        match err {
            LabError::Upstream { status, body } => {
                assert_eq!(status, 404);
                assert_eq!(body, "no such idea");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_refresh_failure_on_public_location_does_not_navigate() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let store = Arc::new(InMemoryTokenStore::new());
        let nav = Arc::new(InMemoryNavigator::new("/register"));
        let s = session(&server, Arc::clone(&store), Arc::clone(&nav));
        let err = s.execute(ApiRequest::get("/me")).await.unwrap_err();
        assert!(matches!(err, LabError::NoRefreshToken));
        assert!(nav.history().is_empty());
        assert!(nav.take_return_path().is_none());
    }

    #[tokio::test]
    async fn test_query_forwarded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/projects"))
            .and(wiremock::matchers::query_param("limit", "20"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(1)
            .mount(&server)
            .await;

        let s = session(
            &server,
            Arc::new(InMemoryTokenStore::new()),
            Arc::new(InMemoryNavigator::new("/")),
        );
        let body = s
            .json(ApiRequest::get("/projects").query(&[("limit", "20")]))
            .await
            .unwrap();
        assert_eq!(body, json!([]));
        server.verify().await;
    }

    #[tokio::test]
    async fn test_unreadable_token_sends_unauthenticated() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/projects"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(1)
            .mount(&server)
            .await;

        let config = Config {
            base_url: format!("{}/api", server.uri()),
            ..Config::default()
        };
        let s = SessionHttp::new(
            &config,
            Arc::new(crate::testing::FailingStore),
            Arc::new(InMemoryNavigator::new("/projects")),
        )
        .unwrap();
        let body = s.json(ApiRequest::get("/projects")).await.unwrap();
        assert_eq!(body, json!([]));
        let received = server.received_requests().await.unwrap();
        assert!(received[0].headers.get("authorization").is_none());
        server.verify().await;
    }
}
