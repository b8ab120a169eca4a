//! Typed surface over the labdesk REST API.
//!
//! Domain payloads are passed through as [`serde_json::Value`]; this layer
//! only knows paths, verbs and the session lifecycle.

use crate::{
    http::{ApiRequest, FilePart, LOGIN_PATH, REGISTER_PATH, SessionHttp},
    stream::{self, StreamHandler, StreamOutcome},
};
use bytes::Bytes;
use labdesk_config::Config;
use labdesk_types::{LabError, Navigator, TokenPair, TokenStore, traits::Result};
use serde_json::{Value, json};
use std::sync::Arc;

/// Entry point for every backend call of one session.
#[derive(Clone)]
pub struct LabClient {
    http: Arc<SessionHttp>,
}

impl LabClient {
    /// Builds a client over the given token store and navigator.
    ///
    /// # Errors
    ///
    /// Returns [`LabError::Http`] if the HTTP client cannot be built.
    pub fn new(
        config: &Config,
        store: Arc<dyn TokenStore>,
        navigator: Arc<dyn Navigator>,
    ) -> Result<Self> {
        Ok(Self {
            http: Arc::new(SessionHttp::new(config, store, navigator)?),
        })
    }

    /// The underlying request pipeline.
    #[must_use]
    pub fn http(&self) -> &SessionHttp {
        &self.http
    }

    // ── Session ──────────────────────────────────────────────────────────

    /// Exchanges credentials for a token pair and stores it, then returns the
    /// navigator to the location an earlier session expired on, if any.
    ///
    /// # Errors
    ///
    /// Returns [`LabError::AuthExpired`] for rejected credentials, or any
    /// transport/storage error.
    pub async fn login(&self, username: &str, password: &str) -> Result<TokenPair> {
        let body = self
            .http
            .json(
                ApiRequest::post(LOGIN_PATH)
                    .form(&[("username", username), ("password", password)]),
            )
            .await?;
        let pair: TokenPair = serde_json::from_value(body)?;
        self.http.store().set_tokens(&pair).await?;
        tracing::info!(username, "logged in");
        let navigator = self.http.navigator();
        if let Some(location) = navigator.take_return_path() {
            navigator.navigate(&location);
        }
        Ok(pair)
    }

    /// Creates an account. Does not log in.
    ///
    /// # Errors
    ///
    /// Returns [`LabError::Upstream`] if the backend rejects the registration.
    pub async fn register(&self, account: Value) -> Result<Value> {
        self.http
            .json(ApiRequest::post(REGISTER_PATH).json(account))
            .await
    }

    /// Forgets the stored token pair.
    ///
    /// # Errors
    ///
    /// Returns [`LabError::Storage`] if the store cannot be cleared.
    pub async fn logout(&self) -> Result<()> {
        self.http.store().clear_tokens().await?;
        tracing::info!("logged out");
        Ok(())
    }

    /// The profile of the logged-in user.
    ///
    /// # Errors
    ///
    /// As [`SessionHttp::execute`].
    pub async fn me(&self) -> Result<Value> {
        self.http.json(ApiRequest::get("/auth/me")).await
    }

    /// Returns `true` if an access token is stored.
    pub async fn has_session(&self) -> bool {
        matches!(self.http.store().access_token().await, Ok(Some(_)))
    }

    /// Raw authenticated `GET` of any API path.
    ///
    /// # Errors
    ///
    /// As [`SessionHttp::execute`].
    pub async fn get_json(&self, path: &str, query: &[(&str, &str)]) -> Result<Value> {
        self.http.json(ApiRequest::get(path).query(query)).await
    }

    // ── Collections ──────────────────────────────────────────────────────

    #[must_use]
    pub fn ideas(&self) -> Resource<'_> {
        self.resource("/ideas")
    }

    #[must_use]
    pub fn projects(&self) -> Resource<'_> {
        self.resource("/projects")
    }

    #[must_use]
    pub fn tasks(&self) -> Resource<'_> {
        self.resource("/tasks")
    }

    #[must_use]
    pub fn experiments(&self) -> Resource<'_> {
        self.resource("/experiments")
    }

    #[must_use]
    pub fn knowledge_base(&self) -> Resource<'_> {
        self.resource("/knowledge-base")
    }

    /// Chat threads as a plain collection; see [`LabClient::chat`] for
    /// messages and streaming.
    #[must_use]
    pub fn chats(&self) -> Resource<'_> {
        self.resource("/chats")
    }

    /// Any collection by its path, e.g. `/projects`.
    #[must_use]
    pub fn resource(&self, base: &str) -> Resource<'_> {
        Resource {
            http: &self.http,
            base: base.trim_end_matches('/').to_string(),
        }
    }

    #[must_use]
    pub fn files(&self) -> Files<'_> {
        Files { http: &self.http }
    }

    #[must_use]
    pub fn chat(&self) -> Chat<'_> {
        Chat { http: &self.http }
    }

    // ── Logs & reports ───────────────────────────────────────────────────

    /// Audit trail entries.
    ///
    /// # Errors
    ///
    /// As [`SessionHttp::execute`].
    pub async fn audit_logs(&self, query: &[(&str, &str)]) -> Result<Value> {
        self.get_json("/audit-logs", query).await
    }

    /// Recorded LLM calls.
    ///
    /// # Errors
    ///
    /// As [`SessionHttp::execute`].
    pub async fn llm_logs(&self, query: &[(&str, &str)]) -> Result<Value> {
        self.get_json("/llm-logs", query).await
    }

    /// Exports a report (e.g. `projects`, `experiments`) as CSV text.
    /// Invalid UTF-8 is replaced rather than rejected.
    ///
    /// # Errors
    ///
    /// As [`SessionHttp::execute`].
    pub async fn export_report(&self, kind: &str, query: &[(&str, &str)]) -> Result<String> {
        let bytes = self
            .http
            .bytes(ApiRequest::get(format!("/reports/{kind}/export")).query(query))
            .await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// CRUD handle over one collection.
pub struct Resource<'a> {
    http: &'a SessionHttp,
    base: String,
}

impl Resource<'_> {
    fn item(&self, id: &str) -> String {
        format!("{}/{id}", self.base)
    }

    /// Lists items; `query` carries paging and filter parameters.
    ///
    /// # Errors
    ///
    /// As [`SessionHttp::execute`].
    pub async fn list(&self, query: &[(&str, &str)]) -> Result<Value> {
        self.http
            .json(ApiRequest::get(self.base.as_str()).query(query))
            .await
    }

    /// # Errors
    ///
    /// As [`SessionHttp::execute`].
    pub async fn get(&self, id: &str) -> Result<Value> {
        self.http.json(ApiRequest::get(self.item(id))).await
    }

    /// # Errors
    ///
    /// As [`SessionHttp::execute`].
    pub async fn create(&self, body: Value) -> Result<Value> {
        self.http
            .json(ApiRequest::post(self.base.as_str()).json(body))
            .await
    }

    /// # Errors
    ///
    /// As [`SessionHttp::execute`].
    pub async fn update(&self, id: &str, body: Value) -> Result<Value> {
        self.http.json(ApiRequest::put(self.item(id)).json(body)).await
    }

    /// # Errors
    ///
    /// As [`SessionHttp::execute`].
    pub async fn delete(&self, id: &str) -> Result<()> {
        self.http.execute(ApiRequest::delete(self.item(id))).await?;
        Ok(())
    }

    /// # Errors
    ///
    /// As [`SessionHttp::execute`].
    pub async fn archive(&self, id: &str) -> Result<Value> {
        self.http
            .json(ApiRequest::post(format!("{}/archive", self.item(id))))
            .await
    }

    /// # Errors
    ///
    /// As [`SessionHttp::execute`].
    pub async fn unarchive(&self, id: &str) -> Result<Value> {
        self.http
            .json(ApiRequest::post(format!("{}/unarchive", self.item(id))))
            .await
    }
}

/// Uploaded file management.
pub struct Files<'a> {
    http: &'a SessionHttp,
}

impl Files<'_> {
    /// # Errors
    ///
    /// As [`SessionHttp::execute`].
    pub async fn list(&self, query: &[(&str, &str)]) -> Result<Value> {
        self.http.json(ApiRequest::get("/files").query(query)).await
    }

    /// Uploads `bytes` as a multipart `file` part.
    ///
    /// # Errors
    ///
    /// As [`SessionHttp::execute`].
    pub async fn upload(&self, file_name: &str, bytes: Bytes, mime: Option<&str>) -> Result<Value> {
        let part = FilePart {
            field: "file".to_string(),
            file_name: file_name.to_string(),
            bytes,
            mime: mime.map(str::to_string),
        };
        self.http
            .json(ApiRequest::post("/files/upload").multipart(part))
            .await
    }

    /// # Errors
    ///
    /// As [`SessionHttp::execute`].
    pub async fn download(&self, id: &str) -> Result<Bytes> {
        self.http
            .bytes(ApiRequest::get(format!("/files/{id}/download")))
            .await
    }

    /// # Errors
    ///
    /// As [`SessionHttp::execute`].
    pub async fn delete(&self, id: &str) -> Result<()> {
        self.http
            .execute(ApiRequest::delete(format!("/files/{id}")))
            .await?;
        Ok(())
    }
}

/// Chat threads and streamed replies.
pub struct Chat<'a> {
    http: &'a SessionHttp,
}

impl Chat<'_> {
    /// # Errors
    ///
    /// As [`SessionHttp::execute`].
    pub async fn threads(&self) -> Result<Value> {
        self.http.json(ApiRequest::get("/chats")).await
    }

    /// # Errors
    ///
    /// As [`SessionHttp::execute`].
    pub async fn create_thread(&self, body: Value) -> Result<Value> {
        self.http.json(ApiRequest::post("/chats").json(body)).await
    }

    /// # Errors
    ///
    /// As [`SessionHttp::execute`].
    pub async fn messages(&self, thread_id: &str) -> Result<Value> {
        self.http
            .json(ApiRequest::get(format!("/chats/{thread_id}/messages")))
            .await
    }

    /// Posts `message` and streams the reply into `handler`.
    ///
    /// Failures to open the stream are reported once through
    /// [`StreamHandler::on_error`] rather than returned.
    pub async fn stream_message<H>(
        &self,
        thread_id: &str,
        message: &str,
        use_agent: bool,
        handler: &mut H,
    ) -> StreamOutcome
    where
        H: StreamHandler + ?Sized,
    {
        let request = ApiRequest::post(format!("/chats/{thread_id}/stream")).json(json!({
            "thread_id": thread_id,
            "message": message,
            "use_agent": use_agent,
        }));
        match self.http.open_stream(&request).await {
            Ok(resp) => stream::consume(stream::byte_stream(resp), handler).await,
            Err(e) => {
                let message = match e {
                    LabError::StreamTransport(msg) => msg,
                    other => other.to_string(),
                };
                tracing::warn!(thread_id, error = %message, "chat stream failed to open");
                handler.on_error(&message);
                StreamOutcome::Failed { message }
            }
        }
    }
}
