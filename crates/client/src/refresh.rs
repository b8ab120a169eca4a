//! Single-flight token refresh.
//!
//! However many requests hit a 401 at once, at most one refresh call is in
//! flight per client. The first caller spawns the exchange and parks a shared
//! handle in a mutex-guarded slot; every later caller awaits the same handle
//! and receives the same outcome. The spawned task writes the new pair to the
//! [`TokenStore`] and clears the slot before the outcome is released, so the
//! next 401 after settlement starts a fresh attempt.

use futures_util::{
    FutureExt as _,
    future::{BoxFuture, Shared},
};
use labdesk_types::{LabError, TokenPair, TokenStore};
use serde_json::json;
use std::sync::{Arc, Mutex};

/// Why a refresh attempt failed. Cloned to every waiter of the attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshFailure {
    /// No refresh token is stored; no backend call was made.
    NoRefreshToken,
    /// The refresh endpoint answered with a non-success status.
    Rejected { status: u16 },
    /// The refresh endpoint could not be reached or answered garbage.
    Transport(String),
    /// The new pair could not be persisted.
    Storage(String),
}

impl From<RefreshFailure> for LabError {
    fn from(f: RefreshFailure) -> Self {
        match f {
            RefreshFailure::NoRefreshToken => Self::NoRefreshToken,
            RefreshFailure::Rejected { status } => {
                Self::RefreshFailed(format!("refresh endpoint returned {status}"))
            }
            RefreshFailure::Transport(msg) | RefreshFailure::Storage(msg) => {
                Self::RefreshFailed(msg)
            }
        }
    }
}

type RefreshOutcome = Result<TokenPair, RefreshFailure>;
type PendingRefresh = Shared<BoxFuture<'static, RefreshOutcome>>;

struct Inner {
    http: reqwest::Client,
    url: String,
    store: Arc<dyn TokenStore>,
    pending: Mutex<Option<PendingRefresh>>,
}

/// Collapses concurrent refresh demand into a single backend call.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

impl RefreshCoordinator {
    /// Creates a coordinator that posts to `url` (the full refresh endpoint).
    pub fn new(http: reqwest::Client, url: impl Into<String>, store: Arc<dyn TokenStore>) -> Self {
        Self {
            inner: Arc::new(Inner {
                http,
                url: url.into(),
                store,
                pending: Mutex::new(None),
            }),
        }
    }

    /// Returns `true` while a refresh attempt is unsettled.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.inner.pending.lock().unwrap().is_some()
    }

    /// Exchanges the stored refresh token for a new pair, joining the attempt
    /// already in flight if there is one.
    ///
    /// The attempt runs on its own task and completes even if every caller
    /// stops waiting.
    ///
    /// # Errors
    ///
    /// Returns [`LabError::NoRefreshToken`] when no refresh token is stored
    /// and [`LabError::RefreshFailed`] when the exchange fails.
    pub async fn refresh(&self) -> Result<TokenPair, LabError> {
        let pending = {
            let mut slot = self.inner.pending.lock().unwrap();
            if let Some(pending) = slot.as_ref() {
                tracing::debug!("joining in-flight token refresh");
                pending.clone()
            } else {
                let inner = Arc::clone(&self.inner);
                let task = tokio::spawn(async move {
                    let outcome = inner.exchange().await;
                    inner.pending.lock().unwrap().take();
                    outcome
                });
                let owner = Arc::clone(&self.inner);
                let pending = async move {
                    task.await.unwrap_or_else(|e| {
                        // The task died before clearing the slot.
                        owner.pending.lock().unwrap().take();
                        Err(RefreshFailure::Transport(format!("refresh task aborted: {e}")))
                    })
                }
                .boxed()
                .shared();
                *slot = Some(pending.clone());
                pending
            }
        };
        pending.await.map_err(LabError::from)
    }
}

impl Inner {
    async fn exchange(&self) -> RefreshOutcome {
        let refresh_token = match self.store.refresh_token().await {
            Ok(Some(token)) => token,
            Ok(None) => return Err(RefreshFailure::NoRefreshToken),
            Err(e) => {
                tracing::warn!(error = %e, "refresh token unreadable, treating as absent");
                return Err(RefreshFailure::NoRefreshToken);
            }
        };

        let resp = self
            .http
            .post(&self.url)
            .json(&json!({ "refresh_token": refresh_token }))
            .send()
            .await
            .map_err(|e| RefreshFailure::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), "token refresh rejected");
            return Err(RefreshFailure::Rejected {
                status: status.as_u16(),
            });
        }

        let pair: TokenPair = resp.json().await.map_err(|e| {
            RefreshFailure::Transport(format!("malformed refresh response: {e}"))
        })?;
        self.store
            .set_tokens(&pair)
            .await
            .map_err(|e| RefreshFailure::Storage(e.to_string()))?;
        tracing::info!("access token refreshed");
        Ok(pair)
    }
}
