//! Async traits shared across all labdesk crates.
//!
//! Every cross-crate abstraction is defined here so that higher layers depend
//! only on `labdesk-types`, not on each other.

use crate::{LabError, TokenPair};
use async_trait::async_trait;
use bytes::Bytes;
use futures_core::Stream;
use std::pin::Pin;

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, LabError>;

/// A pinned, sendable stream of response body chunks.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Fixed storage key of the access token.
pub const ACCESS_TOKEN_KEY: &str = "access_token";

/// Fixed storage key of the refresh token.
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";

/// Fixed session key under which the location to return to after login is kept.
pub const RETURN_PATH_KEY: &str = "redirect_after_login";

/// Durable storage for the session's token pair.
///
/// The two tokens are written and removed together; a store never holds a
/// partially updated pair.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Load the access token, if one is stored.
    async fn access_token(&self) -> Result<Option<String>>;
    /// Load the refresh token, if one is stored.
    async fn refresh_token(&self) -> Result<Option<String>>;
    /// Overwrite both tokens.
    async fn set_tokens(&self, pair: &TokenPair) -> Result<()>;
    /// Remove both tokens.
    async fn clear_tokens(&self) -> Result<()>;

    /// Load the complete pair, if both halves are stored.
    async fn load_pair(&self) -> Result<Option<TokenPair>> {
        let access = self.access_token().await?;
        let refresh = self.refresh_token().await?;
        Ok(access
            .zip(refresh)
            .map(|(access_token, refresh_token)| TokenPair {
                access_token,
                refresh_token,
            }))
    }
}

/// The UI navigation capability used to bounce an expired session to login.
pub trait Navigator: Send + Sync {
    /// The location currently displayed, e.g. `/projects`.
    fn current_location(&self) -> String;
    /// Move to `target` (a path with an optional query string).
    fn navigate(&self, target: &str);
    /// Remember `location` so the login page can return to it.
    fn save_return_path(&self, location: &str);
    /// Take (and forget) the remembered return location.
    fn take_return_path(&self) -> Option<String>;
}
