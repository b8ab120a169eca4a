//! In-memory token store backed by a single `Mutex`-guarded slot.

use async_trait::async_trait;
use labdesk_types::{TokenPair, TokenStore, traits::Result};
use std::sync::Mutex;

/// An in-memory [`TokenStore`] implementation for testing and ephemeral use.
///
/// The pair lives in one slot, so both tokens always change together.
#[derive(Default)]
pub struct InMemoryTokenStore {
    pair: Mutex<Option<TokenPair>>,
}

impl InMemoryTokenStore {
    /// Creates a new empty in-memory token store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store already holding `pair`.
    #[must_use]
    pub fn with_tokens(pair: TokenPair) -> Self {
        Self {
            pair: Mutex::new(Some(pair)),
        }
    }
}

#[async_trait]
impl TokenStore for InMemoryTokenStore {
    async fn access_token(&self) -> Result<Option<String>> {
        Ok(self
            .pair
            .lock()
            .unwrap()
            .as_ref()
            .map(|p| p.access_token.clone()))
    }

    async fn refresh_token(&self) -> Result<Option<String>> {
        Ok(self
            .pair
            .lock()
            .unwrap()
            .as_ref()
            .map(|p| p.refresh_token.clone()))
    }

    async fn set_tokens(&self, pair: &TokenPair) -> Result<()> {
        *self.pair.lock().unwrap() = Some(pair.clone());
        Ok(())
    }

    async fn clear_tokens(&self) -> Result<()> {
        *self.pair.lock().unwrap() = None;
        Ok(())
    }

    async fn load_pair(&self) -> Result<Option<TokenPair>> {
        Ok(self.pair.lock().unwrap().clone())
    }
}
