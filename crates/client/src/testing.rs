//! Token stores that misbehave, for exercising error paths.

use async_trait::async_trait;
use labdesk_types::{LabError, TokenPair, TokenStore, traits::Result};
use std::sync::atomic::{AtomicBool, Ordering};

/// Every read fails; writes are accepted and dropped.
pub(crate) struct FailingStore;

#[async_trait]
impl TokenStore for FailingStore {
    async fn access_token(&self) -> Result<Option<String>> {
        Err(LabError::Storage("disk unreadable".into()))
    }

    async fn refresh_token(&self) -> Result<Option<String>> {
        Err(LabError::Storage("disk unreadable".into()))
    }

    async fn set_tokens(&self, _pair: &TokenPair) -> Result<()> {
        Ok(())
    }

    async fn clear_tokens(&self) -> Result<()> {
        Ok(())
    }
}

/// Panics on the first refresh token read, then reports an empty store.
#[derive(Default)]
pub(crate) struct PanicOnceStore {
    tripped: AtomicBool,
}

#[async_trait]
impl TokenStore for PanicOnceStore {
    async fn access_token(&self) -> Result<Option<String>> {
        Ok(None)
    }

    async fn refresh_token(&self) -> Result<Option<String>> {
        if !self.tripped.swap(true, Ordering::SeqCst) {
            panic!("store lock poisoned");
        }
        Ok(None)
    }

    async fn set_tokens(&self, _pair: &TokenPair) -> Result<()> {
        Ok(())
    }

    async fn clear_tokens(&self) -> Result<()> {
        Ok(())
    }
}
