//! Authenticated session client for the labdesk backend.
//!
//! The [`SessionHttp`] pipeline attaches the stored bearer token to every
//! request and recovers from a 401 by refreshing the token pair once through
//! the [`RefreshCoordinator`]. Streaming chat replies are decoded by the
//! [`stream`] module. [`LabClient`] is the typed surface over both.

pub mod api;
pub mod http;
pub mod navigation;
pub mod refresh;
pub mod stream;

#[cfg(test)]
mod testing;

pub use api::{Chat, Files, LabClient, Resource};
pub use http::{ApiRequest, RequestBody, SessionHttp};
pub use navigation::InMemoryNavigator;
pub use refresh::{RefreshCoordinator, RefreshFailure};
pub use stream::{FrameDecoder, StreamHandler, StreamOutcome};
