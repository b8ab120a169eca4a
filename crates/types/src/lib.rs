//! Core types and traits for the labdesk workspace.
//!
//! This crate defines the shared abstractions used by every layer of the
//! labdesk session client: the error taxonomy, the bearer token pair, the
//! frames carried by the chat event stream, and the async traits that the
//! storage and navigation backends implement.

pub mod error;
pub mod frame;
pub mod token;
pub mod traits;

pub use error::LabError;
pub use frame::StreamFrame;
pub use token::TokenPair;
pub use traits::{ByteStream, Navigator, TokenStore};
