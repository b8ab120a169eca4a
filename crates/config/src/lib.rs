//! Configuration loading for the labdesk client.
//!
//! Uses figment for YAML-based configuration with sensible defaults and
//! `LABDESK_*` environment overrides.

pub mod schema;

pub use schema::{Config, LogConfig, LogFormat, StoreConfig};
