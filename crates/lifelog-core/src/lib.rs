//! Core types, collaborator contracts and shared utilities for the lifelog
//! search engine.
//!
//! Config merges `config.toml` + `config.<env>.toml` + `APP_*` env vars via
//! Figment; the typed [`config::EngineConfig`] lives under the `engine` key.

pub mod clock;
pub mod config;
pub mod error;
pub mod store;
pub mod text;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
