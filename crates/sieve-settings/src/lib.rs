//! # sieve-settings
//!
//! Configuration for the sieve semantic coarse-filtering engine.
//!
//! Settings load from `~/.sieve/settings.json`, deep-merged over compiled
//! defaults, with environment variable overrides applied last.
//!
//! ## Crate Position
//!
//! Standalone (no sieve crate dependencies).
//! Depended on by: sieve-embeddings.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{load_settings, load_settings_from_path, settings_path};
pub use types::{Device, EmbeddingSettings, FilterSettings, SieveSettings};
