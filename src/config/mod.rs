//! Configuration module for Page-Harvest
//!
//! This module handles loading, parsing, and validating TOML configuration
//! files, and resolving the session settings that come from the environment.
//!
//! # Example
//!
//! ```no_run
//! use page_harvest::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("harvest.toml")).unwrap();
//! println!("Harvesting up to {} items", config.limits.max_items);
//! ```

mod env;
mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    Config, DetailConfig, FieldConfig, LimitsConfig, ListingConfig, OutputConfig, PacingConfig,
    RetryConfig, SessionConfig, StorageBackend, StorageConfig,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};

pub use env::{load_session_env, resolve_headless, resolve_session_env, SessionEnv};
