//! # AFM Common Library
//!
//! Shared code for the astronomical frame manager crates:
//! - Error taxonomy
//! - Configuration loading (matcher tolerances and thresholds)
//! - Database initialization and schema migrations
//! - Frame classification and status models

pub mod config;
pub mod db;
pub mod error;

pub use config::{EngineConfig, FlatMatchMode, MatcherConfig};
pub use error::{Error, Result};
