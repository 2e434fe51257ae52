//! afm-engine library interface
//!
//! Calibration matching and project progress tracking over an astronomical
//! frame catalog. Exposes the services for the command-line front end and
//! for integration testing.

pub mod db;
pub mod models;
pub mod services;
pub mod utils;

use afm_common::{EngineConfig, Result};
use sqlx::SqlitePool;
use std::path::Path;
use std::sync::Arc;

pub use services::{BatchReviewer, CalibrationMatcher, ProjectTracker};

/// Services sharing one catalog connection pool
#[derive(Clone)]
pub struct Engine {
    pub db: SqlitePool,
    pub config: EngineConfig,
    pub matcher: CalibrationMatcher,
    pub tracker: ProjectTracker,
    pub reviewer: Arc<BatchReviewer>,
}

impl Engine {
    pub fn new(db: SqlitePool, config: EngineConfig) -> Self {
        Self {
            matcher: CalibrationMatcher::new(db.clone(), config.matcher.clone()),
            tracker: ProjectTracker::new(db.clone()),
            reviewer: Arc::new(BatchReviewer::new(db.clone(), config.matcher.clone())),
            db,
            config,
        }
    }

    /// Open (creating if needed) the catalog at `path`
    pub async fn open(path: &Path, config: EngineConfig) -> Result<Self> {
        let db = afm_common::db::init_database(path).await?;
        Ok(Self::new(db, config))
    }

    /// Engine over a private in-memory catalog
    pub async fn in_memory(config: EngineConfig) -> Result<Self> {
        let db = afm_common::db::init_memory_database().await?;
        Ok(Self::new(db, config))
    }
}
