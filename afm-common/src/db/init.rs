//! Database initialization
//!
//! Opens (or creates) the frame catalog and brings its schema up to date.
//! Connection options apply to every pooled connection:
//! - foreign keys enforced (project deletion cascades)
//! - WAL journal so matcher reads proceed during catalog writes
//! - 5 s busy timeout before a write reports "database is locked"

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

const BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(BUSY_TIMEOUT);

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .min_connections(1)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new catalog database: {}", db_path.display());
    } else {
        info!("Opened existing catalog database: {}", db_path.display());
    }

    create_schema(&pool).await?;
    crate::db::migrations::run_migrations(&pool).await?;

    Ok(pool)
}

/// Initialize a private in-memory catalog
///
/// Every SQLite in-memory connection is its own database, so the pool is
/// pinned to one connection that is never recycled.
pub async fn init_memory_database() -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?
        .foreign_keys(true)
        .busy_timeout(BUSY_TIMEOUT);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;

    create_schema(&pool).await?;
    crate::db::migrations::run_migrations(&pool).await?;

    Ok(pool)
}

/// Create all catalog tables (idempotent)
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_schema_version_table(pool).await?;
    create_projects_table(pool).await?;
    create_project_sessions_table(pool).await?;
    create_frames_table(pool).await?;
    create_project_filter_goals_table(pool).await?;
    create_project_master_frames_table(pool).await?;
    Ok(())
}

pub async fn create_schema_version_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn create_projects_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS projects (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            object_name TEXT NOT NULL,
            description TEXT,
            year INTEGER,
            start_date TEXT,
            status TEXT NOT NULL DEFAULT 'active'
                CHECK (status IN ('active', 'completed', 'archived')),
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn create_project_sessions_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS project_sessions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            project_id INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
            session_id TEXT NOT NULL,
            date_loc TEXT NOT NULL,
            object_name TEXT NOT NULL,
            filter TEXT,
            frame_count INTEGER NOT NULL DEFAULT 0,
            approved_count INTEGER NOT NULL DEFAULT 0,
            rejected_count INTEGER NOT NULL DEFAULT 0,
            graded INTEGER NOT NULL DEFAULT 0,
            avg_fwhm REAL,
            notes TEXT,
            assigned_date TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn create_frames_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS frames (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            file_hash TEXT NOT NULL UNIQUE,
            filepath TEXT NOT NULL,
            filename TEXT NOT NULL,
            telescop TEXT,
            instrume TEXT,
            object TEXT,
            filter TEXT,
            imagetyp TEXT,
            frame_kind TEXT CHECK (frame_kind IN ('Light', 'Dark', 'Flat', 'Bias')),
            is_master INTEGER NOT NULL DEFAULT 0,
            exposure REAL,
            ccd_temp REAL,
            xbinning INTEGER,
            ybinning INTEGER,
            date_loc TEXT,
            project_id INTEGER REFERENCES projects(id) ON DELETE SET NULL,
            session_assignment_id INTEGER REFERENCES project_sessions(id) ON DELETE SET NULL,
            fwhm REAL,
            eccentricity REAL,
            snr REAL,
            star_count INTEGER,
            background_level REAL,
            approval_status TEXT NOT NULL DEFAULT 'not_graded'
                CHECK (approval_status IN ('not_graded', 'approved', 'rejected')),
            grading_date TEXT,
            grading_notes TEXT,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn create_project_filter_goals_table(pool: &SqlitePool) -> Result<()> {
    // (project_id, filter) uniqueness is NULL-safe and enforced by the tracker;
    // a UNIQUE constraint would let two NULL filters coexist.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS project_filter_goals (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            project_id INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
            filter TEXT,
            target_count INTEGER NOT NULL CHECK (target_count > 0),
            total_count INTEGER NOT NULL DEFAULT 0,
            approved_count INTEGER NOT NULL DEFAULT 0,
            last_updated TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn create_project_master_frames_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS project_master_frames (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            project_id INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
            file_id INTEGER NOT NULL REFERENCES frames(id) ON DELETE CASCADE,
            frame_type TEXT NOT NULL
                CHECK (frame_type IN ('Master Dark', 'Master Flat', 'Master Bias')),
            filter TEXT,
            exposure REAL,
            ccd_temp REAL,
            binning TEXT,
            imported_date TEXT NOT NULL,
            notes TEXT,
            UNIQUE(project_id, file_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
