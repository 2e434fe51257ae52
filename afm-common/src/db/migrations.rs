//! Database schema migrations
//!
//! Versioned upgrades tracked in the `schema_version` table. Each migration is
//! idempotent so it can run against catalogs written by older tools as well as
//! freshly created ones.
//!
//! 1. **Never modify existing migrations** - add a new one for each change
//! 2. **Prefer ALTER TABLE** over DROP/CREATE so existing frames survive

use crate::db::models::FrameType;
use crate::Result;
use sqlx::{Connection, Row, SqliteConnection, SqlitePool};
use tracing::{info, warn};

/// Current schema version
///
/// **IMPORTANT:** Increment this when adding new migrations
pub const CURRENT_SCHEMA_VERSION: i32 = 3;

/// Get current schema version from database
///
/// Returns 0 if schema_version table doesn't exist or has no rows
pub async fn get_schema_version(pool: &SqlitePool) -> Result<i32> {
    let table_exists: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM sqlite_master
            WHERE type='table' AND name='schema_version'
        )
        "#,
    )
    .fetch_one(pool)
    .await?;

    if !table_exists {
        return Ok(0);
    }

    let version: Option<i32> =
        sqlx::query_scalar("SELECT version FROM schema_version ORDER BY version DESC LIMIT 1")
            .fetch_optional(pool)
            .await?;

    Ok(version.unwrap_or(0))
}

async fn set_schema_version(pool: &SqlitePool, version: i32) -> Result<()> {
    sqlx::query("INSERT INTO schema_version (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await?;

    Ok(())
}

/// Run all pending migrations
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    let current_version = get_schema_version(pool).await?;

    if current_version == CURRENT_SCHEMA_VERSION {
        info!("Database schema is up to date (v{})", current_version);
        return Ok(());
    }

    if current_version > CURRENT_SCHEMA_VERSION {
        warn!(
            "Database schema version ({}) is newer than code version ({})",
            current_version, CURRENT_SCHEMA_VERSION
        );
        return Ok(());
    }

    info!(
        "Running database migrations: v{} -> v{}",
        current_version, CURRENT_SCHEMA_VERSION
    );

    if current_version < 1 {
        migrate_v1(pool).await?;
        set_schema_version(pool, 1).await?;
        info!("✓ Migration v1 completed");
    }

    if current_version < 2 {
        migrate_v2(pool).await?;
        set_schema_version(pool, 2).await?;
        info!("✓ Migration v2 completed");
    }

    if current_version < 3 {
        migrate_v3(pool).await?;
        set_schema_version(pool, 3).await?;
        info!("✓ Migration v3 completed");
    }

    Ok(())
}

/// Migration v1: classify frames from IMAGETYP text
///
/// Catalogs written by older tools only carry the free-text `imagetyp`.
/// Adds `frame_kind`/`is_master` where missing and fills them once, so query
/// paths never need substring matching.
async fn migrate_v1(pool: &SqlitePool) -> Result<()> {
    info!("Running migration v1: Classify frame types");

    for (column, ddl) in [
        ("frame_kind", "ALTER TABLE frames ADD COLUMN frame_kind TEXT"),
        (
            "is_master",
            "ALTER TABLE frames ADD COLUMN is_master INTEGER NOT NULL DEFAULT 0",
        ),
    ] {
        let has_column: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM pragma_table_info('frames') WHERE name = ?",
        )
        .bind(column)
        .fetch_one(pool)
        .await?;

        if has_column == 0 {
            sqlx::query(ddl).execute(pool).await?;
            info!("  ✓ Added {} column to frames table", column);
        }
    }

    let rows = sqlx::query(
        "SELECT id, imagetyp FROM frames WHERE frame_kind IS NULL AND imagetyp IS NOT NULL",
    )
    .fetch_all(pool)
    .await?;

    if rows.is_empty() {
        return Ok(());
    }

    let mut tx = pool.begin().await?;
    let mut classified = 0usize;
    let mut unknown = 0usize;

    for row in &rows {
        let id: i64 = row.get("id");
        let imagetyp: String = row.get("imagetyp");

        match FrameType::parse(&imagetyp) {
            Some(frame_type) => {
                sqlx::query("UPDATE frames SET frame_kind = ?, is_master = ? WHERE id = ?")
                    .bind(frame_type.kind.as_str())
                    .bind(frame_type.is_master)
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
                classified += 1;
            }
            None => unknown += 1,
        }
    }

    tx.commit().await?;

    if unknown > 0 {
        warn!(unknown, "  Frames with unrecognized IMAGETYP left unclassified");
    }
    info!(classified, "  ✓ Classified existing frames");

    Ok(())
}

/// Migration v2: calibration matching and project lookup indexes
async fn migrate_v2(pool: &SqlitePool) -> Result<()> {
    info!("Running migration v2: Create matching indexes");

    let statements = [
        "CREATE INDEX IF NOT EXISTS idx_frames_calibration \
         ON frames(frame_kind, is_master, xbinning, ybinning, ccd_temp)",
        "CREATE INDEX IF NOT EXISTS idx_frames_session \
         ON frames(frame_kind, date_loc, object, filter)",
        "CREATE INDEX IF NOT EXISTS idx_frames_project ON frames(project_id)",
        "CREATE INDEX IF NOT EXISTS idx_frames_filename ON frames(filename)",
        "CREATE INDEX IF NOT EXISTS idx_goals_project ON project_filter_goals(project_id)",
    ];

    for statement in statements {
        sqlx::query(statement).execute(pool).await?;
    }

    Ok(())
}

/// Migration v3: NULL-safe session identity uniqueness
///
/// The v2 layout declared UNIQUE(project_id, session_id), where `session_id`
/// writes a null filter as "NoFilter". A real "NoFilter" filter then collided
/// with the null one. Catalogs carrying that constraint are rebuilt without
/// it, keeping row ids so frame links survive, then the identity index is
/// created.
async fn migrate_v3(pool: &SqlitePool) -> Result<()> {
    info!("Running migration v3: NULL-safe session identity index");

    let legacy_constraint: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM sqlite_master
        WHERE type = 'index'
          AND tbl_name = 'project_sessions'
          AND name LIKE 'sqlite_autoindex_project_sessions%'
        "#,
    )
    .fetch_one(pool)
    .await?;

    if legacy_constraint > 0 {
        let mut conn = pool.acquire().await?;

        // Dropping the old table must not fire ON DELETE SET NULL on frames
        sqlx::query("PRAGMA foreign_keys = OFF")
            .execute(&mut *conn)
            .await?;
        let rebuilt = rebuild_project_sessions(&mut conn).await;
        sqlx::query("PRAGMA foreign_keys = ON")
            .execute(&mut *conn)
            .await?;
        rebuilt?;

        info!("  ✓ Rebuilt project_sessions without session_id constraint");
    }

    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_project_sessions_identity
        ON project_sessions(date_loc, object_name, filter IS NULL, IFNULL(filter, ''))
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn rebuild_project_sessions(conn: &mut SqliteConnection) -> Result<()> {
    let mut tx = conn.begin().await?;

    sqlx::query(
        r#"
        CREATE TABLE project_sessions_v3 (
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
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO project_sessions_v3 (
            id, project_id, session_id, date_loc, object_name, filter, frame_count,
            approved_count, rejected_count, graded, avg_fwhm, notes, assigned_date
        )
        SELECT
            id, project_id, session_id, date_loc, object_name, filter, frame_count,
            approved_count, rejected_count, graded, avg_fwhm, notes, assigned_date
        FROM project_sessions
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query("DROP TABLE project_sessions")
        .execute(&mut *tx)
        .await?;
    sqlx::query("ALTER TABLE project_sessions_v3 RENAME TO project_sessions")
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(())
}
