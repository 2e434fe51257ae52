//! Session-to-project assignments (`project_sessions`)

use crate::db::predicates::null_safe_eq;
use crate::models::{SessionAssignment, SessionIdentity};
use afm_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

fn assignment_from_row(row: &SqliteRow) -> SessionAssignment {
    SessionAssignment {
        id: row.get("id"),
        project_id: row.get("project_id"),
        session_id: row.get("session_id"),
        date_loc: row.get("date_loc"),
        object_name: row.get("object_name"),
        filter: row.get("filter"),
        frame_count: row.get("frame_count"),
        approved_count: row.get("approved_count"),
        rejected_count: row.get("rejected_count"),
        graded: row.get("graded"),
        avg_fwhm: row.get("avg_fwhm"),
        notes: row.get("notes"),
        assigned_date: row.get("assigned_date"),
    }
}

/// Insert an assignment row
///
/// The NULL-safe identity index rejects a second row for the same
/// (date, object, filter); that surfaces as `AlreadyAssigned`.
pub async fn insert_assignment(
    conn: &mut SqliteConnection,
    project_id: i64,
    identity: &SessionIdentity,
    frame_count: i64,
    now: &str,
) -> Result<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO project_sessions (
            project_id, session_id, date_loc, object_name, filter, frame_count, assigned_date
        )
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(project_id)
    .bind(identity.session_id())
    .bind(&identity.date_loc)
    .bind(&identity.object)
    .bind(&identity.filter)
    .bind(frame_count)
    .bind(now)
    .execute(&mut *conn)
    .await
    .map_err(|err| match err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            Error::AlreadyAssigned(identity.session_id())
        }
        other => Error::Database(other),
    })?;

    Ok(result.last_insert_rowid())
}

/// Assignment of a session identity to any project
pub async fn find_by_identity(
    conn: &mut SqliteConnection,
    identity: &SessionIdentity,
) -> Result<Option<SessionAssignment>> {
    let sql = format!(
        "SELECT * FROM project_sessions WHERE date_loc = ? AND object_name = ? AND {} ORDER BY id LIMIT 1",
        null_safe_eq("filter")
    );

    let row = sqlx::query(&sql)
        .bind(&identity.date_loc)
        .bind(&identity.object)
        .bind(&identity.filter)
        .fetch_optional(&mut *conn)
        .await?;

    Ok(row.as_ref().map(assignment_from_row))
}

pub async fn list_for_project(
    conn: &mut SqliteConnection,
    project_id: i64,
) -> Result<Vec<SessionAssignment>> {
    let rows = sqlx::query(
        "SELECT * FROM project_sessions WHERE project_id = ? ORDER BY date_loc DESC, id",
    )
    .bind(project_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows.iter().map(assignment_from_row).collect())
}

pub async fn delete_assignment(conn: &mut SqliteConnection, id: i64) -> Result<u64> {
    let result = sqlx::query("DELETE FROM project_sessions WHERE id = ?")
        .bind(id)
        .execute(&mut *conn)
        .await?;

    Ok(result.rows_affected())
}

/// Re-derive grading aggregates of every assignment of a project
///
/// `graded` is true iff no linked frame is still `not_graded`.
pub async fn refresh_grading(conn: &mut SqliteConnection, project_id: i64) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE project_sessions SET
            approved_count = (
                SELECT COUNT(*) FROM frames
                WHERE session_assignment_id = project_sessions.id AND approval_status = 'approved'
            ),
            rejected_count = (
                SELECT COUNT(*) FROM frames
                WHERE session_assignment_id = project_sessions.id AND approval_status = 'rejected'
            ),
            graded = NOT EXISTS (
                SELECT 1 FROM frames
                WHERE session_assignment_id = project_sessions.id AND approval_status = 'not_graded'
            ),
            avg_fwhm = (
                SELECT AVG(fwhm) FROM frames
                WHERE session_assignment_id = project_sessions.id AND fwhm IS NOT NULL
            )
        WHERE project_id = ?
        "#,
    )
    .bind(project_id)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected())
}
