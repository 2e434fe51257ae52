//! Per-project filter goals
//!
//! Counts are always derived from the frames table in full, never adjusted
//! incrementally, so recomputation is idempotent and safe to retry.

use crate::db::predicates::null_safe_eq_exprs;
use crate::models::{FilterGoal, FilterGoalProgress};
use afm_common::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

fn goal_from_row(row: &SqliteRow) -> FilterGoal {
    FilterGoal {
        id: row.get("id"),
        project_id: row.get("project_id"),
        filter: row.get("filter"),
        target_count: row.get("target_count"),
        total_count: row.get("total_count"),
        approved_count: row.get("approved_count"),
        last_updated: row.get("last_updated"),
    }
}

pub async fn insert_goal(
    conn: &mut SqliteConnection,
    project_id: i64,
    filter: Option<&str>,
    target_count: i64,
    now: &str,
) -> Result<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO project_filter_goals (project_id, filter, target_count, total_count, approved_count, last_updated)
        VALUES (?, ?, ?, 0, 0, ?)
        "#,
    )
    .bind(project_id)
    .bind(filter)
    .bind(target_count)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    Ok(result.last_insert_rowid())
}

pub async fn list_goals(conn: &mut SqliteConnection, project_id: i64) -> Result<Vec<FilterGoal>> {
    let rows = sqlx::query("SELECT * FROM project_filter_goals WHERE project_id = ? ORDER BY id")
        .bind(project_id)
        .fetch_all(&mut *conn)
        .await?;

    Ok(rows.iter().map(goal_from_row).collect())
}

pub async fn delete_goals(conn: &mut SqliteConnection, project_id: i64) -> Result<u64> {
    let result = sqlx::query("DELETE FROM project_filter_goals WHERE project_id = ?")
        .bind(project_id)
        .execute(&mut *conn)
        .await?;

    Ok(result.rows_affected())
}

/// Recompute total/approved counts of every goal of a project
pub async fn recalculate_goal_counts(
    conn: &mut SqliteConnection,
    project_id: i64,
    now: &str,
) -> Result<u64> {
    let filter_match = null_safe_eq_exprs("f.filter", "project_filter_goals.filter");
    let sql = format!(
        r#"
        UPDATE project_filter_goals SET
            total_count = (
                SELECT COUNT(*) FROM frames f
                WHERE f.project_id = project_filter_goals.project_id AND {filter_match}
            ),
            approved_count = (
                SELECT COUNT(*) FROM frames f
                WHERE f.project_id = project_filter_goals.project_id AND {filter_match}
                  AND f.approval_status = 'approved'
            ),
            last_updated = ?
        WHERE project_id = ?
        "#
    );

    let result = sqlx::query(&sql)
        .bind(now)
        .bind(project_id)
        .execute(&mut *conn)
        .await?;

    Ok(result.rows_affected())
}

/// Goal progress with quality averages over measured frames
pub async fn goal_progress(
    conn: &mut SqliteConnection,
    project_id: i64,
) -> Result<Vec<FilterGoalProgress>> {
    let filter_match = null_safe_eq_exprs("f.filter", "g.filter");
    let sql = format!(
        r#"
        SELECT
            g.filter,
            g.target_count,
            g.total_count,
            g.approved_count,
            (SELECT AVG(f.fwhm) FROM frames f
             WHERE f.project_id = g.project_id AND {filter_match} AND f.fwhm IS NOT NULL) AS avg_fwhm,
            (SELECT AVG(f.snr) FROM frames f
             WHERE f.project_id = g.project_id AND {filter_match} AND f.snr IS NOT NULL) AS avg_snr
        FROM project_filter_goals g
        WHERE g.project_id = ?
        ORDER BY g.id
        "#
    );

    let rows = sqlx::query(&sql)
        .bind(project_id)
        .fetch_all(&mut *conn)
        .await?;

    Ok(rows
        .iter()
        .map(|row| {
            FilterGoalProgress::new(
                row.get("filter"),
                row.get("target_count"),
                row.get("total_count"),
                row.get("approved_count"),
                row.get("avg_fwhm"),
                row.get("avg_snr"),
            )
        })
        .collect())
}
