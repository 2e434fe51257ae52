//! Project rows

use crate::models::Project;
use afm_common::db::ProjectStatus;
use afm_common::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use std::str::FromStr;

fn project_from_row(row: &SqliteRow) -> Project {
    let status: String = row.get("status");
    Project {
        id: row.get("id"),
        name: row.get("name"),
        object_name: row.get("object_name"),
        description: row.get("description"),
        year: row.get("year"),
        start_date: row.get("start_date"),
        status: ProjectStatus::from_str(&status).unwrap_or_default(),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

/// Insert a project row with status 'active'
pub async fn insert_project(
    conn: &mut SqliteConnection,
    name: &str,
    object_name: &str,
    description: Option<&str>,
    year: Option<i64>,
    start_date: Option<&str>,
    now: &str,
) -> Result<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO projects (name, object_name, description, year, start_date, status, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, 'active', ?, ?)
        "#,
    )
    .bind(name)
    .bind(object_name)
    .bind(description)
    .bind(year)
    .bind(start_date)
    .bind(now)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    Ok(result.last_insert_rowid())
}

pub async fn get_project(conn: &mut SqliteConnection, id: i64) -> Result<Option<Project>> {
    let row = sqlx::query("SELECT * FROM projects WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

    Ok(row.as_ref().map(project_from_row))
}

pub async fn get_project_by_name(
    conn: &mut SqliteConnection,
    name: &str,
) -> Result<Option<Project>> {
    let row = sqlx::query("SELECT * FROM projects WHERE name = ?")
        .bind(name)
        .fetch_optional(&mut *conn)
        .await?;

    Ok(row.as_ref().map(project_from_row))
}

/// Projects, newest first, optionally restricted to one status
pub async fn list_projects(
    conn: &mut SqliteConnection,
    status: Option<ProjectStatus>,
) -> Result<Vec<Project>> {
    let rows = sqlx::query(
        "SELECT * FROM projects WHERE (? IS NULL OR status = ?) ORDER BY created_at DESC, id DESC",
    )
    .bind(status.map(|s| s.as_str()))
    .bind(status.map(|s| s.as_str()))
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows.iter().map(project_from_row).collect())
}

/// Write all editable fields of a project
pub async fn update_project_row(
    conn: &mut SqliteConnection,
    project: &Project,
    now: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE projects
        SET name = ?, object_name = ?, description = ?, status = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&project.name)
    .bind(&project.object_name)
    .bind(&project.description)
    .bind(project.status.as_str())
    .bind(now)
    .bind(project.id)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Refresh `updated_at`
pub async fn touch_project(conn: &mut SqliteConnection, id: i64, now: &str) -> Result<()> {
    sqlx::query("UPDATE projects SET updated_at = ? WHERE id = ?")
        .bind(now)
        .bind(id)
        .execute(&mut *conn)
        .await?;

    Ok(())
}

/// Delete a project row; goals, assignments and master links cascade
pub async fn delete_project_row(conn: &mut SqliteConnection, id: i64) -> Result<u64> {
    let result = sqlx::query("DELETE FROM projects WHERE id = ?")
        .bind(id)
        .execute(&mut *conn)
        .await?;

    Ok(result.rows_affected())
}
