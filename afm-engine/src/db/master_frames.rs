//! Master calibration frames attached to projects

use crate::models::{MasterFrame, MasterFrameSummary};
use afm_common::Result;
use sqlx::{Row, SqliteConnection};

/// Link a master frame to a project; false when already linked
pub async fn insert_master_frame(
    conn: &mut SqliteConnection,
    project_id: i64,
    file_id: i64,
    frame_type: &str,
    now: &str,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT OR IGNORE INTO project_master_frames (
            project_id, file_id, frame_type, filter, exposure, ccd_temp, binning, imported_date
        )
        SELECT ?, id, ?, filter, exposure, ccd_temp,
               CAST(xbinning AS TEXT) || 'x' || CAST(ybinning AS TEXT), ?
        FROM frames WHERE id = ?
        "#,
    )
    .bind(project_id)
    .bind(frame_type)
    .bind(now)
    .bind(file_id)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn list_master_frames(
    conn: &mut SqliteConnection,
    project_id: i64,
) -> Result<Vec<MasterFrame>> {
    let rows = sqlx::query(
        r#"
        SELECT m.id, m.project_id, m.file_id, m.frame_type, m.filter, m.exposure,
               m.ccd_temp, m.binning, m.imported_date, f.filename
        FROM project_master_frames m
        JOIN frames f ON f.id = m.file_id
        WHERE m.project_id = ?
        ORDER BY m.frame_type, m.filter, m.id
        "#,
    )
    .bind(project_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows
        .iter()
        .map(|row| MasterFrame {
            id: row.get("id"),
            project_id: row.get("project_id"),
            file_id: row.get("file_id"),
            frame_type: row.get("frame_type"),
            filter: row.get("filter"),
            exposure: row.get("exposure"),
            ccd_temp: row.get("ccd_temp"),
            binning: row.get("binning"),
            filename: row.get("filename"),
            imported_date: row.get("imported_date"),
        })
        .collect())
}

pub async fn summarize(conn: &mut SqliteConnection, project_id: i64) -> Result<MasterFrameSummary> {
    let rows: Vec<(String, i64)> = sqlx::query_as(
        "SELECT frame_type, COUNT(*) FROM project_master_frames WHERE project_id = ? GROUP BY frame_type",
    )
    .bind(project_id)
    .fetch_all(&mut *conn)
    .await?;

    let mut summary = MasterFrameSummary::default();
    for (frame_type, count) in rows {
        match frame_type.as_str() {
            "Master Dark" => summary.darks = count,
            "Master Flat" => summary.flats = count,
            "Master Bias" => summary.bias = count,
            _ => {}
        }
    }

    Ok(summary)
}
