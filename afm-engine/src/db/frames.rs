//! Frame catalog operations
//!
//! Frames are written by the importer through [`insert_frame`], which
//! classifies the free-text IMAGETYP exactly once. Project linkage and quality
//! fields are the only columns the engine mutates afterwards.

use crate::db::predicates::{null_safe_eq, FramePredicate};
use crate::models::{CalibrationFrame, QualityUpdate, SessionIdentity};
use afm_common::db::{ApprovalStatus, FrameKind, FrameType};
use afm_common::{Error, Result};
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use std::path::Path;

/// Importer-supplied frame metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewFrame {
    pub file_hash: String,
    pub filepath: String,
    pub telescop: Option<String>,
    pub instrume: Option<String>,
    pub object: Option<String>,
    pub filter: Option<String>,
    pub imagetyp: String,
    pub exposure: Option<f64>,
    pub ccd_temp: Option<f64>,
    pub xbinning: Option<i64>,
    pub ybinning: Option<i64>,
    pub date_loc: Option<String>,
}

impl NewFrame {
    pub fn new(
        file_hash: impl Into<String>,
        filepath: impl Into<String>,
        imagetyp: impl Into<String>,
    ) -> Self {
        Self {
            file_hash: file_hash.into(),
            filepath: filepath.into(),
            imagetyp: imagetyp.into(),
            xbinning: Some(1),
            ybinning: Some(1),
            ..Self::default()
        }
    }

    pub fn object(mut self, object: &str) -> Self {
        self.object = Some(object.to_string());
        self
    }

    pub fn filter(mut self, filter: Option<&str>) -> Self {
        self.filter = filter.map(str::to_string);
        self
    }

    pub fn exposure(mut self, seconds: f64) -> Self {
        self.exposure = Some(seconds);
        self
    }

    pub fn temperature(mut self, celsius: Option<f64>) -> Self {
        self.ccd_temp = celsius;
        self
    }

    pub fn binning(mut self, x: i64, y: i64) -> Self {
        self.xbinning = Some(x);
        self.ybinning = Some(y);
        self
    }

    pub fn date(mut self, date_loc: &str) -> Self {
        self.date_loc = Some(date_loc.to_string());
        self
    }

    /// Base name of the file path
    pub fn filename(&self) -> String {
        Path::new(&self.filepath)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.filepath.clone())
    }
}

/// Stored frame row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub id: i64,
    pub file_hash: String,
    pub filepath: String,
    pub filename: String,
    pub object: Option<String>,
    pub filter: Option<String>,
    pub frame_type: Option<FrameType>,
    pub exposure: Option<f64>,
    pub ccd_temp: Option<f64>,
    pub xbinning: Option<i64>,
    pub ybinning: Option<i64>,
    pub date_loc: Option<String>,
    pub project_id: Option<i64>,
    pub session_assignment_id: Option<i64>,
    pub fwhm: Option<f64>,
    pub snr: Option<f64>,
    pub approval_status: ApprovalStatus,
}

fn frame_type_from_row(row: &SqliteRow) -> Option<FrameType> {
    let kind: Option<String> = row.get("frame_kind");
    let is_master: bool = row.get("is_master");
    kind.as_deref()
        .and_then(FrameKind::from_db)
        .map(|kind| FrameType::new(kind, is_master))
}

fn frame_from_row(row: &SqliteRow) -> Frame {
    let approval: String = row.get("approval_status");
    Frame {
        id: row.get("id"),
        file_hash: row.get("file_hash"),
        filepath: row.get("filepath"),
        filename: row.get("filename"),
        object: row.get("object"),
        filter: row.get("filter"),
        frame_type: frame_type_from_row(row),
        exposure: row.get("exposure"),
        ccd_temp: row.get("ccd_temp"),
        xbinning: row.get("xbinning"),
        ybinning: row.get("ybinning"),
        date_loc: row.get("date_loc"),
        project_id: row.get("project_id"),
        session_assignment_id: row.get("session_assignment_id"),
        fwhm: row.get("fwhm"),
        snr: row.get("snr"),
        approval_status: ApprovalStatus::from_db(&approval),
    }
}

/// Insert a new frame, classifying its IMAGETYP
///
/// Light frames must name an object; calibration frames never carry one.
pub async fn insert_frame(conn: &mut SqliteConnection, frame: &NewFrame) -> Result<i64> {
    let frame_type = FrameType::parse(&frame.imagetyp);

    let object = match frame_type {
        Some(FrameType {
            kind: FrameKind::Light,
            ..
        }) => {
            let object = frame.object.as_deref().map(str::trim).unwrap_or("");
            if object.is_empty() {
                return Err(Error::InvalidInput(format!(
                    "Light frame {} has no object name",
                    frame.filepath
                )));
            }
            Some(object.to_string())
        }
        _ => None,
    };

    let result = sqlx::query(
        r#"
        INSERT INTO frames (
            file_hash, filepath, filename, telescop, instrume, object, filter,
            imagetyp, frame_kind, is_master, exposure, ccd_temp, xbinning, ybinning, date_loc
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&frame.file_hash)
    .bind(&frame.filepath)
    .bind(frame.filename())
    .bind(&frame.telescop)
    .bind(&frame.instrume)
    .bind(object)
    .bind(&frame.filter)
    .bind(&frame.imagetyp)
    .bind(frame_type.map(|t| t.kind.as_str()))
    .bind(frame_type.is_some_and(|t| t.is_master))
    .bind(frame.exposure)
    .bind(frame.ccd_temp)
    .bind(frame.xbinning)
    .bind(frame.ybinning)
    .bind(&frame.date_loc)
    .execute(&mut *conn)
    .await?;

    if frame_type.is_none() {
        tracing::warn!(
            filepath = %frame.filepath,
            imagetyp = %frame.imagetyp,
            "Frame type not recognized; frame will not match any calibration"
        );
    }

    Ok(result.last_insert_rowid())
}

/// Load a frame by id
pub async fn get_frame(conn: &mut SqliteConnection, id: i64) -> Result<Option<Frame>> {
    let row = sqlx::query("SELECT * FROM frames WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

    Ok(row.as_ref().map(frame_from_row))
}

/// Light frames of one session, in catalog order
pub async fn session_frames(
    conn: &mut SqliteConnection,
    identity: &SessionIdentity,
) -> Result<Vec<Frame>> {
    let sql = format!(
        "SELECT * FROM frames WHERE frame_kind = 'Light' AND date_loc = ? AND object = ? AND {} ORDER BY id",
        null_safe_eq("filter")
    );

    let rows = sqlx::query(&sql)
        .bind(&identity.date_loc)
        .bind(&identity.object)
        .bind(&identity.filter)
        .fetch_all(&mut *conn)
        .await?;

    Ok(rows.iter().map(frame_from_row).collect())
}

/// Count light frames of one session
pub async fn count_session_frames(
    conn: &mut SqliteConnection,
    identity: &SessionIdentity,
) -> Result<i64> {
    let sql = format!(
        "SELECT COUNT(*) FROM frames WHERE frame_kind = 'Light' AND date_loc = ? AND object = ? AND {}",
        null_safe_eq("filter")
    );

    let count: i64 = sqlx::query_scalar(&sql)
        .bind(&identity.date_loc)
        .bind(&identity.object)
        .bind(&identity.filter)
        .fetch_one(&mut *conn)
        .await?;

    Ok(count)
}

/// Link every light frame of a session to a project assignment
pub async fn link_session_frames(
    conn: &mut SqliteConnection,
    identity: &SessionIdentity,
    project_id: i64,
    assignment_id: i64,
) -> Result<u64> {
    let sql = format!(
        "UPDATE frames SET project_id = ?, session_assignment_id = ? \
         WHERE frame_kind = 'Light' AND date_loc = ? AND object = ? AND {}",
        null_safe_eq("filter")
    );

    let result = sqlx::query(&sql)
        .bind(project_id)
        .bind(assignment_id)
        .bind(&identity.date_loc)
        .bind(&identity.object)
        .bind(&identity.filter)
        .execute(&mut *conn)
        .await?;

    Ok(result.rows_affected())
}

/// Clear project linkage from every light frame of a session
pub async fn unlink_session_frames(
    conn: &mut SqliteConnection,
    identity: &SessionIdentity,
) -> Result<u64> {
    let sql = format!(
        "UPDATE frames SET project_id = NULL, session_assignment_id = NULL \
         WHERE frame_kind = 'Light' AND date_loc = ? AND object = ? AND {}",
        null_safe_eq("filter")
    );

    let result = sqlx::query(&sql)
        .bind(&identity.date_loc)
        .bind(&identity.object)
        .bind(&identity.filter)
        .execute(&mut *conn)
        .await?;

    Ok(result.rows_affected())
}

/// Clear project linkage from every frame of a project
pub async fn unlink_project_frames(conn: &mut SqliteConnection, project_id: i64) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE frames SET project_id = NULL, session_assignment_id = NULL WHERE project_id = ?",
    )
    .bind(project_id)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected())
}

/// Apply one grading update to every frame with the given file name
///
/// Returns the project ids of the updated frames (None for unlinked frames);
/// an empty vector means no frame had that name.
pub async fn apply_quality_update(
    conn: &mut SqliteConnection,
    update: &QualityUpdate,
    grading_date: &str,
) -> Result<Vec<Option<i64>>> {
    let project_ids: Vec<Option<i64>> =
        sqlx::query_scalar("SELECT project_id FROM frames WHERE filename = ?")
            .bind(&update.filename)
            .fetch_all(&mut *conn)
            .await?;

    if project_ids.is_empty() {
        return Ok(project_ids);
    }

    let grading_date = update.approval.is_graded().then_some(grading_date);

    sqlx::query(
        r#"
        UPDATE frames SET
            fwhm = ?,
            eccentricity = ?,
            snr = ?,
            star_count = ?,
            background_level = ?,
            approval_status = ?,
            grading_date = ?
        WHERE filename = ?
        "#,
    )
    .bind(update.fwhm)
    .bind(update.eccentricity)
    .bind(update.snr)
    .bind(update.star_count)
    .bind(update.background_level)
    .bind(update.approval.as_str())
    .bind(grading_date)
    .bind(&update.filename)
    .execute(&mut *conn)
    .await?;

    Ok(project_ids)
}

fn calibration_frame_from_row(row: &SqliteRow) -> Option<CalibrationFrame> {
    let kind: Option<String> = row.get("frame_kind");
    Some(CalibrationFrame {
        id: row.get("id"),
        kind: FrameKind::from_db(kind.as_deref()?)?,
        is_master: row.get("is_master"),
        exposure: row.get("exposure"),
        ccd_temp: row.get("ccd_temp"),
        xbinning: row.get("xbinning"),
        ybinning: row.get("ybinning"),
        filter: row.get("filter"),
        date_loc: row.get("date_loc"),
    })
}

const CALIBRATION_COLUMNS: &str =
    "id, frame_kind, is_master, exposure, ccd_temp, xbinning, ybinning, filter, date_loc";

/// All calibration rows of one kind, master and raw together, in catalog order
pub async fn calibration_frames_of_kind(
    conn: &mut SqliteConnection,
    kind: FrameKind,
) -> Result<Vec<CalibrationFrame>> {
    let sql = format!(
        "SELECT {} FROM frames WHERE frame_kind = ? ORDER BY id",
        CALIBRATION_COLUMNS
    );

    let mut rows = sqlx::query(&sql).bind(kind.as_str()).fetch(&mut *conn);
    let mut frames = Vec::new();
    while let Some(row) = rows.try_next().await? {
        if let Some(frame) = calibration_frame_from_row(&row) {
            frames.push(frame);
        }
    }

    Ok(frames)
}

/// Calibration rows satisfying a predicate, in catalog order
pub async fn matching_calibration_frames(
    conn: &mut SqliteConnection,
    predicate: &FramePredicate,
) -> Result<Vec<CalibrationFrame>> {
    let sql = format!(
        "SELECT {} FROM frames WHERE {} ORDER BY id",
        CALIBRATION_COLUMNS,
        predicate.where_clause()
    );

    let rows = predicate
        .bind_to(sqlx::query(&sql))
        .fetch_all(&mut *conn)
        .await?;

    Ok(rows.iter().filter_map(calibration_frame_from_row).collect())
}

/// Most recent rows satisfying a predicate: newest date first, at most `limit`
pub async fn latest_calibration_frames(
    conn: &mut SqliteConnection,
    predicate: &FramePredicate,
    limit: i64,
) -> Result<Vec<CalibrationFrame>> {
    let sql = format!(
        "SELECT {} FROM frames WHERE {} ORDER BY date_loc DESC, id LIMIT ?",
        CALIBRATION_COLUMNS,
        predicate.where_clause()
    );

    let rows = predicate
        .bind_to(sqlx::query(&sql))
        .bind(limit)
        .fetch_all(&mut *conn)
        .await?;

    Ok(rows.iter().filter_map(calibration_frame_from_row).collect())
}
