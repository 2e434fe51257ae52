//! Session Aggregator
//!
//! Groups light frames into sessions by (date, object, filter) with
//! exposure, temperature and quality aggregates for the matcher and the
//! project tracker. NULL filters form their own group, distinct from "".

use crate::models::{SessionFilter, SessionSummary, SessionIdentity};
use afm_common::Result;
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqliteConnection};

/// Frame counts across the whole catalog
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogStatistics {
    pub total_frames: i64,
    pub lights: i64,
    pub darks: i64,
    pub flats: i64,
    pub bias: i64,
    pub master_darks: i64,
    pub master_flats: i64,
    pub master_bias: i64,
    /// Frames whose type could not be classified at ingestion
    pub unclassified: i64,
    pub objects: i64,
    pub sessions: i64,
    pub graded: i64,
    pub approved: i64,
    pub rejected: i64,
}

/// List light sessions, newest first
pub async fn list_sessions(
    conn: &mut SqliteConnection,
    filter: &SessionFilter,
) -> Result<Vec<SessionSummary>> {
    let rows = sqlx::query(
        r#"
        SELECT
            date_loc,
            object,
            filter,
            COUNT(*) AS frame_count,
            AVG(exposure) AS avg_exposure,
            AVG(ccd_temp) AS avg_temp,
            COALESCE(MIN(xbinning), 1) AS xbinning,
            COALESCE(MIN(ybinning), 1) AS ybinning,
            AVG(fwhm) AS avg_fwhm,
            AVG(snr) AS avg_snr,
            SUM(CASE WHEN approval_status = 'approved' THEN 1 ELSE 0 END) AS approved_count,
            SUM(CASE WHEN approval_status = 'rejected' THEN 1 ELSE 0 END) AS rejected_count,
            SUM(CASE WHEN project_id IS NULL THEN 1 ELSE 0 END) AS unassigned_count,
            CASE
                WHEN COUNT(project_id) = COUNT(*) AND MIN(project_id) = MAX(project_id)
                THEN MIN(project_id)
            END AS project_id
        FROM frames
        WHERE frame_kind = 'Light'
            AND date_loc IS NOT NULL
            AND object IS NOT NULL
            AND (?1 IS NULL OR object = ?1)
            AND (?2 IS NULL OR date_loc >= ?2)
            AND (?3 IS NULL OR date_loc <= ?3)
        GROUP BY date_loc, object, filter
        HAVING ?4 = 0 OR SUM(CASE WHEN project_id IS NULL THEN 1 ELSE 0 END) > 0
        ORDER BY date_loc DESC, object, filter
        "#,
    )
    .bind(&filter.object)
    .bind(&filter.date_from)
    .bind(&filter.date_to)
    .bind(filter.unassigned_only)
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows
        .iter()
        .map(|row| SessionSummary {
            identity: SessionIdentity {
                date_loc: row.get("date_loc"),
                object: row.get("object"),
                filter: row.get("filter"),
            },
            frame_count: row.get("frame_count"),
            avg_exposure: row.get("avg_exposure"),
            avg_temp: row.get("avg_temp"),
            xbinning: row.get("xbinning"),
            ybinning: row.get("ybinning"),
            avg_fwhm: row.get("avg_fwhm"),
            avg_snr: row.get("avg_snr"),
            approved_count: row.get("approved_count"),
            rejected_count: row.get("rejected_count"),
            unassigned_count: row.get("unassigned_count"),
            project_id: row.get("project_id"),
        })
        .collect())
}

/// One session by identity
pub async fn get_session(
    conn: &mut SqliteConnection,
    identity: &SessionIdentity,
) -> Result<Option<SessionSummary>> {
    let sessions = list_sessions(
        conn,
        &SessionFilter {
            object: Some(identity.object.clone()),
            date_from: Some(identity.date_loc.clone()),
            date_to: Some(identity.date_loc.clone()),
            unassigned_only: false,
        },
    )
    .await?;

    Ok(sessions
        .into_iter()
        .find(|session| session.identity == *identity))
}

/// Frame, session and grading counts for the whole catalog
pub async fn catalog_statistics(conn: &mut SqliteConnection) -> Result<CatalogStatistics> {
    let row = sqlx::query(
        r#"
        SELECT
            COUNT(*) AS total_frames,
            COALESCE(SUM(frame_kind = 'Light'), 0) AS lights,
            COALESCE(SUM(frame_kind = 'Dark' AND is_master = 0), 0) AS darks,
            COALESCE(SUM(frame_kind = 'Flat' AND is_master = 0), 0) AS flats,
            COALESCE(SUM(frame_kind = 'Bias' AND is_master = 0), 0) AS bias,
            COALESCE(SUM(frame_kind = 'Dark' AND is_master = 1), 0) AS master_darks,
            COALESCE(SUM(frame_kind = 'Flat' AND is_master = 1), 0) AS master_flats,
            COALESCE(SUM(frame_kind = 'Bias' AND is_master = 1), 0) AS master_bias,
            COALESCE(SUM(frame_kind IS NULL), 0) AS unclassified,
            COUNT(DISTINCT CASE WHEN frame_kind = 'Light' THEN object END) AS objects,
            COALESCE(SUM(frame_kind = 'Light' AND approval_status != 'not_graded'), 0) AS graded,
            COALESCE(SUM(frame_kind = 'Light' AND approval_status = 'approved'), 0) AS approved,
            COALESCE(SUM(frame_kind = 'Light' AND approval_status = 'rejected'), 0) AS rejected
        FROM frames
        "#,
    )
    .fetch_one(&mut *conn)
    .await?;

    let sessions: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM (
            SELECT 1 FROM frames
            WHERE frame_kind = 'Light' AND date_loc IS NOT NULL AND object IS NOT NULL
            GROUP BY date_loc, object, filter
        )
        "#,
    )
    .fetch_one(&mut *conn)
    .await?;

    Ok(CatalogStatistics {
        total_frames: row.get("total_frames"),
        lights: row.get("lights"),
        darks: row.get("darks"),
        flats: row.get("flats"),
        bias: row.get("bias"),
        master_darks: row.get("master_darks"),
        master_flats: row.get("master_flats"),
        master_bias: row.get("master_bias"),
        unclassified: row.get("unclassified"),
        objects: row.get("objects"),
        sessions,
        graded: row.get("graded"),
        approved: row.get("approved"),
        rejected: row.get("rejected"),
    })
}
