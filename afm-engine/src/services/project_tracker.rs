//! Project Goal Tracker
//!
//! Maintains per-project, per-filter frame targets against the catalog.
//! Every mutation runs in a single transaction and finishes by re-deriving
//! the affected project's counters from the frames table, so a failure at
//! any step leaves no partial state behind and a retry starts clean.

use crate::db::{assignments, frames, goals, master_frames, projects};
use crate::models::{
    FilterGoal, FilterGoalProgress, FilterGoalSpec, MasterFrame, MasterFrameSummary,
    MasterImportStats, NewProject, Project, ProjectProgress, ProjectTemplate, ProjectUpdate,
    SessionAssignment, SessionFilter, SessionIdentity, SessionSummary,
};
use crate::services::session_aggregator;
use afm_common::db::ProjectStatus;
use afm_common::{Error, Result};
use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info};

fn now() -> String {
    Utc::now().to_rfc3339()
}

/// Map a UNIQUE(name) violation to DuplicateName
fn duplicate_name(err: Error, name: &str) -> Error {
    match err {
        Error::Database(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
            Error::DuplicateName(name.to_string())
        }
        other => other,
    }
}

fn validate_name(name: &str, what: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidInput(format!("{} must not be empty", what)));
    }
    Ok(trimmed.to_string())
}

fn validate_goals(specs: &[FilterGoalSpec]) -> Result<()> {
    for (i, spec) in specs.iter().enumerate() {
        if spec.target_count <= 0 {
            return Err(Error::InvalidInput(format!(
                "Target count for {} must be positive, got {}",
                spec.filter.as_deref().unwrap_or("No Filter"),
                spec.target_count
            )));
        }
        if specs[..i].iter().any(|other| other.filter == spec.filter) {
            return Err(Error::InvalidInput(format!(
                "Duplicate goal for filter {}",
                spec.filter.as_deref().unwrap_or("No Filter")
            )));
        }
    }
    Ok(())
}

async fn require_project(conn: &mut SqliteConnection, project_id: i64) -> Result<Project> {
    projects::get_project(conn, project_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Project {}", project_id)))
}

/// Re-derive goal counts and assignment grading aggregates of one project
pub(crate) async fn refresh_project_counters(
    conn: &mut SqliteConnection,
    project_id: i64,
    now: &str,
) -> Result<()> {
    goals::recalculate_goal_counts(conn, project_id, now).await?;
    assignments::refresh_grading(conn, project_id).await?;
    projects::touch_project(conn, project_id, now).await?;
    Ok(())
}

/// Project and goal bookkeeping over a frame catalog
#[derive(Debug, Clone)]
pub struct ProjectTracker {
    pool: SqlitePool,
}

impl ProjectTracker {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    // ---- projects ----------------------------------------------------------

    /// Create a project with its filter goals
    pub async fn create_project(&self, new: &NewProject) -> Result<i64> {
        let name = validate_name(&new.name, "Project name")?;
        let object_name = validate_name(&new.object_name, "Object name")?;
        validate_goals(&new.filter_goals)?;

        let now = now();
        let mut tx = self.pool.begin().await?;

        let project_id = projects::insert_project(
            &mut tx,
            &name,
            &object_name,
            new.description.as_deref(),
            new.year,
            new.start_date.as_deref(),
            &now,
        )
        .await
        .map_err(|e| duplicate_name(e, &name))?;

        for spec in &new.filter_goals {
            goals::insert_goal(&mut tx, project_id, spec.filter.as_deref(), spec.target_count, &now)
                .await?;
        }

        tx.commit().await?;

        info!(
            project_id,
            name = %name,
            goals = new.filter_goals.len(),
            "Created project"
        );
        Ok(project_id)
    }

    /// Create a project using a predefined goal set
    pub async fn create_project_from_template(
        &self,
        name: &str,
        object_name: &str,
        template: ProjectTemplate,
    ) -> Result<i64> {
        self.create_project(&NewProject {
            name: name.to_string(),
            object_name: object_name.to_string(),
            filter_goals: template.filter_goals(),
            ..NewProject::default()
        })
        .await
    }

    pub async fn get_project(&self, project_id: i64) -> Result<Project> {
        let mut conn = self.pool.acquire().await?;
        require_project(&mut conn, project_id).await
    }

    pub async fn get_project_by_name(&self, name: &str) -> Result<Option<Project>> {
        let mut conn = self.pool.acquire().await?;
        projects::get_project_by_name(&mut conn, name.trim()).await
    }

    pub async fn list_projects(&self, status: Option<ProjectStatus>) -> Result<Vec<Project>> {
        let mut conn = self.pool.acquire().await?;
        projects::list_projects(&mut conn, status).await
    }

    /// Apply field changes to a project
    pub async fn update_project(&self, project_id: i64, update: &ProjectUpdate) -> Result<Project> {
        let mut tx = self.pool.begin().await?;
        let mut project = require_project(&mut tx, project_id).await?;

        if let Some(name) = &update.name {
            project.name = validate_name(name, "Project name")?;
        }
        if let Some(object_name) = &update.object_name {
            project.object_name = validate_name(object_name, "Object name")?;
        }
        if let Some(description) = &update.description {
            project.description = Some(description.clone());
        }
        if let Some(status) = update.status {
            project.status = status;
        }

        let now = now();
        projects::update_project_row(&mut tx, &project, &now)
            .await
            .map_err(|e| duplicate_name(e, &project.name))?;
        tx.commit().await?;

        project.updated_at = now;
        info!(project_id, name = %project.name, "Updated project");
        Ok(project)
    }

    pub async fn update_project_status(&self, project_id: i64, status: ProjectStatus) -> Result<()> {
        self.update_project(
            project_id,
            &ProjectUpdate {
                status: Some(status),
                ..ProjectUpdate::default()
            },
        )
        .await?;
        Ok(())
    }

    /// Replace a project's goal set and recompute its counts
    pub async fn update_filter_goals(&self, project_id: i64, specs: &[FilterGoalSpec]) -> Result<()> {
        validate_goals(specs)?;

        let now = now();
        let mut tx = self.pool.begin().await?;
        require_project(&mut tx, project_id).await?;

        goals::delete_goals(&mut tx, project_id).await?;
        for spec in specs {
            goals::insert_goal(&mut tx, project_id, spec.filter.as_deref(), spec.target_count, &now)
                .await?;
        }
        refresh_project_counters(&mut tx, project_id, &now).await?;

        tx.commit().await?;
        info!(project_id, goals = specs.len(), "Replaced filter goals");
        Ok(())
    }

    /// Delete a project, unlinking its frames
    pub async fn delete_project(&self, project_id: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        require_project(&mut tx, project_id).await?;

        let unlinked = frames::unlink_project_frames(&mut tx, project_id).await?;
        projects::delete_project_row(&mut tx, project_id).await?;

        tx.commit().await?;
        info!(project_id, unlinked_frames = unlinked, "Deleted project");
        Ok(())
    }

    // ---- sessions ----------------------------------------------------------

    /// Link a session's light frames to a project
    ///
    /// Returns the new assignment id. A session identity belongs to at most
    /// one project; assigning it again fails with `AlreadyAssigned`.
    pub async fn assign_session_to_project(
        &self,
        project_id: i64,
        date_loc: &str,
        object: &str,
        filter: Option<&str>,
    ) -> Result<i64> {
        let identity = SessionIdentity::new(date_loc, object, filter);
        let now = now();
        let mut tx = self.pool.begin().await?;

        require_project(&mut tx, project_id).await?;

        if let Some(existing) = assignments::find_by_identity(&mut tx, &identity).await? {
            return Err(Error::AlreadyAssigned(format!(
                "{} (project {})",
                identity.session_id(),
                existing.project_id
            )));
        }

        let frame_count = frames::count_session_frames(&mut tx, &identity).await?;
        if frame_count == 0 {
            return Err(Error::NotFound(format!(
                "No light frames for session {}",
                identity.session_id()
            )));
        }

        let assignment_id =
            assignments::insert_assignment(&mut tx, project_id, &identity, frame_count, &now)
                .await?;
        frames::link_session_frames(&mut tx, &identity, project_id, assignment_id).await?;
        refresh_project_counters(&mut tx, project_id, &now).await?;

        tx.commit().await?;

        info!(
            project_id,
            assignment_id,
            session = %identity.session_id(),
            frame_count,
            "Assigned session to project"
        );
        Ok(assignment_id)
    }

    /// Remove a session from its project
    ///
    /// Returns false (and changes nothing) when the session was not assigned.
    pub async fn unassign_session_from_project(
        &self,
        date_loc: &str,
        object: &str,
        filter: Option<&str>,
    ) -> Result<bool> {
        let identity = SessionIdentity::new(date_loc, object, filter);
        let mut tx = self.pool.begin().await?;

        let Some(assignment) = assignments::find_by_identity(&mut tx, &identity).await? else {
            debug!(session = %identity.session_id(), "Session not assigned, nothing to do");
            return Ok(false);
        };

        let now = now();
        frames::unlink_session_frames(&mut tx, &identity).await?;
        assignments::delete_assignment(&mut tx, assignment.id).await?;
        refresh_project_counters(&mut tx, assignment.project_id, &now).await?;

        tx.commit().await?;

        info!(
            project_id = assignment.project_id,
            session = %identity.session_id(),
            "Unassigned session from project"
        );
        Ok(true)
    }

    pub async fn get_session_assignment(
        &self,
        date_loc: &str,
        object: &str,
        filter: Option<&str>,
    ) -> Result<Option<SessionAssignment>> {
        let identity = SessionIdentity::new(date_loc, object, filter);
        let mut conn = self.pool.acquire().await?;
        assignments::find_by_identity(&mut conn, &identity).await
    }

    pub async fn get_project_sessions(&self, project_id: i64) -> Result<Vec<SessionAssignment>> {
        let mut conn = self.pool.acquire().await?;
        require_project(&mut conn, project_id).await?;
        assignments::list_for_project(&mut conn, project_id).await
    }

    /// Sessions with at least one light frame not linked to a project
    pub async fn get_unassigned_sessions(&self, object: Option<&str>) -> Result<Vec<SessionSummary>> {
        let mut conn = self.pool.acquire().await?;
        session_aggregator::list_sessions(
            &mut conn,
            &SessionFilter {
                object: object.map(str::to_string),
                unassigned_only: true,
                ..SessionFilter::default()
            },
        )
        .await
    }

    // ---- counts --------------------------------------------------------------

    /// Re-derive every goal's total/approved count from the frames table
    pub async fn recalculate_project_counts(&self, project_id: i64) -> Result<Vec<FilterGoal>> {
        let now = now();
        let mut tx = self.pool.begin().await?;
        require_project(&mut tx, project_id).await?;

        refresh_project_counters(&mut tx, project_id, &now).await?;
        let goals = goals::list_goals(&mut tx, project_id).await?;

        tx.commit().await?;
        debug!(project_id, goals = goals.len(), "Recalculated project counts");
        Ok(goals)
    }

    /// Per-filter progress with quality averages
    pub async fn get_filter_goals(&self, project_id: i64) -> Result<Vec<FilterGoalProgress>> {
        let mut conn = self.pool.acquire().await?;
        require_project(&mut conn, project_id).await?;
        goals::goal_progress(&mut conn, project_id).await
    }

    pub async fn get_project_progress(&self, project_id: i64) -> Result<ProjectProgress> {
        let mut conn = self.pool.acquire().await?;
        let project = require_project(&mut conn, project_id).await?;
        let goals = goals::goal_progress(&mut conn, project_id).await?;
        Ok(ProjectProgress::new(project, goals))
    }

    // ---- master frames ---------------------------------------------------------

    /// Attach master calibration frames to a project
    ///
    /// Files that are not master darks/flats/bias are skipped; re-importing a
    /// file already attached is a no-op. An unknown file id fails the whole
    /// import.
    pub async fn import_master_frames(
        &self,
        project_id: i64,
        file_ids: &[i64],
    ) -> Result<MasterImportStats> {
        let now = now();
        let mut tx = self.pool.begin().await?;
        require_project(&mut tx, project_id).await?;

        let mut stats = MasterImportStats::default();
        for &file_id in file_ids {
            let frame = frames::get_frame(&mut tx, file_id)
                .await?
                .ok_or_else(|| Error::NotFound(format!("Frame {}", file_id)))?;

            let frame_type = match frame.frame_type {
                Some(frame_type) if frame_type.is_master_calibration() => frame_type,
                _ => {
                    debug!(file_id, filename = %frame.filename, "Not a master calibration frame, skipping");
                    stats.skipped_not_master += 1;
                    continue;
                }
            };

            if master_frames::insert_master_frame(&mut tx, project_id, file_id, &frame_type.label(), &now)
                .await?
            {
                stats.imported += 1;
            } else {
                stats.already_present += 1;
            }
        }

        projects::touch_project(&mut tx, project_id, &now).await?;
        tx.commit().await?;

        info!(
            project_id,
            imported = stats.imported,
            skipped = stats.skipped_not_master,
            already_present = stats.already_present,
            "Imported master frames"
        );
        Ok(stats)
    }

    pub async fn get_master_frames(&self, project_id: i64) -> Result<Vec<MasterFrame>> {
        let mut conn = self.pool.acquire().await?;
        require_project(&mut conn, project_id).await?;
        master_frames::list_master_frames(&mut conn, project_id).await
    }

    pub async fn master_frame_summary(&self, project_id: i64) -> Result<MasterFrameSummary> {
        let mut conn = self.pool.acquire().await?;
        require_project(&mut conn, project_id).await?;
        master_frames::summarize(&mut conn, project_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_goal_validation() {
        assert!(validate_goals(&[FilterGoalSpec::new(Some("Ha"), 90)]).is_ok());
        assert!(matches!(
            validate_goals(&[FilterGoalSpec::new(Some("Ha"), 0)]),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            validate_goals(&[FilterGoalSpec::new(None, 10), FilterGoalSpec::new(None, 20)]),
            Err(Error::InvalidInput(_))
        ));
        // NULL and "" are different filters
        assert!(validate_goals(&[FilterGoalSpec::new(None, 10), FilterGoalSpec::new(Some(""), 20)])
            .is_ok());
    }

    #[test]
    fn test_name_validation_trims() {
        assert_eq!(validate_name("  M31 2024 ", "Project name").unwrap(), "M31 2024");
        assert!(matches!(validate_name("   ", "Project name"), Err(Error::InvalidInput(_))));
    }
}
