//! Quality ingest
//!
//! Applies a batch of grading results to the catalog and refreshes the
//! counters of every project whose frames were touched.

use crate::db::frames;
use crate::models::{GradingStats, QualityUpdate};
use crate::services::project_tracker::refresh_project_counters;
use afm_common::db::ApprovalStatus;
use afm_common::Result;
use chrono::Utc;
use sqlx::SqlitePool;
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

/// Apply grading updates in one transaction
///
/// Updates naming a file the catalog does not hold are counted in
/// `not_found` and otherwise ignored.
pub async fn apply_quality_updates(
    pool: &SqlitePool,
    updates: &[QualityUpdate],
) -> Result<GradingStats> {
    let now = Utc::now().to_rfc3339();
    let mut stats = GradingStats {
        total: updates.len(),
        ..GradingStats::default()
    };
    let mut touched = BTreeSet::new();

    let mut tx = pool.begin().await?;

    for update in updates {
        let project_ids = frames::apply_quality_update(&mut tx, update, &now).await?;
        if project_ids.is_empty() {
            warn!(filename = %update.filename, "Graded file not in catalog");
            stats.not_found += 1;
            continue;
        }

        stats.matched += 1;
        match update.approval {
            ApprovalStatus::Approved => stats.approved += 1,
            ApprovalStatus::Rejected => stats.rejected += 1,
            ApprovalStatus::NotGraded => stats.not_graded += 1,
        }
        touched.extend(project_ids.into_iter().flatten());
    }

    for &project_id in &touched {
        debug!(project_id, "Refreshing project counters after grading");
        refresh_project_counters(&mut tx, project_id, &now).await?;
    }

    tx.commit().await?;

    stats.updated_projects = touched.into_iter().collect();
    info!(
        total = stats.total,
        matched = stats.matched,
        not_found = stats.not_found,
        approved = stats.approved,
        rejected = stats.rejected,
        projects = stats.updated_projects.len(),
        "Applied quality updates"
    );
    Ok(stats)
}
