//! Imaging projects, per-filter goals, and session assignments

use afm_common::db::ProjectStatus;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

/// A multi-night imaging project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: i64,
    pub name: String,
    pub object_name: String,
    pub description: Option<String>,
    pub year: Option<i64>,
    pub start_date: Option<String>,
    pub status: ProjectStatus,
    pub created_at: String,
    pub updated_at: String,
}

/// Requested target for one filter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterGoalSpec {
    pub filter: Option<String>,
    pub target_count: i64,
}

impl FilterGoalSpec {
    pub fn new(filter: Option<&str>, target_count: i64) -> Self {
        Self {
            filter: filter.map(str::to_string),
            target_count,
        }
    }
}

/// Errors parsing `FILTER=COUNT` goal text
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GoalSpecError {
    #[error("goal must look like FILTER=COUNT, got '{0}'")]
    MissingSeparator(String),

    #[error("invalid target count '{0}'")]
    InvalidCount(String),
}

impl FromStr for FilterGoalSpec {
    type Err = GoalSpecError;

    /// `Ha=90` targets filter "Ha"; `=30` targets frames taken without a filter
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (filter, count) = s
            .split_once('=')
            .ok_or_else(|| GoalSpecError::MissingSeparator(s.to_string()))?;

        let target_count = count
            .trim()
            .parse::<i64>()
            .map_err(|_| GoalSpecError::InvalidCount(count.trim().to_string()))?;

        let filter = filter.trim();
        Ok(FilterGoalSpec {
            filter: (!filter.is_empty()).then(|| filter.to_string()),
            target_count,
        })
    }
}

/// Predefined goal sets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectTemplate {
    /// SHO: Ha, OIII, SII
    Narrowband,
    /// LRGB: L, R, G, B
    Broadband,
    Custom,
}

impl ProjectTemplate {
    pub fn filter_goals(&self) -> Vec<FilterGoalSpec> {
        let (filters, target): (&[&str], i64) = match self {
            ProjectTemplate::Narrowband => (&["Ha", "OIII", "SII"], 90),
            ProjectTemplate::Broadband => (&["L", "R", "G", "B"], 270),
            ProjectTemplate::Custom => (&[], 0),
        };

        filters
            .iter()
            .map(|f| FilterGoalSpec::new(Some(*f), target))
            .collect()
    }
}

impl FromStr for ProjectTemplate {
    type Err = afm_common::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "narrowband" | "sho" => Ok(ProjectTemplate::Narrowband),
            "broadband" | "lrgb" => Ok(ProjectTemplate::Broadband),
            "custom" => Ok(ProjectTemplate::Custom),
            other => Err(afm_common::Error::InvalidInput(format!(
                "Unknown project template: {}",
                other
            ))),
        }
    }
}

/// Input for project creation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewProject {
    pub name: String,
    pub object_name: String,
    pub description: Option<String>,
    pub year: Option<i64>,
    pub start_date: Option<String>,
    pub filter_goals: Vec<FilterGoalSpec>,
}

/// Field changes for an existing project (None = unchanged)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectUpdate {
    pub name: Option<String>,
    pub object_name: Option<String>,
    pub description: Option<String>,
    pub status: Option<ProjectStatus>,
}

/// Stored goal row with derived counts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterGoal {
    pub id: i64,
    pub project_id: i64,
    pub filter: Option<String>,
    pub target_count: i64,
    pub total_count: i64,
    pub approved_count: i64,
    pub last_updated: String,
}

/// Goal progress for one filter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterGoalProgress {
    pub filter: Option<String>,
    pub target: i64,
    pub total: i64,
    pub approved: i64,
    pub remaining: i64,
    pub approved_remaining: i64,
    /// Over frames with a measured FWHM
    pub avg_fwhm: Option<f64>,
    /// Over frames with a measured SNR
    pub avg_snr: Option<f64>,
}

impl FilterGoalProgress {
    pub fn new(
        filter: Option<String>,
        target: i64,
        total: i64,
        approved: i64,
        avg_fwhm: Option<f64>,
        avg_snr: Option<f64>,
    ) -> Self {
        Self {
            filter,
            target,
            total,
            approved,
            remaining: (target - total).max(0),
            approved_remaining: (target - approved).max(0),
            avg_fwhm,
            avg_snr,
        }
    }

    pub fn filter_label(&self) -> &str {
        self.filter.as_deref().unwrap_or("No Filter")
    }
}

/// Project plus goal progress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectProgress {
    pub project: Project,
    pub goals: Vec<FilterGoalProgress>,
    pub total_target: i64,
    pub total_frames: i64,
    pub total_approved: i64,
    /// Approved frames toward targets, each goal capped at its target
    pub completion_percent: f64,
}

impl ProjectProgress {
    pub fn new(project: Project, goals: Vec<FilterGoalProgress>) -> Self {
        let total_target: i64 = goals.iter().map(|g| g.target).sum();
        let total_frames: i64 = goals.iter().map(|g| g.total).sum();
        let total_approved: i64 = goals.iter().map(|g| g.approved).sum();
        let capped: i64 = goals.iter().map(|g| g.approved.min(g.target)).sum();

        let completion_percent = if total_target > 0 {
            capped as f64 / total_target as f64 * 100.0
        } else {
            0.0
        };

        Self {
            project,
            goals,
            total_target,
            total_frames,
            total_approved,
            completion_percent,
        }
    }
}

/// A session linked to a project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionAssignment {
    pub id: i64,
    pub project_id: i64,
    pub session_id: String,
    pub date_loc: String,
    pub object_name: String,
    pub filter: Option<String>,
    /// Light frames linked at assignment time
    pub frame_count: i64,
    pub approved_count: i64,
    pub rejected_count: i64,
    /// True when no linked frame is still ungraded
    pub graded: bool,
    pub avg_fwhm: Option<f64>,
    pub notes: Option<String>,
    pub assigned_date: String,
}

/// A master calibration frame attached to a project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MasterFrame {
    pub id: i64,
    pub project_id: i64,
    pub file_id: i64,
    /// "Master Dark", "Master Flat" or "Master Bias"
    pub frame_type: String,
    pub filter: Option<String>,
    pub exposure: Option<f64>,
    pub ccd_temp: Option<f64>,
    /// "XxY"
    pub binning: Option<String>,
    pub filename: String,
    pub imported_date: String,
}

/// Outcome of a master frame import
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterImportStats {
    pub imported: usize,
    pub skipped_not_master: usize,
    pub already_present: usize,
}

/// Master frame counts per type
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterFrameSummary {
    pub darks: i64,
    pub flats: i64,
    pub bias: i64,
}

impl MasterFrameSummary {
    pub fn total(&self) -> i64 {
        self.darks + self.flats + self.bias
    }
}
