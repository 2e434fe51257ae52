//! Light-frame sessions

use super::calibration::{SessionCalibration, SessionProfile, SessionStatus};
use serde::{Deserialize, Serialize};

/// A session identity: (capture date, object, filter)
///
/// `filter = None` is its own identity, distinct from `Some("")`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionIdentity {
    pub date_loc: String,
    pub object: String,
    pub filter: Option<String>,
}

impl SessionIdentity {
    pub fn new(date_loc: impl Into<String>, object: impl Into<String>, filter: Option<&str>) -> Self {
        Self {
            date_loc: date_loc.into(),
            object: object.into(),
            filter: filter.map(str::to_string),
        }
    }

    /// Display key stored on assignment rows
    ///
    /// Not unique: `None` and a filter literally named "NoFilter" share a key.
    /// Assignment uniqueness is on the identity columns.
    pub fn session_id(&self) -> String {
        format!(
            "{}_{}_{}",
            self.date_loc,
            self.object,
            self.filter.as_deref().unwrap_or("NoFilter")
        )
    }
}

/// Aggregate statistics of one session's light frames
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub identity: SessionIdentity,
    pub frame_count: i64,
    pub avg_exposure: Option<f64>,
    pub avg_temp: Option<f64>,
    pub xbinning: i64,
    pub ybinning: i64,
    pub avg_fwhm: Option<f64>,
    pub avg_snr: Option<f64>,
    pub approved_count: i64,
    pub rejected_count: i64,
    /// Frames not linked to any project
    pub unassigned_count: i64,
    /// Set when every frame of the session belongs to the same project
    pub project_id: Option<i64>,
}

impl SessionSummary {
    /// Matcher input for this session
    ///
    /// Carries the raw averages; rounding only happens when text is rendered.
    pub fn profile(&self) -> SessionProfile {
        SessionProfile {
            date_loc: self.identity.date_loc.clone(),
            object: self.identity.object.clone(),
            filter: self.identity.filter.clone(),
            exposure: self.avg_exposure,
            ccd_temp: self.avg_temp,
            xbinning: self.xbinning,
            ybinning: self.ybinning,
        }
    }

    pub fn graded_count(&self) -> i64 {
        self.approved_count + self.rejected_count
    }
}

/// Optional restrictions for session listing
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionFilter {
    pub object: Option<String>,
    /// Inclusive lower date bound (YYYY-MM-DD)
    pub date_from: Option<String>,
    /// Inclusive upper date bound (YYYY-MM-DD)
    pub date_to: Option<String>,
    /// Only sessions with at least one frame not linked to a project
    pub unassigned_only: bool,
}

/// Counts over a batch of reviewed sessions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReviewSummary {
    pub total: usize,
    pub complete: usize,
    pub partial: usize,
    pub missing: usize,
    /// Percentage of complete sessions
    pub completion_rate: f64,
}

impl ReviewSummary {
    pub fn from_reviews(reviews: &[SessionCalibration]) -> Self {
        let mut summary = ReviewSummary {
            total: reviews.len(),
            ..ReviewSummary::default()
        };

        for review in reviews {
            match review.status {
                SessionStatus::Complete { .. } => summary.complete += 1,
                SessionStatus::Partial => summary.partial += 1,
                SessionStatus::Missing => summary.missing += 1,
            }
        }

        if summary.total > 0 {
            summary.completion_rate = summary.complete as f64 / summary.total as f64 * 100.0;
        }

        summary
    }
}
