//! Calibration match results and session status

use afm_common::db::FrameKind;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Calibration type evaluated for a light session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CalibrationKind {
    Dark,
    Bias,
    Flat,
}

impl CalibrationKind {
    pub fn frame_kind(&self) -> FrameKind {
        match self {
            CalibrationKind::Dark => FrameKind::Dark,
            CalibrationKind::Bias => FrameKind::Bias,
            CalibrationKind::Flat => FrameKind::Flat,
        }
    }

    /// Singular noun used in "add more" instructions
    pub fn noun(&self) -> &'static str {
        match self {
            CalibrationKind::Dark => "dark",
            CalibrationKind::Bias => "bias",
            CalibrationKind::Flat => "flat",
        }
    }

    /// Plural noun used in optional suggestions
    pub fn plural(&self) -> &'static str {
        match self {
            CalibrationKind::Dark => "darks",
            CalibrationKind::Bias => "bias",
            CalibrationKind::Flat => "flats",
        }
    }
}

/// One calibration row as held by the preload cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationFrame {
    pub id: i64,
    pub kind: FrameKind,
    pub is_master: bool,
    pub exposure: Option<f64>,
    pub ccd_temp: Option<f64>,
    pub xbinning: Option<i64>,
    pub ybinning: Option<i64>,
    pub filter: Option<String>,
    pub date_loc: Option<String>,
}

/// Adequacy of one calibration type for a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub kind: CalibrationKind,
    /// Matching raw (non-master) frames
    pub count: u32,
    /// Matching master frames (0 when masters are excluded)
    pub master_count: u32,
    /// Mean temperature of the matching raw frames
    pub avg_temp: Option<f64>,
    /// 0-100 confidence score
    pub quality: f64,
    pub display: String,
    pub has_frames: bool,
    /// Capture dates of the counted flats, newest first (empty for darks/bias)
    pub dates: Vec<String>,
}

impl MatchResult {
    /// Build a result from raw counts
    ///
    /// `temps` are the temperatures of the matching raw frames in catalog order.
    pub fn from_counts(
        kind: CalibrationKind,
        temps: &[f64],
        master_count: u32,
        acceptable: u32,
        recommended: u32,
    ) -> Self {
        let count = temps.len() as u32;

        let avg_temp = if temps.is_empty() {
            None
        } else {
            Some(temps.iter().sum::<f64>() / temps.len() as f64)
        };

        let quality = if master_count > 0 {
            100.0
        } else if count > 0 {
            (count as f64 / recommended as f64 * 100.0).min(100.0)
        } else {
            0.0
        };

        let display = if master_count > 0 {
            format!("✓ {} + {} Master", count, master_count)
        } else if count >= acceptable {
            format!("✓ {} frames", count)
        } else if count > 0 {
            format!("⚠ {} frames (need {}+)", count, acceptable)
        } else {
            "✗ Missing".to_string()
        };

        Self {
            kind,
            count,
            master_count,
            avg_temp,
            quality,
            display,
            has_frames: master_count > 0 || count > 0,
            dates: Vec::new(),
        }
    }

    /// Attach the capture dates used (flats)
    pub fn with_dates(mut self, dates: Vec<String>) -> Self {
        self.dates = dates;
        self
    }

    /// Raw frames present but below the acceptable count, with no master to cover
    pub fn is_insufficient(&self, acceptable: u32) -> bool {
        self.count > 0 && self.count < acceptable && self.master_count == 0
    }
}

/// Derived calibration status of a light session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    /// All three calibration types are present
    Complete { has_master: bool },
    Partial,
    Missing,
}

impl SessionStatus {
    /// Derive the status from the three match results
    pub fn derive(darks: &MatchResult, bias: &MatchResult, flats: &MatchResult) -> Self {
        let present = [darks.has_frames, bias.has_frames, flats.has_frames];

        if present.iter().all(|p| *p) {
            let has_master =
                darks.master_count > 0 || bias.master_count > 0 || flats.master_count > 0;
            SessionStatus::Complete { has_master }
        } else if present.iter().any(|p| *p) {
            SessionStatus::Partial
        } else {
            SessionStatus::Missing
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Complete { .. } => "Complete",
            SessionStatus::Partial => "Partial",
            SessionStatus::Missing => "Missing",
        }
    }

    /// Ordering used when comparing statuses: Missing < Partial < Complete
    pub fn rank(&self) -> u8 {
        match self {
            SessionStatus::Missing => 0,
            SessionStatus::Partial => 1,
            SessionStatus::Complete { .. } => 2,
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Complete { has_master: true } => f.write_str("Complete (Masters)"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Light-session parameters the matcher needs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionProfile {
    pub date_loc: String,
    pub object: String,
    pub filter: Option<String>,
    /// Average exposure in seconds
    pub exposure: Option<f64>,
    /// Average sensor temperature in °C
    pub ccd_temp: Option<f64>,
    pub xbinning: i64,
    pub ybinning: i64,
}

/// Full calibration assessment for one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionCalibration {
    pub profile: SessionProfile,
    pub darks: MatchResult,
    pub bias: MatchResult,
    pub flats: MatchResult,
    pub status: SessionStatus,
    pub recommendations: Vec<String>,
}
