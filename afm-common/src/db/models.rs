//! Database models
//!
//! Classification and status values stored in the catalog. Frame types are
//! parsed once from the importer's free-text `imagetyp` and stored as
//! `frame_kind` + `is_master`; query paths only ever compare those columns.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of exposure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FrameKind {
    Light,
    Dark,
    Flat,
    Bias,
}

impl FrameKind {
    /// Value stored in the `frame_kind` column
    pub fn as_str(&self) -> &'static str {
        match self {
            FrameKind::Light => "Light",
            FrameKind::Dark => "Dark",
            FrameKind::Flat => "Flat",
            FrameKind::Bias => "Bias",
        }
    }

    /// Parse a stored `frame_kind` value
    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "Light" => Some(FrameKind::Light),
            "Dark" => Some(FrameKind::Dark),
            "Flat" => Some(FrameKind::Flat),
            "Bias" => Some(FrameKind::Bias),
            _ => None,
        }
    }

    pub fn is_calibration(&self) -> bool {
        !matches!(self, FrameKind::Light)
    }
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Frame kind plus master flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameType {
    pub kind: FrameKind,
    pub is_master: bool,
}

impl FrameType {
    pub fn new(kind: FrameKind, is_master: bool) -> Self {
        Self { kind, is_master }
    }

    /// Classify an importer-supplied IMAGETYP value
    ///
    /// Matching is case-insensitive on substrings, so `"Dark Frame"`,
    /// `"MASTER DARK"` and `"masterDark"` all classify. A light frame is never
    /// a master. Returns None for text that names no known kind.
    pub fn parse(imagetyp: &str) -> Option<Self> {
        let lower = imagetyp.to_ascii_lowercase();
        let is_master = lower.contains("master");

        let kind = if lower.contains("dark") {
            FrameKind::Dark
        } else if lower.contains("flat") {
            FrameKind::Flat
        } else if lower.contains("bias") || lower.contains("offset") {
            FrameKind::Bias
        } else if lower.contains("light") {
            FrameKind::Light
        } else {
            return None;
        };

        Some(Self {
            kind,
            is_master: is_master && kind.is_calibration(),
        })
    }

    /// Display label, e.g. "Master Dark" or "Flat"
    pub fn label(&self) -> String {
        if self.is_master {
            format!("Master {}", self.kind)
        } else {
            self.kind.to_string()
        }
    }

    pub fn is_master_calibration(&self) -> bool {
        self.is_master && self.kind.is_calibration()
    }
}

/// Quality-grading outcome of a frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    #[default]
    NotGraded,
    Approved,
    Rejected,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::NotGraded => "not_graded",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
        }
    }

    /// Parse a stored value; unknown text reads as not graded
    pub fn from_db(value: &str) -> Self {
        match value {
            "approved" => ApprovalStatus::Approved,
            "rejected" => ApprovalStatus::Rejected,
            _ => ApprovalStatus::NotGraded,
        }
    }

    /// Interpret an approval cell from a grading tool export
    ///
    /// Accepts booleans (`true`/`false`, `1`/`0`, `yes`/`no`), the words
    /// `approved`/`rejected`, or a numeric weight where anything above zero
    /// counts as approved.
    pub fn from_grading_value(value: &str) -> Self {
        let normalized = value.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "true" | "1" | "yes" | "approved" => ApprovalStatus::Approved,
            "false" | "0" | "no" | "rejected" => ApprovalStatus::Rejected,
            other => match other.parse::<f64>() {
                Ok(weight) if weight > 0.0 => ApprovalStatus::Approved,
                _ => ApprovalStatus::NotGraded,
            },
        }
    }

    pub fn is_graded(&self) -> bool {
        !matches!(self, ApprovalStatus::NotGraded)
    }
}

/// Project lifecycle status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    #[default]
    Active,
    Completed,
    Archived,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Active => "active",
            ProjectStatus::Completed => "completed",
            ProjectStatus::Archived => "archived",
        }
    }
}

impl FromStr for ProjectStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(ProjectStatus::Active),
            "completed" => Ok(ProjectStatus::Completed),
            "archived" => Ok(ProjectStatus::Archived),
            other => Err(crate::Error::InvalidInput(format!(
                "Unknown project status: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_raw_and_master_types() {
        assert_eq!(
            FrameType::parse("Dark Frame"),
            Some(FrameType::new(FrameKind::Dark, false))
        );
        assert_eq!(
            FrameType::parse("MASTER DARK"),
            Some(FrameType::new(FrameKind::Dark, true))
        );
        assert_eq!(
            FrameType::parse("masterFlat"),
            Some(FrameType::new(FrameKind::Flat, true))
        );
        assert_eq!(
            FrameType::parse("Offset"),
            Some(FrameType::new(FrameKind::Bias, false))
        );
        assert_eq!(
            FrameType::parse("Light Frame"),
            Some(FrameType::new(FrameKind::Light, false))
        );
        assert_eq!(FrameType::parse("Tricolor"), None);
    }

    #[test]
    fn test_master_light_is_not_master() {
        let parsed = FrameType::parse("Master Light").unwrap();
        assert_eq!(parsed.kind, FrameKind::Light);
        assert!(!parsed.is_master);
    }

    #[test]
    fn test_labels() {
        assert_eq!(FrameType::new(FrameKind::Bias, true).label(), "Master Bias");
        assert_eq!(FrameType::new(FrameKind::Flat, false).label(), "Flat");
    }

    #[test]
    fn test_grading_values() {
        assert_eq!(ApprovalStatus::from_grading_value("TRUE"), ApprovalStatus::Approved);
        assert_eq!(ApprovalStatus::from_grading_value(" yes "), ApprovalStatus::Approved);
        assert_eq!(ApprovalStatus::from_grading_value("0"), ApprovalStatus::Rejected);
        assert_eq!(ApprovalStatus::from_grading_value("rejected"), ApprovalStatus::Rejected);
        assert_eq!(ApprovalStatus::from_grading_value("0.75"), ApprovalStatus::Approved);
        assert_eq!(ApprovalStatus::from_grading_value("-1"), ApprovalStatus::NotGraded);
        assert_eq!(ApprovalStatus::from_grading_value(""), ApprovalStatus::NotGraded);
    }

    #[test]
    fn test_project_status_round_trip_text() {
        assert_eq!("Archived".parse::<ProjectStatus>().unwrap(), ProjectStatus::Archived);
        assert!("paused".parse::<ProjectStatus>().is_err());
    }
}
