//! Quality-grading updates fed by an external grading tool

use afm_common::db::ApprovalStatus;
use serde::{Deserialize, Deserializer, Serialize};

/// Approval cell as grading tools export it
#[derive(Deserialize)]
#[serde(untagged)]
enum GradingValue {
    Flag(bool),
    Weight(f64),
    Text(String),
}

fn deserialize_approval<'de, D>(deserializer: D) -> Result<ApprovalStatus, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<GradingValue>::deserialize(deserializer)? {
        None => ApprovalStatus::NotGraded,
        Some(GradingValue::Flag(true)) => ApprovalStatus::Approved,
        Some(GradingValue::Flag(false)) => ApprovalStatus::Rejected,
        Some(GradingValue::Weight(weight)) => ApprovalStatus::from_grading_value(&weight.to_string()),
        Some(GradingValue::Text(text)) => ApprovalStatus::from_grading_value(&text),
    })
}

/// Measured quality for one frame, keyed by file name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityUpdate {
    pub filename: String,
    #[serde(default)]
    pub fwhm: Option<f64>,
    #[serde(default)]
    pub eccentricity: Option<f64>,
    #[serde(default)]
    pub snr: Option<f64>,
    #[serde(default)]
    pub star_count: Option<i64>,
    #[serde(default)]
    pub background_level: Option<f64>,
    /// Accepts booleans, weights (> 0 approves) and approval words
    #[serde(default, deserialize_with = "deserialize_approval")]
    pub approval: ApprovalStatus,
}

impl QualityUpdate {
    pub fn new(filename: impl Into<String>, approval: ApprovalStatus) -> Self {
        Self {
            filename: filename.into(),
            fwhm: None,
            eccentricity: None,
            snr: None,
            star_count: None,
            background_level: None,
            approval,
        }
    }

    pub fn with_fwhm(mut self, fwhm: f64) -> Self {
        self.fwhm = Some(fwhm);
        self
    }

    pub fn with_snr(mut self, snr: f64) -> Self {
        self.snr = Some(snr);
        self
    }
}

/// Outcome of a grading batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GradingStats {
    pub total: usize,
    pub matched: usize,
    pub not_found: usize,
    pub approved: usize,
    pub rejected: usize,
    pub not_graded: usize,
    /// Projects whose counters were recomputed
    pub updated_projects: Vec<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approval(json: &str) -> ApprovalStatus {
        serde_json::from_str::<QualityUpdate>(json).unwrap().approval
    }

    #[test]
    fn test_approval_accepts_grading_tool_values() {
        assert_eq!(approval(r#"{"filename": "a.fits", "approval": true}"#), ApprovalStatus::Approved);
        assert_eq!(approval(r#"{"filename": "a.fits", "approval": false}"#), ApprovalStatus::Rejected);
        assert_eq!(approval(r#"{"filename": "a.fits", "approval": 0.8}"#), ApprovalStatus::Approved);
        assert_eq!(approval(r#"{"filename": "a.fits", "approval": 0}"#), ApprovalStatus::Rejected);
        assert_eq!(approval(r#"{"filename": "a.fits", "approval": "Yes"}"#), ApprovalStatus::Approved);
        assert_eq!(approval(r#"{"filename": "a.fits", "approval": null}"#), ApprovalStatus::NotGraded);
        assert_eq!(approval(r#"{"filename": "a.fits"}"#), ApprovalStatus::NotGraded);
    }
}
