//! Data models for the calibration matching and project progress engine

pub mod calibration;
pub mod grading;
pub mod project;
pub mod session;

pub use calibration::{
    CalibrationFrame, CalibrationKind, MatchResult, SessionCalibration, SessionProfile,
    SessionStatus,
};
pub use grading::{GradingStats, QualityUpdate};
pub use project::{
    FilterGoal, FilterGoalProgress, FilterGoalSpec, GoalSpecError, MasterFrame,
    MasterFrameSummary, MasterImportStats, NewProject, Project, ProjectProgress, ProjectTemplate,
    ProjectUpdate, SessionAssignment,
};
pub use session::{ReviewSummary, SessionFilter, SessionIdentity, SessionSummary};
