//! Engine services
//!
//! The calibration matcher and its cache, the session aggregator and report
//! rendering, the project goal tracker, quality ingest, and batch review.

pub mod batch_review;
pub mod calibration_cache;
pub mod calibration_matcher;
pub mod project_tracker;
pub mod quality_ingest;
pub mod session_aggregator;
pub mod session_report;

pub use batch_review::{BatchReviewOutcome, BatchReviewer, ReviewTicket, SessionReview};
pub use calibration_cache::CalibrationCache;
pub use calibration_matcher::{session_status, CalibrationMatcher, FALLBACK_FLAT_LIMIT};
pub use project_tracker::ProjectTracker;
pub use quality_ingest::apply_quality_updates;
pub use session_aggregator::{catalog_statistics, get_session, list_sessions, CatalogStatistics};
pub use session_report::{render_session, render_summary};
