//! Calibration frame predicates
//!
//! One predicate value renders both a parameterized SQL `WHERE` clause and an
//! in-memory test over preloaded rows, so the live and cached matchers cannot
//! drift apart. Tolerance operators are part of the catalog contract:
//! exposure uses strict less-than, temperature an inclusive range.

use crate::models::CalibrationFrame;
use afm_common::db::FrameKind;
use sqlx::query::Query;
use sqlx::sqlite::SqliteArguments;
use sqlx::Sqlite;

/// Temperature bounds used when the session temperature is unknown
pub const TEMP_SENTINEL: f64 = 999.0;

/// NULL-safe equality: `None` matches only `None`, never `Some("")`
pub fn optional_eq<T: PartialEq + ?Sized>(a: Option<&T>, b: Option<&T>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a == b,
        (None, None) => true,
        _ => false,
    }
}

/// SQL form of [`optional_eq`] between two expressions
pub fn null_safe_eq_exprs(left: &str, right: &str) -> String {
    format!("{} IS {}", left, right)
}

/// SQL form of [`optional_eq`] against one bound parameter
pub fn null_safe_eq(column: &str) -> String {
    null_safe_eq_exprs(column, "?")
}

/// Inclusive temperature range
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TempRange {
    pub min: f64,
    pub max: f64,
}

impl TempRange {
    /// `target ± tolerance`, or the wide sentinel range when target is unknown
    pub fn around(target: Option<f64>, tolerance: f64) -> Self {
        match target {
            Some(t) => Self {
                min: t - tolerance,
                max: t + tolerance,
            },
            None => Self {
                min: -TEMP_SENTINEL,
                max: TEMP_SENTINEL,
            },
        }
    }

    pub fn contains(&self, temp: Option<f64>) -> bool {
        temp.is_some_and(|t| t >= self.min && t <= self.max)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Clause {
    Kind(FrameKind),
    Master(bool),
    ExposureWithin { target: Option<f64>, tolerance: f64 },
    TempBetween(TempRange),
    XBinning(i64),
    YBinning(i64),
    FilterIs(Option<String>),
    CapturedOn(String),
}

impl Clause {
    fn sql(&self) -> String {
        match self {
            Clause::Kind(_) => "frame_kind = ?".to_string(),
            Clause::Master(_) => "is_master = ?".to_string(),
            Clause::ExposureWithin { .. } => "ABS(exposure - ?) < ?".to_string(),
            Clause::TempBetween(_) => "ccd_temp BETWEEN ? AND ?".to_string(),
            Clause::XBinning(_) => "xbinning = ?".to_string(),
            Clause::YBinning(_) => "ybinning = ?".to_string(),
            Clause::FilterIs(_) => null_safe_eq("filter"),
            Clause::CapturedOn(_) => "date_loc = ?".to_string(),
        }
    }

    fn bind<'q>(
        &self,
        query: Query<'q, Sqlite, SqliteArguments<'q>>,
    ) -> Query<'q, Sqlite, SqliteArguments<'q>> {
        match self {
            Clause::Kind(kind) => query.bind(kind.as_str()),
            Clause::Master(flag) => query.bind(*flag),
            Clause::ExposureWithin { target, tolerance } => query.bind(*target).bind(*tolerance),
            Clause::TempBetween(range) => query.bind(range.min).bind(range.max),
            Clause::XBinning(x) => query.bind(*x),
            Clause::YBinning(y) => query.bind(*y),
            Clause::FilterIs(filter) => query.bind(filter.clone()),
            Clause::CapturedOn(date) => query.bind(date.clone()),
        }
    }

    fn matches(&self, frame: &CalibrationFrame) -> bool {
        match self {
            Clause::Kind(kind) => frame.kind == *kind,
            Clause::Master(flag) => frame.is_master == *flag,
            // Unknown exposure on either side never matches, as in SQL
            Clause::ExposureWithin { target, tolerance } => match (frame.exposure, target) {
                (Some(exposure), Some(target)) => (exposure - target).abs() < *tolerance,
                _ => false,
            },
            Clause::TempBetween(range) => range.contains(frame.ccd_temp),
            Clause::XBinning(x) => frame.xbinning == Some(*x),
            Clause::YBinning(y) => frame.ybinning == Some(*y),
            Clause::FilterIs(filter) => optional_eq(frame.filter.as_deref(), filter.as_deref()),
            Clause::CapturedOn(date) => frame.date_loc.as_deref() == Some(date.as_str()),
        }
    }
}

/// Composable conjunction of calibration frame conditions
#[derive(Debug, Clone, PartialEq)]
pub struct FramePredicate {
    clauses: Vec<Clause>,
}

impl FramePredicate {
    /// Frames of `kind` with the given master flag
    pub fn new(kind: FrameKind, is_master: bool) -> Self {
        Self {
            clauses: vec![Clause::Kind(kind), Clause::Master(is_master)],
        }
    }

    pub fn exposure_within(mut self, target: Option<f64>, tolerance: f64) -> Self {
        self.clauses.push(Clause::ExposureWithin { target, tolerance });
        self
    }

    pub fn temperature_between(mut self, range: TempRange) -> Self {
        self.clauses.push(Clause::TempBetween(range));
        self
    }

    pub fn binning(mut self, x: i64, y: i64) -> Self {
        self.clauses.push(Clause::XBinning(x));
        self.clauses.push(Clause::YBinning(y));
        self
    }

    pub fn filter_is(mut self, filter: Option<&str>) -> Self {
        self.clauses.push(Clause::FilterIs(filter.map(str::to_string)));
        self
    }

    pub fn captured_on(mut self, date_loc: &str) -> Self {
        self.clauses.push(Clause::CapturedOn(date_loc.to_string()));
        self
    }

    /// Same predicate with the master flag replaced
    pub fn with_master(&self, is_master: bool) -> Self {
        let clauses = self
            .clauses
            .iter()
            .map(|clause| match clause {
                Clause::Master(_) => Clause::Master(is_master),
                other => other.clone(),
            })
            .collect();
        Self { clauses }
    }

    /// Same predicate without the capture-date condition
    pub fn without_date(&self) -> Self {
        let clauses = self
            .clauses
            .iter()
            .filter(|clause| !matches!(clause, Clause::CapturedOn(_)))
            .cloned()
            .collect();
        Self { clauses }
    }

    /// Parameterized `WHERE` body (without the keyword)
    pub fn where_clause(&self) -> String {
        self.clauses
            .iter()
            .map(Clause::sql)
            .collect::<Vec<_>>()
            .join(" AND ")
    }

    /// Bind this predicate's parameters in clause order
    pub fn bind_to<'q>(
        &self,
        query: Query<'q, Sqlite, SqliteArguments<'q>>,
    ) -> Query<'q, Sqlite, SqliteArguments<'q>> {
        self.clauses
            .iter()
            .fold(query, |query, clause| clause.bind(query))
    }

    /// Evaluate against a preloaded row
    pub fn matches(&self, frame: &CalibrationFrame) -> bool {
        self.clauses.iter().all(|clause| clause.matches(frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dark(exposure: f64, temp: f64) -> CalibrationFrame {
        CalibrationFrame {
            id: 1,
            kind: FrameKind::Dark,
            is_master: false,
            exposure: Some(exposure),
            ccd_temp: Some(temp),
            xbinning: Some(1),
            ybinning: Some(1),
            filter: None,
            date_loc: Some("2024-11-15".to_string()),
        }
    }

    #[test]
    fn test_optional_eq() {
        assert!(optional_eq::<str>(None, None));
        assert!(optional_eq(Some("Ha"), Some("Ha")));
        assert!(!optional_eq(None, Some("")));
        assert!(!optional_eq(Some(""), None));
    }

    #[test]
    fn test_where_clause_order() {
        let predicate = FramePredicate::new(FrameKind::Flat, false)
            .filter_is(Some("Ha"))
            .temperature_between(TempRange::around(Some(-10.0), 3.0))
            .binning(1, 1)
            .captured_on("2024-11-15");

        assert_eq!(
            predicate.where_clause(),
            "frame_kind = ? AND is_master = ? AND filter IS ? AND ccd_temp BETWEEN ? AND ? \
             AND xbinning = ? AND ybinning = ? AND date_loc = ?"
        );
        assert_eq!(
            predicate.without_date().where_clause(),
            "frame_kind = ? AND is_master = ? AND filter IS ? AND ccd_temp BETWEEN ? AND ? \
             AND xbinning = ? AND ybinning = ?"
        );
    }

    #[test]
    fn test_exposure_tolerance_is_strict() {
        let predicate = FramePredicate::new(FrameKind::Dark, false).exposure_within(Some(300.0), 0.1);
        assert!(predicate.matches(&dark(300.05, -10.0)));
        assert!(!predicate.matches(&dark(300.15, -10.0)));
    }

    #[test]
    fn test_temperature_range_inclusive_and_sentinel() {
        let range = TempRange::around(Some(-10.0), 1.0);
        assert!(range.contains(Some(-11.0)));
        assert!(range.contains(Some(-9.0)));
        assert!(!range.contains(Some(-8.5)));
        assert!(!range.contains(None));

        let open = TempRange::around(None, 1.0);
        assert!(open.contains(Some(25.0)));
        assert!(!open.contains(None));

        // Zero is a real temperature, not an unknown one
        let zero = TempRange::around(Some(0.0), 1.0);
        assert!(!zero.contains(Some(25.0)));
    }

    #[test]
    fn test_with_master_swaps_flag() {
        let raw = FramePredicate::new(FrameKind::Dark, false);
        let mut frame = dark(300.0, -10.0);
        assert!(raw.matches(&frame));

        frame.is_master = true;
        assert!(!raw.matches(&frame));
        assert!(raw.with_master(true).matches(&frame));
    }
}
