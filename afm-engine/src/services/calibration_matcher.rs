//! Calibration Matcher
//!
//! Scores dark, bias and flat adequacy for a light-frame profile, derives the
//! session status, and generates capture recommendations.
//!
//! # Matching rules
//! - **Darks**: same exposure (`|Δ| < exposure_tolerance`), temperature within
//!   `± temp_tolerance_darks` (inclusive), same binning
//! - **Bias**: temperature within `± temp_tolerance_bias`, same binning
//! - **Flats**: same filter (NULL matches only NULL), temperature within
//!   `± temp_tolerance_flats`, same binning, captured on the session date.
//!   In [`FlatMatchMode::Fallback`] a session with no same-date flats uses the
//!   most recent matching flats instead.
//!
//! Masters satisfy the same conditions and are counted separately, only when
//! `include_masters` is set. An unknown session temperature leaves the
//! temperature range open.
//!
//! # Live and cached evaluation
//! Every operation exists twice: against the store and against a preloaded
//! [`CalibrationCache`]. Both paths evaluate the same [`FramePredicate`] values
//! and aggregate in catalog order, so for one snapshot they return identical
//! results.

use crate::db::frames::{latest_calibration_frames, matching_calibration_frames};
use crate::db::predicates::{FramePredicate, TempRange};
use crate::models::{
    CalibrationFrame, CalibrationKind, MatchResult, SessionCalibration, SessionProfile,
    SessionStatus,
};
use crate::services::calibration_cache::CalibrationCache;
use afm_common::{FlatMatchMode, MatcherConfig, Result};
use sqlx::{SqliteConnection, SqlitePool};
use std::sync::Arc;
use tracing::debug;

/// Flats considered when falling back to other dates
pub const FALLBACK_FLAT_LIMIT: usize = 50;

/// Stateless calibration matcher
#[derive(Debug, Clone)]
pub struct CalibrationMatcher {
    pool: SqlitePool,
    config: MatcherConfig,
}

impl CalibrationMatcher {
    pub fn new(pool: SqlitePool, config: MatcherConfig) -> Self {
        Self { pool, config }
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    // ---- predicates ------------------------------------------------------

    fn dark_predicate(&self, exposure: Option<f64>, temp: Option<f64>, x: i64, y: i64) -> FramePredicate {
        FramePredicate::new(CalibrationKind::Dark.frame_kind(), false)
            .exposure_within(exposure, self.config.exposure_tolerance)
            .temperature_between(TempRange::around(temp, self.config.temp_tolerance_darks))
            .binning(x, y)
    }

    fn bias_predicate(&self, temp: Option<f64>, x: i64, y: i64) -> FramePredicate {
        FramePredicate::new(CalibrationKind::Bias.frame_kind(), false)
            .temperature_between(TempRange::around(temp, self.config.temp_tolerance_bias))
            .binning(x, y)
    }

    fn flat_predicate(
        &self,
        filter: Option<&str>,
        temp: Option<f64>,
        x: i64,
        y: i64,
        date_loc: &str,
    ) -> FramePredicate {
        FramePredicate::new(CalibrationKind::Flat.frame_kind(), false)
            .filter_is(filter)
            .temperature_between(TempRange::around(temp, self.config.temp_tolerance_flats))
            .binning(x, y)
            .captured_on(date_loc)
    }

    // ---- aggregation -----------------------------------------------------

    fn summarize(
        &self,
        kind: CalibrationKind,
        raw: &[CalibrationFrame],
        master_count: usize,
    ) -> MatchResult {
        let temps: Vec<f64> = raw.iter().filter_map(|f| f.ccd_temp).collect();
        MatchResult::from_counts(
            kind,
            &temps,
            master_count as u32,
            self.config.min_frames_acceptable,
            self.config.min_frames_recommended,
        )
    }

    fn summarize_flats(&self, raw: &[CalibrationFrame], master_count: usize) -> MatchResult {
        let mut dates: Vec<String> = raw.iter().filter_map(|f| f.date_loc.clone()).collect();
        dates.sort_unstable_by(|a, b| b.cmp(a));
        dates.dedup();
        self.summarize(CalibrationKind::Flat, raw, master_count)
            .with_dates(dates)
    }

    // ---- live path -------------------------------------------------------

    async fn count_masters_live(
        &self,
        conn: &mut SqliteConnection,
        predicate: &FramePredicate,
    ) -> Result<usize> {
        if !self.config.include_masters {
            return Ok(0);
        }
        let masters = matching_calibration_frames(conn, &predicate.with_master(true)).await?;
        Ok(masters.len())
    }

    async fn darks_live(
        &self,
        conn: &mut SqliteConnection,
        exposure: Option<f64>,
        temp: Option<f64>,
        x: i64,
        y: i64,
    ) -> Result<MatchResult> {
        let predicate = self.dark_predicate(exposure, temp, x, y);
        let raw = matching_calibration_frames(conn, &predicate).await?;
        let masters = self.count_masters_live(conn, &predicate).await?;
        Ok(self.summarize(CalibrationKind::Dark, &raw, masters))
    }

    async fn bias_live(
        &self,
        conn: &mut SqliteConnection,
        temp: Option<f64>,
        x: i64,
        y: i64,
    ) -> Result<MatchResult> {
        let predicate = self.bias_predicate(temp, x, y);
        let raw = matching_calibration_frames(conn, &predicate).await?;
        let masters = self.count_masters_live(conn, &predicate).await?;
        Ok(self.summarize(CalibrationKind::Bias, &raw, masters))
    }

    async fn flats_live(
        &self,
        conn: &mut SqliteConnection,
        filter: Option<&str>,
        temp: Option<f64>,
        x: i64,
        y: i64,
        date_loc: &str,
    ) -> Result<MatchResult> {
        let predicate = self.flat_predicate(filter, temp, x, y, date_loc);
        let raw = matching_calibration_frames(conn, &predicate).await?;
        let masters = self.count_masters_live(conn, &predicate).await?;

        if raw.is_empty() && masters == 0 && self.config.flat_match_mode == FlatMatchMode::Fallback {
            let any_date = predicate.without_date();
            let raw =
                latest_calibration_frames(conn, &any_date, FALLBACK_FLAT_LIMIT as i64).await?;
            let masters = self.count_masters_live(conn, &any_date).await?;
            debug!(
                filter = filter.unwrap_or("No Filter"),
                date_loc,
                fallback_flats = raw.len(),
                "No same-date flats, using most recent matching flats"
            );
            return Ok(self.summarize_flats(&raw, masters));
        }

        Ok(self.summarize_flats(&raw, masters))
    }

    /// Matching darks for an exposure/temperature/binning
    pub async fn find_matching_darks(
        &self,
        exposure: Option<f64>,
        temp: Option<f64>,
        xbinning: i64,
        ybinning: i64,
    ) -> Result<MatchResult> {
        let mut conn = self.pool.acquire().await?;
        self.darks_live(&mut conn, exposure, temp, xbinning, ybinning).await
    }

    /// Matching bias frames for a temperature/binning
    pub async fn find_matching_bias(
        &self,
        temp: Option<f64>,
        xbinning: i64,
        ybinning: i64,
    ) -> Result<MatchResult> {
        let mut conn = self.pool.acquire().await?;
        self.bias_live(&mut conn, temp, xbinning, ybinning).await
    }

    /// Matching flats for a filter/temperature/binning/date
    pub async fn find_matching_flats(
        &self,
        filter: Option<&str>,
        temp: Option<f64>,
        xbinning: i64,
        ybinning: i64,
        date_loc: &str,
    ) -> Result<MatchResult> {
        let mut conn = self.pool.acquire().await?;
        self.flats_live(&mut conn, filter, temp, xbinning, ybinning, date_loc)
            .await
    }

    /// Evaluate one session against the store
    ///
    /// All queries run in one read transaction so the three results describe
    /// the same snapshot.
    pub async fn check_session(&self, profile: &SessionProfile) -> Result<SessionCalibration> {
        let mut tx = self.pool.begin().await?;
        let (x, y) = (profile.xbinning, profile.ybinning);

        let darks = self
            .darks_live(&mut tx, profile.exposure, profile.ccd_temp, x, y)
            .await?;
        let bias = self.bias_live(&mut tx, profile.ccd_temp, x, y).await?;
        let flats = self
            .flats_live(
                &mut tx,
                profile.filter.as_deref(),
                profile.ccd_temp,
                x,
                y,
                &profile.date_loc,
            )
            .await?;
        tx.commit().await?;

        Ok(self.assemble(profile, darks, bias, flats))
    }

    // ---- cache path ------------------------------------------------------

    /// Issue the three bulk calibration queries
    pub async fn preload_calibration_data(&self) -> Result<Arc<CalibrationCache>> {
        Ok(Arc::new(CalibrationCache::preload(&self.pool).await?))
    }

    fn select(
        cache: &CalibrationCache,
        kind: CalibrationKind,
        predicate: &FramePredicate,
    ) -> Vec<CalibrationFrame> {
        cache
            .frames(kind)
            .iter()
            .filter(|frame| predicate.matches(frame))
            .cloned()
            .collect()
    }

    fn count_masters_cached(
        &self,
        cache: &CalibrationCache,
        kind: CalibrationKind,
        predicate: &FramePredicate,
    ) -> usize {
        if !self.config.include_masters {
            return 0;
        }
        let masters = predicate.with_master(true);
        cache
            .frames(kind)
            .iter()
            .filter(|frame| masters.matches(frame))
            .count()
    }

    pub fn find_matching_darks_from_cache(
        &self,
        exposure: Option<f64>,
        temp: Option<f64>,
        xbinning: i64,
        ybinning: i64,
        cache: &CalibrationCache,
    ) -> MatchResult {
        let kind = CalibrationKind::Dark;
        let predicate = self.dark_predicate(exposure, temp, xbinning, ybinning);
        let raw = Self::select(cache, kind, &predicate);
        let masters = self.count_masters_cached(cache, kind, &predicate);
        self.summarize(kind, &raw, masters)
    }

    pub fn find_matching_bias_from_cache(
        &self,
        temp: Option<f64>,
        xbinning: i64,
        ybinning: i64,
        cache: &CalibrationCache,
    ) -> MatchResult {
        let kind = CalibrationKind::Bias;
        let predicate = self.bias_predicate(temp, xbinning, ybinning);
        let raw = Self::select(cache, kind, &predicate);
        let masters = self.count_masters_cached(cache, kind, &predicate);
        self.summarize(kind, &raw, masters)
    }

    pub fn find_matching_flats_from_cache(
        &self,
        filter: Option<&str>,
        temp: Option<f64>,
        xbinning: i64,
        ybinning: i64,
        date_loc: &str,
        cache: &CalibrationCache,
    ) -> MatchResult {
        let kind = CalibrationKind::Flat;
        let predicate = self.flat_predicate(filter, temp, xbinning, ybinning, date_loc);
        let raw = Self::select(cache, kind, &predicate);
        let masters = self.count_masters_cached(cache, kind, &predicate);

        if raw.is_empty() && masters == 0 && self.config.flat_match_mode == FlatMatchMode::Fallback {
            let any_date = predicate.without_date();
            let mut raw = Self::select(cache, kind, &any_date);
            // Same order as the live query: date_loc DESC (NULL last), then id
            raw.sort_by(|a, b| b.date_loc.cmp(&a.date_loc).then(a.id.cmp(&b.id)));
            raw.truncate(FALLBACK_FLAT_LIMIT);
            let masters = self.count_masters_cached(cache, kind, &any_date);
            return self.summarize_flats(&raw, masters);
        }

        self.summarize_flats(&raw, masters)
    }

    /// Evaluate one session against a preloaded snapshot
    pub fn check_session_cached(
        &self,
        profile: &SessionProfile,
        cache: &CalibrationCache,
    ) -> SessionCalibration {
        let (x, y) = (profile.xbinning, profile.ybinning);
        let darks =
            self.find_matching_darks_from_cache(profile.exposure, profile.ccd_temp, x, y, cache);
        let bias = self.find_matching_bias_from_cache(profile.ccd_temp, x, y, cache);
        let flats = self.find_matching_flats_from_cache(
            profile.filter.as_deref(),
            profile.ccd_temp,
            x,
            y,
            &profile.date_loc,
            cache,
        );

        self.assemble(profile, darks, bias, flats)
    }

    // ---- status and recommendations ---------------------------------------

    fn assemble(
        &self,
        profile: &SessionProfile,
        darks: MatchResult,
        bias: MatchResult,
        flats: MatchResult,
    ) -> SessionCalibration {
        let status = session_status(&darks, &bias, &flats);
        let recommendations = self.generate_recommendations(profile, &darks, &bias, &flats);

        SessionCalibration {
            profile: profile.clone(),
            darks,
            bias,
            flats,
            status,
            recommendations,
        }
    }

    /// Ordered capture instructions for a session (darks, bias, flats)
    pub fn generate_recommendations(
        &self,
        profile: &SessionProfile,
        darks: &MatchResult,
        bias: &MatchResult,
        flats: &MatchResult,
    ) -> Vec<String> {
        let acceptable = self.config.min_frames_acceptable;
        let recommended = self.config.min_frames_recommended;
        let exposure = profile.exposure.map(|e| (e * 10.0).round() / 10.0).unwrap_or(0.0);
        // `+ 0.0` turns a rounded -0.0 into 0.0 so it never prints as "-0"
        let temp = profile.ccd_temp.map(|t| t.round() + 0.0).unwrap_or(0.0);
        let binning = format!("{}x{}", profile.xbinning, profile.ybinning);
        let limits = format!("(minimum {}, recommended {}+)", acceptable, recommended);

        let mut lines = Vec::new();

        for result in [darks, bias, flats] {
            if !result.has_frames {
                let line = match result.kind {
                    CalibrationKind::Dark => format!(
                        "• Capture dark frames: {:.1}s exposure at ~{:.0}°C, {} binning {}",
                        exposure, temp, binning, limits
                    ),
                    CalibrationKind::Bias => format!(
                        "• Capture bias frames: ~{:.0}°C, {} binning {}",
                        temp, binning, limits
                    ),
                    CalibrationKind::Flat => format!(
                        "• Capture flat frames: {}, ~{:.0}°C, {} binning {}",
                        profile.filter.as_deref().unwrap_or("No Filter"),
                        temp,
                        binning,
                        limits
                    ),
                };
                lines.push(line);
            } else if result.is_insufficient(acceptable) {
                lines.push(format!(
                    "• Add more {} frames: Currently {}, need at least {} for good calibration",
                    result.kind.noun(),
                    result.count,
                    acceptable
                ));
            }
        }

        if !lines.is_empty() {
            return lines;
        }

        if [darks, bias, flats].iter().any(|r| r.master_count > 0) {
            lines.push("✓ Session has master calibration frames available".to_string());
            return lines;
        }

        lines.push("✓ All calibration frames are present".to_string());
        let suggestions: Vec<String> = [darks, bias, flats]
            .iter()
            .filter(|r| r.count < recommended)
            .map(|r| {
                format!(
                    "• Consider adding more {} (currently {}, recommended {}+)",
                    r.kind.plural(),
                    r.count,
                    recommended
                )
            })
            .collect();

        if !suggestions.is_empty() {
            lines.push("Optional improvements:".to_string());
            lines.extend(suggestions);
        }

        lines
    }
}

/// Session status from the three match results
pub fn session_status(darks: &MatchResult, bias: &MatchResult, flats: &MatchResult) -> SessionStatus {
    SessionStatus::derive(darks, bias, flats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use afm_common::db::{init_memory_database, FrameKind};

    fn frame(id: i64, kind: FrameKind, exposure: Option<f64>, temp: f64) -> CalibrationFrame {
        CalibrationFrame {
            id,
            kind,
            is_master: false,
            exposure,
            ccd_temp: Some(temp),
            xbinning: Some(1),
            ybinning: Some(1),
            filter: None,
            date_loc: Some("2024-11-15".to_string()),
        }
    }

    fn profile() -> SessionProfile {
        SessionProfile {
            date_loc: "2024-11-15".to_string(),
            object: "M31".to_string(),
            filter: Some("Ha".to_string()),
            exposure: Some(300.0),
            ccd_temp: Some(-10.0),
            xbinning: 1,
            ybinning: 1,
        }
    }

    async fn matcher(config: MatcherConfig) -> CalibrationMatcher {
        let pool = init_memory_database().await.unwrap();
        CalibrationMatcher::new(pool, config)
    }

    #[tokio::test]
    async fn test_cache_darks_respect_exposure_and_binning() {
        let matcher = matcher(MatcherConfig::default()).await;
        let mut frames: Vec<CalibrationFrame> = (1..=12)
            .map(|id| frame(id, FrameKind::Dark, Some(300.0), -10.0))
            .collect();
        frames.push(frame(13, FrameKind::Dark, Some(120.0), -10.0));
        let mut binned = frame(14, FrameKind::Dark, Some(300.0), -10.0);
        binned.xbinning = Some(2);
        frames.push(binned);

        let cache = CalibrationCache::from_frames(frames);
        let result = matcher.find_matching_darks_from_cache(Some(300.0), Some(-10.0), 1, 1, &cache);
        assert_eq!(result.count, 12);
        assert_eq!(result.display, "✓ 12 frames");
        assert_eq!(result.avg_temp, Some(-10.0));
    }

    #[tokio::test]
    async fn test_masters_ignored_when_disabled() {
        let config = MatcherConfig {
            include_masters: false,
            ..MatcherConfig::default()
        };
        let matcher = matcher(config).await;
        let mut master = frame(1, FrameKind::Bias, None, -10.0);
        master.is_master = true;
        let cache = CalibrationCache::from_frames(vec![master]);

        let result = matcher.find_matching_bias_from_cache(Some(-10.0), 1, 1, &cache);
        assert_eq!(result.master_count, 0);
        assert_eq!(result.display, "✗ Missing");
    }

    #[tokio::test]
    async fn test_recommendations_for_missing_and_short() {
        let matcher = matcher(MatcherConfig::default()).await;
        let darks = MatchResult::from_counts(CalibrationKind::Dark, &[], 0, 10, 20);
        let bias = MatchResult::from_counts(CalibrationKind::Bias, &[-10.0; 4], 0, 10, 20);
        let flats = MatchResult::from_counts(CalibrationKind::Flat, &[], 0, 10, 20);

        let lines = matcher.generate_recommendations(&profile(), &darks, &bias, &flats);
        assert_eq!(
            lines,
            vec![
                "• Capture dark frames: 300.0s exposure at ~-10°C, 1x1 binning (minimum 10, recommended 20+)",
                "• Add more bias frames: Currently 4, need at least 10 for good calibration",
                "• Capture flat frames: Ha, ~-10°C, 1x1 binning (minimum 10, recommended 20+)",
            ]
        );
    }

    #[tokio::test]
    async fn test_recommendations_round_raw_averages() {
        let matcher = matcher(MatcherConfig::default()).await;
        let missing = MatchResult::from_counts(CalibrationKind::Dark, &[], 0, 10, 20);
        let plenty = MatchResult::from_counts(CalibrationKind::Bias, &[-0.4; 20], 0, 10, 20);
        let flats = MatchResult::from_counts(CalibrationKind::Flat, &[-0.4; 20], 0, 10, 20);
        let raw = SessionProfile {
            exposure: Some(299.96),
            ccd_temp: Some(-0.4),
            ..profile()
        };

        let lines = matcher.generate_recommendations(&raw, &missing, &plenty, &flats);
        assert_eq!(
            lines,
            vec!["• Capture dark frames: 300.0s exposure at ~0°C, 1x1 binning (minimum 10, recommended 20+)"]
        );
    }

    #[tokio::test]
    async fn test_recommendations_when_complete() {
        let matcher = matcher(MatcherConfig::default()).await;
        let plenty = [-10.0; 25];
        let darks = MatchResult::from_counts(CalibrationKind::Dark, &plenty, 0, 10, 20);
        let bias = MatchResult::from_counts(CalibrationKind::Bias, &plenty[..12], 0, 10, 20);
        let flats = MatchResult::from_counts(CalibrationKind::Flat, &plenty, 0, 10, 20);

        let lines = matcher.generate_recommendations(&profile(), &darks, &bias, &flats);
        assert_eq!(
            lines,
            vec![
                "✓ All calibration frames are present",
                "Optional improvements:",
                "• Consider adding more bias (currently 12, recommended 20+)",
            ]
        );

        let master_bias = MatchResult::from_counts(CalibrationKind::Bias, &[], 1, 10, 20);
        let lines = matcher.generate_recommendations(&profile(), &darks, &master_bias, &flats);
        assert_eq!(lines, vec!["✓ Session has master calibration frames available"]);
    }

    #[tokio::test]
    async fn test_fallback_flats_from_cache() {
        let config = MatcherConfig {
            flat_match_mode: FlatMatchMode::Fallback,
            ..MatcherConfig::default()
        };
        let matcher = matcher(config).await;

        let mut older = frame(1, FrameKind::Flat, None, -10.0);
        older.filter = Some("Ha".to_string());
        older.date_loc = Some("2024-11-10".to_string());
        let mut newer = older.clone();
        newer.id = 2;
        newer.date_loc = Some("2024-11-14".to_string());
        let cache = CalibrationCache::from_frames(vec![older, newer]);

        let result = matcher.find_matching_flats_from_cache(
            Some("Ha"),
            Some(-10.0),
            1,
            1,
            "2024-11-15",
            &cache,
        );
        assert_eq!(result.count, 2);
        assert_eq!(result.dates, vec!["2024-11-14", "2024-11-10"]);

        let strict = CalibrationMatcher::new(matcher.pool.clone(), MatcherConfig::default());
        let result = strict.find_matching_flats_from_cache(
            Some("Ha"),
            Some(-10.0),
            1,
            1,
            "2024-11-15",
            &cache,
        );
        assert_eq!(result.count, 0);
    }
}
