//! Calibration Cache Preloader
//!
//! Fetches every dark, flat and bias row (master and raw together) in exactly
//! three queries so a batch review can evaluate thousands of sessions without
//! going back to the store. Rows are kept unaggregated: the matcher applies
//! the same predicates to them that it renders as SQL on the live path.

use crate::db::frames::calibration_frames_of_kind;
use crate::models::{CalibrationFrame, CalibrationKind};
use afm_common::db::FrameKind;
use afm_common::Result;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::time::Instant;
use tracing::debug;

/// Immutable snapshot of all calibration rows
#[derive(Debug, Clone)]
pub struct CalibrationCache {
    darks: Vec<CalibrationFrame>,
    flats: Vec<CalibrationFrame>,
    bias: Vec<CalibrationFrame>,
    loaded_at: DateTime<Utc>,
}

impl CalibrationCache {
    /// Load darks, flats and bias from one consistent read snapshot
    pub async fn preload(pool: &SqlitePool) -> Result<Self> {
        let started = Instant::now();

        // One read transaction keeps the three queries on the same snapshot
        let mut tx = pool.begin().await?;
        let darks = calibration_frames_of_kind(&mut tx, FrameKind::Dark).await?;
        let flats = calibration_frames_of_kind(&mut tx, FrameKind::Flat).await?;
        let bias = calibration_frames_of_kind(&mut tx, FrameKind::Bias).await?;
        tx.commit().await?;

        debug!(
            darks = darks.len(),
            flats = flats.len(),
            bias = bias.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Calibration cache preloaded"
        );

        Ok(Self {
            darks,
            flats,
            bias,
            loaded_at: Utc::now(),
        })
    }

    /// Build a cache from rows already in memory (rows must be in id order)
    pub fn from_frames(frames: impl IntoIterator<Item = CalibrationFrame>) -> Self {
        let mut cache = Self {
            darks: Vec::new(),
            flats: Vec::new(),
            bias: Vec::new(),
            loaded_at: Utc::now(),
        };

        for frame in frames {
            match frame.kind {
                FrameKind::Dark => cache.darks.push(frame),
                FrameKind::Flat => cache.flats.push(frame),
                FrameKind::Bias => cache.bias.push(frame),
                FrameKind::Light => {}
            }
        }

        cache
    }

    /// Rows of one calibration type
    pub fn frames(&self, kind: CalibrationKind) -> &[CalibrationFrame] {
        match kind {
            CalibrationKind::Dark => &self.darks,
            CalibrationKind::Flat => &self.flats,
            CalibrationKind::Bias => &self.bias,
        }
    }

    pub fn len(&self) -> usize {
        self.darks.len() + self.flats.len() + self.bias.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }
}
