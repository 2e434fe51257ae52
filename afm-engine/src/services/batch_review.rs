//! Batch session review
//!
//! Reviews many sessions against one preloaded calibration snapshot in a
//! background task. Each request supersedes the previous one: the older task
//! is cancelled and anything it still produces is discarded, so callers only
//! ever observe the outcome of the newest request.

use crate::models::{ReviewSummary, SessionCalibration, SessionFilter, SessionSummary};
use crate::services::calibration_matcher::CalibrationMatcher;
use crate::services::session_aggregator::list_sessions;
use afm_common::{MatcherConfig, Result};
use serde::Serialize;
use sqlx::SqlitePool;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Sessions reviewed between cooperative yields
const YIELD_EVERY: usize = 64;

/// One session and its calibration review
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionReview {
    pub session: SessionSummary,
    pub calibration: SessionCalibration,
}

/// Result of one completed batch review
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchReviewOutcome {
    pub request_id: Uuid,
    pub generation: u64,
    pub reviews: Vec<SessionReview>,
    pub summary: ReviewSummary,
}

#[derive(Debug)]
struct InFlight {
    generation: u64,
    token: CancellationToken,
}

type Delivery = Result<Option<Arc<BatchReviewOutcome>>>;

/// Handle to one requested review
#[derive(Debug)]
pub struct ReviewTicket {
    request_id: Uuid,
    generation: u64,
    receiver: oneshot::Receiver<Delivery>,
    in_flight: Arc<Mutex<InFlight>>,
}

impl ReviewTicket {
    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Wait for this request's outcome
    ///
    /// Yields `Ok(None)` when the request was cancelled or superseded by a
    /// newer one, even if its task had already finished.
    pub async fn outcome(self) -> Delivery {
        let delivered = match self.receiver.await {
            Ok(delivered) => delivered,
            // Task dropped its sender after cancellation
            Err(_) => return Ok(None),
        };

        let current = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .generation;
        if current != self.generation {
            debug!(
                request_id = %self.request_id,
                generation = self.generation,
                current,
                "Discarding superseded review outcome"
            );
            return Ok(None);
        }

        delivered
    }
}

/// Runs batch reviews, newest request wins
#[derive(Debug)]
pub struct BatchReviewer {
    pool: SqlitePool,
    matcher: CalibrationMatcher,
    in_flight: Arc<Mutex<InFlight>>,
    latest: Arc<watch::Sender<Option<Arc<BatchReviewOutcome>>>>,
}

impl BatchReviewer {
    pub fn new(pool: SqlitePool, config: MatcherConfig) -> Self {
        let matcher = CalibrationMatcher::new(pool.clone(), config);
        let (latest, _) = watch::channel(None);
        Self {
            pool,
            matcher,
            in_flight: Arc::new(Mutex::new(InFlight {
                generation: 0,
                token: CancellationToken::new(),
            })),
            latest: Arc::new(latest),
        }
    }

    /// Start a review of the sessions selected by `filter`
    ///
    /// Cancels any review still running.
    pub fn request(&self, filter: SessionFilter) -> ReviewTicket {
        let request_id = Uuid::new_v4();
        let token = CancellationToken::new();

        let generation = {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            in_flight.token.cancel();
            in_flight.generation += 1;
            in_flight.token = token.clone();
            self.latest.send_replace(None);
            in_flight.generation
        };

        info!(%request_id, generation, "Starting batch review");

        let (sender, receiver) = oneshot::channel();
        let pool = self.pool.clone();
        let matcher = self.matcher.clone();
        let in_flight = Arc::clone(&self.in_flight);
        let latest = Arc::clone(&self.latest);

        tokio::spawn(async move {
            let result = run_review(&pool, &matcher, &filter, &token).await;

            let delivery = match result {
                Ok(Some((reviews, summary))) => {
                    let outcome = Arc::new(BatchReviewOutcome {
                        request_id,
                        generation,
                        reviews,
                        summary,
                    });

                    let guard = in_flight.lock().unwrap_or_else(PoisonError::into_inner);
                    if guard.generation != generation || token.is_cancelled() {
                        debug!(%request_id, generation, "Review superseded before delivery");
                        return;
                    }
                    latest.send_replace(Some(Arc::clone(&outcome)));
                    drop(guard);

                    info!(
                        %request_id,
                        generation,
                        sessions = outcome.summary.total,
                        complete = outcome.summary.complete,
                        "Batch review completed"
                    );
                    Ok(Some(outcome))
                }
                Ok(None) => {
                    debug!(%request_id, generation, "Batch review cancelled");
                    return;
                }
                Err(e) => {
                    warn!(%request_id, generation, error = %e, "Batch review failed");
                    Err(e)
                }
            };

            // Receiver may already be gone
            let _ = sender.send(delivery);
        });

        ReviewTicket {
            request_id,
            generation,
            receiver,
            in_flight: Arc::clone(&self.in_flight),
        }
    }

    /// Cancel the running review, if any
    pub fn cancel(&self) {
        let in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if !in_flight.token.is_cancelled() {
            info!(generation = in_flight.generation, "Cancelling batch review");
            in_flight.token.cancel();
        }
    }

    /// Newest completed outcome; cleared whenever a new request starts
    pub fn latest(&self) -> watch::Receiver<Option<Arc<BatchReviewOutcome>>> {
        self.latest.subscribe()
    }

    /// Generation of the most recent request
    pub fn generation(&self) -> u64 {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .generation
    }
}

/// Preload once, then evaluate every session against the snapshot
///
/// `Ok(None)` means the token was cancelled along the way.
async fn run_review(
    pool: &SqlitePool,
    matcher: &CalibrationMatcher,
    filter: &SessionFilter,
    token: &CancellationToken,
) -> Result<Option<(Vec<SessionReview>, ReviewSummary)>> {
    let cache = tokio::select! {
        biased;
        _ = token.cancelled() => return Ok(None),
        cache = matcher.preload_calibration_data() => cache?,
    };

    let sessions = tokio::select! {
        biased;
        _ = token.cancelled() => return Ok(None),
        sessions = async {
            let mut conn = pool.acquire().await?;
            list_sessions(&mut conn, filter).await
        } => sessions?,
    };

    debug!(
        sessions = sessions.len(),
        calibration_frames = cache.len(),
        "Reviewing sessions against calibration snapshot"
    );

    let mut calibrations = Vec::with_capacity(sessions.len());
    for (i, session) in sessions.iter().enumerate() {
        if token.is_cancelled() {
            return Ok(None);
        }
        calibrations.push(matcher.check_session_cached(&session.profile(), &cache));

        if (i + 1) % YIELD_EVERY == 0 {
            tokio::task::yield_now().await;
        }
    }

    if token.is_cancelled() {
        return Ok(None);
    }

    let summary = ReviewSummary::from_reviews(&calibrations);
    let reviews = sessions
        .into_iter()
        .zip(calibrations)
        .map(|(session, calibration)| SessionReview {
            session,
            calibration,
        })
        .collect();

    Ok(Some((reviews, summary)))
}
