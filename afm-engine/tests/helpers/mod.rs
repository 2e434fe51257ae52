//! Catalog seeding utilities shared by the integration tests
#![allow(dead_code)]

use afm_common::db::ApprovalStatus;
use afm_common::{EngineConfig, MatcherConfig};
use afm_engine::db::{insert_frame, NewFrame};
use afm_engine::models::QualityUpdate;
use afm_engine::services::apply_quality_updates;
use afm_engine::Engine;
use sqlx::SqlitePool;
use uuid::Uuid;

pub const DATE: &str = "2024-11-15";

/// Engine over a fresh in-memory catalog
pub async fn test_engine(matcher: MatcherConfig) -> Engine {
    Engine::in_memory(EngineConfig {
        matcher,
        ..EngineConfig::default()
    })
    .await
    .unwrap()
}

fn unique_frame(dir: &str, imagetyp: &str) -> NewFrame {
    let id = Uuid::new_v4();
    NewFrame::new(
        id.to_string(),
        format!("/data/{}/{}.fits", dir, id),
        imagetyp,
    )
}

pub fn light(object: &str, filter: Option<&str>, date: &str) -> NewFrame {
    unique_frame(object, "Light Frame")
        .object(object)
        .filter(filter)
        .exposure(300.0)
        .temperature(Some(-10.0))
        .date(date)
}

pub fn dark(exposure: f64, temp: Option<f64>, date: &str) -> NewFrame {
    unique_frame("darks", "Dark Frame")
        .exposure(exposure)
        .temperature(temp)
        .date(date)
}

pub fn master_dark(exposure: f64, temp: Option<f64>, date: &str) -> NewFrame {
    unique_frame("masters", "Master Dark")
        .exposure(exposure)
        .temperature(temp)
        .date(date)
}

pub fn bias(temp: Option<f64>, date: &str) -> NewFrame {
    unique_frame("bias", "Bias Frame")
        .exposure(0.0)
        .temperature(temp)
        .date(date)
}

pub fn flat(filter: Option<&str>, temp: Option<f64>, date: &str) -> NewFrame {
    unique_frame("flats", "Flat Field")
        .filter(filter)
        .exposure(2.0)
        .temperature(temp)
        .date(date)
}

pub fn master_flat(filter: Option<&str>, temp: Option<f64>, date: &str) -> NewFrame {
    unique_frame("masters", "Master Flat")
        .filter(filter)
        .exposure(2.0)
        .temperature(temp)
        .date(date)
}

pub async fn seed(pool: &SqlitePool, frame: &NewFrame) -> i64 {
    let mut conn = pool.acquire().await.unwrap();
    insert_frame(&mut conn, frame).await.unwrap()
}

/// Insert `count` frames built by `make`, returning their file names
pub async fn seed_many(
    pool: &SqlitePool,
    count: usize,
    make: impl Fn() -> NewFrame,
) -> Vec<String> {
    let mut conn = pool.acquire().await.unwrap();
    let mut names = Vec::with_capacity(count);
    for _ in 0..count {
        let frame = make();
        insert_frame(&mut conn, &frame).await.unwrap();
        names.push(frame.filename());
    }
    names
}

/// Full dark/bias/flat coverage for a -10°C, 300s, Ha session on [`DATE`]
pub async fn seed_full_calibration(pool: &SqlitePool, count: usize) {
    seed_many(pool, count, || dark(300.0, Some(-10.0), DATE)).await;
    seed_many(pool, count, || bias(Some(-10.0), DATE)).await;
    seed_many(pool, count, || flat(Some("Ha"), Some(-10.0), DATE)).await;
}

/// Grade the named files through the quality ingest path
pub async fn grade(pool: &SqlitePool, filenames: &[String], approval: ApprovalStatus) {
    let updates: Vec<QualityUpdate> = filenames
        .iter()
        .map(|name| QualityUpdate::new(name.clone(), approval).with_fwhm(2.5).with_snr(40.0))
        .collect();
    apply_quality_updates(pool, &updates).await.unwrap();
}

/// Make every goal-counter update fail, simulating a store error late in a
/// multi-statement mutation
pub async fn fail_goal_updates(pool: &SqlitePool) {
    sqlx::query(
        r#"
        CREATE TRIGGER fail_goal_updates BEFORE UPDATE ON project_filter_goals
        BEGIN
            SELECT RAISE(ABORT, 'goal update rejected');
        END
        "#,
    )
    .execute(pool)
    .await
    .unwrap();
}

pub async fn allow_goal_updates(pool: &SqlitePool) {
    sqlx::query("DROP TRIGGER fail_goal_updates")
        .execute(pool)
        .await
        .unwrap();
}
