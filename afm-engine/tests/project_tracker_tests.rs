//! Project goal tracker integration tests

mod helpers;

use afm_common::db::{ApprovalStatus, ProjectStatus};
use afm_common::{Error, MatcherConfig};
use afm_engine::db::assignments;
use afm_engine::models::{FilterGoalSpec, NewProject, ProjectTemplate, ProjectUpdate, SessionIdentity};
use helpers::*;

fn new_project(name: &str, goals: Vec<FilterGoalSpec>) -> NewProject {
    NewProject {
        name: name.to_string(),
        object_name: "M31".to_string(),
        filter_goals: goals,
        ..NewProject::default()
    }
}

#[tokio::test]
async fn test_progress_counts_assigned_and_approved_frames() {
    let engine = test_engine(MatcherConfig::default()).await;
    let tracker = &engine.tracker;

    let project_id = tracker
        .create_project(&new_project(
            "M31 2024",
            vec![FilterGoalSpec::new(Some("Ha"), 90)],
        ))
        .await
        .unwrap();

    let names = seed_many(&engine.db, 40, || light("M31", Some("Ha"), DATE)).await;
    tracker
        .assign_session_to_project(project_id, DATE, "M31", Some("Ha"))
        .await
        .unwrap();
    grade(&engine.db, &names[..10], ApprovalStatus::Approved).await;

    let progress = tracker.get_project_progress(project_id).await.unwrap();
    let ha = &progress.goals[0];
    assert_eq!(ha.total, 40);
    assert_eq!(ha.approved, 10);
    assert_eq!(ha.remaining, 50);
    assert_eq!(ha.approved_remaining, 80);
    assert_eq!(ha.avg_fwhm, Some(2.5));
    assert!((progress.completion_percent - 100.0 * 10.0 / 90.0).abs() < 1e-9);

    let sessions = tracker.get_project_sessions(project_id).await.unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].session_id, format!("{}_M31_Ha", DATE));
    assert_eq!(sessions[0].frame_count, 40);
    assert_eq!(sessions[0].approved_count, 10);
    assert!(!sessions[0].graded);
}

#[tokio::test]
async fn test_grading_before_assignment_is_counted() {
    let engine = test_engine(MatcherConfig::default()).await;
    let tracker = &engine.tracker;

    let names = seed_many(&engine.db, 6, || light("M31", Some("OIII"), DATE)).await;
    grade(&engine.db, &names[..4], ApprovalStatus::Approved).await;
    grade(&engine.db, &names[4..], ApprovalStatus::Rejected).await;

    let project_id = tracker
        .create_project_from_template("M31 SHO", "M31", ProjectTemplate::Narrowband)
        .await
        .unwrap();
    tracker
        .assign_session_to_project(project_id, DATE, "M31", Some("OIII"))
        .await
        .unwrap();

    let goals = tracker.get_filter_goals(project_id).await.unwrap();
    assert_eq!(goals.len(), 3);
    let oiii = goals.iter().find(|g| g.filter.as_deref() == Some("OIII")).unwrap();
    assert_eq!((oiii.total, oiii.approved), (6, 4));

    let assignment = tracker
        .get_session_assignment(DATE, "M31", Some("OIII"))
        .await
        .unwrap()
        .unwrap();
    assert!(assignment.graded);
    assert_eq!(assignment.rejected_count, 2);
}

#[tokio::test]
async fn test_recalculate_is_idempotent() {
    let engine = test_engine(MatcherConfig::default()).await;
    let tracker = &engine.tracker;

    let project_id = tracker
        .create_project(&new_project(
            "M31 LRGB",
            vec![FilterGoalSpec::new(Some("L"), 100), FilterGoalSpec::new(Some("R"), 30)],
        ))
        .await
        .unwrap();
    seed_many(&engine.db, 12, || light("M31", Some("L"), DATE)).await;
    tracker
        .assign_session_to_project(project_id, DATE, "M31", Some("L"))
        .await
        .unwrap();

    let first = tracker.recalculate_project_counts(project_id).await.unwrap();
    let second = tracker.recalculate_project_counts(project_id).await.unwrap();

    let counts = |goals: &[afm_engine::models::FilterGoal]| {
        goals
            .iter()
            .map(|g| (g.filter.clone(), g.total_count, g.approved_count))
            .collect::<Vec<_>>()
    };
    assert_eq!(counts(&first), counts(&second));
    assert_eq!(counts(&first)[0], (Some("L".to_string()), 12, 0));
    assert_eq!(counts(&first)[1], (Some("R".to_string()), 0, 0));
}

#[tokio::test]
async fn test_null_filter_goal_is_distinct_from_empty_filter() {
    let engine = test_engine(MatcherConfig::default()).await;
    let tracker = &engine.tracker;

    let project_id = tracker
        .create_project(&new_project(
            "Comet",
            vec![FilterGoalSpec::new(None, 20), FilterGoalSpec::new(Some(""), 20)],
        ))
        .await
        .unwrap();

    seed_many(&engine.db, 5, || light("M31", None, DATE)).await;
    seed_many(&engine.db, 3, || light("M31", Some(""), DATE)).await;
    tracker
        .assign_session_to_project(project_id, DATE, "M31", None)
        .await
        .unwrap();
    tracker
        .assign_session_to_project(project_id, DATE, "M31", Some(""))
        .await
        .unwrap();

    let goals = tracker.get_filter_goals(project_id).await.unwrap();
    assert_eq!(goals[0].filter, None);
    assert_eq!(goals[0].total, 5);
    assert_eq!(goals[0].filter_label(), "No Filter");
    assert_eq!(goals[1].filter.as_deref(), Some(""));
    assert_eq!(goals[1].total, 3);
}

#[tokio::test]
async fn test_invalid_projects_are_rejected() {
    let engine = test_engine(MatcherConfig::default()).await;
    let tracker = &engine.tracker;

    let err = tracker.create_project(&new_project("  ", vec![])).await.unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));

    let err = tracker
        .create_project(&new_project("M31", vec![FilterGoalSpec::new(Some("Ha"), 0)]))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));

    tracker.create_project(&new_project("M31", vec![])).await.unwrap();
    let err = tracker.create_project(&new_project("M31", vec![])).await.unwrap_err();
    assert!(matches!(err, Error::DuplicateName(name) if name == "M31"));

    assert_eq!(tracker.list_projects(None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_session_belongs_to_one_project() {
    let engine = test_engine(MatcherConfig::default()).await;
    let tracker = &engine.tracker;

    let first = tracker.create_project(&new_project("A", vec![])).await.unwrap();
    let second = tracker.create_project(&new_project("B", vec![])).await.unwrap();
    seed_many(&engine.db, 4, || light("M31", Some("Ha"), DATE)).await;

    tracker
        .assign_session_to_project(first, DATE, "M31", Some("Ha"))
        .await
        .unwrap();

    for project in [first, second] {
        let err = tracker
            .assign_session_to_project(project, DATE, "M31", Some("Ha"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyAssigned(_)));
    }

    let err = tracker
        .assign_session_to_project(first, "2024-01-01", "M31", Some("Ha"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));

    let err = tracker
        .assign_session_to_project(999, DATE, "M31", Some("Ha"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn test_no_filter_session_is_distinct_from_filter_named_no_filter() {
    let engine = test_engine(MatcherConfig::default()).await;
    let tracker = &engine.tracker;

    let project_id = tracker
        .create_project(&new_project("M31 Wide", vec![]))
        .await
        .unwrap();
    seed_many(&engine.db, 4, || light("M31", None, DATE)).await;
    seed_many(&engine.db, 6, || light("M31", Some("NoFilter"), DATE)).await;

    let unfiltered = tracker
        .assign_session_to_project(project_id, DATE, "M31", None)
        .await
        .unwrap();
    let named = tracker
        .assign_session_to_project(project_id, DATE, "M31", Some("NoFilter"))
        .await
        .unwrap();
    assert_ne!(unfiltered, named);

    let sessions = tracker.get_project_sessions(project_id).await.unwrap();
    let counts: Vec<(Option<String>, i64)> = sessions
        .iter()
        .map(|s| (s.filter.clone(), s.frame_count))
        .collect();
    assert!(counts.contains(&(None, 4)));
    assert!(counts.contains(&(Some("NoFilter".to_string()), 6)));

    // The identity index backs up the lookup inside assign
    let identity = SessionIdentity::new(DATE, "M31", None);
    let mut conn = engine.db.acquire().await.unwrap();
    let err = assignments::insert_assignment(&mut conn, project_id, &identity, 4, "2024-11-16T00:00:00Z")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::AlreadyAssigned(_)));
}

#[tokio::test]
async fn test_failed_assign_leaves_nothing_behind() {
    let engine = test_engine(MatcherConfig::default()).await;
    let tracker = &engine.tracker;

    let project_id = tracker
        .create_project(&new_project("M31", vec![FilterGoalSpec::new(Some("Ha"), 90)]))
        .await
        .unwrap();
    seed_many(&engine.db, 8, || light("M31", Some("Ha"), DATE)).await;

    fail_goal_updates(&engine.db).await;
    let err = tracker
        .assign_session_to_project(project_id, DATE, "M31", Some("Ha"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Database(_)));

    assert!(tracker
        .get_session_assignment(DATE, "M31", Some("Ha"))
        .await
        .unwrap()
        .is_none());
    assert!(tracker.get_project_sessions(project_id).await.unwrap().is_empty());
    let unassigned = tracker.get_unassigned_sessions(Some("M31")).await.unwrap();
    assert_eq!(unassigned.len(), 1);
    assert_eq!(unassigned[0].unassigned_count, 8);

    // Nothing half-applied, so a retry succeeds
    allow_goal_updates(&engine.db).await;
    tracker
        .assign_session_to_project(project_id, DATE, "M31", Some("Ha"))
        .await
        .unwrap();
    assert_eq!(tracker.get_filter_goals(project_id).await.unwrap()[0].total, 8);
}

#[tokio::test]
async fn test_failed_unassign_keeps_assignment() {
    let engine = test_engine(MatcherConfig::default()).await;
    let tracker = &engine.tracker;

    let project_id = tracker
        .create_project(&new_project("M31", vec![FilterGoalSpec::new(Some("Ha"), 90)]))
        .await
        .unwrap();
    seed_many(&engine.db, 8, || light("M31", Some("Ha"), DATE)).await;
    tracker
        .assign_session_to_project(project_id, DATE, "M31", Some("Ha"))
        .await
        .unwrap();

    fail_goal_updates(&engine.db).await;
    assert!(tracker
        .unassign_session_from_project(DATE, "M31", Some("Ha"))
        .await
        .is_err());
    allow_goal_updates(&engine.db).await;

    assert!(tracker
        .get_session_assignment(DATE, "M31", Some("Ha"))
        .await
        .unwrap()
        .is_some());
    assert!(tracker.get_unassigned_sessions(Some("M31")).await.unwrap().is_empty());
    let goals = tracker.recalculate_project_counts(project_id).await.unwrap();
    assert_eq!(goals[0].total_count, 8);
}

#[tokio::test]
async fn test_unassign_restores_counts() {
    let engine = test_engine(MatcherConfig::default()).await;
    let tracker = &engine.tracker;

    let project_id = tracker
        .create_project(&new_project("M31", vec![FilterGoalSpec::new(Some("Ha"), 90)]))
        .await
        .unwrap();
    seed_many(&engine.db, 8, || light("M31", Some("Ha"), DATE)).await;

    assert!(!tracker
        .unassign_session_from_project(DATE, "M31", Some("Ha"))
        .await
        .unwrap());

    tracker
        .assign_session_to_project(project_id, DATE, "M31", Some("Ha"))
        .await
        .unwrap();
    assert!(tracker.get_unassigned_sessions(Some("M31")).await.unwrap().is_empty());

    assert!(tracker
        .unassign_session_from_project(DATE, "M31", Some("Ha"))
        .await
        .unwrap());

    let goals = tracker.get_filter_goals(project_id).await.unwrap();
    assert_eq!(goals[0].total, 0);
    assert!(tracker.get_project_sessions(project_id).await.unwrap().is_empty());
    assert_eq!(tracker.get_unassigned_sessions(None).await.unwrap().len(), 1);

    // Reassigning after unassign is allowed
    tracker
        .assign_session_to_project(project_id, DATE, "M31", Some("Ha"))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_delete_project_unlinks_frames() {
    let engine = test_engine(MatcherConfig::default()).await;
    let tracker = &engine.tracker;

    let project_id = tracker
        .create_project(&new_project("M31", vec![FilterGoalSpec::new(Some("Ha"), 90)]))
        .await
        .unwrap();
    seed_many(&engine.db, 8, || light("M31", Some("Ha"), DATE)).await;
    tracker
        .assign_session_to_project(project_id, DATE, "M31", Some("Ha"))
        .await
        .unwrap();

    tracker.delete_project(project_id).await.unwrap();

    assert!(matches!(
        tracker.get_project(project_id).await,
        Err(Error::NotFound(_))
    ));
    assert!(tracker
        .get_session_assignment(DATE, "M31", Some("Ha"))
        .await
        .unwrap()
        .is_none());
    let unassigned = tracker.get_unassigned_sessions(None).await.unwrap();
    assert_eq!(unassigned.len(), 1);
    assert_eq!(unassigned[0].unassigned_count, 8);

    assert!(matches!(
        tracker.delete_project(project_id).await,
        Err(Error::NotFound(_))
    ));
}

#[tokio::test]
async fn test_update_project_and_goals() {
    let engine = test_engine(MatcherConfig::default()).await;
    let tracker = &engine.tracker;

    let project_id = tracker
        .create_project(&new_project("M31", vec![FilterGoalSpec::new(Some("Ha"), 90)]))
        .await
        .unwrap();
    tracker.create_project(&new_project("M42", vec![])).await.unwrap();
    seed_many(&engine.db, 8, || light("M31", Some("OIII"), DATE)).await;
    tracker
        .assign_session_to_project(project_id, DATE, "M31", Some("OIII"))
        .await
        .unwrap();

    let updated = tracker
        .update_project(
            project_id,
            &ProjectUpdate {
                description: Some("Andromeda mosaic".to_string()),
                ..ProjectUpdate::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.description.as_deref(), Some("Andromeda mosaic"));

    let err = tracker
        .update_project(
            project_id,
            &ProjectUpdate {
                name: Some("M42".to_string()),
                ..ProjectUpdate::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::DuplicateName(_)));

    tracker
        .update_project_status(project_id, ProjectStatus::Completed)
        .await
        .unwrap();
    let completed = tracker
        .list_projects(Some(ProjectStatus::Completed))
        .await
        .unwrap();
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].id, project_id);

    tracker
        .update_filter_goals(
            project_id,
            &[FilterGoalSpec::new(Some("OIII"), 60), FilterGoalSpec::new(Some("Ha"), 90)],
        )
        .await
        .unwrap();
    let goals = tracker.get_filter_goals(project_id).await.unwrap();
    assert_eq!(goals[0].filter.as_deref(), Some("OIII"));
    assert_eq!((goals[0].total, goals[0].remaining), (8, 52));
    assert_eq!(goals[1].total, 0);

    let found = tracker.get_project_by_name("M31").await.unwrap().unwrap();
    assert_eq!(found.status, ProjectStatus::Completed);
}

#[tokio::test]
async fn test_import_master_frames() {
    let engine = test_engine(MatcherConfig::default()).await;
    let tracker = &engine.tracker;

    let project_id = tracker.create_project(&new_project("M31", vec![])).await.unwrap();
    let master = seed(&engine.db, &master_dark(300.0, Some(-10.0), DATE)).await;
    let raw = seed(&engine.db, &dark(300.0, Some(-10.0), DATE)).await;

    let stats = tracker
        .import_master_frames(project_id, &[master, raw])
        .await
        .unwrap();
    assert_eq!(stats.imported, 1);
    assert_eq!(stats.skipped_not_master, 1);

    let again = tracker.import_master_frames(project_id, &[master]).await.unwrap();
    assert_eq!(again.imported, 0);
    assert_eq!(again.already_present, 1);

    let masters = tracker.get_master_frames(project_id).await.unwrap();
    assert_eq!(masters.len(), 1);
    assert_eq!(masters[0].frame_type, "Master Dark");
    assert_eq!(masters[0].binning.as_deref(), Some("1x1"));

    let summary = tracker.master_frame_summary(project_id).await.unwrap();
    assert_eq!((summary.darks, summary.total()), (1, 1));

    // Unknown file id rolls back the whole import
    let flat_master = seed(&engine.db, &master_flat(Some("Ha"), Some(-10.0), DATE)).await;
    let err = tracker
        .import_master_frames(project_id, &[flat_master, 9_999])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
    assert_eq!(tracker.get_master_frames(project_id).await.unwrap().len(), 1);
}
