//! afm-engine - command-line front end
//!
//! Calibration review and project progress tracking over a frame catalog
//! populated by the frame manager's importer.

use std::path::PathBuf;

use afm_common::config::{resolve_config, resolve_database_path, CONFIG_ENV_VAR, DATABASE_ENV_VAR};
use afm_common::db::ProjectStatus;
use afm_engine::models::{
    FilterGoalSpec, NewProject, ProjectTemplate, QualityUpdate, SessionFilter, SessionIdentity,
};
use afm_engine::services::{
    apply_quality_updates, catalog_statistics, get_session, list_sessions, render_session,
    render_summary,
};
use afm_engine::utils::retry_on_lock;
use afm_engine::Engine;
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for afm-engine
#[derive(Parser, Debug)]
#[command(name = "afm-engine")]
#[command(about = "Calibration matching and project progress for an astronomical frame catalog")]
#[command(version)]
struct Args {
    /// Config file (TOML); falls back to $AFM_CONFIG, then the user config dir
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Catalog database; falls back to $AFM_DATABASE, then the config file
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Catalog frame counts
    Stats,

    /// List light sessions
    Sessions {
        #[arg(long)]
        object: Option<String>,
        /// Only sessions with frames not linked to a project
        #[arg(long)]
        unassigned: bool,
    },

    /// Review calibration coverage of every session
    Review {
        #[arg(long)]
        object: Option<String>,
        #[arg(long)]
        json: bool,
    },

    /// Calibration report for one session
    Check {
        #[arg(long)]
        date: String,
        #[arg(long)]
        object: String,
        #[arg(long)]
        filter: Option<String>,
    },

    /// List projects
    Projects {
        #[arg(long)]
        status: Option<ProjectStatus>,
    },

    /// Create a project with filter goals
    CreateProject {
        #[arg(long)]
        name: String,
        #[arg(long)]
        object: String,
        #[arg(long)]
        description: Option<String>,
        /// narrowband (Ha/OIII/SII), broadband (LRGB) or custom
        #[arg(long)]
        template: Option<ProjectTemplate>,
        /// Extra or overriding goal as FILTER=COUNT; `=COUNT` targets unfiltered frames
        #[arg(long = "goal")]
        goals: Vec<FilterGoalSpec>,
    },

    /// Link a session's light frames to a project
    Assign {
        #[arg(long)]
        project: i64,
        #[arg(long)]
        date: String,
        #[arg(long)]
        object: String,
        #[arg(long)]
        filter: Option<String>,
    },

    /// Remove a session from its project
    Unassign {
        #[arg(long)]
        date: String,
        #[arg(long)]
        object: String,
        #[arg(long)]
        filter: Option<String>,
    },

    /// Show per-filter progress of a project
    Progress {
        #[arg(long)]
        project: i64,
    },

    /// Recompute a project's goal counts from the catalog
    Recalculate {
        #[arg(long)]
        project: i64,
    },

    /// Apply grading results from a JSON array of quality updates
    Grade {
        #[arg(long)]
        file: PathBuf,
    },

    /// Attach master calibration frames to a project
    ImportMasters {
        #[arg(long)]
        project: i64,
        #[arg(long = "file-id", required = true, num_args = 1..)]
        file_ids: Vec<i64>,
    },
}

/// Template goals first; explicit goals replace a template goal of the same filter
fn merge_goals(template: Option<ProjectTemplate>, explicit: Vec<FilterGoalSpec>) -> Vec<FilterGoalSpec> {
    let mut goals = template.map(|t| t.filter_goals()).unwrap_or_default();
    for spec in explicit {
        match goals.iter_mut().find(|g| g.filter == spec.filter) {
            Some(existing) => existing.target_count = spec.target_count,
            None => goals.push(spec),
        }
    }
    goals
}

fn fmt_opt(value: Option<f64>, precision: usize) -> String {
    value
        .map(|v| format!("{:.*}", precision, v))
        .unwrap_or_else(|| "-".to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "afm_engine=info,afm_common=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    let config = resolve_config(args.config.as_deref(), CONFIG_ENV_VAR)
        .context("Failed to load configuration")?;
    let db_path = resolve_database_path(args.database.as_deref(), DATABASE_ENV_VAR, &config);
    info!("Catalog: {}", db_path.display());

    let engine = Engine::open(&db_path, config)
        .await
        .with_context(|| format!("Failed to open catalog {}", db_path.display()))?;
    let max_wait = engine.config.max_lock_wait_ms;

    match args.command {
        Command::Stats => {
            let mut conn = engine.db.acquire().await?;
            let stats = catalog_statistics(&mut conn).await?;
            println!("Total frames:  {}", stats.total_frames);
            println!("Light frames:  {}", stats.lights);
            println!(
                "Darks:         {} ({} master)",
                stats.darks, stats.master_darks
            );
            println!("Flats:         {} ({} master)", stats.flats, stats.master_flats);
            println!("Bias:          {} ({} master)", stats.bias, stats.master_bias);
            println!("Unclassified:  {}", stats.unclassified);
            println!("Objects:       {}", stats.objects);
            println!("Sessions:      {}", stats.sessions);
            println!(
                "Graded:        {} ({} approved, {} rejected)",
                stats.graded, stats.approved, stats.rejected
            );
        }

        Command::Sessions { object, unassigned } => {
            let filter = SessionFilter {
                object,
                unassigned_only: unassigned,
                ..SessionFilter::default()
            };
            let mut conn = engine.db.acquire().await?;
            let sessions = list_sessions(&mut conn, &filter).await?;
            for session in &sessions {
                println!(
                    "{:<40} {:>5} frames  exp {:>7}s  temp {:>6}  fwhm {:>5}  graded {:>4}  {}",
                    session.identity.session_id(),
                    session.frame_count,
                    fmt_opt(session.avg_exposure, 1),
                    fmt_opt(session.avg_temp, 1),
                    fmt_opt(session.avg_fwhm, 2),
                    session.graded_count(),
                    session
                        .project_id
                        .map(|id| format!("project {}", id))
                        .unwrap_or_default()
                );
            }
            println!("{} session(s)", sessions.len());
        }

        Command::Review { object, json } => {
            let ticket = engine.reviewer.request(SessionFilter {
                object,
                ..SessionFilter::default()
            });
            let Some(outcome) = ticket.outcome().await? else {
                bail!("Batch review was cancelled");
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&*outcome)?);
            } else {
                for review in &outcome.reviews {
                    print!("{}", render_session(&review.session, &review.calibration));
                }
                print!("{}", render_summary(&outcome.summary));
            }
        }

        Command::Check { date, object, filter } => {
            let identity = SessionIdentity::new(date, object, filter.as_deref());
            let session = {
                let mut conn = engine.db.acquire().await?;
                get_session(&mut conn, &identity).await?
            };
            let Some(session) = session else {
                bail!("No light frames for session {}", identity.session_id());
            };
            let review = engine.matcher.check_session(&session.profile()).await?;
            print!("{}", render_session(&session, &review));
        }

        Command::Projects { status } => {
            let projects = engine.tracker.list_projects(status).await?;
            for project in &projects {
                println!(
                    "{:>4}  {:<30} {:<20} {}",
                    project.id, project.name, project.object_name, project.status
                );
            }
            println!("{} project(s)", projects.len());
        }

        Command::CreateProject {
            name,
            object,
            description,
            template,
            goals,
        } => {
            let new = NewProject {
                name,
                object_name: object,
                description,
                filter_goals: merge_goals(template, goals),
                ..NewProject::default()
            };
            let tracker = &engine.tracker;
            let new = &new;
            let project_id =
                retry_on_lock("create project", max_wait, || tracker.create_project(new)).await?;
            println!("Created project {} ({})", new.name, project_id);
        }

        Command::Assign {
            project,
            date,
            object,
            filter,
        } => {
            let tracker = &engine.tracker;
            let (date, object, filter) = (date.as_str(), object.as_str(), filter.as_deref());
            let assignment_id = retry_on_lock("assign session", max_wait, || {
                tracker.assign_session_to_project(project, date, object, filter)
            })
            .await?;
            println!("Assigned session to project {} (assignment {})", project, assignment_id);
        }

        Command::Unassign { date, object, filter } => {
            let tracker = &engine.tracker;
            let (date, object, filter) = (date.as_str(), object.as_str(), filter.as_deref());
            let removed = retry_on_lock("unassign session", max_wait, || {
                tracker.unassign_session_from_project(date, object, filter)
            })
            .await?;
            if removed {
                println!("Session unassigned");
            } else {
                println!("Session was not assigned to a project");
            }
        }

        Command::Progress { project } => {
            let progress = engine.tracker.get_project_progress(project).await?;
            println!(
                "{} ({}) - {}",
                progress.project.name, progress.project.object_name, progress.project.status
            );
            for goal in &progress.goals {
                println!(
                    "  {:<10} {:>4}/{:<4} total  {:>4} approved  {:>4} to go  fwhm {:>5}  snr {:>6}",
                    goal.filter_label(),
                    goal.total,
                    goal.target,
                    goal.approved,
                    goal.approved_remaining,
                    fmt_opt(goal.avg_fwhm, 2),
                    fmt_opt(goal.avg_snr, 1)
                );
            }
            println!("Completion: {:.1}%", progress.completion_percent);
        }

        Command::Recalculate { project } => {
            let tracker = &engine.tracker;
            let goals = retry_on_lock("recalculate project", max_wait, || {
                tracker.recalculate_project_counts(project)
            })
            .await?;
            for goal in &goals {
                println!(
                    "  {:<10} {}/{} ({} approved)",
                    goal.filter.as_deref().unwrap_or("No Filter"),
                    goal.total_count,
                    goal.target_count,
                    goal.approved_count
                );
            }
        }

        Command::Grade { file } => {
            let content = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let updates: Vec<QualityUpdate> =
                serde_json::from_str(&content).context("Invalid quality update JSON")?;

            let (pool, updates) = (&engine.db, updates.as_slice());
            let stats =
                retry_on_lock("apply grading", max_wait, || apply_quality_updates(pool, updates))
                    .await?;
            println!(
                "Graded {} of {} file(s): {} approved, {} rejected, {} not found; {} project(s) updated",
                stats.matched,
                stats.total,
                stats.approved,
                stats.rejected,
                stats.not_found,
                stats.updated_projects.len()
            );
        }

        Command::ImportMasters { project, file_ids } => {
            let tracker = &engine.tracker;
            let file_ids = file_ids.as_slice();
            let stats = retry_on_lock("import master frames", max_wait, || {
                tracker.import_master_frames(project, file_ids)
            })
            .await?;
            println!(
                "Imported {} master frame(s); {} already attached, {} not masters",
                stats.imported, stats.already_present, stats.skipped_not_master
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_goals_override_template() {
        let goals = merge_goals(
            Some(ProjectTemplate::Narrowband),
            vec!["Ha=120".parse().unwrap(), "=30".parse().unwrap()],
        );
        assert_eq!(goals.len(), 4);
        assert_eq!(goals[0], FilterGoalSpec::new(Some("Ha"), 120));
        assert_eq!(goals[3], FilterGoalSpec::new(None, 30));
    }

    #[test]
    fn test_cli_parses_goals() {
        let args = Args::try_parse_from([
            "afm-engine",
            "create-project",
            "--name",
            "M31 2024",
            "--object",
            "M31",
            "--goal",
            "L=100",
            "--goal",
            "Ha=60",
        ])
        .unwrap();
        match args.command {
            Command::CreateProject { goals, template, .. } => {
                assert!(template.is_none());
                assert_eq!(goals.len(), 2);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
