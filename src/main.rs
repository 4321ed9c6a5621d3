use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tracing::info;

mod clock;
mod config;
mod db;
mod models;
mod notify;
mod policy;
mod report;
mod scheduler;
mod store;
mod templating;

use clock::{Clock, FixedClock, SystemClock};
use db::PgStore;
use notify::{EmailNotifier, LogNotifier, Notifier};
use scheduler::{EnrollmentLifecycleScheduler, FailureKind};
use store::EnrollmentStore;
use templating::TemplateRenderer;

#[derive(Parser)]
#[command(name = "enrollment-lifecycle")]
#[command(about = "Course reminder and re-enrollment scheduler for Group Scholar", long_about = None)]
struct Cli {
    /// Postgres connection string
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    database_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed data
    Seed,
    /// Import enrollments from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Send due reminders and re-enroll lapsed completions
    Run {
        /// Evaluate as of this RFC 3339 timestamp instead of the current time
        #[arg(long)]
        now: Option<String>,
        /// Log emails instead of sending them
        #[arg(long)]
        log_only: bool,
        /// Also write a markdown summary of the run
        #[arg(long)]
        summary_out: Option<PathBuf>,
        #[command(flatten)]
        mail: config::MailArgs,
    },
    /// Generate a markdown report of enrollment status
    Report {
        #[arg(long)]
        now: Option<String>,
        #[arg(long)]
        course: Option<String>,
        #[arg(long, default_value = "lifecycle-report.md")]
        out: PathBuf,
    },
}

fn clock_for(now: Option<&str>) -> anyhow::Result<Box<dyn Clock>> {
    match now {
        Some(value) => {
            let instant = clock::parse_now(value)
                .with_context(|| format!("--now must be an RFC 3339 timestamp, got '{value}'"))?;
            Ok(Box::new(FixedClock(instant)))
        }
        None => Ok(Box::new(SystemClock)),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&cli.database_url)
        .await
        .context("failed to connect to Postgres")?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::Import { csv } => {
            let inserted = db::import_csv(&pool, &csv).await?;
            println!("Inserted {inserted} enrollments from {}.", csv.display());
        }
        Commands::Run {
            now,
            log_only,
            summary_out,
            mail,
        } => {
            let now = clock_for(now.as_deref())?.now();
            let store = PgStore::new(pool);
            let notifier: Box<dyn Notifier> = if log_only {
                Box::new(LogNotifier)
            } else {
                Box::new(EmailNotifier::from_config(&mail.smtp())?)
            };
            info!(%now, channel = notifier.channel_name(), "starting lifecycle pass");

            let scheduler = EnrollmentLifecycleScheduler::new(
                &store,
                &store,
                notifier.as_ref(),
                TemplateRenderer::new()?,
            )
            .with_send_timeout(mail.send_timeout());
            let summary = scheduler.run(now).await?;

            if log_only {
                for event in &summary.emitted {
                    println!("{}", serde_json::to_string(event)?);
                }
            }

            println!(
                "Re-enrolled {} learners and sent {} of {} emails across {} courses.",
                summary.re_enrollments,
                summary.notifications_sent,
                summary.emitted.len(),
                summary.courses_eligible
            );
            if !summary.failures.is_empty() {
                println!(
                    "Failures: {} policy, {} persistence, {} dispatch (see logs).",
                    summary.failures_of(FailureKind::PolicyLookup),
                    summary.failures_of(FailureKind::Persistence),
                    summary.failures_of(FailureKind::Dispatch)
                );
            }

            if let Some(out) = summary_out {
                std::fs::write(&out, report::build_run_report(now, &summary))?;
                println!("Run summary written to {}.", out.display());
            }
        }
        Commands::Report { now, course, out } => {
            let now = clock_for(now.as_deref())?.now();
            let store = PgStore::new(pool);
            let mut eligible = scheduler::eligible_courses(&store, now).await?;
            if let Some(course_id) = course.as_deref() {
                eligible.courses.retain(|id, _| id == course_id);
                eligible.failures.retain(|f| f.course_id == course_id);
            }

            let course_ids = eligible.course_ids();
            let mut enrollments = Vec::new();
            if !course_ids.is_empty() {
                enrollments.extend(store.active_enrollments(&course_ids, true).await?);
                enrollments.extend(store.active_enrollments(&course_ids, false).await?);
            }

            let (statuses, actions) = report::summarize_courses(&eligible, &enrollments, now);
            let markdown =
                report::build_report(course.as_deref(), now, &statuses, &actions, &eligible);
            std::fs::write(&out, markdown)?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}
