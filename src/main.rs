//! Operator CLI for caseflow.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use caseflow::cases::{Actor, CaseWorkflow};
use caseflow::config::Config;
use caseflow::db::{self, CaseType, Database, UserRole};
use caseflow::settings::{Settings, default_settings_path};

#[derive(Parser, Debug)]
#[command(name = "caseflow", version, about = "Legal intake and case assignment")]
struct Cli {
    /// Settings file (defaults to ~/.caseflow/settings.toml)
    #[arg(long, env = "CASEFLOW_SETTINGS")]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply pending schema migrations
    Migrate,
    /// List active lawyers with their load and rating
    Lawyers,
    /// List queued cases, oldest first
    Queue {
        #[arg(long, value_parser = parse_case_type)]
        case_type: Option<CaseType>,
    },
    /// Hand queued cases to a lawyer with free capacity
    Drain {
        #[arg(long)]
        lawyer: Uuid,
        /// Fill every free slot instead of claiming a single case
        #[arg(long)]
        all: bool,
    },
    /// Hearings scheduled from today through the window
    Hearings {
        #[arg(long)]
        days: Option<u32>,
    },
}

fn parse_case_type(raw: &str) -> Result<CaseType, String> {
    CaseType::from_db_value(&raw.to_ascii_lowercase()).ok_or_else(|| {
        let known: Vec<&str> = CaseType::ALL.iter().map(|t| t.as_str()).collect();
        format!("unknown case type '{raw}' (expected one of: {})", known.join(", "))
    })
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("caseflow=info"));
    let json = std::env::var("CASEFLOW_LOG_JSON")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let cli = Cli::parse();
    let settings_path = cli.settings.unwrap_or_else(default_settings_path);
    let settings = Settings::load(&settings_path)
        .with_context(|| format!("loading settings from {}", settings_path.display()))?;
    let config = Config::resolve(&settings).context("resolving configuration")?;

    let db = db::connect_from_config(&config.database)
        .await
        .context("connecting to the database")?;

    match cli.command {
        Command::Migrate => {
            tracing::info!(backend = config.database.backend.as_str(), "Schema is up to date");
        }
        Command::Lawyers => list_lawyers(db.as_ref(), &config).await?,
        Command::Queue { case_type } => {
            let cases = db.list_queued_cases(case_type).await?;
            for case in &cases {
                println!(
                    "{}  {:<12} {}",
                    case.case_number,
                    case.case_type.as_str(),
                    case.created_at.to_rfc3339()
                );
            }
            println!("{} queued", cases.len());
        }
        Command::Drain { lawyer, all } => {
            let workflow = CaseWorkflow::from_config(Arc::clone(&db), &config);
            let claimed = if all {
                workflow.drainer().drain_free_slots(lawyer).await
            } else {
                workflow.drainer().claim_next(lawyer).await?.into_iter().collect()
            };
            for case in &claimed {
                println!("{} -> {}", case.case_number, lawyer);
            }
            println!("{} claimed", claimed.len());
        }
        Command::Hearings { days } => {
            let workflow = CaseWorkflow::from_config(Arc::clone(&db), &config);
            let calendar = workflow.hearings();
            let days = days.unwrap_or(calendar.window_days());
            let operator = Actor::new(Uuid::nil(), UserRole::Admin);
            let cases = calendar
                .upcoming_from(&operator, Utc::now().date_naive(), days)
                .await?;
            for case in &cases {
                if let Some(date) = case.next_hearing_date {
                    println!("{date}  {}  {}", case.case_number, case.status.as_str());
                }
            }
        }
    }
    Ok(())
}

async fn list_lawyers(db: &dyn Database, config: &Config) -> anyhow::Result<()> {
    let limit = config.assignment.capacity_limit;
    for lawyer in db.list_active_lawyers().await? {
        let specializations: Vec<&str> = lawyer
            .profile
            .specializations
            .iter()
            .map(|t| t.as_str())
            .collect();
        println!(
            "{}  {:<24} {}/{}  rating {} ({})  [{}]",
            lawyer.user_id,
            lawyer.profile.name,
            lawyer.profile.active_case_count,
            limit,
            lawyer.profile.rating,
            lawyer.profile.rating_count,
            specializations.join(", ")
        );
    }
    Ok(())
}
