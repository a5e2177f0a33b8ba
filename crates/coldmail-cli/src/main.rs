use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use coldmail_core::JobRequirement;
use coldmail_sync::{load_matcher, prepare_outreach, report_recent_runs_markdown, SyncConfig};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "coldmail-cli")]
#[command(about = "Portfolio matching and lead aggregation for cold outreach")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fetch every enabled lead source, merge, rank and write a report.
    Sync,
    /// Match a job against the portfolio and print the outreach brief.
    Match {
        /// File holding the extracted job JSON (code fences allowed).
        #[arg(long, conflicts_with = "skills")]
        job: Option<PathBuf>,
        /// Comma-separated job skills.
        #[arg(long)]
        skills: Option<String>,
    },
    /// List portfolio skills, or the most frequent ones with --top.
    Skills {
        #[arg(long)]
        top: Option<usize>,
    },
    Summary,
    /// Markdown overview of recent sync runs.
    Report {
        #[arg(long, default_value_t = 5)]
        runs: usize,
    },
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    debug!(?cli, "parsed command line");

    match cli.command.unwrap_or(Commands::Sync) {
        Commands::Sync => {
            let summary = coldmail_sync::run_sync_once_from_env().await?;
            println!(
                "sync complete: run_id={} sources={} failed={} leads={} dropped={} reports={}",
                summary.run_id,
                summary.enabled_sources,
                summary.failed_sources.len(),
                summary.ranked_leads,
                summary.stats.duplicates_dropped,
                summary.reports_dir
            );
        }
        Commands::Match { job, skills } => {
            let job = match (job, skills) {
                (Some(path), _) => JobRequirement::from_llm_output(
                    &std::fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?,
                ),
                (None, Some(skills)) => JobRequirement {
                    skills: coldmail_sync::parse_keyword_list(&skills),
                    ..JobRequirement::default()
                },
                (None, None) => bail!("pass --job <file> or --skills <list>"),
            };
            let matcher = load_matcher(&SyncConfig::from_env())?;
            let brief = prepare_outreach(&matcher, job)?;
            println!("{}", serde_json::to_string_pretty(&brief)?);
        }
        Commands::Skills { top } => {
            let matcher = load_matcher(&SyncConfig::from_env())?;
            let skills = match top {
                Some(n) => matcher.top_skills(n),
                None => matcher.extract_all_skills().to_vec(),
            };
            for skill in skills {
                println!("{skill}");
            }
        }
        Commands::Summary => {
            let matcher = load_matcher(&SyncConfig::from_env())?;
            println!("{}", serde_json::to_string_pretty(&matcher.portfolio_summary())?);
        }
        Commands::Report { runs } => {
            let config = SyncConfig::from_env();
            println!("{}", report_recent_runs_markdown(runs, &config.reports_dir)?);
        }
        Commands::Serve => {
            coldmail_web::serve_from_env().await?;
        }
    }

    Ok(())
}
