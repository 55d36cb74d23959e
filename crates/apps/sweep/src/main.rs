//! # sweep
//!
//! Mirrors mail, calendar, chat, files and documents for every configured
//! subject into the local SQLite store.
//!
//! ## Example
//!
//! ```bash
//! # Everything, for every subject in ~/.config/ingest/sweep.json
//! sweep
//!
//! # Only files and documents for one subject, paging to exhaustion
//! sweep --services files,documents --subject ada@example.com --exhaustive
//!
//! # Show what would run, without touching any remote
//! sweep --dry-run --report plan.json
//! ```
//!
//! The process exits non-zero only when setup fails. Per-subject failures
//! are recorded in the run report.

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info};
use std::path::PathBuf;
use std::sync::Arc;

use ingest::google::{self, StaticTokens};
use ingest::{RunReport, Service, SqliteStore, SubjectRegistry, Sweep, SweepConfig};

/// Incrementally mirror collaboration data for many subjects.
#[derive(Parser, Debug)]
#[command(name = "sweep")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Services to run, comma separated (mail, calendar, chat, files, documents)
    #[arg(long, value_delimiter = ',')]
    services: Option<Vec<Service>>,

    /// Page every unit to exhaustion, ignoring the result cap
    #[arg(long)]
    exhaustive: bool,

    /// Retry transiently blocked subjects whose retry window has passed
    #[arg(long)]
    include_retryable: bool,

    /// Report planned work without calling any remote API
    #[arg(long)]
    dry_run: bool,

    /// Sweep only this subject
    #[arg(long)]
    subject: Option<String>,

    /// SQLite database path (overrides config and INGEST_DATABASE)
    #[arg(long)]
    db: Option<PathBuf>,

    /// Subjects swept in parallel
    #[arg(long)]
    concurrency: Option<usize>,

    /// Write the JSON run report here instead of stdout
    #[arg(long)]
    report: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();

    // Bootstrap config directory
    config::init().context("Failed to initialize config directory")?;

    let cfg = SweepConfig::load()?;
    let report = run(&cli, &cfg)?;

    if !report.passed() {
        error!("sweep invariants failed, see report");
    }
    write_report(&report, cli.report.as_deref())
}

fn run(cli: &Cli, cfg: &SweepConfig) -> Result<RunReport> {
    let db_path = match &cli.db {
        Some(path) => path.clone(),
        None => cfg.database_path()?,
    };
    info!("opening store at {}", db_path.display());
    let store = SqliteStore::new(&db_path)
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;

    let registry = SubjectRegistry::load(&cfg.subjects, cfg.subjects_file.as_deref())?;
    if registry.is_empty() && cli.subject.is_none() {
        anyhow::bail!("no subjects configured; set subjects in sweep.json, INGEST_SUBJECTS, or pass --subject");
    }

    let tokens = StaticTokens::load()?;
    let remotes = google::remotes(Arc::new(tokens), cfg.page_size, cfg.page_timeout());

    let mut options = cfg.sweep_options();
    if let Some(services) = &cli.services {
        options.services = services.clone();
    }
    if let Some(concurrency) = cli.concurrency {
        options.concurrency = concurrency.max(1);
    }
    options.exhaustive = cli.exhaustive;
    options.include_retryable = cli.include_retryable;
    options.dry_run = cli.dry_run;
    options.subject = cli.subject.clone();

    Sweep::new(Arc::new(store), remotes, registry, options).run()
}

fn write_report(report: &RunReport, path: Option<&std::path::Path>) -> Result<()> {
    let json = serde_json::to_string_pretty(report).context("Failed to serialize run report")?;
    match path {
        Some(path) => {
            std::fs::write(path, json)
                .with_context(|| format!("Failed to write report: {}", path.display()))?;
            info!("report written to {}", path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}
