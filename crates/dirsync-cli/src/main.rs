mod config;
mod report;
mod snapshot;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use config::{load_config, ConfigOverrides};
use dirsync_engine::sync_directory;
use dirsync_storage::DirectoryStore;
use report::SyncReport;
use snapshot::DirectorySnapshot;
use std::io;
use std::path::PathBuf;
use tracing::{info, info_span, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "dirsync")]
#[command(about = "Directory to database synchronization", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the directory store schema
    Migrate {
        #[arg(long)]
        db: PathBuf,
    },
    /// Reconcile one directory snapshot into the store
    Sync(SyncArgs),
}

#[derive(Args)]
struct SyncArgs {
    #[arg(long)]
    db: PathBuf,
    /// JSON export with `departments` and `profiles`
    #[arg(long)]
    input: PathBuf,
    #[arg(long, env = "DIRSYNC_CONFIG")]
    config: Option<PathBuf>,
    #[arg(long)]
    category: Option<i64>,
    #[arg(long)]
    domain: Option<String>,
    /// Stage and report without flushing
    #[arg(long)]
    dry_run: bool,
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    match cli.command {
        Commands::Migrate { db } => {
            let store = DirectoryStore::open(&db)
                .with_context(|| format!("failed to open store {}", db.display()))?;
            let version = store.schema_version()?;
            info!(db = %db.display(), version, "store schema ready");
            println!("schema version {version}");
        }
        Commands::Sync(args) => {
            let report = run_sync(&args)?;
            if report.has_failures() {
                warn!(
                    failures = report.summary.failures,
                    "sync finished with failed records"
                );
            }
            let json = serde_json::to_string_pretty(&report).context("failed to encode report")?;
            println!("{json}");
        }
    }

    Ok(())
}

fn run_sync(args: &SyncArgs) -> Result<SyncReport> {
    let overrides = ConfigOverrides {
        category_id: args.category,
        domain: args.domain.clone(),
    };
    let config = overrides.apply(load_config(args.config.as_deref())?);
    let snapshot = DirectorySnapshot::load(&args.input)?;
    let mut store = DirectoryStore::open(&args.db)
        .with_context(|| format!("failed to open store {}", args.db.display()))?;

    let run_id = Uuid::new_v4();
    let category_id = config.category_id;
    let span = info_span!("sync", %run_id, category_id);
    let _guard = span.enter();

    let started_at = Utc::now();
    let previous_sync_at = store.last_synced_at(category_id)?;
    info!(
        departments = snapshot.departments.len(),
        profiles = snapshot.profiles.len(),
        dry_run = args.dry_run,
        "sync started"
    );

    let outcome = sync_directory(config, &store, &snapshot.departments, &snapshot.profiles)
        .context("sync run failed")?;

    let commit = if args.dry_run {
        info!("dry run, staged writes discarded");
        None
    } else {
        let report = store
            .commit(&outcome.writes, Utc::now())
            .context("failed to flush staged writes")?;
        info!(
            departments_inserted = report.departments_inserted,
            departments_updated = report.departments_updated,
            profiles_inserted = report.profiles_inserted,
            profiles_updated = report.profiles_updated,
            "staged writes flushed"
        );
        Some(report)
    };

    Ok(SyncReport {
        run_id,
        category_id,
        dry_run: args.dry_run,
        started_at,
        finished_at: Utc::now(),
        previous_sync_at,
        summary: outcome.summary,
        departments: outcome.departments,
        profiles: outcome.profiles,
        commit,
    })
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}
