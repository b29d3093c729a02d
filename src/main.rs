use anyhow::{Context, Result};
use api_client::{RateLimiter, SleeperClient};
use clap::{Args, Parser, Subcommand};
use comfy_table::Table;
use configuration::AppConfig;
use core_types::SyncResult;
use database::{DbRepository, RawStore, RunLedger, connect, run_migrations};
use etl::EtlProcessor;
use scheduler::{JobError, Scheduler};
use std::sync::Arc;
use syncer::Orchestrator;
use tokio_util::sync::CancellationToken;

/// The entry point for the Sleeper league sync service.
#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file, if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let config = configuration::load_config(cli.config.as_deref()).context("Failed to load configuration")?;
    let _log_guard = configuration::logging::init(&config.logging).context("Failed to initialise logging")?;

    let app = App::build(config).await?;

    match cli.command {
        Commands::Serve => handle_serve(app).await?,
        Commands::FullSync(args) => handle_full_sync(app, args).await?,
        Commands::Sync { target } => handle_sync(app, target).await?,
        Commands::Etl(args) => handle_etl(app, args).await?,
        Commands::Requeue(args) => handle_requeue(app, args).await?,
        Commands::Status(args) => handle_status(app, args).await?,
    }

    Ok(())
}

// ==============================================================================
// CLI Structure
// ==============================================================================

/// Mirrors a Sleeper fantasy league into PostgreSQL.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduled sync and ETL jobs until interrupted.
    Serve,
    /// Sync a league and everything it depends on, once.
    FullSync(FullSyncArgs),
    /// Sync a single endpoint family.
    Sync {
        #[command(subcommand)]
        target: SyncTarget,
    },
    /// Project captured snapshots that are still pending.
    Etl(EtlArgs),
    /// Send snapshots back for another ETL pass.
    Requeue(RequeueArgs),
    /// Show the raw store backlog and recent sync runs.
    Status(StatusArgs),
}

#[derive(Args)]
struct FullSyncArgs {
    /// The league to sync. Defaults to the configured primary league.
    #[arg(long)]
    league: Option<String>,
}

#[derive(Subcommand)]
enum SyncTarget {
    League,
    Users,
    Players,
    Rosters,
    State,
    TradedPicks,
    Matchups {
        #[arg(long)]
        week: u32,
    },
    Transactions {
        #[arg(long)]
        week: u32,
    },
    DraftPicks {
        #[arg(long)]
        draft: String,
    },
}

#[derive(Args)]
struct EtlArgs {
    /// Maximum number of snapshots to project. Defaults to the configured batch size.
    #[arg(long)]
    limit: Option<usize>,

    /// Keep running batches until nothing is pending.
    #[arg(long)]
    drain: bool,
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct RequeueArgs {
    /// Requeue every failed snapshot.
    #[arg(long)]
    failed: bool,

    /// Requeue a single snapshot.
    #[arg(long)]
    id: Option<i64>,
}

#[derive(Args)]
struct StatusArgs {
    /// How many recent runs to list.
    #[arg(long, default_value_t = 10)]
    runs: usize,
}

// ==============================================================================
// Wiring
// ==============================================================================

struct App {
    config: AppConfig,
    repo: Arc<DbRepository>,
    orchestrator: Arc<Orchestrator>,
    etl: Arc<EtlProcessor>,
}

impl App {
    async fn build(config: AppConfig) -> Result<Self> {
        let pool = connect(&config.database).await.context("Failed to connect to the database")?;
        if config.database.run_migrations {
            run_migrations(&pool).await.context("Failed to run database migrations")?;
        }
        let repo = Arc::new(DbRepository::new(pool));

        // One limiter for every job so concurrent runs share the upstream budget.
        let limiter = Arc::new(RateLimiter::new(config.api.rate_limit_per_second, config.api.burst));
        let client = SleeperClient::new(&config.api, limiter).context("Failed to build the API client")?;

        let orchestrator = Orchestrator::new(Arc::new(client), repo.clone(), repo.clone(), repo.clone());
        let etl = EtlProcessor::new(repo.clone(), repo.clone(), config.sync.etl_commit_group_size)
            .with_stale_claim_timeout(config.sync.etl_stale_claim_timeout());

        Ok(Self { config, repo, orchestrator: Arc::new(orchestrator), etl: Arc::new(etl) })
    }

    fn league_id(&self, requested: Option<String>) -> String {
        requested.unwrap_or_else(|| self.config.sync.primary_league_id.clone())
    }
}

/// Cancels the token on Ctrl-C so long manual runs stop cleanly.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, cancelling...");
            token.cancel();
        }
    });
    cancel
}

// ==============================================================================
// Command Handlers
// ==============================================================================

async fn handle_serve(app: App) -> Result<()> {
    if !app.config.schedule.enabled {
        tracing::warn!("Scheduling is disabled in the configuration; nothing to serve.");
        return Ok(());
    }

    let jobs = Scheduler::new();
    let league_id = app.config.sync.primary_league_id.clone();

    let orchestrator = app.orchestrator.clone();
    jobs.add_cron_job(
        "full_sync",
        &app.config.schedule.full_sync_cron,
        scheduler::task(move |cancel| run_full_sync(orchestrator.clone(), league_id.clone(), cancel)),
    )?;

    let orchestrator = app.orchestrator.clone();
    jobs.add_cron_job(
        "players",
        &app.config.schedule.players_cron,
        scheduler::task(move |cancel| run_players(orchestrator.clone(), cancel)),
    )?;

    let etl = app.etl.clone();
    let batch_size = app.config.sync.etl_batch_size;
    jobs.add_interval_job(
        "etl",
        app.config.schedule.etl_interval(),
        scheduler::task(move |cancel| run_etl(etl.clone(), batch_size, cancel)),
    )?;

    jobs.start()?;
    for name in jobs.job_names() {
        tracing::info!(job = %name, next_run = ?jobs.next_run(&name), "Job scheduled.");
    }

    tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl-C")?;
    tracing::info!("Shutdown requested.");
    jobs.stop().await;
    Ok(())
}

async fn handle_full_sync(app: App, args: FullSyncArgs) -> Result<()> {
    let league_id = app.league_id(args.league);
    let result = app.orchestrator.full_sync(&league_id, &cancel_on_ctrl_c()).await?;
    print_sync(&result);
    Ok(())
}

async fn handle_sync(app: App, target: SyncTarget) -> Result<()> {
    let cancel = cancel_on_ctrl_c();
    let league_id = app.league_id(None);
    let orchestrator = &app.orchestrator;

    let result = match target {
        SyncTarget::League => orchestrator.sync_league(&league_id, &cancel).await?,
        SyncTarget::Users => orchestrator.sync_users(&league_id, &cancel).await?,
        SyncTarget::Players => orchestrator.sync_players(&cancel).await?,
        SyncTarget::Rosters => orchestrator.sync_rosters(&league_id, &cancel).await?,
        SyncTarget::State => orchestrator.sync_state(&cancel).await?,
        SyncTarget::TradedPicks => orchestrator.sync_traded_picks(&league_id, &cancel).await?,
        SyncTarget::Matchups { week } => orchestrator.sync_matchups(&league_id, week, &cancel).await?,
        SyncTarget::Transactions { week } => orchestrator.sync_transactions(&league_id, week, &cancel).await?,
        SyncTarget::DraftPicks { draft } => orchestrator.sync_draft_picks(&draft, &cancel).await?,
    };
    print_sync(&result);
    Ok(())
}

async fn handle_etl(app: App, args: EtlArgs) -> Result<()> {
    let limit = args.limit.unwrap_or(app.config.sync.etl_batch_size);
    let cancel = cancel_on_ctrl_c();
    let result = if args.drain {
        app.etl.drain(limit, &cancel).await?
    } else {
        app.etl.process_unprocessed(limit, &cancel).await?
    };

    println!(
        "Processed {} snapshots: {} ok, {} failed, {} skipped",
        result.total_processed, result.success_count, result.error_count, result.skipped_count
    );
    for error in &result.errors {
        println!("  {error}");
    }
    Ok(())
}

async fn handle_requeue(app: App, args: RequeueArgs) -> Result<()> {
    match args.id {
        Some(id) => {
            app.repo.requeue(id).await.with_context(|| format!("Failed to requeue snapshot {id}"))?;
            println!("Snapshot {id} requeued.");
        }
        None => {
            let moved = app.repo.requeue_failed().await.context("Failed to requeue failed snapshots")?;
            println!("{moved} failed snapshots requeued.");
        }
    }
    Ok(())
}

async fn handle_status(app: App, args: StatusArgs) -> Result<()> {
    let counts = app.repo.status_counts().await?;
    let mut backlog = Table::new();
    backlog.set_header(vec!["new", "processing", "processed", "failed", "total"]);
    backlog.add_row(vec![
        counts.new.to_string(),
        counts.processing.to_string(),
        counts.processed.to_string(),
        counts.failed.to_string(),
        counts.total().to_string(),
    ]);
    println!("{backlog}");

    let runs = app.repo.recent_runs(args.runs).await?;
    let mut table = Table::new();
    table.set_header(vec!["run", "type", "league", "status", "started", "ok", "errors", "skipped"]);
    for run in runs {
        table.add_row(vec![
            run.id.to_string(),
            run.run_type,
            run.league_id.unwrap_or_else(|| "-".to_string()),
            run.status.to_string(),
            run.started_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            run.counts.success.to_string(),
            run.counts.error.to_string(),
            run.counts.skipped.to_string(),
        ]);
    }
    println!("{table}");
    Ok(())
}

async fn run_full_sync(
    orchestrator: Arc<Orchestrator>,
    league_id: String,
    cancel: CancellationToken,
) -> Result<(), JobError> {
    let result = orchestrator.full_sync(&league_id, &cancel).await?;
    log_sync(&result);
    Ok(())
}

async fn run_players(orchestrator: Arc<Orchestrator>, cancel: CancellationToken) -> Result<(), JobError> {
    let result = orchestrator.sync_players(&cancel).await?;
    log_sync(&result);
    Ok(())
}

async fn run_etl(etl: Arc<EtlProcessor>, batch_size: usize, cancel: CancellationToken) -> Result<(), JobError> {
    etl.drain(batch_size, &cancel).await?;
    Ok(())
}

fn log_sync(result: &SyncResult) {
    if !result.success {
        for error in &result.errors {
            tracing::warn!(run_id = result.run_id, error = %error, "Sync run error.");
        }
    }
}

fn print_sync(result: &SyncResult) {
    println!(
        "Run {} {}: {} records in {:.1}s",
        result.run_id,
        result.status,
        result.records_processed,
        result.duration.as_secs_f64()
    );
    for error in &result.errors {
        println!("  {error}");
    }
}
