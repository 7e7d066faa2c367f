use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use fossawork::config::AppConfig;
use fossawork::extractors::{address, fuel_grade};
use fossawork::models::ScheduleType;
use fossawork::web::{create_router, AppState};
use fossawork::{telemetry, Database, ScrapeRunner, ScrapeScheduler, WorkFossaRunner, WorkFossaScraper};

#[derive(Parser)]
#[command(name = "fossawork", version, about = "WorkFossa scraping and work order API")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the API server and the scrape scheduler
    Serve,
    /// Scrape once and exit
    Run {
        /// work_orders or dispensers
        schedule_type: ScheduleType,
    },
    /// Decode fuel grade codes or names
    DecodeGrades {
        #[arg(required = true)]
        codes: Vec<String>,
    },
    /// Split a site address into its parts
    ParseAddress { text: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(load_config()?).await,
        Command::Run { schedule_type } => run_once(load_config()?, schedule_type).await,
        Command::DecodeGrades { codes } => {
            let grades = fuel_grade::decode_list(&codes.join(","));
            for grade in grades {
                let marker = if grade.requires_meter_test() { "" } else { " (no meter test)" };
                println!("{}{}", grade.display_name(), marker);
            }
            Ok(())
        }
        Command::ParseAddress { text } => {
            let parsed = address::parse(&text);
            println!("{}", serde_json::to_string_pretty(&parsed)?);
            Ok(())
        }
    }
}

fn load_config() -> Result<AppConfig> {
    AppConfig::from_env().context("loading configuration")
}

async fn serve(config: AppConfig) -> Result<()> {
    let _log_guard = telemetry::init_tracing(&config.logging)?;
    info!("Starting FossaWork backend...");

    if config.metrics.enabled {
        let handle = telemetry::install_recorder()?;
        telemetry::serve_metrics(&config.metrics, handle).await?;
    }

    if !config.has_credentials() {
        warn!("WorkFossa credentials are not configured, scrape runs will fail");
    }

    let db = Database::connect(&config.database).await?;
    let scraper = Arc::new(WorkFossaScraper::new(config.workfossa.clone())?);
    let runner: Arc<dyn ScrapeRunner> = Arc::new(WorkFossaRunner::new(db.clone(), Arc::clone(&scraper)));
    let scheduler = ScrapeScheduler::new(db.clone(), Arc::clone(&runner), config.scheduler.clone()).await?;

    if config.scheduler.enabled {
        scheduler.start().await?;
    } else {
        info!("scheduler disabled by configuration");
    }

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let shutdown_timeout = Duration::from_secs(config.server.shutdown_timeout);
    let app = create_router(AppState::new(db, scheduler.clone(), runner, config));

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    info!(%addr, "API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down...");
    if tokio::time::timeout(shutdown_timeout, scheduler.shutdown()).await.is_err() {
        warn!("scheduler did not stop within {:?}", shutdown_timeout);
    }
    scraper.shutdown();
    Ok(())
}

async fn run_once(config: AppConfig, schedule_type: ScheduleType) -> Result<()> {
    let _log_guard = telemetry::init_tracing(&config.logging)?;

    let db = Database::connect(&config.database).await?;
    let scraper = Arc::new(WorkFossaScraper::new(config.workfossa.clone())?);
    let runner: Arc<dyn ScrapeRunner> = Arc::new(WorkFossaRunner::new(db.clone(), Arc::clone(&scraper)));

    // With a stored schedule the run is recorded in its history
    let result = match db.get_schedule_by_type(schedule_type).await? {
        Some(schedule) => {
            let scheduler = ScrapeScheduler::new(db.clone(), Arc::clone(&runner), config.scheduler.clone()).await?;
            let entry = scheduler.run_now(schedule.id).await?;
            info!(
                success = ?entry.success,
                items = entry.items_processed,
                duration_ms = ?entry.duration_ms,
                "run recorded"
            );
            match entry.error_message {
                Some(message) => Err(anyhow::anyhow!(message)),
                None => Ok(()),
            }
        }
        None => {
            let summary = runner.run(schedule_type).await?;
            info!(
                processed = summary.items_processed,
                failed = summary.items_failed,
                "run finished"
            );
            Ok(())
        }
    };

    scraper.shutdown();
    result
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "could not listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
