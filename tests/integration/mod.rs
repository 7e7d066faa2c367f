// Integration tests for the FossaWork backend.
// The router and scheduler run against an in-memory database with a fake
// runner standing in for the browser.

pub mod api_tests;
pub mod scheduler_tests;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Method, Request},
    Router,
};
use chrono::NaiveDate;
use fossawork::{
    config::{
        AppConfig, DatabaseConfig, LoggingConfig, MetricsConfig, SchedulerConfig, ServerConfig,
        WorkFossaConfig,
    },
    extractors::{address, FuelGrade, ScrapedDispenser, ScrapedWorkOrder, ServiceCode},
    models::{Dispenser, RunSummary, ScheduleType},
    web::{create_router, AppState},
    AppError, Database, ScrapeRunner, ScrapeScheduler,
};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tower::ServiceExt;

/// Test configuration for integration tests
pub fn get_test_config() -> AppConfig {
    AppConfig {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            request_timeout: 30,
            shutdown_timeout: 5,
            cors_origins: vec![],
        },
        database: DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            min_connections: 1,
            acquire_timeout: 10,
        },
        workfossa: WorkFossaConfig {
            base_url: "https://app.workfossa.com".to_string(),
            username: None,
            password: None,
            chrome_path: None,
            headless: true,
            request_timeout: 10,
            retry_attempts: 1,
            retry_delay_ms: 100,
            user_agent: "FossaWork-Test/1.0".to_string(),
            screenshots_dir: None,
        },
        scheduler: SchedulerConfig {
            enabled: true,
            max_consecutive_failures: 2,
            job_timeout: 5,
            history_retention: 3,
        },
        logging: LoggingConfig {
            level: "fossawork=debug".to_string(),
            directory: None,
            file_prefix: "fossawork-test.log".to_string(),
        },
        metrics: MetricsConfig {
            enabled: false,
            port: 9091,
            endpoint: "/metrics".to_string(),
        },
    }
}

pub fn sample_order(external_id: &str, store: &str, city: &str) -> ScrapedWorkOrder {
    ScrapedWorkOrder {
        external_id: external_id.to_string(),
        detail_url: Some(format!(
            "https://app.workfossa.com/app/work/{}",
            external_id.trim_start_matches("W-")
        )),
        store_number: Some(format!("#{}", store)),
        customer_name: Some("Circle K".to_string()),
        site_name: Some(format!("Circle K #{}", store)),
        address: address::parse(&format!("123 Main St, {}, FL 33602", city)),
        service_code: Some(ServiceCode::AllDispensers),
        service_name: Some("AccuMeasure - All Dispensers".to_string()),
        service_quantity: Some(6),
        visit_date: NaiveDate::from_ymd_opt(2025, 6, 10),
        visit_time: None,
        instructions: None,
        scraped_data: BTreeMap::new(),
    }
}

pub fn sample_dispenser(number: &str) -> ScrapedDispenser {
    ScrapedDispenser {
        dispenser_number: number.to_string(),
        title: Some(format!("{} - Regular, Plus, Premium - Gilbarco", number)),
        make: Some("Gilbarco".to_string()),
        model: Some("Encore 700 S".to_string()),
        serial_number: Some(format!("SN-{}", number.replace('/', ""))),
        number_of_nozzles: Some(3),
        fuel_grades: vec![FuelGrade::Regular, FuelGrade::Plus, FuelGrade::Premium],
        ..Default::default()
    }
}

/// Writes fixture rows instead of driving Chrome.
pub struct FakeRunner {
    db: Database,
    fail: AtomicBool,
    calls: AtomicUsize,
}

impl FakeRunner {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            fail: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ScrapeRunner for FakeRunner {
    async fn run(&self, schedule_type: ScheduleType) -> fossawork::Result<RunSummary> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(AppError::Scraping("login rejected".to_string()));
        }

        match schedule_type {
            ScheduleType::WorkOrders => {
                self.db.upsert_work_order(&sample_order("W-110296", "38437", "Tampa")).await?;
                self.db.upsert_work_order(&sample_order("W-110301", "5127", "Orlando")).await?;
                Ok(RunSummary::processed(2))
            }
            ScheduleType::Dispensers => {
                let mut summary = RunSummary::default();
                for order in self.db.active_work_orders().await? {
                    self.refresh_dispensers(order.id).await?;
                    summary.items_processed += 1;
                }
                Ok(summary)
            }
        }
    }

    async fn refresh_dispensers(&self, work_order_id: i64) -> fossawork::Result<Vec<Dispenser>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(AppError::Scraping("equipment tab did not load".to_string()));
        }
        if self.db.get_work_order(work_order_id).await?.is_none() {
            return Err(AppError::not_found(format!("work order {}", work_order_id)));
        }
        self.db
            .replace_dispensers(work_order_id, &[sample_dispenser("1/2"), sample_dispenser("3/4")])
            .await
    }
}

pub struct TestApp {
    pub router: Router,
    pub db: Database,
    pub runner: Arc<FakeRunner>,
    pub scheduler: ScrapeScheduler,
}

/// Create a router over a fresh database with all components initialized.
/// The cron scheduler is left stopped so only explicit runs happen.
pub async fn create_test_app() -> anyhow::Result<TestApp> {
    let config = get_test_config();
    let db = Database::connect(&config.database).await?;
    let runner = Arc::new(FakeRunner::new(db.clone()));
    let dyn_runner: Arc<dyn ScrapeRunner> = runner.clone();
    let scheduler =
        ScrapeScheduler::new(db.clone(), Arc::clone(&dyn_runner), config.scheduler.clone()).await?;

    let router = create_router(AppState::new(db.clone(), scheduler.clone(), dyn_runner, config));
    Ok(TestApp {
        router,
        db,
        runner,
        scheduler,
    })
}

/// Helper to make HTTP requests to the test app
pub async fn make_request(
    app: &Router,
    method: Method,
    uri: &str,
    body: Option<Value>,
) -> anyhow::Result<(axum::http::StatusCode, Value)> {
    let mut request = Request::builder().method(method).uri(uri);
    if body.is_some() {
        request = request.header("content-type", "application/json");
    }
    let request = request.body(match body {
        Some(json) => Body::from(serde_json::to_vec(&json)?),
        None => Body::empty(),
    })?;

    let response = app.clone().oneshot(request).await?;
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)?
    };
    Ok((status, json))
}

/// Helper to wait for async operations
pub async fn wait_for_condition<F, Fut>(mut condition: F, timeout_seconds: u64) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = std::time::Instant::now();
    let timeout = std::time::Duration::from_secs(timeout_seconds);

    while start.elapsed() < timeout {
        if condition().await {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }

    false
}
