use axum::{
    http::{HeaderValue, Method},
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::config::AppConfig;
use crate::db::Database;
use crate::runner::ScrapeRunner;
use crate::scheduler::ScrapeScheduler;

pub mod handlers;
pub mod middleware;
pub mod responses;

pub use handlers::{
    // Work order handlers
    delete_work_order, get_work_order, list_work_orders, refresh_dispensers,
    // Schedule handlers
    create_schedule, delete_schedule, get_schedule, list_schedules, run_schedule,
    schedule_history, scheduler_status, update_schedule,
    // Extraction handlers
    extract_address, extract_fuel_grades,
    // System handlers
    health_check,
};
pub use responses::*;

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub scheduler: ScrapeScheduler,
    pub runner: Arc<dyn ScrapeRunner>,
    pub config: Arc<AppConfig>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        db: Database,
        scheduler: ScrapeScheduler,
        runner: Arc<dyn ScrapeRunner>,
        config: AppConfig,
    ) -> Self {
        Self {
            db,
            scheduler,
            runner,
            config: Arc::new(config),
            started_at: Utc::now(),
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.server.cors_origins);
    let request_timeout = Duration::from_secs(state.config.server.request_timeout);

    Router::new()
        // Health check
        .route("/health", get(health_check))

        // API routes
        .nest("/api/v1", api_routes())

        // Add middleware
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http()
                    .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                    .on_response(DefaultOnResponse::new().level(Level::DEBUG)))
                .layer(axum_middleware::from_fn(middleware::request_logging))
                .layer(axum_middleware::from_fn(middleware::security_headers))
                .layer(TimeoutLayer::new(request_timeout))
                .layer(CompressionLayer::new())
                .layer(cors)
        )
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        // Work orders
        .route("/work-orders", get(list_work_orders))
        .route("/work-orders/:id", get(get_work_order).delete(delete_work_order))
        .route("/work-orders/:id/dispensers/refresh", post(refresh_dispensers))

        // Scraping schedules
        .route("/schedules", get(list_schedules).post(create_schedule))
        .route("/schedules/:id", get(get_schedule).put(update_schedule).delete(delete_schedule))
        .route("/schedules/:id/run", post(run_schedule))
        .route("/schedules/:id/history", get(schedule_history))
        .route("/scheduler/status", get(scheduler_status))

        // Stateless extraction helpers
        .route("/extract/fuel-grades", post(extract_fuel_grades))
        .route("/extract/address", post(extract_address))
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect();

    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any);

    if origins.is_empty() {
        layer.allow_origin(Any)
    } else {
        layer.allow_origin(origins)
    }
}
