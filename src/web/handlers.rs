use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Instant;
use validator::Validate;

use super::{ApiResponse, AppState, HealthCheck, HealthResponse, HttpError, PaginatedResponse};
use crate::db::DatabaseStats;
use crate::extractors::{address, fuel_grade, Address, FuelGrade};
use crate::models::{
    Dispenser, NewSchedule, ScrapingHistory, ScrapingSchedule, UpdateSchedule, WorkOrder,
    WorkOrderDetail, WorkOrderFilter,
};
use crate::scheduler::{JobInfo, SchedulerStatus};

type ApiResult<T> = Result<Json<ApiResponse<T>>, HttpError>;

#[derive(Debug, Deserialize, Validate)]
pub struct WorkOrderQuery {
    #[validate(range(min = 1))]
    pub page: Option<u32>,
    #[validate(range(min = 1, max = 100))]
    pub per_page: Option<u32>,
    pub store: Option<String>,
    pub search: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct HistoryQuery {
    #[validate(range(min = 1, max = 500))]
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ScheduleView {
    #[serde(flatten)]
    pub schedule: ScrapingSchedule,
    pub cron_expression: Option<String>,
    pub is_running: bool,
    pub job: Option<JobInfo>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusView {
    pub scheduler: SchedulerStatus,
    pub database: DatabaseStats,
}

#[derive(Debug, Deserialize, Validate)]
#[validate(schema(function = "validate_grade_request"))]
pub struct FuelGradeRequest {
    #[serde(default)]
    #[validate(length(max = 100))]
    pub codes: Vec<String>,
    #[validate(length(max = 2000))]
    pub text: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DecodedGrade {
    pub input: String,
    pub grade: FuelGrade,
    pub display_name: String,
    pub known: bool,
    pub requires_meter_test: bool,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AddressRequest {
    #[validate(length(min = 1, max = 500))]
    pub text: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ParsedAddress {
    #[serde(flatten)]
    pub address: Address,
    pub complete: bool,
    pub one_line: String,
}

fn validate_grade_request(request: &FuelGradeRequest) -> Result<(), validator::ValidationError> {
    let has_text = request.text.as_deref().is_some_and(|t| !t.trim().is_empty());
    if request.codes.is_empty() && !has_text {
        return Err(validator::ValidationError::new("codes_or_text_required"));
    }
    Ok(())
}

// Health

pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let mut checks = Vec::new();

    let start = Instant::now();
    match state.db.stats().await {
        Ok(stats) => checks.push(HealthCheck::healthy(
            "database",
            format!("{} work orders", stats.work_orders),
            start.elapsed().as_millis() as u64,
        )),
        Err(e) => checks.push(HealthCheck::unhealthy("database", e.to_string())),
    }

    if !state.config.scheduler.enabled {
        checks.push(HealthCheck::healthy("scheduler", "disabled by configuration", 0));
    } else if state.scheduler.is_started() {
        checks.push(HealthCheck::healthy("scheduler", "running", 0));
    } else {
        checks.push(HealthCheck::unhealthy("scheduler", "not started"));
    }

    let uptime = chrono::Utc::now().signed_duration_since(state.started_at);
    let health = HealthResponse::from_checks(checks, uptime.num_seconds().max(0) as u64);
    let status = if health.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(health))
}

// Work orders

pub async fn list_work_orders(
    State(state): State<AppState>,
    Query(query): Query<WorkOrderQuery>,
) -> ApiResult<PaginatedResponse<WorkOrder>> {
    query.validate()?;
    let page = query.page.unwrap_or(1);
    let per_page = query.per_page.unwrap_or(20);

    let filter = WorkOrderFilter {
        store: query.store,
        search: query.search,
        include_deleted: false,
    };
    tracing::debug!(page, per_page, ?filter, "listing work orders");

    let (work_orders, total) = state.db.list_work_orders(&filter, page, per_page).await?;
    Ok(Json(ApiResponse::success(PaginatedResponse::new(
        work_orders,
        page,
        per_page,
        total.max(0) as u64,
    ))))
}

pub async fn get_work_order(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<WorkOrderDetail> {
    let detail = state.db.work_order_detail(id).await?;
    Ok(Json(ApiResponse::success(detail)))
}

pub async fn delete_work_order(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Value> {
    if !state.db.soft_delete_work_order(id).await? {
        return Err(HttpError::not_found(format!("Work order {}", id)));
    }
    tracing::info!(work_order_id = id, "work order deleted");
    Ok(Json(ApiResponse::success(json!({ "id": id, "deleted": true }))))
}

pub async fn refresh_dispensers(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Vec<Dispenser>> {
    let dispensers = state.runner.refresh_dispensers(id).await?;
    let count = dispensers.len();
    Ok(Json(ApiResponse::success_with_meta(
        dispensers,
        json!({ "work_order_id": id, "count": count }),
    )))
}

// Schedules

async fn schedule_view(state: &AppState, schedule: ScrapingSchedule) -> ScheduleView {
    ScheduleView {
        cron_expression: schedule.cron_expression().ok(),
        is_running: state.scheduler.is_running(schedule.id),
        job: state.scheduler.get_job_info(schedule.id).await,
        schedule,
    }
}

async fn load_schedule(state: &AppState, id: i64) -> Result<ScrapingSchedule, HttpError> {
    state
        .db
        .get_schedule(id)
        .await?
        .ok_or_else(|| HttpError::not_found(format!("Schedule {}", id)))
}

pub async fn list_schedules(State(state): State<AppState>) -> ApiResult<Vec<ScheduleView>> {
    let schedules = state.db.list_schedules().await?;
    let views = join_all(
        schedules
            .into_iter()
            .map(|schedule| schedule_view(&state, schedule)),
    )
    .await;
    Ok(Json(ApiResponse::success(views)))
}

pub async fn create_schedule(
    State(state): State<AppState>,
    Json(request): Json<NewSchedule>,
) -> Result<(StatusCode, Json<ApiResponse<ScheduleView>>), HttpError> {
    request.validate()?;
    let schedule = ScrapingSchedule::new(request);
    schedule.interval_minutes()?;

    let created = state.db.create_schedule(&schedule).await?;
    if created.enabled {
        state.scheduler.schedule(&created).await?;
    }
    tracing::info!(schedule_id = created.id, schedule_type = %created.schedule_type, "schedule created");

    let created = load_schedule(&state, created.id).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(schedule_view(&state, created).await)),
    ))
}

pub async fn get_schedule(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<ScheduleView> {
    let schedule = load_schedule(&state, id).await?;
    Ok(Json(ApiResponse::success(schedule_view(&state, schedule).await)))
}

pub async fn update_schedule(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(update): Json<UpdateSchedule>,
) -> ApiResult<ScheduleView> {
    update.validate()?;
    let mut schedule = load_schedule(&state, id).await?;
    schedule.update(update);
    schedule.interval_minutes()?;

    let saved = state.db.update_schedule(&schedule).await?;
    state.scheduler.reschedule(&saved).await?;
    tracing::info!(schedule_id = id, enabled = saved.enabled, "schedule updated");

    let saved = load_schedule(&state, id).await?;
    Ok(Json(ApiResponse::success(schedule_view(&state, saved).await)))
}

pub async fn delete_schedule(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Value> {
    state.scheduler.unschedule(id).await?;
    if !state.db.delete_schedule(id).await? {
        return Err(HttpError::not_found(format!("Schedule {}", id)));
    }
    tracing::info!(schedule_id = id, "schedule deleted");
    Ok(Json(ApiResponse::success(json!({ "id": id, "deleted": true }))))
}

pub async fn run_schedule(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<(StatusCode, Json<ApiResponse<Value>>), HttpError> {
    state.scheduler.trigger(id).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(ApiResponse::success(json!({ "schedule_id": id, "status": "started" }))),
    ))
}

pub async fn schedule_history(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Vec<ScrapingHistory>> {
    query.validate()?;
    load_schedule(&state, id).await?;
    let history = state.db.list_history(id, query.limit.unwrap_or(50)).await?;
    Ok(Json(ApiResponse::success(history)))
}

pub async fn scheduler_status(State(state): State<AppState>) -> ApiResult<StatusView> {
    let view = StatusView {
        scheduler: state.scheduler.status().await,
        database: state.db.stats().await?,
    };
    Ok(Json(ApiResponse::success(view)))
}

// Extraction

pub async fn extract_fuel_grades(Json(request): Json<FuelGradeRequest>) -> ApiResult<Vec<DecodedGrade>> {
    request.validate()?;

    let mut decoded: Vec<DecodedGrade> = request
        .codes
        .iter()
        .filter(|c| !c.trim().is_empty())
        .map(|code| describe(code.trim().to_string(), fuel_grade::decode(code)))
        .collect();

    if let Some(text) = request.text.as_deref() {
        decoded.extend(
            fuel_grade::decode_list(text)
                .into_iter()
                .map(|grade| describe(text.trim().to_string(), grade)),
        );
    }

    Ok(Json(ApiResponse::success(decoded)))
}

fn describe(input: String, grade: FuelGrade) -> DecodedGrade {
    DecodedGrade {
        input,
        display_name: grade.display_name().to_string(),
        known: grade.is_known(),
        requires_meter_test: grade.requires_meter_test(),
        grade,
    }
}

pub async fn extract_address(Json(request): Json<AddressRequest>) -> ApiResult<ParsedAddress> {
    request.validate()?;
    let parsed = address::parse(&request.text);
    Ok(Json(ApiResponse::success(ParsedAddress {
        complete: parsed.is_complete(),
        one_line: parsed.one_line(),
        address: parsed,
    })))
}
