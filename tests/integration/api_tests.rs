use super::*;
use axum::http::{Method, StatusCode};
use serde_json::json;

#[tokio::test]
async fn test_health_check_reflects_scheduler() -> anyhow::Result<()> {
    let app = create_test_app().await?;

    let (status, body) = make_request(&app.router, Method::GET, "/health", None).await?;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "unhealthy");

    app.scheduler.start().await?;
    let (status, body) = make_request(&app.router, Method::GET, "/health", None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["checks"][0]["name"], "database");

    app.scheduler.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_work_order_listing_and_filters() -> anyhow::Result<()> {
    let app = create_test_app().await?;
    app.runner.run(ScheduleType::WorkOrders).await?;

    let (status, body) = make_request(&app.router, Method::GET, "/api/v1/work-orders", None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["pagination"]["total"], 2);
    assert_eq!(body["data"]["items"].as_array().map(Vec::len), Some(2));

    let (_, body) =
        make_request(&app.router, Method::GET, "/api/v1/work-orders?store=38437", None).await?;
    assert_eq!(body["data"]["pagination"]["total"], 1);
    assert_eq!(body["data"]["items"][0]["external_id"], "W-110296");

    let (_, body) =
        make_request(&app.router, Method::GET, "/api/v1/work-orders?search=orlando", None).await?;
    assert_eq!(body["data"]["pagination"]["total"], 1);
    assert_eq!(body["data"]["items"][0]["external_id"], "W-110301");

    let (_, body) = make_request(
        &app.router,
        Method::GET,
        "/api/v1/work-orders?page=2&per_page=1",
        None,
    )
    .await?;
    assert_eq!(body["data"]["items"].as_array().map(Vec::len), Some(1));
    assert_eq!(body["data"]["pagination"]["total_pages"], 2);
    assert_eq!(body["data"]["pagination"]["has_prev"], true);

    let (status, body) =
        make_request(&app.router, Method::GET, "/api/v1/work-orders?per_page=500", None).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
    Ok(())
}

#[tokio::test]
async fn test_work_order_detail_and_dispenser_refresh() -> anyhow::Result<()> {
    let app = create_test_app().await?;
    app.runner.run(ScheduleType::WorkOrders).await?;
    let order = app
        .db
        .get_work_order_by_external_id("W-110296")
        .await?
        .expect("work order saved");

    let uri = format!("/api/v1/work-orders/{}", order.id);
    let (status, body) = make_request(&app.router, Method::GET, &uri, None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["external_id"], "W-110296");
    assert_eq!(body["data"]["service"]["code"], "2861");
    assert_eq!(body["data"]["service"]["covers_all_dispensers"], true);
    assert_eq!(body["data"]["expected_dispensers"], 6);
    assert_eq!(body["data"]["dispensers"].as_array().map(Vec::len), Some(0));

    let refresh = format!("/api/v1/work-orders/{}/dispensers/refresh", order.id);
    let (status, body) = make_request(&app.router, Method::POST, &refresh, None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["meta"]["count"], 2);

    let (_, body) = make_request(&app.router, Method::GET, &uri, None).await?;
    let dispensers = body["data"]["dispensers"].as_array().cloned().unwrap_or_default();
    assert_eq!(dispensers.len(), 2);
    assert_eq!(dispensers[0]["dispenser_number"], "1/2");
    assert_eq!(dispensers[0]["make"], "Gilbarco");

    // A failed scrape surfaces as a gateway error and leaves the rows alone
    app.runner.set_failing(true);
    let (status, body) = make_request(&app.router, Method::POST, &refresh, None).await?;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"]["code"], "SCRAPE_FAILED");
    assert_eq!(app.db.list_dispensers(order.id).await?.len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_work_order_soft_delete() -> anyhow::Result<()> {
    let app = create_test_app().await?;
    app.runner.run(ScheduleType::WorkOrders).await?;
    let order = app
        .db
        .get_work_order_by_external_id("W-110301")
        .await?
        .expect("work order saved");

    let uri = format!("/api/v1/work-orders/{}", order.id);
    let (status, _) = make_request(&app.router, Method::DELETE, &uri, None).await?;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = make_request(&app.router, Method::GET, &uri, None).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = make_request(&app.router, Method::DELETE, &uri, None).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Re-scraping does not bring it back
    app.runner.run(ScheduleType::WorkOrders).await?;
    let (_, body) = make_request(&app.router, Method::GET, "/api/v1/work-orders", None).await?;
    assert_eq!(body["data"]["pagination"]["total"], 1);
    Ok(())
}

#[tokio::test]
async fn test_unknown_work_order_is_not_found() -> anyhow::Result<()> {
    let app = create_test_app().await?;

    let (status, body) = make_request(&app.router, Method::GET, "/api/v1/work-orders/999", None).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "NOT_FOUND");

    let (status, _) = make_request(
        &app.router,
        Method::POST,
        "/api/v1/work-orders/999/dispensers/refresh",
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn test_schedule_crud_operations() -> anyhow::Result<()> {
    let app = create_test_app().await?;

    // 1. Nothing configured yet
    let (status, body) = make_request(&app.router, Method::GET, "/api/v1/schedules", None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().map(Vec::len), Some(0));

    // 2. Create an hourly work order schedule inside business hours
    let (status, body) = make_request(
        &app.router,
        Method::POST,
        "/api/v1/schedules",
        Some(json!({
            "schedule_type": "work_orders",
            "interval_hours": 1.0,
            "active_hours": { "start_hour": 6, "end_hour": 22 },
        })),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);
    let id = body["data"]["id"].as_i64().expect("schedule id");
    assert_eq!(body["data"]["enabled"], true);
    assert_eq!(body["data"]["active_start_hour"], 6);
    assert!(body["data"]["cron_expression"].as_str().is_some());
    assert!(body["data"]["next_run"].is_string());
    assert!(body["data"]["job"].is_object());

    // 3. A second schedule of the same type is a conflict
    let (status, body) = make_request(
        &app.router,
        Method::POST,
        "/api/v1/schedules",
        Some(json!({ "schedule_type": "work_orders", "interval_hours": 2.0 })),
    )
    .await?;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "CONFLICT");

    // 4. Disable it
    let uri = format!("/api/v1/schedules/{}", id);
    let (status, body) =
        make_request(&app.router, Method::PUT, &uri, Some(json!({ "enabled": false }))).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["enabled"], false);
    assert!(body["data"]["job"].is_null());
    assert!(body["data"]["next_run"].is_null());

    // 5. Change the interval and drop the window
    let (status, body) = make_request(
        &app.router,
        Method::PUT,
        &uri,
        Some(json!({ "interval_hours": 0.5, "clear_active_hours": true, "enabled": true })),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["interval_hours"], 0.5);
    assert!(body["data"]["active_start_hour"].is_null());
    assert!(body["data"]["job"].is_object());

    // 6. Delete
    let (status, _) = make_request(&app.router, Method::DELETE, &uri, None).await?;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = make_request(&app.router, Method::GET, &uri, None).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(app.scheduler.get_job_info(id).await.is_none());
    Ok(())
}

#[tokio::test]
async fn test_schedule_validation() -> anyhow::Result<()> {
    let app = create_test_app().await?;

    let invalid = [
        json!({ "schedule_type": "work_orders", "interval_hours": 0.0 }),
        json!({ "schedule_type": "work_orders", "interval_hours": 36.0 }),
        json!({ "schedule_type": "dispensers", "interval_hours": 1.0,
                "active_hours": { "start_hour": 6, "end_hour": 25 } }),
        // 7 minutes does not divide an hour
        json!({ "schedule_type": "dispensers", "interval_hours": 0.11666666666666667 }),
    ];

    for body in invalid {
        let (status, response) =
            make_request(&app.router, Method::POST, "/api/v1/schedules", Some(body.clone())).await?;
        assert_eq!(status, StatusCode::BAD_REQUEST, "accepted {}", body);
        assert_eq!(response["success"], false);
    }

    // Unknown schedule types never reach the handler
    let (status, _) = make_request(
        &app.router,
        Method::POST,
        "/api/v1/schedules",
        Some(json!({ "schedule_type": "invoices", "interval_hours": 1.0 })),
    )
    .await?;
    assert!(status.is_client_error());

    let (status, _) = make_request(
        &app.router,
        Method::PUT,
        "/api/v1/schedules/42",
        Some(json!({ "enabled": true })),
    )
    .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn test_manual_run_records_history() -> anyhow::Result<()> {
    let app = create_test_app().await?;

    let (_, body) = make_request(
        &app.router,
        Method::POST,
        "/api/v1/schedules",
        Some(json!({ "schedule_type": "work_orders", "interval_hours": 4.0 })),
    )
    .await?;
    let id = body["data"]["id"].as_i64().expect("schedule id");

    let (status, body) =
        make_request(&app.router, Method::POST, &format!("/api/v1/schedules/{}/run", id), None).await?;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["data"]["status"], "started");

    let scheduler = app.scheduler.clone();
    assert!(wait_for_condition(|| {
        let scheduler = scheduler.clone();
        async move { !scheduler.is_running(id) }
    }, 5).await);

    let history_uri = format!("/api/v1/schedules/{}/history", id);
    let (status, body) = make_request(&app.router, Method::GET, &history_uri, None).await?;
    assert_eq!(status, StatusCode::OK);
    let entries = body["data"].as_array().cloned().unwrap_or_default();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["success"], true);
    assert_eq!(entries[0]["triggered_by"], "manual");
    assert_eq!(entries[0]["items_processed"], 2);
    assert!(entries[0]["duration_ms"].is_number());

    let (_, body) = make_request(&app.router, Method::GET, "/api/v1/work-orders", None).await?;
    assert_eq!(body["data"]["pagination"]["total"], 2);

    let (status, _) =
        make_request(&app.router, Method::POST, "/api/v1/schedules/999/run", None).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn test_scheduler_status() -> anyhow::Result<()> {
    let app = create_test_app().await?;
    app.runner.run(ScheduleType::WorkOrders).await?;

    let (status, body) =
        make_request(&app.router, Method::GET, "/api/v1/scheduler/status", None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["scheduler"]["running"], false);
    assert_eq!(body["data"]["scheduler"]["total_jobs"], 0);
    assert_eq!(body["data"]["database"]["work_orders"], 2);
    Ok(())
}

#[tokio::test]
async fn test_extract_fuel_grades() -> anyhow::Result<()> {
    let app = create_test_app().await?;

    let (status, body) = make_request(
        &app.router,
        Method::POST,
        "/api/v1/extract/fuel-grades",
        Some(json!({ "codes": ["0126", "0135", "9999"] })),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    let grades = body["data"].as_array().cloned().unwrap_or_default();
    assert_eq!(grades.len(), 3);
    assert_eq!(grades[0]["display_name"], "Regular");
    assert_eq!(grades[1]["display_name"], "Plus");
    assert_eq!(grades[2]["known"], false);

    let (status, body) = make_request(
        &app.router,
        Method::POST,
        "/api/v1/extract/fuel-grades",
        Some(json!({ "text": "Regular, Diesel" })),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().map(Vec::len), Some(2));

    let (status, _) = make_request(
        &app.router,
        Method::POST,
        "/api/v1/extract/fuel-grades",
        Some(json!({ "codes": [] })),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn test_extract_address() -> anyhow::Result<()> {
    let app = create_test_app().await?;

    let (status, body) = make_request(
        &app.router,
        Method::POST,
        "/api/v1/extract/address",
        Some(json!({ "text": "1401 W Busch Blvd\nTampa, FL 33612" })),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["street"], "1401 W Busch Blvd");
    assert_eq!(body["data"]["city"], "Tampa");
    assert_eq!(body["data"]["state"], "FL");
    assert_eq!(body["data"]["zip"], "33612");
    assert_eq!(body["data"]["complete"], true);

    let (status, _) = make_request(
        &app.router,
        Method::POST,
        "/api/v1/extract/address",
        Some(json!({ "text": "" })),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn test_security_headers_on_api_responses() -> anyhow::Result<()> {
    let app = create_test_app().await?;
    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/v1/schedules")
                .body(Body::empty())?,
        )
        .await?;

    assert_eq!(response.headers()["x-content-type-options"], "nosniff");
    assert_eq!(response.headers()["x-frame-options"], "DENY");
    Ok(())
}
