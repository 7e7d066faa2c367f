use super::*;
use fossawork::models::{ActiveHours, NewSchedule, RunTrigger, ScrapingSchedule};

async fn create_schedule(
    app: &TestApp,
    schedule_type: ScheduleType,
    interval_hours: f64,
) -> anyhow::Result<ScrapingSchedule> {
    let schedule = ScrapingSchedule::new(NewSchedule {
        schedule_type,
        interval_hours,
        active_hours: None,
        enabled: Some(true),
    });
    Ok(app.db.create_schedule(&schedule).await?)
}

#[tokio::test]
async fn test_start_registers_enabled_schedules() -> anyhow::Result<()> {
    let app = create_test_app().await?;
    let work_orders = create_schedule(&app, ScheduleType::WorkOrders, 1.0).await?;
    let mut dispensers = create_schedule(&app, ScheduleType::Dispensers, 6.0).await?;
    dispensers.enabled = false;
    app.db.update_schedule(&dispensers).await?;

    app.scheduler.start().await?;
    assert!(app.scheduler.is_started());

    let jobs = app.scheduler.list_jobs().await;
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].schedule_id, work_orders.id);
    assert_eq!(jobs[0].cron_expression, "0 0 0,1,2,3,4,5,6,7,8,9,10,11,12,13,14,15,16,17,18,19,20,21,22,23 * * *");

    let stored = app.db.get_schedule(work_orders.id).await?.expect("schedule");
    assert!(stored.next_run.is_some());

    app.scheduler.shutdown().await?;
    assert!(!app.scheduler.is_started());
    Ok(())
}

#[tokio::test]
async fn test_active_hours_shape_the_cron_expression() -> anyhow::Result<()> {
    let app = create_test_app().await?;
    let schedule = ScrapingSchedule::new(NewSchedule {
        schedule_type: ScheduleType::WorkOrders,
        interval_hours: 2.0,
        active_hours: Some(ActiveHours::new(8, 17)?),
        enabled: Some(true),
    });
    let schedule = app.db.create_schedule(&schedule).await?;

    let job = app.scheduler.schedule(&schedule).await?;
    assert_eq!(job.cron_expression, "0 0 8,10,12,14,16 * * *");
    Ok(())
}

#[tokio::test]
async fn test_run_now_updates_schedule_and_history() -> anyhow::Result<()> {
    let app = create_test_app().await?;
    let schedule = create_schedule(&app, ScheduleType::WorkOrders, 1.0).await?;

    let entry = app.scheduler.run_now(schedule.id).await?;
    assert_eq!(entry.success, Some(true));
    assert_eq!(entry.triggered_by, RunTrigger::Manual);
    assert_eq!(entry.items_processed, 2);
    assert!(entry.completed_at.is_some());

    let stored = app.db.get_schedule(schedule.id).await?.expect("schedule");
    assert!(stored.last_run.is_some());
    assert_eq!(stored.consecutive_failures, 0);
    assert_eq!(app.runner.calls(), 1);

    // The dispenser run walks the work orders the first run saved
    let dispensers = create_schedule(&app, ScheduleType::Dispensers, 4.0).await?;
    let entry = app.scheduler.run_now(dispensers.id).await?;
    assert_eq!(entry.items_processed, 2);
    let order = app
        .db
        .get_work_order_by_external_id("W-110296")
        .await?
        .expect("work order");
    assert_eq!(app.db.list_dispensers(order.id).await?.len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_failures_disable_schedule_after_limit() -> anyhow::Result<()> {
    let app = create_test_app().await?;
    let schedule = create_schedule(&app, ScheduleType::WorkOrders, 1.0).await?;
    app.scheduler.schedule(&schedule).await?;
    app.runner.set_failing(true);

    let first = app.scheduler.run_now(schedule.id).await?;
    assert_eq!(first.success, Some(false));
    assert_eq!(first.error_message.as_deref(), Some("Scraping error: login rejected"));
    let stored = app.db.get_schedule(schedule.id).await?.expect("schedule");
    assert!(stored.enabled);
    assert_eq!(stored.consecutive_failures, 1);

    // max_consecutive_failures is 2 in the test config
    app.scheduler.run_now(schedule.id).await?;
    let stored = app.db.get_schedule(schedule.id).await?.expect("schedule");
    assert!(!stored.enabled);
    assert_eq!(stored.consecutive_failures, 2);
    assert!(stored.last_error.is_some());
    assert!(app.scheduler.get_job_info(schedule.id).await.is_none());

    let status = app.scheduler.status().await;
    assert_eq!(status.failed_runs, 2);
    assert_eq!(status.completed_runs, 0);
    Ok(())
}

#[tokio::test]
async fn test_history_is_pruned_to_retention() -> anyhow::Result<()> {
    let app = create_test_app().await?;
    let schedule = create_schedule(&app, ScheduleType::WorkOrders, 1.0).await?;

    for _ in 0..5 {
        app.scheduler.run_now(schedule.id).await?;
    }

    // history_retention is 3 in the test config
    let history = app.db.list_history(schedule.id, 50).await?;
    assert_eq!(history.len(), 3);
    assert!(history.windows(2).all(|w| w[0].started_at >= w[1].started_at));
    Ok(())
}
