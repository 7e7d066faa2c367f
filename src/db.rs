use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::types::Json;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, instrument};

use crate::config::DatabaseConfig;
use crate::extractors::{ScrapedDispenser, ScrapedWorkOrder};
use crate::models::{
    Dispenser, RunTrigger, ScheduleType, ScrapingHistory, ScrapingSchedule, WorkOrder,
    WorkOrderDetail, WorkOrderFilter,
};
use crate::utils::error::{AppError, Result};

/// Counts reported on the status endpoint.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct DatabaseStats {
    pub work_orders: i64,
    pub dispensers: i64,
    pub schedules: i64,
    pub history_entries: i64,
}

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    #[instrument(skip(config))]
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&config.url)?
            .create_if_missing(true)
            .foreign_keys(true);

        // Every connection to `:memory:` is its own database
        let max_connections = if config.url.contains(":memory:") {
            1
        } else {
            config.max_connections
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .min_connections(config.min_connections.min(max_connections))
            .acquire_timeout(Duration::from_secs(config.acquire_timeout))
            .connect_with(options)
            .await?;
        info!(max_connections, "connected to database");

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        debug!("migrations applied");
        Ok(())
    }

    // Work orders

    /// Insert or refresh a work order keyed by its WorkFossa id. A soft
    /// deleted order stays deleted.
    pub async fn upsert_work_order(&self, scraped: &ScrapedWorkOrder) -> Result<WorkOrder> {
        let now = Utc::now();
        let work_order = sqlx::query_as::<_, WorkOrder>(
            r#"
            INSERT INTO work_orders (
                external_id, detail_url, store_number, customer_name, site_name,
                street, city, state, zip,
                service_code, service_name, service_quantity,
                visit_date, visit_time, instructions, scraped_data,
                created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(external_id) DO UPDATE SET
                detail_url = COALESCE(excluded.detail_url, work_orders.detail_url),
                store_number = COALESCE(excluded.store_number, work_orders.store_number),
                customer_name = COALESCE(excluded.customer_name, work_orders.customer_name),
                site_name = COALESCE(excluded.site_name, work_orders.site_name),
                street = COALESCE(excluded.street, work_orders.street),
                city = COALESCE(excluded.city, work_orders.city),
                state = COALESCE(excluded.state, work_orders.state),
                zip = COALESCE(excluded.zip, work_orders.zip),
                service_code = COALESCE(excluded.service_code, work_orders.service_code),
                service_name = COALESCE(excluded.service_name, work_orders.service_name),
                service_quantity = COALESCE(excluded.service_quantity, work_orders.service_quantity),
                visit_date = COALESCE(excluded.visit_date, work_orders.visit_date),
                visit_time = COALESCE(excluded.visit_time, work_orders.visit_time),
                instructions = COALESCE(excluded.instructions, work_orders.instructions),
                scraped_data = excluded.scraped_data,
                updated_at = excluded.updated_at
            RETURNING *
            "#,
        )
        .bind(&scraped.external_id)
        .bind(&scraped.detail_url)
        .bind(&scraped.store_number)
        .bind(&scraped.customer_name)
        .bind(&scraped.site_name)
        .bind(&scraped.address.street)
        .bind(&scraped.address.city)
        .bind(&scraped.address.state)
        .bind(&scraped.address.zip)
        .bind(scraped.service_code.as_ref().map(|c| c.code().to_string()))
        .bind(&scraped.service_name)
        .bind(scraped.service_quantity.map(i64::from))
        .bind(scraped.visit_date)
        .bind(scraped.visit_time)
        .bind(&scraped.instructions)
        .bind(Json(&scraped.scraped_data))
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(work_order)
    }

    pub async fn get_work_order(&self, id: i64) -> Result<Option<WorkOrder>> {
        let work_order = sqlx::query_as::<_, WorkOrder>(
            "SELECT * FROM work_orders WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(work_order)
    }

    pub async fn get_work_order_by_external_id(&self, external_id: &str) -> Result<Option<WorkOrder>> {
        let work_order = sqlx::query_as::<_, WorkOrder>(
            "SELECT * FROM work_orders WHERE external_id = ?",
        )
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(work_order)
    }

    pub async fn work_order_detail(&self, id: i64) -> Result<WorkOrderDetail> {
        let work_order = self
            .get_work_order(id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("work order {}", id)))?;
        let dispensers = self.list_dispensers(id).await?;
        Ok(work_order.into_detail(dispensers))
    }

    /// Page of work orders (1-based) plus the total matching the filter.
    pub async fn list_work_orders(
        &self,
        filter: &WorkOrderFilter,
        page: u32,
        per_page: u32,
    ) -> Result<(Vec<WorkOrder>, i64)> {
        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM work_orders WHERE 1 = 1");
        push_filter(&mut count, filter);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        let mut query = QueryBuilder::<Sqlite>::new("SELECT * FROM work_orders WHERE 1 = 1");
        push_filter(&mut query, filter);
        query
            .push(" ORDER BY visit_date IS NULL, visit_date ASC, id ASC LIMIT ")
            .push_bind(per_page as i64)
            .push(" OFFSET ")
            .push_bind(page.saturating_sub(1) as i64 * per_page as i64);

        let work_orders = query
            .build_query_as::<WorkOrder>()
            .fetch_all(&self.pool)
            .await?;
        Ok((work_orders, total))
    }

    pub async fn active_work_orders(&self) -> Result<Vec<WorkOrder>> {
        let work_orders = sqlx::query_as::<_, WorkOrder>(
            "SELECT * FROM work_orders WHERE deleted_at IS NULL ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(work_orders)
    }

    /// Returns `false` when there was no live work order with that id.
    pub async fn soft_delete_work_order(&self, id: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE work_orders SET deleted_at = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(Utc::now())
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    // Dispensers

    pub async fn list_dispensers(&self, work_order_id: i64) -> Result<Vec<Dispenser>> {
        let dispensers = sqlx::query_as::<_, Dispenser>(
            "SELECT * FROM dispensers WHERE work_order_id = ? ORDER BY id",
        )
        .bind(work_order_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(dispensers)
    }

    /// Swap the work order's dispenser set for `scraped` atomically.
    pub async fn replace_dispensers(
        &self,
        work_order_id: i64,
        scraped: &[ScrapedDispenser],
    ) -> Result<Vec<Dispenser>> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM dispensers WHERE work_order_id = ?")
            .bind(work_order_id)
            .execute(&mut *tx)
            .await?;

        let mut inserted = Vec::with_capacity(scraped.len());
        for dispenser in scraped {
            let row = sqlx::query_as::<_, Dispenser>(
                r#"
                INSERT INTO dispensers (
                    work_order_id, dispenser_number, title, make, model, serial_number,
                    meter_type, number_of_nozzles, stand_alone_code, fuel_grades, created_at
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                RETURNING *
                "#,
            )
            .bind(work_order_id)
            .bind(&dispenser.dispenser_number)
            .bind(&dispenser.title)
            .bind(&dispenser.make)
            .bind(&dispenser.model)
            .bind(&dispenser.serial_number)
            .bind(&dispenser.meter_type)
            .bind(dispenser.number_of_nozzles.map(i64::from))
            .bind(&dispenser.stand_alone_code)
            .bind(Json(&dispenser.fuel_grades))
            .bind(now)
            .fetch_one(&mut *tx)
            .await?;
            inserted.push(row);
        }

        sqlx::query("UPDATE work_orders SET updated_at = ? WHERE id = ?")
            .bind(now)
            .bind(work_order_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(inserted)
    }

    // Schedules

    pub async fn create_schedule(&self, schedule: &ScrapingSchedule) -> Result<ScrapingSchedule> {
        let created = sqlx::query_as::<_, ScrapingSchedule>(
            r#"
            INSERT INTO scraping_schedules (
                schedule_type, interval_hours, active_start_hour, active_end_hour, enabled,
                last_run, next_run, consecutive_failures, last_error, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(schedule.schedule_type)
        .bind(schedule.interval_hours)
        .bind(schedule.active_start_hour)
        .bind(schedule.active_end_hour)
        .bind(schedule.enabled)
        .bind(schedule.last_run)
        .bind(schedule.next_run)
        .bind(schedule.consecutive_failures)
        .bind(&schedule.last_error)
        .bind(schedule.created_at)
        .bind(schedule.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => AppError::Conflict(format!(
                "a {} schedule already exists",
                schedule.schedule_type
            )),
            _ => AppError::Database(e),
        })?;

        Ok(created)
    }

    pub async fn get_schedule(&self, id: i64) -> Result<Option<ScrapingSchedule>> {
        let schedule = sqlx::query_as::<_, ScrapingSchedule>(
            "SELECT * FROM scraping_schedules WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(schedule)
    }

    pub async fn get_schedule_by_type(
        &self,
        schedule_type: ScheduleType,
    ) -> Result<Option<ScrapingSchedule>> {
        let schedule = sqlx::query_as::<_, ScrapingSchedule>(
            "SELECT * FROM scraping_schedules WHERE schedule_type = ?",
        )
        .bind(schedule_type)
        .fetch_optional(&self.pool)
        .await?;
        Ok(schedule)
    }

    pub async fn list_schedules(&self) -> Result<Vec<ScrapingSchedule>> {
        let schedules = sqlx::query_as::<_, ScrapingSchedule>(
            "SELECT * FROM scraping_schedules ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(schedules)
    }

    pub async fn update_schedule(&self, schedule: &ScrapingSchedule) -> Result<ScrapingSchedule> {
        let updated = sqlx::query_as::<_, ScrapingSchedule>(
            r#"
            UPDATE scraping_schedules SET
                interval_hours = ?, active_start_hour = ?, active_end_hour = ?, enabled = ?,
                last_run = ?, next_run = ?, consecutive_failures = ?, last_error = ?,
                updated_at = ?
            WHERE id = ?
            RETURNING *
            "#,
        )
        .bind(schedule.interval_hours)
        .bind(schedule.active_start_hour)
        .bind(schedule.active_end_hour)
        .bind(schedule.enabled)
        .bind(schedule.last_run)
        .bind(schedule.next_run)
        .bind(schedule.consecutive_failures)
        .bind(&schedule.last_error)
        .bind(schedule.updated_at)
        .bind(schedule.id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::not_found(format!("schedule {}", schedule.id)))?;

        Ok(updated)
    }

    /// Write only what a scrape run decides, leaving settings edited while
    /// it ran alone. `enabled` is only ever switched off here. `None` when
    /// the schedule was deleted in the meantime.
    pub async fn record_run_outcome(
        &self,
        schedule: &ScrapingSchedule,
        disable: bool,
    ) -> Result<Option<ScrapingSchedule>> {
        let updated = sqlx::query_as::<_, ScrapingSchedule>(
            r#"
            UPDATE scraping_schedules SET
                last_run = ?, next_run = ?, consecutive_failures = ?, last_error = ?,
                enabled = CASE WHEN ? THEN 0 ELSE enabled END,
                updated_at = ?
            WHERE id = ?
            RETURNING *
            "#,
        )
        .bind(schedule.last_run)
        .bind(schedule.next_run)
        .bind(schedule.consecutive_failures)
        .bind(&schedule.last_error)
        .bind(disable)
        .bind(schedule.updated_at)
        .bind(schedule.id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(updated)
    }

    pub async fn set_next_run(&self, id: i64, next_run: Option<DateTime<Utc>>) -> Result<()> {
        sqlx::query("UPDATE scraping_schedules SET next_run = ? WHERE id = ?")
            .bind(next_run)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn delete_schedule(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM scraping_schedules WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // History

    pub async fn start_history(
        &self,
        schedule_id: Option<i64>,
        schedule_type: ScheduleType,
        triggered_by: RunTrigger,
        started_at: DateTime<Utc>,
    ) -> Result<i64> {
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO scraping_history (schedule_id, schedule_type, triggered_by, started_at)
            VALUES (?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(schedule_id)
        .bind(schedule_type)
        .bind(triggered_by)
        .bind(started_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    pub async fn complete_history(
        &self,
        id: i64,
        success: bool,
        items_processed: i64,
        error_message: Option<&str>,
        completed_at: DateTime<Utc>,
    ) -> Result<ScrapingHistory> {
        let started_at = sqlx::query_scalar::<_, DateTime<Utc>>(
            "SELECT started_at FROM scraping_history WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::not_found(format!("history entry {}", id)))?;
        let duration_ms = (completed_at - started_at).num_milliseconds().max(0);

        let entry = sqlx::query_as::<_, ScrapingHistory>(
            r#"
            UPDATE scraping_history SET
                completed_at = ?, success = ?, items_processed = ?, error_message = ?, duration_ms = ?
            WHERE id = ?
            RETURNING *
            "#,
        )
        .bind(completed_at)
        .bind(success)
        .bind(items_processed)
        .bind(error_message)
        .bind(duration_ms)
        .bind(id)
        .fetch_one(&self.pool)
        .await?;
        Ok(entry)
    }

    /// Most recent first.
    pub async fn list_history(&self, schedule_id: i64, limit: u32) -> Result<Vec<ScrapingHistory>> {
        let entries = sqlx::query_as::<_, ScrapingHistory>(
            "SELECT * FROM scraping_history WHERE schedule_id = ? ORDER BY started_at DESC, id DESC LIMIT ?",
        )
        .bind(schedule_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }

    /// Keep only the newest `keep` entries for a schedule.
    pub async fn prune_history(&self, schedule_id: i64, keep: u32) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM scraping_history
            WHERE schedule_id = ? AND id NOT IN (
                SELECT id FROM scraping_history
                WHERE schedule_id = ?
                ORDER BY started_at DESC, id DESC
                LIMIT ?
            )
            "#,
        )
        .bind(schedule_id)
        .bind(schedule_id)
        .bind(keep as i64)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn stats(&self) -> Result<DatabaseStats> {
        let (work_orders, dispensers, schedules, history_entries) =
            sqlx::query_as::<_, (i64, i64, i64, i64)>(
                r#"
                SELECT
                    (SELECT COUNT(*) FROM work_orders WHERE deleted_at IS NULL),
                    (SELECT COUNT(*) FROM dispensers),
                    (SELECT COUNT(*) FROM scraping_schedules),
                    (SELECT COUNT(*) FROM scraping_history)
                "#,
            )
            .fetch_one(&self.pool)
            .await?;

        Ok(DatabaseStats {
            work_orders,
            dispensers,
            schedules,
            history_entries,
        })
    }
}

fn push_filter(query: &mut QueryBuilder<'_, Sqlite>, filter: &WorkOrderFilter) {
    if !filter.include_deleted {
        query.push(" AND deleted_at IS NULL");
    }
    if let Some(store) = filter.store.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        let store = store.trim_start_matches('#').to_string();
        query
            .push(" AND (store_number = ")
            .push_bind(store.clone())
            .push(" OR store_number = ")
            .push_bind(format!("#{}", store))
            .push(")");
    }
    if let Some(search) = filter.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        let pattern = format!("%{}%", search);
        query.push(" AND (");
        for (i, column) in ["external_id", "customer_name", "site_name", "street", "city"]
            .iter()
            .enumerate()
        {
            if i > 0 {
                query.push(" OR ");
            }
            query.push(*column).push(" LIKE ").push_bind(pattern.clone());
        }
        query.push(")");
    }
}
