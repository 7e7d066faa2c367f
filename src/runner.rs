use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::db::Database;
use crate::extractors::{dispenser, work_order, ScrapedWorkOrder};
use crate::models::{Dispenser, RunSummary, ScheduleType, WorkOrder};
use crate::scraper::{Session, WorkFossaScraper};
use crate::utils::error::{AppError, Result};

/// One scrape job end to end. The scheduler and the API only talk to
/// WorkFossa through this.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ScrapeRunner: Send + Sync {
    async fn run(&self, schedule_type: ScheduleType) -> Result<RunSummary>;

    /// Re-scrape the equipment of a single work order.
    async fn refresh_dispensers(&self, work_order_id: i64) -> Result<Vec<Dispenser>>;
}

pub struct WorkFossaRunner {
    db: Database,
    scraper: Arc<WorkFossaScraper>,
}

impl WorkFossaRunner {
    pub fn new(db: Database, scraper: Arc<WorkFossaScraper>) -> Self {
        Self { db, scraper }
    }

    async fn session(&self) -> Result<Arc<Session>> {
        let session = self.scraper.login().await.map_err(scraping)?;
        Ok(Arc::new(session))
    }

    #[instrument(skip(self))]
    async fn scrape_work_orders(&self) -> Result<RunSummary> {
        let session = self.session().await?;
        let html = session.fetch_work_orders().await.map_err(scraping)?;

        let scraped = work_order::parse_work_order_list(&html);
        self.save_work_orders(&scraped).await
    }

    /// The list page only comes back once its row markers rendered, so an
    /// empty parse means the layout changed and counts as a failure.
    async fn save_work_orders(&self, scraped: &[ScrapedWorkOrder]) -> Result<RunSummary> {
        if scraped.is_empty() {
            return Err(AppError::Scraping(
                "work order list rendered but no rows could be parsed".to_string(),
            ));
        }

        let mut summary = RunSummary::default();
        for order in scraped {
            match self.db.upsert_work_order(order).await {
                Ok(saved) => {
                    debug!(
                        external_id = %saved.external_id,
                        id = saved.id,
                        expected_dispensers = ?order.dispenser_hint(),
                        "work order saved"
                    );
                    summary.items_processed += 1;
                }
                Err(e) => {
                    warn!(external_id = %order.external_id, error = %e, "work order not saved");
                    summary.items_failed += 1;
                }
            }
        }

        if summary.items_processed == 0 && summary.items_failed > 0 {
            return Err(AppError::Scraping(format!(
                "none of {} work orders could be saved",
                summary.items_failed
            )));
        }

        info!(
            processed = summary.items_processed,
            failed = summary.items_failed,
            "work order scrape finished"
        );
        Ok(summary)
    }

    #[instrument(skip(self))]
    async fn scrape_all_dispensers(&self) -> Result<RunSummary> {
        let work_orders = self.db.active_work_orders().await?;
        if work_orders.is_empty() {
            info!("no active work orders, nothing to scrape");
            return Ok(RunSummary::default());
        }

        let session = self.session().await?;
        let mut summary = RunSummary::default();

        for order in &work_orders {
            match self.scrape_dispensers(&session, order).await {
                Ok(dispensers) => {
                    debug!(external_id = %order.external_id, count = dispensers.len(), "dispensers saved");
                    summary.items_processed += 1;
                }
                Err(e) => {
                    warn!(external_id = %order.external_id, error = %e, "dispenser scrape failed");
                    summary.items_failed += 1;
                }
            }
        }

        if summary.items_processed == 0 {
            return Err(AppError::Scraping(format!(
                "dispenser scrape failed for all {} work orders",
                summary.items_failed
            )));
        }

        info!(
            processed = summary.items_processed,
            failed = summary.items_failed,
            "dispenser scrape finished"
        );
        Ok(summary)
    }

    async fn scrape_dispensers(&self, session: &Arc<Session>, order: &WorkOrder) -> Result<Vec<Dispenser>> {
        let html = session
            .fetch_equipment(&order.external_id, order.detail_url.as_deref())
            .await
            .map_err(scraping)?;

        let scraped = dispenser::parse_equipment_page(&html);
        if scraped.is_empty() {
            // Keep what we had rather than wiping it on a layout change
            warn!(external_id = %order.external_id, "equipment page had no dispensers");
            return self.db.list_dispensers(order.id).await;
        }

        if let Some(expected) = order.expected_dispensers() {
            if expected as usize != scraped.len() {
                warn!(
                    external_id = %order.external_id,
                    expected,
                    found = scraped.len(),
                    "dispenser count differs from the work order"
                );
            }
        }

        self.db.replace_dispensers(order.id, &scraped).await
    }
}

#[async_trait]
impl ScrapeRunner for WorkFossaRunner {
    async fn run(&self, schedule_type: ScheduleType) -> Result<RunSummary> {
        match schedule_type {
            ScheduleType::WorkOrders => self.scrape_work_orders().await,
            ScheduleType::Dispensers => self.scrape_all_dispensers().await,
        }
    }

    async fn refresh_dispensers(&self, work_order_id: i64) -> Result<Vec<Dispenser>> {
        let order = self
            .db
            .get_work_order(work_order_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("work order {}", work_order_id)))?;

        let session = self.session().await?;
        self.scrape_dispensers(&session, &order).await
    }
}

fn scraping(err: anyhow::Error) -> AppError {
    AppError::Scraping(format!("{:#}", err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::valid_config;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn runner_without_credentials() -> WorkFossaRunner {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let db = Database::from_pool(pool);
        db.migrate().await.unwrap();

        let mut config = valid_config().workfossa;
        config.username = None;
        config.password = None;
        WorkFossaRunner::new(db, Arc::new(WorkFossaScraper::new(config).unwrap()))
    }

    #[tokio::test]
    async fn test_dispensers_without_work_orders_is_a_no_op() {
        let runner = runner_without_credentials().await;
        let summary = runner.run(ScheduleType::Dispensers).await.unwrap();
        assert_eq!(summary, RunSummary::default());
    }

    #[tokio::test]
    async fn test_work_orders_without_credentials_is_a_scraping_error() {
        let runner = runner_without_credentials().await;
        let err = runner.run(ScheduleType::WorkOrders).await.unwrap_err();
        assert!(matches!(err, AppError::Scraping(_)));
    }

    #[tokio::test]
    async fn test_empty_work_order_list_is_a_failure() {
        let runner = runner_without_credentials().await;
        let err = runner.save_work_orders(&[]).await.unwrap_err();
        assert!(matches!(err, AppError::Scraping(_)));
    }

    #[tokio::test]
    async fn test_save_work_orders_counts_rows() {
        let runner = runner_without_credentials().await;
        let html = r#"<table><tbody><tr class="work-order">
            <td class="work-order-id">W-110296</td>
            <td class="service">6 x 2861 - AccuMeasure - All Dispensers</td>
        </tr></tbody></table>"#;
        let scraped = work_order::parse_work_order_list(html);

        let summary = runner.save_work_orders(&scraped).await.unwrap();
        assert_eq!(summary, RunSummary::processed(1));
        let saved = runner
            .db
            .get_work_order_by_external_id("W-110296")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(saved.expected_dispensers(), Some(6));
    }

    #[tokio::test]
    async fn test_refresh_unknown_work_order_is_not_found() {
        let runner = runner_without_credentials().await;
        let err = runner.refresh_dispensers(42).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound { .. }));
    }
}
