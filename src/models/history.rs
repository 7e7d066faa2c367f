use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::models::{RunTrigger, ScheduleType};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct ScrapingHistory {
    pub id: i64,
    pub schedule_id: Option<i64>,
    pub schedule_type: ScheduleType,
    pub triggered_by: RunTrigger,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub success: Option<bool>,
    pub items_processed: i64,
    pub error_message: Option<String>,
    pub duration_ms: Option<i64>,
}

impl ScrapingHistory {
    pub fn is_running(&self) -> bool {
        self.completed_at.is_none()
    }
}

/// Outcome of one scrape run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RunSummary {
    pub items_processed: i64,
    pub items_failed: i64,
}

impl RunSummary {
    pub fn processed(items_processed: i64) -> Self {
        Self {
            items_processed,
            items_failed: 0,
        }
    }
}
