use serde::{Deserialize, Serialize};

pub mod dispenser;
pub mod history;
pub mod schedule;
pub mod work_order;

// Re-exports for convenience
pub use dispenser::*;
pub use history::*;
pub use schedule::*;
pub use work_order::*;

// Common enums used across models
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ScheduleType {
    WorkOrders,
    Dispensers,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum RunTrigger {
    Scheduled,
    Manual,
}

impl ScheduleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleType::WorkOrders => "work_orders",
            ScheduleType::Dispensers => "dispensers",
        }
    }
}

impl std::str::FromStr for ScheduleType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "work_orders" => Ok(ScheduleType::WorkOrders),
            "dispensers" => Ok(ScheduleType::Dispensers),
            other => Err(format!("unknown schedule type: {}", other)),
        }
    }
}

impl std::fmt::Display for ScheduleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl RunTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunTrigger::Scheduled => "scheduled",
            RunTrigger::Manual => "manual",
        }
    }
}
