use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use sqlx::types::Json;

use crate::extractors::FuelGrade;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct Dispenser {
    pub id: i64,
    pub work_order_id: i64,
    pub dispenser_number: String,
    pub title: Option<String>,
    pub make: Option<String>,
    pub model: Option<String>,
    pub serial_number: Option<String>,
    pub meter_type: Option<String>,
    pub number_of_nozzles: Option<i64>,
    pub stand_alone_code: Option<String>,
    pub fuel_grades: Json<Vec<FuelGrade>>,
    pub created_at: DateTime<Utc>,
}

impl Dispenser {
    /// Grades that need a meter test on this dispenser.
    pub fn testable_grades(&self) -> Vec<&FuelGrade> {
        self.fuel_grades
            .iter()
            .filter(|g| g.requires_meter_test())
            .collect()
    }

    pub fn grade_names(&self) -> Vec<&str> {
        self.fuel_grades.iter().map(|g| g.display_name()).collect()
    }
}
