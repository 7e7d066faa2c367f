use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use sqlx::types::Json;
use std::collections::BTreeMap;

use crate::extractors::work_order::dispenser_hint;
use crate::extractors::{Address, ServiceCode};
use crate::models::Dispenser;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct WorkOrder {
    pub id: i64,
    pub external_id: String,
    pub detail_url: Option<String>,
    pub store_number: Option<String>,
    pub customer_name: Option<String>,
    pub site_name: Option<String>,

    // Address
    pub street: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip: Option<String>,

    // Service
    pub service_code: Option<String>,
    pub service_name: Option<String>,
    pub service_quantity: Option<i64>,

    pub visit_date: Option<NaiveDate>,
    pub visit_time: Option<NaiveTime>,
    pub instructions: Option<String>,
    pub scraped_data: Json<BTreeMap<String, String>>,

    // Metadata
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// A work order together with its dispensers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkOrderDetail {
    #[serde(flatten)]
    pub work_order: WorkOrder,
    pub service: Option<ServiceInfo>,
    /// Dispenser count the portal says the visit covers.
    pub expected_dispensers: Option<u32>,
    pub dispensers: Vec<Dispenser>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceInfo {
    pub code: String,
    pub description: Option<String>,
    pub covers_all_dispensers: bool,
    pub open_neck_prover: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkOrderFilter {
    pub store: Option<String>,
    pub search: Option<String>,
    #[serde(default)]
    pub include_deleted: bool,
}

impl WorkOrder {
    pub fn service(&self) -> Option<ServiceCode> {
        self.service_code.as_deref().map(ServiceCode::from_code)
    }

    pub fn service_info(&self) -> Option<ServiceInfo> {
        self.service().map(|code| ServiceInfo {
            code: code.code().to_string(),
            description: code.description().map(str::to_string),
            covers_all_dispensers: code.covers_all_dispensers(),
            open_neck_prover: code.uses_open_neck_prover(),
        })
    }

    pub fn address(&self) -> Address {
        let mut address = Address {
            street: self.street.clone(),
            city: self.city.clone(),
            state: self.state.clone(),
            zip: self.zip.clone(),
            raw: String::new(),
        };
        address.raw = address.one_line();
        address
    }

    pub fn expected_dispensers(&self) -> Option<u32> {
        let quantity = self.service_quantity.and_then(|q| u32::try_from(q).ok());
        dispenser_hint(self.instructions.as_deref(), self.service().as_ref(), quantity)
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn into_detail(self, dispensers: Vec<Dispenser>) -> WorkOrderDetail {
        WorkOrderDetail {
            service: self.service_info(),
            expected_dispensers: self.expected_dispensers(),
            work_order: self,
            dispensers,
        }
    }
}
