//! Extraction heuristics for WorkFossa pages.
//!
//! Everything here is pure: HTML or text in, typed records out. The
//! browser side lives in [`crate::scraper`].

use scraper::ElementRef;

pub mod address;
pub mod dispenser;
pub mod fuel_grade;
pub mod work_order;

pub use address::Address;
pub use dispenser::ScrapedDispenser;
pub use fuel_grade::FuelGrade;
pub use work_order::{ScrapedWorkOrder, ServiceCode};

/// Text nodes under `element`, whitespace-collapsed, one per line.
pub(crate) fn element_lines(element: ElementRef<'_>) -> Vec<String> {
    element
        .text()
        .map(|t| t.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|t| !t.is_empty())
        .collect()
}
