pub mod config;
pub mod db;
pub mod extractors;
pub mod models;
pub mod runner;
pub mod scheduler;
pub mod scraper;
pub mod telemetry;
pub mod utils;
pub mod web;

// Re-export commonly used types
pub use config::AppConfig;
pub use db::Database;
pub use runner::{ScrapeRunner, WorkFossaRunner};
pub use scheduler::ScrapeScheduler;
pub use scraper::WorkFossaScraper;
pub use utils::error::AppError;

pub type Result<T> = std::result::Result<T, AppError>;
