//! Repository implementations
//!
//! Concrete SQLite-backed implementations of the traits in
//! `domain::repositories`, one module per entity.

pub mod browser_state;
pub mod checkin;
pub mod crawler;
pub mod crawler_config;
pub mod crawler_credential;
pub mod result;
pub mod settings;
pub mod site_config;
pub mod task;

pub use browser_state::SqliteBrowserStateRepository;
pub use checkin::SqliteCheckInRepository;
pub use crawler::SqliteCrawlerRepository;
pub use crawler_config::SqliteCrawlerConfigRepository;
pub use crawler_credential::SqliteCrawlerCredentialRepository;
pub use result::SqliteResultRepository;
pub use settings::SqliteSettingsRepository;
pub use site_config::SqliteSiteConfigRepository;
pub use task::SqliteTaskRepository;
