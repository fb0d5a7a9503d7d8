//! Infrastructure layer: the relational store, repository implementations,
//! process configuration, and logging bootstrap. Nothing above this layer
//! talks to `sqlx` or the filesystem directly.

pub mod config;
pub mod database_connection;
pub mod logging;
pub mod repositories;

pub use config::{ConfigManager, DATABASE_FILE_NAME};
pub use database_connection::DatabaseConnection;
pub use logging::{init_logging, init_worker_logging, log_directory, LoggingConfig};
