//! Fleet controller for site-scraping worker processes.
//!
//! A single long-lived process owns a SQLite-backed store and drives a
//! small set of cooperating managers — a site configuration registry, a
//! browser session store, a task status reconciler, a queue manager, a
//! process supervisor, a result/check-in ingest, and a settings provider
//! — that together admit, schedule, and supervise one worker subprocess
//! per site at a time.

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::too_many_arguments)]

pub mod app;
pub mod browser_store;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod ingest;
pub mod queue;
pub mod reconciler;
pub mod registry;
pub mod settings;
pub mod supervisor;

pub use app::{Controller, ControllerPaths};
pub use error::CoreError;
