//! Repository interfaces
//!
//! Trait definitions for data access patterns. Every method that mutates
//! the `Task` table is intentionally confined to `TaskRepository` + the
//! reconciler that sits on top of it (`crate::reconciler`) — no other
//! repository can write a task row.

use async_trait::async_trait;
use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::domain::entities::{
    BrowserState, CheckInOutcome, CheckInResult, Crawler, CrawlerConfig, CrawlerCredential,
    CrawlResult, CrawlResultCreate, Settings, SiteConfig, Task, TaskStatus,
};

#[async_trait]
pub trait CrawlerRepository: Send + Sync {
    async fn create(&self, crawler: &Crawler) -> Result<()>;
    async fn find_by_id(&self, site_id: &str) -> Result<Option<Crawler>>;
    async fn find_all(&self) -> Result<Vec<Crawler>>;
    async fn update(&self, crawler: &Crawler) -> Result<()>;
    async fn delete(&self, site_id: &str) -> Result<()>;
}

#[async_trait]
pub trait SiteConfigRepository: Send + Sync {
    async fn upsert(&self, config: &SiteConfig) -> Result<()>;
    async fn find_by_id(&self, site_id: &str) -> Result<Option<SiteConfig>>;
    async fn find_all(&self) -> Result<Vec<SiteConfig>>;
}

#[async_trait]
pub trait CrawlerConfigRepository: Send + Sync {
    async fn upsert(&self, config: &CrawlerConfig) -> Result<()>;
    async fn find_by_id(&self, site_id: &str) -> Result<Option<CrawlerConfig>>;
    async fn find_all(&self) -> Result<Vec<CrawlerConfig>>;
}

#[async_trait]
pub trait CrawlerCredentialRepository: Send + Sync {
    async fn upsert(&self, credential: &CrawlerCredential) -> Result<()>;
    async fn find_by_id(&self, site_id: &str) -> Result<Option<CrawlerCredential>>;
    async fn find_all(&self) -> Result<Vec<CrawlerCredential>>;
}

#[async_trait]
pub trait BrowserStateRepository: Send + Sync {
    async fn save(&self, state: &BrowserState) -> Result<()>;
    async fn find_by_id(&self, site_id: &str) -> Result<Option<BrowserState>>;
    async fn delete(&self, site_id: &str) -> Result<()>;
    async fn find_all(&self) -> Result<Vec<BrowserState>>;
}

/// Sole repository permitted to write the `Task` table — see
/// `crate::reconciler::TaskReconciler` for the single-writer wrapper built
/// on top of it.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn create(&self, task: &Task) -> Result<()>;
    async fn find_by_id(&self, task_id: &str) -> Result<Option<Task>>;
    async fn find_all(
        &self,
        site_id: Option<&str>,
        status: Option<TaskStatus>,
        limit: Option<i64>,
    ) -> Result<Vec<Task>>;
    async fn find_ready(&self, site_id: Option<&str>) -> Result<Vec<Task>>;
    async fn update(&self, task: &Task) -> Result<()>;
}

#[async_trait]
pub trait ResultRepository: Send + Sync {
    async fn save(&self, result: CrawlResultCreate) -> Result<CrawlResult>;
    async fn find_by_task(&self, task_id: &str) -> Result<Option<CrawlResult>>;
    async fn latest_for_site(&self, site_id: &str) -> Result<Option<CrawlResult>>;
    async fn in_range(
        &self,
        site_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<CrawlResult>>;
}

#[async_trait]
pub trait CheckInRepository: Send + Sync {
    async fn save(
        &self,
        site_id: &str,
        task_id: &str,
        result: CheckInOutcome,
        checkin_date: DateTime<Utc>,
    ) -> Result<CheckInResult>;
    async fn latest_for_site(&self, site_id: &str) -> Result<Option<CheckInResult>>;
    async fn for_date(&self, site_id: &str, date: DateTime<Utc>) -> Result<Option<CheckInResult>>;
    async fn in_range(
        &self,
        site_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<CheckInResult>>;
}

/// The single settings row (`id = 1`). `load` returns `None` only before
/// first-run initialization has ever persisted one.
#[async_trait]
pub trait SettingsRepository: Send + Sync {
    async fn load(&self) -> Result<Option<Settings>>;
    async fn upsert(&self, settings: &Settings) -> Result<()>;
}
