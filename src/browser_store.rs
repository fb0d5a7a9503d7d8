//! Browser Session Store (C3): per-site cookies and web storage, reused
//! across worker invocations to avoid repeating a login.
//!
//! Wraps `BrowserStateRepository` with the one behavior a bare repository
//! can't provide on its own: synthesizing the parent `Crawler` row when a
//! site's browser state is saved before any other write has touched it.

use anyhow::{anyhow, Result};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use std::sync::Arc;
use tracing::instrument;

use crate::domain::entities::{BrowserState, Crawler};
use crate::domain::repositories::{BrowserStateRepository, CrawlerRepository};

pub struct BrowserStore {
    pool: SqlitePool,
    crawlers: Arc<dyn CrawlerRepository>,
    states: Arc<dyn BrowserStateRepository>,
}

impl BrowserStore {
    #[must_use]
    pub fn new(
        pool: SqlitePool,
        crawlers: Arc<dyn CrawlerRepository>,
        states: Arc<dyn BrowserStateRepository>,
    ) -> Self {
        Self {
            pool,
            crawlers,
            states,
        }
    }

    /// Synthesizing the parent crawler row and saving the browser state
    /// happen inside one `sqlx::Transaction`, so a failure partway through
    /// never leaves a crawler row with no browser state committed against
    /// it, or vice versa.
    #[instrument(skip(self, state))]
    pub async fn save(&self, site_id: &str, state: &BrowserState) -> Result<()> {
        state
            .validate()
            .map_err(|e| anyhow!("browser state for {site_id} is invalid: {e}"))?;

        let mut tx = self.pool.begin().await?;
        if tx_find_crawler(&mut tx, site_id).await?.is_none() {
            tx_create_crawler(&mut tx, &Crawler::new(site_id)).await?;
        }
        tx_save_browser_state(&mut tx, state).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn get(&self, site_id: &str) -> Result<Option<BrowserState>> {
        self.states.find_by_id(site_id).await
    }

    pub async fn delete(&self, site_id: &str) -> Result<()> {
        self.states.delete(site_id).await
    }

    pub async fn get_all(&self) -> Result<Vec<BrowserState>> {
        self.states.find_all().await
    }
}

async fn tx_find_crawler(tx: &mut Transaction<'_, Sqlite>, site_id: &str) -> Result<Option<Crawler>> {
    let row = sqlx::query(
        "SELECT site_id, is_logged_in, last_login_time, total_tasks FROM crawler WHERE site_id = $1",
    )
    .bind(site_id)
    .fetch_optional(&mut **tx)
    .await?;

    row.as_ref()
        .map(|row| -> Result<Crawler> {
            let last_login_time: Option<String> = row.try_get("last_login_time")?;
            let last_login_time = last_login_time
                .map(|ts| {
                    chrono::DateTime::parse_from_rfc3339(&ts)
                        .map_err(|e| anyhow!("failed to parse last_login_time: {e}"))
                        .map(|dt| dt.with_timezone(&chrono::Utc))
                })
                .transpose()?;

            Ok(Crawler {
                site_id: row.try_get("site_id")?,
                is_logged_in: row.try_get("is_logged_in")?,
                last_login_time,
                total_tasks: row.try_get("total_tasks")?,
            })
        })
        .transpose()
}

async fn tx_create_crawler(tx: &mut Transaction<'_, Sqlite>, crawler: &Crawler) -> Result<()> {
    sqlx::query(
        "INSERT INTO crawler (site_id, is_logged_in, last_login_time, total_tasks)
         VALUES ($1, $2, $3, $4)",
    )
    .bind(&crawler.site_id)
    .bind(crawler.is_logged_in)
    .bind(crawler.last_login_time.map(|dt| dt.to_rfc3339()))
    .bind(crawler.total_tasks)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn tx_save_browser_state(tx: &mut Transaction<'_, Sqlite>, state: &BrowserState) -> Result<()> {
    let cookies = serde_json::to_string(&state.cookies)?;
    let local_storage = serde_json::to_string(&state.local_storage)?;
    let session_storage = serde_json::to_string(&state.session_storage)?;

    sqlx::query(
        "INSERT INTO browser_state (site_id, cookies, local_storage, session_storage, updated_at)
         VALUES ($1, $2, $3, $4, $5)
         ON CONFLICT(site_id) DO UPDATE SET
            cookies = excluded.cookies,
            local_storage = excluded.local_storage,
            session_storage = excluded.session_storage,
            updated_at = excluded.updated_at",
    )
    .bind(&state.site_id)
    .bind(cookies)
    .bind(local_storage)
    .bind(session_storage)
    .bind(state.updated_at.to_rfc3339())
    .execute(&mut **tx)
    .await?;
    Ok(())
}
