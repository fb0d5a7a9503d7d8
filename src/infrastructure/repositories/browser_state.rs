//! `BrowserState` repository: per-site cookies and web storage.
//!
//! `save` validates structural invariants before writing; `find_by_id`
//! re-validates on read and drops (logging) any record that fails, rather
//! than returning malformed data to a caller.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use tracing::warn;

use crate::domain::{entities::BrowserState, repositories::BrowserStateRepository};

pub struct SqliteBrowserStateRepository {
    pool: SqlitePool,
}

impl SqliteBrowserStateRepository {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_state(row: &sqlx::sqlite::SqliteRow) -> Result<BrowserState> {
        let cookies: String = row.try_get("cookies")?;
        let local_storage: String = row.try_get("local_storage")?;
        let session_storage: String = row.try_get("session_storage")?;
        let updated_at: String = row.try_get("updated_at")?;

        Ok(BrowserState {
            site_id: row.try_get("site_id")?,
            cookies: serde_json::from_str(&cookies)
                .map_err(|e| anyhow!("failed to parse cookies: {e}"))?,
            local_storage: serde_json::from_str(&local_storage)
                .map_err(|e| anyhow!("failed to parse local_storage: {e}"))?,
            session_storage: serde_json::from_str(&session_storage)
                .map_err(|e| anyhow!("failed to parse session_storage: {e}"))?,
            updated_at: DateTime::parse_from_rfc3339(&updated_at)
                .map_err(|e| anyhow!("failed to parse updated_at: {e}"))?
                .with_timezone(&Utc),
        })
    }
}

#[async_trait]
impl BrowserStateRepository for SqliteBrowserStateRepository {
    async fn save(&self, state: &BrowserState) -> Result<()> {
        state
            .validate()
            .map_err(|e| anyhow!("browser state for {} is invalid: {e}", state.site_id))?;

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
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_by_id(&self, site_id: &str) -> Result<Option<BrowserState>> {
        let row = sqlx::query(
            "SELECT site_id, cookies, local_storage, session_storage, updated_at
             FROM browser_state WHERE site_id = $1",
        )
        .bind(site_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else { return Ok(None) };
        let state = Self::row_to_state(&row)?;
        if let Err(reason) = state.validate() {
            warn!(site_id, reason, "stored browser state failed validation on read");
            return Ok(None);
        }
        Ok(Some(state))
    }

    async fn delete(&self, site_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM browser_state WHERE site_id = $1")
            .bind(site_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find_all(&self) -> Result<Vec<BrowserState>> {
        let rows = sqlx::query(
            "SELECT site_id, cookies, local_storage, session_storage, updated_at FROM browser_state",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut states = Vec::with_capacity(rows.len());
        for row in &rows {
            let state = Self::row_to_state(row)?;
            if state.validate().is_ok() {
                states.push(state);
            }
        }
        Ok(states)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::{Crawler, CookieAttrs};
    use crate::domain::repositories::CrawlerRepository;
    use crate::infrastructure::database_connection::DatabaseConnection;
    use crate::infrastructure::repositories::SqliteCrawlerRepository;
    use std::collections::HashMap;

    async fn with_crawler(site_id: &str) -> (SqliteBrowserStateRepository, DatabaseConnection) {
        let db = DatabaseConnection::new("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();
        SqliteCrawlerRepository::new(db.pool().clone())
            .create(&Crawler::new(site_id))
            .await
            .unwrap();
        (SqliteBrowserStateRepository::new(db.pool().clone()), db)
    }

    #[tokio::test]
    async fn save_then_find_round_trips() {
        let (repo, _db) = with_crawler("site_a").await;
        let mut cookies = HashMap::new();
        cookies.insert(
            "sid".to_string(),
            CookieAttrs {
                value: "abc".to_string(),
                domain: "example.com".to_string(),
                path: "/".to_string(),
            },
        );

        let state = BrowserState {
            site_id: "site_a".to_string(),
            cookies,
            local_storage: HashMap::new(),
            session_storage: HashMap::new(),
            updated_at: Utc::now(),
        };
        repo.save(&state).await.unwrap();

        let found = repo.find_by_id("site_a").await.unwrap().unwrap();
        assert_eq!(found.cookies.get("sid").unwrap().value, "abc");
    }

    #[tokio::test]
    async fn save_rejects_invalid_cookie() {
        let (repo, _db) = with_crawler("site_a").await;
        let mut cookies = HashMap::new();
        cookies.insert(
            "sid".to_string(),
            CookieAttrs {
                value: String::new(),
                domain: "example.com".to_string(),
                path: "/".to_string(),
            },
        );
        let state = BrowserState {
            site_id: "site_a".to_string(),
            cookies,
            local_storage: HashMap::new(),
            session_storage: HashMap::new(),
            updated_at: Utc::now(),
        };
        assert!(repo.save(&state).await.is_err());
    }

    #[tokio::test]
    async fn delete_removes_the_row() {
        let (repo, _db) = with_crawler("site_a").await;
        let state = BrowserState {
            site_id: "site_a".to_string(),
            cookies: HashMap::new(),
            local_storage: HashMap::new(),
            session_storage: HashMap::new(),
            updated_at: Utc::now(),
        };
        repo.save(&state).await.unwrap();
        repo.delete("site_a").await.unwrap();
        assert!(repo.find_by_id("site_a").await.unwrap().is_none());
    }
}
