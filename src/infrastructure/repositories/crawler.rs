//! `Crawler` repository: the per-site aggregate root.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use crate::domain::{entities::Crawler, repositories::CrawlerRepository};

pub struct SqliteCrawlerRepository {
    pool: SqlitePool,
}

impl SqliteCrawlerRepository {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_crawler(row: &sqlx::sqlite::SqliteRow) -> Result<Crawler> {
        let last_login_time: Option<String> = row.try_get("last_login_time")?;
        let last_login_time = last_login_time
            .map(|ts| {
                DateTime::parse_from_rfc3339(&ts)
                    .map_err(|e| anyhow!("failed to parse last_login_time: {e}"))
                    .map(|dt| dt.with_timezone(&Utc))
            })
            .transpose()?;

        Ok(Crawler {
            site_id: row.try_get("site_id")?,
            is_logged_in: row.try_get("is_logged_in")?,
            last_login_time,
            total_tasks: row.try_get("total_tasks")?,
        })
    }
}

#[async_trait]
impl CrawlerRepository for SqliteCrawlerRepository {
    async fn create(&self, crawler: &Crawler) -> Result<()> {
        sqlx::query(
            "INSERT INTO crawler (site_id, is_logged_in, last_login_time, total_tasks)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(&crawler.site_id)
        .bind(crawler.is_logged_in)
        .bind(crawler.last_login_time.map(|dt| dt.to_rfc3339()))
        .bind(crawler.total_tasks)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_by_id(&self, site_id: &str) -> Result<Option<Crawler>> {
        let row = sqlx::query(
            "SELECT site_id, is_logged_in, last_login_time, total_tasks FROM crawler WHERE site_id = $1",
        )
        .bind(site_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_crawler).transpose()
    }

    async fn find_all(&self) -> Result<Vec<Crawler>> {
        let rows = sqlx::query(
            "SELECT site_id, is_logged_in, last_login_time, total_tasks FROM crawler",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_crawler).collect()
    }

    async fn update(&self, crawler: &Crawler) -> Result<()> {
        sqlx::query(
            "UPDATE crawler SET is_logged_in = $1, last_login_time = $2, total_tasks = $3
             WHERE site_id = $4",
        )
        .bind(crawler.is_logged_in)
        .bind(crawler.last_login_time.map(|dt| dt.to_rfc3339()))
        .bind(crawler.total_tasks)
        .bind(&crawler.site_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, site_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM crawler WHERE site_id = $1")
            .bind(site_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
