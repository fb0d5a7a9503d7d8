//! `CrawlerConfig` repository: runtime knobs per site.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use crate::domain::{entities::CrawlerConfig, repositories::CrawlerConfigRepository};

pub struct SqliteCrawlerConfigRepository {
    pool: SqlitePool,
}

impl SqliteCrawlerConfigRepository {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_config(row: &sqlx::sqlite::SqliteRow) -> Result<CrawlerConfig> {
        Ok(CrawlerConfig {
            site_id: row.try_get("site_id")?,
            enabled: row.try_get("enabled")?,
            use_proxy: row.try_get("use_proxy")?,
            proxy_url: row.try_get("proxy_url")?,
            fresh_login: row.try_get("fresh_login")?,
            captcha_skip: row.try_get("captcha_skip")?,
            headless: row.try_get("headless")?,
            login_max_retry: row.try_get::<i64, _>("login_max_retry")? as u32,
            timeout: row.try_get::<i64, _>("timeout")? as u64,
        })
    }
}

#[async_trait]
impl CrawlerConfigRepository for SqliteCrawlerConfigRepository {
    async fn upsert(&self, config: &CrawlerConfig) -> Result<()> {
        sqlx::query(
            "INSERT INTO crawler_config
                (site_id, enabled, use_proxy, proxy_url, fresh_login, captcha_skip, headless, login_max_retry, timeout)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             ON CONFLICT(site_id) DO UPDATE SET
                enabled = excluded.enabled,
                use_proxy = excluded.use_proxy,
                proxy_url = excluded.proxy_url,
                fresh_login = excluded.fresh_login,
                captcha_skip = excluded.captcha_skip,
                headless = excluded.headless,
                login_max_retry = excluded.login_max_retry,
                timeout = excluded.timeout",
        )
        .bind(&config.site_id)
        .bind(config.enabled)
        .bind(config.use_proxy)
        .bind(&config.proxy_url)
        .bind(config.fresh_login)
        .bind(config.captcha_skip)
        .bind(config.headless)
        .bind(i64::from(config.login_max_retry))
        .bind(config.timeout as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_by_id(&self, site_id: &str) -> Result<Option<CrawlerConfig>> {
        let row = sqlx::query(
            "SELECT site_id, enabled, use_proxy, proxy_url, fresh_login, captcha_skip, headless, login_max_retry, timeout
             FROM crawler_config WHERE site_id = $1",
        )
        .bind(site_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_config).transpose()
    }

    async fn find_all(&self) -> Result<Vec<CrawlerConfig>> {
        let rows = sqlx::query(
            "SELECT site_id, enabled, use_proxy, proxy_url, fresh_login, captcha_skip, headless, login_max_retry, timeout
             FROM crawler_config",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_config).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::Crawler;
    use crate::domain::repositories::CrawlerRepository;
    use crate::infrastructure::database_connection::DatabaseConnection;
    use crate::infrastructure::repositories::SqliteCrawlerRepository;

    #[tokio::test]
    async fn upsert_is_idempotent_and_updates_in_place() {
        let db = DatabaseConnection::new("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();

        SqliteCrawlerRepository::new(db.pool().clone())
            .create(&Crawler::new("site_a"))
            .await
            .unwrap();

        let repo = SqliteCrawlerConfigRepository::new(db.pool().clone());
        repo.upsert(&CrawlerConfig::default_for("site_a")).await.unwrap();

        let mut updated = CrawlerConfig::default_for("site_a");
        updated.enabled = false;
        repo.upsert(&updated).await.unwrap();

        let found = repo.find_by_id("site_a").await.unwrap().unwrap();
        assert!(!found.enabled);
        assert_eq!(found.login_max_retry, 3);
    }
}
