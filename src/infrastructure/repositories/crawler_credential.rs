//! `CrawlerCredential` repository: per-site authentication material.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use crate::domain::{entities::CrawlerCredential, repositories::CrawlerCredentialRepository};

pub struct SqliteCrawlerCredentialRepository {
    pool: SqlitePool,
}

impl SqliteCrawlerCredentialRepository {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_credential(row: &sqlx::sqlite::SqliteRow) -> Result<CrawlerCredential> {
        Ok(CrawlerCredential {
            site_id: row.try_get("site_id")?,
            username: row.try_get("username")?,
            password: row.try_get("password")?,
            authorization: row.try_get("authorization")?,
            apikey: row.try_get("apikey")?,
            manual_cookies: row.try_get("manual_cookies")?,
            enabled: row.try_get("enabled")?,
        })
    }
}

#[async_trait]
impl CrawlerCredentialRepository for SqliteCrawlerCredentialRepository {
    async fn upsert(&self, credential: &CrawlerCredential) -> Result<()> {
        sqlx::query(
            "INSERT INTO crawler_credential
                (site_id, username, password, authorization, apikey, manual_cookies, enabled)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT(site_id) DO UPDATE SET
                username = excluded.username,
                password = excluded.password,
                authorization = excluded.authorization,
                apikey = excluded.apikey,
                manual_cookies = excluded.manual_cookies,
                enabled = excluded.enabled",
        )
        .bind(&credential.site_id)
        .bind(&credential.username)
        .bind(&credential.password)
        .bind(&credential.authorization)
        .bind(&credential.apikey)
        .bind(&credential.manual_cookies)
        .bind(credential.enabled)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_by_id(&self, site_id: &str) -> Result<Option<CrawlerCredential>> {
        let row = sqlx::query(
            "SELECT site_id, username, password, authorization, apikey, manual_cookies, enabled
             FROM crawler_credential WHERE site_id = $1",
        )
        .bind(site_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_credential).transpose()
    }

    async fn find_all(&self) -> Result<Vec<CrawlerCredential>> {
        let rows = sqlx::query(
            "SELECT site_id, username, password, authorization, apikey, manual_cookies, enabled
             FROM crawler_credential",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_credential).collect()
    }
}
