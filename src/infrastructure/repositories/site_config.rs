//! `SiteConfig` repository. The scrape descriptor for a site; login/extract/
//! check-in subfields are stored as embedded JSON and parsed back into
//! typed structs on every read.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use crate::domain::{
    entities::{CheckinConfig, ExtractRules, LoginConfig, SiteConfig},
    repositories::SiteConfigRepository,
};

pub struct SqliteSiteConfigRepository {
    pool: SqlitePool,
}

impl SqliteSiteConfigRepository {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_config(row: &sqlx::sqlite::SqliteRow) -> Result<SiteConfig> {
        let login_config: String = row.try_get("login_config")?;
        let extract_rules: String = row.try_get("extract_rules")?;
        let checkin_config: String = row.try_get("checkin_config")?;

        Ok(SiteConfig {
            site_id: row.try_get("site_id")?,
            site_url: row.try_get("site_url")?,
            login_config: serde_json::from_str::<LoginConfig>(&login_config)
                .map_err(|e| anyhow!("failed to parse login_config: {e}"))?,
            extract_rules: serde_json::from_str::<ExtractRules>(&extract_rules)
                .map_err(|e| anyhow!("failed to parse extract_rules: {e}"))?,
            checkin_config: serde_json::from_str::<CheckinConfig>(&checkin_config)
                .map_err(|e| anyhow!("failed to parse checkin_config: {e}"))?,
        })
    }
}

#[async_trait]
impl SiteConfigRepository for SqliteSiteConfigRepository {
    async fn upsert(&self, config: &SiteConfig) -> Result<()> {
        let login_config = serde_json::to_string(&config.login_config)?;
        let extract_rules = serde_json::to_string(&config.extract_rules)?;
        let checkin_config = serde_json::to_string(&config.checkin_config)?;

        sqlx::query(
            "INSERT INTO site_config (site_id, site_url, login_config, extract_rules, checkin_config)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT(site_id) DO UPDATE SET
                site_url = excluded.site_url,
                login_config = excluded.login_config,
                extract_rules = excluded.extract_rules,
                checkin_config = excluded.checkin_config",
        )
        .bind(&config.site_id)
        .bind(&config.site_url)
        .bind(login_config)
        .bind(extract_rules)
        .bind(checkin_config)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_by_id(&self, site_id: &str) -> Result<Option<SiteConfig>> {
        let row = sqlx::query(
            "SELECT site_id, site_url, login_config, extract_rules, checkin_config
             FROM site_config WHERE site_id = $1",
        )
        .bind(site_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_config).transpose()
    }

    async fn find_all(&self) -> Result<Vec<SiteConfig>> {
        let rows = sqlx::query(
            "SELECT site_id, site_url, login_config, extract_rules, checkin_config FROM site_config",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_config).collect()
    }
}
