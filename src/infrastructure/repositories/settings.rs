//! `Settings` repository: the single `id = 1` row, created on first run
//! and updated in place thereafter.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use crate::domain::{entities::Settings, repositories::SettingsRepository};

pub struct SqliteSettingsRepository {
    pool: SqlitePool,
}

impl SqliteSettingsRepository {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_settings(row: &sqlx::sqlite::SqliteRow) -> Result<Settings> {
        let captcha_skip_sites: String = row.try_get("captcha_skip_sites")?;
        let checkin_sites: String = row.try_get("checkin_sites")?;
        Ok(Settings {
            crawler_max_concurrency: row.try_get::<i64, _>("crawler_max_concurrency")? as u32,
            login_max_retry: row.try_get::<i64, _>("login_max_retry")? as u32,
            task_timeout: row.try_get::<i64, _>("task_timeout")? as u64,
            storage_path: row.try_get("storage_path")?,
            crawler_config_path: row.try_get("crawler_config_path")?,
            crawler_credential_path: row.try_get("crawler_credential_path")?,
            headless: row.try_get("headless")?,
            fresh_login: row.try_get("fresh_login")?,
            captcha_default_method: row.try_get("captcha_default_method")?,
            captcha_skip_sites: serde_json::from_str(&captcha_skip_sites).unwrap_or_default(),
            checkin_sites: serde_json::from_str(&checkin_sites).unwrap_or_default(),
            enable_checkin: row.try_get("enable_checkin")?,
            chrome_path: row.try_get("chrome_path")?,
            log_level: row.try_get("log_level")?,
            log_to_file: row.try_get("log_to_file")?,
            log_json: row.try_get("log_json")?,
        })
    }
}

#[async_trait]
impl SettingsRepository for SqliteSettingsRepository {
    async fn load(&self) -> Result<Option<Settings>> {
        let row = sqlx::query("SELECT * FROM settings WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_settings).transpose()
    }

    async fn upsert(&self, settings: &Settings) -> Result<()> {
        let captcha_skip_sites = serde_json::to_string(&settings.captcha_skip_sites)?;
        let checkin_sites = serde_json::to_string(&settings.checkin_sites)?;

        sqlx::query(
            "INSERT INTO settings (
                id, crawler_max_concurrency, login_max_retry, task_timeout, storage_path,
                crawler_config_path, crawler_credential_path, headless, fresh_login,
                captcha_default_method, captcha_skip_sites, checkin_sites, enable_checkin,
                chrome_path, log_level, log_to_file, log_json
             ) VALUES (1, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                crawler_max_concurrency = excluded.crawler_max_concurrency,
                login_max_retry = excluded.login_max_retry,
                task_timeout = excluded.task_timeout,
                storage_path = excluded.storage_path,
                crawler_config_path = excluded.crawler_config_path,
                crawler_credential_path = excluded.crawler_credential_path,
                headless = excluded.headless,
                fresh_login = excluded.fresh_login,
                captcha_default_method = excluded.captcha_default_method,
                captcha_skip_sites = excluded.captcha_skip_sites,
                checkin_sites = excluded.checkin_sites,
                enable_checkin = excluded.enable_checkin,
                chrome_path = excluded.chrome_path,
                log_level = excluded.log_level,
                log_to_file = excluded.log_to_file,
                log_json = excluded.log_json",
        )
        .bind(i64::from(settings.crawler_max_concurrency))
        .bind(i64::from(settings.login_max_retry))
        .bind(settings.task_timeout as i64)
        .bind(&settings.storage_path)
        .bind(&settings.crawler_config_path)
        .bind(&settings.crawler_credential_path)
        .bind(settings.headless)
        .bind(settings.fresh_login)
        .bind(&settings.captcha_default_method)
        .bind(captcha_skip_sites)
        .bind(checkin_sites)
        .bind(settings.enable_checkin)
        .bind(&settings.chrome_path)
        .bind(&settings.log_level)
        .bind(settings.log_to_file)
        .bind(settings.log_json)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
