//! `CrawlResult` repository: one row per completed scrape, append-only.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use crate::domain::{
    entities::{derive_ratio, CrawlResult, CrawlResultCreate},
    repositories::ResultRepository,
};

pub struct SqliteResultRepository {
    pool: SqlitePool,
}

impl SqliteResultRepository {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_result(row: &sqlx::sqlite::SqliteRow) -> Result<CrawlResult> {
        let join_time: Option<String> = row.try_get("join_time")?;
        let last_active: Option<String> = row.try_get("last_active")?;

        Ok(CrawlResult {
            task_id: row.try_get("task_id")?,
            site_id: row.try_get("site_id")?,
            username: row.try_get("username")?,
            user_class: row.try_get("user_class")?,
            uid: row.try_get("uid")?,
            join_time: join_time
                .map(|ts| DateTime::parse_from_rfc3339(&ts).map(|dt| dt.with_timezone(&Utc)))
                .transpose()
                .map_err(|e| anyhow!("failed to parse join_time: {e}"))?,
            last_active: last_active
                .map(|ts| DateTime::parse_from_rfc3339(&ts).map(|dt| dt.with_timezone(&Utc)))
                .transpose()
                .map_err(|e| anyhow!("failed to parse last_active: {e}"))?,
            upload: row.try_get("upload")?,
            download: row.try_get("download")?,
            ratio: row.try_get("ratio")?,
            bonus: row.try_get("bonus")?,
            seeding_score: row.try_get("seeding_score")?,
            hr_count: row.try_get("hr_count")?,
            bonus_per_hour: row.try_get("bonus_per_hour")?,
            seeding_size: row.try_get("seeding_size")?,
            seeding_count: row.try_get("seeding_count")?,
        })
    }
}

#[async_trait]
impl ResultRepository for SqliteResultRepository {
    async fn save(&self, result: CrawlResultCreate) -> Result<CrawlResult> {
        let ratio = derive_ratio(result.upload, result.download);

        sqlx::query(
            "INSERT INTO result
                (task_id, site_id, username, user_class, uid, join_time, last_active,
                 upload, download, ratio, bonus, seeding_score, hr_count, bonus_per_hour,
                 seeding_size, seeding_count)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)",
        )
        .bind(&result.task_id)
        .bind(&result.site_id)
        .bind(&result.username)
        .bind(&result.user_class)
        .bind(&result.uid)
        .bind(result.join_time.map(|dt| dt.to_rfc3339()))
        .bind(result.last_active.map(|dt| dt.to_rfc3339()))
        .bind(result.upload)
        .bind(result.download)
        .bind(ratio)
        .bind(result.bonus)
        .bind(result.seeding_score)
        .bind(result.hr_count)
        .bind(result.bonus_per_hour)
        .bind(result.seeding_size)
        .bind(result.seeding_count)
        .execute(&self.pool)
        .await?;

        self.find_by_task(&result.task_id)
            .await?
            .ok_or_else(|| anyhow!("result for task {} vanished after insert", result.task_id))
    }

    async fn find_by_task(&self, task_id: &str) -> Result<Option<CrawlResult>> {
        let row = sqlx::query(
            "SELECT task_id, site_id, username, user_class, uid, join_time, last_active,
                    upload, download, ratio, bonus, seeding_score, hr_count, bonus_per_hour,
                    seeding_size, seeding_count
             FROM result WHERE task_id = $1",
        )
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_result).transpose()
    }

    async fn latest_for_site(&self, site_id: &str) -> Result<Option<CrawlResult>> {
        let row = sqlx::query(
            "SELECT r.task_id, r.site_id, r.username, r.user_class, r.uid, r.join_time,
                    r.last_active, r.upload, r.download, r.ratio, r.bonus, r.seeding_score,
                    r.hr_count, r.bonus_per_hour, r.seeding_size, r.seeding_count
             FROM result r
             JOIN task t ON t.task_id = r.task_id
             WHERE r.site_id = $1
             ORDER BY t.completed_at DESC
             LIMIT 1",
        )
        .bind(site_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_result).transpose()
    }

    async fn in_range(
        &self,
        site_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<CrawlResult>> {
        let rows = sqlx::query(
            "SELECT r.task_id, r.site_id, r.username, r.user_class, r.uid, r.join_time,
                    r.last_active, r.upload, r.download, r.ratio, r.bonus, r.seeding_score,
                    r.hr_count, r.bonus_per_hour, r.seeding_size, r.seeding_count
             FROM result r
             JOIN task t ON t.task_id = r.task_id
             WHERE r.site_id = $1 AND t.completed_at >= $2 AND t.completed_at <= $3
             ORDER BY t.completed_at ASC",
        )
        .bind(site_id)
        .bind(start.to_rfc3339())
        .bind(end.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_result).collect()
    }
}
