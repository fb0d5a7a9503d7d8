//! `CheckInResult` repository: one append-only row per check-in attempt,
//! unique per `(site_id, task_id)`.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use crate::domain::{
    entities::{CheckInOutcome, CheckInResult},
    repositories::CheckInRepository,
};

pub struct SqliteCheckInRepository {
    pool: SqlitePool,
}

impl SqliteCheckInRepository {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_result(row: &sqlx::sqlite::SqliteRow) -> Result<CheckInResult> {
        let result: String = row.try_get("result")?;
        let checkin_date: String = row.try_get("checkin_date")?;
        let last_run_at: String = row.try_get("last_run_at")?;

        Ok(CheckInResult {
            task_id: row.try_get("task_id")?,
            site_id: row.try_get("site_id")?,
            result: CheckInOutcome::from_str(&result)
                .ok_or_else(|| anyhow!("unknown checkin result: {result}"))?,
            checkin_date: DateTime::parse_from_rfc3339(&checkin_date)?.with_timezone(&Utc),
            last_run_at: DateTime::parse_from_rfc3339(&last_run_at)?.with_timezone(&Utc),
        })
    }
}

#[async_trait]
impl CheckInRepository for SqliteCheckInRepository {
    async fn save(
        &self,
        site_id: &str,
        task_id: &str,
        result: CheckInOutcome,
        checkin_date: DateTime<Utc>,
    ) -> Result<CheckInResult> {
        let last_run_at = Utc::now();

        sqlx::query(
            "INSERT INTO checkin_result (task_id, site_id, result, checkin_date, last_run_at)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT(site_id, task_id) DO UPDATE SET
                result = excluded.result,
                last_run_at = excluded.last_run_at",
        )
        .bind(task_id)
        .bind(site_id)
        .bind(result.as_str())
        .bind(checkin_date.to_rfc3339())
        .bind(last_run_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(CheckInResult {
            task_id: task_id.to_string(),
            site_id: site_id.to_string(),
            result,
            checkin_date,
            last_run_at,
        })
    }

    async fn latest_for_site(&self, site_id: &str) -> Result<Option<CheckInResult>> {
        let row = sqlx::query(
            "SELECT task_id, site_id, result, checkin_date, last_run_at
             FROM checkin_result WHERE site_id = $1
             ORDER BY checkin_date DESC LIMIT 1",
        )
        .bind(site_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_result).transpose()
    }

    async fn for_date(&self, site_id: &str, date: DateTime<Utc>) -> Result<Option<CheckInResult>> {
        let day_start = date.date_naive().and_hms_opt(0, 0, 0).unwrap().and_utc();
        let day_end = date.date_naive().and_hms_opt(23, 59, 59).unwrap().and_utc();

        let row = sqlx::query(
            "SELECT task_id, site_id, result, checkin_date, last_run_at
             FROM checkin_result
             WHERE site_id = $1 AND checkin_date >= $2 AND checkin_date <= $3
             ORDER BY checkin_date DESC LIMIT 1",
        )
        .bind(site_id)
        .bind(day_start.to_rfc3339())
        .bind(day_end.to_rfc3339())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_result).transpose()
    }

    async fn in_range(
        &self,
        site_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<CheckInResult>> {
        let rows = sqlx::query(
            "SELECT task_id, site_id, result, checkin_date, last_run_at
             FROM checkin_result
             WHERE site_id = $1 AND checkin_date >= $2 AND checkin_date <= $3
             ORDER BY checkin_date ASC",
        )
        .bind(site_id)
        .bind(start.to_rfc3339())
        .bind(end.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_result).collect()
    }
}
