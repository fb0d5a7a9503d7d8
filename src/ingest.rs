//! Result & Check-in Ingest (C7): the two write paths a worker uses to
//! report back, plus the read helpers a statistics collaborator (outside
//! this crate's scope) would use to summarize them.

use anyhow::{bail, Result};
use chrono::{DateTime, Local, TimeZone, Utc};
use std::sync::Arc;
use tracing::instrument;

use crate::domain::entities::{CheckInOutcome, CheckInResult, CrawlResult, CrawlResultCreate};
use crate::domain::repositories::{CheckInRepository, ResultRepository, TaskRepository};

pub struct ResultIngest {
    tasks: Arc<dyn TaskRepository>,
    results: Arc<dyn ResultRepository>,
    checkins: Arc<dyn CheckInRepository>,
}

impl ResultIngest {
    #[must_use]
    pub fn new(
        tasks: Arc<dyn TaskRepository>,
        results: Arc<dyn ResultRepository>,
        checkins: Arc<dyn CheckInRepository>,
    ) -> Self {
        Self {
            tasks,
            results,
            checkins,
        }
    }

    /// Rejects a result whose parent task row doesn't exist; otherwise
    /// inserts it and returns the stored row (ratio derived by the
    /// repository).
    #[instrument(skip(self, result))]
    pub async fn save_result(&self, result: CrawlResultCreate) -> Result<CrawlResult> {
        if self.tasks.find_by_id(&result.task_id).await?.is_none() {
            bail!("task {} does not exist", result.task_id);
        }
        self.results.save(result).await
    }

    /// `checkin_date` defaults to midnight of the local calendar day when
    /// not supplied — the host's wall-clock day, not UTC's, since a
    /// check-in made late in the local day must still land on today's
    /// date for the daily check-in-once invariant.
    #[instrument(skip(self))]
    pub async fn save_checkin_result(
        &self,
        site_id: &str,
        task_id: &str,
        result: CheckInOutcome,
        checkin_date: Option<DateTime<Utc>>,
    ) -> Result<CheckInResult> {
        let checkin_date = checkin_date.unwrap_or_else(|| {
            let local_midnight = Local::now()
                .date_naive()
                .and_hms_opt(0, 0, 0)
                .expect("midnight is always a valid time");
            Local
                .from_local_datetime(&local_midnight)
                .single()
                .map_or_else(|| Utc.from_utc_datetime(&local_midnight), |dt| dt.with_timezone(&Utc))
        });
        self.checkins
            .save(site_id, task_id, result, checkin_date)
            .await
    }

    pub async fn latest_result(&self, site_id: &str) -> Result<Option<CrawlResult>> {
        self.results.latest_for_site(site_id).await
    }

    pub async fn results_in_range(
        &self,
        site_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<CrawlResult>> {
        self.results.in_range(site_id, start, end).await
    }

    pub async fn latest_checkin(&self, site_id: &str) -> Result<Option<CheckInResult>> {
        self.checkins.latest_for_site(site_id).await
    }

    pub async fn checkin_for_date(
        &self,
        site_id: &str,
        date: DateTime<Utc>,
    ) -> Result<Option<CheckInResult>> {
        self.checkins.for_date(site_id, date).await
    }

    pub async fn checkins_in_range(
        &self,
        site_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<CheckInResult>> {
        self.checkins.in_range(site_id, start, end).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::{Crawler, Task, TaskStatus};
    use crate::domain::repositories::CrawlerRepository;
    use crate::infrastructure::database_connection::DatabaseConnection;
    use crate::infrastructure::repositories::{
        SqliteCheckInRepository, SqliteCrawlerRepository, SqliteResultRepository,
        SqliteTaskRepository,
    };
    use std::collections::HashMap;

    async fn build_ingest(task_id: &str, site_id: &str) -> (ResultIngest, DatabaseConnection) {
        let db = DatabaseConnection::new("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();

        SqliteCrawlerRepository::new(db.pool().clone())
            .create(&Crawler::new(site_id))
            .await
            .unwrap();

        let tasks: Arc<dyn TaskRepository> = Arc::new(SqliteTaskRepository::new(db.pool().clone()));
        let now = Utc::now();
        tasks
            .create(&Task {
                task_id: task_id.to_string(),
                site_id: site_id.to_string(),
                status: TaskStatus::Success,
                created_at: now,
                updated_at: now,
                completed_at: Some(now),
                msg: None,
                error_details: None,
                task_metadata: HashMap::new(),
                system_info: serde_json::json!({}),
            })
            .await
            .unwrap();

        let results: Arc<dyn ResultRepository> = Arc::new(SqliteResultRepository::new(db.pool().clone()));
        let checkins: Arc<dyn CheckInRepository> = Arc::new(SqliteCheckInRepository::new(db.pool().clone()));
        (ResultIngest::new(tasks, results, checkins), db)
    }

    fn sample_result(task_id: &str, site_id: &str) -> CrawlResultCreate {
        CrawlResultCreate {
            task_id: task_id.to_string(),
            site_id: site_id.to_string(),
            username: Some("alice".to_string()),
            user_class: None,
            uid: None,
            join_time: None,
            last_active: None,
            upload: 100.0,
            download: 10.0,
            bonus: None,
            seeding_score: None,
            hr_count: None,
            bonus_per_hour: None,
            seeding_size: None,
            seeding_count: None,
        }
    }

    #[tokio::test]
    async fn save_result_rejects_unknown_task() {
        let (ingest, _db) = build_ingest("t1", "site_a").await;
        let err = ingest
            .save_result(sample_result("missing", "site_a"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[tokio::test]
    async fn save_result_then_read_back_as_latest() {
        let (ingest, _db) = build_ingest("t1", "site_a").await;
        ingest.save_result(sample_result("t1", "site_a")).await.unwrap();

        let latest = ingest.latest_result("site_a").await.unwrap().unwrap();
        assert_eq!(latest.task_id, "t1");
        assert!((latest.ratio - 10.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn save_checkin_result_defaults_to_midnight_today() {
        let (ingest, _db) = build_ingest("t1", "site_a").await;
        let saved = ingest
            .save_checkin_result("site_a", "t1", CheckInOutcome::Success, None)
            .await
            .unwrap();
        assert_eq!(
            saved.checkin_date.with_timezone(&chrono::Local).time().to_string(),
            "00:00:00"
        );

        let today = ingest
            .checkin_for_date("site_a", Utc::now())
            .await
            .unwrap();
        assert!(today.is_some());
    }
}
