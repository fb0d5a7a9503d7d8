//! `Task` repository. The sole gateway onto the `task` table; callers
//! above infrastructure must route every write through the reconciler.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::collections::HashMap;

use crate::domain::{
    entities::{Task, TaskStatus},
    repositories::TaskRepository,
};

pub struct SqliteTaskRepository {
    pool: SqlitePool,
}

impl SqliteTaskRepository {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_task(row: &sqlx::sqlite::SqliteRow) -> Result<Task> {
        let status: String = row.try_get("status")?;
        let created_at: String = row.try_get("created_at")?;
        let updated_at: String = row.try_get("updated_at")?;
        let completed_at: Option<String> = row.try_get("completed_at")?;
        let error_details: Option<String> = row.try_get("error_details")?;
        let task_metadata: String = row.try_get("task_metadata")?;
        let system_info: String = row.try_get("system_info")?;

        Ok(Task {
            task_id: row.try_get("task_id")?,
            site_id: row.try_get("site_id")?,
            status: TaskStatus::from_str(&status)
                .ok_or_else(|| anyhow!("unknown task status: {status}"))?,
            created_at: DateTime::parse_from_rfc3339(&created_at)?.with_timezone(&Utc),
            updated_at: DateTime::parse_from_rfc3339(&updated_at)?.with_timezone(&Utc),
            completed_at: completed_at
                .map(|ts| DateTime::parse_from_rfc3339(&ts).map(|dt| dt.with_timezone(&Utc)))
                .transpose()?,
            msg: row.try_get("msg")?,
            error_details: error_details
                .map(|s| serde_json::from_str(&s))
                .transpose()
                .map_err(|e| anyhow!("failed to parse error_details: {e}"))?,
            task_metadata: serde_json::from_str::<HashMap<String, serde_json::Value>>(
                &task_metadata,
            )
            .map_err(|e| anyhow!("failed to parse task_metadata: {e}"))?,
            system_info: serde_json::from_str(&system_info)
                .map_err(|e| anyhow!("failed to parse system_info: {e}"))?,
        })
    }
}

#[async_trait]
impl TaskRepository for SqliteTaskRepository {
    async fn create(&self, task: &Task) -> Result<()> {
        let error_details = task
            .error_details
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let task_metadata = serde_json::to_string(&task.task_metadata)?;
        let system_info = serde_json::to_string(&task.system_info)?;

        sqlx::query(
            "INSERT INTO task
                (task_id, site_id, status, created_at, updated_at, completed_at, msg,
                 error_details, task_metadata, system_info)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(&task.task_id)
        .bind(&task.site_id)
        .bind(task.status.as_str())
        .bind(task.created_at.to_rfc3339())
        .bind(task.updated_at.to_rfc3339())
        .bind(task.completed_at.map(|dt| dt.to_rfc3339()))
        .bind(&task.msg)
        .bind(error_details)
        .bind(task_metadata)
        .bind(system_info)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_by_id(&self, task_id: &str) -> Result<Option<Task>> {
        let row = sqlx::query(
            "SELECT task_id, site_id, status, created_at, updated_at, completed_at, msg,
                    error_details, task_metadata, system_info
             FROM task WHERE task_id = $1",
        )
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_task).transpose()
    }

    async fn find_all(
        &self,
        site_id: Option<&str>,
        status: Option<TaskStatus>,
        limit: Option<i64>,
    ) -> Result<Vec<Task>> {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT task_id, site_id, status, created_at, updated_at, completed_at, msg,
                    error_details, task_metadata, system_info
             FROM task WHERE 1 = 1",
        );

        if let Some(site_id) = site_id {
            builder.push(" AND site_id = ").push_bind(site_id.to_string());
        }
        if let Some(status) = status {
            builder.push(" AND status = ").push_bind(status.as_str());
        }
        builder.push(" ORDER BY created_at DESC");
        if let Some(limit) = limit {
            builder.push(" LIMIT ").push_bind(limit);
        }

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_task).collect()
    }

    async fn find_ready(&self, site_id: Option<&str>) -> Result<Vec<Task>> {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT task_id, site_id, status, created_at, updated_at, completed_at, msg,
                    error_details, task_metadata, system_info
             FROM task WHERE status = 'READY'",
        );
        if let Some(site_id) = site_id {
            builder.push(" AND site_id = ").push_bind(site_id.to_string());
        }
        builder.push(" ORDER BY created_at ASC");

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_task).collect()
    }

    async fn update(&self, task: &Task) -> Result<()> {
        let error_details = task
            .error_details
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let task_metadata = serde_json::to_string(&task.task_metadata)?;
        let system_info = serde_json::to_string(&task.system_info)?;

        sqlx::query(
            "UPDATE task SET
                status = $1, updated_at = $2, completed_at = $3, msg = $4,
                error_details = $5, task_metadata = $6, system_info = $7
             WHERE task_id = $8",
        )
        .bind(task.status.as_str())
        .bind(task.updated_at.to_rfc3339())
        .bind(task.completed_at.map(|dt| dt.to_rfc3339()))
        .bind(&task.msg)
        .bind(error_details)
        .bind(task_metadata)
        .bind(system_info)
        .bind(&task.task_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::Crawler;
    use crate::domain::repositories::CrawlerRepository;
    use crate::infrastructure::database_connection::DatabaseConnection;
    use crate::infrastructure::repositories::SqliteCrawlerRepository;

    fn sample_task(task_id: &str, site_id: &str, status: TaskStatus) -> Task {
        let now = Utc::now();
        Task {
            task_id: task_id.to_string(),
            site_id: site_id.to_string(),
            status,
            created_at: now,
            updated_at: now,
            completed_at: None,
            msg: None,
            error_details: None,
            task_metadata: HashMap::new(),
            system_info: serde_json::json!({}),
        }
    }

    async fn setup() -> (SqliteTaskRepository, DatabaseConnection) {
        let db = DatabaseConnection::new("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();
        SqliteCrawlerRepository::new(db.pool().clone())
            .create(&Crawler::new("site_a"))
            .await
            .unwrap();
        (SqliteTaskRepository::new(db.pool().clone()), db)
    }

    #[tokio::test]
    async fn create_then_find() {
        let (repo, _db) = setup().await;
        repo.create(&sample_task("t1", "site_a", TaskStatus::Ready))
            .await
            .unwrap();

        let found = repo.find_by_id("t1").await.unwrap().unwrap();
        assert_eq!(found.status, TaskStatus::Ready);
    }

    #[tokio::test]
    async fn find_ready_only_returns_ready_tasks() {
        let (repo, _db) = setup().await;
        repo.create(&sample_task("t1", "site_a", TaskStatus::Ready))
            .await
            .unwrap();
        repo.create(&sample_task("t2", "site_a", TaskStatus::Running))
            .await
            .unwrap();

        let ready = repo.find_ready(None).await.unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].task_id, "t1");
    }

    #[tokio::test]
    async fn update_transitions_status_and_sets_completed_at() {
        let (repo, _db) = setup().await;
        let mut task = sample_task("t1", "site_a", TaskStatus::Running);
        repo.create(&task).await.unwrap();

        task.status = TaskStatus::Success;
        task.completed_at = Some(Utc::now());
        repo.update(&task).await.unwrap();

        let found = repo.find_by_id("t1").await.unwrap().unwrap();
        assert_eq!(found.status, TaskStatus::Success);
        assert!(found.completed_at.is_some());
    }

    #[tokio::test]
    async fn find_all_filters_by_site_and_status_with_limit() {
        let (repo, _db) = setup().await;
        repo.create(&sample_task("t1", "site_a", TaskStatus::Success))
            .await
            .unwrap();
        repo.create(&sample_task("t2", "site_a", TaskStatus::Failed))
            .await
            .unwrap();

        let found = repo
            .find_all(Some("site_a"), Some(TaskStatus::Success), Some(10))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].task_id, "t1");
    }
}
