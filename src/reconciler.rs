//! Task Status Reconciler (C4): the only component permitted to write to
//! the `task` table. The queue manager (C5) and process supervisor (C6)
//! must route every transition through `update_task_status`.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::instrument;

use crate::domain::entities::{Task, TaskStatus};
use crate::domain::repositories::TaskRepository;

/// Fields that may accompany a status transition. `task_metadata` is
/// merged shallow-key-wise into the existing map, never replaced, so a
/// supervisor-recorded `pid` can't clobber caller-supplied metadata.
#[derive(Debug, Clone, Default)]
pub struct TaskStatusUpdate {
    pub msg: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_details: Option<serde_json::Value>,
    pub task_metadata: Option<std::collections::HashMap<String, serde_json::Value>>,
}

pub struct TaskReconciler {
    tasks: Arc<dyn TaskRepository>,
}

impl TaskReconciler {
    #[must_use]
    pub fn new(tasks: Arc<dyn TaskRepository>) -> Self {
        Self { tasks }
    }

    #[instrument(skip(self, update), fields(%task_id, ?status))]
    pub async fn update_task_status(
        &self,
        task_id: &str,
        status: TaskStatus,
        update: TaskStatusUpdate,
    ) -> Result<bool> {
        let Some(mut task) = self.tasks.find_by_id(task_id).await? else {
            return Ok(false);
        };

        if task.status.is_terminal() {
            return Ok(true);
        }

        task.status = status;
        task.updated_at = Utc::now();
        if let Some(msg) = update.msg {
            task.msg = Some(msg);
        }
        if let Some(error_details) = update.error_details {
            task.error_details = Some(error_details);
        }
        if let Some(completed_at) = update.completed_at {
            task.completed_at = Some(completed_at);
        }
        if let Some(metadata) = update.task_metadata {
            task.task_metadata.extend(metadata);
        }

        self.tasks.update(&task).await?;
        Ok(true)
    }

    /// Unknown tasks read as `READY`, absorbing a race with admission
    /// where a caller checks status before the insert is visible.
    pub async fn get_task_status(&self, task_id: &str) -> Result<TaskStatus> {
        Ok(self
            .tasks
            .find_by_id(task_id)
            .await?
            .map_or(TaskStatus::Ready, |t| t.status))
    }

    /// Read-only; does not participate in the single-writer rule but
    /// shares the same repository so callers never observe a half-applied
    /// row from a concurrent write.
    pub async fn get_task(&self, task_id: &str) -> Result<Option<Task>> {
        self.tasks.find_by_id(task_id).await
    }
}
