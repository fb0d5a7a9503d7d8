//! Queue Manager (C5): per-site FIFO admission and dispatch. Every status
//! transition below is phrased "transitions via C4" because it calls the
//! reconciler's single write API directly; this module never writes a
//! `Task` row itself.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, instrument};

use crate::domain::entities::{Task, TaskCreate, TaskStatus};
use crate::domain::repositories::TaskRepository;
use crate::reconciler::{TaskReconciler, TaskStatusUpdate};

#[derive(Debug, Clone)]
struct TaskInfo {
    site_id: String,
    queued_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct ClearResult {
    pub cleared_count: usize,
    pub total_ready_count: usize,
    pub site_id: Option<String>,
}

struct QueueState {
    queues: HashMap<String, VecDeque<String>>,
    running_tasks: HashMap<String, String>,
    task_info: HashMap<String, TaskInfo>,
}

/// In-memory admission queue layered on top of the store. `running_tasks`
/// is a queue-local cache only — it answers "is anything of mine
/// queued/running" without a store round-trip, but the process supervisor's
/// `running_sites` map is the sole authority on per-site exclusion.
pub struct QueueManager {
    tasks: Arc<dyn TaskRepository>,
    reconciler: Arc<TaskReconciler>,
    state: Mutex<QueueState>,
}

impl QueueManager {
    #[must_use]
    pub fn new(tasks: Arc<dyn TaskRepository>, reconciler: Arc<TaskReconciler>) -> Self {
        Self {
            tasks,
            reconciler,
            state: Mutex::new(QueueState {
                queues: HashMap::new(),
                running_tasks: HashMap::new(),
                task_info: HashMap::new(),
            }),
        }
    }

    /// Rebuild the in-memory FIFO from the store's `READY` rows. Called
    /// once at controller startup; the FIFO is a cache, the store is truth.
    pub async fn rebuild_from_store(&self) -> Result<()> {
        let ready = self.tasks.find_ready(None).await?;
        let mut state = self.state.lock().await;
        for task in ready {
            state
                .queues
                .entry(task.site_id.clone())
                .or_default()
                .push_back(task.task_id.clone());
            state.task_info.insert(
                task.task_id,
                TaskInfo {
                    site_id: task.site_id,
                    queued_at: task.created_at,
                },
            );
        }
        Ok(())
    }

    /// Inserts the DB row first, inside this call, before pushing onto the
    /// FIFO — the row is the source of truth for a task's existence.
    #[instrument(skip(self, create))]
    pub async fn add_task(&self, create: TaskCreate) -> Result<Option<Task>> {
        let now = Utc::now();
        let task_id = crate::domain::task_id::generate(&create.site_id, now);
        let task = Task {
            task_id: task_id.clone(),
            site_id: create.site_id.clone(),
            status: TaskStatus::Ready,
            created_at: now,
            updated_at: now,
            completed_at: None,
            msg: None,
            error_details: None,
            task_metadata: create.task_metadata,
            system_info: serde_json::json!({}),
        };

        self.tasks.create(&task).await?;

        let mut state = self.state.lock().await;
        state
            .queues
            .entry(create.site_id.clone())
            .or_default()
            .push_back(task_id.clone());
        state.task_info.insert(
            task_id,
            TaskInfo {
                site_id: create.site_id,
                queued_at: now,
            },
        );

        info!(task_id = %task.task_id, "task admitted");
        Ok(Some(task))
    }

    /// Union of all `READY` store rows and any in-memory task not yet
    /// surfaced by the store query, deduplicated by `task_id`.
    pub async fn get_pending_tasks(&self, site_id: Option<&str>) -> Result<Vec<Task>> {
        let db_tasks = self.tasks.find_ready(site_id).await?;
        let mut seen: HashSet<String> = db_tasks.iter().map(|t| t.task_id.clone()).collect();
        let mut pending = db_tasks;

        let state = self.state.lock().await;
        for (task_id, info) in &state.task_info {
            if seen.contains(task_id) {
                continue;
            }
            if let Some(filter) = site_id {
                if info.site_id != filter {
                    continue;
                }
            }
            pending.push(Task {
                task_id: task_id.clone(),
                site_id: info.site_id.clone(),
                status: TaskStatus::Ready,
                created_at: info.queued_at,
                updated_at: info.queued_at,
                completed_at: None,
                msg: None,
                error_details: None,
                task_metadata: HashMap::new(),
                system_info: serde_json::json!({}),
            });
            seen.insert(task_id.clone());
        }
        Ok(pending)
    }

    /// Only returns a task if nothing of that site is already running
    /// according to this queue's own cache; pops the FIFO head and
    /// transitions to `PENDING` via C4.
    #[instrument(skip(self))]
    pub async fn get_next_task(&self, site_id: &str) -> Result<Option<Task>> {
        let mut state = self.state.lock().await;
        if state.running_tasks.contains_key(site_id) {
            return Ok(None);
        }

        let task_id = match state.queues.get_mut(site_id).and_then(VecDeque::pop_front) {
            Some(id) => id,
            None => return Ok(None),
        };
        state.running_tasks.insert(site_id.to_string(), task_id.clone());
        drop(state);

        self.reconciler
            .update_task_status(
                &task_id,
                TaskStatus::Pending,
                TaskStatusUpdate {
                    msg: Some("task ready to run".to_string()),
                    ..Default::default()
                },
            )
            .await?;

        self.reconciler.get_task(&task_id).await
    }

    #[instrument(skip(self))]
    pub async fn complete_task(&self, task_id: &str, status: TaskStatus, msg: Option<String>) -> Result<bool> {
        let ok = self
            .reconciler
            .update_task_status(
                task_id,
                status,
                TaskStatusUpdate {
                    msg,
                    completed_at: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await?;

        if let Some(task) = self.reconciler.get_task(task_id).await? {
            let mut state = self.state.lock().await;
            if state.running_tasks.get(&task.site_id) == Some(&task.task_id) {
                state.running_tasks.remove(&task.site_id);
            }
            state.task_info.remove(task_id);
        }
        Ok(ok)
    }

    #[instrument(skip(self))]
    pub async fn cancel_task(&self, task_id: &str) -> Result<bool> {
        let Some(task) = self.reconciler.get_task(task_id).await? else {
            return Ok(false);
        };

        let mut state = self.state.lock().await;
        if let Some(queue) = state.queues.get_mut(&task.site_id) {
            queue.retain(|id| id != task_id);
        }
        if state.running_tasks.get(&task.site_id) == Some(&task.task_id) {
            state.running_tasks.remove(&task.site_id);
        }
        state.task_info.remove(task_id);
        drop(state);

        self.reconciler
            .update_task_status(
                task_id,
                TaskStatus::Cancelled,
                TaskStatusUpdate {
                    msg: Some("task cancelled".to_string()),
                    completed_at: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await
    }

    #[instrument(skip(self))]
    pub async fn clear_pending_tasks(&self, site_id: Option<&str>) -> Result<ClearResult> {
        let ready = self.tasks.find_ready(site_id).await?;
        let total_ready_count = ready.len();
        let mut cleared_count = 0;

        for task in &ready {
            if self.cancel_task(&task.task_id).await? {
                cleared_count += 1;
            }
        }

        Ok(ClearResult {
            cleared_count,
            total_ready_count,
            site_id: site_id.map(str::to_string),
        })
    }

    pub async fn cleanup(&self) -> Result<()> {
        let task_ids: Vec<String> = {
            let state = self.state.lock().await;
            state.task_info.keys().cloned().collect()
        };
        for task_id in task_ids {
            self.cancel_task(&task_id).await?;
        }
        let mut state = self.state.lock().await;
        state.queues.clear();
        state.running_tasks.clear();
        state.task_info.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::Crawler;
    use crate::domain::repositories::CrawlerRepository;
    use crate::infrastructure::database_connection::DatabaseConnection;
    use crate::infrastructure::repositories::{SqliteCrawlerRepository, SqliteTaskRepository};

    async fn build_queue(site_id: &str) -> QueueManager {
        let db = DatabaseConnection::new("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();
        SqliteCrawlerRepository::new(db.pool().clone())
            .create(&Crawler::new(site_id))
            .await
            .unwrap();

        let tasks: Arc<dyn TaskRepository> =
            Arc::new(SqliteTaskRepository::new(db.pool().clone()));
        let reconciler = Arc::new(TaskReconciler::new(tasks.clone()));
        QueueManager::new(tasks, reconciler)
    }

    #[tokio::test]
    async fn add_task_inserts_row_before_queueing() {
        let queue = build_queue("site_a").await;
        let task = queue
            .add_task(TaskCreate {
                site_id: "site_a".to_string(),
                task_metadata: HashMap::new(),
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(task.status, TaskStatus::Ready);

        let pending = queue.get_pending_tasks(Some("site_a")).await.unwrap();
        assert_eq!(pending.len(), 1);
    }

    #[tokio::test]
    async fn get_next_task_blocks_second_task_of_same_site() {
        let queue = build_queue("site_a").await;
        queue
            .add_task(TaskCreate {
                site_id: "site_a".to_string(),
                task_metadata: HashMap::new(),
            })
            .await
            .unwrap();
        queue
            .add_task(TaskCreate {
                site_id: "site_a".to_string(),
                task_metadata: HashMap::new(),
            })
            .await
            .unwrap();

        let first = queue.get_next_task("site_a").await.unwrap();
        assert!(first.is_some());
        let second = queue.get_next_task("site_a").await.unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn complete_task_frees_the_site_slot() {
        let queue = build_queue("site_a").await;
        let task = queue
            .add_task(TaskCreate {
                site_id: "site_a".to_string(),
                task_metadata: HashMap::new(),
            })
            .await
            .unwrap()
            .unwrap();
        queue.get_next_task("site_a").await.unwrap();
        queue
            .complete_task(&task.task_id, TaskStatus::Success, None)
            .await
            .unwrap();

        queue
            .add_task(TaskCreate {
                site_id: "site_a".to_string(),
                task_metadata: HashMap::new(),
            })
            .await
            .unwrap();
        let next = queue.get_next_task("site_a").await.unwrap();
        assert!(next.is_some());
    }

    #[tokio::test]
    async fn clear_pending_tasks_cancels_every_ready_row() {
        let queue = build_queue("site_a").await;
        queue
            .add_task(TaskCreate {
                site_id: "site_a".to_string(),
                task_metadata: HashMap::new(),
            })
            .await
            .unwrap();
        queue
            .add_task(TaskCreate {
                site_id: "site_a".to_string(),
                task_metadata: HashMap::new(),
            })
            .await
            .unwrap();

        let result = queue.clear_pending_tasks(Some("site_a")).await.unwrap();
        assert_eq!(result.cleared_count, 2);
        assert_eq!(result.total_ready_count, 2);
    }
}
