//! Process Supervisor (C6): drives `READY → RUNNING → terminal` by actually
//! executing workers. `running_sites` here, not the queue manager's own
//! cache, is the sole authority on per-site exclusion — the queue only
//! decides what's eligible to run next.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{error, info, instrument, warn};

use crate::domain::entities::{Task, TaskStatus};
use crate::queue::QueueManager;
use crate::reconciler::{TaskReconciler, TaskStatusUpdate};

const GRACEFUL_SHUTDOWN_WAIT: Duration = Duration::from_secs(5);

struct ProcessStatus {
    start_time: DateTime<Utc>,
    pid: u32,
    site_id: String,
}

struct SupervisorState {
    processes: HashMap<String, Child>,
    status: HashMap<String, ProcessStatus>,
    running_sites: HashMap<String, String>,
}

/// Owns the OS-level worker processes. One lock guards all three maps;
/// the queue manager and this supervisor never hold both locks at once.
pub struct ProcessSupervisor {
    reconciler: Arc<TaskReconciler>,
    queue: Arc<QueueManager>,
    max_concurrency: u32,
    task_timeout: Duration,
    log_dir: PathBuf,
    state: Mutex<SupervisorState>,
}

impl ProcessSupervisor {
    #[must_use]
    pub fn new(
        reconciler: Arc<TaskReconciler>,
        queue: Arc<QueueManager>,
        max_concurrency: u32,
        task_timeout: Duration,
        log_dir: PathBuf,
    ) -> Self {
        Self {
            reconciler,
            queue,
            max_concurrency,
            task_timeout,
            log_dir,
            state: Mutex::new(SupervisorState {
                processes: HashMap::new(),
                status: HashMap::new(),
                running_sites: HashMap::new(),
            }),
        }
    }

    /// Locates the worker binary alongside this executable. The worker is
    /// conceptually "this program in a different mode"; built as a sibling
    /// `[[bin]]` target, it's resolved relative to `current_exe()` rather
    /// than dispatched through a subcommand.
    fn resolve_worker_executable() -> Result<PathBuf> {
        let current = std::env::current_exe().context("resolving current executable path")?;
        let worker_name = if cfg!(windows) {
            "fleet-worker.exe"
        } else {
            "fleet-worker"
        };
        Ok(current
            .parent()
            .map(|dir| dir.join(worker_name))
            .unwrap_or_else(|| PathBuf::from(worker_name)))
    }

    /// One pass: reap finished/timed-out workers, then fill any slack up
    /// to `max_concurrency`. Called on a fixed interval by the caller's
    /// loop; a single misbehaving task is caught and logged, not fatal.
    pub async fn tick(&self) -> Result<()> {
        self.check_all_tasks().await;

        let running = { self.state.lock().await.running_sites.len() };
        if running < self.max_concurrency as usize {
            match self.start_crawlertask().await {
                Ok(started) if !started.is_empty() => {
                    info!(count = started.len(), "started tasks this tick");
                }
                Ok(_) => {}
                Err(err) => error!(error = %err, "start_crawlertask failed"),
            }
        }
        Ok(())
    }

    /// Spawns a background loop that ticks roughly every 5 seconds until
    /// the returned handle is aborted.
    pub fn spawn_tick_loop(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(5));
            loop {
                interval.tick().await;
                if let Err(err) = self.tick().await {
                    error!(error = %err, "supervisor tick failed");
                }
            }
        })
    }

    async fn check_all_tasks(&self) {
        let task_ids: Vec<String> = {
            let state = self.state.lock().await;
            state.processes.keys().cloned().collect()
        };

        for task_id in task_ids {
            if let Err(err) = self.check_one_task(&task_id).await {
                error!(%task_id, error = %err, "checking task status failed");
                let _ = self.cleanup_task(&task_id).await;
            }
        }
    }

    async fn check_one_task(&self, task_id: &str) -> Result<()> {
        let (exit_status, running_time) = {
            let mut state = self.state.lock().await;
            let start_time = state
                .status
                .get(task_id)
                .map_or_else(Utc::now, |s| s.start_time);
            let running_time = Utc::now().signed_duration_since(start_time);
            let Some(child) = state.processes.get_mut(task_id) else {
                return Ok(());
            };
            (child.try_wait()?, running_time)
        };

        let timed_out = running_time.to_std().unwrap_or_default() > self.task_timeout;

        if exit_status.is_none() && timed_out {
            warn!(
                %task_id,
                running_secs = running_time.num_seconds(),
                "task exceeded timeout, killing"
            );
            self.cleanup_task(task_id).await?;
            self.reconciler
                .update_task_status(
                    task_id,
                    TaskStatus::Failed,
                    TaskStatusUpdate {
                        msg: Some(format!(
                            "timeout ({}s > {}s)",
                            running_time.num_seconds(),
                            self.task_timeout.as_secs()
                        )),
                        completed_at: Some(Utc::now()),
                        ..Default::default()
                    },
                )
                .await?;
            return Ok(());
        }

        let Some(status) = exit_status else {
            return Ok(());
        };

        let code = status.code();
        info!(%task_id, exit_code = ?code, "worker process exited");
        if code == Some(0) {
            self.queue
                .complete_task(
                    task_id,
                    TaskStatus::Success,
                    Some(format!("completed in {}s", running_time.num_seconds())),
                )
                .await?;
        } else {
            self.queue
                .complete_task(
                    task_id,
                    TaskStatus::Failed,
                    Some(format!(
                        "exit code {code:?} after {}s",
                        running_time.num_seconds()
                    )),
                )
                .await?;
        }
        self.cleanup_task(task_id).await?;
        Ok(())
    }

    /// Selects `READY` tasks oldest-first, skips sites already running,
    /// and spawns a worker per remaining candidate.
    #[instrument(skip(self))]
    pub async fn start_crawlertask(&self) -> Result<Vec<Task>> {
        let ready = self.queue.get_pending_tasks(None).await?;
        if ready.is_empty() {
            return Ok(Vec::new());
        }

        let mut started = Vec::new();
        for task in ready {
            let already_running = {
                let state = self.state.lock().await;
                state.running_sites.contains_key(&task.site_id)
            };
            if already_running {
                continue;
            }

            match self.spawn_worker(&task).await {
                Ok(()) => started.push(task),
                Err(err) => {
                    error!(task_id = %task.task_id, error = %err, "failed to spawn worker");
                    let _ = self.cleanup_task(&task.task_id).await;
                }
            }
        }
        Ok(started)
    }

    async fn spawn_worker(&self, task: &Task) -> Result<()> {
        let worker_path = Self::resolve_worker_executable()?;
        let task_log_dir = self.log_dir.join(&task.task_id);
        tokio::fs::create_dir_all(&task_log_dir).await?;

        let child = Command::new(&worker_path)
            .arg("--site-id")
            .arg(&task.site_id)
            .arg("--task-id")
            .arg(&task.task_id)
            .env("SITE_ID", &task.site_id)
            .env("TASK_ID", &task.task_id)
            .env("LOG_DIR", &task_log_dir)
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("spawning worker for task {}", task.task_id))?;

        let pid = child
            .id()
            .context("spawned worker exited before its PID could be read")?;
        let start_time = Utc::now();

        {
            let mut state = self.state.lock().await;
            state.processes.insert(task.task_id.clone(), child);
            state.status.insert(
                task.task_id.clone(),
                ProcessStatus {
                    start_time,
                    pid,
                    site_id: task.site_id.clone(),
                },
            );
            state
                .running_sites
                .insert(task.site_id.clone(), task.task_id.clone());
        }

        let mut metadata = HashMap::new();
        metadata.insert("pid".to_string(), serde_json::json!(pid));
        self.reconciler
            .update_task_status(
                &task.task_id,
                TaskStatus::Running,
                TaskStatusUpdate {
                    msg: Some("task started".to_string()),
                    task_metadata: Some(metadata),
                    ..Default::default()
                },
            )
            .await?;

        info!(task_id = %task.task_id, site_id = %task.site_id, pid, "worker started");
        Ok(())
    }

    /// Terminates the worker if alive (SIGTERM, then SIGKILL after 5s on
    /// POSIX; a direct kill elsewhere), and drops its bookkeeping.
    #[instrument(skip(self))]
    pub async fn cleanup_task(&self, task_id: &str) -> Result<bool> {
        let child = {
            let mut state = self.state.lock().await;
            state.processes.remove(task_id)
        };
        let Some(mut child) = child else {
            return Ok(false);
        };

        if let Ok(None) = child.try_wait() {
            terminate_gracefully(&mut child).await;
        }

        let mut state = self.state.lock().await;
        if let Some(status) = state.status.remove(task_id) {
            if state.running_sites.get(&status.site_id) == Some(&task_id.to_string()) {
                state.running_sites.remove(&status.site_id);
            }
        }
        Ok(true)
    }

    /// Terminates every tracked worker, cancels their task rows through
    /// the queue manager, then returns. Called once at controller shutdown.
    pub async fn cleanup(&self) -> Result<()> {
        let task_ids: Vec<String> = {
            let state = self.state.lock().await;
            state.processes.keys().cloned().collect()
        };

        for task_id in &task_ids {
            self.cleanup_task(task_id).await?;
            self.queue.cancel_task(task_id).await?;
        }
        info!(count = task_ids.len(), "supervisor cleanup complete");
        Ok(())
    }
}

#[cfg(unix)]
async fn terminate_gracefully(child: &mut Child) {
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    if let Some(pid) = child.id() {
        if let Err(err) = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            warn!(pid, error = %err, "failed to send SIGTERM, escalating to SIGKILL");
            let _ = child.start_kill();
            return;
        }
    }

    match tokio::time::timeout(GRACEFUL_SHUTDOWN_WAIT, child.wait()).await {
        Ok(_) => {}
        Err(_) => {
            warn!("worker did not exit within the grace period, sending SIGKILL");
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate_gracefully(child: &mut Child) {
    let _ = child.start_kill();
    let _ = child.wait().await;
}
