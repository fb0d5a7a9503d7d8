//! Controller (C9): the single top-level struct owning every manager as a
//! plain field. Construction mirrors data dependency — store, then
//! settings, then the registry, then the store-backed managers, then the
//! supervisor. `shutdown()` reverses it where it matters: supervisor,
//! then queue, then store.

use anyhow::Result;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::browser_store::BrowserStore;
use crate::domain::entities::Task;
use crate::domain::repositories::{
    BrowserStateRepository, CheckInRepository, CrawlerConfigRepository, CrawlerCredentialRepository,
    CrawlerRepository, ResultRepository, SettingsRepository, SiteConfigRepository, TaskRepository,
};
use crate::infrastructure::database_connection::DatabaseConnection;
use crate::infrastructure::repositories::{
    SqliteBrowserStateRepository, SqliteCheckInRepository, SqliteCrawlerConfigRepository,
    SqliteCrawlerCredentialRepository, SqliteCrawlerRepository, SqliteResultRepository,
    SqliteSettingsRepository, SqliteSiteConfigRepository, SqliteTaskRepository,
};
use crate::ingest::ResultIngest;
use crate::queue::{ClearResult, QueueManager};
use crate::reconciler::TaskReconciler;
use crate::registry::SiteRegistry;
use crate::settings::SettingsProvider;
use crate::supervisor::ProcessSupervisor;

/// Outcome of a task-admission request, distinguishing the two rejection
/// kinds an HTTP admission surface maps to 404/400 from a successful
/// `READY` insert.
#[derive(Debug)]
pub enum AdmitOutcome {
    Admitted(Task),
    SiteNotFound,
    SiteDisabled,
}

/// Filesystem layout the registry and supervisor read from; mirrors
/// `ConfigManager::create_data_directories`.
pub struct ControllerPaths {
    pub repo_root: PathBuf,
    pub seed_dir: PathBuf,
    pub credentials_path: PathBuf,
    pub task_log_dir: PathBuf,
}

pub struct Controller {
    pub store: DatabaseConnection,
    pub settings: Arc<SettingsProvider>,
    pub registry: Arc<SiteRegistry>,
    pub browser_store: Arc<BrowserStore>,
    pub reconciler: Arc<TaskReconciler>,
    pub queue: Arc<QueueManager>,
    pub ingest: Arc<ResultIngest>,
    pub supervisor: Arc<ProcessSupervisor>,
    tick_handle: Option<tokio::task::JoinHandle<()>>,
}

impl Controller {
    /// Opens the store, runs migrations, then wires every manager in
    /// dependency order. Does not start the supervisor's tick loop —
    /// call `start()` once the controller is otherwise ready to serve.
    pub async fn build(database_url: &str, paths: ControllerPaths) -> Result<Self> {
        let store = DatabaseConnection::new(database_url).await?;
        store.migrate().await?;
        let pool = store.pool().clone();

        let crawlers: Arc<dyn CrawlerRepository> = Arc::new(SqliteCrawlerRepository::new(pool.clone()));
        let site_configs: Arc<dyn SiteConfigRepository> =
            Arc::new(SqliteSiteConfigRepository::new(pool.clone()));
        let crawler_configs: Arc<dyn CrawlerConfigRepository> =
            Arc::new(SqliteCrawlerConfigRepository::new(pool.clone()));
        let credentials: Arc<dyn CrawlerCredentialRepository> =
            Arc::new(SqliteCrawlerCredentialRepository::new(pool.clone()));
        let browser_states: Arc<dyn BrowserStateRepository> =
            Arc::new(SqliteBrowserStateRepository::new(pool.clone()));
        let tasks: Arc<dyn TaskRepository> = Arc::new(SqliteTaskRepository::new(pool.clone()));
        let results: Arc<dyn ResultRepository> = Arc::new(SqliteResultRepository::new(pool.clone()));
        let checkins: Arc<dyn CheckInRepository> = Arc::new(SqliteCheckInRepository::new(pool.clone()));
        let settings_repo: Arc<dyn SettingsRepository> =
            Arc::new(SqliteSettingsRepository::new(pool.clone()));

        let settings = Arc::new(SettingsProvider::new(settings_repo));
        let resolved_settings = settings.initialize().await?;

        let registry = Arc::new(SiteRegistry::new(
            pool.clone(),
            crawlers.clone(),
            site_configs,
            crawler_configs,
            credentials,
            browser_states.clone(),
            paths.seed_dir,
            paths.credentials_path,
        ));
        registry.initialize().await?;

        let browser_store = Arc::new(BrowserStore::new(pool.clone(), crawlers, browser_states));
        let reconciler = Arc::new(TaskReconciler::new(tasks.clone()));
        let ingest = Arc::new(ResultIngest::new(tasks.clone(), results, checkins));
        let queue = Arc::new(QueueManager::new(tasks, reconciler.clone()));
        queue.rebuild_from_store().await?;

        let supervisor = Arc::new(ProcessSupervisor::new(
            reconciler.clone(),
            queue.clone(),
            resolved_settings.crawler_max_concurrency,
            Duration::from_secs(resolved_settings.task_timeout),
            paths.task_log_dir,
        ));

        Ok(Self {
            store,
            settings,
            registry,
            browser_store,
            reconciler,
            queue,
            ingest,
            supervisor,
            tick_handle: None,
        })
    }

    /// Starts the one true background loop: the supervisor's periodic
    /// tick. Idempotent against a controller that already has one running.
    pub fn start(&mut self) {
        if self.tick_handle.is_some() {
            return;
        }
        self.tick_handle = Some(self.supervisor.clone().spawn_tick_loop());
        info!("controller started");
    }

    /// Admission entry point: checks the site exists and is enabled
    /// before handing off to the queue. This is the synchronous
    /// admission/read call whose errors are the only ones meant to
    /// propagate to an API layer.
    pub async fn admit_task(
        &self,
        site_id: &str,
        task_metadata: HashMap<String, serde_json::Value>,
    ) -> Result<AdmitOutcome> {
        let Some(setup) = self.registry.get_site_setup(site_id).await else {
            return Ok(AdmitOutcome::SiteNotFound);
        };
        if !setup.is_enabled() {
            return Ok(AdmitOutcome::SiteDisabled);
        }

        let created = self
            .queue
            .add_task(crate::domain::entities::TaskCreate {
                site_id: site_id.to_string(),
                task_metadata,
            })
            .await?;
        Ok(match created {
            Some(task) => AdmitOutcome::Admitted(task),
            None => AdmitOutcome::SiteNotFound,
        })
    }

    pub async fn get_task(&self, task_id: &str) -> Result<Option<Task>> {
        self.reconciler.get_task(task_id).await
    }

    pub async fn cancel_task(&self, task_id: &str) -> Result<bool> {
        self.queue.cancel_task(task_id).await
    }

    pub async fn clear_pending_tasks(&self, site_id: Option<&str>) -> Result<ClearResult> {
        self.queue.clear_pending_tasks(site_id).await
    }

    /// Supervisor cleanup, then queue cleanup, then close the store —
    /// the ordering the concurrency model documents.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(handle) = self.tick_handle.take() {
            handle.abort();
        }
        self.supervisor.cleanup().await?;
        self.queue.cleanup().await?;
        self.store.close().await;
        info!("controller shut down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn build_then_shutdown_without_ever_starting() {
        let seed_dir = tempdir().unwrap();
        let paths = ControllerPaths {
            repo_root: seed_dir.path().to_path_buf(),
            seed_dir: seed_dir.path().to_path_buf(),
            credentials_path: seed_dir.path().join("credentials.json"),
            task_log_dir: seed_dir.path().join("tasks"),
        };
        let controller = Controller::build("sqlite::memory:", paths).await.unwrap();
        controller.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let seed_dir = tempdir().unwrap();
        let paths = ControllerPaths {
            repo_root: seed_dir.path().to_path_buf(),
            seed_dir: seed_dir.path().to_path_buf(),
            credentials_path: seed_dir.path().join("credentials.json"),
            task_log_dir: seed_dir.path().join("tasks"),
        };
        let mut controller = Controller::build("sqlite::memory:", paths).await.unwrap();
        controller.start();
        controller.start();
        controller.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn admit_task_rejects_unknown_site() {
        let seed_dir = tempdir().unwrap();
        let paths = ControllerPaths {
            repo_root: seed_dir.path().to_path_buf(),
            seed_dir: seed_dir.path().to_path_buf(),
            credentials_path: seed_dir.path().join("credentials.json"),
            task_log_dir: seed_dir.path().join("tasks"),
        };
        let controller = Controller::build("sqlite::memory:", paths).await.unwrap();

        let outcome = controller
            .admit_task("site_unknown", HashMap::new())
            .await
            .unwrap();
        assert!(matches!(outcome, AdmitOutcome::SiteNotFound));
        controller.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn admit_task_rejects_disabled_site() {
        let seed_dir = tempdir().unwrap();
        let paths = ControllerPaths {
            repo_root: seed_dir.path().to_path_buf(),
            seed_dir: seed_dir.path().to_path_buf(),
            credentials_path: seed_dir.path().join("credentials.json"),
            task_log_dir: seed_dir.path().join("tasks"),
        };
        let controller = Controller::build("sqlite::memory:", paths).await.unwrap();

        controller
            .registry
            .update_site_setup(
                "site_a",
                crate::domain::entities::SiteSetupUpdate {
                    new_crawler_config: Some(
                        crate::domain::entities::CrawlerConfig {
                            enabled: false,
                            ..crate::domain::entities::CrawlerConfig::default_for("site_a")
                        },
                    ),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let outcome = controller.admit_task("site_a", HashMap::new()).await.unwrap();
        assert!(matches!(outcome, AdmitOutcome::SiteDisabled));
        controller.shutdown().await.unwrap();
    }
}
