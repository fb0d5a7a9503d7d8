//! `fleet-worker`: the per-task subprocess the supervisor spawns. Reads
//! its `SiteSetup` from the same store the controller owns, performs a
//! stand-in scrape (real browser automation is out of scope here), writes
//! a result and browser state back, and exits 0 on success.
//!
//! Invoked as `fleet-worker --site-id <id> --task-id <id>`, matching the
//! argument vector the supervisor constructs; `SITE_ID`/`TASK_ID`/`LOG_DIR`
//! are also set in the environment as a secondary source of truth.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use fleet_controller_lib::domain::entities::{BrowserState, CrawlResultCreate};
use fleet_controller_lib::domain::repositories::{
    BrowserStateRepository, CheckInRepository, CrawlerConfigRepository,
    CrawlerCredentialRepository, CrawlerRepository, ResultRepository, SiteConfigRepository,
    TaskRepository,
};
use fleet_controller_lib::infrastructure::repositories::{
    SqliteBrowserStateRepository, SqliteCheckInRepository, SqliteCrawlerConfigRepository,
    SqliteCrawlerCredentialRepository, SqliteCrawlerRepository, SqliteResultRepository,
    SqliteSiteConfigRepository, SqliteTaskRepository,
};
use fleet_controller_lib::infrastructure::{init_worker_logging, ConfigManager, DATABASE_FILE_NAME};
use fleet_controller_lib::ingest::ResultIngest;
use fleet_controller_lib::reconciler::{TaskReconciler, TaskStatusUpdate};
use fleet_controller_lib::registry::SiteRegistry;
use fleet_controller_lib::{browser_store::BrowserStore, domain::entities::TaskStatus};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info};

struct Args {
    site_id: String,
    task_id: String,
}

fn parse_args() -> Result<Args> {
    let mut site_id = std::env::var("SITE_ID").ok();
    let mut task_id = std::env::var("TASK_ID").ok();

    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--site-id" | "--site_id" => site_id = iter.next(),
            "--task-id" | "--task_id" => task_id = iter.next(),
            _ => {}
        }
    }

    Ok(Args {
        site_id: site_id.context("missing --site-id")?,
        task_id: task_id.context("missing --task-id")?,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = parse_args()?;
    init_worker_logging(&std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()))?;
    info!(site_id = %args.site_id, task_id = %args.task_id, "worker starting");

    match run(&args).await {
        Ok(()) => {
            info!(task_id = %args.task_id, "worker finished");
            Ok(())
        }
        Err(err) => {
            error!(task_id = %args.task_id, error = %err, "worker failed");
            std::process::exit(1);
        }
    }
}

async fn run(args: &Args) -> Result<()> {
    let repo_root = std::env::current_dir().context("failed to resolve working directory")?;
    ConfigManager::new(repo_root.clone())?
        .initialize_on_first_run()
        .await?;

    let database_url = format!(
        "sqlite:{}",
        repo_root.join("app").join(DATABASE_FILE_NAME).display()
    );
    let store = fleet_controller_lib::infrastructure::DatabaseConnection::new(&database_url)
        .await
        .context("opening store")?;
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

    let registry = SiteRegistry::new(
        pool.clone(),
        crawlers.clone(),
        site_configs,
        crawler_configs,
        credentials,
        browser_states.clone(),
        repo_root
            .join("services")
            .join("sites")
            .join("implementations"),
        repo_root
            .join("services")
            .join("sites")
            .join("credentials")
            .join("credentials.json"),
    );
    registry.initialize().await?;

    let reconciler = TaskReconciler::new(tasks.clone());
    let ingest = ResultIngest::new(tasks, results, checkins);
    let browser_store = BrowserStore::new(pool.clone(), crawlers, browser_states);

    let Some(setup) = registry.get_site_setup(&args.site_id).await else {
        let msg = format!("site {} has no registered setup", args.site_id);
        reconciler
            .update_task_status(
                &args.task_id,
                TaskStatus::Failed,
                TaskStatusUpdate {
                    msg: Some(msg.clone()),
                    completed_at: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await?;
        bail!(msg);
    };

    let result = CrawlResultCreate {
        task_id: args.task_id.clone(),
        site_id: args.site_id.clone(),
        username: setup.crawler_credential.username.clone(),
        user_class: None,
        uid: None,
        join_time: None,
        last_active: Some(Utc::now()),
        upload: 0.0,
        download: 0.0,
        bonus: None,
        seeding_score: None,
        hr_count: None,
        bonus_per_hour: None,
        seeding_size: None,
        seeding_count: None,
    };
    ingest.save_result(result).await?;

    browser_store
        .save(
            &args.site_id,
            &BrowserState {
                site_id: args.site_id.clone(),
                cookies: HashMap::new(),
                local_storage: HashMap::new(),
                session_storage: HashMap::new(),
                updated_at: Utc::now(),
            },
        )
        .await?;

    Ok(())
}
