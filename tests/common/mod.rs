//! Shared scaffolding for the scenario tests: spins up a `Controller`
//! against a fresh temp directory with one seed file per site, each
//! adopted as enabled (the registry's default for a freshly-seeded site).

use fleet_controller_lib::app::{Controller, ControllerPaths};
use fleet_controller_lib::domain::entities::{Task, TaskStatus};
use fleet_controller_lib::reconciler::TaskStatusUpdate;
use std::path::PathBuf;
use tempfile::TempDir;

pub struct Fixture {
    pub controller: Controller,
    _tempdir: TempDir,
}

pub async fn build(site_ids: &[&str]) -> Fixture {
    let tmp = tempfile::tempdir().unwrap();
    let seed_dir = tmp.path().join("seeds");
    tokio::fs::create_dir_all(&seed_dir).await.unwrap();

    for site_id in site_ids {
        tokio::fs::write(
            seed_dir.join(format!("{site_id}.json")),
            format!(r#"{{"site_url": "https://{site_id}.example.com"}}"#),
        )
        .await
        .unwrap();
    }

    let paths = ControllerPaths {
        repo_root: tmp.path().to_path_buf(),
        seed_dir,
        credentials_path: tmp.path().join("credentials.json"),
        task_log_dir: tmp.path().join("tasks"),
    };

    let controller = Controller::build("sqlite::memory:", paths).await.unwrap();
    Fixture {
        controller,
        _tempdir: tmp,
    }
}

#[allow(dead_code)]
pub fn log_dir(fixture: &Fixture) -> PathBuf {
    fixture._tempdir.path().join("tasks")
}

/// Stands in for one supervisor tick's dispatch half: pops the next
/// `READY` task for `site_id` (if the site's slot is free) and marks it
/// `RUNNING`, the way `ProcessSupervisor::spawn_worker` would after a
/// successful spawn.
pub async fn simulate_dispatch(controller: &Controller, site_id: &str) -> Option<Task> {
    let task = controller.queue.get_next_task(site_id).await.unwrap()?;
    controller
        .reconciler
        .update_task_status(&task.task_id, TaskStatus::Running, TaskStatusUpdate::default())
        .await
        .unwrap();
    controller.reconciler.get_task(&task.task_id).await.unwrap()
}

/// Stands in for a full supervisor tick's dispatch pass across several
/// candidate sites, honoring the same `max_concurrency` gate
/// `ProcessSupervisor::tick` applies before calling `start_crawlertask`.
pub async fn simulate_tick(
    controller: &Controller,
    site_ids: &[&str],
    max_concurrency: usize,
    already_running: usize,
) -> Vec<Task> {
    let mut started = Vec::new();
    for site_id in site_ids {
        if already_running + started.len() >= max_concurrency {
            break;
        }
        if let Some(task) = simulate_dispatch(controller, site_id).await {
            started.push(task);
        }
    }
    started
}

/// Stands in for the reap half of a tick: what the supervisor does once
/// it observes a worker's exit code, per `check_one_task`'s classification.
pub async fn simulate_exit(controller: &Controller, task_id: &str, exit_code: i32) {
    let status = if exit_code == 0 {
        TaskStatus::Success
    } else {
        TaskStatus::Failed
    };
    controller
        .queue
        .complete_task(task_id, status, Some(format!("exit code {exit_code}")))
        .await
        .unwrap();
}
