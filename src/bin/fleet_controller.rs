//! `fleet-controller`: the long-lived parent process. Bootstraps the
//! on-disk layout, opens the store, wires every manager, starts the
//! supervisor's tick loop, then waits for a shutdown signal.

use anyhow::{Context, Result};
use fleet_controller_lib::app::{Controller, ControllerPaths};
use fleet_controller_lib::infrastructure::{
    init_logging, log_directory, ConfigManager, LoggingConfig, DATABASE_FILE_NAME,
};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let repo_root = std::env::current_dir().context("failed to resolve working directory")?;
    let config_manager = ConfigManager::new(repo_root.clone())?;
    config_manager.initialize_on_first_run().await?;

    init_logging(&LoggingConfig {
        log_dir: log_directory(&repo_root),
        ..LoggingConfig::default()
    })?;

    let database_url = format!(
        "sqlite:{}",
        repo_root.join("app").join(DATABASE_FILE_NAME).display()
    );
    let paths = ControllerPaths {
        seed_dir: repo_root
            .join("services")
            .join("sites")
            .join("implementations"),
        credentials_path: repo_root
            .join("services")
            .join("sites")
            .join("credentials")
            .join("credentials.json"),
        task_log_dir: repo_root.join("storage").join("tasks"),
        repo_root,
    };

    let mut controller = Controller::build(&database_url, paths).await?;
    controller.start();
    info!("fleet controller running, awaiting shutdown signal");

    tokio::signal::ctrl_c()
        .await
        .context("failed to install ctrl-c handler")?;
    info!("shutdown signal received");

    controller.shutdown().await?;
    Ok(())
}
