//! Process-level configuration and first-run bootstrap.
//!
//! The authoritative settings row lives in the `settings` table (see
//! `domain::entities::Settings`) and is resolved DB row > environment
//! variable > compiled default by `crate::settings::SettingsProvider`.
//! This module owns the layer *beneath* that: a small on-disk process
//! config (distinct from the DB-backed settings row) plus the directory
//! layout the rest of the controller assumes exists before it starts.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs;
use tracing::info;

/// Relational store filename under `<repo_root>/app/`, shared by both
/// binaries so a worker subprocess opens the same database its parent
/// controller does.
pub const DATABASE_FILE_NAME: &str = "site-fleet-controller.db";

/// Process-level config persisted as JSON, independent of the DB `Settings`
/// row. Holds bookkeeping the controller itself manages across restarts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessConfig {
    pub data_dir: PathBuf,
    pub config_version: u32,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("app"),
            config_version: 1,
        }
    }
}

/// Locates config/data directories, performs first-run bootstrap, and
/// loads/saves the process-level JSON config.
pub struct ConfigManager {
    pub config_path: PathBuf,
    pub repo_root: PathBuf,
}

impl ConfigManager {
    /// Application config directory, platform-appropriate via `dirs`.
    pub fn get_config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("failed to resolve user config directory")?
            .join("site-fleet-controller");
        Ok(config_dir)
    }

    /// Build a manager rooted at `repo_root` (the directory containing
    /// `app/`, `services/`, and `storage/`).
    pub fn new(repo_root: PathBuf) -> Result<Self> {
        let config_path = Self::get_config_dir()?.join("process_config.json");
        Ok(Self {
            config_path,
            repo_root,
        })
    }

    /// Bootstrap on first run: create the config directory, the on-disk
    /// layout this controller assumes (`app/`, `app/logs/logs`,
    /// `app/logs/error`, `services/sites/implementations`,
    /// `services/sites/credentials`, `storage/tasks`, `storage/chrome`),
    /// and the process config file if absent.
    pub async fn initialize_on_first_run(&self) -> Result<ProcessConfig> {
        if let Some(parent) = self.config_path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)
                    .await
                    .context("failed to create config directory")?;
            }
        }

        self.create_data_directories().await?;

        if !self.config_path.exists() {
            info!("first run detected, writing default process config");
            let default_config = ProcessConfig {
                data_dir: self.repo_root.join("app"),
                ..ProcessConfig::default()
            };
            self.save_config(&default_config).await?;
            return Ok(default_config);
        }

        self.load_config().await
    }

    async fn create_data_directories(&self) -> Result<()> {
        let directories = [
            self.repo_root.join("app"),
            self.repo_root.join("app").join("logs").join("logs"),
            self.repo_root.join("app").join("logs").join("error"),
            self.repo_root
                .join("services")
                .join("sites")
                .join("implementations"),
            self.repo_root
                .join("services")
                .join("sites")
                .join("credentials"),
            self.repo_root.join("storage").join("tasks"),
            self.repo_root.join("storage").join("chrome"),
        ];

        for dir in &directories {
            if !dir.exists() {
                fs::create_dir_all(dir)
                    .await
                    .with_context(|| format!("failed to create directory: {dir:?}"))?;
            }
        }
        Ok(())
    }

    pub async fn load_config(&self) -> Result<ProcessConfig> {
        if !self.config_path.exists() {
            let default_config = ProcessConfig {
                data_dir: self.repo_root.join("app"),
                ..ProcessConfig::default()
            };
            self.save_config(&default_config).await?;
            return Ok(default_config);
        }

        let content = fs::read_to_string(&self.config_path)
            .await
            .context("failed to read process config file")?;
        serde_json::from_str(&content).context("failed to parse process config file")
    }

    pub async fn save_config(&self, config: &ProcessConfig) -> Result<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let content =
            serde_json::to_string_pretty(config).context("failed to serialize process config")?;
        fs::write(&self.config_path, content)
            .await
            .context("failed to write process config file")?;
        Ok(())
    }

    pub fn config_path(&self) -> &PathBuf {
        &self.config_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_run_creates_layout_and_default_config() {
        let tmp = tempfile::tempdir().unwrap();
        let mut manager = ConfigManager::new(tmp.path().to_path_buf()).unwrap();
        manager.config_path = tmp.path().join("process_config.json");

        let config = manager.initialize_on_first_run().await.unwrap();
        assert_eq!(config.config_version, 1);
        assert!(tmp.path().join("app").join("logs").join("logs").is_dir());
        assert!(tmp
            .path()
            .join("services")
            .join("sites")
            .join("credentials")
            .is_dir());
        assert!(manager.config_path.exists());
    }

    #[tokio::test]
    async fn load_config_is_idempotent_across_runs() {
        let tmp = tempfile::tempdir().unwrap();
        let mut manager = ConfigManager::new(tmp.path().to_path_buf()).unwrap();
        manager.config_path = tmp.path().join("process_config.json");

        manager.initialize_on_first_run().await.unwrap();
        let first = manager.load_config().await.unwrap();
        let second = manager.load_config().await.unwrap();
        assert_eq!(first.config_version, second.config_version);
    }
}
