//! Settings Provider (C8): the single settings row, lazily created on
//! first run and backfilled from the environment, plus the Chrome
//! snapshot provisioning that keeps `chrome_path` pointing at a real
//! executable.
//!
//! Everything above this module reads `Settings` through `get()`; the
//! only write path is `set()`, reserved for the out-of-scope settings
//! API. The core's own scheduling logic never calls `set()`.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::domain::entities::Settings;
use crate::domain::repositories::SettingsRepository;

/// Fields that may be independently overwritten by the settings-mutation
/// surface. Absent fields leave the current value untouched.
#[derive(Debug, Clone, Default)]
pub struct SettingsUpdate {
    pub crawler_max_concurrency: Option<u32>,
    pub login_max_retry: Option<u32>,
    pub task_timeout: Option<u64>,
    pub headless: Option<bool>,
    pub fresh_login: Option<bool>,
    pub captcha_default_method: Option<String>,
    pub captcha_skip_sites: Option<Vec<String>>,
    pub checkin_sites: Option<Vec<String>>,
    pub enable_checkin: Option<bool>,
    pub chrome_path: Option<String>,
    pub log_level: Option<String>,
    pub log_to_file: Option<bool>,
    pub log_json: Option<bool>,
}

impl SettingsUpdate {
    fn apply_to(self, settings: &mut Settings) {
        if let Some(v) = self.crawler_max_concurrency {
            settings.crawler_max_concurrency = v;
        }
        if let Some(v) = self.login_max_retry {
            settings.login_max_retry = v;
        }
        if let Some(v) = self.task_timeout {
            settings.task_timeout = v;
        }
        if let Some(v) = self.headless {
            settings.headless = v;
        }
        if let Some(v) = self.fresh_login {
            settings.fresh_login = v;
        }
        if let Some(v) = self.captcha_default_method {
            settings.captcha_default_method = v;
        }
        if let Some(v) = self.captcha_skip_sites {
            settings.captcha_skip_sites = v;
        }
        if let Some(v) = self.checkin_sites {
            settings.checkin_sites = v;
        }
        if let Some(v) = self.enable_checkin {
            settings.enable_checkin = v;
        }
        if let Some(v) = self.chrome_path {
            settings.chrome_path = Some(v);
        }
        if let Some(v) = self.log_level {
            settings.log_level = v;
        }
        if let Some(v) = self.log_to_file {
            settings.log_to_file = v;
        }
        if let Some(v) = self.log_json {
            settings.log_json = v;
        }
    }
}

/// Where one host's Chromium snapshot lives on Google's snapshot bucket,
/// and where the archive's executable ends up relative to the extraction
/// directory.
struct ChromePlatform {
    snapshot_dir: &'static str,
    zip_name: &'static str,
    relative_exe: &'static str,
    app_bundle_root: Option<&'static str>,
}

fn platform_for(os: &str, arch: &str) -> Result<ChromePlatform> {
    Ok(match (os, arch) {
        ("linux", "x86_64") => ChromePlatform {
            snapshot_dir: "Linux_x64",
            zip_name: "chrome-linux.zip",
            relative_exe: "chrome-linux/chrome",
            app_bundle_root: None,
        },
        ("windows", "x86_64") => ChromePlatform {
            snapshot_dir: "Win_x64",
            zip_name: "chrome-win.zip",
            relative_exe: "chrome-win/chrome.exe",
            app_bundle_root: None,
        },
        ("macos", "aarch64") => ChromePlatform {
            snapshot_dir: "Mac_Arm64",
            zip_name: "chrome-mac.zip",
            relative_exe: "chrome-mac/Chromium.app/Contents/MacOS/Chromium",
            app_bundle_root: Some("chrome-mac/Chromium.app"),
        },
        ("macos", "x86_64") => ChromePlatform {
            snapshot_dir: "Mac",
            zip_name: "chrome-mac.zip",
            relative_exe: "chrome-mac/Chromium.app/Contents/MacOS/Chromium",
            app_bundle_root: Some("chrome-mac/Chromium.app"),
        },
        _ => bail!("unsupported host for Chrome provisioning: {os}/{arch}"),
    })
}

fn detect_platform() -> Result<ChromePlatform> {
    platform_for(std::env::consts::OS, std::env::consts::ARCH)
}

pub struct SettingsProvider {
    repo: Arc<dyn SettingsRepository>,
    http: reqwest::Client,
    cache: Mutex<Settings>,
}

impl SettingsProvider {
    #[must_use]
    pub fn new(repo: Arc<dyn SettingsRepository>) -> Self {
        Self {
            repo,
            http: reqwest::Client::new(),
            cache: Mutex::new(Settings::default()),
        }
    }

    /// Loads the settings row, creating and env-backfilling one if this
    /// is a first run, then ensures the local Chrome snapshot exists.
    #[instrument(skip(self))]
    pub async fn initialize(&self) -> Result<Settings> {
        let mut settings = match self.repo.load().await? {
            Some(existing) => {
                info!("loaded existing settings row");
                existing
            }
            None => {
                info!("no settings row found, creating one from environment/defaults");
                let mut fresh = Settings::default();
                backfill_from_env(&mut fresh);
                self.repo.upsert(&fresh).await?;
                fresh
            }
        };

        if let Err(err) = self.ensure_chrome_exists(&mut settings).await {
            warn!(error = %err, "failed to ensure Chrome exists during settings initialization");
        }

        *self.cache.lock().await = settings.clone();
        Ok(settings)
    }

    pub async fn get(&self) -> Settings {
        self.cache.lock().await.clone()
    }

    /// The only write path; exercised by the settings-mutation surface,
    /// never by the core's own scheduling/supervision logic.
    #[instrument(skip(self, update))]
    pub async fn set(&self, update: SettingsUpdate) -> Result<Settings> {
        let mut settings = self.cache.lock().await;
        update.apply_to(&mut settings);
        self.repo.upsert(&settings).await?;
        Ok(settings.clone())
    }

    /// Idempotent: if the resolved path from a prior run still exists,
    /// this is a no-op. Otherwise downloads, verifies, and extracts the
    /// platform-appropriate Chromium snapshot.
    async fn ensure_chrome_exists(&self, settings: &mut Settings) -> Result<()> {
        if let Some(path) = &settings.chrome_path {
            if Path::new(path).exists() {
                return Ok(());
            }
        }

        let platform = detect_platform()?;
        let chrome_dir = Path::new(&settings.storage_path).join("chrome");
        tokio::fs::create_dir_all(&chrome_dir).await?;

        let exe_path = chrome_dir.join(platform.relative_exe);
        let present_marker = platform
            .app_bundle_root
            .map_or_else(|| exe_path.clone(), |root| chrome_dir.join(root));

        if !present_marker.exists() {
            self.download_and_extract(&chrome_dir, &platform).await?;
            set_executable(&exe_path, platform.app_bundle_root.map(|root| chrome_dir.join(root)))?;
        }

        settings.chrome_path = Some(exe_path.to_string_lossy().to_string());
        self.repo.upsert(settings).await?;
        info!(chrome_path = %exe_path.display(), "Chrome snapshot ready");
        Ok(())
    }

    async fn download_and_extract(&self, chrome_dir: &Path, platform: &ChromePlatform) -> Result<()> {
        let zip_path = chrome_dir.join(platform.zip_name);

        let need_download = if zip_path.exists() {
            match validate_zip(&zip_path) {
                Ok(true) => {
                    info!(path = %zip_path.display(), "reusing existing Chrome archive");
                    false
                }
                _ => {
                    warn!("existing Chrome archive is corrupted, re-downloading");
                    tokio::fs::remove_file(&zip_path).await.ok();
                    true
                }
            }
        } else {
            true
        };

        if need_download {
            let version_url = format!(
                "https://storage.googleapis.com/chromium-browser-snapshots/{}/LAST_CHANGE",
                platform.snapshot_dir
            );
            let build = self
                .http
                .get(&version_url)
                .send()
                .await
                .context("fetching LAST_CHANGE")?
                .error_for_status()
                .context("LAST_CHANGE request failed")?
                .text()
                .await?;
            let build = build.trim();

            let download_url = format!(
                "https://storage.googleapis.com/chromium-browser-snapshots/{}/{}/{}",
                platform.snapshot_dir, build, platform.zip_name
            );
            info!(%download_url, "downloading Chrome snapshot");

            let bytes = self
                .http
                .get(&download_url)
                .send()
                .await
                .context("downloading Chrome snapshot")?
                .error_for_status()
                .context("Chrome snapshot download failed")?
                .bytes()
                .await?;
            tokio::fs::write(&zip_path, &bytes).await?;

            if !validate_zip(&zip_path)? {
                bail!("downloaded Chrome archive failed integrity check");
            }
        }

        let chrome_dir = chrome_dir.to_path_buf();
        let zip_path_blocking = zip_path.clone();
        tokio::task::spawn_blocking(move || extract_zip(&zip_path_blocking, &chrome_dir))
            .await
            .context("extraction task panicked")??;
        Ok(())
    }
}

/// Reads every entry fully, which forces zip-rs to validate each CRC;
/// returns `Ok(false)` rather than erroring so callers can redownload.
fn validate_zip(path: &Path) -> Result<bool> {
    let file = std::fs::File::open(path)?;
    let mut archive = match zip::ZipArchive::new(file) {
        Ok(archive) => archive,
        Err(_) => return Ok(false),
    };
    for i in 0..archive.len() {
        let mut entry = match archive.by_index(i) {
            Ok(entry) => entry,
            Err(_) => return Ok(false),
        };
        if std::io::copy(&mut entry, &mut std::io::sink()).is_err() {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Extracts every entry by hand rather than via a convenience method,
/// using `enclosed_name()` to reject path-traversal entries.
fn extract_zip(zip_path: &Path, dest_dir: &Path) -> Result<()> {
    let file = std::fs::File::open(zip_path)?;
    let mut archive = zip::ZipArchive::new(file)?;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let Some(name) = entry.enclosed_name() else {
            continue;
        };
        let dest_path = dest_dir.join(name);

        if entry.is_dir() {
            std::fs::create_dir_all(&dest_path)?;
            continue;
        }
        if let Some(parent) = dest_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = std::fs::File::create(&dest_path)?;
        std::io::copy(&mut entry, &mut out)?;
    }
    Ok(())
}

#[cfg(unix)]
fn set_executable(exe_path: &Path, app_bundle_root: Option<PathBuf>) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    if let Some(bundle_root) = app_bundle_root {
        if cfg!(target_os = "macos") {
            let _ = std::process::Command::new("xattr")
                .arg("-rd")
                .arg("com.apple.quarantine")
                .arg(&bundle_root)
                .status();
        }
        let _ = std::process::Command::new("chmod")
            .arg("-R")
            .arg("+x")
            .arg(&bundle_root)
            .status();
        return Ok(());
    }

    let mut perms = std::fs::metadata(exe_path)?.permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(exe_path, perms)?;
    Ok(())
}

#[cfg(not(unix))]
fn set_executable(_exe_path: &Path, _app_bundle_root: Option<PathBuf>) -> Result<()> {
    Ok(())
}

fn backfill_from_env(settings: &mut Settings) {
    if let Some(v) = env_u32("CRAWLER_MAX_CONCURRENCY") {
        settings.crawler_max_concurrency = v;
    }
    if let Some(v) = env_u32("LOGIN_MAX_RETRY") {
        settings.login_max_retry = v;
    }
    if let Some(v) = env_u64("TASK_TIMEOUT") {
        settings.task_timeout = v;
    }
    if let Some(v) = env_string("STORAGE_PATH") {
        settings.storage_path = v;
    }
    if let Some(v) = env_string("CRAWLER_CONFIG_PATH") {
        settings.crawler_config_path = v;
    }
    if let Some(v) = env_string("CRAWLER_CREDENTIAL_PATH") {
        settings.crawler_credential_path = v;
    }
    if let Some(v) = env_bool("HEADLESS") {
        settings.headless = v;
    }
    if let Some(v) = env_bool("FRESH_LOGIN") {
        settings.fresh_login = v;
    }
    if let Some(v) = env_string("CAPTCHA_DEFAULT_METHOD") {
        settings.captcha_default_method = v;
    }
    if let Some(v) = env_list("CAPTCHA_SKIP_SITES") {
        settings.captcha_skip_sites = v;
    }
    if let Some(v) = env_list("CHECKIN_SITES") {
        settings.checkin_sites = v;
    }
    if let Some(v) = env_bool("ENABLE_CHECKIN") {
        settings.enable_checkin = v;
    }
    if let Some(v) = env_string("CHROME_PATH") {
        settings.chrome_path = Some(v);
    }
    if let Some(v) = env_string("LOG_LEVEL") {
        settings.log_level = v;
    }
    if let Some(v) = env_bool("LOG_TO_FILE") {
        settings.log_to_file = v;
    }
    if let Some(v) = env_bool("LOG_JSON") {
        settings.log_json = v;
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_bool(key: &str) -> Option<bool> {
    env_string(key).and_then(|v| v.to_lowercase().parse().ok())
}

fn env_u32(key: &str) -> Option<u32> {
    env_string(key).and_then(|v| v.parse().ok())
}

fn env_u64(key: &str) -> Option<u64> {
    env_string(key).and_then(|v| v.parse().ok())
}

fn env_list(key: &str) -> Option<Vec<String>> {
    env_string(key).map(|v| v.split(',').map(str::trim).map(str::to_string).collect())
}
