//! Site configuration registry (C2): the authoritative in-memory
//! `site_id -> SiteSetup` map every other component consults.
//!
//! Construction order matters: `initialize` loads from the store first,
//! then scans the filesystem seed directory for sites the store doesn't
//! know about yet, persisting each discovered seed before inserting it
//! into memory. After startup, the map is the cache; the store is truth.

use anyhow::{Context, Result};
use serde::Deserialize;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::domain::entities::{
    CheckinConfig, Crawler, CrawlerConfig, CrawlerCredential, ExtractRules, LoginConfig,
    SiteConfig, SiteSetup, SiteSetupUpdate,
};
use crate::domain::repositories::{
    BrowserStateRepository, CrawlerConfigRepository, CrawlerCredentialRepository,
    CrawlerRepository, SiteConfigRepository,
};

#[derive(Debug, Deserialize)]
struct SeedDescriptor {
    site_url: String,
    #[serde(default)]
    login_config: LoginConfig,
    #[serde(default)]
    extract_rules: ExtractRules,
    #[serde(default)]
    checkin_config: CheckinConfig,
}

#[derive(Debug, Deserialize, Default)]
struct CredentialRecord {
    username: Option<String>,
    password: Option<String>,
    authorization: Option<String>,
    apikey: Option<String>,
    manual_cookies: Option<String>,
    #[serde(default = "default_true")]
    enabled: bool,
}

fn default_true() -> bool {
    true
}

pub struct SiteRegistry {
    pool: SqlitePool,
    crawlers: Arc<dyn CrawlerRepository>,
    site_configs: Arc<dyn SiteConfigRepository>,
    crawler_configs: Arc<dyn CrawlerConfigRepository>,
    credentials: Arc<dyn CrawlerCredentialRepository>,
    browser_states: Arc<dyn BrowserStateRepository>,
    seed_dir: PathBuf,
    credentials_path: PathBuf,
    sites: Mutex<HashMap<String, SiteSetup>>,
}

impl SiteRegistry {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: SqlitePool,
        crawlers: Arc<dyn CrawlerRepository>,
        site_configs: Arc<dyn SiteConfigRepository>,
        crawler_configs: Arc<dyn CrawlerConfigRepository>,
        credentials: Arc<dyn CrawlerCredentialRepository>,
        browser_states: Arc<dyn BrowserStateRepository>,
        seed_dir: PathBuf,
        credentials_path: PathBuf,
    ) -> Self {
        Self {
            pool,
            crawlers,
            site_configs,
            crawler_configs,
            credentials,
            browser_states,
            seed_dir,
            credentials_path,
            sites: Mutex::new(HashMap::new()),
        }
    }

    /// Load everything from the store, then adopt any seed on disk the
    /// store doesn't already know about.
    #[instrument(skip(self))]
    pub async fn initialize(&self) -> Result<()> {
        let mut loaded = self.load_from_store().await?;

        for (site_id, descriptor) in self.scan_seed_dir().await {
            if loaded.contains_key(&site_id) {
                continue;
            }
            info!(site_id = %site_id, "adopting site from filesystem seed");
            let credential = self.resolve_seed_credential(&site_id).await;
            let setup = self.persist_seed(&site_id, descriptor, credential).await?;
            loaded.insert(site_id, setup);
        }

        let mut sites = self.sites.lock().await;
        *sites = loaded;
        info!(count = sites.len(), "site registry initialized");
        Ok(())
    }

    async fn load_from_store(&self) -> Result<HashMap<String, SiteSetup>> {
        let crawlers = self.crawlers.find_all().await?;
        let mut site_configs: HashMap<String, SiteConfig> = self
            .site_configs
            .find_all()
            .await?
            .into_iter()
            .map(|c| (c.site_id.clone(), c))
            .collect();
        let mut crawler_configs: HashMap<String, CrawlerConfig> = self
            .crawler_configs
            .find_all()
            .await?
            .into_iter()
            .map(|c| (c.site_id.clone(), c))
            .collect();
        let mut creds: HashMap<String, CrawlerCredential> = self
            .credentials
            .find_all()
            .await?
            .into_iter()
            .map(|c| (c.site_id.clone(), c))
            .collect();
        let mut states: HashMap<String, crate::domain::entities::BrowserState> = self
            .browser_states
            .find_all()
            .await?
            .into_iter()
            .map(|s| (s.site_id.clone(), s))
            .collect();

        let mut result = HashMap::new();
        for crawler in crawlers {
            let site_id = crawler.site_id.clone();
            let credential = creds
                .remove(&site_id)
                .unwrap_or_else(|| CrawlerCredential::empty(&site_id));
            result.insert(
                site_id.clone(),
                SiteSetup {
                    crawler,
                    site_config: site_configs.remove(&site_id),
                    crawler_config: crawler_configs.remove(&site_id),
                    crawler_credential: credential,
                    browser_state: states.remove(&site_id),
                },
            );
        }
        Ok(result)
    }

    async fn scan_seed_dir(&self) -> HashMap<String, SeedDescriptor> {
        let mut found = HashMap::new();
        let Ok(mut entries) = fs::read_dir(&self.seed_dir).await else {
            return found;
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.is_dir() {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if stem.starts_with('_') {
                continue;
            }
            match fs::read_to_string(&path).await {
                Ok(content) => match serde_json::from_str::<SeedDescriptor>(&content) {
                    Ok(descriptor) => {
                        if descriptor.site_url.is_empty() {
                            warn!(site_id = stem, "seed rejected: missing site_url");
                            continue;
                        }
                        found.insert(stem.to_string(), descriptor);
                    }
                    Err(e) => warn!(site_id = stem, error = %e, "failed to parse seed descriptor"),
                },
                Err(e) => warn!(path = %path.display(), error = %e, "failed to read seed file"),
            }
        }
        found
    }

    /// Per-site record (if present and enabled) > global record (if
    /// enabled) > empty credential.
    async fn resolve_seed_credential(&self, site_id: &str) -> CrawlerCredential {
        let Ok(content) = fs::read_to_string(&self.credentials_path).await else {
            return CrawlerCredential::empty(site_id);
        };
        let Ok(all) = serde_json::from_str::<HashMap<String, CredentialRecord>>(&content) else {
            return CrawlerCredential::empty(site_id);
        };

        let chosen = all
            .get(site_id)
            .filter(|r| r.enabled)
            .or_else(|| all.get("global").filter(|r| r.enabled));

        match chosen {
            Some(record) => CrawlerCredential {
                site_id: site_id.to_string(),
                username: record.username.clone(),
                password: record.password.clone(),
                authorization: record.authorization.clone(),
                apikey: record.apikey.clone(),
                manual_cookies: record.manual_cookies.clone(),
                enabled: true,
            },
            None => CrawlerCredential::empty(site_id),
        }
    }

    async fn persist_seed(
        &self,
        site_id: &str,
        descriptor: SeedDescriptor,
        credential: CrawlerCredential,
    ) -> Result<SiteSetup> {
        let crawler = Crawler::new(site_id);
        self.crawlers
            .create(&crawler)
            .await
            .context("failed to persist seeded crawler row")?;

        let site_config = SiteConfig {
            site_id: site_id.to_string(),
            site_url: descriptor.site_url,
            login_config: descriptor.login_config,
            extract_rules: descriptor.extract_rules,
            checkin_config: descriptor.checkin_config,
        };
        self.site_configs.upsert(&site_config).await?;

        let crawler_config = CrawlerConfig::default_for(site_id);
        self.crawler_configs.upsert(&crawler_config).await?;

        if credential.enabled {
            self.credentials.upsert(&credential).await?;
        }

        Ok(SiteSetup {
            crawler,
            site_config: Some(site_config),
            crawler_config: Some(crawler_config),
            crawler_credential: credential,
            browser_state: None,
        })
    }

    pub async fn get_site_setup(&self, site_id: &str) -> Option<SiteSetup> {
        self.sites.lock().await.get(site_id).cloned()
    }

    pub async fn get_available_sites(&self) -> HashMap<String, SiteSetup> {
        self.sites.lock().await.clone()
    }

    /// Upserts every provided part inside one `sqlx::Transaction`; the
    /// in-memory map is updated only after the transaction commits, so a
    /// failure partway through never leaves a half-synthesized aggregate
    /// visible to other components.
    #[instrument(skip(self, update))]
    pub async fn update_site_setup(&self, site_id: &str, update: SiteSetupUpdate) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let existing = tx_find_crawler(&mut tx, site_id).await?;
        let crawler = match update.new_crawler {
            Some(c) => {
                if existing.is_some() {
                    tx_update_crawler(&mut tx, &c).await?;
                } else {
                    tx_create_crawler(&mut tx, &c).await?;
                }
                c
            }
            None => match existing {
                Some(c) => c,
                None => {
                    let synthesized = Crawler::new(site_id);
                    tx_create_crawler(&mut tx, &synthesized).await?;
                    synthesized
                }
            },
        };

        if let Some(ref site_config) = update.new_site_config {
            tx_upsert_site_config(&mut tx, site_config).await?;
        }
        if let Some(ref crawler_config) = update.new_crawler_config {
            tx_upsert_crawler_config(&mut tx, crawler_config).await?;
        }
        if let Some(ref credential) = update.new_crawler_credential {
            tx_upsert_credential(&mut tx, credential).await?;
        }
        if let Some(ref state) = update.new_browser_state {
            state
                .validate()
                .map_err(|e| anyhow::anyhow!("browser state for {site_id} is invalid: {e}"))?;
            tx_upsert_browser_state(&mut tx, state).await?;
        }

        tx.commit().await?;

        let mut sites = self.sites.lock().await;
        let entry = sites
            .entry(site_id.to_string())
            .or_insert_with(|| SiteSetup {
                crawler: crawler.clone(),
                site_config: None,
                crawler_config: None,
                crawler_credential: CrawlerCredential::empty(site_id),
                browser_state: None,
            });
        entry.crawler = crawler;
        if let Some(site_config) = update.new_site_config {
            entry.site_config = Some(site_config);
        }
        if let Some(crawler_config) = update.new_crawler_config {
            entry.crawler_config = Some(crawler_config);
        }
        if let Some(credential) = update.new_crawler_credential {
            entry.crawler_credential = credential;
        }
        if let Some(state) = update.new_browser_state {
            entry.browser_state = Some(state);
        }

        Ok(true)
    }

    pub async fn delete_site_setup(&self, site_id: &str) -> Result<bool> {
        if self.crawlers.find_by_id(site_id).await?.is_none() {
            return Ok(false);
        }
        self.crawlers.delete(site_id).await?;
        self.sites.lock().await.remove(site_id);
        Ok(true)
    }

    /// Re-read one site (or the whole registry) from the store, optionally
    /// re-scanning the filesystem seed for newly-added sites.
    pub async fn reload(&self, site_id: Option<&str>, from_local: bool) -> Result<()> {
        match site_id {
            Some(id) => {
                let refreshed = self.load_from_store().await?.remove(id);
                let mut sites = self.sites.lock().await;
                match refreshed {
                    Some(setup) => {
                        sites.insert(id.to_string(), setup);
                    }
                    None => {
                        sites.remove(id);
                    }
                }
            }
            None => {
                self.initialize().await?;
                return Ok(());
            }
        }

        if from_local {
            self.initialize().await?;
        }
        Ok(())
    }
}

/// Transaction-scoped counterparts of `SqliteCrawlerRepository`'s queries,
/// used only by `update_site_setup` so the crawler row and every other
/// part it touches commit atomically.
async fn tx_find_crawler(tx: &mut Transaction<'_, Sqlite>, site_id: &str) -> Result<Option<Crawler>> {
    let row = sqlx::query(
        "SELECT site_id, is_logged_in, last_login_time, total_tasks FROM crawler WHERE site_id = $1",
    )
    .bind(site_id)
    .fetch_optional(&mut **tx)
    .await?;

    row.as_ref()
        .map(|row| -> Result<Crawler> {
            let last_login_time: Option<String> = row.try_get("last_login_time")?;
            let last_login_time = last_login_time
                .map(|ts| {
                    chrono::DateTime::parse_from_rfc3339(&ts)
                        .map_err(|e| anyhow::anyhow!("failed to parse last_login_time: {e}"))
                        .map(|dt| dt.with_timezone(&chrono::Utc))
                })
                .transpose()?;

            Ok(Crawler {
                site_id: row.try_get("site_id")?,
                is_logged_in: row.try_get("is_logged_in")?,
                last_login_time,
                total_tasks: row.try_get("total_tasks")?,
            })
        })
        .transpose()
}

async fn tx_create_crawler(tx: &mut Transaction<'_, Sqlite>, crawler: &Crawler) -> Result<()> {
    sqlx::query(
        "INSERT INTO crawler (site_id, is_logged_in, last_login_time, total_tasks)
         VALUES ($1, $2, $3, $4)",
    )
    .bind(&crawler.site_id)
    .bind(crawler.is_logged_in)
    .bind(crawler.last_login_time.map(|dt| dt.to_rfc3339()))
    .bind(crawler.total_tasks)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn tx_update_crawler(tx: &mut Transaction<'_, Sqlite>, crawler: &Crawler) -> Result<()> {
    sqlx::query(
        "UPDATE crawler SET is_logged_in = $1, last_login_time = $2, total_tasks = $3
         WHERE site_id = $4",
    )
    .bind(crawler.is_logged_in)
    .bind(crawler.last_login_time.map(|dt| dt.to_rfc3339()))
    .bind(crawler.total_tasks)
    .bind(&crawler.site_id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn tx_upsert_site_config(tx: &mut Transaction<'_, Sqlite>, config: &SiteConfig) -> Result<()> {
    let login_config = serde_json::to_string(&config.login_config)?;
    let extract_rules = serde_json::to_string(&config.extract_rules)?;
    let checkin_config = serde_json::to_string(&config.checkin_config)?;

    sqlx::query(
        "INSERT INTO site_config (site_id, site_url, login_config, extract_rules, checkin_config)
         VALUES ($1, $2, $3, $4, $5)
         ON CONFLICT(site_id) DO UPDATE SET
            site_url = excluded.site_url,
            login_config = excluded.login_config,
            extract_rules = excluded.extract_rules,
            checkin_config = excluded.checkin_config",
    )
    .bind(&config.site_id)
    .bind(&config.site_url)
    .bind(login_config)
    .bind(extract_rules)
    .bind(checkin_config)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn tx_upsert_crawler_config(tx: &mut Transaction<'_, Sqlite>, config: &CrawlerConfig) -> Result<()> {
    sqlx::query(
        "INSERT INTO crawler_config
            (site_id, enabled, use_proxy, proxy_url, fresh_login, captcha_skip, headless, login_max_retry, timeout)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
         ON CONFLICT(site_id) DO UPDATE SET
            enabled = excluded.enabled,
            use_proxy = excluded.use_proxy,
            proxy_url = excluded.proxy_url,
            fresh_login = excluded.fresh_login,
            captcha_skip = excluded.captcha_skip,
            headless = excluded.headless,
            login_max_retry = excluded.login_max_retry,
            timeout = excluded.timeout",
    )
    .bind(&config.site_id)
    .bind(config.enabled)
    .bind(config.use_proxy)
    .bind(&config.proxy_url)
    .bind(config.fresh_login)
    .bind(config.captcha_skip)
    .bind(config.headless)
    .bind(i64::from(config.login_max_retry))
    .bind(config.timeout as i64)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn tx_upsert_credential(tx: &mut Transaction<'_, Sqlite>, credential: &CrawlerCredential) -> Result<()> {
    sqlx::query(
        "INSERT INTO crawler_credential
            (site_id, username, password, authorization, apikey, manual_cookies, enabled)
         VALUES ($1, $2, $3, $4, $5, $6, $7)
         ON CONFLICT(site_id) DO UPDATE SET
            username = excluded.username,
            password = excluded.password,
            authorization = excluded.authorization,
            apikey = excluded.apikey,
            manual_cookies = excluded.manual_cookies,
            enabled = excluded.enabled",
    )
    .bind(&credential.site_id)
    .bind(&credential.username)
    .bind(&credential.password)
    .bind(&credential.authorization)
    .bind(&credential.apikey)
    .bind(&credential.manual_cookies)
    .bind(credential.enabled)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn tx_upsert_browser_state(
    tx: &mut Transaction<'_, Sqlite>,
    state: &crate::domain::entities::BrowserState,
) -> Result<()> {
    let cookies = serde_json::to_string(&state.cookies)?;
    let local_storage = serde_json::to_string(&state.local_storage)?;
    let session_storage = serde_json::to_string(&state.session_storage)?;

    sqlx::query(
        "INSERT INTO browser_state (site_id, cookies, local_storage, session_storage, updated_at)
         VALUES ($1, $2, $3, $4, $5)
         ON CONFLICT(site_id) DO UPDATE SET
            cookies = excluded.cookies,
            local_storage = excluded.local_storage,
            session_storage = excluded.session_storage,
            updated_at = excluded.updated_at",
    )
    .bind(&state.site_id)
    .bind(cookies)
    .bind(local_storage)
    .bind(session_storage)
    .bind(state.updated_at.to_rfc3339())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::database_connection::DatabaseConnection;
    use crate::infrastructure::repositories::{
        SqliteBrowserStateRepository, SqliteCrawlerConfigRepository,
        SqliteCrawlerCredentialRepository, SqliteCrawlerRepository, SqliteSiteConfigRepository,
    };

    async fn build_registry(seed_dir: &Path, credentials_path: &Path) -> SiteRegistry {
        let db = DatabaseConnection::new("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();
        SiteRegistry::new(
            db.pool().clone(),
            Arc::new(SqliteCrawlerRepository::new(db.pool().clone())),
            Arc::new(SqliteSiteConfigRepository::new(db.pool().clone())),
            Arc::new(SqliteCrawlerConfigRepository::new(db.pool().clone())),
            Arc::new(SqliteCrawlerCredentialRepository::new(db.pool().clone())),
            Arc::new(SqliteBrowserStateRepository::new(db.pool().clone())),
            seed_dir.to_path_buf(),
            credentials_path.to_path_buf(),
        )
    }

    #[tokio::test]
    async fn initialize_adopts_filesystem_seed_with_global_credential() {
        let tmp = tempfile::tempdir().unwrap();
        let seed_dir = tmp.path().join("seeds");
        fs::create_dir_all(&seed_dir).await.unwrap();
        fs::write(
            seed_dir.join("site_a.json"),
            r#"{"site_url": "https://example.com"}"#,
        )
        .await
        .unwrap();

        let credentials_path = tmp.path().join("credentials.json");
        fs::write(
            &credentials_path,
            r#"{"global": {"username": "alice", "enabled": true}}"#,
        )
        .await
        .unwrap();

        let registry = build_registry(&seed_dir, &credentials_path).await;
        registry.initialize().await.unwrap();

        let setup = registry.get_site_setup("site_a").await.unwrap();
        assert_eq!(
            setup.site_config.unwrap().site_url,
            "https://example.com"
        );
        assert_eq!(setup.crawler_credential.username.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn seed_missing_site_url_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let seed_dir = tmp.path().join("seeds");
        fs::create_dir_all(&seed_dir).await.unwrap();
        fs::write(seed_dir.join("site_a.json"), r#"{"site_url": ""}"#)
            .await
            .unwrap();

        let registry = build_registry(&seed_dir, &tmp.path().join("credentials.json")).await;
        registry.initialize().await.unwrap();

        assert!(registry.get_site_setup("site_a").await.is_none());
    }

    #[tokio::test]
    async fn update_site_setup_synthesizes_missing_crawler() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = build_registry(
            &tmp.path().join("seeds"),
            &tmp.path().join("credentials.json"),
        )
        .await;
        registry.initialize().await.unwrap();

        let ok = registry
            .update_site_setup(
                "site_b",
                SiteSetupUpdate {
                    new_crawler_config: Some(CrawlerConfig::default_for("site_b")),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(ok);

        let setup = registry.get_site_setup("site_b").await.unwrap();
        assert!(!setup.crawler.is_logged_in);
        assert!(setup.is_enabled());
    }

    #[tokio::test]
    async fn delete_site_setup_removes_from_memory() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = build_registry(
            &tmp.path().join("seeds"),
            &tmp.path().join("credentials.json"),
        )
        .await;
        registry
            .update_site_setup("site_c", SiteSetupUpdate::default())
            .await
            .unwrap();

        assert!(registry.delete_site_setup("site_c").await.unwrap());
        assert!(registry.get_site_setup("site_c").await.is_none());
    }
}
