//! Domain entities
//!
//! Plain data describing the fleet: sites, their runtime configuration,
//! the tasks scheduled against them, and the results those tasks produce.
//! These types carry no store-specific concerns (row mapping lives in
//! `infrastructure::repositories`); JSON-embedded subfields are modeled as
//! real Rust types here, not opaque strings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A task's position in its lifecycle. Transitions move strictly toward
/// one of the three terminal states; nothing moves out of a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskStatus {
    Ready,
    Pending,
    Running,
    Success,
    Failed,
    Cancelled,
}

impl TaskStatus {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Cancelled)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ready => "READY",
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }

    #[must_use]
    pub fn from_str(value: &str) -> Option<Self> {
        Some(match value {
            "READY" => Self::Ready,
            "PENDING" => Self::Pending,
            "RUNNING" => Self::Running,
            "SUCCESS" => Self::Success,
            "FAILED" => Self::Failed,
            "CANCELLED" => Self::Cancelled,
            _ => return None,
        })
    }
}

/// One scheduled execution of the scraper for one site.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub site_id: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub msg: Option<String>,
    pub error_details: Option<serde_json::Value>,
    pub task_metadata: HashMap<String, serde_json::Value>,
    pub system_info: serde_json::Value,
}

/// Fields accepted when admitting a new task; `task_id` is generated by
/// the queue manager, never supplied by the caller.
#[derive(Debug, Clone)]
pub struct TaskCreate {
    pub site_id: String,
    pub task_metadata: HashMap<String, serde_json::Value>,
}

/// One-to-one with a successful task: the user/quota statistics a scrape
/// extracted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlResult {
    pub task_id: String,
    pub site_id: String,
    pub username: Option<String>,
    pub user_class: Option<String>,
    pub uid: Option<String>,
    pub join_time: Option<DateTime<Utc>>,
    pub last_active: Option<DateTime<Utc>>,
    pub upload: f64,
    pub download: f64,
    pub ratio: f64,
    pub bonus: Option<f64>,
    pub seeding_score: Option<f64>,
    pub hr_count: Option<i64>,
    pub bonus_per_hour: Option<f64>,
    pub seeding_size: Option<f64>,
    pub seeding_count: Option<i64>,
}

/// The sentinel ratio used whenever `download == 0`, matching the
/// convention that an unmeasurable ratio reads as "effectively infinite"
/// rather than a division error.
pub const RATIO_SENTINEL: f64 = 999_999.0;

/// Derives the exposed ratio from raw upload/download counters.
#[must_use]
pub fn derive_ratio(upload: f64, download: f64) -> f64 {
    if download == 0.0 {
        RATIO_SENTINEL
    } else {
        upload / download
    }
}

#[derive(Debug, Clone)]
pub struct CrawlResultCreate {
    pub task_id: String,
    pub site_id: String,
    pub username: Option<String>,
    pub user_class: Option<String>,
    pub uid: Option<String>,
    pub join_time: Option<DateTime<Utc>>,
    pub last_active: Option<DateTime<Utc>>,
    pub upload: f64,
    pub download: f64,
    pub bonus: Option<f64>,
    pub seeding_score: Option<f64>,
    pub hr_count: Option<i64>,
    pub bonus_per_hour: Option<f64>,
    pub seeding_size: Option<f64>,
    pub seeding_count: Option<i64>,
}

/// Outcome of a daily check-in attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckInOutcome {
    Success,
    Already,
    Failed,
    NotSet,
}

impl CheckInOutcome {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Already => "already",
            Self::Failed => "failed",
            Self::NotSet => "not_set",
        }
    }

    #[must_use]
    pub fn from_str(value: &str) -> Option<Self> {
        Some(match value {
            "success" => Self::Success,
            "already" => Self::Already,
            "failed" => Self::Failed,
            "not_set" => Self::NotSet,
            _ => return None,
        })
    }

    /// Whether this outcome counts toward "the site was checked in today".
    /// Both a fresh success and a "the site already considered itself
    /// checked in" response count; only the out-of-core statistics
    /// collaborator acts on this, the core's own scheduling never does.
    #[must_use]
    pub const fn counts_as_done(self) -> bool {
        matches!(self, Self::Success | Self::Already)
    }
}

/// An append-only record of one check-in attempt for a site on a given day.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckInResult {
    pub task_id: String,
    pub site_id: String,
    pub result: CheckInOutcome,
    pub checkin_date: DateTime<Utc>,
    pub last_run_at: DateTime<Utc>,
}

/// Per-site aggregate root. Owns `SiteConfig`, `CrawlerConfig`,
/// `CrawlerCredential`, and `BrowserState` by `site_id`; deleting this row
/// cascades to all four.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Crawler {
    pub site_id: String,
    pub is_logged_in: bool,
    pub last_login_time: Option<DateTime<Utc>>,
    pub total_tasks: i64,
}

impl Crawler {
    #[must_use]
    pub fn new(site_id: impl Into<String>) -> Self {
        Self {
            site_id: site_id.into(),
            is_logged_in: false,
            last_login_time: None,
            total_tasks: 0,
        }
    }
}

/// A single login-form field descriptor, part of a `SiteConfig`'s
/// `login_config`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LoginConfig {
    pub login_url: Option<String>,
    pub username_field: Option<String>,
    pub password_field: Option<String>,
    pub submit_selector: Option<String>,
}

/// A set of extraction rules: a field name mapped to a selector expression.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ExtractRules {
    #[serde(flatten)]
    pub fields: HashMap<String, String>,
}

/// Descriptor for a site's daily check-in action.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CheckinConfig {
    pub checkin_url: Option<String>,
    pub success_selector: Option<String>,
    pub already_selector: Option<String>,
}

/// How to scrape a site. JSON-embedded subfields are parsed into these
/// typed structs at the store boundary, never kept as opaque strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    pub site_id: String,
    pub site_url: String,
    pub login_config: LoginConfig,
    pub extract_rules: ExtractRules,
    pub checkin_config: CheckinConfig,
}

/// Runtime knobs controlling how a site is crawled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlerConfig {
    pub site_id: String,
    pub enabled: bool,
    pub use_proxy: bool,
    pub proxy_url: Option<String>,
    pub fresh_login: bool,
    pub captcha_skip: bool,
    pub headless: bool,
    pub login_max_retry: u32,
    pub timeout: u64,
}

impl CrawlerConfig {
    #[must_use]
    pub fn default_for(site_id: impl Into<String>) -> Self {
        Self {
            site_id: site_id.into(),
            enabled: true,
            use_proxy: false,
            proxy_url: None,
            fresh_login: false,
            captcha_skip: false,
            headless: true,
            login_max_retry: 3,
            timeout: 240,
        }
    }
}

/// Per-site authentication material.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlerCredential {
    pub site_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub authorization: Option<String>,
    pub apikey: Option<String>,
    pub manual_cookies: Option<String>,
    pub enabled: bool,
}

impl CrawlerCredential {
    #[must_use]
    pub fn empty(site_id: impl Into<String>) -> Self {
        Self {
            site_id: site_id.into(),
            username: None,
            password: None,
            authorization: None,
            apikey: None,
            manual_cookies: None,
            enabled: false,
        }
    }
}

/// Attributes of a single stored cookie.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CookieAttrs {
    pub value: String,
    pub domain: String,
    pub path: String,
}

/// Cookies and web storage captured from a prior login, reused to avoid
/// repeating authentication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserState {
    pub site_id: String,
    pub cookies: HashMap<String, CookieAttrs>,
    pub local_storage: HashMap<String, String>,
    pub session_storage: HashMap<String, String>,
    pub updated_at: DateTime<Utc>,
}

impl BrowserState {
    /// Structural validation used before a save and again on every read:
    /// every cookie must carry a non-empty value, domain, and path.
    pub fn validate(&self) -> Result<(), String> {
        for (name, attrs) in &self.cookies {
            if attrs.value.is_empty() {
                return Err(format!("cookie '{name}' is missing a value"));
            }
            if attrs.domain.is_empty() {
                return Err(format!("cookie '{name}' is missing a domain"));
            }
            if attrs.path.is_empty() {
                return Err(format!("cookie '{name}' is missing a path"));
            }
        }
        Ok(())
    }
}

/// Composite of a site's five owned entities, always keyed by `site_id`.
/// Assembled on read; never persisted as a single row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteSetup {
    pub crawler: Crawler,
    pub site_config: Option<SiteConfig>,
    pub crawler_config: Option<CrawlerConfig>,
    pub crawler_credential: CrawlerCredential,
    pub browser_state: Option<BrowserState>,
}

impl SiteSetup {
    #[must_use]
    pub fn site_id(&self) -> &str {
        &self.crawler.site_id
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.crawler_config
            .as_ref()
            .map(|c| c.enabled)
            .unwrap_or(false)
    }
}

/// Parts of a `SiteSetup` that may be independently upserted by
/// `update_site_setup`.
#[derive(Debug, Clone, Default)]
pub struct SiteSetupUpdate {
    pub new_crawler: Option<Crawler>,
    pub new_site_config: Option<SiteConfig>,
    pub new_crawler_config: Option<CrawlerConfig>,
    pub new_crawler_credential: Option<CrawlerCredential>,
    pub new_browser_state: Option<BrowserState>,
}

/// The single settings row. Concurrency/timeout/retry knobs feed C5/C6
/// directly; the rest is read by the filesystem-seed and Chrome-provisioning
/// paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub crawler_max_concurrency: u32,
    pub login_max_retry: u32,
    pub task_timeout: u64,
    pub storage_path: String,
    pub crawler_config_path: String,
    pub crawler_credential_path: String,
    pub headless: bool,
    pub fresh_login: bool,
    pub captcha_default_method: String,
    pub captcha_skip_sites: Vec<String>,
    pub checkin_sites: Vec<String>,
    pub enable_checkin: bool,
    pub chrome_path: Option<String>,
    pub log_level: String,
    pub log_to_file: bool,
    pub log_json: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            crawler_max_concurrency: 8,
            login_max_retry: 3,
            task_timeout: 240,
            storage_path: "storage".to_string(),
            crawler_config_path: "services/sites/implementations".to_string(),
            crawler_credential_path: "services/sites/credentials/credentials.json".to_string(),
            headless: true,
            fresh_login: false,
            captcha_default_method: "none".to_string(),
            captcha_skip_sites: Vec::new(),
            checkin_sites: Vec::new(),
            enable_checkin: false,
            chrome_path: None,
            log_level: "info".to_string(),
            log_to_file: true,
            log_json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ratio_sentinel_on_zero_download() {
        assert_eq!(derive_ratio(12.0, 0.0), RATIO_SENTINEL);
    }

    #[test]
    fn ratio_normal_division() {
        assert!((derive_ratio(10.0, 4.0) - 2.5).abs() < f64::EPSILON);
    }

    #[test]
    fn task_status_round_trips_through_str() {
        for status in [
            TaskStatus::Ready,
            TaskStatus::Pending,
            TaskStatus::Running,
            TaskStatus::Success,
            TaskStatus::Failed,
            TaskStatus::Cancelled,
        ] {
            assert_eq!(TaskStatus::from_str(status.as_str()), Some(status));
        }
    }

    #[test]
    fn terminal_states_are_exactly_three() {
        let terminal: Vec<_> = [
            TaskStatus::Ready,
            TaskStatus::Pending,
            TaskStatus::Running,
            TaskStatus::Success,
            TaskStatus::Failed,
            TaskStatus::Cancelled,
        ]
        .into_iter()
        .filter(|s| s.is_terminal())
        .collect();
        assert_eq!(
            terminal,
            vec![TaskStatus::Success, TaskStatus::Failed, TaskStatus::Cancelled]
        );
    }

    #[test]
    fn checkin_outcome_counts_as_done() {
        assert!(CheckInOutcome::Success.counts_as_done());
        assert!(CheckInOutcome::Already.counts_as_done());
        assert!(!CheckInOutcome::Failed.counts_as_done());
        assert!(!CheckInOutcome::NotSet.counts_as_done());
    }

    #[test]
    fn browser_state_rejects_cookie_without_value() {
        let mut cookies = HashMap::new();
        cookies.insert(
            "sid".to_string(),
            CookieAttrs {
                value: String::new(),
                domain: "example.com".to_string(),
                path: "/".to_string(),
            },
        );
        let state = BrowserState {
            site_id: "example".to_string(),
            cookies,
            local_storage: HashMap::new(),
            session_storage: HashMap::new(),
            updated_at: Utc::now(),
        };
        assert!(state.validate().is_err());
    }
}
