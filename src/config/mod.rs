use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    pub browser: BrowserConfig,
    pub database: DatabaseConfig,
    pub gate: GateConfig,
    pub scheduler: SchedulerConfig,
    pub pipeline: PipelineConfig,
    pub notifier: NotifierConfig,
}

/// Browser launch and wait bounds
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BrowserConfig {
    /// Chromium/Chrome binary. Empty means "let the driver find one".
    #[serde(default)]
    pub executable: PathBuf,

    #[serde(default = "default_true")]
    pub headless: bool,

    #[serde(default = "default_nav_timeout_secs")]
    pub nav_timeout_secs: u64,

    /// Bounded wait for a selector to render.
    #[serde(default = "default_element_timeout_secs")]
    pub element_timeout_secs: u64,

    #[serde(default = "default_launch_timeout_secs")]
    pub launch_timeout_secs: u64,
}

/// Destination store credentials (host/user/password/database roles)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_host")]
    pub host: String,

    #[serde(default = "default_db_port")]
    pub port: u16,

    #[serde(default = "default_db_user")]
    pub user: String,

    #[serde(default)]
    pub password: String,

    #[serde(default = "default_db_name")]
    pub database: String,
}

/// Market-state gate: status page plus the two retry shapes around it
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GateConfig {
    #[serde(default = "default_status_url")]
    pub status_url: String,

    /// Substring that marks an open market in the status element text.
    #[serde(default = "default_live_marker")]
    pub live_marker: String,

    /// Probe retries within one gate check.
    #[serde(default = "default_probe_policy")]
    pub probe: RetryPolicy,

    /// Outer wait-for-open loop used by gate-aware jobs.
    #[serde(default = "default_wait_policy")]
    pub wait: RetryPolicy,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,

    /// Cool-down after a faulted tick before scheduling resumes.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    /// Concurrent per-symbol workers for the dividend fan-out.
    #[serde(default = "default_dividend_workers")]
    pub dividend_workers: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NotifierConfig {
    #[serde(default = "default_notify_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// One bounded fixed-interval retry shape, shared by every retry site.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay_secs: u64,
}

impl RetryPolicy {
    pub fn new(attempts: u32, delay_secs: u64) -> Self {
        Self {
            attempts,
            delay_secs,
        }
    }

    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.delay_secs)
    }
}

// ── Defaults ─────────────────────────────────────────────────────────────────

fn default_true() -> bool {
    true
}
fn default_nav_timeout_secs() -> u64 {
    90
}
fn default_element_timeout_secs() -> u64 {
    60
}
fn default_launch_timeout_secs() -> u64 {
    20
}
fn default_db_host() -> String {
    "127.0.0.1".to_string()
}
fn default_db_port() -> u16 {
    3306
}
fn default_db_user() -> String {
    "nepse".to_string()
}
fn default_db_name() -> String {
    "nepse".to_string()
}
fn default_status_url() -> String {
    "https://www.nepalstock.com.np/".to_string()
}
fn default_live_marker() -> String {
    "live market".to_string()
}
fn default_probe_policy() -> RetryPolicy {
    RetryPolicy::new(3, 5)
}
fn default_wait_policy() -> RetryPolicy {
    RetryPolicy::new(10, 30)
}
fn default_tick_secs() -> u64 {
    10
}
fn default_cooldown_secs() -> u64 {
    60
}
fn default_dividend_workers() -> usize {
    6
}
fn default_notify_endpoint() -> String {
    "https://hamrolagani.com/api/announcement/schedule-notification".to_string()
}

// ── Loader ───────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from file + environment overrides
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let cfg = config::Config::builder()
            .add_source(
                config::File::with_name("config/default")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::File::with_name("config/local")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(config::Environment::with_prefix("NEPSE").separator("__"))
            .build()?;

        let app_cfg: AppConfig = cfg.try_deserialize().unwrap_or_else(|_| AppConfig::default());
        Ok(app_cfg)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            browser: BrowserConfig {
                executable: PathBuf::new(),
                headless: true,
                nav_timeout_secs: default_nav_timeout_secs(),
                element_timeout_secs: default_element_timeout_secs(),
                launch_timeout_secs: default_launch_timeout_secs(),
            },
            database: DatabaseConfig {
                host: default_db_host(),
                port: default_db_port(),
                user: default_db_user(),
                password: String::new(),
                database: default_db_name(),
            },
            gate: GateConfig {
                status_url: default_status_url(),
                live_marker: default_live_marker(),
                probe: default_probe_policy(),
                wait: default_wait_policy(),
            },
            scheduler: SchedulerConfig {
                tick_secs: default_tick_secs(),
                cooldown_secs: default_cooldown_secs(),
            },
            pipeline: PipelineConfig {
                dividend_workers: default_dividend_workers(),
            },
            notifier: NotifierConfig {
                endpoint: default_notify_endpoint(),
                enabled: true,
            },
        }
    }
}
