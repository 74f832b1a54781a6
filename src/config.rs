use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

pub const DEFAULT_BASE_URL: &str = "https://www.mql5.com/en/signals";
pub const DEFAULT_LOGIN_URL: &str = "https://www.mql5.com/en/auth_login";
pub const DEFAULT_SIGNAL_ID: &str = "201845";
pub const DEFAULT_EXPIRY_MARKER: &str = "To see trades in realtime, please log in";
pub const DEFAULT_CHECK_MINUTES: [u32; 4] = [14, 29, 44, 59];

#[derive(Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.username.trim().is_empty() && !self.password.is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Login page selectors and targets handed to the browser.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginTarget {
    pub url: String,
    pub username_selector: String,
    pub password_selector: String,
    pub submit_selector: String,
}

impl Default for LoginTarget {
    fn default() -> Self {
        Self {
            url: DEFAULT_LOGIN_URL.to_string(),
            username_selector: "#Login".to_string(),
            password_selector: "#Password".to_string(),
            submit_selector: "#loginSubmit".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Provider
    pub signal_id: String,
    pub base_url: String,
    pub expiry_marker: String,

    // Login
    pub credentials: Credentials,
    pub login: LoginTarget,
    pub login_timeout_secs: u64,
    pub webdriver_url: String,
    pub browser_headless: bool,

    // Output
    pub signal_dir: PathBuf,
    pub archive_dir: PathBuf,
    pub history_cap: usize,

    // Schedule
    pub check_minutes: Vec<u32>,
    pub check_offset_secs: u32,
    pub check_interval_mins: u64,
    pub timezone: String,

    // Burst polling
    pub poll_interval_secs: u64,
    pub poll_timeout_secs: u64,

    pub shutdown_grace_secs: u64,

    // Logging
    pub log_level: String,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let env = |key: &str, default: &str| -> String {
            std::env::var(key).unwrap_or_else(|_| default.to_string())
        };

        let data_dir = PathBuf::from(env("DATA_DIR", "data"));
        let signal_dir = std::env::var("SIGNAL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("signals"));
        let archive_dir = std::env::var("ARCHIVE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("pages"));

        let signal_id = env("SIGNAL_ID", DEFAULT_SIGNAL_ID).trim().to_string();

        Config {
            signal_id: if signal_id.is_empty() {
                DEFAULT_SIGNAL_ID.to_string()
            } else {
                signal_id
            },
            base_url: env("BASE_URL", DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            expiry_marker: env("EXPIRY_MARKER", DEFAULT_EXPIRY_MARKER),
            credentials: Credentials::new(env("MQL_USERNAME", ""), env("MQL_PASSWORD", "")),
            login: LoginTarget {
                url: env("LOGIN_URL", DEFAULT_LOGIN_URL),
                ..LoginTarget::default()
            },
            login_timeout_secs: env("LOGIN_TIMEOUT_SECS", "30").parse().unwrap_or(30),
            webdriver_url: env("WEBDRIVER_URL", "http://localhost:9515"),
            browser_headless: env("BROWSER_HEADLESS", "true").to_lowercase() == "true",
            signal_dir,
            archive_dir,
            history_cap: env("HISTORY_CAP", "100").parse().unwrap_or(100),
            check_minutes: parse_minutes(&env("CHECK_MINUTES", "")),
            check_offset_secs: env("CHECK_OFFSET_SECS", "1").parse().unwrap_or(1),
            check_interval_mins: env("CHECK_INTERVAL_MINS", "15").parse().unwrap_or(15),
            timezone: env("TIMEZONE", "UTC"),
            poll_interval_secs: env("POLL_INTERVAL_SECS", "2").parse().unwrap_or(2),
            poll_timeout_secs: env("POLL_TIMEOUT_SECS", "60").parse().unwrap_or(60),
            shutdown_grace_secs: env("SHUTDOWN_GRACE_SECS", "60").parse().unwrap_or(60),
            log_level: env("LOG_LEVEL", "info"),
        }
    }

    pub fn signal_url(&self) -> String {
        format!("{}/{}", self.base_url, self.signal_id)
    }

    pub fn signal_file(&self) -> PathBuf {
        self.signal_dir.join("signal.txt")
    }

    pub fn history_dir(&self) -> PathBuf {
        self.signal_dir.join("history")
    }

    pub fn trade_log_file(&self) -> PathBuf {
        self.signal_dir.join("trades_log.txt")
    }

    pub fn provider_archive_dir(&self) -> PathBuf {
        self.archive_dir.join(&self.signal_id)
    }

    pub fn tz(&self) -> Result<Tz, ConfigError> {
        self.timezone
            .parse::<Tz>()
            .map_err(|_| ConfigError::InvalidTimeZone(self.timezone.clone()))
    }

    pub fn login_timeout(&self) -> Duration {
        Duration::from_secs(self.login_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// Parses a comma separated minute list, falling back to the default grid
/// when nothing usable is given. Range checks happen in the aligner.
fn parse_minutes(raw: &str) -> Vec<u32> {
    let minutes: Vec<u32> = raw
        .split(',')
        .filter_map(|m| m.trim().parse().ok())
        .collect();
    if minutes.is_empty() {
        DEFAULT_CHECK_MINUTES.to_vec()
    } else {
        minutes
    }
}
