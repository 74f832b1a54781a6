use std::path::PathBuf;
use thiserror::Error;

/// Failures raised by the browser-automation capability.
#[derive(Error, Debug)]
pub enum AutomationError {
    #[error("WebDriver transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("WebDriver error '{error}': {message}")]
    WebDriver { error: String, message: String },

    #[error("Unexpected WebDriver response: {0}")]
    Protocol(String),
}

#[derive(Error, Debug)]
pub enum AuthenticationError {
    #[error("No credentials configured (set MQL_USERNAME and MQL_PASSWORD)")]
    MissingCredentials,

    #[error("Login form not found within {timeout_secs}s")]
    FormNotFound { timeout_secs: u64 },

    #[error("Post-login navigation not observed within {timeout_secs}s (credentials rejected?)")]
    MarkerTimeout { timeout_secs: u64 },

    #[error("Login produced an empty session token")]
    EmptyToken,

    #[error("Browser automation failed: {0}")]
    Automation(#[from] AutomationError),
}

/// Failures of the plain HTTP page transport.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected HTTP status {status}")]
    Status { status: u16 },
}

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Page fetch failed: {0}")]
    Transport(#[from] TransportError),

    #[error("Session still expired after re-login")]
    SessionExpired,

    #[error(transparent)]
    Authentication(#[from] AuthenticationError),
}

impl FetchError {
    /// Authentication failures stop monitoring; everything else ends the
    /// current cycle only.
    pub fn is_fatal(&self) -> bool {
        matches!(self, FetchError::Authentication(_))
    }
}

#[derive(Error, Debug)]
pub enum WriteError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl WriteError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        WriteError::Io {
            path: path.into(),
            source,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("No check minutes configured")]
    NoCheckMinutes,

    #[error("Check minute {0} out of range (0-59)")]
    InvalidMinute(u32),

    #[error("Check offset {0}s out of range (0-59)")]
    InvalidOffset(u32),

    #[error("Unknown time zone '{0}'")]
    InvalidTimeZone(String),
}

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Authentication failed, monitoring stopped: {0}")]
    Authentication(#[from] AuthenticationError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}
