use chrono::Utc;
use chrono_tz::Tz;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::config::Config;
use crate::error::WriteError;
use crate::models::{Label, TradeRecord};

/// Append-only audit trail of every trade the monitor has seen, one
/// timestamped line per trade. Never rotated or truncated.
#[derive(Debug, Clone)]
pub struct TradeLog {
    path: PathBuf,
    tz: Tz,
}

impl TradeLog {
    pub fn new(path: impl Into<PathBuf>, tz: Tz) -> Self {
        Self {
            path: path.into(),
            tz,
        }
    }

    pub fn from_config(cfg: &Config, tz: Tz) -> Self {
        Self::new(cfg.trade_log_file(), tz)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one line per record and returns how many were written.
    pub fn append(&self, records: &[TradeRecord]) -> Result<usize, WriteError> {
        if records.is_empty() {
            return Ok(0);
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| WriteError::io(parent, e))?;
        }

        let stamp = Utc::now()
            .with_timezone(&self.tz)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string();
        let entries: String = records.iter().map(|r| entry(&stamp, r)).collect();

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| WriteError::io(&self.path, e))?;
        file.write_all(entries.as_bytes())
            .map_err(|e| WriteError::io(&self.path, e))?;

        debug!("Logged {} trades to {}", records.len(), self.path.display());
        Ok(records.len())
    }
}

/// `[yyyy-MM-dd HH:mm:ss] Typ: <type>, S/L: <sl>, T/P: <tp>`
fn entry(stamp: &str, record: &TradeRecord) -> String {
    format!(
        "[{}] Typ: {}, S/L: {}, T/P: {}\n",
        stamp,
        record.trade_type(),
        record.get(Label::StopLoss).unwrap_or_default(),
        record.get(Label::TakeProfit).unwrap_or_default()
    )
}
