use chrono_tz::Tz;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::WriteError;
use crate::models::TradeRecord;
use crate::output::file_stamp;

pub const FIELD_DELIMITER: char = ',';

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// No records; the current file was left as it was.
    Skipped,
    Written {
        path: PathBuf,
        lines: usize,
        rotated: Option<PathBuf>,
        pruned: usize,
    },
}

/// Publishes trade records as the signal file read by the trading client.
///
/// The new content goes to a temp file first. Only then is the previous
/// file moved into the capped history directory and the temp file renamed
/// into place, so a failed write leaves the previous file current.
#[derive(Debug, Clone)]
pub struct SignalWriter {
    signal_file: PathBuf,
    history_dir: PathBuf,
    history_cap: usize,
    tz: Tz,
}

impl SignalWriter {
    pub fn new(
        signal_file: impl Into<PathBuf>,
        history_dir: impl Into<PathBuf>,
        history_cap: usize,
        tz: Tz,
    ) -> Self {
        Self {
            signal_file: signal_file.into(),
            history_dir: history_dir.into(),
            history_cap,
            tz,
        }
    }

    pub fn from_config(cfg: &Config, tz: Tz) -> Self {
        Self::new(cfg.signal_file(), cfg.history_dir(), cfg.history_cap, tz)
    }

    pub fn signal_file(&self) -> &Path {
        &self.signal_file
    }

    pub fn history_dir(&self) -> &Path {
        &self.history_dir
    }

    pub fn write(&self, records: &[TradeRecord]) -> Result<WriteOutcome, WriteError> {
        if records.is_empty() {
            debug!("No records, leaving {} untouched", self.signal_file.display());
            return Ok(WriteOutcome::Skipped);
        }

        if let Some(parent) = self.signal_file.parent() {
            fs::create_dir_all(parent).map_err(|e| WriteError::io(parent, e))?;
        }
        // the current file is only moved once its replacement exists
        let tmp = self.signal_file.with_extension("txt.tmp");
        fs::write(&tmp, render(records)).map_err(|e| WriteError::io(&tmp, e))?;

        let rotated = match self.rotate() {
            Ok(rotated) => rotated,
            Err(e) => {
                let _ = fs::remove_file(&tmp);
                return Err(e);
            }
        };
        if let Err(e) = fs::rename(&tmp, &self.signal_file) {
            if let Some(previous) = &rotated {
                let _ = fs::rename(previous, &self.signal_file);
            }
            let _ = fs::remove_file(&tmp);
            return Err(WriteError::io(&self.signal_file, e));
        }

        let pruned = match self.prune() {
            Ok(n) => n,
            Err(e) => {
                warn!("Could not prune signal history: {}", e);
                0
            }
        };

        info!(
            "Signal file written: {} ({} trades)",
            self.signal_file.display(),
            records.len()
        );
        Ok(WriteOutcome::Written {
            path: self.signal_file.clone(),
            lines: records.len(),
            rotated,
            pruned,
        })
    }

    /// Moves the current signal file into history, if there is one.
    fn rotate(&self) -> Result<Option<PathBuf>, WriteError> {
        if !self.signal_file.exists() {
            return Ok(None);
        }
        fs::create_dir_all(&self.history_dir).map_err(|e| WriteError::io(&self.history_dir, e))?;

        let target = self.next_history_path(&file_stamp(&self.tz));
        fs::rename(&self.signal_file, &target).map_err(|e| WriteError::io(&self.signal_file, e))?;
        debug!("Previous signal moved to {}", target.display());
        Ok(Some(target))
    }

    /// Deletes the oldest history files until at most `history_cap` remain.
    fn prune(&self) -> Result<usize, WriteError> {
        let entries = match fs::read_dir(&self.history_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(WriteError::io(&self.history_dir, e)),
        };

        let mut files: Vec<(SystemTime, (String, u32), PathBuf)> = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| WriteError::io(&self.history_dir, e))?;
            let meta = entry
                .metadata()
                .map_err(|e| WriteError::io(entry.path(), e))?;
            if meta.is_file() {
                let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
                let path = entry.path();
                files.push((modified, history_order(&path), path));
            }
        }

        if files.len() <= self.history_cap {
            return Ok(0);
        }

        // Oldest first; mtimes are coarse, so the rotation stamp breaks ties
        files.sort();
        let excess = files.len() - self.history_cap;
        for (_, _, path) in files.iter().take(excess) {
            fs::remove_file(path).map_err(|e| WriteError::io(path, e))?;
            debug!("Pruned history file {}", path.display());
        }
        Ok(excess)
    }

    /// `signal_<stamp>.txt`, or the next free `_N` suffix when rotations
    /// share a second. Suffixes only grow so pruning order stays stable.
    fn next_history_path(&self, stamp: &str) -> PathBuf {
        let base = format!("signal_{}", stamp);
        let highest = fs::read_dir(&self.history_dir).ok().and_then(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter_map(|e| rotation_suffix(&e.file_name().to_string_lossy(), &base))
                .max()
        });
        match highest {
            None => self.history_dir.join(format!("{}.txt", base)),
            Some(n) => self.history_dir.join(format!("{}_{}.txt", base, n + 1)),
        }
    }
}

/// Suffix of a rotated file named after `base`: 0 for `base.txt`, N for
/// `base_N.txt`.
fn rotation_suffix(name: &str, base: &str) -> Option<u32> {
    let rest = name.strip_prefix(base)?.strip_suffix(".txt")?;
    if rest.is_empty() {
        return Some(0);
    }
    rest.strip_prefix('_')?.parse().ok()
}

/// Chronological sort key of a history file: (stamp, suffix).
fn history_order(path: &Path) -> (String, u32) {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let Some(rest) = name.strip_prefix("signal_").and_then(|r| r.strip_suffix(".txt")) else {
        return (name.clone(), 0);
    };
    // yyyyMMdd_HHmmss is 15 characters
    match rest.get(..15) {
        Some(stamp) => {
            let suffix = rest[15..]
                .strip_prefix('_')
                .and_then(|n| n.parse().ok())
                .unwrap_or(0);
            (stamp.to_string(), suffix)
        }
        None => (rest.to_string(), 0),
    }
}

/// One line per record, canonical field order, `\n` terminated.
pub fn render(records: &[TradeRecord]) -> String {
    records
        .iter()
        .map(|r| format!("{}\n", r.to_line(FIELD_DELIMITER)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Label, TradeType};

    fn record(symbol: &str, trade_type: TradeType) -> TradeRecord {
        TradeRecord::new(
            trade_type,
            vec![
                (Label::Symbol, symbol.to_string()),
                (Label::Time, "2024.03.12 10:14".to_string()),
                (Label::Volume, "0.10".to_string()),
                (Label::Price, "1.0912".to_string()),
                (Label::StopLoss, "1.0880".to_string()),
                (Label::TakeProfit, "1.0960".to_string()),
            ],
        )
    }

    fn writer(root: &Path, cap: usize) -> SignalWriter {
        SignalWriter::new(
            root.join("signal.txt"),
            root.join("history"),
            cap,
            chrono_tz::UTC,
        )
    }

    fn history_count(w: &SignalWriter) -> usize {
        fs::read_dir(w.history_dir()).map(|d| d.count()).unwrap_or(0)
    }

    #[test]
    fn writes_one_line_per_record() {
        let tmp = tempfile::tempdir().unwrap();
        let w = writer(tmp.path(), 100);
        let records = vec![record("EURUSD", TradeType::Buy), record("GBPUSD", TradeType::SellStop)];

        let outcome = w.write(&records).unwrap();

        let content = fs::read_to_string(w.signal_file()).unwrap();
        assert_eq!(
            content,
            "EURUSD,2024.03.12 10:14,Buy,0.10,1.0912,1.0880,1.0960\n\
             GBPUSD,2024.03.12 10:14,Sell Stop,0.10,1.0912,1.0880,1.0960\n"
        );
        assert_eq!(content.lines().count(), records.len());
        assert!(content.lines().all(|l| l.split(',').count() == 7));
        assert!(matches!(
            outcome,
            WriteOutcome::Written { lines: 2, rotated: None, pruned: 0, .. }
        ));
        assert!(!w.signal_file().with_extension("txt.tmp").exists());
    }

    #[test]
    fn previous_file_moves_to_history() {
        let tmp = tempfile::tempdir().unwrap();
        let w = writer(tmp.path(), 100);

        w.write(&[record("EURUSD", TradeType::Buy)]).unwrap();
        let outcome = w.write(&[record("USDJPY", TradeType::Sell)]).unwrap();

        let WriteOutcome::Written { rotated: Some(rotated), .. } = outcome else {
            panic!("expected rotation, got {:?}", outcome);
        };
        let name = rotated.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("signal_") && name.ends_with(".txt"), "{}", name);
        assert!(fs::read_to_string(&rotated).unwrap().starts_with("EURUSD,"));
        assert!(fs::read_to_string(w.signal_file()).unwrap().starts_with("USDJPY,"));
    }

    #[test]
    fn same_second_rotations_get_distinct_names() {
        let tmp = tempfile::tempdir().unwrap();
        let w = writer(tmp.path(), 100);
        for _ in 0..4 {
            w.write(&[record("EURUSD", TradeType::Buy)]).unwrap();
        }
        assert_eq!(history_count(&w), 3);
    }

    #[test]
    fn history_never_exceeds_cap_and_drops_oldest() {
        let tmp = tempfile::tempdir().unwrap();
        let w = writer(tmp.path(), 3);

        let symbols = ["S0", "S1", "S2", "S3", "S4", "S5", "S6"];
        for symbol in symbols {
            w.write(&[record(symbol, TradeType::Buy)]).unwrap();
            assert!(history_count(&w) <= 3);
        }

        assert_eq!(history_count(&w), 3);
        let kept: Vec<String> = fs::read_dir(w.history_dir())
            .unwrap()
            .map(|e| fs::read_to_string(e.unwrap().path()).unwrap())
            .collect();
        // S6 is current; S3..S5 are the newest rotated versions
        for symbol in ["S3", "S4", "S5"] {
            assert!(kept.iter().any(|c| c.starts_with(symbol)), "{} missing", symbol);
        }
        assert!(!kept.iter().any(|c| c.starts_with("S0,")));
    }

    #[test]
    fn empty_cells_keep_their_column() {
        let tmp = tempfile::tempdir().unwrap();
        let w = writer(tmp.path(), 100);
        let open_order = TradeRecord::new(
            TradeType::Buy,
            vec![
                (Label::Symbol, "EURUSD".to_string()),
                (Label::Time, "2024.03.12 10:14".to_string()),
                (Label::Volume, "0.10".to_string()),
                (Label::Price, "1.0912".to_string()),
                (Label::StopLoss, String::new()),
                (Label::TakeProfit, String::new()),
            ],
        );

        w.write(&[open_order]).unwrap();

        let content = fs::read_to_string(w.signal_file()).unwrap();
        assert_eq!(content, "EURUSD,2024.03.12 10:14,Buy,0.10,1.0912,,\n");
        assert_eq!(content.trim_end().split(',').count(), 7);
    }

    #[test]
    fn failed_write_keeps_previous_file_current() {
        let tmp = tempfile::tempdir().unwrap();
        let w = writer(tmp.path(), 100);
        w.write(&[record("OLD", TradeType::Buy)]).unwrap();
        let before = fs::read_to_string(w.signal_file()).unwrap();
        // a directory where the temp file should go makes the write fail
        fs::create_dir(w.signal_file().with_extension("txt.tmp")).unwrap();

        let err = w.write(&[record("NEW", TradeType::Sell)]).unwrap_err();

        assert!(matches!(err, WriteError::Io { .. }));
        assert_eq!(fs::read_to_string(w.signal_file()).unwrap(), before);
        assert_eq!(history_count(&w), 0);
    }

    #[test]
    fn empty_records_leave_current_file_untouched() {
        let tmp = tempfile::tempdir().unwrap();
        let w = writer(tmp.path(), 100);

        assert_eq!(w.write(&[]).unwrap(), WriteOutcome::Skipped);
        assert!(!w.signal_file().exists());

        w.write(&[record("EURUSD", TradeType::Buy)]).unwrap();
        let before = fs::read_to_string(w.signal_file()).unwrap();
        assert_eq!(w.write(&[]).unwrap(), WriteOutcome::Skipped);
        assert_eq!(fs::read_to_string(w.signal_file()).unwrap(), before);
        assert_eq!(history_count(&w), 0);
    }

    #[test]
    fn zero_cap_keeps_no_history() {
        let tmp = tempfile::tempdir().unwrap();
        let w = writer(tmp.path(), 0);
        w.write(&[record("A", TradeType::Buy)]).unwrap();
        let outcome = w.write(&[record("B", TradeType::Buy)]).unwrap();
        assert!(matches!(outcome, WriteOutcome::Written { pruned: 1, .. }));
        assert_eq!(history_count(&w), 0);
    }

    #[test]
    fn history_names_sort_chronologically() {
        assert_eq!(rotation_suffix("signal_20240312_101401.txt", "signal_20240312_101401"), Some(0));
        assert_eq!(rotation_suffix("signal_20240312_101401_12.txt", "signal_20240312_101401"), Some(12));
        assert_eq!(rotation_suffix("signal_20240312_101402.txt", "signal_20240312_101401"), None);

        let mut names = vec![
            "signal_20240312_101401_10.txt",
            "signal_20240312_101402.txt",
            "signal_20240312_101401_2.txt",
            "signal_20240312_101401.txt",
        ];
        names.sort_by_key(|n| history_order(Path::new(n)));
        assert_eq!(
            names,
            vec![
                "signal_20240312_101401.txt",
                "signal_20240312_101401_2.txt",
                "signal_20240312_101401_10.txt",
                "signal_20240312_101402.txt",
            ]
        );
    }

    #[test]
    fn unwritable_location_is_a_write_error() {
        let tmp = tempfile::tempdir().unwrap();
        let blocker = tmp.path().join("not_a_dir");
        fs::write(&blocker, "x").unwrap();
        let w = writer(&blocker, 10);
        let err = w.write(&[record("A", TradeType::Buy)]).unwrap_err();
        assert!(matches!(err, WriteError::Io { .. }));
    }
}
