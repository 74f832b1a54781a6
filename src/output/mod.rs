pub mod archive;
pub mod signal_writer;
pub mod trade_log;

pub use archive::PageArchive;
pub use signal_writer::{SignalWriter, WriteOutcome};
pub use trade_log::TradeLog;

use chrono::Utc;
use chrono_tz::Tz;

/// `yyyyMMdd_HHmmss` in the configured zone, used for every file name we
/// generate.
pub fn file_stamp(tz: &Tz) -> String {
    Utc::now().with_timezone(tz).format("%Y%m%d_%H%M%S").to_string()
}
