pub mod schedule;
pub mod trade;

pub use schedule::ScheduleState;
pub use trade::{Label, TradeRecord, TradeType};
