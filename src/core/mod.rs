pub mod extractor;
pub mod schedule;

pub use extractor::TradeExtractor;
pub use schedule::ScheduleAligner;
