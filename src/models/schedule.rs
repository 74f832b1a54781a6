use chrono::{DateTime, TimeZone};
use std::time::Duration;

/// Timing of the next aligned cycle. Recomputed every cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleState<Tz: TimeZone> {
    pub next_wake: DateTime<Tz>,
    pub interval: Duration,
    pub offset_secs: u32,
}

impl<Tz: TimeZone> ScheduleState<Tz> {
    /// Time left until `next_wake`, zero if it is already due.
    pub fn delay_from(&self, now: &DateTime<Tz>) -> Duration {
        (self.next_wake.clone() - now.clone())
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}
