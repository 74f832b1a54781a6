use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Timelike};

use crate::config::Config;
use crate::error::ConfigError;
use crate::models::ScheduleState;

/// Hours searched ahead before giving up on a slot. Covers a full DST gap
/// on top of the one-hour rollover.
const MAX_HOURS_AHEAD: i64 = 3;

/// Computes wake-up instants on a fixed grid of minutes within each hour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleAligner {
    minutes: Vec<u32>,
    offset_secs: u32,
    interval: std::time::Duration,
}

impl ScheduleAligner {
    pub fn new(minutes: &[u32], offset_secs: u32) -> Result<Self, ConfigError> {
        if minutes.is_empty() {
            return Err(ConfigError::NoCheckMinutes);
        }
        if let Some(&bad) = minutes.iter().find(|&&m| m > 59) {
            return Err(ConfigError::InvalidMinute(bad));
        }
        if offset_secs > 59 {
            return Err(ConfigError::InvalidOffset(offset_secs));
        }

        let mut minutes = minutes.to_vec();
        minutes.sort_unstable();
        minutes.dedup();

        Ok(Self {
            minutes,
            offset_secs,
            interval: std::time::Duration::from_secs(15 * 60),
        })
    }

    pub fn from_config(cfg: &Config) -> Result<Self, ConfigError> {
        Ok(Self::new(&cfg.check_minutes, cfg.check_offset_secs)?
            .with_interval(std::time::Duration::from_secs(cfg.check_interval_mins * 60)))
    }

    pub fn with_interval(mut self, interval: std::time::Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn minutes(&self) -> &[u32] {
        &self.minutes
    }

    pub fn offset_secs(&self) -> u32 {
        self.offset_secs
    }

    /// Earliest slot at or after `now`. A slot equal to `now` is returned
    /// as due, not skipped.
    pub fn next_after<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> DateTime<Tz> {
        let tz = now.timezone();
        let local = now.naive_local();
        let hour_start = truncate_to_hour(local);

        for hour in 0..=MAX_HOURS_AHEAD {
            let base = hour_start + Duration::hours(hour);
            for &minute in &self.minutes {
                let naive = base
                    + Duration::minutes(minute as i64)
                    + Duration::seconds(self.offset_secs as i64);
                // None means the slot falls in a DST gap
                let Some(candidate) = tz.from_local_datetime(&naive).earliest() else {
                    continue;
                };
                if candidate >= *now {
                    return candidate;
                }
            }
        }

        // Unreachable for a validated grid; keeps the function total.
        now.clone() + Duration::hours(1)
    }

    pub fn plan<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> ScheduleState<Tz> {
        ScheduleState {
            next_wake: self.next_after(now),
            interval: self.interval,
            offset_secs: self.offset_secs,
        }
    }
}

fn truncate_to_hour(t: NaiveDateTime) -> NaiveDateTime {
    t.with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(t)
}
