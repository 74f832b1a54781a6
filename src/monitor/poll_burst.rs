use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{AuthenticationError, FetchError};
use crate::models::TradeRecord;

/// One fetch-and-extract attempt.
#[async_trait]
pub trait SignalProbe: Send {
    async fn probe(&mut self) -> Result<Vec<TradeRecord>, FetchError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BurstOutcome {
    Found {
        records: Vec<TradeRecord>,
        attempts: usize,
    },
    NoSignal {
        attempts: usize,
    },
    Cancelled {
        attempts: usize,
    },
}

/// Rapid re-polling used right after an aligned check came back empty,
/// since the provider usually publishes a few seconds after the tick.
#[derive(Debug, Clone)]
pub struct PollBurst {
    interval: Duration,
    timeout: Duration,
}

impl PollBurst {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(cfg.poll_interval(), cfg.poll_timeout())
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Polls `probe` every interval until it returns records, `started +
    /// timeout` passes, or `cancel` fires. The deadline applies to wall
    /// time, so a probe stuck in a slow fetch is abandoned at the deadline.
    ///
    /// Only authentication failures end the burst early with an error.
    pub async fn run(
        &self,
        probe: &mut dyn SignalProbe,
        started: Instant,
        cancel: &CancellationToken,
    ) -> Result<BurstOutcome, AuthenticationError> {
        let deadline = started + self.timeout;
        let attempts = AtomicUsize::new(0);
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Starting polling sequence");

        let polling = async {
            loop {
                ticker.tick().await;
                let n = attempts.fetch_add(1, Ordering::Relaxed) + 1;
                match probe.probe().await {
                    Ok(records) if !records.is_empty() => return Ok(records),
                    Ok(_) => debug!("Polling attempt {}: no signal yet", n),
                    Err(FetchError::Authentication(e)) => return Err(e),
                    Err(e) => warn!("Polling attempt {} failed: {}", n, e),
                }
            }
        };

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("Polling cancelled");
                BurstOutcome::Cancelled { attempts: attempts.load(Ordering::Relaxed) }
            }
            _ = tokio::time::sleep_until(deadline) => {
                info!("Polling timeout reached ({} seconds)", self.timeout.as_secs());
                BurstOutcome::NoSignal { attempts: attempts.load(Ordering::Relaxed) }
            }
            result = polling => {
                let records = result?;
                let attempts = attempts.load(Ordering::Relaxed);
                info!("Signal found during polling (attempt {})", attempts);
                BurstOutcome::Found { records, attempts }
            }
        };
        Ok(outcome)
    }
}
