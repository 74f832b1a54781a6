pub mod guard;
pub mod poll_burst;

pub use guard::{CycleGuard, CycleSlot};
pub use poll_burst::{BurstOutcome, PollBurst, SignalProbe};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::Config;
use crate::core::{ScheduleAligner, TradeExtractor};
use crate::error::{AuthenticationError, ConfigError, FetchError, MonitorError};
use crate::models::TradeRecord;
use crate::output::{PageArchive, SignalWriter, TradeLog, WriteOutcome};
use crate::remote::{Fetcher, PageTransport};
use crate::session::{BrowserAutomation, SessionManager};

/// How a single check cycle ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Records were written to the signal file.
    Published { records: usize },
    /// Nothing showed up before the burst deadline.
    NoSignal,
    FetchFailed,
    WriteFailed,
    Cancelled,
    /// Another cycle was still running.
    Skipped,
}

/// Fetch-and-extract step handed to the poll burst.
struct CycleProbe<'a> {
    fetcher: &'a mut Fetcher,
    extractor: &'a TradeExtractor,
}

#[async_trait]
impl SignalProbe for CycleProbe<'_> {
    async fn probe(&mut self) -> Result<Vec<TradeRecord>, FetchError> {
        let content = self.fetcher.fetch().await?;
        Ok(self.extractor.extract(&content))
    }
}

/// Watches one provider page on an aligned schedule and republishes its
/// open trades.
pub struct SignalMonitor {
    provider: String,
    tz: Tz,
    aligner: ScheduleAligner,
    fetcher: Fetcher,
    extractor: TradeExtractor,
    burst: PollBurst,
    writer: SignalWriter,
    trade_log: TradeLog,
    guard: CycleGuard,
    grace: Duration,
}

impl SignalMonitor {
    pub fn new(
        cfg: &Config,
        automation: Arc<dyn BrowserAutomation>,
        transport: Arc<dyn PageTransport>,
    ) -> Result<Self, ConfigError> {
        let tz = cfg.tz()?;
        let aligner = ScheduleAligner::from_config(cfg)?;
        let session = SessionManager::new(automation, cfg);
        let archive = PageArchive::from_config(cfg, tz);

        Ok(Self {
            provider: cfg.signal_id.clone(),
            tz,
            aligner,
            fetcher: Fetcher::from_config(cfg, transport, session, archive),
            extractor: TradeExtractor::new(),
            burst: PollBurst::from_config(cfg),
            writer: SignalWriter::from_config(cfg, tz),
            trade_log: TradeLog::from_config(cfg, tz),
            guard: CycleGuard::new(),
            grace: cfg.shutdown_grace(),
        })
    }

    pub fn fetcher(&self) -> &Fetcher {
        &self.fetcher
    }

    pub fn writer(&self) -> &SignalWriter {
        &self.writer
    }

    pub fn trade_log(&self) -> &TradeLog {
        &self.trade_log
    }

    /// Handle on the cycle slot, shared with whoever else may start cycles.
    pub fn cycle_guard(&self) -> CycleGuard {
        self.guard.clone()
    }

    /// Initial login followed by one immediate check, so a fresh start does
    /// not wait up to a full interval for the first signal.
    pub async fn start(&mut self, shutdown: &CancellationToken) -> Result<(), MonitorError> {
        let span = info_span!("monitor", provider = %self.provider);
        self.startup(shutdown).instrument(span).await
    }

    async fn startup(&mut self, shutdown: &CancellationToken) -> Result<(), MonitorError> {
        info!("{}", "=".repeat(60));
        info!("Signal monitor starting up");
        info!("Provider: {}", self.provider);
        info!(
            "Check minutes: {:?} (+{}s)",
            self.aligner.minutes(),
            self.aligner.offset_secs()
        );
        info!("Signal file: {}", self.writer.signal_file().display());
        info!("{}", "=".repeat(60));

        self.fetcher.session_mut().login().await?;

        info!("Performing initial check");
        let outcome = self.run_guarded_cycle(shutdown).await?;
        debug!("Initial check finished: {:?}", outcome);
        Ok(())
    }

    /// Runs aligned cycles until `shutdown` fires or authentication fails.
    /// The browser backend is released on every exit.
    pub async fn run(&mut self, shutdown: CancellationToken) -> Result<(), MonitorError> {
        let span = info_span!("monitor", provider = %self.provider);
        let result = self.schedule_loop(&shutdown).instrument(span).await;
        self.fetcher.session().release().await;
        info!("Signal monitor stopped");
        result
    }

    async fn schedule_loop(&mut self, shutdown: &CancellationToken) -> Result<(), MonitorError> {
        let mut last_slot: Option<DateTime<Tz>> = None;

        loop {
            let now = self.now();
            // never fire the same slot twice, even if the clock steps back
            let from = match &last_slot {
                Some(last) if now <= *last => last.clone() + chrono::Duration::seconds(1),
                _ => now.clone(),
            };
            let plan = self.aligner.plan(&from);
            let delay = plan.delay_from(&now);
            let slot = plan.next_wake;
            info!(
                "Next check at {} (in {}s)",
                slot.format("%Y-%m-%d %H:%M:%S %Z"),
                delay.as_secs()
            );

            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested");
                    return Ok(());
                }
                _ = tokio::time::sleep(delay) => {}
            }

            info!("Checking signals at scheduled time");
            let outcome = self.run_guarded_cycle(shutdown).await?;
            debug!("Cycle finished: {:?}", outcome);
            if shutdown.is_cancelled() {
                return Ok(());
            }

            let following = self
                .aligner
                .next_after(&(slot.clone() + chrono::Duration::seconds(1)));
            last_slot = Some(slot);
            if self.now() > following {
                warn!(
                    "Cycle overran the {} check, skipping it",
                    following.format("%H:%M:%S")
                );
            }
        }
    }

    /// One cycle that honors `shutdown`: the burst is cancelled and the
    /// cycle gets the grace period to finish whatever it is doing.
    pub async fn run_guarded_cycle(
        &mut self,
        shutdown: &CancellationToken,
    ) -> Result<CycleOutcome, AuthenticationError> {
        let burst_cancel = CancellationToken::new();
        let grace = self.grace;
        let cycle = self
            .run_cycle(&burst_cancel)
            .instrument(info_span!("cycle"));
        tokio::pin!(cycle);

        tokio::select! {
            biased;
            result = &mut cycle => result,
            _ = shutdown.cancelled() => {
                info!("Shutdown requested, stopping current cycle");
                burst_cancel.cancel();
                match tokio::time::timeout(grace, &mut cycle).await {
                    Ok(result) => result,
                    Err(_) => {
                        warn!("Cycle did not finish within {}s, abandoning it", grace.as_secs());
                        Ok(CycleOutcome::Cancelled)
                    }
                }
            }
        }
    }

    /// Fetch, extract, burst if nothing is there yet, then write.
    ///
    /// Only authentication failures are returned as errors; everything else
    /// ends the cycle with an outcome and the monitor carries on.
    pub async fn run_cycle(
        &mut self,
        burst_cancel: &CancellationToken,
    ) -> Result<CycleOutcome, AuthenticationError> {
        let started = Instant::now();
        let Some(_slot) = self.guard.try_enter() else {
            warn!("Previous cycle still running, skipping this check");
            return Ok(CycleOutcome::Skipped);
        };

        let mut records = match self.fetcher.fetch().await {
            Ok(content) => self.extractor.extract(&content),
            Err(FetchError::Authentication(e)) => return Err(e),
            Err(e) => {
                error!("Check failed: {}", e);
                return Ok(CycleOutcome::FetchFailed);
            }
        };

        if records.is_empty() {
            info!("No signal at scheduled check");
            let mut probe = CycleProbe {
                fetcher: &mut self.fetcher,
                extractor: &self.extractor,
            };
            match self.burst.run(&mut probe, started, burst_cancel).await? {
                BurstOutcome::Found { records: found, .. } => records = found,
                BurstOutcome::NoSignal { attempts } => {
                    info!("No signal after {} polling attempts", attempts);
                    return Ok(CycleOutcome::NoSignal);
                }
                BurstOutcome::Cancelled { .. } => return Ok(CycleOutcome::Cancelled),
            }
        }

        info!("Found {} trades", records.len());
        if let Err(e) = self.trade_log.append(&records) {
            warn!("Could not append to trade log: {}", e);
        }

        match self.writer.write(&records) {
            Ok(WriteOutcome::Written { lines, pruned, .. }) => {
                if pruned > 0 {
                    debug!("Pruned {} old history files", pruned);
                }
                Ok(CycleOutcome::Published { records: lines })
            }
            Ok(WriteOutcome::Skipped) => Ok(CycleOutcome::NoSignal),
            Err(e) => {
                error!("Error writing signal file: {}", e);
                Ok(CycleOutcome::WriteFailed)
            }
        }
    }

    fn now(&self) -> DateTime<Tz> {
        Utc::now().with_timezone(&self.tz)
    }
}
