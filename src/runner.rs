use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{info, warn};

use crate::adapters::{Market, SourceAdapter};
use crate::cache::BatchCache;
use crate::classify::RuleSet;
use crate::error::ScrapeError;
use crate::fetch::PageFetcher;
use crate::pipeline::scrape_market;
use crate::records::PriceRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RunState {
    Idle = 0,
    Running = 1,
}

/// Non-blocking single-flight guard. A second caller while a run is in
/// flight gets `None` and is expected to skip, not wait.
#[derive(Debug, Default)]
pub struct RunGuard {
    state: AtomicU8,
}

impl RunGuard {
    pub fn state(&self) -> RunState {
        match self.state.load(Ordering::Acquire) {
            0 => RunState::Idle,
            _ => RunState::Running,
        }
    }

    pub fn try_begin(&self) -> Option<RunPermit<'_>> {
        self.state
            .compare_exchange(
                RunState::Idle as u8,
                RunState::Running as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .ok()
            .map(|_| RunPermit { guard: self })
    }
}

/// Held for the duration of a run; dropping it returns the guard to idle.
pub struct RunPermit<'a> {
    guard: &'a RunGuard,
}

impl Drop for RunPermit<'_> {
    fn drop(&mut self) {
        self.guard.state.store(RunState::Idle as u8, Ordering::Release);
    }
}

#[derive(Debug)]
pub enum RunOutcome {
    /// A fresh batch scraped in this run.
    Fresh(Vec<PriceRecord>),
    /// The run failed; this is the last good batch.
    Cached {
        records: Vec<PriceRecord>,
        error: ScrapeError,
    },
    /// Another run for the same market was still in flight.
    Skipped,
}

/// Owns everything one market needs for a scrape cycle.
pub struct MarketRunner {
    adapter: Arc<dyn SourceAdapter>,
    fetcher: Arc<dyn PageFetcher>,
    rules: Arc<RuleSet>,
    cache: Arc<BatchCache>,
    guard: RunGuard,
}

impl MarketRunner {
    pub fn new(
        adapter: Arc<dyn SourceAdapter>,
        fetcher: Arc<dyn PageFetcher>,
        rules: Arc<RuleSet>,
        cache: Arc<BatchCache>,
    ) -> Self {
        MarketRunner {
            adapter,
            fetcher,
            rules,
            cache,
            guard: RunGuard::default(),
        }
    }

    pub fn market(&self) -> &Market {
        self.adapter.market()
    }

    pub fn state(&self) -> RunState {
        self.guard.state()
    }

    /// Scrape once. Every scrape failure only loses this run: the cached batch
    /// is returned in its place, and with no cache the error is returned.
    pub async fn run_once(&self, today: NaiveDate) -> Result<RunOutcome, ScrapeError> {
        let market = self.market().id;
        let Some(_permit) = self.guard.try_begin() else {
            warn!(market, "Previous run still in progress; skipping this cycle");
            return Ok(RunOutcome::Skipped);
        };

        info!(market, "Run started");
        match scrape_market(self.adapter.as_ref(), self.fetcher.as_ref(), &self.rules, today).await {
            Ok(records) => {
                self.cache.store(market, &records).await;
                Ok(RunOutcome::Fresh(records))
            }
            Err(error) => match self.cache.load(market).await {
                Some(records) => {
                    warn!(
                        market,
                        kind = error.kind(),
                        rows = records.len(),
                        "Run failed ({}); serving last good batch",
                        error
                    );
                    Ok(RunOutcome::Cached { records, error })
                }
                None => Err(error),
            },
        }
    }
}
