//! Periodic lifecycle sweeps.
//!
//! Each tick collects candidates for four independent sweeps and runs one
//! job per candidate. Jobs are independent units of work that re-check their
//! own preconditions at commit time, so a tick that overlaps with bidding, an
//! organizer action or another tick loses the race cleanly with a conflict
//! instead of applying a stale transition. A failed job is logged and counted
//! and never stops the rest of the tick.

use gavel_types::{
    Auction, AuctionId, AuctionSession, AuctionSettings, AuctionStatus, Item, ItemId, ItemStatus,
    SessionStatus,
};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::{InvalidConfig, SchedulerConfig};
use crate::engine::AuctionEngine;
use crate::error::AuctionResult;
pub use crate::metrics::Sweep;
use crate::metrics::SchedulerMetrics;
use crate::sequencer::AdvanceTrigger;
use crate::store::StoreExt;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Job {
    Promote(AuctionId),
    Close(AuctionId),
    Advance(AuctionId),
    Reclaim(ItemId),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TickReport {
    pub promoted: usize,
    pub expired: usize,
    pub advanced: usize,
    pub reclaimed: usize,
    pub failed: usize,
}

impl TickReport {
    fn record(&mut self, sweep: Sweep) {
        match sweep {
            Sweep::Promote => self.promoted += 1,
            Sweep::Expire => self.expired += 1,
            Sweep::Advance => self.advanced += 1,
            Sweep::Reclaim => self.reclaimed += 1,
        }
    }

    pub fn transitions(&self) -> usize {
        self.promoted + self.expired + self.advanced + self.reclaimed
    }

    pub fn is_idle(&self) -> bool {
        self.transitions() == 0 && self.failed == 0
    }
}

/// Sealed auctions close once `now` reaches the deadline; timed auctions
/// once it is strictly past the (possibly extended) end.
fn past_deadline(auction: &Auction, now: u64) -> bool {
    match (&auction.settings, auction.closing_deadline()) {
        (AuctionSettings::Sealed(_), Some(deadline)) => now >= deadline,
        (AuctionSettings::Timed(_), Some(deadline)) => now > deadline,
        _ => false,
    }
}

pub struct LifecycleScheduler {
    engine: Arc<AuctionEngine>,
    config: SchedulerConfig,
    metrics: Arc<SchedulerMetrics>,
}

impl LifecycleScheduler {
    pub fn new(
        engine: Arc<AuctionEngine>,
        config: SchedulerConfig,
        metrics: Arc<SchedulerMetrics>,
    ) -> Result<Self, InvalidConfig> {
        config.validate()?;
        Ok(Self {
            engine,
            config,
            metrics,
        })
    }

    fn collect(&self, sweep: Sweep, now: u64) -> AuctionResult<Vec<Job>> {
        let store = self.engine.store();
        let jobs = match sweep {
            Sweep::Promote => store
                .scan_records::<Auction>(|a| {
                    !a.deleted && a.status == AuctionStatus::Upcoming && a.start_time <= now
                })?
                .into_iter()
                .map(|doc| Job::Promote(doc.value.id))
                .collect(),
            Sweep::Expire => store
                .scan_records::<Auction>(|a| {
                    !a.deleted && a.status == AuctionStatus::Active && past_deadline(a, now)
                })?
                .into_iter()
                .map(|doc| Job::Close(doc.value.id))
                .collect(),
            Sweep::Advance => {
                let tombstoned: HashSet<AuctionId> = store
                    .scan_records::<Auction>(|a| a.deleted)?
                    .into_iter()
                    .map(|doc| doc.value.id)
                    .collect();
                store
                    .scan_records::<AuctionSession>(|s| {
                        s.status == SessionStatus::Active
                            && s.bidding_window.is_some_and(|window| window <= now)
                            && !tombstoned.contains(&s.auction_id)
                    })?
                    .into_iter()
                    .map(|doc| Job::Advance(doc.value.auction_id))
                    .collect()
            }
            Sweep::Reclaim => store
                .scan_records::<Item>(|item| item.status == ItemStatus::Unsold)?
                .into_iter()
                .map(|doc| Job::Reclaim(doc.value.id))
                .collect(),
        };
        Ok(jobs)
    }

    async fn run_job(&self, job: Job) -> AuctionResult<()> {
        match job {
            Job::Promote(auction) => self.engine.activate_auction(auction).await,
            Job::Close(auction) => match self.engine.auction(auction)?.protocol() {
                gavel_types::Protocol::SealedBid => {
                    self.engine.resolve_sealed(auction).await.map(|_| ())
                }
                gavel_types::Protocol::SingleTimedItem => {
                    self.engine.resolve_timed(auction).await.map(|_| ())
                }
                gavel_types::Protocol::Live => Ok(()),
            },
            Job::Advance(auction) => self
                .engine
                .settle_and_advance(auction, AdvanceTrigger::Scheduler)
                .await
                .map(|_| ()),
            Job::Reclaim(item) => self.engine.reclaim_item(item).await,
        }
    }

    /// Run every sweep once against the engine's clock.
    pub async fn tick(&self) -> TickReport {
        self.metrics.ticks.inc();
        let mut report = TickReport::default();
        for sweep in Sweep::ALL {
            let now = self.engine.now();
            let jobs = match self.collect(sweep, now) {
                Ok(jobs) => jobs,
                Err(err) => {
                    warn!(sweep = sweep.as_str(), "failed to collect candidates: {err}");
                    report.failed += 1;
                    self.metrics.failure(sweep);
                    continue;
                }
            };
            for job in jobs {
                match self.run_job(job).await {
                    Ok(()) => {
                        report.record(sweep);
                        self.metrics.transition(sweep);
                    }
                    Err(err) if err.is_retryable() => {
                        debug!(sweep = sweep.as_str(), ?job, "job lost a race: {err}");
                        report.failed += 1;
                        self.metrics.failure(sweep);
                    }
                    Err(err) => {
                        warn!(sweep = sweep.as_str(), ?job, kind = err.kind().as_str(), "job failed: {err}");
                        report.failed += 1;
                        self.metrics.failure(sweep);
                    }
                }
            }
        }
        report
    }

    /// Tick every `config.tick` until `shutdown` flips to `true` or its
    /// sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(tick_ms = self.config.tick.as_millis() as u64, "lifecycle scheduler started");
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let report = self.tick().await;
                    if !report.is_idle() {
                        info!(
                            promoted = report.promoted,
                            expired = report.expired,
                            advanced = report.advanced,
                            reclaimed = report.reclaimed,
                            failed = report.failed,
                            "scheduler tick"
                        );
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("lifecycle scheduler stopping");
                        return;
                    }
                }
            }
        }
    }
}
