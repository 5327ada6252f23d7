use std::time::Duration;
use thiserror::Error;

/// Extension applied to a live session's bidding window on every accepted bid.
pub const DEFAULT_LIVE_BID_EXTENSION_MS: u64 = 30_000;
/// Bidding window granted to a live item when it becomes current.
pub const DEFAULT_ITEM_LOOKAHEAD_MS: u64 = 60_000;
pub const DEFAULT_LEADERBOARD_TTL_SECONDS: u64 = 30;
pub const DEFAULT_TICK_MS: u64 = 10_000;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("{field} must be greater than zero")]
pub struct InvalidConfig {
    pub field: &'static str,
}

fn ensure_nonzero(field: &'static str, zero: bool) -> Result<(), InvalidConfig> {
    if zero {
        return Err(InvalidConfig { field });
    }
    Ok(())
}

/// Timing rules of the bid protocols and session sequencer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    pub live_bid_extension_ms: u64,
    pub item_lookahead_ms: u64,
    pub leaderboard_ttl: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            live_bid_extension_ms: DEFAULT_LIVE_BID_EXTENSION_MS,
            item_lookahead_ms: DEFAULT_ITEM_LOOKAHEAD_MS,
            leaderboard_ttl: Duration::from_secs(DEFAULT_LEADERBOARD_TTL_SECONDS),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), InvalidConfig> {
        ensure_nonzero("live_bid_extension_ms", self.live_bid_extension_ms == 0)?;
        ensure_nonzero("item_lookahead_ms", self.item_lookahead_ms == 0)?;
        ensure_nonzero("leaderboard_ttl", self.leaderboard_ttl.is_zero())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub tick: Duration,
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<(), InvalidConfig> {
        ensure_nonzero("tick", self.tick.is_zero())
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(DEFAULT_TICK_MS),
        }
    }
}
