//! Gavel auction engine.
//!
//! This crate owns the bidding protocols (live, sealed-bid, single timed
//! item), the live session sequencer and the lifecycle scheduler that moves
//! auctions through `upcoming → active → completed`.
//!
//! ## Consistency model
//! Every operation is one atomic unit of work against a [`store::Store`]:
//! reads are version-guarded, writes land together or not at all, and a
//! guard failure surfaces as [`AuctionError::Conflict`] without retrying.
//! Events and cache invalidations are emitted only after a successful
//! commit.
//!
//! ## Time
//! All deadlines are compared against an injected [`Clock`] in
//! milliseconds since the Unix epoch.
//!
//! ## Minimal wiring (example)
//! ```rust,ignore
//! use gavel_execution::{
//!     AuctionEngine, BroadcastNotifier, Collaborators, EngineConfig, KeyRing, MemoryCache,
//!     MemoryStore, SystemClock,
//! };
//! use std::sync::Arc;
//!
//! let engine = AuctionEngine::new(
//!     Collaborators {
//!         store: Arc::new(MemoryStore::new()),
//!         keys: Arc::new(KeyRing::from_secrets([("k1", "secret")])?),
//!         notifier: Arc::new(BroadcastNotifier::new(1024)),
//!         cache: Arc::new(MemoryCache::new()),
//!         clock: Arc::new(SystemClock),
//!     },
//!     EngineConfig::default(),
//! )?;
//! ```

pub mod cache;
pub mod clock;
pub mod codec;
pub mod config;
pub mod directory;
mod engine;
pub mod error;
mod leaderboard;
pub mod metrics;
pub mod mutator;
pub mod notify;
mod participants;
pub mod protocols;
pub mod scheduler;
pub mod sequencer;
pub mod settlement;
pub mod store;
pub mod validator;

#[cfg(any(test, feature = "mocks"))]
pub mod mocks;


pub use cache::{Cache, MemoryCache, RedisCache};
pub use clock::{Clock, SystemClock};
pub use codec::{BidCodec, CodecError, KeyProvider, KeyRing, SealingKey};
pub use config::{EngineConfig, InvalidConfig, SchedulerConfig};
pub use directory::{ItemDirectory, ItemFields, StoreItemDirectory};
pub use engine::{AuctionEngine, Collaborators, CreatedAuction, NewAuction};
pub use error::{AuctionError, AuctionResult, ErrorKind};
pub use leaderboard::LeaderboardEntry;
pub use metrics::SchedulerMetrics;
pub use notify::{BroadcastNotifier, Envelope, Notifier};
pub use protocols::{BidReceipt, BidRequest};
pub use scheduler::{LifecycleScheduler, TickReport};
pub use sequencer::{Advance, AdvanceTrigger};
pub use settlement::Settlement;
pub use store::{MemoryStore, Store, StoreError};
