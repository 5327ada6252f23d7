//! Test doubles and fixtures for exercising the engine in-process.

use gavel_types::{
    Auction, AuctionId, AuctionParticipant, AuctionSession, AuctionSettings, Caller, Item,
    LiveSettings, SealedSettings, TimedSettings, UserId,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::cache::MemoryCache;
use crate::clock::Clock;
use crate::codec::{KeyRing, SealingKey};
use crate::config::{EngineConfig, SchedulerConfig};
use crate::engine::{AuctionEngine, Collaborators, CreatedAuction, NewAuction};
use crate::metrics::SchedulerMetrics;
use crate::notify::{Envelope, Notifier};
use crate::scheduler::LifecycleScheduler;
use crate::store::{Key, MemoryStore, StoreExt};

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(now_ms: u64) -> Self {
        Self {
            now: AtomicU64::new(now_ms),
        }
    }

    pub fn set(&self, now_ms: u64) {
        self.now.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, by_ms: u64) -> u64 {
        self.now.fetch_add(by_ms, Ordering::SeqCst) + by_ms
    }

    pub fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        ManualClock::now_ms(self)
    }
}

/// Notifier that keeps everything it was asked to publish.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    published: Mutex<Vec<Envelope>>,
}

impl RecordingNotifier {
    pub fn events(&self) -> Vec<Envelope> {
        self.published.lock().map(|p| p.clone()).unwrap_or_default()
    }

    /// Names of published events, in order.
    pub fn names(&self) -> Vec<&'static str> {
        self.events().iter().map(|e| e.event.name()).collect()
    }

    pub fn clear(&self) {
        if let Ok(mut published) = self.published.lock() {
            published.clear();
        }
    }
}

impl Notifier for RecordingNotifier {
    fn publish(&self, topic: gavel_types::Topic, event: gavel_types::AuctionEvent) {
        if let Ok(mut published) = self.published.lock() {
            published.push(Envelope { topic, event });
        }
    }
}

pub const START: u64 = 1_700_000_000_000;
pub const HOUR: u64 = 3_600_000;

/// Fixed sealing key; deriving one with argon2 is too slow for unit tests.
pub fn test_key_ring() -> KeyRing {
    KeyRing::new(vec![("k1".to_string(), SealingKey::from_bytes([7; 32]))])
        .expect("static key ring is valid")
}

/// An engine wired to in-memory collaborators, starting at [`START`].
pub struct TestHarness {
    pub engine: Arc<AuctionEngine>,
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
    pub notifier: Arc<RecordingNotifier>,
    pub cache: Arc<MemoryCache>,
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(START));
        let notifier = Arc::new(RecordingNotifier::default());
        let cache = Arc::new(MemoryCache::new());
        let engine = AuctionEngine::new(
            Collaborators {
                store: store.clone(),
                keys: Arc::new(test_key_ring()),
                notifier: notifier.clone(),
                cache: cache.clone(),
                clock: clock.clone(),
            },
            config,
        )
        .expect("engine config is valid");
        Self {
            engine: Arc::new(engine),
            store,
            clock,
            notifier,
            cache,
        }
    }

    pub fn scheduler(&self) -> LifecycleScheduler {
        LifecycleScheduler::new(
            self.engine.clone(),
            SchedulerConfig::default(),
            Arc::new(SchedulerMetrics::default()),
        )
        .expect("scheduler config is valid")
    }

    pub fn seed_item(&self, starting_bid: u64) -> Item {
        self.engine
            .items()
            .register_item(Item::new("lot", starting_bid))
            .expect("item registers")
    }

    pub fn item(&self, id: gavel_types::ItemId) -> Item {
        self.store
            .fetch::<Item>(&Key::Item(id))
            .expect("store readable")
            .expect("item exists")
            .value
    }

    pub fn auction(&self, id: AuctionId) -> Auction {
        self.store
            .fetch::<Auction>(&Key::Auction(id))
            .expect("store readable")
            .expect("auction exists")
            .value
    }

    pub fn session(&self, auction: AuctionId) -> AuctionSession {
        self.engine
            .session_for(auction)
            .expect("store readable")
            .expect("session exists")
    }

    pub fn participant(&self, session: gavel_types::SessionId, user: UserId) -> AuctionParticipant {
        self.store
            .fetch::<AuctionParticipant>(&Key::Participant(session, user))
            .expect("store readable")
            .expect("participant exists")
            .value
    }

    /// Live auction over `items` starting now, not yet activated.
    pub async fn live_auction(
        &self,
        organizer: &Caller,
        items: &[Item],
        reserve_price: u64,
        min_bid_increment: u64,
    ) -> CreatedAuction {
        let now = self.clock.now_ms();
        self.engine
            .create_auction(
                organizer,
                new_auction(
                    now,
                    now + HOUR,
                    AuctionSettings::Live(LiveSettings {
                        item_ids: items.iter().map(|item| item.id).collect(),
                        current_item_id: None,
                        reserve_price,
                        min_bid_increment,
                    }),
                ),
            )
            .await
            .expect("live auction is created")
    }

    /// Sealed auction over `item` accepting bids until `deadline`.
    pub async fn sealed_auction(
        &self,
        organizer: &Caller,
        item: &Item,
        reserve_price: u64,
        deadline: u64,
    ) -> CreatedAuction {
        let now = self.clock.now_ms();
        self.engine
            .create_auction(
                organizer,
                new_auction(
                    now,
                    deadline + HOUR,
                    AuctionSettings::Sealed(SealedSettings {
                        item_id: item.id,
                        reserve_price,
                        sealed_bid_deadline: deadline,
                    }),
                ),
            )
            .await
            .expect("sealed auction is created")
    }

    /// Timed auction over `item` ending at `end_time`.
    pub async fn timed_auction(
        &self,
        organizer: &Caller,
        item: &Item,
        reserve_price: u64,
        auto_extend_duration_ms: u64,
        end_time: u64,
    ) -> CreatedAuction {
        let now = self.clock.now_ms();
        self.engine
            .create_auction(
                organizer,
                new_auction(
                    now,
                    end_time,
                    AuctionSettings::Timed(TimedSettings {
                        item_id: item.id,
                        reserve_price,
                        min_bid_increment: 1,
                        auto_extend_duration_ms,
                        extended_end_time: None,
                    }),
                ),
            )
            .await
            .expect("timed auction is created")
    }

    /// Promote `auction` without waiting for a scheduler tick.
    pub async fn activate(&self, auction: AuctionId) {
        self.engine
            .activate_auction(auction)
            .await
            .expect("auction activates");
    }
}

pub fn new_auction(start_time: u64, end_time: u64, settings: AuctionSettings) -> NewAuction {
    NewAuction {
        title: "fixture".to_string(),
        description: String::new(),
        start_time,
        end_time,
        invite_only: false,
        invite_code: None,
        settings,
    }
}
