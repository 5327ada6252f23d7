//! Engine facade and the auction-level operations that are not specific to
//! one bidding protocol: the listing handoff (`create_auction`), cancellation
//! and activation.
//!
//! Every operation follows the same shape: compute and stage all writes in
//! one [`Mutator`] unit of work, commit, then publish events and invalidate
//! caches collected as [`Effects`]. Nothing is announced for work that did
//! not commit.

use gavel_types::{
    Auction, AuctionEvent, AuctionId, AuctionParticipant, AuctionSession, AuctionSettings,
    AuctionStatus, BidStats, Caller, Item, ItemStatus, ParticipantStatus, SessionStatus, Topic,
};
use std::sync::Arc;
use tracing::{debug, info};

use crate::cache::{keys, Cache};
use crate::clock::Clock;
use crate::codec::{BidCodec, KeyProvider};
use crate::config::{EngineConfig, InvalidConfig};
use crate::directory::StoreItemDirectory;
use crate::error::{AuctionError, AuctionResult};
use crate::mutator::{Mutator, Txn};
use crate::notify::Notifier;
use crate::store::{Key, Store, StoreExt};

/// External collaborators the engine is wired to.
pub struct Collaborators {
    pub store: Arc<dyn Store>,
    pub keys: Arc<dyn KeyProvider>,
    pub notifier: Arc<dyn Notifier>,
    pub cache: Arc<dyn Cache>,
    pub clock: Arc<dyn Clock>,
}

pub struct AuctionEngine {
    pub(crate) mutator: Mutator,
    pub(crate) codec: BidCodec,
    notifier: Arc<dyn Notifier>,
    pub(crate) cache: Arc<dyn Cache>,
    clock: Arc<dyn Clock>,
    pub(crate) config: EngineConfig,
}

/// Announcements and cache invalidations owed once a unit of work commits.
#[derive(Debug, Default)]
pub(crate) struct Effects {
    events: Vec<(Topic, AuctionEvent)>,
    invalidations: Vec<String>,
}

impl Effects {
    pub(crate) fn emit(&mut self, topic: Topic, event: AuctionEvent) {
        self.events.push((topic, event));
    }

    pub(crate) fn invalidate(&mut self, pattern: impl Into<String>) {
        let pattern = pattern.into();
        if !self.invalidations.contains(&pattern) {
            self.invalidations.push(pattern);
        }
    }

    /// Caches derived from an auction's state: its summary, its leaderboards
    /// and the listing pages showing it.
    pub(crate) fn invalidate_auction(&mut self, auction: AuctionId) {
        self.invalidate(keys::auction(auction));
        self.invalidate(keys::leaderboards(auction));
        self.invalidate(keys::LISTINGS);
    }
}

/// Listing handoff for a new auction.
#[derive(Clone, Debug)]
pub struct NewAuction {
    pub title: String,
    pub description: String,
    pub start_time: u64,
    pub end_time: u64,
    pub invite_only: bool,
    pub invite_code: Option<String>,
    pub settings: AuctionSettings,
}

#[derive(Clone, Debug)]
pub struct CreatedAuction {
    pub auction: Auction,
    /// Present for live auctions.
    pub session: Option<AuctionSession>,
}

impl AuctionEngine {
    pub fn new(collaborators: Collaborators, config: EngineConfig) -> Result<Self, InvalidConfig> {
        config.validate()?;
        let Collaborators {
            store,
            keys,
            notifier,
            cache,
            clock,
        } = collaborators;
        Ok(Self {
            mutator: Mutator::new(store),
            codec: BidCodec::new(keys),
            notifier,
            cache,
            clock,
            config,
        })
    }

    pub fn now(&self) -> u64 {
        self.clock.now_ms()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        self.mutator.store()
    }

    pub fn items(&self) -> StoreItemDirectory {
        StoreItemDirectory::new(self.mutator.clone())
    }

    pub fn auction(&self, id: AuctionId) -> AuctionResult<Auction> {
        self.store()
            .fetch::<Auction>(&Key::Auction(id))?
            .map(|doc| doc.value)
            .filter(|auction| !auction.deleted)
            .ok_or_else(|| AuctionError::not_found("auction", id))
    }

    pub fn session_for(&self, auction: AuctionId) -> AuctionResult<Option<AuctionSession>> {
        Ok(self
            .store()
            .scan_records::<AuctionSession>(|session| session.auction_id == auction)?
            .into_iter()
            .next()
            .map(|doc| doc.value))
    }

    pub(crate) async fn apply(&self, effects: Effects) {
        for (topic, event) in effects.events {
            self.notifier.publish(topic, event);
        }
        for pattern in effects.invalidations {
            self.cache.invalidate(&pattern).await;
        }
    }

    /// Register an auction handed over by the listing service and bind its
    /// items. Items must be `available`; an item already held by another
    /// auction is a conflict.
    pub async fn create_auction(
        &self,
        caller: &Caller,
        request: NewAuction,
    ) -> AuctionResult<CreatedAuction> {
        validate_new_auction(&request)?;
        let mut settings = request.settings;
        if let AuctionSettings::Live(live) = &mut settings {
            live.current_item_id = None;
        }
        let auction = Auction {
            id: AuctionId::new(),
            organizer_id: caller.user_id,
            title: request.title,
            description: request.description,
            status: AuctionStatus::Upcoming,
            start_time: request.start_time,
            end_time: request.end_time,
            invite_only: request.invite_only,
            invite_code: request.invite_code,
            settings,
            stats: BidStats::default(),
            deleted: false,
        };

        let (created, effects) = self.mutator.run(|txn| {
            for item_id in auction.settings.item_ids() {
                let mut item: Item = txn.require(&Key::Item(item_id), item_id)?;
                match item.status {
                    ItemStatus::Available if item.held_by.is_none() => {}
                    ItemStatus::InAuction => {
                        return Err(AuctionError::Conflict(format!(
                            "item {item_id} is already held by another auction"
                        )))
                    }
                    status => {
                        return Err(AuctionError::Validation(format!(
                            "item {item_id} is {} and cannot be auctioned",
                            status.as_str()
                        )))
                    }
                }
                item.bind(auction.id);
                txn.put(item)?;
            }

            let session = match &auction.settings {
                AuctionSettings::Live(_) => {
                    let session =
                        AuctionSession::new(auction.id, auction.start_time, auction.end_time);
                    txn.insert(session.clone());
                    Some(session)
                }
                _ => None,
            };
            txn.insert(auction.clone());

            let mut effects = Effects::default();
            effects.invalidate(keys::LISTINGS);
            Ok((
                CreatedAuction {
                    auction: auction.clone(),
                    session,
                },
                effects,
            ))
        })?;
        info!(
            auction = %created.auction.id,
            protocol = created.auction.protocol().as_str(),
            "auction created"
        );
        self.apply(effects).await;
        Ok(created)
    }

    /// Cancel an auction that has not started, or started without bids.
    /// Bound items return to the listing pool.
    pub async fn cancel_auction(&self, caller: &Caller, auction_id: AuctionId) -> AuctionResult<Auction> {
        let now = self.now();
        let (auction, effects) = self.mutator.run(|txn| {
            let mut auction = load_auction(txn, auction_id)?;
            if !caller.may_manage(&auction) {
                return Err(AuctionError::Forbidden(
                    "only the organizer can cancel an auction".to_string(),
                ));
            }
            match auction.status {
                AuctionStatus::Upcoming => {}
                AuctionStatus::Active if auction.stats.bid_count == 0 => {}
                AuctionStatus::Active => {
                    return Err(AuctionError::Validation(
                        "an auction with bids cannot be cancelled".to_string(),
                    ))
                }
                status => {
                    return Err(AuctionError::Validation(format!(
                        "auction is already {}",
                        status.as_str()
                    )))
                }
            }

            for item_id in auction.settings.item_ids() {
                if let Some(mut item) = txn.get::<Item>(&Key::Item(item_id))? {
                    if item.is_held_by(auction.id) {
                        item.release();
                        txn.put(item)?;
                    }
                }
            }

            let mut effects = Effects::default();
            if let Some(mut session) = live_session(txn, auction.id)? {
                if !session.status.is_terminal() {
                    session.status = SessionStatus::Cancelled;
                    session.actual_end_time = Some(now);
                    release_participants(txn, &session)?;
                    effects.emit(
                        Topic::Session(session.id),
                        AuctionEvent::SessionEnded {
                            session_id: session.id,
                        },
                    );
                    txn.put(session)?;
                }
            }

            auction.status = AuctionStatus::Cancelled;
            txn.put(auction.clone())?;
            effects.invalidate_auction(auction.id);
            Ok((auction, effects))
        })?;
        info!(auction = %auction.id, "auction cancelled");
        self.apply(effects).await;
        Ok(auction)
    }

    /// Promote an upcoming auction whose start time has passed. Live
    /// auctions get their session opened on the first item.
    pub(crate) async fn activate_auction(&self, auction_id: AuctionId) -> AuctionResult<()> {
        let now = self.now();
        let lookahead = self.config.item_lookahead_ms;
        let effects = self.mutator.run(|txn| {
            let mut auction = load_auction(txn, auction_id)?;
            if auction.status != AuctionStatus::Upcoming {
                return Err(AuctionError::Conflict(format!(
                    "auction is {}, not upcoming",
                    auction.status.as_str()
                )));
            }
            if auction.start_time > now {
                return Err(AuctionError::Conflict("auction start time moved".to_string()));
            }

            let mut effects = Effects::default();
            if let AuctionSettings::Live(live) = &mut auction.settings {
                let first = live.item_ids.first().copied().ok_or_else(|| {
                    AuctionError::Internal(format!("live auction {auction_id} has no items"))
                })?;
                let mut session = match live_session(txn, auction_id)? {
                    Some(session) => session,
                    None => {
                        let session =
                            AuctionSession::new(auction_id, auction.start_time, auction.end_time);
                        txn.insert(session.clone());
                        session
                    }
                };
                if session.status.is_terminal() {
                    return Err(AuctionError::Conflict(format!(
                        "session {} is already {}",
                        session.id,
                        session.status.as_str()
                    )));
                }
                live.current_item_id = Some(first);
                let window = now.saturating_add(lookahead);
                session.status = SessionStatus::Active;
                session.actual_start_time = Some(now);
                session.bidding_window = Some(window);
                effects.emit(
                    Topic::Session(session.id),
                    AuctionEvent::ItemChanged {
                        session_id: session.id,
                        current_item_id: first,
                        bidding_window: window,
                    },
                );
                txn.put(session)?;
            }

            auction.status = AuctionStatus::Active;
            txn.put(auction)?;
            effects.invalidate_auction(auction_id);
            Ok(effects)
        })?;
        info!(auction = %auction_id, "auction activated");
        self.apply(effects).await;
        Ok(())
    }

    /// Return an `unsold` item to the listing pool.
    pub(crate) async fn reclaim_item(&self, item_id: gavel_types::ItemId) -> AuctionResult<()> {
        let effects = self.mutator.run(|txn| {
            let mut item: Item = txn.require(&Key::Item(item_id), item_id)?;
            if item.status != ItemStatus::Unsold {
                return Err(AuctionError::Conflict(format!(
                    "item is {}, not unsold",
                    item.status.as_str()
                )));
            }
            item.release();
            txn.put(item)?;
            let mut effects = Effects::default();
            effects.invalidate(keys::LISTINGS);
            Ok(effects)
        })?;
        debug!(item = %item_id, "unsold item returned to listings");
        self.apply(effects).await;
        Ok(())
    }
}

/// Auction that the engine may act on. Tombstoned auctions are invisible.
pub(crate) fn load_auction(txn: &mut Txn<'_>, id: AuctionId) -> AuctionResult<Auction> {
    let auction: Auction = txn.require(&Key::Auction(id), id)?;
    if auction.deleted {
        return Err(AuctionError::not_found("auction", id));
    }
    Ok(auction)
}

pub(crate) fn live_session(
    txn: &mut Txn<'_>,
    auction: AuctionId,
) -> AuctionResult<Option<AuctionSession>> {
    let found = txn.scan::<AuctionSession>(|session| session.auction_id == auction)?;
    match found.into_iter().next() {
        // Re-read through the key so the session's version is guarded.
        Some(session) => txn.get::<AuctionSession>(&Key::Session(session.id)),
        None => Ok(None),
    }
}

/// Move every active participant of `session` to `left`.
pub(crate) fn release_participants(
    txn: &mut Txn<'_>,
    session: &AuctionSession,
) -> AuctionResult<usize> {
    let active = txn.scan::<AuctionParticipant>(|p| {
        p.session_id == session.id && p.status == ParticipantStatus::Active
    })?;
    let released = active.len();
    for mut participant in active {
        participant.status = ParticipantStatus::Left;
        txn.put(participant)?;
    }
    Ok(released)
}

fn validate_new_auction(request: &NewAuction) -> AuctionResult<()> {
    if request.title.trim().is_empty() {
        return Err(AuctionError::Validation("title is required".to_string()));
    }
    if request.end_time <= request.start_time {
        return Err(AuctionError::Validation(
            "end_time must be after start_time".to_string(),
        ));
    }
    if request.invite_only
        && request
            .invite_code
            .as_deref()
            .map_or(true, |code| code.trim().is_empty())
    {
        return Err(AuctionError::Validation(
            "invite-only auctions need an invite code".to_string(),
        ));
    }
    match &request.settings {
        AuctionSettings::Live(live) => {
            if live.item_ids.is_empty() {
                return Err(AuctionError::Validation(
                    "live auctions need at least one item".to_string(),
                ));
            }
            for (idx, id) in live.item_ids.iter().enumerate() {
                if live.item_ids[..idx].contains(id) {
                    return Err(AuctionError::Validation(format!("item {id} is listed twice")));
                }
            }
            if live.min_bid_increment == 0 {
                return Err(AuctionError::Validation(
                    "min_bid_increment must be positive".to_string(),
                ));
            }
        }
        AuctionSettings::Sealed(sealed) => {
            if sealed.sealed_bid_deadline <= request.start_time
                || sealed.sealed_bid_deadline > request.end_time
            {
                return Err(AuctionError::Validation(
                    "sealed_bid_deadline must fall within the auction window".to_string(),
                ));
            }
        }
        AuctionSettings::Timed(timed) => {
            if timed.min_bid_increment == 0 {
                return Err(AuctionError::Validation(
                    "min_bid_increment must be positive".to_string(),
                ));
            }
            if timed.extended_end_time.is_some() {
                return Err(AuctionError::Validation(
                    "extended_end_time is managed by the engine".to_string(),
                ));
            }
        }
    }
    Ok(())
}
