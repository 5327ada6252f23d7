use gavel_types::{
    AuctionEvent, AuctionParticipant, AuctionSettings, Bid, Caller, Item, ParticipantStatus,
    SessionStatus, Topic,
};
use tracing::debug;

use super::{ensure_accepting_bids, first_bid_from, BidReceipt, BidRequest};
use crate::engine::{live_session, load_auction, AuctionEngine, Effects};
use crate::error::{AuctionError, AuctionResult};
use crate::settlement::{bids_for, highest_amount};
use crate::store::Key;
use crate::validator::check_ascending_bid;

impl AuctionEngine {
    /// Ascending bid on the session's current item. An accepted bid pushes
    /// the bidding window out to `now + live_bid_extension_ms`.
    pub(crate) async fn place_live_bid(
        &self,
        caller: &Caller,
        request: BidRequest,
    ) -> AuctionResult<BidReceipt> {
        let now = self.now();
        let extension = self.config.live_bid_extension_ms;
        let (receipt, effects) = self.mutator.run(|txn| {
            let mut auction = load_auction(txn, request.auction_id)?;
            ensure_accepting_bids(&auction, caller, request.invite_code.as_deref())?;
            let AuctionSettings::Live(live) = &auction.settings else {
                return Err(AuctionError::Validation("not a live auction".to_string()));
            };
            let increment = live.min_bid_increment;
            let current_item = live.current_item_id;

            let mut session = live_session(txn, auction.id)?
                .ok_or_else(|| AuctionError::not_found("session", auction.id))?;
            match session.status {
                SessionStatus::Active => {}
                SessionStatus::Pending => {
                    return Err(AuctionError::Validation("session has not started".to_string()))
                }
                status => {
                    return Err(AuctionError::Expired(format!("session is {}", status.as_str())))
                }
            }
            if !session.window_open(now) {
                return Err(AuctionError::Expired("bidding window has closed".to_string()));
            }

            let mut participant: AuctionParticipant = txn
                .get(&Key::Participant(session.id, caller.user_id))?
                .filter(|p: &AuctionParticipant| p.status == ParticipantStatus::Active)
                .ok_or_else(|| {
                    AuctionError::Forbidden("not an active participant of this session".to_string())
                })?;

            if current_item != Some(request.item_id) {
                return Err(AuctionError::Conflict(
                    "item is not the session's current item".to_string(),
                ));
            }
            let mut item: Item = txn.require(&Key::Item(request.item_id), request.item_id)?;
            if !item.is_held_by(auction.id) {
                return Err(AuctionError::Conflict(
                    "item is no longer open for bidding".to_string(),
                ));
            }

            let bids = bids_for(txn, auction.id, item.id)?;
            check_ascending_bid(request.amount, highest_amount(&bids), item.starting_bid, increment)?;

            let first = first_bid_from(txn, auction.id, caller.user_id)?;
            let bid = Bid::plaintext(
                auction.id,
                Some(session.id),
                item.id,
                caller.user_id,
                request.amount,
                now,
            );
            let window = now.saturating_add(extension);
            item.current_bid = request.amount;
            auction.stats.record(first);
            session.bidding_window = Some(window);
            participant.last_activity = now;

            let mut effects = Effects::default();
            effects.emit(
                Topic::Session(session.id),
                AuctionEvent::BidPlaced {
                    session_id: Some(session.id),
                    item_id: item.id,
                    bidder_id: caller.user_id,
                    amount: request.amount,
                    bidding_window: window,
                },
            );
            effects.invalidate_auction(auction.id);

            let receipt = BidReceipt::for_bid(&bid, window);
            txn.insert(bid);
            txn.put(item)?;
            txn.put(auction)?;
            txn.put(session)?;
            txn.put(participant)?;
            Ok((receipt, effects))
        })?;
        debug!(
            auction = %receipt.auction_id,
            item = %receipt.item_id,
            amount = request.amount,
            "live bid accepted"
        );
        self.apply(effects).await;
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use crate::error::AuctionError;
    use crate::mocks::TestHarness;
    use crate::protocols::BidRequest;
    use gavel_types::{Caller, ParticipantStatus, UserId};

    async fn open_session(harness: &TestHarness) -> (gavel_types::Auction, gavel_types::Item, Caller) {
        let organizer = Caller::user(UserId::new());
        let item = harness.seed_item(100);
        let created = harness.live_auction(&organizer, &[item.clone()], 0, 10).await;
        harness.activate(created.auction.id).await;
        let bidder = Caller::user(UserId::new());
        let session = harness.session(created.auction.id);
        harness
            .engine
            .join_session(&bidder, &session.session_code, None)
            .await
            .unwrap();
        (created.auction, item, bidder)
    }

    fn bid(auction: &gavel_types::Auction, item: &gavel_types::Item, amount: u64) -> BidRequest {
        BidRequest {
            auction_id: auction.id,
            item_id: item.id,
            amount,
            invite_code: None,
        }
    }

    #[tokio::test]
    async fn accepted_bid_extends_the_window() {
        let harness = TestHarness::new();
        let (auction, item, bidder) = open_session(&harness).await;

        let now = harness.clock.advance(5_000);
        let receipt = harness.engine.place_bid(&bidder, bid(&auction, &item, 110)).await.unwrap();
        assert_eq!(receipt.closes_at, now + 30_000);
        assert_eq!(harness.session(auction.id).bidding_window, Some(now + 30_000));
        assert_eq!(harness.item(item.id).current_bid, 110);
        assert_eq!(harness.auction(auction.id).stats.bid_count, 1);
        assert_eq!(harness.notifier.names().last(), Some(&"bidPlaced"));
    }

    #[tokio::test]
    async fn underbid_names_the_minimum() {
        let harness = TestHarness::new();
        let (auction, item, bidder) = open_session(&harness).await;
        let err = harness.engine.place_bid(&bidder, bid(&auction, &item, 105)).await.unwrap_err();
        assert!(matches!(err, AuctionError::BidTooLow { minimum: 110, offered: 105 }));
    }

    #[tokio::test]
    async fn non_participants_and_late_bids_are_refused() {
        let harness = TestHarness::new();
        let (auction, item, bidder) = open_session(&harness).await;

        let outsider = Caller::user(UserId::new());
        let err = harness.engine.place_bid(&outsider, bid(&auction, &item, 200)).await.unwrap_err();
        assert!(matches!(err, AuctionError::Forbidden(_)));

        harness.clock.advance(60_001);
        let err = harness.engine.place_bid(&bidder, bid(&auction, &item, 200)).await.unwrap_err();
        assert!(matches!(err, AuctionError::Expired(_)));
    }

    #[tokio::test]
    async fn bidding_touches_participant_activity() {
        let harness = TestHarness::new();
        let (auction, item, bidder) = open_session(&harness).await;
        let now = harness.clock.advance(1_000);
        harness.engine.place_bid(&bidder, bid(&auction, &item, 150)).await.unwrap();
        let session = harness.session(auction.id);
        let participant = harness.participant(session.id, bidder.user_id);
        assert_eq!(participant.status, ParticipantStatus::Active);
        assert_eq!(participant.last_activity, now);
    }
}
