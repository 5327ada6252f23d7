//! Live session sequencing: settle the current item, then open the next one
//! or end the session.
//!
//! The scheduler and the organizer both advance sessions through
//! [`AuctionEngine::settle_and_advance`]; they differ only in the checks
//! made before settling. Settlement and the move to the next item commit
//! together, so an item is never left settled with the session still
//! pointing at it.

use gavel_types::{
    AuctionEvent, AuctionId, AuctionSettings, AuctionStatus, Caller, Item, ItemId, SessionStatus,
    Topic,
};
use tracing::info;

use crate::engine::{live_session, load_auction, release_participants, AuctionEngine, Effects};
use crate::error::{AuctionError, AuctionResult};
use crate::settlement::{bids_for, highest_bid, settle, Settlement};
use crate::store::Key;

#[derive(Clone, Copy, Debug)]
pub enum AdvanceTrigger<'a> {
    /// The bidding window lapsed; re-checked at commit time.
    Scheduler,
    /// The organizer closed the current item early.
    Organizer(&'a Caller),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Advance {
    NextItem {
        settled: Settlement,
        current_item_id: ItemId,
        bidding_window: u64,
    },
    SessionEnded {
        settled: Settlement,
    },
}

impl Advance {
    pub fn settled(&self) -> &Settlement {
        match self {
            Advance::NextItem { settled, .. } | Advance::SessionEnded { settled } => settled,
        }
    }
}

impl AuctionEngine {
    /// Close the current item now and move the session on.
    pub async fn advance_live_item(&self, caller: &Caller, auction_id: AuctionId) -> AuctionResult<Advance> {
        self.settle_and_advance(auction_id, AdvanceTrigger::Organizer(caller))
            .await
    }

    pub async fn settle_and_advance(
        &self,
        auction_id: AuctionId,
        trigger: AdvanceTrigger<'_>,
    ) -> AuctionResult<Advance> {
        let now = self.now();
        let lookahead = self.config.item_lookahead_ms;
        let (advance, effects) = self.mutator.run(|txn| {
            let mut auction = load_auction(txn, auction_id)?;
            if let AdvanceTrigger::Organizer(caller) = trigger {
                if !caller.may_manage(&auction) {
                    return Err(AuctionError::Forbidden(
                        "only the organizer can advance the session".to_string(),
                    ));
                }
            }
            if auction.status != AuctionStatus::Active {
                return Err(AuctionError::Conflict(format!(
                    "auction is {}, not active",
                    auction.status.as_str()
                )));
            }
            let reserve = auction.settings.reserve_price();
            let AuctionSettings::Live(live) = &mut auction.settings else {
                return Err(AuctionError::Validation("not a live auction".to_string()));
            };
            let current = live
                .current_item_id
                .ok_or_else(|| AuctionError::Conflict("session has no current item".to_string()))?;

            let mut session = live_session(txn, auction_id)?
                .ok_or_else(|| AuctionError::not_found("session", auction_id))?;
            if session.status != SessionStatus::Active {
                return Err(AuctionError::Conflict(format!(
                    "session is {}, not active",
                    session.status.as_str()
                )));
            }
            if matches!(trigger, AdvanceTrigger::Scheduler)
                && session.bidding_window.is_some_and(|window| window > now)
            {
                return Err(AuctionError::Conflict(
                    "bidding window was extended".to_string(),
                ));
            }

            let item: Item = txn.require(&Key::Item(current), current)?;
            if !item.is_held_by(auction_id) {
                return Err(AuctionError::Conflict(format!(
                    "current item is already {}",
                    item.status.as_str()
                )));
            }
            let candidate = highest_bid(bids_for(txn, auction_id, current)?);
            let settled = settle(txn, item, candidate, reserve)?;

            let mut effects = Effects::default();
            let advance = match live.next_item_after(current) {
                Some(next) => {
                    let window = now.saturating_add(lookahead);
                    live.current_item_id = Some(next);
                    session.bidding_window = Some(window);
                    effects.emit(
                        Topic::Session(session.id),
                        AuctionEvent::ItemChanged {
                            session_id: session.id,
                            current_item_id: next,
                            bidding_window: window,
                        },
                    );
                    Advance::NextItem {
                        settled,
                        current_item_id: next,
                        bidding_window: window,
                    }
                }
                None => {
                    auction.status = AuctionStatus::Completed;
                    session.status = SessionStatus::Completed;
                    session.actual_end_time = Some(now);
                    release_participants(txn, &session)?;
                    effects.emit(
                        Topic::Session(session.id),
                        AuctionEvent::SessionEnded {
                            session_id: session.id,
                        },
                    );
                    Advance::SessionEnded { settled }
                }
            };
            effects.invalidate_auction(auction_id);
            txn.put(session)?;
            txn.put(auction)?;
            Ok((advance, effects))
        })?;
        match &advance {
            Advance::NextItem { settled, current_item_id, .. } => info!(
                auction = %auction_id,
                settled = %settled.item_id,
                outcome = ?settled.outcome,
                next = %current_item_id,
                "live item advanced"
            ),
            Advance::SessionEnded { settled } => info!(
                auction = %auction_id,
                settled = %settled.item_id,
                outcome = ?settled.outcome,
                "live session ended"
            ),
        }
        self.apply(effects).await;
        Ok(advance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::TestHarness;
    use crate::protocols::BidRequest;
    use gavel_types::{ItemStatus, Outcome, ParticipantStatus, UserId};

    #[tokio::test]
    async fn items_are_sold_in_order_then_the_session_ends() {
        let harness = TestHarness::new();
        let organizer = Caller::user(UserId::new());
        let items: Vec<Item> = (0..3).map(|_| harness.seed_item(100)).collect();
        let created = harness.live_auction(&organizer, &items, 0, 10).await;
        harness.activate(created.auction.id).await;
        let session = harness.session(created.auction.id);
        let bidder = Caller::user(UserId::new());
        harness
            .engine
            .join_session(&bidder, &session.session_code, None)
            .await
            .unwrap();

        harness
            .engine
            .place_bid(
                &bidder,
                BidRequest {
                    auction_id: created.auction.id,
                    item_id: items[0].id,
                    amount: 120,
                    invite_code: None,
                },
            )
            .await
            .unwrap();

        let first = harness
            .engine
            .advance_live_item(&organizer, created.auction.id)
            .await
            .unwrap();
        assert_eq!(first.settled().outcome, Outcome::Sold);
        assert!(matches!(first, Advance::NextItem { current_item_id, .. } if current_item_id == items[1].id));

        let second = harness
            .engine
            .advance_live_item(&organizer, created.auction.id)
            .await
            .unwrap();
        assert_eq!(second.settled().outcome, Outcome::Unsold);

        let last = harness
            .engine
            .advance_live_item(&organizer, created.auction.id)
            .await
            .unwrap();
        assert!(matches!(last, Advance::SessionEnded { .. }));

        assert_eq!(harness.item(items[0].id).status, ItemStatus::Sold);
        assert_eq!(harness.item(items[1].id).status, ItemStatus::Unsold);
        assert_eq!(harness.auction(created.auction.id).status, AuctionStatus::Completed);
        let session = harness.session(created.auction.id);
        assert_eq!(session.status, SessionStatus::Completed);
        assert!(session.actual_end_time.is_some());
        assert_eq!(
            harness.participant(session.id, bidder.user_id).status,
            ParticipantStatus::Left
        );
        assert_eq!(
            harness.notifier.names(),
            vec!["itemChanged", "bidPlaced", "itemChanged", "itemChanged", "sessionEnded"]
        );
    }

    #[tokio::test]
    async fn scheduler_waits_for_the_window_to_lapse() {
        let harness = TestHarness::new();
        let organizer = Caller::user(UserId::new());
        let item = harness.seed_item(100);
        let created = harness.live_auction(&organizer, &[item], 0, 10).await;
        harness.activate(created.auction.id).await;

        let err = harness
            .engine
            .settle_and_advance(created.auction.id, AdvanceTrigger::Scheduler)
            .await
            .unwrap_err();
        assert!(err.is_retryable());

        harness.clock.advance(60_000);
        let advance = harness
            .engine
            .settle_and_advance(created.auction.id, AdvanceTrigger::Scheduler)
            .await
            .unwrap();
        assert!(matches!(advance, Advance::SessionEnded { .. }));
    }

    #[tokio::test]
    async fn only_the_organizer_may_advance() {
        let harness = TestHarness::new();
        let organizer = Caller::user(UserId::new());
        let item = harness.seed_item(100);
        let created = harness.live_auction(&organizer, &[item], 0, 10).await;
        harness.activate(created.auction.id).await;
        let err = harness
            .engine
            .advance_live_item(&Caller::user(UserId::new()), created.auction.id)
            .await
            .unwrap_err();
        assert!(matches!(err, AuctionError::Forbidden(_)));
    }
}
