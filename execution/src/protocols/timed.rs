//! Single timed item: ascending bids until a deadline that late bids push
//! back (anti-sniping).

use gavel_types::{AuctionEvent, AuctionId, AuctionSettings, AuctionStatus, Bid, Caller, Item, Topic};
use tracing::{debug, info};

use super::{ensure_accepting_bids, first_bid_from, BidReceipt, BidRequest};
use crate::engine::{load_auction, AuctionEngine, Effects};
use crate::error::{AuctionError, AuctionResult};
use crate::settlement::{bids_for, highest_amount, highest_bid, settle, Settlement};
use crate::store::Key;
use crate::validator::check_ascending_bid;

/// Deadline after a bid at `now`: pushed back by `auto_extend` when the bid
/// lands within `auto_extend` of the current deadline.
pub(crate) fn extended_deadline(deadline: u64, now: u64, auto_extend: u64) -> Option<u64> {
    if auto_extend == 0 || deadline.saturating_sub(now) > auto_extend {
        return None;
    }
    Some(deadline.saturating_add(auto_extend))
}

impl AuctionEngine {
    pub(crate) async fn place_timed_bid(
        &self,
        caller: &Caller,
        request: BidRequest,
    ) -> AuctionResult<BidReceipt> {
        let now = self.now();
        let (receipt, extended, effects) = self.mutator.run(|txn| {
            let mut auction = load_auction(txn, request.auction_id)?;
            ensure_accepting_bids(&auction, caller, request.invite_code.as_deref())?;
            let deadline = auction.closing_deadline().unwrap_or(auction.end_time);
            let AuctionSettings::Timed(timed) = &mut auction.settings else {
                return Err(AuctionError::Validation("not a timed auction".to_string()));
            };
            if timed.item_id != request.item_id {
                return Err(AuctionError::Validation(
                    "item is not part of this auction".to_string(),
                ));
            }
            if now > deadline {
                return Err(AuctionError::Expired("auction has ended".to_string()));
            }
            let increment = timed.min_bid_increment;
            let extended = extended_deadline(deadline, now, timed.auto_extend_duration_ms);
            if let Some(extended) = extended {
                timed.extended_end_time = Some(extended);
            }
            let closes_at = extended.unwrap_or(deadline);

            let mut item: Item = txn.require(&Key::Item(request.item_id), request.item_id)?;
            if !item.is_held_by(auction.id) {
                return Err(AuctionError::Conflict(
                    "item is no longer open for bidding".to_string(),
                ));
            }
            let bids = bids_for(txn, auction.id, item.id)?;
            check_ascending_bid(request.amount, highest_amount(&bids), item.starting_bid, increment)?;

            let first = first_bid_from(txn, auction.id, caller.user_id)?;
            let bid = Bid::plaintext(auction.id, None, item.id, caller.user_id, request.amount, now);
            item.current_bid = request.amount;
            auction.stats.record(first);

            let mut effects = Effects::default();
            effects.emit(
                Topic::Auction(auction.id),
                AuctionEvent::BidPlaced {
                    session_id: None,
                    item_id: item.id,
                    bidder_id: caller.user_id,
                    amount: request.amount,
                    bidding_window: closes_at,
                },
            );
            effects.invalidate_auction(auction.id);

            let receipt = BidReceipt::for_bid(&bid, closes_at);
            txn.insert(bid);
            txn.put(item)?;
            txn.put(auction)?;
            Ok((receipt, extended, effects))
        })?;
        if let Some(deadline) = extended {
            debug!(auction = %receipt.auction_id, deadline, "timed auction extended");
        }
        self.apply(effects).await;
        Ok(receipt)
    }

    /// Close a timed auction whose (possibly extended) deadline has passed.
    pub(crate) async fn resolve_timed(&self, auction_id: AuctionId) -> AuctionResult<Settlement> {
        let now = self.now();
        let (settlement, effects) = self.mutator.run(|txn| {
            let mut auction = load_auction(txn, auction_id)?;
            if auction.status != AuctionStatus::Active {
                return Err(AuctionError::Conflict(format!(
                    "auction is {}, not active",
                    auction.status.as_str()
                )));
            }
            let deadline = auction.closing_deadline().unwrap_or(auction.end_time);
            let AuctionSettings::Timed(timed) = &auction.settings else {
                return Err(AuctionError::Validation("not a timed auction".to_string()));
            };
            let (item_id, reserve) = (timed.item_id, timed.reserve_price);
            if now <= deadline {
                return Err(AuctionError::Conflict(
                    "deadline was extended by a late bid".to_string(),
                ));
            }
            let item: Item = txn.require(&Key::Item(item_id), item_id)?;
            if !item.is_held_by(auction_id) {
                return Err(AuctionError::Conflict(format!(
                    "item is {}, not in auction",
                    item.status.as_str()
                )));
            }

            let candidate = highest_bid(bids_for(txn, auction_id, item_id)?);
            let settlement = settle(txn, item, candidate, reserve)?;
            auction.status = AuctionStatus::Completed;
            txn.put(auction)?;

            let mut effects = Effects::default();
            effects.emit(Topic::Auction(auction_id), settlement.closed_event(auction_id));
            effects.invalidate_auction(auction_id);
            Ok((settlement, effects))
        })?;
        info!(
            auction = %auction_id,
            outcome = ?settlement.outcome,
            final_price = ?settlement.final_price,
            "timed auction resolved"
        );
        self.apply(effects).await;
        Ok(settlement)
    }
}
