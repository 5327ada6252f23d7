//! Sealed-bid protocol.
//!
//! Amounts are sealed before they touch the store and stay hidden until the
//! deadline passes. Resolution opens every bid, writes the plaintext back,
//! and puts forward the bid closest to the reserve price (earliest commit on
//! ties). That candidate wins only if it also meets the reserve.

use gavel_types::{AuctionEvent, AuctionId, AuctionSettings, AuctionStatus, Bid, Caller, Item, Topic};
use tracing::{debug, info};

use super::{ensure_accepting_bids, first_bid_from, BidReceipt, BidRequest};
use crate::codec::SealContext;
use crate::engine::{load_auction, AuctionEngine, Effects};
use crate::error::{AuctionError, AuctionResult};
use crate::settlement::{bids_for, settle, Settlement};
use crate::store::Key;
use crate::validator::check_sealed_bid;

impl AuctionEngine {
    pub(crate) async fn place_sealed_bid(
        &self,
        caller: &Caller,
        request: BidRequest,
    ) -> AuctionResult<BidReceipt> {
        check_sealed_bid(request.amount)?;
        let now = self.now();
        let sealed_amount = self.codec.seal(
            &SealContext {
                auction_id: request.auction_id,
                item_id: request.item_id,
                bidder_id: caller.user_id,
            },
            request.amount,
        )?;

        let (receipt, effects) = self.mutator.run(|txn| {
            let mut auction = load_auction(txn, request.auction_id)?;
            ensure_accepting_bids(&auction, caller, request.invite_code.as_deref())?;
            let AuctionSettings::Sealed(sealed) = &auction.settings else {
                return Err(AuctionError::Validation("not a sealed-bid auction".to_string()));
            };
            let deadline = sealed.sealed_bid_deadline;
            if sealed.item_id != request.item_id {
                return Err(AuctionError::Validation(
                    "item is not part of this auction".to_string(),
                ));
            }
            if now >= deadline {
                return Err(AuctionError::Expired(
                    "sealed bid deadline has passed".to_string(),
                ));
            }
            let item: Item = txn.require(&Key::Item(request.item_id), request.item_id)?;
            if !item.is_held_by(auction.id) {
                return Err(AuctionError::Conflict(
                    "item is no longer open for bidding".to_string(),
                ));
            }

            let first = first_bid_from(txn, auction.id, caller.user_id)?;
            let bid = Bid::sealed(
                auction.id,
                item.id,
                caller.user_id,
                sealed_amount.clone(),
                now,
            );
            auction.stats.record(first);

            let mut effects = Effects::default();
            effects.emit(
                Topic::Auction(auction.id),
                AuctionEvent::SealedBidReceived {
                    auction_id: auction.id,
                    item_id: item.id,
                    bid_count: auction.stats.bid_count,
                },
            );
            effects.invalidate(crate::cache::keys::auction(auction.id));

            let receipt = BidReceipt::for_bid(&bid, deadline);
            txn.insert(bid);
            txn.put(auction)?;
            Ok((receipt, effects))
        })?;
        debug!(auction = %receipt.auction_id, "sealed bid accepted");
        self.apply(effects).await;
        Ok(receipt)
    }

    /// Organizer-triggered reveal once the sealed deadline has passed.
    pub async fn reveal_sealed(&self, caller: &Caller, auction_id: AuctionId) -> AuctionResult<Settlement> {
        let auction = self.auction(auction_id)?;
        if !caller.may_manage(&auction) {
            return Err(AuctionError::Forbidden(
                "only the organizer can reveal sealed bids".to_string(),
            ));
        }
        if let Some(deadline) = auction.closing_deadline() {
            if self.now() < deadline {
                return Err(AuctionError::Validation(
                    "sealed bids cannot be revealed before the deadline".to_string(),
                ));
            }
        }
        self.resolve_sealed(auction_id).await
    }

    pub(crate) async fn resolve_sealed(&self, auction_id: AuctionId) -> AuctionResult<Settlement> {
        let now = self.now();
        let (settlement, effects) = self.mutator.run(|txn| {
            let mut auction = load_auction(txn, auction_id)?;
            if auction.status != AuctionStatus::Active {
                return Err(AuctionError::Conflict(format!(
                    "auction is {}, not active",
                    auction.status.as_str()
                )));
            }
            let AuctionSettings::Sealed(sealed) = &auction.settings else {
                return Err(AuctionError::Validation("not a sealed-bid auction".to_string()));
            };
            let reserve = sealed.reserve_price;
            let item_id = sealed.item_id;
            if now < sealed.sealed_bid_deadline {
                return Err(AuctionError::Validation(
                    "sealed bid deadline has not passed".to_string(),
                ));
            }
            let item: Item = txn.require(&Key::Item(item_id), item_id)?;
            if !item.is_held_by(auction_id) {
                return Err(AuctionError::Conflict(format!(
                    "item is {}, not in auction",
                    item.status.as_str()
                )));
            }

            let mut revealed = Vec::new();
            for mut bid in bids_for(txn, auction_id, item_id)? {
                let Some(sealed_amount) = bid.encrypted_amount.as_deref() else {
                    continue;
                };
                let amount = self.codec.open(
                    &SealContext {
                        auction_id,
                        item_id,
                        bidder_id: bid.bidder_id,
                    },
                    sealed_amount,
                )?;
                bid.amount = Some(amount);
                txn.put(bid.clone())?;
                revealed.push(bid);
            }

            let candidate = closest_to_reserve(revealed, reserve);
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
            "sealed auction resolved"
        );
        self.apply(effects).await;
        Ok(settlement)
    }
}

/// Revealed bid whose amount is nearest `reserve`; the earliest one wins ties.
fn closest_to_reserve(bids: Vec<Bid>, reserve: u64) -> Option<Bid> {
    bids.into_iter()
        .filter(|bid| bid.amount.is_some())
        .min_by_key(|bid| bid.amount.unwrap_or_default().abs_diff(reserve))
}
