//! Bid placement and resolution for each auction protocol.
//!
//! [`AuctionEngine::place_bid`] routes a bid to the protocol the auction was
//! created with. Each protocol validates and records the bid in one unit of
//! work; the write to the item (or, for sealed bids, the auction) serializes
//! competing bids so only one of two racing decisions commits.

mod live;
mod sealed;
mod timed;

use gavel_types::{
    Auction, AuctionId, AuctionStatus, Bid, BidId, Caller, ItemId, Protocol, UserId,
};

use crate::engine::AuctionEngine;
use crate::error::{AuctionError, AuctionResult};
use crate::mutator::Txn;

#[derive(Clone, Debug)]
pub struct BidRequest {
    pub auction_id: AuctionId,
    pub item_id: ItemId,
    pub amount: u64,
    pub invite_code: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BidReceipt {
    pub bid_id: BidId,
    pub auction_id: AuctionId,
    pub item_id: ItemId,
    /// `None` for sealed bids.
    pub amount: Option<u64>,
    /// Bids are accepted until this instant: the live bidding window, the
    /// (possibly extended) timed end, or the sealed deadline.
    pub closes_at: u64,
    pub timestamp: u64,
}

impl BidReceipt {
    fn for_bid(bid: &Bid, closes_at: u64) -> Self {
        Self {
            bid_id: bid.id,
            auction_id: bid.auction_id,
            item_id: bid.item_id,
            amount: bid.amount,
            closes_at,
            timestamp: bid.timestamp,
        }
    }
}

impl AuctionEngine {
    /// Accept a bid under the auction's protocol.
    pub async fn place_bid(&self, caller: &Caller, request: BidRequest) -> AuctionResult<BidReceipt> {
        match self.auction(request.auction_id)?.protocol() {
            Protocol::Live => self.place_live_bid(caller, request).await,
            Protocol::SealedBid => self.place_sealed_bid(caller, request).await,
            Protocol::SingleTimedItem => self.place_timed_bid(caller, request).await,
        }
    }
}

/// Checks every protocol applies before looking at the bid itself.
fn ensure_accepting_bids(
    auction: &Auction,
    caller: &Caller,
    invite_code: Option<&str>,
) -> AuctionResult<()> {
    match auction.status {
        AuctionStatus::Active => {}
        AuctionStatus::Upcoming => {
            return Err(AuctionError::Validation(
                "auction has not started".to_string(),
            ))
        }
        AuctionStatus::Completed | AuctionStatus::Cancelled => {
            return Err(AuctionError::Expired(format!(
                "auction is {}",
                auction.status.as_str()
            )))
        }
    }
    if auction.is_organizer(caller.user_id) {
        return Err(AuctionError::Forbidden(
            "organizers cannot bid on their own auction".to_string(),
        ));
    }
    if !auction.invite_matches(invite_code) {
        return Err(AuctionError::Forbidden("invalid invite code".to_string()));
    }
    Ok(())
}

/// Whether `bidder` has no bid on `auction` yet.
fn first_bid_from(txn: &mut Txn<'_>, auction: AuctionId, bidder: UserId) -> AuctionResult<bool> {
    Ok(txn
        .scan::<Bid>(|bid| bid.auction_id == auction && bid.bidder_id == bidder)?
        .is_empty())
}
