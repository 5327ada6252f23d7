use serde::{Deserialize, Serialize};

use crate::{AuctionId, BidId, ItemId, SessionId, UserId};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bid {
    pub id: BidId,
    pub auction_id: AuctionId,
    pub session_id: Option<SessionId>,
    pub item_id: ItemId,
    pub bidder_id: UserId,
    /// Plaintext amount. Sealed bids only get one once revealed.
    pub amount: Option<u64>,
    pub encrypted_amount: Option<String>,
    pub is_winner: bool,
    pub timestamp: u64,
}

impl Bid {
    pub fn plaintext(
        auction_id: AuctionId,
        session_id: Option<SessionId>,
        item_id: ItemId,
        bidder_id: UserId,
        amount: u64,
        timestamp: u64,
    ) -> Self {
        Self {
            id: BidId::new(),
            auction_id,
            session_id,
            item_id,
            bidder_id,
            amount: Some(amount),
            encrypted_amount: None,
            is_winner: false,
            timestamp,
        }
    }

    pub fn sealed(
        auction_id: AuctionId,
        item_id: ItemId,
        bidder_id: UserId,
        encrypted_amount: String,
        timestamp: u64,
    ) -> Self {
        Self {
            id: BidId::new(),
            auction_id,
            session_id: None,
            item_id,
            bidder_id,
            amount: None,
            encrypted_amount: Some(encrypted_amount),
            is_winner: false,
            timestamp,
        }
    }

    pub fn is_for(&self, auction: AuctionId, item: ItemId) -> bool {
        self.auction_id == auction && self.item_id == item
    }
}
