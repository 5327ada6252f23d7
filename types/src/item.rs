use serde::{Deserialize, Serialize};

use crate::{AuctionId, ItemId, UserId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Available,
    InAuction,
    Sold,
    Unsold,
    PendingApproval,
    Rejected,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Available => "available",
            ItemStatus::InAuction => "in_auction",
            ItemStatus::Sold => "sold",
            ItemStatus::Unsold => "unsold",
            ItemStatus::PendingApproval => "pending_approval",
            ItemStatus::Rejected => "rejected",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub title: String,
    pub status: ItemStatus,
    pub starting_bid: u64,
    /// Never below `starting_bid`.
    pub current_bid: u64,
    pub winner_id: Option<UserId>,
    pub final_price: Option<u64>,
    /// Auction currently holding the item in `in_auction`.
    pub held_by: Option<AuctionId>,
}

impl Item {
    pub fn new(title: impl Into<String>, starting_bid: u64) -> Self {
        Self {
            id: ItemId::new(),
            title: title.into(),
            status: ItemStatus::Available,
            starting_bid,
            current_bid: starting_bid,
            winner_id: None,
            final_price: None,
            held_by: None,
        }
    }

    pub fn is_held_by(&self, auction: AuctionId) -> bool {
        self.status == ItemStatus::InAuction && self.held_by == Some(auction)
    }

    /// Bind to `auction`, resetting any state left from a previous listing.
    pub fn bind(&mut self, auction: AuctionId) {
        self.status = ItemStatus::InAuction;
        self.held_by = Some(auction);
        self.current_bid = self.starting_bid;
        self.winner_id = None;
        self.final_price = None;
    }

    /// Return to the listing pool so the item can be relisted.
    pub fn release(&mut self) {
        self.status = ItemStatus::Available;
        self.held_by = None;
        self.current_bid = self.starting_bid;
        self.winner_id = None;
        self.final_price = None;
    }
}
