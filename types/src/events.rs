use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{AuctionId, ItemId, SessionId, UserId};

/// Channel an event is published on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Topic {
    Session(SessionId),
    Auction(AuctionId),
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::Session(id) => write!(f, "session:{id}"),
            Topic::Auction(id) => write!(f, "auction:{id}"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Sold,
    Unsold,
}

/// Variant tags are camelCase; fields keep their snake_case names on the wire.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum AuctionEvent {
    BidPlaced {
        #[serde(skip_serializing_if = "Option::is_none")]
        session_id: Option<SessionId>,
        item_id: ItemId,
        bidder_id: UserId,
        amount: u64,
        bidding_window: u64,
    },
    ItemChanged {
        session_id: SessionId,
        current_item_id: ItemId,
        bidding_window: u64,
    },
    SessionEnded {
        session_id: SessionId,
    },
    SealedBidReceived {
        auction_id: AuctionId,
        item_id: ItemId,
        bid_count: u64,
    },
    AuctionClosed {
        auction_id: AuctionId,
        item_id: ItemId,
        outcome: Outcome,
        #[serde(skip_serializing_if = "Option::is_none")]
        final_price: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        winner_id: Option<UserId>,
    },
}

impl AuctionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            AuctionEvent::BidPlaced { .. } => "bidPlaced",
            AuctionEvent::ItemChanged { .. } => "itemChanged",
            AuctionEvent::SessionEnded { .. } => "sessionEnded",
            AuctionEvent::SealedBidReceived { .. } => "sealedBidReceived",
            AuctionEvent::AuctionClosed { .. } => "auctionClosed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bid_placed_uses_wire_names() {
        let session_id = SessionId::new();
        let event = AuctionEvent::BidPlaced {
            session_id: Some(session_id),
            item_id: ItemId::new(),
            bidder_id: UserId::new(),
            amount: 110,
            bidding_window: 30_000,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "bidPlaced");
        assert_eq!(value["session_id"], session_id.to_string());
        assert_eq!(value["amount"], 110);
        assert_eq!(value["bidding_window"], 30_000);
        assert!(value.get("sessionId").is_none());
        assert_eq!(value["type"], event.name());
    }

    #[test]
    fn timed_bids_omit_session() {
        let event = AuctionEvent::BidPlaced {
            session_id: None,
            item_id: ItemId::new(),
            bidder_id: UserId::new(),
            amount: 1,
            bidding_window: 2,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert!(value.get("session_id").is_none());
    }

    #[test]
    fn item_changed_keeps_snake_case_fields() {
        let session_id = SessionId::new();
        let current_item_id = ItemId::new();
        let event = AuctionEvent::ItemChanged {
            session_id,
            current_item_id,
            bidding_window: 5,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "itemChanged");
        assert_eq!(value["current_item_id"], current_item_id.to_string());
        assert_eq!(value["bidding_window"], 5);
        assert!(value.get("currentItemId").is_none());

        let ended = serde_json::to_value(AuctionEvent::SessionEnded { session_id }).unwrap();
        assert_eq!(ended["type"], "sessionEnded");
        assert_eq!(ended["session_id"], session_id.to_string());
    }

    #[test]
    fn topics_are_scoped() {
        let id = SessionId::new();
        assert_eq!(Topic::Session(id).to_string(), format!("session:{id}"));
    }
}
