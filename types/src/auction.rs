use serde::{Deserialize, Serialize};

use crate::{AuctionId, ItemId, UserId};

/// Lifecycle of an auction. Transitions only move forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuctionStatus {
    Upcoming,
    Active,
    Completed,
    Cancelled,
}

impl AuctionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuctionStatus::Upcoming => "upcoming",
            AuctionStatus::Active => "active",
            AuctionStatus::Completed => "completed",
            AuctionStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AuctionStatus::Completed | AuctionStatus::Cancelled)
    }

    /// Whether `self -> next` respects the monotonic order
    /// `upcoming -> active -> completed`, with `cancelled` reachable from
    /// any non-terminal status.
    pub fn can_transition_to(&self, next: AuctionStatus) -> bool {
        match (self, next) {
            (AuctionStatus::Upcoming, AuctionStatus::Active) => true,
            (AuctionStatus::Active, AuctionStatus::Completed) => true,
            (AuctionStatus::Upcoming | AuctionStatus::Active, AuctionStatus::Cancelled) => true,
            _ => false,
        }
    }
}

/// Bidding discipline of an auction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    Live,
    SealedBid,
    SingleTimedItem,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Live => "live",
            Protocol::SealedBid => "sealed_bid",
            Protocol::SingleTimedItem => "single_timed_item",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveSettings {
    /// Sale order. Fixed once the auction is created.
    pub item_ids: Vec<ItemId>,
    pub current_item_id: Option<ItemId>,
    pub reserve_price: u64,
    pub min_bid_increment: u64,
}

impl LiveSettings {
    /// The item sold after `current`, if any.
    pub fn next_item_after(&self, current: ItemId) -> Option<ItemId> {
        let position = self.item_ids.iter().position(|id| *id == current)?;
        self.item_ids.get(position + 1).copied()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedSettings {
    pub item_id: ItemId,
    pub reserve_price: u64,
    pub sealed_bid_deadline: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimedSettings {
    pub item_id: ItemId,
    pub reserve_price: u64,
    pub min_bid_increment: u64,
    /// Zero disables auto-extension.
    pub auto_extend_duration_ms: u64,
    pub extended_end_time: Option<u64>,
}

/// Protocol-specific settings, keyed by protocol.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AuctionSettings {
    #[serde(rename = "live")]
    Live(LiveSettings),
    #[serde(rename = "sealed_bid")]
    Sealed(SealedSettings),
    #[serde(rename = "single_timed_item")]
    Timed(TimedSettings),
}

impl AuctionSettings {
    pub fn protocol(&self) -> Protocol {
        match self {
            AuctionSettings::Live(_) => Protocol::Live,
            AuctionSettings::Sealed(_) => Protocol::SealedBid,
            AuctionSettings::Timed(_) => Protocol::SingleTimedItem,
        }
    }

    pub fn reserve_price(&self) -> u64 {
        match self {
            AuctionSettings::Live(live) => live.reserve_price,
            AuctionSettings::Sealed(sealed) => sealed.reserve_price,
            AuctionSettings::Timed(timed) => timed.reserve_price,
        }
    }

    /// Every item bound to the auction, in sale order.
    pub fn item_ids(&self) -> Vec<ItemId> {
        match self {
            AuctionSettings::Live(live) => live.item_ids.clone(),
            AuctionSettings::Sealed(sealed) => vec![sealed.item_id],
            AuctionSettings::Timed(timed) => vec![timed.item_id],
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BidStats {
    pub bid_count: u64,
    pub unique_bidders: u64,
}

impl BidStats {
    pub fn record(&mut self, first_bid_from_bidder: bool) {
        self.bid_count = self.bid_count.saturating_add(1);
        if first_bid_from_bidder {
            self.unique_bidders = self.unique_bidders.saturating_add(1);
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Auction {
    pub id: AuctionId,
    pub organizer_id: UserId,
    pub title: String,
    pub description: String,
    pub status: AuctionStatus,
    pub start_time: u64,
    pub end_time: u64,
    pub invite_only: bool,
    pub invite_code: Option<String>,
    pub settings: AuctionSettings,
    pub stats: BidStats,
    /// Tombstone consumed by listings; the engine skips deleted auctions.
    #[serde(default)]
    pub deleted: bool,
}

impl Auction {
    pub fn protocol(&self) -> Protocol {
        self.settings.protocol()
    }

    pub fn is_organizer(&self, user: UserId) -> bool {
        self.organizer_id == user
    }

    /// Invite codes only matter for invite-only auctions.
    pub fn invite_matches(&self, code: Option<&str>) -> bool {
        if !self.invite_only {
            return true;
        }
        match (self.invite_code.as_deref(), code) {
            (Some(expected), Some(given)) => expected == given,
            _ => false,
        }
    }

    /// Single item of a sealed or timed auction.
    pub fn sole_item(&self) -> Option<ItemId> {
        match &self.settings {
            AuctionSettings::Live(_) => None,
            AuctionSettings::Sealed(sealed) => Some(sealed.item_id),
            AuctionSettings::Timed(timed) => Some(timed.item_id),
        }
    }

    /// Closing deadline for sealed and timed auctions. Live auctions close
    /// when their item list is exhausted, so they have none.
    pub fn closing_deadline(&self) -> Option<u64> {
        match &self.settings {
            AuctionSettings::Live(_) => None,
            AuctionSettings::Sealed(sealed) => Some(sealed.sealed_bid_deadline),
            AuctionSettings::Timed(timed) => Some(timed.extended_end_time.unwrap_or(self.end_time)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn live(items: Vec<ItemId>) -> LiveSettings {
        LiveSettings {
            item_ids: items,
            current_item_id: None,
            reserve_price: 0,
            min_bid_increment: 1,
        }
    }

    #[test]
    fn status_is_monotonic() {
        assert!(AuctionStatus::Upcoming.can_transition_to(AuctionStatus::Active));
        assert!(AuctionStatus::Active.can_transition_to(AuctionStatus::Completed));
        assert!(!AuctionStatus::Active.can_transition_to(AuctionStatus::Upcoming));
        assert!(!AuctionStatus::Completed.can_transition_to(AuctionStatus::Active));
        assert!(!AuctionStatus::Completed.can_transition_to(AuctionStatus::Cancelled));
        assert!(!AuctionStatus::Active.can_transition_to(AuctionStatus::Active));
    }

    #[test]
    fn next_item_follows_sale_order() {
        let (a, b, c) = (ItemId::new(), ItemId::new(), ItemId::new());
        let settings = live(vec![a, b, c]);
        assert_eq!(settings.next_item_after(a), Some(b));
        assert_eq!(settings.next_item_after(b), Some(c));
        assert_eq!(settings.next_item_after(c), None);
        assert_eq!(settings.next_item_after(ItemId::new()), None);
    }

    #[test]
    fn settings_tag_matches_protocol_name() {
        let settings = AuctionSettings::Sealed(SealedSettings {
            item_id: ItemId::new(),
            reserve_price: 100,
            sealed_bid_deadline: 5,
        });
        let json = serde_json::to_value(&settings).unwrap();
        assert_eq!(json["type"], "sealed_bid");
        assert_eq!(json["type"], settings.protocol().as_str());
    }
}
