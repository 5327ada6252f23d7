//! Per-item standings, served through the read cache.

use gavel_types::{AuctionId, AuctionStatus, Bid, Item, ItemId, Protocol, UserId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

use crate::cache::keys;
use crate::engine::AuctionEngine;
use crate::error::{AuctionError, AuctionResult};
use crate::store::{Key, StoreExt};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub bidder_id: UserId,
    pub amount: u64,
    pub bid_count: u64,
    pub is_winner: bool,
    pub last_bid_at: u64,
}

/// Best bid per bidder, highest first; equal amounts rank by who got there first.
fn rank(bids: &[Bid]) -> Vec<LeaderboardEntry> {
    let mut by_bidder: HashMap<UserId, (LeaderboardEntry, u64)> = HashMap::new();
    for bid in bids {
        let Some(amount) = bid.amount else { continue };
        let (entry, reached_at) = by_bidder.entry(bid.bidder_id).or_insert((
            LeaderboardEntry {
                bidder_id: bid.bidder_id,
                amount,
                bid_count: 0,
                is_winner: false,
                last_bid_at: bid.timestamp,
            },
            bid.timestamp,
        ));
        entry.bid_count += 1;
        entry.is_winner |= bid.is_winner;
        entry.last_bid_at = entry.last_bid_at.max(bid.timestamp);
        if amount > entry.amount {
            entry.amount = amount;
            *reached_at = bid.timestamp;
        }
    }
    let mut ranked: Vec<_> = by_bidder.into_values().collect();
    ranked.sort_by(|(a, a_at), (b, b_at)| b.amount.cmp(&a.amount).then(a_at.cmp(b_at)));
    ranked.into_iter().map(|(entry, _)| entry).collect()
}

impl AuctionEngine {
    /// Standings for one item. Sealed amounts stay hidden until revealed.
    pub async fn leaderboard(
        &self,
        auction_id: AuctionId,
        item_id: ItemId,
    ) -> AuctionResult<Vec<LeaderboardEntry>> {
        let auction = self.auction(auction_id)?;
        if !auction.settings.item_ids().contains(&item_id) {
            return Err(AuctionError::not_found("item", item_id));
        }
        if auction.protocol() == Protocol::SealedBid
            && matches!(auction.status, AuctionStatus::Upcoming | AuctionStatus::Active)
        {
            return Err(AuctionError::Forbidden(
                "sealed bids are hidden until they are revealed".to_string(),
            ));
        }

        let version = self
            .store()
            .fetch::<Item>(&Key::Item(item_id))?
            .ok_or_else(|| AuctionError::not_found("item", item_id))?
            .version;
        let key = keys::leaderboard(auction_id, item_id, version);
        if let Some(cached) = self.cache.get(&key).await {
            match serde_json::from_slice(&cached) {
                Ok(entries) => return Ok(entries),
                Err(err) => warn!(%key, "discarding unreadable leaderboard: {err}"),
            }
        }

        let bids: Vec<Bid> = self
            .store()
            .scan_records::<Bid>(|bid| bid.is_for(auction_id, item_id))?
            .into_iter()
            .map(|doc| doc.value)
            .collect();
        let entries = rank(&bids);
        let encoded = serde_json::to_vec(&entries)?;
        self.cache
            .set_with_ttl(&key, &encoded, self.config.leaderboard_ttl)
            .await;
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Cache;
    use crate::mocks::{TestHarness, HOUR};
    use crate::protocols::BidRequest;
    use gavel_types::Caller;
    use std::time::Duration;

    fn item_version(harness: &TestHarness, item: ItemId) -> u64 {
        harness
            .store
            .fetch::<Item>(&Key::Item(item))
            .unwrap()
            .unwrap()
            .version
    }

    #[test]
    fn ranks_best_bid_per_bidder() {
        let auction = AuctionId::new();
        let item = ItemId::new();
        let (alice, bob) = (UserId::new(), UserId::new());
        let bids = vec![
            Bid::plaintext(auction, None, item, alice, 110, 1),
            Bid::plaintext(auction, None, item, bob, 120, 2),
            Bid::plaintext(auction, None, item, alice, 130, 3),
        ];
        let ranked = rank(&bids);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].bidder_id, alice);
        assert_eq!(ranked[0].amount, 130);
        assert_eq!(ranked[0].bid_count, 2);
        assert_eq!(ranked[1].bidder_id, bob);
    }

    #[tokio::test]
    async fn cached_until_a_bid_invalidates_it() {
        let harness = TestHarness::new();
        let organizer = Caller::user(UserId::new());
        let item = harness.seed_item(100);
        let end = harness.clock.now_ms() + HOUR;
        let created = harness.timed_auction(&organizer, &item, 0, 0, end).await;
        harness.activate(created.auction.id).await;
        let auction_id = created.auction.id;

        let bid = |amount| BidRequest {
            auction_id,
            item_id: item.id,
            amount,
            invite_code: None,
        };
        let bidder = Caller::user(UserId::new());
        harness.engine.place_bid(&bidder, bid(150)).await.unwrap();
        let board = harness.engine.leaderboard(auction_id, item.id).await.unwrap();
        assert_eq!(board[0].amount, 150);
        assert!(harness
            .cache
            .get(&keys::leaderboard(auction_id, item.id, item_version(&harness, item.id)))
            .await
            .is_some());

        harness.engine.place_bid(&bidder, bid(175)).await.unwrap();
        let board = harness.engine.leaderboard(auction_id, item.id).await.unwrap();
        assert_eq!(board[0].amount, 175);
    }

    #[tokio::test]
    async fn standings_cached_before_a_bid_are_not_served_after_it() {
        let harness = TestHarness::new();
        let organizer = Caller::user(UserId::new());
        let item = harness.seed_item(100);
        let end = harness.clock.now_ms() + HOUR;
        let created = harness.timed_auction(&organizer, &item, 0, 0, end).await;
        harness.activate(created.auction.id).await;
        let auction_id = created.auction.id;
        let bid = |amount| BidRequest {
            auction_id,
            item_id: item.id,
            amount,
            invite_code: None,
        };
        let bidder = Caller::user(UserId::new());

        harness.engine.place_bid(&bidder, bid(150)).await.unwrap();
        let stale_key = keys::leaderboard(auction_id, item.id, item_version(&harness, item.id));
        let stale = serde_json::to_vec(&rank(&[])).unwrap();

        // A reader that scanned before the next bid stores its result after
        // the bid's invalidation already ran.
        harness.engine.place_bid(&bidder, bid(175)).await.unwrap();
        harness
            .cache
            .set_with_ttl(&stale_key, &stale, Duration::from_secs(30))
            .await;

        let board = harness.engine.leaderboard(auction_id, item.id).await.unwrap();
        assert_eq!(board.len(), 1);
        assert_eq!(board[0].amount, 175);
    }

    #[tokio::test]
    async fn sealed_standings_are_hidden_while_open() {
        let harness = TestHarness::new();
        let organizer = Caller::user(UserId::new());
        let item = harness.seed_item(1);
        let deadline = harness.clock.now_ms() + HOUR;
        let created = harness.sealed_auction(&organizer, &item, 10, deadline).await;
        harness.activate(created.auction.id).await;
        let err = harness
            .engine
            .leaderboard(created.auction.id, item.id)
            .await
            .unwrap_err();
        assert!(matches!(err, AuctionError::Forbidden(_)));
    }
}
