//! Sold/unsold decision shared by every protocol.
//!
//! The protocols differ only in which bid they put forward as the
//! candidate; whether that candidate wins is always the same reserve check.

use gavel_types::{AuctionEvent, AuctionId, Bid, BidId, Item, ItemId, ItemStatus, Outcome, UserId};

use crate::error::{AuctionError, AuctionResult};
use crate::mutator::Txn;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Settlement {
    pub item_id: ItemId,
    pub outcome: Outcome,
    pub winning_bid: Option<BidId>,
    pub winner_id: Option<UserId>,
    pub final_price: Option<u64>,
}

impl Settlement {
    pub fn is_sold(&self) -> bool {
        self.outcome == Outcome::Sold
    }

    pub(crate) fn closed_event(&self, auction_id: AuctionId) -> AuctionEvent {
        AuctionEvent::AuctionClosed {
            auction_id,
            item_id: self.item_id,
            outcome: self.outcome,
            final_price: self.final_price,
            winner_id: self.winner_id,
        }
    }
}

/// Plaintext bids on `item` for `auction`, in commit order.
pub(crate) fn bids_for(txn: &mut Txn<'_>, auction: AuctionId, item: ItemId) -> AuctionResult<Vec<Bid>> {
    txn.scan::<Bid>(|bid| bid.is_for(auction, item))
}

/// Highest plaintext amount bid so far.
pub(crate) fn highest_amount(bids: &[Bid]) -> Option<u64> {
    bids.iter().filter_map(|bid| bid.amount).max()
}

/// Highest bid, earliest on ties.
pub(crate) fn highest_bid(bids: Vec<Bid>) -> Option<Bid> {
    let mut best: Option<Bid> = None;
    for bid in bids {
        let Some(amount) = bid.amount else { continue };
        if best.as_ref().and_then(|b| b.amount).map_or(true, |top| amount > top) {
            best = Some(bid);
        }
    }
    best
}

/// Settle `item` on `candidate`. The candidate wins only if its amount meets
/// `reserve_price`; otherwise the item is unsold and nobody wins.
pub(crate) fn settle(
    txn: &mut Txn<'_>,
    mut item: Item,
    candidate: Option<Bid>,
    reserve_price: u64,
) -> AuctionResult<Settlement> {
    let winner = match candidate {
        Some(bid) => {
            let amount = bid.amount.ok_or_else(|| {
                AuctionError::Internal(format!("bid {} has no plaintext amount", bid.id))
            })?;
            (amount >= reserve_price).then_some((bid, amount))
        }
        None => None,
    };

    let settlement = match winner {
        Some((mut bid, amount)) => {
            bid.is_winner = true;
            item.status = ItemStatus::Sold;
            item.winner_id = Some(bid.bidder_id);
            item.final_price = Some(amount);
            let settlement = Settlement {
                item_id: item.id,
                outcome: Outcome::Sold,
                winning_bid: Some(bid.id),
                winner_id: Some(bid.bidder_id),
                final_price: Some(amount),
            };
            txn.put(bid)?;
            settlement
        }
        None => {
            item.status = ItemStatus::Unsold;
            item.winner_id = None;
            item.final_price = None;
            Settlement {
                item_id: item.id,
                outcome: Outcome::Unsold,
                winning_bid: None,
                winner_id: None,
                final_price: None,
            }
        }
    };
    txn.put(item)?;
    Ok(settlement)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutator::Mutator;
    use crate::store::{Key, MemoryStore, StoreExt};
    use std::sync::Arc;

    fn bid(auction: AuctionId, item: ItemId, amount: u64, ts: u64) -> Bid {
        Bid::plaintext(auction, None, item, UserId::new(), amount, ts)
    }

    #[test]
    fn highest_prefers_earliest_on_ties() {
        let auction = AuctionId::new();
        let item = ItemId::new();
        let first = bid(auction, item, 200, 1);
        let second = bid(auction, item, 200, 2);
        let low = bid(auction, item, 150, 3);
        let top = highest_bid(vec![low, first.clone(), second]).unwrap();
        assert_eq!(top.id, first.id);
        assert_eq!(highest_bid(Vec::new()), None);
    }

    #[test]
    fn below_reserve_is_unsold_without_a_winner() {
        let mutator = Mutator::new(Arc::new(MemoryStore::new()));
        let auction = AuctionId::new();
        let mut item = Item::new("rug", 50);
        item.bind(auction);
        let candidate = bid(auction, item.id, 90, 1);

        let settlement = mutator
            .run(|txn| settle(txn, item.clone(), Some(candidate.clone()), 100))
            .unwrap();
        assert_eq!(settlement.outcome, Outcome::Unsold);
        assert_eq!(settlement.winner_id, None);
        let stored = mutator.store().fetch::<Item>(&Key::Item(item.id)).unwrap().unwrap();
        assert_eq!(stored.value.status, ItemStatus::Unsold);
        assert_eq!(stored.value.final_price, None);
    }

    #[test]
    fn reserve_met_marks_exactly_one_winner() {
        let mutator = Mutator::new(Arc::new(MemoryStore::new()));
        let auction = AuctionId::new();
        let mut item = Item::new("rug", 50);
        item.bind(auction);
        let candidate = bid(auction, item.id, 100, 1);

        let settlement = mutator
            .run(|txn| settle(txn, item.clone(), Some(candidate.clone()), 100))
            .unwrap();
        assert!(settlement.is_sold());
        assert_eq!(settlement.final_price, Some(100));
        let stored = mutator.store().fetch::<Bid>(&Key::Bid(candidate.id)).unwrap().unwrap();
        assert!(stored.value.is_winner);
        let item = mutator.store().fetch::<Item>(&Key::Item(item.id)).unwrap().unwrap();
        assert_eq!(item.value.winner_id, Some(candidate.bidder_id));
    }
}
