//! Minimum acceptable bid computation.
//!
//! Pure functions only. Callers must feed them the highest-bid snapshot read
//! inside the same transaction that will write the bid, otherwise a bid could
//! be validated against stale data.

use crate::error::{AuctionError, AuctionResult};

/// Minimum acceptable next bid for live and timed protocols.
///
/// `highest` is the highest accepted bid on the item, `None` if the item has
/// not received one yet, in which case the starting bid is the floor.
pub fn minimum_next_bid(highest: Option<u64>, starting_bid: u64, min_bid_increment: u64) -> u64 {
    highest
        .unwrap_or(starting_bid)
        .max(starting_bid)
        .saturating_add(min_bid_increment)
}

/// Check an ascending bid (live or timed) against the current snapshot.
pub fn check_ascending_bid(
    amount: u64,
    highest: Option<u64>,
    starting_bid: u64,
    min_bid_increment: u64,
) -> AuctionResult<()> {
    let minimum = minimum_next_bid(highest, starting_bid, min_bid_increment);
    if amount < minimum {
        return Err(AuctionError::BidTooLow {
            minimum,
            offered: amount,
        });
    }
    Ok(())
}

/// Sealed bids have no floor against other bids: any positive amount is
/// accepted, acceptability is decided at reveal.
pub fn check_sealed_bid(amount: u64) -> AuctionResult<()> {
    if amount == 0 {
        return Err(AuctionError::Validation(
            "sealed bid amount must be positive".to_string(),
        ));
    }
    Ok(())
}
