//! Item directory used by the listing service.
//!
//! `in_auction`, `sold` and `unsold` belong to the engine: an item enters
//! them only by being bound to an auction and leaves them only through
//! settlement or reclamation. The directory therefore refuses to move an
//! item into or out of those states.

use gavel_types::{Item, ItemId, ItemStatus};

use crate::error::{AuctionError, AuctionResult};
use crate::mutator::Mutator;
use crate::store::{Key, StoreExt};

/// Listing-side fields that may change alongside a status update.
#[derive(Clone, Debug, Default)]
pub struct ItemFields {
    pub title: Option<String>,
    pub starting_bid: Option<u64>,
}

pub trait ItemDirectory: Send + Sync {
    fn find_item(&self, id: ItemId) -> AuctionResult<Option<Item>>;

    fn update_item_status(
        &self,
        id: ItemId,
        status: ItemStatus,
        fields: ItemFields,
    ) -> AuctionResult<Item>;

    /// Items among `ids` that exist, optionally restricted to one status.
    fn find_items_by_ids(
        &self,
        ids: &[ItemId],
        status: Option<ItemStatus>,
    ) -> AuctionResult<Vec<Item>>;
}

fn engine_owned(status: ItemStatus) -> bool {
    matches!(
        status,
        ItemStatus::InAuction | ItemStatus::Sold | ItemStatus::Unsold
    )
}

/// [`ItemDirectory`] backed by the engine's own store.
#[derive(Clone)]
pub struct StoreItemDirectory {
    mutator: Mutator,
}

impl StoreItemDirectory {
    pub fn new(mutator: Mutator) -> Self {
        Self { mutator }
    }

    /// Add a listing-side item.
    pub fn register_item(&self, item: Item) -> AuctionResult<Item> {
        if engine_owned(item.status) || item.held_by.is_some() {
            return Err(AuctionError::Validation(format!(
                "new items cannot start {}",
                item.status.as_str()
            )));
        }
        self.mutator.run(|txn| {
            txn.insert(item.clone());
            Ok(())
        })?;
        Ok(item)
    }
}

impl ItemDirectory for StoreItemDirectory {
    fn find_item(&self, id: ItemId) -> AuctionResult<Option<Item>> {
        Ok(self
            .mutator
            .store()
            .fetch::<Item>(&Key::Item(id))?
            .map(|doc| doc.value))
    }

    fn update_item_status(
        &self,
        id: ItemId,
        status: ItemStatus,
        fields: ItemFields,
    ) -> AuctionResult<Item> {
        if engine_owned(status) {
            return Err(AuctionError::Validation(format!(
                "{} is set by the auction engine",
                status.as_str()
            )));
        }
        self.mutator.run(|txn| {
            let mut item: Item = txn.require(&Key::Item(id), id)?;
            if engine_owned(item.status) {
                return Err(AuctionError::Conflict(format!(
                    "item is {} and cannot be changed by the listing service",
                    item.status.as_str()
                )));
            }
            item.status = status;
            if let Some(title) = fields.title {
                item.title = title;
            }
            if let Some(starting_bid) = fields.starting_bid {
                item.starting_bid = starting_bid;
                item.current_bid = starting_bid;
            }
            txn.put(item.clone())?;
            Ok(item)
        })
    }

    fn find_items_by_ids(
        &self,
        ids: &[ItemId],
        status: Option<ItemStatus>,
    ) -> AuctionResult<Vec<Item>> {
        let store = self.mutator.store();
        let mut items = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(doc) = store.fetch::<Item>(&Key::Item(*id))? {
                if status.map_or(true, |status| doc.value.status == status) {
                    items.push(doc.value);
                }
            }
        }
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::sync::Arc;

    fn directory() -> StoreItemDirectory {
        StoreItemDirectory::new(Mutator::new(Arc::new(MemoryStore::new())))
    }

    #[test]
    fn listing_statuses_round_through_the_directory() {
        let directory = directory();
        let mut pending = Item::new("painting", 500);
        pending.status = ItemStatus::PendingApproval;
        let pending = directory.register_item(pending).unwrap();

        let approved = directory
            .update_item_status(
                pending.id,
                ItemStatus::Available,
                ItemFields {
                    starting_bid: Some(450),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(approved.status, ItemStatus::Available);
        assert_eq!(approved.current_bid, 450);
        assert_eq!(directory.find_item(pending.id).unwrap(), Some(approved));
    }

    #[test]
    fn engine_owned_statuses_are_refused() {
        let directory = directory();
        let item = directory.register_item(Item::new("clock", 10)).unwrap();
        let err = directory
            .update_item_status(item.id, ItemStatus::Sold, ItemFields::default())
            .unwrap_err();
        assert!(matches!(err, AuctionError::Validation(_)));

        let mut bound = Item::new("bound", 10);
        bound.status = ItemStatus::InAuction;
        assert!(directory.register_item(bound).is_err());
    }

    #[test]
    fn lookup_by_ids_filters_by_status_and_skips_missing() {
        let directory = directory();
        let a = directory.register_item(Item::new("a", 1)).unwrap();
        let mut rejected = Item::new("b", 1);
        rejected.status = ItemStatus::Rejected;
        let b = directory.register_item(rejected).unwrap();
        let ids = [a.id, b.id, ItemId::new()];

        assert_eq!(directory.find_items_by_ids(&ids, None).unwrap().len(), 2);
        let available = directory
            .find_items_by_ids(&ids, Some(ItemStatus::Available))
            .unwrap();
        assert_eq!(available, vec![a]);
    }
}
