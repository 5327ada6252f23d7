//! Atomic multi-document units of work.
//!
//! A [`Txn`] reads through to the store, remembers the version of every
//! document it touched and buffers its writes. Committing hands the buffered
//! writes to the store guarded by those versions, so a precondition checked
//! inside the unit of work still holds at the moment its writes land. When a
//! guard fails nothing is written and the caller gets
//! [`AuctionError::Conflict`]. The mutator never retries.
//!
//! Scans do not guard against documents inserted concurrently. A unit of
//! work that derives a decision from a scan (e.g. the highest bid on an item)
//! must also write the parent document the scan hangs off (the item), which
//! serializes it against every other unit of work making the same decision.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{AuctionError, AuctionResult};
use crate::store::{Guard, Key, Record, Store, StoreExt, WriteSet};

pub struct Txn<'a> {
    store: &'a dyn Store,
    reads: HashMap<Key, Option<u64>>,
    staged: HashMap<Key, crate::store::Document>,
    order: Vec<Key>,
}

impl<'a> Txn<'a> {
    fn new(store: &'a dyn Store) -> Self {
        Self {
            store,
            reads: HashMap::new(),
            staged: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Read a document, preferring this transaction's own staged writes.
    pub fn get<R: Record>(&mut self, key: &Key) -> AuctionResult<Option<R>> {
        if let Some(doc) = self.staged.get(key) {
            return Ok(R::from_document(doc.clone()));
        }
        let current = self.store.fetch::<R>(key)?;
        self.reads
            .entry(key.clone())
            .or_insert(current.as_ref().map(|doc| doc.version));
        Ok(current.map(|doc| doc.value))
    }

    /// Like [`Txn::get`] but absent documents are [`AuctionError::NotFound`].
    pub fn require<R: Record>(&mut self, key: &Key, id: impl ToString) -> AuctionResult<R> {
        self.get::<R>(key)?
            .ok_or_else(|| AuctionError::not_found(R::ENTITY, id))
    }

    /// Documents of type `R` matching `filter`, with this transaction's
    /// staged writes applied.
    pub fn scan<R: Record>(&mut self, filter: impl Fn(&R) -> bool) -> AuctionResult<Vec<R>> {
        let mut records: Vec<R> = self
            .store
            .scan_records::<R>(|record| !self.staged.contains_key(&record.key()) && filter(record))?
            .into_iter()
            .map(|doc| doc.value)
            .collect();
        for key in &self.order {
            if key.kind() != R::KIND {
                continue;
            }
            if let Some(record) = self.staged.get(key).cloned().and_then(R::from_document) {
                if filter(&record) {
                    records.push(record);
                }
            }
        }
        Ok(records)
    }

    /// Stage an update. The document's version is guarded even when it was
    /// never read through this transaction.
    pub fn put<R: Record>(&mut self, record: R) -> AuctionResult<()> {
        let key = record.key();
        if !self.reads.contains_key(&key) && !self.staged.contains_key(&key) {
            let current = self.store.get(&key)?;
            self.reads.insert(key.clone(), current.map(|doc| doc.version));
        }
        self.stage(key, record);
        Ok(())
    }

    /// Stage a new document; commit fails if one already exists under its key.
    pub fn insert<R: Record>(&mut self, record: R) {
        let key = record.key();
        self.reads.entry(key.clone()).or_insert(None);
        self.stage(key, record);
    }

    fn stage<R: Record>(&mut self, key: Key, record: R) {
        if !self.staged.contains_key(&key) {
            self.order.push(key.clone());
        }
        self.staged.insert(key, record.into_document());
    }

    pub fn has_writes(&self) -> bool {
        !self.staged.is_empty()
    }

    fn into_write_set(mut self) -> WriteSet {
        let guards = self
            .reads
            .into_iter()
            .map(|(key, expected)| Guard { key, expected })
            .collect();
        let writes = self
            .order
            .iter()
            .filter_map(|key| self.staged.remove(key))
            .collect();
        WriteSet { guards, writes }
    }
}

/// Runs units of work against a [`Store`].
#[derive(Clone)]
pub struct Mutator {
    store: Arc<dyn Store>,
}

impl Mutator {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn begin(&self) -> Txn<'_> {
        Txn::new(self.store.as_ref())
    }

    /// Commit `txn`. A transaction without writes commits trivially.
    pub fn commit(&self, txn: Txn<'_>) -> AuctionResult<Option<u64>> {
        if !txn.has_writes() {
            return Ok(None);
        }
        let version = self.store.commit(txn.into_write_set())?;
        Ok(Some(version))
    }

    /// Run `work` in a fresh transaction and commit its writes atomically.
    /// If `work` fails nothing is committed.
    pub fn run<T>(&self, work: impl FnOnce(&mut Txn<'_>) -> AuctionResult<T>) -> AuctionResult<T> {
        let mut txn = self.begin();
        let out = work(&mut txn)?;
        self.commit(txn)?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use gavel_types::{AuctionId, Bid, Item, ItemStatus, UserId};

    fn seeded() -> (Mutator, Item) {
        let mutator = Mutator::new(Arc::new(MemoryStore::new()));
        let item = Item::new("vase", 100);
        let stored = item.clone();
        mutator
            .run(|txn| {
                txn.insert(stored);
                Ok(())
            })
            .unwrap();
        (mutator, item)
    }

    #[test]
    fn failed_work_writes_nothing() {
        let (mutator, item) = seeded();
        let err = mutator
            .run(|txn| {
                let mut current: Item = txn.require(&Key::Item(item.id), item.id)?;
                current.status = ItemStatus::Sold;
                txn.put(current)?;
                Err::<(), _>(AuctionError::Validation("nope".into()))
            })
            .unwrap_err();
        assert!(matches!(err, AuctionError::Validation(_)));
        let stored = mutator.store().fetch::<Item>(&Key::Item(item.id)).unwrap().unwrap();
        assert_eq!(stored.value.status, ItemStatus::Available);
    }

    #[test]
    fn concurrent_change_aborts_commit_with_conflict() {
        let (mutator, item) = seeded();
        let auction = AuctionId::new();
        let bidder = UserId::new();

        let mut slow = mutator.begin();
        let mut seen: Item = slow.require(&Key::Item(item.id), item.id).unwrap();
        let slow_bid = Bid::plaintext(auction, None, item.id, bidder, 120, 1);
        seen.current_bid = 120;
        slow.put(seen).unwrap();
        slow.insert(slow_bid.clone());

        mutator
            .run(|txn| {
                let mut fast: Item = txn.require(&Key::Item(item.id), item.id)?;
                fast.current_bid = 130;
                txn.put(fast)
            })
            .unwrap();

        let err = mutator.commit(slow).unwrap_err();
        assert!(err.is_retryable());
        assert!(mutator.store().get(&Key::Bid(slow_bid.id)).unwrap().is_none());
        let stored = mutator.store().fetch::<Item>(&Key::Item(item.id)).unwrap().unwrap();
        assert_eq!(stored.value.current_bid, 130);
    }

    #[test]
    fn reads_see_own_staged_writes() {
        let (mutator, item) = seeded();
        mutator
            .run(|txn| {
                let mut current: Item = txn.require(&Key::Item(item.id), item.id)?;
                current.current_bid = 175;
                txn.put(current)?;
                let again: Item = txn.require(&Key::Item(item.id), item.id)?;
                assert_eq!(again.current_bid, 175);

                txn.insert(Bid::plaintext(AuctionId::new(), None, item.id, UserId::new(), 175, 3));
                let bids = txn.scan::<Bid>(|bid| bid.item_id == item.id)?;
                assert_eq!(bids.len(), 1);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn missing_documents_are_not_found() {
        let (mutator, _) = seeded();
        let missing = gavel_types::ItemId::new();
        let err = mutator
            .run(|txn| txn.require::<Item>(&Key::Item(missing), missing).map(|_| ()))
            .unwrap_err();
        assert!(matches!(err, AuctionError::NotFound { entity: "item", .. }));
    }

    #[test]
    fn duplicate_insert_conflicts() {
        let (mutator, item) = seeded();
        let err = mutator
            .run(|txn| {
                txn.insert(item.clone());
                Ok(())
            })
            .unwrap_err();
        assert!(err.is_retryable());
    }
}
