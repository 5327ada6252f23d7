//! Transactional document store.
//!
//! The engine needs one property from its backing store: a set of writes
//! commits atomically, and only if every guarded document still has the
//! version the transaction read (compare-and-swap across documents). Anything
//! providing that can implement [`Store`]; [`MemoryStore`] is the in-process
//! implementation.
//!
//! Versions are the store's commit sequence number. They grow monotonically
//! across the whole store, so the commit order of any two documents can be
//! compared by version.

use gavel_types::{
    Auction, AuctionId, AuctionParticipant, AuctionSession, Bid, BidId, Item, ItemId, SessionId,
    UserId,
};
use std::collections::HashMap;
use std::fmt;
use std::sync::{PoisonError, RwLock};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("guarded document {key} changed before commit")]
    Conflict { key: String },
    #[error("store backend failure: {0}")]
    Backend(String),
}

fn poison_err<T>(_: PoisonError<T>) -> StoreError {
    StoreError::Backend("lock poisoned".to_string())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Kind {
    Auction,
    Item,
    Bid,
    Session,
    Participant,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Key {
    Auction(AuctionId),
    Item(ItemId),
    Bid(BidId),
    Session(SessionId),
    Participant(SessionId, UserId),
}

impl Key {
    pub fn kind(&self) -> Kind {
        match self {
            Key::Auction(_) => Kind::Auction,
            Key::Item(_) => Kind::Item,
            Key::Bid(_) => Kind::Bid,
            Key::Session(_) => Kind::Session,
            Key::Participant(..) => Kind::Participant,
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Auction(id) => write!(f, "auction:{id}"),
            Key::Item(id) => write!(f, "item:{id}"),
            Key::Bid(id) => write!(f, "bid:{id}"),
            Key::Session(id) => write!(f, "session:{id}"),
            Key::Participant(session, user) => write!(f, "participant:{session}:{user}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Document {
    Auction(Auction),
    Item(Item),
    Bid(Bid),
    Session(AuctionSession),
    Participant(AuctionParticipant),
}

impl Document {
    pub fn key(&self) -> Key {
        match self {
            Document::Auction(auction) => Key::Auction(auction.id),
            Document::Item(item) => Key::Item(item.id),
            Document::Bid(bid) => Key::Bid(bid.id),
            Document::Session(session) => Key::Session(session.id),
            Document::Participant(p) => Key::Participant(p.session_id, p.user_id),
        }
    }
}

/// A typed view over one [`Document`] variant.
pub trait Record: Clone + Send + Sync + 'static {
    const KIND: Kind;
    const ENTITY: &'static str;

    fn key(&self) -> Key;
    fn into_document(self) -> Document;
    fn from_document(doc: Document) -> Option<Self>;
}

macro_rules! impl_record {
    ($ty:ty, $variant:ident, $entity:literal, |$this:ident| $key:expr) => {
        impl Record for $ty {
            const KIND: Kind = Kind::$variant;
            const ENTITY: &'static str = $entity;

            fn key(&self) -> Key {
                let $this = self;
                $key
            }

            fn into_document(self) -> Document {
                Document::$variant(self)
            }

            fn from_document(doc: Document) -> Option<Self> {
                match doc {
                    Document::$variant(value) => Some(value),
                    _ => None,
                }
            }
        }
    };
}

impl_record!(Auction, Auction, "auction", |a| Key::Auction(a.id));
impl_record!(Item, Item, "item", |i| Key::Item(i.id));
impl_record!(Bid, Bid, "bid", |b| Key::Bid(b.id));
impl_record!(AuctionSession, Session, "session", |s| Key::Session(s.id));
impl_record!(AuctionParticipant, Participant, "participant", |p| {
    Key::Participant(p.session_id, p.user_id)
});

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Versioned<T> {
    pub version: u64,
    pub value: T,
}

/// Version a document must still have at commit; `None` means it must not exist.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Guard {
    pub key: Key,
    pub expected: Option<u64>,
}

#[derive(Clone, Debug, Default)]
pub struct WriteSet {
    pub guards: Vec<Guard>,
    pub writes: Vec<Document>,
}

impl WriteSet {
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }
}

pub trait Store: Send + Sync {
    fn get(&self, key: &Key) -> Result<Option<Versioned<Document>>, StoreError>;

    /// Every document of `kind` matching `filter`, in commit order.
    fn scan(
        &self,
        kind: Kind,
        filter: &dyn Fn(&Document) -> bool,
    ) -> Result<Vec<Versioned<Document>>, StoreError>;

    /// Apply `writes` atomically if every guard holds. Returns the commit
    /// sequence number assigned to the written documents.
    fn commit(&self, writes: WriteSet) -> Result<u64, StoreError>;
}

/// Typed accessors over any [`Store`].
pub trait StoreExt {
    fn fetch<R: Record>(&self, key: &Key) -> Result<Option<Versioned<R>>, StoreError>;

    fn scan_records<R: Record>(
        &self,
        filter: impl Fn(&R) -> bool,
    ) -> Result<Vec<Versioned<R>>, StoreError>;
}

impl<S: Store + ?Sized> StoreExt for S {
    fn fetch<R: Record>(&self, key: &Key) -> Result<Option<Versioned<R>>, StoreError> {
        Ok(self.get(key)?.and_then(|doc| {
            R::from_document(doc.value).map(|value| Versioned {
                version: doc.version,
                value,
            })
        }))
    }

    fn scan_records<R: Record>(
        &self,
        filter: impl Fn(&R) -> bool,
    ) -> Result<Vec<Versioned<R>>, StoreError> {
        let docs = self.scan(R::KIND, &|doc| {
            R::from_document(doc.clone()).is_some_and(|record| filter(&record))
        })?;
        Ok(docs
            .into_iter()
            .filter_map(|doc| {
                R::from_document(doc.value).map(|value| Versioned {
                    version: doc.version,
                    value,
                })
            })
            .collect())
    }
}

#[derive(Default)]
struct Tables {
    docs: HashMap<Key, Versioned<Document>>,
    sequence: u64,
}

/// In-process [`Store`] guarded by a single `RwLock`. Commits hold the write
/// lock only while checking guards and applying writes.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tables.read().map(|t| t.docs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Store for MemoryStore {
    fn get(&self, key: &Key) -> Result<Option<Versioned<Document>>, StoreError> {
        let tables = self.tables.read().map_err(poison_err)?;
        Ok(tables.docs.get(key).cloned())
    }

    fn scan(
        &self,
        kind: Kind,
        filter: &dyn Fn(&Document) -> bool,
    ) -> Result<Vec<Versioned<Document>>, StoreError> {
        let tables = self.tables.read().map_err(poison_err)?;
        let mut docs: Vec<_> = tables
            .docs
            .iter()
            .filter(|(key, doc)| key.kind() == kind && filter(&doc.value))
            .map(|(_, doc)| doc.clone())
            .collect();
        drop(tables);
        docs.sort_by_key(|doc| doc.version);
        Ok(docs)
    }

    fn commit(&self, writes: WriteSet) -> Result<u64, StoreError> {
        let mut tables = self.tables.write().map_err(poison_err)?;
        for guard in &writes.guards {
            let current = tables.docs.get(&guard.key).map(|doc| doc.version);
            if current != guard.expected {
                return Err(StoreError::Conflict {
                    key: guard.key.to_string(),
                });
            }
        }
        if writes.writes.is_empty() {
            return Ok(tables.sequence);
        }
        tables.sequence += 1;
        let version = tables.sequence;
        for doc in writes.writes {
            tables.docs.insert(doc.key(), Versioned { version, value: doc });
        }
        Ok(version)
    }
}
