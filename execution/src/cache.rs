//! Read-path cache used to short-circuit leaderboards and listings.
//!
//! Never required for correctness: failures are logged and treated as misses.

use async_trait::async_trait;
use gavel_types::{AuctionId, ItemId};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Option<Vec<u8>>;

    async fn set_with_ttl(&self, key: &str, value: &[u8], ttl: Duration);

    /// Drop `pattern`, or every key starting with its prefix when it ends in `*`.
    async fn invalidate(&self, pattern: &str);
}

pub mod keys {
    use super::*;

    /// Standings as of `version` of the item document. Every bid bumps the
    /// item, so an entry computed before a bid is never read after it.
    pub fn leaderboard(auction: AuctionId, item: ItemId, version: u64) -> String {
        format!("leaderboard:{auction}:{item}:{version}")
    }

    pub fn leaderboards(auction: AuctionId) -> String {
        format!("leaderboard:{auction}:*")
    }

    /// Listing-level summary of an auction (status, counters).
    pub fn auction(auction: AuctionId) -> String {
        format!("auction:{auction}")
    }

    /// Listing pages are cached by the listing service under this prefix.
    pub const LISTINGS: &str = "auctions:*";
}

fn matches_pattern(pattern: &str, key: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => key.starts_with(prefix),
        None => key == pattern,
    }
}

/// Process-local cache with per-entry expiry.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, (Vec<u8>, Instant)>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .await
            .values()
            .filter(|(_, expires_at)| *expires_at > now)
            .count()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Option<Vec<u8>> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some((value, expires_at)) if *expires_at > Instant::now() => Some(value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    async fn set_with_ttl(&self, key: &str, value: &[u8], ttl: Duration) {
        let expires_at = Instant::now() + ttl;
        self.entries
            .lock()
            .await
            .insert(key.to_string(), (value.to_vec(), expires_at));
    }

    async fn invalidate(&self, pattern: &str) {
        self.entries
            .lock()
            .await
            .retain(|key, _| !matches_pattern(pattern, key));
    }
}

pub struct RedisCache {
    client: redis::Client,
    connection: Mutex<Option<redis::aio::ConnectionManager>>,
    prefix: String,
}

impl RedisCache {
    pub fn new(url: &str, prefix: String) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(url)?;
        Ok(Self {
            client,
            connection: Mutex::new(None),
            prefix,
        })
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    async fn ensure_connection(
        &self,
    ) -> Result<tokio::sync::MutexGuard<'_, Option<redis::aio::ConnectionManager>>, redis::RedisError>
    {
        let mut guard = self.connection.lock().await;
        if guard.is_none() {
            *guard = Some(self.client.get_connection_manager().await?);
        }
        Ok(guard)
    }

    async fn scan_and_delete(
        conn: &mut redis::aio::ConnectionManager,
        pattern: &str,
    ) -> redis::RedisResult<usize> {
        let mut cursor: u64 = 0;
        let mut deleted = 0;
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(200)
                .query_async(conn)
                .await?;
            if !keys.is_empty() {
                deleted += keys.len();
                let _: () = redis::cmd("DEL").arg(&keys).query_async(conn).await?;
            }
            if next == 0 {
                return Ok(deleted);
            }
            cursor = next;
        }
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn get(&self, key: &str) -> Option<Vec<u8>> {
        let mut guard = match self.ensure_connection().await {
            Ok(guard) => guard,
            Err(err) => {
                tracing::warn!("Redis cache connection failed: {err}");
                return None;
            }
        };
        let conn = guard.as_mut()?;
        let full_key = self.key(key);
        let result: redis::RedisResult<Option<Vec<u8>>> =
            redis::cmd("GET").arg(full_key).query_async(conn).await;
        match result {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!("Redis cache get failed: {err}");
                *guard = None;
                None
            }
        }
    }

    async fn set_with_ttl(&self, key: &str, value: &[u8], ttl: Duration) {
        let mut guard = match self.ensure_connection().await {
            Ok(guard) => guard,
            Err(err) => {
                tracing::warn!("Redis cache connection failed: {err}");
                return;
            }
        };
        let Some(conn) = guard.as_mut() else {
            return;
        };
        let full_key = self.key(key);
        let ttl = ttl.as_secs().max(1);
        let result: redis::RedisResult<()> = redis::cmd("SET")
            .arg(full_key)
            .arg(value)
            .arg("EX")
            .arg(ttl)
            .query_async(conn)
            .await;
        if let Err(err) = result {
            tracing::warn!("Redis cache set failed: {err}");
            *guard = None;
        }
    }

    async fn invalidate(&self, pattern: &str) {
        let mut guard = match self.ensure_connection().await {
            Ok(guard) => guard,
            Err(err) => {
                tracing::warn!("Redis cache connection failed: {err}");
                return;
            }
        };
        let Some(conn) = guard.as_mut() else {
            return;
        };
        let full_pattern = self.key(pattern);
        let result = if full_pattern.ends_with('*') {
            Self::scan_and_delete(conn, &full_pattern).await.map(|_| ())
        } else {
            redis::cmd("DEL").arg(&full_pattern).query_async(conn).await
        };
        if let Err(err) = result {
            tracing::warn!("Redis cache invalidate failed: {err}");
            *guard = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn entries_expire() {
        let cache = MemoryCache::new();
        cache.set_with_ttl("a", b"1", Duration::from_millis(0)).await;
        assert_eq!(cache.get("a").await, None);
        cache.set_with_ttl("b", b"2", Duration::from_secs(60)).await;
        assert_eq!(cache.get("b").await, Some(b"2".to_vec()));
    }

    #[tokio::test]
    async fn prefix_invalidation_only_touches_matching_keys() {
        let cache = MemoryCache::new();
        let auction = AuctionId::new();
        let other = AuctionId::new();
        let ttl = Duration::from_secs(60);
        cache.set_with_ttl(&keys::leaderboard(auction, ItemId::new(), 1), b"x", ttl).await;
        cache.set_with_ttl(&keys::leaderboard(auction, ItemId::new(), 1), b"y", ttl).await;
        cache.set_with_ttl(&keys::leaderboard(other, ItemId::new(), 1), b"z", ttl).await;
        cache.set_with_ttl(&keys::auction(auction), b"w", ttl).await;

        cache.invalidate(&keys::leaderboards(auction)).await;
        assert_eq!(cache.len().await, 2);

        cache.invalidate(&keys::auction(auction)).await;
        assert_eq!(cache.len().await, 1);
    }

    #[test]
    fn exact_patterns_do_not_glob() {
        assert!(matches_pattern("a:*", "a:b"));
        assert!(!matches_pattern("a:", "a:b"));
        assert!(matches_pattern("a:b", "a:b"));
    }
}
