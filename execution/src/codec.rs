//! Sealed-bid amount encryption.
//!
//! Amounts are sealed with ChaCha20-Poly1305 under a key derived (Argon2) from
//! a process secret. The envelope is `"{key_id}.{base64(nonce || ciphertext)}"`
//! and the bid context (auction, item, bidder) is bound as associated data, so
//! a ciphertext cannot be replayed onto another bid.
//!
//! ## Key lifetime
//!
//! Keys come from an injected [`KeyProvider`]. A sealed bid can only be
//! revealed while the key it was sealed under is still provided. Rotation
//! must therefore add a new active key and keep the previous one until every
//! auction with bids sealed under it has been revealed. Dropping a key early
//! makes those bids permanently unrecoverable.

use argon2::Argon2;
use base64::{engine::general_purpose, Engine as _};
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use gavel_types::{AuctionId, ItemId, UserId};
use rand::rngs::OsRng;
use rand::RngCore;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;
const SALT_PREFIX: &str = "gavel-sealed-bid:";

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("sealing key {0} is not available")]
    UnknownKey(String),
    #[error("malformed sealed amount: {0}")]
    Malformed(&'static str),
    #[error("encryption failed")]
    Encrypt,
    #[error("decryption failed (wrong key or tampered ciphertext)")]
    Decrypt,
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),
    #[error("invalid key ring: {0}")]
    InvalidKeyRing(String),
}

/// 256-bit sealing key.
#[derive(Clone)]
pub struct SealingKey([u8; KEY_LEN]);

impl SealingKey {
    /// Derive a key from a secret. The key id salts the derivation so two
    /// ids sharing a secret still produce different keys.
    pub fn derive(key_id: &str, secret: &str) -> Result<Self, CodecError> {
        let salt = format!("{SALT_PREFIX}{key_id}");
        let mut out = [0u8; KEY_LEN];
        Argon2::default()
            .hash_password_into(secret.as_bytes(), salt.as_bytes(), &mut out)
            .map_err(|e| CodecError::KeyDerivation(e.to_string()))?;
        Ok(Self(out))
    }

    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for SealingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SealingKey(<redacted>)")
    }
}

/// Source of sealing keys.
pub trait KeyProvider: Send + Sync {
    /// Key new bids are sealed under.
    fn active_key_id(&self) -> &str;

    fn key(&self, key_id: &str) -> Option<&SealingKey>;
}

/// Ordered set of keys; the first one is active, the rest are kept for
/// revealing bids sealed before a rotation.
#[derive(Debug)]
pub struct KeyRing {
    keys: Vec<(String, SealingKey)>,
}

impl KeyRing {
    pub fn new(keys: Vec<(String, SealingKey)>) -> Result<Self, CodecError> {
        if keys.is_empty() {
            return Err(CodecError::InvalidKeyRing("at least one key is required".into()));
        }
        for (idx, (id, _)) in keys.iter().enumerate() {
            if id.is_empty() || id.contains('.') {
                return Err(CodecError::InvalidKeyRing(format!("invalid key id {id:?}")));
            }
            if keys[..idx].iter().any(|(other, _)| other == id) {
                return Err(CodecError::InvalidKeyRing(format!("duplicate key id {id}")));
            }
        }
        Ok(Self { keys })
    }

    /// Derive every key from `(id, secret)` pairs.
    pub fn from_secrets<'a>(
        secrets: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Result<Self, CodecError> {
        let keys = secrets
            .into_iter()
            .map(|(id, secret)| SealingKey::derive(id, secret).map(|key| (id.to_string(), key)))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(keys)
    }
}

impl KeyProvider for KeyRing {
    fn active_key_id(&self) -> &str {
        &self.keys[0].0
    }

    fn key(&self, key_id: &str) -> Option<&SealingKey> {
        self.keys
            .iter()
            .find(|(id, _)| id == key_id)
            .map(|(_, key)| key)
    }
}

/// Bid a sealed amount belongs to.
#[derive(Clone, Copy, Debug)]
pub struct SealContext {
    pub auction_id: AuctionId,
    pub item_id: ItemId,
    pub bidder_id: UserId,
}

impl SealContext {
    fn associated_data(&self) -> Vec<u8> {
        let mut aad = Vec::with_capacity(48);
        aad.extend_from_slice(self.auction_id.as_uuid().as_bytes());
        aad.extend_from_slice(self.item_id.as_uuid().as_bytes());
        aad.extend_from_slice(self.bidder_id.as_uuid().as_bytes());
        aad
    }
}

#[derive(Clone)]
pub struct BidCodec {
    keys: Arc<dyn KeyProvider>,
}

impl BidCodec {
    pub fn new(keys: Arc<dyn KeyProvider>) -> Self {
        Self { keys }
    }

    pub fn seal(&self, context: &SealContext, amount: u64) -> Result<String, CodecError> {
        let key_id = self.keys.active_key_id();
        let key = self
            .keys
            .key(key_id)
            .ok_or_else(|| CodecError::UnknownKey(key_id.to_string()))?;
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key.0));

        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let aad = context.associated_data();
        let ciphertext = cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: &amount.to_be_bytes(),
                    aad: &aad,
                },
            )
            .map_err(|_| CodecError::Encrypt)?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);
        Ok(format!("{key_id}.{}", general_purpose::STANDARD.encode(blob)))
    }

    pub fn open(&self, context: &SealContext, sealed: &str) -> Result<u64, CodecError> {
        let (key_id, encoded) = sealed
            .split_once('.')
            .ok_or(CodecError::Malformed("missing key id"))?;
        let key = self
            .keys
            .key(key_id)
            .ok_or_else(|| CodecError::UnknownKey(key_id.to_string()))?;
        let blob = general_purpose::STANDARD
            .decode(encoded)
            .map_err(|_| CodecError::Malformed("invalid base64"))?;
        if blob.len() <= NONCE_LEN {
            return Err(CodecError::Malformed("truncated"));
        }
        let (nonce, ciphertext) = blob.split_at(NONCE_LEN);

        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key.0));
        let aad = context.associated_data();
        let plaintext = cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad: &aad,
                },
            )
            .map_err(|_| CodecError::Decrypt)?;
        let bytes: [u8; 8] = plaintext
            .try_into()
            .map_err(|_| CodecError::Malformed("unexpected plaintext length"))?;
        Ok(u64::from_be_bytes(bytes))
    }
}

impl fmt::Debug for BidCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BidCodec")
            .field("active_key_id", &self.keys.active_key_id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ring(ids: &[&str]) -> KeyRing {
        let keys = ids
            .iter()
            .enumerate()
            .map(|(idx, id)| (id.to_string(), SealingKey::from_bytes([idx as u8 + 1; KEY_LEN])))
            .collect();
        KeyRing::new(keys).unwrap()
    }

    fn context() -> SealContext {
        SealContext {
            auction_id: AuctionId::new(),
            item_id: ItemId::new(),
            bidder_id: UserId::new(),
        }
    }

    #[test]
    fn sealed_amount_opens_to_original() {
        let codec = BidCodec::new(Arc::new(ring(&["k1"])));
        let ctx = context();
        let sealed = codec.seal(&ctx, 95).unwrap();
        assert!(sealed.starts_with("k1."));
        assert!(!sealed.contains("95"));
        assert_eq!(codec.open(&ctx, &sealed).unwrap(), 95);
    }

    #[test]
    fn ciphertext_is_bound_to_its_bid() {
        let codec = BidCodec::new(Arc::new(ring(&["k1"])));
        let sealed = codec.seal(&context(), 130).unwrap();
        assert!(matches!(
            codec.open(&context(), &sealed),
            Err(CodecError::Decrypt)
        ));
    }

    #[test]
    fn rotated_keys_still_open_older_bids() {
        let ctx = context();
        let old = BidCodec::new(Arc::new(ring(&["k1"])));
        let sealed = old.seal(&ctx, 80).unwrap();

        let keys = vec![
            ("k2".to_string(), SealingKey::from_bytes([9; KEY_LEN])),
            ("k1".to_string(), SealingKey::from_bytes([1; KEY_LEN])),
        ];
        let rotated = BidCodec::new(Arc::new(KeyRing::new(keys).unwrap()));
        assert_eq!(rotated.open(&ctx, &sealed).unwrap(), 80);
        assert!(rotated.seal(&ctx, 1).unwrap().starts_with("k2."));
    }

    #[test]
    fn lost_key_is_reported() {
        let ctx = context();
        let sealed = BidCodec::new(Arc::new(ring(&["k1"]))).seal(&ctx, 1).unwrap();
        let other = BidCodec::new(Arc::new(ring(&["k9"])));
        assert!(matches!(other.open(&ctx, &sealed), Err(CodecError::UnknownKey(id)) if id == "k1"));
    }

    #[test]
    fn malformed_envelopes_are_rejected() {
        let codec = BidCodec::new(Arc::new(ring(&["k1"])));
        let ctx = context();
        assert!(matches!(codec.open(&ctx, "no-dot"), Err(CodecError::Malformed(_))));
        assert!(matches!(codec.open(&ctx, "k1.!!!"), Err(CodecError::Malformed(_))));
        assert!(matches!(codec.open(&ctx, "k1.AAAA"), Err(CodecError::Malformed(_))));
    }

    #[test]
    fn key_ring_rejects_duplicates_and_empty() {
        assert!(KeyRing::new(Vec::new()).is_err());
        let dup = vec![
            ("a".to_string(), SealingKey::from_bytes([1; KEY_LEN])),
            ("a".to_string(), SealingKey::from_bytes([2; KEY_LEN])),
        ];
        assert!(KeyRing::new(dup).is_err());
    }

    #[test]
    fn derived_keys_depend_on_id_and_secret() {
        let ring = KeyRing::from_secrets([("a", "secret"), ("b", "secret")]).unwrap();
        let a = ring.key("a").unwrap().0;
        let b = ring.key("b").unwrap().0;
        assert_ne!(a, b);
        assert_eq!(SealingKey::derive("a", "secret").unwrap().0, a);
    }
}
