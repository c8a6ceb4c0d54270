//! Cache Item Module
//!
//! Defines the persisted item envelope and its expiry rules.

use serde::{Deserialize, Serialize};

use crate::cache::codec::{self, Value, ValueType};
use crate::error::Result;

/// Separates the internal prefix, the namespace and the user key.
pub const KEY_DELIMITER: char = '―';

/// Leading component of every fully-qualified key.
pub const INTERNAL_PREFIX: &str = "locker";

/// Builds the key prefix for a namespace, e.g. `locker―default`.
pub fn namespace_prefix(namespace: &str) -> String {
    format!("{}{}{}", INTERNAL_PREFIX, KEY_DELIMITER, namespace)
}

/// Builds the fully-qualified key, e.g. `locker―default―token`.
pub fn qualified_key(prefix: &str, key: &str) -> String {
    format!("{}{}{}", prefix, KEY_DELIMITER, key)
}

// == Cache Item ==
/// The persisted unit: an encoded value plus its metadata.
///
/// Serialized to JSON with camelCase field names; that text is what a
/// backend stores and what `size` measures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheItem {
    /// Fully-qualified key, including the namespace prefix
    pub key: String,
    /// Canonical text produced by the codec
    pub value: String,
    /// Tag used to reverse the encoding
    #[serde(rename = "type")]
    pub value_type: ValueType,
    /// TTL in milliseconds, 0 = never expires
    pub expires: u64,
    /// Reads reset `updated_at` when set
    pub auto_read_refresh: bool,
    /// Size of the serialized envelope in bytes
    pub size: u64,
    /// Unix milliseconds of the first write
    pub created_at: u64,
    /// Unix milliseconds of the last write or refreshing read
    pub updated_at: u64,
}

impl CacheItem {
    // == Is Expired ==
    /// An item is expired once `now` is strictly past `updated_at + expires`.
    /// Permanent items (`expires == 0`) never expire.
    pub fn is_expired(&self, now: u64) -> bool {
        match self.expires_at() {
            Some(deadline) => now > deadline,
            None => false,
        }
    }

    /// Unix milliseconds at which the item expires, None if permanent.
    pub fn expires_at(&self) -> Option<u64> {
        if self.is_permanent() {
            None
        } else {
            Some(self.updated_at.saturating_add(self.expires))
        }
    }

    pub fn is_permanent(&self) -> bool {
        self.expires == 0
    }

    /// Remaining TTL in milliseconds, `Some(0)` once expired, None if permanent.
    pub fn ttl_remaining_ms(&self, now: u64) -> Option<u64> {
        self.expires_at()
            .map(|deadline| deadline.saturating_sub(now))
    }

    // == Envelope Size ==
    /// Byte length of the envelope serialized with `size` zeroed.
    pub fn envelope_size(&self) -> Result<u64> {
        let sizing = CacheItem {
            size: 0,
            ..self.clone()
        };
        Ok(serde_json::to_string(&sizing)?.len() as u64)
    }

    /// Recomputes `size` from the current fields.
    pub fn refresh_size(&mut self) -> Result<()> {
        self.size = self.envelope_size()?;
        Ok(())
    }

    /// Decodes the stored value.
    pub fn decode(self) -> Result<DecodedItem> {
        let value = codec::decode(self.value_type, &self.value)?;
        Ok(DecodedItem {
            key: self.key,
            value,
            value_type: self.value_type,
            expires: self.expires,
            auto_read_refresh: self.auto_read_refresh,
            size: self.size,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

// == Decoded Item ==
/// An item with its value decoded, returned by full reads.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedItem {
    pub key: String,
    pub value: Value,
    pub value_type: ValueType,
    pub expires: u64,
    pub auto_read_refresh: bool,
    pub size: u64,
    pub created_at: u64,
    pub updated_at: u64,
}
