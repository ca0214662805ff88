//! Common types used across storage operations.

use bytes::Bytes;

/// Key-value pair returned from prefix scans.
///
/// # Examples
///
/// ```
/// use bytes::Bytes;
/// use appstore_storage::KeyValue;
///
/// let kv = KeyValue::new(Bytes::from("app/1/member/u1"), Bytes::from(r#"{"id":"u1"}"#));
/// assert_eq!(kv.key_str(), Some("app/1/member/u1"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    /// The key identifying this entry.
    pub key: Bytes,

    /// The value stored at this key.
    pub value: Bytes,
}

impl KeyValue {
    /// Creates a new key-value pair.
    pub fn new(key: Bytes, value: Bytes) -> Self {
        Self { key, value }
    }

    /// Returns the key as UTF-8, if it is valid UTF-8.
    ///
    /// Every path written by this workspace is UTF-8; binary keys only
    /// appear when a backend is shared with foreign writers.
    pub fn key_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.key).ok()
    }
}
