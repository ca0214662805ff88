//! Shared-secret request signatures.
//!
//! Containers authenticate artifact requests by signing the request fields
//! with their secret:
//!
//! ```text
//! sha256_hex("k1=v1&k2=v2&...&kn=vn" + secret)    keys in ascending order
//! ```
//!
//! Fields are held in a [`BTreeMap`], so the digest never depends on the
//! order in which the caller inserted them.

use std::{collections::BTreeMap, time::Duration};

use chrono::Utc;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::error::{AuthError, Result};

/// Signs `fields` with `secret`, returning the lowercase hex digest.
///
/// # Examples
///
/// ```
/// use std::collections::BTreeMap;
/// use appstore_authn::signature::sign;
///
/// let fields = BTreeMap::from([("id", "c1".to_owned()), ("timestamp", "1700000000".to_owned())]);
/// let digest = sign("s3cret", &fields);
/// assert_eq!(digest.len(), 64);
/// assert_eq!(digest, sign("s3cret", &fields));
/// ```
pub fn sign<K, V>(secret: &str, fields: &BTreeMap<K, V>) -> String
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut hasher = Sha256::new();
    for (i, (key, value)) in fields.iter().enumerate() {
        if i > 0 {
            hasher.update(b"&");
        }
        hasher.update(key.as_ref().as_bytes());
        hasher.update(b"=");
        hasher.update(value.as_ref().as_bytes());
    }
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// Verifies `signature` over `fields` and checks that `timestamp` (Unix
/// seconds) lies within `max_age` of now in either direction.
///
/// The digest comparison runs in constant time.
///
/// # Errors
///
/// Returns [`AuthError::SignatureInvalid`] if the digest does not match or
/// the timestamp is outside the window.
pub fn verify_signature<K, V>(
    secret: &str,
    fields: &BTreeMap<K, V>,
    signature: &str,
    timestamp: i64,
    max_age: Duration,
) -> Result<()>
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    let expected = sign(secret, fields);
    let provided = signature.to_ascii_lowercase();
    if !bool::from(expected.as_bytes().ct_eq(provided.as_bytes())) {
        tracing::debug!("Signature mismatch");
        return Err(AuthError::SignatureInvalid);
    }

    let now = unix_now();
    let age = now.abs_diff(timestamp);
    if age > max_age.as_secs() {
        tracing::debug!(timestamp, now, "Signed timestamp outside accepted window");
        return Err(AuthError::SignatureInvalid);
    }
    Ok(())
}

/// Current time as Unix seconds.
pub fn unix_now() -> i64 {
    Utc::now().timestamp()
}
