//! Object storage collaborator.
//!
//! Artifacts never pass through the app store; clients upload and download
//! them directly with time-bound signed URLs minted by an [`ObjectStorage`].
//!
//! [`PresignedUrlSigner`] is a self-contained implementation: it signs
//! `{method}\n{key}\n{expires}` with HMAC-SHA256 and appends the result as a
//! query string, and [`verify`](PresignedUrlSigner::verify) checks such a
//! URL on the serving side.

use std::{collections::BTreeMap, time::Duration};

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::{
    error::{AppStoreError, Result},
    model::UploadTicket,
};

type HmacSha256 = Hmac<Sha256>;

/// Mints signed artifact URLs.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Returns an upload ticket for `key`, valid for `ttl`.
    ///
    /// # Errors
    ///
    /// Returns [`AppStoreError::Unavailable`] if the collaborator fails.
    async fn signed_put_url(&self, key: &str, ttl: Duration) -> Result<UploadTicket>;

    /// Returns a download URL for `key`, valid for `ttl`.
    ///
    /// # Errors
    ///
    /// Returns [`AppStoreError::Unavailable`] if the collaborator fails.
    async fn signed_get_url(&self, key: &str, ttl: Duration) -> Result<String>;
}

/// HMAC-signed URL issuer for a single bucket endpoint.
#[derive(Clone)]
pub struct PresignedUrlSigner {
    base_url: String,
    key: Vec<u8>,
}

impl std::fmt::Debug for PresignedUrlSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PresignedUrlSigner").field("base_url", &self.base_url).finish_non_exhaustive()
    }
}

impl PresignedUrlSigner {
    /// Creates a signer for objects under `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`AppStoreError::InvalidInput`] if `signing_key` is empty.
    pub fn new(base_url: impl Into<String>, signing_key: impl Into<Vec<u8>>) -> Result<Self> {
        let key = signing_key.into();
        if key.is_empty() {
            return Err(AppStoreError::invalid("signing_key", "must not be empty"));
        }
        let base_url = base_url.into().trim_end_matches('/').to_owned();
        Ok(Self { base_url, key })
    }

    fn mac(&self) -> Result<HmacSha256> {
        HmacSha256::new_from_slice(&self.key)
            .map_err(|e| AppStoreError::internal(format!("invalid signing key: {e}")))
    }

    fn signature(&self, method: &str, key: &str, expires: i64) -> Result<String> {
        let mut mac = self.mac()?;
        mac.update(format!("{method}\n{key}\n{expires}").as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn sign_url(&self, method: &str, key: &str, ttl: Duration) -> Result<String> {
        let ttl = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        let expires = Utc::now().timestamp().saturating_add(ttl);
        let signature = self.signature(method, key, expires)?;
        Ok(format!(
            "{}/{key}?method={method}&expires={expires}&signature={signature}",
            self.base_url
        ))
    }

    /// Checks a signature produced by this signer.
    ///
    /// Returns `false` if the signature does not match or `expires` has
    /// passed. The comparison runs in constant time.
    pub fn verify(&self, method: &str, key: &str, expires: i64, signature: &str) -> bool {
        if expires < Utc::now().timestamp() {
            return false;
        }
        let (Ok(mut mac), Ok(provided)) = (self.mac(), hex::decode(signature)) else {
            return false;
        };
        mac.update(format!("{method}\n{key}\n{expires}").as_bytes());
        mac.verify_slice(&provided).is_ok()
    }

    /// Parses and checks a URL produced by this signer.
    pub fn verify_url(&self, url: &str) -> bool {
        let Some(rest) = url.strip_prefix(&self.base_url).and_then(|r| r.strip_prefix('/')) else {
            return false;
        };
        let Some((key, query)) = rest.split_once('?') else {
            return false;
        };
        let params: BTreeMap<&str, &str> =
            query.split('&').filter_map(|pair| pair.split_once('=')).collect();
        let (Some(method), Some(expires), Some(signature)) =
            (params.get("method"), params.get("expires"), params.get("signature"))
        else {
            return false;
        };
        let Ok(expires) = expires.parse::<i64>() else {
            return false;
        };
        self.verify(method, key, expires, signature)
    }
}

#[async_trait]
impl ObjectStorage for PresignedUrlSigner {
    async fn signed_put_url(&self, key: &str, ttl: Duration) -> Result<UploadTicket> {
        Ok(UploadTicket {
            url: self.sign_url("PUT", key, ttl)?,
            method: "PUT".to_owned(),
            fields: BTreeMap::new(),
            key: key.to_owned(),
        })
    }

    async fn signed_get_url(&self, key: &str, ttl: Duration) -> Result<String> {
        self.sign_url("GET", key, ttl)
    }
}
