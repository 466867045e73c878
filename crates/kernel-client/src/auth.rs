//! Request signing.
//!
//! Every API call carries a credential derived from the secret key:
//!
//! ```text
//! signing_key = HMAC(HMAC(secret_key, "YYYYMMDD"), hostname)
//! canonical   = METHOD \n PATH \n TIMESTAMP+00:00 \n host:HOST \n
//!               content-type:TYPE \n x-backendai-version:VERSION \n SHA256(body)
//! credential  = access_key ":" hex(HMAC(signing_key, canonical))
//! ```
//!
//! The signing key only depends on the UTC calendar day and the host, so it is
//! cached and recomputed when the day rolls over.

use std::sync::{Arc, Mutex as StdMutex};

use chrono::{DateTime, NaiveDate, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256, Sha512};

use crate::config::{ClientConfig, HashType};
use crate::error::{ClientError, Result};

/// Format a timestamp the way both the `Date` header and the canonical request expect.
pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    format!("{}+00:00", timestamp.format("%Y-%m-%dT%H:%M:%S"))
}

fn hmac_digest(hash_type: HashType, key: &[u8], data: &[u8]) -> Vec<u8> {
    match hash_type {
        HashType::Sha256 => {
            let mut mac =
                Hmac::<Sha256>::new_from_slice(key).expect("HMAC can accept any key size");
            mac.update(data);
            mac.finalize().into_bytes().to_vec()
        }
        HashType::Sha512 => {
            let mut mac =
                Hmac::<Sha512>::new_from_slice(key).expect("HMAC can accept any key size");
            mac.update(data);
            mac.finalize().into_bytes().to_vec()
        }
    }
}

/// Derives per-request credentials from a [`ClientConfig`].
#[derive(Clone)]
pub struct Signer {
    config: Arc<ClientConfig>,
    /// Signing key for the day it was derived on.
    cached_key: Arc<StdMutex<Option<(NaiveDate, Vec<u8>)>>>,
}

// The cached key signs any request for the rest of its day; only its day is shown.
impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let cached_day = self
            .cached_key
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .map(|(day, _)| *day);
        f.debug_struct("Signer")
            .field("config", &self.config)
            .field("cached_day", &cached_day)
            .finish_non_exhaustive()
    }
}

impl Signer {
    pub fn new(config: Arc<ClientConfig>) -> Self {
        Self {
            config,
            cached_key: Arc::new(StdMutex::new(None)),
        }
    }

    /// Sign one request and return `access_key:signature`.
    ///
    /// `path` is the exact (versioned) path that goes on the wire and must start
    /// with `/`. `content_type` is the bare `type/subtype`. `body` is hashed even
    /// when it is not transmitted.
    pub fn sign(
        &self,
        method: &str,
        path: &str,
        timestamp: &DateTime<Utc>,
        content_type: &str,
        body: &[u8],
    ) -> Result<String> {
        if !path.starts_with('/') {
            return Err(ClientError::InvalidParameters(format!(
                "path must start with a slash: {:?}",
                path
            )));
        }

        let signing_key = self.signing_key(timestamp.date_naive());
        let canonical = self.canonical_request(method, path, timestamp, content_type, body);
        let signature = hmac_digest(
            self.config.hash_type(),
            &signing_key,
            canonical.as_bytes(),
        );

        Ok(format!(
            "{}:{}",
            self.config.access_key(),
            hex::encode(signature)
        ))
    }

    /// Value for the `Authorization` header.
    pub fn authorization(&self, credential: &str) -> String {
        format!(
            "BackendAI signMethod={}, credential={}",
            self.config.hash_type().sign_method(),
            credential
        )
    }

    fn canonical_request(
        &self,
        method: &str,
        path: &str,
        timestamp: &DateTime<Utc>,
        content_type: &str,
        body: &[u8],
    ) -> String {
        let body_hash = hex::encode(Sha256::digest(body));
        format!(
            "{}\n{}\n{}\nhost:{}\ncontent-type:{}\nx-backendai-version:{}\n{}",
            method,
            path,
            format_timestamp(timestamp),
            self.config.hostname(),
            content_type,
            self.config.api_version(),
            body_hash
        )
    }

    pub(crate) fn signing_key(&self, day: NaiveDate) -> Vec<u8> {
        let mut cached = self
            .cached_key
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some((cached_day, key)) = cached.as_ref() {
            if *cached_day == day {
                return key.clone();
            }
        }

        let hash_type = self.config.hash_type();
        let date_key = hmac_digest(
            hash_type,
            self.config.secret_key().as_bytes(),
            day.format("%Y%m%d").to_string().as_bytes(),
        );
        let key = hmac_digest(hash_type, &date_key, self.config.hostname().as_bytes());
        *cached = Some((day, key.clone()));
        key
    }

    #[cfg(test)]
    fn cached_day(&self) -> Option<NaiveDate> {
        self.cached_key
            .lock()
            .unwrap()
            .as_ref()
            .map(|(day, _)| *day)
    }
}
