//! Client configuration.
//!
//! A [`ClientConfig`] is resolved once (from flags, environment, or code) and
//! then shared read-only by the signer, the transport, and every kernel.

use url::Url;

use crate::error::{ClientError, Result};

pub const DEFAULT_ENDPOINT: &str = "https://api.backend.ai";
pub const DEFAULT_HOSTNAME: &str = "api.backend.ai";
pub const DEFAULT_API_VERSION_MAJOR: &str = "v2";
pub const DEFAULT_API_VERSION: &str = "v2.20170315";

/// HMAC hash used for the signing key chain and the request signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HashType {
    #[default]
    Sha256,
    Sha512,
}

impl HashType {
    /// Name used in the `signMethod` part of the Authorization header.
    pub fn sign_method(&self) -> &'static str {
        match self {
            HashType::Sha256 => "HMAC-SHA256",
            HashType::Sha512 => "HMAC-SHA512",
        }
    }
}

impl std::fmt::Display for HashType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.sign_method())
    }
}

/// Immutable, validated client configuration.
#[derive(Clone)]
pub struct ClientConfig {
    access_key: String,
    secret_key: String,
    endpoint: Url,
    api_version_major: String,
    api_version: String,
    hash_type: HashType,
    hostname: String,
    user_agent: String,
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("endpoint", &self.endpoint.as_str())
            .field("api_version", &self.api_version)
            .field("hash_type", &self.hash_type)
            .field("hostname", &self.hostname)
            .finish()
    }
}

impl ClientConfig {
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    pub fn access_key(&self) -> &str {
        &self.access_key
    }

    pub fn secret_key(&self) -> &str {
        &self.secret_key
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn api_version_major(&self) -> &str {
        &self.api_version_major
    }

    pub fn api_version(&self) -> &str {
        &self.api_version
    }

    pub fn hash_type(&self) -> HashType {
        self.hash_type
    }

    /// Host name mixed into the signing key and the canonical request.
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Prefix an API path with the major version segment (`/kernel/x` -> `/v2/kernel/x`).
    pub fn versioned_path(&self, path: &str) -> String {
        format!("/{}{}", self.api_version_major, path)
    }

    /// Absolute HTTP URL for an already-versioned path.
    pub fn api_url(&self, versioned_path: &str) -> String {
        format!(
            "{}{}",
            self.endpoint.as_str().trim_end_matches('/'),
            versioned_path
        )
    }

    /// Absolute websocket URL (`ws`/`wss`) for an already-versioned path.
    pub fn stream_url(&self, versioned_path: &str) -> Result<String> {
        let mut url = self.endpoint.clone();
        let scheme = match url.scheme() {
            "https" => "wss",
            _ => "ws",
        };
        url.set_scheme(scheme).map_err(|_| {
            ClientError::Configuration(format!("Cannot derive websocket URL from {}", self.endpoint))
        })?;
        Ok(format!("{}{}", url.as_str().trim_end_matches('/'), versioned_path))
    }
}

/// Chained builder for [`ClientConfig`]. Validation happens in [`build`](Self::build).
#[derive(Debug, Clone)]
pub struct ClientConfigBuilder {
    access_key: Option<String>,
    secret_key: Option<String>,
    endpoint: String,
    api_version_major: String,
    api_version: String,
    hash_type: HashType,
    hostname: String,
    user_agent: String,
}

impl Default for ClientConfigBuilder {
    fn default() -> Self {
        Self {
            access_key: None,
            secret_key: None,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_version_major: DEFAULT_API_VERSION_MAJOR.to_string(),
            api_version: DEFAULT_API_VERSION.to_string(),
            hash_type: HashType::default(),
            hostname: DEFAULT_HOSTNAME.to_string(),
            user_agent: format!(
                "Backend.AI Client Library (Rust/v{})",
                env!("CARGO_PKG_VERSION")
            ),
        }
    }
}

impl ClientConfigBuilder {
    /// Seed a builder from `BACKEND_ACCESS_KEY`, `BACKEND_SECRET_KEY` and
    /// `BACKEND_ENDPOINT`. Unset variables keep their defaults.
    pub fn from_env() -> Self {
        let mut builder = Self::default();
        if let Ok(key) = std::env::var("BACKEND_ACCESS_KEY") {
            builder.access_key = Some(key);
        }
        if let Ok(key) = std::env::var("BACKEND_SECRET_KEY") {
            builder.secret_key = Some(key);
        }
        if let Ok(endpoint) = std::env::var("BACKEND_ENDPOINT") {
            builder.endpoint = endpoint;
        }
        builder
    }

    pub fn access_key(mut self, val: impl Into<String>) -> Self {
        self.access_key = Some(val.into());
        self
    }

    pub fn secret_key(mut self, val: impl Into<String>) -> Self {
        self.secret_key = Some(val.into());
        self
    }

    pub fn endpoint(mut self, val: impl Into<String>) -> Self {
        self.endpoint = val.into();
        self
    }

    pub fn hostname(mut self, val: impl Into<String>) -> Self {
        self.hostname = val.into();
        self
    }

    pub fn api_version(mut self, val: impl Into<String>) -> Self {
        self.api_version = val.into();
        self
    }

    pub fn api_version_major(mut self, val: impl Into<String>) -> Self {
        self.api_version_major = val.into();
        self
    }

    pub fn hash_type(mut self, val: HashType) -> Self {
        self.hash_type = val;
        self
    }

    pub fn user_agent(mut self, val: impl Into<String>) -> Self {
        self.user_agent = val.into();
        self
    }

    pub fn build(self) -> Result<ClientConfig> {
        let access_key = self
            .access_key
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ClientError::Configuration("No access key".to_string()))?;
        let secret_key = self
            .secret_key
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ClientError::Configuration("No secret key".to_string()))?;

        let endpoint = Url::parse(&self.endpoint)
            .map_err(|e| ClientError::Configuration(format!("Malformed endpoint URL: {}", e)))?;
        if !matches!(endpoint.scheme(), "http" | "https") || endpoint.host_str().is_none() {
            return Err(ClientError::Configuration(format!(
                "Malformed endpoint URL: {}",
                self.endpoint
            )));
        }
        if self.api_version_major.is_empty() || self.api_version_major.contains('/') {
            return Err(ClientError::Configuration(format!(
                "Invalid API version segment: {:?}",
                self.api_version_major
            )));
        }

        Ok(ClientConfig {
            access_key,
            secret_key,
            endpoint,
            api_version_major: self.api_version_major,
            api_version: self.api_version,
            hash_type: self.hash_type,
            hostname: self.hostname,
            user_agent: self.user_agent,
        })
    }
}
