//! Signed HTTP transport.
//!
//! [`ApiClient`] owns the shared configuration, signer and connection pool.
//! It is cheap to clone; build one per process and hand it to every kernel.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, warn};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, DATE, USER_AGENT};
use reqwest::Method;
use serde_json::Value;

use crate::auth::{format_timestamp, Signer};
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::response::{classify, ApiResponse};
use crate::stream::StreamChannel;
use crate::upload::UploadForm;

pub const JSON_CONTENT_TYPE: &str = "application/json";
const MULTIPART_CONTENT_TYPE: &str = "multipart/form-data";
const VERSION_HEADER: &str = "x-backendai-version";

/// Client for the kernel API.
#[derive(Debug, Clone)]
pub struct ApiClient {
    config: Arc<ClientConfig>,
    signer: Signer,
    http: reqwest::Client,
}

impl ApiClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent())
            .build()
            .map_err(|e| ClientError::Configuration(format!("Failed to create HTTP client: {}", e)))?;
        let config = Arc::new(config);
        Ok(Self {
            signer: Signer::new(config.clone()),
            config,
            http,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn signer(&self) -> &Signer {
        &self.signer
    }

    /// Validate an unversioned API path and prefix it with the major version.
    fn versioned_path(&self, path: &str) -> Result<String> {
        if !path.starts_with('/') {
            return Err(ClientError::InvalidParameters(format!(
                "path must start with a slash: {:?}",
                path
            )));
        }
        Ok(self.config.versioned_path(path))
    }

    /// Headers shared by plain requests and the stream handshake.
    fn signed_headers(
        &self,
        method: &Method,
        versioned_path: &str,
        now: &DateTime<Utc>,
        content_type: &str,
        signed_body: &[u8],
    ) -> Result<HeaderMap> {
        let credential = self.signer.sign(
            method.as_str(),
            versioned_path,
            now,
            content_type,
            signed_body,
        )?;

        let mut headers = HeaderMap::new();
        headers.insert(VERSION_HEADER, header_value(self.config.api_version())?);
        headers.insert(DATE, header_value(&format_timestamp(now))?);
        headers.insert(USER_AGENT, header_value(self.config.user_agent())?);
        headers.insert(AUTHORIZATION, header_value(&self.signer.authorization(&credential))?);
        Ok(headers)
    }

    /// Build a signed request without sending it.
    ///
    /// The JSON body is always part of the signature, but GET requests never
    /// carry it on the wire.
    pub fn prepare(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        now: DateTime<Utc>,
    ) -> Result<reqwest::Request> {
        let versioned_path = self.versioned_path(path)?;
        let encoded = match body {
            Some(value) => serde_json::to_vec(value).map_err(|e| {
                ClientError::InvalidParameters(format!("Cannot encode request body: {}", e))
            })?,
            None => Vec::new(),
        };

        let mut headers = self.signed_headers(&method, &versioned_path, &now, JSON_CONTENT_TYPE, &encoded)?;
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));

        let wire_body = if method == Method::GET { Vec::new() } else { encoded };
        headers.insert(CONTENT_LENGTH, HeaderValue::from(wire_body.len()));

        let mut builder = self
            .http
            .request(method, self.config.api_url(&versioned_path))
            .headers(headers);
        if !wire_body.is_empty() {
            builder = builder.body(wire_body);
        }
        builder
            .build()
            .map_err(|e| ClientError::InvalidParameters(format!("Cannot build request: {}", e)))
    }

    /// Send a signed JSON request and return the response, or the classified failure.
    pub async fn request(&self, method: Method, path: &str, body: Option<&Value>) -> Result<ApiResponse> {
        let request = self.prepare(method, path, body, Utc::now())?;
        debug!("[transport] {} {}", request.method(), request.url().path());
        self.send(path, request).await
    }

    /// Upload files as `multipart/form-data`.
    pub async fn upload(&self, path: &str, form: UploadForm) -> Result<ApiResponse> {
        let versioned_path = self.versioned_path(path)?;
        let now = Utc::now();
        let headers = self.signed_headers(&Method::POST, &versioned_path, &now, MULTIPART_CONTENT_TYPE, b"")?;

        let request = self
            .http
            .post(self.config.api_url(&versioned_path))
            .headers(headers)
            .multipart(form.into_multipart())
            .build()
            .map_err(|e| ClientError::InvalidParameters(format!("Cannot build upload request: {}", e)))?;
        debug!("[transport] POST {} (multipart)", request.url().path());
        self.send(path, request).await
    }

    /// Headers of the stream handshake: a signed, bodyless GET.
    fn stream_headers(&self, versioned_path: &str, now: &DateTime<Utc>) -> Result<HeaderMap> {
        let mut headers = self.signed_headers(&Method::GET, versioned_path, now, JSON_CONTENT_TYPE, b"")?;
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
        headers.insert(CONTENT_LENGTH, HeaderValue::from(0usize));
        Ok(headers)
    }

    /// Open the persistent streaming channel at `path` with a signed handshake.
    pub async fn open_stream(&self, path: &str) -> Result<StreamChannel> {
        let versioned_path = self.versioned_path(path)?;
        let headers = self.stream_headers(&versioned_path, &Utc::now())?;

        let url = self.config.stream_url(&versioned_path)?;
        debug!("[transport] GET {} (stream handshake)", versioned_path);
        StreamChannel::connect(&url, path, headers).await
    }

    async fn send(&self, path: &str, request: reqwest::Request) -> Result<ApiResponse> {
        let response = self.http.execute(request).await?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await?.to_vec();

        let response = ApiResponse {
            status,
            content_type,
            body,
        };
        if response.is_success() {
            Ok(response)
        } else {
            let err = classify(path, &response);
            warn!("[transport] {} failed: {}", path, err);
            Err(err)
        }
    }
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|_| ClientError::Configuration(format!("Invalid header value: {:?}", value)))
}
