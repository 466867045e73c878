//! Response decoding and error classification.

use serde_json::{Map, Value};

use crate::error::{ClientError, Result};

/// A fully read HTTP response.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Parse the body as a single JSON object.
    pub fn json_object(&self) -> Result<Map<String, Value>> {
        parse_json_object(self.content_type.as_deref(), &self.body)
    }

    /// Body as text, lossily decoded.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

fn is_json_content_type(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    essence == "application/json" || essence == "application/problem+json"
}

/// Parse a body that the server declared as JSON into a single object.
///
/// A non-JSON content type, a syntax error, and a non-object root are all
/// decode failures.
pub fn parse_json_object(content_type: Option<&str>, body: &[u8]) -> Result<Map<String, Value>> {
    match content_type {
        Some(ct) if is_json_content_type(ct) => {}
        other => {
            return Err(ClientError::DecodeFailure(format!(
                "Expected JSON response but the server returned: {}",
                other.unwrap_or("no content type")
            )))
        }
    }

    let value: Value = serde_json::from_slice(body).map_err(|e| {
        ClientError::DecodeFailure(format!("Could not parse JSON from the response body: {}", e))
    })?;
    match value {
        Value::Object(object) => Ok(object),
        other => Err(ClientError::DecodeFailure(format!(
            "The body must contain a single JSON object at root, got: {}",
            other
        ))),
    }
}

/// Best-effort human-readable message for a failed response.
fn error_message(response: &ApiResponse) -> String {
    if let Ok(object) = response.json_object() {
        if let Some(title) = object.get("title").and_then(|t| t.as_str()) {
            return title.to_string();
        }
    }
    response.text()
}

/// Whether an unversioned API path addresses one specific session.
fn is_session_scoped(path: &str) -> bool {
    let rest = path
        .strip_prefix("/stream/kernel/")
        .or_else(|| path.strip_prefix("/kernel/"));
    match rest {
        Some(rest) => {
            let token = rest.split('/').next().unwrap_or_default();
            !token.is_empty() && token != "create"
        }
        None => false,
    }
}

/// Map a non-2xx response for `path` into the error taxonomy.
pub fn classify(path: &str, response: &ApiResponse) -> ClientError {
    let status = response.status;
    let message = error_message(response);

    if status > 500 {
        return ClientError::ServiceUnavailable { status, message };
    }
    match status {
        401 => ClientError::AuthorizationFailure(message),
        412 | 429 => ClientError::ResourceLimitExceeded { status, message },
        404 if is_session_scoped(path) => ClientError::KernelExpired(message),
        _ => ClientError::Unknown { status, message },
    }
}
