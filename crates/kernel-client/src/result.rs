//! Execution value types and the result decoder.
//!
//! Responses look like:
//!
//! ```json
//! {"result": {"status": "continued", "console": [["stdout", "hi\n"]], "files": []}}
//! ```
//!
//! Decoding never fails on shape: a missing envelope or an unknown status
//! degrades to [`RunStatus::Unknown`] with empty output, so an execution loop
//! never crashes on a response it does not understand.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ClientError, Result};

/// How the code in an execute request should be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Run a code snippet directly.
    Query,
    /// Build and execute uploaded files.
    Batch,
    /// Feed one line of user input to the running program.
    Input,
    /// Ask for the next chunk of output from a running program.
    Continue,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::Query => "query",
            ExecutionMode::Batch => "batch",
            ExecutionMode::Input => "input",
            ExecutionMode::Continue => "continue",
        }
    }

    /// Whether this mode starts a new logical execution.
    pub fn starts_run(&self) -> bool {
        matches!(self, ExecutionMode::Query | ExecutionMode::Batch)
    }
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Run status reported by the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunStatus {
    Continued,
    WaitingInput,
    BuildFinished,
    Finished,
    /// Any status string this client does not know about.
    #[serde(other)]
    Unknown,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Continued => "continued",
            RunStatus::WaitingInput => "waiting-input",
            RunStatus::BuildFinished => "build-finished",
            RunStatus::Finished => "finished",
            RunStatus::Unknown => "",
        }
    }

    /// What the execution loop does after receiving this status.
    pub fn next_step(&self) -> NextStep {
        match self {
            RunStatus::Finished => NextStep::Finish,
            RunStatus::WaitingInput => NextStep::SendInput,
            _ => NextStep::Continue,
        }
    }
}

impl From<&str> for RunStatus {
    fn from(value: &str) -> Self {
        match value {
            "continued" => RunStatus::Continued,
            "waiting-input" => RunStatus::WaitingInput,
            "build-finished" => RunStatus::BuildFinished,
            "finished" => RunStatus::Finished,
            _ => RunStatus::Unknown,
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Unknown => f.write_str("unknown"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Transition of the execution loop after one result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextStep {
    /// The turn is over.
    Finish,
    /// Send one line of input with mode `input`.
    SendInput,
    /// Send an empty `continue` request for the next chunk.
    Continue,
}

/// Wire payload for one execute request or stream message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecuteRequest {
    pub mode: ExecutionMode,
    pub code: String,
    #[serde(rename = "runId")]
    pub run_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<Value>,
}

impl ExecuteRequest {
    pub fn new(
        mode: ExecutionMode,
        run_id: impl Into<String>,
        code: impl Into<String>,
        options: Option<Value>,
    ) -> Self {
        Self {
            mode,
            code: code.into(),
            run_id: run_id.into(),
            options,
        }
    }

    /// The next message of the same run. Options only travel with the first message.
    pub fn follow_up(&self, mode: ExecutionMode, code: impl Into<String>) -> Self {
        Self {
            mode,
            code: code.into(),
            run_id: self.run_id.clone(),
            options: None,
        }
    }
}

/// Decoded execution result.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    status: RunStatus,
    stdout: String,
    stderr: String,
    raw: Value,
}

impl ExecutionResult {
    /// Decode a full response envelope (`{"result": {...}}`).
    pub fn from_json(raw: Value) -> Self {
        let mut status = RunStatus::Unknown;
        let mut stdout = String::new();
        let mut stderr = String::new();

        if let Some(result) = raw.get("result").and_then(|v| v.as_object()) {
            if let Some(s) = result.get("status").and_then(|v| v.as_str()) {
                status = RunStatus::from(s);
            }
            let entries = result
                .get("console")
                .and_then(|v| v.as_array())
                .map(|a| a.as_slice())
                .unwrap_or_default();
            for entry in entries {
                let Some(pair) = entry.as_array() else {
                    continue;
                };
                let kind = pair.first().and_then(|v| v.as_str());
                let text = pair.get(1).and_then(|v| v.as_str());
                match (kind, text) {
                    (Some("stdout"), Some(text)) => stdout.push_str(text),
                    (Some("stderr"), Some(text)) => stderr.push_str(text),
                    _ => {}
                }
            }
        }

        Self {
            status,
            stdout,
            stderr,
            raw,
        }
    }

    /// Decode a response object already parsed from an HTTP body.
    pub fn from_object(object: Map<String, Value>) -> Self {
        Self::from_json(Value::Object(object))
    }

    /// Decode one streaming message. The stream carries the inner result object,
    /// which is wrapped as `{"result": ...}` before decoding.
    pub fn from_stream_message(text: &str) -> Result<Self> {
        let inner: Value = serde_json::from_str(text).map_err(|e| {
            ClientError::DecodeFailure(format!("Could not parse stream message: {}", e))
        })?;
        let mut envelope = Map::new();
        envelope.insert("result".to_string(), inner);
        Ok(Self::from_object(envelope))
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn stdout(&self) -> &str {
        &self.stdout
    }

    pub fn stderr(&self) -> &str {
        &self.stderr
    }

    /// The payload exactly as received.
    pub fn raw(&self) -> &Value {
        &self.raw
    }

    /// Files reported by the kernel, if any.
    pub fn files(&self) -> &[Value] {
        self.raw
            .get("result")
            .and_then(|r| r.get("files"))
            .and_then(|f| f.as_array())
            .map(|a| a.as_slice())
            .unwrap_or_default()
    }

    pub fn is_finished(&self) -> bool {
        self.status == RunStatus::Finished
    }

    pub fn is_continued(&self) -> bool {
        self.status == RunStatus::Continued
    }

    pub fn is_waiting_input(&self) -> bool {
        self.status == RunStatus::WaitingInput
    }

    /// Re-encode the raw payload as compact JSON, preserving key order.
    pub fn to_json_string(&self) -> String {
        self.raw.to_string()
    }
}
