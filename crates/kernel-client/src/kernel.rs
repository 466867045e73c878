//! Compute session controller.
//!
//! A [`Kernel`] owns one session token and walks the session through
//! `Uninitialized -> Created -> Running -> Created ... -> Destroyed`.
//! Once destroyed, every operation fails with [`ClientError::SessionDestroyed`]
//! without touching the network.

use std::collections::BTreeMap;
use std::path::PathBuf;

use log::{debug, info, warn};
use reqwest::Method;
use serde_json::{json, Value};

use crate::error::{ClientError, Result};
use crate::handler::{ExecutionHandler, InputSource};
use crate::result::{ExecuteRequest, ExecutionMode, ExecutionResult, NextStep};
use crate::stream::{StreamChannel, StreamEvent};
use crate::transport::ApiClient;
use crate::upload::UploadForm;

const MIN_ID_LEN: usize = 8;
const MAX_ID_LEN: usize = 64;

/// Lifecycle of a session as seen by this client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelState {
    /// No create call has succeeded yet.
    Uninitialized,
    /// The session exists and no execution is in flight.
    Created,
    /// An execution turn has started and not finished.
    Running,
    /// Terminal.
    Destroyed,
}

impl std::fmt::Display for KernelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KernelState::Uninitialized => write!(f, "uninitialized"),
            KernelState::Created => write!(f, "created"),
            KernelState::Running => write!(f, "running"),
            KernelState::Destroyed => write!(f, "destroyed"),
        }
    }
}

/// Resource limits requested at creation time. Zero means the server default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceLimits {
    pub max_mem: u64,
    pub timeout: u64,
}

/// Random run identifier (hyphenated UUID, 36 characters).
pub fn generate_run_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Random session token (UUID without hyphens, 32 characters).
pub fn generate_session_token() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

fn check_id_length(kind: &str, value: &str) -> Result<()> {
    if value.len() < MIN_ID_LEN || value.len() > MAX_ID_LEN {
        return Err(ClientError::InvalidParameters(format!(
            "{} must be {} to {} bytes long, got {}",
            kind,
            MIN_ID_LEN,
            MAX_ID_LEN,
            value.len()
        )));
    }
    Ok(())
}

fn check_start_mode(mode: ExecutionMode) -> Result<()> {
    if !mode.starts_run() {
        return Err(ClientError::InvalidParameters(format!(
            "an execution must start in query or batch mode, not {}",
            mode
        )));
    }
    Ok(())
}

async fn next_input<I: InputSource>(input: &mut I) -> Result<String> {
    input.next_line().await.ok_or_else(|| {
        ClientError::InvalidParameters(
            "the program is waiting for input but the input source is exhausted".to_string(),
        )
    })
}

/// The message that follows `previous` after a non-final result.
async fn follow_up<I: InputSource>(
    previous: &ExecuteRequest,
    step: NextStep,
    input: &mut I,
) -> Result<ExecuteRequest> {
    match step {
        NextStep::SendInput => {
            let line = next_input(input).await?;
            Ok(previous.follow_up(ExecutionMode::Input, line))
        }
        _ => Ok(previous.follow_up(ExecutionMode::Continue, "")),
    }
}

/// A compute session on the remote service.
#[derive(Debug)]
pub struct Kernel {
    client: ApiClient,
    session_token: String,
    kernel_type: String,
    kernel_id: Option<String>,
    run_id: Option<String>,
    state: KernelState,
    resource_limits: ResourceLimits,
}

impl Kernel {
    /// Prepare a session object without contacting the server.
    ///
    /// `session_token` must be 8 to 64 bytes; `None` generates one. Reusing a
    /// token across kernel objects reuses the same remote session while it lives.
    pub fn new(client: ApiClient, session_token: Option<String>, kernel_type: impl Into<String>) -> Result<Self> {
        let session_token = match session_token {
            Some(token) => {
                check_id_length("session token", &token)?;
                token
            }
            None => generate_session_token(),
        };
        let kernel_type = kernel_type.into();
        if kernel_type.is_empty() {
            return Err(ClientError::InvalidParameters("kernel type must not be empty".to_string()));
        }

        Ok(Self {
            client,
            session_token,
            kernel_type,
            kernel_id: None,
            run_id: None,
            state: KernelState::Uninitialized,
            resource_limits: ResourceLimits::default(),
        })
    }

    /// Create the session if needed and return a ready kernel.
    pub async fn get_or_create(
        client: ApiClient,
        session_token: Option<String>,
        kernel_type: impl Into<String>,
    ) -> Result<Self> {
        let mut kernel = Self::new(client, session_token, kernel_type)?;
        kernel.create_if_not_exists().await?;
        Ok(kernel)
    }

    /// Use a session that already exists server-side, such as one kept alive
    /// by another process, without sending a create request.
    ///
    /// The kernel id stays unknown until the next create call.
    pub fn attach(client: ApiClient, session_token: impl Into<String>, kernel_type: impl Into<String>) -> Result<Self> {
        let mut kernel = Self::new(client, Some(session_token.into()), kernel_type)?;
        kernel.state = KernelState::Created;
        debug!("[kernel] Attached to session {}", kernel.session_token);
        Ok(kernel)
    }

    pub fn with_resource_limits(mut self, limits: ResourceLimits) -> Self {
        self.resource_limits = limits;
        self
    }

    pub fn session_token(&self) -> &str {
        &self.session_token
    }

    pub fn kernel_type(&self) -> &str {
        &self.kernel_type
    }

    /// Server-side kernel id, known after creation.
    pub fn kernel_id(&self) -> Option<&str> {
        self.kernel_id.as_deref()
    }

    /// Run identifier of the current or most recent execution turn.
    pub fn run_id(&self) -> Option<&str> {
        self.run_id.as_deref()
    }

    pub fn state(&self) -> KernelState {
        self.state
    }

    pub fn resource_limits(&self) -> ResourceLimits {
        self.resource_limits
    }

    fn session_path(&self) -> String {
        format!("/kernel/{}", self.session_token)
    }

    /// Fail fast, before any network call, unless the session is usable.
    fn ensure_ready(&self) -> Result<()> {
        match self.state {
            KernelState::Created | KernelState::Running => Ok(()),
            KernelState::Uninitialized => Err(ClientError::SessionNotCreated(self.session_token.clone())),
            KernelState::Destroyed => Err(ClientError::SessionDestroyed(self.session_token.clone())),
        }
    }

    /// Create the session, or attach to the live one with the same token.
    pub async fn create_if_not_exists(&mut self) -> Result<()> {
        if self.state == KernelState::Destroyed {
            return Err(ClientError::SessionDestroyed(self.session_token.clone()));
        }

        let body = json!({
            "lang": self.kernel_type,
            "clientSessionToken": self.session_token,
            "resourceLimits": {
                "maxMem": self.resource_limits.max_mem,
                "timeout": self.resource_limits.timeout,
            },
        });
        let response = self.client.request(Method::POST, "/kernel/create", Some(&body)).await?;
        let object = response.json_object()?;
        let kernel_id = object
            .get("kernelId")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ClientError::DecodeFailure("create response has no kernelId".to_string()))?;

        info!(
            "[kernel] Session {} ready (type={}, kernelId={})",
            self.session_token, self.kernel_type, kernel_id
        );
        self.kernel_id = Some(kernel_id.to_string());
        if self.state == KernelState::Uninitialized {
            self.state = KernelState::Created;
        }
        Ok(())
    }

    /// Perform one execute exchange.
    ///
    /// This does not loop; callers driving a run by hand should inspect the
    /// returned status and call again with `input` or `continue`.
    pub async fn execute(
        &mut self,
        mode: ExecutionMode,
        run_id: &str,
        code: &str,
        options: Option<Value>,
    ) -> Result<ExecutionResult> {
        self.ensure_ready()?;
        check_id_length("run id", run_id)?;
        let request = ExecuteRequest::new(mode, run_id, code, options);
        self.send_execute(&request).await
    }

    async fn send_execute(&mut self, request: &ExecuteRequest) -> Result<ExecutionResult> {
        let body = serde_json::to_value(request).map_err(|e| {
            ClientError::InvalidParameters(format!("Cannot encode execute request: {}", e))
        })?;
        self.run_id = Some(request.run_id.clone());
        self.state = KernelState::Running;

        let response = self
            .client
            .request(Method::POST, &self.session_path(), Some(&body))
            .await?;
        let result = ExecutionResult::from_object(response.json_object()?);
        debug!(
            "[kernel] {} mode={} -> {}",
            self.session_token, request.mode, result.status()
        );
        if result.is_finished() {
            self.state = KernelState::Created;
        }
        Ok(result)
    }

    /// Run `code` to completion by polling.
    ///
    /// Every result is passed to `handler` as it arrives. Waiting-input
    /// results pull one line from `input`; any other unfinished status asks
    /// for the next chunk. Returns the final result.
    pub async fn run<I: InputSource>(
        &mut self,
        mode: ExecutionMode,
        code: &str,
        options: Option<Value>,
        input: &mut I,
        handler: &mut ExecutionHandler<'_>,
    ) -> Result<ExecutionResult> {
        let outcome = self.run_polling(mode, code, options, input, handler).await;
        if let Err(e) = &outcome {
            handler.error(e);
        }
        outcome
    }

    async fn run_polling<I: InputSource>(
        &mut self,
        mode: ExecutionMode,
        code: &str,
        options: Option<Value>,
        input: &mut I,
        handler: &mut ExecutionHandler<'_>,
    ) -> Result<ExecutionResult> {
        check_start_mode(mode)?;
        self.ensure_ready()?;

        let mut request = ExecuteRequest::new(mode, generate_run_id(), code, options);
        loop {
            let result = self.send_execute(&request).await?;
            handler.result(&result);
            match result.status().next_step() {
                NextStep::Finish => return Ok(result),
                step => request = follow_up(&request, step, input).await?,
            }
        }
    }

    /// Run `code` to completion over the streaming channel.
    ///
    /// Follow-up messages go out on the same channel. After the final result
    /// the channel is closed normally and `handler`'s close callback fires.
    /// A channel that closes before the run finishes is a network failure.
    pub async fn stream_run<I: InputSource>(
        &mut self,
        mode: ExecutionMode,
        code: &str,
        options: Option<Value>,
        input: &mut I,
        handler: &mut ExecutionHandler<'_>,
    ) -> Result<ExecutionResult> {
        let outcome = self.run_streaming(mode, code, options, input, handler).await;
        if let Err(e) = &outcome {
            handler.error(e);
        }
        outcome
    }

    async fn run_streaming<I: InputSource>(
        &mut self,
        mode: ExecutionMode,
        code: &str,
        options: Option<Value>,
        input: &mut I,
        handler: &mut ExecutionHandler<'_>,
    ) -> Result<ExecutionResult> {
        check_start_mode(mode)?;
        self.ensure_ready()?;

        let path = format!("/stream/kernel/{}/execute", self.session_token);
        let mut channel = self.client.open_stream(&path).await?;
        let request = ExecuteRequest::new(mode, generate_run_id(), code, options);
        self.run_id = Some(request.run_id.clone());
        self.state = KernelState::Running;

        match drive_stream(&mut channel, request, input, handler).await {
            Ok(result) => {
                self.state = KernelState::Created;
                if let Err(e) = channel.close().await {
                    warn!("[kernel] Failed to close stream for {}: {}", self.session_token, e);
                }
                handler.closed(Some(1000), "");
                Ok(result)
            }
            Err(e) => {
                if !channel.is_closed() {
                    if let Err(close_err) = channel.close().await {
                        warn!("[kernel] Failed to close stream for {}: {}", self.session_token, close_err);
                    }
                }
                Err(e)
            }
        }
    }

    /// Best-effort interrupt of the running program.
    pub async fn interrupt(&self) -> Result<()> {
        self.ensure_ready()?;
        let path = format!("{}/interrupt", self.session_path());
        self.client.request(Method::POST, &path, None).await?;
        info!("[kernel] Interrupt sent to {}", self.session_token);
        Ok(())
    }

    /// Restart the session, keeping its working directory and mounts.
    pub async fn refresh(&mut self) -> Result<()> {
        self.ensure_ready()?;
        self.client.request(Method::PATCH, &self.session_path(), None).await?;
        self.state = KernelState::Created;
        info!("[kernel] Session {} restarted", self.session_token);
        Ok(())
    }

    /// Kernel type the server reports for this session.
    pub async fn fetch_type(&self) -> Result<String> {
        self.ensure_ready()?;
        let response = self.client.request(Method::GET, &self.session_path(), None).await?;
        let object = response.json_object()?;
        object
            .get("lang")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| ClientError::DecodeFailure("session info has no lang".to_string()))
    }

    /// Whether the server-side kernel type matches the one this object was created with.
    pub async fn verify_type(&self) -> Result<bool> {
        let remote = self.fetch_type().await?;
        if remote != self.kernel_type {
            warn!(
                "[kernel] Session {} runs {} but {} was requested",
                self.session_token, remote, self.kernel_type
            );
        }
        Ok(remote == self.kernel_type)
    }

    /// Upload local files (remote relative path -> local path) into the session.
    pub async fn upload(&self, files: &BTreeMap<String, PathBuf>) -> Result<()> {
        self.ensure_ready()?;
        let form = UploadForm::from_paths(files).await?;
        self.upload_form(form).await
    }

    pub async fn upload_form(&self, form: UploadForm) -> Result<()> {
        self.ensure_ready()?;
        if form.is_empty() {
            return Ok(());
        }
        let count = form.len();
        let path = format!("{}/upload", self.session_path());
        self.client.upload(&path, form).await?;
        info!("[kernel] Uploaded {} file(s) to {}", count, self.session_token);
        Ok(())
    }

    /// Destroy the session. The object is unusable afterwards.
    ///
    /// A session the server already forgot counts as destroyed.
    pub async fn destroy(&mut self) -> Result<()> {
        self.ensure_ready()?;
        match self.client.request(Method::DELETE, &self.session_path(), None).await {
            Ok(_) => {}
            Err(ClientError::KernelExpired(message)) => {
                debug!("[kernel] {} was already gone: {}", self.session_token, message);
            }
            Err(e) => return Err(e),
        }
        self.state = KernelState::Destroyed;
        self.run_id = None;
        info!("[kernel] Session {} destroyed", self.session_token);
        Ok(())
    }
}

async fn drive_stream<I: InputSource>(
    channel: &mut StreamChannel,
    mut request: ExecuteRequest,
    input: &mut I,
    handler: &mut ExecutionHandler<'_>,
) -> Result<ExecutionResult> {
    channel.send(&request).await?;
    loop {
        match channel.next_event().await? {
            StreamEvent::Result(result) => {
                handler.result(&result);
                match result.status().next_step() {
                    NextStep::Finish => return Ok(result),
                    step => {
                        request = follow_up(&request, step, input).await?;
                        channel.send(&request).await?;
                    }
                }
            }
            StreamEvent::Closed { code, reason } => {
                handler.closed(code, &reason);
                return Err(ClientError::NetworkFailure(format!(
                    "Stream closed before the execution finished (code {:?}): {}",
                    code, reason
                )));
            }
        }
    }
}
