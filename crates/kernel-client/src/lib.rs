//! kernel-client - Client library for remote compute-kernel sessions.
//!
//! This crate creates sessions on a Backend.AI-compatible service, runs code
//! in them (by polling or over a streaming channel), feeds user input to
//! waiting programs, uploads files, and tears sessions down.
//!
//! Every request is signed with an HMAC key derived from the secret key, the
//! current UTC date and the service hostname. One [`ApiClient`] is built per
//! process from a read-only [`ClientConfig`] and shared by every [`Kernel`].
//!
//! ```no_run
//! use std::collections::VecDeque;
//! use kernel_client::{ApiClient, ClientConfig, ExecutionHandler, ExecutionMode, Kernel};
//!
//! # async fn demo() -> kernel_client::Result<()> {
//! let client = ApiClient::new(ClientConfig::builder().access_key("ak").secret_key("sk").build()?)?;
//! let mut kernel = Kernel::get_or_create(client, None, "python3").await?;
//! let mut handler = ExecutionHandler::new(|r| print!("{}", r.stdout()));
//! kernel
//!     .run(ExecutionMode::Query, "print('hi')", None, &mut VecDeque::<String>::new(), &mut handler)
//!     .await?;
//! kernel.destroy().await?;
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod handler;
pub mod kernel;
pub mod response;
pub mod result;
pub mod stream;
pub mod transport;
pub mod upload;

pub use auth::Signer;
pub use config::{ClientConfig, ClientConfigBuilder, HashType};
pub use error::{ClientError, Result};
pub use handler::{ExecutionHandler, InputSource};
pub use kernel::{generate_run_id, generate_session_token, Kernel, KernelState, ResourceLimits};
pub use response::ApiResponse;
pub use result::{ExecuteRequest, ExecutionMode, ExecutionResult, NextStep, RunStatus};
pub use stream::{StreamChannel, StreamEvent};
pub use transport::ApiClient;
pub use upload::UploadForm;
