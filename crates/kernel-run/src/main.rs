//! kernel-run CLI entry point.
//!
//! Creates (or reuses) a compute session, uploads the given files, runs a
//! batch build/exec or a query file, relays standard input to the program,
//! and destroys the session afterwards.

mod paths;

use std::collections::BTreeMap;
use std::io::{BufRead, Write};
use std::path::PathBuf;

use clap::Parser;
use kernel_client::{ApiClient, ClientConfig, ExecutionHandler, ExecutionMode, ExecutionResult, Kernel};
use log::{debug, info, warn};
use serde_json::{json, Value};
use tokio::sync::mpsc;

#[derive(Parser, Debug)]
#[command(name = "kernel-run")]
#[command(about = "Run code on a remote compute kernel")]
struct Cli {
    /// Kernel type (e.g. python3)
    #[arg(short, long)]
    kernel: String,

    /// API access key
    #[arg(short, long, env = "BACKEND_ACCESS_KEY", hide_env_values = true)]
    access_key: Option<String>,

    /// API secret key
    #[arg(short, long, env = "BACKEND_SECRET_KEY", hide_env_values = true)]
    secret_key: Option<String>,

    /// API endpoint URL
    #[arg(long, env = "BACKEND_ENDPOINT")]
    endpoint: Option<String>,

    /// Build command for batch mode
    #[arg(short, long, default_value = "*")]
    build: String,

    /// Exec command for batch mode
    #[arg(short, long, default_value = "*")]
    exec: String,

    /// Directory the uploaded files are relative to
    #[arg(short = 'd', long, default_value = ".")]
    base_dir: PathBuf,

    /// Run the contents of this file as a query instead of a batch build
    #[arg(long, value_name = "FILE")]
    query: Option<PathBuf>,

    /// Poll with plain requests instead of streaming
    #[arg(long)]
    poll: bool,

    /// Reuse (or create) the session with this token
    #[arg(long, value_name = "TOKEN")]
    session: Option<String>,

    /// Leave the session running on exit
    #[arg(long)]
    keep: bool,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Files to upload before running
    files: Vec<PathBuf>,
}

/// Read standard input line by line on its own thread.
///
/// A program waiting for input then suspends only the execution loop, never
/// the runtime.
fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(16);
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else {
                break;
            };
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });
    rx
}

fn build_config(cli: &Cli) -> kernel_client::Result<ClientConfig> {
    let mut builder = ClientConfig::builder();
    if let Some(access_key) = &cli.access_key {
        builder = builder.access_key(access_key);
    }
    if let Some(secret_key) = &cli.secret_key {
        builder = builder.secret_key(secret_key);
    }
    if let Some(endpoint) = &cli.endpoint {
        builder = builder.endpoint(endpoint);
    }
    builder.build()
}

/// Upload, then run one execution turn to completion.
async fn execute(
    kernel: &mut Kernel,
    cli: &Cli,
    uploads: &BTreeMap<String, PathBuf>,
    mode: ExecutionMode,
    code: &str,
    options: Option<Value>,
) -> kernel_client::Result<ExecutionResult> {
    if !uploads.is_empty() {
        kernel.upload(uploads).await?;
    }

    let mut input = spawn_stdin_reader();
    let mut handler = ExecutionHandler::new(|result| {
        print!("{}", result.stdout());
        eprint!("{}", result.stderr());
        let _ = std::io::stdout().flush();
    })
    .on_close(|code, reason| debug!("Stream closed: code={:?} reason={:?}", code, reason));

    if cli.poll {
        kernel.run(mode, code, options, &mut input, &mut handler).await
    } else {
        kernel.stream_run(mode, code, options, &mut input, &mut handler).await
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&cli.log_level))
        .init();

    // Validate everything local before creating a session.
    let base = paths::base_directory(&cli.base_dir)?;
    let uploads = paths::collect_uploads(&base, &cli.files)?;
    let (mode, code, options) = match &cli.query {
        Some(file) => {
            let code = tokio::fs::read_to_string(file)
                .await
                .map_err(|e| anyhow::anyhow!("Cannot read query file {}: {}", file.display(), e))?;
            (ExecutionMode::Query, code, None)
        }
        None => (
            ExecutionMode::Batch,
            String::new(),
            Some(json!({"build": cli.build, "exec": cli.exec})),
        ),
    };

    let client = ApiClient::new(build_config(&cli)?)?;
    let mut kernel = Kernel::get_or_create(client, cli.session.clone(), cli.kernel.as_str()).await?;
    info!("Kernel is ready: {}", kernel.session_token());

    let outcome = execute(&mut kernel, &cli, &uploads, mode, &code, options).await;

    if cli.keep {
        info!("Keeping session {}", kernel.session_token());
    } else if let Err(e) = kernel.destroy().await {
        warn!("Failed to destroy session {}: {}", kernel.session_token(), e);
    }

    let result = outcome?;
    info!("Finished: {}", result.status());
    Ok(())
}
