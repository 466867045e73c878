//! Persistent streaming channel for execution.
//!
//! The channel is a websocket opened with the same signed headers as a plain
//! request. Each text frame from the server is one execution result (the inner
//! `result` object); each frame from the client is one [`ExecuteRequest`].

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use log::{debug, warn};
use reqwest::header::{HeaderMap, CONTENT_TYPE};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::error::{ClientError, Result};
use crate::response::{classify, ApiResponse};
use crate::result::{ExecuteRequest, ExecutionResult};

/// How long to wait for the peer to acknowledge our close frame.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Something that arrived on the channel.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Result(ExecutionResult),
    /// The peer closed the channel (or the connection ended).
    Closed { code: Option<u16>, reason: String },
}

/// An open streaming channel. Dropping it releases the connection.
pub struct StreamChannel {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    closed: bool,
}

impl std::fmt::Debug for StreamChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamChannel")
            .field("closed", &self.closed)
            .finish()
    }
}

fn network_error(err: tungstenite::Error) -> ClientError {
    ClientError::NetworkFailure(format!("Stream error: {}", err))
}

impl StreamChannel {
    /// Perform the websocket handshake. A rejected handshake is classified
    /// like any failed HTTP response for `path`.
    pub(crate) async fn connect(url: &str, path: &str, headers: HeaderMap) -> Result<Self> {
        let mut request = url
            .into_client_request()
            .map_err(|e| ClientError::Configuration(format!("Invalid stream URL {}: {}", url, e)))?;
        request.headers_mut().extend(headers);

        match tokio_tungstenite::connect_async(request).await {
            Ok((ws, _response)) => {
                debug!("[stream] Connected to {}", path);
                Ok(Self { ws, closed: false })
            }
            Err(tungstenite::Error::Http(response)) => {
                let rejected = ApiResponse {
                    status: response.status().as_u16(),
                    content_type: response
                        .headers()
                        .get(CONTENT_TYPE)
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string),
                    body: response.body().clone().unwrap_or_default(),
                };
                let err = classify(path, &rejected);
                warn!("[stream] Handshake for {} rejected: {}", path, err);
                Err(err)
            }
            Err(e) => Err(network_error(e)),
        }
    }

    /// Send one execute message.
    pub async fn send(&mut self, request: &ExecuteRequest) -> Result<()> {
        if self.closed {
            return Err(ClientError::NetworkFailure(
                "Stream channel is already closed".to_string(),
            ));
        }
        let text = serde_json::to_string(request).map_err(|e| {
            ClientError::InvalidParameters(format!("Cannot encode execute message: {}", e))
        })?;
        debug!("[stream] -> mode={} runId={}", request.mode, request.run_id);
        self.ws.send(Message::Text(text)).await.map_err(network_error)
    }

    /// Wait for the next result or for the channel to close.
    pub async fn next_event(&mut self) -> Result<StreamEvent> {
        loop {
            let Some(message) = self.ws.next().await else {
                self.closed = true;
                return Ok(StreamEvent::Closed {
                    code: None,
                    reason: String::new(),
                });
            };

            match message {
                Ok(Message::Text(text)) => {
                    let result = ExecutionResult::from_stream_message(&text)?;
                    debug!("[stream] <- status={}", result.status());
                    return Ok(StreamEvent::Result(result));
                }
                Ok(Message::Binary(data)) => {
                    let text = String::from_utf8(data).map_err(|e| {
                        ClientError::DecodeFailure(format!("Stream message is not UTF-8: {}", e))
                    })?;
                    return ExecutionResult::from_stream_message(&text).map(StreamEvent::Result);
                }
                Ok(Message::Close(frame)) => {
                    self.closed = true;
                    let (code, reason) = match frame {
                        Some(frame) => (Some(u16::from(frame.code)), frame.reason.into_owned()),
                        None => (None, String::new()),
                    };
                    debug!("[stream] Peer closed: code={:?} reason={:?}", code, reason);
                    return Ok(StreamEvent::Closed { code, reason });
                }
                Ok(_) => continue,
                Err(tungstenite::Error::ConnectionClosed) | Err(tungstenite::Error::AlreadyClosed) => {
                    self.closed = true;
                    return Ok(StreamEvent::Closed {
                        code: None,
                        reason: String::new(),
                    });
                }
                Err(e) => return Err(network_error(e)),
            }
        }
    }

    /// Close with a normal-closure code and wait (briefly) for the peer to acknowledge.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: "".into(),
        };
        match self.ws.close(Some(frame)).await {
            Ok(()) => {}
            Err(tungstenite::Error::ConnectionClosed) | Err(tungstenite::Error::AlreadyClosed) => {
                return Ok(())
            }
            Err(e) => return Err(network_error(e)),
        }

        let ws = &mut self.ws;
        let drain = async move { while let Some(Ok(_)) = ws.next().await {} };
        if tokio::time::timeout(CLOSE_TIMEOUT, drain).await.is_err() {
            warn!("[stream] Peer did not acknowledge close within {:?}", CLOSE_TIMEOUT);
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}
