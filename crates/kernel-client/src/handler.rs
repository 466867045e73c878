//! Callbacks and input sources for the execution loop.

use std::collections::VecDeque;
use std::future::Future;

use tokio::sync::mpsc;

use crate::error::ClientError;
use crate::result::ExecutionResult;

/// Supplies lines of user input when a program waits for it.
///
/// Waiting here suspends only the current execution loop; other sessions keep
/// running. There is no built-in timeout.
pub trait InputSource: Send {
    /// Next line of input, or `None` once the source is exhausted.
    fn next_line(&mut self) -> impl Future<Output = Option<String>> + Send;
}

impl InputSource for mpsc::Receiver<String> {
    async fn next_line(&mut self) -> Option<String> {
        self.recv().await
    }
}

impl InputSource for VecDeque<String> {
    async fn next_line(&mut self) -> Option<String> {
        self.pop_front()
    }
}

type ResultCallback<'a> = Box<dyn FnMut(&ExecutionResult) + Send + 'a>;
type CloseCallback<'a> = Box<dyn FnMut(Option<u16>, &str) + Send + 'a>;
type ErrorCallback<'a> = Box<dyn FnMut(&ClientError) + Send + 'a>;

/// Closures notified while an execution runs.
///
/// `on_result` sees every decoded result as soon as it arrives, so output can be
/// shown while the program is still running.
pub struct ExecutionHandler<'a> {
    on_result: ResultCallback<'a>,
    on_close: Option<CloseCallback<'a>>,
    on_error: Option<ErrorCallback<'a>>,
}

impl<'a> ExecutionHandler<'a> {
    pub fn new(on_result: impl FnMut(&ExecutionResult) + Send + 'a) -> Self {
        Self {
            on_result: Box::new(on_result),
            on_close: None,
            on_error: None,
        }
    }

    /// Called when the streaming channel closes, with the close code and reason.
    pub fn on_close(mut self, f: impl FnMut(Option<u16>, &str) + Send + 'a) -> Self {
        self.on_close = Some(Box::new(f));
        self
    }

    /// Called with any error before it is returned from the loop.
    pub fn on_error(mut self, f: impl FnMut(&ClientError) + Send + 'a) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }

    pub(crate) fn result(&mut self, result: &ExecutionResult) {
        (self.on_result)(result);
    }

    pub(crate) fn closed(&mut self, code: Option<u16>, reason: &str) {
        if let Some(f) = self.on_close.as_mut() {
            f(code, reason);
        }
    }

    pub(crate) fn error(&mut self, err: &ClientError) {
        if let Some(f) = self.on_error.as_mut() {
            f(err);
        }
    }
}

impl Default for ExecutionHandler<'_> {
    fn default() -> Self {
        Self::new(|_| {})
    }
}

impl std::fmt::Debug for ExecutionHandler<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionHandler")
            .field("on_close", &self.on_close.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_vecdeque_input_source() {
        let mut input: VecDeque<String> = VecDeque::from(vec!["a".to_string(), "b".to_string()]);
        assert_eq!(input.next_line().await.as_deref(), Some("a"));
        assert_eq!(input.next_line().await.as_deref(), Some("b"));
        assert_eq!(input.next_line().await, None);
    }

    #[tokio::test]
    async fn test_channel_input_source() {
        let (tx, mut rx) = mpsc::channel(4);
        tx.send("line".to_string()).await.unwrap();
        drop(tx);
        assert_eq!(rx.next_line().await.as_deref(), Some("line"));
        assert_eq!(rx.next_line().await, None);
    }

    #[test]
    fn test_handler_dispatch() {
        let mut outputs = Vec::new();
        let mut closes = Vec::new();
        let mut errors = Vec::new();
        {
            let mut handler = ExecutionHandler::new(|r: &ExecutionResult| outputs.push(r.stdout().to_string()))
                .on_close(|code, reason| closes.push((code, reason.to_string())))
                .on_error(|e| errors.push(e.to_string()));

            handler.result(&ExecutionResult::from_json(json!({
                "result": {"status": "finished", "console": [["stdout", "hi"]]}
            })));
            handler.closed(Some(1000), "");
            handler.error(&ClientError::NetworkFailure("reset".into()));
        }
        assert_eq!(outputs, vec!["hi"]);
        assert_eq!(closes, vec![(Some(1000), String::new())]);
        assert_eq!(errors, vec!["Network failure: reset"]);
    }
}
