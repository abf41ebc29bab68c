//! Scripted transport for protocol tests without hardware.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{AdapterError, CommandPort};

/// A [`CommandPort`] that replays queued responses and records every command
/// it was given.
///
/// Responses are consumed in FIFO order by `query`; a query with no queued
/// response reports a timeout, which is also how a dead instrument looks to
/// a driver. Failures can be injected for the next operation to simulate a
/// broken link.
#[derive(Default)]
pub struct MockAdapter {
    responses: VecDeque<String>,
    fail_next: Option<AdapterError>,
    connected: bool,
    sent: Arc<Mutex<Vec<String>>>,
}

impl MockAdapter {
    /// Create an empty mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response for a future `query`.
    pub fn push_response(mut self, response: impl Into<String>) -> Self {
        self.responses.push_back(response.into());
        self
    }

    /// Make the next `send` or `query` fail with `error`.
    pub fn fail_next(mut self, error: AdapterError) -> Self {
        self.fail_next = Some(error);
        self
    }

    /// Handle for inspecting the commands sent through this adapter after it
    /// has been boxed and moved into a driver.
    pub fn command_log(&self) -> CommandLog {
        CommandLog(Arc::clone(&self.sent))
    }

    fn record(&mut self, command: &str) -> Result<(), AdapterError> {
        if let Some(error) = self.fail_next.take() {
            return Err(error);
        }
        if !self.connected {
            return Err(AdapterError::NotConnected);
        }
        self.sent
            .lock()
            .expect("mock adapter command log poisoned")
            .push(command.to_string());
        Ok(())
    }
}

/// Shared view of the commands a [`MockAdapter`] has transmitted.
#[derive(Clone)]
pub struct CommandLog(Arc<Mutex<Vec<String>>>);

impl CommandLog {
    /// Snapshot of all commands sent so far, in order.
    pub fn commands(&self) -> Vec<String> {
        self.0
            .lock()
            .expect("mock adapter command log poisoned")
            .clone()
    }

    /// Number of commands sent so far.
    pub fn len(&self) -> usize {
        self.0
            .lock()
            .expect("mock adapter command log poisoned")
            .len()
    }

    /// Whether nothing has been transmitted.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CommandPort for MockAdapter {
    async fn connect(&mut self) -> Result<(), AdapterError> {
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), AdapterError> {
        self.connected = false;
        Ok(())
    }

    async fn send(&mut self, command: &str) -> Result<(), AdapterError> {
        self.record(command)
    }

    async fn query(&mut self, command: &str) -> Result<String, AdapterError> {
        self.record(command)?;
        self.responses
            .pop_front()
            .ok_or(AdapterError::Timeout(Duration::from_millis(0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replays_responses_in_order() {
        let mut adapter = MockAdapter::new()
            .push_response("first")
            .push_response("second");
        let log = adapter.command_log();

        adapter.connect().await.unwrap();
        assert_eq!(adapter.query("A?").await.unwrap(), "first");
        assert_eq!(adapter.query("B?").await.unwrap(), "second");
        assert!(matches!(
            adapter.query("C?").await,
            Err(AdapterError::Timeout(_))
        ));
        assert_eq!(log.commands(), vec!["A?", "B?", "C?"]);
    }

    #[tokio::test]
    async fn rejects_when_disconnected() {
        let mut adapter = MockAdapter::new();
        assert!(matches!(
            adapter.send("X").await,
            Err(AdapterError::NotConnected)
        ));
    }
}
