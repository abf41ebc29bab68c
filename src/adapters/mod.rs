//! Transport adapters for instrument communication.
//!
//! An adapter moves command and response strings between an instrument
//! driver and a physical link; it knows nothing about any device protocol.
//! [`SerialAdapter`] speaks RS-232 via the `serialport` crate (feature
//! `instrument_serial`); [`MockAdapter`] replays scripted responses for
//! protocol tests without hardware.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

pub mod mock;
#[cfg(feature = "instrument_serial")]
pub mod serial;

pub use mock::MockAdapter;
#[cfg(feature = "instrument_serial")]
pub use serial::SerialAdapter;

/// Transport-level failures, classified so drivers can map them onto their
/// own fault taxonomy.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// An operation was attempted before `connect` (or after `disconnect`).
    #[error("adapter not connected")]
    NotConnected,

    /// No response arrived within the read timeout.
    #[error("response timeout after {0:?}")]
    Timeout(Duration),

    /// The underlying link failed.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The adapter was configured with unusable parameters.
    #[error("invalid adapter configuration: {0}")]
    InvalidConfig(String),
}

/// A command/response transport for line-oriented instrument protocols.
#[async_trait]
pub trait CommandPort: Send {
    /// Open the underlying link.
    async fn connect(&mut self) -> Result<(), AdapterError>;

    /// Close the underlying link. Idempotent.
    async fn disconnect(&mut self) -> Result<(), AdapterError>;

    /// Send one command that produces no response.
    async fn send(&mut self, command: &str) -> Result<(), AdapterError>;

    /// Send one command and wait for a single response line.
    async fn query(&mut self, command: &str) -> Result<String, AdapterError>;
}
