//! RS-232 transport built on the `serialport` crate.

use async_trait::async_trait;
use log::debug;
use serialport::{FlowControl, SerialPort};
use std::io::{Read, Write};
use std::time::{Duration, Instant};

use super::{AdapterError, CommandPort};

/// Line-oriented serial transport.
///
/// Commands are terminated with `\r\n`; responses are read until the
/// delimiter byte or the response timeout. The `serialport` handle blocks on
/// reads for at most its own short internal timeout, so reads are issued in a
/// poll loop with an async sleep between attempts rather than holding the
/// executor hostage for the full response window.
pub struct SerialAdapter {
    port_name: String,
    baud_rate: u32,
    timeout: Duration,
    line_terminator: String,
    response_delimiter: u8,
    flow_control: FlowControl,
    port: Option<Box<dyn SerialPort>>,
}

impl SerialAdapter {
    /// Create an adapter for `port_name` at `baud_rate`, 8N1, no flow
    /// control, 500 ms response timeout.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            timeout: Duration::from_millis(500),
            line_terminator: "\r\n".to_string(),
            response_delimiter: b'\n',
            flow_control: FlowControl::None,
            port: None,
        }
    }

    /// Override the response timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Enable RTS/CTS hardware flow control.
    pub fn with_hardware_flow_control(mut self) -> Self {
        self.flow_control = FlowControl::Hardware;
        self
    }

    /// Override the command terminator (default `\r\n`).
    pub fn with_line_terminator(mut self, terminator: impl Into<String>) -> Self {
        self.line_terminator = terminator.into();
        self
    }

    fn port_mut(&mut self) -> Result<&mut Box<dyn SerialPort>, AdapterError> {
        self.port.as_mut().ok_or(AdapterError::NotConnected)
    }

    fn write_command(&mut self, command: &str) -> Result<(), AdapterError> {
        let framed = format!("{}{}", command, self.line_terminator);
        let port = self.port_mut()?;
        port.write_all(framed.as_bytes())?;
        port.flush()?;
        debug!("serial tx: {}", command);
        Ok(())
    }
}

#[async_trait]
impl CommandPort for SerialAdapter {
    async fn connect(&mut self) -> Result<(), AdapterError> {
        if self.port.is_some() {
            return Ok(());
        }
        let port = serialport::new(&self.port_name, self.baud_rate)
            .flow_control(self.flow_control)
            // Short blocking timeout per read attempt; the response timeout
            // is enforced by the poll loop in `query`.
            .timeout(Duration::from_millis(20))
            .open()
            .map_err(|e| {
                AdapterError::InvalidConfig(format!(
                    "failed to open serial port '{}' at {} baud: {}",
                    self.port_name, self.baud_rate, e
                ))
            })?;
        self.port = Some(port);
        debug!(
            "serial port '{}' opened at {} baud",
            self.port_name, self.baud_rate
        );
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), AdapterError> {
        if self.port.take().is_some() {
            debug!("serial port '{}' closed", self.port_name);
        }
        Ok(())
    }

    async fn send(&mut self, command: &str) -> Result<(), AdapterError> {
        self.write_command(command)
    }

    async fn query(&mut self, command: &str) -> Result<String, AdapterError> {
        self.write_command(command)?;

        let start = Instant::now();
        let mut response: Vec<u8> = Vec::new();
        let mut buf = [0u8; 64];

        loop {
            if start.elapsed() > self.timeout {
                return Err(AdapterError::Timeout(self.timeout));
            }

            let read = match self.port_mut()?.read(&mut buf) {
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => 0,
                Err(e) => return Err(e.into()),
            };

            if read == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
                continue;
            }

            response.extend_from_slice(&buf[..read]);
            if buf[..read].contains(&self.response_delimiter) {
                let line = String::from_utf8_lossy(&response)
                    .trim_end_matches(['\r', '\n'])
                    .to_string();
                debug!("serial rx: {}", line);
                return Ok(line);
            }
        }
    }
}
