//! Newport ESP301 motion controller driver.
//!
//! Speaks the ESP ASCII command set over a [`CommandPort`] transport:
//!
//! - `{axis}PA{pos}` — move to absolute position
//! - `{axis}MD?` — motion done query (1 once the move completed)
//! - `{axis}TP` — actual position readback
//! - `{axis}OR` — home search
//! - `{axis}ST` — stop
//! - `{axis}MO` / `{axis}MF` — motor on / off
//! - `{axis}ID?` — stage identity (responds `UNKNOWN` for an absent axis)
//! - `TB` — error message readback (`code, timestamp, message`)
//!
//! For the rotary reflectance setup the controller runs at 19200 baud, 8N1
//! with RTS/CTS flow control.

use async_trait::async_trait;
use log::{debug, info};

use crate::adapters::{AdapterError, CommandPort};
use crate::angle::DeviceAngle;
use crate::core::{MotionController, TravelRange};
use crate::error::{DeviceFault, FaultKind};

/// One axis of a Newport ESP301 behind a command/response transport.
pub struct Esp301 {
    adapter: Box<dyn CommandPort>,
    axis: u8,
    travel: TravelRange,
    connected: bool,
}

impl Esp301 {
    /// Driver for `axis` (1–3) with the given travel limits.
    pub fn new(adapter: Box<dyn CommandPort>, axis: u8, travel: TravelRange) -> Self {
        Self {
            adapter,
            axis,
            travel,
            connected: false,
        }
    }

    /// Serial parameters the ESP301 ships with.
    #[cfg(feature = "instrument_serial")]
    pub fn serial_adapter(port_name: &str, baud_rate: u32) -> crate::adapters::SerialAdapter {
        crate::adapters::SerialAdapter::new(port_name, baud_rate)
            .with_hardware_flow_control()
            .with_timeout(std::time::Duration::from_millis(500))
    }

    /// Open the transport, verify the axis responds, and energize the motor.
    pub async fn connect(&mut self) -> Result<(), DeviceFault> {
        self.adapter.connect().await.map_err(comm_fault)?;

        let identity = self
            .adapter
            .query(&format!("{}ID?", self.axis))
            .await
            .map_err(comm_fault)?;
        if identity.eq_ignore_ascii_case("unknown") {
            return Err(DeviceFault::motion(
                FaultKind::Unknown,
                format!("no stage on axis {}", self.axis),
            ));
        }

        self.adapter
            .send(&format!("{}MO", self.axis))
            .await
            .map_err(comm_fault)?;
        self.check_error_status().await?;

        self.connected = true;
        info!("ESP301 axis {} connected: {}", self.axis, identity);
        Ok(())
    }

    /// Read the controller's error buffer; non-zero codes become faults.
    async fn check_error_status(&mut self) -> Result<(), DeviceFault> {
        let response = self.adapter.query("TB").await.map_err(comm_fault)?;

        // Response format: "code, timestamp, message"
        let mut parts = response.splitn(3, ", ");
        let code = parts.next().unwrap_or("").trim();
        let message = parts.nth(1).unwrap_or("").trim();

        if code == "0" {
            Ok(())
        } else {
            Err(DeviceFault::motion(
                FaultKind::Unknown,
                format!("controller error {}: {}", code, message),
            ))
        }
    }

    fn require_connected(&self) -> Result<(), DeviceFault> {
        if self.connected {
            Ok(())
        } else {
            Err(DeviceFault::motion(
                FaultKind::CommError,
                "ESP301 not connected",
            ))
        }
    }
}

/// Map transport errors onto the motion fault taxonomy.
fn comm_fault(error: AdapterError) -> DeviceFault {
    match error {
        AdapterError::Timeout(t) => DeviceFault::motion(
            FaultKind::Timeout,
            format!("no response from controller within {:?}", t),
        ),
        other => DeviceFault::motion(FaultKind::CommError, other.to_string()),
    }
}

#[async_trait]
impl MotionController for Esp301 {
    async fn move_absolute(&mut self, target: DeviceAngle) -> Result<(), DeviceFault> {
        // Limit check happens before anything touches the transport.
        self.travel.check(target)?;
        self.require_connected()?;

        self.adapter
            .send(&format!("{}PA{:.4}", self.axis, target.degrees()))
            .await
            .map_err(comm_fault)?;
        debug!("ESP301 axis {} moving to {}", self.axis, target);
        Ok(())
    }

    async fn is_settled(&mut self) -> Result<bool, DeviceFault> {
        self.require_connected()?;
        let response = self
            .adapter
            .query(&format!("{}MD?", self.axis))
            .await
            .map_err(comm_fault)?;
        match response.trim() {
            "1" => Ok(true),
            "0" => Ok(false),
            other => Err(DeviceFault::motion(
                FaultKind::Unknown,
                format!("unexpected motion-done response: {:?}", other),
            )),
        }
    }

    async fn position(&mut self) -> Result<DeviceAngle, DeviceFault> {
        self.require_connected()?;
        let response = self
            .adapter
            .query(&format!("{}TP", self.axis))
            .await
            .map_err(comm_fault)?;
        let degrees: f64 = response.trim().parse().map_err(|_| {
            DeviceFault::motion(
                FaultKind::Unknown,
                format!("unparseable position response: {:?}", response),
            )
        })?;
        Ok(DeviceAngle::new(degrees))
    }

    async fn stop(&mut self) -> Result<(), DeviceFault> {
        self.require_connected()?;
        self.adapter
            .send(&format!("{}ST", self.axis))
            .await
            .map_err(comm_fault)?;
        info!("ESP301 axis {} stopped", self.axis);
        Ok(())
    }

    async fn home(&mut self) -> Result<(), DeviceFault> {
        self.require_connected()?;
        self.adapter
            .send(&format!("{}OR", self.axis))
            .await
            .map_err(comm_fault)?;
        info!("ESP301 axis {} homing", self.axis);
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), DeviceFault> {
        if !self.connected {
            return Ok(());
        }
        self.stop().await?;
        self.adapter
            .send(&format!("{}MF", self.axis))
            .await
            .map_err(comm_fault)?;
        self.adapter.disconnect().await.map_err(comm_fault)?;
        self.connected = false;
        info!("ESP301 axis {} shut down", self.axis);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MockAdapter;

    fn travel() -> TravelRange {
        TravelRange::new(-95.0, 95.0)
    }

    async fn connected_driver(extra: &[&str]) -> (Esp301, crate::adapters::mock::CommandLog) {
        let mut adapter = MockAdapter::new()
            .push_response("ESP301 rotary stage")
            .push_response("0, 451322, NO ERROR DETECTED");
        for response in extra {
            adapter = adapter.push_response(*response);
        }
        let log = adapter.command_log();
        let mut driver = Esp301::new(Box::new(adapter), 1, travel());
        driver.connect().await.unwrap();
        (driver, log)
    }

    #[tokio::test]
    async fn connect_identifies_axis_and_enables_motor() {
        let (_driver, log) = connected_driver(&[]).await;
        assert_eq!(log.commands(), vec!["1ID?", "1MO", "TB"]);
    }

    #[tokio::test]
    async fn connect_rejects_missing_axis() {
        let adapter = MockAdapter::new().push_response("UNKNOWN");
        let mut driver = Esp301::new(Box::new(adapter), 2, travel());
        let fault = driver.connect().await.unwrap_err();
        assert_eq!(fault.kind, FaultKind::Unknown);
    }

    #[tokio::test]
    async fn connect_surfaces_controller_error() {
        let adapter = MockAdapter::new()
            .push_response("ESP301 rotary stage")
            .push_response("6, 451322, COMMAND DOES NOT EXIST");
        let mut driver = Esp301::new(Box::new(adapter), 1, travel());
        let fault = driver.connect().await.unwrap_err();
        assert_eq!(fault.kind, FaultKind::Unknown);
        assert!(fault.detail.contains("COMMAND DOES NOT EXIST"));
    }

    #[tokio::test]
    async fn move_frames_absolute_position_command() {
        let (mut driver, log) = connected_driver(&[]).await;
        driver
            .move_absolute(DeviceAngle::new(-45.0))
            .await
            .unwrap();
        assert_eq!(log.commands().last().map(String::as_str), Some("1PA-45.0000"));
    }

    #[tokio::test]
    async fn limit_violation_never_reaches_transport() {
        let (mut driver, log) = connected_driver(&[]).await;
        let before = log.len();

        let fault = driver
            .move_absolute(DeviceAngle::new(120.0))
            .await
            .unwrap_err();
        assert_eq!(fault.kind, FaultKind::Limit);
        assert_eq!(log.len(), before);
    }

    #[tokio::test]
    async fn motion_done_poll() {
        let (mut driver, _log) = connected_driver(&["0", "1"]).await;
        assert!(!driver.is_settled().await.unwrap());
        assert!(driver.is_settled().await.unwrap());
    }

    #[tokio::test]
    async fn position_readback_parses_degrees() {
        let (mut driver, log) = connected_driver(&["-12.5000"]).await;
        let position = driver.position().await.unwrap();
        assert_eq!(position, DeviceAngle::new(-12.5));
        assert_eq!(log.commands().last().map(String::as_str), Some("1TP"));
    }

    #[tokio::test]
    async fn adapter_timeout_maps_to_timeout_fault() {
        // No response queued for TP: the mock reports a transport timeout.
        let (mut driver, _log) = connected_driver(&[]).await;
        let fault = driver.position().await.unwrap_err();
        assert_eq!(fault.kind, FaultKind::Timeout);
    }

    #[tokio::test]
    async fn shutdown_stops_and_de_energizes() {
        let (mut driver, log) = connected_driver(&[]).await;
        driver.shutdown().await.unwrap();
        let commands = log.commands();
        assert_eq!(&commands[commands.len() - 2..], &["1ST", "1MF"]);
    }
}
