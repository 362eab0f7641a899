//! Ownership of the serial connection.
//!
//! [`PortSession`] holds the OS handle exclusively between `open` and `close`
//! and offers byte-level writes plus a bounded, best-effort read. Reads never
//! block past their deadline: the sensor protocol has no terminator, so the
//! session simply collects whatever arrives inside the window.

use std::io::{self, Read, Write};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::errors::{IoError, OpenError};

// ============================================================================
// Constants
// ============================================================================

/// Total time a read may spend collecting bytes.
pub const DEFAULT_READ_DEADLINE: Duration = Duration::from_millis(20);

/// Length of each blocking read inside the deadline.
pub const DEFAULT_READ_SLICE: Duration = Duration::from_millis(15);

/// Back-off when a transport reports no data without blocking.
const IDLE_BACKOFF: Duration = Duration::from_millis(1);

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
}

/// Operator-selected line parameters. Nothing is negotiated with the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortConfig {
    pub port_name: String,
    pub baud_rate: u32,
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
    #[serde(default)]
    pub parity: Parity,
}

fn default_data_bits() -> u8 {
    8
}

fn default_stop_bits() -> u8 {
    1
}

impl PortConfig {
    /// 8 data bits, 1 stop bit, no parity.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            data_bits: default_data_bits(),
            stop_bits: default_stop_bits(),
            parity: Parity::None,
        }
    }

    fn serial_data_bits(&self) -> Result<serialport::DataBits, OpenError> {
        match self.data_bits {
            5 => Ok(serialport::DataBits::Five),
            6 => Ok(serialport::DataBits::Six),
            7 => Ok(serialport::DataBits::Seven),
            8 => Ok(serialport::DataBits::Eight),
            other => Err(OpenError::InvalidConfig(format!(
                "unsupported data bits {other}; expected 5, 6, 7 or 8"
            ))),
        }
    }

    fn serial_stop_bits(&self) -> Result<serialport::StopBits, OpenError> {
        match self.stop_bits {
            1 => Ok(serialport::StopBits::One),
            2 => Ok(serialport::StopBits::Two),
            other => Err(OpenError::InvalidConfig(format!(
                "unsupported stop bits {other}; expected 1 or 2"
            ))),
        }
    }

    fn serial_parity(&self) -> serialport::Parity {
        match self.parity {
            Parity::None => serialport::Parity::None,
            Parity::Odd => serialport::Parity::Odd,
            Parity::Even => serialport::Parity::Even,
        }
    }

    /// Check the line parameters without touching the device.
    pub fn validate(&self) -> Result<(), OpenError> {
        if self.port_name.trim().is_empty() {
            return Err(OpenError::InvalidConfig("port name is empty".into()));
        }
        if self.baud_rate == 0 {
            return Err(OpenError::InvalidConfig("baud rate must be non-zero".into()));
        }
        self.serial_data_bits()?;
        self.serial_stop_bits()?;
        Ok(())
    }
}

/// Names of the serial devices the OS currently reports.
pub fn available_ports() -> Vec<String> {
    match serialport::available_ports() {
        Ok(ports) => ports.into_iter().map(|p| p.port_name).collect(),
        Err(e) => {
            warn!("port enumeration failed: {}", e);
            Vec::new()
        }
    }
}

// ============================================================================
// Transport Abstraction
// ============================================================================

/// Byte stream the session talks through: a serial port or an in-memory double.
pub trait Transport: Read + Write + Send {}
impl<T: Read + Write + Send> Transport for T {}

// ============================================================================
// Port Session
// ============================================================================

/// Exclusive owner of one serial connection.
pub struct PortSession {
    transport: Option<Box<dyn Transport>>,
    port_name: Option<String>,
    read_slice: Duration,
}

impl Default for PortSession {
    fn default() -> Self {
        Self::new()
    }
}

impl PortSession {
    /// A closed session.
    pub fn new() -> Self {
        Self {
            transport: None,
            port_name: None,
            read_slice: DEFAULT_READ_SLICE,
        }
    }

    /// Set the blocking granularity used by [`read_with_deadline`](Self::read_with_deadline).
    /// Takes effect on the next `open`.
    pub fn with_read_slice(mut self, slice: Duration) -> Self {
        self.read_slice = slice;
        self
    }

    /// Acquire the named device in read-write mode.
    ///
    /// Opening an already-open session closes the old handle first.
    pub fn open(&mut self, config: &PortConfig) -> Result<(), OpenError> {
        config.validate()?;
        self.close();

        let port = serialport::new(config.port_name.as_str(), config.baud_rate)
            .data_bits(config.serial_data_bits()?)
            .stop_bits(config.serial_stop_bits()?)
            .parity(config.serial_parity())
            .flow_control(serialport::FlowControl::None)
            .timeout(self.read_slice)
            .open()
            .map_err(|e| {
                warn!("failed to open {}: {}", config.port_name, e);
                OpenError::from_serial(&e)
            })?;

        info!(
            "opened {} at {} baud ({}{}{})",
            config.port_name,
            config.baud_rate,
            config.data_bits,
            match config.parity {
                Parity::None => 'N',
                Parity::Odd => 'O',
                Parity::Even => 'E',
            },
            config.stop_bits
        );
        self.transport = Some(Box::new(port));
        self.port_name = Some(config.port_name.clone());
        Ok(())
    }

    /// Adopt an already-connected transport (simulated sensors, tests).
    pub fn open_with(&mut self, name: impl Into<String>, transport: Box<dyn Transport>) {
        self.close();
        let name = name.into();
        info!("attached transport {}", name);
        self.transport = Some(transport);
        self.port_name = Some(name);
    }

    pub fn is_open(&self) -> bool {
        self.transport.is_some()
    }

    pub fn port_name(&self) -> Option<&str> {
        self.port_name.as_deref()
    }

    /// Write a whole frame and flush it.
    pub fn write(&mut self, bytes: &[u8]) -> Result<(), IoError> {
        let transport = self.transport.as_mut().ok_or(IoError::NotOpen)?;
        transport
            .write_all(bytes)
            .and_then(|_| transport.flush())
            .map_err(|e| IoError::WriteFailed(e.to_string()))?;
        debug!("sent {:02X?}", bytes);
        Ok(())
    }

    /// Collect every byte that arrives before `deadline` elapses.
    ///
    /// The result may be empty, a partial frame or a full frame. A closed
    /// session or a hard read error yields whatever was gathered so far.
    pub fn read_with_deadline(&mut self, deadline: Duration) -> Vec<u8> {
        let mut collected = Vec::new();
        let Some(transport) = self.transport.as_mut() else {
            return collected;
        };

        let start = Instant::now();
        let mut buf = [0u8; 256];
        while start.elapsed() < deadline {
            match transport.read(&mut buf) {
                Ok(0) => thread::sleep(IDLE_BACKOFF),
                Ok(n) => collected.extend_from_slice(&buf[..n]),
                Err(e) if is_idle(&e) => {}
                Err(e) => {
                    warn!("read aborted after {} bytes: {}", collected.len(), e);
                    break;
                }
            }
        }

        if !collected.is_empty() {
            debug!("received {:02X?}", collected);
        }
        collected
    }

    /// Release the device. Safe to call repeatedly.
    pub fn close(&mut self) {
        if self.transport.take().is_some() {
            info!(
                "closed {}",
                self.port_name.as_deref().unwrap_or("<unnamed port>")
            );
        }
        self.port_name = None;
    }
}

fn is_idle(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::ScriptedTransport;

    #[test]
    fn rejects_unsupported_line_settings() {
        let mut config = PortConfig::new("/dev/ttyUSB0", 9600);
        config.data_bits = 9;
        assert!(matches!(config.validate(), Err(OpenError::InvalidConfig(_))));

        let mut config = PortConfig::new("/dev/ttyUSB0", 9600);
        config.stop_bits = 3;
        assert!(matches!(config.validate(), Err(OpenError::InvalidConfig(_))));

        assert!(PortConfig::new("", 9600).validate().is_err());
        assert!(PortConfig::new("/dev/ttyUSB0", 9600).validate().is_ok());
    }

    #[test]
    fn opening_a_missing_device_fails_without_panicking() {
        let mut session = PortSession::new();
        let result = session.open(&PortConfig::new("/dev/thermopoll-does-not-exist", 9600));
        assert!(result.is_err());
        assert!(!session.is_open());
    }

    #[test]
    fn write_requires_an_open_port() {
        let mut session = PortSession::new();
        assert_eq!(session.write(&[1, 2, 3]), Err(IoError::NotOpen));
        assert!(session.read_with_deadline(Duration::from_millis(5)).is_empty());
    }

    #[test]
    fn read_collects_a_reply_within_the_deadline() {
        let sensor = ScriptedTransport::new();
        sensor.push_reply(vec![0x00, 0x00, 0x00, 0x00, 0x08, 0x09]);
        let mut session = PortSession::new();
        session.open_with("sim", Box::new(sensor.clone()));

        session.write(&[0xFF]).unwrap();
        let bytes = session.read_with_deadline(Duration::from_millis(20));
        assert_eq!(bytes, vec![0x00, 0x00, 0x00, 0x00, 0x08, 0x09]);
        assert_eq!(sensor.writes(), vec![vec![0xFF]]);
    }

    #[test]
    fn read_gathers_a_reply_split_across_pieces() {
        let sensor = ScriptedTransport::new();
        sensor.trickle(2, Duration::from_millis(3));
        sensor.inject(&[0x00, 0x00, 0x00, 0x00, 0x08, 0x09]);
        let mut session = PortSession::new();
        session.open_with("sim", Box::new(sensor));

        let bytes = session.read_with_deadline(Duration::from_millis(20));
        assert_eq!(bytes, vec![0x00, 0x00, 0x00, 0x00, 0x08, 0x09]);
    }

    #[test]
    fn read_returns_a_partial_reply_at_the_deadline() {
        let sensor = ScriptedTransport::new();
        sensor.trickle(4, Duration::from_millis(200));
        sensor.inject(&[0x00, 0x00, 0x00, 0x00, 0x08, 0x09]);
        let mut session = PortSession::new();
        session.open_with("sim", Box::new(sensor));

        let bytes = session.read_with_deadline(Duration::from_millis(20));
        assert_eq!(bytes, vec![0x00, 0x00, 0x00, 0x00]);
        // The tail is still on the line for the next read.
        let rest = session.read_with_deadline(Duration::from_millis(400));
        assert_eq!(rest, vec![0x08, 0x09]);
    }

    #[test]
    fn silent_device_returns_empty_after_deadline() {
        let mut session = PortSession::new();
        session.open_with("sim", Box::new(ScriptedTransport::new()));

        let start = Instant::now();
        let bytes = session.read_with_deadline(Duration::from_millis(20));
        assert!(bytes.is_empty());
        assert!(start.elapsed() >= Duration::from_millis(20));
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn write_failure_carries_device_message() {
        let sensor = ScriptedTransport::new();
        sensor.fail_writes(1);
        let mut session = PortSession::new();
        session.open_with("sim", Box::new(sensor));
        match session.write(&[0x01]) {
            Err(IoError::WriteFailed(msg)) => assert!(msg.contains("simulated")),
            other => panic!("unexpected {other:?}"),
        }
        assert!(session.write(&[0x01]).is_ok());
    }

    #[test]
    fn close_is_idempotent() {
        let mut session = PortSession::new();
        session.open_with("sim", Box::new(ScriptedTransport::new()));
        assert!(session.is_open());
        session.close();
        session.close();
        assert!(!session.is_open());
        assert_eq!(session.port_name(), None);
    }
}
