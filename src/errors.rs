use std::io;
use thiserror::Error;

/// Failure to acquire the serial device. None of these are retried automatically.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OpenError {
    #[error("device is busy or already open")]
    DeviceBusy,
    #[error("device not found")]
    NotFound,
    #[error("permission denied")]
    PermissionDenied,
    #[error("invalid port configuration: {0}")]
    InvalidConfig(String),
    #[error("device error: {0}")]
    Other(String),
}

impl OpenError {
    /// Classify an error reported by the serial backend while opening a port.
    pub fn from_serial(err: &serialport::Error) -> Self {
        match err.kind() {
            serialport::ErrorKind::NoDevice => {
                if is_busy_message(&err.description) {
                    OpenError::DeviceBusy
                } else {
                    OpenError::NotFound
                }
            }
            serialport::ErrorKind::InvalidInput => OpenError::InvalidConfig(err.description.clone()),
            serialport::ErrorKind::Io(kind) => Self::from_io_kind(kind, &err.description),
            // EBUSY from an exclusively held port only survives as the errno text.
            serialport::ErrorKind::Unknown => {
                if is_busy_message(&err.description) {
                    OpenError::DeviceBusy
                } else {
                    OpenError::Other(err.description.clone())
                }
            }
        }
    }

    fn from_io_kind(kind: io::ErrorKind, description: &str) -> Self {
        match kind {
            io::ErrorKind::NotFound => OpenError::NotFound,
            io::ErrorKind::PermissionDenied => OpenError::PermissionDenied,
            io::ErrorKind::AddrInUse => OpenError::DeviceBusy,
            _ if is_busy_message(description) => OpenError::DeviceBusy,
            _ => OpenError::Other(description.to_string()),
        }
    }
}

fn is_busy_message(description: &str) -> bool {
    let lower = description.to_lowercase();
    lower.contains("busy") || lower.contains("in use") || lower.contains("access is denied")
}

/// Failure while talking to an open port.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IoError {
    #[error("write failed: {0}")]
    WriteFailed(String),
    #[error("port is not open")]
    NotOpen,
}

/// Reasons a reply frame could not be turned into a sample. Never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("empty reply")]
    Empty,
    #[error("reply too short: need {needed} bytes, got {got}")]
    TooShort { needed: usize, got: usize },
    #[error("reply failed integrity check")]
    ChecksumMismatch,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    #[error("port must be open before polling can start")]
    PortNotOpen,
    #[error("scheduler is faulted; close and reopen the port")]
    Faulted,
    #[error("failed to spawn poll worker: {0}")]
    Spawn(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("open error: {0}")]
    Open(#[from] OpenError),
    #[error("io error: {0}")]
    Io(#[from] IoError),
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("export failed: {0}")]
    Export(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
