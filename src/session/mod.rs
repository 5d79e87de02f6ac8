pub mod manager;

pub use manager::SensorSession;

use serde::{Deserialize, Serialize};

use crate::serial::protocol::CodecError;
use crate::serial::SerialError;

/// Outbound notifications for the UI side, delivered in order on one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Notification {
    /// PM2.5 concentration in μg/m³.
    Pm25(u16),
    /// PM10 concentration in μg/m³.
    Pm10(u16),
    /// Sensor acknowledged a command.
    Ack,
    /// Non-fatal protocol problem; the session stays open.
    Warning(String),
    /// The port could not be opened; the session stays closed.
    ConnectionError(String),
    ConnectionClosed,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Session not connected")]
    NotConnected,

    #[error("Session already connected to {0}")]
    AlreadyConnected(String),

    #[error("Invalid command: {0}")]
    InvalidCommand(#[from] CodecError),

    #[error("Serial communication error: {0}")]
    SerialError(#[from] SerialError),
}

pub type Result<T> = std::result::Result<T, SessionError>;
