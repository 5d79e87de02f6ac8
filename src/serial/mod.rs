pub mod interface;
pub mod protocol;
pub mod reader;

pub use interface::{LinkHalves, PortOpener, PortReader, PortWriter, SerialInterface};
pub use protocol::{decode, encode, Command, HexToken, SensorEvent};
pub use reader::{EventSink, LinkReader, ReaderStats};

#[derive(Debug, thiserror::Error)]
pub enum SerialError {
    #[error("Port not found: {0}")]
    PortNotFound(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialport error: {0}")]
    SerialportError(#[from] serialport::Error),
}

pub type Result<T> = std::result::Result<T, SerialError>;
