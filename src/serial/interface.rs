use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};

use super::{Result, SerialError};
use crate::config::LinkSettings;

/// Read side of an open link. Owned by the reader task only.
pub trait PortReader: Send {
    /// Bytes currently buffered by the driver.
    fn bytes_available(&mut self) -> Result<u32>;

    /// Non-blocking single byte read; `Ok(None)` when nothing arrived.
    fn read_byte(&mut self) -> Result<Option<u8>>;
}

/// Write side of an open link. Owned by the session.
pub trait PortWriter: Send {
    fn write_frame(&mut self, data: &[u8]) -> Result<()>;
}

/// Both halves of one open port. Dropping both closes the OS handle.
pub struct LinkHalves {
    pub reader: Box<dyn PortReader>,
    pub writer: Box<dyn PortWriter>,
}

pub trait PortOpener: Send + Sync {
    fn open(&self, port_name: &str, settings: &LinkSettings) -> Result<LinkHalves>;
}

/// `serialport` backed transport for the HPM sensor (8N1, zero read timeout).
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialInterface;

impl SerialInterface {
    pub fn new() -> Self {
        Self
    }
}

impl PortOpener for SerialInterface {
    fn open(&self, port_name: &str, settings: &LinkSettings) -> Result<LinkHalves> {
        let port = serialport::new(port_name, settings.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(Duration::ZERO)
            .open()
            .map_err(|e| match e.kind() {
                serialport::ErrorKind::NoDevice => SerialError::PortNotFound(port_name.to_string()),
                _ => SerialError::ConnectionFailed(format!("{}: {}", port_name, e)),
            })?;

        let writer = port
            .try_clone()
            .map_err(|e| SerialError::ConnectionFailed(format!("{}: {}", port_name, e)))?;

        log::debug!(
            "Opened {} at {} baud, 8N1, non-blocking",
            port_name,
            settings.baud_rate
        );

        Ok(LinkHalves {
            reader: Box::new(SerialPortReader { port }),
            writer: Box::new(SerialPortWriter { port: writer }),
        })
    }
}

struct SerialPortReader {
    port: Box<dyn SerialPort>,
}

impl PortReader for SerialPortReader {
    fn bytes_available(&mut self) -> Result<u32> {
        Ok(self.port.bytes_to_read()?)
    }

    fn read_byte(&mut self) -> Result<Option<u8>> {
        let mut byte = [0u8; 1];
        match self.port.read(&mut byte) {
            Ok(0) => Ok(None),
            Ok(_) => Ok(Some(byte[0])),
            Err(ref e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => Ok(None),
            Err(e) => Err(SerialError::IoError(e)),
        }
    }
}

struct SerialPortWriter {
    port: Box<dyn SerialPort>,
}

impl PortWriter for SerialPortWriter {
    fn write_frame(&mut self, data: &[u8]) -> Result<()> {
        self.port.write_all(data)?;
        self.port.flush()?;
        Ok(())
    }
}
