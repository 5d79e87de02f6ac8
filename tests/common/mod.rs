#![allow(dead_code)]

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use hpm_monitor_lib::config::LinkSettings;
use hpm_monitor_lib::serial::{LinkHalves, PortOpener, PortReader, PortWriter, SerialError};

type SerialResult<T> = Result<T, SerialError>;

/// In-memory stand-in for a serial port. Tests push the bytes the sensor
/// would send and inspect what was written.
#[derive(Default)]
pub struct PortState {
    pub incoming: VecDeque<u8>,
    pub written: Vec<u8>,
    pub fail_reads: bool,
    pub fail_writes: bool,
    pub fail_open: bool,
    pub opened: Vec<String>,
}

#[derive(Clone, Default)]
pub struct ScriptedPort {
    state: Arc<Mutex<PortState>>,
}

impl ScriptedPort {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, bytes: &[u8]) {
        self.state.lock().unwrap().incoming.extend(bytes.iter().copied());
    }

    pub fn written(&self) -> Vec<u8> {
        self.state.lock().unwrap().written.clone()
    }

    pub fn pending(&self) -> usize {
        self.state.lock().unwrap().incoming.len()
    }

    pub fn opened(&self) -> Vec<String> {
        self.state.lock().unwrap().opened.clone()
    }

    pub fn fail_reads(&self) {
        self.state.lock().unwrap().fail_reads = true;
    }

    pub fn fail_writes(&self) {
        self.state.lock().unwrap().fail_writes = true;
    }

    pub fn fail_open(&self) {
        self.state.lock().unwrap().fail_open = true;
    }

    pub fn reader(&self) -> Box<dyn PortReader> {
        Box::new(ScriptedReader { state: self.state.clone() })
    }
}

struct ScriptedReader {
    state: Arc<Mutex<PortState>>,
}

impl PortReader for ScriptedReader {
    fn bytes_available(&mut self) -> SerialResult<u32> {
        let state = self.state.lock().unwrap();
        if state.fail_reads {
            return Err(SerialError::IoError(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged")));
        }
        Ok(state.incoming.len() as u32)
    }

    fn read_byte(&mut self) -> SerialResult<Option<u8>> {
        Ok(self.state.lock().unwrap().incoming.pop_front())
    }
}

struct ScriptedWriter {
    state: Arc<Mutex<PortState>>,
}

impl PortWriter for ScriptedWriter {
    fn write_frame(&mut self, data: &[u8]) -> SerialResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_writes {
            return Err(SerialError::IoError(io::Error::new(io::ErrorKind::BrokenPipe, "write failed")));
        }
        state.written.extend_from_slice(data);
        Ok(())
    }
}

impl PortOpener for ScriptedPort {
    fn open(&self, port_name: &str, _settings: &LinkSettings) -> SerialResult<LinkHalves> {
        let mut state = self.state.lock().unwrap();
        if state.fail_open {
            return Err(SerialError::PortNotFound(port_name.to_string()));
        }
        state.opened.push(port_name.to_string());
        Ok(LinkHalves {
            reader: Box::new(ScriptedReader { state: self.state.clone() }),
            writer: Box::new(ScriptedWriter { state: self.state.clone() }),
        })
    }
}

pub const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// `40 05 04` one-shot response carrying PM2.5=100, PM10=50.
pub const ONESHOT_FRAME: [u8; 8] = [0x40, 0x05, 0x04, 0x00, 0x64, 0x00, 0x32, 0x2B];

/// `42 4D` auto-send frame carrying PM2.5=200, PM10=150.
pub const AUTO_FRAME: [u8; 12] = [0x42, 0x4D, 0x00, 0x00, 0x00, 0x00, 0x00, 0xC8, 0x00, 0x96, 0x00, 0x00];
