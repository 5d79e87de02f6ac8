//! HPM particle sensor command/response framing.
//!
//! Outgoing frames are fixed four byte commands. Incoming frames have no
//! delimiter: whatever arrived in one drain of the port is one frame, and it
//! is classified by its leading bytes.
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Invalid hex token: {0:?}")]
    InvalidToken(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Command {
    ReadParticleMeasuringResult,
    StartParticleMeasurement,
    StopParticleMeasurement,
    EnableAutoSend,
    StopAutoSend,
}

impl Command {
    pub const ALL: [Command; 5] = [
        Command::ReadParticleMeasuringResult,
        Command::StartParticleMeasurement,
        Command::StopParticleMeasurement,
        Command::EnableAutoSend,
        Command::StopAutoSend,
    ];

    /// Wire bytes, including the trailing checksum byte.
    pub const fn payload(self) -> [u8; 4] {
        match self {
            Command::ReadParticleMeasuringResult => [0x68, 0x01, 0x04, 0x93],
            Command::StartParticleMeasurement => [0x68, 0x01, 0x01, 0x96],
            Command::StopParticleMeasurement => [0x68, 0x01, 0x02, 0x95],
            Command::EnableAutoSend => [0x68, 0x01, 0x40, 0x57],
            Command::StopAutoSend => [0x68, 0x01, 0x20, 0x77],
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Command::ReadParticleMeasuringResult => "ReadParticleMeasuringResult",
            Command::StartParticleMeasurement => "StartParticleMeasurement",
            Command::StopParticleMeasurement => "StopParticleMeasurement",
            Command::EnableAutoSend => "EnableAutoSend",
            Command::StopAutoSend => "StopAutoSend",
        }
    }

    /// Human readable label, as shown in the command picker.
    pub const fn label(self) -> &'static str {
        match self {
            Command::ReadParticleMeasuringResult => "Read Particle Measuring Result",
            Command::StartParticleMeasurement => "Start Particle Measurement",
            Command::StopParticleMeasurement => "Stop Particle Measurement",
            Command::EnableAutoSend => "Enable Auto Send",
            Command::StopAutoSend => "Stop Auto Send",
        }
    }

    /// Look a command up by identifier or label. Case, spaces, underscores
    /// and hyphens are ignored, so `"enable-auto-send"` and `"Enable Auto Send"`
    /// both resolve to [`Command::EnableAutoSend`].
    pub fn from_name(name: &str) -> Result<Self, CodecError> {
        let wanted = normalize_name(name);
        Command::ALL
            .iter()
            .copied()
            .find(|cmd| normalize_name(cmd.name()) == wanted)
            .ok_or_else(|| CodecError::UnknownCommand(name.to_string()))
    }
}

fn normalize_name(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(c, ' ' | '_' | '-'))
        .flat_map(char::to_lowercase)
        .collect()
}

impl FromStr for Command {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Command::from_name(s)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Two character upper case hex rendering of one received byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HexToken(u8);

impl HexToken {
    pub const fn from_byte(byte: u8) -> Self {
        Self(byte)
    }

    pub const fn value(self) -> u8 {
        self.0
    }
}

impl FromStr for HexToken {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 2 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(CodecError::InvalidToken(s.to_string()));
        }
        u8::from_str_radix(s, 16)
            .map(HexToken)
            .map_err(|_| CodecError::InvalidToken(s.to_string()))
    }
}

impl fmt::Display for HexToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X}", self.0)
    }
}

/// Convert one drain of raw bytes into its token sequence. Token `i`
/// always corresponds to byte `i` of the drain.
pub fn tokenize(bytes: &[u8]) -> Vec<HexToken> {
    let upper = hex::encode_upper(bytes);
    upper
        .as_bytes()
        .chunks(2)
        .filter_map(|pair| std::str::from_utf8(pair).ok())
        .filter_map(|pair| pair.parse().ok())
        .collect()
}

/// Parse a whitespace separated token string such as `"40 05 04 00 64"`.
pub fn parse_tokens(line: &str) -> Result<Vec<HexToken>, CodecError> {
    line.split_whitespace().map(str::parse).collect()
}

pub fn format_tokens(tokens: &[HexToken]) -> String {
    tokens
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SensorEvent {
    OneshotReading { pm25: u16, pm10: u16 },
    AutoReading { pm25: u16, pm10: u16 },
    Ack,
    SensorError,
    UnknownFrame,
}

impl SensorEvent {
    pub fn reading(&self) -> Option<(u16, u16)> {
        match *self {
            SensorEvent::OneshotReading { pm25, pm10 } | SensorEvent::AutoReading { pm25, pm10 } => {
                Some((pm25, pm10))
            }
            _ => None,
        }
    }
}

// Frame headers
const ERROR_HEADER: [u8; 2] = [0x96, 0x96];
const ACK_HEADER: [u8; 2] = [0xA5, 0xA5];
const ONESHOT_HEADER: [u8; 3] = [0x40, 0x05, 0x04];
const AUTO_HEADER: [u8; 2] = [0x42, 0x4D]; // "BM"

// Offsets of the big endian PM2.5 / PM10 words
const ONESHOT_PM25_OFFSET: usize = 3;
const ONESHOT_PM10_OFFSET: usize = 5;
const AUTO_PM25_OFFSET: usize = 6;
const AUTO_PM10_OFFSET: usize = 8;

pub fn encode(cmd: Command) -> [u8; 4] {
    cmd.payload()
}

/// Classify one frame. Total: frames too short for the offsets their header
/// implies come back as [`SensorEvent::UnknownFrame`].
pub fn decode(tokens: &[HexToken]) -> SensorEvent {
    let starts_with = |header: &[u8]| {
        tokens.len() >= header.len()
            && tokens.iter().zip(header).all(|(token, byte)| token.value() == *byte)
    };

    if starts_with(&ERROR_HEADER) {
        SensorEvent::SensorError
    } else if starts_with(&ACK_HEADER) {
        SensorEvent::Ack
    } else if starts_with(&ONESHOT_HEADER) {
        match (word_at(tokens, ONESHOT_PM25_OFFSET), word_at(tokens, ONESHOT_PM10_OFFSET)) {
            (Some(pm25), Some(pm10)) => SensorEvent::OneshotReading { pm25, pm10 },
            _ => SensorEvent::UnknownFrame,
        }
    } else if starts_with(&AUTO_HEADER) {
        match (word_at(tokens, AUTO_PM25_OFFSET), word_at(tokens, AUTO_PM10_OFFSET)) {
            (Some(pm25), Some(pm10)) => SensorEvent::AutoReading { pm25, pm10 },
            _ => SensorEvent::UnknownFrame,
        }
    } else {
        SensorEvent::UnknownFrame
    }
}

fn word_at(tokens: &[HexToken], offset: usize) -> Option<u16> {
    let hi = tokens.get(offset)?.value();
    let lo = tokens.get(offset + 1)?.value();
    Some(u16::from_be_bytes([hi, lo]))
}

/// Splits a drain into frames before classification.
pub trait Reframer: Send + 'static {
    fn frames(&mut self, drain: Vec<HexToken>) -> Vec<Vec<HexToken>>;
}

/// The sensor protocol has no delimiter, so a whole drain is one frame.
/// Concatenated or split frames are not recovered.
#[derive(Debug, Default, Clone, Copy)]
pub struct DrainFramer;

impl Reframer for DrainFramer {
    fn frames(&mut self, drain: Vec<HexToken>) -> Vec<Vec<HexToken>> {
        if drain.is_empty() {
            Vec::new()
        } else {
            vec![drain]
        }
    }
}
