//! Background reader task: drains the port on a fixed cadence and turns each
//! drain into decoded sensor events.
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::interface::PortReader;
use super::protocol::{decode, format_tokens, tokenize, DrainFramer, Reframer, SensorEvent};
use super::{Result, SerialError};
use crate::config::LinkSettings;

/// Receives everything the reader produces, in emission order.
pub trait EventSink: Send + Sync + 'static {
    fn on_event(&self, event: SensorEvent);

    /// Called once, as the last thing the task does after a transport failure.
    fn on_link_failed(&self, error: SerialError);
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ReaderStats {
    pub drains: u64,
    pub bytes_read: u64,
    pub readings: u64,
    pub acks: u64,
    pub sensor_errors: u64,
    pub unknown_frames: u64,
    pub truncated_drains: u64,
    pub last_error: Option<String>,
}

impl ReaderStats {
    fn record(&mut self, event: &SensorEvent) {
        match event {
            SensorEvent::OneshotReading { .. } | SensorEvent::AutoReading { .. } => self.readings += 1,
            SensorEvent::Ack => self.acks += 1,
            SensorEvent::SensorError => self.sensor_errors += 1,
            SensorEvent::UnknownFrame => self.unknown_frames += 1,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Pacing {
    poll_interval: Duration,
    inter_byte_interval: Duration,
    max_drain_bytes: usize,
}

impl From<&LinkSettings> for Pacing {
    fn from(settings: &LinkSettings) -> Self {
        Self {
            poll_interval: settings.poll_interval(),
            inter_byte_interval: settings.inter_byte_interval(),
            max_drain_bytes: settings.max_drain_bytes.max(1),
        }
    }
}

/// Handle to a running reader task. At most one exists per open port.
pub struct LinkReader {
    stop_tx: watch::Sender<bool>,
    stats_rx: watch::Receiver<ReaderStats>,
    task: JoinHandle<()>,
}

impl LinkReader {
    /// Spawn a reader using the wire framing (one drain = one frame).
    pub fn spawn(port: Box<dyn PortReader>, settings: &LinkSettings, sink: Arc<dyn EventSink>) -> Self {
        Self::spawn_with_framer(port, settings, DrainFramer, sink)
    }

    pub fn spawn_with_framer<F: Reframer>(
        port: Box<dyn PortReader>,
        settings: &LinkSettings,
        framer: F,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        let (stats_tx, stats_rx) = watch::channel(ReaderStats::default());

        let task = tokio::spawn(reader_task(
            port,
            Pacing::from(settings),
            framer,
            sink,
            stop_rx,
            stats_tx,
        ));

        Self { stop_tx, stats_rx, task }
    }

    pub fn stats(&self) -> watch::Receiver<ReaderStats> {
        self.stats_rx.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Request termination and wait until the task has released the port.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.task.await {
            log::error!("Link reader task ended abnormally: {}", e);
        }
    }
}

async fn reader_task<F: Reframer>(
    mut port: Box<dyn PortReader>,
    pacing: Pacing,
    mut framer: F,
    sink: Arc<dyn EventSink>,
    mut stop_rx: watch::Receiver<bool>,
    stats_tx: watch::Sender<ReaderStats>,
) {
    let mut stats = ReaderStats::default();
    log::debug!("Link reader started");

    loop {
        if *stop_rx.borrow() {
            break;
        }
        if !pause(&mut stop_rx, pacing.poll_interval).await {
            break;
        }

        let drained = match drain(port.as_mut(), &mut stop_rx, &pacing).await {
            Ok(Some(drained)) => drained,
            Ok(None) => break,
            Err(e) => {
                log::error!("Serial read failed: {}", e);
                stats.last_error = Some(e.to_string());
                stats_tx.send_replace(stats.clone());
                drop(port);
                sink.on_link_failed(e);
                return;
            }
        };

        if drained.bytes.is_empty() {
            continue;
        }

        stats.drains += 1;
        stats.bytes_read += drained.bytes.len() as u64;
        if drained.truncated {
            stats.truncated_drains += 1;
        }

        let tokens = tokenize(&drained.bytes);
        log::debug!("RECV - {}", format_tokens(&tokens));

        for frame in framer.frames(tokens) {
            let event = decode(&frame);
            stats.record(&event);
            sink.on_event(event);
        }
        stats_tx.send_replace(stats.clone());
    }

    log::debug!("Link reader stopped after {} drains", stats.drains);
}

struct Drained {
    bytes: Vec<u8>,
    truncated: bool,
}

/// Read everything currently available, one byte per inter-byte interval.
/// Returns `None` when a stop request arrives mid-drain.
async fn drain(
    port: &mut dyn PortReader,
    stop_rx: &mut watch::Receiver<bool>,
    pacing: &Pacing,
) -> Result<Option<Drained>> {
    let mut bytes = Vec::new();

    while port.bytes_available()? > 0 {
        if bytes.len() >= pacing.max_drain_bytes {
            return Ok(Some(Drained { bytes, truncated: true }));
        }
        if !pause(stop_rx, pacing.inter_byte_interval).await {
            return Ok(None);
        }
        if let Some(byte) = port.read_byte()? {
            bytes.push(byte);
        }
    }

    Ok(Some(Drained { bytes, truncated: false }))
}

/// Sleep for `duration` unless a stop request arrives first.
/// Returns false when the reader should exit.
async fn pause(stop_rx: &mut watch::Receiver<bool>, duration: Duration) -> bool {
    tokio::select! {
        biased;
        _ = stop_rx.wait_for(|stop| *stop) => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
