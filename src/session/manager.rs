use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use super::{Notification, Result, SessionError};
use crate::config::LinkSettings;
use crate::serial::protocol::{encode, format_tokens, tokenize, Command, SensorEvent};
use crate::serial::{EventSink, LinkReader, PortOpener, PortWriter, ReaderStats, SerialError, SerialInterface};

/// One sensor connection: opens the port, writes commands, and relays what the
/// reader decodes as [`Notification`]s.
pub struct SensorSession {
    opener: Arc<dyn PortOpener>,
    settings: LinkSettings,
    notify_tx: mpsc::UnboundedSender<Notification>,
    active: Option<ActiveLink>,
}

struct ActiveLink {
    port_name: String,
    writer: Box<dyn PortWriter>,
    reader: LinkReader,
    relay: Arc<SessionRelay>,
}

/// Translates reader output into notifications. The closing reset is sent at
/// most once per connection, whichever side closes first.
struct SessionRelay {
    notify_tx: mpsc::UnboundedSender<Notification>,
    closed: AtomicBool,
}

impl SessionRelay {
    fn new(notify_tx: mpsc::UnboundedSender<Notification>) -> Self {
        Self { notify_tx, closed: AtomicBool::new(false) }
    }

    fn notify(&self, notification: Notification) {
        // Receiver gone means nobody is listening any more
        let _ = self.notify_tx.send(notification);
    }

    fn reset(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.notify(Notification::Pm25(0));
        self.notify(Notification::Pm10(0));
        self.notify(Notification::ConnectionClosed);
        log::info!("Connection closed");
    }
}

impl EventSink for SessionRelay {
    fn on_event(&self, event: SensorEvent) {
        match event {
            SensorEvent::OneshotReading { pm25, pm10 } | SensorEvent::AutoReading { pm25, pm10 } => {
                log::debug!("Reading PM2.5={} PM10={} ({:?})", pm25, pm10, event);
                self.notify(Notification::Pm25(pm25));
                self.notify(Notification::Pm10(pm10));
            }
            SensorEvent::Ack => {
                log::debug!("Sensor acknowledged command");
                self.notify(Notification::Ack);
            }
            SensorEvent::SensorError => {
                log::warn!("Sensor returned an error frame");
                self.notify(Notification::Warning("Sensor returned an error frame".to_string()));
            }
            SensorEvent::UnknownFrame => {
                log::warn!("Unrecognized frame from sensor");
                self.notify(Notification::Warning("Unrecognized frame from sensor".to_string()));
            }
        }
    }

    fn on_link_failed(&self, error: SerialError) {
        self.notify(Notification::Warning(format!("Link failed: {}", error)));
        self.reset();
    }
}

impl SensorSession {
    /// Create a closed session. Notifications arrive on the returned receiver.
    pub fn new(
        opener: impl PortOpener + 'static,
        settings: LinkSettings,
    ) -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        let session = Self {
            opener: Arc::new(opener),
            settings,
            notify_tx,
            active: None,
        };
        (session, notify_rx)
    }

    /// Session backed by a real serial port.
    pub fn serial(settings: LinkSettings) -> (Self, mpsc::UnboundedReceiver<Notification>) {
        Self::new(SerialInterface::new(), settings)
    }

    pub fn settings(&self) -> &LinkSettings {
        &self.settings
    }

    /// Open `port_name` and start the reader. Must be called from within a
    /// tokio runtime. On failure a [`Notification::ConnectionError`] is sent
    /// and the session stays closed.
    pub fn open(&mut self, port_name: &str) -> Result<()> {
        self.reclaim_dead_link();
        if let Some(link) = &self.active {
            return Err(SessionError::AlreadyConnected(link.port_name.clone()));
        }

        let halves = match self.opener.open(port_name, &self.settings) {
            Ok(halves) => halves,
            Err(e) => {
                log::error!("Failed to open {}: {}", port_name, e);
                let _ = self.notify_tx.send(Notification::ConnectionError(e.to_string()));
                return Err(e.into());
            }
        };

        let relay = Arc::new(SessionRelay::new(self.notify_tx.clone()));
        let reader = LinkReader::spawn(halves.reader, &self.settings, relay.clone());

        self.active = Some(ActiveLink {
            port_name: port_name.to_string(),
            writer: halves.writer,
            reader,
            relay,
        });

        log::info!("Connection established on {}", port_name);
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.active.as_ref().is_some_and(|link| !link.reader.is_finished())
    }

    pub fn port_name(&self) -> Option<&str> {
        self.active.as_ref().map(|link| link.port_name.as_str())
    }

    pub fn stats(&self) -> Option<watch::Receiver<ReaderStats>> {
        self.active.as_ref().map(|link| link.reader.stats())
    }

    /// Write one command frame. A write failure closes the session.
    pub async fn send_command(&mut self, cmd: Command) -> Result<()> {
        self.reclaim_dead_link();
        let link = self.active.as_mut().ok_or(SessionError::NotConnected)?;

        let frame = encode(cmd);
        if let Err(e) = link.writer.write_frame(&frame) {
            log::error!("Failed to write {} to {}: {}", cmd, link.port_name, e);
            self.close().await;
            return Err(e.into());
        }

        log::debug!("WRITE - {}", format_tokens(&tokenize(&frame)));
        Ok(())
    }

    pub async fn send_command_by_name(&mut self, name: &str) -> Result<()> {
        let cmd = Command::from_name(name)?;
        self.send_command(cmd).await
    }

    /// Stop the reader, wait for it to exit, release the port and emit the
    /// zero reading. No-op when already closed.
    pub async fn close(&mut self) {
        let Some(link) = self.active.take() else {
            log::debug!("Close requested on a closed session");
            return;
        };

        link.reader.stop().await;
        drop(link.writer);
        link.relay.reset();
    }

    /// Drop a link whose reader already died on a transport error. The relay
    /// has emitted the reset by then.
    fn reclaim_dead_link(&mut self) {
        if self.active.as_ref().is_some_and(|link| link.reader.is_finished()) {
            if let Some(link) = self.active.take() {
                log::debug!("Releasing failed link on {}", link.port_name);
                link.relay.reset();
            }
        }
    }
}
