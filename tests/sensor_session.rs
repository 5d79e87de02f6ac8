mod common;

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use common::{ScriptedPort, AUTO_FRAME, ONESHOT_FRAME, RECV_TIMEOUT};
use hpm_monitor_lib::config::LinkSettings;
use hpm_monitor_lib::serial::{Command, SerialError};
use hpm_monitor_lib::session::{Notification, SensorSession, SessionError};

const PORT: &str = "/dev/ttyUSB0";

fn new_session(port: &ScriptedPort) -> (SensorSession, mpsc::UnboundedReceiver<Notification>) {
    SensorSession::new(port.clone(), LinkSettings::default())
}

async fn next(rx: &mut mpsc::UnboundedReceiver<Notification>) -> Notification {
    timeout(RECV_TIMEOUT, rx.recv())
        .await
        .expect("no notification")
        .expect("notification channel closed")
}

async fn expect_reset(rx: &mut mpsc::UnboundedReceiver<Notification>) {
    assert_eq!(next(rx).await, Notification::Pm25(0));
    assert_eq!(next(rx).await, Notification::Pm10(0));
    assert_eq!(next(rx).await, Notification::ConnectionClosed);
}

#[tokio::test(start_paused = true)]
async fn test_auto_frame_updates_both_channels() {
    let port = ScriptedPort::new();
    let (mut session, mut rx) = new_session(&port);
    session.open(PORT).expect("open");
    assert!(session.is_open());
    assert_eq!(session.port_name(), Some(PORT));
    assert_eq!(port.opened(), vec![PORT.to_string()]);

    port.push(&AUTO_FRAME);
    assert_eq!(next(&mut rx).await, Notification::Pm25(200));
    assert_eq!(next(&mut rx).await, Notification::Pm10(150));

    port.push(&ONESHOT_FRAME);
    assert_eq!(next(&mut rx).await, Notification::Pm25(100));
    assert_eq!(next(&mut rx).await, Notification::Pm10(50));

    session.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_send_command_writes_table_bytes() {
    let port = ScriptedPort::new();
    let (mut session, _rx) = new_session(&port);
    session.open(PORT).unwrap();

    session.send_command(Command::ReadParticleMeasuringResult).await.unwrap();
    session.send_command_by_name("Enable Auto Send").await.unwrap();
    assert_eq!(port.written(), vec![0x68, 0x01, 0x04, 0x93, 0x68, 0x01, 0x40, 0x57]);

    let err = session.send_command_by_name("Turbo Mode").await.unwrap_err();
    assert!(matches!(err, SessionError::InvalidCommand(_)));
    assert!(session.is_open(), "bad command name is not a link failure");

    session.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_send_command_while_closed_is_rejected() {
    let port = ScriptedPort::new();
    let (mut session, _rx) = new_session(&port);

    let err = session.send_command(Command::StartParticleMeasurement).await.unwrap_err();
    assert!(matches!(err, SessionError::NotConnected));
    assert!(port.written().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_close_resets_readings() {
    let port = ScriptedPort::new();
    let (mut session, mut rx) = new_session(&port);
    session.open(PORT).unwrap();

    port.push(&AUTO_FRAME);
    assert_eq!(next(&mut rx).await, Notification::Pm25(200));
    assert_eq!(next(&mut rx).await, Notification::Pm10(150));

    session.close().await;
    expect_reset(&mut rx).await;
    assert!(!session.is_open());
    assert!(session.port_name().is_none());

    let err = session.send_command(Command::StopAutoSend).await.unwrap_err();
    assert!(matches!(err, SessionError::NotConnected));

    // Closing twice emits nothing more
    session.close().await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_open_failure_reports_connection_error() {
    let port = ScriptedPort::new();
    port.fail_open();
    let (mut session, mut rx) = new_session(&port);

    let err = session.open("/dev/missing").unwrap_err();
    assert!(matches!(err, SessionError::SerialError(SerialError::PortNotFound(_))));
    match next(&mut rx).await {
        Notification::ConnectionError(msg) => assert!(msg.contains("/dev/missing")),
        other => panic!("unexpected {:?}", other),
    }
    assert!(!session.is_open());
}

#[tokio::test(start_paused = true)]
async fn test_second_open_is_rejected() {
    let port = ScriptedPort::new();
    let (mut session, _rx) = new_session(&port);
    session.open(PORT).unwrap();

    let err = session.open("/dev/ttyUSB1").unwrap_err();
    assert!(matches!(err, SessionError::AlreadyConnected(ref name) if name == PORT));
    assert_eq!(port.opened().len(), 1);

    session.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_protocol_frames_are_non_fatal_warnings() {
    let port = ScriptedPort::new();
    let (mut session, mut rx) = new_session(&port);
    session.open(PORT).unwrap();

    port.push(&[0x96, 0x96]);
    assert!(matches!(next(&mut rx).await, Notification::Warning(_)));

    port.push(&[0x01, 0x02, 0x03]);
    assert!(matches!(next(&mut rx).await, Notification::Warning(_)));

    // Header matches but the frame is too short for its offsets
    port.push(&[0x42, 0x4D, 0x00]);
    assert!(matches!(next(&mut rx).await, Notification::Warning(_)));

    port.push(&[0xA5, 0xA5]);
    assert_eq!(next(&mut rx).await, Notification::Ack);

    assert!(session.is_open());
    port.push(&ONESHOT_FRAME);
    assert_eq!(next(&mut rx).await, Notification::Pm25(100));
    assert_eq!(next(&mut rx).await, Notification::Pm10(50));

    let stats = session.stats().expect("open session has stats").borrow().clone();
    assert_eq!(stats.sensor_errors, 1);
    assert_eq!(stats.unknown_frames, 2);
    assert_eq!(stats.acks, 1);
    assert_eq!(stats.readings, 1);

    session.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_read_failure_closes_session_once() {
    let port = ScriptedPort::new();
    let (mut session, mut rx) = new_session(&port);
    session.open(PORT).unwrap();

    port.fail_reads();
    match next(&mut rx).await {
        Notification::Warning(msg) => assert!(msg.contains("device unplugged"), "{msg}"),
        other => panic!("unexpected {:?}", other),
    }
    expect_reset(&mut rx).await;
    tokio::task::yield_now().await;
    assert!(!session.is_open());

    let err = session.send_command(Command::ReadParticleMeasuringResult).await.unwrap_err();
    assert!(matches!(err, SessionError::NotConnected));

    session.close().await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err(), "reset must not repeat");
}

#[tokio::test(start_paused = true)]
async fn test_write_failure_closes_session() {
    let port = ScriptedPort::new();
    let (mut session, mut rx) = new_session(&port);
    session.open(PORT).unwrap();

    port.fail_writes();
    let err = session.send_command(Command::StopParticleMeasurement).await.unwrap_err();
    assert!(matches!(err, SessionError::SerialError(SerialError::IoError(_))));
    expect_reset(&mut rx).await;
    assert!(!session.is_open());
}

#[tokio::test(start_paused = true)]
async fn test_reopen_after_close() {
    let port = ScriptedPort::new();
    let (mut session, mut rx) = new_session(&port);

    session.open(PORT).unwrap();
    session.close().await;
    expect_reset(&mut rx).await;

    session.open(PORT).unwrap();
    port.push(&ONESHOT_FRAME);
    assert_eq!(next(&mut rx).await, Notification::Pm25(100));
    assert_eq!(next(&mut rx).await, Notification::Pm10(50));

    session.close().await;
    expect_reset(&mut rx).await;
    assert_eq!(port.opened().len(), 2);
}

#[test]
fn test_notification_json_shape() {
    let json = serde_json::to_string(&Notification::Pm25(42)).unwrap();
    assert_eq!(json, r#"{"type":"Pm25","value":42}"#);
    let json = serde_json::to_string(&Notification::ConnectionClosed).unwrap();
    assert_eq!(json, r#"{"type":"ConnectionClosed"}"#);
}
