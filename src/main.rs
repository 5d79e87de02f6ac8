use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use hpm_monitor_lib::config::{load_settings, LinkSettings};
use hpm_monitor_lib::serial::Command;
use hpm_monitor_lib::session::{Notification, SensorSession};

#[derive(Parser)]
#[command(name = "hpm-monitor")]
#[command(about = "HPM particle sensor monitor")]
struct Cli {
    /// Serial port the sensor is attached to (e.g. /dev/ttyUSB0, COM3)
    #[arg(short, long)]
    port: String,

    /// JSON file with link settings
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Command to send after connecting; repeatable, sent in order
    #[arg(short = 'x', long = "command", value_parser = parse_command)]
    commands: Vec<Command>,

    /// Stop monitoring after this many seconds (runs until Ctrl-C otherwise)
    #[arg(short, long)]
    duration: Option<u64>,

    /// Print notifications as JSON lines
    #[arg(long)]
    json: bool,

    /// Enable debug logging (hex dumps of every frame)
    #[arg(long)]
    debug: bool,
}

fn parse_command(name: &str) -> Result<Command, String> {
    Command::from_name(name).map_err(|e| {
        let known: Vec<&str> = Command::ALL.iter().map(|cmd| cmd.name()).collect();
        format!("{} (known: {})", e, known.join(", "))
    })
}

fn init_logging(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);

    let settings = match &cli.config {
        Some(path) => load_settings(path)
            .with_context(|| format!("loading settings from {}", path.display()))?,
        None => LinkSettings::default(),
    };

    let (mut session, mut notifications) = SensorSession::serial(settings);
    session
        .open(&cli.port)
        .with_context(|| format!("opening {}", cli.port))?;

    for cmd in &cli.commands {
        session.send_command(*cmd).await?;
    }

    let deadline = async {
        match cli.duration {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => break,
            notification = notifications.recv() => match notification {
                Some(notification) => {
                    report(&notification, cli.json)?;
                    if notification == Notification::ConnectionClosed {
                        return Ok(());
                    }
                }
                None => break,
            },
        }
    }

    session.close().await;
    while let Ok(notification) = notifications.try_recv() {
        report(&notification, cli.json)?;
    }
    Ok(())
}

fn report(notification: &Notification, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string(notification)?);
        return Ok(());
    }
    match notification {
        Notification::Pm25(value) => println!("PM 2.5: {}", value),
        Notification::Pm10(value) => println!("PM 10:  {}", value),
        Notification::Ack => println!("ACK"),
        Notification::Warning(message) => println!("warning: {}", message),
        Notification::ConnectionError(message) => println!("connection error: {}", message),
        Notification::ConnectionClosed => println!("connection closed"),
    }
    Ok(())
}
