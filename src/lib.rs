pub mod config;
pub mod serial;
pub mod session;

pub use config::LinkSettings;
pub use serial::{Command, SensorEvent};
pub use session::{Notification, SensorSession};
