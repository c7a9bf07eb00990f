pub mod config;
pub mod dbus;
pub mod error;
pub mod machine;
pub mod permission;
pub mod preview;
pub mod registry;
pub mod session;
pub mod status;
pub mod surface;

pub use config::{load_config, Config};
pub use error::SessionError;
pub use machine::{ConnectProgress, ConnectionState};
pub use preview::PreviewOutcome;
pub use session::{Session, SessionHandle, StateSnapshot};
pub use status::StatusEvent;
