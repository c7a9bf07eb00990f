use clap::{Parser, Subcommand};

pub const DBUS_NAME: &str = "org.uvclink.Daemon";
pub const DBUS_PATH: &str = "/org/uvclink/Daemon";
pub const DBUS_INTERFACE: &str = "org.uvclink.Session";

#[derive(Parser)]
#[command(name = "uvclinkctl", version, about = "uvclink camera session CLI")]
pub struct Cli {
    /// Talk to a daemon on the session bus instead of the system bus
    #[arg(long, global = true)]
    pub session_bus: bool,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Clone, Debug, PartialEq, Eq)]
pub enum Commands {
    /// List attached UVC cameras
    List,
    /// Pick the first camera as the connection candidate
    Scan,
    /// Request permission for the candidate and open it
    Connect {
        /// Block until the permission prompt is answered
        #[arg(long)]
        wait: bool,
    },
    /// Start the preview on the bound surface
    Start,
    /// Stop the preview
    Stop,
    /// Stop the preview and close the camera
    Disconnect,
    /// Show the connection state
    State,
    /// Preview surface lifecycle
    Surface {
        #[command(subcommand)]
        cmd: SurfaceCmd,
    },
    /// Print status and transform signals until interrupted
    Watch,
}

#[derive(Subcommand, Clone, Debug, PartialEq, Eq)]
pub enum SurfaceCmd {
    /// Announce a new surface; the id is a file path receiving frames
    Available {
        target: String,
        #[arg(long, default_value_t = 640)]
        width: u32,
        #[arg(long, default_value_t = 480)]
        height: u32,
    },
    Resized {
        width: u32,
        height: u32,
    },
    Destroyed {
        target: String,
    },
}

/// Human summary of the `StartPreview` reply.
pub fn describe_start(width: u32, height: u32, attempts: u32) -> String {
    let size = if width == 0 && height == 0 {
        "driver default size".to_string()
    } else {
        format!("{width}x{height}")
    };
    let tries = if attempts == 1 { "attempt" } else { "attempts" };
    format!("preview running at {size} after {attempts} {tries}")
}

/// `state [device] [target=...]` line for the `State` reply.
pub fn describe_state(state: &str, device: &str, target: &str) -> String {
    let mut line = state.to_string();
    if !device.is_empty() {
        line.push(' ');
        line.push_str(device);
    }
    if !target.is_empty() {
        line.push_str(" target=");
        line.push_str(target);
    }
    line
}
