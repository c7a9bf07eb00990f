//! Linux implementation of the camera backend traits: udev for enumeration
//! and hotplug, polkit for access prompts and V4L2 for streaming.

pub mod capture;
pub mod hotplug;
pub mod polkit;
pub mod usb;

use thiserror::Error;

pub use capture::V4lDriver;
pub use hotplug::HotplugMonitor;
pub use usb::UdevSubsystem;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("udev error: {0}")]
    Udev(#[from] std::io::Error),
    #[error("polkit error: {0}")]
    Polkit(#[from] zbus::Error),
}
