use std::fmt;

use tokio::sync::broadcast;
use tracing::info;
use uvclink_common::types::{DeviceDescriptor, PreviewSize};

/// Informational events for the presentation layer. Terminal errors each
/// produce exactly one of these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    DeviceAttached(DeviceDescriptor),
    DeviceDetached(DeviceDescriptor),
    NoCandidateFound { scanned: usize },
    CandidateFound(DeviceDescriptor),
    PermissionRequested(DeviceDescriptor),
    PermissionDenied(DeviceDescriptor),
    PermissionCancelled(DeviceDescriptor),
    Connected(DeviceDescriptor),
    DeviceOpenFailed { device: DeviceDescriptor, reason: String },
    PreviewStarted { size: Option<PreviewSize>, attempts: u32 },
    PreviewStartFailed { attempts: u32 },
    PreviewStopped,
    DeviceLost(DeviceDescriptor),
    Disconnected,
    SurfaceReady { width: u32, height: u32 },
    SurfaceReleased,
}

impl StatusEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            StatusEvent::DeviceAttached(_) => "device_attached",
            StatusEvent::DeviceDetached(_) => "device_detached",
            StatusEvent::NoCandidateFound { .. } => "no_candidate_found",
            StatusEvent::CandidateFound(_) => "candidate_found",
            StatusEvent::PermissionRequested(_) => "permission_requested",
            StatusEvent::PermissionDenied(_) => "permission_denied",
            StatusEvent::PermissionCancelled(_) => "permission_cancelled",
            StatusEvent::Connected(_) => "connected",
            StatusEvent::DeviceOpenFailed { .. } => "device_open_failed",
            StatusEvent::PreviewStarted { .. } => "preview_started",
            StatusEvent::PreviewStartFailed { .. } => "preview_start_failed",
            StatusEvent::PreviewStopped => "preview_stopped",
            StatusEvent::DeviceLost(_) => "device_lost",
            StatusEvent::Disconnected => "disconnected",
            StatusEvent::SurfaceReady { .. } => "surface_ready",
            StatusEvent::SurfaceReleased => "surface_released",
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(
            self,
            StatusEvent::NoCandidateFound { .. }
                | StatusEvent::PermissionDenied(_)
                | StatusEvent::PermissionCancelled(_)
                | StatusEvent::DeviceOpenFailed { .. }
                | StatusEvent::PreviewStartFailed { .. }
                | StatusEvent::DeviceLost(_)
        )
    }
}

impl fmt::Display for StatusEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusEvent::DeviceAttached(d) => write!(f, "USB device attached: {}", d.name),
            StatusEvent::DeviceDetached(d) => write!(f, "USB device detached: {}", d.name),
            StatusEvent::NoCandidateFound { scanned: 0 } => f.write_str("No USB devices found"),
            StatusEvent::NoCandidateFound { scanned } => {
                write!(f, "Found {scanned} USB devices, but no UVC cameras")
            }
            StatusEvent::CandidateFound(d) => write!(f, "Found UVC camera: {d}"),
            StatusEvent::PermissionRequested(d) => {
                write!(f, "Requesting permission for {}", d.label())
            }
            StatusEvent::PermissionDenied(d) => write!(f, "Permission denied for {}", d.label()),
            StatusEvent::PermissionCancelled(d) => {
                write!(f, "Permission request cancelled for {}", d.label())
            }
            StatusEvent::Connected(d) => write!(f, "Camera connected: {}", d.label()),
            StatusEvent::DeviceOpenFailed { device, reason } => {
                write!(f, "Failed to open {}: {reason}", device.label())
            }
            StatusEvent::PreviewStarted { size: Some(size), attempts } => {
                write!(f, "Preview started at {size} (attempt {attempts})")
            }
            StatusEvent::PreviewStarted { size: None, attempts } => {
                write!(f, "Preview started at driver default size (attempt {attempts})")
            }
            StatusEvent::PreviewStartFailed { attempts } => {
                write!(f, "Failed to start preview after {attempts} attempts")
            }
            StatusEvent::PreviewStopped => f.write_str("Camera preview stopped"),
            StatusEvent::DeviceLost(d) => write!(f, "Camera lost: {}", d.label()),
            StatusEvent::Disconnected => f.write_str("Camera disconnected"),
            StatusEvent::SurfaceReady { width, height } => {
                write!(f, "Preview surface ready ({width}x{height})")
            }
            StatusEvent::SurfaceReleased => f.write_str("Preview surface released"),
        }
    }
}

/// Broadcasts status events. Sending with no subscribers is not an error.
#[derive(Clone)]
pub struct StatusNotifier {
    tx: broadcast::Sender<StatusEvent>,
}

impl StatusNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: StatusEvent) {
        info!(target: "uvclink", status = event.kind(), "{event}");
        let _ = self.tx.send(event);
    }
}

impl Default for StatusNotifier {
    fn default() -> Self {
        Self::new(64)
    }
}
