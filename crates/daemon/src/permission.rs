use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};
use uvclink_common::backend::UsbSubsystem;
use uvclink_common::types::DeviceDescriptor;

/// Where asynchronous grant/deny answers are delivered. The session routes
/// them back into its own event queue.
pub type ResultSink = Arc<dyn Fn(DeviceDescriptor, bool) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionRequest {
    pub device: DeviceDescriptor,
    pub issued_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    AlreadyGranted,
    Prompted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Granted(DeviceDescriptor),
    Denied(DeviceDescriptor),
    /// Answer for a device other than the one currently awaited.
    Stale(DeviceDescriptor),
}

/// Tracks at most one outstanding permission request.
pub struct PermissionBroker {
    usb: Arc<dyn UsbSubsystem>,
    sink: ResultSink,
    pending: Option<PermissionRequest>,
}

impl PermissionBroker {
    pub fn new(usb: Arc<dyn UsbSubsystem>, sink: ResultSink) -> Self {
        Self {
            usb,
            sink,
            pending: None,
        }
    }

    pub fn pending(&self) -> Option<&PermissionRequest> {
        self.pending.as_ref()
    }

    pub async fn request(&mut self, device: &DeviceDescriptor) -> RequestOutcome {
        if self.usb.has_permission(device).await {
            debug!(device = %device.name, "permission already held");
            self.pending = None;
            return RequestOutcome::AlreadyGranted;
        }
        if let Some(previous) = &self.pending {
            debug!(
                previous = %previous.device.name,
                device = %device.name,
                "superseding pending permission request"
            );
        }
        self.pending = Some(PermissionRequest {
            device: device.clone(),
            issued_at: Instant::now(),
        });
        let sink = Arc::clone(&self.sink);
        let answered = device.clone();
        self.usb.request_permission(
            device,
            Box::new(move |granted| sink(answered, granted)),
        );
        info!(device = %device.name, "permission requested");
        RequestOutcome::Prompted
    }

    pub fn resolve(&mut self, device: &DeviceDescriptor, granted: bool) -> Resolution {
        match self.pending.take() {
            Some(request) if request.device.same_device(device) => {
                debug!(
                    device = %device.name,
                    granted,
                    waited_ms = request.issued_at.elapsed().as_millis() as u64,
                    "permission answered"
                );
                if granted {
                    Resolution::Granted(request.device)
                } else {
                    Resolution::Denied(request.device)
                }
            }
            other => {
                warn!(device = %device.name, granted, "ignoring stale permission answer");
                self.pending = other;
                Resolution::Stale(device.clone())
            }
        }
    }

    /// Forgets the outstanding request; a later answer resolves as stale.
    pub fn cancel(&mut self) -> Option<PermissionRequest> {
        self.pending.take()
    }
}
