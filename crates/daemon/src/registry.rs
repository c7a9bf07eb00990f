use std::sync::Arc;

use tracing::debug;
use uvclink_common::backend::UsbSubsystem;
use uvclink_common::filter::DeviceFilter;
use uvclink_common::types::DeviceDescriptor;

/// Result of one enumeration pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub scanned: usize,
    pub candidates: Vec<DeviceDescriptor>,
}

/// Classifies attached USB devices as camera candidates.
pub struct DeviceRegistry {
    usb: Arc<dyn UsbSubsystem>,
    filter: DeviceFilter,
}

impl DeviceRegistry {
    pub fn new(usb: Arc<dyn UsbSubsystem>, filter: DeviceFilter) -> Self {
        Self { usb, filter }
    }

    pub fn is_candidate(&self, device: &DeviceDescriptor) -> bool {
        self.filter.matches(device)
    }

    pub async fn scan(&self) -> ScanReport {
        let devices = self.usb.enumerate().await;
        let scanned = devices.len();
        let candidates = devices
            .into_iter()
            .filter(|device| {
                let matched = self.filter.matches(device);
                debug!(
                    device = %device,
                    class = device.class,
                    subclass = device.subclass,
                    protocol = device.protocol,
                    matched,
                    "enumerated USB device"
                );
                matched
            })
            .collect();
        ScanReport { scanned, candidates }
    }

    /// Candidates in enumeration order.
    pub async fn list_candidates(&self) -> Vec<DeviceDescriptor> {
        self.scan().await.candidates
    }

    pub async fn first_candidate(&self) -> Option<DeviceDescriptor> {
        self.list_candidates().await.into_iter().next()
    }
}
