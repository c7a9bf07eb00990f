use std::collections::HashSet;
use std::ffi::{CString, OsStr};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::{debug, warn};
use uvclink_common::backend::{PermissionCallback, UsbSubsystem};
use uvclink_common::types::{DeviceDescriptor, InterfaceClass};

use crate::polkit;
use crate::BackendError;

pub const DEFAULT_ACTION_ID: &str = "org.uvclink.access-device";

fn parse_hex<T: TryFrom<u32>>(value: Option<&OsStr>) -> Option<T> {
    let text = value?.to_str()?.trim();
    u32::from_str_radix(text, 16)
        .ok()
        .and_then(|v| T::try_from(v).ok())
}

fn text(value: Option<&OsStr>) -> String {
    value
        .and_then(|s| s.to_str())
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

/// `/dev/bus/usb/BBB/DDD` for a device, from its node or its udev name.
pub(crate) fn node_name(device: &udev::Device) -> Option<String> {
    if let Some(node) = device.devnode().and_then(|p| p.to_str()) {
        return Some(node.to_string());
    }
    let name = device.property_value("DEVNAME")?.to_str()?;
    Some(absolute_devname(name))
}

pub(crate) fn absolute_devname(name: &str) -> String {
    if name.starts_with('/') {
        name.to_string()
    } else {
        format!("/dev/{name}")
    }
}

fn interfaces(device: &udev::Device) -> Result<Vec<InterfaceClass>, BackendError> {
    let mut enumerator = udev::Enumerator::new()?;
    enumerator.match_parent(device)?;
    enumerator.match_property("DEVTYPE", "usb_interface")?;
    let mut found = Vec::new();
    for iface in enumerator.scan_devices()? {
        let class = parse_hex(iface.attribute_value("bInterfaceClass"));
        let subclass = parse_hex(iface.attribute_value("bInterfaceSubClass"));
        let protocol = parse_hex(iface.attribute_value("bInterfaceProtocol"));
        if let (Some(class), Some(subclass), Some(protocol)) = (class, subclass, protocol) {
            found.push(InterfaceClass {
                class,
                subclass,
                protocol,
            });
        }
    }
    Ok(found)
}

/// Builds a descriptor from sysfs attributes of a `usb_device`.
pub(crate) fn descriptor(device: &udev::Device) -> Option<DeviceDescriptor> {
    let name = node_name(device)?;
    let vendor_id = parse_hex(device.attribute_value("idVendor"))?;
    let product_id = parse_hex(device.attribute_value("idProduct"))?;
    let interfaces = interfaces(device).unwrap_or_else(|e| {
        debug!(device = %name, error = %e, "interface scan failed");
        Vec::new()
    });
    Some(DeviceDescriptor {
        name,
        vendor_id,
        product_id,
        class: parse_hex(device.attribute_value("bDeviceClass")).unwrap_or(0),
        subclass: parse_hex(device.attribute_value("bDeviceSubClass")).unwrap_or(0),
        protocol: parse_hex(device.attribute_value("bDeviceProtocol")).unwrap_or(0),
        product_name: text(device.attribute_value("product")),
        interfaces,
    })
}

fn scan() -> Result<Vec<DeviceDescriptor>, BackendError> {
    let mut enumerator = udev::Enumerator::new()?;
    enumerator.match_subsystem("usb")?;
    enumerator.match_property("DEVTYPE", "usb_device")?;
    Ok(enumerator
        .scan_devices()?
        .filter_map(|device| descriptor(&device))
        .collect())
}

fn node_accessible(path: &str) -> bool {
    let Ok(path) = CString::new(path) else {
        return false;
    };
    // SAFETY: `path` is a valid NUL-terminated string for the call.
    unsafe { libc::access(path.as_ptr(), libc::R_OK | libc::W_OK) == 0 }
}

/// USB subsystem backed by udev. A device counts as permitted when its node
/// is readable and writable or polkit granted it earlier in this process.
#[derive(Clone)]
pub struct UdevSubsystem {
    action_id: String,
    granted: Arc<Mutex<HashSet<String>>>,
}

impl Default for UdevSubsystem {
    fn default() -> Self {
        Self::new(DEFAULT_ACTION_ID)
    }
}

impl UdevSubsystem {
    pub fn new(action_id: impl Into<String>) -> Self {
        Self {
            action_id: action_id.into(),
            granted: Arc::new(Mutex::new(HashSet::new())),
        }
    }
}

#[async_trait]
impl UsbSubsystem for UdevSubsystem {
    async fn enumerate(&self) -> Vec<DeviceDescriptor> {
        match tokio::task::spawn_blocking(scan).await {
            Ok(Ok(devices)) => devices,
            Ok(Err(e)) => {
                warn!(error = %e, "USB enumeration failed");
                Vec::new()
            }
            Err(e) => {
                warn!(error = %e, "USB enumeration task failed");
                Vec::new()
            }
        }
    }

    async fn has_permission(&self, device: &DeviceDescriptor) -> bool {
        if self.granted.lock().unwrap().contains(&device.name) {
            return true;
        }
        node_accessible(&device.name)
    }

    fn request_permission(&self, device: &DeviceDescriptor, on_result: PermissionCallback) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("permission request outside of a runtime");
            on_result(false);
            return;
        };
        let action_id = self.action_id.clone();
        let granted = Arc::clone(&self.granted);
        let device = device.clone();
        runtime.spawn(async move {
            let allowed = match polkit::check_device_access(&action_id, &device.name).await {
                Ok(allowed) => allowed,
                Err(e) => {
                    warn!(device = %device.name, error = %e, "polkit check failed");
                    false
                }
            };
            if allowed {
                granted.lock().unwrap().insert(device.name.clone());
            }
            on_result(allowed);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsString;

    #[test]
    fn sysfs_hex_attributes_parse() {
        let vid = OsString::from("046d\n");
        assert_eq!(parse_hex::<u16>(Some(vid.as_os_str())), Some(0x046d));
        let class = OsString::from("ef");
        assert_eq!(parse_hex::<u8>(Some(class.as_os_str())), Some(0xef));
        let wide = OsString::from("1ff");
        assert_eq!(parse_hex::<u8>(Some(wide.as_os_str())), None);
        assert_eq!(parse_hex::<u8>(None), None);
    }

    #[test]
    fn relative_devname_is_rooted() {
        assert_eq!(absolute_devname("bus/usb/001/004"), "/dev/bus/usb/001/004");
        assert_eq!(absolute_devname("/dev/bus/usb/001/004"), "/dev/bus/usb/001/004");
    }

    #[test]
    fn missing_node_is_not_accessible() {
        assert!(!node_accessible("/dev/bus/usb/999/999"));
        assert!(!node_accessible("bad\0path"));
    }
}
