use tokio::io::unix::AsyncFd;
use tracing::{debug, info};
use uvclink_common::types::{DeviceDescriptor, HotplugEvent};

use crate::usb::{absolute_devname, descriptor};
use crate::BackendError;

fn hex_u16(value: &str) -> Option<u16> {
    u16::from_str_radix(value, 16).ok()
}

/// Descriptor from uevent properties alone. Removal events carry no sysfs
/// attributes, only `DEVNAME`, `PRODUCT` (`vid/pid/bcd`, hex) and `TYPE`
/// (`class/subclass/protocol`, decimal).
pub(crate) fn descriptor_from_uevent(
    devname: &str,
    product: Option<&str>,
    kind: Option<&str>,
) -> Option<DeviceDescriptor> {
    if devname.is_empty() {
        return None;
    }
    let mut ids = product.unwrap_or_default().split('/');
    let vendor_id = ids.next().and_then(hex_u16).unwrap_or(0);
    let product_id = ids.next().and_then(hex_u16).unwrap_or(0);
    let mut triple = kind
        .unwrap_or_default()
        .split('/')
        .map(|part| part.parse::<u8>().unwrap_or(0));
    Some(DeviceDescriptor {
        name: absolute_devname(devname),
        vendor_id,
        product_id,
        class: triple.next().unwrap_or(0),
        subclass: triple.next().unwrap_or(0),
        protocol: triple.next().unwrap_or(0),
        product_name: String::new(),
        interfaces: Vec::new(),
    })
}

fn property<'a>(event: &'a udev::Event, key: &str) -> Option<&'a str> {
    event.property_value(key).and_then(|v| v.to_str())
}

fn translate(event: &udev::Event) -> Option<HotplugEvent> {
    if property(event, "DEVTYPE") != Some("usb_device") {
        return None;
    }
    let from_uevent = || {
        descriptor_from_uevent(
            property(event, "DEVNAME")?,
            property(event, "PRODUCT"),
            property(event, "TYPE"),
        )
    };
    match event.event_type() {
        udev::EventType::Add => descriptor(event)
            .or_else(from_uevent)
            .map(HotplugEvent::Attached),
        udev::EventType::Remove => from_uevent().map(HotplugEvent::Detached),
        _ => None,
    }
}

/// USB attach/detach listener on a udev monitor socket, woken through the
/// tokio reactor.
pub struct HotplugMonitor {
    socket: AsyncFd<udev::MonitorSocket>,
}

impl HotplugMonitor {
    /// Must be called from within a tokio runtime.
    pub fn open() -> Result<Self, BackendError> {
        let socket = udev::MonitorBuilder::new()?
            .match_subsystem_devtype("usb", "usb_device")?
            .listen()?;
        Ok(Self {
            socket: AsyncFd::new(socket)?,
        })
    }

    /// Hands each attach/detach to `on_event`. Only returns on a socket
    /// error.
    pub async fn run<F>(self, on_event: F) -> Result<(), BackendError>
    where
        F: Fn(HotplugEvent),
    {
        info!(target: "uvclink", event = "hotplug_start", "listening for USB hotplug");
        loop {
            let mut guard = self.socket.readable().await?;
            for event in guard.get_inner().iter() {
                match translate(&event) {
                    Some(hotplug) => {
                        debug!(event = ?hotplug, "hotplug");
                        on_event(hotplug);
                    }
                    None => debug!(action = ?event.event_type(), "ignored uevent"),
                }
            }
            guard.clear_ready();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removal_uevent_parses() {
        let d = descriptor_from_uevent("bus/usb/001/004", Some("46d/825/10"), Some("239/2/1"))
            .expect("descriptor");
        assert_eq!(d.name, "/dev/bus/usb/001/004");
        assert_eq!((d.vendor_id, d.product_id), (0x046d, 0x0825));
        assert_eq!((d.class, d.subclass, d.protocol), (239, 2, 1));
    }

    #[test]
    fn sparse_uevent_defaults_to_zero() {
        let d = descriptor_from_uevent("/dev/bus/usb/002/003", None, None).expect("descriptor");
        assert_eq!((d.vendor_id, d.class), (0, 0));
        assert!(descriptor_from_uevent("", None, None).is_none());
    }
}
