use std::fmt;

use serde::{Deserialize, Serialize};
use zvariant::Type;

/// Class triple reported by one interface of a USB device.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Type)]
pub struct InterfaceClass {
    pub class: u8,
    pub subclass: u8,
    pub protocol: u8,
}

/// Identity of a physical USB device, copied out of the OS device list.
///
/// Descriptors are plain values: they stay valid as data after the device
/// detaches, but nothing in them refers back to the live device.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Type)]
pub struct DeviceDescriptor {
    /// Stable OS path of the device node, e.g. `/dev/bus/usb/001/004`.
    pub name: String,
    pub vendor_id: u16,
    pub product_id: u16,
    pub class: u8,
    pub subclass: u8,
    pub protocol: u8,
    /// Product string, empty when the device does not report one.
    pub product_name: String,
    pub interfaces: Vec<InterfaceClass>,
}

impl DeviceDescriptor {
    /// Detach notifications carry fewer attributes than enumeration, so
    /// identity is the device path alone.
    pub fn same_device(&self, other: &DeviceDescriptor) -> bool {
        self.name == other.name
    }

    pub fn label(&self) -> &str {
        if self.product_name.is_empty() {
            &self.name
        } else {
            &self.product_name
        }
    }
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (VID: 0x{:04X} PID: 0x{:04X})",
            self.label(),
            self.vendor_id,
            self.product_id
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Type)]
pub struct PreviewSize {
    pub width: u32,
    pub height: u32,
}

impl PreviewSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for PreviewSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// The driver's supported-size report.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SupportedSizes {
    /// Raw descriptor text as the driver renders it.
    pub descriptor: String,
    pub sizes: Vec<PreviewSize>,
}

impl SupportedSizes {
    pub fn is_empty(&self) -> bool {
        self.descriptor.trim().is_empty() && self.sizes.is_empty()
    }
}

/// Opaque rendering destination chosen by the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PreviewTarget {
    id: String,
}

impl PreviewTarget {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for PreviewTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

/// Exclusive resource for one open connection to a device.
///
/// Only a driver creates handles and only `DeviceDriver::close` consumes
/// them, so at most one owner holds a given handle.
#[derive(Debug, PartialEq, Eq)]
pub struct ControlHandle {
    id: u64,
    device: DeviceDescriptor,
}

impl ControlHandle {
    pub fn new(id: u64, device: DeviceDescriptor) -> Self {
        Self { id, device }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn device(&self) -> &DeviceDescriptor {
        &self.device
    }
}

/// Row-major 3x3 affine matrix applied to the presentation surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub matrix: [f64; 9],
}

impl Transform {
    pub const IDENTITY: Transform = Transform {
        matrix: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
    };

    /// Horizontal flip about the centre of a `width` x `height` surface.
    pub fn horizontal_mirror(width: u32, _height: u32) -> Self {
        // scale(-1, 1) about (w/2, h/2): x' = -x + w, y' = y
        let w = f64::from(width);
        Transform {
            matrix: [-1.0, 0.0, w, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
        }
    }

    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        let m = &self.matrix;
        (m[0] * x + m[1] * y + m[2], m[3] * x + m[4] * y + m[5])
    }

    pub fn to_vec(&self) -> Vec<f64> {
        self.matrix.to_vec()
    }
}

/// Attach/detach notification as delivered by a hotplug source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HotplugEvent {
    Attached(DeviceDescriptor),
    Detached(DeviceDescriptor),
}
