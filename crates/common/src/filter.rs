use serde::{Deserialize, Serialize};

use crate::types::{DeviceDescriptor, InterfaceClass};

pub const USB_CLASS_VIDEO: u8 = 0x0e;
pub const USB_CLASS_MISC: u8 = 0xef;

/// A single byte value or an inclusive range, e.g. `class = 14` or
/// `class = { min = 14, max = 15 }`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum ByteMatch {
    Exact(u8),
    Range { min: u8, max: u8 },
}

impl ByteMatch {
    pub fn contains(&self, value: u8) -> bool {
        match *self {
            ByteMatch::Exact(v) => v == value,
            ByteMatch::Range { min, max } => (min..=max).contains(&value),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FilterRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor_id: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_id: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<ByteMatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subclass: Option<ByteMatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<ByteMatch>,
    /// A matching exclude rule vetoes the device.
    #[serde(default)]
    pub exclude: bool,
}

impl FilterRule {
    pub fn class(class: u8) -> Self {
        Self {
            class: Some(ByteMatch::Exact(class)),
            ..Default::default()
        }
    }

    fn triple_matches(&self, class: u8, subclass: u8, protocol: u8) -> bool {
        self.class.map_or(true, |m| m.contains(class))
            && self.subclass.map_or(true, |m| m.contains(subclass))
            && self.protocol.map_or(true, |m| m.contains(protocol))
    }

    pub fn matches(&self, device: &DeviceDescriptor) -> bool {
        if self.vendor_id.is_some_and(|v| v != device.vendor_id) {
            return false;
        }
        if self.product_id.is_some_and(|p| p != device.product_id) {
            return false;
        }
        if self.triple_matches(device.class, device.subclass, device.protocol) {
            return true;
        }
        device
            .interfaces
            .iter()
            .any(|&InterfaceClass { class, subclass, protocol }| {
                self.triple_matches(class, subclass, protocol)
            })
    }
}

/// Immutable camera classifier built once from configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceFilter {
    #[serde(default = "default_rules")]
    pub rules: Vec<FilterRule>,
}

fn default_rules() -> Vec<FilterRule> {
    vec![
        FilterRule::class(USB_CLASS_VIDEO),
        // Interface Association Descriptor composite, used by most UVC cameras
        FilterRule {
            class: Some(ByteMatch::Exact(USB_CLASS_MISC)),
            subclass: Some(ByteMatch::Exact(0x02)),
            protocol: Some(ByteMatch::Exact(0x01)),
            ..Default::default()
        },
    ]
}

impl Default for DeviceFilter {
    fn default() -> Self {
        Self::uvc()
    }
}

impl DeviceFilter {
    pub fn new(rules: Vec<FilterRule>) -> Self {
        Self { rules }
    }

    pub fn uvc() -> Self {
        Self {
            rules: default_rules(),
        }
    }

    pub fn matches(&self, device: &DeviceDescriptor) -> bool {
        let (exclude, include): (Vec<&FilterRule>, Vec<&FilterRule>) =
            self.rules.iter().partition(|r| r.exclude);
        if exclude.iter().any(|r| r.matches(device)) {
            return false;
        }
        include.iter().any(|r| r.matches(device))
    }
}
