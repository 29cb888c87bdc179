//! Hot-plug event payloads

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Action reported by the OS for a USB device
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HotplugAction {
    Add,
    Remove,
    Change,
    /// A driver was attached to the device
    Bind,
    /// A driver was detached from the device
    Unbind,
    Other(String),
}

impl HotplugAction {
    /// Driver attach/detach events, as opposed to physical plug/unplug
    pub fn is_driver_event(&self) -> bool {
        matches!(self, HotplugAction::Bind | HotplugAction::Unbind)
    }
}

impl From<&str> for HotplugAction {
    fn from(action: &str) -> Self {
        match action {
            "add" => HotplugAction::Add,
            "remove" => HotplugAction::Remove,
            "change" => HotplugAction::Change,
            "bind" => HotplugAction::Bind,
            "unbind" => HotplugAction::Unbind,
            other => HotplugAction::Other(other.to_string()),
        }
    }
}

impl fmt::Display for HotplugAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HotplugAction::Add => write!(f, "add"),
            HotplugAction::Remove => write!(f, "remove"),
            HotplugAction::Change => write!(f, "change"),
            HotplugAction::Bind => write!(f, "bind"),
            HotplugAction::Unbind => write!(f, "unbind"),
            HotplugAction::Other(action) => write!(f, "{}", action),
        }
    }
}

impl Serialize for HotplugAction {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for HotplugAction {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let action = String::deserialize(deserializer)?;
        Ok(HotplugAction::from(action.as_str()))
    }
}

/// Attributes of the USB device an event refers to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsbDeviceInfo {
    pub vendor_id: u16,
    pub product_id: u16,
    pub bus_number: u8,
    pub device_address: u8,
}

/// One hot-plug notification as delivered to subscribers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HotplugEvent {
    pub action: HotplugAction,
    pub device: UsbDeviceInfo,
}

impl HotplugEvent {
    pub fn new(action: impl Into<HotplugAction>, device: UsbDeviceInfo) -> Self {
        Self {
            action: action.into(),
            device,
        }
    }
}
