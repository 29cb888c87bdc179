//! Common utilities for dfu-server
//!
//! This crate provides functionality shared by the server and its tests:
//! the error taxonomy, logging setup, the bounded per-subscriber event
//! channel used for hot-plug fan-out, and the hot-plug source abstraction.

pub mod channel;
pub mod error;
pub mod hotplug;
pub mod logging;
pub mod test_utils;

pub use channel::{Delivery, DeliveryPolicy, EventReceiver, EventSender, event_channel};
pub use error::{Error, Result};
pub use hotplug::HotplugSource;
pub use logging::setup_logging;
