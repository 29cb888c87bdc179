//! USB hot-plug subsystem
//!
//! [`monitor`] turns libusb hot-plug callbacks into [`HotplugEvent`]s;
//! [`broadcaster`] runs the ingestion thread and fans events out to
//! subscriptions.
//!
//! [`HotplugEvent`]: protocol::HotplugEvent

pub mod broadcaster;
pub mod monitor;

pub use broadcaster::{Broadcaster, BroadcasterConfig, Subscription, SubscriptionId};
pub use common::HotplugSource;
pub use monitor::UsbMonitor;
