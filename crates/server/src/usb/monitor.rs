//! libusb-backed hot-plug source
//!
//! Registers a libusb hot-plug callback and drives it from
//! [`HotplugSource::poll`] via `handle_events` with a timeout, so the
//! ingestion thread regains control at least once per poll interval.

use common::{Error, HotplugSource, Result};
use protocol::{HotplugEvent, UsbDeviceInfo};
use rusb::{Context, Device, Hotplug, HotplugBuilder, Registration, UsbContext};
use std::sync::mpsc;
use std::time::Duration;
use tracing::{debug, warn};

/// Hot-plug monitor over all USB devices
///
/// Dropping the monitor deregisters the callback and releases the context.
pub struct UsbMonitor {
    // Declared before `context` so the callback is deregistered first
    _registration: Registration<Context>,
    context: Context,
    events: mpsc::Receiver<HotplugEvent>,
}

impl UsbMonitor {
    pub fn open() -> Result<Self> {
        // has_hotplug() requires an initialized libusb; create the context first
        let context = Context::new().map_err(|e| Error::Hotplug(e.to_string()))?;
        if !rusb::has_hotplug() {
            return Err(Error::Hotplug(
                "libusb was built without hot-plug support".to_string(),
            ));
        }
        let (tx, events) = mpsc::channel();

        let registration = HotplugBuilder::new()
            .enumerate(false)
            .register(&context, Box::new(HotplugCallback { tx }))
            .map_err(|e| Error::Hotplug(e.to_string()))?;

        debug!("Hot-plug callbacks registered");
        Ok(Self {
            _registration: registration,
            context,
            events,
        })
    }
}

impl HotplugSource for UsbMonitor {
    fn poll(&mut self, timeout: Duration) -> Result<Option<HotplugEvent>> {
        if let Ok(event) = self.events.try_recv() {
            return Ok(Some(event));
        }

        match self.context.handle_events(Some(timeout)) {
            Ok(()) => {}
            Err(rusb::Error::Interrupted) => {
                debug!("USB event handling interrupted");
            }
            Err(e) => return Err(Error::Hotplug(e.to_string())),
        }

        Ok(self.events.try_recv().ok())
    }
}

/// Forwards libusb callbacks into the monitor's queue
struct HotplugCallback {
    tx: mpsc::Sender<HotplugEvent>,
}

impl HotplugCallback {
    fn forward<T: UsbContext>(&self, action: &str, device: &Device<T>) {
        let descriptor = match device.device_descriptor() {
            Ok(d) => d,
            Err(e) => {
                warn!(
                    "No descriptor for hot-plugged device (bus={}, addr={}): {}",
                    device.bus_number(),
                    device.address(),
                    e
                );
                return;
            }
        };

        let info = UsbDeviceInfo {
            vendor_id: descriptor.vendor_id(),
            product_id: descriptor.product_id(),
            bus_number: device.bus_number(),
            device_address: device.address(),
        };
        debug!(
            "Hot-plug {}: {:04x}:{:04x} (bus={}, addr={})",
            action, info.vendor_id, info.product_id, info.bus_number, info.device_address
        );

        // Receiver only goes away together with the monitor
        let _ = self.tx.send(HotplugEvent::new(action, info));
    }
}

impl<T: UsbContext> Hotplug<T> for HotplugCallback {
    fn device_arrived(&mut self, device: Device<T>) {
        self.forward("add", &device);
    }

    fn device_left(&mut self, device: Device<T>) {
        self.forward("remove", &device);
    }
}
