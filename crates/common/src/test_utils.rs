//! Test utilities for dfu-server
//!
//! Provides sample tool output, mock hot-plug events and a scripted hot-plug
//! source for testing across crates.
//!
//! # Example
//!
//! ```
//! use common::HotplugSource;
//! use common::test_utils::{mock_event, scripted_source};
//! use std::time::Duration;
//!
//! let (injector, mut source) = scripted_source();
//! injector.emit(mock_event("add", 0x0483));
//! let event = source.poll(Duration::from_millis(10)).unwrap();
//! assert_eq!(event.unwrap().device.vendor_id, 0x0483);
//! ```

use crate::hotplug::HotplugSource;
use protocol::{HotplugEvent, UsbDeviceInfo};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Vendor ID of STMicroelectronics, the default hot-plug filter
pub const ST_VENDOR_ID: u16 = 0x0483;

/// `dfu-util --list` output: seven preamble lines followed by five data lines
///
/// Four alternate settings belong to serial `319235713237`, one to
/// `3262355B3231` (which declares a non-contiguous layout and no bus path).
pub const SAMPLE_LIST_OUTPUT: &str = r#"dfu-util 0.9

Copyright 2005-2009 Weston Schmidt, Harald Welte and OpenMoko Inc.
Copyright 2010-2016 Tormod Volden and Stefan Schmidt
This program is Free Software and has ABSOLUTELY NO WARRANTY
Please report bugs to http://sourceforge.net/p/dfu-util/tickets/

Found DFU: [0483:df11] ver=2200, devnum=7, cfg=1, intf=0, path="1-2", alt=3, name="@Device Feature/0xFFFF0000/01*004 e", serial="319235713237"
Found DFU: [0483:df11] ver=2200, devnum=7, cfg=1, intf=0, path="1-2", alt=2, name="@OTP Memory /0x1FFF7800/01*512 e,01*016 e", serial="319235713237"
Found DFU: [0483:df11] ver=2200, devnum=7, cfg=1, intf=0, path="1-2", alt=1, name="@Option Bytes  /0x1FFFC000/01*016 e", serial="319235713237"
Found DFU: [0483:df11] ver=2200, devnum=7, cfg=1, intf=0, path="1-2", alt=0, name="@Internal Flash  /0x08000000/04*016Kg,01*064Kg,03*128Kg", serial="319235713237"
Test Layout: [0123:abcd] ver=1800, devnum=32, cfg=2, intf=1, alt=3, name="@Not contiguous layout/0xF000/1*4Ka/0xE000/1*4Kg/0x8000/2*24Kg", serial="3262355B3231"
"#;

/// Number of preamble lines in [`SAMPLE_LIST_OUTPUT`]
pub const SAMPLE_PREAMBLE_LINES: usize = 7;

/// The data lines of [`SAMPLE_LIST_OUTPUT`], preamble removed
pub fn sample_data_lines() -> Vec<String> {
    SAMPLE_LIST_OUTPUT
        .lines()
        .skip(SAMPLE_PREAMBLE_LINES)
        .map(str::to_string)
        .collect()
}

/// Create mock device attributes for a hot-plug event
pub fn mock_usb_device(vendor_id: u16, product_id: u16) -> UsbDeviceInfo {
    UsbDeviceInfo {
        vendor_id,
        product_id,
        bus_number: 1,
        device_address: 7,
    }
}

/// Create a hot-plug event for a DFU-mode device of the given vendor
pub fn mock_event(action: &str, vendor_id: u16) -> HotplugEvent {
    HotplugEvent::new(action, mock_usb_device(vendor_id, 0xdf11))
}

/// Feeds events into a [`ScriptedSource`]
#[derive(Clone)]
pub struct HotplugInjector {
    tx: mpsc::Sender<HotplugEvent>,
    released: Arc<AtomicBool>,
    polls: Arc<AtomicUsize>,
}

impl HotplugInjector {
    /// Queue an event for the next poll
    ///
    /// Events emitted after the source was dropped are discarded.
    pub fn emit(&self, event: HotplugEvent) {
        let _ = self.tx.send(event);
    }

    /// Whether the source has been dropped (monitoring handle released)
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Number of `poll` calls made so far
    pub fn poll_count(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }
}

/// In-memory hot-plug source driven by a [`HotplugInjector`]
pub struct ScriptedSource {
    rx: mpsc::Receiver<HotplugEvent>,
    released: Arc<AtomicBool>,
    polls: Arc<AtomicUsize>,
}

/// Create a connected injector/source pair
pub fn scripted_source() -> (HotplugInjector, ScriptedSource) {
    let (tx, rx) = mpsc::channel();
    let released = Arc::new(AtomicBool::new(false));
    let polls = Arc::new(AtomicUsize::new(0));

    (
        HotplugInjector {
            tx,
            released: released.clone(),
            polls: polls.clone(),
        },
        ScriptedSource {
            rx,
            released,
            polls,
        },
    )
}

impl HotplugSource for ScriptedSource {
    fn poll(&mut self, timeout: Duration) -> crate::Result<Option<HotplugEvent>> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        match self.rx.recv_timeout(timeout) {
            Ok(event) => Ok(Some(event)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                // All injectors gone; behave like an idle monitor
                std::thread::sleep(timeout);
                Ok(None)
            }
        }
    }
}

impl Drop for ScriptedSource {
    fn drop(&mut self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

/// Run a future with a timeout
///
/// # Example
/// ```
/// use common::test_utils::{with_timeout, DEFAULT_TEST_TIMEOUT};
///
/// # #[tokio::main]
/// # async fn main() {
/// let result = with_timeout(DEFAULT_TEST_TIMEOUT, async { 42 }).await;
/// assert_eq!(result.unwrap(), 42);
/// # }
/// ```
pub async fn with_timeout<T, F>(duration: Duration, future: F) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| TimeoutError { duration })
}

/// Error returned when a test times out
#[derive(Debug)]
pub struct TimeoutError {
    /// The timeout duration that was exceeded
    pub duration: Duration,
}

impl std::fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Test timed out after {:?}", self.duration)
    }
}

impl std::error::Error for TimeoutError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_output_shape() {
        assert_eq!(SAMPLE_LIST_OUTPUT.lines().count(), 12);
        let lines = sample_data_lines();
        assert_eq!(lines.len(), 5);
        assert!(lines.iter().all(|l| l.contains("serial=")));
    }

    #[test]
    fn test_scripted_source_times_out_when_idle() {
        let (injector, mut source) = scripted_source();
        let event = source.poll(Duration::from_millis(5)).unwrap();
        assert!(event.is_none());
        assert_eq!(injector.poll_count(), 1);
    }

    #[test]
    fn test_scripted_source_release_flag() {
        let (injector, source) = scripted_source();
        assert!(!injector.is_released());
        drop(source);
        assert!(injector.is_released());
        // Emitting after release is harmless
        injector.emit(mock_event("add", ST_VENDOR_ID));
    }
}
