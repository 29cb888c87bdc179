//! Hot-plug event source abstraction

use protocol::HotplugEvent;
use std::time::Duration;

/// A blocking source of OS hot-plug events, filtered to the USB subsystem
///
/// `poll` waits at most `timeout` and returns `Ok(None)` when nothing
/// arrived, so the caller can check for shutdown between polls. Dropping the
/// source releases the underlying monitoring handle.
pub trait HotplugSource: Send + 'static {
    fn poll(&mut self, timeout: Duration) -> crate::Result<Option<HotplugEvent>>;
}

impl HotplugSource for Box<dyn HotplugSource> {
    fn poll(&mut self, timeout: Duration) -> crate::Result<Option<HotplugEvent>> {
        (**self).poll(timeout)
    }
}
