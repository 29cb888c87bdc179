//! Bounded per-subscriber event channel
//!
//! The producer side is driven from a blocking thread (the hot-plug ingestion
//! loop), the consumer side from async tasks. Delivery never blocks the
//! producer indefinitely: a full channel either drops the event right away or
//! after a bounded wait, depending on the [`DeliveryPolicy`].

use async_channel::{Receiver, Sender, TryRecvError, TrySendError, bounded};
use std::time::{Duration, Instant};

/// Interval between retries while waiting for room in a full channel
const BACKPRESSURE_RETRY: Duration = Duration::from_millis(5);

/// What to do when a subscriber's channel is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryPolicy {
    /// Drop the event immediately
    #[default]
    BestEffort,
    /// Wait up to `timeout` for the subscriber to make room, then drop
    Backpressure { timeout: Duration },
}

/// Outcome of a single delivery attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// Channel was full; the event is lost for this subscriber
    Dropped,
    /// Receiver is gone
    Closed,
}

/// Producer half, owned by the broadcaster
pub struct EventSender<T> {
    tx: Sender<T>,
}

impl<T> Clone for EventSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

/// Consumer half, owned by one observer
pub struct EventReceiver<T> {
    rx: Receiver<T>,
}

/// Create a bounded event channel (capacity is at least 1)
pub fn event_channel<T>(capacity: usize) -> (EventSender<T>, EventReceiver<T>) {
    let (tx, rx) = bounded(capacity.max(1));
    (EventSender { tx }, EventReceiver { rx })
}

impl<T> EventSender<T> {
    /// Deliver one event according to `policy`
    ///
    /// With [`DeliveryPolicy::Backpressure`] this may sleep the calling
    /// thread; call it from a blocking context only.
    pub fn deliver(&self, event: T, policy: DeliveryPolicy) -> Delivery {
        match policy {
            DeliveryPolicy::BestEffort => match self.tx.try_send(event) {
                Ok(()) => Delivery::Delivered,
                Err(TrySendError::Full(_)) => Delivery::Dropped,
                Err(TrySendError::Closed(_)) => Delivery::Closed,
            },
            DeliveryPolicy::Backpressure { timeout } => {
                let deadline = Instant::now() + timeout;
                let mut event = event;
                loop {
                    match self.tx.try_send(event) {
                        Ok(()) => return Delivery::Delivered,
                        Err(TrySendError::Closed(_)) => return Delivery::Closed,
                        Err(TrySendError::Full(back)) => {
                            let now = Instant::now();
                            if now >= deadline {
                                return Delivery::Dropped;
                            }
                            event = back;
                            std::thread::sleep(BACKPRESSURE_RETRY.min(deadline - now));
                        }
                    }
                }
            }
        }
    }
}

impl<T> EventReceiver<T> {
    /// Wait for the next event
    pub async fn recv(&self) -> crate::Result<T> {
        self.rx
            .recv()
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Take the next event if one is queued
    pub fn try_recv(&self) -> Option<T> {
        match self.rx.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => None,
        }
    }
}
