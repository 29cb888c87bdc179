//! Hot-plug broadcaster
//!
//! Fans hot-plug events out to every registered subscription. Ingestion runs
//! on a dedicated thread that polls a [`HotplugSource`] with a bounded
//! timeout and checks for shutdown between polls, so [`Broadcaster::stop`]
//! takes effect within one poll interval.
//!
//! The subscriber set and the ingestion worker share one mutex. Delivery is
//! governed by [`DeliveryPolicy`]: by default a subscriber whose channel is
//! full simply misses the event, so one stalled observer cannot hold up the
//! others or the ingestion loop. Under backpressure a publish that is under
//! way when `stop` is called finishes its current wait and drops the event
//! for the remaining full subscribers, bounding `stop` by one poll timeout
//! plus one backpressure timeout.

use common::{Delivery, DeliveryPolicy, Error, EventReceiver, EventSender, HotplugSource, Result};
use futures::Stream;
use protocol::HotplugEvent;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Broadcaster settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcasterConfig {
    /// Only forward events for this vendor; `None` forwards all vendors
    pub vendor_id: Option<u16>,
    /// Upper bound on a single blocking poll of the source
    pub poll_timeout: Duration,
    /// Per-subscriber queue length
    pub channel_capacity: usize,
    pub delivery: DeliveryPolicy,
}

impl Default for BroadcasterConfig {
    fn default() -> Self {
        Self {
            vendor_id: Some(0x0483),
            poll_timeout: Duration::from_millis(100),
            channel_capacity: 32,
            delivery: DeliveryPolicy::BestEffort,
        }
    }
}

/// Identifies one registered subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Process-wide hot-plug fan-out; clones share the same state
#[derive(Clone)]
pub struct Broadcaster {
    shared: Arc<Shared>,
}

struct Shared {
    config: BroadcasterConfig,
    state: Mutex<State>,
    dropped: AtomicU64,
    /// Set while `stop` waits for the ingestion thread
    stopping: AtomicBool,
}

struct State {
    subscribers: HashMap<SubscriptionId, EventSender<HotplugEvent>>,
    next_id: u64,
    worker: Option<Worker>,
}

struct Worker {
    shutdown: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl Broadcaster {
    pub fn new(config: BroadcasterConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                state: Mutex::new(State {
                    subscribers: HashMap::new(),
                    next_id: 1,
                    worker: None,
                }),
                dropped: AtomicU64::new(0),
                stopping: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &BroadcasterConfig {
        &self.shared.config
    }

    /// Start ingesting from `source`
    ///
    /// Fails if ingestion is already running; `source` is dropped in that
    /// case, releasing its monitoring handle.
    pub fn start<S: HotplugSource>(&self, source: S) -> Result<()> {
        let mut state = self.shared.lock();
        if state.worker.is_some() {
            warn!("Hot-plug broadcaster already running, ignoring start");
            return Err(Error::Hotplug("broadcaster already running".to_string()));
        }

        let shutdown = Arc::new(AtomicBool::new(false));
        let weak = Arc::downgrade(&self.shared);
        let flag = shutdown.clone();
        let poll_timeout = self.shared.config.poll_timeout;

        let handle = std::thread::Builder::new()
            .name("hotplug-monitor".to_string())
            .spawn(move || ingest(weak, source, flag, poll_timeout))?;

        state.worker = Some(Worker { shutdown, handle });
        info!(
            "Hot-plug broadcaster started (vendor filter: {})",
            self.shared
                .config
                .vendor_id
                .map_or_else(|| "none".to_string(), |v| format!("{:04x}", v))
        );
        Ok(())
    }

    /// Stop ingestion and close all subscriptions
    ///
    /// Returns once the ingestion thread has exited and released its source,
    /// which takes at most one poll timeout, plus one backpressure timeout if
    /// a publish is waiting on a full subscriber. Open subscriptions see
    /// their streams end. On a broadcaster that is not running this only
    /// closes the open subscriptions.
    pub async fn stop(&self) -> Result<()> {
        let (worker, closed) = {
            let mut state = self.shared.lock();
            let closed = state.subscribers.len();
            state.subscribers.clear();
            (state.worker.take(), closed)
        };

        let Some(worker) = worker else {
            if closed > 0 {
                debug!("Closed {} subscription(s) of idle broadcaster", closed);
            }
            return Ok(());
        };

        self.shared.stopping.store(true, Ordering::Release);
        worker.shutdown.store(true, Ordering::Release);
        let joined = tokio::task::spawn_blocking(move || worker.handle.join()).await;
        self.shared.stopping.store(false, Ordering::Release);

        let joined =
            joined.map_err(|e| Error::Hotplug(format!("failed to join monitor thread: {}", e)))?;
        if joined.is_err() {
            error!("Hot-plug monitor thread panicked");
            return Err(Error::Hotplug("monitor thread panicked".to_string()));
        }

        info!(
            "Hot-plug broadcaster stopped ({} subscription(s) closed)",
            closed
        );
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.shared.lock().worker.is_some()
    }

    /// Register a new subscription
    ///
    /// The subscription is removed again when the returned guard is dropped.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = common::event_channel(self.shared.config.channel_capacity);

        let id = {
            let mut state = self.shared.lock();
            let id = SubscriptionId(state.next_id);
            state.next_id += 1;
            state.subscribers.insert(id, tx);
            id
        };

        debug!("Subscription {} registered", id);
        Subscription {
            id,
            receiver: rx,
            broadcaster: Arc::downgrade(&self.shared),
        }
    }

    /// Remove a subscription; returns false if it was already gone
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.shared.remove(id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.lock().subscribers.len()
    }

    /// Events dropped because a subscriber's queue was full
    pub fn dropped_events(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    /// Filter `event` and deliver it to all current subscribers
    ///
    /// Returns the number of subscribers that received it.
    pub fn publish(&self, event: &HotplugEvent) -> usize {
        self.shared.publish(event)
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        // The state stays consistent across a panic in a holder
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn remove(&self, id: SubscriptionId) -> bool {
        let removed = self.lock().subscribers.remove(&id).is_some();
        if removed {
            debug!("Subscription {} removed", id);
        }
        removed
    }

    fn accepts(&self, event: &HotplugEvent) -> bool {
        if event.action.is_driver_event() {
            debug!("Ignoring driver event: {}", event.action);
            return false;
        }
        match self.config.vendor_id {
            Some(vendor_id) if event.device.vendor_id != vendor_id => {
                debug!(
                    "Ignoring {} event for vendor {:04x}",
                    event.action, event.device.vendor_id
                );
                false
            }
            _ => true,
        }
    }

    fn publish(&self, event: &HotplugEvent) -> usize {
        if !self.accepts(event) {
            return 0;
        }

        match self.config.delivery {
            DeliveryPolicy::BestEffort => {
                // try_send never blocks, so deliver under the lock
                let mut state = self.lock();
                let mut closed = Vec::new();
                let mut delivered = 0;
                for (id, tx) in &state.subscribers {
                    match tx.deliver(event.clone(), DeliveryPolicy::BestEffort) {
                        Delivery::Delivered => delivered += 1,
                        Delivery::Dropped => self.record_drop(*id),
                        Delivery::Closed => closed.push(*id),
                    }
                }
                for id in closed {
                    state.subscribers.remove(&id);
                }
                delivered
            }
            policy @ DeliveryPolicy::Backpressure { .. } => {
                // Waiting on a slow subscriber must not block subscribe/unsubscribe
                let targets: Vec<(SubscriptionId, EventSender<HotplugEvent>)> = self
                    .lock()
                    .subscribers
                    .iter()
                    .map(|(id, tx)| (*id, tx.clone()))
                    .collect();

                let mut closed = Vec::new();
                let mut delivered = 0;
                for (id, tx) in targets {
                    let policy = if self.stopping.load(Ordering::Acquire) {
                        DeliveryPolicy::BestEffort
                    } else {
                        policy
                    };
                    match tx.deliver(event.clone(), policy) {
                        Delivery::Delivered => delivered += 1,
                        Delivery::Dropped => self.record_drop(id),
                        Delivery::Closed => closed.push(id),
                    }
                }
                if !closed.is_empty() {
                    let mut state = self.lock();
                    for id in closed {
                        state.subscribers.remove(&id);
                    }
                }
                delivered
            }
        }
    }

    fn record_drop(&self, id: SubscriptionId) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        warn!("Subscription {} is full, dropping hot-plug event", id);
    }
}

/// Ingestion loop, run on the monitor thread
fn ingest<S: HotplugSource>(
    shared: Weak<Shared>,
    mut source: S,
    shutdown: Arc<AtomicBool>,
    poll_timeout: Duration,
) {
    info!("Hot-plug monitor thread started");

    while !shutdown.load(Ordering::Acquire) {
        match source.poll(poll_timeout) {
            Ok(Some(event)) => {
                let Some(shared) = shared.upgrade() else {
                    break;
                };
                let delivered = shared.publish(&event);
                debug!(
                    "Hot-plug {} for {:04x}:{:04x} delivered to {} subscriber(s)",
                    event.action, event.device.vendor_id, event.device.product_id, delivered
                );
            }
            Ok(None) => {
                // Broadcaster dropped without stop()
                if shared.strong_count() == 0 {
                    break;
                }
            }
            Err(e) => {
                warn!("Error polling hot-plug source: {}", e);
                std::thread::sleep(poll_timeout);
            }
        }
    }

    drop(source);
    info!("Hot-plug monitor thread stopped");
}

/// A registered delivery channel, owned by one observer
///
/// Dropping the subscription unregisters it, on every exit path of the
/// owner.
pub struct Subscription {
    id: SubscriptionId,
    receiver: EventReceiver<HotplugEvent>,
    broadcaster: Weak<Shared>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Wait for the next event; `None` once the broadcaster closed the channel
    pub async fn recv(&self) -> Option<HotplugEvent> {
        self.receiver.recv().await.ok()
    }

    pub fn try_recv(&self) -> Option<HotplugEvent> {
        self.receiver.try_recv()
    }

    /// Stream of events that keeps the subscription alive while it exists
    pub fn into_stream(self) -> impl Stream<Item = HotplugEvent> + Send + 'static {
        futures::stream::unfold(self, |subscription| async move {
            let event = subscription.recv().await?;
            Some((event, subscription))
        })
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(shared) = self.broadcaster.upgrade() {
            shared.remove(self.id);
        }
        debug!("Subscription {} released", self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::test_utils::{ST_VENDOR_ID, mock_event, scripted_source};

    #[test]
    fn test_subscribe_unsubscribe() {
        let broadcaster = Broadcaster::new(BroadcasterConfig::default());
        let first = broadcaster.subscribe();
        let second = broadcaster.subscribe();
        assert_ne!(first.id(), second.id());
        assert_eq!(broadcaster.subscriber_count(), 2);

        assert!(broadcaster.unsubscribe(first.id()));
        assert!(!broadcaster.unsubscribe(first.id()));
        assert_eq!(broadcaster.subscriber_count(), 1);

        // Dropping after an explicit unsubscribe is harmless
        drop(first);
        drop(second);
        assert_eq!(broadcaster.subscriber_count(), 0);
    }

    #[test]
    fn test_filtering() {
        let broadcaster = Broadcaster::new(BroadcasterConfig::default());
        let subscription = broadcaster.subscribe();

        assert_eq!(broadcaster.publish(&mock_event("bind", ST_VENDOR_ID)), 0);
        assert_eq!(broadcaster.publish(&mock_event("unbind", ST_VENDOR_ID)), 0);
        assert_eq!(broadcaster.publish(&mock_event("add", 0x1d6b)), 0);
        assert!(subscription.try_recv().is_none());

        assert_eq!(broadcaster.publish(&mock_event("remove", ST_VENDOR_ID)), 1);
        assert!(subscription.try_recv().is_some());
    }

    #[test]
    fn test_no_vendor_filter() {
        let broadcaster = Broadcaster::new(BroadcasterConfig {
            vendor_id: None,
            ..BroadcasterConfig::default()
        });
        let _subscription = broadcaster.subscribe();
        assert_eq!(broadcaster.publish(&mock_event("add", 0x1d6b)), 1);
        assert_eq!(broadcaster.publish(&mock_event("bind", 0x1d6b)), 0);
    }

    #[test]
    fn test_full_subscriber_does_not_block_others() {
        let broadcaster = Broadcaster::new(BroadcasterConfig {
            channel_capacity: 1,
            ..BroadcasterConfig::default()
        });
        let stalled = broadcaster.subscribe();
        let active = broadcaster.subscribe();

        assert_eq!(broadcaster.publish(&mock_event("add", ST_VENDOR_ID)), 2);
        assert!(active.try_recv().is_some());

        // `stalled` never reads; its queue is full from here on
        assert_eq!(broadcaster.publish(&mock_event("remove", ST_VENDOR_ID)), 1);
        assert_eq!(broadcaster.dropped_events(), 1);
        assert_eq!(active.try_recv().unwrap().action.to_string(), "remove");
        assert_eq!(stalled.try_recv().unwrap().action.to_string(), "add");
        assert!(stalled.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_double_start_releases_second_source() {
        let broadcaster = Broadcaster::new(BroadcasterConfig {
            poll_timeout: Duration::from_millis(10),
            ..BroadcasterConfig::default()
        });
        let (first_injector, first) = scripted_source();
        let (second_injector, second) = scripted_source();

        broadcaster.start(first).unwrap();
        assert!(matches!(broadcaster.start(second), Err(Error::Hotplug(_))));
        assert!(second_injector.is_released());
        assert!(!first_injector.is_released());

        broadcaster.stop().await.unwrap();
        assert!(first_injector.is_released());
        assert!(!broadcaster.is_running());

        // Stopping twice is a no-op
        broadcaster.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_idle_broadcaster_closes_subscriptions() {
        let broadcaster = Broadcaster::new(BroadcasterConfig::default());
        let subscription = broadcaster.subscribe();

        broadcaster.stop().await.unwrap();
        assert!(!broadcaster.is_running());
        assert_eq!(broadcaster.subscriber_count(), 0);
        assert!(subscription.recv().await.is_none());
    }
}
