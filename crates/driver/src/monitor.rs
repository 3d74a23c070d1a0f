//! Connect/disconnect monitor
//!
//! Turns the level of the VBUS sense input into mount/unmount transitions.
//! Each transition is delivered exactly once, in order, to every registered
//! [`ConnectionObserver`] and event subscriber, and releases one
//! [`ConnectionMonitor::wait_stage_change`] waiter. `ConnectionState` is
//! updated before anyone is notified.

use async_channel::{Receiver, Sender, TrySendError, bounded};
use common::Signal;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Transitions buffered per subscriber; newer ones are dropped for a
/// subscriber that falls this far behind
pub const SUBSCRIBER_CAPACITY: usize = 64;

/// Whether the host currently has the device mounted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionState {
    pub mounted: bool,
}

/// Transition counters since the current install
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    pub mounts: u64,
    pub unmounts: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    Mounted,
    Unmounted,
}

/// Receives mount/unmount callbacks
///
/// Called on the event task. Implementations may query the monitor but must
/// not block for long: the stack is not serviced while a callback runs.
/// Install, uninstall and stack access on the owning driver are refused
/// from here with [`crate::LifecycleError::OnEventTask`].
pub trait ConnectionObserver: Send + Sync {
    fn on_mount(&self);
    fn on_unmount(&self);
}

#[derive(Default)]
struct Inner {
    state: ConnectionState,
    stats: ConnectionStats,
    /// Last VBUS level seen, `None` until the first sample after install
    vbus: Option<bool>,
    observers: Vec<Arc<dyn ConnectionObserver>>,
    subscribers: Vec<Sender<ConnectionEvent>>,
}

struct Shared {
    inner: Mutex<Inner>,
    // Held for a whole transition so deliveries never interleave
    dispatch: Mutex<()>,
    stage: Signal,
}

/// Connection state of one driver, shared with its stack
#[derive(Clone)]
pub struct ConnectionMonitor {
    shared: Arc<Shared>,
}

impl Default for ConnectionMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionMonitor {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner::default()),
                dispatch: Mutex::new(()),
                stage: Signal::new(),
            }),
        }
    }

    fn inner(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.shared
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_observer(&self, observer: Arc<dyn ConnectionObserver>) {
        self.inner().observers.push(observer);
    }

    /// Unregister an observer added with [`ConnectionMonitor::add_observer`]
    ///
    /// Returns false if it was not registered. A transition already being
    /// delivered may still reach it.
    pub fn remove_observer<O: ConnectionObserver + ?Sized>(&self, observer: &Arc<O>) -> bool {
        let mut inner = self.inner();
        let before = inner.observers.len();
        let target = Arc::as_ptr(observer);
        inner
            .observers
            .retain(|registered| !std::ptr::addr_eq(Arc::as_ptr(registered), target));
        inner.observers.len() != before
    }

    pub fn observer_count(&self) -> usize {
        self.inner().observers.len()
    }

    /// Stream of transitions from now on
    ///
    /// Buffers up to [`SUBSCRIBER_CAPACITY`] transitions. Dropping the
    /// returned stream unsubscribes.
    pub fn subscribe(&self) -> ConnectionEvents {
        let (tx, rx) = bounded(SUBSCRIBER_CAPACITY);
        self.inner().subscribers.push(tx);
        ConnectionEvents { rx }
    }

    pub fn state(&self) -> ConnectionState {
        self.inner().state
    }

    pub fn is_mounted(&self) -> bool {
        self.state().mounted
    }

    pub fn stats(&self) -> ConnectionStats {
        self.inner().stats
    }

    /// Wait up to `timeout` for a mount or unmount
    ///
    /// Transitions that happened since the last successful wait count, but
    /// several of them collapse into a single wake-up.
    pub fn wait_stage_change(&self, timeout: Duration) -> bool {
        self.shared.stage.take(timeout)
    }

    /// Feed the current level of the VBUS sense input
    ///
    /// Level-triggered: only a change from the previous sample is a
    /// transition. Present means attached (mount), absent means detached
    /// (unmount).
    pub fn vbus_level(&self, present: bool) {
        let _dispatch = self.lock_dispatch();
        {
            let mut inner = self.inner();
            if inner.vbus == Some(present) {
                return;
            }
            inner.vbus = Some(present);
        }
        trace!("VBUS sense {}", if present { "high" } else { "low" });
        self.transition(present);
    }

    /// Stack-level mount callback
    ///
    /// Returns false (and notifies nobody) if already mounted.
    pub fn on_mount(&self) -> bool {
        let _dispatch = self.lock_dispatch();
        self.transition(true)
    }

    /// Stack-level unmount callback
    ///
    /// Returns false (and notifies nobody) if not mounted.
    pub fn on_unmount(&self) -> bool {
        let _dispatch = self.lock_dispatch();
        self.transition(false)
    }

    /// Forget the connection, without notifying anyone
    ///
    /// Used by the lifecycle around install and uninstall: no stack is
    /// running, so there is no host to be mounted by.
    pub(crate) fn reset(&self) {
        let _dispatch = self.lock_dispatch();
        let mut inner = self.inner();
        if inner.state.mounted {
            debug!("Dropping mounted state without unmount notification");
        }
        inner.state = ConnectionState::default();
        inner.stats = ConnectionStats::default();
        inner.vbus = None;
        self.shared.stage.try_take();
    }

    fn lock_dispatch(&self) -> std::sync::MutexGuard<'_, ()> {
        self.shared
            .dispatch
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    // Caller holds the dispatch lock
    fn transition(&self, mounted: bool) -> bool {
        let (observers, event) = {
            let mut inner = self.inner();
            if inner.state.mounted == mounted {
                return false;
            }
            inner.state.mounted = mounted;
            let event = if mounted {
                inner.stats.mounts += 1;
                ConnectionEvent::Mounted
            } else {
                inner.stats.unmounts += 1;
                ConnectionEvent::Unmounted
            };
            inner.subscribers.retain(|tx| match tx.try_send(event) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    warn!("Connection event subscriber is lagging, dropped {:?}", event);
                    true
                }
                Err(TrySendError::Closed(_)) => false,
            });
            (inner.observers.clone(), event)
        };

        info!("USB device {:?}", event);
        for observer in &observers {
            match event {
                ConnectionEvent::Mounted => observer.on_mount(),
                ConnectionEvent::Unmounted => observer.on_unmount(),
            }
        }

        self.shared.stage.give();
        true
    }
}

/// Receiving end of [`ConnectionMonitor::subscribe`]
pub struct ConnectionEvents {
    rx: Receiver<ConnectionEvent>,
}

impl ConnectionEvents {
    /// Receive the next transition (async)
    pub async fn recv(&self) -> common::Result<ConnectionEvent> {
        self.rx
            .recv()
            .await
            .map_err(|e| common::Error::Channel(e.to_string()))
    }

    /// Receive the next transition (blocking)
    pub fn recv_blocking(&self) -> common::Result<ConnectionEvent> {
        self.rx
            .recv_blocking()
            .map_err(|e| common::Error::Channel(e.to_string()))
    }

    pub fn try_recv(&self) -> Option<ConnectionEvent> {
        self.rx.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct Counter {
        mounted: AtomicU32,
        unmounted: AtomicU32,
    }

    impl ConnectionObserver for Counter {
        fn on_mount(&self) {
            self.mounted.fetch_add(1, Ordering::SeqCst);
        }

        fn on_unmount(&self) {
            self.unmounted.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_level_changes_map_to_transitions() {
        let monitor = ConnectionMonitor::new();
        let counter = Arc::new(Counter::default());
        monitor.add_observer(counter.clone());

        monitor.vbus_level(true);
        monitor.vbus_level(true);
        assert!(monitor.is_mounted());
        monitor.vbus_level(false);
        monitor.vbus_level(false);
        monitor.vbus_level(true);

        assert_eq!(counter.mounted.load(Ordering::SeqCst), 2);
        assert_eq!(counter.unmounted.load(Ordering::SeqCst), 1);
        assert_eq!(
            monitor.stats(),
            ConnectionStats {
                mounts: 2,
                unmounts: 1
            }
        );
    }

    #[test]
    fn test_initial_low_level_is_not_an_unmount() {
        let monitor = ConnectionMonitor::new();
        monitor.vbus_level(false);
        assert_eq!(monitor.stats(), ConnectionStats::default());
        assert!(!monitor.wait_stage_change(Duration::from_millis(5)));
    }

    #[test]
    fn test_duplicate_stack_callbacks_are_dropped() {
        let monitor = ConnectionMonitor::new();
        assert!(monitor.on_mount());
        assert!(!monitor.on_mount());
        assert!(monitor.on_unmount());
        assert!(!monitor.on_unmount());
        assert_eq!(monitor.stats().mounts, 1);
        assert_eq!(monitor.stats().unmounts, 1);
    }

    #[test]
    fn test_stage_signal_released_after_state_update() {
        let monitor = ConnectionMonitor::new();
        monitor.vbus_level(true);
        assert!(monitor.wait_stage_change(Duration::from_millis(5)));
        assert!(monitor.is_mounted());
    }

    #[test]
    fn test_subscribers_see_ordered_events() {
        let monitor = ConnectionMonitor::new();
        let events = monitor.subscribe();

        monitor.vbus_level(true);
        monitor.vbus_level(false);

        assert_eq!(events.try_recv(), Some(ConnectionEvent::Mounted));
        assert_eq!(events.try_recv(), Some(ConnectionEvent::Unmounted));
        assert_eq!(events.try_recv(), None);
    }

    #[test]
    fn test_reset_is_silent() {
        let monitor = ConnectionMonitor::new();
        let counter = Arc::new(Counter::default());
        monitor.add_observer(counter.clone());

        monitor.vbus_level(true);
        monitor.reset();

        assert!(!monitor.is_mounted());
        assert_eq!(monitor.stats(), ConnectionStats::default());
        assert_eq!(counter.unmounted.load(Ordering::SeqCst), 0);
        assert!(!monitor.wait_stage_change(Duration::from_millis(5)));

        // After reset the first high sample mounts again
        monitor.vbus_level(true);
        assert_eq!(counter.mounted.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_remove_observer_stops_callbacks() {
        let monitor = ConnectionMonitor::new();
        let counter = Arc::new(Counter::default());
        monitor.add_observer(counter.clone());
        assert_eq!(monitor.observer_count(), 1);

        monitor.vbus_level(true);
        assert!(monitor.remove_observer(&counter));
        assert!(!monitor.remove_observer(&counter));
        assert_eq!(monitor.observer_count(), 0);

        monitor.vbus_level(false);
        assert_eq!(counter.mounted.load(Ordering::SeqCst), 1);
        assert_eq!(counter.unmounted.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_lagging_subscriber_is_bounded() {
        let monitor = ConnectionMonitor::new();
        let events = monitor.subscribe();
        let dropped = monitor.subscribe();
        drop(dropped);

        for i in 0..SUBSCRIBER_CAPACITY + 10 {
            monitor.vbus_level(i % 2 == 0);
        }

        assert_eq!(monitor.inner().subscribers.len(), 1);
        let received: Vec<_> = std::iter::from_fn(|| events.try_recv()).collect();
        assert_eq!(received.len(), SUBSCRIBER_CAPACITY);
        assert_eq!(received[0], ConnectionEvent::Mounted);
        assert_eq!(received[1], ConnectionEvent::Unmounted);

        // Draining makes room again
        assert!(!monitor.is_mounted());
        monitor.vbus_level(true);
        assert_eq!(events.try_recv(), Some(ConnectionEvent::Mounted));
    }

    #[tokio::test]
    async fn test_async_subscription() {
        let monitor = ConnectionMonitor::new();
        let events = monitor.subscribe();

        let feeder = monitor.clone();
        let handle = std::thread::spawn(move || feeder.vbus_level(true));

        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, ConnectionEvent::Mounted);
        handle.join().unwrap();
    }
}
