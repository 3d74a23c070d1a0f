//! Host-side simulated target
//!
//! [`SimulatedHardware`] models the USB peripherals, GPIO pin levels and the
//! signal matrix feeding each port's VBUS sense input. [`SimulatedStack`] is
//! a [`UsbStack`] whose event pump waits on that sense input and reports
//! level changes to the [`ConnectionMonitor`], the way a real stack reports
//! session-valid interrupts.
//!
//! # Example
//!
//! ```
//! use driver::hal::{Port, SignalDestination, SignalSource, SignalRouter};
//! use driver::sim::SimulatedHardware;
//!
//! let hw = SimulatedHardware::new(1, 22, &[]);
//! hw.route_signal(SignalSource::ConstantOne, SignalDestination::VbusSense(Port::FULL_SPEED));
//! assert!(hw.vbus_sense(Port::FULL_SPEED));
//! ```

use crate::hal::{
    HardwareFault, Port, SignalDestination, SignalId, SignalRouter, SignalSource, Transceiver,
};
use crate::monitor::ConnectionMonitor;
use crate::stack::{StackError, UsbStack};
use descriptors::ResolvedDescriptors;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, trace, warn};

struct HwState {
    claimed: Vec<bool>,
    enabled: Vec<bool>,
    routes: Vec<Option<SignalSource>>,
    pins: Vec<bool>,
    fail_next_enable: bool,
}

impl HwState {
    /// Level seen by the sense input of `port`; unrouted inputs read low
    fn sense(&self, port: Port) -> bool {
        match self.routes.get(port.index()).copied().flatten() {
            Some(SignalSource::ConstantOne) => true,
            Some(SignalSource::PhysicalPin(pin)) => {
                self.pins.get(pin.0 as usize).copied().unwrap_or(false)
            }
            Some(SignalSource::ConstantZero) | None => false,
        }
    }
}

struct HwShared {
    peripherals: u8,
    pin_count: u16,
    high_speed: Vec<Port>,
    state: Mutex<HwState>,
    // Notified on every route, pin or enable change
    changed: Condvar,
}

/// In-process USB peripherals and signal matrix
#[derive(Clone)]
pub struct SimulatedHardware {
    shared: Arc<HwShared>,
}

impl SimulatedHardware {
    pub fn new(peripherals: u8, pin_count: u16, high_speed_ports: &[Port]) -> Self {
        Self {
            shared: Arc::new(HwShared {
                peripherals,
                pin_count,
                high_speed: high_speed_ports.to_vec(),
                state: Mutex::new(HwState {
                    claimed: vec![false; peripherals as usize],
                    enabled: vec![false; peripherals as usize],
                    routes: vec![None; peripherals as usize],
                    pins: vec![false; pin_count as usize],
                    fail_next_enable: false,
                }),
                changed: Condvar::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HwState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn update(&self, f: impl FnOnce(&mut HwState)) {
        f(&mut self.lock());
        self.shared.changed.notify_all();
    }

    /// Drive a physical pin
    pub fn set_pin_level(&self, pin: SignalId, high: bool) {
        if pin.0 >= self.shared.pin_count {
            warn!("Ignoring level change on nonexistent {}", pin);
            return;
        }
        trace!("{} -> {}", pin, if high { "high" } else { "low" });
        self.update(|state| state.pins[pin.0 as usize] = high);
    }

    /// Current level of a port's VBUS sense input
    pub fn vbus_sense(&self, port: Port) -> bool {
        self.lock().sense(port)
    }

    /// What is currently routed into a port's VBUS sense input
    pub fn vbus_route(&self, port: Port) -> Option<SignalSource> {
        self.lock().routes.get(port.index()).copied().flatten()
    }

    /// Wait up to `timeout` for the sense level of `port` to differ from
    /// `last`, returning the level then seen
    ///
    /// Returns immediately when `last` is `None`.
    pub fn wait_vbus_change(&self, port: Port, last: Option<bool>, timeout: Duration) -> bool {
        let state = self.lock();
        let (state, _) = self
            .shared
            .changed
            .wait_timeout_while(state, timeout, |state| Some(state.sense(port)) == last)
            .unwrap_or_else(PoisonError::into_inner);
        state.sense(port)
    }

    pub fn is_enabled(&self, port: Port) -> bool {
        self.lock()
            .enabled
            .get(port.index())
            .copied()
            .unwrap_or(false)
    }

    /// Whether a driver currently holds `port`
    pub fn is_claimed(&self, port: Port) -> bool {
        self.lock()
            .claimed
            .get(port.index())
            .copied()
            .unwrap_or(false)
    }

    /// Make the next transceiver enable fail
    pub fn fail_next_enable(&self) {
        self.lock().fail_next_enable = true;
    }
}

impl Transceiver for SimulatedHardware {
    fn peripheral_count(&self) -> u8 {
        self.shared.peripherals
    }

    fn high_speed_capable(&self, port: Port) -> bool {
        self.shared.high_speed.contains(&port)
    }

    fn claim_port(&self, port: Port) -> bool {
        let mut state = self.lock();
        match state.claimed.get_mut(port.index()) {
            Some(claimed) if !*claimed => {
                *claimed = true;
                true
            }
            _ => false,
        }
    }

    fn release_port(&self, port: Port) {
        if let Some(claimed) = self.lock().claimed.get_mut(port.index()) {
            *claimed = false;
        }
    }

    fn enable(&self, port: Port) -> Result<(), HardwareFault> {
        let mut state = self.lock();
        if std::mem::take(&mut state.fail_next_enable) {
            return Err(HardwareFault(format!("simulated transceiver fault on {}", port)));
        }
        let Some(enabled) = state.enabled.get_mut(port.index()) else {
            return Err(HardwareFault(format!("no transceiver for {}", port)));
        };
        if *enabled {
            return Err(HardwareFault(format!("transceiver on {} already enabled", port)));
        }
        *enabled = true;
        drop(state);
        self.shared.changed.notify_all();
        debug!("Simulated transceiver on {} enabled", port);
        Ok(())
    }

    fn disable(&self, port: Port) {
        self.update(|state| {
            if let Some(enabled) = state.enabled.get_mut(port.index()) {
                *enabled = false;
            }
        });
        debug!("Simulated transceiver on {} disabled", port);
    }
}

impl SignalRouter for SimulatedHardware {
    fn pin_count(&self) -> u16 {
        self.shared.pin_count
    }

    fn route_signal(&self, source: SignalSource, destination: SignalDestination) {
        let SignalDestination::VbusSense(port) = destination;
        if port.0 >= self.shared.peripherals {
            warn!("Ignoring route into VBUS sense of nonexistent {}", port);
            return;
        }
        trace!("Routing {:?} -> {:?}", source, destination);
        self.update(|state| state.routes[port.index()] = Some(source));
    }
}

#[derive(Default)]
struct Controls {
    fail_init: AtomicBool,
    fail_deinit: AtomicBool,
    event_failures: AtomicU32,
    hang: AtomicBool,
    inits: AtomicU64,
    deinits: AtomicU64,
    iterations: AtomicU64,
}

/// Fault injection and counters of a [`SimulatedStack`]
///
/// Stays usable after the stack has been moved into a driver.
#[derive(Clone, Default)]
pub struct StackControls {
    inner: Arc<Controls>,
}

impl StackControls {
    /// Make the next `init` fail
    pub fn fail_next_init(&self) {
        self.inner.fail_init.store(true, Ordering::SeqCst);
    }

    /// Make the next `deinit` fail (after tearing down)
    pub fn fail_next_deinit(&self) {
        self.inner.fail_deinit.store(true, Ordering::SeqCst);
    }

    /// Make the next `count` event-processing calls fail
    pub fn fail_events(&self, count: u32) {
        self.inner.event_failures.store(count, Ordering::SeqCst);
    }

    /// While set, event processing blocks and never returns
    pub fn set_hang(&self, hang: bool) {
        self.inner.hang.store(hang, Ordering::SeqCst);
    }

    pub fn inits(&self) -> u64 {
        self.inner.inits.load(Ordering::SeqCst)
    }

    pub fn deinits(&self) -> u64 {
        self.inner.deinits.load(Ordering::SeqCst)
    }

    pub fn iterations(&self) -> u64 {
        self.inner.iterations.load(Ordering::SeqCst)
    }
}

struct Session {
    port: Port,
    monitor: ConnectionMonitor,
    descriptors: ResolvedDescriptors<'static>,
    vbus: Option<bool>,
}

/// Device stack backed by [`SimulatedHardware`]
pub struct SimulatedStack {
    hardware: SimulatedHardware,
    controls: StackControls,
    session: Option<Session>,
}

impl SimulatedStack {
    pub fn new(hardware: SimulatedHardware) -> Self {
        Self {
            hardware,
            controls: StackControls::default(),
            session: None,
        }
    }

    pub fn controls(&self) -> StackControls {
        self.controls.clone()
    }

    /// Descriptors served by the current session
    pub fn descriptors(&self) -> Option<ResolvedDescriptors<'static>> {
        self.session.as_ref().map(|session| session.descriptors)
    }

    pub fn port(&self) -> Option<Port> {
        self.session.as_ref().map(|session| session.port)
    }
}

impl UsbStack for SimulatedStack {
    fn init(
        &mut self,
        port: Port,
        descriptors: ResolvedDescriptors<'static>,
        monitor: ConnectionMonitor,
    ) -> Result<(), StackError> {
        let controls = &self.controls.inner;
        controls.inits.fetch_add(1, Ordering::SeqCst);
        if controls.fail_init.swap(false, Ordering::SeqCst) {
            return Err(StackError("simulated init failure".into()));
        }
        if self.session.is_some() {
            return Err(StackError("stack already initialized".into()));
        }

        debug!(
            "Simulated stack up on {}: VID {:04x} PID {:04x}, {:?} speed",
            port,
            descriptors.device().vendor_id,
            descriptors.device().product_id,
            descriptors.speed()
        );
        self.session = Some(Session {
            port,
            monitor,
            descriptors,
            vbus: None,
        });
        Ok(())
    }

    fn process_events(&mut self, timeout: Duration) -> Result<(), StackError> {
        let controls = &self.controls.inner;
        controls.iterations.fetch_add(1, Ordering::SeqCst);

        while controls.hang.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(1));
        }

        let failing = controls
            .event_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StackError("simulated event failure".into()));
        }

        let Some(session) = self.session.as_mut() else {
            return Err(StackError("stack not initialized".into()));
        };

        let level = self
            .hardware
            .wait_vbus_change(session.port, session.vbus, timeout);
        if session.vbus != Some(level) {
            session.vbus = Some(level);
            session.monitor.vbus_level(level);
        }
        Ok(())
    }

    fn deinit(&mut self) -> Result<(), StackError> {
        self.controls.inner.deinits.fetch_add(1, Ordering::SeqCst);
        let session = self.session.take();
        if self.controls.inner.fail_deinit.swap(false, Ordering::SeqCst) {
            return Err(StackError("simulated deinit failure".into()));
        }
        if let Some(session) = session {
            debug!("Simulated stack on {} down", session.port);
        }
        Ok(())
    }
}
