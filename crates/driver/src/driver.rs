//! USB driver lifecycle
//!
//! [`UsbDriver`] is the only writer of the driver state:
//!
//! ```text
//! Uninstalled --install--> Installing --ok--> Running
//!      ^                       |                 |
//!      +------- rollback ------+             uninstall
//!      |                                         v
//!      +----------------- ok ------------- Uninstalling
//! ```
//!
//! Install validates the port and the descriptor set before the PHY is
//! programmed, then brings up the stack and spawns the event task. Any
//! failure undoes the completed steps in reverse order. Uninstall stops the
//! task (bounded wait), tears down the stack and releases the PHY.

use crate::error::{InstallError, LifecycleError, UninstallError};
use crate::hal::{Port, UsbHardware};
use crate::monitor::ConnectionMonitor;
use crate::phy::{self, Phy, PhyConfig};
use crate::stack::UsbStack;
use crate::task::{self, EventTask, TaskConfig};
use descriptors::{DescriptorSet, DeviceSpeed};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Default bound on waiting for the event task to stop
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(1);

static NEXT_DRIVER_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Uninstalled,
    Installing,
    Running,
    Uninstalling,
}

/// Everything install needs
///
/// Descriptor buffers are borrowed for the whole time the driver runs,
/// hence `'static`. `None` selects the build-time defaults.
#[derive(Debug, Clone, Copy, Default)]
pub struct InstallConfig {
    pub port: Port,
    pub phy: PhyConfig,
    pub task: TaskConfig,
    pub descriptors: Option<DescriptorSet<'static>>,
}

/// Resources held while Running
struct Installed {
    port: Port,
    phy: Phy,
    task: EventTask,
}

#[derive(Debug, Clone, Copy)]
struct Published {
    state: DriverState,
    port: Option<Port>,
    speed: Option<DeviceSpeed>,
}

/// Lifecycle manager for one USB device controller
///
/// Install and uninstall are serialized; state queries never wait for them.
/// Install, uninstall and [`UsbDriver::with_stack`] are refused on the
/// driver's own event task, where they would wait on themselves.
pub struct UsbDriver<H: UsbHardware, S: UsbStack> {
    id: u64,
    hardware: Arc<H>,
    stack: Arc<Mutex<S>>,
    monitor: ConnectionMonitor,
    lifecycle: Mutex<Option<Installed>>,
    published: Mutex<Published>,
    stop_timeout: Duration,
}

impl<H: UsbHardware, S: UsbStack> UsbDriver<H, S> {
    pub fn new(hardware: Arc<H>, stack: S) -> Self {
        Self {
            id: NEXT_DRIVER_ID.fetch_add(1, Ordering::Relaxed),
            hardware,
            stack: Arc::new(Mutex::new(stack)),
            monitor: ConnectionMonitor::new(),
            lifecycle: Mutex::new(None),
            published: Mutex::new(Published {
                state: DriverState::Uninstalled,
                port: None,
                speed: None,
            }),
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }

    /// Override how long uninstall waits for the event task
    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    pub fn state(&self) -> DriverState {
        self.published().state
    }

    /// Port the driver is installed on, if any
    pub fn port(&self) -> Option<Port> {
        self.published().port
    }

    /// Speed the installed descriptor set enumerates at
    pub fn speed(&self) -> Option<DeviceSpeed> {
        self.published().speed
    }

    pub fn is_running(&self) -> bool {
        self.state() == DriverState::Running
    }

    /// Connection state shared with the stack
    pub fn connection(&self) -> &ConnectionMonitor {
        &self.monitor
    }

    pub fn hardware(&self) -> &Arc<H> {
        &self.hardware
    }

    /// Run `f` against the stack
    ///
    /// Waits for the current event-processing iteration while Running.
    pub fn with_stack<R>(&self, f: impl FnOnce(&mut S) -> R) -> Result<R, LifecycleError> {
        self.reject_on_event_task("Stack access")?;
        Ok(f(&mut self.lock_stack()))
    }

    /// Install the driver
    ///
    /// PHY setup, descriptor assembly, stack init and event task spawn, in
    /// that order. Fails without side effects if already installed.
    pub fn install(&self, config: InstallConfig) -> Result<(), InstallError> {
        self.reject_on_event_task("Install")?;
        let mut lifecycle = self.lock_lifecycle();

        let current = self.published();
        if current.state != DriverState::Uninstalled {
            let port = current.port.unwrap_or(config.port);
            warn!("Install on {} rejected: driver is {:?}", config.port, current.state);
            return Err(LifecycleError::AlreadyInstalled { port }.into());
        }

        info!("Installing USB driver on {}", config.port);
        self.publish(DriverState::Installing, Some(config.port), None);

        match self.bring_up(&config) {
            Ok((installed, speed)) => {
                *lifecycle = Some(installed);
                self.publish(DriverState::Running, Some(config.port), Some(speed));
                info!("USB driver running on {} ({:?} speed)", config.port, speed);
                Ok(())
            }
            Err(e) => {
                self.publish(DriverState::Uninstalled, None, None);
                error!("USB driver install on {} failed: {}", config.port, e);
                Err(e)
            }
        }
    }

    /// Uninstall the driver
    ///
    /// Stops the event task, tears down the stack, releases the PHY. If the
    /// task does not stop in time the driver stays `Uninstalling` with its
    /// resources claimed, and the error is fatal.
    pub fn uninstall(&self) -> Result<(), UninstallError> {
        self.reject_on_event_task("Uninstall")?;
        let mut lifecycle = self.lock_lifecycle();

        let current = self.published();
        let installed = match (current.state, lifecycle.take()) {
            (DriverState::Running, Some(installed)) => installed,
            (state, rest) => {
                *lifecycle = rest;
                warn!("Uninstall rejected: driver is {:?}", state);
                return Err(LifecycleError::NotInstalled.into());
            }
        };

        let Installed { port, phy, task } = installed;
        info!("Uninstalling USB driver on {}", port);
        self.publish(DriverState::Uninstalling, Some(port), current.speed);

        if task.stop(self.stop_timeout).is_err() {
            error!(
                "USB event task on {} did not stop within {:?}; stack and PHY stay claimed, restart required",
                port, self.stop_timeout
            );
            return Err(UninstallError::TaskStopTimeout {
                port,
                timeout: self.stop_timeout,
            });
        }
        debug!("USB event task on {} stopped", port);

        let deinit = self.lock_stack().deinit();
        if let Err(e) = &deinit {
            warn!("USB stack teardown on {} failed: {}", port, e);
        }

        phy.release(&*self.hardware);
        self.monitor.reset();
        self.publish(DriverState::Uninstalled, None, None);

        deinit?;
        info!("USB driver uninstalled from {}", port);
        Ok(())
    }

    fn bring_up(&self, config: &InstallConfig) -> Result<(Installed, DeviceSpeed), InstallError> {
        let hardware = &*self.hardware;
        let port = config.port;

        // Pure validation first: nothing below this touches hardware until
        // the port and descriptors are known good.
        phy::check_port(hardware, port)?;
        let descriptors =
            descriptors::assemble(config.descriptors, hardware.high_speed_capable(port))?;
        let speed = descriptors.speed();

        let phy = phy::configure(hardware, &config.phy, port)?;

        self.monitor.reset();
        if let Err(e) = self
            .lock_stack()
            .init(port, descriptors, self.monitor.clone())
        {
            debug!("Rolling back PHY on {} after stack init failure", port);
            phy.release(hardware);
            return Err(e.into());
        }

        match EventTask::spawn(self.id, port, &config.task, Arc::clone(&self.stack)) {
            Ok(task) => Ok((Installed { port, phy, task }, speed)),
            Err(e) => {
                debug!("Rolling back stack and PHY on {} after task spawn failure", port);
                if let Err(deinit) = self.lock_stack().deinit() {
                    warn!("USB stack teardown during rollback failed: {}", deinit);
                }
                phy.release(hardware);
                Err(InstallError::TaskSpawn(e))
            }
        }
    }

    // Callbacks run on the event task with the stack locked
    fn reject_on_event_task(&self, operation: &'static str) -> Result<(), LifecycleError> {
        if task::serving_driver() != Some(self.id) {
            return Ok(());
        }
        let port = self.published().port.unwrap_or_default();
        warn!("{} rejected: called from the USB event task on {}", operation, port);
        Err(LifecycleError::OnEventTask { operation, port })
    }

    fn publish(&self, state: DriverState, port: Option<Port>, speed: Option<DeviceSpeed>) {
        *self
            .published
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Published { state, port, speed };
        debug!("USB driver state -> {:?}", state);
    }

    fn published(&self) -> Published {
        *self
            .published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_lifecycle(&self) -> MutexGuard<'_, Option<Installed>> {
        self.lifecycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_stack(&self) -> MutexGuard<'_, S> {
        self.stack.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<H: UsbHardware, S: UsbStack> Drop for UsbDriver<H, S> {
    fn drop(&mut self) {
        if self.is_running() {
            warn!("USB driver dropped while running, uninstalling");
            if let Err(e) = self.uninstall() {
                error!("Uninstall on drop failed: {}", e);
            }
        }
    }
}
