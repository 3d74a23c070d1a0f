//! USB device-mode driver lifecycle
//!
//! Brings a USB device controller up and down around an external device
//! stack: PHY setup, descriptor resolution, stack init, and a dedicated
//! event task that services the stack until uninstall. VBUS level changes
//! surface as mount/unmount notifications through [`ConnectionMonitor`].
//!
//! # Example
//!
//! ```no_run
//! use driver::sim::{SimulatedHardware, SimulatedStack};
//! use driver::{InstallConfig, UsbDriver};
//! use std::sync::Arc;
//!
//! let hw = SimulatedHardware::new(1, 22, &[]);
//! let driver = UsbDriver::new(Arc::new(hw.clone()), SimulatedStack::new(hw));
//!
//! driver.install(InstallConfig::default())?;
//! println!("mounted: {}", driver.connection().is_mounted());
//! driver.uninstall()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod config;
pub mod driver;
pub mod error;
pub mod hal;
pub mod monitor;
pub mod phy;
pub mod sim;
pub mod stack;
pub mod task;

pub use config::{DriverSettings, load_config};
pub use driver::{DEFAULT_STOP_TIMEOUT, DriverState, InstallConfig, UsbDriver};
pub use error::{InstallError, LifecycleError, UninstallError};
pub use hal::{
    HardwareFault, Port, SignalDestination, SignalId, SignalRouter, SignalSource, Transceiver,
    UsbHardware,
};
pub use monitor::{
    ConnectionEvent, ConnectionEvents, ConnectionMonitor, ConnectionObserver, ConnectionState,
    ConnectionStats, SUBSCRIBER_CAPACITY,
};
pub use phy::{Phy, PhyConfig, PhyError, VbusSense};
pub use stack::{StackError, UsbStack};
pub use task::TaskConfig;
