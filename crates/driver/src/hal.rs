//! Hardware collaborator interfaces
//!
//! The driver never touches registers itself. A board support layer (or
//! [`crate::sim::SimulatedHardware`] on a host) implements [`Transceiver`]
//! for the USB controllers and [`SignalRouter`] for the GPIO signal matrix.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// USB peripheral index
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Port(pub u8);

impl Port {
    /// USB OTG 1.1 peripheral
    pub const FULL_SPEED: Port = Port(0);
    /// USB OTG 2.0 peripheral, on parts with two controllers
    pub const HIGH_SPEED: Port = Port(1);

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "port {}", self.0)
    }
}

/// A physical pin on the signal matrix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignalId(pub u16);

impl fmt::Display for SignalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GPIO{}", self.0)
    }
}

/// What drives a peripheral input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalSource {
    ConstantZero,
    ConstantOne,
    PhysicalPin(SignalId),
}

/// Peripheral inputs the driver routes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalDestination {
    /// B-device session valid input of a port's controller
    VbusSense(Port),
}

/// Transceiver programming failure reported by the board layer
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct HardwareFault(pub String);

/// USB controller / internal PHY access
pub trait Transceiver: Send + Sync {
    /// Number of USB peripherals on this part
    fn peripheral_count(&self) -> u8;

    fn high_speed_capable(&self, port: Port) -> bool;

    /// Take exclusive ownership of `port`
    ///
    /// Returns false if another driver instance already holds it.
    fn claim_port(&self, port: Port) -> bool;

    fn release_port(&self, port: Port);

    /// Power up and program the internal transceiver in device mode
    fn enable(&self, port: Port) -> Result<(), HardwareFault>;

    fn disable(&self, port: Port);
}

/// GPIO signal matrix access
pub trait SignalRouter: Send + Sync {
    /// Number of physical pins a signal can be routed from
    fn pin_count(&self) -> u16;

    fn route_signal(&self, source: SignalSource, destination: SignalDestination);
}

/// Everything the driver needs from the board
pub trait UsbHardware: Transceiver + SignalRouter {}

impl<T: Transceiver + SignalRouter + ?Sized> UsbHardware for T {}
