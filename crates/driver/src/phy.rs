//! PHY configurator
//!
//! Decides whether the internal transceiver is programmed by the driver or
//! left to the caller, and what feeds the controller's VBUS sense input.

use crate::hal::{
    HardwareFault, Port, SignalDestination, SignalId, SignalSource, Transceiver, UsbHardware,
};
use thiserror::Error;
use tracing::{debug, info, warn};

/// USB PHY configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhyConfig {
    /// Leave the transceiver alone; an external PHY (or the caller) has
    /// already set it up. `self_powered` and the monitor pin are ignored.
    pub skip_setup: bool,
    /// Self-powered devices must watch VBUS to notice the host going away
    pub self_powered: bool,
    /// Pin carrying the (divided) VBUS level. Only used when self-powered.
    pub vbus_monitor_signal: Option<SignalId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PhyError {
    #[error("Invalid USB {port}: hardware has {available} peripheral(s)")]
    InvalidPort { port: Port, available: u8 },

    #[error("Invalid VBUS monitor pin {pin}: signal matrix has {available} pins")]
    InvalidSignal { pin: SignalId, available: u16 },

    #[error("USB {port} is already claimed by another driver")]
    PortInUse { port: Port },

    #[error("PHY hardware fault: {0}")]
    HardwareFault(#[from] HardwareFault),
}

/// What the VBUS sense input of a configured port follows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VbusSense {
    /// PHY set up by the caller; sense routing is theirs too
    External,
    /// Follows the level of a monitor pin
    Monitored(SignalId),
    /// Tied high: the device always reports attached
    AlwaysAttached,
}

impl VbusSense {
    fn source(self) -> Option<SignalSource> {
        match self {
            VbusSense::External => None,
            VbusSense::Monitored(pin) => Some(SignalSource::PhysicalPin(pin)),
            VbusSense::AlwaysAttached => Some(SignalSource::ConstantOne),
        }
    }
}

/// A configured PHY, released on uninstall or install rollback
#[derive(Debug)]
#[must_use = "a configured PHY must be released"]
pub struct Phy {
    port: Port,
    sense: VbusSense,
}

impl Phy {
    pub fn port(&self) -> Port {
        self.port
    }

    pub fn sense(&self) -> VbusSense {
        self.sense
    }

    /// True when the driver programmed the transceiver and must undo it
    pub fn is_owned(&self) -> bool {
        self.sense != VbusSense::External
    }

    /// Tear down what [`configure`] set up and give up the port
    pub fn release<H: UsbHardware + ?Sized>(self, hardware: &H) {
        if self.is_owned() {
            hardware.route_signal(
                SignalSource::ConstantZero,
                SignalDestination::VbusSense(self.port),
            );
            hardware.disable(self.port);
        } else {
            debug!("PHY on {} is externally managed, leaving it as is", self.port);
        }
        hardware.release_port(self.port);
        debug!("Released {}", self.port);
    }
}

/// Check that a port exists on this part
pub fn check_port<H: Transceiver + ?Sized>(hardware: &H, port: Port) -> Result<(), PhyError> {
    let available = hardware.peripheral_count();
    if port.0 >= available {
        return Err(PhyError::InvalidPort { port, available });
    }
    Ok(())
}

/// Configure the PHY of `port`
///
/// Claims the port for the returned [`Phy`]; a port held by another driver
/// is refused before anything is programmed.
pub fn configure<H: UsbHardware + ?Sized>(
    hardware: &H,
    config: &PhyConfig,
    port: Port,
) -> Result<Phy, PhyError> {
    check_port(hardware, port)?;
    let sense = select_sense(hardware, config, port)?;

    if !hardware.claim_port(port) {
        return Err(PhyError::PortInUse { port });
    }

    if sense == VbusSense::External {
        info!("Skipping PHY setup on {}, assuming it was configured externally", port);
        return Ok(Phy { port, sense });
    }

    if let Err(e) = hardware.enable(port) {
        hardware.release_port(port);
        return Err(e.into());
    }
    if let Some(source) = sense.source() {
        hardware.route_signal(source, SignalDestination::VbusSense(port));
    }

    info!("Configured internal PHY on {} (VBUS sense: {:?})", port, sense);
    Ok(Phy { port, sense })
}

fn select_sense<H: UsbHardware + ?Sized>(
    hardware: &H,
    config: &PhyConfig,
    port: Port,
) -> Result<VbusSense, PhyError> {
    if config.skip_setup {
        return Ok(VbusSense::External);
    }

    match (config.self_powered, config.vbus_monitor_signal) {
        (true, Some(pin)) => {
            let available = hardware.pin_count();
            if pin.0 >= available {
                return Err(PhyError::InvalidSignal { pin, available });
            }
            Ok(VbusSense::Monitored(pin))
        }
        (true, None) => {
            warn!(
                "Self-powered device on {} has no VBUS monitor pin; disconnects will not be detected",
                port
            );
            Ok(VbusSense::AlwaysAttached)
        }
        (false, pin) => {
            if let Some(pin) = pin {
                debug!("Ignoring VBUS monitor pin {} for bus-powered device", pin);
            }
            Ok(VbusSense::AlwaysAttached)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimulatedHardware;

    fn hardware() -> SimulatedHardware {
        SimulatedHardware::new(2, 48, &[Port::HIGH_SPEED])
    }

    #[test]
    fn test_skip_setup_touches_nothing() {
        let hw = hardware();
        let config = PhyConfig {
            skip_setup: true,
            self_powered: true,
            vbus_monitor_signal: Some(SignalId(200)),
        };

        let phy = configure(&hw, &config, Port::FULL_SPEED).unwrap();
        assert_eq!(phy.sense(), VbusSense::External);
        assert!(!phy.is_owned());
        assert!(!hw.is_enabled(Port::FULL_SPEED));
        assert_eq!(hw.vbus_route(Port::FULL_SPEED), None);
        phy.release(&hw);
        assert!(!hw.is_enabled(Port::FULL_SPEED));
        assert_eq!(hw.vbus_route(Port::FULL_SPEED), None);
    }

    #[test]
    fn test_monitored_self_powered() {
        let hw = hardware();
        let config = PhyConfig {
            skip_setup: false,
            self_powered: true,
            vbus_monitor_signal: Some(SignalId(4)),
        };

        let phy = configure(&hw, &config, Port::FULL_SPEED).unwrap();
        assert_eq!(phy.sense(), VbusSense::Monitored(SignalId(4)));
        assert!(hw.is_enabled(Port::FULL_SPEED));
        assert_eq!(
            hw.vbus_route(Port::FULL_SPEED),
            Some(SignalSource::PhysicalPin(SignalId(4)))
        );

        phy.release(&hw);
        assert!(!hw.is_enabled(Port::FULL_SPEED));
        assert!(!hw.vbus_sense(Port::FULL_SPEED));
    }

    #[test]
    fn test_self_powered_without_pin_is_always_attached() {
        let hw = hardware();
        let config = PhyConfig {
            skip_setup: false,
            self_powered: true,
            vbus_monitor_signal: None,
        };

        let phy = configure(&hw, &config, Port::FULL_SPEED).unwrap();
        assert_eq!(phy.sense(), VbusSense::AlwaysAttached);
        assert!(hw.vbus_sense(Port::FULL_SPEED));
        phy.release(&hw);
    }

    #[test]
    fn test_bus_powered_ignores_pin() {
        let hw = hardware();
        let config = PhyConfig {
            skip_setup: false,
            self_powered: false,
            vbus_monitor_signal: Some(SignalId(4)),
        };

        let phy = configure(&hw, &config, Port::FULL_SPEED).unwrap();
        assert_eq!(phy.sense(), VbusSense::AlwaysAttached);
        phy.release(&hw);
    }

    #[test]
    fn test_invalid_port() {
        let hw = hardware();
        let err = configure(&hw, &PhyConfig::default(), Port(2)).unwrap_err();
        assert_eq!(
            err,
            PhyError::InvalidPort {
                port: Port(2),
                available: 2
            }
        );
    }

    #[test]
    fn test_invalid_monitor_pin() {
        let hw = hardware();
        let config = PhyConfig {
            skip_setup: false,
            self_powered: true,
            vbus_monitor_signal: Some(SignalId(48)),
        };
        assert!(matches!(
            configure(&hw, &config, Port::FULL_SPEED),
            Err(PhyError::InvalidSignal { .. })
        ));
        assert!(!hw.is_enabled(Port::FULL_SPEED));
    }

    #[test]
    fn test_hardware_fault() {
        let hw = hardware();
        hw.fail_next_enable();
        assert!(matches!(
            configure(&hw, &PhyConfig::default(), Port::FULL_SPEED),
            Err(PhyError::HardwareFault(_))
        ));
        assert!(!hw.is_enabled(Port::FULL_SPEED));
        assert!(!hw.is_claimed(Port::FULL_SPEED));
    }

    #[test]
    fn test_claimed_port_is_refused() {
        let hw = hardware();
        let phy = configure(&hw, &PhyConfig::default(), Port::FULL_SPEED).unwrap();
        assert!(hw.is_claimed(Port::FULL_SPEED));

        let external = PhyConfig {
            skip_setup: true,
            ..Default::default()
        };
        for config in [PhyConfig::default(), external] {
            assert_eq!(
                configure(&hw, &config, Port::FULL_SPEED).unwrap_err(),
                PhyError::PortInUse {
                    port: Port::FULL_SPEED
                }
            );
        }
        assert!(hw.is_enabled(Port::FULL_SPEED));

        // The other port is independent
        configure(&hw, &PhyConfig::default(), Port::HIGH_SPEED)
            .unwrap()
            .release(&hw);

        phy.release(&hw);
        assert!(!hw.is_claimed(Port::FULL_SPEED));
        configure(&hw, &external, Port::FULL_SPEED)
            .unwrap()
            .release(&hw);
    }
}
