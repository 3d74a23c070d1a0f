//! Descriptor assembler
//!
//! Binds caller-owned descriptor buffers into a [`ResolvedDescriptors`] view
//! the USB stack can serve from. Nothing is copied: the resolved view borrows
//! the caller's buffers, so they must outlive the installed driver.

use crate::defaults::{DEFAULT_DEVICE, DEFAULT_QUALIFIER, DEFAULT_STRINGS, default_set};
use crate::error::{DescriptorError, Result};
use crate::strings::StringTable;
use crate::types::{ConfigHeader, DeviceDescriptor, DeviceQualifier, DeviceSpeed};
use tracing::{debug, warn};

/// Caller-supplied descriptors
///
/// `device`, `qualifier` and `strings` form one group: leaving `device` out
/// replaces the whole group with the build-time defaults. Configuration
/// descriptors are never substituted once a set is supplied.
#[derive(Debug, Clone, Copy, Default)]
pub struct DescriptorSet<'a> {
    pub device: Option<&'a DeviceDescriptor>,
    pub qualifier: Option<&'a DeviceQualifier>,
    pub strings: &'a [&'a str],
    pub string_count: usize,
    pub full_speed_config: Option<&'a [u8]>,
    pub high_speed_config: Option<&'a [u8]>,
}

/// Validated, borrowed descriptors handed to the USB stack
#[derive(Debug, Clone, Copy)]
pub struct ResolvedDescriptors<'a> {
    device: &'a DeviceDescriptor,
    qualifier: Option<&'a DeviceQualifier>,
    strings: StringTable<'a>,
    full_speed_config: &'a [u8],
    high_speed_config: Option<&'a [u8]>,
    speed: DeviceSpeed,
    defaulted: bool,
}

impl<'a> ResolvedDescriptors<'a> {
    pub fn device(&self) -> &'a DeviceDescriptor {
        self.device
    }

    pub fn qualifier(&self) -> Option<&'a DeviceQualifier> {
        self.qualifier
    }

    pub fn strings(&self) -> &StringTable<'a> {
        &self.strings
    }

    pub fn full_speed_config(&self) -> &'a [u8] {
        self.full_speed_config
    }

    pub fn high_speed_config(&self) -> Option<&'a [u8]> {
        self.high_speed_config
    }

    /// Highest speed this set can enumerate at
    pub fn speed(&self) -> DeviceSpeed {
        self.speed
    }

    /// True when the whole set came from the build-time defaults
    pub fn is_default(&self) -> bool {
        self.defaulted
    }

    /// Configuration descriptor to serve at the negotiated bus speed
    pub fn configuration(&self, speed: DeviceSpeed) -> &'a [u8] {
        match (speed, self.high_speed_config) {
            (DeviceSpeed::High, Some(config)) => config,
            _ => self.full_speed_config,
        }
    }

    /// Configuration for GET_DESCRIPTOR(OTHER_SPEED_CONFIGURATION)
    ///
    /// Only meaningful for high-speed capable sets, which are exactly the
    /// ones carrying a qualifier.
    pub fn other_speed_configuration(&self, speed: DeviceSpeed) -> Option<&'a [u8]> {
        if self.qualifier.is_none() {
            return None;
        }
        match speed {
            DeviceSpeed::High => Some(self.full_speed_config),
            DeviceSpeed::Full => self.high_speed_config,
        }
    }
}

/// Resolve a descriptor set for a port
///
/// `None` selects the build-time default set. `high_speed_capable` reports
/// whether the port's controller can run at high speed.
pub fn assemble<'a>(
    set: Option<DescriptorSet<'a>>,
    high_speed_capable: bool,
) -> Result<ResolvedDescriptors<'a>> {
    let (set, defaulted) = match set {
        Some(set) => (set, false),
        None => {
            debug!("No descriptor set supplied, using build-time defaults");
            (default_set(high_speed_capable), true)
        }
    };

    let (device, qualifier, strings, string_count) = match set.device {
        Some(device) => (device, set.qualifier, set.strings, set.string_count),
        None => {
            if set.qualifier.is_some() || !set.strings.is_empty() {
                warn!("Device descriptor missing, caller qualifier and strings replaced by defaults");
            }
            let high_speed = high_speed_capable && set.high_speed_config.is_some();
            (
                &DEFAULT_DEVICE,
                high_speed.then_some(&DEFAULT_QUALIFIER),
                &DEFAULT_STRINGS[..],
                DEFAULT_STRINGS.len(),
            )
        }
    };

    device.validate()?;

    let full_speed_config = set.full_speed_config.ok_or_else(|| {
        DescriptorError::Inconsistent("full-speed configuration descriptor is required".into())
    })?;
    ConfigHeader::parse(full_speed_config)?;

    let (speed, high_speed_config, qualifier) =
        match (high_speed_capable, set.high_speed_config, qualifier) {
            (true, Some(config), Some(qualifier)) => {
                ConfigHeader::parse(config)?;
                (DeviceSpeed::High, Some(config), Some(qualifier))
            }
            (true, None, None) => (DeviceSpeed::Full, None, None),
            (true, Some(_), None) => {
                return Err(DescriptorError::Inconsistent(
                    "high-speed configuration supplied without a device qualifier".into(),
                ));
            }
            (true, None, Some(_)) => {
                return Err(DescriptorError::Inconsistent(
                    "device qualifier supplied without a high-speed configuration".into(),
                ));
            }
            (false, _, Some(_)) => {
                return Err(DescriptorError::Inconsistent(
                    "device qualifier supplied for a full-speed only port".into(),
                ));
            }
            (false, config, None) => {
                if config.is_some() {
                    debug!("Ignoring high-speed configuration on a full-speed only port");
                }
                (DeviceSpeed::Full, None, None)
            }
        };

    let strings = StringTable::new(strings, string_count)?;

    debug!(
        "Resolved descriptors: vid={:#06x} pid={:#06x} speed={:?} strings={} default={}",
        device.vendor_id,
        device.product_id,
        speed,
        strings.len(),
        defaulted
    );

    Ok(ResolvedDescriptors {
        device,
        qualifier,
        strings,
        full_speed_config,
        high_speed_config,
        speed,
        defaulted,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defaults::{DEFAULT_CONFIG, USB_ESPRESSIF_VID};

    #[test]
    fn test_default_set_full_speed() {
        let resolved = assemble(None, false).unwrap();
        assert!(resolved.is_default());
        assert_eq!(resolved.speed(), DeviceSpeed::Full);
        assert_eq!(resolved.device().vendor_id, USB_ESPRESSIF_VID);
        assert!(resolved.qualifier().is_none());
        assert_eq!(resolved.strings().len(), 4);
    }

    #[test]
    fn test_default_set_high_speed() {
        let resolved = assemble(None, true).unwrap();
        assert_eq!(resolved.speed(), DeviceSpeed::High);
        assert!(resolved.qualifier().is_some());
        assert_eq!(
            resolved.other_speed_configuration(DeviceSpeed::High),
            Some(&DEFAULT_CONFIG[..])
        );
    }

    #[test]
    fn test_missing_device_defaults_whole_group() {
        let strings = ["\u{0409}", "ignored"];
        let set = DescriptorSet {
            strings: &strings,
            string_count: 2,
            full_speed_config: Some(&DEFAULT_CONFIG[..]),
            ..Default::default()
        };
        let resolved = assemble(Some(set), false).unwrap();
        assert!(!resolved.is_default());
        assert_eq!(resolved.device(), &DEFAULT_DEVICE);
        assert_eq!(resolved.strings().len(), DEFAULT_STRINGS.len());
        assert_eq!(resolved.strings().get(1), Some(DEFAULT_STRINGS[1]));
    }

    #[test]
    fn test_configuration_selection_without_high_speed() {
        let resolved = assemble(None, false).unwrap();
        assert_eq!(resolved.configuration(DeviceSpeed::High), &DEFAULT_CONFIG[..]);
        assert!(resolved.other_speed_configuration(DeviceSpeed::Full).is_none());
    }
}
