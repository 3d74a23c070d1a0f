//! Test utilities for usbd-driver
//!
//! Provides the descriptor fixtures and timing helpers shared by the
//! integration tests of every crate.
//!
//! # Example
//!
//! ```
//! use common::test_utils::zero_interface_descriptor_set;
//!
//! let set = zero_interface_descriptor_set(false);
//! assert!(set.qualifier.is_none());
//! assert_eq!(set.full_speed_config.unwrap().len(), 9);
//! ```

use descriptors::types::{CLASS_MISC, MISC_PROTOCOL_IAD, MISC_SUBCLASS_COMMON};
use descriptors::{
    CONFIG_ATT_REMOTE_WAKEUP, CONFIG_ATT_SELF_POWERED, CONFIG_DESC_LEN, DescriptorSet,
    DeviceDescriptor, DeviceQualifier, config_descriptor_header,
};
use std::time::{Duration, Instant};

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// How long a test waits for a single mount/unmount stage change
pub const STAGE_CHANGE_TIMEOUT: Duration = Duration::from_millis(1000);

/// Self-powered, remote-wakeup configuration with no interfaces
pub static TEST_CONFIGURATION: [u8; CONFIG_DESC_LEN] = config_descriptor_header(
    1,
    0,
    0,
    CONFIG_DESC_LEN as u16,
    CONFIG_ATT_SELF_POWERED | CONFIG_ATT_REMOTE_WAKEUP,
    100,
);

pub static TEST_DEVICE: DeviceDescriptor = DeviceDescriptor {
    bcd_usb: 0x0200,
    device_class: CLASS_MISC,
    device_subclass: MISC_SUBCLASS_COMMON,
    device_protocol: MISC_PROTOCOL_IAD,
    max_packet_size0: 64,
    vendor_id: 0x303A,
    product_id: 0x4002,
    bcd_device: 0x0100,
    manufacturer_index: 1,
    product_index: 2,
    serial_number_index: 3,
    num_configurations: 1,
};

pub static TEST_QUALIFIER: DeviceQualifier = DeviceQualifier {
    bcd_usb: 0x0200,
    device_class: CLASS_MISC,
    device_subclass: MISC_SUBCLASS_COMMON,
    device_protocol: MISC_PROTOCOL_IAD,
    max_packet_size0: 64,
    num_configurations: 1,
};

/// Descriptor set for a device with no interfaces and no strings
///
/// On high-speed ports the same configuration is served at both speeds.
pub fn zero_interface_descriptor_set(high_speed: bool) -> DescriptorSet<'static> {
    DescriptorSet {
        device: Some(&TEST_DEVICE),
        qualifier: high_speed.then_some(&TEST_QUALIFIER),
        strings: &[],
        string_count: 0,
        full_speed_config: Some(&TEST_CONFIGURATION[..]),
        high_speed_config: high_speed.then_some(&TEST_CONFIGURATION[..]),
    }
}

/// Poll `condition` until it holds or `timeout` elapses
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
}
