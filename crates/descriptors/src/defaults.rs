//! Build-time default descriptors
//!
//! Used whenever the caller installs the driver without a descriptor set, or
//! with a set that leaves the device descriptor out.

use crate::assembler::DescriptorSet;
use crate::strings::LANGUAGE_EN_US;
use crate::types::{
    CLASS_MISC, CONFIG_DESC_LEN, DeviceDescriptor, DeviceQualifier, MISC_PROTOCOL_IAD,
    MISC_SUBCLASS_COMMON, config_descriptor_header,
};

/// Espressif's USB vendor id
pub const USB_ESPRESSIF_VID: u16 = 0x303A;

pub const DEFAULT_PRODUCT_ID: u16 = 0x4002;
pub const DEFAULT_BCD_DEVICE: u16 = 0x0100;
pub const DEFAULT_EP0_SIZE: u8 = 64;

pub const DEFAULT_MANUFACTURER: &str = "Espressif Systems";
pub const DEFAULT_PRODUCT: &str = "Espressif Device";
pub const DEFAULT_SERIAL: &str = "123456";

pub static DEFAULT_DEVICE: DeviceDescriptor = DeviceDescriptor {
    bcd_usb: 0x0200,
    device_class: CLASS_MISC,
    device_subclass: MISC_SUBCLASS_COMMON,
    device_protocol: MISC_PROTOCOL_IAD,
    max_packet_size0: DEFAULT_EP0_SIZE,
    vendor_id: USB_ESPRESSIF_VID,
    product_id: DEFAULT_PRODUCT_ID,
    bcd_device: DEFAULT_BCD_DEVICE,
    manufacturer_index: 1,
    product_index: 2,
    serial_number_index: 3,
    num_configurations: 1,
};

pub static DEFAULT_QUALIFIER: DeviceQualifier = DeviceQualifier {
    bcd_usb: 0x0200,
    device_class: CLASS_MISC,
    device_subclass: MISC_SUBCLASS_COMMON,
    device_protocol: MISC_PROTOCOL_IAD,
    max_packet_size0: DEFAULT_EP0_SIZE,
    num_configurations: 1,
};

pub static DEFAULT_STRINGS: [&str; 4] = [
    LANGUAGE_EN_US,
    DEFAULT_MANUFACTURER,
    DEFAULT_PRODUCT,
    DEFAULT_SERIAL,
];

/// Zero-interface, bus-powered, 100 mA configuration
pub static DEFAULT_CONFIG: [u8; CONFIG_DESC_LEN] =
    config_descriptor_header(1, 0, 0, CONFIG_DESC_LEN as u16, 0, 100);

/// The complete default set for a port
///
/// High-speed capable ports also get the qualifier and a high-speed
/// configuration so the set enumerates at either speed.
pub fn default_set(high_speed_capable: bool) -> DescriptorSet<'static> {
    DescriptorSet {
        device: Some(&DEFAULT_DEVICE),
        qualifier: high_speed_capable.then_some(&DEFAULT_QUALIFIER),
        strings: &DEFAULT_STRINGS,
        string_count: DEFAULT_STRINGS.len(),
        full_speed_config: Some(&DEFAULT_CONFIG[..]),
        high_speed_config: high_speed_capable.then_some(&DEFAULT_CONFIG[..]),
    }
}
