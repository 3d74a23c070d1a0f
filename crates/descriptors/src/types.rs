//! USB descriptor types
//!
//! Device and device-qualifier descriptors are kept as plain structs and only
//! rendered to their wire layout on request. Configuration descriptors are
//! opaque caller-owned byte buffers; [`ConfigHeader`] reads the fixed 9-byte
//! header without copying the rest.

use crate::error::{DescriptorError, Result};
use byteorder::{ByteOrder, LittleEndian};

/// bDescriptorType values
pub const DESC_DEVICE: u8 = 0x01;
pub const DESC_CONFIGURATION: u8 = 0x02;
pub const DESC_STRING: u8 = 0x03;
pub const DESC_DEVICE_QUALIFIER: u8 = 0x06;

/// Miscellaneous device class, used with interface association descriptors
pub const CLASS_MISC: u8 = 0xEF;
pub const MISC_SUBCLASS_COMMON: u8 = 0x02;
pub const MISC_PROTOCOL_IAD: u8 = 0x01;

/// bmAttributes bits of a configuration descriptor
pub const CONFIG_ATT_SELF_POWERED: u8 = 1 << 6;
pub const CONFIG_ATT_REMOTE_WAKEUP: u8 = 1 << 5;
// Bit 7 must always be set (USB 2.0, 9.6.3)
const CONFIG_ATT_RESERVED: u8 = 1 << 7;

/// Length of a configuration descriptor header
pub const CONFIG_DESC_LEN: usize = 9;

/// Largest bMaxPower a configuration can declare, in mA
pub const MAX_POWER_MA: u16 = 500;

/// Valid bMaxPacketSize0 values for full/high-speed devices
const EP0_SIZES: [u8; 4] = [8, 16, 32, 64];

/// Bus speed a resolved descriptor set will enumerate at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceSpeed {
    /// 12 Mbit/s
    Full,
    /// 480 Mbit/s
    High,
}

/// Standard device descriptor (USB 2.0, 9.6.1)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub bcd_usb: u16,
    pub device_class: u8,
    pub device_subclass: u8,
    pub device_protocol: u8,
    pub max_packet_size0: u8,
    pub vendor_id: u16,
    pub product_id: u16,
    pub bcd_device: u16,
    pub manufacturer_index: u8,
    pub product_index: u8,
    pub serial_number_index: u8,
    pub num_configurations: u8,
}

impl DeviceDescriptor {
    pub const LEN: usize = 18;

    /// Render the descriptor in wire layout
    pub fn to_bytes(&self) -> [u8; Self::LEN] {
        let mut buf = [0u8; Self::LEN];
        buf[0] = Self::LEN as u8;
        buf[1] = DESC_DEVICE;
        LittleEndian::write_u16(&mut buf[2..4], self.bcd_usb);
        buf[4] = self.device_class;
        buf[5] = self.device_subclass;
        buf[6] = self.device_protocol;
        buf[7] = self.max_packet_size0;
        LittleEndian::write_u16(&mut buf[8..10], self.vendor_id);
        LittleEndian::write_u16(&mut buf[10..12], self.product_id);
        LittleEndian::write_u16(&mut buf[12..14], self.bcd_device);
        buf[14] = self.manufacturer_index;
        buf[15] = self.product_index;
        buf[16] = self.serial_number_index;
        buf[17] = self.num_configurations;
        buf
    }

    /// Check the fields a stack cannot enumerate without
    pub fn validate(&self) -> Result<()> {
        if !EP0_SIZES.contains(&self.max_packet_size0) {
            return Err(DescriptorError::Malformed(format!(
                "bMaxPacketSize0 {} is not one of {:?}",
                self.max_packet_size0, EP0_SIZES
            )));
        }
        if self.num_configurations == 0 {
            return Err(DescriptorError::Malformed(
                "device declares zero configurations".to_string(),
            ));
        }
        Ok(())
    }
}

/// Device qualifier descriptor (USB 2.0, 9.6.2)
///
/// Describes how a high-speed capable device would behave at the other speed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceQualifier {
    pub bcd_usb: u16,
    pub device_class: u8,
    pub device_subclass: u8,
    pub device_protocol: u8,
    pub max_packet_size0: u8,
    pub num_configurations: u8,
}

impl DeviceQualifier {
    pub const LEN: usize = 10;

    /// Render the descriptor in wire layout
    pub fn to_bytes(&self) -> [u8; Self::LEN] {
        let mut buf = [0u8; Self::LEN];
        buf[0] = Self::LEN as u8;
        buf[1] = DESC_DEVICE_QUALIFIER;
        LittleEndian::write_u16(&mut buf[2..4], self.bcd_usb);
        buf[4] = self.device_class;
        buf[5] = self.device_subclass;
        buf[6] = self.device_protocol;
        buf[7] = self.max_packet_size0;
        buf[8] = self.num_configurations;
        // buf[9] is bReserved
        buf
    }
}

/// Build a configuration descriptor header
///
/// Arguments follow the usual configuration macro order: configuration
/// number, interface count, string index, total length, attributes and
/// maximum power in mA. Power above [`MAX_POWER_MA`] is clamped to it.
pub const fn config_descriptor_header(
    config_num: u8,
    interface_count: u8,
    string_index: u8,
    total_len: u16,
    attributes: u8,
    power_ma: u16,
) -> [u8; CONFIG_DESC_LEN] {
    let len = total_len.to_le_bytes();
    let power_ma = if power_ma > MAX_POWER_MA {
        MAX_POWER_MA
    } else {
        power_ma
    };
    [
        CONFIG_DESC_LEN as u8,
        DESC_CONFIGURATION,
        len[0],
        len[1],
        interface_count,
        config_num,
        string_index,
        CONFIG_ATT_RESERVED | attributes,
        (power_ma / 2) as u8,
    ]
}

/// Decoded fixed header of a configuration descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigHeader {
    pub total_length: u16,
    pub num_interfaces: u8,
    pub configuration_value: u8,
    pub attributes: u8,
    pub max_power_ma: u16,
}

impl ConfigHeader {
    /// Parse and validate the header of a configuration descriptor buffer
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < CONFIG_DESC_LEN {
            return Err(DescriptorError::Malformed(format!(
                "configuration descriptor is {} bytes, header needs {}",
                bytes.len(),
                CONFIG_DESC_LEN
            )));
        }
        if bytes[0] as usize != CONFIG_DESC_LEN || bytes[1] != DESC_CONFIGURATION {
            return Err(DescriptorError::Malformed(format!(
                "bad configuration header: bLength={} bDescriptorType={:#04x}",
                bytes[0], bytes[1]
            )));
        }

        let total_length = LittleEndian::read_u16(&bytes[2..4]);
        if (total_length as usize) < CONFIG_DESC_LEN || total_length as usize > bytes.len() {
            return Err(DescriptorError::Malformed(format!(
                "wTotalLength {} does not fit a {}-byte buffer",
                total_length,
                bytes.len()
            )));
        }

        Ok(Self {
            total_length,
            num_interfaces: bytes[4],
            configuration_value: bytes[5],
            attributes: bytes[7],
            max_power_ma: bytes[8] as u16 * 2,
        })
    }

    pub fn self_powered(&self) -> bool {
        self.attributes & CONFIG_ATT_SELF_POWERED != 0
    }

    pub fn remote_wakeup(&self) -> bool {
        self.attributes & CONFIG_ATT_REMOTE_WAKEUP != 0
    }
}
