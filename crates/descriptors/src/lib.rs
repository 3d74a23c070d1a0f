//! USB device descriptors for usbd-driver
//!
//! This crate owns the descriptor data model: device and qualifier
//! descriptors, the bounded string table, configuration descriptor headers,
//! the build-time default set and the assembler that validates a
//! caller-supplied set against a port's capabilities.
//!
//! # Example
//!
//! ```
//! use descriptors::{DescriptorSet, DeviceSpeed, assemble, config_descriptor_header};
//! use descriptors::defaults::DEFAULT_DEVICE;
//!
//! static CONFIG: [u8; 9] = config_descriptor_header(1, 0, 0, 9, 0, 100);
//!
//! let set = DescriptorSet {
//!     device: Some(&DEFAULT_DEVICE),
//!     full_speed_config: Some(&CONFIG[..]),
//!     ..Default::default()
//! };
//!
//! let resolved = assemble(Some(set), false).unwrap();
//! assert_eq!(resolved.speed(), DeviceSpeed::Full);
//! assert!(resolved.strings().get(0).is_none());
//! ```

pub mod assembler;
pub mod defaults;
pub mod error;
pub mod strings;
pub mod types;

pub use assembler::{DescriptorSet, ResolvedDescriptors, assemble};
pub use error::{DescriptorError, Result};
pub use strings::{LANGUAGE_EN_US, MAX_STRING_DESCRIPTORS, MAX_STRING_LEN, StringTable};
pub use types::{
    CONFIG_ATT_REMOTE_WAKEUP, CONFIG_ATT_SELF_POWERED, CONFIG_DESC_LEN, ConfigHeader,
    DeviceDescriptor, DeviceQualifier, DeviceSpeed, MAX_POWER_MA, config_descriptor_header,
};
