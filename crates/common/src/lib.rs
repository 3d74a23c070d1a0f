//! Common utilities for usbd-driver
//!
//! This crate provides what the descriptor and driver crates share: the
//! error classification, logging setup, the single-slot signal used to wait
//! for connection stage changes and task exit, and test fixtures.

pub mod error;
pub mod logging;
pub mod signal;
pub mod test_utils;

pub use error::{Error, ErrorKind, Result};
pub use logging::{setup_logging, setup_test_logging};
pub use signal::Signal;
