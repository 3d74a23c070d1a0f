//! USB device stack interface
//!
//! Enumeration, transfers and class drivers live in an external stack. The
//! driver only needs to bring it up, pump its events and tear it down.

use crate::hal::Port;
use crate::monitor::ConnectionMonitor;
use descriptors::ResolvedDescriptors;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("USB stack error: {0}")]
pub struct StackError(pub String);

/// The device stack managed by [`crate::UsbDriver`]
///
/// `init` and `deinit` run on the thread calling install/uninstall;
/// `process_events` runs on the event task. The stack reports VBUS and
/// mount/unmount transitions through the [`ConnectionMonitor`] it is handed
/// at init, always from inside `process_events`.
pub trait UsbStack: Send + 'static {
    /// Bring the stack up on `port`, serving `descriptors`
    ///
    /// The descriptors borrow caller buffers that stay valid until `deinit`.
    fn init(
        &mut self,
        port: Port,
        descriptors: ResolvedDescriptors<'static>,
        monitor: ConnectionMonitor,
    ) -> Result<(), StackError>;

    /// Handle pending events, waiting at most `timeout` for one to arrive
    fn process_events(&mut self, timeout: Duration) -> Result<(), StackError>;

    fn deinit(&mut self) -> Result<(), StackError>;
}
