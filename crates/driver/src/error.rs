//! Driver error types

use crate::hal::Port;
use crate::phy::PhyError;
use crate::stack::StackError;
use common::ErrorKind;
use descriptors::DescriptorError;
use std::time::Duration;
use thiserror::Error;

/// Operation not valid in the driver's current state
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LifecycleError {
    #[error("USB driver is already installed on {port}")]
    AlreadyInstalled { port: Port },

    #[error("USB driver is not installed")]
    NotInstalled,

    /// Install, uninstall and stack access would wait on the task making
    /// the call
    #[error("{operation} is not allowed from the USB event task on {port}")]
    OnEventTask {
        operation: &'static str,
        port: Port,
    },
}

#[derive(Debug, Error)]
pub enum InstallError {
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    Phy(#[from] PhyError),

    #[error(transparent)]
    Descriptor(#[from] DescriptorError),

    #[error(transparent)]
    Stack(#[from] StackError),

    #[error("Failed to spawn USB event task: {0}")]
    TaskSpawn(#[source] std::io::Error),
}

impl InstallError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            InstallError::Lifecycle(_) => ErrorKind::Lifecycle,
            InstallError::Phy(PhyError::PortInUse { .. }) => ErrorKind::Lifecycle,
            InstallError::Phy(PhyError::HardwareFault(_)) => ErrorKind::Hardware,
            InstallError::Phy(_) => ErrorKind::Configuration,
            InstallError::Descriptor(_) => ErrorKind::Configuration,
            InstallError::Stack(_) => ErrorKind::Hardware,
            // Platform resource exhaustion; the install was rolled back
            InstallError::TaskSpawn(_) => ErrorKind::Hardware,
        }
    }
}

#[derive(Debug, Error)]
pub enum UninstallError {
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    /// The event task never acknowledged the stop request. The stack and PHY
    /// are still claimed; only a restart recovers.
    #[error("USB event task on {port} did not stop within {timeout:?}")]
    TaskStopTimeout { port: Port, timeout: Duration },

    /// Stack teardown failed; the PHY was still released
    #[error(transparent)]
    Stack(#[from] StackError),
}

impl UninstallError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            UninstallError::Lifecycle(_) => ErrorKind::Lifecycle,
            UninstallError::TaskStopTimeout { .. } => ErrorKind::InternalFatal,
            UninstallError::Stack(_) => ErrorKind::Hardware,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::HardwareFault;

    #[test]
    fn test_install_error_kinds() {
        let err = InstallError::from(PhyError::InvalidPort {
            port: Port(3),
            available: 1,
        });
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(err.to_string().contains("port 3"));

        let err = InstallError::from(PhyError::HardwareFault(HardwareFault("no clock".into())));
        assert_eq!(err.kind(), ErrorKind::Hardware);

        let err = InstallError::from(DescriptorError::Inconsistent("x".into()));
        assert_eq!(err.kind(), ErrorKind::Configuration);

        let err = InstallError::from(LifecycleError::AlreadyInstalled { port: Port(0) });
        assert_eq!(err.kind(), ErrorKind::Lifecycle);

        let err = InstallError::from(PhyError::PortInUse { port: Port(0) });
        assert_eq!(err.kind(), ErrorKind::Lifecycle);
    }

    #[test]
    fn test_uninstall_timeout_is_fatal() {
        let err = UninstallError::TaskStopTimeout {
            port: Port(0),
            timeout: Duration::from_secs(1),
        };
        assert!(err.kind().is_fatal());
        assert!(err.to_string().contains("did not stop"));
    }
}
