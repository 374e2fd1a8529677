use crate::descriptor::Error as DescriptorError;
use crate::host::HostError;

use std::fmt::Display;

/// Status codes of the host stack's device-configuration layer.
pub const DEV_CONFIG_ERROR_DEVICE_NOT_SUPPORTED: u8 = 0xd1;
pub const DEV_CONFIG_ERROR_DEVICE_INIT_INCOMPLETE: u8 = 0xd2;
pub const ERROR_OUT_OF_ADDRESS_SPACE_IN_POOL: u8 = 0xd4;
pub const ERROR_ADDRESS_NOT_FOUND_IN_POOL: u8 = 0xd6;
pub const ERROR_INVALID_ARGUMENT: u8 = 0xd8;
pub const ERROR_CLASS_INSTANCE_ALREADY_IN_USE: u8 = 0xd9;
pub const ERROR_INVALID_MAX_PKT_SIZE: u8 = 0xda;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Error {
    /// No configuration offers a printer interface with a usable endpoint set.
    DeviceNotSupported,
    /// The operation needs an attached device.
    NotAttached,
    OutOfAddressSpaceInPool,
    AddressNotFoundInPool,
    MalformedDescriptor(DescriptorError),
    ClassInstanceAlreadyInUse,
    InvalidMaxPacketSize,
    /// The init hook refused the device with this code. A code of 0 is reported as
    /// `DEV_CONFIG_ERROR_DEVICE_INIT_INCOMPLETE`.
    HookRejected(u8),
    Host(HostError),
}

impl Error {
    /// The numeric status code reported to the host's device table.
    pub fn code(&self) -> u8 {
        use Error::*;

        match self {
            DeviceNotSupported => DEV_CONFIG_ERROR_DEVICE_NOT_SUPPORTED,
            NotAttached => DEV_CONFIG_ERROR_DEVICE_INIT_INCOMPLETE,
            OutOfAddressSpaceInPool => ERROR_OUT_OF_ADDRESS_SPACE_IN_POOL,
            AddressNotFoundInPool => ERROR_ADDRESS_NOT_FOUND_IN_POOL,
            MalformedDescriptor(_) => ERROR_INVALID_ARGUMENT,
            ClassInstanceAlreadyInUse => ERROR_CLASS_INSTANCE_ALREADY_IN_USE,
            InvalidMaxPacketSize => ERROR_INVALID_MAX_PKT_SIZE,
            // 0 reads as success on the host's device table.
            HookRejected(0) => DEV_CONFIG_ERROR_DEVICE_INIT_INCOMPLETE,
            HookRejected(code) => *code,
            Host(inner) => inner.code(),
        }
    }

    /// Only a NAK from the device is worth retrying.
    pub fn is_busy(&self) -> bool {
        matches!(self, Error::Host(inner) if inner.is_busy())
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use Error::*;

        match self {
            DeviceNotSupported => write!(
                f,
                "The device offers no printer interface with a usable set of bulk endpoints."
            ),
            NotAttached => write!(f, "No printer is attached."),
            OutOfAddressSpaceInPool => write!(f, "The host has no free USB address left."),
            AddressNotFoundInPool => write!(f, "The host has no device at this address."),
            MalformedDescriptor(inner) => write!(f, "A descriptor is malformed: {}", inner),
            ClassInstanceAlreadyInUse => {
                write!(f, "This driver instance is already bound to a device.")
            }
            InvalidMaxPacketSize => {
                write!(f, "The device reports a control packet size of zero.")
            }
            HookRejected(code) => write!(
                f,
                "The initialization hook rejected the device ({:#04x}).",
                code
            ),
            Host(inner) => write!(f, "An USB transfer has failed: {}", inner),
        }
    }
}

impl std::error::Error for Error {}

impl From<HostError> for Error {
    fn from(value: HostError) -> Self {
        Error::Host(value)
    }
}

impl From<DescriptorError> for Error {
    fn from(value: DescriptorError) -> Self {
        Error::MalformedDescriptor(value)
    }
}
