use std::fmt::Display;

/// Per-endpoint bookkeeping shared between class drivers and the host.
mod endpoint;
pub use endpoint::{EndpointDirection, EndpointInfo, NakPolicy};

/// Talk to real hardware through libusb.
mod libusb;
pub use libusb::{Error as LibusbError, LibusbHost};

use crate::descriptor::{
    CONFIGURATION_DESCRIPTOR_LEN, DESCRIPTOR_TYPE_CONFIGURATION, DESCRIPTOR_TYPE_DEVICE,
};

/// Standard request codes (USB 2.0, table 9-4).
pub const REQUEST_GET_DESCRIPTOR: u8 = 0x06;
pub const REQUEST_SET_ADDRESS: u8 = 0x05;
pub const REQUEST_SET_CONFIGURATION: u8 = 0x09;

/// A status code reported by the host for a failed transfer.
/// The values follow the MAX3421E host result codes used by most embedded USB hosts.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct HostError(u8);

impl HostError {
    pub const BUSY: Self = Self(0x01);
    pub const BAD_REQUEST: Self = Self(0x02);
    pub const UNDEFINED: Self = Self(0x03);
    pub const NAK: Self = Self(0x04);
    pub const STALL: Self = Self(0x05);
    pub const TOGGLE_ERROR: Self = Self(0x06);
    pub const WRONG_PID: Self = Self(0x07);
    pub const BAD_BYTE_COUNT: Self = Self(0x08);
    pub const CRC_ERROR: Self = Self(0x0b);
    pub const DISCONNECTED: Self = Self(0x0d);
    pub const TIMEOUT: Self = Self(0x0e);
    pub const BABBLE: Self = Self(0x0f);
    pub const TRANSFER_TIMEOUT: Self = Self(0xff);

    pub const fn new(code: u8) -> Self {
        Self(code)
    }

    pub fn code(self) -> u8 {
        self.0
    }

    /// The device answered with NAK: nothing went wrong, the caller should simply try again later.
    pub fn is_busy(self) -> bool {
        self == Self::NAK
    }
}

impl Display for HostError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let description = match *self {
            Self::BUSY => "host busy",
            Self::BAD_REQUEST => "bad request",
            Self::UNDEFINED => "undefined host error",
            Self::NAK => "device busy (NAK)",
            Self::STALL => "endpoint stalled",
            Self::TOGGLE_ERROR => "data toggle mismatch",
            Self::WRONG_PID => "wrong PID",
            Self::BAD_BYTE_COUNT => "bad byte count",
            Self::CRC_ERROR => "CRC error",
            Self::DISCONNECTED => "device disconnected",
            Self::TIMEOUT => "bus timeout",
            Self::BABBLE => "babble",
            Self::TRANSFER_TIMEOUT => "transfer timeout",
            _ => "unknown host error",
        };

        write!(f, "{} ({:#04x})", description, self.0)
    }
}

impl std::error::Error for HostError {}

bitflags! {
    /// The `bmRequestType` field of a setup packet.
    /// An empty set is a host-to-device standard request addressed to the device.
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct RequestType: u8 {
        const DEVICE_TO_HOST = 0b1000_0000;

        const TYPE_CLASS = 0b0010_0000;
        const TYPE_VENDOR = 0b0100_0000;

        const RECIPIENT_INTERFACE = 0b0000_0001;
        const RECIPIENT_ENDPOINT = 0b0000_0010;
        const RECIPIENT_OTHER = 0b0000_0011;
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SetupPacket {
    pub request_type: RequestType,
    pub request: u8,
    pub value: u16,
    pub index: u16,
    pub length: u16,
}

impl SetupPacket {
    pub fn get_descriptor(descriptor_type: u8, index: u8, length: u16) -> Self {
        Self {
            request_type: RequestType::DEVICE_TO_HOST,
            request: REQUEST_GET_DESCRIPTOR,
            value: u16::from_be_bytes([descriptor_type, index]),
            index: 0,
            length,
        }
    }

    pub fn set_address(address: u8) -> Self {
        Self {
            request_type: RequestType::empty(),
            request: REQUEST_SET_ADDRESS,
            value: address.into(),
            index: 0,
            length: 0,
        }
    }

    pub fn set_configuration(value: u8) -> Self {
        Self {
            request_type: RequestType::empty(),
            request: REQUEST_SET_CONFIGURATION,
            value: value.into(),
            index: 0,
            length: 0,
        }
    }

    pub fn is_standard(&self) -> bool {
        !self
            .request_type
            .intersects(RequestType::TYPE_CLASS | RequestType::TYPE_VENDOR)
    }
}

/// Everything a class driver needs from the USB host stack.
///
/// The host owns the device table, the address pool and the actual bus IO.
/// Class drivers receive an implementation at construction and never reach for a global one.
/// The required methods are the primitives; the standard requests needed during enumeration
/// are provided on top of the control transfer primitives and may be overridden by hosts
/// that perform them on their own (e.g. because the operating system already did).
pub trait HostController {
    /// Is there a device table entry for this address?
    fn is_attached(&self, address: u8) -> bool;

    /// Take a fresh (non-hub) address from the pool for a device behind `parent` at `port`.
    fn alloc_address(&mut self, parent: u8, port: u8) -> Option<u8>;

    /// Return an address to the pool.
    fn free_address(&mut self, address: u8);

    /// Mark the device table entry as low-speed (or not).
    fn set_low_speed(&mut self, address: u8, low_speed: bool);

    /// Register the endpoint table the host should use for transfers to this address.
    fn set_endpoints(&mut self, address: u8, endpoints: &[EndpointInfo]) -> Result<(), HostError>;

    /// Perform a control transfer with a device-to-host data stage.
    /// Returns the number of bytes received.
    fn control_in(
        &mut self,
        address: u8,
        control: &mut EndpointInfo,
        setup: &SetupPacket,
        data: &mut [u8],
    ) -> Result<usize, HostError>;

    /// Perform a control transfer with a host-to-device (possibly empty) data stage.
    fn control_out(
        &mut self,
        address: u8,
        control: &mut EndpointInfo,
        setup: &SetupPacket,
        data: &[u8],
    ) -> Result<(), HostError>;

    /// Read up to `data.len()` bytes from a bulk IN endpoint.
    fn bulk_in(
        &mut self,
        address: u8,
        endpoint: &mut EndpointInfo,
        data: &mut [u8],
    ) -> Result<usize, HostError>;

    /// Write `data` to a bulk OUT endpoint. Returns the number of bytes sent.
    fn bulk_out(
        &mut self,
        address: u8,
        endpoint: &mut EndpointInfo,
        data: &[u8],
    ) -> Result<usize, HostError>;

    /// Hosts sitting on top of an operating system have to claim an interface before using it.
    fn claim_interface(&mut self, _address: u8, _interface: u8) -> Result<(), HostError> {
        Ok(())
    }

    /// Read (a prefix of) the device descriptor into `data`.
    fn get_device_descriptor(
        &mut self,
        address: u8,
        control: &mut EndpointInfo,
        data: &mut [u8],
    ) -> Result<usize, HostError> {
        let setup = SetupPacket::get_descriptor(DESCRIPTOR_TYPE_DEVICE, 0, data.len() as u16);
        self.control_in(address, control, &setup, data)
    }

    fn set_address(
        &mut self,
        address: u8,
        control: &mut EndpointInfo,
        new_address: u8,
    ) -> Result<(), HostError> {
        self.control_out(address, control, &SetupPacket::set_address(new_address), &[])
    }

    fn set_configuration(
        &mut self,
        address: u8,
        control: &mut EndpointInfo,
        value: u8,
    ) -> Result<(), HostError> {
        self.control_out(address, control, &SetupPacket::set_configuration(value), &[])
    }

    /// Read the complete configuration descriptor (including all interface and endpoint
    /// descriptors) with the given index.
    /// The header is fetched first to learn `wTotalLength`, then the whole block.
    fn get_conf_descr(
        &mut self,
        address: u8,
        control: &mut EndpointInfo,
        index: u8,
    ) -> Result<Vec<u8>, HostError> {
        let mut header = [0u8; CONFIGURATION_DESCRIPTOR_LEN];
        let setup = SetupPacket::get_descriptor(
            DESCRIPTOR_TYPE_CONFIGURATION,
            index,
            CONFIGURATION_DESCRIPTOR_LEN as u16,
        );
        let header_len = self.control_in(address, control, &setup, &mut header)?;

        if header_len < 4 {
            return Ok(header[..header_len].to_vec());
        }

        let total_len = u16::from_le_bytes([header[2], header[3]]);
        let mut data = vec![0u8; total_len as usize];

        let setup = SetupPacket::get_descriptor(DESCRIPTOR_TYPE_CONFIGURATION, index, total_len);
        let len = self.control_in(address, control, &setup, &mut data)?;
        data.truncate(len);

        Ok(data)
    }
}
