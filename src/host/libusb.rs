use super::{EndpointInfo, HostController, HostError, SetupPacket};

use std::fmt::Display;
use std::time::Duration;

use rusb::{DeviceHandle, GlobalContext};

/// USB class code for printers.
const CLASS_PRINTER: u8 = 0x07;

/// The address we pretend to hand out. The operating system did the real enumeration already.
const VIRTUAL_ADDRESS: u8 = 1;

const DEFAULT_IO_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Copy, Clone)]
pub enum Error {
    USBError(rusb::Error),
    NoPrinter,
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use Error::*;

        match self {
            USBError(inner) => write!(f, "An USB error has occurred: {}", inner),
            NoPrinter => write!(f, "No printer has been found."),
        }
    }
}

impl std::error::Error for Error {}

impl From<rusb::Error> for Error {
    fn from(err: rusb::Error) -> Self {
        Error::USBError(err)
    }
}

impl From<rusb::Error> for HostError {
    fn from(err: rusb::Error) -> Self {
        use rusb::Error::*;

        match err {
            // libusb gave up waiting: the device kept NAKing, so report it as busy.
            Timeout => HostError::NAK,
            Pipe => HostError::STALL,
            Overflow => HostError::BABBLE,
            NoDevice => HostError::DISCONNECTED,
            Busy => HostError::BUSY,
            InvalidParam => HostError::BAD_REQUEST,
            _ => HostError::UNDEFINED,
        }
    }
}

/// A bulk OUT timeout may hit after part of the data went out, so retrying the whole
/// transfer would duplicate it. Unlike other timeouts it is not reported as busy.
fn bulk_out_error(err: rusb::Error) -> HostError {
    match err {
        rusb::Error::Timeout => HostError::TRANSFER_TIMEOUT,
        err => err.into(),
    }
}

/// Does any interface of the active configuration belong to the printer class?
fn is_printer(device: &rusb::Device<GlobalContext>) -> bool {
    let Ok(config_desc) = device.active_config_descriptor() else {
        return false;
    };

    config_desc.interfaces().any(|interface| {
        interface
            .descriptors()
            .any(|desc| desc.class_code() == CLASS_PRINTER)
    })
}

/// A host controller backed by libusb.
///
/// The operating system has already enumerated the device, so the address pool is emulated:
/// the device answers at address 0 until the driver moves it to the single virtual address.
/// Standard requests that would disturb the kernel's view (`SET_ADDRESS`) are swallowed.
pub struct LibusbHost {
    handle: DeviceHandle<GlobalContext>,
    address: u8,
    allocated: bool,
    claimed_interface: Option<u8>,
    io_timeout: Duration,
}

impl LibusbHost {
    /// Open the first device offering a printer interface.
    /// If `filter` is given, the device must also match the vendor and product ID.
    pub fn open_printer(filter: Option<(u16, u16)>) -> Result<Self, Error> {
        let device = rusb::DeviceList::new()?
            .iter()
            .find(|device| {
                // Skip devices whose descriptor cannot be read.
                let Ok(device_desc) = device.device_descriptor() else {
                    return false;
                };

                let ids_match = filter.map_or(true, |(vendor_id, product_id)| {
                    device_desc.vendor_id() == vendor_id && device_desc.product_id() == product_id
                });

                ids_match && is_printer(device)
            })
            .ok_or(Error::NoPrinter)?;

        let handle = device.open()?;

        // Ensure that a potential kernel driver (usblp) is detached and later reattached.
        // Not every platform supports this, which is fine.
        match handle.set_auto_detach_kernel_driver(true) {
            Ok(()) | Err(rusb::Error::NotSupported) => (),
            Err(err) => return Err(err.into()),
        }

        log::debug!(
            "Opened printer on bus {} at OS address {}",
            device.bus_number(),
            device.address()
        );

        Ok(Self {
            handle,
            address: 0,
            allocated: false,
            claimed_interface: None,
            io_timeout: DEFAULT_IO_TIMEOUT,
        })
    }

    pub fn set_io_timeout(&mut self, io_timeout: Duration) {
        self.io_timeout = io_timeout;
    }

    pub fn handle(&self) -> &DeviceHandle<GlobalContext> {
        &self.handle
    }

    fn check_address(&self, address: u8) -> Result<(), HostError> {
        if address == self.address {
            Ok(())
        } else {
            Err(HostError::DISCONNECTED)
        }
    }
}

impl HostController for LibusbHost {
    fn is_attached(&self, address: u8) -> bool {
        address == 0 || (self.allocated && address == VIRTUAL_ADDRESS)
    }

    fn alloc_address(&mut self, _parent: u8, _port: u8) -> Option<u8> {
        if self.allocated {
            return None;
        }

        self.allocated = true;
        Some(VIRTUAL_ADDRESS)
    }

    fn free_address(&mut self, address: u8) {
        if address != VIRTUAL_ADDRESS || !self.allocated {
            return;
        }

        if let Some(interface) = self.claimed_interface.take() {
            if let Err(err) = self.handle.release_interface(interface) {
                log::warn!("Failed to release interface {}: {}", interface, err);
            }
        }

        self.allocated = false;
        self.address = 0;
    }

    fn set_low_speed(&mut self, _address: u8, _low_speed: bool) {
        // libusb knows the speed of the device.
    }

    fn set_endpoints(&mut self, address: u8, _endpoints: &[EndpointInfo]) -> Result<(), HostError> {
        self.check_address(address)
    }

    fn control_in(
        &mut self,
        address: u8,
        _control: &mut EndpointInfo,
        setup: &SetupPacket,
        data: &mut [u8],
    ) -> Result<usize, HostError> {
        self.check_address(address)?;

        let len = usize::from(setup.length).min(data.len());

        Ok(self.handle.read_control(
            setup.request_type.bits(),
            setup.request,
            setup.value,
            setup.index,
            &mut data[..len],
            self.io_timeout,
        )?)
    }

    fn control_out(
        &mut self,
        address: u8,
        _control: &mut EndpointInfo,
        setup: &SetupPacket,
        data: &[u8],
    ) -> Result<(), HostError> {
        self.check_address(address)?;

        self.handle.write_control(
            setup.request_type.bits(),
            setup.request,
            setup.value,
            setup.index,
            data,
            self.io_timeout,
        )?;

        Ok(())
    }

    fn bulk_in(
        &mut self,
        address: u8,
        endpoint: &mut EndpointInfo,
        data: &mut [u8],
    ) -> Result<usize, HostError> {
        self.check_address(address)?;
        Ok(self
            .handle
            .read_bulk(endpoint.wire_address(), data, self.io_timeout)?)
    }

    fn bulk_out(
        &mut self,
        address: u8,
        endpoint: &mut EndpointInfo,
        data: &[u8],
    ) -> Result<usize, HostError> {
        self.check_address(address)?;

        let written_bytes = self
            .handle
            .write_bulk(endpoint.wire_address(), data, self.io_timeout)
            .map_err(bulk_out_error)?;

        if written_bytes != data.len() {
            log::warn!(
                "Number of written bytes does not equal the input slice (expected {}, got {}).",
                data.len(),
                written_bytes
            );
        }

        Ok(written_bytes)
    }

    fn claim_interface(&mut self, address: u8, interface: u8) -> Result<(), HostError> {
        self.check_address(address)?;

        self.handle.claim_interface(interface)?;
        self.claimed_interface = Some(interface);

        Ok(())
    }

    fn set_address(
        &mut self,
        address: u8,
        _control: &mut EndpointInfo,
        new_address: u8,
    ) -> Result<(), HostError> {
        self.check_address(address)?;

        // The kernel owns the real address; only move our virtual one.
        self.address = new_address;
        Ok(())
    }

    fn set_configuration(
        &mut self,
        address: u8,
        _control: &mut EndpointInfo,
        value: u8,
    ) -> Result<(), HostError> {
        self.check_address(address)?;

        // Reselecting the active configuration would reset the device behind the kernel's back.
        if self.handle.active_configuration()? != value {
            self.handle.set_active_configuration(value)?;
        }

        Ok(())
    }
}
