use crate::descriptor::InterfaceFilter;
use crate::host::HostController;

use chrono::{DateTime, Utc};

/// The error taxonomy of the driver, convertible into the numeric status codes of the host stack.
mod error;
pub use error::Error;

/// The fixed three-slot endpoint table, indexed by role.
mod endpoint;
pub use endpoint::{EndpointRole, EndpointTable};

/// Tunables (NAK policies, poll interval).
mod config;
pub use config::Config;

/// An extension point run once enumeration has succeeded.
mod hook;
pub use hook::InitHook;

/// Enumerate the device, pick the printer interface and extract its endpoints.
mod attach;
pub use attach::Lifecycle;

/// Bulk transfers and the byte-stream view on top of them.
mod io;
pub use io::{ByteStream, READ_BUFFER_SIZE};

/// Class-specific control requests: port status, device ID and soft reset.
mod status;
pub use status::{DeviceId, PortStatus, STATUS_SENTINEL};

/// USB class code for printers.
pub const CLASS_PRINTER: u8 = 0x07;

/// The only subclass defined for printers.
pub const SUBCLASS_PRINTER: u8 = 0x01;

/// Interface protocols of the printer class.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Protocol {
    Unidirectional = 0x01,
    Bidirectional = 0x02,
    Ieee1284_4 = 0x03,
}

impl Protocol {
    pub fn filter(self) -> InterfaceFilter {
        InterfaceFilter {
            class: CLASS_PRINTER,
            sub_class: SUBCLASS_PRINTER,
            protocol: self as u8,
        }
    }
}

/// Everything the driver knows about the attached device.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Session {
    /// 0 means "not attached".
    address: u8,
    configuration: u8,
    configuration_index: u8,
    interface: u8,
    alternate_setting: u8,
    /// Includes the control endpoint.
    endpoint_count: u8,
    bidirectional: bool,
    ready: bool,
    next_poll: Option<DateTime<Utc>>,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            address: 0,
            configuration: 0,
            configuration_index: 0,
            interface: 0,
            alternate_setting: 0,
            endpoint_count: 1,
            bidirectional: false,
            ready: false,
            next_poll: None,
        }
    }
}

/// A class driver for USB printers, running on top of a `HostController`.
///
/// The driver is not re-entrant: every operation takes `&mut self` and runs to completion
/// on the caller's thread. Any transfer failure other than a NAK tears the session down;
/// callers notice through `is_ready()` and attach again.
pub struct PrinterDriver<H: HostController> {
    host: H,
    hook: Option<Box<dyn InitHook<H>>>,
    config: Config,
    endpoints: EndpointTable,
    session: Session,
    read_buffer: io::ReadBuffer,
}

impl<H: HostController> PrinterDriver<H> {
    pub fn new(host: H) -> Self {
        Self::with_config(host, Config::default())
    }

    pub fn with_config(host: H, config: Config) -> Self {
        Self {
            host,
            hook: None,
            endpoints: EndpointTable::new(&config),
            config,
            session: Session::default(),
            read_buffer: io::ReadBuffer::default(),
        }
    }

    /// Install the hook that may veto (or further configure) a freshly enumerated device.
    pub fn set_hook(&mut self, hook: Box<dyn InitHook<H>>) {
        self.hook = Some(hook);
    }

    /// Changes to the NAK policies take effect at the next release.
    pub fn config(&mut self) -> &mut Config {
        &mut self.config
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    /// The address assigned by the host, or 0 if nothing is attached.
    pub fn address(&self) -> u8 {
        self.session.address
    }

    pub fn is_ready(&self) -> bool {
        self.session.ready
    }

    pub fn is_bidirectional(&self) -> bool {
        self.session.bidirectional
    }

    pub fn configuration(&self) -> u8 {
        self.session.configuration
    }

    pub fn interface(&self) -> u8 {
        self.session.interface
    }

    pub fn endpoint_count(&self) -> u8 {
        self.session.endpoint_count
    }

    pub fn endpoint(&self, role: EndpointRole) -> &crate::host::EndpointInfo {
        &self.endpoints[role]
    }

    pub fn next_poll(&self) -> Option<DateTime<Utc>> {
        self.session.next_poll
    }

    /// Transfers need an address; the init hook runs before the session is marked ready.
    fn ensure_attached(&self) -> Result<(), Error> {
        if self.session.address == 0 {
            Err(Error::NotAttached)
        } else {
            Ok(())
        }
    }

    /// Tear the session down unless the host merely reported the device as busy.
    fn on_transfer_error(&mut self, err: crate::host::HostError, what: &str) -> Error {
        if !err.is_busy() {
            log::warn!(
                "{} failed on device {}: {}. Releasing the device.",
                what,
                self.session.address,
                err
            );
            self.release();
        }

        Error::Host(err)
    }
}
