use super::{EndpointRole, EndpointTable, Error, PrinterDriver, Protocol, Session};
use crate::descriptor::{
    self, ConfigParser, DescriptorVisitor, DeviceDescriptor, EndpointDescriptor,
    DEVICE_DESCRIPTOR_LEN, DEVICE_DESCRIPTOR_PREFIX_LEN,
};
use crate::host::HostController;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use rusb::{Direction, TransferType};

/// The hooks the host stack calls while a device comes and goes.
pub trait Lifecycle {
    /// Enumerate and configure the device waiting at address 0.
    /// On failure everything acquired so far is released again.
    fn init(&mut self, parent: u8, port: u8, low_speed: bool) -> Result<(), Error>;

    /// Give the device up. Safe to call at any time, any number of times.
    fn release(&mut self);

    /// Called periodically by the host.
    fn poll(&mut self) -> Result<(), Error>;
}

impl<H: HostController> Lifecycle for PrinterDriver<H> {
    fn init(&mut self, parent: u8, port: u8, low_speed: bool) -> Result<(), Error> {
        debug!("USB printer init (parent {}, port {})", parent, port);

        if self.session.address != 0 {
            return Err(Error::ClassInstanceAlreadyInUse);
        }

        if !self.host.is_attached(0) {
            return Err(Error::AddressNotFoundInPool);
        }

        match self.enumerate(parent, port, low_speed) {
            Ok(()) => {
                info!(
                    "USB printer configured at address {} ({}, configuration {}, interface {})",
                    self.session.address,
                    if self.session.bidirectional {
                        "bidirectional"
                    } else {
                        "unidirectional"
                    },
                    self.session.configuration,
                    self.session.interface
                );

                Ok(())
            }

            Err(err) => {
                warn!("USB printer init failed: {} ({:#04x})", err, err.code());
                self.release();
                Err(err)
            }
        }
    }

    fn release(&mut self) {
        self.session.ready = false;

        if self.session.address != 0 {
            debug!("Releasing USB printer at address {}", self.session.address);
            self.host.free_address(self.session.address);
        }

        self.session = Session::default();
        self.endpoints = EndpointTable::new(&self.config);
        self.read_buffer.clear();
    }

    fn poll(&mut self) -> Result<(), Error> {
        self.poll_at(Utc::now());
        Ok(())
    }
}

impl<H: HostController> PrinterDriver<H> {
    /// Nothing to do on the bus yet; only keep the poll schedule of a ready device current.
    pub fn poll_at(&mut self, now: DateTime<Utc>) {
        if !self.session.ready {
            return;
        }

        if self.session.next_poll.map_or(true, |next| next <= now) {
            self.session.next_poll = Some(now + self.config.poll_interval);
        }
    }

    fn enumerate(&mut self, parent: u8, port: u8, low_speed: bool) -> Result<(), Error> {
        let mut buf = [0u8; DEVICE_DESCRIPTOR_LEN];

        // Learn the control packet size from the descriptor prefix. Using our own control
        // endpoint keeps the toggles of the host's address-0 entry consistent.
        self.host.set_low_speed(0, low_speed);
        let prefix = self.host.get_device_descriptor(
            0,
            &mut self.endpoints[EndpointRole::Control],
            &mut buf[..DEVICE_DESCRIPTOR_PREFIX_LEN],
        );
        self.host.set_low_speed(0, false);

        // The first 8 bytes of the device descriptor carry bMaxPacketSize0.
        let prefix_len = prefix?;
        let max_packet_size0 = descriptor::max_packet_size0(&buf[..prefix_len])?;

        // Take an address from the pool. From here on, failures have to give it back.
        let address = self
            .host
            .alloc_address(parent, port)
            .ok_or(Error::OutOfAddressSpaceInPool)?;

        self.session.address = address;

        if max_packet_size0 == 0 {
            return Err(Error::InvalidMaxPacketSize);
        }

        self.endpoints[EndpointRole::Control].max_packet_size = max_packet_size0.into();

        // Move the device from address 0 to its own address.
        self.host
            .set_address(0, &mut self.endpoints[EndpointRole::Control], address)?;

        debug!("Assigned address {}", address);

        if !self.host.is_attached(address) {
            return Err(Error::AddressNotFoundInPool);
        }

        self.host.set_low_speed(address, low_speed);

        // Read the complete device descriptor at the new address.
        let len = self.host.get_device_descriptor(
            address,
            &mut self.endpoints[EndpointRole::Control],
            &mut buf,
        )?;
        let device_desc = DeviceDescriptor::parse(&buf[..len])?;

        debug!(
            "Device {:04x}:{:04x} offers {} configuration(s)",
            device_desc.vendor_id, device_desc.product_id, device_desc.num_configurations
        );

        // Only the control endpoint is known so far.
        self.host.set_endpoints(address, self.endpoints.as_slice(1))?;

        // Find a configuration with a printer interface and extract its bulk endpoints.
        let protocol = self
            .select_configuration(device_desc.num_configurations)?
            .ok_or(Error::DeviceNotSupported)?;

        self.check_endpoint_count(protocol)?;
        self.session.bidirectional = protocol == Protocol::Bidirectional;

        // Register the complete endpoint table with the host.
        let count = usize::from(self.session.endpoint_count);
        self.host.set_endpoints(address, self.endpoints.as_slice(count))?;

        // Activate the configuration.
        self.host.set_configuration(
            address,
            &mut self.endpoints[EndpointRole::Control],
            self.session.configuration,
        )?;

        // Claim the interface.
        self.host.claim_interface(address, self.session.interface)?;

        // The hook gets the driver itself, so take it out for the duration of the call.
        if let Some(mut hook) = self.hook.take() {
            let verdict = hook.on_init(self);
            self.hook = Some(hook);
            verdict.map_err(Error::HookRejected)?;
        }

        // A failed transfer inside the hook has already released the device.
        if self.session.address == 0 {
            return Err(Error::NotAttached);
        }

        self.session.ready = true;
        Ok(())
    }

    /// Walk the configurations in ascending order. Within a configuration the bidirectional
    /// protocol is preferred; it only counts if it yields both bulk endpoints.
    fn select_configuration(&mut self, num_configurations: u8) -> Result<Option<Protocol>, Error> {
        let address = self.session.address;

        for index in 0..num_configurations {
            for protocol in [Protocol::Bidirectional, Protocol::Unidirectional] {
                let data = self.host.get_conf_descr(
                    address,
                    &mut self.endpoints[EndpointRole::Control],
                    index,
                )?;

                self.endpoints.clear_bulk();
                self.session.endpoint_count = 1;

                ConfigParser::new(protocol.filter()).parse(&data, self)?;

                let non_control = self.session.endpoint_count - 1;
                let complete = match protocol {
                    Protocol::Bidirectional => non_control > 1,
                    _ => non_control > 0,
                };

                if complete {
                    self.session.configuration_index = index;
                    return Ok(Some(protocol));
                }
            }
        }

        Ok(None)
    }

    /// Bidirectional devices need control + IN + OUT, unidirectional ones control + IN.
    fn check_endpoint_count(&self, protocol: Protocol) -> Result<(), Error> {
        let (expected, required) = match protocol {
            Protocol::Bidirectional => (EndpointRole::COUNT, EndpointRole::BulkOut),
            _ => (EndpointRole::COUNT - 1, EndpointRole::BulkIn),
        };

        if usize::from(self.session.endpoint_count) != expected
            || !self.endpoints[required].is_populated()
            || !self.endpoints[EndpointRole::BulkIn].is_populated()
        {
            warn!(
                "Unsupported endpoint layout for the {:?} protocol ({} endpoints)",
                protocol, self.session.endpoint_count
            );
            return Err(Error::DeviceNotSupported);
        }

        Ok(())
    }
}

impl<H: HostController> DescriptorVisitor for PrinterDriver<H> {
    fn extract_endpoint(
        &mut self,
        configuration: u8,
        interface: u8,
        alternate_setting: u8,
        _protocol: u8,
        endpoint: &EndpointDescriptor,
    ) {
        self.session.configuration = configuration;
        self.session.interface = interface;
        self.session.alternate_setting = alternate_setting;

        if endpoint.transfer_type() != TransferType::Bulk {
            return;
        }

        // An empty slot is recognized by its packet size, so such an endpoint cannot be recorded.
        if endpoint.max_packet_size == 0 {
            warn!(
                "Ignoring endpoint {:#04x} on interface {} with a max packet size of 0",
                endpoint.address, interface
            );
            return;
        }

        let role = match endpoint.direction() {
            Direction::In => EndpointRole::BulkIn,
            Direction::Out => EndpointRole::BulkOut,
        };

        let slot = &mut self.endpoints[role];

        // Alternate settings may repeat an endpoint; the first one seen wins.
        if slot.is_populated() {
            warn!(
                "Ignoring additional {:?} endpoint {:#04x} on interface {}",
                role, endpoint.address, interface
            );
            return;
        }

        slot.address = endpoint.number();
        slot.max_packet_size = endpoint.max_packet_size;
        slot.reset_toggles();

        self.session.endpoint_count += 1;

        debug!(
            "Endpoint descriptor: address {:#04x}, attributes {:#04x}, max packet size {}, interval {}",
            endpoint.address,
            endpoint.attributes.bits(),
            endpoint.max_packet_size,
            endpoint.interval
        );
    }
}
