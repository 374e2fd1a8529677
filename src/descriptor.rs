use std::fmt::Display;

use rusb::{Direction, TransferType};

pub const DESCRIPTOR_TYPE_DEVICE: u8 = 0x01;
pub const DESCRIPTOR_TYPE_CONFIGURATION: u8 = 0x02;
pub const DESCRIPTOR_TYPE_INTERFACE: u8 = 0x04;
pub const DESCRIPTOR_TYPE_ENDPOINT: u8 = 0x05;

pub const DEVICE_DESCRIPTOR_LEN: usize = 18;
pub const CONFIGURATION_DESCRIPTOR_LEN: usize = 9;
pub const INTERFACE_DESCRIPTOR_LEN: usize = 9;
pub const ENDPOINT_DESCRIPTOR_LEN: usize = 7;

/// The first 8 bytes of the device descriptor are enough to learn `bMaxPacketSize0`.
pub const DEVICE_DESCRIPTOR_PREFIX_LEN: usize = 8;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Error {
    Truncated { expected: usize, got: usize },
    InvalidLength { offset: usize, length: u8 },
    UnexpectedType { expected: u8, got: u8 },
    NoConfigurationHeader,
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use Error::*;

        match self {
            Truncated { expected, got } => write!(
                f,
                "The descriptor is truncated (expected {} bytes, got {}).",
                expected, got
            ),
            InvalidLength { offset, length } => write!(
                f,
                "The descriptor at offset {} has an invalid length ({}).",
                offset, length
            ),
            UnexpectedType { expected, got } => write!(
                f,
                "Unexpected descriptor type (expected {:#04x}, got {:#04x}).",
                expected, got
            ),
            NoConfigurationHeader => write!(
                f,
                "The configuration descriptor does not start with a configuration header."
            ),
        }
    }
}

impl std::error::Error for Error {}

fn check(data: &[u8], expected_len: usize, expected_type: u8) -> Result<(), Error> {
    if data.len() < expected_len {
        return Err(Error::Truncated {
            expected: expected_len,
            got: data.len(),
        });
    }

    if data[1] != expected_type {
        return Err(Error::UnexpectedType {
            expected: expected_type,
            got: data[1],
        });
    }

    Ok(())
}

/// Extract `bMaxPacketSize0` from the 8-byte device descriptor prefix.
pub fn max_packet_size0(data: &[u8]) -> Result<u8, Error> {
    check(data, DEVICE_DESCRIPTOR_PREFIX_LEN, DESCRIPTOR_TYPE_DEVICE)?;
    Ok(data[7])
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub usb_version: u16,
    pub class: u8,
    pub sub_class: u8,
    pub protocol: u8,
    pub max_packet_size0: u8,
    pub vendor_id: u16,
    pub product_id: u16,
    pub device_version: u16,
    pub manufacturer_index: u8,
    pub product_index: u8,
    pub serial_number_index: u8,
    pub num_configurations: u8,
}

impl DeviceDescriptor {
    pub fn parse(data: &[u8]) -> Result<Self, Error> {
        check(data, DEVICE_DESCRIPTOR_LEN, DESCRIPTOR_TYPE_DEVICE)?;

        Ok(Self {
            usb_version: u16::from_le_bytes([data[2], data[3]]),
            class: data[4],
            sub_class: data[5],
            protocol: data[6],
            max_packet_size0: data[7],
            vendor_id: u16::from_le_bytes([data[8], data[9]]),
            product_id: u16::from_le_bytes([data[10], data[11]]),
            device_version: u16::from_le_bytes([data[12], data[13]]),
            manufacturer_index: data[14],
            product_index: data[15],
            serial_number_index: data[16],
            num_configurations: data[17],
        })
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ConfigurationDescriptor {
    pub total_length: u16,
    pub num_interfaces: u8,
    pub value: u8,
    pub attributes: u8,
    pub max_power: u8,
}

impl ConfigurationDescriptor {
    pub fn parse(data: &[u8]) -> Result<Self, Error> {
        check(data, CONFIGURATION_DESCRIPTOR_LEN, DESCRIPTOR_TYPE_CONFIGURATION)?;

        Ok(Self {
            total_length: u16::from_le_bytes([data[2], data[3]]),
            num_interfaces: data[4],
            value: data[5],
            attributes: data[7],
            max_power: data[8],
        })
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct InterfaceDescriptor {
    pub number: u8,
    pub alternate_setting: u8,
    pub num_endpoints: u8,
    pub class: u8,
    pub sub_class: u8,
    pub protocol: u8,
}

impl InterfaceDescriptor {
    pub fn parse(data: &[u8]) -> Result<Self, Error> {
        check(data, INTERFACE_DESCRIPTOR_LEN, DESCRIPTOR_TYPE_INTERFACE)?;

        Ok(Self {
            number: data[2],
            alternate_setting: data[3],
            num_endpoints: data[4],
            class: data[5],
            sub_class: data[6],
            protocol: data[7],
        })
    }
}

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct EndpointAttributes: u8 {
        const TRANSFER_TYPE = 0b0000_0011;
        const SYNC_TYPE = 0b0000_1100;
        const USAGE_TYPE = 0b0011_0000;
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct EndpointDescriptor {
    /// Raw `bEndpointAddress` (number in the low nibble, direction in bit 7).
    pub address: u8,
    pub attributes: EndpointAttributes,
    pub max_packet_size: u16,
    pub interval: u8,
}

impl EndpointDescriptor {
    pub fn parse(data: &[u8]) -> Result<Self, Error> {
        check(data, ENDPOINT_DESCRIPTOR_LEN, DESCRIPTOR_TYPE_ENDPOINT)?;

        Ok(Self {
            address: data[2],
            attributes: EndpointAttributes::from_bits_retain(data[3]),
            max_packet_size: u16::from_le_bytes([data[4], data[5]]),
            interval: data[6],
        })
    }

    pub fn number(&self) -> u8 {
        self.address & 0x0f
    }

    pub fn direction(&self) -> Direction {
        if self.address & 0x80 == 0x80 {
            Direction::In
        } else {
            Direction::Out
        }
    }

    pub fn transfer_type(&self) -> TransferType {
        match (self.attributes & EndpointAttributes::TRANSFER_TYPE).bits() {
            0 => TransferType::Control,
            1 => TransferType::Isochronous,
            2 => TransferType::Bulk,
            _ => TransferType::Interrupt,
        }
    }
}

/// Receives the endpoints of matching interfaces while a configuration is walked.
pub trait DescriptorVisitor {
    fn extract_endpoint(
        &mut self,
        configuration: u8,
        interface: u8,
        alternate_setting: u8,
        protocol: u8,
        endpoint: &EndpointDescriptor,
    );
}

/// Which interfaces a `ConfigParser` is interested in. All three fields have to match.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct InterfaceFilter {
    pub class: u8,
    pub sub_class: u8,
    pub protocol: u8,
}

impl InterfaceFilter {
    pub fn matches(&self, interface: &InterfaceDescriptor) -> bool {
        interface.class == self.class
            && interface.sub_class == self.sub_class
            && interface.protocol == self.protocol
    }
}

/// Walks a complete configuration descriptor block and hands the endpoints of every
/// interface accepted by the filter to a visitor.
pub struct ConfigParser {
    filter: InterfaceFilter,
}

impl ConfigParser {
    pub fn new(filter: InterfaceFilter) -> Self {
        Self { filter }
    }

    /// Returns the configuration header on success.
    pub fn parse<V>(&self, data: &[u8], visitor: &mut V) -> Result<ConfigurationDescriptor, Error>
    where
        V: DescriptorVisitor + ?Sized,
    {
        let mut configuration: Option<ConfigurationDescriptor> = None;
        let mut interface: Option<InterfaceDescriptor> = None;
        let mut offset = 0;

        while offset < data.len() {
            let rest = &data[offset..];

            // Every descriptor carries at least its length and its type.
            let length = rest[0];

            if length < 2 || usize::from(length) > rest.len() {
                return Err(Error::InvalidLength { offset, length });
            }

            let desc = &rest[..usize::from(length)];

            match desc[1] {
                DESCRIPTOR_TYPE_CONFIGURATION if offset == 0 => {
                    configuration = Some(ConfigurationDescriptor::parse(desc)?);
                }

                _ if configuration.is_none() => return Err(Error::NoConfigurationHeader),

                DESCRIPTOR_TYPE_INTERFACE => {
                    let desc = InterfaceDescriptor::parse(desc)?;
                    interface = self.filter.matches(&desc).then_some(desc);
                }

                DESCRIPTOR_TYPE_ENDPOINT => {
                    let endpoint = EndpointDescriptor::parse(desc)?;

                    if let (Some(conf), Some(iface)) = (&configuration, &interface) {
                        visitor.extract_endpoint(
                            conf.value,
                            iface.number,
                            iface.alternate_setting,
                            iface.protocol,
                            &endpoint,
                        );
                    }
                }

                // Class-specific and other descriptors (HID, interface association, ...).
                _ => (),
            }

            offset += usize::from(length);
        }

        configuration.ok_or(Error::NoConfigurationHeader)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        endpoints: Vec<(u8, u8, u8, u8, EndpointDescriptor)>,
    }

    impl DescriptorVisitor for Recorder {
        fn extract_endpoint(
            &mut self,
            configuration: u8,
            interface: u8,
            alternate_setting: u8,
            protocol: u8,
            endpoint: &EndpointDescriptor,
        ) {
            self.endpoints.push((
                configuration,
                interface,
                alternate_setting,
                protocol,
                *endpoint,
            ));
        }
    }

    const PRINTER_BIDIRECTIONAL: InterfaceFilter = InterfaceFilter {
        class: 0x07,
        sub_class: 0x01,
        protocol: 0x02,
    };

    // A composite device: a HID interface with an interrupt endpoint followed by
    // a bidirectional printer interface.
    fn composite_configuration() -> Vec<u8> {
        let mut data = vec![
            0x09, 0x02, 0x00, 0x00, 0x02, 0x01, 0x00, 0xc0, 0x32, // configuration 1
            0x09, 0x04, 0x00, 0x00, 0x01, 0x03, 0x00, 0x00, 0x00, // interface 0 (HID)
            0x09, 0x21, 0x11, 0x01, 0x00, 0x01, 0x22, 0x3f, 0x00, // HID class descriptor
            0x07, 0x05, 0x83, 0x03, 0x08, 0x00, 0x0a, // interrupt IN 3
            0x09, 0x04, 0x01, 0x00, 0x02, 0x07, 0x01, 0x02, 0x00, // interface 1 (printer)
            0x07, 0x05, 0x81, 0x02, 0x40, 0x00, 0x00, // bulk IN 1
            0x07, 0x05, 0x02, 0x02, 0x40, 0x00, 0x00, // bulk OUT 2
        ];

        let total_len = (data.len() as u16).to_le_bytes();
        data[2] = total_len[0];
        data[3] = total_len[1];
        data
    }

    #[test]
    fn device_descriptor() {
        let data = [
            0x12, 0x01, 0x00, 0x02, 0x00, 0x00, 0x00, 0x40, 0xf9, 0x04, 0x42, 0x20, 0x00, 0x01,
            0x01, 0x02, 0x03, 0x01,
        ];

        let desc = DeviceDescriptor::parse(&data).unwrap();
        assert_eq!(desc.usb_version, 0x0200);
        assert_eq!(desc.max_packet_size0, 64);
        assert_eq!(desc.vendor_id, 0x04f9);
        assert_eq!(desc.product_id, 0x2042);
        assert_eq!(desc.num_configurations, 1);

        assert_eq!(max_packet_size0(&data[..8]), Ok(64));
        assert_eq!(
            DeviceDescriptor::parse(&data[..8]),
            Err(Error::Truncated {
                expected: 18,
                got: 8
            })
        );
    }

    #[test]
    fn only_endpoints_of_matching_interfaces_are_visited() {
        let mut recorder = Recorder::default();
        let conf = ConfigParser::new(PRINTER_BIDIRECTIONAL)
            .parse(&composite_configuration(), &mut recorder)
            .unwrap();

        assert_eq!(conf.value, 1);
        assert_eq!(conf.num_interfaces, 2);
        assert_eq!(recorder.endpoints.len(), 2);

        let (configuration, interface, alternate_setting, protocol, bulk_in) =
            recorder.endpoints[0];
        assert_eq!((configuration, interface, alternate_setting, protocol), (1, 1, 0, 2));
        assert_eq!(bulk_in.number(), 1);
        assert_eq!(bulk_in.direction(), Direction::In);
        assert_eq!(bulk_in.transfer_type(), TransferType::Bulk);
        assert_eq!(bulk_in.max_packet_size, 64);

        let bulk_out = recorder.endpoints[1].4;
        assert_eq!(bulk_out.number(), 2);
        assert_eq!(bulk_out.direction(), Direction::Out);
    }

    #[test]
    fn non_matching_protocol_visits_nothing() {
        let mut recorder = Recorder::default();
        let filter = InterfaceFilter {
            protocol: 0x01,
            ..PRINTER_BIDIRECTIONAL
        };

        ConfigParser::new(filter)
            .parse(&composite_configuration(), &mut recorder)
            .unwrap();

        assert!(recorder.endpoints.is_empty());
    }

    #[test]
    fn zero_length_descriptor_is_rejected() {
        let mut data = composite_configuration();
        data[9] = 0;

        let mut recorder = Recorder::default();
        let result = ConfigParser::new(PRINTER_BIDIRECTIONAL).parse(&data, &mut recorder);

        assert_eq!(
            result,
            Err(Error::InvalidLength {
                offset: 9,
                length: 0
            })
        );
    }

    #[test]
    fn overlong_descriptor_is_rejected() {
        let mut data = composite_configuration();
        let last = data.len() - 7;
        data[last] = 0x20;

        let mut recorder = Recorder::default();
        let result = ConfigParser::new(PRINTER_BIDIRECTIONAL).parse(&data, &mut recorder);

        assert!(matches!(result, Err(Error::InvalidLength { .. })));
    }

    #[test]
    fn configuration_header_must_come_first() {
        let data = composite_configuration();

        let mut recorder = Recorder::default();
        let result = ConfigParser::new(PRINTER_BIDIRECTIONAL).parse(&data[9..], &mut recorder);

        assert_eq!(result, Err(Error::NoConfigurationHeader));
        assert!(recorder.endpoints.is_empty());
    }
}
