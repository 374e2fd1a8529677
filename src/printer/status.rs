use super::{EndpointRole, Error, PrinterDriver};
use crate::host::{HostController, RequestType, SetupPacket};

use log::debug;

/// Class-specific requests of the printer class.
const REQUEST_GET_DEVICE_ID: u8 = 0x00;
const REQUEST_GET_PORT_STATUS: u8 = 0x01;
const REQUEST_SOFT_RESET: u8 = 0x02;

/// What `get_status()` reports for bidirectional printers, which answer status
/// queries over the bulk channel instead. It reads as "selected, no error flags".
pub const STATUS_SENTINEL: u8 = 0x10;

/// The IEEE 1284 device ID is at most this long (including its 2-byte length prefix).
const DEVICE_ID_MAX_LEN: usize = 1024;

bitflags! {
    /// The printer port status byte (the Centronics status lines).
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct PortStatus: u8 {
        const PAPER_EMPTY = 0b0010_0000;
        const SELECTED = 0b0001_0000;
        const NO_ERROR = 0b0000_1000;
    }
}

fn class_request(direction_in: bool) -> RequestType {
    let request_type = RequestType::TYPE_CLASS | RequestType::RECIPIENT_INTERFACE;

    if direction_in {
        request_type | RequestType::DEVICE_TO_HOST
    } else {
        request_type
    }
}

/// The IEEE 1284 device ID: a list of `KEY:value;` pairs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceId {
    raw: String,
    fields: Vec<(String, String)>,
}

impl DeviceId {
    /// Parse the response of GET_DEVICE_ID. The first two bytes are the big-endian length
    /// of the whole response, including themselves.
    pub fn parse(data: &[u8]) -> Result<Self, Error> {
        if data.len() < 2 {
            return Err(Error::MalformedDescriptor(
                crate::descriptor::Error::Truncated {
                    expected: 2,
                    got: data.len(),
                },
            ));
        }

        // Some printers get the length wrong, so never trust it beyond what we received.
        let len = usize::from(u16::from_be_bytes([data[0], data[1]]))
            .clamp(2, data.len());

        let raw = String::from_utf8_lossy(&data[2..len]).into_owned();

        let fields = raw
            .split(';')
            .filter_map(|field| {
                let (key, value) = field.split_once(':')?;
                Some((key.trim().to_uppercase(), value.trim().to_owned()))
            })
            .collect();

        Ok(Self { raw, fields })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Look up a field by key (case-insensitive).
    pub fn get(&self, key: &str) -> Option<&str> {
        let key = key.to_uppercase();

        self.fields
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, value)| value.as_str())
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn manufacturer(&self) -> Option<&str> {
        self.get("MFG").or_else(|| self.get("MANUFACTURER"))
    }

    pub fn model(&self) -> Option<&str> {
        self.get("MDL").or_else(|| self.get("MODEL"))
    }

    /// The page description languages understood by the printer.
    pub fn command_set(&self) -> Vec<&str> {
        self.get("CMD")
            .or_else(|| self.get("COMMAND SET"))
            .map_or_else(Vec::new, |cmd| {
                cmd.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .collect()
            })
    }
}

impl<H: HostController> PrinterDriver<H> {
    /// Read the port status byte.
    ///
    /// Only unidirectional printers are asked over the control pipe; bidirectional ones
    /// report `STATUS_SENTINEL` without any transfer.
    pub fn get_status(&mut self) -> Result<u8, Error> {
        self.ensure_attached()?;

        if self.session.bidirectional {
            return Ok(STATUS_SENTINEL);
        }

        let setup = SetupPacket {
            request_type: class_request(true),
            request: REQUEST_GET_PORT_STATUS,
            value: 0,
            index: self.session.interface.into(),
            length: 1,
        };

        let mut status = [STATUS_SENTINEL];

        let result = self.host.control_in(
            self.session.address,
            &mut self.endpoints[EndpointRole::Control],
            &setup,
            &mut status,
        );

        match result {
            Ok(_) => Ok(status[0]),
            Err(err) => Err(self.on_transfer_error(err, "GET_PORT_STATUS")),
        }
    }

    pub fn port_status(&mut self) -> Result<PortStatus, Error> {
        self.get_status().map(PortStatus::from_bits_retain)
    }

    /// Ask the printer for its IEEE 1284 device ID.
    pub fn device_id(&mut self) -> Result<DeviceId, Error> {
        self.ensure_attached()?;

        let setup = SetupPacket {
            request_type: class_request(true),
            request: REQUEST_GET_DEVICE_ID,
            value: self.session.configuration_index.into(),
            index: u16::from_be_bytes([self.session.interface, self.session.alternate_setting]),
            length: DEVICE_ID_MAX_LEN as u16,
        };

        let mut data = vec![0u8; DEVICE_ID_MAX_LEN];

        let result = self.host.control_in(
            self.session.address,
            &mut self.endpoints[EndpointRole::Control],
            &setup,
            &mut data,
        );

        match result {
            Ok(len) => {
                let device_id = DeviceId::parse(&data[..len])?;
                debug!("Device ID: {}", device_id.raw());
                Ok(device_id)
            }
            Err(err) => Err(self.on_transfer_error(err, "GET_DEVICE_ID")),
        }
    }

    /// Flush all buffers and reset the printer's bulk pipes, without resetting the bus.
    pub fn soft_reset(&mut self) -> Result<(), Error> {
        self.ensure_attached()?;

        let setup = SetupPacket {
            request_type: class_request(false),
            request: REQUEST_SOFT_RESET,
            value: 0,
            index: self.session.interface.into(),
            length: 0,
        };

        let result = self.host.control_out(
            self.session.address,
            &mut self.endpoints[EndpointRole::Control],
            &setup,
            &[],
        );

        match result {
            Ok(()) => {
                self.read_buffer.clear();
                Ok(())
            }
            Err(err) => Err(self.on_transfer_error(err, "SOFT_RESET")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(id: &str) -> Vec<u8> {
        let mut data = ((id.len() + 2) as u16).to_be_bytes().to_vec();
        data.extend_from_slice(id.as_bytes());
        data
    }

    #[test]
    fn device_id_fields() {
        let id = DeviceId::parse(&response(
            "MFG:Brother;CMD:PT-CBP,ESC/P ;MDL:QL-700;CLS:PRINTER;",
        ))
        .unwrap();

        assert_eq!(id.manufacturer(), Some("Brother"));
        assert_eq!(id.model(), Some("QL-700"));
        assert_eq!(id.get("cls"), Some("PRINTER"));
        assert_eq!(id.command_set(), vec!["PT-CBP", "ESC/P"]);
        assert_eq!(id.fields().count(), 4);
    }

    #[test]
    fn device_id_long_keys() {
        let id = DeviceId::parse(&response(
            "MANUFACTURER:Hewlett-Packard;COMMAND SET:PCL,PJL;MODEL:LaserJet;",
        ))
        .unwrap();

        assert_eq!(id.manufacturer(), Some("Hewlett-Packard"));
        assert_eq!(id.model(), Some("LaserJet"));
        assert_eq!(id.command_set(), vec!["PCL", "PJL"]);
    }

    #[test]
    fn device_id_length_is_clamped() {
        let mut data = response("MFG:Acme;");
        data[1] = 0xff;

        let id = DeviceId::parse(&data).unwrap();
        assert_eq!(id.raw(), "MFG:Acme;");

        // A length prefix claiming less than the prefix itself yields an empty ID.
        let id = DeviceId::parse(&[0x00, 0x00, b'X']).unwrap();
        assert_eq!(id.raw(), "");
        assert_eq!(id.manufacturer(), None);
    }

    #[test]
    fn device_id_needs_a_length_prefix() {
        assert!(matches!(
            DeviceId::parse(&[0x00]),
            Err(Error::MalformedDescriptor(_))
        ));
    }

    #[test]
    fn port_status_bits() {
        let status = PortStatus::from_bits_retain(0x18);
        assert!(status.contains(PortStatus::SELECTED | PortStatus::NO_ERROR));
        assert!(!status.contains(PortStatus::PAPER_EMPTY));
    }
}
