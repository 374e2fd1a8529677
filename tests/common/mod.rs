#![allow(dead_code)]

use std::collections::VecDeque;

use usb_printer::host::{EndpointInfo, HostController, HostError, RequestType, SetupPacket};
use usb_printer::printer::PrinterDriver;

pub const BULK: u8 = 0x02;
pub const INTERRUPT: u8 = 0x03;

/// Every bus operation the fake host has seen, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transfer {
    ControlIn { address: u8, setup: SetupPacket },
    ControlOut { address: u8, setup: SetupPacket },
    BulkIn { address: u8, endpoint: u8, len: usize },
    BulkOut { address: u8, endpoint: u8, data: Vec<u8> },
}

/// A host controller with a single device behind it.
pub struct FakeHost {
    pub device_descriptor: Vec<u8>,
    pub configurations: Vec<Vec<u8>>,

    /// Addresses the pool still hands out.
    pub free_addresses: Vec<u8>,
    pub allocated: Vec<u8>,
    pub freed: Vec<u8>,

    /// The address the device currently answers at.
    pub device_address: u8,
    pub configured: Option<u8>,
    pub registered_endpoints: Vec<(u8, Vec<EndpointInfo>)>,
    pub transfers: Vec<Transfer>,

    pub port_status: u8,
    pub device_id: Vec<u8>,
    pub soft_resets: usize,

    /// Queued results for bulk IN transfers; an empty queue answers with NAK.
    pub bulk_in: VecDeque<Result<Vec<u8>, HostError>>,
    /// Result for the next bulk OUT transfer (consumed).
    pub bulk_out_error: Option<HostError>,
    /// Result for the next class-specific control transfer (consumed).
    pub class_error: Option<HostError>,
    pub set_address_error: Option<HostError>,
}

impl FakeHost {
    pub fn new(device_descriptor: Vec<u8>, configurations: Vec<Vec<u8>>) -> Self {
        Self {
            device_descriptor,
            configurations,
            free_addresses: vec![1],
            allocated: Vec::new(),
            freed: Vec::new(),
            device_address: 0,
            configured: None,
            registered_endpoints: Vec::new(),
            transfers: Vec::new(),
            port_status: 0x18,
            device_id: Vec::new(),
            soft_resets: 0,
            bulk_in: VecDeque::new(),
            bulk_out_error: None,
            class_error: None,
            set_address_error: None,
        }
    }

    pub fn bulk_out_transfers(&self) -> Vec<&Vec<u8>> {
        self.transfers
            .iter()
            .filter_map(|t| match t {
                Transfer::BulkOut { data, .. } => Some(data),
                _ => None,
            })
            .collect()
    }

    pub fn class_transfers(&self) -> Vec<&SetupPacket> {
        self.transfers
            .iter()
            .filter_map(|t| match t {
                Transfer::ControlIn { setup, .. } | Transfer::ControlOut { setup, .. }
                    if !setup.is_standard() =>
                {
                    Some(setup)
                }
                _ => None,
            })
            .collect()
    }

    fn check_address(&self, address: u8) -> Result<(), HostError> {
        if address == self.device_address {
            Ok(())
        } else {
            Err(HostError::TIMEOUT)
        }
    }
}

fn copy_into(source: &[u8], target: &mut [u8]) -> usize {
    let len = source.len().min(target.len());
    target[..len].copy_from_slice(&source[..len]);
    len
}

impl HostController for FakeHost {
    fn is_attached(&self, address: u8) -> bool {
        address == 0 || self.allocated.contains(&address)
    }

    fn alloc_address(&mut self, _parent: u8, _port: u8) -> Option<u8> {
        let address = self.free_addresses.pop()?;
        self.allocated.push(address);
        Some(address)
    }

    fn free_address(&mut self, address: u8) {
        self.allocated.retain(|a| *a != address);
        self.freed.push(address);
        self.free_addresses.push(address);
        self.device_address = 0;
    }

    fn set_low_speed(&mut self, _address: u8, _low_speed: bool) {}

    fn set_endpoints(&mut self, address: u8, endpoints: &[EndpointInfo]) -> Result<(), HostError> {
        self.registered_endpoints.push((address, endpoints.to_vec()));
        Ok(())
    }

    fn control_in(
        &mut self,
        address: u8,
        _control: &mut EndpointInfo,
        setup: &SetupPacket,
        data: &mut [u8],
    ) -> Result<usize, HostError> {
        self.check_address(address)?;
        self.transfers.push(Transfer::ControlIn {
            address,
            setup: *setup,
        });

        let len = usize::from(setup.length).min(data.len());
        let data = &mut data[..len];

        if setup.is_standard() {
            let [descriptor_type, index] = setup.value.to_be_bytes();

            return match descriptor_type {
                0x01 => Ok(copy_into(&self.device_descriptor, data)),
                0x02 => self
                    .configurations
                    .get(usize::from(index))
                    .map(|conf| copy_into(conf, data))
                    .ok_or(HostError::STALL),
                _ => Err(HostError::STALL),
            };
        }

        if let Some(err) = self.class_error.take() {
            return Err(err);
        }

        match setup.request {
            0x00 => Ok(copy_into(&self.device_id, data)),
            0x01 => Ok(copy_into(&[self.port_status], data)),
            _ => Err(HostError::STALL),
        }
    }

    fn control_out(
        &mut self,
        address: u8,
        _control: &mut EndpointInfo,
        setup: &SetupPacket,
        _data: &[u8],
    ) -> Result<(), HostError> {
        self.check_address(address)?;
        self.transfers.push(Transfer::ControlOut {
            address,
            setup: *setup,
        });

        if setup.request_type == RequestType::empty() {
            return match setup.request {
                0x05 => {
                    if let Some(err) = self.set_address_error.take() {
                        return Err(err);
                    }
                    self.device_address = setup.value as u8;
                    Ok(())
                }
                0x09 => {
                    self.configured = Some(setup.value as u8);
                    Ok(())
                }
                _ => Err(HostError::STALL),
            };
        }

        if let Some(err) = self.class_error.take() {
            return Err(err);
        }

        match setup.request {
            0x02 => {
                self.soft_resets += 1;
                Ok(())
            }
            _ => Err(HostError::STALL),
        }
    }

    fn bulk_in(
        &mut self,
        address: u8,
        endpoint: &mut EndpointInfo,
        data: &mut [u8],
    ) -> Result<usize, HostError> {
        self.check_address(address)?;
        self.transfers.push(Transfer::BulkIn {
            address,
            endpoint: endpoint.address,
            len: data.len(),
        });

        let batch = self.bulk_in.pop_front().unwrap_or(Err(HostError::NAK))?;
        endpoint.receive_toggle = !endpoint.receive_toggle;
        Ok(copy_into(&batch, data))
    }

    fn bulk_out(
        &mut self,
        address: u8,
        endpoint: &mut EndpointInfo,
        data: &[u8],
    ) -> Result<usize, HostError> {
        self.check_address(address)?;
        self.transfers.push(Transfer::BulkOut {
            address,
            endpoint: endpoint.address,
            data: data.to_vec(),
        });

        if let Some(err) = self.bulk_out_error.take() {
            return Err(err);
        }

        endpoint.send_toggle = !endpoint.send_toggle;
        Ok(data.len())
    }
}

pub fn device_descriptor(max_packet_size0: u8, num_configurations: u8) -> Vec<u8> {
    vec![
        0x12,
        0x01,
        0x00,
        0x02,
        0x00,
        0x00,
        0x00,
        max_packet_size0,
        0xf9,
        0x04,
        0x42,
        0x20,
        0x00,
        0x01,
        0x01,
        0x02,
        0x03,
        num_configurations,
    ]
}

/// (class, subclass, protocol, endpoints as (bEndpointAddress, bmAttributes, wMaxPacketSize))
pub type Interface = (u8, u8, u8, Vec<(u8, u8, u16)>);

pub fn configuration(value: u8, interfaces: &[Interface]) -> Vec<u8> {
    let mut data = vec![
        0x09,
        0x02,
        0x00,
        0x00,
        interfaces.len() as u8,
        value,
        0x00,
        0xc0,
        0x32,
    ];

    for (number, (class, sub_class, protocol, endpoints)) in interfaces.iter().enumerate() {
        data.extend_from_slice(&[
            0x09,
            0x04,
            number as u8,
            0x00,
            endpoints.len() as u8,
            *class,
            *sub_class,
            *protocol,
            0x00,
        ]);

        for (address, attributes, max_packet_size) in endpoints.iter() {
            let mps = max_packet_size.to_le_bytes();
            data.extend_from_slice(&[0x07, 0x05, *address, *attributes, mps[0], mps[1], 0x00]);
        }
    }

    let total_len = (data.len() as u16).to_le_bytes();
    data[2] = total_len[0];
    data[3] = total_len[1];
    data
}

pub fn bidirectional_configuration() -> Vec<u8> {
    configuration(
        1,
        &[(0x07, 0x01, 0x02, vec![(0x81, BULK, 64), (0x02, BULK, 64)])],
    )
}

pub fn unidirectional_configuration() -> Vec<u8> {
    configuration(1, &[(0x07, 0x01, 0x01, vec![(0x81, BULK, 64)])])
}

pub fn driver(configurations: Vec<Vec<u8>>) -> PrinterDriver<FakeHost> {
    let num_configurations = configurations.len() as u8;
    PrinterDriver::new(FakeHost::new(
        device_descriptor(8, num_configurations),
        configurations,
    ))
}
