use super::Config;
use crate::host::{EndpointDirection, EndpointInfo};

use std::ops::{Index, IndexMut};

/// The logical role of an endpoint slot. The order matches the table layout the host expects.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EndpointRole {
    Control = 0,
    BulkIn = 1,
    BulkOut = 2,
}

impl EndpointRole {
    pub const COUNT: usize = 3;
}

pub struct EndpointTable {
    slots: [EndpointInfo; EndpointRole::COUNT],
}

impl EndpointTable {
    pub(super) fn new(config: &Config) -> Self {
        Self {
            slots: [
                EndpointInfo::control(config.control_nak),
                EndpointInfo::unused(EndpointDirection::In, config.bulk_in_nak),
                EndpointInfo::unused(EndpointDirection::Out, config.bulk_out_nak),
            ],
        }
    }

    /// Forget everything learned from configuration descriptors but keep the control endpoint.
    pub(super) fn clear_bulk(&mut self) {
        for role in [EndpointRole::BulkIn, EndpointRole::BulkOut] {
            let slot = &mut self[role];
            *slot = EndpointInfo::unused(slot.direction, slot.nak_policy);
        }
    }

    /// The first `count` slots, as registered with the host.
    pub fn as_slice(&self, count: usize) -> &[EndpointInfo] {
        &self.slots[..count.min(EndpointRole::COUNT)]
    }
}

impl Index<EndpointRole> for EndpointTable {
    type Output = EndpointInfo;

    fn index(&self, role: EndpointRole) -> &Self::Output {
        &self.slots[role as usize]
    }
}

impl IndexMut<EndpointRole> for EndpointTable {
    fn index_mut(&mut self, role: EndpointRole) -> &mut Self::Output {
        &mut self.slots[role as usize]
    }
}
