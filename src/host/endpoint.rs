#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EndpointDirection {
    Control,
    In,
    Out,
}

/// How long the host keeps retrying a transfer the device answers with NAK.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum NakPolicy {
    /// Give up on the first NAK.
    NoNak,

    /// Retry once, then report the device as busy.
    NoWait,

    /// Retry up to `2^n` times (`n` is capped at 15).
    Power(u8),
}

impl NakPolicy {
    pub const MAX_POWER: u8 = 15;

    /// The number of NAKs tolerated before a transfer is reported as busy.
    pub fn retry_limit(self) -> u16 {
        let power = match self {
            NakPolicy::NoNak => 0,
            NakPolicy::NoWait => 1,
            NakPolicy::Power(power) => power.min(Self::MAX_POWER),
        };

        1 << power
    }
}

impl Default for NakPolicy {
    fn default() -> Self {
        NakPolicy::Power(14)
    }
}

/// The host's view of a single endpoint of a device.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct EndpointInfo {
    /// Endpoint number (4 bits, without the direction bit).
    pub address: u8,
    pub direction: EndpointDirection,
    pub max_packet_size: u16,
    pub send_toggle: bool,
    pub receive_toggle: bool,
    pub nak_policy: NakPolicy,
}

impl EndpointInfo {
    /// Every device starts out with a default control pipe of 8 bytes.
    pub const DEFAULT_CONTROL_PACKET_SIZE: u16 = 8;

    pub fn control(nak_policy: NakPolicy) -> Self {
        Self {
            address: 0,
            direction: EndpointDirection::Control,
            max_packet_size: Self::DEFAULT_CONTROL_PACKET_SIZE,
            send_toggle: false,
            receive_toggle: false,
            nak_policy,
        }
    }

    /// An endpoint slot that has not been discovered yet.
    pub fn unused(direction: EndpointDirection, nak_policy: NakPolicy) -> Self {
        Self {
            address: 0,
            direction,
            max_packet_size: 0,
            send_toggle: false,
            receive_toggle: false,
            nak_policy,
        }
    }

    pub fn is_populated(&self) -> bool {
        self.max_packet_size != 0
    }

    /// The endpoint address as it appears on the wire (number plus direction bit).
    pub fn wire_address(&self) -> u8 {
        match self.direction {
            EndpointDirection::In => 0x80 | self.address,
            EndpointDirection::Out | EndpointDirection::Control => self.address,
        }
    }

    pub fn reset_toggles(&mut self) {
        self.send_toggle = false;
        self.receive_toggle = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nak_retry_limits() {
        assert_eq!(NakPolicy::NoNak.retry_limit(), 1);
        assert_eq!(NakPolicy::NoWait.retry_limit(), 2);
        assert_eq!(NakPolicy::Power(3).retry_limit(), 8);
        assert_eq!(NakPolicy::Power(200).retry_limit(), 1 << 15);
    }

    #[test]
    fn in_endpoints_carry_the_direction_bit() {
        let mut endpoint = EndpointInfo::unused(EndpointDirection::In, NakPolicy::NoWait);
        endpoint.address = 0x02;
        assert_eq!(endpoint.wire_address(), 0x82);

        endpoint.direction = EndpointDirection::Out;
        assert_eq!(endpoint.wire_address(), 0x02);
    }
}
