use crate::host::NakPolicy;

use chrono::TimeDelta;

#[derive(Debug, Clone)]
pub struct Config {
    /// How often `poll()` reschedules itself while a device is ready.
    pub poll_interval: TimeDelta,
    pub control_nak: NakPolicy,
    /// Reads should not block when the printer has nothing to say.
    pub bulk_in_nak: NakPolicy,
    pub bulk_out_nak: NakPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            poll_interval: TimeDelta::milliseconds(100),
            control_nak: NakPolicy::NoNak,
            bulk_in_nak: NakPolicy::NoWait,
            bulk_out_nak: NakPolicy::NoNak,
        }
    }
}
