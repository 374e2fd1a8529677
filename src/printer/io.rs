use super::{EndpointRole, Error, PrinterDriver};
use crate::host::HostController;

use log::{error, trace};

/// Small reads are batched through a staging buffer of this size.
pub const READ_BUFFER_SIZE: usize = 64;

pub(super) struct ReadBuffer {
    data: [u8; READ_BUFFER_SIZE],
    remaining: usize,
    cursor: usize,
}

impl Default for ReadBuffer {
    fn default() -> Self {
        Self {
            data: [0; READ_BUFFER_SIZE],
            remaining: 0,
            cursor: 0,
        }
    }
}

impl ReadBuffer {
    pub fn available(&self) -> usize {
        self.remaining
    }

    pub fn peek(&self) -> Option<u8> {
        (self.remaining > 0).then(|| self.data[self.cursor])
    }

    pub fn take(&mut self) -> Option<u8> {
        let byte = self.peek()?;
        self.cursor += 1;
        self.remaining -= 1;
        Some(byte)
    }

    pub fn refill(&mut self, batch: &[u8]) {
        let len = batch.len().min(READ_BUFFER_SIZE);
        self.data[..len].copy_from_slice(&batch[..len]);
        self.cursor = 0;
        self.remaining = len;
    }

    pub fn clear(&mut self) {
        self.cursor = 0;
        self.remaining = 0;
    }
}

/// A byte-oriented view of the printer's bulk endpoints.
pub trait ByteStream {
    /// Bytes already staged. Never touches the bus.
    fn available(&self) -> usize;

    /// The next byte, fetching a new batch from the device if nothing is staged.
    fn read(&mut self) -> Option<u8>;

    /// Like `read`, but the byte stays staged.
    fn peek(&mut self) -> Option<u8>;

    /// Writes are unbuffered, so there is nothing to flush.
    fn flush(&mut self) {}

    /// Read directly from the device. Failures read as zero bytes.
    fn read_bytes(&mut self, buffer: &mut [u8]) -> usize;

    /// Returns `data.len()` on success and 0 on any failure.
    fn write(&mut self, data: &[u8]) -> usize;

    fn write_byte(&mut self, byte: u8) -> usize {
        self.write(&[byte])
    }

    fn write_str(&mut self, s: &str) -> usize {
        self.write(s.as_bytes())
    }
}

impl<H: HostController> PrinterDriver<H> {
    /// Receive up to `data.len()` bytes from the bulk IN endpoint.
    ///
    /// A NAK comes back as a busy error and leaves the session intact;
    /// every other failure releases the device.
    pub fn rcv_data(&mut self, data: &mut [u8]) -> Result<usize, Error> {
        self.ensure_endpoint(EndpointRole::BulkIn)?;

        let result = self.host.bulk_in(
            self.session.address,
            &mut self.endpoints[EndpointRole::BulkIn],
            data,
        );

        match result {
            Ok(len) => {
                trace!("Received {} bytes", len);
                Ok(len)
            }
            Err(err) => Err(self.on_transfer_error(err, "Bulk IN transfer")),
        }
    }

    /// Send all of `data` to the bulk OUT endpoint. Error handling as with `rcv_data`.
    pub fn snd_data(&mut self, data: &[u8]) -> Result<usize, Error> {
        self.ensure_endpoint(EndpointRole::BulkOut)?;

        let result = self.host.bulk_out(
            self.session.address,
            &mut self.endpoints[EndpointRole::BulkOut],
            data,
        );

        match result {
            Ok(len) => {
                trace!("Sent {} bytes", len);
                Ok(len)
            }
            Err(err) => Err(self.on_transfer_error(err, "Bulk OUT transfer")),
        }
    }

    /// A unidirectional printer has no bulk OUT endpoint; never fall back to endpoint 0.
    fn ensure_endpoint(&self, role: EndpointRole) -> Result<(), Error> {
        self.ensure_attached()?;

        if self.endpoints[role].is_populated() {
            Ok(())
        } else {
            Err(Error::DeviceNotSupported)
        }
    }

    /// Stage a new batch if the previous one has been consumed.
    fn fill_read_buffer(&mut self) {
        if self.read_buffer.available() > 0 {
            return;
        }

        let mut batch = [0u8; READ_BUFFER_SIZE];
        let len = self.read_bytes(&mut batch);
        self.read_buffer.refill(&batch[..len]);
    }
}

impl<H: HostController> ByteStream for PrinterDriver<H> {
    fn available(&self) -> usize {
        self.read_buffer.available()
    }

    fn read(&mut self) -> Option<u8> {
        self.fill_read_buffer();
        self.read_buffer.take()
    }

    fn peek(&mut self) -> Option<u8> {
        self.fill_read_buffer();
        self.read_buffer.peek()
    }

    fn read_bytes(&mut self, buffer: &mut [u8]) -> usize {
        match self.rcv_data(buffer) {
            Ok(len) => len,
            Err(err) => {
                if !err.is_busy() {
                    error!("Reading from the printer failed: {}", err);
                }
                0
            }
        }
    }

    fn write(&mut self, data: &[u8]) -> usize {
        match self.snd_data(data) {
            Ok(_) => data.len(),
            Err(err) => {
                if !err.is_busy() {
                    error!("Writing to the printer failed: {}", err);
                }
                0
            }
        }
    }
}
