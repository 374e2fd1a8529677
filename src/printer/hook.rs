use super::PrinterDriver;
use crate::host::HostController;

/// Runs after the device has been configured but before it is marked ready.
/// Returning `Err(code)` vetoes the device; the driver releases it and reports `code`.
/// If the device gets released inside the hook, init fails with `Error::NotAttached`.
pub trait InitHook<H: HostController> {
    fn on_init(&mut self, printer: &mut PrinterDriver<H>) -> Result<(), u8>;
}

impl<H, F> InitHook<H> for F
where
    H: HostController,
    F: FnMut(&mut PrinterDriver<H>) -> Result<(), u8>,
{
    fn on_init(&mut self, printer: &mut PrinterDriver<H>) -> Result<(), u8> {
        self(printer)
    }
}
