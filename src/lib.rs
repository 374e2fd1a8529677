#[macro_use]
extern crate bitflags;

/// The capabilities a USB host controller offers to class drivers, plus a libusb backed implementation.
pub mod host;

/// Decode USB descriptors and walk configurations looking for a matching interface.
pub mod descriptor;

/// Drive a USB printer-class device: enumerate it, then talk to it over its bulk endpoints.
pub mod printer;
