use usb_printer::host::LibusbHost;
use usb_printer::printer::{ByteStream, Lifecycle, PrinterDriver};

use std::env;
use std::fs;
use std::thread;
use std::time::Duration;

const USAGE: &str = "usb-printer <file> [<vendor id>:<product id>]";

/// Environment variable overriding the libusb IO timeout (in milliseconds).
const TIMEOUT_ENV: &str = "USB_PRINTER_TIMEOUT_MS";

/// How often a busy printer is retried before giving up on a chunk.
const BUSY_RETRIES: u32 = 50;
const BUSY_BACKOFF: Duration = Duration::from_millis(100);

/// Data is handed to the printer in chunks of this size.
const CHUNK_SIZE: usize = 4096;

fn parse_ids(value: &str) -> Result<(u16, u16), String> {
    let (vendor_id, product_id) = value
        .split_once(':')
        .ok_or_else(|| format!("Expected <vendor id>:<product id>, got {}", value))?;

    let parse = |s: &str| {
        u16::from_str_radix(s.trim_start_matches("0x"), 16)
            .map_err(|err| format!("Invalid USB ID {}: {}", s, err))
    };

    Ok((parse(vendor_id)?, parse(product_id)?))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let mut args = env::args().skip(1);
    let path = args.next().ok_or(USAGE)?;
    let filter = args.next().map(|ids| parse_ids(&ids)).transpose()?;

    let data = fs::read(&path)?;

    let mut host = LibusbHost::open_printer(filter)?;

    if let Ok(timeout) = env::var(TIMEOUT_ENV) {
        host.set_io_timeout(Duration::from_millis(timeout.parse()?));
    }

    let mut printer = PrinterDriver::new(host);
    printer.init(0, 1, false)?;

    match printer.device_id() {
        Ok(device_id) => log::info!(
            "Printer: {} {}",
            device_id.manufacturer().unwrap_or("<unknown>"),
            device_id.model().unwrap_or("<unknown>")
        ),
        Err(err) => log::warn!("Failed to read the device ID: {}", err),
    }

    if printer.is_ready() {
        log::info!("Port status: {:?}", printer.port_status()?);
    }

    for chunk in data.chunks(CHUNK_SIZE) {
        let mut retries = 0;

        while printer.write(chunk) == 0 {
            if !printer.is_ready() || retries == BUSY_RETRIES {
                return Err(format!("The printer stopped accepting data ({}).", path).into());
            }

            retries += 1;
            thread::sleep(BUSY_BACKOFF);
        }
    }

    log::info!("Sent {} bytes from {}", data.len(), path);

    // Bidirectional printers may have something to say about the job.
    if printer.is_bidirectional() {
        let mut response = Vec::new();

        while let Some(byte) = printer.read() {
            response.push(byte);
        }

        if !response.is_empty() {
            log::info!("Printer says: {}", String::from_utf8_lossy(&response));
        }
    }

    printer.release();

    Ok(())
}
