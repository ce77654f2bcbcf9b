//! # efm8flash
//!
//! A library for flashing Silicon Labs EFM8 microcontrollers through their
//! factory bootloader.
//!
//! This crate provides the core functionality for talking to EFM8
//! bootloaders, including:
//!
//! - Record encoding/decoding for the bootloader protocol
//! - Part identification against a built-in catalog
//! - Power-fail-safe image programming (page 0 erased first, written last)
//! - CRC16-XMODEM verification
//!
//! ## Supported Parts
//!
//! - EFM8UB1, EFM8UB2, EFM8UB3 (USB HID bootloader)
//! - Any cataloged part behind a UART bootloader
//!
//! ## Features
//!
//! - `native` (default): both transports below
//! - `hid`: USB HID transport via `hidapi`
//! - `uart`: serial transport via `serialport`
//! - `serde`: Serialization support for data types
//!
//! ## Example
//!
//! ```rust,no_run
//! use efm8flash::{Efm8Flasher, SparseImage, transport::UartTransport, transport::SerialConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let family = efm8flash::device::family_by_name("ub1").ok_or("unknown family")?;
//!     let config = SerialConfig::new("/dev/ttyUSB0", 115200, family.product_id);
//!
//!     let mut flasher = Efm8Flasher::new(UartTransport::new(config));
//!     let device = flasher.connect()?;
//!     println!("Found {}", device.name);
//!
//!     let image = SparseImage::from_bytes(0x0000, &[0x02, 0x00, 0x10])?;
//!     flasher.write_image(&image)?;
//!     flasher.reset_mcu()?;
//!     flasher.disconnect()?;
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, OnceLock};

pub mod device;
pub mod error;
pub mod flasher;
pub mod host;
pub mod image;
pub mod protocol;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

static INTERRUPT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register a global interruption checker used by long-running library loops.
///
/// The checker should return `true` when the current operation should stop
/// (for example after receiving Ctrl-C in CLI applications). Programming and
/// erase loops consult it between pages, never inside one.
pub fn set_interrupt_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = INTERRUPT_CHECKER.set(Arc::new(checker));
}

/// Returns whether interruption was requested by the embedding application.
#[must_use]
pub fn is_interrupted_requested() -> bool {
    INTERRUPT_CHECKER
        .get()
        .is_some_and(|checker| checker())
}

#[cfg(test)]
pub(crate) fn test_set_interrupted(value: bool) {
    use std::sync::atomic::{AtomicBool, Ordering};

    static TEST_INTERRUPT_FLAG: OnceLock<Arc<AtomicBool>> = OnceLock::new();

    let flag = TEST_INTERRUPT_FLAG
        .get_or_init(|| {
            let shared = Arc::new(AtomicBool::new(false));
            let checker = Arc::clone(&shared);
            set_interrupt_checker(move || checker.load(Ordering::Relaxed));
            shared
        })
        .clone();

    flag.store(value, Ordering::Relaxed);
}

// Re-exports for convenience
#[cfg(feature = "hid")]
pub use host::{DiscoveredBootloader, discover_bootloaders};
pub use {
    device::{DeviceDescriptor, DeviceFamily, SILICON_LABS_VID},
    error::{Error, Result},
    flasher::Efm8Flasher,
    host::describe,
    image::{FlashImage, SparseImage},
    protocol::{Command, Record, Status, crc16_xmodem},
    transport::{Transport, TransportKind},
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interrupt_checker_toggle_true_false() {
        test_set_interrupted(false);
        assert!(!is_interrupted_requested());

        test_set_interrupted(true);
        assert!(is_interrupted_requested());

        test_set_interrupted(false);
        assert!(!is_interrupted_requested());
    }
}
