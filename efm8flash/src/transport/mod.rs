//! Transport abstraction for bootloader communication.
//!
//! The EFM8 bootloader speaks the same record protocol over every bus it
//! supports. A [`Transport`] only moves bytes; framing, identification and
//! programming live in [`crate::flasher`].
//!
//! ```text
//! +------------------+
//! |   Efm8Flasher    |   records, status bytes
//! +--------+---------+
//!          |
//!          v
//! +--------+---------+
//! |  Transport Trait |   packets <= max_packet_size
//! +--------+---------+
//!          |
//!     +----+-----+
//!     v          v
//! +-------+  +--------+
//! |  HID  |  |  UART  |
//! |hidapi |  |serial- |
//! |       |  |  port  |
//! +-------+  +--------+
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use efm8flash::transport::Transport;
//!
//! fn ping<T: Transport>(transport: &mut T) -> efm8flash::Result<u8> {
//!     transport.open()?;
//!     transport.send(&[0x24, 0x03, 0x30, 0x32, 0x41])?;
//!     let status = transport.recv(1)?;
//!     Ok(status.first().copied().unwrap_or_default())
//! }
//! ```

#[cfg(feature = "hid")]
pub mod hid;

#[cfg(feature = "uart")]
pub mod uart;

use crate::error::Result;

/// Kind of bus a transport runs over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum TransportKind {
    /// USB HID bootloader (EFM8UB parts).
    Hid,
    /// UART bootloader.
    Uart,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Hid => write!(f, "hid"),
            Self::Uart => write!(f, "uart"),
        }
    }
}

/// Raw byte channel to an EFM8 bootloader.
///
/// Implementations never interpret the bytes they move. A record longer than
/// [`Transport::max_packet_size`] is split by the caller and delivered with
/// several `send` calls before the single status byte is read.
pub trait Transport: Send {
    /// Open the underlying device.
    fn open(&mut self) -> Result<()>;

    /// Release the underlying device.
    fn close(&mut self) -> Result<()>;

    /// Send one packet of at most [`Transport::max_packet_size`] bytes.
    fn send(&mut self, packet: &[u8]) -> Result<()>;

    /// Receive up to `len` bytes. An empty result means nothing arrived.
    fn recv(&mut self, len: usize) -> Result<Vec<u8>>;

    /// Largest packet a single `send` accepts.
    fn max_packet_size(&self) -> usize;

    /// USB product id used to select the device family from the catalog.
    fn product_id(&self) -> u16;

    /// Human-readable device name or path.
    fn name(&self) -> &str;

    /// Bus this transport runs over.
    fn kind(&self) -> TransportKind;

    /// Called once the device has been told to run its application.
    ///
    /// After this the bootloader is gone and the handle may already be stale.
    fn mark_reset(&mut self) {}
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn open(&mut self) -> Result<()> {
        (**self).open()
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }

    fn send(&mut self, packet: &[u8]) -> Result<()> {
        (**self).send(packet)
    }

    fn recv(&mut self, len: usize) -> Result<Vec<u8>> {
        (**self).recv(len)
    }

    fn max_packet_size(&self) -> usize {
        (**self).max_packet_size()
    }

    fn product_id(&self) -> u16 {
        (**self).product_id()
    }

    fn name(&self) -> &str {
        (**self).name()
    }

    fn kind(&self) -> TransportKind {
        (**self).kind()
    }

    fn mark_reset(&mut self) {
        (**self).mark_reset();
    }
}

#[cfg(feature = "hid")]
pub use hid::{HID_IN_SIZE, HID_OUT_SIZE, HidBootloaderInfo, HidTransport};
#[cfg(feature = "uart")]
pub use uart::{SerialConfig, UartTransport};
