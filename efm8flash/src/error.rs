//! Error types for efm8flash.

use {
    crate::protocol::record::{Command, Status},
    std::io,
    thiserror::Error,
};

/// Result type for efm8flash operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for efm8flash operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (transport, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "uart")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// USB HID error.
    #[cfg(feature = "hid")]
    #[error("USB HID error: {0}")]
    Hid(#[from] hidapi::HidError),

    /// The bootloader answered with a known status other than ACK.
    #[error("{command:?} rejected by bootloader: {status}")]
    Protocol {
        /// Command that was rejected.
        command: Command,
        /// Status byte returned by the device.
        status: Status,
    },

    /// The bootloader answered with a byte that is not a protocol status.
    #[error("{command:?} answered with unrecognized status 0x{byte:02X}")]
    UnknownStatus {
        /// Command that was sent.
        command: Command,
        /// Raw response byte.
        byte: u8,
    },

    /// The transport's product id is not in the device catalog.
    #[error("Unknown bootloader product id 0x{product_id:04X}")]
    UnknownProduct {
        /// USB product id reported by the transport.
        product_id: u16,
    },

    /// No catalog entry of the product family matched the connected device.
    #[error("Connected device did not match any known part")]
    DeviceNotIdentified,

    /// An operation that needs a device descriptor ran before identification.
    #[error("Device has not been identified")]
    NotIdentified,

    /// Image data reaches into the bootloader region.
    #[error("Image too large: highest address 0x{got:04X}, maximum allowed 0x{max_allowed:04X}")]
    ImageTooLarge {
        /// Highest address an application may occupy.
        max_allowed: u32,
        /// Highest address present in the image.
        got: u32,
    },

    /// The device computed a different CRC over a flash range.
    #[error("Verification failed for 0x{start:04X}..=0x{end:04X}")]
    VerificationFailed {
        /// First address of the range.
        start: u16,
        /// Last address of the range (inclusive).
        end: u16,
    },

    /// Record payload length outside the protocol bounds.
    #[error("Record payload of {len} bytes cannot be encoded")]
    Encoding {
        /// Offending payload length.
        len: usize,
    },

    /// Bytes that do not form a valid record frame.
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// Page write with a data length other than the device page size.
    #[error("Page data must be exactly {expected} bytes, got {got}")]
    PageSize {
        /// Device page size.
        expected: usize,
        /// Length that was supplied.
        got: usize,
    },

    /// Address that is unaligned or inside the bootloader.
    #[error("Address 0x{addr:04X} is not a writable page address")]
    InvalidAddress {
        /// Offending address.
        addr: u32,
    },

    /// Image data running past the end of the address space.
    #[error("{len} bytes at 0x{addr:08X} overflow the address space")]
    AddressOverflow {
        /// Where the data starts.
        addr: u32,
        /// Number of bytes.
        len: usize,
    },

    /// Range with its start after its end.
    #[error("Invalid range 0x{start:04X}..=0x{end:04X}")]
    InvalidRange {
        /// First address.
        start: u16,
        /// Last address.
        end: u16,
    },

    /// Protocol traffic attempted after the device was told to run its application.
    #[error("Device has been reset; the bootloader session is over")]
    SessionEnded,

    /// The transport returned no status byte.
    #[error("No response from bootloader")]
    NoResponse,

    /// Communication timeout.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Operation stopped between pages at the embedding application's request.
    #[error("Operation interrupted")]
    Interrupted,

    /// Bootloader not found.
    #[error("Bootloader device not found")]
    DeviceNotFound,

    /// Unsupported transport or operation.
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

impl Error {
    /// Whether the error came from the device rejecting a record, as opposed
    /// to the transport or the caller.
    pub fn is_device_status(&self) -> bool {
        matches!(
            self,
            Self::Protocol { .. } | Self::UnknownStatus { .. } | Self::VerificationFailed { .. }
        )
    }
}
