//! EFM8 bootloader record protocol.
//!
//! Every request sent to the bootloader is a single record and every record is
//! answered with exactly one status byte.
//!
//! ## Frame Format
//!
//! ```text
//! +-------+--------+-----+--------------------+
//! | Start | Length | CMD |      Payload       |
//! +-------+--------+-----+--------------------+
//! |   1   |   1    |  1  |     2..=130        |
//! +-------+--------+-----+--------------------+
//! | 0x24  | len+1  | cmd | big-endian fields  |
//! +-------+--------+-----+--------------------+
//! ```
//!
//! The length byte counts the command byte plus the payload.

use {
    crate::error::{Error, Result},
    byteorder::{BigEndian, ByteOrder},
    std::fmt,
};

/// Frame start byte (`$`).
pub const FRAME_START: u8 = 0x24;

/// Number of bytes preceding the payload (start, length, command).
pub const RECORD_HEADER_SIZE: usize = 3;

/// Smallest payload a record may carry.
pub const MIN_PAYLOAD: usize = 2;

/// Largest payload a record may carry.
pub const MAX_PAYLOAD: usize = 130;

/// Largest number of flash bytes carried by one Erase or Write record.
pub const MAX_DATA_PER_RECORD: usize = 128;

/// Setup key that unlocks flash erase/write.
pub const FLASH_KEYS: u16 = 0xA5F1;

/// Lock-record value meaning "leave this byte unchanged".
pub const LOCK_UNCHANGED: u8 = 0xFF;

/// Bootloader command codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[repr(u8)]
pub enum Command {
    /// Check the device against a candidate id.
    Identify = 0x30,
    /// Enable or disable flash modification.
    Setup = 0x31,
    /// Erase a page, then optionally write data into it.
    Erase = 0x32,
    /// Write data without erasing.
    Write = 0x33,
    /// Compare a CRC over a flash range.
    Verify = 0x34,
    /// Program the signature and lock bytes.
    Lock = 0x35,
    /// Reset into the application.
    RunApp = 0x36,
}

impl Command {
    /// Look up a command by its wire code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x30 => Some(Self::Identify),
            0x31 => Some(Self::Setup),
            0x32 => Some(Self::Erase),
            0x33 => Some(Self::Write),
            0x34 => Some(Self::Verify),
            0x35 => Some(Self::Lock),
            0x36 => Some(Self::RunApp),
            _ => None,
        }
    }

    /// Wire code of this command.
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Single-byte bootloader response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum Status {
    /// Command accepted (0x40).
    Ack,
    /// Address range not writable (0x41).
    RangeError,
    /// Identify id did not match (0x42).
    BadId,
    /// Verify CRC did not match (0x43).
    CrcError,
    /// Any other byte.
    Unknown(u8),
}

impl Status {
    /// ACK response byte.
    pub const ACK: u8 = 0x40;
    /// RANGE_ERROR response byte.
    pub const RANGE_ERROR: u8 = 0x41;
    /// BADID response byte.
    pub const BAD_ID: u8 = 0x42;
    /// CRC_ERROR response byte.
    pub const CRC_ERROR: u8 = 0x43;

    /// Raw byte for this status.
    pub fn code(self) -> u8 {
        match self {
            Self::Ack => Self::ACK,
            Self::RangeError => Self::RANGE_ERROR,
            Self::BadId => Self::BAD_ID,
            Self::CrcError => Self::CRC_ERROR,
            Self::Unknown(byte) => byte,
        }
    }

    /// Check if this is an ACK.
    pub fn is_ack(self) -> bool {
        self == Self::Ack
    }
}

impl From<u8> for Status {
    fn from(byte: u8) -> Self {
        match byte {
            Self::ACK => Self::Ack,
            Self::RANGE_ERROR => Self::RangeError,
            Self::BAD_ID => Self::BadId,
            Self::CRC_ERROR => Self::CrcError,
            other => Self::Unknown(other),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ack => write!(f, "ACK"),
            Self::RangeError => write!(f, "RANGE_ERROR"),
            Self::BadId => write!(f, "BADID"),
            Self::CrcError => write!(f, "CRC_ERROR"),
            Self::Unknown(byte) => write!(f, "0x{byte:02X}"),
        }
    }
}

/// A single outbound bootloader record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    command: Command,
    payload: Vec<u8>,
}

impl Record {
    /// Create a record from a command and a raw payload.
    ///
    /// The payload length is checked by [`Record::encode`].
    pub fn new(command: Command, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            command,
            payload: payload.into(),
        }
    }

    /// Identify record for a candidate device id.
    pub fn identify(device_id: u16) -> Self {
        let mut payload = [0u8; 2];
        BigEndian::write_u16(&mut payload, device_id);
        Self::new(Command::Identify, payload)
    }

    /// Setup record with explicit keys and flash bank.
    pub fn setup(keys: u16, bank: u8) -> Self {
        let mut payload = [0u8; 3];
        BigEndian::write_u16(&mut payload[..2], keys);
        payload[2] = bank;
        Self::new(Command::Setup, payload)
    }

    /// Setup record that enables flash modification.
    pub fn enable_modifications() -> Self {
        Self::setup(FLASH_KEYS, 0)
    }

    /// Setup record that disables flash modification.
    pub fn disable_modifications() -> Self {
        Self::setup(0x0000, 0)
    }

    /// Erase record: erase the page containing `addr`, then write `data`.
    ///
    /// An empty `data` is a pure page erase.
    pub fn erase(addr: u16, data: &[u8]) -> Result<Self> {
        if data.len() > MAX_DATA_PER_RECORD {
            return Err(Error::Encoding {
                len: data.len() + 2,
            });
        }
        Ok(Self::new(Command::Erase, address_payload(addr, data)))
    }

    /// Write record: write `data` at `addr` without erasing.
    pub fn write(addr: u16, data: &[u8]) -> Result<Self> {
        if data.is_empty() || data.len() > MAX_DATA_PER_RECORD {
            return Err(Error::Encoding {
                len: data.len() + 2,
            });
        }
        Ok(Self::new(Command::Write, address_payload(addr, data)))
    }

    /// Verify record over `start..=end`.
    pub fn verify(start: u16, end: u16, crc: u16) -> Self {
        let mut payload = [0u8; 6];
        BigEndian::write_u16(&mut payload[0..2], start);
        BigEndian::write_u16(&mut payload[2..4], end);
        BigEndian::write_u16(&mut payload[4..6], crc);
        Self::new(Command::Verify, payload)
    }

    /// Lock record. [`LOCK_UNCHANGED`] in either position leaves that byte alone.
    pub fn lock(signature: u8, lock: u8) -> Self {
        Self::new(Command::Lock, [signature, lock])
    }

    /// RunApp record. The option field is ignored by the bootloader.
    pub fn run_app(option: u16) -> Self {
        let mut payload = [0u8; 2];
        BigEndian::write_u16(&mut payload, option);
        Self::new(Command::RunApp, payload)
    }

    /// Get the command.
    pub fn command(&self) -> Command {
        self.command
    }

    /// Get the payload.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Build the wire frame.
    #[allow(clippy::cast_possible_truncation)]
    pub fn encode(&self) -> Result<Vec<u8>> {
        let len = self.payload.len();
        if !(MIN_PAYLOAD..=MAX_PAYLOAD).contains(&len) {
            return Err(Error::Encoding { len });
        }

        let mut frame = Vec::with_capacity(RECORD_HEADER_SIZE + len);
        frame.push(FRAME_START);
        // Safe cast: len + 1 <= 131
        frame.push((len + 1) as u8);
        frame.push(self.command.code());
        frame.extend_from_slice(&self.payload);
        Ok(frame)
    }

    /// Parse a wire frame back into a record.
    pub fn decode(frame: &[u8]) -> Result<Self> {
        if frame.len() < RECORD_HEADER_SIZE {
            return Err(Error::InvalidFrame(format!(
                "frame of {} bytes is shorter than the header",
                frame.len()
            )));
        }
        if frame[0] != FRAME_START {
            return Err(Error::InvalidFrame(format!(
                "bad start byte 0x{:02X}",
                frame[0]
            )));
        }

        let len = usize::from(frame[1]);
        if frame.len() != len + 2 {
            return Err(Error::InvalidFrame(format!(
                "length field {len} does not match frame of {} bytes",
                frame.len()
            )));
        }

        let command = Command::from_code(frame[2]).ok_or_else(|| {
            Error::InvalidFrame(format!("unknown command 0x{:02X}", frame[2]))
        })?;
        let payload = &frame[RECORD_HEADER_SIZE..];
        if !(MIN_PAYLOAD..=MAX_PAYLOAD).contains(&payload.len()) {
            return Err(Error::Encoding { len: payload.len() });
        }

        Ok(Self::new(command, payload))
    }

    /// Interpret the payload according to the command.
    pub fn request(&self) -> Result<Request<'_>> {
        let p = self.payload.as_slice();
        let fixed = |expected: usize| {
            if p.len() == expected {
                Ok(())
            } else {
                Err(Error::InvalidFrame(format!(
                    "{:?} payload must be {expected} bytes, got {}",
                    self.command,
                    p.len()
                )))
            }
        };
        let addressed = || {
            if p.len() >= 2 {
                Ok(())
            } else {
                Err(Error::InvalidFrame(format!(
                    "{:?} payload needs a 2-byte address, got {} bytes",
                    self.command,
                    p.len()
                )))
            }
        };

        let request = match self.command {
            Command::Identify => {
                fixed(2)?;
                Request::Identify {
                    device_id: BigEndian::read_u16(p),
                }
            },
            Command::Setup => {
                fixed(3)?;
                Request::Setup {
                    keys: BigEndian::read_u16(p),
                    bank: p[2],
                }
            },
            Command::Erase => {
                addressed()?;
                Request::Erase {
                    addr: BigEndian::read_u16(p),
                    data: &p[2..],
                }
            },
            Command::Write => {
                addressed()?;
                Request::Write {
                    addr: BigEndian::read_u16(p),
                    data: &p[2..],
                }
            },
            Command::Verify => {
                fixed(6)?;
                Request::Verify {
                    start: BigEndian::read_u16(&p[0..2]),
                    end: BigEndian::read_u16(&p[2..4]),
                    crc: BigEndian::read_u16(&p[4..6]),
                }
            },
            Command::Lock => {
                fixed(2)?;
                Request::Lock {
                    signature: p[0],
                    lock: p[1],
                }
            },
            Command::RunApp => {
                fixed(2)?;
                Request::RunApp {
                    option: BigEndian::read_u16(p),
                }
            },
        };
        Ok(request)
    }
}

/// A record payload interpreted according to its command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request<'a> {
    /// Identify against `device_id`.
    Identify {
        /// Candidate id (family prefix | chip id).
        device_id: u16,
    },
    /// Enable (keys = [`FLASH_KEYS`]) or disable modification.
    Setup {
        /// Key value.
        keys: u16,
        /// Flash bank.
        bank: u8,
    },
    /// Erase the page at `addr`, then write `data`.
    Erase {
        /// Target address.
        addr: u16,
        /// Data written after the erase (may be empty).
        data: &'a [u8],
    },
    /// Write `data` at `addr`.
    Write {
        /// Target address.
        addr: u16,
        /// Data to write.
        data: &'a [u8],
    },
    /// CRC check over `start..=end`.
    Verify {
        /// First address.
        start: u16,
        /// Last address (inclusive).
        end: u16,
        /// Expected CRC16-XMODEM.
        crc: u16,
    },
    /// Signature/lock byte programming.
    Lock {
        /// Bootloader signature byte.
        signature: u8,
        /// Flash lock byte.
        lock: u8,
    },
    /// Reset into the application.
    RunApp {
        /// Unused option field.
        option: u16,
    },
}

fn address_payload(addr: u16, data: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(2 + data.len());
    payload.extend_from_slice(&[0, 0]);
    BigEndian::write_u16(&mut payload[..2], addr);
    payload.extend_from_slice(data);
    payload
}
