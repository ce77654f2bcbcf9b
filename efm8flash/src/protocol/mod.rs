//! Protocol implementations.

pub mod crc;
pub mod record;

// Re-export common types
pub use {
    crc::{crc16_xmodem, crc16_xmodem_update},
    record::{Command, FLASH_KEYS, LOCK_UNCHANGED, MAX_DATA_PER_RECORD, Record, Request, Status},
};
