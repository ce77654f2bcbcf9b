//! CRC16-CCITT (XMODEM variant).
//!
//! The bootloader's Verify command compares against this CRC: polynomial
//! 0x1021, initial value 0x0000, no reflection, no final XOR.

const POLY: u16 = 0x1021;

/// Compute the CRC16-XMODEM checksum of `data`.
pub fn crc16_xmodem(data: &[u8]) -> u16 {
    crc16_xmodem_update(0, data)
}

/// Continue a CRC16-XMODEM computation from a previous value.
pub fn crc16_xmodem_update(mut crc: u16, data: &[u8]) -> u16 {
    for &byte in data {
        crc ^= u16::from(byte) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ POLY
            } else {
                crc << 1
            };
        }
    }
    crc
}
