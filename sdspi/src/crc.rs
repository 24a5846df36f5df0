//! Checksums used by the SD protocol
//!
//! CRC7 protects command frames and the CID/CSD register images; CRC16
//! (CCITT polynomial) protects data blocks.

/// CRC7 generator polynomial x^7 + x^3 + 1, without the x^7 term
const CRC7_POLY: u8 = 0x09;

/// CRC16 generator polynomial x^16 + x^12 + x^5 + 1, without the x^16 term
const CRC16_POLY: u16 = 0x1021;

/// Byte-wise CRC7 table. Entries hold the remainder shifted left by one,
/// so the running value lines up with the next input byte.
static CRC7_TABLE: [u8; 256] = build_crc7_table();

const fn build_crc7_table() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u8;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ (CRC7_POLY << 1)
            } else {
                crc << 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// Calculate the 7-bit CRC of `data`.
///
/// The result occupies bits 6:0. Command frames and registers store it in
/// bits 7:1 of their trailing byte, with bit 0 always set.
pub fn crc7(data: &[u8]) -> u8 {
    let shifted = data
        .iter()
        .fold(0u8, |crc, &byte| CRC7_TABLE[(crc ^ byte) as usize]);
    shifted >> 1
}

/// Build the trailing byte of a frame or register: CRC7 in bits 7:1 and
/// the stop/always-1 bit in bit 0.
#[inline]
pub fn crc7_trailer(data: &[u8]) -> u8 {
    (crc7(data) << 1) | 1
}

/// Calculate the CRC16-CCITT of `data` (MSB first, zero initial value).
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ CRC16_POLY;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}
