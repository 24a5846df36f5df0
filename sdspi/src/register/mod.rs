//! Card register decoding
//!
//! CID and CSD images are 16 bytes, most significant byte first, with the
//! CRC7 in bits 7:1 of the last byte and bit 0 always set.

pub mod cid;
pub mod csd;

use crate::crc::crc7;
use crate::error::RegisterError;
use crate::REGISTER_SIZE;
use core::fmt;

/// Powers of ten selected by the 3-bit unit code of TAAC and TRAN_SPEED
const LOG10_TABLE: [u64; 8] = [
    1,
    10,
    100,
    1_000,
    10_000,
    100_000,
    1_000_000,
    10_000_000,
];

/// Time value multipliers in tenths (code 0 is reserved)
const TIME_VALUE_TENTHS: [u64; 16] = [
    0, 10, 12, 13, 15, 20, 25, 30, 35, 40, 45, 50, 55, 60, 70, 80,
];

/// Copy the first 16 bytes of `data` into a register image
pub(crate) fn image(data: &[u8]) -> Result<[u8; REGISTER_SIZE], RegisterError> {
    let mut raw = [0u8; REGISTER_SIZE];
    let src = data
        .get(..REGISTER_SIZE)
        .ok_or(RegisterError::ShortBuffer(data.len()))?;
    raw.copy_from_slice(src);
    Ok(raw)
}

/// CRC7 over bytes 0..15 matches bits 7:1 of byte 15 and bit 0 is set
pub(crate) fn trailer_valid(raw: &[u8; REGISTER_SIZE]) -> bool {
    let trailer = raw[REGISTER_SIZE - 1];
    crc7(&raw[..REGISTER_SIZE - 1]) == trailer >> 1 && trailer & 1 == 1
}

/// TAAC - asynchronous part of the data access time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Taac(pub u8);

impl Taac {
    /// Time unit in nanoseconds (1ns to 10ms)
    pub const fn unit_ns(&self) -> u64 {
        LOG10_TABLE[(self.0 & 0x07) as usize]
    }

    /// Access time in nanoseconds, unit scaled by the time value
    pub const fn access_time_ns(&self) -> u64 {
        self.unit_ns() * TIME_VALUE_TENTHS[((self.0 >> 3) & 0x0F) as usize] / 10
    }
}

/// NSAC - clock-dependent part of the data access time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Nsac(pub u8);

impl Nsac {
    /// Access time in clock cycles (units of 100)
    pub const fn clock_cycles(&self) -> u32 {
        self.0 as u32 * 100
    }
}

/// TRAN_SPEED - maximum data transfer rate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferSpeed(pub u8);

impl TransferSpeed {
    /// Rate unit in kbit/s
    pub const fn rate_kbits(&self) -> u64 {
        100 * LOG10_TABLE[(self.0 & 0x07) as usize]
    }

    /// Maximum rate in kbit/s, unit scaled by the time value
    pub const fn max_rate_kbits(&self) -> u64 {
        self.rate_kbits() * TIME_VALUE_TENTHS[((self.0 >> 3) & 0x0F) as usize] / 10
    }
}

/// CCC - supported card command classes, one bit per class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandClasses(pub u16);

impl CommandClasses {
    /// Check if command class `class` (0-11) is supported
    pub const fn supports(&self, class: u8) -> bool {
        class < 12 && (self.0 >> class) & 1 != 0
    }

    /// Raw 12-bit bitmap
    pub const fn bits(&self) -> u16 {
        self.0
    }
}

/// FILE_FORMAT - how the card contents are laid out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    /// Hard disk like, with a partition table
    Partition,
    /// DOS FAT without a partition table (floppy like)
    DosFat,
    /// Universal file format
    Universal,
    /// Other or unknown
    Unknown,
}

impl FileFormat {
    /// Decode the 2-bit field
    pub const fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => FileFormat::Partition,
            1 => FileFormat::DosFat,
            2 => FileFormat::Universal,
            _ => FileFormat::Unknown,
        }
    }
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FileFormat::Partition => "partition",
            FileFormat::DosFat => "DOS/FAT",
            FileFormat::Universal => "UFF",
            FileFormat::Unknown => "unknown",
        };
        f.write_str(name)
    }
}
