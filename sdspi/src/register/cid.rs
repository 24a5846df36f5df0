//! CID (Card Identification) register

use super::{image, trailer_valid};
use crate::error::RegisterError;
use crate::REGISTER_SIZE;
use core::fmt;

/// Card identification register
///
/// Manufacturer, product and serial metadata. Read once during
/// initialization and never modified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct Cid {
    raw: [u8; REGISTER_SIZE],
}

static_assertions::assert_eq_size!(Cid, [u8; REGISTER_SIZE]);

impl Cid {
    /// Decode the first 16 bytes of `data`
    pub fn decode(data: &[u8]) -> Result<Self, RegisterError> {
        Ok(Self { raw: image(data)? })
    }

    /// Manufacturer ID (MID)
    pub const fn manufacturer_id(&self) -> u8 {
        self.raw[0]
    }

    /// OEM/Application ID (OID), usually two ASCII characters
    pub const fn oem_id(&self) -> u16 {
        u16::from_be_bytes([self.raw[1], self.raw[2]])
    }

    /// Product name (PNM) bytes, NUL padded
    pub fn product_name_raw(&self) -> [u8; 5] {
        [self.raw[3], self.raw[4], self.raw[5], self.raw[6], self.raw[7]]
    }

    /// Product name up to the first NUL, if it is valid UTF-8
    pub fn product_name(&self) -> Option<&str> {
        let name = &self.raw[3..8];
        let end = name.iter().position(|&b| b == 0).unwrap_or(name.len());
        core::str::from_utf8(&name[..end]).ok()
    }

    /// Product revision (PRV) as `(major, minor)`
    pub const fn product_revision(&self) -> (u8, u8) {
        (self.raw[8] >> 4, self.raw[8] & 0x0F)
    }

    /// Product serial number (PSN)
    pub const fn serial_number(&self) -> u32 {
        u32::from_be_bytes([self.raw[9], self.raw[10], self.raw[11], self.raw[12]])
    }

    /// Manufacturing year
    ///
    /// MDT occupies bits [19:8]: byte 13 bits [7:4] are reserved, the year
    /// offset is byte 13 bits [3:0] followed by byte 14 bits [7:4], and the
    /// month is byte 14 bits [3:0].
    pub const fn manufacturing_year(&self) -> u16 {
        2000 + ((((self.raw[13] & 0x0F) as u16) << 4) | ((self.raw[14] >> 4) as u16))
    }

    /// Manufacturing month (1-12)
    pub const fn manufacturing_month(&self) -> u8 {
        self.raw[14] & 0x0F
    }

    /// CRC7 field
    pub const fn crc(&self) -> u8 {
        self.raw[15] >> 1
    }

    /// Check the CRC7 and the always-1 bit
    pub fn is_valid(&self) -> bool {
        trailer_valid(&self.raw)
    }

    /// Copy of the raw register image
    pub const fn raw_copy(&self) -> [u8; REGISTER_SIZE] {
        self.raw
    }
}

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (major, minor) = self.product_revision();
        write!(
            f,
            "MID:{:#04x} OID:{:#06x} PNM:{} PRV:{}.{} PSN:{:#010x} MDT:{}-{:02}",
            self.manufacturer_id(),
            self.oem_id(),
            self.product_name().unwrap_or("?"),
            major,
            minor,
            self.serial_number(),
            self.manufacturing_year(),
            self.manufacturing_month()
        )
    }
}
