//! CSD (Card Specific Data) register
//!
//! Version 1.0 (standard capacity) and 2.0 (high capacity) share the
//! same 16-byte image and most field offsets. The capacity fields after
//! byte 5 differ and are reached through the [`CsdV1`] and [`CsdV2`] views.

use super::{image, trailer_valid, CommandClasses, FileFormat, Nsac, Taac, TransferSpeed};
use crate::error::RegisterError;
use crate::REGISTER_SIZE;
use core::fmt;
use core::ops::Deref;

/// CSD structure version
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsdVersion {
    /// CSD Version 1.0 (SDSC)
    V1,
    /// CSD Version 2.0 (SDHC/SDXC)
    V2,
    /// Reserved structure code
    Reserved(u8),
}

/// CSD register (128 bits)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct Csd {
    raw: [u8; REGISTER_SIZE],
}

static_assertions::assert_eq_size!(Csd, [u8; REGISTER_SIZE]);

impl Csd {
    /// Decode the first 16 bytes of `data`
    pub fn decode(data: &[u8]) -> Result<Self, RegisterError> {
        Ok(Self { raw: image(data)? })
    }

    /// CSD_STRUCTURE field (bits 7:6 of byte 0)
    pub const fn structure(&self) -> u8 {
        self.raw[0] >> 6
    }

    /// Get CSD structure version
    pub const fn version(&self) -> CsdVersion {
        match self.structure() {
            0 => CsdVersion::V1,
            1 => CsdVersion::V2,
            code => CsdVersion::Reserved(code),
        }
    }

    /// View as a version 1.0 register
    pub fn as_v1(&self) -> Result<CsdV1, RegisterError> {
        match self.version() {
            CsdVersion::V1 => Ok(CsdV1(*self)),
            found => Err(RegisterError::WrongVersion {
                expected: CsdVersion::V1,
                found,
            }),
        }
    }

    /// View as a version 2.0 register
    pub fn as_v2(&self) -> Result<CsdV2, RegisterError> {
        match self.version() {
            CsdVersion::V2 => Ok(CsdV2(*self)),
            found => Err(RegisterError::WrongVersion {
                expected: CsdVersion::V2,
                found,
            }),
        }
    }

    /// TAAC - Data read access time
    pub const fn taac(&self) -> Taac {
        Taac(self.raw[1])
    }

    /// NSAC - Data read access time in clock cycles
    pub const fn nsac(&self) -> Nsac {
        Nsac(self.raw[2])
    }

    /// TRAN_SPEED - Max data transfer rate
    pub const fn transfer_speed(&self) -> TransferSpeed {
        TransferSpeed(self.raw[3])
    }

    /// CCC - Card command classes
    pub const fn command_classes(&self) -> CommandClasses {
        CommandClasses(((self.raw[4] as u16) << 4) | ((self.raw[5] >> 4) as u16))
    }

    /// READ_BL_LEN exponent
    pub const fn read_block_len_exp(&self) -> u8 {
        self.raw[5] & 0x0F
    }

    /// Max read block length in bytes
    pub const fn read_block_len(&self) -> u16 {
        1 << self.read_block_len_exp()
    }

    /// READ_BL_PARTIAL - Partial blocks for read allowed
    pub const fn allows_read_partial(&self) -> bool {
        (self.raw[6] & 0x80) != 0
    }

    /// WRITE_BLK_MISALIGN - Written block may span physical blocks
    pub const fn allows_write_misalignment(&self) -> bool {
        (self.raw[6] & 0x40) != 0
    }

    /// READ_BLK_MISALIGN - Read block may span physical blocks
    pub const fn allows_read_misalignment(&self) -> bool {
        (self.raw[6] & 0x20) != 0
    }

    /// DSR_IMP - Driver stage register implemented
    pub const fn implements_dsr(&self) -> bool {
        (self.raw[6] & 0x10) != 0
    }

    /// ERASE_BLK_EN - Erase single 512-byte units
    pub const fn erase_block_enabled(&self) -> bool {
        (self.raw[10] & 0x40) != 0
    }

    /// SECTOR_SIZE - Erase unit in write blocks
    pub const fn erase_sector_size(&self) -> u8 {
        (((self.raw[10] & 0x3F) << 1) | (self.raw[11] >> 7)) + 1
    }

    /// WP_GRP_SIZE - Write protect group in erase sectors
    pub const fn wp_group_size(&self) -> u8 {
        (self.raw[11] & 0x7F) + 1
    }

    /// WP_GRP_ENABLE - Group write protection available
    pub const fn wp_group_enabled(&self) -> bool {
        (self.raw[12] & 0x80) != 0
    }

    /// R2W_FACTOR - Write time as a power-of-two multiple of read time
    pub const fn read_to_write_factor(&self) -> u8 {
        (self.raw[12] >> 2) & 0x07
    }

    /// WRITE_BL_LEN exponent
    pub const fn write_block_len_exp(&self) -> u8 {
        ((self.raw[12] & 0x03) << 2) | (self.raw[13] >> 6)
    }

    /// Max write block length in bytes
    pub const fn write_block_len(&self) -> u16 {
        1 << self.write_block_len_exp()
    }

    /// WRITE_BL_PARTIAL - Partial blocks for write allowed
    pub const fn allows_write_partial(&self) -> bool {
        (self.raw[13] & 0x20) != 0
    }

    /// FILE_FORMAT_GRP
    pub const fn file_format_group(&self) -> bool {
        (self.raw[14] & 0x80) != 0
    }

    /// COPY - Contents were copied rather than original
    pub const fn is_copy(&self) -> bool {
        (self.raw[14] & 0x40) != 0
    }

    /// PERM_WRITE_PROTECT
    pub const fn perm_write_protected(&self) -> bool {
        (self.raw[14] & 0x20) != 0
    }

    /// TMP_WRITE_PROTECT
    pub const fn tmp_write_protected(&self) -> bool {
        (self.raw[14] & 0x10) != 0
    }

    /// FILE_FORMAT
    pub const fn file_format(&self) -> FileFormat {
        FileFormat::from_bits(self.raw[14] >> 2)
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

    /// Device capacity in bytes (0 for reserved structure versions)
    pub fn capacity_bytes(&self) -> u64 {
        match self.version() {
            CsdVersion::V1 => CsdV1(*self).capacity_bytes(),
            CsdVersion::V2 => CsdV2(*self).capacity_bytes(),
            CsdVersion::Reserved(_) => 0,
        }
    }

    /// Number of read blocks: capacity divided by the read block length
    pub fn block_count(&self) -> u64 {
        match self.read_block_len() {
            0 => 0,
            len => self.capacity_bytes() / len as u64,
        }
    }
}

impl fmt::Display for Csd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let CsdVersion::Reserved(code) = self.version() {
            return write!(f, "CSD structure {} not supported", code);
        }
        writeln!(f, "version: {}", self.structure() + 1)?;
        writeln!(f, "capacity: {} bytes", self.capacity_bytes())?;
        writeln!(f, "access time: {} ns", self.taac().access_time_ns())?;
        writeln!(f, "access clocks: {}", self.nsac().clock_cycles())?;
        writeln!(f, "transfer rate: {} kbit/s", self.transfer_speed().max_rate_kbits())?;
        writeln!(f, "command classes: {:#05x}", self.command_classes().bits())?;
        writeln!(f, "read block: {}", self.read_block_len())?;
        writeln!(f, "read partial: {}", self.allows_read_partial() as u8)?;
        writeln!(f, "write misalign: {}", self.allows_write_misalignment() as u8)?;
        writeln!(f, "read misalign: {}", self.allows_read_misalignment() as u8)?;
        writeln!(f, "dsr: {}", self.implements_dsr() as u8)?;
        writeln!(f, "erase block: {}", self.erase_block_enabled() as u8)?;
        writeln!(f, "erase sector: {}", self.erase_sector_size())?;
        writeln!(f, "wp group size: {}", self.wp_group_size())?;
        writeln!(f, "wp group: {}", self.wp_group_enabled() as u8)?;
        writeln!(f, "r2w factor: {}", self.read_to_write_factor())?;
        writeln!(f, "write block: {}", self.write_block_len())?;
        writeln!(f, "write partial: {}", self.allows_write_partial() as u8)?;
        writeln!(f, "file format: {}", self.file_format())?;
        writeln!(f, "tmp write protect: {}", self.tmp_write_protected() as u8)?;
        writeln!(f, "perm write protect: {}", self.perm_write_protected() as u8)?;
        writeln!(f, "copy: {}", self.is_copy() as u8)?;
        write!(f, "file format group: {}", self.file_format_group() as u8)
    }
}

/// Version 1.0 view of a [`Csd`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CsdV1(Csd);

impl CsdV1 {
    /// C_SIZE - 12 bits spread over bytes 6, 7 and 8
    pub const fn c_size(&self) -> u16 {
        let raw = &self.0.raw;
        (((raw[6] & 0x03) as u16) << 10) | ((raw[7] as u16) << 2) | ((raw[8] >> 6) as u16)
    }

    /// C_SIZE_MULT - 3 bits spread over bytes 9 and 10
    pub const fn c_size_mult(&self) -> u8 {
        ((self.0.raw[9] & 0x03) << 1) | (self.0.raw[10] >> 7)
    }

    /// Block count multiplier, `2^(C_SIZE_MULT + 2)`
    pub const fn mult(&self) -> u16 {
        1 << (self.c_size_mult() + 2)
    }

    /// `(C_SIZE + 1) * MULT * READ_BL_LEN` bytes
    pub const fn capacity_bytes(&self) -> u64 {
        (self.c_size() as u64 + 1) * self.mult() as u64 * self.0.read_block_len() as u64
    }

    /// VDD_R_CURR_MIN and VDD_R_CURR_MAX codes
    pub const fn vdd_read_current(&self) -> (u8, u8) {
        ((self.0.raw[8] >> 3) & 0x07, self.0.raw[8] & 0x07)
    }

    /// VDD_W_CURR_MIN and VDD_W_CURR_MAX codes
    pub const fn vdd_write_current(&self) -> (u8, u8) {
        (self.0.raw[9] >> 5, (self.0.raw[9] >> 2) & 0x07)
    }
}

impl Deref for CsdV1 {
    type Target = Csd;

    fn deref(&self) -> &Csd {
        &self.0
    }
}

/// Version 2.0 view of a [`Csd`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CsdV2(Csd);

impl CsdV2 {
    /// C_SIZE - 22 bits in bytes 7 to 9
    pub const fn c_size(&self) -> u32 {
        let raw = &self.0.raw;
        (((raw[7] & 0x3F) as u32) << 16) | ((raw[8] as u32) << 8) | raw[9] as u32
    }

    /// `C_SIZE * 512000` bytes
    pub const fn capacity_bytes(&self) -> u64 {
        self.c_size() as u64 * 512_000
    }
}

impl Deref for CsdV2 {
    type Target = Csd;

    fn deref(&self) -> &Csd {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{csd_v1_image, csd_v2_image, seal};

    #[test]
    fn test_v2_capacity() {
        let csd = Csd::decode(&csd_v2_image()).unwrap();
        assert_eq!(csd.version(), CsdVersion::V2);
        let v2 = csd.as_v2().unwrap();
        assert_eq!(v2.c_size(), 7562);
        assert_eq!(csd.capacity_bytes(), 7562 * 512_000);
        assert_eq!(csd.capacity_bytes(), 3_871_744_000);
        assert_eq!(csd.read_block_len(), 512);
        assert_eq!(csd.block_count(), 7_562_000);
        assert!(csd.is_valid());
    }

    #[test]
    fn test_v2_wide_c_size() {
        let mut raw = csd_v2_image();
        raw[7] = 0x3F;
        raw[8] = 0xFF;
        raw[9] = 0xFF;
        let v2 = Csd::decode(&seal(raw)).unwrap().as_v2().unwrap();
        assert_eq!(v2.c_size(), 0x3F_FFFF);
        assert_eq!(v2.capacity_bytes(), 0x3F_FFFF * 512_000);
    }

    #[test]
    fn test_v1_capacity() {
        let csd = Csd::decode(&csd_v1_image()).unwrap();
        assert_eq!(csd.version(), CsdVersion::V1);
        let v1 = csd.as_v1().unwrap();
        assert_eq!(v1.c_size(), 3839);
        assert_eq!(v1.c_size_mult(), 7);
        assert_eq!(v1.mult(), 512);
        assert_eq!(csd.read_block_len_exp(), 9);
        assert_eq!(
            v1.capacity_bytes(),
            (3839 + 1) * (1 << (2 + 7)) * (1 << 9)
        );
        assert_eq!(csd.capacity_bytes(), 1_006_632_960);
        assert_eq!(csd.block_count(), 1_966_080);
    }

    #[test]
    fn test_v1_fields() {
        let csd = Csd::decode(&csd_v1_image()).unwrap();
        let v1 = csd.as_v1().unwrap();
        assert_eq!(csd.command_classes().bits(), 0x5F5);
        assert_eq!(csd.taac().unit_ns(), 1_000_000);
        assert_eq!(csd.taac().access_time_ns(), 1_500_000);
        assert_eq!(csd.nsac().clock_cycles(), 0);
        assert_eq!(csd.transfer_speed().rate_kbits(), 10_000);
        assert_eq!(csd.transfer_speed().max_rate_kbits(), 25_000);
        assert_eq!(v1.vdd_read_current(), (5, 5));
        assert_eq!(v1.vdd_write_current(), (6, 6));
        assert!(csd.allows_read_partial());
        assert!(!csd.allows_write_misalignment());
        assert!(!csd.allows_read_misalignment());
        assert!(!csd.implements_dsr());
        assert!(csd.erase_block_enabled());
        assert_eq!(csd.erase_sector_size(), 128);
        assert_eq!(csd.wp_group_size(), 1);
        assert!(csd.wp_group_enabled());
        assert_eq!(csd.read_to_write_factor(), 2);
        assert_eq!(csd.write_block_len(), 512);
        assert!(!csd.allows_write_partial());
        assert_eq!(csd.file_format(), FileFormat::DosFat);
        assert!(csd.is_copy());
        assert!(!csd.tmp_write_protected());
        assert!(!csd.perm_write_protected());
        assert!(!csd.file_format_group());
    }

    #[test]
    fn test_wrong_version_view() {
        let v1 = Csd::decode(&csd_v1_image()).unwrap();
        assert_eq!(
            v1.as_v2(),
            Err(RegisterError::WrongVersion {
                expected: CsdVersion::V2,
                found: CsdVersion::V1,
            })
        );

        let mut raw = csd_v2_image();
        raw[0] = 0xC0;
        let reserved = Csd::decode(&raw).unwrap();
        assert_eq!(reserved.version(), CsdVersion::Reserved(3));
        assert!(reserved.as_v1().is_err());
        assert_eq!(reserved.capacity_bytes(), 0);
        assert_eq!(reserved.block_count(), 0);
    }

    #[test]
    fn test_validity_bit_flips() {
        for image in [csd_v1_image(), csd_v2_image()] {
            assert!(Csd::decode(&image).unwrap().is_valid());
            for byte in 0..15 {
                for bit in 0..8 {
                    let mut raw = image;
                    raw[byte] ^= 1 << bit;
                    assert!(!Csd::decode(&raw).unwrap().is_valid(), "byte {} bit {}", byte, bit);
                }
            }
            let mut raw = image;
            raw[15] &= !1;
            assert!(!Csd::decode(&raw).unwrap().is_valid());
        }
    }

    #[test]
    fn test_display_dump() {
        let csd = Csd::decode(&csd_v2_image()).unwrap();
        let dump = csd.to_string();
        assert!(dump.starts_with("version: 2\ncapacity: 3871744000 bytes\n"));
        assert!(dump.contains("file format: partition\n"));
        assert!(dump.ends_with("file format group: 0"));
    }
}
