//! Card session
//!
//! [`SdCard`] owns the bus, chip-select line and clock for one card and
//! holds what initialization learned about it. Initialization lives in
//! [`init`](crate::init), block I/O in [`transfer`](crate::transfer) and
//! command issue in [`command`](crate::command).

use crate::config::SdConfig;
use crate::hal::{ChipSelect, Clock, SpiBus};
use crate::register::cid::Cid;
use crate::register::csd::Csd;
use crate::BLOCK_SIZE;
use core::fmt;

/// Card generation detected during initialization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CardKind {
    /// Standard capacity, version 1.x
    SdV1,
    /// Standard capacity, version 2.0 or later
    SdV2,
    /// High or extended capacity (SDHC/SDXC), block addressed
    Sdhc,
}

impl CardKind {
    /// Check if the card takes block numbers rather than byte offsets
    pub const fn is_block_addressed(&self) -> bool {
        matches!(self, CardKind::Sdhc)
    }
}

impl fmt::Display for CardKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CardKind::SdV1 => write!(f, "SD v1"),
            CardKind::SdV2 => write!(f, "SD v2"),
            CardKind::Sdhc => write!(f, "SDHC/SDXC"),
        }
    }
}

/// An SD card attached over SPI
///
/// Not internally synchronized: register reads and block transfers share
/// one scratch buffer. Use [`SharedSdCard`](crate::SharedSdCard) for
/// access from more than one thread.
pub struct SdCard<B, C, T> {
    pub(crate) bus: B,
    pub(crate) cs: C,
    pub(crate) clock: T,
    pub(crate) config: SdConfig,
    pub(crate) kind: Option<CardKind>,
    pub(crate) cid: Option<Cid>,
    pub(crate) csd: Option<Csd>,
    pub(crate) block_count: u64,
    pub(crate) last_crc: u16,
    pub(crate) scratch: [u8; BLOCK_SIZE],
}

impl<B, C, T> SdCard<B, C, T>
where
    B: SpiBus,
    C: ChipSelect,
    T: Clock,
{
    /// Create a session. The card is not touched until
    /// [`initialize`](Self::initialize) runs.
    pub fn new(bus: B, cs: C, clock: T, config: SdConfig) -> Self {
        Self {
            bus,
            cs,
            clock,
            config,
            kind: None,
            cid: None,
            csd: None,
            block_count: 0,
            last_crc: 0,
            scratch: [0; BLOCK_SIZE],
        }
    }

    /// Number of addressable 512-byte blocks, 0 before initialization
    pub fn block_count(&self) -> u64 {
        self.block_count
    }

    /// Capacity in bytes of the addressable blocks
    pub fn capacity_bytes(&self) -> u64 {
        self.block_count * BLOCK_SIZE as u64
    }

    /// Card identification captured by the last successful initialization
    pub fn cid(&self) -> Option<Cid> {
        self.cid
    }

    /// Card specific data captured by the last successful initialization
    pub fn csd(&self) -> Option<Csd> {
        self.csd
    }

    /// Card generation, once initialized
    pub fn card_kind(&self) -> Option<CardKind> {
        self.kind
    }

    /// CRC16 trailer of the most recent block read
    pub fn last_read_crc16(&self) -> u16 {
        self.last_crc
    }

    /// Check if block I/O is available
    pub fn is_initialized(&self) -> bool {
        self.kind.is_some()
    }

    /// Driver configuration
    pub fn config(&self) -> &SdConfig {
        &self.config
    }

    /// Give back the bus, chip-select line and clock
    pub fn release(self) -> (B, C, T) {
        (self.bus, self.cs, self.clock)
    }
}

impl<B, C, T> fmt::Debug for SdCard<B, C, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SdCard")
            .field("kind", &self.kind)
            .field("block_count", &self.block_count)
            .field("last_crc", &self.last_crc)
            .finish_non_exhaustive()
    }
}
