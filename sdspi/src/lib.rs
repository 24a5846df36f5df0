//! # Helix SD/SPI - SD card block driver
//!
//! Drives an SD or SDHC/SDXC memory card in its legacy SPI command mode:
//! power-up and identification, register capture, and raw 512-byte
//! sector I/O for filesystem or storage-pool code sitting above it.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  Card Session       │  initialize  │  read_block │ write_block  │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  Init Sequencer     │  CMD0 → CMD8 → ACMD41 → CMD58 → CMD16     │
//! │  Block Transfer     │  start token │ payload │ CRC │ busy wait  │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  Command Engine     │  6-byte frames │ R1 polling │ ACMD prefix │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  Register Decoder   │  CID │ CSD v1/v2      Checksums │ CRC7/16 │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  Collaborators      │  SpiBus │ ChipSelect │ Clock               │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! All operations are blocking and run to completion on the calling
//! thread. A [`SdCard`] owns its bus and chip-select line exclusively;
//! wrap it in a [`SharedSdCard`] to share it between threads.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

pub mod card;
pub mod command;
pub mod config;
pub mod crc;
pub mod device;
pub mod error;
pub mod hal;
pub mod init;
pub mod register;
pub mod transfer;

#[cfg(test)]
mod sim;

pub use card::{CardKind, SdCard};
pub use command::{CommandFrame, R1Status};
pub use config::SdConfig;
pub use device::{BlockDevice, DeviceStats, DeviceStatsSnapshot, SharedSdCard};
pub use error::{RegisterError, SdError, SdResult, Unsupported};
pub use hal::{ChipSelect, Clock, Deadline, SpiBus};
pub use register::cid::Cid;
pub use register::csd::{Csd, CsdV1, CsdV2, CsdVersion};

/// Size of one addressable block in bytes
pub const BLOCK_SIZE: usize = 512;

/// Size of the CID and CSD register images in bytes
pub const REGISTER_SIZE: usize = 16;

static_assertions::const_assert_eq!(BLOCK_SIZE, 1 << 9);
static_assertions::const_assert!(REGISTER_SIZE <= BLOCK_SIZE);
