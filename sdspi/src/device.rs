//! Block device facade
//!
//! Presents an initialized card through the `&self` block interface that
//! filesystem code expects, with the session behind a spin lock.

use crate::card::SdCard;
use crate::error::{SdError, SdResult};
use crate::hal::{ChipSelect, Clock, SpiBus};
use crate::BLOCK_SIZE;
use core::fmt;
use core::sync::atomic::{AtomicU32, Ordering};
use spin::Mutex;

// ============================================================================
// Block Device Trait
// ============================================================================

/// Fixed-size block storage
pub trait BlockDevice {
    /// Error returned by block I/O
    type Error;

    /// Get block size in bytes
    fn block_size(&self) -> u32;

    /// Get total number of blocks
    fn block_count(&self) -> u64;

    /// Get device capacity in bytes
    fn capacity(&self) -> u64 {
        self.block_count() * self.block_size() as u64
    }

    /// Read one block. `buffer` must be exactly one block long.
    fn read_block(&self, block: u64, buffer: &mut [u8]) -> Result<(), Self::Error>;

    /// Write one block. `buffer` must be exactly one block long.
    fn write_block(&self, block: u64, buffer: &[u8]) -> Result<(), Self::Error>;

    /// Read consecutive blocks starting at `start`.
    ///
    /// # Returns
    /// Number of blocks read
    fn read_blocks(&self, start: u64, buffer: &mut [u8]) -> Result<usize, Self::Error> {
        let size = self.block_size() as usize;
        let mut count = 0;
        for chunk in buffer.chunks_mut(size) {
            self.read_block(start + count as u64, chunk)?;
            count += 1;
        }
        Ok(count)
    }

    /// Write consecutive blocks starting at `start`.
    ///
    /// # Returns
    /// Number of blocks written
    fn write_blocks(&self, start: u64, buffer: &[u8]) -> Result<usize, Self::Error> {
        let size = self.block_size() as usize;
        let mut count = 0;
        for chunk in buffer.chunks(size) {
            self.write_block(start + count as u64, chunk)?;
            count += 1;
        }
        Ok(count)
    }
}

// ============================================================================
// Device Statistics
// ============================================================================

/// Device I/O statistics.
///
/// Counters are 32-bit atomics and wrap on overflow.
#[derive(Debug, Default)]
pub struct DeviceStats {
    /// Total blocks read
    pub blocks_read: AtomicU32,
    /// Total blocks written
    pub blocks_written: AtomicU32,
    /// Read errors
    pub read_errors: AtomicU32,
    /// Write errors
    pub write_errors: AtomicU32,
}

impl DeviceStats {
    /// Create new stats
    pub const fn new() -> Self {
        Self {
            blocks_read: AtomicU32::new(0),
            blocks_written: AtomicU32::new(0),
            read_errors: AtomicU32::new(0),
            write_errors: AtomicU32::new(0),
        }
    }

    /// Record read
    #[inline]
    pub fn record_read(&self, blocks: u32) {
        self.blocks_read.fetch_add(blocks, Ordering::Relaxed);
    }

    /// Record write
    #[inline]
    pub fn record_write(&self, blocks: u32) {
        self.blocks_written.fetch_add(blocks, Ordering::Relaxed);
    }

    /// Record read error
    #[inline]
    pub fn record_read_error(&self) {
        self.read_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record write error
    #[inline]
    pub fn record_write_error(&self) {
        self.write_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Get snapshot of stats
    pub fn snapshot(&self) -> DeviceStatsSnapshot {
        DeviceStatsSnapshot {
            blocks_read: u64::from(self.blocks_read.load(Ordering::Relaxed)),
            blocks_written: u64::from(self.blocks_written.load(Ordering::Relaxed)),
            read_errors: u64::from(self.read_errors.load(Ordering::Relaxed)),
            write_errors: u64::from(self.write_errors.load(Ordering::Relaxed)),
        }
    }
}

/// Snapshot of device statistics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeviceStatsSnapshot {
    /// Total blocks read
    pub blocks_read: u64,
    /// Total blocks written
    pub blocks_written: u64,
    /// Read errors
    pub read_errors: u64,
    /// Write errors
    pub write_errors: u64,
}

impl DeviceStatsSnapshot {
    /// Calculate bytes read
    pub fn bytes_read(&self) -> u64 {
        self.blocks_read * BLOCK_SIZE as u64
    }

    /// Calculate bytes written
    pub fn bytes_written(&self) -> u64 {
        self.blocks_written * BLOCK_SIZE as u64
    }
}

// ============================================================================
// Shared Card
// ============================================================================

/// An [`SdCard`] behind a spin lock.
///
/// `Sync` whenever the bus, chip-select line and clock are `Send`, so one
/// card can serve several threads.
pub struct SharedSdCard<B, C, T> {
    card: Mutex<SdCard<B, C, T>>,
    stats: DeviceStats,
}

impl<B, C, T> SharedSdCard<B, C, T>
where
    B: SpiBus,
    C: ChipSelect,
    T: Clock,
{
    /// Wrap a session
    pub fn new(card: SdCard<B, C, T>) -> Self {
        Self {
            card: Mutex::new(card),
            stats: DeviceStats::new(),
        }
    }

    /// Run the initialization sequence under the lock
    pub fn initialize(&self) -> SdResult<(), B::Error> {
        self.card.lock().initialize()
    }

    /// Run `f` with exclusive access to the session
    pub fn with_card<R>(&self, f: impl FnOnce(&mut SdCard<B, C, T>) -> R) -> R {
        f(&mut self.card.lock())
    }

    /// I/O statistics
    pub fn stats(&self) -> &DeviceStats {
        &self.stats
    }

    /// Unwrap the session
    pub fn into_inner(self) -> SdCard<B, C, T> {
        self.card.into_inner()
    }
}

impl<B, C, T> fmt::Debug for SharedSdCard<B, C, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedSdCard")
            .field("stats", &self.stats.snapshot())
            .finish_non_exhaustive()
    }
}

impl<B, C, T> BlockDevice for SharedSdCard<B, C, T>
where
    B: SpiBus,
    C: ChipSelect,
    T: Clock,
{
    type Error = SdError<B::Error>;

    fn block_size(&self) -> u32 {
        BLOCK_SIZE as u32
    }

    fn block_count(&self) -> u64 {
        self.card.lock().block_count()
    }

    fn read_block(&self, block: u64, buffer: &mut [u8]) -> Result<(), Self::Error> {
        let result = self.card.lock().read_block(block, buffer);
        match result {
            Ok(()) => self.stats.record_read(1),
            Err(_) => self.stats.record_read_error(),
        }
        result
    }

    fn write_block(&self, block: u64, buffer: &[u8]) -> Result<(), Self::Error> {
        let result = self.card.lock().write_block(block, buffer);
        match result {
            Ok(()) => self.stats.record_write(1),
            Err(_) => self.stats.record_write_error(),
        }
        result
    }
}
