//! Command protocol engine
//!
//! Builds 6-byte command frames, clocks them out and polls for the R1
//! status byte that answers every command in SPI mode.

use crate::card::SdCard;
use crate::crc::crc7_trailer;
use crate::error::{SdError, SdResult};
use crate::hal::{ChipSelect, Clock, Deadline, SpiBus};
use bitflags::bitflags;
use core::fmt;
use core::time::Duration;
use log::{trace, warn};

/// Command indices
pub mod cmd {
    /// GO_IDLE_STATE - Reset the card into SPI mode
    pub const GO_IDLE_STATE: u8 = 0;
    /// SEND_OP_COND - MMC operating condition
    pub const SEND_OP_COND: u8 = 1;
    /// ALL_SEND_CID
    pub const ALL_SEND_CID: u8 = 2;
    /// SEND_RELATIVE_ADDR
    pub const SEND_RELATIVE_ADDR: u8 = 3;
    /// SET_DSR
    pub const SET_DSR: u8 = 4;
    /// SWITCH_FUNC
    pub const SWITCH_FUNC: u8 = 6;
    /// SELECT_DESELECT_CARD
    pub const SELECT_DESELECT_CARD: u8 = 7;
    /// SEND_IF_COND - Interface condition and version probe
    pub const SEND_IF_COND: u8 = 8;
    /// SEND_CSD
    pub const SEND_CSD: u8 = 9;
    /// SEND_CID
    pub const SEND_CID: u8 = 10;
    /// STOP_TRANSMISSION
    pub const STOP_TRANSMISSION: u8 = 12;
    /// SEND_STATUS
    pub const SEND_STATUS: u8 = 13;
    /// GO_INACTIVE_STATE
    pub const GO_INACTIVE_STATE: u8 = 15;
    /// SET_BLOCKLEN
    pub const SET_BLOCKLEN: u8 = 16;
    /// READ_SINGLE_BLOCK
    pub const READ_SINGLE_BLOCK: u8 = 17;
    /// READ_MULTIPLE_BLOCK
    pub const READ_MULTIPLE_BLOCK: u8 = 18;
    /// WRITE_BLOCK
    pub const WRITE_BLOCK: u8 = 24;
    /// WRITE_MULTIPLE_BLOCK
    pub const WRITE_MULTIPLE_BLOCK: u8 = 25;
    /// PROGRAM_CSD
    pub const PROGRAM_CSD: u8 = 27;
    /// SET_WRITE_PROT
    pub const SET_WRITE_PROT: u8 = 28;
    /// CLR_WRITE_PROT
    pub const CLR_WRITE_PROT: u8 = 29;
    /// SEND_WRITE_PROT
    pub const SEND_WRITE_PROT: u8 = 30;
    /// ERASE_WR_BLK_START_ADDR
    pub const ERASE_WR_BLK_START_ADDR: u8 = 32;
    /// ERASE_WR_BLK_END_ADDR
    pub const ERASE_WR_BLK_END_ADDR: u8 = 33;
    /// ERASE
    pub const ERASE: u8 = 38;
    /// LOCK_UNLOCK
    pub const LOCK_UNLOCK: u8 = 42;
    /// APP_CMD - Next command is an application command
    pub const APP_CMD: u8 = 55;
    /// GEN_CMD
    pub const GEN_CMD: u8 = 56;
    /// READ_OCR
    pub const READ_OCR: u8 = 58;
    /// CRC_ON_OFF
    pub const CRC_ON_OFF: u8 = 59;
}

/// Application command indices (sent after [`cmd::APP_CMD`])
pub mod acmd {
    /// SET_BUS_WIDTH
    pub const SET_BUS_WIDTH: u8 = 6;
    /// SD_STATUS
    pub const SD_STATUS: u8 = 13;
    /// SECURE_READ_MULTI_BLOCK
    pub const SECURE_READ_MULTI_BLOCK: u8 = 18;
    /// SEND_NUM_WR_BLOCKS
    pub const SEND_NUM_WR_BLOCKS: u8 = 22;
    /// SET_WR_BLK_ERASE_COUNT
    pub const SET_WR_BLK_ERASE_COUNT: u8 = 23;
    /// SECURE_WRITE_MULTI_BLOCK
    pub const SECURE_WRITE_MULTI_BLOCK: u8 = 25;
    /// SECURE_WRITE_MKB
    pub const SECURE_WRITE_MKB: u8 = 26;
    /// SECURE_ERASE
    pub const SECURE_ERASE: u8 = 38;
    /// SD_SEND_OP_COND - Start initialization, negotiate capacity support
    pub const SD_SEND_OP_COND: u8 = 41;
    /// SET_CLR_CARD_DETECT
    pub const SET_CLR_CARD_DETECT: u8 = 42;
    /// GET_MKB
    pub const GET_MKB: u8 = 43;
    /// GET_MID
    pub const GET_MID: u8 = 44;
    /// SET_CER_RN1
    pub const SET_CER_RN1: u8 = 45;
    /// SET_CER_RN2
    pub const SET_CER_RN2: u8 = 46;
    /// SET_CER_RES2
    pub const SET_CER_RES2: u8 = 47;
    /// SET_CER_RES1
    pub const SET_CER_RES1: u8 = 48;
    /// CHANGE_SECURE_AREA
    pub const CHANGE_SECURE_AREA: u8 = 49;
    /// SEND_SCR
    pub const SEND_SCR: u8 = 51;
}

/// Trailing byte of GO_IDLE_STATE with argument 0
pub const GO_IDLE_CRC: u8 = 0x95;

/// Trailing byte of SEND_IF_COND with argument [`IF_COND_ARG`]
pub const IF_COND_CRC: u8 = 0x87;

/// Trailing byte for commands sent while the card ignores CRCs
pub const NO_CRC: u8 = 0xFF;

/// SEND_IF_COND argument: 2.7-3.6V range, check pattern 0xAA
pub const IF_COND_ARG: u32 = 0x0000_01AA;

/// Host capacity support bit of the SD_SEND_OP_COND argument
pub const OCR_HCS: u32 = 1 << 30;

/// Byte clocked out while only receiving
pub const FILLER: u8 = 0xFF;

/// Token preceding a single-block data payload in either direction
pub const DATA_START_TOKEN: u8 = 0xFE;

/// Bits of the data response token that carry the status
pub const DATA_RESPONSE_MASK: u8 = 0x1F;

/// Data response: block accepted
pub const DATA_ACCEPTED: u8 = 0x05;

bitflags! {
    /// R1 status byte returned by every command
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct R1Status: u8 {
        /// Card is in the idle state, running initialization
        const IDLE = 1 << 0;
        /// An erase sequence was cleared before executing
        const ERASE_RESET = 1 << 1;
        /// Illegal command code
        const ILLEGAL_COMMAND = 1 << 2;
        /// CRC check of the last command failed
        const COM_CRC_ERROR = 1 << 3;
        /// Error in the sequence of erase commands
        const ERASE_SEQUENCE_ERROR = 1 << 4;
        /// Misaligned address for the block length
        const ADDRESS_ERROR = 1 << 5;
        /// Argument outside the allowed range
        const PARAMETER_ERROR = 1 << 6;
        /// Start bit not yet seen; the card has not answered
        const PENDING = 1 << 7;
    }
}

impl R1Status {
    /// Flags that report a failed command
    pub const ERRORS: Self = Self::ERASE_RESET
        .union(Self::ILLEGAL_COMMAND)
        .union(Self::COM_CRC_ERROR)
        .union(Self::ERASE_SEQUENCE_ERROR)
        .union(Self::ADDRESS_ERROR)
        .union(Self::PARAMETER_ERROR);

    /// Wrap a raw status byte
    pub const fn from_byte(byte: u8) -> Self {
        Self::from_bits_retain(byte)
    }

    /// Card is idle
    pub const fn is_idle(&self) -> bool {
        self.contains(Self::IDLE)
    }

    /// Erase reset
    pub const fn erase_reset(&self) -> bool {
        self.contains(Self::ERASE_RESET)
    }

    /// Illegal command
    pub const fn illegal_command(&self) -> bool {
        self.contains(Self::ILLEGAL_COMMAND)
    }

    /// Command CRC error
    pub const fn crc_error(&self) -> bool {
        self.contains(Self::COM_CRC_ERROR)
    }

    /// Erase sequence error
    pub const fn erase_sequence_error(&self) -> bool {
        self.contains(Self::ERASE_SEQUENCE_ERROR)
    }

    /// Address error
    pub const fn address_error(&self) -> bool {
        self.contains(Self::ADDRESS_ERROR)
    }

    /// Parameter error
    pub const fn parameter_error(&self) -> bool {
        self.contains(Self::PARAMETER_ERROR)
    }

    /// Response start bit missing
    pub const fn is_pending(&self) -> bool {
        self.contains(Self::PENDING)
    }

    /// Check for any error flag
    pub const fn has_error(&self) -> bool {
        self.intersects(Self::ERRORS)
    }
}

impl fmt::Display for R1Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(R1Status, &str); 8] = [
            (R1Status::IDLE, "idle"),
            (R1Status::ERASE_RESET, "erase-rst"),
            (R1Status::ERASE_SEQUENCE_ERROR, "erase-seq"),
            (R1Status::COM_CRC_ERROR, "crc-err"),
            (R1Status::ADDRESS_ERROR, "addr-err"),
            (R1Status::PARAMETER_ERROR, "param-err"),
            (R1Status::ILLEGAL_COMMAND, "illegal-cmd"),
            (R1Status::PENDING, "pending"),
        ];
        f.write_str("[")?;
        let mut first = true;
        for (flag, name) in NAMES {
            if self.contains(flag) {
                if !first {
                    f.write_str(",")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        f.write_str("]")
    }
}

/// A 6-byte SPI command frame
///
/// `01` start bits and the command index, the big-endian argument, then
/// CRC7 and the stop bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct CommandFrame([u8; 6]);

static_assertions::assert_eq_size!(CommandFrame, [u8; 6]);

impl CommandFrame {
    /// Build a frame with a computed CRC7
    pub fn new(index: u8, arg: u32) -> Self {
        let mut raw = [0u8; 6];
        raw[0] = 0x40 | (index & 0x3F);
        raw[1..5].copy_from_slice(&arg.to_be_bytes());
        raw[5] = crc7_trailer(&raw[..5]);
        Self(raw)
    }

    /// Replace the trailing CRC/stop byte
    pub const fn with_crc(mut self, crc: u8) -> Self {
        self.0[5] = crc;
        self
    }

    /// Command index
    pub const fn index(&self) -> u8 {
        self.0[0] & 0x3F
    }

    /// Command argument
    pub const fn argument(&self) -> u32 {
        u32::from_be_bytes([self.0[1], self.0[2], self.0[3], self.0[4]])
    }

    /// Trailing CRC/stop byte
    pub const fn crc_byte(&self) -> u8 {
        self.0[5]
    }

    /// Frame bytes in transmission order
    pub const fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }
}

impl<B, C, T> SdCard<B, C, T>
where
    B: SpiBus,
    C: ChipSelect,
    T: Clock,
{
    /// Drive chip select; `true` selects the card (line low).
    pub(crate) fn select(&mut self, enable: bool) {
        self.cs.set_level(!enable);
    }

    pub(crate) fn transfer_byte(&mut self, byte: u8) -> SdResult<u8, B::Error> {
        self.bus.exchange_one(byte).map_err(SdError::Transport)
    }

    /// Send one command and return its R1 status.
    ///
    /// The card stays selected on success so a data phase can follow; the
    /// caller deselects it. `crc` is the full trailing byte of the frame.
    pub(crate) fn issue_command(
        &mut self,
        index: u8,
        arg: u32,
        crc: u8,
    ) -> SdResult<R1Status, B::Error> {
        self.select(true);

        if index != cmd::STOP_TRANSMISSION {
            let timeout = self.config.command_busy_timeout;
            if !self.wait_not_busy(timeout)? {
                warn!("sd: card still busy before CMD{}", index);
            }
        }

        let frame = CommandFrame::new(index, arg).with_crc(crc);
        let mut echo = [0u8; 6];
        self.bus
            .exchange(frame.as_bytes(), &mut echo)
            .map_err(SdError::Transport)?;

        if index == cmd::STOP_TRANSMISSION {
            // The response to CMD12 is preceded by a stuff byte
            self.transfer_byte(FILLER)?;
        }

        for _ in 0..self.config.response_polls {
            let status = R1Status::from_byte(self.transfer_byte(FILLER)?);
            if !status.is_pending() {
                trace!("sd: CMD{}({:#010x}) -> {}", index, arg, status);
                return Ok(status);
            }
        }

        trace!("sd: CMD{}({:#010x}) -> no response", index, arg);
        self.select(false);
        self.transfer_byte(FILLER)?;
        Err(SdError::CommandTimeout(index))
    }

    /// Send APP_CMD followed by the application command `index`.
    pub(crate) fn issue_app_command(
        &mut self,
        index: u8,
        arg: u32,
    ) -> SdResult<R1Status, B::Error> {
        self.issue_command(cmd::APP_CMD, 0, NO_CRC)?;
        self.issue_command(index, arg, NO_CRC)
    }

    /// Send a command and require an all-clear status.
    pub(crate) fn ensure_zero_status(
        &mut self,
        index: u8,
        arg: u32,
        crc: u8,
    ) -> SdResult<(), B::Error> {
        let status = self.issue_command(index, arg, crc)?;
        if status.is_empty() {
            Ok(())
        } else {
            Err(SdError::Status(status))
        }
    }

    /// Clock filler bytes until the card releases the data line (reads
    /// back 0xFF) or `timeout` passes. Returns whether the card is ready.
    pub(crate) fn wait_not_busy(&mut self, timeout: Duration) -> SdResult<bool, B::Error> {
        let deadline = Deadline::after(&self.clock, timeout);
        loop {
            if self.transfer_byte(FILLER)? == 0xFF {
                return Ok(true);
            }
            if deadline.is_expired(&self.clock) {
                return Ok(false);
            }
            self.clock.relax();
        }
    }
}
