//! Card initialization sequence
//!
//! ```text
//! wake-up ─▶ GO_IDLE (CMD0) ─▶ SEND_IF_COND (CMD8) ─▶ SD_SEND_OP_COND (ACMD41)
//!                                   │ illegal                   │
//!                                   ▼                           ▼
//!                              LegacyCard            READ_OCR (CMD58) ─▶ SET_BLOCKLEN (CMD16)
//!                                                                              │
//!                                          ready ◀─ block count ◀─ CID, CSD ◀──┘
//! ```
//!
//! Any bus error aborts the sequence and is returned unmodified.

use crate::card::{CardKind, SdCard};
use crate::command::{acmd, cmd, FILLER, GO_IDLE_CRC, IF_COND_ARG, IF_COND_CRC, NO_CRC, OCR_HCS};
use crate::error::{SdError, SdResult, Unsupported};
use crate::hal::{ChipSelect, Clock, Deadline, SpiBus};
use crate::register::cid::Cid;
use crate::register::csd::Csd;
use crate::{R1Status, BLOCK_SIZE};
use log::{debug, info, warn};

/// Voltage accepted nibble for the 2.7-3.6V range
const VOLTAGE_ACCEPTED: u8 = 0x01;

/// OCR power-up status and card capacity status bits
const OCR_READY_CCS: u32 = 0b11 << 30;

/// State gathered by a successful run, committed at the end
struct Identified {
    kind: CardKind,
    cid: Cid,
    csd: Csd,
    block_count: u64,
}

impl<B, C, T> SdCard<B, C, T>
where
    B: SpiBus,
    C: ChipSelect,
    T: Clock,
{
    /// Run the power-up and identification sequence.
    ///
    /// Resets all session state first, so a failed call leaves the card
    /// unusable until a later call succeeds. Re-running on a ready card
    /// repeats the whole sequence.
    pub fn initialize(&mut self) -> SdResult<(), B::Error> {
        self.kind = None;
        self.cid = None;
        self.csd = None;
        self.block_count = 0;

        let result = self.identify();
        self.select(false);

        match result {
            Ok(card) => {
                info!(
                    "sd: {} card ready, {} blocks ({} MiB)",
                    card.kind,
                    card.block_count,
                    card.block_count * BLOCK_SIZE as u64 / (1024 * 1024)
                );
                self.kind = Some(card.kind);
                self.cid = Some(card.cid);
                self.csd = Some(card.csd);
                self.block_count = card.block_count;
                Ok(())
            }
            Err(err) => {
                warn!("sd: initialization failed: {}", err);
                Err(err)
            }
        }
    }

    fn identify(&mut self) -> SdResult<Identified, B::Error> {
        self.wake_up()?;
        self.go_idle()?;
        self.check_interface()?;
        self.negotiate_operating_condition(OCR_HCS)?;
        let kind = self.read_capacity_class()?;

        self.ensure_zero_status(cmd::SET_BLOCKLEN, BLOCK_SIZE as u32, NO_CRC)?;

        let cid = self.read_cid()?;
        debug!("sd: CID {}", cid);
        let csd = self.read_csd()?;
        if !csd.is_valid() {
            warn!("sd: CSD CRC mismatch (crc field {:#04x})", csd.crc());
        }
        debug!("sd: CSD {:?}, {} bytes", csd.version(), csd.capacity_bytes());

        let block_count = csd.block_count();
        if block_count > u64::from(u32::MAX) {
            return Err(SdError::Unsupported(Unsupported::TooManyBlocks(block_count)));
        }
        if block_count == 0 {
            return Err(SdError::NoBlocks);
        }

        Ok(Identified {
            kind,
            cid,
            csd,
            block_count,
        })
    }

    /// Clock the card with chip select released so it enters SPI mode
    fn wake_up(&mut self) -> SdResult<(), B::Error> {
        self.select(false);
        for _ in 0..self.config.wakeup_bytes {
            self.transfer_byte(FILLER)?;
        }
        Ok(())
    }

    fn go_idle(&mut self) -> SdResult<(), B::Error> {
        let deadline = Deadline::after(&self.clock, self.config.init_timeout);
        loop {
            match self.issue_command(cmd::GO_IDLE_STATE, 0, GO_IDLE_CRC) {
                Ok(status) if status == R1Status::IDLE => {
                    debug!("sd: card idle");
                    return Ok(());
                }
                Ok(_) | Err(SdError::CommandTimeout(_)) => {}
                Err(err) => return Err(err),
            }
            if deadline.is_expired(&self.clock) {
                return Err(SdError::NoCard);
            }
            self.clock.relax();
        }
    }

    /// Probe the interface condition. Only version 2.0 cards understand it.
    fn check_interface(&mut self) -> SdResult<(), B::Error> {
        let status = self.issue_command(cmd::SEND_IF_COND, IF_COND_ARG, IF_COND_CRC)?;
        if status.illegal_command() {
            debug!("sd: SEND_IF_COND rejected, SD v1 card");
            return Err(SdError::Unsupported(Unsupported::LegacyCard));
        }
        if status.has_error() {
            return Err(SdError::Status(status));
        }

        let mut echo = [0u8; 4];
        for byte in echo.iter_mut() {
            *byte = self.transfer_byte(FILLER)?;
        }
        let voltage = echo[2] & 0x0F;
        let pattern = echo[3];
        if voltage != VOLTAGE_ACCEPTED || pattern != IF_COND_ARG as u8 {
            return Err(SdError::InterfaceCondition { voltage, pattern });
        }

        debug!("sd: interface condition ok");
        Ok(())
    }

    /// Repeat SD_SEND_OP_COND until the card leaves the idle state
    fn negotiate_operating_condition(&mut self, arg: u32) -> SdResult<(), B::Error> {
        let deadline = Deadline::after(&self.clock, self.config.init_timeout);
        loop {
            let last = match self.issue_app_command(acmd::SD_SEND_OP_COND, arg) {
                Ok(status) if status.is_empty() => {
                    debug!("sd: operating condition accepted");
                    return Ok(());
                }
                Ok(status) => SdError::Status(status),
                Err(err @ SdError::CommandTimeout(_)) => err,
                Err(err) => return Err(err),
            };
            if deadline.is_expired(&self.clock) {
                return Err(last);
            }
            self.clock.relax();
        }
    }

    fn read_capacity_class(&mut self) -> SdResult<CardKind, B::Error> {
        self.ensure_zero_status(cmd::READ_OCR, 0, NO_CRC)?;

        let mut ocr = [0u8; 4];
        for byte in ocr.iter_mut() {
            *byte = self.transfer_byte(FILLER)?;
        }
        let ocr = u32::from_be_bytes(ocr);
        debug!("sd: OCR {:#010x}", ocr);

        if ocr & OCR_READY_CCS == OCR_READY_CCS {
            Ok(CardKind::Sdhc)
        } else {
            Ok(CardKind::SdV2)
        }
    }
}
