//! Block transfer engine
//!
//! Single-block reads and writes plus the 16-byte register reads, all of
//! which share one data-phase shape: a command, the 0xFE start token, the
//! payload and a 2-byte CRC16 trailer.

use crate::card::SdCard;
use crate::command::{cmd, DATA_ACCEPTED, DATA_RESPONSE_MASK, DATA_START_TOKEN, FILLER, NO_CRC};
use crate::crc::crc16;
use crate::error::{SdError, SdResult};
use crate::hal::{ChipSelect, Clock, Deadline, SpiBus};
use crate::register::cid::Cid;
use crate::register::csd::Csd;
use crate::{BLOCK_SIZE, REGISTER_SIZE};
use log::{trace, warn};

/// Block index to byte shift for standard capacity cards
const BYTE_ADDRESS_SHIFT: u32 = 9;

impl<B, C, T> SdCard<B, C, T>
where
    B: SpiBus,
    C: ChipSelect,
    T: Clock,
{
    /// Read block `index` into `dst`, which must be 512 bytes long.
    ///
    /// The received CRC16 is kept in
    /// [`last_read_crc16`](Self::last_read_crc16) and only checked when
    /// the configuration asks for it.
    pub fn read_block(&mut self, index: u64, dst: &mut [u8]) -> SdResult<(), B::Error> {
        let address = self.block_address(index, dst.len())?;
        let result = self.read_block_at(address, dst);
        self.select(false);
        result
    }

    /// Write `src`, which must be 512 bytes long, to block `index`.
    pub fn write_block(&mut self, index: u64, src: &[u8]) -> SdResult<(), B::Error> {
        let address = self.block_address(index, src.len())?;
        let result = self.write_block_at(address, src);
        self.select(false);
        result
    }

    /// Read the card identification register
    pub fn read_cid(&mut self) -> SdResult<Cid, B::Error> {
        self.read_register(cmd::SEND_CID)?;
        Ok(Cid::decode(&self.scratch[..REGISTER_SIZE])?)
    }

    /// Read the card specific data register
    pub fn read_csd(&mut self) -> SdResult<Csd, B::Error> {
        self.read_register(cmd::SEND_CSD)?;
        Ok(Csd::decode(&self.scratch[..REGISTER_SIZE])?)
    }

    /// Validate a transfer and translate its block index into the
    /// command argument. No bus traffic happens here.
    fn block_address(&self, index: u64, len: usize) -> SdResult<u32, B::Error> {
        if len != BLOCK_SIZE {
            return Err(SdError::BufferSize(len));
        }
        let kind = self.kind.ok_or(SdError::NotInitialized)?;
        let count = self.block_count;
        if index >= count {
            return Err(SdError::OutOfRange { index, count });
        }

        let address = if kind.is_block_addressed() {
            index
        } else {
            index << BYTE_ADDRESS_SHIFT
        };
        u32::try_from(address).map_err(|_| SdError::OutOfRange { index, count })
    }

    fn read_block_at(&mut self, address: u32, dst: &mut [u8]) -> SdResult<(), B::Error> {
        self.ensure_zero_status(cmd::READ_SINGLE_BLOCK, address, NO_CRC)?;
        self.wait_start_token()?;

        self.scratch.fill(FILLER);
        self.bus
            .exchange(&self.scratch, dst)
            .map_err(SdError::Transport)?;

        let received = self.read_crc16()?;
        self.last_crc = received;
        trace!("sd: read {:#010x}, crc {:#06x}", address, received);

        if self.config.check_read_crc {
            let computed = crc16(dst);
            if computed != received {
                return Err(SdError::DataCrc { received, computed });
            }
        }
        Ok(())
    }

    fn write_block_at(&mut self, address: u32, src: &[u8]) -> SdResult<(), B::Error> {
        self.ensure_zero_status(cmd::WRITE_BLOCK, address, NO_CRC)?;

        self.transfer_byte(DATA_START_TOKEN)?;
        self.bus
            .exchange(src, &mut self.scratch)
            .map_err(SdError::Transport)?;
        // The card ignores the CRC in SPI mode
        self.transfer_byte(FILLER)?;
        self.transfer_byte(FILLER)?;

        let response = self.transfer_byte(FILLER)?;
        if response & DATA_RESPONSE_MASK != DATA_ACCEPTED {
            warn!("sd: write to {:#010x} rejected ({:#04x})", address, response);
            return Err(SdError::WriteRejected(response));
        }

        let timeout = self.config.write_busy_timeout;
        if !self.wait_not_busy(timeout)? {
            return Err(SdError::WriteTimeout);
        }
        trace!("sd: wrote {:#010x}", address);
        Ok(())
    }

    /// Read a 16-byte register into the start of the scratch buffer
    fn read_register(&mut self, index: u8) -> SdResult<(), B::Error> {
        let result = self.read_register_data(index);
        self.select(false);
        result
    }

    fn read_register_data(&mut self, index: u8) -> SdResult<(), B::Error> {
        self.ensure_zero_status(index, 0, NO_CRC)?;
        self.wait_start_token()?;
        for i in 0..REGISTER_SIZE {
            self.scratch[i] = self.transfer_byte(FILLER)?;
        }
        self.read_crc16()?;
        Ok(())
    }

    fn read_crc16(&mut self) -> SdResult<u16, B::Error> {
        let hi = self.transfer_byte(FILLER)?;
        let lo = self.transfer_byte(FILLER)?;
        Ok(u16::from_be_bytes([hi, lo]))
    }

    /// Poll for the data start token. Deselects the card on failure.
    fn wait_start_token(&mut self) -> SdResult<(), B::Error> {
        let deadline = Deadline::after(&self.clock, self.config.start_token_timeout);
        let token = loop {
            let byte = match self.transfer_byte(FILLER) {
                Ok(byte) => byte,
                Err(err) => {
                    self.select(false);
                    return Err(err);
                }
            };
            if byte != FILLER || deadline.is_expired(&self.clock) {
                break byte;
            }
            self.clock.relax();
        };

        if token != DATA_START_TOKEN {
            self.select(false);
            return Err(SdError::StartToken(token));
        }
        Ok(())
    }
}
