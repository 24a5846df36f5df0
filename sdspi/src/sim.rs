//! Byte-level SD card simulator for tests

use crate::card::SdCard;
use crate::command::{acmd, cmd, DATA_START_TOKEN};
use crate::config::SdConfig;
use crate::crc::{crc16, crc7_trailer};
use crate::hal::{ChipSelect, Clock, SpiBus};
use crate::{BLOCK_SIZE, REGISTER_SIZE};
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;
use std::time::Duration;

/// Simulator state shared by the bus and chip-select halves
pub(crate) type SharedSim = Rc<RefCell<SimCard>>;

/// Set the CRC7 trailer of a register image
pub(crate) fn seal(mut raw: [u8; REGISTER_SIZE]) -> [u8; REGISTER_SIZE] {
    raw[15] = crc7_trailer(&raw[..15]);
    raw
}

/// SanDisk-style CID, manufactured October 2020
pub(crate) fn cid_image() -> [u8; REGISTER_SIZE] {
    seal([
        0x03, b'S', b'D', b'S', b'U', b'0', b'8', b'G', 0x80, 0x12, 0x34, 0x56, 0x78, 0x01, 0x4A,
        0x00,
    ])
}

/// Version 2.0 CSD with C_SIZE 7562 (about 3.9 GB)
pub(crate) fn csd_v2_image() -> [u8; REGISTER_SIZE] {
    seal([
        0x40, 0x0E, 0x00, 0x32, 0x5B, 0x59, 0x00, 0x00, 0x1D, 0x8A, 0x7F, 0x80, 0x0A, 0x40, 0x00,
        0x00,
    ])
}

/// Version 1.0 CSD describing a 1 GB card with 512-byte blocks
pub(crate) fn csd_v1_image() -> [u8; REGISTER_SIZE] {
    seal([
        0x00, 0x26, 0x00, 0x32, 0x5F, 0x59, 0x83, 0xBF, 0xED, 0xDB, 0xFF, 0x80, 0x8A, 0x40, 0x44,
        0x00,
    ])
}

/// Configuration that fails fast when nothing answers
pub(crate) fn fast_config() -> SdConfig {
    SdConfig::new().with_response_polls(8)
}

/// Session wired to a simulated card, with a 1ms step clock
pub(crate) fn card(
    sim: SimCard,
    config: SdConfig,
) -> (SdCard<SimBus, SimCs, StepClock>, SharedSim) {
    let shared = Rc::new(RefCell::new(sim));
    let card = SdCard::new(
        SimBus(shared.clone()),
        SimCs(shared.clone()),
        StepClock::new(Duration::from_millis(1)),
        config,
    );
    (card, shared)
}

/// Session that has completed initialization
pub(crate) fn ready_card(sim: SimCard) -> (SdCard<SimBus, SimCs, StepClock>, SharedSim) {
    let (mut card, shared) = card(sim, fast_config());
    card.initialize().expect("simulated card initializes");
    (card, shared)
}

/// Clock that advances by a fixed step on every reading
pub(crate) struct StepClock {
    now: Cell<Duration>,
    step: Duration,
}

impl StepClock {
    pub(crate) fn new(step: Duration) -> Self {
        Self {
            now: Cell::new(Duration::ZERO),
            step,
        }
    }
}

impl Clock for StepClock {
    fn now(&self) -> Duration {
        let now = self.now.get();
        self.now.set(now.saturating_add(self.step));
        now
    }
}

/// Injected bus failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BusFault;

pub(crate) struct SimBus(SharedSim);

impl SpiBus for SimBus {
    type Error = BusFault;

    fn exchange(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<(), BusFault> {
        assert_eq!(tx.len(), rx.len());
        let mut sim = self.0.borrow_mut();
        for (out, byte) in rx.iter_mut().zip(tx) {
            *out = sim.exchange(*byte)?;
        }
        Ok(())
    }
}

pub(crate) struct SimCs(SharedSim);

impl ChipSelect for SimCs {
    fn set_level(&mut self, high: bool) {
        let mut sim = self.0.borrow_mut();
        sim.cs_log.push(high);
        sim.selected = !high;
        if high {
            sim.out.clear();
        }
    }
}

/// Block write in progress
struct PendingWrite {
    address: u32,
    started: bool,
    data: Vec<u8>,
}

/// Simulated card behavior and observations
pub(crate) struct SimCard {
    /// Card answers at all
    pub present: bool,
    /// Answer to GO_IDLE_STATE
    pub cmd0_response: u8,
    /// Reject SEND_IF_COND as illegal
    pub legacy: bool,
    /// Replace the SEND_IF_COND echo
    pub if_cond_echo: Option<[u8; 4]>,
    /// SD_SEND_OP_COND answers idle this many times before ready
    pub op_cond_busy: u32,
    /// SD_SEND_OP_COND gets no response at all
    pub op_cond_silent: bool,
    /// Operating conditions register
    pub ocr: u32,
    /// CID image
    pub cid: [u8; REGISTER_SIZE],
    /// CSD image
    pub csd: [u8; REGISTER_SIZE],
    /// Stored blocks keyed by command address; missing blocks read as 0xFF
    pub blocks: BTreeMap<u32, [u8; BLOCK_SIZE]>,
    /// Token sent before read data; `None` never starts the data phase
    pub start_token: Option<u8>,
    /// Send a wrong CRC16 after block data
    pub corrupt_read_crc: bool,
    /// Data response token after a written block
    pub data_response: u8,
    /// Busy bytes after an accepted write
    pub write_busy: usize,
    /// Fail the bus once this many bytes were exchanged
    pub fail_after: Option<usize>,

    /// Chip select asserted
    pub selected: bool,
    /// Every command received, as `(index, argument)`
    pub commands: Vec<(u8, u32)>,
    /// Trailing byte of the last command frame
    pub last_crc_byte: u8,
    /// Bytes exchanged on the bus
    pub exchanges: usize,
    /// Chip select levels driven, in order
    pub cs_log: Vec<bool>,

    out: VecDeque<u8>,
    frame: Vec<u8>,
    app_command: bool,
    ready: bool,
    op_cond_polls: u32,
    write: Option<PendingWrite>,
    busy_remaining: usize,
}

impl SimCard {
    /// High capacity card with a version 2.0 CSD
    pub(crate) fn sdhc() -> Self {
        Self {
            present: true,
            cmd0_response: 0x01,
            legacy: false,
            if_cond_echo: None,
            op_cond_busy: 2,
            op_cond_silent: false,
            ocr: 0xC0FF_8000,
            cid: cid_image(),
            csd: csd_v2_image(),
            blocks: BTreeMap::new(),
            start_token: Some(DATA_START_TOKEN),
            corrupt_read_crc: false,
            data_response: 0xE5,
            write_busy: 3,
            fail_after: None,
            selected: false,
            commands: Vec::new(),
            last_crc_byte: 0,
            exchanges: 0,
            cs_log: Vec::new(),
            out: VecDeque::new(),
            frame: Vec::new(),
            app_command: false,
            ready: false,
            op_cond_polls: 0,
            write: None,
            busy_remaining: 0,
        }
    }

    /// Standard capacity version 2.0 card with a version 1.0 CSD
    pub(crate) fn sd_v2() -> Self {
        Self {
            ocr: 0x80FF_8000,
            csd: csd_v1_image(),
            ..Self::sdhc()
        }
    }

    /// Version 1.x card
    pub(crate) fn legacy() -> Self {
        Self {
            legacy: true,
            ..Self::sd_v2()
        }
    }

    /// Hold the data line low for `bytes` selected exchanges
    pub(crate) fn hold_busy(&mut self, bytes: usize) {
        self.busy_remaining = bytes;
    }

    /// Busy bytes not yet clocked out
    pub(crate) fn busy_left(&self) -> usize {
        self.busy_remaining
    }

    /// Store a block at its command address
    pub(crate) fn put_block(&mut self, address: u32, data: [u8; BLOCK_SIZE]) {
        self.blocks.insert(address, data);
    }

    fn exchange(&mut self, tx: u8) -> Result<u8, BusFault> {
        if let Some(limit) = self.fail_after {
            if self.exchanges >= limit {
                return Err(BusFault);
            }
        }
        self.exchanges += 1;
        if !self.present || !self.selected {
            return Ok(0xFF);
        }

        let rx = match self.out.pop_front() {
            Some(byte) => byte,
            None if self.busy_remaining > 0 => {
                self.busy_remaining -= 1;
                0x00
            }
            None => 0xFF,
        };

        if self.write.is_some() {
            self.receive_write(tx);
        } else if !self.frame.is_empty() || tx & 0xC0 == 0x40 {
            self.frame.push(tx);
            if self.frame.len() == 6 {
                let frame: Vec<u8> = self.frame.drain(..).collect();
                self.dispatch(&frame);
            }
        }
        Ok(rx)
    }

    fn receive_write(&mut self, tx: u8) {
        let Some(write) = self.write.as_mut() else {
            return;
        };
        if !write.started {
            write.started = tx == DATA_START_TOKEN;
            return;
        }
        write.data.push(tx);
        if write.data.len() == BLOCK_SIZE + 2 {
            let mut block = [0u8; BLOCK_SIZE];
            block.copy_from_slice(&write.data[..BLOCK_SIZE]);
            let address = write.address;
            self.write = None;
            if self.data_response & 0x1F == 0x05 {
                self.blocks.insert(address, block);
                self.busy_remaining = self.write_busy;
            }
            self.out.push_back(self.data_response);
        }
    }

    fn dispatch(&mut self, frame: &[u8]) {
        let index = frame[0] & 0x3F;
        let arg = u32::from_be_bytes([frame[1], frame[2], frame[3], frame[4]]);
        self.commands.push((index, arg));
        self.last_crc_byte = frame[5];
        self.out.clear();
        // Ncr gap before the response
        self.out.push_back(0xFF);

        let app = core::mem::take(&mut self.app_command);
        let idle = if self.ready { 0x00 } else { 0x01 };

        match (app, index) {
            (true, acmd::SD_SEND_OP_COND) if self.op_cond_silent => {}
            (true, acmd::SD_SEND_OP_COND) => {
                if self.op_cond_polls < self.op_cond_busy {
                    self.op_cond_polls += 1;
                    self.out.push_back(0x01);
                } else {
                    self.ready = true;
                    self.out.push_back(0x00);
                }
            }
            (_, cmd::GO_IDLE_STATE) => {
                self.ready = false;
                self.op_cond_polls = 0;
                self.out.push_back(self.cmd0_response);
            }
            (_, cmd::SEND_IF_COND) => {
                if self.legacy {
                    self.out.push_back(0x05);
                } else {
                    let echo = self
                        .if_cond_echo
                        .unwrap_or([0x00, 0x00, (arg >> 8) as u8 & 0x0F, arg as u8]);
                    self.out.push_back(idle);
                    self.out.extend(echo);
                }
            }
            (_, cmd::APP_CMD) => {
                self.app_command = true;
                self.out.push_back(idle);
            }
            (_, cmd::READ_OCR) => {
                self.out.push_back(idle);
                self.out.extend(self.ocr.to_be_bytes());
            }
            (_, cmd::SET_BLOCKLEN | cmd::STOP_TRANSMISSION | cmd::SEND_STATUS) => {
                self.out.push_back(0x00);
            }
            (_, cmd::SEND_CID) => {
                let image = self.cid;
                self.queue_data(&image, false);
            }
            (_, cmd::SEND_CSD) => {
                let image = self.csd;
                self.queue_data(&image, false);
            }
            (_, cmd::READ_SINGLE_BLOCK) => {
                let block = self.blocks.get(&arg).copied().unwrap_or([0xFF; BLOCK_SIZE]);
                let corrupt = self.corrupt_read_crc;
                self.queue_data(&block, corrupt);
            }
            (_, cmd::WRITE_BLOCK) => {
                self.out.push_back(0x00);
                self.write = Some(PendingWrite {
                    address: arg,
                    started: false,
                    data: Vec::with_capacity(BLOCK_SIZE + 2),
                });
            }
            _ => self.out.push_back(0x04),
        }
    }

    /// R1, access gap, start token, payload and CRC16
    fn queue_data(&mut self, payload: &[u8], corrupt: bool) {
        self.out.push_back(0x00);
        let Some(token) = self.start_token else {
            return;
        };
        self.out.push_back(0xFF);
        self.out.push_back(token);
        self.out.extend(payload.iter().copied());
        let crc = if corrupt { !crc16(payload) } else { crc16(payload) };
        self.out.extend(crc.to_be_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_images_are_sealed() {
        for image in [cid_image(), csd_v1_image(), csd_v2_image()] {
            assert_eq!(image[15] & 1, 1);
            assert_eq!(seal(image), image);
        }
    }

    #[test]
    fn test_deselected_card_is_silent() {
        let mut sim = SimCard::sdhc();
        assert_eq!(sim.exchange(0x40), Ok(0xFF));
        assert!(sim.commands.is_empty());
        assert_eq!(sim.exchanges, 1);
    }
}
