//! Driver timing and policy configuration

use core::time::Duration;

/// Timeouts and polling bounds used by a [`SdCard`](crate::SdCard)
///
/// Defaults follow the usual SPI-mode host timings. Boards with slow
/// cards or long wires can stretch them with the `with_*` builders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SdConfig {
    /// Budget for the go-idle loop and, separately, the operating
    /// condition loop
    pub init_timeout: Duration,
    /// Busy wait before transmitting a command
    pub command_busy_timeout: Duration,
    /// Wait for the data start token of a register or block read
    pub start_token_timeout: Duration,
    /// Wait for the card to finish programming a written block
    pub write_busy_timeout: Duration,
    /// Bus exchanges to poll for an R1 response before giving up
    pub response_polls: u32,
    /// Filler bytes clocked with the card deselected before go-idle
    pub wakeup_bytes: usize,
    /// Reject block reads whose CRC16 does not match the payload
    pub check_read_crc: bool,
}

impl SdConfig {
    /// Default configuration
    pub const fn new() -> Self {
        Self {
            init_timeout: Duration::from_secs(2),
            command_busy_timeout: Duration::from_millis(300),
            start_token_timeout: Duration::from_millis(300),
            write_busy_timeout: Duration::from_millis(600),
            response_polls: 0xFFFF,
            wakeup_bytes: 10,
            check_read_crc: false,
        }
    }

    /// Set the initialization loop budget
    pub const fn with_init_timeout(mut self, timeout: Duration) -> Self {
        self.init_timeout = timeout;
        self
    }

    /// Set the pre-command busy wait
    pub const fn with_command_busy_timeout(mut self, timeout: Duration) -> Self {
        self.command_busy_timeout = timeout;
        self
    }

    /// Set the start token wait
    pub const fn with_start_token_timeout(mut self, timeout: Duration) -> Self {
        self.start_token_timeout = timeout;
        self
    }

    /// Set the post-write busy wait
    pub const fn with_write_busy_timeout(mut self, timeout: Duration) -> Self {
        self.write_busy_timeout = timeout;
        self
    }

    /// Set the R1 polling bound
    pub const fn with_response_polls(mut self, polls: u32) -> Self {
        self.response_polls = polls;
        self
    }

    /// Set the number of wake-up filler bytes (8 clocks each)
    pub const fn with_wakeup_bytes(mut self, bytes: usize) -> Self {
        self.wakeup_bytes = bytes;
        self
    }

    /// Enforce the CRC16 of received blocks
    pub const fn with_read_crc_check(mut self, enabled: bool) -> Self {
        self.check_read_crc = enabled;
        self
    }
}

impl Default for SdConfig {
    fn default() -> Self {
        Self::new()
    }
}
