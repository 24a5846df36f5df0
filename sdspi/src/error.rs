//! Driver error types

use crate::command::R1Status;
use crate::register::csd::CsdVersion;
use core::fmt;

/// Result type for card operations over a bus with error type `E`
pub type SdResult<T, E> = Result<T, SdError<E>>;

/// Errors reported by the SD card driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdError<E> {
    /// The bus failed; the value is passed through untouched
    Transport(E),
    /// The card never entered the idle state after reset
    NoCard,
    /// The card answered but cannot be driven
    Unsupported(Unsupported),
    /// A command returned a status with one or more flags set
    Status(R1Status),
    /// No response byte arrived for the given command index
    CommandTimeout(u8),
    /// The interface-condition echo did not match what was sent
    InterfaceCondition {
        /// Accepted voltage nibble (expected 0x1)
        voltage: u8,
        /// Echoed check pattern (expected 0xAA)
        pattern: u8,
    },
    /// The CSD describes a card with zero blocks
    NoBlocks,
    /// I/O buffer is not exactly one block long
    BufferSize(usize),
    /// Block index past the end of the card
    OutOfRange {
        /// Requested block
        index: u64,
        /// Blocks on the card
        count: u64,
    },
    /// Block I/O attempted before a successful initialization
    NotInitialized,
    /// The data phase did not start with the start token; holds the last
    /// byte seen
    StartToken(u8),
    /// The card rejected a written block; holds the data response token
    WriteRejected(u8),
    /// The card stayed busy after a write
    WriteTimeout,
    /// A received block failed its CRC16 check
    DataCrc {
        /// CRC sent by the card
        received: u16,
        /// CRC computed over the payload
        computed: u16,
    },
    /// A register image could not be decoded
    Register(RegisterError),
}

/// Reason a card was detected but not accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unsupported {
    /// SD version 1.x card (no interface-condition command)
    LegacyCard,
    /// Block count does not fit in 32 bits
    TooManyBlocks(u64),
}

/// Register decoding errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterError {
    /// Fewer than 16 bytes supplied
    ShortBuffer(usize),
    /// CSD structure version differs from the view requested
    WrongVersion {
        /// Version asked for
        expected: CsdVersion,
        /// Version in the register
        found: CsdVersion,
    },
}

impl<E> SdError<E> {
    /// Check if this error came from the bus rather than the card
    pub const fn is_transport(&self) -> bool {
        matches!(self, SdError::Transport(_))
    }
}

impl<E> From<RegisterError> for SdError<E> {
    fn from(err: RegisterError) -> Self {
        SdError::Register(err)
    }
}

impl<E: fmt::Debug> fmt::Display for SdError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SdError::Transport(err) => write!(f, "sd: transport error: {:?}", err),
            SdError::NoCard => write!(f, "sd: no card"),
            SdError::Unsupported(Unsupported::LegacyCard) => {
                write!(f, "sd: card not supported (SD v1)")
            }
            SdError::Unsupported(Unsupported::TooManyBlocks(blocks)) => {
                write!(f, "sd: card not supported ({} blocks)", blocks)
            }
            SdError::Status(status) => write!(f, "sd: status {}", status),
            SdError::CommandTimeout(index) => write!(f, "sd: CMD{} timed out", index),
            SdError::InterfaceCondition { voltage, pattern } => write!(
                f,
                "sd: interface condition mismatch (voltage={:#x}, pattern={:#04x})",
                voltage, pattern
            ),
            SdError::NoBlocks => write!(f, "sd: no readable blocks"),
            SdError::BufferSize(len) => write!(f, "sd: need 512 bytes for I/O, got {}", len),
            SdError::OutOfRange { index, count } => {
                write!(f, "sd: block {} out of range ({} blocks)", index, count)
            }
            SdError::NotInitialized => write!(f, "sd: card not initialized"),
            SdError::StartToken(token) => {
                write!(f, "sd: wait start block failed (got {:#04x})", token)
            }
            SdError::WriteRejected(token) => write!(f, "sd: write rejected ({:#04x})", token),
            SdError::WriteTimeout => write!(f, "sd: write timeout"),
            SdError::DataCrc { received, computed } => write!(
                f,
                "sd: data CRC mismatch (card={:#06x}, host={:#06x})",
                received, computed
            ),
            SdError::Register(err) => write!(f, "sd: {}", err),
        }
    }
}

impl fmt::Display for RegisterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegisterError::ShortBuffer(len) => {
                write!(f, "register image too short ({} bytes)", len)
            }
            RegisterError::WrongVersion { expected, found } => {
                write!(f, "CSD is {:?}, not {:?}", found, expected)
            }
        }
    }
}
