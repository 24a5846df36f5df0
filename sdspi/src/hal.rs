//! Hardware collaborators consumed by the driver
//!
//! The driver never touches registers itself. Board code supplies the
//! SPI bus, the chip-select line and a monotonic clock through the traits
//! below.

use core::fmt::Debug;
use core::time::Duration;

/// Byte-oriented, full-duplex SPI bus
///
/// Every byte clocked out produces exactly one byte clocked in, and byte
/// order is preserved.
pub trait SpiBus {
    /// Error reported by the bus implementation
    type Error: Debug;

    /// Exchange `tx` for `rx`. Both slices have the same length.
    fn exchange(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<(), Self::Error>;

    /// Exchange a single byte
    fn exchange_one(&mut self, byte: u8) -> Result<u8, Self::Error> {
        let mut rx = [0u8; 1];
        self.exchange(&[byte], &mut rx)?;
        Ok(rx[0])
    }
}

/// Card chip-select line
///
/// The line is active low: the session drives it low to select the card
/// and high to release it.
pub trait ChipSelect {
    /// Drive the line to the given electrical level
    fn set_level(&mut self, high: bool);
}

/// Monotonic time source
pub trait Clock {
    /// Time elapsed since an arbitrary, fixed origin
    fn now(&self) -> Duration;

    /// Called between iterations of every busy-wait loop.
    ///
    /// Cooperative schedulers can hook this to run other ready work.
    fn relax(&self) {
        core::hint::spin_loop();
    }
}

/// A point in time after which a polling loop gives up
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Deadline {
    at: Duration,
}

impl Deadline {
    /// Deadline `timeout` from now
    pub fn after<C: Clock + ?Sized>(clock: &C, timeout: Duration) -> Self {
        Self {
            at: clock.now().saturating_add(timeout),
        }
    }

    /// Check whether the deadline has passed
    pub fn is_expired<C: Clock + ?Sized>(&self, clock: &C) -> bool {
        clock.now() >= self.at
    }

    /// Absolute expiry time on the clock's scale
    pub const fn at(&self) -> Duration {
        self.at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::StepClock;

    struct Loopback;

    impl SpiBus for Loopback {
        type Error = ();

        fn exchange(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<(), ()> {
            rx.copy_from_slice(tx);
            Ok(())
        }
    }

    #[test]
    fn test_exchange_one_default() {
        let mut bus = Loopback;
        assert_eq!(bus.exchange_one(0xA5), Ok(0xA5));
    }

    #[test]
    fn test_deadline_expiry() {
        let clock = StepClock::new(Duration::from_millis(10));
        let deadline = Deadline::after(&clock, Duration::from_millis(35));
        assert_eq!(deadline.at(), Duration::from_millis(35));
        assert!(!deadline.is_expired(&clock)); // 10ms
        assert!(!deadline.is_expired(&clock)); // 20ms
        assert!(!deadline.is_expired(&clock)); // 30ms
        assert!(deadline.is_expired(&clock)); // 40ms
    }

    #[test]
    fn test_deadline_saturates() {
        let clock = StepClock::new(Duration::ZERO);
        let deadline = Deadline::after(&clock, Duration::MAX);
        assert!(!deadline.is_expired(&clock));
    }
}
