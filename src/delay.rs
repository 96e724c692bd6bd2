//! Bounded busy-waiting.
//!
//! Every loop in this crate that waits on the hardware or the card goes
//! through a [`Delay`], so every loop has a retry budget.

use embedded_hal::delay::DelayNs;

use crate::Error;

/// This an object you can use to busy-wait with a timeout.
///
/// Will let you call `delay` up to `max_retries` times before `delay` returns
/// an error.
#[derive(Debug)]
pub(crate) struct Delay {
    retries_left: u32,
    interval_us: u32,
}

impl Delay {
    /// Retries while waiting for the command and data lines to go idle.
    ///
    /// At ~10us each this is ~100ms.
    pub const DEFAULT_BUS_IDLE_RETRIES: u32 = 10_000;

    /// Retries while waiting for command complete (or command timeout).
    ///
    /// At ~10us each this is ~100ms.
    pub const DEFAULT_COMMAND_RETRIES: u32 = 10_000;

    /// Retries while waiting for a block to arrive in (or drain from) the
    /// controller's buffer.
    ///
    /// At ~10us each this is ~1s, matching the controller's PIO timeout.
    pub const DEFAULT_BUFFER_RETRIES: u32 = 100_000;

    /// Retries while waiting for transfer complete.
    ///
    /// At ~10us each this is ~1s.
    pub const DEFAULT_TRANSFER_RETRIES: u32 = 100_000;

    /// Retries while waiting for a reset bit in SYSCTL to self-clear.
    ///
    /// At ~1ms each this is ~1s.
    pub const DEFAULT_RESET_RETRIES: u32 = 1_000;

    /// Retries while a card holds DAT0 low after an R1b response.
    ///
    /// At ~100us each this is ~250ms.
    pub const DEFAULT_BUSY_RETRIES: u32 = 2_500;

    /// Retries while waiting for the card-inserted signal to settle.
    ///
    /// At ~10us each this is ~1ms.
    pub const DEFAULT_CARD_DETECT_RETRIES: u32 = 100;

    /// Create a new Delay object with the given maximum number of retries,
    /// waiting `interval_us` microseconds between each one.
    pub fn new(max_retries: u32, interval_us: u32) -> Delay {
        Delay {
            retries_left: max_retries,
            interval_us,
        }
    }

    /// Create a new Delay object for waiting on the bus to go idle.
    pub fn new_bus_idle() -> Delay {
        Delay::new(Self::DEFAULT_BUS_IDLE_RETRIES, 10)
    }

    /// Create a new Delay object for waiting on a command to complete.
    pub fn new_command() -> Delay {
        Delay::new(Self::DEFAULT_COMMAND_RETRIES, 10)
    }

    /// Create a new Delay object for waiting on the data buffer.
    pub fn new_buffer() -> Delay {
        Delay::new(Self::DEFAULT_BUFFER_RETRIES, 10)
    }

    /// Create a new Delay object for waiting on transfer complete.
    pub fn new_transfer() -> Delay {
        Delay::new(Self::DEFAULT_TRANSFER_RETRIES, 10)
    }

    /// Create a new Delay object for waiting on a controller reset.
    pub fn new_reset() -> Delay {
        Delay::new(Self::DEFAULT_RESET_RETRIES, 1_000)
    }

    /// Create a new Delay object for waiting on a busy card.
    pub fn new_busy() -> Delay {
        Delay::new(Self::DEFAULT_BUSY_RETRIES, 100)
    }

    /// Create a new Delay object for debouncing card detect.
    pub fn new_card_detect() -> Delay {
        Delay::new(Self::DEFAULT_CARD_DETECT_RETRIES, 10)
    }

    /// Create a new Delay object for a card-level polling loop, which
    /// waits ~1ms between each poll.
    pub fn new_poll(max_retries: u32) -> Delay {
        Delay::new(max_retries, 1_000)
    }

    /// Wait for a while.
    ///
    /// Checks the retry counter first, and if we hit the max retry limit, the
    /// value `err` is returned. Otherwise we wait for the interval and then
    /// return `Ok(())`.
    pub fn delay<T>(&mut self, delayer: &mut T, err: Error) -> Result<(), Error>
    where
        T: DelayNs + ?Sized,
    {
        if self.retries_left == 0 {
            Err(err)
        } else {
            delayer.delay_us(self.interval_us);
            self.retries_left -= 1;
            Ok(())
        }
    }
}


// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
