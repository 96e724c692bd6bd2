//! The card clock divider.
//!
//! The card clock is `source / (prescaler * divisor)`, where the prescaler is
//! a power of two from 2 to 256 and the divisor runs from 1 to 16.

use crate::Hertz;

/// A prescaler and divisor pair for SYSCTL.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ClockDivider {
    /// Power of two, 2..=256
    pub prescaler: u32,
    /// 1..=16
    pub divisor: u32,
}

impl ClockDivider {
    /// Largest prescaler the SDCLKFS field can hold
    pub const MAX_PRESCALER: u32 = 256;
    /// Largest divisor the DVS field can hold
    pub const MAX_DIVISOR: u32 = 16;

    /// Pick the divider that gets closest to `target` without going over.
    ///
    /// The prescaler is only raised above 2 when dividing by 16 alone can't
    /// get the clock low enough. The divisor is then the smallest that
    /// brings the clock to or below the target, capped at 16. A `target` of
    /// zero is treated as 1 Hz.
    pub fn for_target(source: Hertz, target: Hertz) -> ClockDivider {
        let source = source.0;
        let target = target.0.max(1);
        let mut prescaler = 2;
        if source / Self::MAX_DIVISOR > target {
            while prescaler < Self::MAX_PRESCALER {
                if source / prescaler <= target * Self::MAX_DIVISOR {
                    break;
                }
                prescaler *= 2;
            }
        }
        let mut divisor = 1;
        while divisor < Self::MAX_DIVISOR {
            if source / (prescaler * divisor) <= target {
                break;
            }
            divisor += 1;
        }
        ClockDivider { prescaler, divisor }
    }

    /// The clock this divider produces
    pub fn frequency(&self, source: Hertz) -> Hertz {
        Hertz(source.0 / (self.prescaler * self.divisor))
    }

    /// The SDCLKFS and DVS fields, ready to go into SYSCTL
    pub fn sysctl_bits(&self) -> u32 {
        ((self.prescaler >> 1) << 8) | ((self.divisor - 1) << 4)
    }
}


// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
