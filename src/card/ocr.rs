//! The Operating Conditions Register.

use crate::proto::{OCR_ACCESS_MODE, OCR_BUSY, OCR_HCS};

/// The 32-bit Operating Conditions Register.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct Ocr(pub u32);

impl Ocr {
    /// Has the card finished its power-up sequence?
    ///
    /// Bit 31 is set once the card is ready. While it is clear the card is
    /// still busy powering up.
    pub fn is_powered_up(&self) -> bool {
        self.0 & OCR_BUSY != 0
    }

    /// Card Capacity Status (SD) or sector access mode (MMC).
    ///
    /// Only meaningful once the card has powered up.
    pub fn is_high_capacity(&self) -> bool {
        self.0 & OCR_HCS != 0
    }

    /// The MMC access mode field, bits 30:29
    pub fn access_mode(&self) -> u32 {
        self.0 & OCR_ACCESS_MODE
    }

    /// The voltage window, bits 23:0
    pub fn voltage_window(&self) -> u32 {
        self.0 & 0x00FF_FFFF
    }
}


// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
