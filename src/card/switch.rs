//! The 512-bit status block returned by the SD SWITCH_FUNC command.
//!
//! Only function group 1 (access mode) is used here.

use byteorder::{BigEndian, ByteOrder};

/// The status returned by CMD6 on an SD card.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SwitchStatus {
    /// The 64 bytes of status, as they came off the wire
    pub data: [u8; 64],
}

impl Default for SwitchStatus {
    fn default() -> Self {
        SwitchStatus { data: [0u8; 64] }
    }
}

impl SwitchStatus {
    /// Length of the status block in bytes
    pub const LEN: usize = 64;

    define_field!(max_current, be u16, 0);
    define_field!(group1_support, be u16, 12);
    define_field!(group1_result, u8, 16, 0, 4);
    define_field!(group1_busy, be u16, 28);

    /// Does the card support this group 1 function?
    pub fn supports(&self, function: u8) -> bool {
        self.group1_support() & (1 << function) != 0
    }

    /// Is this group 1 function still busy?
    pub fn is_busy(&self, function: u8) -> bool {
        self.group1_busy() & (1 << function) != 0
    }

    /// Did the card select this group 1 function?
    pub fn selected(&self, function: u8) -> bool {
        self.group1_result() == function
    }
}


// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
