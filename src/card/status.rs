//! The 32-bit card status returned in R1 responses.

use crate::proto::{R1_APP_CMD, R1_ERROR_MASK, R1_READY_FOR_DATA, R1_SWITCH_ERROR};

/// The state machine state a card reports in its status.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CardState {
    /// idle
    Idle,
    /// ready
    Ready,
    /// ident
    Identification,
    /// stby
    Standby,
    /// tran
    Transfer,
    /// data
    SendingData,
    /// rcv
    ReceivingData,
    /// prg
    Programming,
    /// dis
    Disconnected,
    /// A state number neither the SD nor the MMC standard defines
    Reserved(u8),
}

impl From<u8> for CardState {
    fn from(value: u8) -> CardState {
        match value {
            0 => CardState::Idle,
            1 => CardState::Ready,
            2 => CardState::Identification,
            3 => CardState::Standby,
            4 => CardState::Transfer,
            5 => CardState::SendingData,
            6 => CardState::ReceivingData,
            7 => CardState::Programming,
            8 => CardState::Disconnected,
            n => CardState::Reserved(n),
        }
    }
}

/// Card status, from an R1 response or CMD13.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct CardStatus(pub u32);

impl CardStatus {
    /// The CURRENT_STATE field
    pub fn state(&self) -> CardState {
        CardState::from(((self.0 >> 9) & 0xF) as u8)
    }

    /// READY_FOR_DATA
    pub fn ready_for_data(&self) -> bool {
        self.0 & R1_READY_FOR_DATA != 0
    }

    /// Is the card finished with the last write, erase or switch?
    pub fn is_ready(&self) -> bool {
        self.ready_for_data() && self.state() != CardState::Programming
    }

    /// Any of the error bits
    pub fn has_error(&self) -> bool {
        self.0 & R1_ERROR_MASK != 0
    }

    /// SWITCH_ERROR
    pub fn switch_error(&self) -> bool {
        self.0 & R1_SWITCH_ERROR != 0
    }

    /// APP_CMD
    pub fn app_cmd(&self) -> bool {
        self.0 & R1_APP_CMD != 0
    }
}


// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
