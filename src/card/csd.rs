//! The Card Specific Data register.
//!
//! SD v1 cards and all MMC cards use the standard layout, where capacity is
//! `(C_SIZE + 1) << (C_SIZE_MULT + 2)` blocks of `2^READ_BL_LEN` bytes. SD
//! v2 cards (CSD structure 1) use the high capacity layout, where capacity is
//! `(C_SIZE + 1)` units of 512 KiB.

use crate::proto::Response;
use crate::Hertz;

/// The Card Specific Data register, 128 bits, as it came off the wire.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub struct Csd {
    /// The 16 bytes of the register, most significant first
    pub data: [u8; 16],
}

/// Transfer rate units, in Hz. Codes 4 to 7 are reserved and treated as 10 MHz.
const TRAN_SPEED_UNIT: [u32; 4] = [10_000, 100_000, 1_000_000, 10_000_000];

/// Transfer rate multipliers, in tenths. Code 0 is reserved.
const TRAN_SPEED_MULTIPLIER: [u32; 16] = [0, 10, 12, 13, 15, 20, 26, 30, 35, 40, 45, 52, 55, 60, 70, 80];

/// Decode a TRAN_SPEED byte into a frequency.
///
/// The low three bits select a unit, the next four a multiplier. Reserved
/// units decode as the largest defined unit and a reserved multiplier
/// decodes as zero, so every byte gives some answer.
pub fn decode_tran_speed(tran_speed: u8) -> Hertz {
    let unit = usize::from(tran_speed & 0x07).min(TRAN_SPEED_UNIT.len() - 1);
    let multiplier = usize::from((tran_speed >> 3) & 0x0F);
    Hertz(TRAN_SPEED_UNIT[unit] * TRAN_SPEED_MULTIPLIER[multiplier] / 10)
}

impl Csd {
    /// Take the CSD from an R2 response
    pub fn from_response(response: &Response) -> Csd {
        Csd {
            data: response.to_bytes(),
        }
    }

    define_field!(csd_structure, u8, 0, 6, 2);
    define_field!(mmc_spec_version, u8, 0, 2, 4);
    define_field!(data_read_access_time1, u8, 1, 0, 8);
    define_field!(data_read_access_time2, u8, 2, 0, 8);
    define_field!(max_data_transfer_rate, u8, 3, 0, 8);
    define_field!(card_command_classes, u16, [(4, 0, 8), (5, 4, 4)]);
    define_field!(read_block_length, u8, 5, 0, 4);
    define_field!(read_partial_blocks, bool, 6, 7);
    define_field!(dsr_implemented, bool, 6, 4);
    define_field!(device_size, u32, [(6, 0, 2), (7, 0, 8), (8, 6, 2)]);
    define_field!(device_size_multiplier, u8, [(9, 0, 2), (10, 7, 1)]);
    define_field!(high_capacity_device_size, u32, [(7, 0, 6), (8, 0, 8), (9, 0, 8)]);
    define_field!(mmc_erase_group_size, u8, 10, 2, 5);
    define_field!(mmc_erase_group_multiplier, u8, [(10, 0, 2), (11, 5, 3)]);
    define_field!(write_block_length, u8, [(12, 0, 2), (13, 6, 2)]);
    define_field!(temporary_write_protection, bool, 14, 4);
    define_field!(permanent_write_protection, bool, 14, 5);

    /// Does an SD card's CSD use the high capacity layout?
    pub fn is_sd_high_capacity_layout(&self) -> bool {
        self.csd_structure() == 1
    }

    /// The maximum transfer speed for the card's default timing
    pub fn transfer_speed(&self) -> Hertz {
        decode_tran_speed(self.max_data_transfer_rate())
    }

    /// The read block length, in bytes
    pub fn read_block_len(&self) -> u32 {
        1 << self.read_block_length()
    }

    /// The write block length, in bytes
    pub fn write_block_len(&self) -> u32 {
        1 << self.write_block_length()
    }

    /// The MMC erase group size, in write blocks
    pub fn mmc_erase_group_blocks(&self) -> u32 {
        (u32::from(self.mmc_erase_group_size()) + 1)
            * (u32::from(self.mmc_erase_group_multiplier()) + 1)
    }

    /// Returns the card capacity in bytes
    pub fn card_capacity_bytes(&self, high_capacity_layout: bool) -> u64 {
        if high_capacity_layout {
            (u64::from(self.high_capacity_device_size()) + 1) << 19
        } else {
            let multiplier = self.device_size_multiplier() + self.read_block_length() + 2;
            (u64::from(self.device_size()) + 1) << multiplier
        }
    }
}


// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
