//! The MMC Extended CSD register.
//!
//! Cards at version 4 and later carry 512 bytes of extra configuration,
//! read with CMD8 as a single data block. Multi-byte fields are little
//! endian.

use byteorder::{ByteOrder, LittleEndian};

use super::MmcVersion;
use crate::transport::Caps;

/// GP_SIZE_MULT_x_y, three bytes per general purpose partition
pub const EXT_CSD_GP_SIZE_MULT: usize = 143;
/// How many general purpose partitions an MMC device can have
pub const GP_PARTITIONS: usize = 4;
/// PARTITION_SETTING_COMPLETED
pub const EXT_CSD_PARTITION_SETTING: usize = 155;
/// PARTITIONING_SUPPORT
pub const EXT_CSD_PARTITIONING_SUPPORT: usize = 160;
/// WR_REL_SET
pub const EXT_CSD_WR_REL_SET: usize = 167;
/// RPMB_SIZE_MULT
pub const EXT_CSD_RPMB_MULT: usize = 168;
/// ERASE_GROUP_DEF
pub const EXT_CSD_ERASE_GROUP_DEF: usize = 175;
/// PARTITION_CONFIG
pub const EXT_CSD_PART_CONF: usize = 179;
/// BUS_WIDTH
pub const EXT_CSD_BUS_WIDTH: usize = 183;
/// HS_TIMING
pub const EXT_CSD_HS_TIMING: usize = 185;
/// EXT_CSD_REV
pub const EXT_CSD_REV: usize = 192;
/// CARD_TYPE (DEVICE_TYPE)
pub const EXT_CSD_CARD_TYPE: usize = 196;
/// SEC_COUNT
pub const EXT_CSD_SEC_CNT: usize = 212;
/// HC_WP_GRP_SIZE
pub const EXT_CSD_HC_WP_GRP_SIZE: usize = 221;
/// HC_ERASE_GRP_SIZE
pub const EXT_CSD_HC_ERASE_GRP_SIZE: usize = 224;
/// BOOT_SIZE_MULT
pub const EXT_CSD_BOOT_MULT: usize = 226;

/// CARD_TYPE: high speed at 26 MHz
pub const EXT_CSD_CARD_TYPE_26: u8 = 1 << 0;
/// CARD_TYPE: high speed at 52 MHz
pub const EXT_CSD_CARD_TYPE_52: u8 = 1 << 1;
/// CARD_TYPE: DDR at 52 MHz, 1.8V or 3V I/O
pub const EXT_CSD_CARD_TYPE_DDR_1_8V: u8 = 1 << 2;
/// CARD_TYPE: DDR at 52 MHz, 1.2V I/O
pub const EXT_CSD_CARD_TYPE_DDR_1_2V: u8 = 1 << 3;
/// CARD_TYPE: DDR at 52 MHz, any I/O voltage
pub const EXT_CSD_CARD_TYPE_DDR_52: u8 = EXT_CSD_CARD_TYPE_DDR_1_8V | EXT_CSD_CARD_TYPE_DDR_1_2V;

/// PARTITIONING_SUPPORT: the device supports partitioning
pub const PART_SUPPORT: u8 = 0x1;
/// PARTITION_SETTING_COMPLETED: partitioning has been finalised
pub const PART_SETTING_COMPLETED: u8 = 0x1;
/// PARTITION_CONFIG: the PARTITION_ACCESS field
pub const PART_ACCESS_MASK: u8 = 0x7;

/// BUS_WIDTH value for a 1-bit bus
pub const EXT_CSD_BUS_WIDTH_1: u8 = 0;
/// BUS_WIDTH value for a 4-bit bus
pub const EXT_CSD_BUS_WIDTH_4: u8 = 1;
/// BUS_WIDTH value for an 8-bit bus
pub const EXT_CSD_BUS_WIDTH_8: u8 = 2;
/// BUS_WIDTH value for a 4-bit DDR bus
pub const EXT_CSD_DDR_BUS_WIDTH_4: u8 = 5;
/// BUS_WIDTH value for an 8-bit DDR bus
pub const EXT_CSD_DDR_BUS_WIDTH_8: u8 = 6;

/// The 512-byte Extended CSD register.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtCsd {
    /// The register contents
    pub data: [u8; 512],
}

impl Default for ExtCsd {
    fn default() -> Self {
        ExtCsd { data: [0u8; 512] }
    }
}

impl ExtCsd {
    /// Length of the register in bytes
    pub const LEN: usize = 512;

    define_field!(partition_setting, u8, EXT_CSD_PARTITION_SETTING);
    define_field!(partitioning_support, u8, EXT_CSD_PARTITIONING_SUPPORT);
    define_field!(write_reliability_setting, u8, EXT_CSD_WR_REL_SET);
    define_field!(rpmb_size_mult, u8, EXT_CSD_RPMB_MULT);
    define_field!(erase_group_def, u8, EXT_CSD_ERASE_GROUP_DEF);
    define_field!(partition_config, u8, EXT_CSD_PART_CONF);
    define_field!(bus_width, u8, EXT_CSD_BUS_WIDTH);
    define_field!(hs_timing, u8, EXT_CSD_HS_TIMING);
    define_field!(revision, u8, EXT_CSD_REV);
    define_field!(card_type, u8, EXT_CSD_CARD_TYPE);
    define_field!(sector_count, u32, EXT_CSD_SEC_CNT);
    define_field!(hc_wp_grp_size, u8, EXT_CSD_HC_WP_GRP_SIZE);
    define_field!(hc_erase_grp_size, u8, EXT_CSD_HC_ERASE_GRP_SIZE);
    define_field!(boot_size_mult, u8, EXT_CSD_BOOT_MULT);

    /// Map EXT_CSD_REV onto a card version.
    ///
    /// Returns `None` for revisions that don't refine the version the CSD
    /// gave us.
    pub fn version(&self) -> Option<MmcVersion> {
        match self.revision() {
            1 => Some(MmcVersion::V4_1),
            2 => Some(MmcVersion::V4_2),
            3 => Some(MmcVersion::V4_3),
            5 => Some(MmcVersion::V4_41),
            6 => Some(MmcVersion::V4_5),
            7 => Some(MmcVersion::V5_0),
            _ => None,
        }
    }

    /// The user area capacity in bytes, if the sector count is meaningful.
    ///
    /// SEC_COUNT only applies to devices over 2 GiB, which must use sector
    /// addressing. Smaller devices report their size through the CSD.
    pub fn sector_capacity(&self) -> Option<u64> {
        if self.revision() < 2 {
            return None;
        }
        let capacity = u64::from(self.sector_count()) * 512;
        if (capacity >> 20) > 2 * 1024 {
            Some(capacity)
        } else {
            None
        }
    }

    /// Is the device partitionable?
    pub fn supports_partitioning(&self) -> bool {
        self.partitioning_support() & PART_SUPPORT != 0
    }

    /// Has the host finalised the partition layout?
    pub fn partitioning_completed(&self) -> bool {
        self.partition_setting() & PART_SETTING_COMPLETED != 0
    }

    /// Is the high capacity erase group definition in use?
    pub fn uses_hc_erase_groups(&self) -> bool {
        self.erase_group_def() & 0x1 != 0
    }

    /// The high capacity erase group size, in 512-byte blocks
    pub fn hc_erase_group_blocks(&self) -> u32 {
        u32::from(self.hc_erase_grp_size()) * 1024
    }

    /// Size of each boot partition, in bytes
    pub fn boot_partition_size(&self) -> u64 {
        u64::from(self.boot_size_mult()) << 17
    }

    /// Size of the RPMB partition, in bytes
    pub fn rpmb_partition_size(&self) -> u64 {
        u64::from(self.rpmb_size_mult()) << 17
    }

    /// GP_SIZE_MULT for general purpose partition `idx`, if there is such a
    /// partition number.
    pub fn gp_size_mult(&self, idx: usize) -> Option<u32> {
        if idx >= GP_PARTITIONS {
            return None;
        }
        let offset = EXT_CSD_GP_SIZE_MULT + idx * 3;
        Some(LittleEndian::read_u24(&self.data[offset..offset + 3]))
    }

    /// Size of general purpose partition `idx`, in bytes. Zero if it
    /// doesn't exist.
    pub fn gp_partition_size(&self, idx: usize) -> u64 {
        u64::from(self.gp_size_mult(idx).unwrap_or(0))
            * u64::from(self.hc_erase_grp_size())
            * u64::from(self.hc_wp_grp_size())
            << 19
    }

    /// Are any general purpose partitions defined?
    pub fn has_gp_partitions(&self) -> bool {
        (0..GP_PARTITIONS).any(|idx| self.gp_size_mult(idx).unwrap_or(0) != 0)
    }

    /// Bus modes the card's CARD_TYPE advertises.
    ///
    /// Both bus widths are always supported by v4 cards. The speed bits only
    /// count once HS_TIMING has been switched on.
    /// Does CARD_TYPE list any high speed mode?
    ///
    /// Unlike [`ExtCsd::caps`] this doesn't care whether HS_TIMING is set yet.
    pub fn offers_high_speed(&self) -> bool {
        self.card_type() & (EXT_CSD_CARD_TYPE_26 | EXT_CSD_CARD_TYPE_52) != 0
    }

    pub fn caps(&self) -> Caps {
        let mut caps = Caps::BUS_4BIT | Caps::BUS_8BIT;
        if self.hs_timing() != 0 {
            let card_type = self.card_type();
            if card_type & EXT_CSD_CARD_TYPE_52 != 0 {
                caps |= Caps::HS | Caps::HS_52MHZ;
                if card_type & EXT_CSD_CARD_TYPE_DDR_52 != 0 {
                    caps |= Caps::DDR_52MHZ;
                }
            } else {
                caps |= Caps::HS;
            }
        }
        caps
    }

    /// Does `other` agree with us on the fields that tell a good read from a
    /// garbled one?
    ///
    /// Used to check a bus width actually works: read EXT_CSD over the new
    /// width and compare it with a copy read over the old one.
    pub fn matches(&self, other: &ExtCsd) -> bool {
        self.partitioning_support() == other.partitioning_support()
            && self.hc_erase_grp_size() == other.hc_erase_grp_size()
            && self.revision() == other.revision()
            && self.sector_count() == other.sector_count()
    }
}


// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
