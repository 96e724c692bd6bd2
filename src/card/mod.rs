//! What we know about an initialised card.
//!
//! A [`Card`] is only ever built by [`crate::init::initialize`], so holding
//! one means the card has been through identification, addressing and
//! configuration and is sitting in the transfer state.

pub mod cid;
pub mod csd;
pub mod ext_csd;
pub mod ocr;
pub mod scr;
pub mod status;
pub mod switch;

pub use cid::Cid;
pub use csd::Csd;
pub use ext_csd::ExtCsd;
pub use ocr::Ocr;
pub use scr::Scr;
pub use status::{CardState, CardStatus};
pub use switch::SwitchStatus;

use crate::blockdevice::BlockCount;
use crate::transport::{BusWidth, Caps, TransportMode};
use crate::Hertz;

/// SD physical layer versions.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum SdVersion {
    /// 1.0 (or anything we don't recognise)
    V1_0,
    /// 1.10
    V1_10,
    /// 2.00
    V2,
    /// 3.0x
    V3,
}

/// MMC system specification versions.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum MmcVersion {
    /// 1.2 (or anything we don't recognise)
    V1_2,
    /// 1.4
    V1_4,
    /// 2.2
    V2_2,
    /// 3.x
    V3,
    /// 4.0
    V4,
    /// 4.1
    V4_1,
    /// 4.2
    V4_2,
    /// 4.3
    V4_3,
    /// 4.41
    V4_41,
    /// 4.5
    V4_5,
    /// 5.0
    V5_0,
}

impl MmcVersion {
    /// Map the CSD SPEC_VERS field onto a version
    pub fn from_spec_vers(spec_vers: u8) -> MmcVersion {
        match spec_vers {
            1 => MmcVersion::V1_4,
            2 => MmcVersion::V2_2,
            3 => MmcVersion::V3,
            4 => MmcVersion::V4,
            _ => MmcVersion::V1_2,
        }
    }
}

/// Sizes of the hardware partitions on an MMC device, in bytes.
///
/// A size of zero means the partition doesn't exist.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct MmcPartitions {
    /// The user data area
    pub user: u64,
    /// The two boot partitions
    pub boot: [u64; 2],
    /// The replay protected memory block partition
    pub rpmb: u64,
    /// The four general purpose partitions
    pub general_purpose: [u64; 4],
}

/// State only SD cards have.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SdState {
    /// The physical layer version
    pub version: SdVersion,
    /// The SCR, if we read it
    pub scr: Option<Scr>,
}

/// State only MMC cards have.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct MmcState {
    /// The specification version
    pub version: MmcVersion,
    /// Hardware partition sizes
    pub partitions: MmcPartitions,
    /// PARTITION_CONFIG, if the card has partitions we can switch to
    pub part_config: Option<u8>,
    /// The hardware partition currently selected
    pub active_partition: u8,
}

/// Which family the card belongs to.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CardFamily {
    /// An SD, SDHC or SDXC card
    Sd(SdState),
    /// An MMC card or eMMC device
    Mmc(MmcState),
}

/// An initialised card.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Card {
    pub(crate) family: CardFamily,
    pub(crate) cid: Cid,
    pub(crate) csd: Csd,
    pub(crate) ocr: Ocr,
    pub(crate) rca: u16,
    pub(crate) high_capacity: bool,
    pub(crate) read_block_len: u32,
    pub(crate) write_block_len: u32,
    pub(crate) erase_group_size: u32,
    pub(crate) capacity: u64,
    pub(crate) bus_width: BusWidth,
    pub(crate) ddr: bool,
    pub(crate) caps: Caps,
    pub(crate) transfer_speed: Hertz,
    pub(crate) mode: TransportMode,
}

impl Card {
    /// SD or MMC, and the family-specific state
    pub fn family(&self) -> &CardFamily {
        &self.family
    }

    /// Is this an SD card?
    pub fn is_sd(&self) -> bool {
        matches!(self.family, CardFamily::Sd(_))
    }

    /// Is this an MMC card?
    pub fn is_mmc(&self) -> bool {
        matches!(self.family, CardFamily::Mmc(_))
    }

    /// The Card Identification register
    pub fn cid(&self) -> &Cid {
        &self.cid
    }

    /// The Card Specific Data register
    pub fn csd(&self) -> &Csd {
        &self.csd
    }

    /// The Operating Conditions Register, as it was when the card powered up
    pub fn ocr(&self) -> Ocr {
        self.ocr
    }

    /// The Relative Card Address
    pub fn rca(&self) -> u16 {
        self.rca
    }

    /// Does the card take block addresses (rather than byte addresses)?
    pub fn is_high_capacity(&self) -> bool {
        self.high_capacity
    }

    /// Bytes per block when reading
    pub fn block_len(&self) -> u32 {
        self.read_block_len
    }

    /// Bytes per block when writing
    pub fn write_block_len(&self) -> u32 {
        self.write_block_len
    }

    /// The erase group size, in blocks
    pub fn erase_group_size(&self) -> u32 {
        self.erase_group_size
    }

    /// The capacity of the selected partition, in bytes
    pub fn capacity_bytes(&self) -> u64 {
        self.capacity
    }

    /// The number of blocks in the selected partition
    pub fn num_blocks(&self) -> BlockCount {
        let blocks = self.capacity / u64::from(self.read_block_len.max(1));
        BlockCount(u32::try_from(blocks).unwrap_or(u32::MAX))
    }

    /// The negotiated bus width
    pub fn bus_width(&self) -> BusWidth {
        self.bus_width
    }

    /// Are we using dual data rate?
    pub fn is_ddr(&self) -> bool {
        self.ddr
    }

    /// The modes both the card and the host support
    pub fn caps(&self) -> Caps {
        self.caps
    }

    /// The negotiated card clock
    pub fn transfer_speed(&self) -> Hertz {
        self.transfer_speed
    }

    /// Native or SPI
    pub fn mode(&self) -> TransportMode {
        self.mode
    }

    /// The SD physical layer version, if this is an SD card
    pub fn sd_version(&self) -> Option<SdVersion> {
        match &self.family {
            CardFamily::Sd(sd) => Some(sd.version),
            CardFamily::Mmc(_) => None,
        }
    }

    /// The MMC specification version, if this is an MMC card
    pub fn mmc_version(&self) -> Option<MmcVersion> {
        match &self.family {
            CardFamily::Sd(_) => None,
            CardFamily::Mmc(mmc) => Some(mmc.version),
        }
    }

    /// The hardware partitions, if this is an MMC card
    pub fn mmc_partitions(&self) -> Option<&MmcPartitions> {
        match &self.family {
            CardFamily::Sd(_) => None,
            CardFamily::Mmc(mmc) => Some(&mmc.partitions),
        }
    }

    /// The CMD13/CMD7/CMD9 argument for this card
    pub(crate) fn rca_arg(&self) -> u32 {
        u32::from(self.rca) << 16
    }
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
