//! MMC hardware partitions.
//!
//! eMMC devices carve their storage into a user area, two boot partitions,
//! an RPMB partition and up to four general purpose partitions. Only one is
//! accessible at a time; PARTITION_CONFIG says which.

use crate::card::ext_csd::{EXT_CSD_PART_CONF, PART_ACCESS_MASK};
use crate::card::{Card, CardFamily, MmcPartitions};
use crate::cmd;
use crate::transport::Transport;
use crate::Error;

use crate::debug;

/// One of the hardware partitions on an MMC device.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum Partition {
    /// The user data area
    User = 0,
    /// Boot partition 1
    Boot1 = 1,
    /// Boot partition 2
    Boot2 = 2,
    /// The replay protected memory block
    Rpmb = 3,
    /// General purpose partition 1
    Gp1 = 4,
    /// General purpose partition 2
    Gp2 = 5,
    /// General purpose partition 3
    Gp3 = 6,
    /// General purpose partition 4
    Gp4 = 7,
}

impl Partition {
    /// The PARTITION_ACCESS value that selects this partition
    pub fn access(self) -> u8 {
        self as u8
    }

    /// How big this partition is on a device with these partitions, in
    /// bytes. Zero if it doesn't exist.
    pub fn size(self, partitions: &MmcPartitions) -> u64 {
        match self {
            Partition::User => partitions.user,
            Partition::Boot1 => partitions.boot[0],
            Partition::Boot2 => partitions.boot[1],
            Partition::Rpmb => partitions.rpmb,
            Partition::Gp1 => partitions.general_purpose[0],
            Partition::Gp2 => partitions.general_purpose[1],
            Partition::Gp3 => partitions.general_purpose[2],
            Partition::Gp4 => partitions.general_purpose[3],
        }
    }
}

/// Switch an MMC device to another hardware partition.
///
/// Takes the card and hands it back with its capacity set to the new
/// partition's size. On error the card is handed back untouched. That is
/// only certain to match the device for the errors in
/// [`leaves_partition_unchanged`]; after anything else (a
/// [`Error::CardBusyTimeout`] say) the device may have switched, and the card
/// should be initialised again before use.
///
/// RPMB only takes authenticated frames, so it can't be selected here.
pub fn select_partition<T>(
    host: &mut T,
    card: Card,
    partition: Partition,
) -> Result<Card, (Card, Error)>
where
    T: Transport,
{
    let mmc = match card.family {
        CardFamily::Mmc(mmc) => mmc,
        CardFamily::Sd(_) => return Err((card, Error::UnsupportedCard)),
    };
    let Some(conf) = mmc.part_config else {
        return Err((card, Error::UnsupportedCard));
    };
    if partition == Partition::Rpmb {
        return Err((card, Error::UnsupportedCard));
    }
    let size = partition.size(&mmc.partitions);
    if size == 0 {
        return Err((card, Error::NoSuchPartition));
    }
    if mmc.active_partition == partition.access() {
        return Ok(card);
    }

    let new_conf = (conf & !PART_ACCESS_MASK) | partition.access();
    if let Err(e) = cmd::mmc_switch(host, card.rca, EXT_CSD_PART_CONF, new_conf) {
        return Err((card, e));
    }
    debug!("Selected {:?}, {} bytes", partition, size);

    let mut card = card;
    card.capacity = size;
    if let CardFamily::Mmc(mmc) = &mut card.family {
        mmc.part_config = Some(new_conf);
        mmc.active_partition = partition.access();
    }
    Ok(card)
}

/// Does this error from [`select_partition`] mean the device definitely
/// stayed on its old partition?
pub fn leaves_partition_unchanged(error: &Error) -> bool {
    matches!(
        error,
        Error::SwitchFailed | Error::NoSuchPartition | Error::UnsupportedCard
    )
}


// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
