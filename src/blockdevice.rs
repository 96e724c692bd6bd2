//! Traits and types for working with Block Devices.
//!
//! Generic code for handling block devices, such as types for identifying
//! a particular block on a block device by its index.

/// A standard 512 byte block (also known as a sector).
///
/// Almost all SD/MMC cards have 512 byte blocks, and SDHC/SDXC and high
/// capacity eMMC parts only ever transfer 512 byte blocks.
///
/// This library does not support devices with a block size other than 512
/// bytes through the [`BlockDevice`] trait.
pub type Block = [u8; BLOCK_LEN];

/// All our blocks are a fixed length of 512 bytes.
pub const BLOCK_LEN: usize = 512;

/// Sometimes we want `LEN` as a `u32` and the casts don't look nice.
pub const BLOCK_LEN_U32: u32 = 512;

/// The linear numeric address of a block (or sector).
///
/// The first block on a card gets `BlockIdx(0)` (which usually contains the
/// Master Boot Record).
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockIdx(pub u32);

/// The a number of blocks (or sectors).
///
/// Add this to a `BlockIdx` to get an actual address on disk.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockCount(pub u32);

/// A block device - a device which can read and write blocks (or
/// sectors). Only supports devices which are <= 2 TiB in size.
pub trait BlockDevice {
    /// The errors that the `BlockDevice` can return. Must be debug formattable.
    type Error: core::fmt::Debug;
    /// Read one or more blocks, starting at the given block index.
    fn read(&self, blocks: &mut [Block], start_block_idx: BlockIdx) -> Result<(), Self::Error>;
    /// Write one or more blocks, starting at the given block index.
    fn write(&self, blocks: &[Block], start_block_idx: BlockIdx) -> Result<(), Self::Error>;
    /// Determine how many blocks this device can hold.
    fn num_blocks(&self) -> Result<BlockCount, Self::Error>;
}

impl core::ops::Add<BlockCount> for BlockIdx {
    type Output = BlockIdx;
    fn add(self, rhs: BlockCount) -> BlockIdx {
        BlockIdx(self.0 + rhs.0)
    }
}

impl BlockIdx {
    /// Is the range `[self, self + count)` entirely before `end`?
    ///
    /// Doesn't overflow, whatever the inputs.
    pub fn range_fits(self, count: BlockCount, end: BlockCount) -> bool {
        u64::from(self.0) + u64::from(count.0) <= u64::from(end.0)
    }
}


// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
