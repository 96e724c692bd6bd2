//! A card behind a host, as a [`BlockDevice`].
//!
//! [`SdMmc`] initialises the card the first time it's needed, and again
//! after the card has been pulled out and put back.

use core::cell::RefCell;

use crate::blockdevice::{Block, BlockCount, BlockDevice, BlockIdx, BLOCK_LEN_U32};
use crate::card::Card;
use crate::init::initialize;
use crate::partition::{self, Partition};
use crate::transfer::{self, EraseKind};
use crate::transport::Transport;
use crate::Error;

use crate::{debug, warn};

/// An SD or MMC card attached to a host controller.
///
/// All the APIs take `&self` - mutability is handled using an inner `RefCell`.
pub struct SdMmc<T>
where
    T: Transport,
{
    inner: RefCell<SdMmcInner<T>>,
}

impl<T> SdMmc<T>
where
    T: Transport,
{
    /// Wrap a host. The card isn't touched until it's first used.
    pub fn new(host: T) -> SdMmc<T> {
        SdMmc {
            inner: RefCell::new(SdMmcInner { host, card: None }),
        }
    }

    /// Get a temporary borrow on the underlying host.
    pub fn host<R, F>(&self, func: F) -> R
    where
        F: FnOnce(&mut T) -> R,
    {
        let mut inner = self.inner.borrow_mut();
        func(&mut inner.host)
    }

    /// Return the usable size of the selected partition in bytes.
    pub fn num_bytes(&self) -> Result<u64, Error> {
        let mut inner = self.inner.borrow_mut();
        inner.check_init()?;
        Ok(inner.card()?.capacity_bytes())
    }

    /// Everything we know about the card, initialising it if need be.
    pub fn card(&self) -> Result<Card, Error> {
        let mut inner = self.inner.borrow_mut();
        inner.check_init()?;
        inner.card().cloned()
    }

    /// Mark the card as requiring a reset.
    ///
    /// The next operation will assume the card has been freshly inserted.
    pub fn mark_card_uninit(&self) {
        let mut inner = self.inner.borrow_mut();
        inner.card = None;
    }

    /// Erase `count` blocks starting at `start`.
    ///
    /// The range is widened to whole erase groups; see
    /// [`transfer::erase_blocks`].
    pub fn erase(&self, start: BlockIdx, count: BlockCount, kind: EraseKind) -> Result<(), Error> {
        let mut inner = self.inner.borrow_mut();
        debug!("Erasing {} blocks @ {}", count.0, start.0);
        inner.check_init()?;
        inner.erase(start, count, kind)
    }

    /// Switch an MMC device to another hardware partition.
    ///
    /// Block indices and [`BlockDevice::num_blocks`] refer to the selected
    /// partition from then on. If the switch fails part way, the card is
    /// initialised again on next use, which puts it back on the user area.
    pub fn select_partition(&self, partition: Partition) -> Result<(), Error> {
        let mut inner = self.inner.borrow_mut();
        inner.check_init()?;
        inner.select_partition(partition)
    }

    /// Give back the host.
    pub fn free(self) -> T {
        self.inner.into_inner().host
    }
}

impl<T> BlockDevice for SdMmc<T>
where
    T: Transport,
{
    type Error = Error;

    /// Read one or more blocks, starting at the given block index.
    fn read(&self, blocks: &mut [Block], start_block_idx: BlockIdx) -> Result<(), Self::Error> {
        let mut inner = self.inner.borrow_mut();
        debug!("Read {} blocks @ {}", blocks.len(), start_block_idx.0);
        inner.check_init()?;
        inner.read(blocks, start_block_idx)
    }

    /// Write one or more blocks, starting at the given block index.
    fn write(&self, blocks: &[Block], start_block_idx: BlockIdx) -> Result<(), Self::Error> {
        let mut inner = self.inner.borrow_mut();
        debug!("Writing {} blocks @ {}", blocks.len(), start_block_idx.0);
        inner.check_init()?;
        inner.write(blocks, start_block_idx)
    }

    /// Determine how many blocks this device can hold.
    fn num_blocks(&self) -> Result<BlockCount, Self::Error> {
        let mut inner = self.inner.borrow_mut();
        inner.check_init()?;
        Ok(inner.card()?.num_blocks())
    }
}

/// The host and the card we found on it.
///
/// All the APIs require `&mut self`.
struct SdMmcInner<T>
where
    T: Transport,
{
    host: T,
    card: Option<Card>,
}

impl<T> SdMmcInner<T>
where
    T: Transport,
{
    /// Initialise the card, unless we already have.
    fn check_init(&mut self) -> Result<(), Error> {
        if self.card.is_none() {
            let card = initialize(&mut self.host)?;
            self.card = Some(card);
        }
        Ok(())
    }

    fn card(&self) -> Result<&Card, Error> {
        self.card.as_ref().ok_or(Error::BadState)
    }

    /// Forget the card if a failure was down to it going away.
    fn check_result<R>(&mut self, result: Result<R, Error>) -> Result<R, Error> {
        if result.is_err() && !self.host.is_card_present() {
            warn!("Card removed");
            self.card = None;
        }
        result
    }

    fn read(&mut self, blocks: &mut [Block], start_block_idx: BlockIdx) -> Result<(), Error> {
        let card = self.card.as_ref().ok_or(Error::BadState)?;
        if card.block_len() != BLOCK_LEN_U32 {
            return Err(Error::UnsupportedBlockLength(card.block_len()));
        }
        let count = u32::try_from(blocks.len()).map_err(|_| Error::OutOfRange)?;
        let result = transfer::read_blocks(
            &mut self.host,
            card,
            start_block_idx,
            BlockCount(count),
            blocks.as_flattened_mut(),
        );
        self.check_result(result.map(|_| ()).map_err(Error::from))
    }

    fn write(&mut self, blocks: &[Block], start_block_idx: BlockIdx) -> Result<(), Error> {
        let card = self.card.as_ref().ok_or(Error::BadState)?;
        if card.write_block_len() != BLOCK_LEN_U32 {
            return Err(Error::UnsupportedBlockLength(card.write_block_len()));
        }
        let count = u32::try_from(blocks.len()).map_err(|_| Error::OutOfRange)?;
        let result = transfer::write_blocks(
            &mut self.host,
            card,
            start_block_idx,
            BlockCount(count),
            blocks.as_flattened(),
        );
        self.check_result(result.map(|_| ()).map_err(Error::from))
    }

    fn erase(&mut self, start: BlockIdx, count: BlockCount, kind: EraseKind) -> Result<(), Error> {
        let card = self.card.as_ref().ok_or(Error::BadState)?;
        let result = transfer::erase_blocks(&mut self.host, card, start, count, kind);
        self.check_result(result)
    }

    fn select_partition(&mut self, partition: Partition) -> Result<(), Error> {
        let card = self.card.take().ok_or(Error::BadState)?;
        match partition::select_partition(&mut self.host, card, partition) {
            Ok(card) => {
                self.card = Some(card);
                Ok(())
            }
            Err((card, e)) => {
                if partition::leaves_partition_unchanged(&e) {
                    self.card = Some(card);
                } else {
                    warn!("Partition unknown after {:?}, card needs initialising", e);
                }
                self.check_result(Err(e))
            }
        }
    }
}

#[cfg(feature = "embassy-sync-06")]
mod embassy_sync_06 {
    use ::embassy_sync_06::blocking_mutex;

    use super::*;

    /// Share a card between tasks according to the `embassy-sync` mutex
    /// model. See [`blocking_mutex::Mutex`] for more details.
    impl<M, T> BlockDevice for blocking_mutex::Mutex<M, SdMmc<T>>
    where
        M: blocking_mutex::raw::RawMutex,
        T: Transport,
    {
        type Error = Error;

        fn read(&self, blocks: &mut [Block], start_block_idx: BlockIdx) -> Result<(), Self::Error> {
            self.lock(|sdmmc| sdmmc.read(blocks, start_block_idx))
        }

        fn write(&self, blocks: &[Block], start_block_idx: BlockIdx) -> Result<(), Self::Error> {
            self.lock(|sdmmc| sdmmc.write(blocks, start_block_idx))
        }

        fn num_blocks(&self) -> Result<BlockCount, Self::Error> {
            self.lock(|sdmmc| sdmmc.num_blocks())
        }
    }
}


// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
