//! Block reads, writes and erases.
//!
//! Requests are checked against the card, split into chunks the host can
//! take in one command, and sent one chunk at a time. A chunk that fails
//! stops the transfer; the caller learns how many blocks made it.

use crate::blockdevice::{BlockCount, BlockIdx};
use crate::card::Card;
use crate::cmd;
use crate::proto::*;
use crate::transport::{Transport, TransportMode};
use crate::{Error, TransferError};

use crate::{debug, trace, warn};

/// What sort of erase to ask the card for.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EraseKind {
    /// The card may just mark the blocks as erased
    Normal,
    /// The card must physically purge the blocks
    Secure,
}

impl EraseKind {
    fn arg(self) -> u32 {
        match self {
            EraseKind::Normal => ERASE_ARG,
            EraseKind::Secure => SECURE_ERASE_ARG,
        }
    }
}

/// The command argument that addresses block `idx`.
///
/// High capacity cards take block numbers. Everything else takes a byte
/// offset, which must fit in 32 bits.
pub fn block_address(high_capacity: bool, idx: BlockIdx, block_len: u32) -> Result<u32, Error> {
    if high_capacity {
        Ok(idx.0)
    } else {
        idx.0.checked_mul(block_len).ok_or(Error::OutOfRange)
    }
}

/// Round `[start, start + count)` out to whole erase groups.
///
/// Returns the first and last block (inclusive) to erase, never past the end
/// of a card with `num_blocks` blocks.
pub fn erase_range(
    start: BlockIdx,
    count: BlockCount,
    group: u32,
    num_blocks: BlockCount,
) -> (BlockIdx, BlockIdx) {
    let group = u64::from(group.max(1));
    let first = u64::from(start.0) / group * group;
    let end = u64::from(start.0) + u64::from(count.0);
    let end = end.div_ceil(group) * group;
    let last = end.min(u64::from(num_blocks.0)).saturating_sub(1).max(first);
    // Both fit: first <= start, and last < num_blocks
    (BlockIdx(first as u32), BlockIdx(last as u32))
}

fn failed(error: Error, done: u32) -> TransferError {
    TransferError {
        error,
        blocks_transferred: BlockCount(done),
    }
}

fn check_range(card: &Card, start: BlockIdx, count: BlockCount) -> Result<(), Error> {
    if start.range_fits(count, card.num_blocks()) {
        Ok(())
    } else {
        Err(Error::OutOfRange)
    }
}

fn check_buffer(available: usize, count: BlockCount, block_len: u32) -> Result<(), Error> {
    let needed = (count.0 as usize).checked_mul(block_len as usize);
    match needed {
        Some(needed) if needed <= available => Ok(()),
        _ => Err(Error::BufferTooSmall),
    }
}

fn check_write_protect<T>(host: &mut T) -> Result<(), Error>
where
    T: Transport,
{
    if host.is_write_protected() {
        warn!("Card is write protected");
        Err(Error::WriteProtected)
    } else {
        Ok(())
    }
}

fn set_block_len<T>(host: &mut T, card: &Card, block_len: u32) -> Result<(), Error>
where
    T: Transport,
{
    // DDR cards are fixed at 512 bytes and reject SET_BLOCKLEN
    if card.ddr {
        return Ok(());
    }
    host.send_command(Command::new(CMD16, block_len, ResponseType::R1), None)?;
    Ok(())
}

fn stop_transmission<T>(host: &mut T, card: &Card) -> Result<(), Error>
where
    T: Transport,
{
    if card.mode == TransportMode::Spi {
        return Ok(());
    }
    host.send_command(Command::new(CMD12, 0, ResponseType::R1b), None)?;
    Ok(())
}

fn chunk_blocks<T>(host: &T) -> u32
where
    T: Transport,
{
    host.config().max_blocks_per_transfer.max(1)
}

/// Read `count` blocks starting at `start` into `buf`.
///
/// `buf` must hold `count` blocks of [`Card::block_len`] bytes. Returns the
/// number of blocks read.
pub fn read_blocks<T>(
    host: &mut T,
    card: &Card,
    start: BlockIdx,
    count: BlockCount,
    buf: &mut [u8],
) -> Result<BlockCount, TransferError>
where
    T: Transport,
{
    if count.0 == 0 {
        return Ok(BlockCount(0));
    }
    let block_len = card.read_block_len;
    check_range(card, start, count).map_err(|e| failed(e, 0))?;
    check_buffer(buf.len(), count, block_len).map_err(|e| failed(e, 0))?;
    trace!("Read {} blocks at {}", count.0, start.0);
    set_block_len(host, card, block_len).map_err(|e| failed(e, 0))?;

    let chunk = chunk_blocks(host);
    let block_bytes = block_len as usize;
    let mut done = 0;
    while done < count.0 {
        let blocks = (count.0 - done).min(chunk);
        let offset = done as usize * block_bytes;
        let len = blocks as usize * block_bytes;
        read_chunk(
            host,
            card,
            start + BlockCount(done),
            blocks,
            &mut buf[offset..offset + len],
        )
        .map_err(|e| failed(e, done))?;
        done += blocks;
    }
    Ok(BlockCount(done))
}

fn read_chunk<T>(
    host: &mut T,
    card: &Card,
    start: BlockIdx,
    blocks: u32,
    buf: &mut [u8],
) -> Result<(), Error>
where
    T: Transport,
{
    let block_len = card.read_block_len;
    let address = block_address(card.high_capacity, start, block_len)?;
    let index = if blocks == 1 { CMD17 } else { CMD18 };
    host.send_command(
        Command::new(index, address, ResponseType::R1),
        Some(Data::read(buf, block_len, blocks)),
    )?;
    if blocks > 1 {
        stop_transmission(host, card)?;
    }
    Ok(())
}

/// Write `count` blocks from `buf` starting at `start`.
///
/// `buf` must hold `count` blocks of [`Card::write_block_len`] bytes.
/// Returns once the card has finished programming every block.
pub fn write_blocks<T>(
    host: &mut T,
    card: &Card,
    start: BlockIdx,
    count: BlockCount,
    buf: &[u8],
) -> Result<BlockCount, TransferError>
where
    T: Transport,
{
    if count.0 == 0 {
        return Ok(BlockCount(0));
    }
    check_write_protect(host).map_err(|e| failed(e, 0))?;
    let block_len = card.write_block_len;
    check_range(card, start, count).map_err(|e| failed(e, 0))?;
    check_buffer(buf.len(), count, block_len).map_err(|e| failed(e, 0))?;
    trace!("Write {} blocks at {}", count.0, start.0);
    set_block_len(host, card, block_len).map_err(|e| failed(e, 0))?;

    let chunk = chunk_blocks(host);
    let block_bytes = block_len as usize;
    let mut done = 0;
    while done < count.0 {
        let blocks = (count.0 - done).min(chunk);
        let offset = done as usize * block_bytes;
        let len = blocks as usize * block_bytes;
        write_chunk(
            host,
            card,
            start + BlockCount(done),
            blocks,
            &buf[offset..offset + len],
        )
        .map_err(|e| failed(e, done))?;
        done += blocks;
    }
    Ok(BlockCount(done))
}

fn write_chunk<T>(
    host: &mut T,
    card: &Card,
    start: BlockIdx,
    blocks: u32,
    buf: &[u8],
) -> Result<(), Error>
where
    T: Transport,
{
    let block_len = card.write_block_len;
    let address = block_address(card.high_capacity, start, block_len)?;
    let index = if blocks == 1 { CMD24 } else { CMD25 };
    host.send_command(
        Command::new(index, address, ResponseType::R1),
        Some(Data::write(buf, block_len, blocks)),
    )?;
    if blocks > 1 {
        stop_transmission(host, card)?;
    }
    cmd::wait_ready(host, card.rca)?;
    Ok(())
}

/// Erase `count` blocks starting at `start`.
///
/// The card erases whole erase groups, so the range is widened to group
/// boundaries first. Blocks outside the request but inside those groups are
/// erased too.
pub fn erase_blocks<T>(
    host: &mut T,
    card: &Card,
    start: BlockIdx,
    count: BlockCount,
    kind: EraseKind,
) -> Result<(), Error>
where
    T: Transport,
{
    if count.0 == 0 {
        return Ok(());
    }
    check_range(card, start, count)?;
    check_write_protect(host)?;

    let group = card.erase_group_size;
    let (first, last) = erase_range(start, count, group, card.num_blocks());
    if first != start || last.0 != start.0 + (count.0 - 1) {
        warn!(
            "Erase of {}+{} widened to {}..={} (group of {})",
            start.0, count.0, first.0, last.0, group
        );
    }
    debug!("Erasing blocks {}..={} ({:?})", first.0, last.0, kind);

    let (start_cmd, end_cmd) = if card.is_sd() {
        (CMD32, CMD33)
    } else {
        (CMD35, CMD36)
    };
    let block_len = card.write_block_len;
    let first = block_address(card.high_capacity, first, block_len)?;
    let last = block_address(card.high_capacity, last, block_len)?;
    host.send_command(Command::new(start_cmd, first, ResponseType::R1), None)?;
    host.send_command(Command::new(end_cmd, last, ResponseType::R1), None)?;
    host.send_command(Command::new(CMD38, kind.arg(), ResponseType::R1b), None)?;
    cmd::wait_ready(host, card.rca)?;
    Ok(())
}


// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
