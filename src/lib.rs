//! # embedded-sdhc
//!
//! > An SD/MMC host controller protocol engine written in Embedded Rust
//!
//! This crate drives SD and MMC/eMMC cards through an eSDHC-style memory
//! mapped host controller. It takes a card from power-on to the data transfer
//! state, negotiates the widest bus and fastest clock both sides support, and
//! then moves 512-byte blocks to and from the card. It is `#![no_std]` and
//! does not use `alloc`.
//!
//! The crate is split into layers:
//!
//! * [`esdhc`] owns the controller registers. [`esdhc::Host`] resets the
//!   controller, programs the clock divider and runs the command dispatcher.
//! * [`Transport`] is the seam between the controller and the card protocol.
//! * [`init`], [`bus`] and [`transfer`] speak the SD/MMC protocol over any
//!   [`Transport`].
//! * [`SdMmc`] ties it all together behind the [`BlockDevice`] trait and
//!   initialises the card lazily on first use.
//!
//! ## Using the crate
//!
//! ```rust,no_run
//! use embedded_sdhc::{BlockDevice, BlockIdx, Error, SdMmc};
//! use embedded_sdhc::esdhc::{Host, MmioRegisters, RegisterEndian};
//! use embedded_sdhc::HostConfig;
//!
//! fn example<D>(delay: D) -> Result<(), Error>
//! where
//!     D: embedded_hal::delay::DelayNs,
//! {
//!     // Safety: the controller lives at this address on our board
//!     let regs = unsafe { MmioRegisters::new(0x0156_0000, RegisterEndian::Big) };
//!     let mut host = Host::new(regs, delay, HostConfig::default());
//!     host.init()?;
//!     let sdmmc = SdMmc::new(host);
//!     // The last two blocks on the card
//!     let last = sdmmc.num_blocks()?.0 - 1;
//!     let mut blocks = [[0u8; 512]; 2];
//!     sdmmc.read(&mut blocks, BlockIdx(last - 1))?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! * `log`: Enabled by default. Generates log messages using the `log` crate.
//! * `defmt-log`: By turning off the default features and enabling the
//!   `defmt-log` feature you can configure this crate to log messages over defmt
//!   instead.
//! * `embassy-sync-06`: Enabled by default. Implements [`BlockDevice`] for an
//!   `embassy_sync` blocking mutex wrapped around an [`SdMmc`].
//!
//! You cannot enable both the `log` feature and the `defmt-log` feature.

#![cfg_attr(not(test), no_std)]

#[cfg(test)]
#[macro_use]
extern crate hex_literal;

#[macro_use]
mod structure;

pub mod blockdevice;
pub mod bus;
pub mod card;
pub mod cmd;
pub mod esdhc;
pub mod init;
pub mod partition;
pub mod proto;
pub mod sdmmc;
pub mod transfer;
pub mod transport;

mod delay;

#[cfg(test)]
mod testing;

pub use crate::blockdevice::{Block, BlockCount, BlockDevice, BlockIdx, BLOCK_LEN};
pub use crate::card::{Card, CardFamily, MmcVersion, SdVersion};
pub use crate::init::{initialize, InitState};
pub use crate::partition::Partition;
pub use crate::sdmmc::SdMmc;
pub use crate::transfer::EraseKind;
pub use crate::transport::{BusWidth, Caps, DataPath, HostConfig, Transport, TransportMode};

#[cfg(all(feature = "defmt-log", feature = "log"))]
compile_error!("Cannot enable both log and defmt-log");

#[cfg(feature = "log")]
use log::{debug, trace, warn};

#[cfg(feature = "defmt-log")]
use defmt::{debug, trace, warn};

#[cfg(all(not(feature = "defmt-log"), not(feature = "log")))]
#[macro_export]
/// Like log::debug! but does nothing at all
macro_rules! debug {
    ($($arg:tt)+) => {};
}

#[cfg(all(not(feature = "defmt-log"), not(feature = "log")))]
#[macro_export]
/// Like log::trace! but does nothing at all
macro_rules! trace {
    ($($arg:tt)+) => {};
}

#[cfg(all(not(feature = "defmt-log"), not(feature = "log")))]
#[macro_export]
/// Like log::warn! but does nothing at all
macro_rules! warn {
    ($($arg:tt)+) => {};
}

// ****************************************************************************
//
// Public Types
//
// ****************************************************************************

/// The possible errors this crate can generate.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Error {
    /// The command or data lines never went idle before issuing a command
    BusBusy,
    /// We didn't get a response when executing this command
    TimeoutCommand(u8),
    /// We didn't get a ready response when executing this application-specific command
    TimeoutACommand(u8),
    /// The data phase of a transfer timed out
    TimeoutData,
    /// The card held DAT0 low for too long after a busy response
    TimeoutBusy,
    /// A controller reset bit never self-cleared
    TimeoutReset,
    /// The controller reported a CRC, index, end-bit or DMA error
    DeviceError,
    /// There is no card in the slot
    NoMedia,
    /// The card didn't answer a command it should have answered
    NoResponse,
    /// The card never became ready for data after a write, erase or switch
    CardBusyTimeout,
    /// The card is write protected
    WriteProtected,
    /// EXT_CSD read back differently after a bus width change
    CapacityMismatch,
    /// The card set SWITCH_ERROR after a SWITCH command
    SwitchFailed,
    /// The card answered with something we can't work with
    UnsupportedCard,
    /// The requested blocks lie outside the card
    OutOfRange,
    /// The buffer doesn't hold the requested number of blocks
    BufferTooSmall,
    /// The requested MMC hardware partition doesn't exist on this card
    NoSuchPartition,
    /// The card's block length can't be used with 512-byte blocks
    UnsupportedBlockLength(u32),
    /// Can't perform this operation with the card in this state
    BadState,
}

impl embedded_io::Error for Error {
    fn kind(&self) -> embedded_io::ErrorKind {
        match self {
            Error::BusBusy
            | Error::TimeoutCommand(_)
            | Error::TimeoutACommand(_)
            | Error::TimeoutData
            | Error::TimeoutBusy
            | Error::TimeoutReset
            | Error::CardBusyTimeout => embedded_io::ErrorKind::TimedOut,
            Error::NoMedia | Error::NoResponse => embedded_io::ErrorKind::NotConnected,
            Error::WriteProtected => embedded_io::ErrorKind::PermissionDenied,
            Error::OutOfRange | Error::BufferTooSmall | Error::NoSuchPartition => {
                embedded_io::ErrorKind::InvalidInput
            }
            Error::UnsupportedCard | Error::UnsupportedBlockLength(_) => {
                embedded_io::ErrorKind::Unsupported
            }
            Error::CapacityMismatch => embedded_io::ErrorKind::InvalidData,
            Error::DeviceError | Error::SwitchFailed | Error::BadState => {
                embedded_io::ErrorKind::Other
            }
        }
    }
}

/// A block transfer that stopped part way through.
///
/// Everything before `blocks_transferred` reached (or came from) the card.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TransferError {
    /// Why the transfer stopped
    pub error: Error,
    /// How many blocks completed before it stopped
    pub blocks_transferred: BlockCount,
}

impl From<TransferError> for Error {
    fn from(value: TransferError) -> Error {
        value.error
    }
}

/// A frequency, in Hertz.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Hertz(pub u32);

impl Hertz {
    /// Make a frequency from a number of kilohertz
    pub const fn khz(khz: u32) -> Hertz {
        Hertz(khz * 1_000)
    }

    /// Make a frequency from a number of megahertz
    pub const fn mhz(mhz: u32) -> Hertz {
        Hertz(mhz * 1_000_000)
    }
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
