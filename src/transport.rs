//! The seam between a host controller and the card protocol.
//!
//! Everything above this trait (initialisation, bus negotiation, block
//! transfers) is written against [`Transport`], so it runs the same over the
//! eSDHC driver in [`crate::esdhc`] or a test double.

use bitflags::bitflags;
use embedded_hal::delay::DelayNs;

use crate::proto::{Command, Data, Response, MMC_VDD_32_33, MMC_VDD_33_34};
use crate::{Error, Hertz};

/// Something that can send commands to a card.
///
/// The delay methods (from [`DelayNs`]) are used by the card-level polling
/// loops, such as waiting for the card to power up.
pub trait Transport: DelayNs {
    /// The configuration this host was built with, after any adjustments
    /// made from the controller's capability register.
    fn config(&self) -> &HostConfig;

    /// Send a command, with an optional data phase, and wait for it to
    /// finish.
    ///
    /// On any error the command line (and data line, if there was a data
    /// phase) has been reset before this returns.
    fn send_command(&mut self, cmd: Command, data: Option<Data<'_>>) -> Result<Response, Error>;

    /// Change the width of the data bus on the host side.
    fn set_bus_width(&mut self, width: BusWidth) -> Result<(), Error>;

    /// Change the card clock. Returns the frequency actually achieved.
    fn set_clock(&mut self, frequency: Hertz) -> Result<Hertz, Error>;

    /// Is there a card in the slot?
    fn is_card_present(&mut self) -> bool;

    /// Is the write-protect switch on the card set?
    fn is_write_protected(&mut self) -> bool;
}

bitflags! {
    /// Bus modes and speeds a host (or card) supports.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct Caps: u32 {
        /// Can use a 4-bit data bus
        const BUS_4BIT = 1 << 0;
        /// Can use an 8-bit data bus (MMC only)
        const BUS_8BIT = 1 << 1;
        /// High speed timing (SD 50 MHz, MMC 26 MHz)
        const HS = 1 << 2;
        /// MMC high speed at 52 MHz
        const HS_52MHZ = 1 << 3;
        /// MMC dual data rate at 52 MHz
        const DDR_52MHZ = 1 << 4;
    }
}

#[cfg(feature = "defmt-log")]
impl defmt::Format for Caps {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "Caps({=u32:#x})", self.bits())
    }
}

/// The width of the data bus.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum BusWidth {
    /// DAT0 only
    One,
    /// DAT0 to DAT3
    Four,
    /// DAT0 to DAT7
    Eight,
}

impl BusWidth {
    /// Number of data lines
    pub const fn lines(self) -> u8 {
        match self {
            BusWidth::One => 1,
            BusWidth::Four => 4,
            BusWidth::Eight => 8,
        }
    }
}

/// How the host talks to the card.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TransportMode {
    /// The native SD/MMC bus
    Native,
    /// SPI mode, which skips addressing and has no stop command
    Spi,
}

/// How the data phase of a command moves bytes.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DataPath {
    /// The CPU moves every word through the data port
    Pio,
    /// The controller's DMA engine moves the data
    Dma,
}

/// Options for a host controller and the card behind it.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// The clock feeding the controller's divider
    pub source_clock: Hertz,
    /// The slowest card clock we may use (and the identification clock)
    pub f_min: Hertz,
    /// The fastest card clock we may use
    pub f_max: Hertz,
    /// Supported voltages, as OCR bits
    pub voltages: u32,
    /// Bus modes the board supports
    pub caps: Caps,
    /// Native bus or SPI
    pub mode: TransportMode,
    /// The most blocks we put in one read or write command
    pub max_blocks_per_transfer: u32,
    /// PIO or DMA
    pub data_path: DataPath,
    /// Poll DAT0 after busy responses to commands without data, for
    /// controllers that don't report busy end themselves
    pub busy_erratum_workaround: bool,
    /// Does the board route the card's write-protect switch to the controller?
    pub write_protect_pin: bool,
    /// Card detect is not wired up; assume a card is always present
    pub broken_card_detect: bool,
    /// Driver stage register value to program, if the card supports one
    pub dsr: Option<u16>,
    /// How many times we run the whole reset sequence if the card never
    /// finishes powering up
    pub op_cond_attempts: u32,
    /// How many ~1ms polls of the operating conditions we allow per attempt
    pub op_cond_iterations: u32,
    /// How many ~1ms polls of the card status we allow after a write, erase
    /// or switch
    pub status_poll_iterations: u32,
}

impl Default for HostConfig {
    fn default() -> Self {
        HostConfig {
            source_clock: Hertz::mhz(200),
            f_min: Hertz::khz(400),
            f_max: Hertz::mhz(52),
            voltages: MMC_VDD_32_33 | MMC_VDD_33_34,
            caps: Caps::BUS_4BIT | Caps::BUS_8BIT | Caps::HS | Caps::HS_52MHZ,
            mode: TransportMode::Native,
            max_blocks_per_transfer: 0x7FFF,
            data_path: DataPath::Pio,
            busy_erratum_workaround: true,
            write_protect_pin: false,
            broken_card_detect: false,
            dsr: None,
            op_cond_attempts: 3,
            op_cond_iterations: 1000,
            status_poll_iterations: 1000,
        }
    }
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
