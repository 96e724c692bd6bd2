//! Driver for the Freescale/NXP enhanced SD host controller (eSDHC).
//!
//! [`Host`] owns the register block and a delay source, and implements
//! [`Transport`] so the card protocol layers can run over it.

pub mod clock;
mod dispatch;
pub mod regs;

pub use clock::ClockDivider;
pub use regs::{MmioRegisters, RegisterEndian, RegisterShim};

use embedded_hal::delay::DelayNs;

use crate::delay::Delay;
use crate::proto::{
    Command, Data, Response, MMC_VDD_165_195, MMC_VDD_29_30, MMC_VDD_30_31, MMC_VDD_32_33,
    MMC_VDD_33_34,
};
use crate::transport::{BusWidth, Caps, DataPath, HostConfig, Transport};
use crate::{Error, Hertz};
use regs::*;

// ****************************************************************************
// Imports
// ****************************************************************************

use crate::{debug, trace, warn};

// ****************************************************************************
// Types and Implementations
// ****************************************************************************

/// The data timeout counter value we program at start up (SDCLK x 2^27)
const DEFAULT_DATA_TIMEOUT: u32 = 14;

/// Time for the card clock to settle after changing the divider, in us
const CLOCK_SETTLE_US: u32 = 10_000;

/// An eSDHC controller.
///
/// Built from something that can reach the registers and something that
/// can wait. Call [`Host::init`] before handing it to the card layers.
pub struct Host<R, D>
where
    R: RegisterShim,
    D: DelayNs,
{
    regs: R,
    delayer: D,
    config: HostConfig,
    bus_width: BusWidth,
    clock: Hertz,
}

impl<R, D> Host<R, D>
where
    R: RegisterShim,
    D: DelayNs,
{
    /// Create a new host.
    ///
    /// The controller isn't touched until [`Host::init`].
    pub fn new(regs: R, delayer: D, config: HostConfig) -> Host<R, D> {
        Host {
            regs,
            delayer,
            config,
            bus_width: BusWidth::One,
            clock: Hertz(0),
        }
    }

    /// Reset the controller and bring it up at the identification clock.
    ///
    /// Trims our configuration down to what the capability register says
    /// the controller can do.
    pub fn init(&mut self) -> Result<(), Error> {
        debug!("Resetting controller");
        self.regs.set_bits(SYSCTL, SYSCTL_RSTA);
        self.wait_self_clear(SYSCTL_RSTA)?;

        self.regs.set_bits(SYSCTL, SYSCTL_HCKEN | SYSCTL_IPGEN);

        let capabilities = self.regs.read32(HOSTCAPBLT);
        trace!("HOSTCAPBLT: {:x}", capabilities);
        self.apply_capabilities(capabilities);
        debug!("Host configuration: {:?}", self.config);

        self.set_clock(self.config.f_min)?;

        // 80 clocks for the card's power up sequence
        self.regs.set_bits(SYSCTL, SYSCTL_INITA);
        self.wait_self_clear(SYSCTL_INITA)?;

        // Buffer ready is polled through PRSSTAT, not IRQSTAT
        self.regs
            .write32(IRQSTATEN, IRQSTATEN_ALL & !(IRQSTAT_BRR | IRQSTAT_BWR));
        self.regs.write32(IRQSIGEN, 0);
        self.regs.write32(PROCTL, PROCTL_INIT);
        self.regs.clear_set_bits(
            SYSCTL,
            SYSCTL_TIMEOUT_MASK,
            DEFAULT_DATA_TIMEOUT << 16,
        );
        self.bus_width = BusWidth::One;
        Ok(())
    }

    fn apply_capabilities(&mut self, capabilities: u32) {
        let mut voltages = 0;
        if capabilities & HOSTCAPBLT_VS33 != 0 {
            voltages |= MMC_VDD_32_33 | MMC_VDD_33_34;
        }
        if capabilities & HOSTCAPBLT_VS30 != 0 {
            voltages |= MMC_VDD_29_30 | MMC_VDD_30_31;
        }
        if capabilities & HOSTCAPBLT_VS18 != 0 {
            voltages |= MMC_VDD_165_195;
        }
        if voltages != 0 {
            let usable = self.config.voltages & voltages;
            self.config.voltages = if usable != 0 { usable } else { voltages };
        }
        if capabilities & HOSTCAPBLT_HSS == 0 {
            self.config
                .caps
                .remove(Caps::HS | Caps::HS_52MHZ | Caps::DDR_52MHZ);
        }
        if self.config.data_path == DataPath::Dma && capabilities & HOSTCAPBLT_DMAS == 0 {
            warn!("Controller has no DMA engine, using PIO");
            self.config.data_path = DataPath::Pio;
        }
    }

    /// The bus width the host is currently set to
    pub fn bus_width(&self) -> BusWidth {
        self.bus_width
    }

    /// The card clock the host is currently generating
    pub fn clock(&self) -> Hertz {
        self.clock
    }

    /// Get temporary access to the registers.
    ///
    /// Useful for board-specific set up the driver doesn't know about.
    pub fn registers<T, F>(&mut self, func: F) -> T
    where
        F: FnOnce(&mut R) -> T,
    {
        func(&mut self.regs)
    }

    /// Get the registers and delay source back
    pub fn free(self) -> (R, D) {
        (self.regs, self.delayer)
    }

    /// Set a reset bit in SYSCTL and wait for the controller to clear it
    fn reset_line(&mut self, bit: u32) -> Result<(), Error> {
        self.regs.set_bits(SYSCTL, bit);
        self.wait_self_clear(bit)
    }

    /// Wait for a SYSCTL bit the controller clears by itself
    fn wait_self_clear(&mut self, bit: u32) -> Result<(), Error> {
        let mut delay = Delay::new_reset();
        while self.regs.read32(SYSCTL) & bit != 0 {
            delay.delay(&mut self.delayer, Error::TimeoutReset)?;
        }
        Ok(())
    }
}

impl<R, D> DelayNs for Host<R, D>
where
    R: RegisterShim,
    D: DelayNs,
{
    fn delay_ns(&mut self, ns: u32) {
        self.delayer.delay_ns(ns)
    }

    fn delay_us(&mut self, us: u32) {
        self.delayer.delay_us(us)
    }

    fn delay_ms(&mut self, ms: u32) {
        self.delayer.delay_ms(ms)
    }
}

impl<R, D> Transport for Host<R, D>
where
    R: RegisterShim,
    D: DelayNs,
{
    fn config(&self) -> &HostConfig {
        &self.config
    }

    fn send_command(&mut self, cmd: Command, data: Option<Data<'_>>) -> Result<Response, Error> {
        self.dispatch(cmd, data)
    }

    fn set_bus_width(&mut self, width: BusWidth) -> Result<(), Error> {
        let dtw = match width {
            BusWidth::One => 0,
            BusWidth::Four => PROCTL_DTW_4,
            BusWidth::Eight => PROCTL_DTW_8,
        };
        self.regs.clear_set_bits(PROCTL, PROCTL_DTW_MASK, dtw);
        self.bus_width = width;
        debug!("Bus width now {}", width.lines());
        Ok(())
    }

    fn set_clock(&mut self, frequency: Hertz) -> Result<Hertz, Error> {
        let target = frequency.max(self.config.f_min).min(self.config.f_max);
        let divider = ClockDivider::for_target(self.config.source_clock, target);
        self.regs.clear_bits(SYSCTL, SYSCTL_CKEN);
        self.regs
            .clear_set_bits(SYSCTL, SYSCTL_CLOCK_MASK, divider.sysctl_bits());
        self.delayer.delay_us(CLOCK_SETTLE_US);
        self.regs.set_bits(SYSCTL, SYSCTL_PEREN | SYSCTL_CKEN);
        self.clock = divider.frequency(self.config.source_clock);
        debug!(
            "Clock {} Hz requested, {} Hz set ({:?})",
            target.0, self.clock.0, divider
        );
        Ok(self.clock)
    }

    fn is_card_present(&mut self) -> bool {
        if self.config.broken_card_detect {
            return true;
        }
        let mut delay = Delay::new_card_detect();
        loop {
            if self.regs.read32(PRSSTAT) & PRSSTAT_CINS != 0 {
                return true;
            }
            if delay.delay(&mut self.delayer, Error::NoMedia).is_err() {
                return false;
            }
        }
    }

    fn is_write_protected(&mut self) -> bool {
        self.config.write_protect_pin && self.regs.read32(PRSSTAT) & PRSSTAT_WPSPL == 0
    }
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
