//! The command dispatcher.
//!
//! Issues one command (with an optional data phase) and waits for it to
//! finish. Every wait is bounded, and any failure leaves the controller with
//! its command line, and data line if used, freshly reset.

use core::sync::atomic::{fence, Ordering};

use embedded_hal::delay::DelayNs;

use super::regs::*;
use super::{Host, DEFAULT_DATA_TIMEOUT};
use crate::delay::Delay;
use crate::proto::{Command, Data, DataBuffer, Response, ResponseLength, ResponseType, CMD12};
use crate::transport::{DataPath, Transport};
use crate::{Error, Hertz};

use crate::{debug, trace, warn};

impl<R, D> Host<R, D>
where
    R: RegisterShim,
    D: DelayNs,
{
    /// Send a command and wait for the response and any data.
    pub(super) fn dispatch(
        &mut self,
        cmd: Command,
        mut data: Option<Data<'_>>,
    ) -> Result<Response, Error> {
        let has_data = data.is_some();
        trace!("CMD{} arg {:x}", cmd.index, cmd.arg);
        let result = self.issue(cmd, data.as_mut());
        if let Err(_e) = result {
            debug!("CMD{} failed: {:?}", cmd.index, _e);
            if self.reset_line(SYSCTL_RSTC).is_err() {
                warn!("Command line reset didn't finish");
            }
            if has_data && self.reset_line(SYSCTL_RSTD).is_err() {
                warn!("Data line reset didn't finish");
            }
        }
        self.regs.write32(IRQSTAT, u32::MAX);
        result
    }

    fn issue(&mut self, cmd: Command, mut data: Option<&mut Data<'_>>) -> Result<Response, Error> {
        self.regs.write32(IRQSTAT, u32::MAX);
        self.wait_bus_idle()?;

        let path = match data.as_deref_mut() {
            Some(data) => self.setup_data(data)?,
            None => self.config.data_path,
        };
        let xfertyp = transfer_type(&cmd, data.as_deref(), path);

        // We poll, so no interrupts please
        self.regs.write32(IRQSIGEN, 0);
        self.regs.write32(CMDARG, cmd.arg);
        if data.is_some() && path == DataPath::Dma {
            // The buffer must be in memory before the engine reads it
            fence(Ordering::SeqCst);
        }
        self.regs.write32(XFERTYP, xfertyp);

        self.wait_command_complete(cmd.index)?;

        // Some controllers don't wait out the busy period for us
        if data.is_none() && cmd.response.is_busy() && self.config.busy_erratum_workaround {
            self.wait_card_not_busy()?;
        }

        let response = self.read_response(cmd.response);

        if let Some(data) = data.as_deref_mut() {
            if path == DataPath::Pio {
                self.pio_transfer(data)?;
            }
            self.wait_transfer_complete(path)?;
            if path == DataPath::Dma {
                // Nothing reads the buffer until the engine is done with it
                fence(Ordering::SeqCst);
            }
        }

        Ok(response)
    }

    fn wait_bus_idle(&mut self) -> Result<(), Error> {
        let mut delay = Delay::new_bus_idle();
        while self.regs.read32(PRSSTAT) & (PRSSTAT_CIHB | PRSSTAT_CDIHB | PRSSTAT_DLA) != 0 {
            delay.delay(&mut self.delayer, Error::BusBusy)?;
        }
        Ok(())
    }

    /// Program the block size, count and timeout for a data phase.
    ///
    /// Returns the data path this command will use. A buffer the DMA engine
    /// can't reach goes through PIO instead.
    fn setup_data(&mut self, data: &mut Data<'_>) -> Result<DataPath, Error> {
        if data.block_size == 0 || data.block_size > MAX_BLOCK_SIZE {
            return Err(Error::UnsupportedBlockLength(data.block_size));
        }
        if data.block_count == 0 || data.block_count > MAX_BLOCK_COUNT {
            return Err(Error::OutOfRange);
        }
        if !data.buffer_fits() {
            return Err(Error::BufferTooSmall);
        }

        let words = data.block_size / 4;
        let buffer = match &mut data.buffer {
            DataBuffer::Read(buf) => {
                let wml = words.clamp(1, WML_RD_WML_MAX);
                self.regs.clear_set_bits(WML, WML_RD_WML_MASK, wml);
                buf.as_mut_ptr() as *const u8
            }
            DataBuffer::Write(buf) => {
                if self.is_write_protected() {
                    return Err(Error::WriteProtected);
                }
                let wml = words.clamp(1, WML_WR_WML_MAX);
                self.regs
                    .clear_set_bits(WML, WML_WR_WML_MASK, wml << WML_WR_WML_SHIFT);
                buf.as_ptr()
            }
        };
        let mut path = self.config.data_path;
        if path == DataPath::Dma {
            match self.regs.dma_address(buffer) {
                Some(address) => self.regs.write32(DSADDR, address),
                None => {
                    warn!("Buffer at {:x} is out of DMA reach, using PIO", buffer as usize);
                    path = DataPath::Pio;
                }
            }
        }

        self.regs
            .write32(BLKATTR, (data.block_count << 16) | data.block_size);
        self.regs.clear_set_bits(
            SYSCTL,
            SYSCTL_TIMEOUT_MASK,
            data_timeout(self.clock) << 16,
        );
        Ok(path)
    }

    fn wait_command_complete(&mut self, index: u8) -> Result<(), Error> {
        let mut delay = Delay::new_command();
        let irqstat = loop {
            let irqstat = self.regs.read32(IRQSTAT);
            if irqstat & (IRQSTAT_CC | IRQSTAT_CTOE) != 0 {
                break irqstat;
            }
            delay.delay(&mut self.delayer, Error::TimeoutCommand(index))?;
        };
        if irqstat & CMD_ERR != 0 {
            Err(Error::DeviceError)
        } else if irqstat & IRQSTAT_CTOE != 0 {
            Err(Error::TimeoutCommand(index))
        } else {
            Ok(())
        }
    }

    fn wait_card_not_busy(&mut self) -> Result<(), Error> {
        let mut delay = Delay::new_busy();
        while self.regs.read32(PRSSTAT) & PRSSTAT_DAT0 == 0 {
            delay.delay(&mut self.delayer, Error::TimeoutBusy)?;
        }
        Ok(())
    }

    fn read_response(&mut self, response: ResponseType) -> Response {
        match response.length() {
            ResponseLength::None => Response::default(),
            ResponseLength::Bits136 => {
                let raw = [
                    self.regs.read32(CMDRSP0),
                    self.regs.read32(CMDRSP1),
                    self.regs.read32(CMDRSP2),
                    self.regs.read32(CMDRSP3),
                ];
                Response(assemble_long_response(raw))
            }
            ResponseLength::Bits48 | ResponseLength::Bits48Busy => {
                Response::short(self.regs.read32(CMDRSP0))
            }
        }
    }

    fn pio_transfer(&mut self, data: &mut Data<'_>) -> Result<(), Error> {
        let block_size = data.block_size as usize;
        let len = data.len();
        match &mut data.buffer {
            DataBuffer::Read(buf) => {
                for block in buf[..len].chunks_mut(block_size) {
                    self.wait_buffer(PRSSTAT_BREN)?;
                    for word in block.chunks_mut(4) {
                        let bytes = self.regs.read_data_port().to_le_bytes();
                        word.copy_from_slice(&bytes[..word.len()]);
                    }
                }
            }
            DataBuffer::Write(buf) => {
                for block in buf[..len].chunks(block_size) {
                    self.wait_buffer(PRSSTAT_BWEN)?;
                    for word in block.chunks(4) {
                        let mut bytes = [0u8; 4];
                        bytes[..word.len()].copy_from_slice(word);
                        self.regs.write_data_port(u32::from_le_bytes(bytes));
                    }
                }
            }
        }
        Ok(())
    }

    /// Wait for the buffer to have a block for us (or room for one)
    fn wait_buffer(&mut self, ready: u32) -> Result<(), Error> {
        let mut delay = Delay::new_buffer();
        loop {
            if self.regs.read32(PRSSTAT) & ready != 0 {
                return Ok(());
            }
            check_data_errors(self.regs.read32(IRQSTAT))?;
            delay.delay(&mut self.delayer, Error::TimeoutData)?;
        }
    }

    fn wait_transfer_complete(&mut self, path: DataPath) -> Result<(), Error> {
        let complete = match path {
            DataPath::Pio => IRQSTAT_TC,
            DataPath::Dma => IRQSTAT_TC | IRQSTAT_DINT,
        };
        let mut delay = Delay::new_transfer();
        loop {
            let irqstat = self.regs.read32(IRQSTAT);
            check_data_errors(irqstat)?;
            if irqstat & complete == complete {
                return Ok(());
            }
            delay.delay(&mut self.delayer, Error::TimeoutData)?;
        }
    }
}

fn check_data_errors(irqstat: u32) -> Result<(), Error> {
    if irqstat & IRQSTAT_DTOE != 0 {
        Err(Error::TimeoutData)
    } else if irqstat & DATA_ERR != 0 {
        Err(Error::DeviceError)
    } else {
        Ok(())
    }
}

/// Build the XFERTYP value for a command.
pub(crate) fn transfer_type(cmd: &Command, data: Option<&Data<'_>>, path: DataPath) -> u32 {
    let mut xfertyp = xfertyp_cmd(cmd.index);
    if let Some(data) = data {
        xfertyp |= XFERTYP_DPSEL;
        if path == DataPath::Dma {
            xfertyp |= XFERTYP_DMAEN;
        }
        if data.block_count > 1 {
            xfertyp |= XFERTYP_MSBSEL | XFERTYP_BCEN;
        }
        if data.is_read() {
            xfertyp |= XFERTYP_DTDSEL;
        }
    }
    if cmd.response.crc_check() {
        xfertyp |= XFERTYP_CCCEN;
    }
    if cmd.response.index_check() {
        xfertyp |= XFERTYP_CICEN;
    }
    xfertyp |= match cmd.response.length() {
        ResponseLength::None => 0,
        ResponseLength::Bits136 => XFERTYP_RSPTYP_136,
        ResponseLength::Bits48 => XFERTYP_RSPTYP_48,
        ResponseLength::Bits48Busy => XFERTYP_RSPTYP_48_BUSY,
    };
    if cmd.index == CMD12 {
        xfertyp |= XFERTYP_CMDTYP_ABORT;
    }
    xfertyp
}

/// Rebuild a 136-bit response from CMDRSP0..3.
///
/// The controller strips the CRC and shifts everything right by a byte, so
/// CMDRSP3 holds bits 127:104 in its low 24 bits. We shift it all back.
pub(crate) fn assemble_long_response(rsp: [u32; 4]) -> [u32; 4] {
    [
        (rsp[3] << 8) | (rsp[2] >> 24),
        (rsp[2] << 8) | (rsp[1] >> 24),
        (rsp[1] << 8) | (rsp[0] >> 24),
        rsp[0] << 8,
    ]
}

/// The SYSCTL data timeout counter value for a card clock.
pub(crate) fn data_timeout(clock: Hertz) -> u32 {
    let cycles = clock.0 / 4;
    let fls = 32 - cycles.leading_zeros();
    fls.saturating_sub(13).min(DEFAULT_DATA_TIMEOUT)
}


// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
