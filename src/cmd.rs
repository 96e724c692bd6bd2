//! Card commands that take more than one step.
//!
//! Application commands need a CMD55 in front of them, SWITCH needs the
//! card status polled afterwards, and the register reads come back in a data
//! phase. Everything here is written against [`Transport`].

use crate::card::{CardStatus, ExtCsd, Scr, SwitchStatus};
use crate::delay::Delay;
use crate::proto::*;
use crate::transport::Transport;
use crate::Error;

use crate::{trace, warn};

/// How many times SEND_STATUS may fail outright before we give up waiting
const STATUS_COMMAND_RETRIES: u32 = 5;

/// How many extra times we try to read the SCR
const SCR_RETRIES: u32 = 3;

/// Send an application-specific command.
///
/// Sends APP_CMD to the card at `rca` first. Use an `rca` of zero before
/// the card has an address.
pub fn app_command<T>(
    host: &mut T,
    rca: u16,
    cmd: Command,
    data: Option<Data<'_>>,
) -> Result<Response, Error>
where
    T: Transport,
{
    host.send_command(
        Command::new(CMD55, u32::from(rca) << 16, ResponseType::R1),
        None,
    )?;
    host.send_command(cmd, data)
}

/// Read the card status register.
pub fn send_status<T>(host: &mut T, rca: u16) -> Result<CardStatus, Error>
where
    T: Transport,
{
    let response = host.send_command(
        Command::new(CMD13, u32::from(rca) << 16, ResponseType::R1),
        None,
    )?;
    Ok(CardStatus(response.value()))
}

/// Poll the card status until the card is ready for data and has left the
/// programming state.
///
/// A few failed SEND_STATUS commands are tolerated. Error bits in the status
/// fail immediately, and so does SWITCH_ERROR once the card is ready.
pub fn wait_ready<T>(host: &mut T, rca: u16) -> Result<CardStatus, Error>
where
    T: Transport,
{
    let mut delay = Delay::new_poll(host.config().status_poll_iterations);
    let mut command_retries = STATUS_COMMAND_RETRIES;
    loop {
        match send_status(host, rca) {
            Ok(status) => {
                if status.has_error() {
                    warn!("Card status error: {:x}", status.0);
                    return Err(Error::DeviceError);
                }
                if status.is_ready() {
                    if status.switch_error() {
                        return Err(Error::SwitchFailed);
                    }
                    return Ok(status);
                }
                trace!("Card busy: {:?}", status.state());
            }
            Err(e) => {
                if command_retries == 0 {
                    return Err(e);
                }
                command_retries -= 1;
            }
        }
        delay.delay(&mut *host, Error::CardBusyTimeout)?;
    }
}

/// Write one byte of an MMC's EXT_CSD with SWITCH, and wait for the card to
/// finish.
pub fn mmc_switch<T>(host: &mut T, rca: u16, index: usize, value: u8) -> Result<(), Error>
where
    T: Transport,
{
    trace!("EXT_CSD[{}] <- {}", index, value);
    let arg = (MMC_SWITCH_MODE_WRITE_BYTE << 24)
        | ((index as u32 & 0xFF) << 16)
        | (u32::from(value) << 8);
    host.send_command(Command::new(CMD6, arg, ResponseType::R1b), None)?;
    wait_ready(host, rca)?;
    Ok(())
}

/// Read an MMC's EXT_CSD register.
pub fn send_ext_csd<T>(host: &mut T) -> Result<ExtCsd, Error>
where
    T: Transport,
{
    let mut ext_csd = ExtCsd::default();
    host.send_command(
        Command::new(CMD8, 0, ResponseType::R1),
        Some(Data::read(&mut ext_csd.data, ExtCsd::LEN as u32, 1)),
    )?;
    Ok(ext_csd)
}

/// Run SWITCH_FUNC on an SD card.
///
/// `group` counts from zero, so access mode (function group 1) is group 0.
/// Every other group is left alone.
pub fn sd_switch<T>(
    host: &mut T,
    mode: u32,
    group: u8,
    function: u8,
) -> Result<SwitchStatus, Error>
where
    T: Transport,
{
    let shift = u32::from(group) * 4;
    let arg = (mode << 31)
        | (0x00FF_FFFF & !(0xF << shift))
        | (u32::from(function & 0xF) << shift);
    let mut status = SwitchStatus::default();
    host.send_command(
        Command::new(CMD6, arg, ResponseType::R1),
        Some(Data::read(&mut status.data, SwitchStatus::LEN as u32, 1)),
    )?;
    Ok(status)
}

/// Read an SD card's SCR.
///
/// Some cards need a couple of goes at this right after selection.
pub fn read_scr<T>(host: &mut T, rca: u16) -> Result<Scr, Error>
where
    T: Transport,
{
    let mut retries = SCR_RETRIES;
    loop {
        let mut scr = Scr::default();
        let result = app_command(
            host,
            rca,
            Command::new(ACMD51, 0, ResponseType::R1),
            Some(Data::read(&mut scr.data, 8, 1)),
        );
        match result {
            Ok(_) => return Ok(scr),
            Err(e) if retries == 0 => return Err(e),
            Err(_e) => {
                warn!("SCR read failed ({:?}), retrying", _e);
                retries -= 1;
            }
        }
    }
}


// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
