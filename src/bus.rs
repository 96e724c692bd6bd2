//! Bus width and clock negotiation.
//!
//! Runs once the card is selected. SD cards tell us what they can do in the
//! SCR and the SWITCH_FUNC status, MMC cards in EXT_CSD. Whatever both the
//! card and the host can do, we do.

use crate::card::ext_csd::*;
use crate::card::{Card, CardFamily, ExtCsd, SdVersion};
use crate::cmd::{self, app_command};
use crate::proto::*;
use crate::transport::{BusWidth, Caps, Transport, TransportMode};
use crate::{Error, Hertz};

use crate::{debug, warn};

/// SD default speed clock
const SD_DEFAULT_SPEED: Hertz = Hertz::mhz(25);
/// SD high speed clock
const SD_HIGH_SPEED: Hertz = Hertz::mhz(50);
/// MMC high speed clock for cards that only do 26 MHz
const MMC_HIGH_SPEED_26: Hertz = Hertz::mhz(26);
/// MMC high speed clock
const MMC_HIGH_SPEED_52: Hertz = Hertz::mhz(52);

/// How many extra times we ask an SD card whether high speed is still busy
const SD_SWITCH_BUSY_RETRIES: u32 = 3;

/// One way of running an MMC data bus.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BusMode {
    /// How many data lines
    pub width: BusWidth,
    /// Dual data rate?
    pub ddr: bool,
    /// What we write to EXT_CSD BUS_WIDTH to get this mode
    pub ext_csd_value: u8,
    /// What both the host and card must support
    pub required: Caps,
}

/// Every wide bus mode, best first.
const MMC_BUS_MODES: [BusMode; 4] = [
    BusMode {
        width: BusWidth::Eight,
        ddr: true,
        ext_csd_value: EXT_CSD_DDR_BUS_WIDTH_8,
        required: Caps::BUS_8BIT.union(Caps::DDR_52MHZ),
    },
    BusMode {
        width: BusWidth::Four,
        ddr: true,
        ext_csd_value: EXT_CSD_DDR_BUS_WIDTH_4,
        required: Caps::BUS_4BIT.union(Caps::DDR_52MHZ),
    },
    BusMode {
        width: BusWidth::Eight,
        ddr: false,
        ext_csd_value: EXT_CSD_BUS_WIDTH_8,
        required: Caps::BUS_8BIT,
    },
    BusMode {
        width: BusWidth::Four,
        ddr: false,
        ext_csd_value: EXT_CSD_BUS_WIDTH_4,
        required: Caps::BUS_4BIT,
    },
];

/// The wide bus modes worth trying with these capabilities, best first.
///
/// 1-bit isn't in the list. It's what we fall back to when nothing here
/// works.
pub fn mmc_bus_candidates(caps: Caps) -> heapless::Vec<BusMode, 4> {
    MMC_BUS_MODES
        .iter()
        .filter(|mode| caps.contains(mode.required))
        .copied()
        .collect()
}

/// Pick the bus width and clock for a freshly selected card, and switch
/// both the card and the host over.
///
/// `ext_csd` is required for MMC v4 and later, and ignored otherwise.
pub fn negotiate<T>(host: &mut T, card: &mut Card, ext_csd: Option<&ExtCsd>) -> Result<(), Error>
where
    T: Transport,
{
    let config = host.config();
    let host_caps = config.caps;
    let f_max = config.f_max;

    let speed = if config.mode == TransportMode::Spi {
        card.caps = Caps::empty();
        if card.is_sd() {
            SD_DEFAULT_SPEED
        } else {
            card.csd.transfer_speed()
        }
    } else if card.is_sd() {
        negotiate_sd(host, card, host_caps)?
    } else {
        negotiate_mmc(host, card, host_caps, ext_csd)?
    };

    let speed = speed.min(f_max);
    host.set_clock(speed)?;
    card.transfer_speed = speed;

    if card.ddr {
        card.read_block_len = MAX_BLOCK_LEN;
        card.write_block_len = MAX_BLOCK_LEN;
    }
    Ok(())
}

fn negotiate_sd<T>(host: &mut T, card: &mut Card, host_caps: Caps) -> Result<Hertz, Error>
where
    T: Transport,
{
    let scr = cmd::read_scr(host, card.rca)?;
    let version = scr.version();
    debug!("SCR: {:?}, version {:?}", scr, version);
    if let CardFamily::Sd(sd) = &mut card.family {
        sd.version = version;
        sd.scr = Some(scr);
    }

    let mut card_caps = Caps::empty();
    if scr.supports_4bit() {
        card_caps |= Caps::BUS_4BIT;
    }
    // SD 1.0 cards don't have SWITCH_FUNC
    if version != SdVersion::V1_0 && sd_switch_high_speed(host, host_caps)? {
        card_caps |= Caps::HS;
    }

    card.caps = card_caps & host_caps;
    if card.caps.contains(Caps::BUS_4BIT) {
        app_command(
            host,
            card.rca,
            Command::new(ACMD6, SD_BUS_WIDTH_4, ResponseType::R1),
            None,
        )?;
        host.set_bus_width(BusWidth::Four)?;
        card.bus_width = BusWidth::Four;
    }

    Ok(if card.caps.contains(Caps::HS) {
        SD_HIGH_SPEED
    } else {
        SD_DEFAULT_SPEED
    })
}

/// Ask the card about high speed, and switch to it if we both can.
///
/// Returns whether the card is now in high speed mode.
fn sd_switch_high_speed<T>(host: &mut T, host_caps: Caps) -> Result<bool, Error>
where
    T: Transport,
{
    let mut status = cmd::sd_switch(host, SD_SWITCH_CHECK, 0, SD_SWITCH_HIGH_SPEED)?;
    let mut retries = SD_SWITCH_BUSY_RETRIES;
    while status.is_busy(SD_SWITCH_HIGH_SPEED) && retries > 0 {
        retries -= 1;
        status = cmd::sd_switch(host, SD_SWITCH_CHECK, 0, SD_SWITCH_HIGH_SPEED)?;
    }
    if status.is_busy(SD_SWITCH_HIGH_SPEED) {
        warn!("High speed is still busy, staying at default speed");
        return Ok(false);
    }

    if !status.supports(SD_SWITCH_HIGH_SPEED) {
        debug!("Card doesn't do high speed");
        return Ok(false);
    }
    if !host_caps.contains(Caps::HS) {
        return Ok(false);
    }

    let status = cmd::sd_switch(host, SD_SWITCH_SWITCH, 0, SD_SWITCH_HIGH_SPEED)?;
    if status.selected(SD_SWITCH_HIGH_SPEED) {
        Ok(true)
    } else {
        warn!("Card refused high speed: {:x}", status.group1_result());
        Ok(false)
    }
}

fn negotiate_mmc<T>(
    host: &mut T,
    card: &mut Card,
    host_caps: Caps,
    ext_csd: Option<&ExtCsd>,
) -> Result<Hertz, Error>
where
    T: Transport,
{
    let Some(ext_csd) = ext_csd else {
        // Before v4 there's only 1-bit at the CSD speed
        card.caps = Caps::empty();
        return Ok(card.csd.transfer_speed());
    };

    let reference = if host_caps.contains(Caps::HS) && ext_csd.offers_high_speed() {
        match cmd::mmc_switch(host, card.rca, EXT_CSD_HS_TIMING, 1) {
            Ok(()) => cmd::send_ext_csd(host)?,
            Err(Error::SwitchFailed) => {
                warn!("Card refused HS_TIMING, staying at legacy speed");
                ext_csd.clone()
            }
            Err(e) => return Err(e),
        }
    } else {
        ext_csd.clone()
    };
    card.caps = reference.caps() & host_caps;
    debug!("MMC caps: {:?}", card.caps);

    let mut chosen = None;
    for mode in mmc_bus_candidates(card.caps) {
        match try_bus_mode(host, card.rca, &mode, &reference) {
            Ok(()) => {
                chosen = Some(mode);
                break;
            }
            Err(_e) => {
                warn!("{:?} didn't work: {:?}", mode, _e);
            }
        }
    }

    match chosen {
        Some(mode) => {
            card.bus_width = mode.width;
            card.ddr = mode.ddr;
        }
        None => {
            warn!("No wide bus mode worked, staying at 1-bit");
            cmd::mmc_switch(host, card.rca, EXT_CSD_BUS_WIDTH, EXT_CSD_BUS_WIDTH_1)?;
            host.set_bus_width(BusWidth::One)?;
            card.bus_width = BusWidth::One;
            card.ddr = false;
        }
    }

    Ok(if card.caps.contains(Caps::HS_52MHZ) {
        MMC_HIGH_SPEED_52
    } else if card.caps.contains(Caps::HS) {
        MMC_HIGH_SPEED_26
    } else {
        card.csd.transfer_speed()
    })
}

/// Switch the card and host to `mode`, then check EXT_CSD still reads back
/// the same as `reference`.
fn try_bus_mode<T>(host: &mut T, rca: u16, mode: &BusMode, reference: &ExtCsd) -> Result<(), Error>
where
    T: Transport,
{
    cmd::mmc_switch(host, rca, EXT_CSD_BUS_WIDTH, mode.ext_csd_value)?;
    host.set_bus_width(mode.width)?;
    let check = cmd::send_ext_csd(host)?;
    if check.matches(reference) {
        Ok(())
    } else {
        Err(Error::CapacityMismatch)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::card::MmcPartitions;
    use crate::testing::{fill, mmc_card, sd_card, ScriptedHost};

    fn emmc_ext_csd() -> ExtCsd {
        let mut ext = ExtCsd::default();
        ext.data[EXT_CSD_REV] = 7;
        ext.data[EXT_CSD_CARD_TYPE] = 0x07;
        ext.data[EXT_CSD_SEC_CNT..EXT_CSD_SEC_CNT + 4].copy_from_slice(&hex!("00 00 E9 00"));
        ext.data[EXT_CSD_HC_ERASE_GRP_SIZE] = 1;
        ext.data[EXT_CSD_PARTITIONING_SUPPORT] = 0x07;
        ext
    }

    /// An eMMC that garbles its EXT_CSD at the given BUS_WIDTH values.
    fn emmc_script(
        bad_widths: &'static [u8],
    ) -> impl FnMut(&Command, Option<&mut Data<'_>>) -> Result<Response, Error> {
        emmc_script_with(emmc_ext_csd(), bad_widths)
    }

    fn emmc_script_with(
        mut ext: ExtCsd,
        bad_widths: &'static [u8],
    ) -> impl FnMut(&Command, Option<&mut Data<'_>>) -> Result<Response, Error> {
        move |cmd, data| {
            match cmd.index {
                CMD6 => {
                    let index = ((cmd.arg >> 16) & 0xFF) as usize;
                    ext.data[index] = (cmd.arg >> 8) as u8;
                }
                CMD8 => {
                    let mut sent = ext.clone();
                    if bad_widths.contains(&ext.bus_width()) {
                        sent.data[EXT_CSD_SEC_CNT] ^= 0xFF;
                    }
                    fill(data, &sent.data);
                }
                _ => {}
            }
            Ok(Response::short(0x0000_0900))
        }
    }

    fn ext_csd_writes(log: &[Command], index: usize) -> Vec<u8> {
        log.iter()
            .filter(|cmd| cmd.index == CMD6 && (cmd.arg >> 16) & 0xFF == index as u32)
            .map(|cmd| (cmd.arg >> 8) as u8)
            .collect()
    }

    fn bus_width_switches(log: &[Command]) -> Vec<u8> {
        ext_csd_writes(log, EXT_CSD_BUS_WIDTH)
    }

    /// An SD card whose high speed function reports busy for the first
    /// `busy_queries` checks.
    fn sd_busy_script(
        busy_queries: u32,
    ) -> impl FnMut(&Command, Option<&mut Data<'_>>) -> Result<Response, Error> {
        let mut app = false;
        let mut queries = 0;
        move |cmd, data| {
            let was_app = core::mem::replace(&mut app, false);
            match (was_app, cmd.index) {
                (_, CMD55) => app = true,
                (true, ACMD51) => fill(data, &hex!("02 35 00 00 00 00 00 00")),
                (false, CMD6) => {
                    let mut status = [0u8; 64];
                    status[12..14].copy_from_slice(&hex!("80 03"));
                    if cmd.arg >> 31 == 0 {
                        queries += 1;
                        if queries <= busy_queries {
                            status[28..30].copy_from_slice(&hex!("00 02"));
                        }
                    } else {
                        status[16] = 0x01;
                    }
                    fill(data, &status);
                }
                _ => {}
            }
            Ok(Response::short(0x0000_0900))
        }
    }

    #[test]
    fn candidates_are_best_first() {
        let all = Caps::all();
        let widths: Vec<_> = mmc_bus_candidates(all)
            .iter()
            .map(|mode| mode.ext_csd_value)
            .collect();
        assert_eq!(widths, [6, 5, 2, 1]);

        let sdr_only = Caps::BUS_4BIT | Caps::BUS_8BIT | Caps::HS;
        let widths: Vec<_> = mmc_bus_candidates(sdr_only)
            .iter()
            .map(|mode| mode.ext_csd_value)
            .collect();
        assert_eq!(widths, [2, 1]);

        let four_bit_ddr = Caps::BUS_4BIT | Caps::DDR_52MHZ;
        let modes = mmc_bus_candidates(four_bit_ddr);
        assert_eq!(modes.len(), 2);
        assert!(modes[0].ddr);
        assert_eq!(modes[0].width, BusWidth::Four);

        assert!(mmc_bus_candidates(Caps::empty()).is_empty());
    }

    #[test]
    fn mmc_picks_8bit_ddr() {
        let mut host = ScriptedHost::new(emmc_script(&[]));
        host.config.caps |= Caps::DDR_52MHZ;
        let mut card = mmc_card(1 << 20, MmcPartitions::default());
        card.bus_width = BusWidth::One;
        card.read_block_len = 256;
        negotiate(&mut host, &mut card, Some(&emmc_ext_csd())).unwrap();
        assert_eq!(card.bus_width(), BusWidth::Eight);
        assert!(card.is_ddr());
        assert_eq!(card.block_len(), 512);
        assert_eq!(card.transfer_speed(), Hertz::mhz(52));
        assert!(card.caps().contains(Caps::DDR_52MHZ));
        assert_eq!(host.bus_width, BusWidth::Eight);
        assert_eq!(bus_width_switches(&host.log), [6]);
        // HS_TIMING went first
        assert_eq!(host.log[0].arg, 0x03B9_0100);
    }

    #[test]
    fn mmc_falls_back_in_order() {
        let mut host = ScriptedHost::new(emmc_script(&[6, 5]));
        host.config.caps |= Caps::DDR_52MHZ;
        let mut card = mmc_card(1 << 20, MmcPartitions::default());
        negotiate(&mut host, &mut card, Some(&emmc_ext_csd())).unwrap();
        assert_eq!(card.bus_width(), BusWidth::Eight);
        assert!(!card.is_ddr());
        assert_eq!(bus_width_switches(&host.log), [6, 5, 2]);
    }

    #[test]
    fn mmc_ends_up_at_1bit_when_nothing_works() {
        let mut host = ScriptedHost::new(emmc_script(&[6, 5, 2, 1]));
        host.config.caps |= Caps::DDR_52MHZ;
        let mut card = mmc_card(1 << 20, MmcPartitions::default());
        negotiate(&mut host, &mut card, Some(&emmc_ext_csd())).unwrap();
        assert_eq!(card.bus_width(), BusWidth::One);
        assert!(!card.is_ddr());
        assert_eq!(host.bus_width, BusWidth::One);
        assert_eq!(bus_width_switches(&host.log), [6, 5, 2, 1, 0]);
    }

    #[test]
    fn mmc_negotiation_is_deterministic() {
        let run = || {
            let mut host = ScriptedHost::new(emmc_script(&[6]));
            host.config.caps |= Caps::DDR_52MHZ;
            let mut card = mmc_card(1 << 20, MmcPartitions::default());
            negotiate(&mut host, &mut card, Some(&emmc_ext_csd())).unwrap();
            (host.log, card)
        };
        let (first_log, first_card) = run();
        let (second_log, second_card) = run();
        assert_eq!(first_log, second_log);
        assert_eq!(first_card, second_card);
        assert_eq!(first_card.bus_width(), BusWidth::Four);
        assert!(first_card.is_ddr());
    }

    #[test]
    fn mmc_without_high_speed_host() {
        let mut host = ScriptedHost::new(emmc_script(&[]));
        host.config.caps = Caps::BUS_4BIT;
        let mut card = mmc_card(1 << 20, MmcPartitions::default());
        card.csd.data[3] = 0x32;
        negotiate(&mut host, &mut card, Some(&emmc_ext_csd())).unwrap();
        assert_eq!(card.bus_width(), BusWidth::Four);
        assert_eq!(card.transfer_speed(), Hertz(2_600_000));
        // No HS_TIMING switch
        assert_eq!(host.log[0].arg, 0x03B7_0100);
    }

    #[test]
    fn sd_without_high_speed_host() {
        let mut app = false;
        let mut host = ScriptedHost::new(|cmd, data| {
            let was_app = core::mem::replace(&mut app, false);
            match (was_app, cmd.index) {
                (_, CMD55) => app = true,
                (true, ACMD51) => fill(data, &hex!("02 35 00 00 00 00 00 00")),
                (false, CMD6) => {
                    let mut status = [0u8; 64];
                    status[12..14].copy_from_slice(&hex!("80 03"));
                    fill(data, &status);
                }
                _ => {}
            }
            Ok(Response::short(0x0000_0900))
        });
        host.config.caps = Caps::BUS_4BIT;
        let mut card = sd_card(true, 1 << 20);
        card.bus_width = BusWidth::One;
        negotiate(&mut host, &mut card, None).unwrap();
        assert_eq!(card.sd_version(), Some(SdVersion::V2));
        assert_eq!(card.bus_width(), BusWidth::Four);
        assert_eq!(card.transfer_speed(), Hertz::mhz(25));
        // SCR, one query, bus width
        assert_eq!(host.indices(), [55, 51, 6, 55, 6]);
        assert_eq!(host.log[4].arg, SD_BUS_WIDTH_4);
    }

    #[test]
    fn sd_busy_switch_is_asked_four_times() {
        let mut app = false;
        let mut host = ScriptedHost::new(|cmd, data| {
            let was_app = core::mem::replace(&mut app, false);
            match (was_app, cmd.index) {
                (_, CMD55) => app = true,
                (true, ACMD51) => fill(data, &hex!("01 01 00 00 00 00 00 00")),
                (false, CMD6) => {
                    let mut status = [0u8; 64];
                    status[28..30].copy_from_slice(&hex!("00 02"));
                    fill(data, &status);
                }
                _ => {}
            }
            Ok(Response::short(0x0000_0900))
        });
        let mut card = sd_card(false, 1 << 20);
        card.bus_width = BusWidth::One;
        negotiate(&mut host, &mut card, None).unwrap();
        assert_eq!(card.sd_version(), Some(SdVersion::V1_10));
        // SCR says 1-bit only, high speed never stopped being busy
        assert_eq!(card.bus_width(), BusWidth::One);
        assert_eq!(card.transfer_speed(), Hertz::mhz(25));
        assert_eq!(host.indices(), [55, 51, 6, 6, 6, 6]);
    }

    #[test]
    fn mmc_without_high_speed_card() {
        let mut ext = emmc_ext_csd();
        ext.data[EXT_CSD_CARD_TYPE] = 0;
        let mut host = ScriptedHost::new(emmc_script_with(ext.clone(), &[]));
        let mut card = mmc_card(1 << 20, MmcPartitions::default());
        card.csd.data[3] = 0x32;
        negotiate(&mut host, &mut card, Some(&ext)).unwrap();
        assert!(!card.caps().contains(Caps::HS));
        assert_eq!(card.bus_width(), BusWidth::Eight);
        assert_eq!(card.transfer_speed(), Hertz(2_600_000));
        // Never asked for HS_TIMING
        assert!(ext_csd_writes(&host.log, EXT_CSD_HS_TIMING).is_empty());
    }

    #[test]
    fn mmc_refusing_hs_timing_stays_at_legacy_speed() {
        let mut ext = emmc_ext_csd();
        let mut refused = false;
        let mut host = ScriptedHost::new(move |cmd, data| match cmd.index {
            CMD6 => {
                let index = ((cmd.arg >> 16) & 0xFF) as usize;
                if index == EXT_CSD_HS_TIMING {
                    refused = true;
                } else {
                    ext.data[index] = (cmd.arg >> 8) as u8;
                }
                Ok(Response::short(0x0000_0900))
            }
            CMD8 => {
                fill(data, &ext.data);
                Ok(Response::short(0x0000_0900))
            }
            CMD13 if refused => {
                refused = false;
                Ok(Response::short(0x0000_0980))
            }
            _ => Ok(Response::short(0x0000_0900)),
        });
        host.config.caps |= Caps::DDR_52MHZ;
        let mut card = mmc_card(1 << 20, MmcPartitions::default());
        card.csd.data[3] = 0x32;
        negotiate(&mut host, &mut card, Some(&emmc_ext_csd())).unwrap();
        assert_eq!(ext_csd_writes(&host.log, EXT_CSD_HS_TIMING), [1]);
        assert!(!card.caps().contains(Caps::HS));
        assert!(!card.is_ddr());
        assert_eq!(card.bus_width(), BusWidth::Eight);
        assert_eq!(card.transfer_speed(), Hertz(2_600_000));
    }

    #[test]
    fn sd_high_speed_after_a_busy_spell() {
        let mut host = ScriptedHost::new(sd_busy_script(2));
        let mut card = sd_card(true, 1 << 20);
        card.bus_width = BusWidth::One;
        negotiate(&mut host, &mut card, None).unwrap();
        assert!(card.caps().contains(Caps::HS));
        assert_eq!(card.transfer_speed(), Hertz::mhz(50));
        // SCR, three queries, the switch, bus width
        assert_eq!(host.indices(), [55, 51, 6, 6, 6, 6, 55, 6]);
        assert_eq!(host.log[5].arg >> 31, 1);
    }

    #[test]
    fn sd_never_switches_while_busy() {
        let mut host = ScriptedHost::new(sd_busy_script(u32::MAX));
        let mut card = sd_card(true, 1 << 20);
        card.bus_width = BusWidth::One;
        negotiate(&mut host, &mut card, None).unwrap();
        assert!(!card.caps().contains(Caps::HS));
        assert_eq!(card.transfer_speed(), Hertz::mhz(25));
        assert_eq!(card.bus_width(), BusWidth::Four);
        assert_eq!(host.indices(), [55, 51, 6, 6, 6, 6, 55, 6]);
        assert!(host.log.iter().all(|cmd| cmd.arg >> 31 == 0));
    }
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
