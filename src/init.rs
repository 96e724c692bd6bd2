//! Card initialisation.
//!
//! Takes a freshly inserted (or freshly reset) card through power-up,
//! identification and addressing, configures it, and hands back a [`Card`]
//! in the transfer state.
//!
//! The sequence is a state machine, so callers that want to watch progress
//! can drive it a step at a time with [`Initializer::step`]. Most people
//! just call [`initialize`].

use crate::bus;
use crate::card::ext_csd::{EXT_CSD_ERASE_GROUP_DEF, PART_ACCESS_MASK};
use crate::card::*;
use crate::cmd::{self, app_command};
use crate::delay::Delay;
use crate::proto::*;
use crate::transport::{BusWidth, Caps, Transport, TransportMode};
use crate::Error;

use crate::{debug, trace, warn};

/// The RCA we give MMC cards. SD cards pick their own.
const MMC_RCA: u16 = 1;

/// How long the card gets after GO_IDLE, in milliseconds
const IDLE_SETTLE_MS: u32 = 1;

/// Where the initialisation sequence has got to.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum InitState {
    /// About to send GO_IDLE
    Reset,
    /// About to ask an SD card about its interface conditions
    VoltageCheck,
    /// Waiting for the card to power up
    OpConditionWait,
    /// About to read the CID
    Identification,
    /// About to give the card an address and read its CSD
    AddressAssigned,
    /// About to select the card and negotiate the bus
    ConfigPending,
    /// Done. The card is in the transfer state.
    Operational,
    /// Gave up
    Failed(Error),
}

/// Runs the initialisation sequence over a [`Transport`].
pub struct Initializer<'h, T>
where
    T: Transport,
{
    host: &'h mut T,
    state: InitState,
    attempts_left: u32,
    is_sd: bool,
    sd_v2: bool,
    ocr: Ocr,
    cid: Cid,
    rca: u16,
    card: Option<Card>,
}

/// Bring up the card attached to `host`.
///
/// The host should already be initialised. Powering up is retried a few
/// times (see [`crate::HostConfig::op_cond_attempts`]); every other failure
/// is returned straight away.
pub fn initialize<T>(host: &mut T) -> Result<Card, Error>
where
    T: Transport,
{
    Initializer::new(host).run()
}

impl<'h, T> Initializer<'h, T>
where
    T: Transport,
{
    /// Start a new initialisation sequence
    pub fn new(host: &'h mut T) -> Initializer<'h, T> {
        let attempts_left = host.config().op_cond_attempts.max(1);
        Initializer {
            host,
            state: InitState::Reset,
            attempts_left,
            is_sd: false,
            sd_v2: false,
            ocr: Ocr::default(),
            cid: Cid::default(),
            rca: 0,
            card: None,
        }
    }

    /// The state we're in
    pub fn state(&self) -> InitState {
        self.state
    }

    /// Run one step of the sequence, and return the state we end up in.
    ///
    /// Stepping a finished sequence does nothing.
    pub fn step(&mut self) -> InitState {
        let result = match self.state {
            InitState::Reset => self.reset(),
            InitState::VoltageCheck => self.voltage_check(),
            InitState::OpConditionWait => self.op_condition_wait(),
            InitState::Identification => self.identify(),
            InitState::AddressAssigned => self.assign_address(),
            InitState::ConfigPending => self.configure(),
            done @ (InitState::Operational | InitState::Failed(_)) => return done,
        };
        let next = result.unwrap_or_else(InitState::Failed);
        debug!("Init: {:?} -> {:?}", self.state, next);
        self.state = next;
        next
    }

    /// Run the sequence to the end.
    pub fn run(mut self) -> Result<Card, Error> {
        loop {
            match self.step() {
                InitState::Operational => return self.card.take().ok_or(Error::BadState),
                InitState::Failed(e) => return Err(e),
                _ => {}
            }
        }
    }

    fn mode(&self) -> TransportMode {
        self.host.config().mode
    }

    fn go_idle(&mut self) -> Result<(), Error> {
        let response = match self.mode() {
            TransportMode::Native => ResponseType::None,
            TransportMode::Spi => ResponseType::R1,
        };
        self.host
            .send_command(Command::new(CMD0, 0, response), None)?;
        self.host.delay_ms(IDLE_SETTLE_MS);
        Ok(())
    }

    fn reset(&mut self) -> Result<InitState, Error> {
        if !self.host.is_card_present() {
            return Err(Error::NoMedia);
        }
        self.is_sd = false;
        self.sd_v2 = false;
        self.card = None;
        let f_min = self.host.config().f_min;
        self.host.set_bus_width(BusWidth::One)?;
        self.host.set_clock(f_min)?;
        self.go_idle()?;
        Ok(InitState::VoltageCheck)
    }

    fn voltage_check(&mut self) -> Result<InitState, Error> {
        let voltages = self.host.config().voltages;
        let vhs = if voltages & OCR_VOLTAGE_WINDOW != 0 {
            IF_COND_VHS_27_36
        } else {
            0
        };
        let cmd = Command::new(CMD8, vhs | IF_COND_CHECK_PATTERN, ResponseType::R7);
        match self.host.send_command(cmd, None) {
            Ok(response) if response.value() & 0xFF == IF_COND_CHECK_PATTERN => {
                debug!("CMD8 echoed, SD v2 or later");
                self.sd_v2 = true;
            }
            Ok(_response) => {
                warn!("CMD8 echo mismatch: {:x}", _response.value());
            }
            Err(Error::TimeoutCommand(_) | Error::NoResponse | Error::DeviceError) => {
                debug!("No CMD8 response, not an SD v2 card");
            }
            Err(e) => return Err(e),
        }
        Ok(InitState::OpConditionWait)
    }

    fn op_condition_wait(&mut self) -> Result<InitState, Error> {
        let result = match self.sd_send_op_cond() {
            Err(Error::NoResponse) => {
                debug!("No response to ACMD41, trying MMC");
                self.mmc_send_op_cond()
            }
            other => other,
        };
        match result {
            Ok(()) => Ok(InitState::Identification),
            Err(_e @ (Error::TimeoutACommand(ACMD41) | Error::TimeoutCommand(CMD1)))
                if self.attempts_left > 1 =>
            {
                self.attempts_left -= 1;
                warn!("Card didn't power up ({:?}), starting again", _e);
                Ok(InitState::Reset)
            }
            Err(e) => Err(e),
        }
    }

    fn sd_send_op_cond(&mut self) -> Result<(), Error> {
        let config = self.host.config();
        let mode = config.mode;
        let mut arg = match mode {
            TransportMode::Native => config.voltages & OCR_VOLTAGE_WINDOW,
            TransportMode::Spi => 0,
        };
        if self.sd_v2 {
            arg |= OCR_HCS;
        }
        let mut delay = Delay::new_poll(config.op_cond_iterations);
        let mut ocr = loop {
            let cmd = Command::new(ACMD41, arg, ResponseType::R3);
            let response = match app_command(self.host, 0, cmd, None) {
                Ok(response) => response,
                Err(Error::TimeoutCommand(_) | Error::NoResponse) => return Err(Error::NoResponse),
                Err(e) => return Err(e),
            };
            let ocr = Ocr(response.value());
            if ocr.is_powered_up() {
                break ocr;
            }
            trace!("ACMD41: card busy");
            delay.delay(&mut *self.host, Error::TimeoutACommand(ACMD41))?;
        };
        if mode == TransportMode::Spi {
            ocr = self.spi_read_ocr()?;
        }
        debug!("SD card powered up, OCR {:x}", ocr.0);
        self.is_sd = true;
        self.ocr = ocr;
        Ok(())
    }

    fn mmc_send_op_cond(&mut self) -> Result<(), Error> {
        self.go_idle()?;
        let config = self.host.config();
        let mode = config.mode;
        let voltages = config.voltages;
        let mut delay = Delay::new_poll(config.op_cond_iterations);

        // Ask first, so we can offer back the voltages and access mode the
        // card says it can do
        let cmd = Command::new(CMD1, 0, ResponseType::R3);
        let mut ocr = Ocr(self.host.send_command(cmd, None)?.value());
        while !ocr.is_powered_up() {
            trace!("CMD1: card busy");
            delay.delay(&mut *self.host, Error::TimeoutCommand(CMD1))?;
            let arg = match mode {
                TransportMode::Native => {
                    (voltages & ocr.voltage_window()) | ocr.access_mode() | OCR_HCS
                }
                TransportMode::Spi => 0,
            };
            let cmd = Command::new(CMD1, arg, ResponseType::R3);
            ocr = Ocr(self.host.send_command(cmd, None)?.value());
        }
        if mode == TransportMode::Spi {
            ocr = self.spi_read_ocr()?;
        }
        debug!("MMC card powered up, OCR {:x}", ocr.0);
        self.is_sd = false;
        self.ocr = ocr;
        Ok(())
    }

    fn spi_read_ocr(&mut self) -> Result<Ocr, Error> {
        let response = self
            .host
            .send_command(Command::new(CMD58, 0, ResponseType::R3), None)?;
        Ok(Ocr(response.value()))
    }

    fn identify(&mut self) -> Result<InitState, Error> {
        let index = match self.mode() {
            TransportMode::Native => CMD2,
            TransportMode::Spi => CMD10,
        };
        let response = self
            .host
            .send_command(Command::new(index, 0, ResponseType::R2), None)?;
        self.cid = Cid::from_response(&response);
        debug!("CID: {:?}", self.cid);
        Ok(InitState::AddressAssigned)
    }

    fn assign_address(&mut self) -> Result<InitState, Error> {
        if self.mode() == TransportMode::Native {
            if self.is_sd {
                let response = self
                    .host
                    .send_command(Command::new(CMD3, 0, ResponseType::R6), None)?;
                self.rca = (response.value() >> 16) as u16;
            } else {
                self.rca = MMC_RCA;
                self.host.send_command(
                    Command::new(CMD3, u32::from(MMC_RCA) << 16, ResponseType::R1),
                    None,
                )?;
            }
            debug!("RCA is {:x}", self.rca);
        }
        let response = self.host.send_command(
            Command::new(CMD9, u32::from(self.rca) << 16, ResponseType::R2),
            None,
        )?;
        let csd = Csd::from_response(&response);
        debug!("CSD: {:?}", csd);
        self.card = Some(self.build_card(csd));
        Ok(InitState::ConfigPending)
    }

    /// What the CSD and OCR tell us, before any configuration
    fn build_card(&self, csd: Csd) -> Card {
        let read_block_len = csd.read_block_len().min(MAX_BLOCK_LEN);
        let (family, capacity, write_block_len, erase_group_size) = if self.is_sd {
            let version = if self.sd_v2 {
                SdVersion::V2
            } else {
                SdVersion::V1_0
            };
            (
                CardFamily::Sd(SdState { version, scr: None }),
                csd.card_capacity_bytes(csd.is_sd_high_capacity_layout()),
                read_block_len,
                1,
            )
        } else {
            let capacity = csd.card_capacity_bytes(false);
            let mmc = MmcState {
                version: MmcVersion::from_spec_vers(csd.mmc_spec_version()),
                partitions: MmcPartitions {
                    user: capacity,
                    ..MmcPartitions::default()
                },
                part_config: None,
                active_partition: 0,
            };
            (
                CardFamily::Mmc(mmc),
                capacity,
                csd.write_block_len().min(MAX_BLOCK_LEN),
                csd.mmc_erase_group_blocks(),
            )
        };
        Card {
            family,
            cid: self.cid,
            csd,
            ocr: self.ocr,
            rca: self.rca,
            high_capacity: self.ocr.is_high_capacity(),
            read_block_len,
            write_block_len,
            erase_group_size,
            capacity,
            bus_width: BusWidth::One,
            ddr: false,
            caps: Caps::empty(),
            transfer_speed: csd.transfer_speed(),
            mode: self.mode(),
        }
    }

    fn configure(&mut self) -> Result<InitState, Error> {
        let mut card = self.card.take().ok_or(Error::BadState)?;
        let dsr = self.host.config().dsr;

        if let (true, Some(dsr)) = (card.csd.dsr_implemented(), dsr) {
            debug!("Setting DSR to {:x}", dsr);
            self.host.send_command(
                Command::new(CMD4, u32::from(dsr) << 16, ResponseType::None),
                None,
            )?;
        }

        if card.mode == TransportMode::Native {
            self.host
                .send_command(Command::new(CMD7, card.rca_arg(), ResponseType::R1), None)?;
        }

        let ext_csd = match card.mmc_version() {
            Some(version) if version >= MmcVersion::V4 => {
                Some(read_ext_csd(&mut *self.host, &mut card)?)
            }
            _ => None,
        };

        bus::negotiate(&mut *self.host, &mut card, ext_csd.as_ref())?;

        debug!(
            "Card ready: {} bytes, {}-bit{}, {} Hz",
            card.capacity,
            card.bus_width.lines(),
            if card.ddr { " DDR" } else { "" },
            card.transfer_speed.0
        );
        self.card = Some(card);
        Ok(InitState::Operational)
    }
}

/// Read EXT_CSD (twice, to make sure we read it right) and fold what it says
/// into the card.
///
/// Returns the EXT_CSD as it stands after any changes we made to it.
fn read_ext_csd<T>(host: &mut T, card: &mut Card) -> Result<ExtCsd, Error>
where
    T: Transport,
{
    let mut ext_csd = cmd::send_ext_csd(host)?;
    let check = cmd::send_ext_csd(host)?;
    if !ext_csd.matches(&check) {
        warn!("EXT_CSD reads disagree");
        return Err(Error::CapacityMismatch);
    }

    if let Some(capacity) = ext_csd.sector_capacity() {
        card.capacity = capacity;
    }

    let completed = ext_csd.partitioning_completed();
    let partitioned = completed || (ext_csd.supports_partitioning() && ext_csd.has_gp_partitions());
    if partitioned && !ext_csd.uses_hc_erase_groups() {
        debug!("Enabling high capacity erase groups");
        cmd::mmc_switch(host, card.rca, EXT_CSD_ERASE_GROUP_DEF, 1)?;
        ext_csd.data[EXT_CSD_ERASE_GROUP_DEF] = 1;
    }
    if ext_csd.uses_hc_erase_groups() {
        card.erase_group_size = ext_csd.hc_erase_group_blocks();
        if card.high_capacity && completed {
            card.capacity = u64::from(ext_csd.sector_count()) * 512;
        }
    }

    let part_config = if ext_csd.supports_partitioning() || ext_csd.boot_size_mult() != 0 {
        Some(ext_csd.partition_config())
    } else {
        None
    };
    let mut partitions = MmcPartitions {
        user: card.capacity,
        boot: [ext_csd.boot_partition_size(); 2],
        rpmb: ext_csd.rpmb_partition_size(),
        general_purpose: [0; 4],
    };
    if completed {
        for (idx, size) in partitions.general_purpose.iter_mut().enumerate() {
            *size = ext_csd.gp_partition_size(idx);
        }
    }

    if let CardFamily::Mmc(mmc) = &mut card.family {
        if let Some(version) = ext_csd.version() {
            mmc.version = version;
        }
        mmc.partitions = partitions;
        mmc.part_config = part_config;
        mmc.active_partition = 0;
        if part_config.map_or(0, |conf| conf & PART_ACCESS_MASK) != 0 {
            warn!("Card came up with a non-user partition selected");
        }
    }
    debug!("EXT_CSD: rev {}, {:?}", ext_csd.revision(), partitions);
    Ok(ext_csd)
}


// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
