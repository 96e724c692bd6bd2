//! Useful library code for tests
//!
//! [`SimController`] is an eSDHC register block with a [`SimCard`] plugged
//! into it. Commands run the moment XFERTYP is written, so the driver never
//! has to wait for anything.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};

use embedded_sdhc::card::ext_csd::*;
use embedded_sdhc::esdhc::regs::*;
use embedded_sdhc::esdhc::{Host, RegisterShim};
use embedded_sdhc::{Block, HostConfig};

/// The status a happy card reports: transfer state, ready for data
const STATUS_TRAN: u32 = 0x0000_0900;
/// The status after CMD55: as above, plus APP_CMD
const STATUS_APP: u32 = 0x0000_0920;
/// Standby state, ready for data
const STATUS_STBY: u32 = 0x0000_0700;
/// The bus address the simulated DMA engine hands out
const SIM_DMA_ADDRESS: u32 = 0x8000_0000;

const SD_CID: [u8; 16] = hex_literal::hex!("03 53 44 53 55 30 34 47 80 12 34 56 78 01 3A 00");
const SDHC_CSD: [u8; 16] = hex_literal::hex!("40 0E 00 32 5B 59 00 00 1F FF 7F 80 0A 40 00 01");
const SDHC_SCR: [u8; 8] = hex_literal::hex!("02 35 80 00 00 00 00 00");
const SDSC_CSD: [u8; 16] = hex_literal::hex!("00 26 00 32 5F 59 83 FF F6 DB FF 80 0A 40 00 01");
const SDSC_SCR: [u8; 8] = hex_literal::hex!("00 25 00 00 00 00 00 00");
const EMMC_CID: [u8; 16] = hex_literal::hex!("15 01 00 38 47 4E 44 33 52 10 2A 3B 4C 5D 81 00");
const EMMC_CSD: [u8; 16] = hex_literal::hex!("D0 4F 01 32 0F 59 03 FF FF FF FF FF 0A 40 00 01");

/// The sort of card in the slot.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CardKind {
    /// A 4 GiB SDHC card
    SdHc,
    /// A 1 GiB standard capacity SD v1 card
    SdSc,
    /// A ~7.8 GB eMMC 5.0 device with a 16 MiB general purpose partition
    Emmc,
}

/// An erase the card carried out: first block, last block, CMD38 argument
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct EraseRecord {
    pub partition: u8,
    pub first: u32,
    pub last: u32,
    pub arg: u32,
}

/// What a card says back to a command.
enum Reply {
    /// A 48-bit response
    Short(u32),
    /// A 136-bit response, most significant byte first
    Long([u8; 16]),
}

/// A card model, good enough to get through initialisation and move some
/// blocks about.
pub struct SimCard {
    pub kind: CardKind,
    /// Blocks anyone has written, keyed by partition and block number
    storage: HashMap<(u8, u32), Block>,
    /// Every erase, in order
    pub erase_log: Vec<EraseRecord>,
    /// EXT_CSD reads back garbled while BUS_WIDTH holds one of these
    pub bad_bus_widths: Vec<u8>,
    /// How many op-cond polls report busy before the card is ready. A reset
    /// doesn't start the count again.
    pub busy_polls: u32,
    /// How many op-cond polls have reported busy so far
    op_cond_polls: u32,
    rca: u16,
    selected: bool,
    app_cmd: bool,
    high_speed: bool,
    sd_bus_width: u32,
    ext_csd: [u8; 512],
    erase_start: u32,
    erase_end: u32,
    write_target: Option<u32>,
}

impl SimCard {
    pub fn new(kind: CardKind) -> SimCard {
        let mut ext_csd = [0u8; 512];
        if kind == CardKind::Emmc {
            ext_csd[EXT_CSD_GP_SIZE_MULT] = 2;
            ext_csd[EXT_CSD_PARTITION_SETTING] = 1;
            ext_csd[EXT_CSD_PARTITIONING_SUPPORT] = 0x07;
            ext_csd[EXT_CSD_RPMB_MULT] = 4;
            ext_csd[EXT_CSD_REV] = 7;
            ext_csd[EXT_CSD_CARD_TYPE] = 0x07;
            ext_csd[EXT_CSD_SEC_CNT..EXT_CSD_SEC_CNT + 4]
                .copy_from_slice(&hex_literal::hex!("00 00 E9 00"));
            ext_csd[EXT_CSD_HC_WP_GRP_SIZE] = 16;
            ext_csd[EXT_CSD_HC_ERASE_GRP_SIZE] = 1;
            ext_csd[EXT_CSD_BOOT_MULT] = 32;
        }
        SimCard {
            kind,
            storage: HashMap::new(),
            erase_log: Vec::new(),
            bad_bus_widths: Vec::new(),
            busy_polls: 1,
            op_cond_polls: 0,
            rca: if kind == CardKind::Emmc { 0 } else { 0xB368 },
            selected: false,
            app_cmd: false,
            high_speed: false,
            sd_bus_width: 1,
            ext_csd,
            erase_start: 0,
            erase_end: 0,
            write_target: None,
        }
    }

    /// The block as the card holds it. Unwritten blocks read as zero.
    pub fn block(&self, partition: u8, idx: u32) -> Block {
        self.storage
            .get(&(partition, idx))
            .copied()
            .unwrap_or([0u8; 512])
    }

    /// Put some data on the card behind the driver's back
    pub fn set_block(&mut self, partition: u8, idx: u32, block: Block) {
        self.storage.insert((partition, idx), block);
    }

    /// The EXT_CSD byte at `index`
    pub fn ext_csd(&self, index: usize) -> u8 {
        self.ext_csd[index]
    }

    /// Is the card in high speed mode?
    pub fn is_high_speed(&self) -> bool {
        self.high_speed || self.ext_csd[EXT_CSD_HS_TIMING] != 0
    }

    /// The data bus width the card thinks it has
    pub fn bus_width(&self) -> u32 {
        match self.kind {
            CardKind::Emmc => match self.ext_csd[EXT_CSD_BUS_WIDTH] & 0x3 {
                1 => 4,
                2 => 8,
                _ => 1,
            },
            _ => self.sd_bus_width,
        }
    }

    fn is_sd(&self) -> bool {
        self.kind != CardKind::Emmc
    }

    fn high_capacity(&self) -> bool {
        self.kind != CardKind::SdSc
    }

    fn partition(&self) -> u8 {
        if self.kind == CardKind::Emmc {
            self.ext_csd[EXT_CSD_PART_CONF] & 0x7
        } else {
            0
        }
    }

    fn block_of(&self, arg: u32) -> u32 {
        if self.high_capacity() {
            arg
        } else {
            arg / 512
        }
    }

    fn op_cond(&mut self, ready: u32) -> u32 {
        if self.op_cond_polls < self.busy_polls {
            self.op_cond_polls += 1;
            ready & 0x00FF_FFFF
        } else {
            ready
        }
    }

    /// Run a command. `None` means the card stays silent.
    ///
    /// `blocks` is the block count the host programmed, for reads.
    fn command(&mut self, index: u8, arg: u32, blocks: u32) -> Option<(Reply, Vec<u8>)> {
        let app = std::mem::replace(&mut self.app_cmd, false);
        let short = |value| Some((Reply::Short(value), Vec::new()));
        match (index, app, self.kind) {
            (0, _, _) => {
                self.selected = false;
                self.high_speed = false;
                self.sd_bus_width = 1;
                if self.kind == CardKind::Emmc {
                    self.ext_csd[EXT_CSD_HS_TIMING] = 0;
                    self.ext_csd[EXT_CSD_BUS_WIDTH] = 0;
                    self.ext_csd[EXT_CSD_PART_CONF] = 0;
                    self.ext_csd[EXT_CSD_ERASE_GROUP_DEF] = 0;
                }
                short(0)
            }
            (1, _, CardKind::Emmc) => {
                let ocr = self.op_cond(0xC0FF_8080);
                short(ocr)
            }
            (2, _, CardKind::Emmc) | (10, _, CardKind::Emmc) => {
                Some((Reply::Long(EMMC_CID), Vec::new()))
            }
            (2, _, _) | (10, _, _) => Some((Reply::Long(SD_CID), Vec::new())),
            (3, _, CardKind::Emmc) => {
                self.rca = (arg >> 16) as u16;
                short(0x0000_0500)
            }
            (3, _, _) => short((u32::from(self.rca) << 16) | 0x0500),
            (6, true, _) if self.is_sd() => {
                self.sd_bus_width = if arg & 0x3 == 2 { 4 } else { 1 };
                short(STATUS_APP)
            }
            (6, false, CardKind::Emmc) => {
                let index = ((arg >> 16) & 0xFF) as usize;
                self.ext_csd[index] = (arg >> 8) as u8;
                short(STATUS_TRAN)
            }
            (6, false, _) => {
                let function = (arg & 0xF) as u8;
                let mut status = [0u8; 64];
                status[0..2].copy_from_slice(&hex_literal::hex!("00 C8"));
                status[12..14].copy_from_slice(&hex_literal::hex!("80 03"));
                status[16] = if function == 1 { 0x01 } else { 0x00 };
                if arg & 0x8000_0000 != 0 && function == 1 {
                    self.high_speed = true;
                }
                Some((Reply::Short(STATUS_TRAN), status.to_vec()))
            }
            (7, _, _) => {
                self.selected = (arg >> 16) as u16 == self.rca;
                short(STATUS_STBY)
            }
            (8, _, CardKind::SdHc) => short(arg & 0xFFF),
            (8, _, CardKind::Emmc) if self.selected => {
                let mut ext_csd = self.ext_csd;
                if self.bad_bus_widths.contains(&ext_csd[EXT_CSD_BUS_WIDTH]) {
                    ext_csd[EXT_CSD_SEC_CNT] ^= 0xFF;
                }
                Some((Reply::Short(STATUS_TRAN), ext_csd.to_vec()))
            }
            (8, _, _) => None,
            (9, _, CardKind::SdHc) => Some((Reply::Long(SDHC_CSD), Vec::new())),
            (9, _, CardKind::SdSc) => Some((Reply::Long(SDSC_CSD), Vec::new())),
            (9, _, CardKind::Emmc) => Some((Reply::Long(EMMC_CSD), Vec::new())),
            (17, _, _) | (18, _, _) => {
                let first = self.block_of(arg);
                let partition = self.partition();
                let mut data = Vec::new();
                for idx in first..first + blocks {
                    data.extend_from_slice(&self.block(partition, idx));
                }
                Some((Reply::Short(STATUS_TRAN), data))
            }
            (24, _, _) | (25, _, _) => {
                self.write_target = Some(self.block_of(arg));
                short(STATUS_TRAN)
            }
            (32, _, _) | (35, _, _) => {
                self.erase_start = self.block_of(arg);
                short(STATUS_TRAN)
            }
            (33, _, _) | (36, _, _) => {
                self.erase_end = self.block_of(arg);
                short(STATUS_TRAN)
            }
            (38, _, _) => {
                let partition = self.partition();
                for idx in self.erase_start..=self.erase_end {
                    self.storage.remove(&(partition, idx));
                }
                self.erase_log.push(EraseRecord {
                    partition,
                    first: self.erase_start,
                    last: self.erase_end,
                    arg,
                });
                short(STATUS_TRAN)
            }
            (41, true, _) if self.is_sd() => {
                let hcs = if self.high_capacity() && arg & 0x4000_0000 != 0 {
                    0x4000_0000
                } else {
                    0
                };
                let ocr = self.op_cond(0x80FF_8000 | hcs);
                short(ocr)
            }
            (51, true, CardKind::SdHc) => Some((Reply::Short(STATUS_TRAN), SDHC_SCR.to_vec())),
            (51, true, CardKind::SdSc) => Some((Reply::Short(STATUS_TRAN), SDSC_SCR.to_vec())),
            (55, _, CardKind::Emmc) => None,
            (55, _, _) => {
                self.app_cmd = true;
                short(STATUS_APP)
            }
            _ => short(STATUS_TRAN),
        }
    }

    /// Take the data for the last write command
    fn receive(&mut self, data: &[u8]) {
        let Some(first) = self.write_target.take() else {
            return;
        };
        let partition = self.partition();
        for (idx, chunk) in (first..).zip(data.chunks_exact(512)) {
            let mut block = [0u8; 512];
            block.copy_from_slice(chunk);
            self.storage.insert((partition, idx), block);
        }
    }
}

/// Ways to make a command go wrong.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FaultKind {
    /// The card never answers
    CommandTimeout,
    /// The response fails its CRC
    CommandCrc,
    /// The command goes through but the data fails its CRC
    DataCrc,
    /// The command goes through but the data never comes
    DataTimeout,
}

/// Make the `nth` (counting from 1) use of command `index` fail.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Fault {
    pub index: u8,
    pub nth: u32,
    pub kind: FaultKind,
}

/// How many times each reset bit was set.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct ResetCounts {
    pub all: u32,
    pub cmd: u32,
    pub data: u32,
}

/// A simulated eSDHC register block.
pub struct SimController {
    pub card: SimCard,
    /// Is there a card in the slot?
    pub inserted: bool,
    /// Is the card's write protect switch on?
    pub write_protected: bool,
    /// Every command the card saw, as (index, argument)
    pub log: Vec<(u8, u32)>,
    pub faults: Vec<Fault>,
    pub resets: ResetCounts,
    /// Can the DMA engine reach the driver's buffers?
    pub dma_reachable: bool,
    /// How many data phases went through the DMA engine
    pub dma_transfers: u32,
    dma_buffer: Option<*mut u8>,
    registers: HashMap<usize, u32>,
    irqstat: u32,
    sysctl: u32,
    response: [u32; 4],
    read_fifo: VecDeque<u8>,
    write_buffer: Option<(Vec<u8>, usize)>,
    command_counts: HashMap<u8, u32>,
}

impl SimController {
    pub fn new(card: SimCard) -> SimController {
        SimController {
            card,
            inserted: true,
            write_protected: false,
            log: Vec::new(),
            faults: Vec::new(),
            resets: ResetCounts::default(),
            dma_reachable: true,
            dma_transfers: 0,
            dma_buffer: None,
            registers: HashMap::new(),
            irqstat: 0,
            sysctl: 0,
            response: [0; 4],
            read_fifo: VecDeque::new(),
            write_buffer: None,
            command_counts: HashMap::new(),
        }
    }

    /// The indices of every command the card saw
    pub fn indices(&self) -> Vec<u8> {
        self.log.iter().map(|(index, _)| *index).collect()
    }

    /// The arguments of every use of command `index`
    pub fn args_of(&self, index: u8) -> Vec<u32> {
        self.log
            .iter()
            .filter(|(i, _)| *i == index)
            .map(|(_, arg)| *arg)
            .collect()
    }

    /// The data width the host is set to
    pub fn host_bus_width(&self) -> u32 {
        match self.register(PROCTL) & PROCTL_DTW_MASK {
            PROCTL_DTW_4 => 4,
            PROCTL_DTW_8 => 8,
            _ => 1,
        }
    }

    fn register(&self, offset: usize) -> u32 {
        self.registers.get(&offset).copied().unwrap_or(0)
    }

    fn fault_for(&mut self, index: u8) -> Option<FaultKind> {
        let count = self.command_counts.entry(index).or_insert(0);
        *count += 1;
        let count = *count;
        self.faults
            .iter()
            .find(|fault| fault.index == index && fault.nth == count)
            .map(|fault| fault.kind)
    }

    fn write_sysctl(&mut self, value: u32) {
        let self_clearing = SYSCTL_RSTA | SYSCTL_RSTC | SYSCTL_RSTD | SYSCTL_INITA;
        if value & SYSCTL_RSTA != 0 {
            self.resets.all += 1;
            self.irqstat = 0;
            self.read_fifo.clear();
            self.write_buffer = None;
            self.dma_buffer = None;
            self.registers.clear();
        }
        if value & SYSCTL_RSTC != 0 {
            self.resets.cmd += 1;
            self.irqstat &= !(IRQSTAT_CC | IRQSTAT_CTOE | CMD_ERR);
        }
        if value & SYSCTL_RSTD != 0 {
            self.resets.data += 1;
            self.irqstat &= !(IRQSTAT_TC | DATA_ERR);
            self.read_fifo.clear();
            self.write_buffer = None;
            self.dma_buffer = None;
        }
        self.sysctl = value & !self_clearing;
    }

    fn run_command(&mut self, xfertyp: u32) {
        let index = ((xfertyp >> 24) & 0x3F) as u8;
        let arg = self.register(CMDARG);
        let blkattr = self.register(BLKATTR);
        let has_data = xfertyp & XFERTYP_DPSEL != 0;
        let is_read = xfertyp & XFERTYP_DTDSEL != 0;
        let blocks = if has_data { blkattr >> 16 } else { 0 };
        let block_size = (blkattr & 0x1FFF) as usize;
        let rsptyp = xfertyp & XFERTYP_RSPTYP_MASK;

        let fault = self.fault_for(index);
        match fault {
            Some(FaultKind::CommandTimeout) => {
                self.irqstat |= IRQSTAT_CTOE;
                return;
            }
            Some(FaultKind::CommandCrc) => {
                self.irqstat |= IRQSTAT_CC | IRQSTAT_CCE;
                return;
            }
            _ => {}
        }
        if !self.inserted {
            self.irqstat |= IRQSTAT_CTOE;
            return;
        }

        self.log.push((index, arg));
        let Some((reply, data)) = self.card.command(index, arg, blocks) else {
            if rsptyp == 0 {
                self.irqstat |= IRQSTAT_CC;
            } else {
                self.irqstat |= IRQSTAT_CTOE;
            }
            return;
        };

        match reply {
            Reply::Short(value) => self.response = [value, 0, 0, 0],
            Reply::Long(bytes) => {
                let raw = u128::from_be_bytes(bytes) >> 8;
                self.response = [
                    raw as u32,
                    (raw >> 32) as u32,
                    (raw >> 64) as u32,
                    (raw >> 96) as u32,
                ];
            }
        }
        self.irqstat |= IRQSTAT_CC;

        if !has_data {
            return;
        }
        match fault {
            Some(FaultKind::DataCrc) => {
                self.irqstat |= IRQSTAT_DCE;
                return;
            }
            Some(FaultKind::DataTimeout) => {
                self.irqstat |= IRQSTAT_DTOE;
                return;
            }
            _ => {}
        }
        let expected = blocks as usize * block_size;
        if xfertyp & XFERTYP_DMAEN != 0 {
            self.dma(&data, expected, is_read);
        } else if is_read {
            self.read_fifo.extend(data.iter().take(expected));
            if self.read_fifo.is_empty() {
                self.irqstat |= IRQSTAT_TC;
            }
        } else {
            self.write_buffer = Some((Vec::with_capacity(expected), expected));
        }
    }

    /// Move a whole data phase to or from the buffer behind DSADDR
    fn dma(&mut self, data: &[u8], expected: usize, is_read: bool) {
        let buffer = match self.dma_buffer.take() {
            Some(buffer) if self.register(DSADDR) == SIM_DMA_ADDRESS => buffer,
            _ => {
                self.irqstat |= IRQSTAT_DMAE;
                return;
            }
        };
        // Safety: the driver handed us this buffer for this command, and it
        // holds at least `expected` bytes.
        unsafe {
            if is_read {
                let len = data.len().min(expected);
                std::ptr::copy_nonoverlapping(data.as_ptr(), buffer, len);
            } else {
                let written = std::slice::from_raw_parts(buffer, expected).to_vec();
                self.card.receive(&written);
            }
        }
        self.dma_transfers += 1;
        self.irqstat |= IRQSTAT_TC | IRQSTAT_DINT;
    }

    fn pop_word(&mut self) -> u32 {
        let mut bytes = [0u8; 4];
        for byte in bytes.iter_mut() {
            *byte = self.read_fifo.pop_front().unwrap_or(0);
        }
        if self.read_fifo.is_empty() {
            self.irqstat |= IRQSTAT_TC;
        }
        u32::from_le_bytes(bytes)
    }

    fn push_word(&mut self, value: u32) {
        let Some((buffer, expected)) = self.write_buffer.as_mut() else {
            return;
        };
        buffer.extend_from_slice(&value.to_le_bytes());
        if buffer.len() >= *expected {
            let (buffer, _) = self.write_buffer.take().unwrap();
            self.card.receive(&buffer);
            self.irqstat |= IRQSTAT_TC;
        }
    }
}

impl RegisterShim for SimController {
    fn read32(&mut self, offset: usize) -> u32 {
        match offset {
            SYSCTL => self.sysctl,
            IRQSTAT => self.irqstat,
            CMDRSP0 => self.response[0],
            CMDRSP1 => self.response[1],
            CMDRSP2 => self.response[2],
            CMDRSP3 => self.response[3],
            DATPORT => self.pop_word(),
            HOSTCAPBLT => HOSTCAPBLT_VS33 | HOSTCAPBLT_HSS | HOSTCAPBLT_DMAS,
            PRSSTAT => {
                let mut prsstat = PRSSTAT_DAT0 | PRSSTAT_SDSTB;
                if self.inserted {
                    prsstat |= PRSSTAT_CINS | PRSSTAT_CDPL;
                }
                if !self.write_protected {
                    prsstat |= PRSSTAT_WPSPL;
                }
                if !self.read_fifo.is_empty() {
                    prsstat |= PRSSTAT_BREN;
                }
                if self.write_buffer.is_some() {
                    prsstat |= PRSSTAT_BWEN;
                }
                prsstat
            }
            _ => self.register(offset),
        }
    }

    fn dma_address(&mut self, buffer: *const u8) -> Option<u32> {
        if !self.dma_reachable {
            return None;
        }
        self.dma_buffer = Some(buffer.cast_mut());
        Some(SIM_DMA_ADDRESS)
    }

    fn write32(&mut self, offset: usize, value: u32) {
        match offset {
            SYSCTL => self.write_sysctl(value),
            IRQSTAT => self.irqstat &= !value,
            DATPORT => self.push_word(value),
            XFERTYP => {
                self.registers.insert(offset, value);
                self.run_command(value);
            }
            _ => {
                self.registers.insert(offset, value);
            }
        }
    }
}

/// A delay source that doesn't wait at all.
pub struct NoDelay;

impl embedded_hal::delay::DelayNs for NoDelay {
    fn delay_ns(&mut self, _ns: u32) {}
}

/// Send log output to the test harness
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A host with `card` in the slot, already through [`Host::init`].
pub fn make_host(card: SimCard, config: HostConfig) -> Host<SimController, NoDelay> {
    init_logging();
    let mut host = Host::new(SimController::new(card), NoDelay, config);
    host.init().expect("host init");
    host
}

/// A block full of one byte
pub fn pattern(byte: u8) -> Block {
    [byte; 512]
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
