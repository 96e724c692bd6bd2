//! Test doubles for the protocol layers.
//!
//! [`ScriptedHost`] answers every command by calling a closure, and records
//! what it was asked to do.

use embedded_hal::delay::DelayNs;

use crate::card::{Card, CardFamily, Cid, Csd, MmcPartitions, MmcState, MmcVersion, Ocr};
use crate::card::{SdState, SdVersion};
use crate::proto::{Command, Data, DataBuffer, Response};
use crate::transport::{BusWidth, Caps, HostConfig, Transport, TransportMode};
use crate::{Error, Hertz};

/// A [`Transport`] whose card is a closure.
pub(crate) struct ScriptedHost<F> {
    pub config: HostConfig,
    pub script: F,
    pub log: Vec<Command>,
    pub bus_width: BusWidth,
    pub clocks: Vec<Hertz>,
    pub present: bool,
    pub write_protected: bool,
}

impl<F> ScriptedHost<F>
where
    F: FnMut(&Command, Option<&mut Data<'_>>) -> Result<Response, Error>,
{
    pub fn new(script: F) -> ScriptedHost<F> {
        ScriptedHost {
            config: HostConfig::default(),
            script,
            log: Vec::new(),
            bus_width: BusWidth::One,
            clocks: Vec::new(),
            present: true,
            write_protected: false,
        }
    }

    /// The index of every command sent so far
    pub fn indices(&self) -> Vec<u8> {
        self.log.iter().map(|cmd| cmd.index).collect()
    }
}

impl<F> DelayNs for ScriptedHost<F> {
    fn delay_ns(&mut self, _ns: u32) {}
}

impl<F> Transport for ScriptedHost<F>
where
    F: FnMut(&Command, Option<&mut Data<'_>>) -> Result<Response, Error>,
{
    fn config(&self) -> &HostConfig {
        &self.config
    }

    fn send_command(&mut self, cmd: Command, mut data: Option<Data<'_>>) -> Result<Response, Error> {
        self.log.push(cmd);
        (self.script)(&cmd, data.as_mut())
    }

    fn set_bus_width(&mut self, width: BusWidth) -> Result<(), Error> {
        self.bus_width = width;
        Ok(())
    }

    fn set_clock(&mut self, frequency: Hertz) -> Result<Hertz, Error> {
        self.clocks.push(frequency);
        Ok(frequency)
    }

    fn is_card_present(&mut self) -> bool {
        self.present
    }

    fn is_write_protected(&mut self) -> bool {
        self.write_protected
    }
}

/// A 136-bit response carrying `bytes`, most significant first
pub(crate) fn long_response(bytes: &[u8; 16]) -> Response {
    let mut words = [0u32; 4];
    for (word, chunk) in words.iter_mut().zip(bytes.chunks_exact(4)) {
        *word = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    Response(words)
}

/// Copy `bytes` into the start of a read buffer
pub(crate) fn fill(data: Option<&mut Data<'_>>, bytes: &[u8]) {
    if let Some(Data {
        buffer: DataBuffer::Read(buf),
        ..
    }) = data
    {
        buf[..bytes.len()].copy_from_slice(bytes);
    }
}

/// An SD card in the transfer state with `blocks` 512-byte blocks.
pub(crate) fn sd_card(high_capacity: bool, blocks: u64) -> Card {
    Card {
        family: CardFamily::Sd(SdState {
            version: SdVersion::V2,
            scr: None,
        }),
        cid: Cid::default(),
        csd: Csd::default(),
        ocr: Ocr(if high_capacity { 0xC0FF_8000 } else { 0x80FF_8000 }),
        rca: 0xB368,
        high_capacity,
        read_block_len: 512,
        write_block_len: 512,
        erase_group_size: 1,
        capacity: blocks * 512,
        bus_width: BusWidth::Four,
        ddr: false,
        caps: Caps::BUS_4BIT,
        transfer_speed: Hertz::mhz(25),
        mode: TransportMode::Native,
    }
}

/// An eMMC device in the transfer state with `blocks` 512-byte blocks in
/// its user area.
pub(crate) fn mmc_card(blocks: u64, partitions: MmcPartitions) -> Card {
    Card {
        family: CardFamily::Mmc(MmcState {
            version: MmcVersion::V5_0,
            partitions,
            part_config: Some(0),
            active_partition: 0,
        }),
        cid: Cid::default(),
        csd: Csd::default(),
        ocr: Ocr(0xC0FF_8080),
        rca: 1,
        high_capacity: true,
        read_block_len: 512,
        write_block_len: 512,
        erase_group_size: 1024,
        capacity: blocks * 512,
        bus_width: BusWidth::Eight,
        ddr: false,
        caps: Caps::BUS_4BIT | Caps::BUS_8BIT | Caps::HS | Caps::HS_52MHZ,
        transfer_speed: Hertz::mhz(52),
        mode: TransportMode::Native,
    }
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
