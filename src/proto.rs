//! Constants and types from the SD and MMC specifications.
//!
//! Based on the SD Physical Layer Simplified Specification and JEDEC JESD84.

// ****************************************************************************
// Commands
// ****************************************************************************

/// GO_IDLE_STATE - reset the card
pub const CMD0: u8 = 0x00;
/// SEND_OP_COND - MMC only, negotiate voltage and addressing mode
pub const CMD1: u8 = 0x01;
/// ALL_SEND_CID - ask every card for its CID
pub const CMD2: u8 = 0x02;
/// SEND_RELATIVE_ADDR (SD) / SET_RELATIVE_ADDR (MMC)
pub const CMD3: u8 = 0x03;
/// SET_DSR - program the driver stage register
pub const CMD4: u8 = 0x04;
/// SWITCH_FUNC (SD) / SWITCH (MMC)
pub const CMD6: u8 = 0x06;
/// SELECT_CARD - move the card to the transfer state
pub const CMD7: u8 = 0x07;
/// SEND_IF_COND (SD) / SEND_EXT_CSD (MMC)
pub const CMD8: u8 = 0x08;
/// SEND_CSD - read the Card Specific Data register
pub const CMD9: u8 = 0x09;
/// SEND_CID - read the Card Identification register
pub const CMD10: u8 = 0x0A;
/// STOP_TRANSMISSION - end a multiple block read/write
pub const CMD12: u8 = 0x0C;
/// SEND_STATUS - read the card status register
pub const CMD13: u8 = 0x0D;
/// SET_BLOCKLEN - set the data block length
pub const CMD16: u8 = 0x10;
/// READ_SINGLE_BLOCK - read one block
pub const CMD17: u8 = 0x11;
/// READ_MULTIPLE_BLOCK - read blocks until CMD12
pub const CMD18: u8 = 0x12;
/// WRITE_BLOCK - write one block
pub const CMD24: u8 = 0x18;
/// WRITE_MULTIPLE_BLOCK - write blocks until CMD12
pub const CMD25: u8 = 0x19;
/// ERASE_WR_BLK_START - SD erase range start
pub const CMD32: u8 = 0x20;
/// ERASE_WR_BLK_END - SD erase range end
pub const CMD33: u8 = 0x21;
/// ERASE_GROUP_START - MMC erase range start
pub const CMD35: u8 = 0x23;
/// ERASE_GROUP_END - MMC erase range end
pub const CMD36: u8 = 0x24;
/// ERASE - erase the selected range
pub const CMD38: u8 = 0x26;
/// APP_CMD - the next command is an application-specific command
pub const CMD55: u8 = 0x37;
/// READ_OCR - SPI mode only
pub const CMD58: u8 = 0x3A;
/// SET_BUS_WIDTH - SD only
pub const ACMD6: u8 = 0x06;
/// SD_SEND_OP_COND - SD only, negotiate voltage and capacity
pub const ACMD41: u8 = 0x29;
/// SEND_SCR - read the SD Configuration Register
pub const ACMD51: u8 = 0x33;

// ****************************************************************************
// Arguments
// ****************************************************************************

/// Check pattern we send with CMD8 and expect echoed back
pub const IF_COND_CHECK_PATTERN: u32 = 0xAA;
/// CMD8 voltage field for 2.7-3.6V
pub const IF_COND_VHS_27_36: u32 = 1 << 8;

/// OCR bit set once the card has finished powering up
pub const OCR_BUSY: u32 = 0x8000_0000;
/// OCR bit for high capacity (SD CCS / HCS, MMC sector mode)
pub const OCR_HCS: u32 = 0x4000_0000;
/// MMC OCR access mode field
pub const OCR_ACCESS_MODE: u32 = 0x6000_0000;
/// The 2.7-3.6V window bits of the OCR
pub const OCR_VOLTAGE_WINDOW: u32 = 0x00FF_8000;

/// Host supports 1.65-1.95V
pub const MMC_VDD_165_195: u32 = 0x0000_0080;
/// Host supports 2.9-3.0V
pub const MMC_VDD_29_30: u32 = 0x0002_0000;
/// Host supports 3.0-3.1V
pub const MMC_VDD_30_31: u32 = 0x0004_0000;
/// Host supports 3.2-3.3V
pub const MMC_VDD_32_33: u32 = 0x0010_0000;
/// Host supports 3.3-3.4V
pub const MMC_VDD_33_34: u32 = 0x0020_0000;

/// MMC SWITCH access mode: write the value byte to the EXT_CSD index
pub const MMC_SWITCH_MODE_WRITE_BYTE: u32 = 0x03;

/// SD SWITCH_FUNC mode: query only
pub const SD_SWITCH_CHECK: u32 = 0;
/// SD SWITCH_FUNC mode: actually switch
pub const SD_SWITCH_SWITCH: u32 = 1;
/// SD function group 1 (access mode), function 1 is high speed
pub const SD_SWITCH_HIGH_SPEED: u8 = 1;

/// ACMD6 argument for a 4-bit bus
pub const SD_BUS_WIDTH_4: u32 = 2;

/// CMD38 argument for a normal erase
pub const ERASE_ARG: u32 = 0x0000_0000;
/// CMD38 argument for a secure erase
pub const SECURE_ERASE_ARG: u32 = 0x8000_0000;

/// The largest block length we ever use, in bytes
pub const MAX_BLOCK_LEN: u32 = 512;

// ****************************************************************************
// Card status (R1)
// ****************************************************************************

/// Card has finished with the previous data and can take more
pub const R1_READY_FOR_DATA: u32 = 1 << 8;
/// Card status bits that indicate an error, apart from SWITCH_ERROR which
/// is reported on its own
pub const R1_ERROR_MASK: u32 = !0x0206_BFFF;
/// The card couldn't perform the SWITCH it was asked for
pub const R1_SWITCH_ERROR: u32 = 1 << 7;
/// The card will treat the next command as an application command
pub const R1_APP_CMD: u32 = 1 << 5;

// ****************************************************************************
// Types
// ****************************************************************************

/// How long a response is, and whether the card signals busy after it.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ResponseLength {
    /// No response at all
    None,
    /// A 48-bit response
    Bits48,
    /// A 48-bit response, then DAT0 held low while the card is busy
    Bits48Busy,
    /// A 136-bit response (CID and CSD)
    Bits136,
}

/// The response format a command expects.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ResponseType {
    /// No response
    None,
    /// Normal response, carries the card status
    R1,
    /// R1 with busy signalled on DAT0
    R1b,
    /// CID or CSD register
    R2,
    /// OCR register, no CRC
    R3,
    /// Published RCA (SD)
    R6,
    /// Card interface condition (SD)
    R7,
}

impl ResponseType {
    /// How long the response is on the wire
    pub const fn length(self) -> ResponseLength {
        match self {
            ResponseType::None => ResponseLength::None,
            ResponseType::R1b => ResponseLength::Bits48Busy,
            ResponseType::R2 => ResponseLength::Bits136,
            ResponseType::R1 | ResponseType::R3 | ResponseType::R6 | ResponseType::R7 => {
                ResponseLength::Bits48
            }
        }
    }

    /// Should the controller check the response CRC?
    pub const fn crc_check(self) -> bool {
        !matches!(self, ResponseType::None | ResponseType::R3)
    }

    /// Should the controller check the response echoes the command index?
    pub const fn index_check(self) -> bool {
        !matches!(
            self,
            ResponseType::None | ResponseType::R2 | ResponseType::R3
        )
    }

    /// Does the card signal busy on DAT0 after this response?
    pub const fn is_busy(self) -> bool {
        matches!(self, ResponseType::R1b)
    }
}

/// A command to send to the card.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Command {
    /// The command index (0..=63)
    pub index: u8,
    /// The 32-bit argument
    pub arg: u32,
    /// The response we expect
    pub response: ResponseType,
}

impl Command {
    /// Make a new command
    pub const fn new(index: u8, arg: u32, response: ResponseType) -> Command {
        Command {
            index,
            arg,
            response,
        }
    }
}

/// A response from the card.
///
/// Short responses live in word 0. Long (136-bit) responses fill all four
/// words, most significant word first, with the CRC byte as zero.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct Response(pub [u32; 4]);

impl Response {
    /// A short response, as the card sent it
    pub const fn short(value: u32) -> Response {
        Response([value, 0, 0, 0])
    }

    /// The 32-bit payload of a short response
    pub const fn value(&self) -> u32 {
        self.0[0]
    }

    /// A long response as 16 bytes, in the order they came off the wire
    pub fn to_bytes(&self) -> [u8; 16] {
        let mut bytes = [0u8; 16];
        for (chunk, word) in bytes.chunks_exact_mut(4).zip(self.0.iter()) {
            chunk.copy_from_slice(&word.to_be_bytes());
        }
        bytes
    }
}

/// The buffer for the data phase of a command.
#[derive(Debug)]
pub enum DataBuffer<'a> {
    /// Card to host
    Read(&'a mut [u8]),
    /// Host to card
    Write(&'a [u8]),
}

/// The data phase of a command.
#[derive(Debug)]
pub struct Data<'a> {
    /// Where the data comes from or goes to
    pub buffer: DataBuffer<'a>,
    /// Bytes per block
    pub block_size: u32,
    /// Number of blocks
    pub block_count: u32,
}

impl<'a> Data<'a> {
    /// Read `block_count` blocks of `block_size` bytes into `buffer`
    pub fn read(buffer: &'a mut [u8], block_size: u32, block_count: u32) -> Data<'a> {
        Data {
            buffer: DataBuffer::Read(buffer),
            block_size,
            block_count,
        }
    }

    /// Write `block_count` blocks of `block_size` bytes from `buffer`
    pub fn write(buffer: &'a [u8], block_size: u32, block_count: u32) -> Data<'a> {
        Data {
            buffer: DataBuffer::Write(buffer),
            block_size,
            block_count,
        }
    }

    /// Is data coming from the card?
    pub fn is_read(&self) -> bool {
        matches!(self.buffer, DataBuffer::Read(_))
    }

    /// Total bytes in the data phase
    pub fn len(&self) -> usize {
        self.block_size as usize * self.block_count as usize
    }

    /// Is there nothing to transfer?
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Does the buffer hold the whole data phase?
    pub fn buffer_fits(&self) -> bool {
        let available = match &self.buffer {
            DataBuffer::Read(buf) => buf.len(),
            DataBuffer::Write(buf) => buf.len(),
        };
        available >= self.len()
    }
}


// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
