//! eSDHC register map and register access.
//!
//! Everything in the controller is a 32-bit register at a fixed offset from
//! the base address. [`RegisterShim`] is the only way the driver touches
//! them, so tests can swap in a simulated controller.

// ============================================================================
// Register offsets
// ============================================================================

/// DMA system address
pub const DSADDR: usize = 0x00;
/// Block attributes: block count (31:16) and block size (12:0)
pub const BLKATTR: usize = 0x04;
/// Command argument
pub const CMDARG: usize = 0x08;
/// Transfer type. Writing this register issues the command.
pub const XFERTYP: usize = 0x0C;
/// Command response 0 (bits 39:8 of the response)
pub const CMDRSP0: usize = 0x10;
/// Command response 1
pub const CMDRSP1: usize = 0x14;
/// Command response 2
pub const CMDRSP2: usize = 0x18;
/// Command response 3
pub const CMDRSP3: usize = 0x1C;
/// Buffer data port
pub const DATPORT: usize = 0x20;
/// Present state
pub const PRSSTAT: usize = 0x24;
/// Protocol control
pub const PROCTL: usize = 0x28;
/// System control
pub const SYSCTL: usize = 0x2C;
/// Interrupt status, write one to clear
pub const IRQSTAT: usize = 0x30;
/// Interrupt status enable
pub const IRQSTATEN: usize = 0x34;
/// Interrupt signal enable
pub const IRQSIGEN: usize = 0x38;
/// Auto CMD12 error status
pub const AUTOC12ERR: usize = 0x3C;
/// Host controller capabilities
pub const HOSTCAPBLT: usize = 0x40;
/// Watermark level
pub const WML: usize = 0x44;

// ============================================================================
// SYSCTL
// ============================================================================

/// Initialisation active: send 80 clocks to the card
pub const SYSCTL_INITA: u32 = 0x0800_0000;
/// Software reset for the whole controller
pub const SYSCTL_RSTA: u32 = 0x0100_0000;
/// Software reset for the command line
pub const SYSCTL_RSTC: u32 = 0x0200_0000;
/// Software reset for the data line
pub const SYSCTL_RSTD: u32 = 0x0400_0000;
/// Data timeout counter value
pub const SYSCTL_TIMEOUT_MASK: u32 = 0x000F_0000;
/// Clock prescaler and divisor fields together
pub const SYSCTL_CLOCK_MASK: u32 = 0x0000_FFF0;
/// Card clock enable
pub const SYSCTL_CKEN: u32 = 0x0000_0008;
/// Peripheral clock enable
pub const SYSCTL_PEREN: u32 = 0x0000_0004;
/// System clock enable
pub const SYSCTL_HCKEN: u32 = 0x0000_0002;
/// IPG clock enable
pub const SYSCTL_IPGEN: u32 = 0x0000_0001;

// ============================================================================
// IRQSTAT / IRQSTATEN / IRQSIGEN
// ============================================================================

/// DMA error
pub const IRQSTAT_DMAE: u32 = 0x1000_0000;
/// Auto CMD12 error
pub const IRQSTAT_AC12E: u32 = 0x0100_0000;
/// Data end bit error
pub const IRQSTAT_DEBE: u32 = 0x0040_0000;
/// Data CRC error
pub const IRQSTAT_DCE: u32 = 0x0020_0000;
/// Data timeout error
pub const IRQSTAT_DTOE: u32 = 0x0010_0000;
/// Command index error
pub const IRQSTAT_CIE: u32 = 0x0008_0000;
/// Command end bit error
pub const IRQSTAT_CEBE: u32 = 0x0004_0000;
/// Command CRC error
pub const IRQSTAT_CCE: u32 = 0x0002_0000;
/// Command timeout error
pub const IRQSTAT_CTOE: u32 = 0x0001_0000;
/// Buffer read ready
pub const IRQSTAT_BRR: u32 = 0x0000_0020;
/// Buffer write ready
pub const IRQSTAT_BWR: u32 = 0x0000_0010;
/// DMA interrupt
pub const IRQSTAT_DINT: u32 = 0x0000_0008;
/// Transfer complete
pub const IRQSTAT_TC: u32 = 0x0000_0002;
/// Command complete
pub const IRQSTAT_CC: u32 = 0x0000_0001;

/// Errors on the command line
pub const CMD_ERR: u32 = IRQSTAT_CIE | IRQSTAT_CEBE | IRQSTAT_CCE;
/// Errors on the data lines
pub const DATA_ERR: u32 = IRQSTAT_DEBE | IRQSTAT_DCE | IRQSTAT_DTOE | IRQSTAT_DMAE;
/// Everything the controller can flag
pub const IRQSTATEN_ALL: u32 = 0x117F_01FF;

// ============================================================================
// PRSSTAT
// ============================================================================

/// Level of DAT0; low while the card is busy
pub const PRSSTAT_DAT0: u32 = 0x0100_0000;
/// Level of CMD
pub const PRSSTAT_CLSL: u32 = 0x0080_0000;
/// Write protect switch. Set when writes are allowed.
pub const PRSSTAT_WPSPL: u32 = 0x0008_0000;
/// Card detect pin level
pub const PRSSTAT_CDPL: u32 = 0x0004_0000;
/// Card inserted
pub const PRSSTAT_CINS: u32 = 0x0001_0000;
/// Buffer read enable
pub const PRSSTAT_BREN: u32 = 0x0000_0800;
/// Buffer write enable
pub const PRSSTAT_BWEN: u32 = 0x0000_0400;
/// SD clock stable
pub const PRSSTAT_SDSTB: u32 = 0x0000_0008;
/// Data line active
pub const PRSSTAT_DLA: u32 = 0x0000_0004;
/// Command inhibit (DAT)
pub const PRSSTAT_CDIHB: u32 = 0x0000_0002;
/// Command inhibit (CMD)
pub const PRSSTAT_CIHB: u32 = 0x0000_0001;

// ============================================================================
// PROCTL
// ============================================================================

/// Send initialisation clocks
pub const PROCTL_INIT: u32 = 0x0000_0020;
/// Data transfer width field
pub const PROCTL_DTW_MASK: u32 = 0x0000_0006;
/// 4-bit data transfer width
pub const PROCTL_DTW_4: u32 = 0x0000_0002;
/// 8-bit data transfer width
pub const PROCTL_DTW_8: u32 = 0x0000_0004;

// ============================================================================
// XFERTYP
// ============================================================================

/// Command index field
pub const fn xfertyp_cmd(index: u8) -> u32 {
    ((index & 0x3F) as u32) << 24
}
/// Command type: abort (CMD12)
pub const XFERTYP_CMDTYP_ABORT: u32 = 0x00C0_0000;
/// Data present
pub const XFERTYP_DPSEL: u32 = 0x0020_0000;
/// Command index check enable
pub const XFERTYP_CICEN: u32 = 0x0010_0000;
/// Command CRC check enable
pub const XFERTYP_CCCEN: u32 = 0x0008_0000;
/// 136-bit response
pub const XFERTYP_RSPTYP_136: u32 = 0x0001_0000;
/// 48-bit response
pub const XFERTYP_RSPTYP_48: u32 = 0x0002_0000;
/// 48-bit response, check busy after response
pub const XFERTYP_RSPTYP_48_BUSY: u32 = 0x0003_0000;
/// Response type field
pub const XFERTYP_RSPTYP_MASK: u32 = 0x0003_0000;
/// Multiple block select
pub const XFERTYP_MSBSEL: u32 = 0x0000_0020;
/// Data transfer direction: card to host
pub const XFERTYP_DTDSEL: u32 = 0x0000_0010;
/// Auto CMD12 enable
pub const XFERTYP_AC12EN: u32 = 0x0000_0004;
/// Block count enable
pub const XFERTYP_BCEN: u32 = 0x0000_0002;
/// DMA enable
pub const XFERTYP_DMAEN: u32 = 0x0000_0001;

// ============================================================================
// WML
// ============================================================================

/// Read watermark level field
pub const WML_RD_WML_MASK: u32 = 0x0000_00FF;
/// Largest read watermark, in words
pub const WML_RD_WML_MAX: u32 = 0x10;
/// Write watermark level field
pub const WML_WR_WML_MASK: u32 = 0x00FF_0000;
/// Largest write watermark, in words
pub const WML_WR_WML_MAX: u32 = 0x80;
/// Shift of the write watermark field
pub const WML_WR_WML_SHIFT: u32 = 16;

// ============================================================================
// HOSTCAPBLT
// ============================================================================

/// 1.8V supported
pub const HOSTCAPBLT_VS18: u32 = 0x0400_0000;
/// 3.0V supported
pub const HOSTCAPBLT_VS30: u32 = 0x0200_0000;
/// 3.3V supported
pub const HOSTCAPBLT_VS33: u32 = 0x0100_0000;
/// Suspend/resume supported
pub const HOSTCAPBLT_SRS: u32 = 0x0080_0000;
/// DMA supported
pub const HOSTCAPBLT_DMAS: u32 = 0x0040_0000;
/// High speed supported
pub const HOSTCAPBLT_HSS: u32 = 0x0020_0000;

/// The largest BLKATTR block count
pub const MAX_BLOCK_COUNT: u32 = 0xFFFF;
/// The largest BLKATTR block size
pub const MAX_BLOCK_SIZE: u32 = 0x1FFF;

// ============================================================================
// Access
// ============================================================================

/// Access to the controller's registers.
///
/// Offsets are the byte offsets above.
pub trait RegisterShim {
    /// Read a register
    fn read32(&mut self, offset: usize) -> u32;

    /// Write a register
    fn write32(&mut self, offset: usize, value: u32);

    /// Read a word from the data port.
    ///
    /// The data port always carries little-endian data, whatever the
    /// endianness of the other registers.
    fn read_data_port(&mut self) -> u32 {
        self.read32(DATPORT)
    }

    /// Write a word to the data port
    fn write_data_port(&mut self, value: u32) {
        self.write32(DATPORT, value)
    }

    /// The bus address the DMA engine should use for this buffer.
    ///
    /// The engine takes 32-bit addresses. `None` means it can't reach the
    /// buffer, and the transfer goes through the data port instead. The
    /// default assumes bus and CPU addresses are the same.
    fn dma_address(&mut self, buffer: *const u8) -> Option<u32> {
        u32::try_from(buffer as usize).ok()
    }

    /// Set bits in a register
    fn set_bits(&mut self, offset: usize, bits: u32) {
        let value = self.read32(offset);
        self.write32(offset, value | bits);
    }

    /// Clear bits in a register
    fn clear_bits(&mut self, offset: usize, bits: u32) {
        let value = self.read32(offset);
        self.write32(offset, value & !bits);
    }

    /// Clear one set of bits and set another, in one write
    fn clear_set_bits(&mut self, offset: usize, clear: u32, set: u32) {
        let value = self.read32(offset);
        self.write32(offset, (value & !clear) | set);
    }
}

/// Byte order of the controller's registers.
///
/// Layerscape parts wire the eSDHC up big-endian, i.MX parts little-endian.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RegisterEndian {
    /// Registers are little-endian
    Little,
    /// Registers are big-endian
    Big,
}

/// Real memory-mapped registers.
#[derive(Debug)]
pub struct MmioRegisters {
    base: *mut u32,
    endian: RegisterEndian,
}

impl MmioRegisters {
    /// Wrap the controller at `base`.
    ///
    /// # Safety
    ///
    /// `base` must be the address of an eSDHC register block, mapped as
    /// device memory, and nothing else may access it while this object
    /// exists.
    pub unsafe fn new(base: usize, endian: RegisterEndian) -> MmioRegisters {
        MmioRegisters {
            base: base as *mut u32,
            endian,
        }
    }

    fn register(&self, offset: usize) -> *mut u32 {
        self.base.wrapping_byte_add(offset)
    }
}

impl RegisterShim for MmioRegisters {
    fn read32(&mut self, offset: usize) -> u32 {
        // Safety: `new` promised us exclusive access to a register block
        let raw = unsafe { core::ptr::read_volatile(self.register(offset)) };
        match self.endian {
            RegisterEndian::Little => u32::from_le(raw),
            RegisterEndian::Big => u32::from_be(raw),
        }
    }

    fn write32(&mut self, offset: usize, value: u32) {
        let raw = match self.endian {
            RegisterEndian::Little => value.to_le(),
            RegisterEndian::Big => value.to_be(),
        };
        // Safety: `new` promised us exclusive access to a register block
        unsafe { core::ptr::write_volatile(self.register(offset), raw) }
    }

    fn read_data_port(&mut self) -> u32 {
        // Safety: `new` promised us exclusive access to a register block
        u32::from_le(unsafe { core::ptr::read_volatile(self.register(DATPORT)) })
    }

    fn write_data_port(&mut self, value: u32) {
        // Safety: `new` promised us exclusive access to a register block
        unsafe { core::ptr::write_volatile(self.register(DATPORT), value.to_le()) }
    }
}


// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
