//! The SD Configuration Register.

use super::SdVersion;

/// The 64-bit SD Configuration Register, as it came off the wire.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub struct Scr {
    /// The 8 bytes of the register, most significant first
    pub data: [u8; 8],
}

impl Scr {
    define_field!(scr_structure, u8, 0, 4, 4);
    define_field!(sd_spec, u8, 0, 0, 4);
    define_field!(data_stat_after_erase, bool, 1, 7);
    define_field!(sd_security, u8, 1, 4, 3);
    define_field!(sd_bus_widths, u8, 1, 0, 4);
    define_field!(sd_spec3, bool, 2, 7);

    /// The physical layer version the card claims
    ///
    /// Unknown values are treated as 1.0.
    pub fn version(&self) -> SdVersion {
        match self.sd_spec() {
            1 => SdVersion::V1_10,
            2 if self.sd_spec3() => SdVersion::V3,
            2 => SdVersion::V2,
            _ => SdVersion::V1_0,
        }
    }

    /// Does the card support a 4-bit data bus?
    pub fn supports_4bit(&self) -> bool {
        self.sd_bus_widths() & 0b0100 != 0
    }
}


// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
