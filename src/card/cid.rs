//! The Card Identification register.
//!
//! SD and MMC lay out the product name and serial number differently, so
//! those fields come in two flavours.

use crate::proto::Response;

/// The Card Identification register, 128 bits, as it came off the wire.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub struct Cid {
    /// The 16 bytes of the register, most significant first
    pub data: [u8; 16],
}

impl Cid {
    /// Take the CID from an R2 response
    pub fn from_response(response: &Response) -> Cid {
        Cid {
            data: response.to_bytes(),
        }
    }

    define_field!(manufacturer_id, u8, 0);
    define_field!(oem_id, u16, [(1, 0, 8), (2, 0, 8)]);
    define_field!(product_revision, u8, 8);
    define_field!(serial_number, u32, [(9, 0, 8), (10, 0, 8), (11, 0, 8), (12, 0, 8)]);
    define_field!(manufacturing_year_offset, u8, [(13, 0, 4), (14, 4, 4)]);
    define_field!(manufacturing_month, u8, 14, 0, 4);
    define_field!(mmc_product_revision, u8, 9);
    define_field!(mmc_serial_number, u32, [(10, 0, 8), (11, 0, 8), (12, 0, 8), (13, 0, 8)]);

    /// The five character SD product name
    pub fn product_name(&self) -> &[u8] {
        &self.data[3..8]
    }

    /// The six character MMC product name
    pub fn mmc_product_name(&self) -> &[u8] {
        &self.data[3..9]
    }

    /// The SD manufacturing year
    pub fn manufacturing_year(&self) -> u16 {
        2000 + u16::from(self.manufacturing_year_offset())
    }
}


// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
