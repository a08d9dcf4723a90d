//! Flash geometry and 24-bit address packing.
//!
//! A sector index occupies the top 12 bits of the address (`A23..A12`), the
//! page within the sector the next 4 bits (`A11..A8`) and the low byte is
//! always zero for the commands issued here.

/// Erase granularity.
pub const SECTOR_SIZE: usize = 4096;
/// Program granularity.
pub const PAGE_SIZE: usize = 256;
/// Pages per sector.
pub const PAGES_PER_SECTOR: usize = SECTOR_SIZE / PAGE_SIZE;
/// Chunk size used when reading back for verification.
pub const VERIFY_CHUNK_SIZE: usize = 256;
/// Highest sector addressable with 24 address bits.
pub const MAX_SECTOR: u32 = 0x0FFF;

/// A 3-byte address as clocked out after the opcode, MSB first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FlashAddress(pub [u8; 3]);

impl FlashAddress {
    pub const ZERO: FlashAddress = FlashAddress([0, 0, 0]);

    /// Address of page `page` (0..16) inside sector `sector`.
    ///
    /// Returns `None` if the sector does not fit into 24 address bits or the
    /// page is outside the sector.
    pub fn sector_page(sector: u32, page: u8) -> Option<Self> {
        if sector > MAX_SECTOR || page as usize >= PAGES_PER_SECTOR {
            return None;
        }
        Some(FlashAddress([
            (sector >> 4) as u8,
            (((sector & 0xF) << 4) as u8) + page,
            0,
        ]))
    }

    /// Start address of `sector`, as sent with the sector erase command.
    pub fn sector(sector: u32) -> Option<Self> {
        Self::sector_page(sector, 0)
    }

    /// Address of the `chunk`-th 256-byte read-back chunk.
    pub fn verify_chunk(chunk: u32) -> Option<Self> {
        if chunk > 0xFFFF {
            return None;
        }
        Some(FlashAddress([(chunk >> 8) as u8, (chunk & 0xFF) as u8, 0]))
    }

    /// Arbitrary byte address, truncated to 24 bits.
    #[cfg(test)]
    pub(crate) fn from_u32(addr: u32) -> Self {
        FlashAddress([(addr >> 16) as u8, (addr >> 8) as u8, addr as u8])
    }

    pub fn as_u32(&self) -> u32 {
        u32::from(self.0[0]) << 16 | u32::from(self.0[1]) << 8 | u32::from(self.0[2])
    }

    /// Splits the address back into `(sector, byte offset within sector)`.
    #[cfg(test)]
    pub(crate) fn to_sector_offset(&self) -> (u32, u32) {
        let addr = self.as_u32();
        (addr / SECTOR_SIZE as u32, addr % SECTOR_SIZE as u32)
    }
}

impl core::fmt::Display for FlashAddress {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "0x{:06x}", self.as_u32())
    }
}

/// Sector holding byte offset `offset` of the bitstream.
#[cfg(test)]
pub(crate) fn sector_of(offset: usize) -> u32 {
    (offset / SECTOR_SIZE) as u32
}

/// Number of sectors a bitstream of `len` bytes occupies.
#[cfg(test)]
pub(crate) fn sector_count(len: usize) -> u32 {
    len.div_ceil(SECTOR_SIZE) as u32
}

/// Number of page program commands needed for a chunk of `chunk_len` bytes.
#[cfg(test)]
pub(crate) fn page_count(chunk_len: usize) -> u32 {
    chunk_len.div_ceil(PAGE_SIZE) as u32
}

/// Pages written into the last sector of a bitstream of `len` bytes.
#[cfg(test)]
pub(crate) fn final_sector_pages(len: usize) -> u32 {
    match len % SECTOR_SIZE {
        0 if len == 0 => 0,
        0 => PAGES_PER_SECTOR as u32,
        rem => page_count(rem),
    }
}
