/// Refer to datasheet:
/// https://datasheet.lcsc.com/lcsc/1912111437_Winbond-Elec-W25Q128JVSIQ_C113767.pdf
use bitflags::bitflags;

/// The fixed command set used to program the FPGA boot flash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Opcode {
    /// Page program, up to 256 bytes after a 24-bit address.
    Write = 0x02,
    /// Read data from a 24-bit address.
    Read = 0x03,
    /// Read status register 1.
    ReadStatus = 0x05,
    /// Set the write enable latch.
    WriteEnable = 0x06,
    /// Erase one 4 KiB sector.
    SectorErase = 0x20,
    /// Read the 8-bit manufacturer and device IDs.
    Identify = 0x90,
    /// Wake the device from deep power-down.
    ReleasePowerDown = 0xAB,
}

impl Opcode {
    #[cfg(test)]
    pub(crate) const ALL: [Opcode; 7] = [
        Opcode::Write,
        Opcode::Read,
        Opcode::ReadStatus,
        Opcode::WriteEnable,
        Opcode::SectorErase,
        Opcode::Identify,
        Opcode::ReleasePowerDown,
    ];

    #[cfg(test)]
    pub(crate) fn from_byte(byte: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|op| *op as u8 == byte)
    }
}

bitflags! {
    /// Status register 1 bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Status: u8 {
        /// Erase or write in progress.
        const BUSY = 1 << 0;
        /// Status of the **W**rite **E**nable **L**atch.
        const WEL = 1 << 1;
        /// The 3 protection region bits.
        const PROT = 0b0001_1100;
        /// **S**tatus **R**egister **W**rite **D**isable bit.
        const SRWD = 1 << 7;
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Status {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "Status({=u8:#04x})", self.bits())
    }
}
