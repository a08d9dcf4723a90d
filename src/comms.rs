/// Refer to datasheet:
/// https://datasheet.lcsc.com/lcsc/1912111437_Winbond-Elec-W25Q128JVSIQ_C113767.pdf
use core::fmt::Debug;

use embedded_hal::delay::DelayNs;
use embedded_hal::spi::{Operation, SpiDevice};

use crate::config::FlashTiming;
use crate::error::Error;
use crate::geometry::FlashAddress;
use crate::opcode::{Opcode, Status};
use crate::poll::{CancelToken, Poller, Wait};
use crate::traits::FlashDevice;

/// Largest number of don't-care bytes a command may clock in after its header.
pub const MAX_DUMMY: usize = 8;

/// One framed command: opcode, optional 24-bit address, optional dummy bytes.
/// The read length is given by the response buffer passed along with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FlashCommand {
    pub opcode: Opcode,
    pub address: Option<FlashAddress>,
    pub dummy_len: usize,
}

impl FlashCommand {
    pub const fn new(opcode: Opcode) -> Self {
        Self {
            opcode,
            address: None,
            dummy_len: 0,
        }
    }

    pub const fn at(mut self, address: FlashAddress) -> Self {
        self.address = Some(address);
        self
    }

    pub const fn with_dummy(mut self, dummy_len: usize) -> Self {
        self.dummy_len = dummy_len;
        self
    }

    /// Opcode followed by the address bytes, if any.
    pub fn header(&self) -> ([u8; 4], usize) {
        let mut buf = [self.opcode as u8, 0, 0, 0];
        match self.address {
            Some(FlashAddress(addr)) => {
                buf[1..].copy_from_slice(&addr);
                (buf, 4)
            }
            None => (buf, 1),
        }
    }
}

/// Manufacturer/device identification as returned by the identify command.
///
/// The first byte is clocked in while the chip is still receiving its
/// address phase and carries no information.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FlashId(pub [u8; 3]);

impl FlashId {
    pub fn manufacturer(&self) -> u8 {
        self.0[1]
    }

    pub fn device(&self) -> u8 {
        self.0[2]
    }
}

impl core::fmt::Display for FlashId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", crate::fmt::HexBytes(&self.0))
    }
}

pub struct FlashTransport<'a, SPI, D> {
    spi: SPI,
    delay: D,
    timing: FlashTiming,
    cancel: Option<&'a CancelToken>,
}

impl<SPI, D> Debug for FlashTransport<'_, SPI, D> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "FlashTransport")
    }
}

impl<'a, SPI, D> FlashTransport<'a, SPI, D>
where
    SPI: SpiDevice,
    D: DelayNs,
{
    pub fn new(spi: SPI, delay: D) -> Self {
        Self {
            spi,
            delay,
            timing: FlashTiming::default(),
            cancel: None,
        }
    }

    pub fn with_timing(mut self, timing: FlashTiming) -> Self {
        self.timing = timing;
        self
    }

    pub fn with_cancel(mut self, cancel: &'a CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn timing(&self) -> &FlashTiming {
        &self.timing
    }

    /// Ends the session, handing back the device and delay.
    pub fn release(self) -> (SPI, D) {
        (self.spi, self.delay)
    }

    /// Sends `cmd` as one chip-select framed transfer: header, `dummy_len`
    /// discarded bytes, then `response.len()` bytes read into `response`.
    pub fn send_command(
        &mut self,
        cmd: FlashCommand,
        response: &mut [u8],
    ) -> Result<(), Error<SPI::Error>> {
        if cmd.dummy_len > MAX_DUMMY {
            return Err(Error::DummyTooLong(cmd.dummy_len));
        }
        let (header, len) = cmd.header();
        let header = &header[..len];
        let mut dummy = [0u8; MAX_DUMMY];
        let dummy = &mut dummy[..cmd.dummy_len];

        let result = match (dummy.is_empty(), response.is_empty()) {
            (true, true) => self.spi.transaction(&mut [Operation::Write(header)]),
            (true, false) => self
                .spi
                .transaction(&mut [Operation::Write(header), Operation::Read(response)]),
            (false, true) => self
                .spi
                .transaction(&mut [Operation::Write(header), Operation::Read(dummy)]),
            (false, false) => self.spi.transaction(&mut [
                Operation::Write(header),
                Operation::Read(dummy),
                Operation::Read(response),
            ]),
        };
        result.map_err(Error::Spi)
    }

    /// Sends `cmd` followed by `payload` within the same chip-select frame.
    pub fn send_command_with_payload(
        &mut self,
        cmd: FlashCommand,
        payload: &[u8],
    ) -> Result<(), Error<SPI::Error>> {
        let (header, len) = cmd.header();
        self.spi
            .transaction(&mut [Operation::Write(&header[..len]), Operation::Write(payload)])
            .map_err(Error::Spi)
    }

    /// Reads the status register.
    pub fn read_status(&mut self) -> Result<Status, Error<SPI::Error>> {
        let mut response = [0u8; 1];
        self.send_command(FlashCommand::new(Opcode::ReadStatus), &mut response)?;
        Ok(Status::from_bits_truncate(response[0]))
    }

    pub fn is_busy(&mut self) -> Result<bool, Error<SPI::Error>> {
        Ok(self.read_status()?.contains(Status::BUSY))
    }

    /// Wakes the chip from deep power-down and gives it time to come up.
    pub fn release_power_down(&mut self) -> Result<(), Error<SPI::Error>> {
        self.send_command(FlashCommand::new(Opcode::ReleasePowerDown), &mut [])?;
        self.delay.delay_ms(self.timing.wake_delay_ms);
        Ok(())
    }

    /// Reads the manufacturer and device IDs.
    pub fn read_id(&mut self) -> Result<FlashId, Error<SPI::Error>> {
        let mut id = [0u8; 3];
        self.send_command(FlashCommand::new(Opcode::Identify).with_dummy(2), &mut id)?;
        Ok(FlashId(id))
    }
}

impl<SPI, D> FlashDevice for FlashTransport<'_, SPI, D>
where
    SPI: SpiDevice,
    D: DelayNs,
{
    type BusError = SPI::Error;

    /// From datasheet section 8.2.1
    /// The Write Enable instruction sets the Write Enable Latch (WEL) bit
    /// in the Status Register to a 1. The WEL bit must be set prior to every
    /// Page Program and Sector Erase instruction.
    fn write_enable(&mut self) -> Result<(), Error<SPI::Error>> {
        self.send_command(FlashCommand::new(Opcode::WriteEnable), &mut [])
    }

    /// Sector erase (see datasheet 8.2.15)
    /// Sets all memory within the addressed 4K-byte sector to 0xFF. The
    /// chip stays busy until the erase completes; poll with `wait_idle`.
    fn sector_erase(&mut self, addr: FlashAddress) -> Result<(), Error<SPI::Error>> {
        self.send_command(FlashCommand::new(Opcode::SectorErase).at(addr), &mut [])
    }

    /// From datasheet section 8.2.13
    /// The /CS pin must be held low for the entire length of the instruction
    /// while data is being sent to the device. Bytes past the end of the page
    /// wrap around to its start.
    fn page_program(&mut self, addr: FlashAddress, data: &[u8]) -> Result<(), Error<SPI::Error>> {
        self.send_command_with_payload(FlashCommand::new(Opcode::Write).at(addr), data)
    }

    /// From datasheet section 8.2.6 (Read Data (03h))
    /// Only 24 bits of address are transferred to the device, limiting the
    /// maximum size of 25-series SPI flash chips to 16 MiB.
    fn read(&mut self, addr: FlashAddress, buf: &mut [u8]) -> Result<(), Error<SPI::Error>> {
        self.send_command(FlashCommand::new(Opcode::Read).at(addr), buf)
    }

    fn wait_idle(&mut self, wait: Wait) -> Result<u32, Error<SPI::Error>> {
        let mut poller = Poller::new(wait, self.timing.busy_poll, self.cancel);
        while self.is_busy()? {
            trace!("flash busy ({:?})", wait);
            let us = poller.next_delay_us()?;
            self.delay.delay_us(us);
        }
        if poller.polls() > 0 {
            debug!("flash idle after {} polls", poller.polls());
        }
        Ok(poller.polls())
    }
}
