use embedded_hal::digital;
use embedded_hal::pwm::SetDutyCycle;

use crate::error::Error;
use crate::geometry::FlashAddress;
use crate::poll::Wait;

/// Command-level access to a 25-series NOR flash.
///
/// Each method issues exactly one command frame, except `wait_idle` which
/// polls the status register until the busy bit reads clear.
pub trait FlashDevice {
    type BusError;

    /// Sets the write enable latch. Needed before every erase and program.
    fn write_enable(&mut self) -> Result<(), Error<Self::BusError>>;

    /// Sets all memory within the sector starting at `addr` to 0xFF.
    fn sector_erase(&mut self, addr: FlashAddress) -> Result<(), Error<Self::BusError>>;

    /// Programs one byte to 256 bytes (a page) of previously erased memory.
    fn page_program(&mut self, addr: FlashAddress, data: &[u8])
        -> Result<(), Error<Self::BusError>>;

    /// Reads flash contents into `buf`, starting at `addr`.
    fn read(&mut self, addr: FlashAddress, buf: &mut [u8]) -> Result<(), Error<Self::BusError>>;

    /// Blocks until the busy bit clears. Returns how many polls found it set.
    fn wait_idle(&mut self, wait: Wait) -> Result<u32, Error<Self::BusError>>;
}

/// Async flavour of [`FlashDevice`].
#[allow(async_fn_in_trait)]
pub trait AsyncFlashDevice {
    type BusError;

    async fn write_enable(&mut self) -> Result<(), Error<Self::BusError>>;

    async fn sector_erase(&mut self, addr: FlashAddress) -> Result<(), Error<Self::BusError>>;

    async fn page_program(
        &mut self,
        addr: FlashAddress,
        data: &[u8],
    ) -> Result<(), Error<Self::BusError>>;

    async fn read(
        &mut self,
        addr: FlashAddress,
        buf: &mut [u8],
    ) -> Result<(), Error<Self::BusError>>;

    async fn wait_idle(&mut self, wait: Wait) -> Result<u32, Error<Self::BusError>>;
}

/// Where bitstreams come from. A missing name means "nothing to program".
pub trait BitstreamStore {
    type Reader<'a>: embedded_io::Read
    where
        Self: 'a;

    /// Opens `name` for a fresh read from its first byte.
    fn open(&mut self, name: &str) -> Option<Self::Reader<'_>>;
}

/// A store holding one named image, e.g. linked into firmware.
#[derive(Debug, Clone, Copy)]
pub struct SingleImage<'a> {
    name: &'a str,
    data: &'a [u8],
}

impl<'a> SingleImage<'a> {
    pub fn new(name: &'a str, data: &'a [u8]) -> Self {
        Self { name, data }
    }
}

impl<'a> BitstreamStore for SingleImage<'a> {
    type Reader<'r>
        = &'a [u8]
    where
        Self: 'r;

    fn open(&mut self, name: &str) -> Option<Self::Reader<'_>> {
        (name == self.name).then_some(self.data)
    }
}

/// A pin that can be returned to high impedance (deinitialized).
///
/// Floating is not terminal: a later `OutputPin::set_low` or `set_high` on
/// the same pin must put the line back into output mode and drive it. The
/// FPGA controller floats creset at the end of every stop and drives it
/// again on the next stop or start.
pub trait HighZ: digital::ErrorType {
    fn float(&mut self) -> Result<(), Self::Error>;
}

/// The board's GPIO lines, addressed by number.
pub trait GpioBank {
    type Error: digital::Error;

    /// Number of line indices to consider, including absent ones.
    fn line_count(&self) -> u8;

    /// Sets `line` to a floating input. `Ok(false)` if the board has no such line.
    fn float(&mut self, line: u8) -> Result<bool, Self::Error>;
}

/// PWM output used as the FPGA configuration clock.
pub trait ConfigClock: SetDutyCycle {
    fn set_frequency(&mut self, hz: u32) -> Result<(), Self::Error>;
}
