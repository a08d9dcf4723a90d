//! The programming session: park the board, stop the FPGA, rewrite and
//! verify the boot flash if a bitstream is available, then boot the FPGA.
use core::fmt::{self, Debug, Display};

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{self, Error as _, InputPin, OutputPin};
use embedded_hal::spi::SpiDevice;

use crate::board::{float_unused_pins, BoardVariant, PinMap};
use crate::comms::{FlashId, FlashTransport};
use crate::config::FlashTiming;
use crate::error::{ConfigError, Error};
use crate::fpga::ConfigController;
use crate::poll::CancelToken;
use crate::programmer::{ProgramReport, SectorProgrammer};
use crate::traits::{BitstreamStore, ConfigClock, GpioBank, HighZ};
use crate::verify::{Mismatch, Verification, Verifier, HEAD_LEN};

/// Result of a session that found a bitstream and wrote it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Programmed {
    pub id: FlashId,
    pub report: ProgramReport,
    /// First bytes of flash after a successful verify.
    pub head: [u8; HEAD_LEN],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RunOutcome {
    /// `None` when no bitstream was requested or it does not exist.
    pub programmed: Option<Programmed>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BootOutcome {
    pub run: RunOutcome,
    /// Level of the done input when start returned.
    pub done: bool,
}

pub enum SessionError<E> {
    Flash(Error<E>),
    Config(ConfigError),
    /// Parking unused GPIO lines failed.
    Gpio(digital::ErrorKind),
    /// Flash contents differ from the bitstream; the FPGA was not started.
    VerifyMismatch(Mismatch),
}

impl<E> From<Error<E>> for SessionError<E> {
    fn from(err: Error<E>) -> Self {
        SessionError::Flash(err)
    }
}

impl<E> From<ConfigError> for SessionError<E> {
    fn from(err: ConfigError) -> Self {
        SessionError::Config(err)
    }
}

#[cfg(feature = "defmt")]
impl<E> defmt::Format for SessionError<E> {
    fn format(&self, fmt: defmt::Formatter) {
        match self {
            SessionError::Flash(e) => defmt::write!(fmt, "SessionError::Flash({})", e),
            SessionError::Config(e) => defmt::write!(fmt, "SessionError::Config({})", e),
            SessionError::Gpio(kind) => defmt::write!(fmt, "SessionError::Gpio({})", kind),
            SessionError::VerifyMismatch(m) => {
                defmt::write!(fmt, "SessionError::VerifyMismatch({})", m)
            }
        }
    }
}

impl<E: Debug> Debug for SessionError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Flash(e) => write!(f, "SessionError::Flash({:?})", e),
            SessionError::Config(e) => write!(f, "SessionError::Config({:?})", e),
            SessionError::Gpio(kind) => write!(f, "SessionError::Gpio({:?})", kind),
            SessionError::VerifyMismatch(m) => write!(f, "SessionError::VerifyMismatch({:?})", m),
        }
    }
}

impl<E: Debug> Display for SessionError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Flash(e) => write!(f, "flash: {}", e),
            SessionError::Config(e) => write!(f, "fpga: {}", e),
            SessionError::Gpio(kind) => write!(f, "could not park unused GPIO lines: {:?}", kind),
            SessionError::VerifyMismatch(m) => write!(f, "verify: {}", m),
        }
    }
}

fn not_found<E>() -> Error<E> {
    Error::Source(embedded_io::ErrorKind::NotFound)
}

/// Sequences one programming session over the board's hardware.
pub struct Orchestrator<'a, G, RST, DONE, CLK> {
    gpio: G,
    pins: PinMap,
    fpga: ConfigController<'a, RST, DONE, CLK>,
    flash_timing: FlashTiming,
    cancel: Option<&'a CancelToken>,
}

impl<G, RST, DONE, CLK> Debug for Orchestrator<'_, G, RST, DONE, CLK> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("pins", &self.pins)
            .field("fpga", &self.fpga)
            .finish()
    }
}

impl<'a, G, RST, DONE, CLK> Orchestrator<'a, G, RST, DONE, CLK>
where
    G: GpioBank,
    RST: OutputPin + HighZ,
    DONE: InputPin,
    CLK: ConfigClock,
{
    pub fn new(
        variant: BoardVariant,
        gpio: G,
        fpga: ConfigController<'a, RST, DONE, CLK>,
    ) -> Self {
        Self {
            gpio,
            pins: PinMap::for_variant(variant),
            fpga,
            flash_timing: FlashTiming::default(),
            cancel: None,
        }
    }

    pub fn with_flash_timing(mut self, timing: FlashTiming) -> Self {
        self.flash_timing = timing;
        self
    }

    /// Applies to the flash busy polls. The controller's own token, if any,
    /// is set on the [`ConfigController`] itself.
    pub fn with_cancel(mut self, cancel: &'a CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn pins(&self) -> &PinMap {
        &self.pins
    }

    pub fn fpga(&self) -> &ConfigController<'a, RST, DONE, CLK> {
        &self.fpga
    }

    /// Parks unused GPIO, stops the FPGA and, if `bitstream` names an image
    /// in `store`, writes it to flash through `spi` and verifies it.
    ///
    /// `spi` is only touched when there is something to program and is
    /// dropped before returning.
    pub fn run<SPI, D, S>(
        &mut self,
        spi: SPI,
        delay: &mut D,
        store: &mut S,
        bitstream: Option<&str>,
    ) -> Result<RunOutcome, SessionError<SPI::Error>>
    where
        SPI: SpiDevice,
        D: DelayNs,
        S: BitstreamStore,
    {
        float_unused_pins(&mut self.gpio, &self.pins).map_err(|e| SessionError::Gpio(e.kind()))?;
        self.fpga.stop(delay)?;

        let Some(name) = bitstream else {
            info!("no bitstream requested");
            return Ok(RunOutcome { programmed: None });
        };
        if store.open(name).is_none() {
            info!("bitstream {} not found, skipping flash", name);
            return Ok(RunOutcome { programmed: None });
        }

        info!("flashing FPGA gateware: {}", name);
        let mut flash = FlashTransport::new(spi, &mut *delay).with_timing(self.flash_timing);
        if let Some(cancel) = self.cancel {
            flash = flash.with_cancel(cancel);
        }

        flash.release_power_down()?;
        let id = flash.read_id()?;
        info!("flash ID: {}", id);

        let report = {
            let mut source = store.open(name).ok_or_else(not_found::<SPI::Error>)?;
            SectorProgrammer::new(&mut flash).program(&mut source)?
        };
        if report.bytes == 0 {
            warn!("bitstream {} is empty", name);
        }

        let verification = {
            let mut source = store.open(name).ok_or_else(not_found::<SPI::Error>)?;
            Verifier::new(&mut flash).verify(&mut source)?
        };
        if let Verification::Mismatch(m) = verification {
            error!("flash verify failed, FPGA left in reset");
            return Err(SessionError::VerifyMismatch(m));
        }

        let head = Verifier::new(&mut flash).read_head()?;
        Ok(RunOutcome {
            programmed: Some(Programmed { id, report, head }),
        })
    }

    /// Boots the FPGA from flash with a `clock_hz` configuration clock.
    pub fn start<D: DelayNs>(&mut self, delay: &mut D, clock_hz: u32) -> Result<bool, ConfigError> {
        self.fpga.start(delay, clock_hz)
    }

    /// [`run`](Self::run) followed by [`start`](Self::start).
    pub fn program_and_boot<SPI, D, S>(
        &mut self,
        spi: SPI,
        delay: &mut D,
        store: &mut S,
        bitstream: Option<&str>,
        clock_hz: u32,
    ) -> Result<BootOutcome, SessionError<SPI::Error>>
    where
        SPI: SpiDevice,
        D: DelayNs,
        S: BitstreamStore,
    {
        let run = self.run(spi, delay, store, bitstream)?;
        let done = self.start(delay, clock_hz)?;
        Ok(BootOutcome { run, done })
    }

    /// Ends the session, handing the hardware back.
    pub fn into_parts(self) -> (G, ConfigController<'a, RST, DONE, CLK>) {
        (self.gpio, self.fpga)
    }
}
