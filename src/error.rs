use core::fmt::{self, Debug, Display};
#[cfg(feature = "defmt")]
use defmt::{Format, Formatter};

use embedded_hal::{digital, pwm};

use crate::poll::{PollError, Wait};

/// The error type of the flash side of this library.
///
/// This encapsulates an SPI error `E` and adds its own protocol errors on top
/// of that.
pub enum Error<E> {
    /// An SPI transfer failed.
    Spi(E),
    /// A busy-poll exceeded its timeout.
    TimedOut(Wait),
    /// A busy-poll was cancelled through its token.
    Cancelled(Wait),
    /// The bitstream extends past the last sector addressable with 24 bits.
    SectorOutOfRange(u32),
    /// Reading the bitstream source failed.
    Source(embedded_io::ErrorKind),
    /// More dummy bytes requested than a command frame supports.
    DummyTooLong(usize),
}

impl<E> From<PollError> for Error<E> {
    fn from(err: PollError) -> Self {
        match err {
            PollError::TimedOut(wait) => Error::TimedOut(wait),
            PollError::Cancelled(wait) => Error::Cancelled(wait),
        }
    }
}

impl<E> Error<E> {
    pub fn source<S: embedded_io::Error>(err: S) -> Self {
        Error::Source(err.kind())
    }

    /// Maps the SPI error, keeping every protocol error as is.
    pub fn map_spi<F, T>(self, f: F) -> Error<T>
    where
        F: FnOnce(E) -> T,
    {
        match self {
            Error::Spi(e) => Error::Spi(f(e)),
            Error::TimedOut(w) => Error::TimedOut(w),
            Error::Cancelled(w) => Error::Cancelled(w),
            Error::SectorOutOfRange(s) => Error::SectorOutOfRange(s),
            Error::Source(k) => Error::Source(k),
            Error::DummyTooLong(n) => Error::DummyTooLong(n),
        }
    }
}

#[cfg(feature = "defmt")]
impl<E> Format for Error<E> {
    fn format(&self, fmt: Formatter) {
        match self {
            Error::Spi(_spi) => defmt::write!(fmt, "Error::Spi"),
            Error::TimedOut(wait) => defmt::write!(fmt, "Error::TimedOut({})", wait),
            Error::Cancelled(wait) => defmt::write!(fmt, "Error::Cancelled({})", wait),
            Error::SectorOutOfRange(s) => defmt::write!(fmt, "Error::SectorOutOfRange({})", s),
            Error::Source(_kind) => defmt::write!(fmt, "Error::Source"),
            Error::DummyTooLong(n) => defmt::write!(fmt, "Error::DummyTooLong({})", n),
        }
    }
}

impl<E: Debug> Debug for Error<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Spi(spi) => write!(f, "Error::Spi({:?})", spi),
            Error::TimedOut(wait) => write!(f, "Error::TimedOut({:?})", wait),
            Error::Cancelled(wait) => write!(f, "Error::Cancelled({:?})", wait),
            Error::SectorOutOfRange(s) => write!(f, "Error::SectorOutOfRange({})", s),
            Error::Source(kind) => write!(f, "Error::Source({:?})", kind),
            Error::DummyTooLong(n) => write!(f, "Error::DummyTooLong({})", n),
        }
    }
}

impl<E: Debug> Display for Error<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Spi(spi) => write!(f, "SPI transfer failed: {:?}", spi),
            Error::TimedOut(wait) => write!(f, "timed out waiting for {:?}", wait),
            Error::Cancelled(wait) => write!(f, "cancelled while waiting for {:?}", wait),
            Error::SectorOutOfRange(s) => write!(f, "sector {} is beyond the 24-bit address space", s),
            Error::Source(kind) => write!(f, "bitstream read failed: {:?}", kind),
            Error::DummyTooLong(n) => write!(f, "{} dummy bytes requested", n),
        }
    }
}

/// FPGA configuration sequencing errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// Driving the creset output failed.
    Reset(digital::ErrorKind),
    /// Reading the done input failed.
    Done(digital::ErrorKind),
    /// Starting or stopping the configuration clock failed.
    Clock(pwm::ErrorKind),
    TimedOut,
    Cancelled,
}

impl From<PollError> for ConfigError {
    fn from(err: PollError) -> Self {
        match err {
            PollError::TimedOut(_) => ConfigError::TimedOut,
            PollError::Cancelled(_) => ConfigError::Cancelled,
        }
    }
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Reset(kind) => write!(f, "creset output failed: {:?}", kind),
            ConfigError::Done(kind) => write!(f, "done input failed: {:?}", kind),
            ConfigError::Clock(kind) => write!(f, "configuration clock failed: {:?}", kind),
            ConfigError::TimedOut => f.write_str("timed out waiting for done"),
            ConfigError::Cancelled => f.write_str("cancelled while waiting for done"),
        }
    }
}
