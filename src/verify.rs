//! Read-back verification.
//!
//! The bitstream is re-read in 256-byte chunks and each chunk is compared
//! against the same range read from flash. The first differing byte ends the
//! run.
use embedded_io::Read;

use crate::error::Error;
use crate::fmt::HexBytes;
use crate::geometry::{FlashAddress, VERIFY_CHUNK_SIZE};
use crate::programmer::read_chunk;
use crate::traits::{AsyncFlashDevice, FlashDevice};

/// Length of the sanity readout taken from the start of flash.
pub const HEAD_LEN: usize = 16;

/// First byte where flash and bitstream disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Mismatch {
    /// Byte offset from the start of the bitstream (and of flash).
    pub offset: u32,
    pub expected: u8,
    pub actual: u8,
}

impl core::fmt::Display for Mismatch {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "mismatch at 0x{:06x}: expected 0x{:02x}, read 0x{:02x}",
            self.offset, self.expected, self.actual
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Verification {
    /// Every byte matched.
    Match { bytes: u32 },
    Mismatch(Mismatch),
}

impl Verification {
    pub fn is_match(&self) -> bool {
        matches!(self, Verification::Match { .. })
    }

    pub fn mismatch(&self) -> Option<Mismatch> {
        match self {
            Verification::Mismatch(m) => Some(*m),
            Verification::Match { .. } => None,
        }
    }
}

fn chunk_address<E>(chunk: u32) -> Result<FlashAddress, Error<E>> {
    FlashAddress::verify_chunk(chunk).ok_or(Error::SectorOutOfRange(chunk / 16))
}

fn compare(chunk: u32, expected: &[u8], actual: &[u8]) -> Option<Mismatch> {
    expected
        .iter()
        .zip(actual)
        .position(|(e, a)| e != a)
        .map(|j| Mismatch {
            offset: chunk * VERIFY_CHUNK_SIZE as u32 + j as u32,
            expected: expected[j],
            actual: actual[j],
        })
}

fn report_mismatch(m: &Mismatch) {
    error!(
        "verify failed at 0x{:06x}: expected 0x{:02x}, read 0x{:02x}",
        m.offset,
        m.expected,
        m.actual
    );
}

/// Compares flash contents against bitstreams.
#[derive(Debug)]
pub struct Verifier<'f, F> {
    flash: &'f mut F,
}

impl<'f, F: FlashDevice> Verifier<'f, F> {
    pub fn new(flash: &'f mut F) -> Self {
        Self { flash }
    }

    /// Compares flash from address 0 with `source`, stopping at the first
    /// differing byte.
    pub fn verify<R: Read>(&mut self, source: &mut R) -> Result<Verification, Error<F::BusError>> {
        let mut expected = [0u8; VERIFY_CHUNK_SIZE];
        let mut actual = [0u8; VERIFY_CHUNK_SIZE];
        let mut chunk = 0u32;
        let mut bytes = 0u32;
        loop {
            let len = read_chunk(source, &mut expected).map_err(Error::source)?;
            if len == 0 {
                break;
            }
            self.flash.read(chunk_address(chunk)?, &mut actual[..len])?;
            if let Some(m) = compare(chunk, &expected[..len], &actual[..len]) {
                report_mismatch(&m);
                return Ok(Verification::Mismatch(m));
            }
            bytes += len as u32;
            chunk += 1;
        }
        info!("flash verify done, {} bytes", bytes);
        Ok(Verification::Match { bytes })
    }

    /// Reads the first bytes of flash for a sanity printout.
    pub fn read_head(&mut self) -> Result<[u8; HEAD_LEN], Error<F::BusError>> {
        let mut head = [0u8; HEAD_LEN];
        self.flash.read(FlashAddress::ZERO, &mut head)?;
        info!("flash head: {}", HexBytes(&head));
        Ok(head)
    }
}

/// Async flavour of [`Verifier`].
#[derive(Debug)]
pub struct AsyncVerifier<'f, F> {
    flash: &'f mut F,
}

impl<'f, F: AsyncFlashDevice> AsyncVerifier<'f, F> {
    pub fn new(flash: &'f mut F) -> Self {
        Self { flash }
    }

    pub async fn verify<R: Read>(
        &mut self,
        source: &mut R,
    ) -> Result<Verification, Error<F::BusError>> {
        let mut expected = [0u8; VERIFY_CHUNK_SIZE];
        let mut actual = [0u8; VERIFY_CHUNK_SIZE];
        let mut chunk = 0u32;
        let mut bytes = 0u32;
        loop {
            let len = read_chunk(source, &mut expected).map_err(Error::source)?;
            if len == 0 {
                break;
            }
            self.flash
                .read(chunk_address(chunk)?, &mut actual[..len])
                .await?;
            if let Some(m) = compare(chunk, &expected[..len], &actual[..len]) {
                report_mismatch(&m);
                return Ok(Verification::Mismatch(m));
            }
            bytes += len as u32;
            chunk += 1;
        }
        info!("flash verify done, {} bytes", bytes);
        Ok(Verification::Match { bytes })
    }

    pub async fn read_head(&mut self) -> Result<[u8; HEAD_LEN], Error<F::BusError>> {
        let mut head = [0u8; HEAD_LEN];
        self.flash.read(FlashAddress::ZERO, &mut head).await?;
        info!("flash head: {}", HexBytes(&head));
        Ok(head)
    }
}
