//! Erase-then-program of a bitstream, one 4 KiB sector at a time.
//!
//! For sector `n` the sequence is: write-enable, sector erase at `n`, wait for
//! busy to clear, then for each 256-byte page: write-enable, page program,
//! wait for busy to clear. The last chunk of the bitstream may be short, in
//! which case only the pages it touches are programmed.
use embedded_io::Read;

use crate::error::Error;
use crate::geometry::{FlashAddress, PAGE_SIZE, SECTOR_SIZE};
use crate::poll::Wait;
use crate::traits::{AsyncFlashDevice, FlashDevice};

/// What a programming run did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ProgramReport {
    pub sectors: u32,
    pub pages: u32,
    pub bytes: u32,
    /// Status polls that found the chip busy after an erase.
    pub erase_polls: u32,
    /// Status polls that found the chip busy after a page program.
    pub program_polls: u32,
}

impl ProgramReport {
    fn add_sector(&mut self, sector: SectorReport) {
        self.sectors += 1;
        self.pages += sector.pages;
        self.bytes += sector.bytes;
        self.erase_polls += sector.erase_polls;
        self.program_polls += sector.program_polls;
    }
}

/// What programming a single sector did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SectorReport {
    pub pages: u32,
    pub bytes: u32,
    pub erase_polls: u32,
    pub program_polls: u32,
}

/// Reads from `source` until `buf` is full or the source is exhausted.
pub(crate) fn read_chunk<R: Read>(source: &mut R, buf: &mut [u8]) -> Result<usize, R::Error> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}

fn sector_address<E>(sector: u32, page: usize) -> Result<FlashAddress, Error<E>> {
    u8::try_from(page)
        .ok()
        .and_then(|page| FlashAddress::sector_page(sector, page))
        .ok_or(Error::SectorOutOfRange(sector))
}

/// Programs bitstreams into a [`FlashDevice`].
#[derive(Debug)]
pub struct SectorProgrammer<'f, F> {
    flash: &'f mut F,
}

impl<'f, F: FlashDevice> SectorProgrammer<'f, F> {
    pub fn new(flash: &'f mut F) -> Self {
        Self { flash }
    }

    /// Erases and programs successive sectors with `source`, starting at
    /// sector 0, until the source is exhausted.
    pub fn program<R: Read>(
        &mut self,
        source: &mut R,
    ) -> Result<ProgramReport, Error<F::BusError>> {
        let mut buf = [0u8; SECTOR_SIZE];
        let mut report = ProgramReport::default();
        let mut sector = 0u32;
        loop {
            let len = read_chunk(source, &mut buf).map_err(Error::source)?;
            if len == 0 {
                break;
            }
            let done = self.program_sector(sector, &buf[..len])?;
            report.add_sector(done);
            sector += 1;
        }
        debug!(
            "programmed {} sectors, {} pages, {} bytes",
            report.sectors,
            report.pages,
            report.bytes
        );
        Ok(report)
    }

    /// Erases `sector` and programs `chunk` (at most one sector) into it.
    pub fn program_sector(
        &mut self,
        sector: u32,
        chunk: &[u8],
    ) -> Result<SectorReport, Error<F::BusError>> {
        let mut report = SectorReport::default();
        let erase_at = sector_address(sector, 0)?;

        self.flash.write_enable()?;
        self.flash.sector_erase(erase_at)?;
        report.erase_polls = self.flash.wait_idle(Wait::Erase)?;
        trace!("sector {} erased", sector);

        for (page, data) in chunk.chunks(PAGE_SIZE).enumerate() {
            let addr = sector_address(sector, page)?;
            self.flash.write_enable()?;
            self.flash.page_program(addr, data)?;
            report.program_polls += self.flash.wait_idle(Wait::Program)?;
            report.pages += 1;
            report.bytes += data.len() as u32;
            trace!("sector {} page {} written", sector, page);
        }
        debug!("sector {} done", sector);
        Ok(report)
    }
}

/// Async flavour of [`SectorProgrammer`].
#[derive(Debug)]
pub struct AsyncSectorProgrammer<'f, F> {
    flash: &'f mut F,
}

impl<'f, F: AsyncFlashDevice> AsyncSectorProgrammer<'f, F> {
    pub fn new(flash: &'f mut F) -> Self {
        Self { flash }
    }

    pub async fn program<R: Read>(
        &mut self,
        source: &mut R,
    ) -> Result<ProgramReport, Error<F::BusError>> {
        let mut buf = [0u8; SECTOR_SIZE];
        let mut report = ProgramReport::default();
        let mut sector = 0u32;
        loop {
            let len = read_chunk(source, &mut buf).map_err(Error::source)?;
            if len == 0 {
                break;
            }
            let done = self.program_sector(sector, &buf[..len]).await?;
            report.add_sector(done);
            sector += 1;
        }
        debug!(
            "programmed {} sectors, {} pages, {} bytes",
            report.sectors,
            report.pages,
            report.bytes
        );
        Ok(report)
    }

    pub async fn program_sector(
        &mut self,
        sector: u32,
        chunk: &[u8],
    ) -> Result<SectorReport, Error<F::BusError>> {
        let mut report = SectorReport::default();
        let erase_at = sector_address(sector, 0)?;

        self.flash.write_enable().await?;
        self.flash.sector_erase(erase_at).await?;
        report.erase_polls = self.flash.wait_idle(Wait::Erase).await?;
        trace!("sector {} erased", sector);

        for (page, data) in chunk.chunks(PAGE_SIZE).enumerate() {
            let addr = sector_address(sector, page)?;
            self.flash.write_enable().await?;
            self.flash.page_program(addr, data).await?;
            report.program_polls += self.flash.wait_idle(Wait::Program).await?;
            report.pages += 1;
            report.bytes += data.len() as u32;
            trace!("sector {} page {} written", sector, page);
        }
        debug!("sector {} done", sector);
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::async_comms::AsyncFlashTransport;
    use crate::comms::FlashTransport;
    use crate::geometry::{final_sector_pages, sector_count};
    use crate::opcode::Opcode;
    use crate::sim::{Clock, SimDelay, SimFlash};
    use futures::executor::block_on;
    use std::vec::Vec;

    fn bitstream(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 + i / 251) as u8).collect()
    }

    /// Hands out at most `step` bytes per read.
    struct Trickle<'a> {
        data: &'a [u8],
        step: usize,
    }

    impl embedded_io::ErrorType for Trickle<'_> {
        type Error = core::convert::Infallible;
    }

    impl Read for Trickle<'_> {
        fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
            let n = buf.len().min(self.step).min(self.data.len());
            buf[..n].copy_from_slice(&self.data[..n]);
            self.data = &self.data[n..];
            Ok(n)
        }
    }

    struct Broken;

    impl embedded_io::ErrorType for Broken {
        type Error = embedded_io::ErrorKind;
    }

    impl Read for Broken {
        fn read(&mut self, _buf: &mut [u8]) -> Result<usize, Self::Error> {
            Err(embedded_io::ErrorKind::Interrupted)
        }
    }

    #[test]
    fn five_thousand_bytes_take_two_sectors_and_twenty_pages() {
        let data = bitstream(5000);
        let mut sim = SimFlash::new();
        let mut flash = FlashTransport::new(&mut sim, SimDelay::new(Clock::default()));

        let report = SectorProgrammer::new(&mut flash)
            .program(&mut data.as_slice())
            .unwrap();
        drop(flash);

        assert_eq!(report.sectors, sector_count(5000));
        assert_eq!(report.sectors, 2);
        assert_eq!(report.pages, 16 + final_sector_pages(5000));
        assert_eq!(report.pages, 20);
        assert_eq!(report.bytes, 5000);

        assert_eq!(sim.erased_sectors(), [0, 1]);
        let programs = sim.programs();
        assert_eq!(programs.len(), 20);
        assert_eq!(programs[16], (0x1000, 256));
        assert_eq!(programs[19], (0x1300, 5000 - 4096 - 768));
        assert_eq!(&sim.mem()[..5000], data.as_slice());
        assert_eq!(sim.violations(), 0);
    }

    #[test]
    fn erase_and_program_commands_follow_the_required_order() {
        let data = bitstream(300);
        let mut sim = SimFlash::new().with_busy_polls(2, 1);
        let mut flash = FlashTransport::new(&mut sim, SimDelay::new(Clock::default()));
        let report = SectorProgrammer::new(&mut flash)
            .program(&mut data.as_slice())
            .unwrap();
        drop(flash);

        let wen = Opcode::WriteEnable as u8;
        let rdsr = Opcode::ReadStatus as u8;
        assert_eq!(
            sim.opcodes(),
            [
                wen, 0x20, rdsr, rdsr, rdsr, // erase, two busy polls, idle
                wen, 0x02, rdsr, rdsr, // page 0
                wen, 0x02, rdsr, rdsr, // page 1
            ]
        );
        assert_eq!(sim.headers()[1], [0x20, 0, 0, 0]);
        assert_eq!(sim.headers()[6], [0x02, 0, 0, 0]);
        assert_eq!(sim.headers()[10], [0x02, 0, 1, 0]);
        assert_eq!(report.erase_polls, 2);
        assert_eq!(report.program_polls, 2);
    }

    #[test]
    fn short_reads_are_gathered_into_whole_sectors() {
        let data = bitstream(4096 + 10);
        let mut sim = SimFlash::new();
        let mut flash = FlashTransport::new(&mut sim, SimDelay::new(Clock::default()));
        let mut source = Trickle {
            data: &data,
            step: 7,
        };
        let report = SectorProgrammer::new(&mut flash).program(&mut source).unwrap();
        drop(flash);

        assert_eq!(report.sectors, 2);
        assert_eq!(sim.erased_sectors(), [0, 1]);
        assert_eq!(&sim.mem()[..data.len()], data.as_slice());
    }

    #[test]
    fn empty_bitstream_touches_nothing() {
        let mut sim = SimFlash::new();
        let mut flash = FlashTransport::new(&mut sim, SimDelay::new(Clock::default()));
        let report = SectorProgrammer::new(&mut flash)
            .program(&mut (&[] as &[u8]))
            .unwrap();
        drop(flash);
        assert_eq!(report, ProgramReport::default());
        assert_eq!(sim.transactions(), 0);
    }

    #[test]
    fn sector_past_24_bit_space_is_refused() {
        let mut sim = SimFlash::new();
        let mut flash = FlashTransport::new(&mut sim, SimDelay::new(Clock::default()));
        let err = SectorProgrammer::new(&mut flash)
            .program_sector(4096, &[0; 16])
            .unwrap_err();
        assert!(matches!(err, Error::SectorOutOfRange(4096)));
        drop(flash);
        assert_eq!(sim.transactions(), 0);
    }

    #[test]
    fn source_errors_surface_as_source() {
        let mut sim = SimFlash::new();
        let mut flash = FlashTransport::new(&mut sim, SimDelay::new(Clock::default()));
        let err = SectorProgrammer::new(&mut flash)
            .program(&mut Broken)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Source(embedded_io::ErrorKind::Interrupted)
        ));
    }

    #[test]
    fn async_programmer_writes_the_same_image() {
        let data = bitstream(5000);
        let mut sim = SimFlash::new();
        let mut flash = AsyncFlashTransport::new(&mut sim, SimDelay::new(Clock::default()));
        let report = block_on(AsyncSectorProgrammer::new(&mut flash).program(&mut data.as_slice()))
            .unwrap();
        drop(flash);

        assert_eq!(report.sectors, 2);
        assert_eq!(report.pages, 20);
        assert_eq!(sim.erased_sectors(), [0, 1]);
        assert_eq!(&sim.mem()[..5000], data.as_slice());
        assert_eq!(sim.violations(), 0);
    }
}
