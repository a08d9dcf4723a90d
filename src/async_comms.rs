use core::fmt::Debug;

/// Refer to datasheet:
/// https://datasheet.lcsc.com/lcsc/1912111437_Winbond-Elec-W25Q128JVSIQ_C113767.pdf
use crate::comms::{FlashCommand, FlashId, MAX_DUMMY};
use crate::config::FlashTiming;
use crate::error::Error;
use crate::geometry::FlashAddress;
use crate::opcode::{Opcode, Status};
use crate::poll::{CancelToken, Poller, Wait};
use crate::traits::AsyncFlashDevice;
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::spi::{Operation, SpiDevice};

pub struct AsyncFlashTransport<'a, SPI, D> {
    spi: SPI,
    delay: D,
    timing: FlashTiming,
    cancel: Option<&'a CancelToken>,
}

impl<SPI, D> Debug for AsyncFlashTransport<'_, SPI, D> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AsyncFlashTransport")
            .field("timing", &self.timing)
            .finish()
    }
}

impl<'a, SPI, D> AsyncFlashTransport<'a, SPI, D>
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

    pub fn release(self) -> (SPI, D) {
        (self.spi, self.delay)
    }

    /// Sends `cmd` as one chip-select framed transfer: header, `dummy_len`
    /// discarded bytes, then `response.len()` bytes read into `response`.
    pub async fn send_command(
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

        let spi_result = match (dummy.is_empty(), response.is_empty()) {
            (true, true) => self.spi.transaction(&mut [Operation::Write(header)]).await,
            (true, false) => {
                self.spi
                    .transaction(&mut [Operation::Write(header), Operation::Read(response)])
                    .await
            }
            (false, true) => {
                self.spi
                    .transaction(&mut [Operation::Write(header), Operation::Read(dummy)])
                    .await
            }
            (false, false) => {
                self.spi
                    .transaction(&mut [
                        Operation::Write(header),
                        Operation::Read(dummy),
                        Operation::Read(response),
                    ])
                    .await
            }
        };
        spi_result.map_err(Error::Spi)
    }

    /// Sends `cmd` followed by `payload` within the same chip-select frame.
    pub async fn send_command_with_payload(
        &mut self,
        cmd: FlashCommand,
        payload: &[u8],
    ) -> Result<(), Error<SPI::Error>> {
        let (header, len) = cmd.header();
        self.spi
            .transaction(&mut [Operation::Write(&header[..len]), Operation::Write(payload)])
            .await
            .map_err(Error::Spi)
    }

    pub async fn read_status(&mut self) -> Result<Status, Error<SPI::Error>> {
        let mut response = [0u8; 1];
        self.send_command(FlashCommand::new(Opcode::ReadStatus), &mut response)
            .await?;
        Ok(Status::from_bits_truncate(response[0]))
    }

    pub async fn is_busy(&mut self) -> Result<bool, Error<SPI::Error>> {
        Ok(self.read_status().await?.contains(Status::BUSY))
    }

    pub async fn release_power_down(&mut self) -> Result<(), Error<SPI::Error>> {
        self.send_command(FlashCommand::new(Opcode::ReleasePowerDown), &mut [])
            .await?;
        self.delay.delay_ms(self.timing.wake_delay_ms).await;
        Ok(())
    }

    pub async fn read_id(&mut self) -> Result<FlashId, Error<SPI::Error>> {
        let mut id = [0u8; 3];
        self.send_command(FlashCommand::new(Opcode::Identify).with_dummy(2), &mut id)
            .await?;
        Ok(FlashId(id))
    }
}

impl<SPI, D> AsyncFlashDevice for AsyncFlashTransport<'_, SPI, D>
where
    SPI: SpiDevice,
    D: DelayNs,
{
    type BusError = SPI::Error;

    async fn write_enable(&mut self) -> Result<(), Error<SPI::Error>> {
        self.send_command(FlashCommand::new(Opcode::WriteEnable), &mut [])
            .await
    }

    async fn sector_erase(&mut self, addr: FlashAddress) -> Result<(), Error<SPI::Error>> {
        self.send_command(FlashCommand::new(Opcode::SectorErase).at(addr), &mut [])
            .await
    }

    async fn page_program(
        &mut self,
        addr: FlashAddress,
        data: &[u8],
    ) -> Result<(), Error<SPI::Error>> {
        self.send_command_with_payload(FlashCommand::new(Opcode::Write).at(addr), data)
            .await
    }

    async fn read(&mut self, addr: FlashAddress, buf: &mut [u8]) -> Result<(), Error<SPI::Error>> {
        self.send_command(FlashCommand::new(Opcode::Read).at(addr), buf)
            .await
    }

    async fn wait_idle(&mut self, wait: Wait) -> Result<u32, Error<SPI::Error>> {
        let mut poller = Poller::new(wait, self.timing.busy_poll, self.cancel);
        while self.is_busy().await? {
            trace!("flash busy ({:?})", wait);
            let us = poller.next_delay_us()?;
            self.delay.delay_us(us).await;
        }
        if poller.polls() > 0 {
            debug!("flash idle after {} polls", poller.polls());
        }
        Ok(poller.polls())
    }
}
