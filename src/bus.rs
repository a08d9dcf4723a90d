//! Exclusive bus acquisition and chip-select framing.
//!
//! [`GatedDevice`] turns a [`SharedBus`] plus a chip-select output into an
//! [`SpiDevice`]: each transaction acquires the bus (bounded, cancellable
//! retry), drives chip-select low, runs the operations, releases the bus and
//! drives chip-select high again. Chip-select is deasserted on every path out
//! of a transaction that managed to assert it, including failed transfers.
//!
//! The bus sits behind an `embassy_sync` mutex, so it can be shared with
//! another core or an interrupt handler when `M` is
//! `CriticalSectionRawMutex`.
use core::fmt::Debug;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::mutex::{Mutex, MutexGuard};
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use embedded_hal::spi::{self, ErrorKind, ErrorType, Operation, SpiBus, SpiDevice};

use crate::config::BUS_ACQUIRE_POLL;
use crate::poll::{CancelToken, PollConfig, PollError, Poller, Wait};

/// An SPI bus that several devices take turns on.
pub struct SharedBus<M: RawMutex, BUS> {
    bus: Mutex<M, BUS>,
}

impl<M: RawMutex, BUS> SharedBus<M, BUS> {
    pub const fn new(bus: BUS) -> Self {
        Self {
            bus: Mutex::new(bus),
        }
    }

    /// Takes the bus if nobody else holds it. The bus is released when the
    /// guard is dropped.
    pub fn try_lock(&self) -> Option<MutexGuard<'_, M, BUS>> {
        self.bus.try_lock().ok()
    }

    pub fn into_inner(self) -> BUS {
        self.bus.into_inner()
    }
}

impl<M: RawMutex, BUS> Debug for SharedBus<M, BUS> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SharedBus")
            .field("locked", &self.bus.try_lock().is_err())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum GatedError<B, C> {
    /// The bus transfer itself failed.
    Bus(B),
    /// Driving chip-select failed.
    ChipSelect(C),
    /// The bus could not be acquired.
    Acquire(PollError),
}

impl<B: spi::Error, C: Debug> spi::Error for GatedError<B, C> {
    fn kind(&self) -> ErrorKind {
        match self {
            GatedError::Bus(e) => e.kind(),
            GatedError::ChipSelect(_) => ErrorKind::ChipSelectFault,
            GatedError::Acquire(_) => ErrorKind::Other,
        }
    }
}

/// One chip on a [`SharedBus`], selected by its own chip-select line.
pub struct GatedDevice<'a, M: RawMutex, BUS, CS, D> {
    bus: &'a SharedBus<M, BUS>,
    cs: CS,
    delay: D,
    acquire: PollConfig,
    cancel: Option<&'a CancelToken>,
}

impl<M: RawMutex, BUS, CS, D> Debug for GatedDevice<'_, M, BUS, CS, D> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("GatedDevice")
            .field("acquire", &self.acquire)
            .finish()
    }
}

impl<'a, M: RawMutex, BUS, CS, D> GatedDevice<'a, M, BUS, CS, D>
where
    CS: OutputPin,
{
    /// Binds the chip-select pin and parks it high (deselected).
    pub fn new(bus: &'a SharedBus<M, BUS>, mut cs: CS, delay: D) -> Result<Self, CS::Error> {
        cs.set_high()?;
        Ok(Self {
            bus,
            cs,
            delay,
            acquire: BUS_ACQUIRE_POLL,
            cancel: None,
        })
    }

    pub fn with_acquire_poll(mut self, acquire: PollConfig) -> Self {
        self.acquire = acquire;
        self
    }

    pub fn with_cancel(mut self, cancel: &'a CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Gives back the chip-select pin and delay, ending the binding.
    pub fn release(self) -> (CS, D) {
        (self.cs, self.delay)
    }
}

fn acquire<'b, M: RawMutex, BUS, D: DelayNs>(
    bus: &'b SharedBus<M, BUS>,
    delay: &mut D,
    config: PollConfig,
    cancel: Option<&CancelToken>,
) -> Result<MutexGuard<'b, M, BUS>, PollError> {
    let mut poller = Poller::new(Wait::BusAcquire, config, cancel);
    loop {
        if let Some(guard) = bus.try_lock() {
            return Ok(guard);
        }
        let us = poller.next_delay_us()?;
        delay.delay_us(us);
    }
}

fn run_operations<BUS: SpiBus, D: DelayNs>(
    bus: &mut BUS,
    delay: &mut D,
    operations: &mut [Operation<'_, u8>],
) -> Result<(), BUS::Error> {
    for op in operations {
        match op {
            Operation::Read(buf) => bus.read(buf)?,
            Operation::Write(buf) => bus.write(buf)?,
            Operation::Transfer(read, write) => bus.transfer(read, write)?,
            Operation::TransferInPlace(buf) => bus.transfer_in_place(buf)?,
            Operation::DelayNs(ns) => {
                bus.flush()?;
                delay.delay_ns(*ns);
            }
        }
    }
    Ok(())
}

impl<M: RawMutex, BUS, CS, D> ErrorType for GatedDevice<'_, M, BUS, CS, D>
where
    BUS: SpiBus,
    CS: OutputPin,
{
    type Error = GatedError<BUS::Error, CS::Error>;
}

impl<M: RawMutex, BUS, CS, D> SpiDevice for GatedDevice<'_, M, BUS, CS, D>
where
    BUS: SpiBus,
    CS: OutputPin,
    D: DelayNs,
{
    fn transaction(&mut self, operations: &mut [Operation<'_, u8>]) -> Result<(), Self::Error> {
        let mut bus = acquire(self.bus, &mut self.delay, self.acquire, self.cancel)
            .map_err(GatedError::Acquire)?;

        self.cs.set_low().map_err(GatedError::ChipSelect)?;
        let op_res = run_operations(&mut *bus, &mut self.delay, operations);
        let flush_res = bus.flush();
        drop(bus);
        let cs_res = self.cs.set_high();

        op_res.map_err(GatedError::Bus)?;
        flush_res.map_err(GatedError::Bus)?;
        cs_res.map_err(GatedError::ChipSelect)?;
        Ok(())
    }
}
