//! Behavioural models used by the unit tests: a W25-style NOR chip behind
//! `SpiDevice`, a delay that advances a shared clock, FPGA configuration pins
//! and a GPIO bank.
use core::cell::{Cell, RefCell};
use core::convert::Infallible;
use std::rc::Rc;
use std::vec;
use std::vec::Vec;

use embedded_hal::digital::{self, InputPin, OutputPin};
use embedded_hal::pwm::{self, SetDutyCycle};
use embedded_hal::spi::{self, Operation};

use crate::opcode::Opcode;
use crate::traits::{ConfigClock, GpioBank, HighZ};

/// Simulated time in nanoseconds, shared by delays and pins.
#[derive(Debug, Clone, Default)]
pub(crate) struct Clock(Rc<Cell<u64>>);

impl Clock {
    pub(crate) fn now_us(&self) -> u64 {
        self.0.get() / 1000
    }

    fn advance_ns(&self, ns: u64) {
        self.0.set(self.0.get() + ns);
    }
}

#[derive(Debug, Clone)]
pub(crate) struct SimDelay {
    clock: Clock,
}

impl SimDelay {
    pub(crate) fn new(clock: Clock) -> Self {
        Self { clock }
    }
}

impl embedded_hal::delay::DelayNs for SimDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.clock.advance_ns(u64::from(ns));
    }

    fn delay_us(&mut self, us: u32) {
        self.clock.advance_ns(u64::from(us) * 1000);
    }

    fn delay_ms(&mut self, ms: u32) {
        self.clock.advance_ns(u64::from(ms) * 1_000_000);
    }
}

impl embedded_hal_async::delay::DelayNs for SimDelay {
    async fn delay_ns(&mut self, ns: u32) {
        self.clock.advance_ns(u64::from(ns));
    }

    async fn delay_us(&mut self, us: u32) {
        self.clock.advance_ns(u64::from(us) * 1000);
    }

    async fn delay_ms(&mut self, ms: u32) {
        self.clock.advance_ns(u64::from(ms) * 1_000_000);
    }
}

/// Byte source for the read phase of the current frame.
enum Responder {
    Fixed(u8),
    Memory(usize),
    Identify { skip: usize, next: usize },
}

pub(crate) struct SimFlash {
    mem: Vec<u8>,
    wel: bool,
    busy_left: u32,
    erase_busy_polls: u32,
    program_busy_polls: u32,
    stuck_busy: bool,
    asleep: bool,
    headers: Vec<Vec<u8>>,
    erased: Vec<u32>,
    programs: Vec<(u32, usize)>,
    violations: u32,
    stuck_low: Option<(usize, u8)>,
}

impl SimFlash {
    pub(crate) const MANUFACTURER: u8 = 0xEF;
    pub(crate) const DEVICE: u8 = 0x17;

    pub(crate) fn new() -> Self {
        Self::with_size(64 * 1024)
    }

    pub(crate) fn with_size(size: usize) -> Self {
        Self {
            mem: vec![0x5A; size],
            wel: false,
            busy_left: 0,
            erase_busy_polls: 2,
            program_busy_polls: 1,
            stuck_busy: false,
            asleep: false,
            headers: Vec::new(),
            erased: Vec::new(),
            programs: Vec::new(),
            violations: 0,
            stuck_low: None,
        }
    }

    pub(crate) fn with_busy_polls(mut self, erase: u32, program: u32) -> Self {
        self.erase_busy_polls = erase;
        self.program_busy_polls = program;
        self
    }

    pub(crate) fn stuck_busy(mut self) -> Self {
        self.stuck_busy = true;
        self
    }

    /// Bits in `mask` at `offset` read as 0 even right after an erase.
    pub(crate) fn with_stuck_low(mut self, offset: usize, mask: u8) -> Self {
        self.stuck_low = Some((offset, mask));
        self
    }

    pub(crate) fn asleep(mut self) -> Self {
        self.asleep = true;
        self
    }

    pub(crate) fn is_asleep(&self) -> bool {
        self.asleep
    }

    pub(crate) fn mem(&self) -> &[u8] {
        &self.mem
    }

    pub(crate) fn mem_mut(&mut self) -> &mut [u8] {
        &mut self.mem
    }

    /// Header bytes (opcode and address) of every frame seen.
    pub(crate) fn headers(&self) -> &[Vec<u8>] {
        &self.headers
    }

    pub(crate) fn opcodes(&self) -> Vec<u8> {
        self.headers.iter().map(|h| h[0]).collect()
    }

    pub(crate) fn transactions(&self) -> usize {
        self.headers.len()
    }

    pub(crate) fn erased_sectors(&self) -> &[u32] {
        &self.erased
    }

    /// `(address, length)` of every accepted page program.
    pub(crate) fn programs(&self) -> &[(u32, usize)] {
        &self.programs
    }

    /// Commands other than a status read issued while busy, or issued while
    /// in deep power-down.
    pub(crate) fn violations(&self) -> u32 {
        self.violations
    }

    fn busy(&self) -> bool {
        self.stuck_busy || self.busy_left > 0
    }

    fn wrap(&self, addr: usize) -> usize {
        addr % self.mem.len()
    }

    fn address(header: &[u8]) -> usize {
        match header {
            [_, a, b, c, ..] => (usize::from(*a) << 16) | (usize::from(*b) << 8) | usize::from(*c),
            _ => 0,
        }
    }

    fn start_frame(&mut self, header: &[u8]) -> Responder {
        self.headers.push(header.to_vec());
        let opcode = Opcode::from_byte(header[0]);

        if self.asleep && opcode != Some(Opcode::ReleasePowerDown) {
            self.violations += 1;
            return Responder::Fixed(0xFF);
        }
        if self.busy() && opcode != Some(Opcode::ReadStatus) {
            self.violations += 1;
        }

        match opcode {
            Some(Opcode::ReadStatus) => {
                let busy = self.busy();
                if self.busy_left > 0 {
                    self.busy_left -= 1;
                }
                Responder::Fixed(u8::from(busy) | (u8::from(self.wel) << 1))
            }
            Some(Opcode::Read) => Responder::Memory(Self::address(header)),
            Some(Opcode::Identify) => Responder::Identify {
                skip: 4usize.saturating_sub(header.len()),
                next: 0,
            },
            Some(Opcode::WriteEnable) => {
                self.wel = true;
                Responder::Fixed(0xFF)
            }
            Some(Opcode::SectorErase) => {
                if self.wel {
                    let start = self.wrap(Self::address(header)) & !0xFFF;
                    self.mem[start..start + 0x1000].fill(0xFF);
                    if let Some((offset, mask)) = self.stuck_low {
                        if (start..start + 0x1000).contains(&offset) {
                            self.mem[offset] &= !mask;
                        }
                    }
                    self.erased.push((start / 0x1000) as u32);
                    self.wel = false;
                    self.busy_left = self.erase_busy_polls;
                }
                Responder::Fixed(0xFF)
            }
            Some(Opcode::ReleasePowerDown) => {
                self.asleep = false;
                Responder::Fixed(0xFF)
            }
            _ => Responder::Fixed(0xFF),
        }
    }

    fn program(&mut self, header: &[u8], payload: &[u8]) {
        if !self.wel {
            return;
        }
        let addr = self.wrap(Self::address(header));
        let page = addr & !0xFF;
        for (k, b) in payload.iter().enumerate() {
            let a = page | ((addr + k) & 0xFF);
            self.mem[a] &= *b;
        }
        self.programs.push((addr as u32, payload.len()));
        self.wel = false;
        self.busy_left = self.program_busy_polls;
    }

    fn respond(&self, responder: &mut Responder, buf: &mut [u8]) {
        for byte in buf.iter_mut() {
            *byte = match responder {
                Responder::Fixed(b) => *b,
                Responder::Memory(addr) => {
                    let b = self.mem[self.wrap(*addr)];
                    *addr += 1;
                    b
                }
                Responder::Identify { skip, next } => {
                    if *skip > 0 {
                        *skip -= 1;
                        0xFF
                    } else {
                        let b = [Self::MANUFACTURER, Self::DEVICE][*next % 2];
                        *next += 1;
                        b
                    }
                }
            };
        }
    }
}

impl spi::ErrorType for SimFlash {
    type Error = Infallible;
}

impl spi::SpiDevice for SimFlash {
    fn transaction(&mut self, operations: &mut [Operation<'_, u8>]) -> Result<(), Infallible> {
        let mut header: Option<Vec<u8>> = None;
        let mut payload = Vec::new();
        let mut responder = Responder::Fixed(0xFF);

        for op in operations.iter_mut() {
            match op {
                Operation::Write(data) => {
                    let data: &[u8] = data;
                    if header.is_none() {
                        header = Some(data.to_vec());
                        responder = self.start_frame(data);
                    } else {
                        payload.extend_from_slice(data);
                    }
                }
                Operation::Read(buf) => self.respond(&mut responder, buf),
                Operation::Transfer(read, _) => self.respond(&mut responder, read),
                Operation::TransferInPlace(buf) => self.respond(&mut responder, buf),
                Operation::DelayNs(_) => {}
            }
        }

        if let Some(header) = header {
            if header[0] == Opcode::Write as u8 && !payload.is_empty() && !self.asleep {
                self.program(&header, &payload);
            }
        }
        Ok(())
    }
}

impl embedded_hal_async::spi::SpiDevice for SimFlash {
    async fn transaction(
        &mut self,
        operations: &mut [Operation<'_, u8>],
    ) -> Result<(), Infallible> {
        spi::SpiDevice::transaction(self, operations)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PinEvent {
    ResetLow,
    ResetHigh,
    ResetFloat,
    ClockOn(u32),
    ClockOff,
}

#[derive(Debug)]
struct FpgaState {
    creset: Option<bool>,
    released_at_us: u64,
    clock_hz: Option<u32>,
    boot_us: Option<u64>,
    events: Vec<(u64, PinEvent)>,
    done_reads: u32,
}

/// Model of the FPGA side: done rises `boot_us` after creset is released
/// with the configuration clock running.
#[derive(Debug, Clone)]
pub(crate) struct SimFpga {
    clock: Clock,
    state: Rc<RefCell<FpgaState>>,
}

impl SimFpga {
    pub(crate) fn new(clock: Clock, boot_us: Option<u64>) -> Self {
        Self {
            clock,
            state: Rc::new(RefCell::new(FpgaState {
                creset: None,
                released_at_us: 0,
                clock_hz: None,
                boot_us,
                events: Vec::new(),
                done_reads: 0,
            })),
        }
    }

    pub(crate) fn pins(&self) -> (SimReset, SimDone, SimClockOut) {
        (
            SimReset(self.clone()),
            SimDone(self.clone()),
            SimClockOut {
                fpga: self.clone(),
                duty: 0,
            },
        )
    }

    pub(crate) fn events(&self) -> Vec<(u64, PinEvent)> {
        self.state.borrow().events.clone()
    }

    pub(crate) fn creset(&self) -> Option<bool> {
        self.state.borrow().creset
    }

    pub(crate) fn clock_hz(&self) -> Option<u32> {
        self.state.borrow().clock_hz
    }

    pub(crate) fn done_reads(&self) -> u32 {
        self.state.borrow().done_reads
    }

    fn record(&self, event: PinEvent) {
        let now = self.clock.now_us();
        let mut state = self.state.borrow_mut();
        match event {
            PinEvent::ResetLow => state.creset = Some(false),
            PinEvent::ResetHigh => {
                if state.creset != Some(true) {
                    state.released_at_us = now;
                }
                state.creset = Some(true);
            }
            PinEvent::ResetFloat => state.creset = None,
            PinEvent::ClockOn(hz) => state.clock_hz = Some(hz),
            PinEvent::ClockOff => state.clock_hz = None,
        }
        state.events.push((now, event));
    }

    fn done(&self) -> bool {
        let now = self.clock.now_us();
        let mut state = self.state.borrow_mut();
        state.done_reads += 1;
        match state.boot_us {
            Some(boot) => {
                state.creset == Some(true)
                    && state.clock_hz.is_some()
                    && now >= state.released_at_us + boot
            }
            None => false,
        }
    }
}

pub(crate) struct SimReset(SimFpga);

impl digital::ErrorType for SimReset {
    type Error = Infallible;
}

impl OutputPin for SimReset {
    fn set_low(&mut self) -> Result<(), Infallible> {
        self.0.record(PinEvent::ResetLow);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Infallible> {
        self.0.record(PinEvent::ResetHigh);
        Ok(())
    }
}

impl HighZ for SimReset {
    fn float(&mut self) -> Result<(), Infallible> {
        self.0.record(PinEvent::ResetFloat);
        Ok(())
    }
}

pub(crate) struct SimDone(SimFpga);

impl digital::ErrorType for SimDone {
    type Error = Infallible;
}

impl InputPin for SimDone {
    fn is_high(&mut self) -> Result<bool, Infallible> {
        Ok(self.0.done())
    }

    fn is_low(&mut self) -> Result<bool, Infallible> {
        Ok(!self.0.done())
    }
}

pub(crate) struct SimClockOut {
    fpga: SimFpga,
    duty: u16,
}

impl SimClockOut {
    pub(crate) fn duty(&self) -> u16 {
        self.duty
    }
}

impl pwm::ErrorType for SimClockOut {
    type Error = Infallible;
}

impl SetDutyCycle for SimClockOut {
    fn max_duty_cycle(&self) -> u16 {
        u16::MAX
    }

    fn set_duty_cycle(&mut self, duty: u16) -> Result<(), Infallible> {
        self.duty = duty;
        if duty == 0 {
            self.fpga.record(PinEvent::ClockOff);
        }
        Ok(())
    }
}

impl ConfigClock for SimClockOut {
    fn set_frequency(&mut self, hz: u32) -> Result<(), Infallible> {
        self.fpga.record(PinEvent::ClockOn(hz));
        Ok(())
    }
}

/// GPIO bank with some line numbers absent, as on real boards.
#[derive(Debug, Default)]
pub(crate) struct SimGpio {
    pub(crate) lines: u8,
    pub(crate) absent: Vec<u8>,
    /// Line whose configuration fails.
    pub(crate) faulty: Option<u8>,
    pub(crate) floated: Vec<u8>,
}

impl GpioBank for SimGpio {
    type Error = digital::ErrorKind;

    fn line_count(&self) -> u8 {
        self.lines
    }

    fn float(&mut self, line: u8) -> Result<bool, digital::ErrorKind> {
        if self.faulty == Some(line) {
            return Err(digital::ErrorKind::Other);
        }
        if self.absent.contains(&line) {
            return Ok(false);
        }
        self.floated.push(line);
        Ok(true)
    }
}
