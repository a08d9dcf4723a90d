//! Bounded, cancellable polling.
//!
//! Every wait in this crate (bus acquisition, flash busy bit, FPGA done line)
//! goes through a [`Poller`]: the caller checks its condition, and if it is not
//! met asks the poller for the next sleep interval. The poller fails with
//! [`PollError::TimedOut`] once the accumulated sleep exceeds the timeout, or
//! with [`PollError::Cancelled`] as soon as the attached token is cancelled.
use core::sync::atomic::{AtomicBool, Ordering};

/// What a poll loop is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Wait {
    /// Exclusive access to the shared SPI bus.
    BusAcquire,
    /// Flash status register busy bit after a sector erase.
    Erase,
    /// Flash status register busy bit after a page program.
    Program,
    /// Flash status register busy bit before an unrelated command.
    Idle,
    /// FPGA configuration done input.
    ConfigDone,
}

/// Interval and upper bound of a poll loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PollConfig {
    pub interval_us: u32,
    /// `None` waits forever (cancellation still applies).
    pub timeout_ms: Option<u32>,
}

impl PollConfig {
    pub const fn new(interval_us: u32, timeout_ms: Option<u32>) -> Self {
        Self {
            interval_us,
            timeout_ms,
        }
    }

    pub const fn unbounded(interval_us: u32) -> Self {
        Self::new(interval_us, None)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PollError {
    TimedOut(Wait),
    Cancelled(Wait),
}

/// Cooperative cancellation flag, shareable between an interrupt handler or a
/// second core and the thread running the poll loops.
#[derive(Debug, Default)]
pub struct CancelToken {
    cancelled: AtomicBool,
}

impl CancelToken {
    pub const fn new() -> Self {
        Self {
            cancelled: AtomicBool::new(false),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Re-arms the token for the next session.
    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::Release);
    }
}

/// State of one poll loop.
#[derive(Debug)]
pub struct Poller<'a> {
    config: PollConfig,
    wait: Wait,
    waited_us: u64,
    polls: u32,
    cancel: Option<&'a CancelToken>,
}

impl<'a> Poller<'a> {
    pub fn new(wait: Wait, config: PollConfig, cancel: Option<&'a CancelToken>) -> Self {
        Self {
            config,
            wait,
            waited_us: 0,
            polls: 0,
            cancel,
        }
    }

    /// Called after the condition was checked and found unmet. Returns the
    /// number of microseconds to sleep before checking again.
    pub fn next_delay_us(&mut self) -> Result<u32, PollError> {
        if self.cancel.is_some_and(CancelToken::is_cancelled) {
            return Err(PollError::Cancelled(self.wait));
        }
        if let Some(timeout_ms) = self.config.timeout_ms {
            if self.waited_us >= u64::from(timeout_ms) * 1000 {
                return Err(PollError::TimedOut(self.wait));
            }
        }
        self.waited_us += u64::from(self.config.interval_us);
        self.polls = self.polls.saturating_add(1);
        Ok(self.config.interval_us)
    }

    /// Number of unmet checks so far.
    pub fn polls(&self) -> u32 {
        self.polls
    }

    pub fn waited_us(&self) -> u64 {
        self.waited_us
    }

    pub fn wait(&self) -> Wait {
        self.wait
    }
}
