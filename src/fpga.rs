//! FPGA configuration sequencing.
//!
//! The FPGA loads its configuration from the boot flash when creset is
//! released, clocked by the configuration clock, and raises done once it is
//! running. Holding creset low forces it back into the unconfigured state so
//! the flash can be rewritten.
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{Error as _, InputPin, OutputPin};
use embedded_hal::pwm::{Error as _, SetDutyCycle};

use crate::config::{FpgaTiming, CLOCK_DUTY_PERCENT};
use crate::error::ConfigError;
use crate::poll::{CancelToken, Poller, Wait};
use crate::traits::{ConfigClock, HighZ};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigState {
    /// Nothing driven yet this session.
    Idle,
    /// creset was held low; the FPGA is unconfigured.
    Reset,
    /// creset high and clock running, done not yet seen.
    AwaitingConfig,
    /// done asserted.
    Running,
}

/// Owns the creset, done and configuration clock pins for a session.
pub struct ConfigController<'a, RST, DONE, CLK> {
    creset: RST,
    done: DONE,
    cclk: CLK,
    timing: FpgaTiming,
    state: ConfigState,
    cancel: Option<&'a CancelToken>,
}

impl<RST, DONE, CLK> core::fmt::Debug for ConfigController<'_, RST, DONE, CLK> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ConfigController")
            .field("state", &self.state)
            .field("timing", &self.timing)
            .finish()
    }
}

impl<'a, RST, DONE, CLK> ConfigController<'a, RST, DONE, CLK>
where
    RST: OutputPin + HighZ,
    DONE: InputPin,
    CLK: ConfigClock,
{
    pub fn new(creset: RST, done: DONE, cclk: CLK) -> Self {
        Self {
            creset,
            done,
            cclk,
            timing: FpgaTiming::default(),
            state: ConfigState::Idle,
            cancel: None,
        }
    }

    pub fn with_timing(mut self, timing: FpgaTiming) -> Self {
        self.timing = timing;
        self
    }

    pub fn with_cancel(mut self, cancel: &'a CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn state(&self) -> ConfigState {
        self.state
    }

    /// Holds creset low for the reset hold time, then floats it.
    pub fn stop<D: DelayNs>(&mut self, delay: &mut D) -> Result<(), ConfigError> {
        info!("stopping fpga");
        self.creset.set_low().map_err(|e| ConfigError::Reset(e.kind()))?;
        self.state = ConfigState::Reset;
        delay.delay_ms(self.timing.reset_hold_ms);
        self.creset.float().map_err(|e| ConfigError::Reset(e.kind()))?;
        Ok(())
    }

    /// Starts the configuration clock at `clock_hz`, releases creset and waits
    /// for done. Returns the level of done after it was seen asserted.
    pub fn start<D: DelayNs>(&mut self, delay: &mut D, clock_hz: u32) -> Result<bool, ConfigError> {
        info!("starting fpga, {} Hz configuration clock", clock_hz);
        self.cclk
            .set_frequency(clock_hz)
            .map_err(|e| ConfigError::Clock(e.kind()))?;
        SetDutyCycle::set_duty_cycle_percent(&mut self.cclk, CLOCK_DUTY_PERCENT)
            .map_err(|e| ConfigError::Clock(e.kind()))?;

        self.creset.set_high().map_err(|e| ConfigError::Reset(e.kind()))?;
        self.state = ConfigState::AwaitingConfig;
        delay.delay_ms(self.timing.release_settle_ms);

        let mut poller = Poller::new(Wait::ConfigDone, self.timing.done_poll, self.cancel);
        while !self.done.is_high().map_err(|e| ConfigError::Done(e.kind()))? {
            trace!("waiting for done");
            let us = poller.next_delay_us()?;
            delay.delay_us(us);
        }
        self.state = ConfigState::Running;

        let level = self.done.is_high().map_err(|e| ConfigError::Done(e.kind()))?;
        info!("FPGA state: {}", level);
        Ok(level)
    }

    /// Ends the session, handing the pins back.
    pub fn into_parts(self) -> (RST, DONE, CLK) {
        (self.creset, self.done, self.cclk)
    }
}
