//! Timing defaults.
use crate::poll::PollConfig;

/// Wait after release-power-down before the flash accepts commands.
pub const WAKE_DELAY_MS: u32 = 1000;
/// Flash status register poll while an erase or program is running.
pub const FLASH_BUSY_POLL: PollConfig = PollConfig::new(10_000, Some(5_000));
/// Retry cadence for acquiring a shared SPI bus.
pub const BUS_ACQUIRE_POLL: PollConfig = PollConfig::new(10, Some(100));
/// How long creset is held low to force the FPGA out of its configuration.
pub const RESET_HOLD_MS: u32 = 1000;
/// Pause after releasing creset before done is sampled.
pub const RELEASE_SETTLE_MS: u32 = 500;
/// FPGA done input poll.
pub const DONE_POLL: PollConfig = PollConfig::new(1_000, Some(5_000));
/// Configuration clock driven on the clock-out pin.
pub const DEFAULT_CLOCK_HZ: u32 = 12_000_000;
/// Configuration clock duty cycle.
pub const CLOCK_DUTY_PERCENT: u8 = 50;

/// Flash-side timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FlashTiming {
    pub wake_delay_ms: u32,
    pub busy_poll: PollConfig,
}

impl Default for FlashTiming {
    fn default() -> Self {
        Self {
            wake_delay_ms: WAKE_DELAY_MS,
            busy_poll: FLASH_BUSY_POLL,
        }
    }
}

/// FPGA-side timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FpgaTiming {
    pub reset_hold_ms: u32,
    pub release_settle_ms: u32,
    pub done_poll: PollConfig,
}

impl Default for FpgaTiming {
    fn default() -> Self {
        Self {
            reset_hold_ms: RESET_HOLD_MS,
            release_settle_ms: RELEASE_SETTLE_MS,
            done_poll: DONE_POLL,
        }
    }
}
