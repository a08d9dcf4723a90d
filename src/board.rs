//! Board pin bindings and the bulk GPIO safe-state pass.
use crate::traits::GpioBank;

/// Board revision. Reserved for variant specific pin remapping; every
/// variant currently uses the pico2-ice bindings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BoardVariant {
    PicoIce,
    #[default]
    Pico2Ice,
}

/// GPIO numbers of the lines this crate drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PinMap {
    pub spi_sck: u8,
    pub spi_mosi: u8,
    pub spi_miso: u8,
    pub flash_cs: u8,
    pub creset: u8,
    pub done: u8,
    pub clock_out: u8,
    /// Number of GPIO indices to sweep when parking unused lines.
    pub gpio_lines: u8,
}

pub const PICO2_ICE: PinMap = PinMap {
    spi_sck: 6,
    spi_mosi: 7,
    spi_miso: 4,
    flash_cs: 5,
    creset: 31,
    done: 40,
    clock_out: 1,
    gpio_lines: 47,
};

impl PinMap {
    pub fn for_variant(_variant: BoardVariant) -> Self {
        PICO2_ICE
    }

    pub fn used(&self) -> [u8; 7] {
        [
            self.spi_sck,
            self.spi_mosi,
            self.spi_miso,
            self.flash_cs,
            self.creset,
            self.done,
            self.clock_out,
        ]
    }

    pub fn is_used(&self, line: u8) -> bool {
        self.used().contains(&line)
    }
}

impl Default for PinMap {
    fn default() -> Self {
        PICO2_ICE
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FloatReport {
    pub floated: u8,
    /// Indices the board does not have.
    pub absent: u8,
}

/// Sets every line not in `map` to a floating input.
pub fn float_unused_pins<G: GpioBank>(bank: &mut G, map: &PinMap) -> Result<FloatReport, G::Error> {
    let mut report = FloatReport::default();
    let lines = bank.line_count().min(map.gpio_lines);
    for line in (0..lines).filter(|l| !map.is_used(*l)) {
        if bank.float(line)? {
            report.floated += 1;
        } else {
            trace!("GPIO{} not present", line);
            report.absent += 1;
        }
    }
    Ok(report)
}
