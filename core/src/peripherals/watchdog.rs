//! Watchdog Timer
//!
//! Registers (SFR offsets):
//!   0x0E: WDTCON - enable latch, only the 0x5A key changes it
//!   0x0F: WDTMOD - bits 0-1 select the overflow period
//!
//! The counter is driven by executed instructions rather than host time. On
//! overflow the WDT request flag is raised and the counter reloads from the
//! period selected by WDTMOD at that moment.

use crate::sfr::{regs, SfrFile};

/// Watchdog Controller
#[derive(Debug, Clone)]
pub struct WatchdogController {
    /// Counting enabled for this profile
    enabled: bool,
    /// Selected period index
    mode: u8,
    /// Steps until overflow
    counter: u32,
    /// State of the WDTCON latch
    armed: bool,
    /// Request flag location (SFR offset, bit mask)
    flag: (u16, u8),
}

impl WatchdogController {
    /// Overflow periods in steps, indexed by mode
    pub const PERIODS: [u32; 4] = [4096, 16384, 65536, 262144];

    /// Mode selected at power-on
    const DEFAULT_MODE: u8 = 2;

    /// Unlock key for WDTCON
    pub const KEY: u8 = 0x5A;

    pub fn new(enabled: bool, flag: (u16, u8)) -> Self {
        Self {
            enabled,
            mode: Self::DEFAULT_MODE,
            counter: Self::PERIODS[Self::DEFAULT_MODE as usize],
            armed: false,
            flag,
        }
    }

    pub fn reset(&mut self) {
        self.start(Self::DEFAULT_MODE);
        self.armed = false;
    }

    /// Restart counting from the given mode's period
    pub fn start(&mut self, mode: u8) {
        self.mode = mode & 3;
        self.counter = Self::PERIODS[self.mode as usize];
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn mode(&self) -> u8 {
        self.mode
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }

    /// WDTCON write hook. Only the key toggles the latch (and restarts the
    /// count); anything else leaves it as it was. The register itself reads
    /// back 1 right after a key write and 0 after anything else.
    pub fn write_enable(&mut self, value: u8) -> u8 {
        let key = value == Self::KEY;
        if key {
            self.armed = !self.armed;
            self.counter = Self::PERIODS[self.mode as usize];
            log::debug!("WDTCON key accepted, latch = {}", self.armed);
        }
        key as u8
    }

    /// Count one executed step. Returns true on overflow.
    pub fn tick(&mut self, sfr: &mut SfrFile) -> bool {
        if !self.enabled {
            return false;
        }
        self.counter = self.counter.saturating_sub(1);
        if self.counter != 0 {
            return false;
        }

        let (flag_reg, flag_mask) = self.flag;
        sfr.set_bits(flag_reg, flag_mask);
        self.start(sfr.read(regs::WDTMOD));
        log::debug!("watchdog overflow, reload mode {}", self.mode);
        true
    }
}

impl Default for WatchdogController {
    fn default() -> Self {
        Self::new(false, (regs::IRQ0, 0x01))
    }
}
