//! nX-U8 calculator peripheral emulation
//!
//! All peripherals live behind the 4KB SFR window at data address 0xF000:
//! - Standby controller (0xF008-0xF009)
//! - Watchdog (0xF00E-0xF00F)
//! - Interrupt enable/request registers (0xF010-0xF016)
//! - Timer 0 (0xF020-0xF025)
//! - Keyboard matrix (0xF040-0xF046)
//! - Decimal coprocessor (0xF400-0xF4FF, ClassWiz)
//! - Display RAM (0xF800-)
//!
//! Which of them exist, and which SFR addresses they claim, depends on the
//! hardware profile. Claims are made once at construction through the
//! [`SfrRegistry`]; a program write then goes through the claimant's hook and
//! the hook's result is what lands in the register file.

pub mod bcd;
pub mod interrupt;
pub mod keypad;
pub mod screen;
pub mod standby;
pub mod timer;
pub mod watchdog;

pub use bcd::BcdEngine;
pub use interrupt::{InterruptController, IrqSource};
pub use keypad::{Key, KeypadController};
pub use screen::{Frame, ScreenController};
pub use standby::StandbyController;
pub use timer::Timer;
pub use watchdog::WatchdogController;

use std::time::Instant;

use crate::config::{EmuConfig, HardwareId};
use crate::error::EmuError;
use crate::sfr::{regs, BcdReg, SfrFile, SfrHook, SfrRegistry, StandbyReg};

/// Model register on TI MathPrint: reads 6 after reset, 0x34 once written
const MATHPRINT_MODEL: u16 = 0x900;
/// Watchdog acknowledge on TI MathPrint
const MATHPRINT_WDT_ACK: u16 = 0x901;
/// Column drive register value the fx-5800P keyboard always reports
const FX5800P_KO: u8 = 4;

/// TI MathPrint SFR contents after reset (the rest of the file reads 0xFF)
const MATHPRINT_RESET: &[(u16, u8)] = &[
    (0x01, 0x30),
    (0x02, 0x13),
    (0x03, 0x03),
    (0x04, 0x02),
    (0x05, 0x40),
    (0x0A, 0x03),
    (regs::WDTCON, 0x00),
    (regs::WDTMOD, 0x82),
    (MATHPRINT_MODEL, 0x06),
];

/// Peripheral subsystem: the SFR file and every controller that hooks it
#[derive(Debug, Clone)]
pub struct Peripherals {
    /// Raw register contents
    pub sfr: SfrFile,
    registry: SfrRegistry,
    pub standby: StandbyController,
    pub timer: Timer,
    pub watchdog: WatchdogController,
    pub keypad: KeypadController,
    pub screen: ScreenController,
    /// Present on ClassWiz unless configured off
    pub bcd: Option<BcdEngine>,
    config: EmuConfig,
}

impl Peripherals {
    /// Build the peripherals for a profile and claim their SFRs
    pub fn new(config: &EmuConfig) -> Result<Self, EmuError> {
        let wdt_flag = if config.hardware == HardwareId::TiMathPrint {
            (interrupt::MATHPRINT_WDT_FLAG, 0x01)
        } else {
            (regs::IRQ0, 0x01)
        };

        let mut p = Self {
            sfr: SfrFile::new(),
            registry: SfrRegistry::new(),
            standby: StandbyController::new(),
            timer: Timer::new(),
            watchdog: WatchdogController::new(config.watchdog_enabled(), wdt_flag),
            keypad: KeypadController::new(config.ko_mode()),
            screen: ScreenController::new(config),
            bcd: config.bcd_enabled().then(BcdEngine::new),
            config: config.clone(),
        };
        p.install()?;
        p.reset();
        Ok(p)
    }

    fn install(&mut self) -> Result<(), EmuError> {
        let cfg = &self.config;
        let reg = &mut self.registry;
        let mathprint = cfg.hardware == HardwareId::TiMathPrint;

        reg.register(regs::WDTCON, 1, "watchdog", SfrHook::WatchdogEnable)?;
        reg.register(regs::WDTMOD, 1, "watchdog", SfrHook::Storage)?;

        if mathprint {
            reg.register(interrupt::MATHPRINT_WDT_FLAG, 1, "interrupt", SfrHook::Storage)?;
            reg.register(MATHPRINT_MODEL, 1, "system", SfrHook::Fixed(0x34))?;
            reg.register(MATHPRINT_WDT_ACK, 1, "watchdog", SfrHook::WatchdogAck)?;
        } else {
            reg.register(regs::IE0, 3, "interrupt", SfrHook::Storage)?;
            reg.register(regs::IRQ0, 3, "interrupt", SfrHook::Storage)?;
        }

        if cfg.has_standby() {
            reg.register(
                regs::STPACP,
                1,
                "standby",
                SfrHook::Standby(StandbyReg::Acceptance),
            )?;
            reg.register(
                regs::SBYCON,
                1,
                "standby",
                SfrHook::Standby(StandbyReg::Control),
            )?;
            reg.register(regs::TM0D, 6, "timer", SfrHook::Storage)?;

            let keypad_len = if cfg.hardware == HardwareId::Es { 4 } else { 6 };
            reg.register(regs::KI + 1, keypad_len, "keypad", SfrHook::Storage)?;
            if cfg.is_5800p() {
                reg.register(regs::KO_DIRECT, 1, "keypad", SfrHook::Fixed(FX5800P_KO))?;
            }
        }

        if !mathprint {
            for (start, used) in self.screen.sfr_rows() {
                reg.register(start, used, "screen", SfrHook::ScreenData)?;
            }
            reg.register(0x30, 2, "screen", SfrHook::Mask(0x07))?;
            reg.register(0x32, 1, "screen", SfrHook::Mask(0x1F))?;
            reg.register(0x33, 1, "screen", SfrHook::Mask(0x07))?;
            if cfg.real_hardware && cfg.hardware == HardwareId::ClassWizCw {
                reg.register(screen::PLANE_SELECT, 1, "screen", SfrHook::ScreenPlaneSelect)?;
            }
        }

        if self.bcd.is_some() {
            use bcd::regs as b;
            reg.register(b::CMD, 1, "bcd", SfrHook::Bcd(BcdReg::Command))?;
            reg.register(b::CON, 1, "bcd", SfrHook::Bcd(BcdReg::Control))?;
            reg.register(b::MCN, 1, "bcd", SfrHook::Bcd(BcdReg::MacroCount))?;
            reg.register(b::MCR, 1, "bcd", SfrHook::Bcd(BcdReg::MacroControl))?;
            reg.register(b::FLG, 1, "bcd", SfrHook::ReadOnly)?;
            reg.register(b::LLZ, 2, "bcd", SfrHook::ReadOnly)?;
            reg.register(b::BANK, b::BANK_SIZE, "bcd", SfrHook::Storage)?;
        }

        log::debug!("{} peripherals installed", cfg.hardware.name());
        Ok(())
    }

    /// Return the register file and every controller to power-on state
    pub fn reset(&mut self) {
        self.sfr.reset();
        if self.config.hardware == HardwareId::TiMathPrint {
            self.load_mathprint_defaults();
        }
        if self.config.has_standby() {
            self.sfr.write(regs::PD, self.config.pd_value);
        }
        if self.config.is_5800p() {
            self.sfr.write(regs::KO_DIRECT, FX5800P_KO);
        }

        self.standby.reset();
        self.timer.reset();
        self.watchdog.reset();
        self.keypad.reset();
        self.screen.reset();
        if let Some(bcd) = &mut self.bcd {
            bcd.reset(&mut self.sfr);
        }
    }

    /// Core-only reset (reset key): leave STOP mode. RAM-side state and the
    /// SFR file survive, except on TI MathPrint where the boot values are
    /// written back.
    pub fn reset_core(&mut self) {
        self.standby.wake();
        if self.config.hardware == HardwareId::TiMathPrint {
            self.load_mathprint_defaults();
        }
    }

    fn load_mathprint_defaults(&mut self) {
        self.sfr.fill(0xFF);
        for &(index, value) in MATHPRINT_RESET {
            self.sfr.write(index, value);
        }
        for index in 0x10..0x4F {
            self.sfr.write(index, 0x00);
        }
    }

    pub fn config(&self) -> &EmuConfig {
        &self.config
    }

    pub fn registry(&self) -> &SfrRegistry {
        &self.registry
    }

    /// Read an SFR (offset from 0xF000)
    pub fn read_sfr(&self, index: u16) -> u8 {
        let value = self.sfr.read(index);
        log::trace!("SFR read {:04X}H = {:02X}", 0xF000 + index as u32, value);
        value
    }

    /// True the first time the program touches an address nobody claimed
    pub(crate) fn report_unclaimed(&mut self, index: u16) -> bool {
        self.registry.hook(index).is_none() && self.registry.first_unclaimed_access(index)
    }

    /// Write an SFR through its hook. Returns the value committed.
    pub fn write_sfr(&mut self, index: u16, value: u8) -> u8 {
        let committed = match self.registry.hook(index) {
            Some(hook) => self.apply(hook, index, value),
            None => value,
        };
        self.sfr.write(index, committed);
        log::trace!(
            "SFR write {:04X}H = {:02X} (committed {:02X})",
            0xF000 + index as u32,
            value,
            committed
        );
        committed
    }

    fn apply(&mut self, hook: SfrHook, index: u16, value: u8) -> u8 {
        match hook {
            SfrHook::Storage => value,
            SfrHook::ReadOnly => self.sfr.read(index),
            SfrHook::Mask(mask) => value & mask,
            SfrHook::Fixed(fixed) => fixed,
            SfrHook::Standby(reg) => self.standby.write(reg, value, &mut self.sfr),
            SfrHook::WatchdogEnable => self.watchdog.write_enable(value),
            SfrHook::WatchdogAck => (value == 0) as u8,
            SfrHook::ScreenPlaneSelect => self.screen.select_plane(value),
            SfrHook::ScreenData => self.screen.write_data(index, value),
            SfrHook::Bcd(reg) => match &mut self.bcd {
                Some(bcd) => bcd.write(reg, value, &mut self.sfr),
                None => value,
            },
        }
    }

    /// Advance timer 0 while stopped. Returns true if it woke the core.
    pub fn poll_timer(&mut self, now: Instant) -> bool {
        if !self.config.has_standby() {
            return false;
        }
        self.timer.poll(now, &mut self.sfr, &mut self.standby)
    }

    /// Count one executed step on the watchdog. Returns true on overflow.
    pub fn tick_watchdog(&mut self) -> bool {
        self.watchdog.tick(&mut self.sfr)
    }

    /// Recompute KI from the held keys
    pub fn scan_keys<'a>(&mut self, pressed: impl IntoIterator<Item = &'a Key>) -> Option<u8> {
        if !self.config.has_standby() {
            return None;
        }
        Some(self.keypad.scan(&mut self.sfr, pressed))
    }

    /// Retail key press: raise the keyboard request and wake the core if the
    /// row is a STOP wake source.
    pub fn key_interrupt(&mut self, key: Key) {
        if self.keypad.press_interrupt(key, &mut self.sfr) {
            self.standby.wake();
        }
    }

    /// Current column drive byte
    pub fn key_drive(&self) -> u8 {
        self.keypad.drive(&self.sfr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peripherals(hw: HardwareId) -> Peripherals {
        Peripherals::new(&EmuConfig::new(hw)).unwrap()
    }

    #[test]
    fn test_install_all_profiles() {
        for hw in [
            HardwareId::Solar2,
            HardwareId::Es,
            HardwareId::EsPlus,
            HardwareId::ClassWizEx,
            HardwareId::ClassWizCw,
            HardwareId::TiMathPrint,
        ] {
            let p = Peripherals::new(&EmuConfig::new(hw));
            assert!(p.is_ok(), "{:?}: {:?}", hw, p.err());
        }

        let mut cfg = EmuConfig::new(HardwareId::Es);
        cfg.is_5800p = true;
        assert!(Peripherals::new(&cfg).is_ok());

        let mut cfg = EmuConfig::new(HardwareId::ClassWizCw);
        cfg.real_hardware = true;
        assert!(Peripherals::new(&cfg).is_ok());
    }

    #[test]
    fn test_owners() {
        let p = peripherals(HardwareId::ClassWizEx);
        assert_eq!(p.registry().owner(0x08), Some("standby"));
        assert_eq!(p.registry().owner(0x0E), Some("watchdog"));
        assert_eq!(p.registry().owner(0x25), Some("timer"));
        assert_eq!(p.registry().owner(0x46), Some("keypad"));
        assert_eq!(p.registry().owner(0x405), Some("bcd"));
        assert_eq!(p.registry().owner(0x4FF), Some("bcd"));
        assert_eq!(p.registry().owner(0x800), Some("screen"));
        assert_eq!(p.registry().owner(0x818), None);

        let es = peripherals(HardwareId::Es);
        assert_eq!(es.registry().owner(0x44), Some("keypad"));
        assert_eq!(es.registry().owner(0x46), None);
        assert_eq!(es.registry().owner(0x400), None);
    }

    #[test]
    fn test_masked_and_unclaimed_writes() {
        let mut p = peripherals(HardwareId::EsPlus);
        assert_eq!(p.write_sfr(0x30, 0xFF), 0x07);
        assert_eq!(p.write_sfr(0x32, 0xFF), 0x1F);
        assert_eq!(p.read_sfr(0x30), 0x07);

        // Unclaimed: stored as written, reported once
        assert!(p.report_unclaimed(0x123));
        assert!(!p.report_unclaimed(0x123));
        assert_eq!(p.write_sfr(0x123, 0xAB), 0xAB);
        assert_eq!(p.read_sfr(0x123), 0xAB);

        assert!(!p.report_unclaimed(0x30));
    }

    #[test]
    fn test_standby_through_hooks() {
        let mut p = peripherals(HardwareId::EsPlus);
        p.sfr.write_word(regs::TM0C, 0x1111);
        assert_eq!(p.write_sfr(regs::STPACP, 0x50), 0);
        assert_eq!(p.write_sfr(regs::STPACP, 0xA0), 0);
        p.write_sfr(regs::SBYCON, 0x02);
        assert!(p.standby.stop_mode());
        assert_eq!(p.sfr.read_word(regs::TM0C), 0);
    }

    #[test]
    fn test_watchdog_enable_commit() {
        let mut p = peripherals(HardwareId::EsPlus);
        assert_eq!(p.write_sfr(regs::WDTCON, 0x5A), 1);
        assert!(p.watchdog.is_armed());
        assert_eq!(p.write_sfr(regs::WDTCON, 0x00), 0);
        assert!(p.watchdog.is_armed());
    }

    #[test]
    fn test_fx5800p_column_register() {
        let mut cfg = EmuConfig::new(HardwareId::Es);
        cfg.is_5800p = true;
        let mut p = Peripherals::new(&cfg).unwrap();
        assert_eq!(p.read_sfr(regs::KO_DIRECT), 4);
        assert_eq!(p.write_sfr(regs::KO_DIRECT, 0x12), 4);
        assert_eq!(p.read_sfr(regs::KO_DIRECT), 4);
    }

    #[test]
    fn test_mathprint_reset_values() {
        let mut p = peripherals(HardwareId::TiMathPrint);
        assert_eq!(p.read_sfr(0x02), 0x13);
        assert_eq!(p.read_sfr(regs::WDTMOD), 0x82);
        assert_eq!(p.read_sfr(0x900), 0x06);
        assert_eq!(p.read_sfr(0x20), 0x00);
        assert_eq!(p.read_sfr(0x4F), 0xFF);
        assert_eq!(p.read_sfr(0x800), 0xFF);

        assert_eq!(p.write_sfr(0x900, 0x00), 0x34);
        assert_eq!(p.write_sfr(0x901, 0x00), 1);
        assert_eq!(p.write_sfr(0x901, 0x07), 0);
        assert!(p.watchdog.is_enabled());
        assert_eq!(p.watchdog.mode(), 2);
        // No standby on this profile
        assert!(!p.poll_timer(Instant::now()));
    }

    #[test]
    fn test_bcd_hooks_wired() {
        let mut p = peripherals(HardwareId::ClassWizCw);
        assert_eq!(p.read_sfr(bcd::regs::CMD), 0xFF);
        assert_eq!(p.write_sfr(bcd::regs::CON, 0x00), 1);

        p.write_sfr(0x480, 0x12);
        p.write_sfr(0x4A0, 0x09);
        assert_eq!(p.write_sfr(bcd::regs::CMD, 0x14), 0xFF);
        assert_eq!(p.read_sfr(0x480), 0x21);

        // Status registers ignore program writes
        p.write_sfr(bcd::regs::FLG, 0xC0);
        assert_eq!(p.read_sfr(bcd::regs::FLG), 0x00);

        let mut cfg = EmuConfig::new(HardwareId::ClassWizCw);
        cfg.bcd = Some(false);
        let p = Peripherals::new(&cfg).unwrap();
        assert!(p.bcd.is_none());
        assert_eq!(p.registry().owner(bcd::regs::CMD), None);
    }

    #[test]
    fn test_screen_hook_updates_grid() {
        let mut p = peripherals(HardwareId::EsPlus);
        p.write_sfr(0x810, 0x80);
        assert_eq!(p.screen.pixel(1, 0), 3);
        assert_eq!(p.read_sfr(0x810), 0x80);
    }

    #[test]
    fn test_scan_keys() {
        let mut p = peripherals(HardwareId::ClassWizEx);
        p.write_sfr(regs::KO_DIRECT, 1 << 2);
        let keys = [Key::matrix(4, 2)];
        assert_eq!(p.scan_keys(&keys), Some(!(1u8 << 4)));
        assert_eq!(p.read_sfr(regs::KI), !(1u8 << 4));

        let mut mp = peripherals(HardwareId::TiMathPrint);
        assert_eq!(mp.scan_keys(&keys), None);
    }

    #[test]
    fn test_pd_value() {
        let mut cfg = EmuConfig::new(HardwareId::EsPlus);
        cfg.pd_value = 0x05;
        let mut p = Peripherals::new(&cfg).unwrap();
        assert_eq!(p.read_sfr(regs::PD), 0x05);
        p.write_sfr(regs::PD, 0x00);
        p.reset();
        assert_eq!(p.read_sfr(regs::PD), 0x05);
    }
}
