//! nX-U8 Interrupt Controller
//!
//! Registers (SFR offsets):
//!   0x10-0x12: IE0-IE2  - per-source enable
//!   0x14-0x16: IRQ0-IRQ2 - per-source request flags
//!
//! TI MathPrint models only wire the watchdog, with its request flag at 0x18.
//!
//! Sources (IRQ register, bit -> vector):
//! - 0x14 bit 0: WDT (level 2, cannot be masked)
//! - 0x14 bits 1-4: external XI0-XI3
//! - 0x14 bit 5: Timer 0
//! - 0x15 bit 7: RTC
//!
//! Only the lowest set bit of each request register is considered per poll,
//! and at most one source is dispatched per step. After a dispatch the
//! controller holds off for two steps so the handler's first instructions run.

use std::ops::RangeInclusive;

use crate::config::HardwareId;
use crate::cpu::{psw, Registers};
use crate::sfr::{regs, SfrFile};

/// Steps after a dispatch during which no other source is taken
const SETTLE_STEPS: u8 = 2;

/// One interrupt source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IrqSource {
    pub name: &'static str,
    /// Request register (SFR offset)
    pub flag_reg: u16,
    pub bit: u8,
    /// Enable register, None for non-maskable sources
    pub enable_reg: Option<u16>,
    /// Vector table address in code segment 0
    pub vector: u16,
    /// Exception level the handler runs at
    pub level: u8,
}

const fn maskable(name: &'static str, flag_reg: u16, bit: u8, vector: u16) -> IrqSource {
    IrqSource {
        name,
        flag_reg,
        bit,
        enable_reg: Some(flag_reg - 4),
        vector,
        level: 1,
    }
}

const fn watchdog(flag_reg: u16) -> IrqSource {
    IrqSource {
        name: "WDTINT",
        flag_reg,
        bit: 0,
        enable_reg: None,
        vector: 0x08,
        level: 2,
    }
}

const STANDARD_SOURCES: [IrqSource; 18] = [
    watchdog(regs::IRQ0),
    maskable("XI0INT", 0x14, 1, 0x0A),
    maskable("XI1INT", 0x14, 2, 0x0C),
    maskable("XI2INT", 0x14, 3, 0x0E),
    maskable("XI3INT", 0x14, 4, 0x10),
    maskable("TM0INT", 0x14, 5, 0x12),
    maskable("L256SINT", 0x14, 6, 0x14),
    maskable("L1024SINT", 0x14, 7, 0x16),
    maskable("L4096SINT", 0x15, 0, 0x18),
    maskable("L16384SINT", 0x15, 1, 0x1A),
    maskable("SIO0INT", 0x15, 2, 0x1C),
    maskable("I2C0INT", 0x15, 3, 0x1E),
    maskable("I2C1INT", 0x15, 4, 0x20),
    maskable("BENDINT", 0x15, 5, 0x22),
    maskable("BLOWINT", 0x15, 6, 0x24),
    maskable("RTCINT", 0x15, 7, 0x26),
    maskable("AL0INT", 0x16, 0, 0x28),
    maskable("AL1INT", 0x16, 1, 0x2A),
];

/// Watchdog request register on TI MathPrint models
pub const MATHPRINT_WDT_FLAG: u16 = 0x18;

/// Interrupt controller for nX-U8 calculators
#[derive(Debug, Clone)]
pub struct InterruptController {
    sources: Vec<IrqSource>,
    /// Request registers scanned by `poll`
    scan: RangeInclusive<u16>,
    /// Steps left before another dispatch is allowed
    settle: u8,
}

impl InterruptController {
    pub fn new(hardware: HardwareId) -> Self {
        if hardware == HardwareId::TiMathPrint {
            Self {
                sources: vec![watchdog(MATHPRINT_WDT_FLAG)],
                scan: MATHPRINT_WDT_FLAG..=0x1F,
                settle: 0,
            }
        } else {
            Self {
                sources: STANDARD_SOURCES.to_vec(),
                scan: regs::IRQ0..=0x15,
                settle: 0,
            }
        }
    }

    pub fn reset(&mut self) {
        self.settle = 0;
    }

    pub fn sources(&self) -> &[IrqSource] {
        &self.sources
    }

    pub fn source(&self, flag_reg: u16, bit: u8) -> Option<&IrqSource> {
        self.sources
            .iter()
            .find(|s| s.flag_reg == flag_reg && s.bit == bit)
    }

    /// A dispatch happened recently
    pub fn settling(&self) -> bool {
        self.settle != 0
    }

    pub fn settle_steps(&self) -> u8 {
        self.settle
    }

    /// Count down the post-dispatch hold-off
    pub fn tick_settle(&mut self) {
        self.settle = self.settle.saturating_sub(1);
    }

    fn eligible(source: &IrqSource, sfr: &SfrFile, psw_value: u8) -> bool {
        let enabled = source
            .enable_reg
            .map_or(true, |reg| sfr.read(reg) & (1 << source.bit) != 0);
        let priority = match source.level {
            2 => true,
            _ => psw_value & psw::MIE != 0 && psw_value & psw::ELEVEL < 1,
        };
        enabled && priority
    }

    /// First source that would be taken with the given PSW, if any
    pub fn poll(&self, sfr: &SfrFile, psw_value: u8) -> Option<IrqSource> {
        for reg in self.scan.clone() {
            let flags = sfr.read(reg);
            if flags == 0 {
                continue;
            }
            let bit = flags.trailing_zeros() as u8;
            match self.source(reg, bit) {
                Some(source) if Self::eligible(source, sfr, psw_value) => return Some(*source),
                Some(_) => {}
                None => log::debug!("request {:02X} bit {} has no vector", reg, bit),
            }
        }
        None
    }

    /// Take an interrupt: clear its request, save the context for its level
    /// and jump to `target` (the vector contents) in segment 0.
    pub fn enter(
        &mut self,
        source: &IrqSource,
        sfr: &mut SfrFile,
        cpu: &mut Registers,
        target: u16,
    ) {
        sfr.clear_bits(source.flag_reg, 1 << source.bit);

        let slot = (source.level.clamp(1, 3) - 1) as usize;
        cpu.elr[slot] = cpu.pc;
        cpu.ecsr[slot] = cpu.csr;
        cpu.epsw[slot] = cpu.psw;
        cpu.psw &= if source.level == 2 { 0xFC } else { 0xF4 };
        cpu.psw |= source.level;
        cpu.csr = 0;
        cpu.pc = target;

        self.settle = SETTLE_STEPS;
        log::debug!(
            "{} taken from {:X}:{:04X}H -> {:04X}H",
            source.name,
            cpu.ecsr[slot],
            cpu.elr[slot],
            target
        );
    }
}

impl Default for InterruptController {
    fn default() -> Self {
        Self::new(HardwareId::default())
    }
}
