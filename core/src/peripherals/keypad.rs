//! Keyboard matrix scanner
//!
//! Registers (SFR offsets):
//!   0x40: KI  - row sense, active low (computed here)
//!   0x41: KIU / pull-up control
//!   0x42: KIM - per-row wake mask
//!   0x43: KIC
//!   0x44: KO  - column drive, inverted (ko_mode 1)
//!   0x46: KO  - column drive, direct (ko_mode 0)
//!
//! The scanner keeps no state of its own: KI is a function of the column drive
//! byte and the set of keys currently held, recomputed after every step.

use crate::sfr::{regs, SfrFile};

/// A key on the calculator face
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Key {
    /// Matrix position: KI row bit, KO column bit
    Matrix { ki: u8, ko: u8 },
    /// Syscall key code (TI MathPrint)
    Code(u8),
    /// The reset button, handled by the orchestrator
    Reset,
}

impl Key {
    pub const fn matrix(ki: u8, ko: u8) -> Self {
        Key::Matrix { ki, ko }
    }

    /// Syscall key code for this key
    pub fn code(self) -> u8 {
        match self {
            Key::Matrix { ki, ko } => (ko << 4) | (ki & 0x0F),
            Key::Code(code) => code,
            Key::Reset => 0,
        }
    }
}

/// Keyboard mailbox bytes that mark an acknowledged key in emulator firmware
const MAILBOX_IDLE: [u8; 2] = [1 << 2, 1 << 4];

/// Keyboard matrix scanner
#[derive(Debug, Clone)]
pub struct KeypadController {
    /// 1: drive from !KO(0x44), 0: drive from 0x46
    ko_mode: u8,
}

impl KeypadController {
    pub fn new(ko_mode: u8) -> Self {
        Self { ko_mode }
    }

    pub fn reset(&mut self) {}

    pub fn ko_mode(&self) -> u8 {
        self.ko_mode
    }

    /// Column drive byte the program last wrote
    pub fn drive(&self, sfr: &SfrFile) -> u8 {
        if self.ko_mode != 0 {
            !sfr.read(regs::KO)
        } else {
            sfr.read(regs::KO_DIRECT)
        }
    }

    /// Row sense for a drive byte: a row reads 0 when any held key on it sits
    /// in a driven column.
    pub fn sense<'a>(drive: u8, pressed: impl IntoIterator<Item = &'a Key>) -> u8 {
        pressed.into_iter().fold(0xFF, |ki, key| match *key {
            Key::Matrix { ki: row, ko } if ko < 8 && drive & (1 << ko) != 0 => {
                ki & !(1u8 << (row & 7))
            }
            _ => ki,
        })
    }

    /// Recompute KI into the SFR file and return it
    pub fn scan<'a>(&self, sfr: &mut SfrFile, pressed: impl IntoIterator<Item = &'a Key>) -> u8 {
        let ki = Self::sense(self.drive(sfr), pressed);
        sfr.write(regs::KI, ki);
        ki
    }

    /// Emulator firmware mailbox rule: a pending command 2 or 8 is dropped
    /// unless the key bytes show the idle pattern.
    pub fn mailbox_stale(mailbox: [u8; 3]) -> bool {
        matches!(mailbox[0], 2 | 8) && [mailbox[1], mailbox[2]] != MAILBOX_IDLE
    }

    /// Key press on retail hardware: raise the KI request and report whether
    /// the row is enabled as a STOP wake source.
    pub fn press_interrupt(&self, key: Key, sfr: &mut SfrFile) -> bool {
        sfr.write(regs::IRQ0, 0x02);
        match key {
            Key::Matrix { ki, .. } => sfr.read(regs::KIM) & (1 << (ki & 7)) != 0,
            _ => false,
        }
    }
}

impl Default for KeypadController {
    fn default() -> Self {
        Self::new(0)
    }
}
