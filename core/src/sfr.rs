//! Special function registers
//!
//! The SFR window is 4KB at data address 0xF000. [`SfrFile`] holds the raw
//! register bytes; [`SfrRegistry`] records which peripheral owns each address
//! and what happens when the program writes to it.
//!
//! A hook receives the attempted value and yields the value that is actually
//! stored, which lets a peripheral clamp, mask, latch or swallow writes.
//! Addresses nobody claimed behave as plain storage.

use crate::error::EmuError;
use crate::memory::addr::SFR_SIZE;

/// SFR offsets (relative to 0xF000) shared between peripherals
pub mod regs {
    /// Data segment register mirror
    pub const DSR: u16 = 0x00;
    /// Stop acceptor
    pub const STPACP: u16 = 0x08;
    /// Standby control
    pub const SBYCON: u16 = 0x09;
    /// Watchdog enable latch
    pub const WDTCON: u16 = 0x0E;
    /// Watchdog mode
    pub const WDTMOD: u16 = 0x0F;
    /// First interrupt enable register
    pub const IE0: u16 = 0x10;
    /// First interrupt request register
    pub const IRQ0: u16 = 0x14;
    /// Timer 0 target (low, high)
    pub const TM0D: u16 = 0x20;
    /// Timer 0 counter (low, high)
    pub const TM0C: u16 = 0x22;
    /// Timer 0 control (bit 0 = run)
    pub const TM0CON: u16 = 0x25;
    /// Keyboard input (row sense)
    pub const KI: u16 = 0x40;
    /// Keyboard interrupt enable mask
    pub const KIM: u16 = 0x42;
    /// Keyboard output (inverted column drive)
    pub const KO: u16 = 0x44;
    /// Keyboard output (column drive)
    pub const KO_DIRECT: u16 = 0x46;
    /// Model strap pins
    pub const PD: u16 = 0x50;
}

/// Standby controller registers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StandbyReg {
    Acceptance,
    Control,
}

/// BCD coprocessor registers with write side effects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BcdReg {
    Command,
    Control,
    MacroCount,
    MacroControl,
}

/// What a write to a claimed SFR does
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SfrHook {
    /// Claimed, stored unmodified
    Storage,
    /// Program writes are ignored
    ReadOnly,
    /// Stored masked
    Mask(u8),
    /// Always holds the given value
    Fixed(u8),
    Standby(StandbyReg),
    /// Commits 1 for the 0x5A unlock byte, 0 otherwise
    WatchdogEnable,
    /// Commits 1 when 0 is written
    WatchdogAck,
    ScreenPlaneSelect,
    ScreenData,
    Bcd(BcdReg),
}

/// The 4KB register file
#[derive(Debug, Clone)]
pub struct SfrFile {
    bytes: Vec<u8>,
}

impl SfrFile {
    pub fn new() -> Self {
        Self {
            bytes: vec![0x00; SFR_SIZE],
        }
    }

    pub fn reset(&mut self) {
        self.bytes.fill(0x00);
    }

    pub fn fill(&mut self, value: u8) {
        self.bytes.fill(value);
    }

    #[inline]
    pub fn read(&self, index: u16) -> u8 {
        self.bytes[index as usize & (SFR_SIZE - 1)]
    }

    #[inline]
    pub fn write(&mut self, index: u16, value: u8) {
        self.bytes[index as usize & (SFR_SIZE - 1)] = value;
    }

    /// Little-endian 16-bit register pair
    pub fn read_word(&self, index: u16) -> u16 {
        self.read(index) as u16 | ((self.read(index + 1) as u16) << 8)
    }

    pub fn write_word(&mut self, index: u16, value: u16) {
        self.write(index, value as u8);
        self.write(index + 1, (value >> 8) as u8);
    }

    pub fn set_bits(&mut self, index: u16, mask: u8) {
        let v = self.read(index);
        self.write(index, v | mask);
    }

    pub fn clear_bits(&mut self, index: u16, mask: u8) {
        let v = self.read(index);
        self.write(index, v & !mask);
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }
}

impl Default for SfrFile {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy)]
struct Claim {
    owner: &'static str,
    hook: SfrHook,
}

/// Per-address ownership table
#[derive(Debug, Clone)]
pub struct SfrRegistry {
    claims: Vec<Option<Claim>>,
    /// Unclaimed addresses already reported
    reported: Vec<bool>,
}

impl SfrRegistry {
    pub fn new() -> Self {
        Self {
            claims: vec![None; SFR_SIZE],
            reported: vec![false; SFR_SIZE],
        }
    }

    /// Claim `len` addresses starting at `start`. Fails without claiming
    /// anything if any address in the range is already owned.
    pub fn register(
        &mut self,
        start: u16,
        len: u16,
        owner: &'static str,
        hook: SfrHook,
    ) -> Result<(), EmuError> {
        let end = start as usize + len as usize;
        if start == 0 || end > SFR_SIZE {
            return Err(EmuError::SfrOutOfRange { start, len });
        }
        if let Some(index) = (start as usize..end).find(|&i| self.claims[i].is_some()) {
            let existing = self.claims[index].map(|c| c.owner).unwrap_or("?");
            return Err(EmuError::SfrConflict {
                addr: index as u16,
                owner: existing,
            });
        }
        for claim in &mut self.claims[start as usize..end] {
            *claim = Some(Claim { owner, hook });
        }
        log::trace!("SFR {:03X}+{} claimed by {}", start, len, owner);
        Ok(())
    }

    pub fn hook(&self, index: u16) -> Option<SfrHook> {
        self.claims
            .get(index as usize)
            .and_then(|c| c.map(|c| c.hook))
    }

    pub fn owner(&self, index: u16) -> Option<&'static str> {
        self.claims
            .get(index as usize)
            .and_then(|c| c.map(|c| c.owner))
    }

    /// Returns true the first time an unclaimed address is seen
    pub(crate) fn first_unclaimed_access(&mut self, index: u16) -> bool {
        match self.reported.get_mut(index as usize) {
            Some(seen) if !*seen => {
                *seen = true;
                true
            }
            _ => false,
        }
    }
}

impl Default for SfrRegistry {
    fn default() -> Self {
        Self::new()
    }
}
