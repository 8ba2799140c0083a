//! nX-U8 Calculator Emulator Core
//!
//! This crate provides everything around an nX-U8/100 CPU core that turns it
//! into a calculator: bus decoding, peripheral registers, interrupts, standby,
//! keyboard and display. The instruction executor itself is supplied by the
//! host through the [`Cpu`] trait. No windowing or file APIs are used; ROM and
//! flash images come in as byte buffers.
//!
//! # Architecture
//!
//! The emulator is organized into several modules:
//! - `config`: hardware profiles and knobs
//! - `memory`: backing buffers for ROM, RAM and flash
//! - `bus`: per-profile region table and access routing
//! - `sfr`: the SFR file and its write-hook registry
//! - `peripherals`: standby, timer, watchdog, keyboard, display, BCD unit,
//!   interrupt controller
//! - `breakpoint`, `calltrace`, `disasm`, `rom_info`: debugging aids
//! - `emu`: the step orchestrator
//!
//! # Data Memory Map (segment 0, ES PLUS)
//!
//! | Address Range   | Region              |
//! |-----------------|---------------------|
//! | 0x0000 - 0x7FFF | ROM window          |
//! | 0x8000 - 0xEFFF | RAM                 |
//! | 0xF000          | DSR                 |
//! | 0xF001 - 0xFFFF | Special registers   |

pub mod breakpoint;
pub mod bus;
pub mod calltrace;
pub mod config;
pub mod cpu;
pub mod disasm;
pub mod error;
pub mod memory;
pub mod peripherals;
pub mod rom_info;
pub mod sfr;
mod emu;

#[cfg(test)]
mod emu_integration_test;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use breakpoint::{BreakHit, BreakKind, Breakpoint, BreakpointEngine};
pub use bus::{Access, AccessKind, Bus, MemoryRegion};
pub use calltrace::CallTraceEntry;
pub use config::{EmuConfig, HardwareId};
pub use cpu::{Cpu, Registers};
pub use disasm::{Decoded, Disassembler};
pub use emu::{Emu, RegistersSnapshot, StepControl, StepInfo};
pub use error::{EmuError, Fault};
pub use peripherals::{Frame, Key};
pub use rom_info::{RomInfo, RomInfoError};

/// Thread-safe wrapper for the emulator.
///
/// The stepping thread and a debugger/UI thread share one `Emu` through the
/// mutex. The single-step flag is held outside the lock so a free-running
/// loop can be stopped without waiting for it.
#[derive(Debug)]
pub struct SyncEmu<C: Cpu> {
    inner: Mutex<Emu<C>>,
    control: StepControl,
}

impl<C: Cpu> SyncEmu<C> {
    pub fn new(emu: Emu<C>) -> Self {
        let control = emu.control();
        Self {
            inner: Mutex::new(emu),
            control,
        }
    }

    /// Lock the emulator. A panic on another thread while it held the lock
    /// does not make the state unusable, so poisoning is ignored.
    pub fn lock(&self) -> MutexGuard<'_, Emu<C>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn control(&self) -> &StepControl {
        &self.control
    }

    /// Step until single-step mode is entered or `max_steps` have run,
    /// taking the lock once per step so other threads can interleave.
    pub fn run(&self, max_steps: usize) -> usize {
        let mut steps = 0;
        while steps < max_steps && !self.control.is_single_step() {
            self.lock().step();
            steps += 1;
        }
        steps
    }

    pub fn into_inner(self) -> Emu<C> {
        self.inner.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}
