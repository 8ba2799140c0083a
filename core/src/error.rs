//! Error types
//!
//! Only construction can fail. Once an [`Emu`](crate::Emu) is built, guest
//! misbehavior (open-bus accesses, unknown SFRs, executor faults) is logged and
//! absorbed rather than returned.

use thiserror::Error;

/// Errors raised while building the emulator for a hardware profile
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EmuError {
    #[error("ROM image is empty")]
    EmptyRom,

    #[error("ROM size cannot be odd ({0} bytes)")]
    OddRomSize(usize),

    #[error("ROM image of {0} bytes does not fit the 20-bit code space")]
    RomTooLarge(usize),

    #[error("the fx-5800P profile requires a flash image")]
    MissingFlash,

    #[error("SFR {addr:#05X} is already claimed by {owner}")]
    SfrConflict { addr: u16, owner: &'static str },

    #[error("SFR range {start:#05X}+{len} lies outside the SFR file")]
    SfrOutOfRange { start: u16, len: u16 },
}

/// Fault reported by the external instruction executor
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{reason} at {csr:X}:{pc:04X}H")]
pub struct Fault {
    pub csr: u8,
    pub pc: u16,
    pub reason: String,
}

impl Fault {
    pub fn new(csr: u8, pc: u16, reason: impl Into<String>) -> Self {
        Self {
            csr,
            pc,
            reason: reason.into(),
        }
    }
}
