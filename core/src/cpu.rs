//! nX-U8/100 core interface
//!
//! The instruction executor lives outside this crate. It plugs in through the
//! [`Cpu`] trait and performs every memory access through the [`Bus`], which
//! is how peripherals observe the program.
//!
//! # Register Set
//!
//! Sixteen 8-bit general registers R0-R15, paired as ER0-ER14 (little
//! endian: ERn = R(n+1):Rn). Code addresses are CSR:PC (4-bit segment, 16-bit
//! offset), data addresses DSR:EA. Three exception levels each save PC, CSR
//! and PSW.
//!
//! # References
//! - nX-U8/100 Core Instruction Manual (LAPIS Semiconductor)

use crate::bus::Bus;
use crate::error::Fault;

/// PSW bit positions
pub mod psw {
    /// Exception level mask (bits 0-1)
    pub const ELEVEL: u8 = 0b0000_0011;
    /// Master interrupt enable (bit 3)
    pub const MIE: u8 = 0b0000_1000;
    /// Carry flag (bit 7)
    pub const C: u8 = 0b1000_0000;
}

/// nX-U8 register file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Registers {
    /// R0-R15
    pub gp: [u8; 16],
    pub pc: u16,
    /// Code segment (4 bits)
    pub csr: u8,
    /// Link code segment
    pub lcsr: u8,
    /// Saved code segment per exception level 1-3
    pub ecsr: [u8; 3],
    /// Link register
    pub lr: u16,
    /// Saved PC per exception level 1-3
    pub elr: [u16; 3],
    pub psw: u8,
    /// Saved PSW per exception level 1-3
    pub epsw: [u8; 3],
    pub sp: u16,
    /// Effective address register
    pub ea: u16,
    /// Data segment
    pub dsr: u8,
}

impl Registers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read register pair ERn (n even)
    pub fn er(&self, n: usize) -> u16 {
        let n = n & 0x0E;
        u16::from_le_bytes([self.gp[n], self.gp[n + 1]])
    }

    /// Write register pair ERn (n even)
    pub fn set_er(&mut self, n: usize, value: u16) {
        let n = n & 0x0E;
        let [lo, hi] = value.to_le_bytes();
        self.gp[n] = lo;
        self.gp[n + 1] = hi;
    }

    /// Current exception level
    pub fn elevel(&self) -> u8 {
        self.psw & psw::ELEVEL
    }

    /// Combined 20-bit code address
    pub fn code_addr(&self) -> u32 {
        ((self.csr as u32) << 16) | self.pc as u32
    }
}

/// Instruction executor for the nX-U8/100 core
///
/// `step` executes exactly one instruction. Faults (undefined opcodes and the
/// like) are reported, not fatal: the orchestrator logs them and carries on.
pub trait Cpu {
    /// Execute one instruction
    fn step(&mut self, bus: &mut Bus) -> Result<(), Fault>;

    /// Reset internal state (registers are re-seeded by the orchestrator)
    fn reset(&mut self);

    fn regs(&self) -> &Registers;

    fn regs_mut(&mut self) -> &mut Registers;

    /// Operand of the SWI executed by the last step, if it was one
    fn last_swi(&self) -> Option<u8> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_pairs() {
        let mut regs = Registers::new();
        regs.set_er(2, 0xBEEF);
        assert_eq!(regs.gp[2], 0xEF);
        assert_eq!(regs.gp[3], 0xBE);
        assert_eq!(regs.er(2), 0xBEEF);
        // Odd index aliases the even pair
        assert_eq!(regs.er(3), 0xBEEF);
    }

    #[test]
    fn test_code_addr() {
        let regs = Registers {
            csr: 0x3,
            pc: 0x1234,
            ..Registers::default()
        };
        assert_eq!(regs.code_addr(), 0x31234);
    }

    #[test]
    fn test_elevel() {
        let regs = Registers {
            psw: psw::MIE | 0x02,
            ..Registers::default()
        };
        assert_eq!(regs.elevel(), 2);
    }
}
