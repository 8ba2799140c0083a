//! Best-effort call stack
//!
//! The orchestrator shows each instruction to the tracer before it executes.
//! BL pushes a frame, RT and POP with PC in the register list pop one. Code
//! that manipulates the stack or LR directly, or returns through an
//! interrupt, desynchronizes the trace; it is a debugging aid only.

use crate::cpu::Registers;

/// Frames kept before the oldest is dropped
pub const MAX_DEPTH: usize = 256;

const RT: u16 = 0xFE1F;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallTraceEntry {
    /// 20-bit address of the called routine
    pub callee: u32,
    /// 20-bit address execution resumes at
    pub return_addr: u32,
}

#[derive(Debug, Clone, Default)]
pub struct CallTrace {
    frames: Vec<CallTraceEntry>,
}

impl CallTrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.frames.clear();
    }

    /// Innermost frame last
    pub fn frames(&self) -> &[CallTraceEntry] {
        &self.frames
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Inspect the instruction at CSR:PC (`word`, followed by `next`) before
    /// it executes.
    pub fn observe(&mut self, regs: &Registers, word: u16, next: u16) {
        let here = regs.code_addr();
        let seg = (regs.csr as u32) << 16;

        if word & 0xF0FF == 0xF001 {
            // BL Cadr
            let callee = (((word >> 8) & 0x0F) as u32) << 16 | next as u32;
            self.push(callee, seg | regs.pc.wrapping_add(4) as u32);
        } else if word & 0xFF1F == 0xF003 {
            // BL ERn
            let n = ((word >> 4) & 0x0E) as usize;
            self.push(seg | regs.er(n) as u32, seg | regs.pc.wrapping_add(2) as u32);
        } else if word == RT || (word & 0xF0FF == 0xF08E && word & 0x0200 != 0) {
            if self.frames.pop().is_none() {
                log::trace!("return at {:05X}H with empty call trace", here);
            }
        }
    }

    fn push(&mut self, callee: u32, return_addr: u32) {
        if self.frames.len() == MAX_DEPTH {
            self.frames.remove(0);
        }
        self.frames.push(CallTraceEntry {
            callee,
            return_addr,
        });
    }
}
