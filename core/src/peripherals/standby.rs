//! Standby (STOP mode) controller
//!
//! Registers (SFR offsets):
//!   0x08: STPACP - stop acceptor, written 0x5n then 0xAn to arm
//!   0x09: SBYCON - bit 1 requests STOP mode once armed
//!
//! STOP only takes effect after the two-phase acceptor sequence. Any other
//! value written after the first phase drops the sequence. The acceptor always
//! reads back as 0. Entering STOP clears the timer 0 counter.

use crate::sfr::{regs, SfrFile, StandbyReg};

/// Standby controller
#[derive(Debug, Clone, Default)]
pub struct StandbyController {
    /// Acceptor latches: [0x5n seen, 0xAn seen]
    stop_accept: [bool; 2],
    /// Instruction clock stopped
    stop_mode: bool,
}

impl StandbyController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.stop_accept = [false; 2];
        self.stop_mode = false;
    }

    pub fn stop_mode(&self) -> bool {
        self.stop_mode
    }

    pub fn stop_accept(&self) -> [bool; 2] {
        self.stop_accept
    }

    /// Leave STOP mode (interrupt, key press, timer match)
    pub fn wake(&mut self) {
        if self.stop_mode {
            log::debug!("leaving STOP mode");
        }
        self.stop_mode = false;
    }

    /// SFR write hook. Returns the committed value.
    pub fn write(&mut self, reg: StandbyReg, value: u8, sfr: &mut SfrFile) -> u8 {
        match reg {
            StandbyReg::Acceptance => {
                self.write_acceptor(value);
                0
            }
            StandbyReg::Control => {
                if value & 0x02 != 0 && self.stop_accept == [true, true] {
                    self.stop_accept = [false; 2];
                    self.stop_mode = true;
                    sfr.write_word(regs::TM0C, 0);
                    log::debug!("entering STOP mode");
                }
                value
            }
        }
    }

    fn write_acceptor(&mut self, value: u8) {
        if self.stop_accept[0] {
            if value & 0xA0 == 0xA0 {
                self.stop_accept[1] = true;
            } else {
                self.stop_accept[0] = false;
            }
        } else if value & 0x50 == 0x50 {
            self.stop_accept[0] = true;
        }
    }
}
