//! Decimal (BCD) coprocessor
//!
//! Registers (SFR offsets):
//!   0x400: BCDCMD - single operation: mode<<4 | src<<2 | dst
//!   0x402: BCDCON - operation length in 16-bit words (1-6)
//!   0x404: BCDMCN - macro repeat count
//!   0x405: BCDMCR - macro select; bit 7 reads back as busy
//!   0x410: BCDFLG - bit 7 carry, bit 6 zero
//!   0x414: BCDLLZ - zero nibbles from the bottom of the destination
//!   0x415: BCDMLZ - zero nibbles from the top of the destination
//!   0x480-0x4FF: four 12-byte working registers at a 0x20 stride
//!
//! A write to BCDCMD or BCDMCR runs the whole operation before the write
//! commits. Macros (multiply, divide, multi-nibble shifts) are sequenced by a
//! small state machine that issues one operation per pass; add and subtract
//! occupy the pipeline for `len / 2` passes.
//!
//! Operation modes:
//!   0: nop        1: add       2: subtract
//!   8: shift left    9: shift right
//!   10: load constant (0, 1, 2 or 5)   11: copy
//!   12: shift left, fill from the previous register
//!   13: shift right, fill from the next register

use crate::sfr::{BcdReg, SfrFile};

/// BCD register offsets
pub mod regs {
    pub const CMD: u16 = 0x400;
    pub const CON: u16 = 0x402;
    pub const MCN: u16 = 0x404;
    pub const MCR: u16 = 0x405;
    pub const FLG: u16 = 0x410;
    pub const LLZ: u16 = 0x414;
    pub const MLZ: u16 = 0x415;
    /// Working register bank
    pub const BANK: u16 = 0x480;
    pub const BANK_SIZE: u16 = 0x80;
    pub const REG_STRIDE: u16 = 0x20;
    pub const REG_BYTES: usize = 12;
}

/// Macro state with nothing left to do
const IDLE: u8 = 0x3F;
/// Macro state requesting the initial operation
const MACRO_START: u8 = 0xFF;
/// BCDCMD value once a command has been consumed
const CMD_DONE: u8 = 0xFF;
const MAX_PASSES: usize = 4096;

const MODE_ADD: u8 = 1;
const MODE_SUB: u8 = 2;

type Reg = [u8; regs::REG_BYTES];

/// One step of the sequencer: the operation to run and the state after it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct MicroOp {
    mode: u8,
    src: u8,
    dst: u8,
    next: u8,
}

const fn op(mode: u8, src: u8, dst: u8, next: u8) -> MicroOp {
    MicroOp {
        mode,
        src,
        dst,
        next,
    }
}

const END: MicroOp = op(0, 0, 0, IDLE);

/// Shift amount for the remaining macro count: 0 = one nibble, 1-3 = 1, 2
/// or 4 bytes.
fn shift_size(count: u8) -> u8 {
    match count {
        8..=u8::MAX => 3,
        4..=7 => 2,
        2..=3 => 1,
        _ => 0,
    }
}

fn reg_addr(reg: u8, pos: u16) -> u16 {
    regs::BANK + (reg as u16 & 3) * regs::REG_STRIDE + pos
}

fn prev_reg(reg: u8) -> u8 {
    (reg + 3) % 4
}

fn next_reg(reg: u8) -> u8 {
    (reg + 1) % 4
}

fn load(sfr: &SfrFile, reg: u8) -> Reg {
    let mut out = [0u8; regs::REG_BYTES];
    for (i, b) in out.iter_mut().enumerate() {
        *b = sfr.read(reg_addr(reg, i as u16));
    }
    out
}

fn store(sfr: &mut SfrFile, reg: u8, value: &Reg) {
    for (i, &b) in value.iter().enumerate() {
        sfr.write(reg_addr(reg, i as u16), b);
    }
}

/// Four-digit decimal add. Subtraction adds the nines' complement with the
/// carry inverted on the way in and out, so the returned flag is a borrow.
fn add_digits(subtract: bool, a: u16, b: u16, carry: bool) -> (u16, bool) {
    let mut carry = carry ^ subtract;
    let mut out = 0u16;
    for shift in (0..16).step_by(4) {
        let x = (a >> shift) & 0xF;
        let mut y = (b >> shift) & 0xF;
        if subtract {
            y = 9u16.wrapping_sub(y) & 0xF;
        }
        let mut sum = x + y + carry as u16;
        carry = sum >= 10;
        if carry {
            sum -= 10;
        }
        out |= (sum & 0xF) << shift;
    }
    (out, carry ^ subtract)
}

/// BCD coprocessor state
#[derive(Debug, Clone, Default)]
pub struct BcdEngine {
    mode: u8,
    src: u8,
    dst: u8,
    /// Operation in flight
    calc_en: bool,
    /// `calc_en` one and two passes ago
    calc_en_d: bool,
    calc_en_dd: bool,
    mul: bool,
    div: bool,
    divsn: bool,
    sft: bool,
    /// Length in words, latched from BCDCON
    calc_len: u8,
    /// Pipeline position of an add/subtract
    calc_pos: u8,
    /// Latched macro select
    bmc: u8,
    macro_state: u8,
    macro_cnt: u8,
}

impl BcdEngine {
    pub fn new() -> Self {
        Self {
            macro_state: IDLE,
            ..Self::default()
        }
    }

    /// Clear the sequencer and mark the command register empty
    pub fn reset(&mut self, sfr: &mut SfrFile) {
        *self = Self::new();
        sfr.write(regs::CMD, CMD_DONE);
    }

    /// A macro is in progress
    pub fn busy(&self) -> bool {
        self.mul || self.div || self.divsn || self.sft
    }

    /// SFR write hook. Returns the committed value.
    pub fn write(&mut self, reg: BcdReg, value: u8, sfr: &mut SfrFile) -> u8 {
        self.macro_state = IDLE;
        self.calc_en = false;
        self.calc_en_d = false;
        self.calc_en_dd = false;

        match reg {
            BcdReg::Control => match value & 0x0F {
                0 => 1,
                v if v >= 7 => 6,
                v => v,
            },
            BcdReg::MacroCount => value & 0x1F,
            BcdReg::Command | BcdReg::MacroControl => {
                let addr = if reg == BcdReg::Command {
                    regs::CMD
                } else {
                    regs::MCR
                };
                sfr.write(addr, value);
                log::debug!("BCD {:?} = {:02X}", reg, value);
                self.latch(sfr);
                self.run(sfr);
                sfr.read(addr)
            }
        }
    }

    fn latch(&mut self, sfr: &mut SfrFile) {
        let cmd = sfr.read(regs::CMD);
        if cmd != CMD_DONE {
            self.set(op(cmd >> 4, (cmd >> 2) & 3, cmd & 3, self.macro_state));
            self.calc_pos = 0;
            if self.mode == 0 {
                self.calc_en = false;
                self.calc_en_d = true;
            } else {
                self.calc_en = true;
            }
            sfr.write(regs::CMD, CMD_DONE);
        }

        self.calc_len = sfr.read(regs::CON);

        let mcr = sfr.read(regs::MCR);
        if mcr & 0x7F != 0 {
            self.bmc = mcr;
            self.macro_cnt = sfr.read(regs::MCN);
            sfr.write(regs::MCR, 0);
            self.macro_state = MACRO_START;
        }
    }

    fn run(&mut self, sfr: &mut SfrFile) {
        for _ in 0..MAX_PASSES {
            let repeat = self.calc_en || self.macro_state != IDLE;
            self.state_manage(sfr);
            self.exec(sfr);
            if !repeat {
                return;
            }
        }
        log::warn!(
            "BCD sequencer did not settle after {} passes (state {:02X})",
            MAX_PASSES,
            self.macro_state
        );
        *self = Self {
            calc_len: self.calc_len,
            ..Self::new()
        };
    }

    fn set(&mut self, op: MicroOp) {
        log::trace!(
            "BCD op mode={} src={} dst={} next={:02X}",
            op.mode,
            op.src,
            op.dst,
            op.next
        );
        self.mode = op.mode;
        self.src = op.src;
        self.dst = op.dst;
        self.macro_state = op.next;
    }

    fn state_manage(&mut self, sfr: &mut SfrFile) {
        if self.macro_state == MACRO_START && !self.calc_en {
            self.macro_init(sfr);
        } else if self.busy() && !self.calc_en {
            if self.mul {
                self.mul_step(sfr);
            } else if self.div || self.divsn {
                self.div_step(sfr);
            } else if self.sft {
                self.sft_step();
            }
            if self.mul || self.div || self.divsn {
                self.calc_en = (self.src | self.dst | self.mode) != 0;
            }
            self.calc_pos = 0;
        }

        let busy = if self.busy() { 0x80 } else { 0x00 };
        sfr.write(regs::MCR, (sfr.read(regs::MCR) & 0x7F) | busy);
        self.calc_en_dd = self.calc_en_d;
        self.calc_en_d = self.calc_en;
    }

    /// Current multiplier digit as a mul state (0x20-0x29)
    fn digit_state(sfr: &SfrFile) -> u8 {
        (sfr.read(reg_addr(0, 0)) & 0x0F) | 0x20
    }

    fn macro_init(&mut self, sfr: &SfrFile) {
        if self.mul {
            self.set(op(13, 0, 0, Self::digit_state(sfr)));
        } else if self.div {
            self.set(op(8, 0, 1, 0x18));
        } else if self.divsn {
            self.set(op(12, 0, 1, 0x18));
        } else {
            let bmc = self.bmc;
            let odd = bmc & 1 != 0;
            match (bmc >> 1) & 0x0F {
                1 => {
                    self.set(if odd {
                        op(13, 0, 0, Self::digit_state(sfr))
                    } else {
                        op(11, 1, 3, 0x18)
                    });
                    self.mul = true;
                }
                2 => {
                    self.set(if odd { op(8, 0, 1, 0x18) } else { op(11, 1, 3, 0x10) });
                    self.div = true;
                }
                3 => {
                    self.set(if odd { op(12, 0, 1, 0x18) } else { op(11, 1, 3, 0x20) });
                    self.div = true;
                }
                4..=7 => {
                    self.macro_cnt = self.macro_cnt.saturating_add(1);
                    let mode = if bmc & 0x0C == 8 { 8 } else { 9 };
                    let size = shift_size(self.macro_cnt);
                    self.macro_cnt -= 1 << size;
                    self.sft = self.macro_cnt != 0;
                    let next = if self.sft { 0 } else { IDLE };
                    self.set(op(mode, size, bmc & 3, next));
                }
                other => {
                    log::warn!("BCD macro select {:02X} not recognised (code {})", bmc, other);
                    self.set(END);
                }
            }
        }

        self.calc_pos = 0;
        self.calc_en = true;
        self.bmc = 0;
    }

    fn mul_step(&mut self, sfr: &SfrFile) {
        let next = match self.macro_state {
            0x18 => op(11, 1, 2, 0x19),
            0x19 => op(1, 2, 2, 0x1A),
            0x1A => op(1, 2, 2, 0x1B),
            0x1B => op(10, 0, 1, 0x1C),
            0x1C => op(13, 0, 0, Self::digit_state(sfr)),
            0x20 => op(9, 0, 1, IDLE),
            v @ 0x21..=0x29 => op(9, 0, 1, v + 0x10),
            0x31 => op(1, 3, 1, IDLE),
            0x32 => op(1, 3, 1, 0x31),
            0x33 => op(2, 3, 1, 0x34),
            0x34 => op(1, 2, 1, IDLE),
            0x35 => op(1, 2, 1, 0x31),
            0x36 => op(1, 2, 1, 0x32),
            0x37 => op(1, 2, 1, 0x33),
            0x38 => op(1, 2, 1, 0x34),
            0x39 => op(1, 2, 1, 0x35),
            _ => {
                self.mul = self.macro_cnt != 0;
                END
            }
        };
        self.set(next);

        if self.macro_state == IDLE && self.macro_cnt != 0 {
            self.macro_cnt -= 1;
            self.macro_state = MACRO_START;
        }
    }

    fn div_step(&mut self, sfr: &mut SfrFile) {
        let state = self.macro_state;
        let carry = sfr.read(regs::FLG) & 0x80 != 0;
        // Each restoring step: keep subtracting while there is no borrow
        let next = match state {
            0 | 3 | 6 => Some(END),
            1 => Some(if carry { op(1, 3, 1, 0) } else { END }),
            2 => Some(if carry { op(1, 3, 1, 1) } else { END }),
            4 => Some(if carry { op(1, 3, 1, 3) } else { END }),
            5 => Some(if carry { op(1, 3, 1, 4) } else { END }),
            7 => Some(if carry { op(1, 3, 1, 6) } else { END }),
            8 => Some(if carry { op(1, 3, 1, 7) } else { END }),
            9 => Some(if carry { END } else { op(1, 3, 1, 8) }),
            0x10 => Some(op(11, 1, 2, 0x11)),
            0x11 => Some(op(1, 1, 2, 0x12)),
            0x12 => Some(op(1, 1, 2, 0x13)),
            0x13 => Some(op(11, 0, 1, 0x14)),
            0x14 => Some(op(10, 0, 0, 0x18)),
            0x18 => Some(op(8, 0, 0, 0x19)),
            0x19 => Some(op(2, 2, 1, 0x1A)),
            0x1A => Some(if carry { op(2, 2, 1, 0x1B) } else { op(1, 3, 1, 2) }),
            0x1B => Some(if carry { op(2, 2, 1, 9) } else { op(1, 3, 1, 5) }),
            0x20 => Some(op(11, 1, 2, 0x21)),
            0x21 => Some(op(1, 1, 2, 0x22)),
            0x22 => Some(op(1, 1, 2, 0x23)),
            0x23 => Some(op(12, 3, 1, 0x24)),
            0x24 => Some(op(8, 3, 0, 0x19)),
            _ => None,
        };
        if let Some(next) = next {
            self.set(next);
        }

        if state == IDLE {
            let addr = reg_addr(0, 0);
            sfr.write(addr, (sfr.read(addr) & 0xF0) | (IDLE & 0x0F));
            if self.macro_cnt == 0 {
                self.div = false;
                self.divsn = false;
            } else {
                self.macro_cnt -= 1;
                if self.div {
                    self.set(op(8, 0, 1, 0x18));
                } else {
                    self.set(op(12, 0, 1, 0x18));
                }
            }
        }
    }

    fn sft_step(&mut self) {
        self.src = shift_size(self.macro_cnt);
        self.macro_cnt = self.macro_cnt.saturating_sub(1 << self.src);
        if self.macro_cnt == 0 {
            self.sft = false;
        }
        self.calc_en = true;
        self.macro_state = if self.sft { 0 } else { IDLE };
    }

    fn exec(&mut self, sfr: &mut SfrFile) {
        if self.exec_add_sub(sfr) {
            self.count_zeros(sfr);
        }
        self.exec_move(sfr);
        if self.mode & 8 != 0 || self.mode == 0 {
            self.calc_en = false;
            self.calc_pos = 6;
        }
    }

    /// Add/subtract pass. Flags are updated for every mode; the destination
    /// only for add and subtract. Returns true if a result was stored.
    fn exec_add_sub(&mut self, sfr: &mut SfrFile) -> bool {
        let stores = matches!(self.mode, MODE_ADD | MODE_SUB);
        let mut stored = false;

        if self.calc_en && self.calc_pos == 0 {
            let subtract = self.mode == MODE_SUB;
            let len = self.calc_len as u16;
            let mut carry = false;
            let mut zero = true;

            for i in (0..len).step_by(2) {
                let lo = i * 2;
                let hi = lo + 2;
                let (sum, c) = add_digits(
                    subtract,
                    sfr.read_word(reg_addr(self.dst, lo)),
                    sfr.read_word(reg_addr(self.src, lo)),
                    carry,
                );
                carry = c;
                zero &= sum == 0;
                if stores {
                    sfr.write_word(reg_addr(self.dst, lo), sum);
                }

                let (sum, c) = add_digits(
                    subtract,
                    sfr.read_word(reg_addr(self.dst, hi)),
                    sfr.read_word(reg_addr(self.src, hi)),
                    carry,
                );
                let past_end = i + 1 == len;
                if !past_end {
                    carry = c;
                    zero &= sum == 0;
                }
                sfr.write(regs::FLG, ((carry as u8) << 7) | ((zero as u8) << 6));
                if stores {
                    sfr.write_word(reg_addr(self.dst, hi), if past_end { 0 } else { sum });
                }
            }
            stored = stores;
        }

        if stores && (self.calc_en_dd || self.calc_en_d) {
            self.calc_pos = self.calc_pos.saturating_add(2);
            if self.calc_pos >= self.calc_len {
                self.calc_en = false;
            }
        }
        stored
    }

    /// Shift, constant and copy operations
    fn exec_move(&mut self, sfr: &mut SfrFile) {
        if !self.calc_en {
            return;
        }
        match self.mode {
            8 => self.shift_left(sfr, false),
            9 => self.shift_right(sfr, false),
            10 => {
                let mut value = [0u8; regs::REG_BYTES];
                value[0] = if self.src == 3 { 5 } else { self.src };
                store(sfr, self.dst, &value);
            }
            11 => {
                let value = load(sfr, self.src);
                store(sfr, self.dst, &value);
            }
            12 => self.shift_left(sfr, true),
            13 => self.shift_right(sfr, true),
            _ => {}
        }
    }

    /// Shift the destination towards the high end. With `fill`, vacated
    /// digits come from the top of the previous register.
    fn shift_left(&self, sfr: &mut SfrFile, fill: bool) {
        let mut d = load(sfr, self.dst);
        let p = if fill {
            load(sfr, prev_reg(self.dst))
        } else {
            [0; regs::REG_BYTES]
        };
        match self.src {
            0 => {
                for i in (1..regs::REG_BYTES).rev() {
                    d[i] = (d[i] << 4) | (d[i - 1] >> 4);
                }
                d[0] = (d[0] << 4) | (p[11] >> 4);
            }
            size => {
                let n = 1usize << (size - 1);
                d.copy_within(0..regs::REG_BYTES - n, n);
                d[..n].copy_from_slice(&p[regs::REG_BYTES - n..]);
            }
        }
        store(sfr, self.dst, &d);
    }

    /// Shift the destination towards the low end. With `fill`, vacated
    /// digits come from the next register for nibble and single-byte shifts
    /// and from the previous one for wider shifts.
    fn shift_right(&self, sfr: &mut SfrFile, fill: bool) {
        let mut d = load(sfr, self.dst);
        let other = match self.src {
            0 | 1 => next_reg(self.dst),
            _ => prev_reg(self.dst),
        };
        let f = if fill {
            load(sfr, other)
        } else {
            [0; regs::REG_BYTES]
        };
        match self.src {
            0 => {
                for i in 0..regs::REG_BYTES - 1 {
                    d[i] = (d[i] >> 4) | (d[i + 1] << 4);
                }
                d[11] = (f[0] << 4) | (d[11] >> 4);
            }
            1 => {
                d.copy_within(1.., 0);
                d[11] = f[0];
            }
            size => {
                let n = 1usize << (size - 1);
                d.copy_within(n.., 0);
                d[regs::REG_BYTES - n..].copy_from_slice(&f[..n]);
            }
        }
        store(sfr, self.dst, &d);
    }

    /// Count zero nibbles at both ends of the destination. Only digits within
    /// the operation length can stop the count.
    fn count_zeros(&self, sfr: &mut SfrFile) {
        let d = load(sfr, self.dst);
        let active = self.calc_len as usize * 2;

        let mut top = 0u8;
        'top: for (i, &b) in d.iter().enumerate().rev() {
            for nibble in [b >> 4, b & 0x0F] {
                if i < active && nibble != 0 {
                    break 'top;
                }
                top += 1;
            }
        }

        let mut bottom = 0u8;
        'bottom: for (i, &b) in d.iter().enumerate() {
            for nibble in [b & 0x0F, b >> 4] {
                if i < active && nibble != 0 {
                    break 'bottom;
                }
                bottom += 1;
            }
        }

        sfr.write(regs::LLZ, bottom);
        sfr.write(regs::MLZ, top);
    }
}
