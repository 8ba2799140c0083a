//! Step orchestrator
//!
//! Owns the external CPU core, the bus with its peripherals, the interrupt
//! controller and the debugging aids, and advances them one instruction at a
//! time in a fixed order:
//!
//! 1. call trace pre-decode
//! 2. instruction execution (SFR hooks fire inside the bus)
//! 3. TI MathPrint syscalls
//! 4. keyboard scan
//! 5. interrupt dispatch
//! 6. watchdog
//! 7. breakpoints and the unallocated-code check
//!
//! While the core sits in STOP mode no instruction runs; only the timer and
//! the interrupt controller are serviced.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::breakpoint::{BreakHit, BreakpointEngine};
use crate::bus::Bus;
use crate::calltrace::{CallTrace, CallTraceEntry};
use crate::config::{EmuConfig, HardwareId};
use crate::cpu::{Cpu, Registers};
use crate::disasm::{self, Disassembler, RENDER_WORDS};
use crate::error::{EmuError, Fault};
use crate::peripherals::screen::{SYSCALL_ROWS, SYSCALL_ROW_BYTES};
use crate::peripherals::{Frame, InterruptController, Key};
use crate::rom_info::{self, RomInfo, RomInfoError};

/// Data address of the RAM-resident high display plane (ClassWiz CW emulator firmware)
const HIGH_PLANE_BASE: u32 = 0x8_9000;

/// SWI numbers below this are TI MathPrint syscalls
const SYSCALL_LIMIT: u8 = 0x40;
const SYSCALL_SET_SCREEN: u8 = 1;
const SYSCALL_GET_KEY: u8 = 2;
const SYSCALL_SET_STATUS: u8 = 4;

/// Bytes of the TI MathPrint status word
const STATUS_BYTES: u32 = 3;

/// Single-step flag shared with other threads
///
/// Toggling it does not need the emulator lock: a UI thread can stop a
/// free-running [`Emu::run`] loop on another thread.
#[derive(Debug, Clone)]
pub struct StepControl(Arc<AtomicBool>);

impl StepControl {
    pub fn new(single_step: bool) -> Self {
        Self(Arc::new(AtomicBool::new(single_step)))
    }

    pub fn is_single_step(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn set_single_step(&self, value: bool) {
        self.0.store(value, Ordering::SeqCst);
    }
}

impl Default for StepControl {
    fn default() -> Self {
        Self::new(true)
    }
}

/// What happened during one step
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepInfo {
    /// An instruction was executed (false while in STOP mode)
    pub executed: bool,
    /// Executor fault, logged and absorbed
    pub fault: Option<Fault>,
    /// Name of the interrupt taken
    pub interrupt: Option<&'static str>,
    /// Timer 0 woke the core
    pub timer_wake: bool,
    pub breakpoint: Option<BreakHit>,
    /// Execution reached code that decodes to nothing or open bus
    pub unallocated_jump: bool,
    /// Core is in STOP mode after the step
    pub stop_mode: bool,
}

/// Register file plus the orchestrator's view of recent execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistersSnapshot {
    pub regs: Registers,
    /// CSR:PC of the previous instruction
    pub prev_csr_pc: Option<(u8, u16)>,
    /// CSR:PC of the one before that
    pub prev_prev_csr_pc: Option<(u8, u16)>,
    pub stop_mode: bool,
}

/// nX-U8 calculator emulator around an external CPU core
#[derive(Debug)]
pub struct Emu<C: Cpu> {
    cpu: C,
    bus: Bus,
    irq: InterruptController,
    breakpoints: BreakpointEngine,
    call_trace: CallTrace,
    control: StepControl,
    config: EmuConfig,

    /// Keys currently held
    pressed: BTreeSet<Key>,
    /// TI MathPrint: key code returned by the get-key syscall
    current_key: u8,
    /// TI MathPrint: frame and status buffers announced by syscalls
    screen_buffer: Option<u16>,
    status_buffer: Option<u16>,

    prev_csr_pc: Option<(u8, u16)>,
    prev_prev_csr_pc: Option<(u8, u16)>,
}

impl<C: Cpu> Emu<C> {
    /// Build the emulator for a profile and reset it
    pub fn new(
        config: EmuConfig,
        cpu: C,
        rom: Vec<u8>,
        flash: Option<Vec<u8>>,
    ) -> Result<Self, EmuError> {
        let bus = Bus::new(&config, rom, flash)?;
        log::info!(
            "{} emulator, {} hardware",
            config.hardware.name(),
            if config.real_hardware { "retail" } else { "emulator" }
        );

        let mut emu = Self {
            cpu,
            bus,
            irq: InterruptController::new(config.hardware),
            breakpoints: BreakpointEngine::new(),
            call_trace: CallTrace::new(),
            control: StepControl::default(),
            config,
            pressed: BTreeSet::new(),
            current_key: 0,
            screen_buffer: None,
            status_buffer: None,
            prev_csr_pc: None,
            prev_prev_csr_pc: None,
        };
        emu.reset();
        Ok(emu)
    }

    /// Power-on reset: memory, peripherals and the core
    pub fn reset(&mut self) {
        self.bus.reset();
        self.reset_core();
    }

    /// Reset the core only, as the reset key does. RAM is kept. SP and PC
    /// are loaded from the first two words of the ROM.
    pub fn reset_core(&mut self) {
        self.cpu.reset();
        self.bus.reset_core();
        self.irq.reset();
        self.call_trace.reset();

        let sp = self.bus.memory().rom_word(0);
        let pc = self.bus.memory().rom_word(2);
        *self.cpu.regs_mut() = Registers {
            sp,
            pc,
            ..Registers::default()
        };

        self.screen_buffer = None;
        self.status_buffer = None;
        self.prev_csr_pc = None;
        self.prev_prev_csr_pc = None;
        log::debug!("reset: SP={:04X}H PC={:04X}H", sp, pc);
    }

    pub fn config(&self) -> &EmuConfig {
        &self.config
    }

    pub fn cpu(&self) -> &C {
        &self.cpu
    }

    pub fn cpu_mut(&mut self) -> &mut C {
        &mut self.cpu
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut Bus {
        &mut self.bus
    }

    pub fn interrupts(&self) -> &InterruptController {
        &self.irq
    }

    pub fn breakpoints(&self) -> &BreakpointEngine {
        &self.breakpoints
    }

    pub fn breakpoints_mut(&mut self) -> &mut BreakpointEngine {
        &mut self.breakpoints
    }

    /// Handle on the single-step flag
    pub fn control(&self) -> StepControl {
        self.control.clone()
    }

    pub fn is_single_step(&self) -> bool {
        self.control.is_single_step()
    }

    pub fn set_single_step(&self, value: bool) {
        self.control.set_single_step(value);
    }

    pub fn stop_mode(&self) -> bool {
        self.bus.peripherals.standby.stop_mode()
    }

    /// Advance one step using the host clock
    pub fn step(&mut self) -> StepInfo {
        self.step_at(Instant::now())
    }

    /// Advance one step, with `now` as the host time seen by the timer
    pub fn step_at(&mut self, now: Instant) -> StepInfo {
        let mut info = StepInfo::default();
        self.bus.clear_access_log();

        if self.stop_mode() {
            if self.bus.peripherals.poll_timer(now) {
                info.timer_wake = true;
                if !self.config.real_hardware {
                    self.bus.write_mailbox(1, 0);
                    self.bus.write_mailbox(2, 0);
                }
            }
            info.interrupt = self.service_interrupts();
        } else {
            self.execute(&mut info);
            self.handle_syscall();
            if self.config.hardware != HardwareId::TiMathPrint {
                self.bus.scan_keyboard(&self.pressed);
            }
            info.interrupt = self.service_interrupts();
            if self.bus.peripherals.tick_watchdog() {
                log::debug!(
                    "watchdog overflow at {:X}:{:04X}H",
                    self.cpu.regs().csr,
                    self.cpu.regs().pc
                );
            }
            info.breakpoint = self.check_breakpoints();
            info.unallocated_jump = self.check_unallocated();
        }

        info.stop_mode = self.stop_mode();
        info
    }

    /// Step until single-step mode is entered (breakpoint, unallocated jump
    /// or another thread through [`StepControl`]) or `max_steps` have run.
    /// Returns the number of steps taken.
    pub fn run(&mut self, max_steps: usize) -> usize {
        let mut steps = 0;
        while steps < max_steps && !self.control.is_single_step() {
            self.step();
            steps += 1;
        }
        steps
    }

    fn execute(&mut self, info: &mut StepInfo) {
        let mask = self.config.csr_mask();
        let regs = self.cpu.regs_mut();
        regs.csr &= mask;
        let (csr, pc, dsr) = (regs.csr, regs.pc, regs.dsr);

        self.bus.sync_dsr(dsr);
        self.bus.set_context(csr, pc);

        let word = self.bus.peek_code_word(csr, pc);
        let next = self.bus.peek_code_word(csr, pc.wrapping_add(2));
        self.call_trace.observe(self.cpu.regs(), word, next);

        if let Err(fault) = self.cpu.step(&mut self.bus) {
            log::error!("{}", fault);
            info.fault = Some(fault);
        }
        info.executed = true;

        if let Some(dsr) = self.bus.take_dsr_write() {
            self.cpu.regs_mut().dsr = dsr;
        }

        let here = Some((csr, pc));
        if self.prev_csr_pc.is_some() {
            self.prev_prev_csr_pc = self.prev_csr_pc;
        }
        if self.prev_csr_pc != here {
            self.prev_csr_pc = here;
        }
    }

    /// TI MathPrint firmware talks to the host through SWI 1, 2 and 4
    fn handle_syscall(&mut self) {
        if self.config.hardware != HardwareId::TiMathPrint {
            return;
        }
        let Some(swi) = self.cpu.last_swi().filter(|&n| n < SYSCALL_LIMIT) else {
            return;
        };
        let regs = self.cpu.regs_mut();
        match swi {
            SYSCALL_SET_SCREEN => {
                self.screen_buffer = Some(regs.er(0));
                regs.set_er(0, 0);
                log::debug!("screen buffer at {:04X}H", self.screen_buffer.unwrap_or(0));
            }
            SYSCALL_GET_KEY => {
                regs.gp[1] = 0;
                regs.gp[0] = self.current_key;
            }
            SYSCALL_SET_STATUS => {
                self.status_buffer = Some(regs.er(0));
                regs.set_er(0, 0);
                log::debug!("status buffer at {:04X}H", self.status_buffer.unwrap_or(0));
            }
            other => log::trace!("SWI {} ignored", other),
        }
    }

    /// Dispatch at most one interrupt and count down the hold-off
    fn service_interrupts(&mut self) -> Option<&'static str> {
        let mut taken = None;
        if self.config.interrupts_enabled() && !self.irq.settling() {
            let psw = self.cpu.regs().psw;
            if let Some(source) = self.irq.poll(&self.bus.peripherals.sfr, psw) {
                self.bus.peripherals.standby.wake();
                let target = self.bus.memory().rom_word(source.vector as usize);
                self.irq.enter(
                    &source,
                    &mut self.bus.peripherals.sfr,
                    self.cpu.regs_mut(),
                    target,
                );
                taken = Some(source.name);
            }
        }
        self.irq.tick_settle();
        taken
    }

    fn check_breakpoints(&mut self) -> Option<BreakHit> {
        let hit = self.breakpoints.check(
            self.cpu.regs().code_addr(),
            self.bus.last_read(),
            self.bus.last_write(),
        )?;
        log::info!("breakpoint {} hit ({:?} {:05X}H)", hit.id, hit.kind, hit.address);
        self.control.set_single_step(true);
        self.pressed.clear();
        Some(hit)
    }

    fn check_unallocated(&mut self) -> bool {
        if self.control.is_single_step() {
            return false;
        }
        let regs = self.cpu.regs();
        if self.bus.code_mapped(regs.csr, regs.pc) {
            return false;
        }
        log::warn!(
            "jump to unallocated code at {:X}:{:04X}H, stepping stopped",
            regs.csr,
            regs.pc
        );
        self.control.set_single_step(true);
        true
    }

    /// Key press from the host
    pub fn press_key(&mut self, key: Key) {
        if self.config.hardware == HardwareId::TiMathPrint {
            self.current_key = key.code();
            return;
        }

        self.pressed.insert(key);
        match key {
            Key::Reset => {
                log::debug!("reset key pressed");
                self.reset_core();
                self.pressed.remove(&key);
            }
            Key::Matrix { ki, ko } if !self.config.real_hardware => {
                self.bus.peripherals.standby.wake();
                self.bus.write_mailbox(1, 1u8.wrapping_shl(ki as u32));
                self.bus.write_mailbox(2, 1u8.wrapping_shl(ko as u32));
            }
            Key::Matrix { .. } => self.bus.peripherals.key_interrupt(key),
            Key::Code(code) => log::debug!("key code {:02X} has no matrix position", code),
        }
    }

    pub fn release_key(&mut self, key: Key) {
        if self.config.hardware == HardwareId::TiMathPrint {
            self.current_key = 0;
            return;
        }
        self.pressed.remove(&key);
    }

    pub fn release_all_keys(&mut self) {
        self.pressed.clear();
        self.current_key = 0;
    }

    pub fn pressed_keys(&self) -> impl Iterator<Item = &Key> {
        self.pressed.iter()
    }

    /// Current display contents
    pub fn frame(&mut self) -> &Frame {
        match self.config.hardware {
            HardwareId::ClassWizCw if !self.config.real_hardware => self.refresh_high_plane(),
            HardwareId::TiMathPrint => self.refresh_syscall_frame(),
            _ => {}
        }
        self.bus.peripherals.screen.frame()
    }

    fn refresh_high_plane(&mut self) {
        let geometry = self.bus.peripherals.screen.geometry();
        for row in 0..geometry.rows {
            let base = HIGH_PLANE_BASE + row as u32 * geometry.row_stride as u32;
            let bytes: Vec<u8> = (0..geometry.row_bytes as u32)
                .map(|i| self.bus.read_byte(base + i))
                .collect();
            self.bus.peripherals.screen.refresh_high_plane(row, &bytes);
        }
    }

    fn refresh_syscall_frame(&mut self) {
        let Some(base) = self.screen_buffer else {
            return;
        };
        let len = (SYSCALL_ROWS * SYSCALL_ROW_BYTES) as u16;
        let rows: Vec<u8> = (0..len)
            .map(|i| self.bus.read_byte(base.wrapping_add(i) as u32))
            .collect();
        let status = self.status_buffer.map(|addr| {
            (0..STATUS_BYTES).fold(0u32, |word, i| {
                word | (self.bus.read_byte(addr.wrapping_add(i as u16) as u32) as u32) << (8 * i)
            })
        });
        self.bus.peripherals.screen.load_syscall_frame(&rows, status);
    }

    pub fn registers_snapshot(&self) -> RegistersSnapshot {
        RegistersSnapshot {
            regs: self.cpu.regs().clone(),
            prev_csr_pc: self.prev_csr_pc,
            prev_prev_csr_pc: self.prev_prev_csr_pc,
            stop_mode: self.stop_mode(),
        }
    }

    /// Move execution to CSR:PC, leaving STOP mode
    pub fn jump_to(&mut self, csr: u8, pc: u16) {
        let regs = self.cpu.regs_mut();
        regs.csr = csr & 0x0F;
        regs.pc = pc;
        self.bus.peripherals.standby.wake();
    }

    /// Debugger memory write through the bus (hooks fire)
    pub fn write_byte(&mut self, segment: u8, addr: u16, value: u8) {
        self.bus
            .write_byte(((segment as u32) << 16) | addr as u32, value);
    }

    pub fn read_byte(&mut self, segment: u8, addr: u16) -> u8 {
        self.bus.read_byte(((segment as u32) << 16) | addr as u32)
    }

    /// Best-effort call stack, innermost last
    pub fn call_trace(&self) -> &[CallTraceEntry] {
        self.call_trace.frames()
    }

    /// Disassemble the instruction at CSR:PC
    pub fn render_instruction<D: Disassembler + ?Sized>(&self, dis: &D) -> (String, usize) {
        let regs = self.cpu.regs();
        let bytes: Vec<u8> = (0..RENDER_WORDS as u16)
            .flat_map(|i| {
                let pc = regs.pc.wrapping_add(i * 2) & 0xFFFE;
                self.bus.peek_code_word(regs.csr, pc).to_le_bytes()
            })
            .collect();
        disasm::render(dis, &bytes)
    }

    /// Firmware version and checksum
    pub fn rom_info(&mut self) -> Result<RomInfo, RomInfoError> {
        rom_info::rom_info(&mut self.bus)
    }
}
