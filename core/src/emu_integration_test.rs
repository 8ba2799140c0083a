//! Integration tests for the step orchestrator
//!
//! A scripted core stands in for the instruction executor: each step performs
//! one bus operation from its script, so the tests can drive the real bus,
//! SFR hooks and peripherals the way firmware would.

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use crate::breakpoint::BreakKind;
    use crate::bus::Bus;
    use crate::config::{EmuConfig, HardwareId};
    use crate::cpu::{psw, Cpu, Registers};
    use crate::error::Fault;
    use crate::peripherals::Key;
    use crate::{Emu, SyncEmu};

    /// One scripted instruction
    #[derive(Debug, Clone, Copy)]
    enum Op {
        Nop,
        /// Store `size` bytes at DSR:offset
        Write(u8, u16, u8, u64),
        Read(u8, u16, u8),
        Swi(u8),
        Jump(u16),
        Fault,
    }

    #[derive(Debug, Default)]
    struct ScriptCpu {
        regs: Registers,
        script: Vec<Op>,
        executed: usize,
        last_swi: Option<u8>,
        last_read: u64,
    }

    impl ScriptCpu {
        fn new(script: Vec<Op>) -> Self {
            Self {
                script,
                ..Self::default()
            }
        }
    }

    impl Cpu for ScriptCpu {
        fn step(&mut self, bus: &mut Bus) -> Result<(), Fault> {
            let op = self.script.get(self.executed).copied().unwrap_or(Op::Nop);
            self.executed += 1;
            self.last_swi = None;
            let next_pc = self.regs.pc.wrapping_add(2);

            match op {
                Op::Nop => {}
                Op::Write(dsr, offset, size, value) => bus.write_data(dsr, offset, size, value),
                Op::Read(dsr, offset, size) => self.last_read = bus.read_data(dsr, offset, size),
                Op::Swi(n) => self.last_swi = Some(n),
                Op::Jump(pc) => {
                    self.regs.pc = pc;
                    return Ok(());
                }
                Op::Fault => {
                    return Err(Fault::new(self.regs.csr, self.regs.pc, "undefined opcode FFFF"))
                }
            }
            self.regs.pc = next_pc;
            Ok(())
        }

        fn reset(&mut self) {
            self.executed = 0;
            self.last_swi = None;
        }

        fn regs(&self) -> &Registers {
            &self.regs
        }

        fn regs_mut(&mut self) -> &mut Registers {
            &mut self.regs
        }

        fn last_swi(&self) -> Option<u8> {
            self.last_swi
        }
    }

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn rom() -> Vec<u8> {
        let mut rom = vec![0u8; 0x20000];
        rom[0..4].copy_from_slice(&[0x00, 0x8E, 0x00, 0x02]);
        // XI0 vector
        rom[0x0A..0x0C].copy_from_slice(&[0x00, 0x31]);
        // 0200: BL 0:0400
        rom[0x200..0x204].copy_from_slice(&[0x01, 0xF0, 0x00, 0x04]);
        // 0400: RT
        rom[0x400..0x402].copy_from_slice(&[0x1F, 0xFE]);
        rom
    }

    fn emu_with(config: EmuConfig, script: Vec<Op>) -> Emu<ScriptCpu> {
        init_logger();
        Emu::new(config, ScriptCpu::new(script), rom(), None).unwrap()
    }

    #[test]
    fn test_stop_mode_timer_wake() {
        let mut emu = emu_with(
            EmuConfig::new(HardwareId::EsPlus),
            vec![
                Op::Write(0, 0xF020, 2, 0x0005),
                Op::Write(0, 0xF025, 1, 0x01),
                Op::Write(0, 0xF008, 1, 0x50),
                Op::Write(0, 0xF008, 1, 0xA0),
                Op::Write(0, 0xF009, 1, 0x02),
            ],
        );
        emu.write_byte(0, 0x8E01, 0x04);
        emu.write_byte(0, 0x8E02, 0x10);

        let t0 = Instant::now();
        for _ in 0..4 {
            assert!(!emu.step_at(t0).stop_mode);
        }
        let info = emu.step_at(t0);
        assert!(info.stop_mode);
        assert_eq!(emu.bus().peripherals.sfr.read(0x08), 0);

        // No instruction runs while stopped
        let info = emu.step_at(t0);
        assert!(!info.executed);
        assert!(!info.timer_wake);
        assert_eq!(emu.cpu().executed, 5);

        // 1ms is 10 ticks, past the target of 5
        let info = emu.step_at(t0 + Duration::from_millis(1));
        assert!(info.timer_wake);
        assert!(!info.stop_mode);
        assert_eq!(emu.bus().peripherals.sfr.read(0x14), 0x20);
        assert_eq!(emu.bus_mut().mailbox(), [0, 0, 0]);

        emu.step_at(t0 + Duration::from_millis(1));
        assert_eq!(emu.cpu().executed, 6);
    }

    #[test]
    fn test_keyboard_scan_after_step() {
        let mut emu = emu_with(
            EmuConfig::new(HardwareId::EsPlus),
            // ko_mode 1: KO is driven inverted through 0x44
            vec![Op::Write(0, 0xF044, 1, !(1u64 << 4) & 0xFF)],
        );
        emu.press_key(Key::matrix(2, 4));
        emu.step();
        assert_eq!(emu.bus().peripherals.sfr.read(0x40), !(1u8 << 2));

        emu.release_key(Key::matrix(2, 4));
        emu.step();
        assert_eq!(emu.bus().peripherals.sfr.read(0x40), 0xFF);
    }

    #[test]
    fn test_retail_key_interrupt() {
        let mut config = EmuConfig::new(HardwareId::EsPlus);
        config.real_hardware = true;
        let mut emu = emu_with(config, vec![]);
        emu.cpu_mut().regs_mut().psw = psw::MIE;
        emu.write_byte(0, 0xF010, 0x02);

        emu.press_key(Key::matrix(1, 0));
        assert_eq!(emu.bus().peripherals.sfr.read(0x14), 0x02);

        let info = emu.step();
        assert_eq!(info.interrupt, Some("XI0INT"));
        assert_eq!(emu.cpu().regs().pc, 0x3100);
        assert_eq!(emu.bus().peripherals.sfr.read(0x14), 0x00);
    }

    #[test]
    fn test_write_watchpoint() {
        let mut emu = emu_with(
            EmuConfig::new(HardwareId::EsPlus),
            vec![Op::Nop, Op::Write(0, 0x8100, 2, 0xBEEF), Op::Nop],
        );
        let id = emu.breakpoints_mut().add(BreakKind::Write, 0x8101, 1);
        emu.set_single_step(false);

        assert_eq!(emu.run(10), 2);
        let info = emu.step();
        assert_eq!(info.breakpoint, None);
        assert!(emu.is_single_step());
        assert_eq!(emu.breakpoints().get(id).map(|bp| bp.enabled), Some(true));
        assert_eq!(emu.read_byte(0, 0x8101), 0xBE);
    }

    #[test]
    fn test_read_watchpoint_reports_hit() {
        let mut emu = emu_with(
            EmuConfig::new(HardwareId::EsPlus),
            vec![Op::Read(1, 0x0010, 4)],
        );
        emu.breakpoints_mut().add(BreakKind::Read, 0x1_0012, 1);
        let info = emu.step();
        let hit = info.breakpoint.unwrap();
        assert_eq!(hit.kind, BreakKind::Read);
        assert_eq!(hit.address, 0x1_0010);
    }

    #[test]
    fn test_fault_is_absorbed() {
        let mut emu = emu_with(EmuConfig::new(HardwareId::EsPlus), vec![Op::Fault, Op::Nop]);
        let info = emu.step();
        assert!(info.executed);
        assert_eq!(
            info.fault.map(|f| f.to_string()),
            Some("undefined opcode FFFF at 0:0200H".to_string())
        );
        let info = emu.step();
        assert!(info.fault.is_none());
    }

    #[test]
    fn test_call_trace_follows_bl_and_rt() {
        let mut emu = emu_with(
            EmuConfig::new(HardwareId::EsPlus),
            vec![Op::Jump(0x0400), Op::Jump(0x0204)],
        );
        emu.step();
        let trace = emu.call_trace();
        assert_eq!(trace.len(), 1);
        assert_eq!(trace[0].callee, 0x0400);
        assert_eq!(trace[0].return_addr, 0x0204);

        emu.step();
        assert!(emu.call_trace().is_empty());
        assert_eq!(emu.cpu().regs().pc, 0x0204);
    }

    #[test]
    fn test_dsr_write_reaches_registers() {
        let mut emu = emu_with(
            EmuConfig::new(HardwareId::EsPlus),
            vec![Op::Write(0, 0xF000, 1, 0x01), Op::Nop],
        );
        emu.step();
        assert_eq!(emu.cpu().regs().dsr, 0x01);
        emu.cpu_mut().regs_mut().dsr = 0x00;
        emu.step();
        assert_eq!(emu.bus().peripherals.sfr.read(0x00), 0x00);
    }

    #[test]
    fn test_mathprint_syscalls_and_frame() {
        let mut emu = emu_with(
            EmuConfig::new(HardwareId::TiMathPrint),
            vec![Op::Swi(1), Op::Swi(4), Op::Swi(2), Op::Swi(0x40)],
        );
        emu.write_byte(0, 0xB107, 0x80);
        emu.write_byte(0, 0xC000, 0x01);

        emu.cpu_mut().regs_mut().set_er(0, 0xB100);
        emu.step();
        assert_eq!(emu.cpu().regs().er(0), 0);

        emu.cpu_mut().regs_mut().set_er(0, 0xC000);
        emu.step();
        assert_eq!(emu.cpu().regs().er(0), 0);

        emu.press_key(Key::Code(0x25));
        emu.cpu_mut().regs_mut().set_er(0, 0xFFFF);
        emu.step();
        assert_eq!(emu.cpu().regs().gp[0], 0x25);
        assert_eq!(emu.cpu().regs().gp[1], 0x00);

        // SWI 0x40 and up are ordinary software interrupts
        emu.cpu_mut().regs_mut().set_er(0, 0x1234);
        emu.step();
        assert_eq!(emu.cpu().regs().er(0), 0x1234);

        let frame = emu.frame();
        assert_eq!(frame.pixels.len(), 192);
        assert_eq!(frame.pixels[0][0], 3);
        assert_eq!(frame.pixels[0][1], 0);
        assert_eq!(frame.status_bar.as_ref().map(|s| s[0]), Some(1));
    }

    #[test]
    fn test_rom_info_through_emu() {
        let mut emu = emu_with(EmuConfig::new(HardwareId::EsPlus), vec![]);
        let info = emu.rom_info().unwrap();
        // Zero minus the header bytes of the test image
        let header: u16 = [0x00u16, 0x8E, 0x00, 0x02, 0x00, 0x31, 0x01, 0xF0, 0x00, 0x04, 0x1F, 0xFE]
            .iter()
            .sum();
        assert_eq!(info.computed_sum, 0u16.wrapping_sub(header));
        assert!(!info.checksum_ok());
    }

    #[test]
    fn test_sync_emu_stops_from_other_thread() {
        let emu = emu_with(EmuConfig::new(HardwareId::EsPlus), vec![]);
        let sync = SyncEmu::new(emu);
        sync.control().set_single_step(false);

        let steps = std::thread::scope(|s| {
            let runner = s.spawn(|| sync.run(usize::MAX));
            std::thread::sleep(Duration::from_millis(5));
            sync.control().set_single_step(true);
            runner.join().unwrap()
        });

        let emu = sync.into_inner();
        assert_eq!(emu.cpu().executed, steps);
    }
}
