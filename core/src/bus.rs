//! System bus for nX-U8 calculators
//!
//! The bus decodes CSR:PC code addresses and DSR:offset data addresses (both
//! 20-bit) against an ordered region table built per hardware profile. The
//! first region whose kind and range match wins, even when a later region
//! covers the same address.
//!
//! Memory Map (ES PLUS, emulator firmware):
//! ```text
//! Code 0x00000 - ROM end  : ROM
//! Data 0x00000 - 0x07FFF  : ROM (segment 0 window)
//! Data 0x08000 - 0x0EFFF  : RAM
//! Data 0x0F000            : DSR
//! Data 0x0F001 - 0x0FFFF  : SFR window
//! Data 0x10000 - 0x1FFFF  : ROM segment 1
//! ```
//!
//! Accesses that decode to nothing read 0xFF and drop writes, with a warning
//! carrying the CSR:PC of the instruction responsible.

use crate::config::{EmuConfig, HardwareId};
use crate::error::EmuError;
use crate::memory::{addr, Memory, Store};
use crate::peripherals::{Key, KeypadController, Peripherals};

/// Which address space a region answers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionKind {
    Code,
    Data,
    Both,
}

/// Bus access type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    /// Instruction fetch
    Fetch,
    /// Data read
    Read,
    /// Data write
    Write,
}

impl RegionKind {
    fn serves(self, access: AccessKind) -> bool {
        match (self, access) {
            (RegionKind::Both, _) => true,
            (RegionKind::Code, AccessKind::Fetch) => true,
            (RegionKind::Data, AccessKind::Read | AccessKind::Write) => true,
            _ => false,
        }
    }
}

/// Function-backed regions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handler {
    /// Data segment register at 0xF000
    Dsr,
    /// Peripheral registers 0xF001-0xFFFF
    Sfr,
    /// Nothing connected: reads 0xFF, writes ignored
    OpenBus,
}

/// What serves a region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backing {
    /// Flat buffer; `addr - low + base` indexes the store
    Array { store: Store, base: u32 },
    Handler(Handler),
}

/// One entry of the region table (bounds inclusive)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRegion {
    pub kind: RegionKind,
    pub writable: bool,
    pub low: u32,
    pub high: u32,
    pub backing: Backing,
}

impl MemoryRegion {
    const fn array(kind: RegionKind, writable: bool, low: u32, high: u32, store: Store, base: u32) -> Self {
        Self {
            kind,
            writable,
            low,
            high,
            backing: Backing::Array { store, base },
        }
    }

    const fn handler(kind: RegionKind, writable: bool, low: u32, high: u32, handler: Handler) -> Self {
        Self {
            kind,
            writable,
            low,
            high,
            backing: Backing::Handler(handler),
        }
    }

    pub fn contains(&self, addr: u32) -> bool {
        (self.low..=self.high).contains(&addr)
    }
}

/// Address and width of a data access
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Access {
    pub addr: u32,
    pub size: u8,
}

impl Access {
    pub fn end(&self) -> u32 {
        self.addr.saturating_add(self.size.max(1) as u32)
    }
}

/// Find the region serving `addr` for an access. The first entry that
/// covers the address wins; a write landing on a read-only entry resolves to
/// nothing rather than falling through to a later one.
pub fn resolve(regions: &[MemoryRegion], addr: u32, access: AccessKind) -> Option<&MemoryRegion> {
    let region = regions
        .iter()
        .find(|r| r.kind.serves(access) && r.contains(addr))?;
    if access == AccessKind::Write && !region.writable {
        return None;
    }
    Some(region)
}

/// Build the region table for a profile (order matters: first match wins)
pub fn build_regions(config: &EmuConfig, rom_len: usize) -> Vec<MemoryRegion> {
    use RegionKind::{Both, Code, Data};

    let rom_len = rom_len as u32;
    let rom_end = rom_len.saturating_sub(1);
    let hw = config.hardware;
    let (ram_start, ram_size) = config.ram_window();

    let mut regions = vec![
        MemoryRegion::array(Code, false, 0x00000, rom_end, Store::Code, 0),
        MemoryRegion::array(Data, false, 0x00000, hw.rom_window_end(), Store::Code, 0),
        MemoryRegion::array(Data, true, ram_start, ram_start + ram_size - 1, Store::Data, 0),
        MemoryRegion::handler(Data, true, addr::DSR, addr::DSR, Handler::Dsr),
        MemoryRegion::handler(Data, true, addr::DSR + 1, 0x0FFFF, Handler::Sfr),
    ];

    if config.real_hardware && hw != HardwareId::Es {
        regions.push(MemoryRegion::handler(Code, false, rom_len, addr::CODE_MASK, Handler::OpenBus));
    }

    match hw {
        HardwareId::ClassWizEx => regions.extend([
            MemoryRegion::array(Data, false, 0x10000, 0x3FFFF, Store::Code, 0x10000),
            MemoryRegion::array(Data, true, 0x40000, 0x4FFFF, Store::RwSeg, 0),
            MemoryRegion::array(Data, false, 0x50000, 0x5FFFF, Store::Code, 0),
        ]),
        HardwareId::ClassWizCw => regions.extend([
            MemoryRegion::array(Data, false, 0x10000, 0x7FFFF, Store::Code, 0x10000),
            MemoryRegion::array(Data, false, 0x50000, 0x5FFFF, Store::Code, 0),
            MemoryRegion::array(Data, true, 0x80000, 0x8FFFF, Store::RwSeg, 0),
        ]),
        HardwareId::TiMathPrint => regions.extend([
            MemoryRegion::array(Data, false, 0x10000, 0x3FFFF, Store::Code, 0x10000),
            MemoryRegion::array(Data, true, 0x80000, 0xAFFFF, Store::Code, 0),
            MemoryRegion::handler(Code, false, rom_len, addr::CODE_MASK, Handler::OpenBus),
        ]),
        _ => {
            regions.push(MemoryRegion::array(Data, false, 0x10000, 0x1FFFF, Store::Code, 0x10000));
            if config.ko_mode() == 0 {
                regions.push(MemoryRegion::array(Data, false, 0x80000, 0x8FFFF, Store::Code, 0));
            }
            if config.is_5800p() {
                regions.extend([
                    MemoryRegion::handler(Data, false, 0x100000, 0x100000, Handler::OpenBus),
                    MemoryRegion::array(Data, true, 0x40000, 0x47FFF, Store::Flash, 0x20000),
                    MemoryRegion::array(Both, false, 0x80000, 0xFFFFF, Store::Flash, 0),
                    MemoryRegion::handler(Code, false, rom_len, 0x7FFFF, Handler::OpenBus),
                ]);
            } else if config.real_hardware {
                regions.push(MemoryRegion::handler(Code, false, rom_len, addr::CODE_MASK, Handler::OpenBus));
            }
        }
    }

    regions
}

/// Memory bus: region table, backing buffers and the peripherals behind the
/// SFR window
#[derive(Debug, Clone)]
pub struct Bus {
    regions: Vec<MemoryRegion>,
    memory: Memory,
    pub peripherals: Peripherals,
    config: EmuConfig,
    /// Current data segment, served at 0xF000
    dsr: u8,
    /// Set when the program wrote 0xF000 during the current step
    dsr_written: Option<u8>,
    /// CSR:PC of the instruction being executed, for diagnostics
    csr: u8,
    pc: u16,
    last_read: Option<Access>,
    last_write: Option<Access>,
}

impl Bus {
    pub fn new(config: &EmuConfig, rom: Vec<u8>, flash: Option<Vec<u8>>) -> Result<Self, EmuError> {
        if rom.is_empty() {
            return Err(EmuError::EmptyRom);
        }
        if rom.len() % 2 != 0 {
            return Err(EmuError::OddRomSize(rom.len()));
        }
        if rom.len() > addr::CODE_MASK as usize + 1 {
            return Err(EmuError::RomTooLarge(rom.len()));
        }
        let flash = match flash {
            Some(flash) => flash,
            None if config.is_5800p() => return Err(EmuError::MissingFlash),
            None => Vec::new(),
        };

        let (_, ram_size) = config.ram_window();
        let regions = build_regions(config, rom.len());
        log::debug!(
            "{} bus: {} regions, ROM {:#X} bytes",
            config.hardware.name(),
            regions.len(),
            rom.len()
        );

        Ok(Self {
            regions,
            memory: Memory::new(rom, ram_size as usize, config.rw_segment_size(), flash),
            peripherals: Peripherals::new(config)?,
            config: config.clone(),
            dsr: 0,
            dsr_written: None,
            csr: 0,
            pc: 0,
            last_read: None,
            last_write: None,
        })
    }

    /// Clear RAM and peripherals. ROM and flash survive.
    pub fn reset(&mut self) {
        self.memory.reset();
        self.peripherals.reset();
        self.dsr = 0;
        self.dsr_written = None;
        self.clear_access_log();
    }

    /// Reset what the CPU reset line touches. Memory contents are kept.
    pub fn reset_core(&mut self) {
        self.peripherals.reset_core();
        self.dsr = 0;
        self.dsr_written = None;
        self.clear_access_log();
    }

    pub fn config(&self) -> &EmuConfig {
        &self.config
    }

    pub fn regions(&self) -> &[MemoryRegion] {
        &self.regions
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    /// First region serving `addr` for this access. A write that lands on a
    /// read-only region resolves to nothing.
    pub fn resolve(&self, addr: u32, access: AccessKind) -> Option<&MemoryRegion> {
        resolve(&self.regions, addr, access)
    }

    /// Record the instruction about to execute (used in diagnostics)
    pub fn set_context(&mut self, csr: u8, pc: u16) {
        self.csr = csr;
        self.pc = pc;
    }

    /// Present the core's DSR at 0xF000 and mirror it into SFR 0
    pub fn sync_dsr(&mut self, dsr: u8) {
        self.dsr = dsr;
        self.peripherals.sfr.write(0, dsr);
    }

    /// DSR value the program stored through 0xF000 since the last call
    pub fn take_dsr_write(&mut self) -> Option<u8> {
        self.dsr_written.take()
    }

    pub fn last_read(&self) -> Option<Access> {
        self.last_read
    }

    pub fn last_write(&self) -> Option<Access> {
        self.last_write
    }

    pub fn clear_access_log(&mut self) {
        self.last_read = None;
        self.last_write = None;
    }

    fn read_at(&mut self, addr: u32, access: AccessKind) -> u8 {
        let Some(region) = self.resolve(addr, access).copied() else {
            log::warn!(
                "{:?} from unmapped {:05X}H at {:X}:{:04X}H",
                access,
                addr,
                self.csr,
                self.pc
            );
            return addr::OPEN_BUS;
        };
        match region.backing {
            Backing::Array { store, base } => {
                let index = (addr - region.low + base) as usize;
                self.memory.read(store, index).unwrap_or(addr::OPEN_BUS)
            }
            Backing::Handler(Handler::Dsr) => self.dsr,
            Backing::Handler(Handler::Sfr) => {
                let index = (addr & 0x0FFF) as u16;
                if self.peripherals.report_unclaimed(index) {
                    log::warn!(
                        "read from unclaimed SFR {:04X}H at {:X}:{:04X}H",
                        addr,
                        self.csr,
                        self.pc
                    );
                }
                self.peripherals.read_sfr(index)
            }
            Backing::Handler(Handler::OpenBus) => addr::OPEN_BUS,
        }
    }

    fn write_at(&mut self, addr: u32, value: u8) {
        let Some(region) = self.resolve(addr, AccessKind::Write).copied() else {
            log::warn!(
                "write {:02X} to unmapped {:05X}H dropped at {:X}:{:04X}H",
                value,
                addr,
                self.csr,
                self.pc
            );
            return;
        };
        match region.backing {
            Backing::Array { store, base } => {
                let index = (addr - region.low + base) as usize;
                if !self.memory.write(store, index, value) {
                    log::warn!("write past {:?} buffer at {:05X}H dropped", store, addr);
                }
            }
            Backing::Handler(Handler::Dsr) => {
                self.dsr = value;
                self.dsr_written = Some(value);
                self.peripherals.sfr.write(0, value);
            }
            Backing::Handler(Handler::Sfr) => {
                let index = (addr & 0x0FFF) as u16;
                if self.peripherals.report_unclaimed(index) {
                    log::warn!(
                        "write {:02X} to unclaimed SFR {:04X}H at {:X}:{:04X}H",
                        value,
                        addr,
                        self.csr,
                        self.pc
                    );
                }
                self.peripherals.write_sfr(index, value);
            }
            Backing::Handler(Handler::OpenBus) => {
                log::debug!("write {:02X} to open bus {:05X}H ignored", value, addr);
            }
        }
    }

    /// Little-endian data read of `size` bytes (1-8) at DSR:offset. The
    /// offset wraps within the segment.
    pub fn read_data(&mut self, dsr: u8, offset: u16, size: u8) -> u64 {
        let size = size.clamp(1, 8);
        let seg = ((dsr & 0x0F) as u32) << 16;
        let mut value = 0u64;
        for i in 0..size {
            let addr = seg | offset.wrapping_add(i as u16) as u32;
            value |= (self.read_at(addr, AccessKind::Read) as u64) << (8 * i);
        }
        self.last_read = Some(Access {
            addr: seg | offset as u32,
            size,
        });
        value
    }

    /// Little-endian data write of `size` bytes (1-8) at DSR:offset
    pub fn write_data(&mut self, dsr: u8, offset: u16, size: u8, value: u64) {
        let size = size.clamp(1, 8);
        let seg = ((dsr & 0x0F) as u32) << 16;
        for i in 0..size {
            let addr = seg | offset.wrapping_add(i as u16) as u32;
            self.write_at(addr, (value >> (8 * i)) as u8);
        }
        self.last_write = Some(Access {
            addr: seg | offset as u32,
            size,
        });
    }

    /// Instruction word at CSR:PC
    pub fn read_code(&mut self, csr: u8, pc: u16) -> u16 {
        let seg = ((csr & 0x0F) as u32) << 16;
        let lo = self.read_at(seg | pc as u32, AccessKind::Fetch);
        let hi = self.read_at(seg | pc.wrapping_add(1) as u32, AccessKind::Fetch);
        u16::from_le_bytes([lo, hi])
    }

    /// Code byte without side effects or diagnostics
    pub fn peek_code(&self, addr: u32) -> u8 {
        let addr = addr & addr::CODE_MASK;
        match self.resolve(addr, AccessKind::Fetch) {
            Some(MemoryRegion {
                backing: Backing::Array { store, base },
                low,
                ..
            }) => self
                .memory
                .read(*store, (addr - low + base) as usize)
                .unwrap_or(addr::OPEN_BUS),
            _ => addr::OPEN_BUS,
        }
    }

    /// Code word without side effects (call tracing, disassembly)
    pub fn peek_code_word(&self, csr: u8, pc: u16) -> u16 {
        let seg = ((csr & 0x0F) as u32) << 16;
        u16::from_le_bytes([
            self.peek_code(seg | pc as u32),
            self.peek_code(seg | pc.wrapping_add(1) as u32),
        ])
    }

    /// CSR:PC decodes to real code rather than nothing or open bus
    pub fn code_mapped(&self, csr: u8, pc: u16) -> bool {
        let addr = (((csr & 0x0F) as u32) << 16) | pc as u32;
        matches!(
            self.resolve(addr, AccessKind::Fetch),
            Some(MemoryRegion {
                backing: Backing::Array { .. },
                ..
            })
        )
    }

    /// Data byte at a 20-bit address, not recorded in the access log
    pub fn read_byte(&mut self, addr: u32) -> u8 {
        self.read_at(addr & addr::CODE_MASK, AccessKind::Read)
    }

    /// Data byte write at a 20-bit address, not recorded in the access log
    pub fn write_byte(&mut self, addr: u32, value: u8) {
        self.write_at(addr & addr::CODE_MASK, value);
    }

    /// Emulator firmware keyboard mailbox: command, KI byte, KO byte
    pub fn mailbox(&mut self) -> [u8; 3] {
        let base = self.config.key_mailbox();
        [
            self.read_byte(base),
            self.read_byte(base + 1),
            self.read_byte(base + 2),
        ]
    }

    pub fn write_mailbox(&mut self, index: u32, value: u8) {
        let base = self.config.key_mailbox();
        self.write_byte(base + index, value);
    }

    /// Per-step keyboard service: recompute KI and, on emulator firmware,
    /// drop a stale mailbox command.
    pub fn scan_keyboard<'a>(&mut self, pressed: impl IntoIterator<Item = &'a Key>) {
        if self.peripherals.scan_keys(pressed).is_none() {
            return;
        }
        if !self.config.real_hardware && KeypadController::mailbox_stale(self.mailbox()) {
            log::trace!("stale keyboard mailbox command cleared");
            self.write_mailbox(0, 0);
        }
    }
}
