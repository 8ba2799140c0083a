//! Hardware profiles and emulator configuration
//!
//! Every nX-U8 calculator generation shares the CPU core but differs in RAM
//! placement, banked segments, display geometry and which peripherals exist.
//! `HardwareId` names the generation; `EmuConfig` carries the remaining knobs.

/// Calculator hardware generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HardwareId {
    /// SOLAR II (id 0)
    Solar2,
    /// ES and fx-5800P (id 2)
    Es,
    /// ES PLUS (id 3)
    #[default]
    EsPlus,
    /// ClassWiz EX (id 4)
    ClassWizEx,
    /// ClassWiz CW (id 5)
    ClassWizCw,
    /// TI MathPrint (id 6)
    TiMathPrint,
}

impl HardwareId {
    /// Map a numeric hardware id. Unknown ids fall back to ES PLUS.
    pub fn from_id(id: u8) -> Self {
        match id {
            0 => HardwareId::Solar2,
            2 => HardwareId::Es,
            3 => HardwareId::EsPlus,
            4 => HardwareId::ClassWizEx,
            5 => HardwareId::ClassWizCw,
            6 => HardwareId::TiMathPrint,
            other => {
                log::warn!("unknown hardware id {}, using ES PLUS", other);
                HardwareId::EsPlus
            }
        }
    }

    pub fn id(self) -> u8 {
        match self {
            HardwareId::Solar2 => 0,
            HardwareId::Es => 2,
            HardwareId::EsPlus => 3,
            HardwareId::ClassWizEx => 4,
            HardwareId::ClassWizCw => 5,
            HardwareId::TiMathPrint => 6,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            HardwareId::Solar2 => "SOLAR II",
            HardwareId::Es => "ES",
            HardwareId::EsPlus => "ES PLUS",
            HardwareId::ClassWizEx => "ClassWiz EX",
            HardwareId::ClassWizCw => "ClassWiz CW",
            HardwareId::TiMathPrint => "TI MathPrint",
        }
    }

    /// Last address of the ROM mirror visible in data segment 0
    pub fn rom_window_end(self) -> u32 {
        match self {
            HardwareId::Solar2 => 0xDFFF,
            HardwareId::Es | HardwareId::EsPlus => 0x7FFF,
            HardwareId::ClassWizEx => 0xCFFF,
            HardwareId::ClassWizCw => 0x8FFF,
            HardwareId::TiMathPrint => 0xAFFF,
        }
    }
}

/// Display buffer geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenGeometry {
    /// Bytes reserved per row in the SFR display window
    pub row_stride: u16,
    /// Bytes actually displayed per row
    pub row_bytes: u16,
    /// Number of rows, including the status-bar row
    pub rows: usize,
    /// Number of pixel columns
    pub cols: usize,
}

/// Emulator configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmuConfig {
    /// Hardware generation
    pub hardware: HardwareId,
    /// Emulate the retail part rather than the emulator-firmware variant
    pub real_hardware: bool,
    /// fx-5800P variant of the ES profile (flash-backed)
    pub is_5800p: bool,
    /// KO drive polarity on ES PLUS (ignored by other profiles)
    pub ko_mode: u8,
    /// Value presented on port 0x50 (model strap pins)
    pub pd_value: u8,
    /// Force the watchdog on or off. `None` enables it on TI MathPrint only.
    pub watchdog: Option<bool>,
    /// Force the BCD coprocessor on or off. `None` enables it on ClassWiz.
    pub bcd: Option<bool>,
}

impl Default for EmuConfig {
    fn default() -> Self {
        Self {
            hardware: HardwareId::EsPlus,
            real_hardware: false,
            is_5800p: false,
            ko_mode: 1,
            pd_value: 0,
            watchdog: None,
            bcd: None,
        }
    }
}

impl EmuConfig {
    pub fn new(hardware: HardwareId) -> Self {
        Self {
            hardware,
            ..Self::default()
        }
    }

    /// fx-5800P only exists on the ES board
    pub fn is_5800p(&self) -> bool {
        self.hardware == HardwareId::Es && self.is_5800p
    }

    /// Effective KO drive mode: 1 drives KO through port 0x44 inverted,
    /// 0 reads the drive byte from port 0x46.
    pub fn ko_mode(&self) -> u8 {
        match self.hardware {
            HardwareId::Es => 1,
            HardwareId::EsPlus => self.ko_mode,
            _ => 0,
        }
    }

    /// Start and size of the main RAM window in segment 0
    pub fn ram_window(&self) -> (u32, u32) {
        match self.hardware {
            HardwareId::Solar2 => (0xE000, 0x1000),
            HardwareId::ClassWizEx => (0xD000, 0x2000),
            HardwareId::ClassWizCw => (0x9000, 0x6000),
            HardwareId::TiMathPrint => (0xB000, 0x4000),
            HardwareId::Es | HardwareId::EsPlus => {
                if self.real_hardware {
                    (0x8000, 0x0E00)
                } else {
                    (0x8000, 0x7000)
                }
            }
        }
    }

    /// Size of the banked read/write segment, if the profile has one
    pub fn rw_segment_size(&self) -> usize {
        match self.hardware {
            HardwareId::ClassWizEx | HardwareId::ClassWizCw => 0x10000,
            _ => 0,
        }
    }

    /// Data address of the emulator keyboard mailbox
    pub fn key_mailbox(&self) -> u32 {
        match self.hardware {
            HardwareId::Solar2 => 0xE800,
            HardwareId::ClassWizEx => 0x4_8E00,
            HardwareId::ClassWizCw => 0x8_8E00,
            _ => 0x8E00,
        }
    }

    pub fn screen_geometry(&self) -> ScreenGeometry {
        let (row_stride, row_bytes, rows, cols) = match self.hardware {
            HardwareId::Solar2 => (8, 8, 4, 64),
            HardwareId::Es | HardwareId::EsPlus => (0x10, 0x0C, 32, 96),
            HardwareId::ClassWizEx | HardwareId::ClassWizCw => (0x20, 0x18, 64, 192),
            HardwareId::TiMathPrint => (8, 8, 192, 64),
        };
        ScreenGeometry {
            row_stride,
            row_bytes,
            rows,
            cols,
        }
    }

    pub fn watchdog_enabled(&self) -> bool {
        self.watchdog
            .unwrap_or(self.hardware == HardwareId::TiMathPrint)
    }

    pub fn bcd_enabled(&self) -> bool {
        self.bcd.unwrap_or(matches!(
            self.hardware,
            HardwareId::ClassWizEx | HardwareId::ClassWizCw
        ))
    }

    /// Standby controller, timer and keyboard scanner are absent on TI MathPrint
    pub fn has_standby(&self) -> bool {
        self.hardware != HardwareId::TiMathPrint
    }

    /// The plain ES board never vectors interrupts; the fx-5800P does
    pub fn interrupts_enabled(&self) -> bool {
        self.hardware != HardwareId::Es || self.is_5800p()
    }

    /// CSR mask applied before each step
    pub fn csr_mask(&self) -> u8 {
        if self.real_hardware && self.hardware == HardwareId::EsPlus {
            0x01
        } else {
            0x0F
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_id_fallback() {
        assert_eq!(HardwareId::from_id(4), HardwareId::ClassWizEx);
        assert_eq!(HardwareId::from_id(1), HardwareId::EsPlus);
        assert_eq!(HardwareId::from_id(99), HardwareId::EsPlus);
        for id in [0u8, 2, 3, 4, 5, 6] {
            assert_eq!(HardwareId::from_id(id).id(), id);
        }
    }

    #[test]
    fn test_ko_mode() {
        let mut cfg = EmuConfig::new(HardwareId::EsPlus);
        cfg.ko_mode = 0;
        assert_eq!(cfg.ko_mode(), 0);
        cfg.hardware = HardwareId::Es;
        assert_eq!(cfg.ko_mode(), 1);
        cfg.hardware = HardwareId::ClassWizCw;
        assert_eq!(cfg.ko_mode(), 0);
    }

    #[test]
    fn test_ram_window_real_hardware() {
        let mut cfg = EmuConfig::new(HardwareId::EsPlus);
        assert_eq!(cfg.ram_window(), (0x8000, 0x7000));
        cfg.real_hardware = true;
        assert_eq!(cfg.ram_window(), (0x8000, 0x0E00));
    }

    #[test]
    fn test_optional_peripherals() {
        let cw = EmuConfig::new(HardwareId::ClassWizCw);
        assert!(cw.bcd_enabled());
        assert!(!cw.watchdog_enabled());

        let ti = EmuConfig::new(HardwareId::TiMathPrint);
        assert!(ti.watchdog_enabled());
        assert!(!ti.has_standby());

        let mut es = EmuConfig::new(HardwareId::Es);
        assert!(!es.interrupts_enabled());
        es.is_5800p = true;
        assert!(es.interrupts_enabled());
    }
}
