//! Display buffer decoder
//!
//! Every profile except TI MathPrint exposes the LCD driver RAM inside the SFR
//! window at 0x800, one row per `row_stride` bytes with `row_bytes` of them
//! visible. Each byte is 8 horizontal pixels, MSB leftmost. Row 0 carries the
//! status-bar annunciators; rows 1.. are the dot matrix.
//!
//! Control registers (SFR offsets):
//!   0x30, 0x31, 0x33: 3-bit LCD mode/contrast fields
//!   0x32:             5-bit contrast
//!   0x37:             plane select (ClassWiz CW retail, bit 2 = high plane)
//!
//! The ClassWiz CW is 4-level grayscale made of two planes. On the retail part
//! the plane is selected through 0x37; emulator firmware instead keeps the high
//! plane in RAM at 8:9000H, which [`ScreenController::refresh_high_plane`]
//! re-samples. TI MathPrint draws through syscalls into a RAM frame buffer
//! loaded with [`ScreenController::load_syscall_frame`].
//!
//! Intensities are 0..=3: bit 0 = low plane, bit 1 = high plane.

use crate::config::{EmuConfig, HardwareId, ScreenGeometry};

/// First SFR offset of the display RAM
pub const DISPLAY_BASE: u16 = 0x800;

/// Plane select register (ClassWiz CW retail)
pub const PLANE_SELECT: u16 = 0x37;

/// Rows of the TI MathPrint frame buffer
pub const SYSCALL_ROWS: usize = 192;
/// Bytes per row of the TI MathPrint frame buffer
pub const SYSCALL_ROW_BYTES: usize = 8;
/// Annunciator bits in the TI MathPrint status word
const SYSCALL_STATUS_BITS: usize = 19;

/// Status-bar annunciators as (SFR offset from 0x800, bit)
const STATUS_SOLAR2: &[(u16, u8)] = &[
    (0x11, 6), // SHIFT
    (0x11, 2), // MODE
    (0x12, 6), // STO
    (0x12, 2), // RCL
    (0x13, 6), // hyp
    (0x13, 2), // M
    (0x14, 6), // K
    (0x14, 2), // DEG
    (0x15, 6), // RAD
    (0x15, 2), // GRA
    (0x16, 4), // FIX
    (0x16, 2), // SCI
    (0x16, 0), // SD
];

const STATUS_FX5800P: &[(u16, u8)] = &[
    (0x0, 4), // S
    (0x0, 2), // A
    (0x1, 4), // M
    (0x1, 1), // STO
    (0x2, 6), // RCL
    (0x3, 6), // SD
    (0x4, 7), // REG
    (0x5, 6), // FMLA
    (0x5, 4), // PRGM
    (0x5, 1), // END
    (0x7, 5), // D
    (0x7, 1), // R
    (0x8, 4), // G
    (0x8, 0), // FIX
    (0x9, 5), // SCI
    (0xA, 6), // Math
    (0xA, 3), // down
    (0xB, 7), // up
    (0xB, 4), // Disp
];

const STATUS_ES: &[(u16, u8)] = &[
    (0x0, 4), // S
    (0x0, 2), // A
    (0x1, 4), // M
    (0x1, 1), // STO
    (0x2, 6), // RCL
    (0x3, 6), // STAT
    (0x4, 7), // CMPLX
    (0x5, 6), // MAT
    (0x5, 1), // VCT
    (0x7, 5), // D
    (0x7, 1), // R
    (0x8, 4), // G
    (0x8, 0), // FIX
    (0x9, 5), // SCI
    (0xA, 6), // Math
    (0xA, 3), // down
    (0xB, 7), // up
    (0xB, 4), // Disp
];

const STATUS_CLASSWIZ_EX: &[(u16, u8)] = &[
    (0x00, 0),
    (0x01, 0),
    (0x02, 0),
    (0x03, 0),
    (0x05, 0),
    (0x06, 0),
    (0x07, 0),
    (0x08, 0),
    (0x09, 0),
    (0x0A, 0),
    (0x0B, 0),
    (0x0C, 0),
    (0x0D, 0),
    (0x0E, 0),
    (0x0F, 0),
    (0x11, 0),
    (0x12, 0),
    (0x13, 0),
    (0x15, 0),
    (0x16, 0),
];

const STATUS_CLASSWIZ_CW: &[(u16, u8)] = &[
    (0x01, 0),
    (0x03, 0),
    (0x04, 0),
    (0x05, 0),
    (0x06, 0),
    (0x07, 0),
    (0x08, 0),
    (0x0A, 0),
    (0x0B, 0),
    (0x0C, 0),
    (0x0D, 0),
    (0x0E, 0),
    (0x10, 0),
    (0x11, 0),
    (0x12, 0),
    (0x13, 0),
    (0x15, 0),
    (0x16, 0),
    (0x09, 0),
    (0x0F, 0),
];

/// Decoded display contents
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Frame {
    /// Annunciator intensities in display order, if the profile has a status bar
    pub status_bar: Option<Vec<u8>>,
    /// Pixel rows. On SOLAR II these are twelve 8-segment digit cells followed
    /// by one row holding the two separate indicators.
    pub pixels: Vec<Vec<u8>>,
}

/// Display buffer decoder
#[derive(Debug, Clone)]
pub struct ScreenController {
    hardware: HardwareId,
    is_5800p: bool,
    geometry: ScreenGeometry,
    /// Intensity grid, rows x cols
    grid: Vec<Vec<u8>>,
    /// Writes go to the high plane (ClassWiz CW retail)
    draw_high_plane: bool,
    /// TI MathPrint status word
    syscall_status: Option<u32>,
    /// Bumped whenever a pixel changes
    generation: u64,
    /// Last projection and the generation it was built from
    frame: Frame,
    frame_generation: Option<u64>,
}

impl ScreenController {
    pub fn new(config: &EmuConfig) -> Self {
        let geometry = config.screen_geometry();
        Self {
            hardware: config.hardware,
            is_5800p: config.is_5800p(),
            geometry,
            grid: vec![vec![0; geometry.cols]; geometry.rows],
            draw_high_plane: false,
            syscall_status: None,
            generation: 0,
            frame: Frame::default(),
            frame_generation: None,
        }
    }

    pub fn reset(&mut self) {
        for row in &mut self.grid {
            row.fill(0);
        }
        self.draw_high_plane = false;
        self.syscall_status = None;
        self.generation = self.generation.wrapping_add(1);
        self.frame_generation = None;
    }

    pub fn geometry(&self) -> ScreenGeometry {
        self.geometry
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn pixel(&self, row: usize, col: usize) -> u8 {
        self.grid
            .get(row)
            .and_then(|r| r.get(col))
            .copied()
            .unwrap_or(0)
    }

    /// SFR offsets of each display row: (start, visible bytes)
    pub fn sfr_rows(&self) -> impl Iterator<Item = (u16, u16)> + '_ {
        let stride = self.geometry.row_stride;
        let used = self.geometry.row_bytes;
        (0..self.geometry.rows as u16).map(move |row| (DISPLAY_BASE + row * stride, used))
    }

    /// Plane select hook
    pub fn select_plane(&mut self, value: u8) -> u8 {
        self.draw_high_plane = value & 0x04 != 0;
        value
    }

    /// Display RAM write hook
    pub fn write_data(&mut self, index: u16, value: u8) -> u8 {
        let offset = index.wrapping_sub(DISPLAY_BASE) as usize;
        let stride = self.geometry.row_stride as usize;
        let row = offset / stride;
        let col = (offset % stride) * 8;

        let plane = if self.hardware == HardwareId::ClassWizCw {
            if self.draw_high_plane {
                2
            } else {
                1
            }
        } else {
            3
        };
        self.store_byte(row, col, value, plane);
        value
    }

    /// Re-sample one row of the RAM-resident high plane
    pub fn refresh_high_plane(&mut self, row: usize, bytes: &[u8]) {
        for (i, &byte) in bytes.iter().enumerate() {
            self.store_byte(row, i * 8, byte, 2);
        }
    }

    /// Load the TI MathPrint frame buffer (rows of 8 bytes, rightmost byte
    /// first) and its optional status word.
    pub fn load_syscall_frame(&mut self, rows: &[u8], status: Option<u32>) {
        for (row, chunk) in rows
            .chunks(SYSCALL_ROW_BYTES)
            .take(self.geometry.rows)
            .enumerate()
        {
            for (j, &byte) in chunk.iter().rev().enumerate() {
                self.store_byte(row, j * 8, byte, 3);
            }
        }
        if self.syscall_status != status {
            self.syscall_status = status;
            self.generation = self.generation.wrapping_add(1);
        }
    }

    fn store_byte(&mut self, row: usize, col: usize, value: u8, plane: u8) {
        let Some(cells) = self.grid.get_mut(row) else {
            return;
        };
        let mut changed = false;
        for i in 0..8 {
            let Some(cell) = cells.get_mut(col + i) else {
                break;
            };
            let next = if value & (0x80 >> i) != 0 {
                *cell | plane
            } else {
                *cell & !plane
            };
            if next != *cell {
                *cell = next;
                changed = true;
            }
        }
        if changed {
            self.generation = self.generation.wrapping_add(1);
        }
    }

    fn status_bit(&self, addr: u16, bit: u8) -> u8 {
        let stride = self.geometry.row_stride;
        let row = (addr / stride) as usize;
        let col = (addr % stride) as usize * 8 + (7 - (bit & 7)) as usize;
        self.pixel(row, col)
    }

    fn status_layout(&self) -> Option<&'static [(u16, u8)]> {
        match self.hardware {
            HardwareId::Solar2 => Some(STATUS_SOLAR2),
            HardwareId::Es if self.is_5800p => Some(STATUS_FX5800P),
            HardwareId::Es | HardwareId::EsPlus => Some(STATUS_ES),
            HardwareId::ClassWizEx => Some(STATUS_CLASSWIZ_EX),
            HardwareId::ClassWizCw => Some(STATUS_CLASSWIZ_CW),
            HardwareId::TiMathPrint => None,
        }
    }

    fn build_frame(&self) -> Frame {
        if self.hardware == HardwareId::TiMathPrint {
            let status = self.syscall_status.unwrap_or(0);
            return Frame {
                status_bar: Some(
                    (0..SYSCALL_STATUS_BITS)
                        .map(|i| ((status >> i) & 1) as u8)
                        .collect(),
                ),
                pixels: self.grid.clone(),
            };
        }

        let status_bar = self
            .status_layout()
            .map(|layout| layout.iter().map(|&(a, b)| self.status_bit(a, b)).collect());

        let pixels = if self.hardware == HardwareId::Solar2 {
            self.solar2_cells()
        } else {
            self.grid[1..].to_vec()
        };

        Frame { status_bar, pixels }
    }

    /// SOLAR II drives a segment display: each digit cell gathers its eight
    /// segments from three rows of the buffer.
    fn solar2_cells(&self) -> Vec<Vec<u8>> {
        let g = &self.grid;
        let mut cells: Vec<Vec<u8>> = (0..12)
            .map(|j| {
                let n = 9 + j * 4;
                let mut cell = Vec::with_capacity(8);
                for row in &g[0..2] {
                    cell.extend_from_slice(&[row[n + 1], row[n], row[n + 2]]);
                }
                cell.extend_from_slice(&[g[2][n + 1], g[2][n + 2]]);
                cell
            })
            .collect();
        cells.push(vec![g[1][6], g[2][49]]);
        cells
    }

    /// Current frame. Recomputed only when a pixel changed since the last call.
    pub fn frame(&mut self) -> &Frame {
        if self.frame_generation != Some(self.generation) {
            self.frame = self.build_frame();
            self.frame_generation = Some(self.generation);
        }
        &self.frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn screen(hw: HardwareId) -> ScreenController {
        ScreenController::new(&EmuConfig::new(hw))
    }

    #[test]
    fn test_geometry() {
        let s = screen(HardwareId::ClassWizEx);
        assert_eq!(s.geometry().rows, 64);
        assert_eq!(s.geometry().cols, 192);
        let rows: Vec<_> = s.sfr_rows().take(2).collect();
        assert_eq!(rows, vec![(0x800, 0x18), (0x820, 0x18)]);
    }

    #[test]
    fn test_write_sets_eight_pixels_msb_first() {
        let mut s = screen(HardwareId::EsPlus);
        // Row 2, byte 1
        assert_eq!(s.write_data(0x800 + 2 * 0x10 + 1, 0b1000_0001), 0b1000_0001);
        assert_eq!(s.pixel(2, 8), 3);
        assert_eq!(s.pixel(2, 9), 0);
        assert_eq!(s.pixel(2, 15), 3);

        s.write_data(0x800 + 2 * 0x10 + 1, 0x00);
        assert_eq!(s.pixel(2, 8), 0);
    }

    #[test]
    fn test_classwiz_cw_planes() {
        let mut s = screen(HardwareId::ClassWizCw);
        s.write_data(0x820, 0x80);
        assert_eq!(s.pixel(1, 0), 1);

        s.select_plane(0x04);
        s.write_data(0x820, 0x80);
        assert_eq!(s.pixel(1, 0), 3);

        // Clearing the high plane keeps the low plane
        s.write_data(0x820, 0x00);
        assert_eq!(s.pixel(1, 0), 1);

        s.refresh_high_plane(1, &[0x80]);
        assert_eq!(s.pixel(1, 0), 3);
    }

    #[test]
    fn test_frame_cached_until_pixels_change() {
        let mut s = screen(HardwareId::EsPlus);
        let gen = s.generation();
        let first = s.frame().clone();
        assert_eq!(first.pixels.len(), 31);

        // Writing the same value changes nothing
        s.write_data(0x810, 0x00);
        assert_eq!(s.generation(), gen);
        assert_eq!(s.frame(), &first);

        s.write_data(0x810, 0xFF);
        assert_ne!(s.generation(), gen);
        let second = s.frame().clone();
        assert_eq!(second.pixels[0][0..8], [3; 8]);
        assert_eq!(s.frame(), &second);
    }

    #[test]
    fn test_status_bar_es() {
        let mut s = screen(HardwareId::EsPlus);
        // [S] is row 0 byte 0 bit 4
        s.write_data(0x800, 1 << 4);
        let bar = s.frame().status_bar.clone().unwrap();
        assert_eq!(bar.len(), 18);
        assert_eq!(bar[0], 3);
        assert!(bar[1..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_status_bar_classwiz_uses_bit0() {
        let mut s = screen(HardwareId::ClassWizEx);
        s.write_data(0x802, 0x01);
        let bar = s.frame().status_bar.clone().unwrap();
        assert_eq!(bar.len(), 20);
        assert_eq!(bar[2], 3);
    }

    #[test]
    fn test_solar2_cells() {
        let mut s = screen(HardwareId::Solar2);
        let frame = s.frame().clone();
        assert_eq!(frame.pixels.len(), 13);
        assert_eq!(frame.pixels[0].len(), 8);
        assert_eq!(frame.pixels[12].len(), 2);
        assert_eq!(frame.status_bar.unwrap().len(), 13);

        // Column 10 of row 0 is the first segment of cell 0 (n = 9)
        s.write_data(0x801, 0x20);
        assert_eq!(s.frame().pixels[0][0], 3);
        assert_eq!(s.frame().pixels[0][1], 0);
    }

    #[test]
    fn test_syscall_frame() {
        let mut s = screen(HardwareId::TiMathPrint);
        let mut rows = vec![0u8; SYSCALL_ROWS * SYSCALL_ROW_BYTES];
        // Last byte of row 0 is displayed first
        rows[7] = 0x80;
        s.load_syscall_frame(&rows, Some(0b101));
        let frame = s.frame().clone();
        assert_eq!(frame.pixels.len(), 192);
        assert_eq!(frame.pixels[0][0], 3);
        assert_eq!(frame.pixels[0][1], 0);
        let bar = frame.status_bar.unwrap();
        assert_eq!(bar.len(), 19);
        assert_eq!(&bar[0..3], &[1, 0, 1]);
    }
}
