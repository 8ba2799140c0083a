//! ROM identification and checksum
//!
//! ES PLUS and ClassWiz firmware store a version string, a revision and a
//! 16-bit checksum near the top of the image. The checksum is zero minus the
//! sum of the covered bytes (ES PLUS) or words (ClassWiz). Everything is
//! read through the data bus, so the result also confirms the profile's
//! segment layout matches the image.

use thiserror::Error;

use crate::bus::Bus;
use crate::config::HardwareId;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RomInfoError {
    #[error("ROM info is not available for {0}")]
    Unsupported(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RomInfo {
    pub version: String,
    pub revision: String,
    /// Checksum recorded in the image
    pub stored_sum: u16,
    /// Checksum computed over the image
    pub computed_sum: u16,
}

impl RomInfo {
    pub fn checksum_ok(&self) -> bool {
        self.stored_sum == self.computed_sum
    }
}

/// Summed range: data segment, end offset (exclusive), word-wise
struct Span(u8, u32, bool);

struct Layout {
    /// Segment holding the version, revision and checksum
    seg: u8,
    version: u16,
    revision: u16,
    sum: u16,
    spans: Vec<Span>,
}

fn layout(hardware: HardwareId, ko_mode: u8) -> Option<Layout> {
    match hardware {
        HardwareId::EsPlus => {
            let (seg0, seg0_len) = if ko_mode != 0 { (0, 0x8000) } else { (8, 0x10000) };
            Some(Layout {
                seg: 1,
                version: 0xFFF4,
                revision: 0xFFFA,
                sum: 0xFFFC,
                spans: vec![Span(seg0, seg0_len, false), Span(1, 0xFFFC, false)],
            })
        }
        HardwareId::ClassWizEx => Some(Layout {
            seg: 3,
            version: 0xFFEE,
            revision: 0xFFF4,
            sum: 0xFFF6,
            spans: vec![
                Span(5, 0xFC00, true),
                Span(1, 0x10000, true),
                Span(2, 0x10000, true),
                Span(3, 0xFFF6, true),
            ],
        }),
        HardwareId::ClassWizCw => Some(Layout {
            seg: 7,
            version: 0x1FEE,
            revision: 0x1FF4,
            sum: 0x1FF6,
            spans: vec![
                Span(8, 0xFC00, true),
                Span(1, 0x10000, true),
                Span(2, 0x10000, true),
                Span(3, 0x10000, true),
                Span(4, 0x10000, true),
                Span(5, 0xE000, true),
                Span(7, 0x1FF6, true),
            ],
        }),
        _ => None,
    }
}

fn seg_addr(seg: u8, offset: u32) -> u32 {
    ((seg as u32) << 16) | offset
}

fn read_word(bus: &mut Bus, addr: u32) -> u16 {
    u16::from_le_bytes([bus.read_byte(addr), bus.read_byte(addr + 1)])
}

fn read_text(bus: &mut Bus, addr: u32, len: u32) -> String {
    let bytes: Vec<u8> = (0..len).map(|i| bus.read_byte(addr + i)).collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Read the firmware identification and verify its checksum
pub fn rom_info(bus: &mut Bus) -> Result<RomInfo, RomInfoError> {
    let config = bus.config();
    let hardware = config.hardware;
    let layout = layout(hardware, config.ko_mode())
        .ok_or(RomInfoError::Unsupported(hardware.name()))?;

    let version = read_text(bus, seg_addr(layout.seg, layout.version as u32), 6);
    let revision = read_text(bus, seg_addr(layout.seg, layout.revision as u32), 2);
    let stored_sum = read_word(bus, seg_addr(layout.seg, layout.sum as u32));

    let mut sum = 0u16;
    for &Span(seg, end, words) in &layout.spans {
        if words {
            for offset in (0..end).step_by(2) {
                sum = sum.wrapping_sub(read_word(bus, seg_addr(seg, offset)));
            }
        } else {
            for offset in 0..end {
                sum = sum.wrapping_sub(bus.read_byte(seg_addr(seg, offset)) as u16);
            }
        }
    }

    log::debug!(
        "{} ROM {} rev {}: sum {:04X}, stored {:04X}",
        hardware.name(),
        version,
        revision,
        sum,
        stored_sum
    );
    Ok(RomInfo {
        version,
        revision,
        stored_sum,
        computed_sum: sum,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EmuConfig;

    fn es_plus_rom() -> Vec<u8> {
        let mut rom = vec![0u8; 0x20000];
        rom[0x0010] = 0x05;
        rom[0x7FFF] = 0x10;
        // Outside the summed part of segment 0 (ko_mode 1)
        rom[0x8000] = 0x77;
        rom[0x1_0020] = 0x03;
        rom[0x1_FFF4..0x1_FFFA].copy_from_slice(b"CY240X");
        rom[0x1_FFFA..0x1_FFFC].copy_from_slice(b"02");
        rom
    }

    fn expected(rom: &[u8]) -> u16 {
        let covered = rom[..0x8000].iter().chain(&rom[0x1_0000..0x1_FFFC]);
        covered.fold(0u16, |sum, &b| sum.wrapping_sub(b as u16))
    }

    #[test]
    fn test_es_plus_checksum() {
        let mut rom = es_plus_rom();
        let sum = expected(&rom);
        rom[0x1_FFFC..0x1_FFFE].copy_from_slice(&sum.to_le_bytes());

        let mut bus = Bus::new(&EmuConfig::new(HardwareId::EsPlus), rom, None).unwrap();
        let info = rom_info(&mut bus).unwrap();
        assert_eq!(info.version, "CY240X");
        assert_eq!(info.revision, "02");
        assert_eq!(info.computed_sum, sum);
        assert!(info.checksum_ok());
    }

    #[test]
    fn test_es_plus_bad_checksum() {
        let mut rom = es_plus_rom();
        let sum = expected(&rom).wrapping_add(1);
        rom[0x1_FFFC..0x1_FFFE].copy_from_slice(&sum.to_le_bytes());

        let mut bus = Bus::new(&EmuConfig::new(HardwareId::EsPlus), rom, None).unwrap();
        let info = rom_info(&mut bus).unwrap();
        assert!(!info.checksum_ok());
    }

    #[test]
    fn test_classwiz_ex_word_sum() {
        let mut rom = vec![0u8; 0x40000];
        // Segment 0 word at 0x0100 is seen through the segment 5 mirror
        rom[0x0100] = 0x34;
        rom[0x0101] = 0x12;
        rom[0x2_0000] = 0x01;
        rom[0x3_FFEE..0x3_FFF4].copy_from_slice(b"EY-EXA");
        let mut bus = Bus::new(&EmuConfig::new(HardwareId::ClassWizEx), rom, None).unwrap();
        let info = rom_info(&mut bus).unwrap();

        let text: u16 = b"EY-EXA"
            .chunks(2)
            .fold(0u16, |s, w| s.wrapping_add(u16::from_le_bytes([w[0], w[1]])));
        let want = 0u16.wrapping_sub(0x1234).wrapping_sub(1).wrapping_sub(text);
        assert_eq!(info.version, "EY-EXA");
        assert_eq!(info.computed_sum, want);
    }

    #[test]
    fn test_unsupported_profile() {
        let mut bus = Bus::new(&EmuConfig::new(HardwareId::Solar2), vec![0; 0x100], None).unwrap();
        assert_eq!(
            rom_info(&mut bus),
            Err(RomInfoError::Unsupported("SOLAR II"))
        );
    }
}
