//! Backing stores for the nX-U8 address spaces
//!
//! The bus region table points into one of four flat byte buffers:
//! - Code: the ROM image (code space, also mirrored into data segments)
//! - Data: main RAM in data segment 0
//! - RwSeg: the banked read/write segment on ClassWiz boards
//! - Flash: the fx-5800P flash image
//!
//! Offsets past the end of a buffer read as open bus (0xFF) and drop writes.

/// Address constants shared by the bus and peripherals
pub mod addr {
    /// Size of the SFR window
    pub const SFR_SIZE: usize = 0x1000;
    /// The DSR mirror occupies the first SFR byte
    pub const DSR: u32 = 0xF000;
    /// Code space is 20 bits wide (16 segments of 64KB)
    pub const CODE_MASK: u32 = 0xFFFFF;
    /// Value returned for unmapped reads
    pub const OPEN_BUS: u8 = 0xFF;
}

/// Which buffer a region is backed by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Store {
    Code,
    Data,
    RwSeg,
    Flash,
}

/// Flat memory buffers
#[derive(Debug, Clone)]
pub struct Memory {
    code: Vec<u8>,
    data: Vec<u8>,
    rw_seg: Vec<u8>,
    flash: Vec<u8>,
}

impl Memory {
    pub fn new(rom: Vec<u8>, data_size: usize, rw_seg_size: usize, flash: Vec<u8>) -> Self {
        Self {
            code: rom,
            data: vec![0x00; data_size],
            rw_seg: vec![0x00; rw_seg_size],
            flash,
        }
    }

    /// Clear volatile memory. ROM and flash are kept.
    pub fn reset(&mut self) {
        self.data.fill(0x00);
        self.rw_seg.fill(0x00);
    }

    pub fn store(&self, store: Store) -> &[u8] {
        match store {
            Store::Code => &self.code,
            Store::Data => &self.data,
            Store::RwSeg => &self.rw_seg,
            Store::Flash => &self.flash,
        }
    }

    fn store_mut(&mut self, store: Store) -> &mut [u8] {
        match store {
            Store::Code => &mut self.code,
            Store::Data => &mut self.data,
            Store::RwSeg => &mut self.rw_seg,
            Store::Flash => &mut self.flash,
        }
    }

    /// Read a byte, or `None` past the end of the buffer
    pub fn read(&self, store: Store, index: usize) -> Option<u8> {
        self.store(store).get(index).copied()
    }

    /// Write a byte. Returns false if the index is past the end of the buffer.
    pub fn write(&mut self, store: Store, index: usize, value: u8) -> bool {
        match self.store_mut(store).get_mut(index) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    pub fn rom_len(&self) -> usize {
        self.code.len()
    }

    /// Little-endian word from the ROM image, open bus past the end
    pub fn rom_word(&self, index: usize) -> u16 {
        let lo = self.read(Store::Code, index).unwrap_or(addr::OPEN_BUS) as u16;
        let hi = self.read(Store::Code, index + 1).unwrap_or(addr::OPEN_BUS) as u16;
        lo | (hi << 8)
    }
}
