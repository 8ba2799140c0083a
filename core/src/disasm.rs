//! nX-U8 disassembler seam
//!
//! Instruction decoding lives outside this crate. A decoder plugs in through
//! [`Disassembler`]; this module only handles the one piece of context the
//! decoder cannot see on its own: a DSR prefix (`DSR<-` forms) applies to the
//! instruction after it, so the two are rendered as one line.

/// One decoded instruction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    /// Mnemonic with operands (e.g. "L R0, 1:[ER2]")
    pub mnemonic: String,
    /// Length in bytes
    pub len: usize,
    /// This instruction is a DSR prefix for the next one
    pub dsr_prefix: bool,
    /// This instruction consumed the prefix it was given
    pub uses_prefix: bool,
}

/// Instruction decoder for nX-U8 code
pub trait Disassembler {
    /// Decode the instruction at the start of `bytes`. `prefix` is the
    /// rendering of a DSR prefix immediately before it, if there was one.
    fn decode(&self, bytes: &[u8], prefix: Option<&str>) -> Decoded;
}

/// Words fetched for one rendering: prefix + longest instruction
pub const RENDER_WORDS: usize = 3;

/// Render the instruction starting at `bytes`, folding a leading DSR prefix
/// into the instruction it applies to. A prefix the next instruction does not
/// use renders as a data word.
pub fn render<D: Disassembler + ?Sized>(dis: &D, bytes: &[u8]) -> (String, usize) {
    let first = dis.decode(bytes, None);
    if !first.dsr_prefix {
        return (first.mnemonic, first.len);
    }

    let rest = bytes.get(first.len..).unwrap_or_default();
    let next = dis.decode(rest, Some(&first.mnemonic));
    if next.uses_prefix {
        (next.mnemonic, first.len + next.len)
    } else {
        let word = u16::from_le_bytes([
            bytes.first().copied().unwrap_or(0),
            bytes.get(1).copied().unwrap_or(0),
        ]);
        (format!("DW {:04X}", word), 2)
    }
}
