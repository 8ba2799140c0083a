//! Breakpoints and watchpoints
//!
//! Execute breakpoints match the CSR:PC reached after a step. Read and write
//! watchpoints match when their byte range overlaps the last data access the
//! bus recorded.

use std::collections::BTreeMap;

use crate::bus::Access;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BreakKind {
    Execute,
    Read,
    Write,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Breakpoint {
    pub id: u32,
    pub enabled: bool,
    pub kind: BreakKind,
    /// 20-bit code or data address
    pub address: u32,
    /// Watched width in bytes for Read/Write (0 counts as 1)
    pub size_hint: u8,
}

impl Breakpoint {
    fn overlaps(&self, access: Access) -> bool {
        let end = self.address.saturating_add(self.size_hint.max(1) as u32);
        self.address < access.end() && access.addr < end
    }
}

/// A breakpoint that fired during a step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakHit {
    pub id: u32,
    pub kind: BreakKind,
    /// The address that matched: CSR:PC for Execute, the access start otherwise
    pub address: u32,
}

/// Breakpoint table, ordered by id
#[derive(Debug, Clone)]
pub struct BreakpointEngine {
    breakpoints: BTreeMap<u32, Breakpoint>,
    next_id: u32,
}

impl BreakpointEngine {
    pub fn new() -> Self {
        Self {
            breakpoints: BTreeMap::new(),
            next_id: 1,
        }
    }

    /// Add an enabled breakpoint and return its id
    pub fn add(&mut self, kind: BreakKind, address: u32, size_hint: u8) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        self.breakpoints.insert(
            id,
            Breakpoint {
                id,
                enabled: true,
                kind,
                address,
                size_hint,
            },
        );
        log::debug!("breakpoint {} added: {:?} at {:05X}H", id, kind, address);
        id
    }

    pub fn remove(&mut self, id: u32) -> Option<Breakpoint> {
        self.breakpoints.remove(&id)
    }

    /// Enable or disable a breakpoint. Returns false for an unknown id.
    pub fn set_enabled(&mut self, id: u32, enabled: bool) -> bool {
        match self.breakpoints.get_mut(&id) {
            Some(bp) => {
                bp.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn enable(&mut self, id: u32) -> bool {
        self.set_enabled(id, true)
    }

    pub fn disable(&mut self, id: u32) -> bool {
        self.set_enabled(id, false)
    }

    pub fn get(&self, id: u32) -> Option<&Breakpoint> {
        self.breakpoints.get(&id)
    }

    pub fn list(&self) -> impl Iterator<Item = &Breakpoint> {
        self.breakpoints.values()
    }

    pub fn len(&self) -> usize {
        self.breakpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakpoints.is_empty()
    }

    pub fn clear(&mut self) {
        self.breakpoints.clear();
    }

    /// First enabled breakpoint matching the state after a step
    pub fn check(
        &self,
        code_addr: u32,
        last_read: Option<Access>,
        last_write: Option<Access>,
    ) -> Option<BreakHit> {
        self.breakpoints
            .values()
            .filter(|bp| bp.enabled)
            .find_map(|bp| {
                let hit = match bp.kind {
                    BreakKind::Execute => (bp.address == code_addr).then_some(code_addr),
                    BreakKind::Read => last_read.filter(|a| bp.overlaps(*a)).map(|a| a.addr),
                    BreakKind::Write => last_write.filter(|a| bp.overlaps(*a)).map(|a| a.addr),
                }?;
                Some(BreakHit {
                    id: bp.id,
                    kind: bp.kind,
                    address: hit,
                })
            })
    }
}

impl Default for BreakpointEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn access(addr: u32, size: u8) -> Option<Access> {
        Some(Access { addr, size })
    }

    #[test]
    fn test_crud() {
        let mut bps = BreakpointEngine::new();
        assert!(bps.is_empty());
        let a = bps.add(BreakKind::Execute, 0x1_2340, 0);
        let b = bps.add(BreakKind::Write, 0x8100, 2);
        assert_eq!((a, b), (1, 2));
        assert_eq!(bps.len(), 2);

        assert!(bps.disable(a));
        assert!(!bps.get(a).unwrap().enabled);
        assert!(bps.enable(a));
        assert!(!bps.enable(99));

        assert_eq!(bps.remove(b).map(|bp| bp.kind), Some(BreakKind::Write));
        assert_eq!(bps.list().count(), 1);
        bps.clear();
        assert!(bps.is_empty());
        // Ids are never reused
        assert_eq!(bps.add(BreakKind::Read, 0, 1), 3);
    }

    #[test]
    fn test_range_at_top_of_address_space() {
        let mut bps = BreakpointEngine::new();
        let id = bps.add(BreakKind::Read, u32::MAX - 1, 8);
        assert_eq!(bps.check(0, access(u32::MAX - 1, 4), None).map(|h| h.id), Some(id));
        assert_eq!(bps.check(0, access(u32::MAX - 3, 2), None), None);
    }

    #[test]
    fn test_execute_exact_match() {
        let mut bps = BreakpointEngine::new();
        let id = bps.add(BreakKind::Execute, 0x1_2340, 0);
        assert_eq!(bps.check(0x1_2342, None, None), None);
        assert_eq!(bps.check(0x1_233E, None, None), None);
        assert_eq!(bps.check(0x0_2340, None, None), None);
        assert_eq!(
            bps.check(0x1_2340, None, None),
            Some(BreakHit {
                id,
                kind: BreakKind::Execute,
                address: 0x1_2340
            })
        );

        bps.disable(id);
        assert_eq!(bps.check(0x1_2340, None, None), None);
    }

    #[test]
    fn test_watch_overlap() {
        let mut bps = BreakpointEngine::new();
        bps.add(BreakKind::Write, 0x8102, 2);

        // [8100, 8102) stops just short
        assert_eq!(bps.check(0, None, access(0x8100, 2)), None);
        // [8100, 8104) covers it
        assert!(bps.check(0, None, access(0x8100, 4)).is_some());
        // [8103, 8104) touches the second watched byte
        assert!(bps.check(0, None, access(0x8103, 1)).is_some());
        assert_eq!(bps.check(0, None, access(0x8104, 1)), None);
        // Reads do not trigger a write watch
        assert_eq!(bps.check(0, access(0x8102, 1), None), None);
    }

    #[test]
    fn test_zero_size_hint_watches_one_byte() {
        let mut bps = BreakpointEngine::new();
        bps.add(BreakKind::Read, 0xF030, 0);
        assert!(bps.check(0, access(0xF030, 1), None).is_some());
        assert_eq!(bps.check(0, access(0xF031, 1), None), None);
    }

    #[test]
    fn test_first_enabled_match_wins() {
        let mut bps = BreakpointEngine::new();
        let first = bps.add(BreakKind::Read, 0x9000, 4);
        let second = bps.add(BreakKind::Read, 0x9002, 1);
        let hit = bps.check(0, access(0x9002, 1), None).unwrap();
        assert_eq!(hit.id, first);

        bps.disable(first);
        let hit = bps.check(0, access(0x9002, 1), None).unwrap();
        assert_eq!(hit.id, second);
    }
}
