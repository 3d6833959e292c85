//! Typed bitsets for the ready structure and core-affinity math.
//!
//! The priority bitmap keeps one bit per priority plus an active word on
//! top (one bit per 32-priority group), so "lowest ready priority" stays a
//! pair of trailing-zero scans even above 32 priorities.

use crate::config::{MAX_CORES, MAX_PRIORITIES};

const WORDS: usize = MAX_PRIORITIES / 32;

/// Two-level priority bitmap. Bit `p` set means the ready list at priority
/// `p` is non-empty. Priority 0 is the most urgent, so lookups scan from
/// the lowest set bit upward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriorityBitmap {
    maps: [u32; WORDS],
    active: u32,
}

impl PriorityBitmap {
    pub const fn new() -> Self {
        Self {
            maps: [0; WORDS],
            active: 0,
        }
    }

    pub fn set(&mut self, priority: usize) {
        debug_assert!(priority < MAX_PRIORITIES);
        let index = priority / 32;
        self.maps[index] |= 1 << (priority % 32);
        self.active |= 1 << index;
    }

    pub fn clear(&mut self, priority: usize) {
        debug_assert!(priority < MAX_PRIORITIES);
        let index = priority / 32;
        self.maps[index] &= !(1 << (priority % 32));
        if self.maps[index] == 0 {
            self.active &= !(1 << index);
        }
    }

    pub fn is_set(&self, priority: usize) -> bool {
        debug_assert!(priority < MAX_PRIORITIES);
        self.maps[priority / 32] & (1 << (priority % 32)) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.active == 0
    }

    /// Lowest set bit, i.e. the most urgent non-empty priority.
    pub fn lowest_set(&self) -> Option<usize> {
        self.lowest_set_from(0)
    }

    /// Lowest set bit at or above `priority`. `None` when nothing at or
    /// below that urgency is ready.
    pub fn lowest_set_from(&self, priority: usize) -> Option<usize> {
        if priority >= MAX_PRIORITIES {
            return None;
        }
        let index = priority / 32;
        let masked = self.maps[index] & !((1u32 << (priority % 32)) - 1);
        if masked != 0 {
            return Some(index * 32 + masked.trailing_zeros() as usize);
        }
        // First level exhausted; consult the active map for later groups.
        let active = self.active & !((2u32 << index) - 1);
        if active == 0 {
            return None;
        }
        let next_index = active.trailing_zeros() as usize;
        let map = self.maps[next_index];
        debug_assert!(map != 0);
        Some(next_index * 32 + map.trailing_zeros() as usize)
    }
}

impl Default for PriorityBitmap {
    fn default() -> Self {
        Self::new()
    }
}

/// Bitmask over cores. Bit `c` set means core `c` is included.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreMask(u32);

impl CoreMask {
    pub const EMPTY: CoreMask = CoreMask(0);

    pub const fn from_bits(bits: u32) -> Self {
        CoreMask(bits)
    }

    /// Mask covering cores `0..count`.
    pub const fn all(count: usize) -> Self {
        CoreMask(((1u64 << count) - 1) as u32)
    }

    pub const fn single(core: usize) -> Self {
        CoreMask(1 << core)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, core: usize) -> bool {
        self.0 & (1 << core) != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn insert(&mut self, core: usize) {
        self.0 |= 1 << core;
    }

    pub fn remove(&mut self, core: usize) {
        self.0 &= !(1 << core);
    }

    pub const fn intersect(self, other: CoreMask) -> CoreMask {
        CoreMask(self.0 & other.0)
    }

    pub const fn union(self, other: CoreMask) -> CoreMask {
        CoreMask(self.0 | other.0)
    }

    /// Members of `self` not present in `other`.
    pub const fn difference(self, other: CoreMask) -> CoreMask {
        CoreMask(self.0 & !other.0)
    }

    /// Lowest-indexed member, if any.
    pub fn lowest_set(self) -> Option<usize> {
        if self.0 == 0 {
            None
        } else {
            Some(self.0.trailing_zeros() as usize)
        }
    }

    /// True when the mask holds exactly one core.
    pub const fn is_single(self) -> bool {
        self.0 != 0 && self.0 & (self.0 - 1) == 0
    }
}

impl core::ops::BitAnd for CoreMask {
    type Output = CoreMask;
    fn bitand(self, rhs: CoreMask) -> CoreMask {
        self.intersect(rhs)
    }
}

impl core::ops::BitOr for CoreMask {
    type Output = CoreMask;
    fn bitor(self, rhs: CoreMask) -> CoreMask {
        self.union(rhs)
    }
}
