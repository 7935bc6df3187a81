//! Cycle-countdown queue for short forward branches.

use tracing::trace;

use crate::backend::CodeBackend;
use crate::common::GuestPc;

/// One pending forward branch awaiting its displacement.
///
/// Created when the translator emits a `Jcc rel32` whose target it has
/// promised lies within the next `cycles` guest instructions; resolved the
/// moment that many instructions have been translated.
#[derive(Clone, Copy, Debug)]
pub struct CondJumpEntry {
    /// Guest PC of the branch instruction.
    pub from: GuestPc,
    /// Guest PC the branch lands on.
    pub to: GuestPc,
    /// Host address of the 32-bit displacement field to patch.
    pub slot_addr: u32,
    /// Guest instructions left until the target's translation begins.
    pub cycles: u8,
}

/// Short-lived queue of unpatched forward branches.
#[derive(Debug, Default)]
pub struct CondQueue {
    entries: Vec<CondJumpEntry>,
}

impl CondQueue {
    /// Number of pending entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no entries are pending.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Borrows the pending entries.
    pub fn entries(&self) -> &[CondJumpEntry] {
        &self.entries
    }

    /// Records a branch whose displacement slot awaits `cycles` instructions.
    pub fn record(&mut self, from: GuestPc, to: GuestPc, cycles: u8, slot_addr: u32) {
        trace!(%from, %to, cycles, slot_addr, "conditional jump recorded");
        self.entries.push(CondJumpEntry {
            from,
            to,
            slot_addr,
            cycles,
        });
    }

    /// Counts down every pending entry by one translated guest instruction.
    pub fn decrement(&mut self) {
        for entry in &mut self.entries {
            if entry.cycles > 0 {
                entry.cycles -= 1;
            }
        }
    }

    /// Smallest nonzero countdown, or zero when nothing is pending.
    ///
    /// The translator refuses to close a region while this is nonzero: the
    /// displacement slot lives in that region and still needs its patch.
    pub fn peek_min_cycles(&self) -> u8 {
        self.entries
            .iter()
            .map(|e| e.cycles)
            .filter(|&c| c > 0)
            .min()
            .unwrap_or(0)
    }

    /// Patches and removes every entry whose countdown reached zero.
    ///
    /// The displacement written is relative to the byte after the slot, so
    /// `slot + 4 + rel32 == end_addr` — the branch lands exactly on the code
    /// about to be emitted. Returns the number of patches applied.
    pub fn resolve_ready<B: CodeBackend>(&mut self, backend: &B, end_addr: u32) -> usize {
        let before = self.entries.len();
        self.entries.retain(|entry| {
            if entry.cycles > 0 {
                return true;
            }
            let rel = end_addr.wrapping_sub(entry.slot_addr).wrapping_sub(4) as i32;
            backend.patch_rel32(entry.slot_addr, rel);
            trace!(from = %entry.from, to = %entry.to, rel, "conditional jump patched");
            false
        });
        before - self.entries.len()
    }

    /// Drops every entry whose patch slot lies in `[base, base + len)`.
    ///
    /// Invalidation of the containing region makes the slot meaningless; a
    /// fresh translation records a fresh entry.
    pub fn drop_range(&mut self, base: u32, len: usize) {
        self.entries
            .retain(|e| e.slot_addr < base || e.slot_addr >= base + len as u32);
    }

    /// Removes all entries (graceful shutdown).
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
