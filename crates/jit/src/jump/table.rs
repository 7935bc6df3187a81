//! Unconditional-jump table and refill sweep.

use tracing::{debug, trace};

use crate::abi::AbiAddrs;
use crate::backend::CodeBackend;
use crate::cache::CacheManager;
use crate::common::{GuestPc, JitError};
use crate::config::JumpConfig;
use crate::jump::conditional::CondQueue;
use crate::jump::pool::TargetPool;
use crate::stats::JitStats;

/// One guest jump target and the state of its host pointer.
#[derive(Clone, Copy, Debug)]
pub struct JumpEntry {
    /// Guest PC this entry routes to.
    pub guest_target: GuestPc,
    /// Whether the target word currently holds a real block entry address
    /// (as opposed to the entry's re-resolve thunk).
    pub resolved: bool,
}

/// Deferred-patching table for guest control transfers.
///
/// Emitted unconditional jumps are always indirected through an entry's
/// target word, so re-translation of a target updates a single word, visible
/// to every jump site without rewriting any of them. Entries are unique by
/// guest target PC and their indices are stable for the table's lifetime.
///
/// The refill list names entries whose word does not point at a live block:
/// never-resolved entries and entries stale-marked when their region was
/// released. The resolve sweep drains it before execution resumes.
#[derive(Debug)]
pub struct JumpTable {
    abi: AbiAddrs,
    guest_limit: u16,
    entries: Vec<JumpEntry>,
    pool: TargetPool,
    refill: Vec<usize>,
    cond: CondQueue,
}

impl JumpTable {
    /// Creates an empty table sized per `config`.
    ///
    /// `guest_limit` is the first guest address past RAM; targets at or past
    /// it are unresolvable.
    pub fn new(config: &JumpConfig, abi: AbiAddrs, guest_limit: u16) -> Result<Self, JitError> {
        Ok(Self {
            abi,
            guest_limit,
            entries: Vec::new(),
            pool: TargetPool::new(config.capacity)?,
            refill: Vec::new(),
            cond: CondQueue::default(),
        })
    }

    /// Number of recorded entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Borrows an entry by index.
    pub fn entry(&self, index: usize) -> Option<&JumpEntry> {
        self.entries.get(index)
    }

    /// Index of the entry for `pc`, if one was recorded.
    pub fn find(&self, pc: GuestPc) -> Option<usize> {
        self.entries.iter().position(|e| e.guest_target == pc)
    }

    /// Returns the stable index for jump target `pc`, recording a new entry
    /// (word pointed at its thunk, queued for refill) on first sight.
    pub fn get_or_create<B: CodeBackend>(
        &mut self,
        pc: GuestPc,
        backend: &B,
        stats: &mut JitStats,
    ) -> Result<usize, JitError> {
        if let Some(index) = self.find(pc) {
            return Ok(index);
        }
        let index = self.entries.len();
        if index >= self.pool.capacity() {
            return Err(JitError::JumpTableFull {
                capacity: self.pool.capacity(),
            });
        }
        backend.write_resolve_thunk(
            self.pool.thunks_mut(),
            TargetPool::thunk_offset(index),
            index as u32,
            &self.abi,
        );
        let thunk = self.pool.thunk_addr(index)?;
        self.pool.write_word(index, thunk);
        self.entries.push(JumpEntry {
            guest_target: pc,
            resolved: false,
        });
        self.refill.push(index);
        stats.jumps_recorded += 1;
        trace!(index, target = %pc, "jump entry recorded");
        Ok(index)
    }

    /// Host address of entry `index`'s target word, for emitting the
    /// memory-indirect jump that reads it.
    pub fn word_addr(&self, index: usize) -> Result<u32, JitError> {
        if index >= self.entries.len() {
            return Err(JitError::InternalInvariant("jump index out of range"));
        }
        self.pool.word_addr(index)
    }

    /// Resolved host target of entry `index`, if it points at a live block.
    pub fn host_target(&self, index: usize) -> Option<u32> {
        self.entries
            .get(index)
            .filter(|e| e.resolved)
            .map(|_| self.pool.read_word(index))
    }

    /// Number of entries awaiting refill.
    pub fn refill_len(&self) -> usize {
        self.refill.len()
    }

    /// Refill sweep: places every queued entry's target region and stores its
    /// base into the target word.
    ///
    /// Placement goes through the cache manager's jump-target policy, so a
    /// missing block is allocated (and a mid-range hit re-blocked) here.
    /// Returns the first target found to lie outside guest memory, which the
    /// dispatcher reports as an unknown-opcode-class halt.
    pub fn resolve_pending<B: CodeBackend>(
        &mut self,
        cache: &mut CacheManager<B>,
        stats: &mut JitStats,
    ) -> Result<Option<GuestPc>, JitError> {
        while let Some(index) = self.refill.first().copied() {
            let target = self.entries[index].guest_target;
            if target.val() >= self.guest_limit {
                debug!(index, %target, "jump target outside guest memory");
                return Ok(Some(target));
            }
            let region = cache.jump_target_region(target, stats)?;
            let base = cache
                .region(region)
                .ok_or(JitError::InternalInvariant("jump target region vanished"))?
                .host_base();
            self.pool.write_word(index, base);
            self.entries[index].resolved = true;
            let _ = self.refill.remove(0);
            stats.jumps_refilled += 1;
            trace!(index, %target, base, "jump entry refilled");
        }
        Ok(None)
    }

    /// Stale-marks every entry resolving into `[base, base + len)` and drops
    /// conditional entries patching into that range.
    ///
    /// Called by the invalidation sweep for each region it is about to free;
    /// the entry's word is re-pointed at its thunk so any jump executed
    /// before the refill lands back in the dispatcher.
    pub fn retire_region(&mut self, base: u32, len: usize) {
        let end = base + len as u32;
        for index in 0..self.entries.len() {
            if !self.entries[index].resolved {
                continue;
            }
            let word = self.pool.read_word(index);
            if word >= base && word < end {
                self.entries[index].resolved = false;
                if let Ok(thunk) = self.pool.thunk_addr(index) {
                    self.pool.write_word(index, thunk);
                }
                if !self.refill.contains(&index) {
                    self.refill.push(index);
                }
                trace!(index, target = %self.entries[index].guest_target, "jump entry stale-marked");
            }
        }
        self.cond.drop_range(base, len);
    }

    /// Records a pending forward branch (see [`CondQueue::record`]).
    pub fn record_conditional(
        &mut self,
        from: GuestPc,
        to: GuestPc,
        cycles: u8,
        slot_addr: u32,
        stats: &mut JitStats,
    ) {
        stats.cond_jumps_recorded += 1;
        self.cond.record(from, to, cycles, slot_addr);
    }

    /// Counts down pending forward branches by one translated instruction.
    pub fn on_instruction_translated(&mut self) {
        self.cond.decrement();
    }

    /// Smallest nonzero forward-branch countdown (see
    /// [`CondQueue::peek_min_cycles`]).
    pub fn peek_min_cycles(&self) -> u8 {
        self.cond.peek_min_cycles()
    }

    /// Patches forward branches whose countdown reached zero against the
    /// current emission cursor.
    pub fn resolve_conditionals<B: CodeBackend>(
        &mut self,
        backend: &B,
        end_addr: u32,
        stats: &mut JitStats,
    ) -> usize {
        let patched = self.cond.resolve_ready(backend, end_addr);
        stats.cond_jumps_patched += patched as u64;
        patched
    }

    /// Number of pending forward branches.
    pub fn cond_len(&self) -> usize {
        self.cond.len()
    }

    /// Borrows the pending forward branches.
    pub fn cond_entries(&self) -> &[crate::jump::conditional::CondJumpEntry] {
        self.cond.entries()
    }

    /// Clears every table (graceful shutdown).
    pub fn clear(&mut self) {
        self.entries.clear();
        self.refill.clear();
        self.cond.clear();
    }
}
