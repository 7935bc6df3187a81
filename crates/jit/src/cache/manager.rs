//! Cache manager: region lifetime, lookup, selection and raw emission.
//!
//! The manager owns every translated block. It provides:
//! 1. **Lookup:** By covered guest PC (with parity), by exact block entry PC,
//!    and by host address.
//! 2. **Selection:** The writable-region policy for the translator and the
//!    jump-target policy for the jump resolver. The two are asymmetric on
//!    purpose: a translation may extend an existing region to the right, but
//!    a jump may only land on a region's start; a mid-range jump target
//!    invalidates the covering region and re-translates from the entry point,
//!    which keeps jump targets coincident with region starts.
//! 3. **Invalidation:** A queue of regions to release, drained by a sweep
//!    that defers any region the resume address still points into.
//! 4. **Emission:** Little-endian appends at the selected region's cursor.

use tracing::{debug, trace};

use crate::abi::AbiAddrs;
use crate::backend::{CodeBackend, CodeSink};
use crate::cache::region::CacheRegion;
use crate::common::{GuestPc, JitError};
use crate::config::CacheConfig;
use crate::jump::JumpTable;
use crate::mem::HostPage;
use crate::stats::JitStats;

/// Single-byte no-op used to fill fresh region pages.
const NOP: u8 = 0x90;

/// Region lifetime, lookup, invalidation and emission.
#[derive(Debug)]
pub struct CacheManager<B: CodeBackend> {
    backend: B,
    abi: AbiAddrs,
    config: CacheConfig,
    regions: Vec<CacheRegion>,
    invalid_queue: Vec<usize>,
    selected: Option<usize>,
}

impl<B: CodeBackend> CacheManager<B> {
    /// Creates an empty cache manager.
    pub fn new(config: CacheConfig, backend: B, abi: AbiAddrs) -> Self {
        Self {
            backend,
            abi,
            config,
            regions: Vec::new(),
            invalid_queue: Vec::new(),
            selected: None,
        }
    }

    /// Number of live regions (including those queued for invalidation).
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    /// Whether no regions exist.
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Borrows a region by index.
    pub fn region(&self, index: usize) -> Option<&CacheRegion> {
        self.regions.get(index)
    }

    /// Index of the region the translator is currently writing into.
    pub const fn selected(&self) -> Option<usize> {
        self.selected
    }

    /// Number of regions queued for invalidation.
    pub fn invalid_queue_len(&self) -> usize {
        self.invalid_queue.len()
    }

    /// Selects the region the translator appends into.
    pub fn switch_to(&mut self, index: usize) -> Result<(), JitError> {
        if index >= self.regions.len() {
            return Err(JitError::InternalInvariant("switch_to out of range"));
        }
        self.selected = Some(index);
        Ok(())
    }

    /// Selects the region covering `pc` and returns its end PC, which the
    /// dispatcher assigns to the guest PC so translation resumes at the end
    /// of the pre-existing translation.
    pub fn switch_to_guest_pc(&mut self, pc: GuestPc) -> Option<GuestPc> {
        let index = self.find_by_guest_pc(pc)?;
        self.selected = Some(index);
        Some(self.regions[index].end())
    }

    /// The non-invalidated region covering `pc` with matching parity.
    ///
    /// Newest first: a fresh block allocated over a closed covering region
    /// (writable policy, step 1) shadows the older one, which stays merely
    /// executable until something invalidates it.
    pub fn find_by_guest_pc(&self, pc: GuestPc) -> Option<usize> {
        self.regions
            .iter()
            .enumerate()
            .rev()
            .find(|(i, r)| r.contains_pc(pc) && !self.is_marked_invalid(*i))
            .map(|(i, _)| i)
    }

    /// The non-invalidated region whose translation starts exactly at `pc`.
    ///
    /// Only true block entries qualify as jump targets; parity needs no
    /// check because it is defined by the start PC itself.
    pub fn find_by_guest_start(&self, pc: GuestPc) -> Option<usize> {
        self.regions
            .iter()
            .enumerate()
            .rev()
            .find(|(i, r)| r.start() == pc && !self.is_marked_invalid(*i))
            .map(|(i, _)| i)
    }

    /// The region whose emitted span `[base, base + cursor]` covers `addr`.
    pub fn find_by_host_addr(&self, addr: u32) -> Option<usize> {
        self.regions.iter().position(|r| r.covers_host_addr(addr))
    }

    /// Allocates a fresh region starting at `pc` and returns its index.
    ///
    /// The page is filled with no-ops and the tail stub is written into its
    /// final bytes, initially naming `pc` itself as the next PC to translate
    /// (nothing has been emitted yet).
    pub fn alloc(&mut self, pc: GuestPc, stats: &mut JitStats) -> Result<usize, JitError> {
        let mut page = HostPage::executable(self.config.region_bytes)?;
        let base = page.base_u32()?;
        page.fill(NOP);
        self.backend
            .write_tail_stub(&mut page, self.config.tail_offset(), &self.abi, pc.val());

        self.regions.push(CacheRegion::new(page, base, pc));
        stats.regions_allocated += 1;
        let index = self.regions.len() - 1;
        debug!(index, start = %pc, base, "cache region allocated");
        Ok(index)
    }

    /// Region selection for the translator (writable lookup).
    ///
    /// Reuses the region covering `pc`, extends the region ending at the
    /// previous instruction slot, or allocates fresh; a closed region is
    /// never returned.
    pub fn get_writable_region_for(
        &mut self,
        pc: GuestPc,
        stats: &mut JitStats,
    ) -> Result<usize, JitError> {
        if let Some(index) = self.find_by_guest_pc(pc) {
            if !self.regions[index].stop_write() {
                return Ok(index);
            }
            return self.alloc(pc, stats);
        }
        if let Some(index) = self.find_by_guest_pc(pc.prev()) {
            if !self.regions[index].stop_write() {
                stats.regions_extended += 1;
                return Ok(index);
            }
            return self.alloc(pc, stats);
        }
        self.alloc(pc, stats)
    }

    /// Region selection for the jump resolver.
    ///
    /// A jump may only enter a region at its start. A target covered
    /// mid-range invalidates the covering region and re-translates from the
    /// exact entry point into a fresh block.
    pub fn jump_target_region(
        &mut self,
        pc: GuestPc,
        stats: &mut JitStats,
    ) -> Result<usize, JitError> {
        if let Some(index) = self.find_by_guest_start(pc) {
            return Ok(index);
        }
        if let Some(index) = self.find_by_guest_pc(pc) {
            self.mark_invalid(index);
            return self.alloc(pc, stats);
        }
        self.alloc(pc, stats)
    }

    /// Queues a region for release on the next invalidation sweep.
    ///
    /// A region appears in the queue at most once; it stays findable by
    /// host address (and executable) until actually freed.
    pub fn mark_invalid(&mut self, index: usize) {
        if index < self.regions.len() && !self.invalid_queue.contains(&index) {
            trace!(index, "cache region marked invalid");
            self.invalid_queue.push(index);
        }
    }

    /// Queues the region covering `pc` (by range and parity), if any.
    pub fn mark_invalid_by_guest_pc(&mut self, pc: GuestPc) {
        if let Some(index) = self.find_by_guest_pc(pc) {
            self.mark_invalid(index);
        }
    }

    /// Whether `index` sits in the invalidation queue.
    pub fn is_marked_invalid(&self, index: usize) -> bool {
        self.invalid_queue.contains(&index)
    }

    /// Releases queued regions, honoring the refill-on-free rule.
    ///
    /// A region the resume address still points into is deferred to a later
    /// sweep. For every freed region, jump-table entries resolving into it
    /// are stale-marked and requeued for refill, and conditional entries
    /// whose patch slot lies in it are dropped, before the page is unmapped.
    ///
    /// Returns `(freed, deferred)` region counts.
    pub fn flush_invalidations(
        &mut self,
        resume: u32,
        jumps: &mut JumpTable,
        stats: &mut JitStats,
    ) -> (usize, usize) {
        if self.invalid_queue.is_empty() {
            return (0, 0);
        }

        let queue = std::mem::take(&mut self.invalid_queue);
        let mut deferred = Vec::new();
        let mut freeable = Vec::new();
        for index in queue {
            if self.regions[index].covers_host_addr(resume) {
                deferred.push(index);
            } else {
                freeable.push(index);
            }
        }

        // Free in descending index order so earlier removals do not shift
        // the indices still to be processed.
        freeable.sort_unstable();
        let freed = freeable.len();
        for &index in freeable.iter().rev() {
            let base = self.regions[index].host_base();
            let len = self.regions[index].page().len();
            jumps.retire_region(base, len);

            let region = self.regions.remove(index);
            debug!(
                index,
                start = %region.start(),
                end = %region.end(),
                "cache region released"
            );
            drop(region);

            match self.selected {
                Some(s) if s == index => self.selected = None,
                Some(s) if s > index => self.selected = Some(s - 1),
                _ => {}
            }
            for d in &mut deferred {
                if *d > index {
                    *d -= 1;
                }
            }
        }

        stats.regions_invalidated += freed as u64;
        stats.invalidations_deferred += deferred.len() as u64;
        self.invalid_queue = deferred;
        (freed, self.invalid_queue.len())
    }

    /// Releases every region and clears the queue (graceful shutdown).
    pub fn clear(&mut self) {
        self.regions.clear();
        self.invalid_queue.clear();
        self.selected = None;
    }

    /// The currently selected region.
    pub fn current(&self) -> Result<&CacheRegion, JitError> {
        self.selected
            .and_then(|i| self.regions.get(i))
            .ok_or(JitError::NoSelectedRegion)
    }

    /// The currently selected region, mutably.
    pub fn current_mut(&mut self) -> Result<&mut CacheRegion, JitError> {
        self.selected
            .and_then(|i| self.regions.get_mut(i))
            .ok_or(JitError::NoSelectedRegion)
    }

    /// Records the last guest PC translated into the selected region and
    /// keeps the tail stub's resume PC one step past it.
    pub fn set_current_end(&mut self, pc: GuestPc) -> Result<(), JitError> {
        let tail_offset = self.config.tail_offset();
        let region = self
            .selected
            .and_then(|i| self.regions.get_mut(i))
            .ok_or(JitError::NoSelectedRegion)?;
        region.set_end(pc);
        self.backend
            .patch_tail_resume_pc(region.page_mut(), tail_offset, pc.next().val());
        Ok(())
    }

    /// End PC of the selected region.
    pub fn current_end_pc(&self) -> Result<GuestPc, JitError> {
        Ok(self.current()?.end())
    }

    /// Host address of the next byte the selected region would emit.
    pub fn current_end_addr(&self) -> Result<u32, JitError> {
        Ok(self.current()?.end_addr())
    }

    /// Whether the selected region's cursor passed the emission ceiling.
    pub fn current_at_capacity(&self) -> Result<bool, JitError> {
        Ok(self.current()?.cursor() >= self.config.emit_ceiling())
    }
}

impl<B: CodeBackend> CodeSink for CacheManager<B> {
    fn emit_u8(&mut self, value: u8) -> Result<(), JitError> {
        self.current_mut()?.write_u8(value);
        Ok(())
    }

    fn emit_u16(&mut self, value: u16) -> Result<(), JitError> {
        self.current_mut()?.write_u16(value);
        Ok(())
    }

    fn emit_u32(&mut self, value: u32) -> Result<(), JitError> {
        self.current_mut()?.write_u32(value);
        Ok(())
    }

    fn cursor_addr(&self) -> Result<u32, JitError> {
        self.current_end_addr()
    }
}
