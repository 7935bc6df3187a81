//! # Invariant property tests
//!
//! Randomized checks of the documented cache and jump-table invariants.

use proptest::prelude::*;

use c8jit_core::backend::X86Backend;
use c8jit_core::common::GuestPc;

use crate::common::Core;

proptest! {
    /// For every guest PC, at most one non-invalidated region covers it with
    /// matching parity, under any sequence of writable-region requests with
    /// emitter-contract end updates.
    #[test]
    fn writable_policy_preserves_disjointness(
        pcs in prop::collection::vec(0x200u16..0x280, 1..48)
    ) {
        let mut core = Core::new();
        for &raw in &pcs {
            let pc = GuestPc::new(raw);
            let index = core.cache.get_writable_region_for(pc, &mut core.stats).unwrap();
            core.cache.switch_to(index).unwrap();
            let end = core.cache.current().unwrap().end();
            core.cache.set_current_end(if pc > end { pc } else { end }).unwrap();
        }

        for probe in 0x1F0u16..0x290 {
            let probe = GuestPc::new(probe);
            let covering = (0..core.cache.len())
                .filter(|&i| {
                    !core.cache.is_marked_invalid(i)
                        && core.cache.region(i).unwrap().contains_pc(probe)
                })
                .count();
            prop_assert!(covering <= 1, "{} regions cover {probe}", covering);
        }
    }

    /// Recording the same target any number of times yields one entry, and
    /// after a resolve sweep with no invalidations every entry points at the
    /// base of the live region starting at its target.
    #[test]
    fn resolve_places_every_entry(
        targets in prop::collection::vec(0x200u16..0xF00, 1..24)
    ) {
        let mut core = Core::new();
        let mut indices = Vec::new();
        for &raw in &targets {
            let index = core.jumps
                .get_or_create(GuestPc::new(raw), &X86Backend, &mut core.stats)
                .unwrap();
            indices.push((raw, index));
        }

        let unique: std::collections::BTreeSet<u16> = targets.iter().copied().collect();
        prop_assert_eq!(core.jumps.len(), unique.len());

        prop_assert_eq!(
            core.jumps.resolve_pending(&mut core.cache, &mut core.stats).unwrap(),
            None
        );
        prop_assert_eq!(core.jumps.refill_len(), 0);

        for (raw, index) in indices {
            let pc = GuestPc::new(raw);
            let region = core.cache.find_by_guest_start(pc).unwrap();
            let base = core.cache.region(region).unwrap().host_base();
            prop_assert_eq!(core.jumps.host_target(index), Some(base));
        }
    }

    /// After invalidating any resolved region and flushing, no entry still
    /// points into the freed range; the stale entries sit on the refill list
    /// and a further sweep re-places all of them.
    #[test]
    fn no_entry_survives_its_region(
        targets in prop::collection::vec(0x200u16..0x400, 2..12),
        victim in 0usize..12
    ) {
        let mut core = Core::new();
        for &raw in &targets {
            let _ = core.jumps
                .get_or_create(GuestPc::new(raw), &X86Backend, &mut core.stats)
                .unwrap();
        }
        prop_assert_eq!(
            core.jumps.resolve_pending(&mut core.cache, &mut core.stats).unwrap(),
            None
        );

        let victim = victim % core.cache.len();
        let base = core.cache.region(victim).unwrap().host_base();
        let len = core.cache.region(victim).unwrap().page().len() as u32;
        core.cache.mark_invalid(victim);
        let (freed, _) = core.cache.flush_invalidations(0, &mut core.jumps, &mut core.stats);
        prop_assert_eq!(freed, 1);

        for index in 0..core.jumps.len() {
            if let Some(target) = core.jumps.host_target(index) {
                prop_assert!(target < base || target >= base + len);
            }
        }

        prop_assert_eq!(
            core.jumps.resolve_pending(&mut core.cache, &mut core.stats).unwrap(),
            None
        );
        for index in 0..core.jumps.len() {
            prop_assert!(core.jumps.host_target(index).is_some());
        }
    }
}
