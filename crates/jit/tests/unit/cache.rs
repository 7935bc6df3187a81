//! # Cache manager tests
//!
//! Lookup, the writable/jump-target selection policies, the invalidation
//! queue with resume deferral, and the tail-stub invariant.

use pretty_assertions::assert_eq;

use c8jit_core::Config;
use c8jit_core::backend::CodeSink;

use crate::common::{Core, pc};

/// Round-trip law: a fresh allocation is found again by its guest PC.
#[test]
fn alloc_then_find_by_guest_pc() {
    let mut core = Core::new();
    let index = core.cache.alloc(pc(0x200), &mut core.stats).unwrap();
    assert_eq!(core.cache.find_by_guest_pc(pc(0x200)), Some(index));
    assert_eq!(core.cache.find_by_guest_start(pc(0x200)), Some(index));
}

/// A PC of the other parity never matches, even inside the covered range.
#[test]
fn alignment_separates_overlapping_ranges() {
    let mut core = Core::new();
    let even = core.cache.alloc(pc(0x200), &mut core.stats).unwrap();
    core.cache.switch_to(even).unwrap();
    core.cache.set_current_end(pc(0x210)).unwrap();

    assert_eq!(core.cache.find_by_guest_pc(pc(0x208)), Some(even));
    assert_eq!(core.cache.find_by_guest_pc(pc(0x209)), None);

    let odd = core.cache.alloc(pc(0x209), &mut core.stats).unwrap();
    assert_eq!(core.cache.find_by_guest_pc(pc(0x209)), Some(odd));
    assert_eq!(core.cache.find_by_guest_pc(pc(0x208)), Some(even));
}

/// Scenario: allocate at 0x200, emit a few bytes, request writable for the
/// next slot — the same region is returned for extension.
#[test]
fn writable_extends_from_previous_slot() {
    let mut core = Core::new();
    let index = core.cache.get_writable_region_for(pc(0x200), &mut core.stats).unwrap();
    core.cache.switch_to(index).unwrap();
    for byte in 0..10u8 {
        core.cache.emit_u8(byte).unwrap();
    }
    core.cache.set_current_end(pc(0x200)).unwrap();

    let again = core.cache.get_writable_region_for(pc(0x202), &mut core.stats).unwrap();
    assert_eq!(again, index);
    assert_eq!(core.cache.region(index).unwrap().cursor(), 10);
}

/// Scenario: a region covering 0x200..0x210 satisfies a writable request for
/// a mid-range PC as long as it is open.
#[test]
fn writable_mid_range_hit_reuses_region() {
    let mut core = Core::new();
    let index = core.cache.alloc(pc(0x200), &mut core.stats).unwrap();
    core.cache.switch_to(index).unwrap();
    core.cache.set_current_end(pc(0x210)).unwrap();

    let hit = core.cache.get_writable_region_for(pc(0x208), &mut core.stats).unwrap();
    assert_eq!(hit, index);
}

/// Scenario: the same mid-range request against a closed region allocates a
/// fresh block starting at the requested PC; the original stays live.
#[test]
fn writable_mid_range_hit_on_closed_region_allocates() {
    let mut core = Core::new();
    let index = core.cache.alloc(pc(0x200), &mut core.stats).unwrap();
    core.cache.switch_to(index).unwrap();
    core.cache.set_current_end(pc(0x210)).unwrap();
    core.cache.current_mut().unwrap().set_stop_write();

    let fresh = core.cache.get_writable_region_for(pc(0x208), &mut core.stats).unwrap();
    assert_ne!(fresh, index);
    assert_eq!(core.cache.region(fresh).unwrap().start(), pc(0x208));
    assert_eq!(core.cache.len(), 2);

    // The original block remains live and executable, but the replacement
    // shadows it for covered PCs from now on.
    assert_eq!(core.cache.find_by_guest_start(pc(0x200)), Some(index));
    assert_eq!(core.cache.find_by_guest_pc(pc(0x208)), Some(fresh));
    let old_base = core.cache.region(index).unwrap().host_base();
    assert_eq!(core.cache.find_by_host_addr(old_base), Some(index));
}

/// A writable request with no covering or adjacent region allocates fresh.
#[test]
fn writable_cold_pc_allocates() {
    let mut core = Core::new();
    let a = core.cache.get_writable_region_for(pc(0x200), &mut core.stats).unwrap();
    let b = core.cache.get_writable_region_for(pc(0x300), &mut core.stats).unwrap();
    assert_ne!(a, b);
    assert_eq!(core.cache.region(b).unwrap().start(), pc(0x300));
}

/// Jump-target selection reuses a block entry, re-blocks a mid-range hit.
#[test]
fn jump_target_mid_range_invalidates_and_reallocates() {
    let mut core = Core::new();
    let index = core.cache.alloc(pc(0x200), &mut core.stats).unwrap();
    core.cache.switch_to(index).unwrap();
    core.cache.set_current_end(pc(0x210)).unwrap();

    // Entry hit: same region.
    assert_eq!(
        core.cache.jump_target_region(pc(0x200), &mut core.stats).unwrap(),
        index
    );

    // Mid-range hit: covering region queued invalid, fresh block at 0x208.
    let fresh = core.cache.jump_target_region(pc(0x208), &mut core.stats).unwrap();
    assert_ne!(fresh, index);
    assert!(core.cache.is_marked_invalid(index));
    assert_eq!(core.cache.region(fresh).unwrap().start(), pc(0x208));
}

/// Lookup by host address covers exactly the emitted span.
#[test]
fn find_by_host_addr_covers_emitted_span() {
    let mut core = Core::new();
    let index = core.cache.alloc(pc(0x200), &mut core.stats).unwrap();
    core.cache.switch_to(index).unwrap();
    core.cache.emit_u32(0x90909090).unwrap();

    let base = core.cache.region(index).unwrap().host_base();
    assert_eq!(core.cache.find_by_host_addr(base), Some(index));
    assert_eq!(core.cache.find_by_host_addr(base + 4), Some(index));
    assert_eq!(core.cache.find_by_host_addr(base + 5), None);
}

/// Round-trip law: one invalidation plus one flush (resume outside) removes
/// exactly one region and drains the queue entry.
#[test]
fn invalidate_flush_round_trip() {
    let mut core = Core::new();
    let a = core.cache.alloc(pc(0x200), &mut core.stats).unwrap();
    let _ = core.cache.alloc(pc(0x300), &mut core.stats).unwrap();
    assert_eq!(core.cache.len(), 2);

    core.cache.mark_invalid(a);
    assert_eq!(core.cache.invalid_queue_len(), 1);

    let (freed, deferred) = core.cache.flush_invalidations(0, &mut core.jumps, &mut core.stats);
    assert_eq!((freed, deferred), (1, 0));
    assert_eq!(core.cache.len(), 1);
    assert_eq!(core.cache.invalid_queue_len(), 0);
    assert_eq!(core.cache.find_by_guest_start(pc(0x200)), None);
    assert_eq!(core.cache.find_by_guest_start(pc(0x300)), Some(0));
}

/// A region appears in the invalidation queue at most once.
#[test]
fn mark_invalid_is_idempotent() {
    let mut core = Core::new();
    let index = core.cache.alloc(pc(0x200), &mut core.stats).unwrap();
    core.cache.mark_invalid(index);
    core.cache.mark_invalid(index);
    core.cache.mark_invalid_by_guest_pc(pc(0x200));
    assert_eq!(core.cache.invalid_queue_len(), 1);
}

/// Scenario: a flagged region whose span holds the resume address survives
/// the sweep and is collected once resume has moved on.
#[test]
fn flush_defers_region_holding_resume() {
    let mut core = Core::new();
    let index = core.cache.alloc(pc(0x400), &mut core.stats).unwrap();
    core.cache.switch_to(index).unwrap();
    for _ in 0..0x20 {
        core.cache.emit_u8(0x90).unwrap();
    }
    core.cache.set_current_end(pc(0x420)).unwrap();
    let base = core.cache.region(index).unwrap().host_base();

    core.cache.mark_invalid(index);
    let (freed, deferred) =
        core.cache.flush_invalidations(base + 0x0A, &mut core.jumps, &mut core.stats);
    assert_eq!((freed, deferred), (0, 1));
    assert_eq!(core.cache.len(), 1);

    let (freed, deferred) = core.cache.flush_invalidations(0, &mut core.jumps, &mut core.stats);
    assert_eq!((freed, deferred), (1, 0));
    assert!(core.cache.is_empty());
}

/// Freeing a region below the selected one shifts the selection cursor down;
/// freeing the selected region clears it.
#[test]
fn flush_adjusts_selected_cursor() {
    let mut core = Core::new();
    let a = core.cache.alloc(pc(0x200), &mut core.stats).unwrap();
    let b = core.cache.alloc(pc(0x300), &mut core.stats).unwrap();
    core.cache.switch_to(b).unwrap();

    core.cache.mark_invalid(a);
    let _ = core.cache.flush_invalidations(0, &mut core.jumps, &mut core.stats);
    assert_eq!(core.cache.selected(), Some(0));
    assert_eq!(core.cache.current().unwrap().start(), pc(0x300));

    core.cache.mark_invalid(0);
    let _ = core.cache.flush_invalidations(0, &mut core.jumps, &mut core.stats);
    assert_eq!(core.cache.selected(), None);
    assert!(core.cache.current().is_err());
}

/// Invariant: a fresh region's final bytes are the canonical tail stub, and
/// advancing the end PC re-patches only the resume-PC immediate.
#[test]
fn tail_stub_matches_canonical_bytes() {
    let config = Config::default();
    let mut core = Core::with_config(&config);
    let abi = core.guest.abi_addrs();

    let index = core.cache.alloc(pc(0x200), &mut core.stats).unwrap();
    let tail = config.cache.tail_offset();

    let stub = |resume_pc: u32| {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&[0xC6, 0x05]);
        bytes.extend_from_slice(&abi.status.to_le_bytes());
        bytes.push(0x01); // OUT_OF_CODE
        bytes.extend_from_slice(&[0xC7, 0x05]);
        bytes.extend_from_slice(&abi.param1.to_le_bytes());
        bytes.extend_from_slice(&resume_pc.to_le_bytes());
        bytes.extend_from_slice(&[0xFF, 0x25]);
        bytes.extend_from_slice(&abi.return_label.to_le_bytes());
        bytes
    };

    // At allocation the stub resumes at the region's own start.
    assert_eq!(
        core.cache.region(index).unwrap().page().bytes(tail, 23),
        &stub(0x200)[..]
    );

    // After translation reaches 0x210 it resumes one slot past the end.
    core.cache.switch_to(index).unwrap();
    core.cache.set_current_end(pc(0x210)).unwrap();
    assert_eq!(
        core.cache.region(index).unwrap().page().bytes(tail, 23),
        &stub(0x212)[..]
    );
}

/// Fresh pages are a no-op slide from base to stub.
#[test]
fn fresh_region_is_nop_filled() {
    let config = Config::default();
    let mut core = Core::with_config(&config);
    let index = core.cache.alloc(pc(0x200), &mut core.stats).unwrap();
    let region = core.cache.region(index).unwrap();
    let body = region.page().bytes(0, config.cache.tail_offset());
    assert!(body.iter().all(|&b| b == 0x90));
}

/// `switch_to_guest_pc` selects the covering region and reports its end PC.
#[test]
fn switch_to_guest_pc_reports_end() {
    let mut core = Core::new();
    let index = core.cache.alloc(pc(0x200), &mut core.stats).unwrap();
    core.cache.switch_to(index).unwrap();
    core.cache.set_current_end(pc(0x20C)).unwrap();
    core.cache.switch_to(0).unwrap();

    assert_eq!(core.cache.switch_to_guest_pc(pc(0x204)), Some(pc(0x20C)));
    assert_eq!(core.cache.selected(), Some(index));
    assert_eq!(core.cache.switch_to_guest_pc(pc(0x500)), None);
}

/// The little-endian raw writers advance the cursor by their width.
#[test]
fn raw_writers_are_little_endian() {
    let mut core = Core::new();
    let index = core.cache.alloc(pc(0x200), &mut core.stats).unwrap();
    core.cache.switch_to(index).unwrap();
    core.cache.emit_u8(0xAA).unwrap();
    core.cache.emit_u16(0x1122).unwrap();
    core.cache.emit_u32(0x33445566).unwrap();

    let region = core.cache.region(index).unwrap();
    assert_eq!(region.cursor(), 7);
    assert_eq!(
        region.page().bytes(0, 7),
        &[0xAA, 0x22, 0x11, 0x66, 0x55, 0x44, 0x33]
    );
}
