//! # Translator tests
//!
//! Verifies the bytes the translator appends for representative opcodes and
//! the block-shape decisions (terminators, skip patching, region closing)
//! without executing anything.

use pretty_assertions::assert_eq;

use crate::common::{engine_with_rom, pc};

/// `LD Vx, nn` becomes a single absolute byte store.
#[test]
fn ld_immediate_bytes() {
    let mut engine = engine_with_rom(&[0x63, 0x2A]);
    let _ = engine.service().unwrap();

    let v3 = engine.guest().v_addr(3);
    let region = engine.cache().region(0).unwrap();
    let mut expected = vec![0xC6, 0x05];
    expected.extend_from_slice(&v3.to_le_bytes());
    expected.push(0x2A);
    assert_eq!(region.page().bytes(0, 7), &expected[..]);
    assert_eq!(region.end(), pc(0x202)); // the trailing unknown stub
    assert!(region.stop_write());
}

/// `JP addr` is a memory-indirect jump through the entry's target word and
/// ends the block.
#[test]
fn jp_is_indirect_through_table() {
    let mut engine = engine_with_rom(&[0x12, 0x00]);
    let _ = engine.service().unwrap();

    assert_eq!(engine.jumps().len(), 1);
    let word = engine.jumps().word_addr(0).unwrap();
    let region = engine.cache().region(0).unwrap();
    let mut expected = vec![0xFF, 0x25];
    expected.extend_from_slice(&word.to_le_bytes());
    assert_eq!(region.page().bytes(0, 6), &expected[..]);
    assert_eq!(region.cursor(), 6);
    assert_eq!(region.end(), pc(0x200));
    assert!(region.stop_write());
}

/// A skip records a conditional entry and patches it two instructions later
/// so the branch lands exactly on the second instruction's code.
#[test]
fn skip_patches_over_next_instruction() {
    // 0x200: SE V0, 1 / 0x202: LD V1, 5 / 0x204: LD V2, 6 / then unknown.
    let mut engine = engine_with_rom(&[0x30, 0x01, 0x61, 0x05, 0x62, 0x06]);
    let _ = engine.service().unwrap();

    assert_eq!(engine.jumps().cond_len(), 0);
    let region = engine.cache().region(0).unwrap();
    // cmp (7) + jcc (2) + rel32 (4) = 13 bytes for the skip itself; the
    // LD at 0x202 is 7 bytes, so the displacement must be 7.
    let rel = u32::from_le_bytes(region.page().bytes(9, 4).try_into().unwrap());
    assert_eq!(rel, 7);
    // And the jcc opcode is JE.
    assert_eq!(region.page().bytes(7, 2), &[0x0F, 0x84]);
}

/// `CALL addr` raises PREPARE_FOR_STACK_JUMP with the target and the return
/// PC, then leaves through the trampoline return label.
#[test]
fn call_emits_stack_jump_stub() {
    let mut engine = engine_with_rom(&[0x22, 0x40]);
    let _ = engine.service().unwrap();

    let abi = engine.guest().abi_addrs();
    let region = engine.cache().region(0).unwrap();
    let mut expected = vec![0xC6, 0x05];
    expected.extend_from_slice(&abi.status.to_le_bytes());
    expected.push(8); // PREPARE_FOR_STACK_JUMP
    expected.extend_from_slice(&[0xC7, 0x05]);
    expected.extend_from_slice(&abi.param1.to_le_bytes());
    expected.extend_from_slice(&0x240u32.to_le_bytes());
    expected.extend_from_slice(&[0xC7, 0x05]);
    expected.extend_from_slice(&abi.param2.to_le_bytes());
    expected.extend_from_slice(&0x202u32.to_le_bytes());
    expected.extend_from_slice(&[0xFF, 0x25]);
    expected.extend_from_slice(&abi.return_label.to_le_bytes());
    assert_eq!(region.page().bytes(0, expected.len()), &expected[..]);
    assert!(region.stop_write());
}

/// A draw yields with the raw opcode in param1 and a continuation in param2
/// that points at the byte after the stub.
#[test]
fn draw_stub_carries_continuation() {
    let mut engine = engine_with_rom(&[0xD0, 0x15, 0x63, 0x07]);
    let _ = engine.service().unwrap();

    let abi = engine.guest().abi_addrs();
    let region = engine.cache().region(0).unwrap();
    let base = region.host_base();
    // status (7) + param1 (10) + param2 (10) + jmp (6) = 33-byte stub.
    let mut expected = vec![0xC6, 0x05];
    expected.extend_from_slice(&abi.status.to_le_bytes());
    expected.push(5); // DISPLAY_DRAW
    expected.extend_from_slice(&[0xC7, 0x05]);
    expected.extend_from_slice(&abi.param1.to_le_bytes());
    expected.extend_from_slice(&0xD015u32.to_le_bytes());
    expected.extend_from_slice(&[0xC7, 0x05]);
    expected.extend_from_slice(&abi.param2.to_le_bytes());
    expected.extend_from_slice(&(base + 33).to_le_bytes());
    expected.extend_from_slice(&[0xFF, 0x25]);
    expected.extend_from_slice(&abi.return_label.to_le_bytes());
    assert_eq!(region.page().bytes(0, 33), &expected[..]);

    // The LD after the draw starts exactly at the continuation.
    assert_eq!(region.page().read_u8(33), 0xC6);
}

/// Register dump (`LD [I], Vx`) loads I into ECX, stores each register, and
/// raises the self-modifying-code check afterwards.
#[test]
fn reg_dump_reports_possible_self_modification() {
    let mut engine = engine_with_rom(&[0xF1, 0x55]);
    let _ = engine.service().unwrap();

    let region = engine.cache().region(0).unwrap();
    let index_addr = engine.guest().index_addr();
    let ram = engine.guest().ram_addr();

    // movzx ecx, word [I]
    let mut expected = vec![0x0F, 0xB7, 0x0D];
    expected.extend_from_slice(&index_addr.to_le_bytes());
    // V0 and V1 stores
    for i in 0..=1u32 {
        expected.push(0xA0);
        expected.extend_from_slice(&engine.guest().v_addr(i as u8).to_le_bytes());
        expected.extend_from_slice(&[0x88, 0x81]);
        expected.extend_from_slice(&(ram + i).to_le_bytes());
    }
    assert_eq!(region.page().bytes(0, expected.len()), &expected[..]);

    // The SMC stub follows: param1 <- I, status <- 3.
    let offset = expected.len();
    assert_eq!(region.page().bytes(offset, 2), &[0x66, 0xA1]);
}

/// The translator closes a region at the emission ceiling instead of
/// running into the tail reservation, and the next request opens a fresh
/// region at the following guest PC.
#[test]
fn region_closes_at_emission_ceiling() {
    // A long run of `LD V0, nn` fills the region 7 bytes per instruction.
    let rom: Vec<u8> = (0..1700u16).flat_map(|i| [0x60, (i & 0xFF) as u8]).collect();
    let mut engine = engine_with_rom(&rom);
    let _ = engine.service().unwrap();

    let config = c8jit_core::Config::default();
    let first = engine.cache().region(0).unwrap();
    assert!(first.stop_write());
    assert!(first.cursor() <= config.cache.tail_offset());
    let closed_end = first.end();

    // The dispatcher would see OUT_OF_CODE at end + 2; the policy allocates
    // fresh because the covering-previous-slot region is closed.
    let resume_pc = closed_end.next();
    engine.guest_mut().set_interrupt_status(1); // OUT_OF_CODE
    engine.guest_mut().set_param1(u32::from(resume_pc.val()));
    let _ = engine.service().unwrap();

    let fresh = engine.cache().find_by_guest_start(resume_pc).unwrap();
    assert_ne!(fresh, 0);
    assert!(engine.cache().region(fresh).unwrap().has_code());
}

/// Every eighth translated instruction is followed by a timer-tick yield.
#[test]
fn timer_stub_cadence() {
    let rom: Vec<u8> = (0..12u16).flat_map(|_| [0x60, 0x01]).collect();
    let mut engine = engine_with_rom(&rom);
    let _ = engine.service().unwrap();

    let region = engine.cache().region(0).unwrap();
    // Eight 7-byte loads, then the 23-byte timer stub (no param1).
    let offset = 8 * 7;
    let abi = engine.guest().abi_addrs();
    let mut expected = vec![0xC6, 0x05];
    expected.extend_from_slice(&abi.status.to_le_bytes());
    expected.push(6); // TIMER_TICK
    assert_eq!(region.page().bytes(offset, 7), &expected[..]);
}
