//! # IA-32 backend tests
//!
//! Byte-level checks of the encoders and the fixed stubs. Sequences are
//! emitted into a real region and compared against hand-assembled bytes.

use pretty_assertions::assert_eq;

use c8jit_core::backend::x86::{self, Cond};
use c8jit_core::backend::{CodeBackend, CodeSink, X86Backend};
use c8jit_core::engine::Trampoline;

use crate::common::{Core, pc};

/// Emits one encoder call and returns the produced bytes.
fn emit_one(f: impl FnOnce(&mut dyn CodeSink)) -> Vec<u8> {
    let mut core = Core::new();
    let index = core.cache.alloc(pc(0x200), &mut core.stats).unwrap();
    core.cache.switch_to(index).unwrap();
    f(&mut core.cache);
    let region = core.cache.region(index).unwrap();
    region.page().bytes(0, region.cursor()).to_vec()
}

/// Absolute-addressed stores use the `C6/C7 05 disp32` forms.
#[test]
fn immediate_store_encodings() {
    assert_eq!(
        emit_one(|s| x86::mov_mem8_imm8(s, 0x1122_3344, 0xAB).unwrap()),
        [0xC6, 0x05, 0x44, 0x33, 0x22, 0x11, 0xAB]
    );
    assert_eq!(
        emit_one(|s| x86::mov_mem16_imm16(s, 0x1122_3344, 0x0FED).unwrap()),
        [0x66, 0xC7, 0x05, 0x44, 0x33, 0x22, 0x11, 0xED, 0x0F]
    );
    assert_eq!(
        emit_one(|s| x86::mov_mem32_imm32(s, 0x1122_3344, 0x0102_0304).unwrap()),
        [0xC7, 0x05, 0x44, 0x33, 0x22, 0x11, 0x04, 0x03, 0x02, 0x01]
    );
}

/// Accumulator moves use the short `moffs` forms.
#[test]
fn accumulator_moffs_encodings() {
    assert_eq!(
        emit_one(|s| x86::mov_al_from_mem(s, 0xA0B0_C0D0).unwrap()),
        [0xA0, 0xD0, 0xC0, 0xB0, 0xA0]
    );
    assert_eq!(
        emit_one(|s| x86::mov_mem_from_al(s, 0xA0B0_C0D0).unwrap()),
        [0xA2, 0xD0, 0xC0, 0xB0, 0xA0]
    );
    assert_eq!(
        emit_one(|s| x86::mov_ax_from_mem(s, 0xA0B0_C0D0).unwrap()),
        [0x66, 0xA1, 0xD0, 0xC0, 0xB0, 0xA0]
    );
    assert_eq!(
        emit_one(|s| x86::mov_mem_from_ax(s, 0xA0B0_C0D0).unwrap()),
        [0x66, 0xA3, 0xD0, 0xC0, 0xB0, 0xA0]
    );
}

/// Memory-ALU group against AL, plus the flag-store forms.
#[test]
fn alu_and_flag_encodings() {
    assert_eq!(
        emit_one(|s| x86::add_mem8_al(s, 4).unwrap()),
        [0x00, 0x05, 4, 0, 0, 0]
    );
    assert_eq!(
        emit_one(|s| x86::sub_mem8_al(s, 4).unwrap()),
        [0x28, 0x05, 4, 0, 0, 0]
    );
    assert_eq!(
        emit_one(|s| x86::xor_mem8_al(s, 4).unwrap()),
        [0x30, 0x05, 4, 0, 0, 0]
    );
    assert_eq!(
        emit_one(|s| x86::setc_mem8(s, 4).unwrap()),
        [0x0F, 0x92, 0x05, 4, 0, 0, 0]
    );
    assert_eq!(
        emit_one(|s| x86::setnc_mem8(s, 4).unwrap()),
        [0x0F, 0x93, 0x05, 4, 0, 0, 0]
    );
    assert_eq!(
        emit_one(|s| x86::cmp_mem8_imm8(s, 4, 9).unwrap()),
        [0x80, 0x3D, 4, 0, 0, 0, 9]
    );
}

/// Indexed forms route through ECX/EAX with a 32-bit displacement.
#[test]
fn indexed_encodings() {
    assert_eq!(
        emit_one(|s| x86::movzx_ecx_mem16(s, 8).unwrap()),
        [0x0F, 0xB7, 0x0D, 8, 0, 0, 0]
    );
    assert_eq!(
        emit_one(|s| x86::mov_ecx_disp_from_al(s, 0x10).unwrap()),
        [0x88, 0x81, 0x10, 0, 0, 0]
    );
    assert_eq!(
        emit_one(|s| x86::mov_al_from_ecx_disp(s, 0x10).unwrap()),
        [0x8A, 0x81, 0x10, 0, 0, 0]
    );
    assert_eq!(
        emit_one(|s| x86::cmp_eax_disp_imm8(s, 0x10, 0).unwrap()),
        [0x80, 0xB8, 0x10, 0, 0, 0, 0]
    );
}

/// Control-flow encodings: conditional opcode pairs and the indirect jump.
#[test]
fn flow_encodings() {
    assert_eq!(
        emit_one(|s| x86::jcc_rel32(s, Cond::Equal).unwrap()),
        [0x0F, 0x84]
    );
    assert_eq!(
        emit_one(|s| x86::jcc_rel32(s, Cond::NotEqual).unwrap()),
        [0x0F, 0x85]
    );
    assert_eq!(
        emit_one(|s| x86::jmp_indirect(s, 0xDEAD_BEEF).unwrap()),
        [0xFF, 0x25, 0xEF, 0xBE, 0xAD, 0xDE]
    );
}

/// The trampoline is the documented 14-byte prelude/epilogue with the one
/// indirect-jump slot reading the resume word.
#[test]
fn trampoline_layout_and_bytes() {
    let trampoline = Trampoline::new(&X86Backend, 0x1234_5678).unwrap();
    assert_eq!(
        trampoline.bytes(),
        [
            0x55, // push ebp
            0x89, 0xE5, // mov ebp, esp
            0xFF, 0x25, 0x78, 0x56, 0x34, 0x12, // jmp [resume]
            0x5D, // pop ebp
            0xC3, // ret
            0x58, 0x50, 0xC3, // pop eax; push eax; ret
        ]
    );
    assert_eq!(trampoline.return_label_addr(), trampoline.entry_addr() + 9);
    assert_eq!(trampoline.eip_helper_addr(), trampoline.entry_addr() + 11);
}

/// `patch_rel32` rewrites exactly the four displacement bytes.
#[test]
fn patch_rel32_writes_in_place() {
    let mut core = Core::new();
    let index = core.cache.alloc(pc(0x200), &mut core.stats).unwrap();
    core.cache.switch_to(index).unwrap();
    core.cache.emit_u8(0xE9).unwrap();
    let slot = core.cache.cursor_addr().unwrap();
    core.cache.emit_u32(0).unwrap();
    core.cache.emit_u8(0xC3).unwrap();

    X86Backend.patch_rel32(slot, -2);
    let region = core.cache.region(index).unwrap();
    assert_eq!(
        region.page().bytes(0, 6),
        [0xE9, 0xFE, 0xFF, 0xFF, 0xFF, 0xC3]
    );
}
