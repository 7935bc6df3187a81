//! IA-32 encodings.
//!
//! Everything the recompiler knows about x86 lives here: the trampoline, the
//! region tail stub, the jump-table thunks, and the small instruction
//! vocabulary the translator emits. Emitted code addresses guest state and
//! ABI words through absolute 32-bit displacements (`moffs`/`disp32` forms),
//! which is why every page involved is mapped in the low 4 GiB.
//!
//! Register discipline for emitted sequences: only EAX, ECX and EDX are
//! touched. The trampoline preserves EBP itself, and the callee-saved
//! EBX/ESI/EDI are never used, so translated code honors CDECL without any
//! per-block save/restore.

use crate::abi::{AbiAddrs, InterruptStatus};
use crate::backend::{CodeBackend, CodeSink, TAIL_STUB_BYTES, TrampolineLayout};
use crate::common::JitError;
use crate::mem::HostPage;

/// Offset of the resume-PC immediate inside the tail stub.
const TAIL_RESUME_IMM: usize = 13;

/// Branch conditions the translator emits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Cond {
    /// `JE` — last compare was equal.
    Equal,
    /// `JNE` — last compare was not equal.
    NotEqual,
}

impl Cond {
    const fn opcode(self) -> u8 {
        match self {
            Self::Equal => 0x84,
            Self::NotEqual => 0x85,
        }
    }
}

/// `MOV byte [addr], imm8`
pub fn mov_mem8_imm8(sink: &mut dyn CodeSink, addr: u32, imm: u8) -> Result<(), JitError> {
    sink.emit_u8(0xC6)?;
    sink.emit_u8(0x05)?;
    sink.emit_u32(addr)?;
    sink.emit_u8(imm)
}

/// `MOV word [addr], imm16`
pub fn mov_mem16_imm16(sink: &mut dyn CodeSink, addr: u32, imm: u16) -> Result<(), JitError> {
    sink.emit_u8(0x66)?;
    sink.emit_u8(0xC7)?;
    sink.emit_u8(0x05)?;
    sink.emit_u32(addr)?;
    sink.emit_u16(imm)
}

/// `MOV dword [addr], imm32`
pub fn mov_mem32_imm32(sink: &mut dyn CodeSink, addr: u32, imm: u32) -> Result<(), JitError> {
    sink.emit_u8(0xC7)?;
    sink.emit_u8(0x05)?;
    sink.emit_u32(addr)?;
    sink.emit_u32(imm)
}

/// `MOV AL, [addr]` (moffs8 form)
pub fn mov_al_from_mem(sink: &mut dyn CodeSink, addr: u32) -> Result<(), JitError> {
    sink.emit_u8(0xA0)?;
    sink.emit_u32(addr)
}

/// `MOV [addr], AL` (moffs8 form)
pub fn mov_mem_from_al(sink: &mut dyn CodeSink, addr: u32) -> Result<(), JitError> {
    sink.emit_u8(0xA2)?;
    sink.emit_u32(addr)
}

/// `MOV AX, [addr]` (moffs16 form)
pub fn mov_ax_from_mem(sink: &mut dyn CodeSink, addr: u32) -> Result<(), JitError> {
    sink.emit_u8(0x66)?;
    sink.emit_u8(0xA1)?;
    sink.emit_u32(addr)
}

/// `MOV [addr], AX` (moffs16 form)
pub fn mov_mem_from_ax(sink: &mut dyn CodeSink, addr: u32) -> Result<(), JitError> {
    sink.emit_u8(0x66)?;
    sink.emit_u8(0xA3)?;
    sink.emit_u32(addr)
}

/// `ADD byte [addr], imm8`
pub fn add_mem8_imm8(sink: &mut dyn CodeSink, addr: u32, imm: u8) -> Result<(), JitError> {
    sink.emit_u8(0x80)?;
    sink.emit_u8(0x05)?;
    sink.emit_u32(addr)?;
    sink.emit_u8(imm)
}

/// `CMP byte [addr], imm8`
pub fn cmp_mem8_imm8(sink: &mut dyn CodeSink, addr: u32, imm: u8) -> Result<(), JitError> {
    sink.emit_u8(0x80)?;
    sink.emit_u8(0x3D)?;
    sink.emit_u32(addr)?;
    sink.emit_u8(imm)
}

/// `<op> byte [addr], AL` for the 8-bit ALU group (ADD/OR/AND/SUB/XOR).
fn alu_mem8_al(sink: &mut dyn CodeSink, opcode: u8, addr: u32) -> Result<(), JitError> {
    sink.emit_u8(opcode)?;
    sink.emit_u8(0x05)?;
    sink.emit_u32(addr)
}

/// `ADD byte [addr], AL`
pub fn add_mem8_al(sink: &mut dyn CodeSink, addr: u32) -> Result<(), JitError> {
    alu_mem8_al(sink, 0x00, addr)
}

/// `OR byte [addr], AL`
pub fn or_mem8_al(sink: &mut dyn CodeSink, addr: u32) -> Result<(), JitError> {
    alu_mem8_al(sink, 0x08, addr)
}

/// `AND byte [addr], AL`
pub fn and_mem8_al(sink: &mut dyn CodeSink, addr: u32) -> Result<(), JitError> {
    alu_mem8_al(sink, 0x20, addr)
}

/// `SUB byte [addr], AL`
pub fn sub_mem8_al(sink: &mut dyn CodeSink, addr: u32) -> Result<(), JitError> {
    alu_mem8_al(sink, 0x28, addr)
}

/// `XOR byte [addr], AL`
pub fn xor_mem8_al(sink: &mut dyn CodeSink, addr: u32) -> Result<(), JitError> {
    alu_mem8_al(sink, 0x30, addr)
}

/// `SUB AL, byte [addr]`
pub fn sub_al_mem8(sink: &mut dyn CodeSink, addr: u32) -> Result<(), JitError> {
    sink.emit_u8(0x2A)?;
    sink.emit_u8(0x05)?;
    sink.emit_u32(addr)
}

/// `CMP AL, byte [addr]`
pub fn cmp_al_mem8(sink: &mut dyn CodeSink, addr: u32) -> Result<(), JitError> {
    sink.emit_u8(0x3A)?;
    sink.emit_u8(0x05)?;
    sink.emit_u32(addr)
}

/// `SETC byte [addr]` — store the carry flag as 0/1.
pub fn setc_mem8(sink: &mut dyn CodeSink, addr: u32) -> Result<(), JitError> {
    sink.emit_u8(0x0F)?;
    sink.emit_u8(0x92)?;
    sink.emit_u8(0x05)?;
    sink.emit_u32(addr)
}

/// `SETNC byte [addr]` — store the inverted carry flag as 0/1.
pub fn setnc_mem8(sink: &mut dyn CodeSink, addr: u32) -> Result<(), JitError> {
    sink.emit_u8(0x0F)?;
    sink.emit_u8(0x93)?;
    sink.emit_u8(0x05)?;
    sink.emit_u32(addr)
}

/// `SHR AL, 1`
pub fn shr_al_1(sink: &mut dyn CodeSink) -> Result<(), JitError> {
    sink.emit_u8(0xD0)?;
    sink.emit_u8(0xE8)
}

/// `SHL AL, 1`
pub fn shl_al_1(sink: &mut dyn CodeSink) -> Result<(), JitError> {
    sink.emit_u8(0xD0)?;
    sink.emit_u8(0xE0)
}

/// `MOVZX EAX, byte [addr]`
pub fn movzx_eax_mem8(sink: &mut dyn CodeSink, addr: u32) -> Result<(), JitError> {
    sink.emit_u8(0x0F)?;
    sink.emit_u8(0xB6)?;
    sink.emit_u8(0x05)?;
    sink.emit_u32(addr)
}

/// `MOVZX ECX, word [addr]`
pub fn movzx_ecx_mem16(sink: &mut dyn CodeSink, addr: u32) -> Result<(), JitError> {
    sink.emit_u8(0x0F)?;
    sink.emit_u8(0xB7)?;
    sink.emit_u8(0x0D)?;
    sink.emit_u32(addr)
}

/// `MOV [ECX + disp32], AL`
pub fn mov_ecx_disp_from_al(sink: &mut dyn CodeSink, disp: u32) -> Result<(), JitError> {
    sink.emit_u8(0x88)?;
    sink.emit_u8(0x81)?;
    sink.emit_u32(disp)
}

/// `MOV [ECX + disp32], AH`
pub fn mov_ecx_disp_from_ah(sink: &mut dyn CodeSink, disp: u32) -> Result<(), JitError> {
    sink.emit_u8(0x88)?;
    sink.emit_u8(0xA1)?;
    sink.emit_u32(disp)
}

/// `MOV AL, [ECX + disp32]`
pub fn mov_al_from_ecx_disp(sink: &mut dyn CodeSink, disp: u32) -> Result<(), JitError> {
    sink.emit_u8(0x8A)?;
    sink.emit_u8(0x81)?;
    sink.emit_u32(disp)
}

/// `CMP byte [EAX + disp32], imm8`
pub fn cmp_eax_disp_imm8(sink: &mut dyn CodeSink, disp: u32, imm: u8) -> Result<(), JitError> {
    sink.emit_u8(0x80)?;
    sink.emit_u8(0xB8)?;
    sink.emit_u32(disp)?;
    sink.emit_u8(imm)
}

/// `ADD word [addr], AX`
pub fn add_mem16_ax(sink: &mut dyn CodeSink, addr: u32) -> Result<(), JitError> {
    sink.emit_u8(0x66)?;
    sink.emit_u8(0x01)?;
    sink.emit_u8(0x05)?;
    sink.emit_u32(addr)
}

/// `LEA EAX, [EAX + EAX*4]` — multiply AL's zero-extension by five.
pub fn lea_eax_times5(sink: &mut dyn CodeSink) -> Result<(), JitError> {
    sink.emit_u8(0x8D)?;
    sink.emit_u8(0x04)?;
    sink.emit_u8(0x80)
}

/// `AAM base` — split AL into AH = AL / base, AL = AL % base.
///
/// The immediate-base form is documented IA-32; base 100 then base 10 gives
/// the three BCD digits the `LD B, Vx` instruction stores.
pub fn aam(sink: &mut dyn CodeSink, base: u8) -> Result<(), JitError> {
    sink.emit_u8(0xD4)?;
    sink.emit_u8(base)
}

/// `RDTSC` — time-stamp counter into EDX:EAX.
pub fn rdtsc(sink: &mut dyn CodeSink) -> Result<(), JitError> {
    sink.emit_u8(0x0F)?;
    sink.emit_u8(0x31)
}

/// `AND AL, imm8`
pub fn and_al_imm8(sink: &mut dyn CodeSink, imm: u8) -> Result<(), JitError> {
    sink.emit_u8(0x24)?;
    sink.emit_u8(imm)
}

/// Opcode bytes of `Jcc rel32`; the caller emits the displacement word.
pub fn jcc_rel32(sink: &mut dyn CodeSink, cond: Cond) -> Result<(), JitError> {
    sink.emit_u8(0x0F)?;
    sink.emit_u8(cond.opcode())
}

/// `JMP dword [addr]`
pub fn jmp_indirect(sink: &mut dyn CodeSink, addr: u32) -> Result<(), JitError> {
    sink.emit_u8(0xFF)?;
    sink.emit_u8(0x25)?;
    sink.emit_u32(addr)
}

/// The IA-32 backend.
///
/// Stateless; all layout knowledge is in the associated functions.
#[derive(Clone, Copy, Debug, Default)]
pub struct X86Backend;

impl X86Backend {
    /// Builds the canonical 23-byte tail stub image.
    fn tail_stub_bytes(abi: &AbiAddrs, resume_pc: u16) -> [u8; TAIL_STUB_BYTES] {
        let mut stub = [0u8; TAIL_STUB_BYTES];
        stub[0] = 0xC6; // mov byte [status], OUT_OF_CODE
        stub[1] = 0x05;
        stub[2..6].copy_from_slice(&abi.status.to_le_bytes());
        stub[6] = InterruptStatus::OutOfCode as u8;
        stub[7] = 0xC7; // mov dword [param1], resume_pc
        stub[8] = 0x05;
        stub[9..13].copy_from_slice(&abi.param1.to_le_bytes());
        stub[13..17].copy_from_slice(&u32::from(resume_pc).to_le_bytes());
        stub[17] = 0xFF; // jmp [return_label]
        stub[18] = 0x25;
        stub[19..23].copy_from_slice(&abi.return_label.to_le_bytes());
        stub
    }
}

impl CodeBackend for X86Backend {
    fn write_tail_stub(&self, page: &mut HostPage, offset: usize, abi: &AbiAddrs, resume_pc: u16) {
        page.write_bytes(offset, &Self::tail_stub_bytes(abi, resume_pc));
    }

    fn patch_tail_resume_pc(&self, page: &mut HostPage, offset: usize, resume_pc: u16) {
        page.write_u32(offset + TAIL_RESUME_IMM, u32::from(resume_pc));
    }

    fn write_trampoline(&self, page: &mut HostPage, resume_word: u32) -> TrampolineLayout {
        let mut bytes = [0u8; 14];
        bytes[0] = 0x55; // push ebp
        bytes[1] = 0x89; // mov ebp, esp
        bytes[2] = 0xE5;
        bytes[3] = 0xFF; // jmp [resume_word]
        bytes[4] = 0x25;
        bytes[5..9].copy_from_slice(&resume_word.to_le_bytes());
        bytes[9] = 0x5D; // return label: pop ebp
        bytes[10] = 0xC3; //               ret
        bytes[11] = 0x58; // eip helper:   pop eax
        bytes[12] = 0x50; //               push eax
        bytes[13] = 0xC3; //               ret
        page.write_bytes(0, &bytes);
        TrampolineLayout {
            entry: 0,
            return_label: 9,
            eip_helper: 11,
            len: bytes.len(),
        }
    }

    fn write_resolve_thunk(&self, page: &mut HostPage, offset: usize, index: u32, abi: &AbiAddrs) {
        let mut stub = [0u8; TAIL_STUB_BYTES];
        stub[0] = 0xC6; // mov byte [status], PREPARE_FOR_JUMP
        stub[1] = 0x05;
        stub[2..6].copy_from_slice(&abi.status.to_le_bytes());
        stub[6] = InterruptStatus::PrepareForJump as u8;
        stub[7] = 0xC7; // mov dword [param1], index
        stub[8] = 0x05;
        stub[9..13].copy_from_slice(&abi.param1.to_le_bytes());
        stub[13..17].copy_from_slice(&index.to_le_bytes());
        stub[17] = 0xFF; // jmp [return_label]
        stub[18] = 0x25;
        stub[19..23].copy_from_slice(&abi.return_label.to_le_bytes());
        page.write_bytes(offset, &stub);
    }

    fn emit_indirect_jump(&self, sink: &mut dyn CodeSink, word_addr: u32) -> Result<(), JitError> {
        jmp_indirect(sink, word_addr)
    }

    fn patch_rel32(&self, slot_addr: u32, value: i32) {
        // SAFETY: the conditional-jump queue only hands out slots inside
        // regions that are still live and still open for writing; entries in
        // released regions are dropped before the page is unmapped.
        unsafe {
            (slot_addr as usize as *mut i32).write_unaligned(value.to_le());
        }
    }
}
