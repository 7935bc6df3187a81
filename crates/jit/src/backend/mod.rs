//! Code-generation backends.
//!
//! The cache and jump bookkeeping is architecture-independent; everything
//! that actually produces or patches machine code sits behind [`CodeBackend`].
//! The one shipped implementation is [`x86::X86Backend`] (IA-32). A backend
//! provides:
//! 1. **Tail stubs:** The fixed exit sequence at the end of every region.
//! 2. **Trampoline:** The host-calling-convention prelude/epilogue.
//! 3. **Indirect jumps:** Control transfers through a patchable memory word.
//! 4. **Patching:** In-place rewrites of relative displacements.

/// IA-32 encodings.
pub mod x86;

use crate::abi::AbiAddrs;
use crate::common::JitError;
use crate::mem::HostPage;

pub use x86::X86Backend;

/// Size of the region tail stub in bytes.
///
/// Status store (7) + resume-PC store (10) + indirect jump (6).
pub const TAIL_STUB_BYTES: usize = 23;

/// Byte positions of the trampoline's labels inside its page.
#[derive(Clone, Copy, Debug)]
pub struct TrampolineLayout {
    /// Offset of the CDECL entry point.
    pub entry: usize,
    /// Offset of the return label the tail stubs jump back to.
    pub return_label: usize,
    /// Offset of the instruction-pointer helper (`pop eax; push eax; ret`).
    pub eip_helper: usize,
    /// Total bytes written.
    pub len: usize,
}

/// Destination for emitted machine code.
///
/// Implemented by the cache manager, which appends at the selected region's
/// cursor. Encoders in [`x86`] write through this trait so they do not care
/// where the bytes land.
pub trait CodeSink {
    /// Appends one byte.
    fn emit_u8(&mut self, value: u8) -> Result<(), JitError>;

    /// Appends a little-endian 16-bit word.
    fn emit_u16(&mut self, value: u16) -> Result<(), JitError>;

    /// Appends a little-endian 32-bit word.
    fn emit_u32(&mut self, value: u32) -> Result<(), JitError>;

    /// Host address of the next byte to be emitted.
    fn cursor_addr(&self) -> Result<u32, JitError>;
}

/// Architecture-specific code production and patching.
pub trait CodeBackend {
    /// Writes the canonical tail stub into the final bytes of a region page.
    ///
    /// The stub sets the interrupt status to OUT_OF_CODE, stores `resume_pc`
    /// into interrupt parameter 1, and jumps back through the trampoline
    /// return label.
    fn write_tail_stub(&self, page: &mut HostPage, offset: usize, abi: &AbiAddrs, resume_pc: u16);

    /// Re-patches the resume-PC immediate inside an already written tail stub.
    fn patch_tail_resume_pc(&self, page: &mut HostPage, offset: usize, resume_pc: u16);

    /// Writes the trampoline and its helper into `page`.
    ///
    /// `resume_word` is the address of the word the trampoline's indirect
    /// jump reads its target from.
    fn write_trampoline(&self, page: &mut HostPage, resume_word: u32) -> TrampolineLayout;

    /// Writes the re-resolve thunk for jump-table entry `index` at `offset`.
    ///
    /// The thunk raises PREPARE_FOR_JUMP with param1 = `index` and leaves
    /// through the trampoline return label; unresolved (or invalidated)
    /// indirect-target words point at it.
    fn write_resolve_thunk(&self, page: &mut HostPage, offset: usize, index: u32, abi: &AbiAddrs);

    /// Emits a jump indirect through the word at `word_addr`.
    fn emit_indirect_jump(&self, sink: &mut dyn CodeSink, word_addr: u32) -> Result<(), JitError>;

    /// Overwrites the 32-bit displacement at `slot_addr`.
    ///
    /// # Safety contract
    ///
    /// `slot_addr` must point into a live cache region; the conditional-jump
    /// queue guarantees this by dropping entries whose region is released.
    fn patch_rel32(&self, slot_addr: u32, value: i32);
}
