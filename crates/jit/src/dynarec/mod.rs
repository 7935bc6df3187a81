//! CHIP-8 to IA-32 translation.
//!
//! The translator drives the cache and jump subsystems through the same
//! interface any emitter would use: it asks for a writable region, appends
//! encoded bytes, records jump-table and conditional-jump entries, and
//! reports each finished guest instruction so the countdown queue advances.
//!
//! Control never flows from translated code into host Rust directly; every
//! exit is an emitted stub that writes the interrupt words and jumps back
//! through the trampoline return label. Stubs that merely yield (draw, key
//! wait, timer) also store the host address of the byte after themselves
//! into param2, so the dispatcher can resume exactly where the block left
//! off — the dispatcher remains the only writer of the resume word.

/// Per-opcode emission.
pub mod ops;

use tracing::debug;

use crate::abi::InterruptStatus;
use crate::backend::{CodeBackend, CodeSink, x86};
use crate::common::{GuestPc, JitError};
use crate::engine::JitEngine;

/// What an emitted instruction does to the block being translated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum OpOutcome {
    /// Execution falls through to the next instruction slot.
    Continue,
    /// Control left the block; translation may stop here.
    BlockEnd,
}

/// Size of the param2 store plus the exit jump, the tail every yield stub
/// ends with; a stub's continuation address is its cursor plus this.
const YIELD_TAIL_BYTES: u32 = 16;

impl<B: CodeBackend + Clone> JitEngine<B> {
    /// Translates one basic block starting at `from` into the selected
    /// region.
    ///
    /// Stops at the first control transfer once no conditional patch is
    /// pending, or when the region reaches its emission ceiling; either way
    /// the region is closed for writing. A pending forward skip keeps
    /// translation going past a terminator, because the skipped-to
    /// fall-through path still needs code.
    pub(crate) fn translate_block(&mut self, from: GuestPc) -> Result<(), JitError> {
        self.stats.blocks_translated += 1;
        debug!(%from, region = ?self.cache.selected(), "translating block");
        let mut pc = from;
        loop {
            if self.cache.current_at_capacity()? && self.jumps.peek_min_cycles() == 0 {
                self.cache.current_mut()?.set_stop_write();
                break;
            }

            let outcome = match self.guest.opcode_at(pc) {
                Some(opcode) => self.emit_opcode(pc, opcode)?,
                None => {
                    self.emit_unknown(pc)?;
                    OpOutcome::BlockEnd
                }
            };
            self.cache.set_current_end(pc)?;
            self.stats.instructions_translated += 1;
            self.jumps.on_instruction_translated();
            let end = self.cache.current_end_addr()?;
            let _ = self
                .jumps
                .resolve_conditionals(&self.backend, end, &mut self.stats);

            self.timer_countdown = self.timer_countdown.saturating_sub(1);
            if self.timer_countdown == 0 && outcome == OpOutcome::Continue {
                self.emit_yield_stub(InterruptStatus::TimerTick, None)?;
                self.timer_countdown = self.config.guest.timer_interval;
            }

            match outcome {
                OpOutcome::Continue => pc = pc.next(),
                OpOutcome::BlockEnd => {
                    if self.jumps.peek_min_cycles() > 0 {
                        // A recorded skip lands past this terminator; the
                        // fall-through path still needs its code.
                        pc = pc.next();
                    } else {
                        self.cache.current_mut()?.set_stop_write();
                        break;
                    }
                }
            }
            self.guest.pc = pc;
        }
        Ok(())
    }

    /// Emits a stub that yields to the dispatcher and resumes after itself:
    /// status, optional param1, continuation into param2, exit jump.
    pub(crate) fn emit_yield_stub(
        &mut self,
        status: InterruptStatus,
        param1: Option<u32>,
    ) -> Result<(), JitError> {
        let abi = self.guest.abi_addrs();
        x86::mov_mem8_imm8(&mut self.cache, abi.status, status as u8)?;
        if let Some(value) = param1 {
            x86::mov_mem32_imm32(&mut self.cache, abi.param1, value)?;
        }
        let continuation = self.cache.cursor_addr()? + YIELD_TAIL_BYTES;
        x86::mov_mem32_imm32(&mut self.cache, abi.param2, continuation)?;
        x86::jmp_indirect(&mut self.cache, abi.return_label)
    }

    /// Emits a block-terminating stub: status, optional params, exit jump.
    pub(crate) fn emit_exit_stub(
        &mut self,
        status: InterruptStatus,
        param1: Option<u32>,
        param2: Option<u32>,
    ) -> Result<(), JitError> {
        let abi = self.guest.abi_addrs();
        x86::mov_mem8_imm8(&mut self.cache, abi.status, status as u8)?;
        if let Some(value) = param1 {
            x86::mov_mem32_imm32(&mut self.cache, abi.param1, value)?;
        }
        if let Some(value) = param2 {
            x86::mov_mem32_imm32(&mut self.cache, abi.param2, value)?;
        }
        x86::jmp_indirect(&mut self.cache, abi.return_label)
    }

    /// Emits the illegal-opcode report for `pc`.
    pub(crate) fn emit_unknown(&mut self, pc: GuestPc) -> Result<(), JitError> {
        self.emit_exit_stub(
            InterruptStatus::UnknownOpcode,
            Some(u32::from(pc.val())),
            None,
        )
    }

    /// Emits the self-modifying-code report after a guest RAM store.
    ///
    /// The written guest address is the index register at run time, so the
    /// stub copies I into param1 (low 16 bits; the dispatcher masks) before
    /// raising the interrupt, then resumes after itself like any yield.
    pub(crate) fn emit_smc_check(&mut self) -> Result<(), JitError> {
        let abi = self.guest.abi_addrs();
        x86::mov_ax_from_mem(&mut self.cache, self.guest.index_addr())?;
        x86::mov_mem_from_ax(&mut self.cache, abi.param1)?;
        x86::mov_mem8_imm8(
            &mut self.cache,
            abi.status,
            InterruptStatus::SelfModifyingCode as u8,
        )?;
        let continuation = self.cache.cursor_addr()? + YIELD_TAIL_BYTES;
        x86::mov_mem32_imm32(&mut self.cache, abi.param2, continuation)?;
        x86::jmp_indirect(&mut self.cache, abi.return_label)
    }
}
