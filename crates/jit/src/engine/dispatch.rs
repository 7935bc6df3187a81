//! Dispatch loop and interrupt handling.
//!
//! One [`step`](crate::engine::JitEngine::step) is one iteration of the
//! classic block-JIT outer loop:
//! 1. Refill sweep — stale jump-table pointers are refreshed first.
//! 2. Invalidation sweep — flagged regions are released, unless the resume
//!    address still points into them.
//! 3. Interrupt dispatch — act on the status translated code left behind.
//! 4. Re-entry through the trampoline.
//!
//! Interrupts the host must service (display, key wait, halts) short-circuit
//! before re-entry and surface as [`RunEvent`]s.

use std::fmt;

use tracing::{debug, trace};

use crate::abi::InterruptStatus;
use crate::backend::CodeBackend;
use crate::common::{GuestPc, JitError};
use crate::engine::{JitEngine, param_pc};

/// Why the guest stopped for good.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HaltReason {
    /// The translator met an opcode it cannot decode.
    UnknownOpcode {
        /// Guest PC of the opcode.
        pc: GuestPc,
    },
    /// A jump target lies outside guest memory.
    JumpTargetOutOfRange {
        /// The unresolvable target.
        pc: GuestPc,
    },
    /// A 17th nested `CALL`.
    StackOverflow {
        /// Return PC that did not fit.
        pc: GuestPc,
    },
    /// `RET` with nothing on the call stack.
    StackUnderflow,
    /// Translated code reported a status octet the dispatcher cannot decode.
    BadInterruptStatus {
        /// The raw octet.
        raw: u8,
    },
}

impl fmt::Display for HaltReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownOpcode { pc } => write!(f, "unknown opcode at {pc}"),
            Self::JumpTargetOutOfRange { pc } => {
                write!(f, "jump target {pc} outside guest memory")
            }
            Self::StackOverflow { pc } => write!(f, "call stack overflow at {pc}"),
            Self::StackUnderflow => write!(f, "return with empty call stack"),
            Self::BadInterruptStatus { raw } => write!(f, "bad interrupt status {raw:#04x}"),
        }
    }
}

/// Outcome of one dispatch iteration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunEvent {
    /// Nothing for the host to do; call [`step`](JitEngine::step) again.
    Continue,
    /// The framebuffer changed; redraw, then step again.
    Draw,
    /// The guest is blocked until [`press_key`](JitEngine::press_key).
    WaitingForKey,
    /// The guest halted; further steps return the same event.
    Halted(HaltReason),
}

impl<B: CodeBackend + Clone> JitEngine<B> {
    /// Runs one dispatch iteration.
    ///
    /// Sweeps, services the pending interrupt, and re-enters translated code
    /// unless the iteration produced a host-visible event.
    pub fn step(&mut self) -> Result<RunEvent, JitError> {
        match self.service()? {
            Some(event) => Ok(event),
            None => {
                self.trampoline.enter()?;
                Ok(RunEvent::Continue)
            }
        }
    }

    /// The dispatch half of one iteration: sweeps the jump refill list and
    /// the invalidation queue, then services the pending interrupt status.
    ///
    /// Returns a host-visible event, or `None` when the engine is ready for
    /// re-entry at the resume address. [`step`](Self::step) is this followed
    /// by the trampoline; the split exists because every part of the core
    /// except the final transfer is host-independent.
    pub fn service(&mut self) -> Result<Option<RunEvent>, JitError> {
        if let Some(reason) = self.halted {
            return Ok(Some(RunEvent::Halted(reason)));
        }
        if self.waiting_key.is_some() {
            return Ok(Some(RunEvent::WaitingForKey));
        }
        self.stats.dispatch_iterations += 1;

        // Refill before invalidation: stale pointers are refreshed before
        // the regions they once pointed at are freed.
        if let Some(pc) = self.jumps.resolve_pending(&mut self.cache, &mut self.stats)? {
            return Ok(Some(self.halt(HaltReason::JumpTargetOutOfRange { pc })));
        }
        let resume = self.guest.resume_address();
        let _ = self
            .cache
            .flush_invalidations(resume, &mut self.jumps, &mut self.stats);

        let raw = self.guest.interrupt_status();
        let Some(status) = InterruptStatus::from_raw(raw) else {
            return Ok(Some(self.halt(HaltReason::BadInterruptStatus { raw })));
        };
        self.guest
            .set_interrupt_status(InterruptStatus::NoInterrupt as u8);
        let param1 = self.guest.param1();
        let param2 = self.guest.param2();
        trace!(?status, param1, param2, "dispatch");

        let event = match status {
            InterruptStatus::NoInterrupt => None,
            InterruptStatus::OutOfCode => {
                self.translate_more(param_pc(param1))?;
                let base = self.cache.current()?.host_base();
                self.guest.set_resume_address(base);
                None
            }
            InterruptStatus::PrepareForJump => self.handle_prepare_for_jump(param1 as usize)?,
            InterruptStatus::SelfModifyingCode => {
                self.cache.mark_invalid_by_guest_pc(param_pc(param1));
                self.guest.set_resume_address(param2);
                None
            }
            InterruptStatus::WaitForKeypress => {
                self.waiting_key = Some((param1 & 0xF) as u8);
                self.guest.set_resume_address(param2);
                Some(RunEvent::WaitingForKey)
            }
            InterruptStatus::DisplayDraw => {
                self.handle_draw((param1 & 0xFFFF) as u16);
                self.guest.set_resume_address(param2);
                Some(RunEvent::Draw)
            }
            InterruptStatus::TimerTick => {
                self.guest.tick_timers();
                self.stats.timer_ticks += 1;
                self.guest.set_resume_address(param2);
                None
            }
            InterruptStatus::UnknownOpcode => {
                Some(self.halt(HaltReason::UnknownOpcode {
                    pc: param_pc(param1),
                }))
            }
            InterruptStatus::PrepareForStackJump => {
                let target = param_pc(param1);
                let ret = param_pc(param2);
                if self.guest.push_stack(ret) {
                    self.route_jump(target)?
                } else {
                    Some(self.halt(HaltReason::StackOverflow { pc: ret.prev() }))
                }
            }
            InterruptStatus::PrepareForReturn => match self.guest.pop_stack() {
                Some(target) => self.route_jump(target)?,
                None => Some(self.halt(HaltReason::StackUnderflow)),
            },
            InterruptStatus::PrepareForIndirectJump => {
                let base = param_pc(param1);
                let target = GuestPc::new(base.val().wrapping_add(u16::from(self.guest.v(0))));
                self.route_jump(target)?
            }
        };
        Ok(event)
    }

    /// Translates more code at `pc` into the region the writable-selection
    /// policy picks, resuming after any pre-existing translation.
    pub(crate) fn translate_more(&mut self, pc: GuestPc) -> Result<(), JitError> {
        let index = self.cache.get_writable_region_for(pc, &mut self.stats)?;
        self.cache.switch_to(index)?;
        let region = self.cache.current()?;
        let from = if region.has_code() {
            region.end().next()
        } else {
            region.start()
        };
        self.guest.pc = from;
        self.translate_block(from)
    }

    /// PREPARE_FOR_JUMP: make the entry's host pointer live, translating the
    /// destination block first when it is still empty, and resume through it.
    fn handle_prepare_for_jump(&mut self, index: usize) -> Result<Option<RunEvent>, JitError> {
        if self.jumps.entry(index).is_none() {
            return Err(JitError::InternalInvariant("unknown jump-table index"));
        }
        if self.jumps.host_target(index).is_none() {
            if let Some(pc) = self.jumps.resolve_pending(&mut self.cache, &mut self.stats)? {
                return Ok(Some(self.halt(HaltReason::JumpTargetOutOfRange { pc })));
            }
        }
        let target = self
            .jumps
            .host_target(index)
            .ok_or(JitError::InternalInvariant("jump entry unresolved after sweep"))?;
        if let Some(region) = self.cache.find_by_host_addr(target) {
            let (start, empty) = {
                let r = self
                    .cache
                    .region(region)
                    .ok_or(JitError::InternalInvariant("jump region vanished"))?;
                (r.start(), !r.has_code())
            };
            if empty {
                self.cache.switch_to(region)?;
                self.guest.pc = start;
                self.translate_block(start)?;
            }
        }
        self.guest.set_resume_address(target);
        Ok(None)
    }

    /// Routes a dispatcher-computed jump (CALL, RET, `JP V0`) to its block,
    /// allocating and translating the destination when needed.
    fn route_jump(&mut self, target: GuestPc) -> Result<Option<RunEvent>, JitError> {
        if target.val() >= self.guest.ram_limit() {
            return Ok(Some(self.halt(HaltReason::JumpTargetOutOfRange { pc: target })));
        }
        let index = self.cache.jump_target_region(target, &mut self.stats)?;
        let (base, empty) = {
            let r = self
                .cache
                .region(index)
                .ok_or(JitError::InternalInvariant("routed region vanished"))?;
            (r.host_base(), !r.has_code())
        };
        if empty {
            self.cache.switch_to(index)?;
            self.guest.pc = target;
            self.translate_block(target)?;
        }
        self.guest.set_resume_address(base);
        Ok(None)
    }

    /// DISPLAY_DRAW: clear or XOR-draw per the raw opcode in param1.
    fn handle_draw(&mut self, opcode: u16) {
        if opcode == 0x00E0 {
            self.guest.clear_display();
        } else {
            let x = ((opcode >> 8) & 0xF) as u8;
            let y = ((opcode >> 4) & 0xF) as u8;
            let n = (opcode & 0xF) as u8;
            let _ = self.guest.draw_sprite(x, y, n);
        }
        self.stats.draws += 1;
    }

    fn halt(&mut self, reason: HaltReason) -> RunEvent {
        debug!(%reason, "guest halted");
        self.halted = Some(reason);
        RunEvent::Halted(reason)
    }
}
