//! Per-opcode emission.
//!
//! Register and timer traffic is emitted as straight-line IA-32 using
//! absolute addressing into the state page. Control transfers leave through
//! the jump table (`JP addr`) or dispatcher stubs (`CALL`, `RET`, `JP V0`);
//! short forward skips become `Jcc rel32` with the displacement owed to the
//! countdown queue. Draw, key-wait and RAM-store instructions yield so the
//! dispatcher can service the display, block on input, or invalidate
//! overwritten translations.

use crate::abi::InterruptStatus;
use crate::backend::x86::Cond;
use crate::backend::{CodeBackend, CodeSink, x86};
use crate::common::{GuestPc, JitError};
use crate::dynarec::OpOutcome;
use crate::engine::JitEngine;

impl<B: CodeBackend + Clone> JitEngine<B> {
    /// Emits the translation of one guest instruction.
    pub(crate) fn emit_opcode(
        &mut self,
        pc: GuestPc,
        opcode: u16,
    ) -> Result<OpOutcome, JitError> {
        let x = ((opcode >> 8) & 0xF) as u8;
        let y = ((opcode >> 4) & 0xF) as u8;
        let n = (opcode & 0xF) as u8;
        let nn = (opcode & 0xFF) as u8;
        let nnn = opcode & 0x0FFF;

        match opcode >> 12 {
            0x0 => match opcode {
                // CLS
                0x00E0 => {
                    self.emit_yield_stub(InterruptStatus::DisplayDraw, Some(u32::from(opcode)))?;
                    Ok(OpOutcome::Continue)
                }
                // RET
                0x00EE => {
                    self.emit_exit_stub(InterruptStatus::PrepareForReturn, None, None)?;
                    Ok(OpOutcome::BlockEnd)
                }
                // 0NNN machine-code calls are not supported
                _ => {
                    self.emit_unknown(pc)?;
                    Ok(OpOutcome::BlockEnd)
                }
            },
            // JP addr — memory-indirect through the jump table, so a
            // re-translated target updates one word and every jump site
            // follows it unchanged
            0x1 => {
                let index =
                    self.jumps
                        .get_or_create(GuestPc::new(nnn), &self.backend, &mut self.stats)?;
                let word = self.jumps.word_addr(index)?;
                self.backend.emit_indirect_jump(&mut self.cache, word)?;
                Ok(OpOutcome::BlockEnd)
            }
            // CALL addr
            0x2 => {
                self.emit_exit_stub(
                    InterruptStatus::PrepareForStackJump,
                    Some(u32::from(nnn)),
                    Some(u32::from(pc.next().val())),
                )?;
                Ok(OpOutcome::BlockEnd)
            }
            // SE Vx, nn
            0x3 => {
                x86::cmp_mem8_imm8(&mut self.cache, self.guest.v_addr(x), nn)?;
                self.emit_skip(pc, Cond::Equal)?;
                Ok(OpOutcome::Continue)
            }
            // SNE Vx, nn
            0x4 => {
                x86::cmp_mem8_imm8(&mut self.cache, self.guest.v_addr(x), nn)?;
                self.emit_skip(pc, Cond::NotEqual)?;
                Ok(OpOutcome::Continue)
            }
            // SE Vx, Vy
            0x5 if n == 0 => {
                x86::mov_al_from_mem(&mut self.cache, self.guest.v_addr(x))?;
                x86::cmp_al_mem8(&mut self.cache, self.guest.v_addr(y))?;
                self.emit_skip(pc, Cond::Equal)?;
                Ok(OpOutcome::Continue)
            }
            // LD Vx, nn
            0x6 => {
                x86::mov_mem8_imm8(&mut self.cache, self.guest.v_addr(x), nn)?;
                Ok(OpOutcome::Continue)
            }
            // ADD Vx, nn (no carry flag)
            0x7 => {
                x86::add_mem8_imm8(&mut self.cache, self.guest.v_addr(x), nn)?;
                Ok(OpOutcome::Continue)
            }
            0x8 => self.emit_alu(pc, x, y, n),
            // SNE Vx, Vy
            0x9 if n == 0 => {
                x86::mov_al_from_mem(&mut self.cache, self.guest.v_addr(x))?;
                x86::cmp_al_mem8(&mut self.cache, self.guest.v_addr(y))?;
                self.emit_skip(pc, Cond::NotEqual)?;
                Ok(OpOutcome::Continue)
            }
            // LD I, addr
            0xA => {
                x86::mov_mem16_imm16(&mut self.cache, self.guest.index_addr(), nnn)?;
                Ok(OpOutcome::Continue)
            }
            // JP V0, addr — target computed by the dispatcher
            0xB => {
                self.emit_exit_stub(
                    InterruptStatus::PrepareForIndirectJump,
                    Some(u32::from(nnn)),
                    None,
                )?;
                Ok(OpOutcome::BlockEnd)
            }
            // RND Vx, nn — time-stamp counter low bits, masked
            0xC => {
                x86::rdtsc(&mut self.cache)?;
                x86::and_al_imm8(&mut self.cache, nn)?;
                x86::mov_mem_from_al(&mut self.cache, self.guest.v_addr(x))?;
                Ok(OpOutcome::Continue)
            }
            // DRW Vx, Vy, n — serviced by the dispatcher
            0xD => {
                self.emit_yield_stub(InterruptStatus::DisplayDraw, Some(u32::from(opcode)))?;
                Ok(OpOutcome::Continue)
            }
            0xE => match nn {
                // SKP Vx / SKNP Vx
                0x9E | 0xA1 => {
                    x86::movzx_eax_mem8(&mut self.cache, self.guest.v_addr(x))?;
                    x86::cmp_eax_disp_imm8(&mut self.cache, self.guest.keypad_addr(), 0)?;
                    let cond = if nn == 0x9E {
                        Cond::NotEqual // key held: keypad octet is nonzero
                    } else {
                        Cond::Equal
                    };
                    self.emit_skip(pc, cond)?;
                    Ok(OpOutcome::Continue)
                }
                _ => {
                    self.emit_unknown(pc)?;
                    Ok(OpOutcome::BlockEnd)
                }
            },
            0xF => self.emit_fx(pc, x, nn),
            _ => {
                self.emit_unknown(pc)?;
                Ok(OpOutcome::BlockEnd)
            }
        }
    }

    /// `8xyN` register-to-register ALU group.
    fn emit_alu(&mut self, pc: GuestPc, x: u8, y: u8, n: u8) -> Result<OpOutcome, JitError> {
        let vx = self.guest.v_addr(x);
        let vy = self.guest.v_addr(y);
        let vf = self.guest.v_addr(0xF);
        match n {
            // LD Vx, Vy
            0x0 => {
                x86::mov_al_from_mem(&mut self.cache, vy)?;
                x86::mov_mem_from_al(&mut self.cache, vx)?;
            }
            // OR Vx, Vy
            0x1 => {
                x86::mov_al_from_mem(&mut self.cache, vy)?;
                x86::or_mem8_al(&mut self.cache, vx)?;
            }
            // AND Vx, Vy
            0x2 => {
                x86::mov_al_from_mem(&mut self.cache, vy)?;
                x86::and_mem8_al(&mut self.cache, vx)?;
            }
            // XOR Vx, Vy
            0x3 => {
                x86::mov_al_from_mem(&mut self.cache, vy)?;
                x86::xor_mem8_al(&mut self.cache, vx)?;
            }
            // ADD Vx, Vy — VF = carry
            0x4 => {
                x86::mov_al_from_mem(&mut self.cache, vy)?;
                x86::add_mem8_al(&mut self.cache, vx)?;
                x86::setc_mem8(&mut self.cache, vf)?;
            }
            // SUB Vx, Vy — VF = NOT borrow
            0x5 => {
                x86::mov_al_from_mem(&mut self.cache, vy)?;
                x86::sub_mem8_al(&mut self.cache, vx)?;
                x86::setnc_mem8(&mut self.cache, vf)?;
            }
            // SHR Vx — VF = shifted-out bit
            0x6 => {
                x86::mov_al_from_mem(&mut self.cache, vx)?;
                x86::shr_al_1(&mut self.cache)?;
                x86::mov_mem_from_al(&mut self.cache, vx)?;
                x86::setc_mem8(&mut self.cache, vf)?;
            }
            // SUBN Vx, Vy — Vx = Vy - Vx, VF = NOT borrow
            0x7 => {
                x86::mov_al_from_mem(&mut self.cache, vy)?;
                x86::sub_al_mem8(&mut self.cache, vx)?;
                x86::mov_mem_from_al(&mut self.cache, vx)?;
                x86::setnc_mem8(&mut self.cache, vf)?;
            }
            // SHL Vx — VF = shifted-out bit
            0xE => {
                x86::mov_al_from_mem(&mut self.cache, vx)?;
                x86::shl_al_1(&mut self.cache)?;
                x86::mov_mem_from_al(&mut self.cache, vx)?;
                x86::setc_mem8(&mut self.cache, vf)?;
            }
            _ => {
                self.emit_unknown(pc)?;
                return Ok(OpOutcome::BlockEnd);
            }
        }
        Ok(OpOutcome::Continue)
    }

    /// `Fxnn` group: timers, index register, BCD, register dump/load.
    fn emit_fx(&mut self, pc: GuestPc, x: u8, nn: u8) -> Result<OpOutcome, JitError> {
        let vx = self.guest.v_addr(x);
        let ram = self.guest.ram_addr();
        match nn {
            // LD Vx, DT
            0x07 => {
                x86::mov_al_from_mem(&mut self.cache, self.guest.delay_addr())?;
                x86::mov_mem_from_al(&mut self.cache, vx)?;
            }
            // LD Vx, K — block until a key event
            0x0A => {
                self.emit_yield_stub(InterruptStatus::WaitForKeypress, Some(u32::from(x)))?;
            }
            // LD DT, Vx
            0x15 => {
                x86::mov_al_from_mem(&mut self.cache, vx)?;
                x86::mov_mem_from_al(&mut self.cache, self.guest.delay_addr())?;
            }
            // LD ST, Vx
            0x18 => {
                x86::mov_al_from_mem(&mut self.cache, vx)?;
                x86::mov_mem_from_al(&mut self.cache, self.guest.sound_addr())?;
            }
            // ADD I, Vx
            0x1E => {
                x86::movzx_eax_mem8(&mut self.cache, vx)?;
                x86::add_mem16_ax(&mut self.cache, self.guest.index_addr())?;
            }
            // LD F, Vx — I = glyph address (fontset at RAM 0, 5 bytes each)
            0x29 => {
                x86::movzx_eax_mem8(&mut self.cache, vx)?;
                x86::lea_eax_times5(&mut self.cache)?;
                x86::mov_mem_from_ax(&mut self.cache, self.guest.index_addr())?;
            }
            // LD B, Vx — BCD of Vx at [I], [I+1], [I+2]
            0x33 => {
                x86::movzx_ecx_mem16(&mut self.cache, self.guest.index_addr())?;
                x86::mov_al_from_mem(&mut self.cache, vx)?;
                x86::aam(&mut self.cache, 100)?;
                x86::mov_ecx_disp_from_ah(&mut self.cache, ram)?;
                x86::aam(&mut self.cache, 10)?;
                x86::mov_ecx_disp_from_ah(&mut self.cache, ram + 1)?;
                x86::mov_ecx_disp_from_al(&mut self.cache, ram + 2)?;
                self.emit_smc_check()?;
            }
            // LD [I], Vx — dump V0..Vx
            0x55 => {
                x86::movzx_ecx_mem16(&mut self.cache, self.guest.index_addr())?;
                for i in 0..=x {
                    x86::mov_al_from_mem(&mut self.cache, self.guest.v_addr(i))?;
                    x86::mov_ecx_disp_from_al(&mut self.cache, ram + u32::from(i))?;
                }
                self.emit_smc_check()?;
            }
            // LD Vx, [I] — load V0..Vx
            0x65 => {
                x86::movzx_ecx_mem16(&mut self.cache, self.guest.index_addr())?;
                for i in 0..=x {
                    x86::mov_al_from_ecx_disp(&mut self.cache, ram + u32::from(i))?;
                    x86::mov_mem_from_al(&mut self.cache, self.guest.v_addr(i))?;
                }
            }
            _ => {
                self.emit_unknown(pc)?;
                return Ok(OpOutcome::BlockEnd);
            }
        }
        Ok(OpOutcome::Continue)
    }

    /// Emits the `Jcc rel32` of a skip instruction and records its
    /// displacement slot with a two-instruction countdown.
    fn emit_skip(&mut self, pc: GuestPc, cond: Cond) -> Result<(), JitError> {
        x86::jcc_rel32(&mut self.cache, cond)?;
        let slot = self.cache.cursor_addr()?;
        self.cache.emit_u32(0)?;
        let target = GuestPc::new(pc.val().wrapping_add(4));
        self.jumps
            .record_conditional(pc, target, 2, slot, &mut self.stats);
        Ok(())
    }
}
