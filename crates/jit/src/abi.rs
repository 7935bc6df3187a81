//! The contract between translated code and the dispatcher.
//!
//! Translated code and the dispatch loop communicate through a handful of
//! words at fixed offsets inside one low-mapped state page. This module pins
//! that contract down:
//! 1. **Interrupt codes:** Why control left translated code.
//! 2. **State-page layout:** Offsets of the interrupt words, the resume
//!    address, and the guest machine state that emitted code addresses
//!    directly.
//!
//! Ownership is asymmetric: translated code (and initialization) writes the
//! interrupt words, only the dispatcher reads them; only the dispatcher
//! writes the resume address, only the trampoline reads it.

/// Reason translated code handed control back to the dispatcher.
///
/// Written as a single octet at [`offsets::INTERRUPT_STATUS`] by emitted
/// interrupt stubs and by every region's tail stub.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum InterruptStatus {
    /// Normal re-entry; nothing to service.
    NoInterrupt = 0,
    /// The block ran off the end of its translation.
    /// param1 = next guest PC to translate.
    OutOfCode = 1,
    /// An unconditional jump needs its table entry resolved.
    /// param1 = jump-table index.
    PrepareForJump = 2,
    /// The guest wrote into translated code.
    /// param1 = guest address of the write (low 16 bits).
    SelfModifyingCode = 3,
    /// `LD Vx, K` is blocking until a key event arrives.
    /// param1 = destination register index, param2 = host continuation.
    WaitForKeypress = 4,
    /// A draw instruction needs the display serviced.
    /// param1 = the raw opcode, param2 = host continuation.
    DisplayDraw = 5,
    /// Decrement the delay/sound timers.
    /// param2 = host continuation.
    TimerTick = 6,
    /// The translator met an opcode it cannot decode.
    /// param1 = guest PC of the opcode.
    UnknownOpcode = 7,
    /// `CALL addr`: push a return address, then jump.
    /// param1 = target guest PC, param2 = return guest PC to push.
    PrepareForStackJump = 8,
    /// `RET`: pop the return address and jump to it.
    PrepareForReturn = 9,
    /// `JP V0, addr`: target depends on V0 at run time.
    /// param1 = the base address from the opcode.
    PrepareForIndirectJump = 10,
}

impl InterruptStatus {
    /// Decodes a raw status octet.
    pub const fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::NoInterrupt),
            1 => Some(Self::OutOfCode),
            2 => Some(Self::PrepareForJump),
            3 => Some(Self::SelfModifyingCode),
            4 => Some(Self::WaitForKeypress),
            5 => Some(Self::DisplayDraw),
            6 => Some(Self::TimerTick),
            7 => Some(Self::UnknownOpcode),
            8 => Some(Self::PrepareForStackJump),
            9 => Some(Self::PrepareForReturn),
            10 => Some(Self::PrepareForIndirectJump),
            _ => None,
        }
    }
}

/// Byte offsets inside the state page.
///
/// The page is mapped low so that `page_base + offset` fits the absolute
/// 32-bit displacements emitted code addresses these words with. Guest state
/// that only the dispatcher touches (PC, call stack, display) is *not* here;
/// it lives in ordinary [`crate::guest::GuestState`] fields.
pub mod offsets {
    /// Interrupt status octet.
    pub const INTERRUPT_STATUS: usize = 0x000;
    /// First interrupt parameter (u32).
    pub const INTERRUPT_PARAM1: usize = 0x004;
    /// Second interrupt parameter (u32).
    pub const INTERRUPT_PARAM2: usize = 0x008;
    /// Resume address read by the trampoline's indirect jump (u32).
    pub const RESUME_ADDRESS: usize = 0x00C;
    /// Word holding the trampoline epilogue address; every emitted exit is a
    /// `JMP` indirect through this word (u32).
    pub const RETURN_LABEL: usize = 0x010;

    /// General-purpose registers V0..VF (16 bytes).
    pub const V_REGS: usize = 0x020;
    /// Index register I (u16).
    pub const INDEX: usize = 0x030;
    /// Delay timer (u8).
    pub const DELAY_TIMER: usize = 0x034;
    /// Sound timer (u8).
    pub const SOUND_TIMER: usize = 0x035;
    /// Keypad state, one octet per key, nonzero = held (16 bytes).
    pub const KEYPAD: usize = 0x040;
    /// Guest RAM (4096 bytes).
    pub const RAM: usize = 0x100;

    /// Total state-page size.
    pub const STATE_PAGE_BYTES: usize = 0x2000;
}

/// Absolute host addresses of the ABI words, baked into emitted code.
#[derive(Clone, Copy, Debug)]
pub struct AbiAddrs {
    /// Address of the interrupt status octet.
    pub status: u32,
    /// Address of interrupt parameter 1.
    pub param1: u32,
    /// Address of interrupt parameter 2.
    pub param2: u32,
    /// Address of the word holding the trampoline epilogue address.
    pub return_label: u32,
}

impl AbiAddrs {
    /// Derives the ABI word addresses from a state-page base address.
    pub const fn from_state_base(base: u32) -> Self {
        Self {
            status: base + offsets::INTERRUPT_STATUS as u32,
            param1: base + offsets::INTERRUPT_PARAM1 as u32,
            param2: base + offsets::INTERRUPT_PARAM2 as u32,
            return_label: base + offsets::RETURN_LABEL as u32,
        }
    }
}
