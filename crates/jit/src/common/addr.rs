//! Guest and host address types.
//!
//! This module defines strong types for CHIP-8 program counters and the
//! narrowing of host pointers to the 32-bit immediates embedded in emitted
//! IA-32 code. It provides:
//! 1. **Type Safety:** Guest PCs cannot be confused with host offsets.
//! 2. **Alignment:** The 2-byte instruction-grid parity used by the cache.
//! 3. **Host Narrowing:** Checked conversion of host pointers to `u32`.

use crate::common::error::JitError;

/// Size of one CHIP-8 instruction in guest memory.
pub const INSTRUCTION_BYTES: u16 = 2;

/// A CHIP-8 program counter.
///
/// Guest PCs address 4 KiB of guest RAM and advance in 2-byte steps, but a
/// program may branch to an odd address; the cache distinguishes translations
/// by the PC's parity (its [`alignment`](Self::alignment)).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GuestPc(pub u16);

impl GuestPc {
    /// Creates a new guest PC from a raw 16-bit value.
    #[inline(always)]
    pub const fn new(pc: u16) -> Self {
        Self(pc)
    }

    /// Returns the raw 16-bit program counter value.
    #[inline(always)]
    pub const fn val(self) -> u16 {
        self.0
    }

    /// Parity of this PC relative to the 2-byte instruction grid.
    ///
    /// Translations whose start PCs differ in parity decode different byte
    /// streams and never alias, even when their PC ranges overlap.
    #[inline(always)]
    pub const fn alignment(self) -> u8 {
        (self.0 & 1) as u8
    }

    /// The PC of the next instruction slot.
    #[inline(always)]
    pub const fn next(self) -> Self {
        Self(self.0.wrapping_add(INSTRUCTION_BYTES))
    }

    /// The PC of the previous instruction slot.
    #[inline(always)]
    pub const fn prev(self) -> Self {
        Self(self.0.wrapping_sub(INSTRUCTION_BYTES))
    }
}

impl core::fmt::Display for GuestPc {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

/// Narrows a host address to the 32-bit immediate form used by emitted code.
///
/// Emitted IA-32 instructions address host memory through absolute 32-bit
/// displacements, so every page the generated code touches must live in the
/// low 4 GiB. Pages are mapped low (see [`crate::mem::HostPage`]); a host
/// address that still does not fit is reported as
/// [`JitError::HostAddressRange`].
#[inline]
pub fn narrow_host(addr: usize) -> Result<u32, JitError> {
    u32::try_from(addr).map_err(|_| JitError::HostAddressRange { addr })
}

/// Narrows a host pointer to the 32-bit immediate form used by emitted code.
#[inline]
pub fn narrow_host_ptr(ptr: *const u8) -> Result<u32, JitError> {
    narrow_host(ptr as usize)
}
