//! Error types for the recompiler core.
//!
//! All intra-core failures are reported through [`JitError`]; the dispatcher
//! is the single point of policy. Guest-visible terminations (illegal opcode,
//! unresolvable jump target, call-stack exhaustion) are not errors of the
//! core — they surface as [`crate::engine::HaltReason`] values from the
//! dispatch loop.

use thiserror::Error;

/// Failures inside the recompiler core.
#[derive(Debug, Error)]
pub enum JitError {
    /// The host refused to map a page.
    ///
    /// A JIT without executable memory has no degraded mode; callers are
    /// expected to abort on this error.
    #[error("host page allocation of {size} bytes failed (errno {errno})")]
    PageAlloc {
        /// Requested mapping size in bytes.
        size: usize,
        /// `errno` reported by `mmap`.
        errno: i32,
    },

    /// A host address does not fit the 32-bit immediates emitted code uses.
    #[error("host address {addr:#x} does not fit in an IA-32 immediate")]
    HostAddressRange {
        /// The offending host address.
        addr: usize,
    },

    /// The jump table's fixed-capacity indirect-target pool is exhausted.
    #[error("jump table full ({capacity} entries)")]
    JumpTableFull {
        /// Number of entries the pool was sized for.
        capacity: usize,
    },

    /// An operation required a selected cache region but none was selected.
    #[error("no cache region selected")]
    NoSelectedRegion,

    /// An internal bookkeeping invariant was violated.
    ///
    /// Observing this means a table referred to a region that no longer
    /// exists (or similar); by construction it cannot happen in steady state
    /// and is treated as fatal.
    #[error("internal invariant violated: {0}")]
    InternalInvariant(&'static str),

    /// Translated code exists but this host cannot execute IA-32 code.
    #[error("translated code requires an x86 (32-bit) host")]
    UnsupportedHost,

    /// The ROM image does not fit in guest RAM above the load address.
    #[error("ROM of {size} bytes exceeds the {capacity} bytes of guest program RAM")]
    RomTooLarge {
        /// ROM size in bytes.
        size: usize,
        /// Guest RAM available for program bytes.
        capacity: usize,
    },
}
