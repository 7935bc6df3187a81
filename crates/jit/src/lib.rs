//! Dynamic-recompiling CHIP-8 emulator core.
//!
//! This crate translates CHIP-8 bytecode into IA-32 machine code on demand,
//! caches the translations, and executes them directly on the host CPU. It
//! consists of:
//! 1. **Cache:** One executable page per translated basic block, with lookup
//!    by guest PC (and instruction-grid parity), deferred invalidation, and
//!    raw emission at a selected region's cursor.
//! 2. **Jumps:** A deferred-patching table routing unconditional jumps
//!    through stable memory-indirect words, plus a cycle-countdown queue
//!    patching short forward branches in place.
//! 3. **Engine:** The CDECL trampoline, the interrupt-status dispatch loop,
//!    and the [`JitEngine`] facade owning all of it.
//! 4. **Guest:** The CHIP-8 machine state, laid out so emitted code reaches
//!    it through absolute 32-bit addressing.
//! 5. **Dynarec:** The CHIP-8 → IA-32 translator driving the core.
//!
//! All bookkeeping is host-independent; actually entering translated code
//! requires an x86 (32-bit) host.

/// Contract between translated code and the dispatcher.
pub mod abi;

/// Code-generation backends (IA-32).
pub mod backend;

/// Translated-code cache.
pub mod cache;

/// Common types (guest PCs, errors).
pub mod common;

/// Engine configuration.
pub mod config;

/// CHIP-8 to IA-32 translation.
pub mod dynarec;

/// Engine facade, dispatch loop and trampoline.
pub mod engine;

/// Guest machine state.
pub mod guest;

/// Jump resolver.
pub mod jump;

/// Raw host memory.
pub mod mem;

/// Activity counters.
pub mod stats;

/// Root configuration type; use `Config::default()` or deserialize from JSON.
pub use crate::config::Config;
/// Engine facade; owns the cache, jump tables, trampoline and guest machine.
pub use crate::engine::JitEngine;
/// Dispatch outcomes the host reacts to.
pub use crate::engine::{HaltReason, RunEvent};
/// Error taxonomy of the core.
pub use crate::common::JitError;
/// Activity counters.
pub use crate::stats::JitStats;
