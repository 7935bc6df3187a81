//! Jump resolver.
//!
//! Deferred patching for guest control transfers:
//! 1. **Unconditional jumps** go through the [`JumpTable`]: a stable index
//!    per guest target, a low-mapped word per index that emitted code jumps
//!    indirect through, and a refill list drained before execution resumes.
//! 2. **Conditional jumps** are short forward branches patched in place by
//!    the [`conditional::CondQueue`] when their instruction countdown
//!    expires.

/// Cycle-countdown queue for short forward branches.
pub mod conditional;

/// Indirect-target words and re-resolve thunks.
pub mod pool;

/// Unconditional-jump table and refill sweep.
pub mod table;

pub use conditional::{CondJumpEntry, CondQueue};
pub use pool::TargetPool;
pub use table::{JumpEntry, JumpTable};
