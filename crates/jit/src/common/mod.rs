//! Common types shared across the recompiler core.
//!
//! This module provides the building blocks the cache, jump and dispatch
//! subsystems agree on:
//! 1. **Address Types:** Guest PCs with instruction-grid parity, and checked
//!    narrowing of host pointers to emitted 32-bit immediates.
//! 2. **Error Handling:** The [`JitError`] taxonomy.

/// Guest and host address types.
pub mod addr;

/// Error types.
pub mod error;

pub use addr::{GuestPc, INSTRUCTION_BYTES, narrow_host, narrow_host_ptr};
pub use error::JitError;
