//! Host-calling-convention trampoline.

use tracing::debug;

use crate::backend::{CodeBackend, TrampolineLayout};
use crate::common::JitError;
use crate::mem::HostPage;

/// The once-allocated prelude/epilogue around block execution.
///
/// Allocated at startup and immutable thereafter; the only mutable part of
/// the entry path is the resume word in the state page, which the prelude's
/// indirect jump reads. The page also carries the instruction-pointer helper
/// the emitter can call for PC-relative calculations.
#[derive(Debug)]
pub struct Trampoline {
    page: HostPage,
    base: u32,
    layout: TrampolineLayout,
}

impl Trampoline {
    /// Allocates and writes the trampoline.
    ///
    /// `resume_word` is the host address of the resume slot the dispatcher
    /// steers execution with.
    pub fn new<B: CodeBackend>(backend: &B, resume_word: u32) -> Result<Self, JitError> {
        let mut page = HostPage::executable(4096)?;
        let base = page.base_u32()?;
        let layout = backend.write_trampoline(&mut page, resume_word);
        debug!(base, ?layout, "trampoline written");
        Ok(Self { page, base, layout })
    }

    /// Host address of the entry point.
    pub const fn entry_addr(&self) -> u32 {
        self.base + self.layout.entry as u32
    }

    /// Host address of the return label tail stubs jump back through.
    pub const fn return_label_addr(&self) -> u32 {
        self.base + self.layout.return_label as u32
    }

    /// Host address of the instruction-pointer helper
    /// (`pop eax; push eax; ret`).
    pub const fn eip_helper_addr(&self) -> u32 {
        self.base + self.layout.eip_helper as u32
    }

    /// The trampoline page bytes, for inspection.
    pub fn bytes(&self) -> &[u8] {
        self.page.bytes(0, self.layout.len)
    }

    /// Transfers control to translated code at the current resume address.
    ///
    /// Only an x86 (32-bit) host can execute the generated IA-32 code; on
    /// any other target this reports [`JitError::UnsupportedHost`] without
    /// touching the page.
    pub fn enter(&self) -> Result<(), JitError> {
        #[cfg(target_arch = "x86")]
        {
            let entry = self.page.as_ptr();
            // SAFETY: the page holds the complete CDECL prelude/epilogue
            // written at construction; translated code preserves the callee-
            // saved registers and returns through the epilogue.
            let exec: extern "C" fn() = unsafe { std::mem::transmute(entry) };
            exec();
            Ok(())
        }
        #[cfg(not(target_arch = "x86"))]
        {
            Err(JitError::UnsupportedHost)
        }
    }
}
