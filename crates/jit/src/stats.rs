//! Recompiler statistics collection and reporting.
//!
//! This module tracks activity counters for the engine. It provides:
//! 1. **Cache:** Region allocations, extensions, invalidations and deferrals.
//! 2. **Jumps:** Recorded entries, refills, conditional records and patches.
//! 3. **Dispatch:** Loop iterations, interrupts by class, translated
//!    instructions and blocks.

use std::fmt;

/// Activity counters for the recompiler engine.
#[derive(Clone, Copy, Debug, Default)]
pub struct JitStats {
    /// Cache regions allocated.
    pub regions_allocated: u64,
    /// Cache regions released by the invalidation sweep.
    pub regions_invalidated: u64,
    /// Invalidations deferred because the resume address was inside the region.
    pub invalidations_deferred: u64,
    /// Writable lookups satisfied by extending an existing region.
    pub regions_extended: u64,

    /// Unconditional-jump entries recorded.
    pub jumps_recorded: u64,
    /// Jump-table refills performed by the resolve sweep.
    pub jumps_refilled: u64,
    /// Conditional-jump entries recorded.
    pub cond_jumps_recorded: u64,
    /// Conditional-jump displacement patches applied.
    pub cond_jumps_patched: u64,

    /// Dispatch-loop iterations.
    pub dispatch_iterations: u64,
    /// Guest instructions translated.
    pub instructions_translated: u64,
    /// Basic blocks translated.
    pub blocks_translated: u64,
    /// Timer ticks serviced.
    pub timer_ticks: u64,
    /// Display interrupts serviced.
    pub draws: u64,
}

impl fmt::Display for JitStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "cache:")?;
        writeln!(f, "  regions allocated      {:>10}", self.regions_allocated)?;
        writeln!(f, "  regions extended       {:>10}", self.regions_extended)?;
        writeln!(f, "  regions invalidated    {:>10}", self.regions_invalidated)?;
        writeln!(f, "  sweeps deferred        {:>10}", self.invalidations_deferred)?;
        writeln!(f, "jumps:")?;
        writeln!(f, "  entries recorded       {:>10}", self.jumps_recorded)?;
        writeln!(f, "  entries refilled       {:>10}", self.jumps_refilled)?;
        writeln!(f, "  conditionals recorded  {:>10}", self.cond_jumps_recorded)?;
        writeln!(f, "  conditionals patched   {:>10}", self.cond_jumps_patched)?;
        writeln!(f, "dispatch:")?;
        writeln!(f, "  iterations             {:>10}", self.dispatch_iterations)?;
        writeln!(f, "  blocks translated      {:>10}", self.blocks_translated)?;
        writeln!(
            f,
            "  instructions translated{:>10}",
            self.instructions_translated
        )?;
        writeln!(f, "  timer ticks            {:>10}", self.timer_ticks)?;
        write!(f, "  draws                  {:>10}", self.draws)
    }
}
