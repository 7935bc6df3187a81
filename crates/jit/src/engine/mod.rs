//! The recompiler engine.
//!
//! [`JitEngine`] is the single value that owns the three core subsystems —
//! cache manager, jump resolver, trampoline — together with the guest
//! machine and the translator state. Cross-references between subsystems are
//! field accesses, not globals.

/// Dispatch loop and interrupt handling.
pub mod dispatch;

/// Host-calling-convention trampoline.
pub mod trampoline;

use tracing::info;

use crate::backend::{CodeBackend, X86Backend};
use crate::cache::CacheManager;
use crate::common::{GuestPc, JitError};
use crate::config::Config;
use crate::guest::GuestState;
use crate::jump::JumpTable;
use crate::stats::JitStats;

pub use dispatch::{HaltReason, RunEvent};
pub use trampoline::Trampoline;

use crate::abi::InterruptStatus;

/// The dynamic-recompiler engine.
///
/// Owns the guest machine, the translated-code cache, the jump tables and
/// the trampoline. Drive it with [`load_rom`](Self::load_rom) and then
/// [`step`](Self::step) (one dispatch iteration) or [`run`](Self::run).
#[derive(Debug)]
pub struct JitEngine<B: CodeBackend = X86Backend> {
    pub(crate) config: Config,
    pub(crate) backend: B,
    pub(crate) guest: GuestState,
    pub(crate) cache: CacheManager<B>,
    pub(crate) jumps: JumpTable,
    pub(crate) trampoline: Trampoline,
    pub(crate) stats: JitStats,
    /// Destination register of a blocking `LD Vx, K`, while waiting.
    pub(crate) waiting_key: Option<u8>,
    /// Sticky halt state; set once, reported from every later step.
    pub(crate) halted: Option<HaltReason>,
    /// Instructions left until the translator emits the next timer yield.
    pub(crate) timer_countdown: u32,
}

impl JitEngine<X86Backend> {
    /// Creates an engine with the IA-32 backend.
    pub fn new(config: Config) -> Result<Self, JitError> {
        Self::with_backend(config, X86Backend)
    }
}

impl<B: CodeBackend + Clone> JitEngine<B> {
    /// Creates an engine around an explicit backend.
    pub fn with_backend(config: Config, backend: B) -> Result<Self, JitError> {
        let mut guest = GuestState::new(&config.guest)?;
        let abi = guest.abi_addrs();
        let resume_word = guest.state_base() + crate::abi::offsets::RESUME_ADDRESS as u32;
        let trampoline = Trampoline::new(&backend, resume_word)?;
        guest.set_return_label(trampoline.return_label_addr());

        let cache = CacheManager::new(config.cache.clone(), backend.clone(), abi);
        let jumps = JumpTable::new(&config.jumps, abi, guest.ram_limit())?;
        let timer_countdown = config.guest.timer_interval;

        info!(
            state_base = guest.state_base(),
            trampoline = trampoline.entry_addr(),
            "engine initialized"
        );
        Ok(Self {
            config,
            backend,
            guest,
            cache,
            jumps,
            trampoline,
            stats: JitStats::default(),
            waiting_key: None,
            halted: None,
            timer_countdown,
        })
    }

    /// Loads a ROM image and prepares the first cache region at its entry.
    ///
    /// The interrupt word is initialized to OUT_OF_CODE at the entry PC, so
    /// the first dispatch iteration translates the entry block before any
    /// native code runs.
    pub fn load_rom(&mut self, image: &[u8]) -> Result<(), JitError> {
        self.guest.load_rom(image)?;
        let entry = self.guest.rom_base();
        let index = self.cache.alloc(entry, &mut self.stats)?;
        self.cache.switch_to(index)?;
        let base = self
            .cache
            .region(index)
            .ok_or(JitError::InternalInvariant("first region vanished"))?
            .host_base();
        self.guest.set_resume_address(base);
        self.guest
            .set_interrupt_status(InterruptStatus::OutOfCode as u8);
        self.guest.set_param1(u32::from(entry.val()));
        info!(entry = %entry, "ROM loaded");
        Ok(())
    }

    /// Runs dispatch iterations until the guest halts or the host must act.
    ///
    /// Returns on [`RunEvent::Draw`], [`RunEvent::WaitingForKey`] and
    /// [`RunEvent::Halted`]; plain [`RunEvent::Continue`] iterations loop
    /// internally.
    pub fn run(&mut self) -> Result<RunEvent, JitError> {
        loop {
            match self.step()? {
                RunEvent::Continue => {}
                event => return Ok(event),
            }
        }
    }

    /// Translates the block at `pc` without executing anything.
    ///
    /// Goes through the same writable-region selection the dispatcher uses.
    /// The bookkeeping is host-independent, so this also serves hosts that
    /// can only inspect translations.
    pub fn translate_at(&mut self, pc: GuestPc) -> Result<(), JitError> {
        self.translate_more(pc)
    }

    /// Delivers a key press, waking a blocking `LD Vx, K` if one is pending.
    pub fn press_key(&mut self, key: u8) {
        self.guest.set_key(key, true);
        if let Some(x) = self.waiting_key.take() {
            self.guest.set_v(x, key & 0xF);
        }
    }

    /// Delivers a key release.
    pub fn release_key(&mut self, key: u8) {
        self.guest.set_key(key, false);
    }

    /// Decrements the guest timers (for wall-clock-driven hosts).
    pub fn tick_timers(&mut self) {
        self.guest.tick_timers();
    }

    /// Activity counters.
    pub const fn stats(&self) -> &JitStats {
        &self.stats
    }

    /// The guest machine.
    pub const fn guest(&self) -> &GuestState {
        &self.guest
    }

    /// The guest machine, mutably.
    pub fn guest_mut(&mut self) -> &mut GuestState {
        &mut self.guest
    }

    /// The translated-code cache.
    pub const fn cache(&self) -> &CacheManager<B> {
        &self.cache
    }

    /// The jump tables.
    pub const fn jumps(&self) -> &JumpTable {
        &self.jumps
    }

    /// The trampoline.
    pub const fn trampoline(&self) -> &Trampoline {
        &self.trampoline
    }

    /// Why the guest halted, if it has.
    pub fn halt_reason(&self) -> Option<&HaltReason> {
        self.halted.as_ref()
    }

    /// Releases every region and clears all tables.
    ///
    /// Dropping the engine does the same page-by-page; this exists for hosts
    /// that want the final state observable before teardown.
    pub fn shutdown(&mut self) {
        let regions = self.cache.len();
        self.cache.clear();
        self.jumps.clear();
        info!(regions, "engine shut down");
    }
}

/// Translates `pc` to the guest PC stored in an interrupt parameter word.
pub(crate) fn param_pc(param: u32) -> GuestPc {
    GuestPc::new((param & 0xFFFF) as u16)
}
