//! Configuration for the recompiler.
//!
//! This module defines the configuration structures used to parameterize the
//! engine. It provides:
//! 1. **Defaults:** Baseline constants (region size, table capacity, guest
//!    memory geometry, timer cadence).
//! 2. **Structures:** Hierarchical config for the cache, the jump tables and
//!    the guest machine.
//!
//! Configuration is supplied as JSON (`serde_json`) or via `Config::default()`.

use serde::Deserialize;

/// Default configuration constants for the recompiler.
mod defaults {
    /// Bytes of executable memory per cache region (one translated basic block).
    pub const REGION_BYTES: usize = 4096;

    /// Bytes reserved at the end of every region for the tail stub.
    ///
    /// The stub itself is 23 bytes; the margin keeps the stub clear of the
    /// last emitted instruction.
    pub const TAIL_RESERVED: usize = 32;

    /// Emission headroom kept below the tail reservation.
    ///
    /// The translator stops appending to a region once fewer than this many
    /// bytes remain before the tail reservation, so the longest single
    /// instruction sequence can never collide with the stub.
    pub const EMIT_HEADROOM: usize = 64;

    /// Capacity of the unconditional-jump table.
    ///
    /// Each entry owns one indirect-target word and one re-resolve thunk;
    /// CHIP-8 programs are at most 3.5 KiB of code, so 256 distinct jump
    /// targets is generous.
    pub const JUMP_CAPACITY: usize = 256;

    /// Guest RAM size in bytes.
    pub const GUEST_RAM: usize = 4096;

    /// Guest address programs are loaded at.
    pub const ROM_BASE: u16 = 0x200;

    /// Display width in pixels.
    pub const DISPLAY_WIDTH: usize = 64;

    /// Display height in pixels.
    pub const DISPLAY_HEIGHT: usize = 32;

    /// Translated instructions between emitted timer-tick yields.
    ///
    /// Approximates the 60 Hz timer cadence against the nominal ~500 Hz
    /// CHIP-8 instruction rate.
    pub const TIMER_INTERVAL: u32 = 8;
}

/// Cache-manager parameters.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Bytes of executable memory per region.
    pub region_bytes: usize,
    /// Bytes reserved at the end of each region for the tail stub.
    pub tail_reserved: usize,
    /// Emission headroom kept below the tail reservation.
    pub emit_headroom: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            region_bytes: defaults::REGION_BYTES,
            tail_reserved: defaults::TAIL_RESERVED,
            emit_headroom: defaults::EMIT_HEADROOM,
        }
    }
}

impl CacheConfig {
    /// Offset of the first tail-stub byte inside a region.
    pub const fn tail_offset(&self) -> usize {
        self.region_bytes - crate::backend::TAIL_STUB_BYTES
    }

    /// Last cursor value the translator may still emit at.
    pub const fn emit_ceiling(&self) -> usize {
        self.region_bytes - self.tail_reserved - self.emit_headroom
    }
}

/// Jump-table parameters.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct JumpConfig {
    /// Maximum number of distinct unconditional-jump targets.
    pub capacity: usize,
}

impl Default for JumpConfig {
    fn default() -> Self {
        Self {
            capacity: defaults::JUMP_CAPACITY,
        }
    }
}

/// Guest machine parameters.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct GuestConfig {
    /// Guest RAM size in bytes.
    pub ram_bytes: usize,
    /// Load address for program images.
    pub rom_base: u16,
    /// Display width in pixels.
    pub display_width: usize,
    /// Display height in pixels.
    pub display_height: usize,
    /// Translated instructions between emitted timer-tick yields.
    pub timer_interval: u32,
}

impl Default for GuestConfig {
    fn default() -> Self {
        Self {
            ram_bytes: defaults::GUEST_RAM,
            rom_base: defaults::ROM_BASE,
            display_width: defaults::DISPLAY_WIDTH,
            display_height: defaults::DISPLAY_HEIGHT,
            timer_interval: defaults::TIMER_INTERVAL,
        }
    }
}

/// Root configuration for the engine.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Cache-manager parameters.
    pub cache: CacheConfig,
    /// Jump-table parameters.
    pub jumps: JumpConfig,
    /// Guest machine parameters.
    pub guest: GuestConfig,
}

impl Config {
    /// Parses a configuration from a JSON document.
    ///
    /// Absent fields take their defaults, so a partial override like
    /// `{"cache": {"region_bytes": 8192}}` is a complete document.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}
