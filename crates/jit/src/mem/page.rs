//! Host page allocation.
//!
//! This module provides a safe wrapper around raw `mmap` allocation for the
//! pages the recompiler hands out: executable cache regions, the trampoline,
//! the jump-target pool, and the guest state page. Pages are mapped in the
//! low 4 GiB of the host address space where the platform allows it, so that
//! their addresses fit the absolute 32-bit displacements emitted IA-32 code
//! addresses them with.

use std::slice;

use crate::common::{JitError, narrow_host_ptr};

/// One host memory mapping with a fixed size and protection.
///
/// The mapping is anonymous and private; it is released back to the host on
/// drop. Cache regions, the trampoline, the indirect-jump pool and the guest
/// state page each uniquely own one of these.
pub struct HostPage {
    ptr: *mut u8,
    len: usize,
}

impl HostPage {
    /// Maps a read/write page (guest state, jump-target words).
    pub fn data(len: usize) -> Result<Self, JitError> {
        Self::map(len, libc::PROT_READ | libc::PROT_WRITE)
    }

    /// Maps a read/write/execute page (cache regions, trampoline, thunks).
    pub fn executable(len: usize) -> Result<Self, JitError> {
        Self::map(len, libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC)
    }

    fn map(len: usize, prot: i32) -> Result<Self, JitError> {
        // MAP_32BIT keeps the mapping below 4 GiB on x86-64 hosts, where the
        // bookkeeping (and its tests) run even though only a 32-bit host can
        // enter the generated code. A 32-bit host is low-mapped by nature.
        #[cfg(all(target_os = "linux", target_arch = "x86_64"))]
        let low = libc::MAP_32BIT;
        #[cfg(not(all(target_os = "linux", target_arch = "x86_64")))]
        let low = 0;

        // SAFETY: anonymous private mapping with no requested address; the
        // kernel picks a region that aliases nothing we own.
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                prot,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | low,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(JitError::PageAlloc {
                size: len,
                errno: std::io::Error::last_os_error().raw_os_error().unwrap_or(0),
            });
        }
        Ok(Self {
            ptr: ptr.cast::<u8>(),
            len,
        })
    }

    /// Returns the size of the mapping in bytes.
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the mapping is zero-sized (it never is).
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns a raw pointer to the mapping.
    pub const fn as_ptr(&self) -> *const u8 {
        self.ptr
    }

    /// Returns a mutable raw pointer to the mapping.
    pub const fn as_mut_ptr(&self) -> *mut u8 {
        self.ptr
    }

    /// The base address as the 32-bit immediate emitted code embeds.
    pub fn base_u32(&self) -> Result<u32, JitError> {
        narrow_host_ptr(self.ptr)
    }

    /// Whether `addr` falls inside this mapping.
    pub fn contains(&self, addr: usize) -> bool {
        let base = self.ptr as usize;
        addr >= base && addr < base + self.len
    }

    /// Fills the whole mapping with one byte value.
    pub fn fill(&mut self, value: u8) {
        // SAFETY: ptr..ptr+len is owned by this mapping.
        unsafe {
            std::ptr::write_bytes(self.ptr, value, self.len);
        }
    }

    /// Reads a single byte.
    pub fn read_u8(&self, offset: usize) -> u8 {
        assert!(offset < self.len, "page read out of bounds");
        // SAFETY: bounds asserted above.
        unsafe { *self.ptr.add(offset) }
    }

    /// Writes a single byte.
    pub fn write_u8(&mut self, offset: usize, value: u8) {
        assert!(offset < self.len, "page write out of bounds");
        // SAFETY: bounds asserted above.
        unsafe {
            *self.ptr.add(offset) = value;
        }
    }

    /// Writes a little-endian 32-bit word.
    pub fn write_u32(&mut self, offset: usize, value: u32) {
        assert!(offset + 4 <= self.len, "page write out of bounds");
        // SAFETY: bounds asserted above; unaligned stores are fine on x86.
        unsafe {
            self.ptr
                .add(offset)
                .cast::<u32>()
                .write_unaligned(value.to_le());
        }
    }

    /// Reads a little-endian 32-bit word.
    pub fn read_u32(&self, offset: usize) -> u32 {
        assert!(offset + 4 <= self.len, "page read out of bounds");
        // SAFETY: bounds asserted above.
        unsafe { u32::from_le(self.ptr.add(offset).cast::<u32>().read_unaligned()) }
    }

    /// Copies a byte slice into the mapping.
    pub fn write_bytes(&mut self, offset: usize, data: &[u8]) {
        assert!(offset + data.len() <= self.len, "page write out of bounds");
        // SAFETY: bounds asserted above; `data` cannot alias an anonymous mapping.
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), self.ptr.add(offset), data.len());
        }
    }

    /// Borrows a range of the mapping as a byte slice.
    pub fn bytes(&self, offset: usize, len: usize) -> &[u8] {
        assert!(offset + len <= self.len, "page read out of bounds");
        // SAFETY: bounds asserted above; lifetime tied to &self.
        unsafe { slice::from_raw_parts(self.ptr.add(offset), len) }
    }
}

impl Drop for HostPage {
    fn drop(&mut self) {
        // SAFETY: ptr/len describe exactly the mapping created in `map`.
        unsafe {
            let _ = libc::munmap(self.ptr.cast(), self.len);
        }
    }
}

impl core::fmt::Debug for HostPage {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HostPage")
            .field("base", &self.ptr)
            .field("len", &self.len)
            .finish()
    }
}
