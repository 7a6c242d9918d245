// Copyright (c) 2024 Leela Aurelia, git@elia.garden
//
// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL-2.0) or the
// GNU General Public License Version 3 (GPL-3).
// If a copy of these licenses was not distributed with this file, you can
// obtain them at https://mozilla.org/MPL/2.0/ and http://www.gnu.org/licenses/.

//! Write-back cache over the `[first_hwreg .. last_ttmp]` window of a
//! wave's CWSR record.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::process::ProcessContext;

static NEXT_CACHE_ID: AtomicU64 = AtomicU64::new(1);

/// Flush policy. Every wave's cache is `WriteBack`; `Uncached` exists for
/// completeness and for tests exercising the "serve outside the window
/// directly" path without needing a populated buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CachePolicy {
    Uncached,
    WriteBack,
}

/// A contiguous `[base, base+len)` byte window, cached with write-back
/// semantics.
pub struct RegisterCache {
    id: u64,
    base: u64,
    len: usize,
    buffer: Vec<u8>,
    /// Whether `buffer` currently reflects global memory. Cleared by
    /// `reset`; read/write lazily repopulate it.
    populated: bool,
    dirty: bool,
    policy: CachePolicy,
}

impl RegisterCache {
    pub fn new(base: u64, len: usize) -> Self {
        Self {
            id: NEXT_CACHE_ID.fetch_add(1, Ordering::Relaxed),
            base,
            len,
            buffer: vec![0; len],
            populated: false,
            dirty: false,
            policy: CachePolicy::WriteBack,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn policy(&self) -> CachePolicy {
        self.policy
    }

    pub fn dirty(&self) -> bool {
        self.dirty
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    /// Does this cache's window enclose `[addr, addr+len)`?
    pub fn contains(&self, addr: u64, len: usize) -> bool {
        addr >= self.base
            && len as u64 <= self.len as u64
            && addr - self.base <= self.len as u64 - len as u64
    }

    fn ensure_populated(&mut self, process: &mut dyn ProcessContext) {
        if self.populated {
            return;
        }
        process.read_global_memory(self.base, &mut self.buffer).unwrap_or_else(|e| {
            log::error!(
                "register cache {}: initial fetch at {:#x} failed: {e}",
                self.id,
                self.base
            );
            panic!("register cache fetch failed: driver corruption");
        });
        self.populated = true;
    }

    /// Byte-range read. Fatal on underlying I/O failure.
    pub fn read(&mut self, process: &mut dyn ProcessContext, addr: u64, dst: &mut [u8]) {
        debug_assert!(self.contains(addr, dst.len()));
        self.ensure_populated(process);
        let off = (addr - self.base) as usize;
        dst.copy_from_slice(&self.buffer[off..off + dst.len()]);
    }

    /// Byte-range write; marks the cache dirty so the owning queue flushes
    /// it on resume.
    pub fn write(&mut self, process: &mut dyn ProcessContext, addr: u64, src: &[u8]) {
        debug_assert!(self.contains(addr, src.len()));
        self.ensure_populated(process);
        let off = (addr - self.base) as usize;
        self.buffer[off..off + src.len()].copy_from_slice(src);
        self.dirty = true;
        log::debug!("register cache {}: write at {:#x} ({} bytes), now dirty", self.id, addr, src.len());
    }

    /// Discard contents and adopt a new window; the next read re-fetches
    /// lazily.
    pub fn reset(&mut self, new_base: u64, new_len: usize) {
        self.base = new_base;
        self.len = new_len;
        self.buffer = vec![0; new_len];
        self.populated = false;
        self.dirty = false;
    }

    /// Shift the window without invalidating contents: used when a stopped
    /// wave's CWSR moved but its cached values are still authoritative.
    pub fn relocate(&mut self, new_base: u64) {
        self.base = new_base;
    }

    /// Write dirty bytes back to global memory at their original addresses.
    /// Fatal on failure. `verbose` gates a per-flush debug log line, for
    /// hosts that find one log entry per queue-resume too noisy by default.
    pub fn flush(&mut self, process: &mut dyn ProcessContext, verbose: bool) {
        if !self.dirty {
            return;
        }
        process.write_global_memory(self.base, &self.buffer).unwrap_or_else(|e| {
            log::error!("register cache {}: flush at {:#x} failed: {e}", self.id, self.base);
            panic!("register cache flush failed: driver corruption");
        });
        self.dirty = false;
        if verbose {
            log::debug!("register cache {}: flushed {} bytes at {:#x}", self.id, self.len, self.base);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeProcess;

    #[test]
    fn contains_checks_window_bounds() {
        let cache = RegisterCache::new(0x100, 0x40);
        assert!(cache.contains(0x100, 4));
        assert!(cache.contains(0x13c, 4));
        assert!(!cache.contains(0x13d, 4));
        assert!(!cache.contains(0xf0, 4));
    }

    #[test]
    fn write_then_read_round_trips_before_flush() {
        let mut process = FakeProcess::new();
        let mut cache = RegisterCache::new(0x1000, 0x10);
        cache.write(&mut process, 0x1004, &[1, 2, 3, 4]);
        assert!(cache.dirty());
        let mut out = [0u8; 4];
        cache.read(&mut process, 0x1004, &mut out);
        assert_eq!(out, [1, 2, 3, 4]);
    }

    #[test]
    fn flush_writes_back_and_clears_dirty() {
        let mut process = FakeProcess::new();
        let mut cache = RegisterCache::new(0x2000, 0x10);
        cache.write(&mut process, 0x2000, &[9, 9, 9, 9]);
        cache.flush(&mut process, false);
        assert!(!cache.dirty());
        let mut out = [0u8; 4];
        process.read_global_memory(0x2000, &mut out).unwrap();
        assert_eq!(out, [9, 9, 9, 9]);
    }

    #[test]
    fn reset_invalidates_contents() {
        let mut process = FakeProcess::new();
        let mut cache = RegisterCache::new(0x3000, 0x10);
        cache.write(&mut process, 0x3000, &[1, 1, 1, 1]);
        cache.reset(0x4000, 0x10);
        assert!(!cache.dirty());
        assert_eq!(cache.base(), 0x4000);
    }

    #[test]
    fn relocate_keeps_contents() {
        let mut process = FakeProcess::new();
        let mut cache = RegisterCache::new(0x5000, 0x10);
        cache.write(&mut process, 0x5000, &[7, 7, 7, 7]);
        cache.relocate(0x6000);
        let mut out = [0u8; 4];
        cache.read(&mut process, 0x6000, &mut out);
        assert_eq!(out, [7, 7, 7, 7]);
    }
}
