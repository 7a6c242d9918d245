// Copyright (c) 2024 Leela Aurelia, git@elia.garden
//
// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL-2.0) or the
// GNU General Public License Version 3 (GPL-3).
// If a copy of these licenses was not distributed with this file, you can
// obtain them at https://mozilla.org/MPL/2.0/ and http://www.gnu.org/licenses/.

//! The Context Wave State Restore record: an opaque per-wave snapshot the
//! trap handler writes to global memory, locating architected registers,
//! LDS, scratch, and the TTMP privilege bit.

/// A wave's current CWSR snapshot. Replaced wholesale on each queue
/// suspension of a running wave; a stopped wave keeps the same
/// record (only its address-independent fields may shift, handled via
/// `RegisterCache::relocate`).
#[derive(Clone, Copy, Debug)]
pub struct CwsrRecord {
    /// Base address of the record in global memory.
    base: u64,
    /// Whether the trap handler marked this context privileged; gates TTMP
    /// visibility to the client.
    is_priv: bool,
    /// Size in bytes of this wave's LDS allocation.
    lds_size: usize,
    /// Base address of this wave's private (scratch) memory.
    scratch_base: u64,
    /// Size in bytes of this wave's private memory.
    scratch_size: usize,
}

impl CwsrRecord {
    pub fn new(base: u64, is_priv: bool, lds_size: usize, scratch_base: u64, scratch_size: usize) -> Self {
        Self {
            base,
            is_priv,
            lds_size,
            scratch_base,
            scratch_size,
        }
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn is_priv(&self) -> bool {
        self.is_priv
    }

    pub fn lds_size(&self) -> usize {
        self.lds_size
    }

    pub fn scratch_base(&self) -> u64 {
        self.scratch_base
    }

    pub fn scratch_size(&self) -> usize {
        self.scratch_size
    }
}
