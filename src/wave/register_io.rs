// Copyright (c) 2024 Leela Aurelia, git@elia.garden
//
// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL-2.0) or the
// GNU General Public License Version 3 (GPL-3).
// If a copy of these licenses was not distributed with this file, you can
// obtain them at https://mozilla.org/MPL/2.0/ and http://www.gnu.org/licenses/.

//! Register read/write, routed through the register cache for architected
//! registers and through the architecture's pseudo-register callbacks for
//! everything else. TTMPs are only visible when the wave's CWSR record was
//! marked privileged.

use super::Wave;
use crate::{architecture::RegisterId, error::Error, error::Result, process::ProcessContext};

impl Wave {
    /// Read `dst.len()` bytes of `reg` starting at byte `offset` within the
    /// register, for `lane_id` (ignored for non-per-lane registers).
    /// `queue_suspended` documents, for the benefit of callers and debug
    /// assertions, that the owning queue has already been suspended by the
    /// time this is called.
    pub fn read_register(
        &mut self,
        process: &mut dyn ProcessContext,
        reg: RegisterId,
        offset: usize,
        lane_id: Option<u32>,
        dst: &mut [u8],
        queue_suspended: bool,
    ) -> Result<()> {
        if self.architecture.is_pseudo_register(reg) {
            if !self.architecture.is_pseudo_register_available(self, reg) {
                return Err(Error::NotAvailable("pseudo register not available"));
            }
            return self.architecture.read_pseudo_register(self, reg, dst);
        }

        self.check_offset_size(reg, offset, dst.len())?;

        if reg.is_ttmp() && !self.ttmp_visible() {
            dst.fill(0);
            return Ok(());
        }

        if reg == self.architecture.pc_register() && self.is_parked {
            let pc = self.parked_pc.expect("is_parked implies parked_pc is set");
            dst.copy_from_slice(&pc.to_le_bytes()[offset..offset + dst.len()]);
            return Ok(());
        }

        if reg.is_vgpr() {
            let lane_id = lane_id.ok_or(Error::InvalidLaneId)?;
            if lane_id >= self.lane_count {
                return Err(Error::InvalidLaneId);
            }
        }

        let resolved = self.resolve_aliasing(reg);
        self.read_register_raw(process, resolved, offset, lane_id.unwrap_or(0), dst.len(), dst, queue_suspended)
    }

    /// Write `src` to `reg` at byte `offset` for `lane_id`. A write to an
    /// out-of-range SGPR is silently dropped; every other out-of-range
    /// register is rejected.
    pub fn write_register(
        &mut self,
        process: &mut dyn ProcessContext,
        reg: RegisterId,
        offset: usize,
        lane_id: Option<u32>,
        src: &[u8],
        queue_suspended: bool,
    ) -> Result<()> {
        if self.architecture.is_pseudo_register(reg) {
            if !self.architecture.is_pseudo_register_available(self, reg) {
                return Err(Error::NotAvailable("pseudo register not available"));
            }
            return self.architecture.write_pseudo_register(self, reg, src);
        }

        self.check_offset_size(reg, offset, src.len())?;

        if reg.is_ttmp() && !self.ttmp_visible() {
            log::debug!("wave {:?}: dropped write to ttmp (not privileged)", self.id);
            return Ok(());
        }

        if reg == self.architecture.pc_register() && self.is_parked {
            let mut bytes = self.parked_pc.unwrap_or(0).to_le_bytes();
            bytes[offset..offset + src.len()].copy_from_slice(src);
            self.parked_pc = Some(u64::from_le_bytes(bytes));
            return Ok(());
        }

        if let RegisterId::Sgpr(n) = reg {
            if n >= self.architecture.sgpr_count() {
                log::debug!("wave {:?}: dropped write to out-of-range sgpr {n}", self.id);
                return Ok(());
            }
        }
        if reg.is_vgpr() {
            let lane_id = lane_id.ok_or(Error::InvalidLaneId)?;
            if lane_id >= self.lane_count {
                return Err(Error::InvalidLaneId);
            }
        }

        let addr = self.register_address(reg, lane_id.unwrap_or(0)) + offset as u64;
        debug_assert!(queue_suspended || self.state == crate::wave::state::WaveState::Stop);
        if Self::is_cached_register(reg) {
            self.register_cache.write(process, addr, src);
            Ok(())
        } else {
            process.write_global_memory(addr, src)
        }
    }

    /// `size == 0` or `offset + size > register_size(reg)` is rejected per
    /// the architected register I/O contract.
    fn check_offset_size(&self, reg: RegisterId, offset: usize, size: usize) -> Result<()> {
        if size == 0 || offset + size > self.architecture.register_size(reg) {
            return Err(Error::InvalidArgumentCompatibility("register offset/size out of range"));
        }
        Ok(())
    }

    /// Only the control/trap window (hwregs, TTMPs, pc, exec) is
    /// write-back cached; SGPRs and VGPRs are read and written directly,
    /// since nothing in this core reads them more than once per stop.
    fn is_cached_register(reg: RegisterId) -> bool {
        matches!(reg, RegisterId::Pc | RegisterId::Exec | RegisterId::Ttmp(_) | RegisterId::Hwreg(_))
    }

    /// TTMPs are only readable/writable when the CWSR record was marked
    /// privileged; otherwise reads return zero and writes are dropped.
    fn ttmp_visible(&self) -> bool {
        self.cwsr_record.map(|r| r.is_priv()).unwrap_or(false)
    }

    /// Out-of-range SGPR reads alias to `s0`; out-of-range VGPR reads alias
    /// to the architecture's designated alias register.
    fn resolve_aliasing(&self, reg: RegisterId) -> RegisterId {
        match reg {
            RegisterId::Sgpr(n) if n >= self.architecture.sgpr_count() => RegisterId::Sgpr(0),
            RegisterId::Vgpr(n) if n >= self.architecture.vgpr_count() => {
                self.architecture.vgpr_alias(self.lane_count)
            }
            other => other,
        }
    }

    fn register_address(&self, reg: RegisterId, lane_id: u32) -> u64 {
        let base = self.cwsr_record.expect("wave must be updated before register access").base();
        let offset = self.architecture.register_address(reg);
        if reg.is_vgpr() {
            base + offset + u64::from(lane_id) * self.architecture.register_size(reg) as u64
        } else {
            base + offset
        }
    }

    pub(crate) fn read_register_raw(
        &mut self,
        process: &mut dyn ProcessContext,
        reg: RegisterId,
        offset: usize,
        lane_id: u32,
        len: usize,
        dst: &mut [u8],
        queue_suspended: bool,
    ) -> Result<()> {
        debug_assert!(queue_suspended || self.state == crate::wave::state::WaveState::Stop);
        let addr = self.register_address(reg, lane_id) + offset as u64;
        if Self::is_cached_register(reg) {
            self.register_cache.read(process, addr, &mut dst[..len]);
            Ok(())
        } else {
            process.read_global_memory(addr, &mut dst[..len])
        }
    }
}
