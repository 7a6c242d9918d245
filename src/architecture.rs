// Copyright (c) 2024 Leela Aurelia, git@elia.garden
//
// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL-2.0) or the
// GNU General Public License Version 3 (GPL-3).
// If a copy of these licenses was not distributed with this file, you can
// obtain them at https://mozilla.org/MPL/2.0/ and http://www.gnu.org/licenses/.

//! The architecture descriptor: a capability table selected once per wave,
//! not an inheritance hierarchy.
//! A host crate implements [`Architecture`] once per GPU generation; the
//! core never matches on which one it has.

use crate::{
    error::Result,
    handles::WatchpointId,
    wave::{
        state::{Exceptions, StopReason, WaveState},
        Wave,
    },
};

/// Identifies a single architected or pseudo register.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RegisterId {
    Pc,
    Exec,
    Sgpr(u32),
    Vgpr(u32),
    Ttmp(u32),
    Hwreg(u32),
    /// The group leader's `lds_0` register: holds the global-memory base
    /// address of the work group's LDS allocation, consulted by `local`
    /// memory transfers.
    Lds0,
    /// A pseudo-register with no architected storage; always routed through
    /// `read_pseudo_register`/`write_pseudo_register`.
    Pseudo(u32),
}

impl RegisterId {
    pub fn is_ttmp(self) -> bool {
        matches!(self, RegisterId::Ttmp(_))
    }

    pub fn is_sgpr(self) -> bool {
        matches!(self, RegisterId::Sgpr(_))
    }

    pub fn is_vgpr(self) -> bool {
        matches!(self, RegisterId::Vgpr(_))
    }
}

/// The architecture capability table.
///
/// All functions are pure lookups or driver calls that take the wave whose
/// context they act on explicitly, rather than a `self` the core would have
/// to downcast — there is exactly one object of this trait per agent
/// generation, shared by every wave on that agent.
pub trait Architecture: Send + Sync {
    /// Size in bytes of `reg`.
    fn register_size(&self, reg: RegisterId) -> usize;
    /// Address of `reg` within the wave's CWSR record.
    fn register_address(&self, reg: RegisterId) -> u64;
    /// Human-readable register name, for logging.
    fn register_name(&self, reg: RegisterId) -> &'static str;

    /// First hwreg in address order; the register cache window starts here.
    fn first_hwreg(&self) -> RegisterId;
    /// Last TTMP in address order; the register cache window ends after it.
    fn last_ttmp(&self) -> RegisterId;
    /// The architected PC register.
    fn pc_register(&self) -> RegisterId;
    /// The architected EXEC mask register.
    fn exec_register(&self) -> RegisterId;
    /// Number of SGPRs implemented; out-of-range SGPR reads/writes alias to
    /// `s0` (reads) or are dropped (writes).
    fn sgpr_count(&self) -> u32;
    /// Number of VGPRs implemented per lane.
    fn vgpr_count(&self) -> u32;
    /// VGPR register aliased for out-of-range reads: `v0_32`/`v0_64`
    /// depending on lane count.
    fn vgpr_alias(&self, lane_count: u32) -> RegisterId;

    fn is_pseudo_register(&self, reg: RegisterId) -> bool {
        matches!(reg, RegisterId::Pseudo(_))
    }
    fn is_pseudo_register_available(&self, wave: &Wave, reg: RegisterId) -> bool;
    fn read_pseudo_register(&self, wave: &Wave, reg: RegisterId, dst: &mut [u8]) -> Result<()>;
    fn write_pseudo_register(&self, wave: &Wave, reg: RegisterId, src: &[u8]) -> Result<()>;

    /// Largest instruction encoding on this architecture, in bytes.
    fn largest_instruction_size(&self) -> usize;
    /// Bytes of the trap instruction the core writes over a breakpoint site.
    fn breakpoint_instruction(&self) -> &'static [u8];

    /// Whether stopped waves must be parked on this architecture.
    fn park_stopped_waves(&self) -> bool;
    /// Immutable address waves are parked at.
    fn park_instruction_address(&self) -> u64;
    /// Immutable address used to terminate a wave.
    fn terminating_instruction_address(&self) -> u64;
    /// Does `instr` match the hardware's terminating instruction encoding?
    fn is_terminating_instruction(&self, instr: &[u8]) -> bool;

    /// Can `instr` be executed in the host's simulator instead of on
    /// hardware?
    fn can_simulate(&self, instr: &[u8]) -> bool;
    /// Can `instr` be copied to a scratch address and executed there?
    fn can_execute_displaced(&self, instr: &[u8]) -> bool;
    /// Simulate `instr` against `wave`'s CWSR state. Returns whether it
    /// actually ran.
    fn simulate(&self, wave: &Wave, instr: &[u8]) -> Result<bool>;

    /// Allocate scratch memory to hold a displaced instruction, returning
    /// its address.
    fn allocate_instruction_buffer(&self, wave: &Wave, bytes: &[u8]) -> Result<u64>;
    /// Release scratch memory previously returned by
    /// `allocate_instruction_buffer`, symmetric with the allocation call.
    fn free_instruction_buffer(&self, wave: &Wave, addr: u64);

    /// Query the hardware's current run/step/stop state and stop reason.
    fn wave_get_state(&self, wave: &Wave) -> Result<(WaveState, StopReason)>;
    /// Drive the hardware into `state`, optionally injecting `exceptions`.
    fn wave_set_state(&self, wave: &Wave, state: WaveState, exceptions: Exceptions) -> Result<()>;
    /// Set or clear the hardware halt bit directly (used for
    /// `hidden_halted_at_launch`).
    fn wave_set_halt(&self, wave: &Wave, halt: bool) -> Result<()>;
    fn wave_get_halt(&self, wave: &Wave) -> Result<bool>;

    /// Watchpoints currently triggered for `wave`.
    fn triggered_watchpoints(&self, wave: &Wave) -> Vec<WatchpointId>;

    /// Register the core writes the wave's debugger-assigned id into on
    /// first update, if this architecture exposes one to the trap handler.
    /// `None` on architectures where no such register exists.
    fn wave_id_register(&self) -> Option<RegisterId> {
        None
    }
    /// The three TTMPs (or hwregs) holding the work-group id, in order, if
    /// exposed. Read once on first update.
    fn group_id_registers(&self) -> Option<[RegisterId; 3]> {
        None
    }
    /// Register holding the wave's linear index within its work group, if
    /// exposed. Read once on first update.
    fn wave_in_group_register(&self) -> Option<RegisterId> {
        None
    }
}
