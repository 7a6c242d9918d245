// Copyright (c) 2024 Leela Aurelia, git@elia.garden
//
// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL-2.0) or the
// GNU General Public License Version 3 (GPL-3).
// If a copy of these licenses was not distributed with this file, you can
// obtain them at https://mozilla.org/MPL/2.0/ and http://www.gnu.org/licenses/.

//! The per-wave state machine: lifecycle, parking, termination, and the
//! `set_state` resume/stop transition.

pub mod register_io;
pub mod state;

use std::sync::Arc;

use crate::{
    architecture::Architecture,
    components::{cwsr::CwsrRecord, register_cache::RegisterCache},
    config::Config,
    error::{Error, Result},
    events::{Event, EventKind},
    exceptions,
    handles::{AgentId, ArchitectureId, DispatchId, DisplacedSteppingHandle, EventId, ProcessId, QueueId, WaveId},
    process::ProcessContext,
    wave::state::{Exceptions, StopReason, Visibility, WaveState},
};

/// A single GPU wave, context-saved into a CWSR record.
pub struct Wave {
    pub id: WaveId,
    pub dispatch: DispatchId,
    pub queue: QueueId,
    pub agent: AgentId,
    pub process: ProcessId,
    pub architecture_id: ArchitectureId,
    architecture: Arc<dyn Architecture>,

    pub lane_count: u32,
    state: WaveState,
    visibility: Visibility,
    stop_reason: StopReason,
    stop_requested: bool,

    cwsr_record: Option<CwsrRecord>,
    pub group_leader: WaveId,
    register_cache: RegisterCache,

    is_parked: bool,
    parked_pc: Option<u64>,

    group_ids: [u32; 3],
    wave_in_group: u32,
    first_update_done: bool,

    last_stopped_pc: Option<u64>,
    last_stop_event_id: Option<EventId>,

    displaced_stepping: Option<DisplacedSteppingHandle>,
}

impl Wave {
    pub fn new(
        id: WaveId,
        dispatch: DispatchId,
        queue: QueueId,
        agent: AgentId,
        process: ProcessId,
        architecture_id: ArchitectureId,
        architecture: Arc<dyn Architecture>,
        lane_count: u32,
        group_leader: WaveId,
    ) -> Self {
        Self {
            id,
            dispatch,
            queue,
            agent,
            process,
            architecture_id,
            architecture,
            lane_count,
            state: WaveState::Run,
            visibility: Visibility::Visible,
            stop_reason: StopReason::empty(),
            stop_requested: false,
            cwsr_record: None,
            group_leader,
            register_cache: RegisterCache::new(0, 0),
            is_parked: false,
            parked_pc: None,
            group_ids: [0; 3],
            wave_in_group: 0,
            first_update_done: false,
            last_stopped_pc: None,
            last_stop_event_id: None,
            displaced_stepping: None,
        }
    }

    pub fn architecture(&self) -> &Arc<dyn Architecture> {
        &self.architecture
    }

    pub fn state(&self) -> WaveState {
        self.state
    }

    pub fn visibility(&self) -> Visibility {
        self.visibility
    }

    pub fn stop_reason(&self) -> StopReason {
        self.stop_reason
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested
    }

    pub fn is_parked(&self) -> bool {
        self.is_parked
    }

    pub fn last_stopped_pc(&self) -> Option<u64> {
        self.last_stopped_pc
    }

    pub fn last_stop_event_id(&self) -> Option<EventId> {
        self.last_stop_event_id
    }

    pub fn displaced_stepping(&self) -> Option<DisplacedSteppingHandle> {
        self.displaced_stepping
    }

    pub fn cwsr_record(&self) -> Option<&CwsrRecord> {
        self.cwsr_record.as_ref()
    }

    pub fn group_ids(&self) -> [u32; 3] {
        self.group_ids
    }

    pub fn wave_in_group(&self) -> u32 {
        self.wave_in_group
    }

    pub(crate) fn register_cache_mut(&mut self) -> &mut RegisterCache {
        &mut self.register_cache
    }

    /// Flush the register cache if dirty. Called by the queue-resume path
    /// so a wave's writes are visible to hardware before it runs again.
    pub fn flush_register_cache(&mut self, process: &mut dyn ProcessContext, verbose: bool) {
        self.register_cache.flush(process, verbose);
    }

    /// Raises a client-visible event for this wave. Visible to `core`,
    /// which is the only other place that decides a resume-mode transition
    /// warrants one outside the ones `apply_set_state` already covers
    /// (the terminating-single-step short-circuit and the
    /// simulate-then-requery path in `set_state` step 9).
    pub(crate) fn raise_event(&mut self, process: &mut dyn ProcessContext, kind: EventKind) {
        let event = Event::new(EventId::new(0, 0), self.id, kind);
        let id = process.enqueue_event(event);
        self.last_stop_event_id = Some(id);
        log::debug!("wave {:?}: raised {:?} (event {:?})", self.id, kind, id);
    }

    /// First true initialization, or a refresh after a queue suspension.
    pub fn update(
        &mut self,
        group_leader: WaveId,
        cwsr_record: CwsrRecord,
        config: &Config,
        process: &mut dyn ProcessContext,
    ) -> Result<()> {
        let prev_state = self.state;
        let is_first_update = !self.first_update_done;

        if is_first_update {
            self.group_leader = group_leader;
            self.cwsr_record = Some(cwsr_record);
            let base = cwsr_record.base() + self.architecture.register_address(self.architecture.first_hwreg());
            let last = self.architecture.last_ttmp();
            let end = cwsr_record.base()
                + self.architecture.register_address(last)
                + self.architecture.register_size(last) as u64;
            self.register_cache = RegisterCache::new(base, (end - base) as usize);
        } else {
            self.cwsr_record = Some(cwsr_record);
        }

        if prev_state != WaveState::Stop {
            let last = self.architecture.last_ttmp();
            let base = cwsr_record.base() + self.architecture.register_address(self.architecture.first_hwreg());
            let end = cwsr_record.base() + self.architecture.register_address(last) + self.architecture.register_size(last) as u64;
            self.register_cache.reset(base, (end - base) as usize);

            if !config.ttmps_setup_enabled && is_first_update {
                self.zero_init_ttmps(process);
            }

            let (new_state, stop_reason) = self.architecture.wave_get_state(self)?;
            self.state = new_state;
            self.stop_reason = stop_reason;
            self.update_launch_halt_visibility(process)?;
        } else {
            self.register_cache.relocate(cwsr_record.base() + self.architecture.register_address(self.architecture.first_hwreg()));
        }

        let transitioned_to_stop = prev_state != WaveState::Stop && self.state == WaveState::Stop;
        if transitioned_to_stop {
            if self.architecture.park_stopped_waves() {
                self.park(process)?;
            }
            if self.visibility == Visibility::Visible && !self.stop_reason.is_empty() {
                self.raise_event(process, EventKind::WaveStop);
            }
        }

        if is_first_update {
            self.write_wave_id_register(process);
            self.read_group_metadata(process);
        }

        self.first_update_done = true;
        Ok(())
    }

    fn zero_init_ttmps(&mut self, process: &mut dyn ProcessContext) {
        let cwsr_base = self.cwsr_record.expect("cwsr_record set before zero_init_ttmps is called").base();
        let first = cwsr_base + self.architecture.register_address(crate::architecture::RegisterId::Ttmp(0));
        let last = self.architecture.last_ttmp();
        let end = cwsr_base + self.architecture.register_address(last) + self.architecture.register_size(last) as u64;
        let zero = vec![0u8; (end - first) as usize];
        if let Err(e) = process.write_global_memory(first, &zero) {
            log::error!("wave {:?}: failed to zero-initialize TTMPs: {e}", self.id);
        }
        log::debug!("wave {:?}: TTMPs zero-initialized on first update (ttmps_setup_enabled=false)", self.id);
    }

    /// Reconciles `visibility` against the hardware halt bit on a wave that
    /// is running: a wave launched under "halt on launch" starts with its
    /// halt bit set and stays `hidden_halted_at_launch` (state RUN, never
    /// reported to the client) until something external clears that bit, at
    /// which point it becomes a normal visible running wave.
    fn update_launch_halt_visibility(&mut self, _process: &mut dyn ProcessContext) -> Result<()> {
        let architecture = Arc::clone(&self.architecture);
        let halted = architecture.wave_get_halt(self)?;
        match (self.visibility, halted) {
            (Visibility::Visible, true) if self.state == WaveState::Run => {
                self.visibility = Visibility::HiddenHaltedAtLaunch;
                log::debug!("wave {:?}: hidden, halted at launch", self.id);
            }
            (Visibility::HiddenHaltedAtLaunch, false) => {
                self.visibility = Visibility::Visible;
                log::debug!("wave {:?}: launch halt cleared, now visible", self.id);
            }
            _ => {}
        }
        Ok(())
    }

    fn write_wave_id_register(&mut self, process: &mut dyn ProcessContext) {
        let Some(reg) = self.architecture.wave_id_register() else {
            return;
        };
        let size = self.architecture.register_size(reg).min(4);
        let bytes = self.id.index().to_le_bytes();
        if let Err(e) = self.write_register(process, reg, 0, None, &bytes[..size], true) {
            log::error!("wave {:?}: failed to write wave_id register: {e}", self.id);
            return;
        }
        log::trace!("wave {:?}: wave_id register written on first update", self.id);
    }

    /// Reads `group_ids`/`wave_in_group` from the registers the architecture
    /// designates for them, if any; left at their default of zero on
    /// architectures that don't expose this metadata.
    fn read_group_metadata(&mut self, process: &mut dyn ProcessContext) {
        if let Some(regs) = self.architecture.group_id_registers() {
            for (i, reg) in regs.into_iter().enumerate() {
                let size = self.architecture.register_size(reg).min(4);
                let mut buf = [0u8; 4];
                match self.read_register(process, reg, 0, None, &mut buf[..size], true) {
                    Ok(()) => self.group_ids[i] = u32::from_le_bytes(buf),
                    Err(e) => log::error!("wave {:?}: failed to read group_ids[{i}]: {e}", self.id),
                }
            }
        }
        if let Some(reg) = self.architecture.wave_in_group_register() {
            let size = self.architecture.register_size(reg).min(4);
            let mut buf = [0u8; 4];
            match self.read_register(process, reg, 0, None, &mut buf[..size], true) {
                Ok(()) => self.wave_in_group = u32::from_le_bytes(buf),
                Err(e) => log::error!("wave {:?}: failed to read wave_in_group: {e}", self.id),
            }
        }
    }

    /// Park a stopped wave's pc onto an immutable trap instruction so
    /// client reads/writes of pc don't perturb the real pc.
    pub fn park(&mut self, process: &mut dyn ProcessContext) -> Result<()> {
        debug_assert_eq!(self.state, WaveState::Stop, "park() requires state == STOP");
        debug_assert!(!self.is_parked, "park() requires !is_parked");

        let pc = self.pc(process, true)?;
        self.parked_pc = Some(pc);
        self.is_parked = true;
        let addr = self.architecture.park_instruction_address();
        self.write_pc_through_cache(process, addr);
        log::debug!("wave {:?}: parked, real pc {pc:#x} saved", self.id);
        Ok(())
    }

    /// Undo [`park`] on the way out of STOP.
    pub fn unpark(&mut self, process: &mut dyn ProcessContext) -> Result<()> {
        debug_assert_ne!(self.state, WaveState::Stop, "unpark() requires state != STOP");
        debug_assert!(self.is_parked, "unpark() requires is_parked");

        let pc = self.parked_pc.take().expect("parked wave must have parked_pc");
        self.is_parked = false;
        self.write_pc_through_cache(process, pc);
        log::debug!("wave {:?}: unparked, pc restored to {pc:#x}", self.id);
        Ok(())
    }

    fn write_pc_through_cache(&mut self, process: &mut dyn ProcessContext, value: u64) {
        let reg = self.architecture.pc_register();
        let addr = self.cwsr_record.expect("wave must be updated before pc access").base()
            + self.architecture.register_address(reg);
        let bytes = value.to_le_bytes();
        let size = self.architecture.register_size(reg);
        self.register_cache.write(process, addr, &bytes[..size]);
    }

    /// Current pc. Served from `parked_pc` while parked.
    pub fn pc(&mut self, process: &mut dyn ProcessContext, queue_suspended: bool) -> Result<u64> {
        if self.is_parked {
            return Ok(self.parked_pc.expect("is_parked implies parked_pc is set"));
        }
        let reg = self.architecture.pc_register();
        let size = self.architecture.register_size(reg);
        let mut buf = [0u8; 8];
        self.read_register_raw(process, reg, 0, 0, size, &mut buf[..size], queue_suspended)?;
        Ok(u64::from_le_bytes(buf))
    }

    /// Terminate the wave: hardware will run it to completion and it is
    /// never reported to the client again.
    /// Terminates the wave, returning any outstanding displaced-stepping
    /// handle so the caller can release it against the per-queue arena it
    /// owns (this method only clears the wave's own reference to it).
    pub fn terminate(&mut self, process: &mut dyn ProcessContext) -> Result<Option<DisplacedSteppingHandle>> {
        let displaced = self.displaced_stepping.take();
        let addr = self.architecture.terminating_instruction_address();
        self.write_pc_through_cache(process, addr);
        self.visibility = Visibility::HiddenAtTerminatingInstruction;
        self.state = WaveState::Run;
        // A terminating wave is never reported stopped again; parking (which
        // requires STOP) no longer applies once it is RUN.
        self.is_parked = false;
        self.parked_pc = None;
        log::debug!("wave {:?}: terminated", self.id);
        Ok(displaced)
    }

    /// Precondition checks and bookkeeping shared by `set_state` callers.
    pub fn begin_set_state(&mut self, new_state: WaveState, exceptions: Exceptions) -> Result<bool> {
        if exceptions != Exceptions::empty() && new_state != WaveState::Stop {
            return Err(Error::InvalidArgument("exceptions can only be injected when resuming to STOP"));
        }
        if let Some(_handle) = self.displaced_stepping {
            if !matches!(new_state, WaveState::Stop | WaveState::SingleStep) {
                return Err(Error::ResumeDisplacedStepping);
            }
        }
        if new_state == self.state && exceptions.is_empty() {
            return Ok(false);
        }
        self.stop_requested = new_state == WaveState::Stop;
        Ok(true)
    }

    /// Apply the hardware-side half of a state transition and update local
    /// bookkeeping. Steps 3/4/9/10/11 (terminating
    /// single-step, simulation, exception translation, the sticky
    /// device-memory-violation bit) are orchestrated by the caller, which
    /// has access to the process/agent collaborators this method does not
    /// need directly.
    pub fn apply_set_state(
        &mut self,
        new_state: WaveState,
        exceptions: Exceptions,
        process: &mut dyn ProcessContext,
    ) -> Result<()> {
        let prev_state = self.state;
        self.architecture.wave_set_state(self, new_state, exceptions)?;
        self.state = new_state;

        if self.architecture.park_stopped_waves() {
            if new_state == WaveState::Stop && !self.is_parked {
                self.park(process)?;
            } else if new_state != WaveState::Stop && self.is_parked {
                self.unpark(process)?;
            }
        }

        if prev_state == WaveState::Stop && new_state != WaveState::Stop {
            let pc = self.pc(process, true)?;
            self.last_stopped_pc = Some(pc);
            self.stop_reason = StopReason::empty();
        }

        if prev_state != WaveState::Stop && new_state == WaveState::Stop {
            let kind = if prev_state == WaveState::SingleStep {
                EventKind::WaveCommandTerminated
            } else {
                EventKind::WaveStop
            };
            self.raise_event(process, kind);
        }

        Ok(())
    }

    pub fn translate_exceptions(exceptions: Exceptions) -> u32 {
        exceptions::translate(exceptions)
    }

    /// Precondition check for starting displaced stepping at the wave's
    /// current pc; the buffer itself is arena-owned by the caller.
    pub fn begin_displaced_stepping(&self) -> Result<()> {
        debug_assert_eq!(self.state, WaveState::Stop, "displaced stepping requires state == STOP");
        debug_assert!(self.displaced_stepping.is_none(), "displaced stepping already in progress");
        Ok(())
    }

    pub fn set_displaced_stepping(&mut self, handle: DisplacedSteppingHandle) {
        self.displaced_stepping = Some(handle);
    }

    pub fn clear_displaced_stepping(&mut self) -> Option<DisplacedSteppingHandle> {
        self.displaced_stepping.take()
    }

    /// Re-applies hardware-reported state after `architecture.simulate`
    /// actually ran an instruction in place of real hardware (`set_state`
    /// step 9): `simulate` doesn't go through `wave_set_state`, so the
    /// core has to pull the resulting state/stop_reason itself.
    pub(crate) fn set_state_and_stop_reason(&mut self, state: WaveState, stop_reason: StopReason) {
        self.state = state;
        self.stop_reason = stop_reason;
    }
}
