// Copyright (c) 2024 Leela Aurelia, git@elia.garden
//
// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL-2.0) or the
// GNU General Public License Version 3 (GPL-3).
// If a copy of these licenses was not distributed with this file, you can
// obtain them at https://mozilla.org/MPL/2.0/ and http://www.gnu.org/licenses/.

//! The public facade: wave registration, stop/resume, info queries, and
//! `list_waves`. This is the only place that touches more than one wave's
//! bookkeeping at a time, since it is the only layer that can see the whole
//! arena.

use std::collections::HashMap;
use std::sync::Arc;

use crate::{
    architecture::{Architecture, RegisterId},
    components::{
        cwsr::CwsrRecord,
        displaced_stepping::{DisplacedSteppingArena, DisplacedSteppingBuffer},
        memory,
    },
    config::Config,
    error::{Error, Result},
    exceptions,
    handles::{AgentId, ArchitectureId, DispatchId, DisplacedSteppingHandle, ProcessId, QueueId, WaveId, WatchpointId},
    process::ProcessContext,
    wave::{
        state::{AddressSpace, Exceptions, ResumeMode, StopReason, Visibility, WaveInfoQuery, WaveState},
        Wave,
    },
};

struct WaveSlot {
    wave: Wave,
    generation: u32,
}

/// A single queried field of a wave, typed per-variant rather than returned
/// through a size/buffer out-parameter.
#[derive(Clone, Debug)]
pub enum InfoValue {
    State(WaveState),
    StopReason(StopReason),
    Dispatch(DispatchId),
    Queue(QueueId),
    Agent(AgentId),
    Process(ProcessId),
    Architecture(ArchitectureId),
    Pc(u64),
    ExecMask(u64),
    WorkGroupCoord([u32; 3]),
    WaveNumberInWorkGroup(u32),
    Watchpoints(Vec<WatchpointId>),
    LaneCount(u32),
}

/// The wave control core. Owns the wave arena and the per-queue
/// displaced-stepping arenas; does not own the process/queue/agent objects
/// themselves, which live on the host side behind [`ProcessContext`].
pub struct Core {
    config: Config,
    waves: Vec<Option<WaveSlot>>,
    next_generation: u32,
    displaced_stepping: HashMap<u32, DisplacedSteppingArena>,
}

impl Core {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            waves: Vec::new(),
            next_generation: 1,
            displaced_stepping: HashMap::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Register a newly launched wave. It starts in `RUN`; the caller must
    /// follow up with [`Core::update_wave`] once a CWSR record exists for it.
    #[allow(clippy::too_many_arguments)]
    pub fn register_wave(
        &mut self,
        dispatch: DispatchId,
        queue: QueueId,
        agent: AgentId,
        process: ProcessId,
        architecture_id: ArchitectureId,
        architecture: Arc<dyn Architecture>,
        lane_count: u32,
        group_leader: WaveId,
    ) -> WaveId {
        let generation = self.next_generation;
        self.next_generation += 1;
        let wave = Wave::new(
            WaveId::new(0, generation),
            dispatch,
            queue,
            agent,
            process,
            architecture_id,
            architecture,
            lane_count,
            group_leader,
        );
        let slot = WaveSlot { wave, generation };

        for (i, existing) in self.waves.iter_mut().enumerate() {
            if existing.is_none() {
                let id = WaveId::new(i as u32, generation);
                *existing = Some(slot);
                self.wave_mut_unchecked(i).wave.id = id;
                return id;
            }
        }
        let index = self.waves.len() as u32;
        let id = WaveId::new(index, generation);
        let mut slot = slot;
        slot.wave.id = id;
        self.waves.push(Some(slot));
        id
    }

    fn wave_mut_unchecked(&mut self, index: usize) -> &mut WaveSlot {
        self.waves[index].as_mut().expect("slot just inserted")
    }

    fn slot(&self, id: WaveId) -> Result<&WaveSlot> {
        self.waves
            .get(id.index() as usize)
            .and_then(|s| s.as_ref())
            .filter(|s| s.generation == id.generation())
            .ok_or(Error::InvalidWaveId(id))
    }

    fn slot_mut(&mut self, id: WaveId) -> Result<&mut WaveSlot> {
        let generation = id.generation();
        self.waves
            .get_mut(id.index() as usize)
            .and_then(|s| s.as_mut())
            .filter(|s| s.generation == generation)
            .ok_or(Error::InvalidWaveId(id))
    }

    pub fn wave(&self, id: WaveId) -> Result<&Wave> {
        Ok(&self.slot(id)?.wave)
    }

    pub fn wave_mut(&mut self, id: WaveId) -> Result<&mut Wave> {
        Ok(&mut self.slot_mut(id)?.wave)
    }

    pub fn update_wave(
        &mut self,
        id: WaveId,
        group_leader: WaveId,
        cwsr_record: CwsrRecord,
        process: &mut dyn ProcessContext,
    ) -> Result<()> {
        self.slot_mut(id)?.wave.update(group_leader, cwsr_record, &self.config, process)
    }

    /// A wave exited; remove its bookkeeping. The slot's generation is not
    /// reused until a fresh `register_wave` overwrites it, at which point
    /// any stale handle to the old wave is rejected by `slot`/`slot_mut`.
    pub fn retire_wave(&mut self, id: WaveId) -> Result<()> {
        let slot = self
            .waves
            .get_mut(id.index() as usize)
            .filter(|s| s.as_ref().map(|s| s.generation) == Some(id.generation()))
            .ok_or(Error::InvalidWaveId(id))?;
        *slot = None;
        Ok(())
    }

    /// The externally visible state: a wave is only reported `STOP` once its
    /// stop event has reached the client (been reported), so a resume racing
    /// the event pipeline can't observe a stop it hasn't been told about yet.
    pub fn client_visible_state(&self, id: WaveId, process: &dyn ProcessContext) -> Result<WaveState> {
        let wave = &self.slot(id)?.wave;
        if wave.state() != WaveState::Stop {
            return Ok(wave.state());
        }
        match wave.last_stop_event_id().and_then(|eid| process.event(eid)) {
            Some(event) if !event.is_reported_or_later() => {
                // Client hasn't observed the stop yet: report the pre-stop
                // state inferred from stop_reason rather than the STOP the
                // hardware has already reached.
                if wave.stop_reason().contains(StopReason::SINGLE_STEP) {
                    Ok(WaveState::SingleStep)
                } else {
                    Ok(WaveState::Run)
                }
            }
            _ => Ok(WaveState::Stop),
        }
    }

    /// Stop a running or single-stepping wave (the `STOP` resume mode is
    /// always legal; `stop` is the convenience wrapper clients actually
    /// call).
    pub fn stop(&mut self, id: WaveId, process: &mut dyn ProcessContext) -> Result<()> {
        if self.client_visible_state(id, process)? == WaveState::Stop {
            let wave = &self.slot(id)?.wave;
            if wave.stop_requested() {
                return Err(Error::WaveOutstandingStop);
            }
            return Err(Error::WaveStopped);
        }
        let wave = &mut self.slot_mut(id)?.wave;
        if !wave.begin_set_state(WaveState::Stop, Exceptions::empty())? {
            return Ok(());
        }
        wave.apply_set_state(WaveState::Stop, Exceptions::empty(), process)
    }

    /// Resume a stopped wave into `RUN` or `SINGLE_STEP`, optionally
    /// injecting OS exceptions (only legal when resuming straight back into
    /// `STOP`, i.e. exceptions with no state change).
    pub fn resume(
        &mut self,
        id: WaveId,
        mode: ResumeMode,
        exception_bits: u32,
        process: &mut dyn ProcessContext,
    ) -> Result<()> {
        let exceptions = exceptions::validate(exception_bits)?;

        {
            let wave = &self.slot(id)?.wave;
            if wave.state() != WaveState::Stop {
                return Err(Error::WaveNotStopped);
            }
            if let Some(eid) = wave.last_stop_event_id() {
                if !process.event(eid).map(|e| e.is_processed()).unwrap_or(true) {
                    return Err(Error::WaveNotResumable);
                }
            }
        }

        self.flush_queue_register_caches(self.slot(id)?.wave.queue, process);

        let target = mode.target_state();
        if !self.slot_mut(id)?.wave.begin_set_state(target, exceptions)? {
            return Ok(());
        }

        // Steps 3/4: with a plain single-step, fetch what's about to
        // execute (the displaced original if a step is in progress,
        // otherwise whatever sits at pc) and short-circuit into
        // termination if it's the hardware's terminating instruction.
        let single_step_instruction = if target == WaveState::SingleStep && exceptions.is_empty() {
            self.instruction_about_to_execute(id, process)?
        } else {
            None
        };

        if let Some(instr) = &single_step_instruction {
            if self.slot(id)?.wave.architecture().is_terminating_instruction(instr) {
                self.terminate_and_report(id, process)?;
                self.clear_stale_device_memory_violation(id, process);
                return Ok(());
            }
        }

        self.slot_mut(id)?.wave.apply_set_state(target, exceptions, process)?;

        // Step 9: a single-step that was simulated rather than executed by
        // hardware needs its resulting state/stop_reason pulled explicitly,
        // since `simulate` never went through `wave_set_state`.
        if let Some(instr) = &single_step_instruction {
            let architecture = Arc::clone(self.slot(id)?.wave.architecture());
            if architecture.can_simulate(instr) {
                let simulated = architecture.simulate(&self.slot(id)?.wave, instr)?;
                if simulated {
                    self.requery_after_simulation(id, process)?;
                }
            }
        }

        if !exceptions.is_empty() {
            let mask = Wave::translate_exceptions(exceptions);
            let queue = self.slot(id)?.wave.queue;
            process.send_exceptions(mask, queue)?;
        }

        self.clear_stale_device_memory_violation(id, process);
        Ok(())
    }

    /// Fetches the bytes about to execute for a wave resuming into
    /// `SINGLE_STEP`: the displaced original instruction if a displaced
    /// step is in progress, otherwise whatever is at the wave's current pc.
    /// A failed memory read yields `None` rather than an error, per
    /// set_state step 3 ("may be absent if memory read fails").
    fn instruction_about_to_execute(&mut self, id: WaveId, process: &mut dyn ProcessContext) -> Result<Option<Vec<u8>>> {
        let queue = self.slot(id)?.wave.queue;
        if let Some(handle) = self.slot(id)?.wave.displaced_stepping() {
            let arena = self
                .displaced_stepping
                .get(&queue.index())
                .expect("arena must exist for a wave with a displaced-stepping handle");
            return Ok(Some(arena.get(handle).original_instruction.clone()));
        }

        let size = self.slot(id)?.wave.architecture().largest_instruction_size();
        let pc = self.slot_mut(id)?.wave.pc(process, true)?;
        let mut buf = vec![0u8; size];
        match process.read_global_memory(pc, &mut buf) {
            Ok(()) => Ok(Some(buf)),
            Err(_) => Ok(None),
        }
    }

    /// The terminating-single-step short-circuit of `set_state` step 4:
    /// terminate the wave, release any outstanding displaced-stepping
    /// buffer against the arena that owns it, and report
    /// `WAVE_COMMAND_TERMINATED`.
    fn terminate_and_report(&mut self, id: WaveId, process: &mut dyn ProcessContext) -> Result<()> {
        let queue = self.slot(id)?.wave.queue;
        let displaced = self.slot_mut(id)?.wave.terminate(process)?;
        if let Some(handle) = displaced {
            self.release_displaced_stepping_handle(queue, handle, id);
        }
        self.slot_mut(id)?.wave.raise_event(process, crate::events::EventKind::WaveCommandTerminated);
        Ok(())
    }

    /// `set_state` step 9's tail: re-query hardware state after a
    /// successful simulate, park if the architecture requires it, and
    /// report the stop the way real hardware single-stepping would.
    fn requery_after_simulation(&mut self, id: WaveId, process: &mut dyn ProcessContext) -> Result<()> {
        let wave = &mut self.slot_mut(id)?.wave;
        let (state, stop_reason) = wave.architecture().wave_get_state(wave)?;
        wave.set_state_and_stop_reason(state, stop_reason);
        if state == WaveState::Stop && wave.architecture().park_stopped_waves() && !wave.is_parked() {
            wave.park(process)?;
        }
        wave.raise_event(process, crate::events::EventKind::WaveStop);
        Ok(())
    }

    /// `set_state` step 11: once a wave leaves `STOP`, if the agent's
    /// sticky device-memory-violation bit is set and no other wave on that
    /// agent is still stopped with `MEMORY_VIOLATION`, clear it.
    fn clear_stale_device_memory_violation(&mut self, id: WaveId, process: &mut dyn ProcessContext) {
        let Ok(slot) = self.slot(id) else { return };
        let agent_id = slot.wave.agent;
        let other_stopped_with_violation = self.waves.iter().flatten().any(|s| {
            s.wave.id != id
                && s.wave.agent == agent_id
                && s.wave.state() == WaveState::Stop
                && s.wave.stop_reason().contains(StopReason::MEMORY_VIOLATION)
        });
        if other_stopped_with_violation {
            return;
        }
        let agent = process.agent_mut(agent_id);
        if agent.device_memory_violation() {
            agent.clear_device_memory_violation();
        }
    }

    fn flush_queue_register_caches(&mut self, queue: QueueId, process: &mut dyn ProcessContext) {
        let verbose = self.config.log_register_cache_flushes;
        for slot in self.waves.iter_mut().flatten() {
            if slot.wave.queue == queue {
                slot.wave.flush_register_cache(process, verbose);
            }
        }
    }

    /// Start displaced stepping for a stopped wave sitting on a breakpoint,
    /// sharing a buffer with any other wave of the same queue already
    /// stepping over the same pc.
    pub fn displaced_stepping_start(
        &mut self,
        id: WaveId,
        pc: u64,
        instruction: Vec<u8>,
        process: &mut dyn ProcessContext,
    ) -> Result<()> {
        self.slot(id)?.wave.begin_displaced_stepping()?;

        let queue = self.slot(id)?.wave.queue;
        let existing = self
            .displaced_stepping
            .entry(queue.index())
            .or_default()
            .find_and_retain(queue, pc);

        let handle = match existing {
            Some(h) => h,
            None => {
                let architecture = Arc::clone(self.slot(id)?.wave.architecture());
                let can_execute = architecture.can_execute_displaced(&instruction);
                let can_simulate = architecture.can_simulate(&instruction);
                if !can_execute && !can_simulate {
                    return Err(Error::IllegalInstruction);
                }
                // Simulation is preferred over displaced execution when an
                // instruction supports both, so check it first.
                let to = if can_simulate {
                    None
                } else if can_execute {
                    let wave = &self.slot(id)?.wave;
                    Some(architecture.allocate_instruction_buffer(wave, &instruction)?)
                } else {
                    None
                };
                self.displaced_stepping.entry(queue.index()).or_default().insert(DisplacedSteppingBuffer {
                    queue,
                    from: pc,
                    to,
                    original_instruction: instruction,
                    is_simulated: to.is_none(),
                })
            }
        };

        let architecture = Arc::clone(self.slot(id)?.wave.architecture());
        let buffer = self.displaced_stepping[&queue.index()].get(handle).clone();

        self.slot_mut(id)?.wave.set_displaced_stepping(handle);

        if let Some(to) = buffer.to {
            let pc_reg = architecture.pc_register();
            let size = architecture.register_size(pc_reg);
            let bytes = to.to_le_bytes();
            let wave = &mut self.slot_mut(id)?.wave;
            wave.write_register(process, pc_reg, 0, None, &bytes[..size], true)?;
        } else {
            let wave = &self.slot(id)?.wave;
            architecture.simulate(wave, &buffer.original_instruction)?;
        }
        Ok(())
    }

    /// Conclude displaced stepping once the single step lands: restore the
    /// real pc (unless the step was simulated, which never moved it),
    /// release the shared buffer, and free the scratch instruction memory
    /// if this was the last reference.
    pub fn displaced_stepping_complete(&mut self, id: WaveId, process: &mut dyn ProcessContext) -> Result<()> {
        let queue = self.slot(id)?.wave.queue;
        let handle = self
            .slot_mut(id)?
            .wave
            .clear_displaced_stepping()
            .ok_or(Error::InvalidArgument("no displaced step in progress"))?;

        let buffer = self
            .displaced_stepping
            .get(&queue.index())
            .expect("arena must exist for a queue with an outstanding displaced step")
            .get(handle)
            .clone();

        if !buffer.is_simulated {
            let to = buffer.to.expect("a non-simulated buffer always has a scratch address");
            let pc_reg = self.slot(id)?.wave.architecture().pc_register();
            let current_pc = self.slot_mut(id)?.wave.pc(process, true)?;
            if current_pc == to {
                log::debug!("wave {id:?}: displaced step aborted, instruction at {to:#x} never executed");
            } else {
                log::debug!("wave {id:?}: displaced step completed at {current_pc:#x}");
            }
            let restored_pc = current_pc.wrapping_add(buffer.from.wrapping_sub(to));
            let size = self.slot(id)?.wave.architecture().register_size(pc_reg);
            let bytes = restored_pc.to_le_bytes();
            self.slot_mut(id)?.wave.write_register(process, pc_reg, 0, None, &bytes[..size], true)?;
        }

        self.release_displaced_stepping_handle(queue, handle, id);
        Ok(())
    }

    /// Releases one reference on a displaced-stepping buffer; if it was the
    /// last one, frees the scratch instruction memory (shared by
    /// `displaced_stepping_complete` and the terminating-single-step
    /// short-circuit in `resume`, both of which end a wave's displaced step).
    fn release_displaced_stepping_handle(&mut self, queue: QueueId, handle: DisplacedSteppingHandle, id: WaveId) {
        let arena = self
            .displaced_stepping
            .get_mut(&queue.index())
            .expect("arena must exist for a queue with an outstanding displaced step");
        let buffer = arena.get(handle).clone();
        let freed = arena.release(handle);

        if freed {
            if let (Some(to), Ok(slot)) = (buffer.to, self.slot(id)) {
                slot.wave.architecture().free_instruction_buffer(&slot.wave, to);
            }
        }
    }

    /// Suspend every queue that isn't already suspended, collect every
    /// known wave (optionally filtered to one process), then resume each
    /// queue this call suspended if it still needs forward progress.
    pub fn list_waves(&mut self, filter: Option<ProcessId>, process: &mut dyn ProcessContext) -> Result<Vec<WaveId>> {
        let mut queues: Vec<QueueId> = Vec::new();
        for slot in self.waves.iter().flatten() {
            if filter.map_or(true, |p| p == slot.wave.process) && !queues.contains(&slot.wave.queue) {
                queues.push(slot.wave.queue);
            }
        }

        let mut we_suspended = Vec::new();
        for &queue in &queues {
            let q = process.queue_mut(queue);
            if !q.is_suspended() {
                q.suspend()?;
                we_suspended.push(queue);
            }
        }

        let ids: Vec<WaveId> = self
            .waves
            .iter()
            .flatten()
            .filter(|s| filter.map_or(true, |p| p == s.wave.process))
            .filter(|s| s.wave.visibility() == Visibility::Visible)
            .map(|s| s.wave.id)
            .collect();

        for queue in we_suspended {
            let q = process.queue_mut(queue);
            if q.forward_progress_needed() {
                q.resume()?;
            }
        }

        Ok(ids)
    }

    pub fn get_info(
        &mut self,
        id: WaveId,
        query: WaveInfoQuery,
        process: &mut dyn ProcessContext,
    ) -> Result<InfoValue> {
        if query.requires_stopped() && self.client_visible_state(id, process)? != WaveState::Stop {
            return Err(Error::WaveNotStopped);
        }

        let config = self.config;
        let wave = &mut self.slot_mut(id)?.wave;
        Ok(match query {
            WaveInfoQuery::State => InfoValue::State(wave.state()),
            WaveInfoQuery::StopReason => InfoValue::StopReason(config.fold_stop_reason(wave.stop_reason())),
            WaveInfoQuery::Dispatch => InfoValue::Dispatch(wave.dispatch),
            WaveInfoQuery::Queue => InfoValue::Queue(wave.queue),
            WaveInfoQuery::Agent => InfoValue::Agent(wave.agent),
            WaveInfoQuery::Process => InfoValue::Process(wave.process),
            WaveInfoQuery::Architecture => InfoValue::Architecture(wave.architecture_id),
            WaveInfoQuery::Pc => InfoValue::Pc(wave.pc(process, true)?),
            WaveInfoQuery::ExecMask => {
                let reg = RegisterId::Exec;
                let size = wave.architecture().register_size(reg);
                let mut buf = [0u8; 8];
                wave.read_register(process, reg, 0, None, &mut buf[..size], true)?;
                InfoValue::ExecMask(u64::from_le_bytes(buf))
            }
            WaveInfoQuery::WorkGroupCoord => InfoValue::WorkGroupCoord(wave.group_ids()),
            WaveInfoQuery::WaveNumberInWorkGroup => InfoValue::WaveNumberInWorkGroup(wave.wave_in_group()),
            WaveInfoQuery::Watchpoints => {
                InfoValue::Watchpoints(wave.architecture().triggered_watchpoints(wave))
            }
            WaveInfoQuery::LaneCount => InfoValue::LaneCount(wave.lane_count),
        })
    }

    /// Address-space-aware memory transfer (§4.8): `global` goes straight to
    /// the process; `local` reads the group leader's `lds_0` register for
    /// its base and requires the owning queue already suspended; the two
    /// `private` spaces transfer against this wave's own scratch allocation.
    #[allow(clippy::too_many_arguments)]
    pub fn transfer_memory(
        &mut self,
        id: WaveId,
        space: AddressSpace,
        addr: u64,
        lane_id: Option<u32>,
        buf: &mut [u8],
        write: bool,
        queue_suspended: bool,
        process: &mut dyn ProcessContext,
    ) -> Result<usize> {
        match space {
            AddressSpace::Global => memory::transfer_global(process, addr, buf, write),
            AddressSpace::Local => {
                debug_assert!(queue_suspended, "local memory transfer requires the queue to be suspended");
                let group_leader = self.slot(id)?.wave.group_leader;
                let lds_size = self
                    .slot(id)?
                    .wave
                    .cwsr_record()
                    .ok_or(Error::NotAvailable("wave has no cwsr record yet"))?
                    .lds_size();
                let lds_reg = RegisterId::Lds0;
                let size = self.slot(group_leader)?.wave.architecture().register_size(lds_reg);
                let mut base_buf = [0u8; 8];
                self.slot_mut(group_leader)?.wave.read_register(
                    process,
                    lds_reg,
                    0,
                    None,
                    &mut base_buf[..size],
                    queue_suspended,
                )?;
                let lds_base = u64::from_le_bytes(base_buf);
                memory::transfer_local(process, queue_suspended, lds_base, lds_size, addr as u32, buf, write)
            }
            AddressSpace::PrivateSwizzled => {
                let wave = &self.slot(id)?.wave;
                let record = wave.cwsr_record().ok_or(Error::NotAvailable("wave has no cwsr record yet"))?;
                let (scratch_base, scratch_size, lane_count) = (record.scratch_base(), record.scratch_size(), wave.lane_count);
                memory::transfer_private_swizzled(process, scratch_base, scratch_size, lane_id, lane_count, addr, buf, write)
            }
            AddressSpace::PrivateUnswizzled => {
                let wave = &self.slot(id)?.wave;
                let record = wave.cwsr_record().ok_or(Error::NotAvailable("wave has no cwsr record yet"))?;
                let (scratch_base, scratch_size) = (record.scratch_base(), record.scratch_size());
                memory::transfer_private_unswizzled(process, scratch_base, scratch_size, addr, buf, write)
            }
        }
    }
}
