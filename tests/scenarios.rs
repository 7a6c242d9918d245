// Copyright (c) 2024 Leela Aurelia, git@elia.garden
//
// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL-2.0) or the
// GNU General Public License Version 3 (GPL-3).
// If a copy of these licenses was not distributed with this file, you can
// obtain them at https://mozilla.org/MPL/2.0/ and http://www.gnu.org/licenses/.

//! End-to-end coverage driven entirely through `Core`'s public facade, one
//! test per scenario worked through by hand in the design notes.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::sync::Arc;

use wave_core::architecture::{Architecture, RegisterId};
use wave_core::components::cwsr::CwsrRecord;
use wave_core::components::memory::transfer_private_swizzled;
use wave_core::core::{Core, InfoValue};
use wave_core::events::EventState;
use wave_core::handles::{AgentId, ArchitectureId, DispatchId, ProcessId, QueueId, WaveId, WatchpointId};
use wave_core::process::ProcessContext;
use wave_core::testing::{FakeAgent, FakeProcess, FakeQueue};
use wave_core::wave::state::{Exceptions, ResumeMode, StopReason, Visibility, WaveInfoQuery};
use wave_core::{Config, Error, Result, Wave, WaveState};

const TERMINATING_INSTR: [u8; 4] = [0xEE, 0xEE, 0xEE, 0xEE];

/// A minimal architecture stand-in good for one agent's worth of waves: a
/// shared hardware-state table keyed by wave index (real hardware state
/// lives outside any one `Wave`, so every `&Wave` method here only reads
/// the id off it), plus a scratch-buffer allocator for displaced stepping.
struct TestArch {
    states: RefCell<HashMap<u32, (WaveState, StopReason)>>,
    freed: RefCell<Vec<u64>>,
    next_scratch: Cell<u64>,
    park_stopped: bool,
}

impl TestArch {
    fn new(park_stopped: bool) -> Self {
        Self {
            states: RefCell::new(HashMap::new()),
            freed: RefCell::new(Vec::new()),
            next_scratch: Cell::new(0xF_0000),
            park_stopped,
        }
    }

    fn set_state(&self, wave: WaveId, state: WaveState, reason: StopReason) {
        self.states.borrow_mut().insert(wave.index(), (state, reason));
    }
}

impl Architecture for TestArch {
    fn register_size(&self, reg: RegisterId) -> usize {
        match reg {
            RegisterId::Pc | RegisterId::Exec | RegisterId::Lds0 => 8,
            _ => 4,
        }
    }

    fn register_address(&self, reg: RegisterId) -> u64 {
        match reg {
            RegisterId::Hwreg(n) => u64::from(n) * 4,
            RegisterId::Ttmp(n) => 0x100 + u64::from(n) * 4,
            RegisterId::Pc => 0x10,
            RegisterId::Exec => 0x18,
            RegisterId::Lds0 => 0x20,
            RegisterId::Sgpr(n) => 0x300 + u64::from(n) * 4,
            RegisterId::Vgpr(n) => 0x400 + u64::from(n) * 4,
            RegisterId::Pseudo(_) => 0,
        }
    }

    fn register_name(&self, _reg: RegisterId) -> &'static str {
        "reg"
    }

    fn first_hwreg(&self) -> RegisterId {
        RegisterId::Hwreg(0)
    }

    fn last_ttmp(&self) -> RegisterId {
        RegisterId::Ttmp(15)
    }

    fn pc_register(&self) -> RegisterId {
        RegisterId::Pc
    }

    fn exec_register(&self) -> RegisterId {
        RegisterId::Exec
    }

    fn sgpr_count(&self) -> u32 {
        16
    }

    fn vgpr_count(&self) -> u32 {
        16
    }

    fn vgpr_alias(&self, _lane_count: u32) -> RegisterId {
        RegisterId::Vgpr(0)
    }

    fn is_pseudo_register_available(&self, _wave: &Wave, _reg: RegisterId) -> bool {
        false
    }

    fn read_pseudo_register(&self, _wave: &Wave, _reg: RegisterId, _dst: &mut [u8]) -> Result<()> {
        Err(Error::NotAvailable("test architecture has no pseudo registers"))
    }

    fn write_pseudo_register(&self, _wave: &Wave, _reg: RegisterId, _src: &[u8]) -> Result<()> {
        Err(Error::NotAvailable("test architecture has no pseudo registers"))
    }

    fn largest_instruction_size(&self) -> usize {
        4
    }

    fn breakpoint_instruction(&self) -> &'static [u8] {
        &[0xAB, 0xCD]
    }

    fn park_stopped_waves(&self) -> bool {
        self.park_stopped
    }

    fn park_instruction_address(&self) -> u64 {
        0xF000_0000
    }

    fn terminating_instruction_address(&self) -> u64 {
        0xF000_1000
    }

    fn is_terminating_instruction(&self, instr: &[u8]) -> bool {
        instr == TERMINATING_INSTR.as_slice()
    }

    fn can_simulate(&self, _instr: &[u8]) -> bool {
        false
    }

    fn can_execute_displaced(&self, _instr: &[u8]) -> bool {
        true
    }

    fn simulate(&self, _wave: &Wave, _instr: &[u8]) -> Result<bool> {
        Ok(false)
    }

    fn allocate_instruction_buffer(&self, _wave: &Wave, _bytes: &[u8]) -> Result<u64> {
        let addr = self.next_scratch.get();
        self.next_scratch.set(addr + 0x1000);
        Ok(addr)
    }

    fn free_instruction_buffer(&self, _wave: &Wave, addr: u64) {
        self.freed.borrow_mut().push(addr);
    }

    fn wave_get_state(&self, wave: &Wave) -> Result<(WaveState, StopReason)> {
        Ok(self.states.borrow().get(&wave.id.index()).copied().unwrap_or((WaveState::Run, StopReason::empty())))
    }

    fn wave_set_state(&self, wave: &Wave, state: WaveState, _exceptions: Exceptions) -> Result<()> {
        let reason = if state == WaveState::Stop { StopReason::empty() } else { StopReason::empty() };
        self.states.borrow_mut().insert(wave.id.index(), (state, reason));
        Ok(())
    }

    fn wave_set_halt(&self, _wave: &Wave, _halt: bool) -> Result<()> {
        Ok(())
    }

    fn wave_get_halt(&self, _wave: &Wave) -> Result<bool> {
        Ok(false)
    }

    fn triggered_watchpoints(&self, _wave: &Wave) -> Vec<WatchpointId> {
        Vec::new()
    }
}

fn setup_process() -> FakeProcess {
    let _ = env_logger::try_init();
    FakeProcess::new()
        .with_queue(QueueId::new(0, 0), FakeQueue::default())
        .with_agent(AgentId::new(0, 0), FakeAgent::default())
}

/// Registers a wave already stopped at `pc` with `reason`, as if its CWSR
/// record had just been delivered by a trap that hit a breakpoint.
fn spawn_stopped_wave(
    core: &mut Core,
    process: &mut FakeProcess,
    arch: &Arc<TestArch>,
    cwsr_base: u64,
    pc: u64,
    reason: StopReason,
) -> WaveId {
    let dyn_arch: Arc<dyn Architecture> = arch.clone();
    let id = core.register_wave(
        DispatchId::new(0, 0),
        QueueId::new(0, 0),
        AgentId::new(0, 0),
        ProcessId::new(0, 0),
        ArchitectureId::new(0, 0),
        dyn_arch,
        64,
        WaveId::new(0, 0),
    );
    arch.set_state(id, WaveState::Stop, reason);
    process.write_global_memory(cwsr_base + 0x10, &pc.to_le_bytes()).unwrap();
    let record = CwsrRecord::new(cwsr_base, true, 0x1000, 0x9000, 0x1000);
    core.update_wave(id, id, record, process).unwrap();
    id
}

fn mark_last_stop_processed(core: &Core, process: &mut FakeProcess, id: WaveId) {
    let eid = core.wave(id).unwrap().last_stop_event_id().expect("a stop always raises an event");
    process.event_mut(eid).unwrap().state = EventState::Processed;
}

#[test]
fn s1_breakpoint_stop_then_resume() {
    let arch = Arc::new(TestArch::new(false));
    let mut core = Core::new(Config::default());
    let mut process = setup_process();
    let id = spawn_stopped_wave(&mut core, &mut process, &arch, 0x1000, 0x1000, StopReason::BREAKPOINT);

    assert_eq!(
        core.client_visible_state(id, &process).unwrap(),
        WaveState::Run,
        "a stop isn't client-visible until its event is reported"
    );

    let event_id = core.wave(id).unwrap().last_stop_event_id().unwrap();
    process.event_mut(event_id).unwrap().state = EventState::Reported;
    assert_eq!(core.client_visible_state(id, &process).unwrap(), WaveState::Stop);

    match core.get_info(id, WaveInfoQuery::State, &mut process).unwrap() {
        InfoValue::State(s) => assert_eq!(s, WaveState::Stop),
        other => panic!("unexpected {other:?}"),
    }
    match core.get_info(id, WaveInfoQuery::Pc, &mut process).unwrap() {
        InfoValue::Pc(pc) => assert_eq!(pc, 0x1000),
        other => panic!("unexpected {other:?}"),
    }
    match core.get_info(id, WaveInfoQuery::StopReason, &mut process).unwrap() {
        InfoValue::StopReason(r) => assert!(r.contains(StopReason::BREAKPOINT)),
        other => panic!("unexpected {other:?}"),
    }

    process.event_mut(event_id).unwrap().state = EventState::Processed;
    core.resume(id, ResumeMode::Normal, 0, &mut process).unwrap();

    assert_eq!(core.wave(id).unwrap().state(), WaveState::Run);
    assert_eq!(core.wave(id).unwrap().last_stop_event_id(), Some(event_id), "no new event on a plain resume");
    assert_eq!(core.wave(id).unwrap().last_stopped_pc(), Some(0x1000));
}

#[test]
fn s2_displaced_step_over_shared_pc() {
    let arch = Arc::new(TestArch::new(false));
    let mut core = Core::new(Config::default());
    let mut process = setup_process();

    let a = spawn_stopped_wave(&mut core, &mut process, &arch, 0x1000, 0x2000, StopReason::BREAKPOINT);
    let b = spawn_stopped_wave(&mut core, &mut process, &arch, 0x5000, 0x2000, StopReason::BREAKPOINT);
    mark_last_stop_processed(&core, &mut process, a);
    mark_last_stop_processed(&core, &mut process, b);

    let instr = vec![0u8; 4];
    core.displaced_stepping_start(a, 0x2000, instr.clone(), &mut process).unwrap();
    let to = match core.get_info(a, WaveInfoQuery::Pc, &mut process).unwrap() {
        InfoValue::Pc(pc) => pc,
        other => panic!("unexpected {other:?}"),
    };
    assert_ne!(to, 0x2000, "A's pc moved to the shared scratch buffer");

    core.displaced_stepping_start(b, 0x2000, instr, &mut process).unwrap();
    let to_b = match core.get_info(b, WaveInfoQuery::Pc, &mut process).unwrap() {
        InfoValue::Pc(pc) => pc,
        other => panic!("unexpected {other:?}"),
    };
    assert_eq!(to_b, to, "B retains the buffer A already allocated");

    core.resume(a, ResumeMode::SingleStep, 0, &mut process).unwrap();
    // Stand in for hardware actually running the displaced instruction and
    // landing 4 bytes further in the scratch buffer.
    core.wave_mut(a).unwrap().write_register(&mut process, RegisterId::Pc, 0, None, &(to + 4).to_le_bytes(), true).unwrap();
    core.displaced_stepping_complete(a, &mut process).unwrap();
    assert_eq!(core.wave_mut(a).unwrap().pc(&mut process, true).unwrap(), 0x2004, "pc restored relative to the buffer");
    assert!(arch.freed.borrow().is_empty(), "the buffer is still referenced by B");

    core.resume(b, ResumeMode::SingleStep, 0, &mut process).unwrap();
    core.wave_mut(b).unwrap().write_register(&mut process, RegisterId::Pc, 0, None, &(to + 4).to_le_bytes(), true).unwrap();
    core.displaced_stepping_complete(b, &mut process).unwrap();
    assert_eq!(core.wave_mut(b).unwrap().pc(&mut process, true).unwrap(), 0x2004);
    assert_eq!(arch.freed.borrow().as_slice(), &[to], "the last release frees the scratch buffer");
}

#[test]
fn s3_single_step_terminating_instruction_retires_wave() {
    let arch = Arc::new(TestArch::new(false));
    let mut core = Core::new(Config::default());
    let mut process = setup_process();
    let id = spawn_stopped_wave(&mut core, &mut process, &arch, 0x1000, 0x9000, StopReason::BREAKPOINT);
    mark_last_stop_processed(&core, &mut process, id);

    process.write_global_memory(0x9000, &TERMINATING_INSTR).unwrap();

    core.resume(id, ResumeMode::SingleStep, 0, &mut process).unwrap();

    assert_eq!(core.wave(id).unwrap().state(), WaveState::Run);
    assert_eq!(core.wave(id).unwrap().visibility(), Visibility::HiddenAtTerminatingInstruction);

    let ids = core.list_waves(None, &mut process).unwrap();
    assert!(!ids.contains(&id), "a terminated wave never appears in list_waves again");
}

#[test]
fn s4_swizzled_private_read_crossing_lane_boundary() {
    let mut process = FakeProcess::new();
    let scratch_base = 0x8000u64;
    for i in 0..0x1000u64 {
        process.write_global_memory(scratch_base + i, &[i as u8]).unwrap();
    }

    let mut buf = [0u8; 6];
    let n = transfer_private_swizzled(&mut process, scratch_base, 0x1000, Some(7), 64, 3, &mut buf, false).unwrap();
    assert_eq!(n, 6);

    let expect = |offset: u64| offset as u8;
    assert_eq!(buf[0], expect(0 * 64 * 4 + 7 * 4 + 3));
    assert_eq!(buf[1], expect(1 * 64 * 4 + 7 * 4 + 0));
    assert_eq!(buf[2], expect(1 * 64 * 4 + 7 * 4 + 1));
    assert_eq!(buf[3], expect(1 * 64 * 4 + 7 * 4 + 2));
    assert_eq!(buf[4], expect(1 * 64 * 4 + 7 * 4 + 3));
    assert_eq!(buf[5], expect(2 * 64 * 4 + 7 * 4 + 0));
}

#[test]
fn s5_resume_blocked_until_event_processed() {
    let arch = Arc::new(TestArch::new(false));
    let mut core = Core::new(Config::default());
    let mut process = setup_process();
    let id = spawn_stopped_wave(&mut core, &mut process, &arch, 0x1000, 0x4000, StopReason::BREAKPOINT);

    let err = core.resume(id, ResumeMode::Normal, 0, &mut process).unwrap_err();
    assert!(matches!(err, Error::WaveNotResumable));

    mark_last_stop_processed(&core, &mut process, id);
    core.resume(id, ResumeMode::Normal, 0, &mut process).unwrap();
}

#[test]
fn s6_parked_pc_coherence() {
    let arch = Arc::new(TestArch::new(true));
    let mut core = Core::new(Config::default());
    let mut process = setup_process();
    let id = spawn_stopped_wave(&mut core, &mut process, &arch, 0x1000, 0x3000, StopReason::BREAKPOINT);
    assert!(core.wave(id).unwrap().is_parked(), "park_stopped_waves architectures park on transition to STOP");

    let mut out = [0u8; 8];
    core.wave_mut(id).unwrap().read_register(&mut process, RegisterId::Pc, 0, None, &mut out, true).unwrap();
    assert_eq!(u64::from_le_bytes(out), 0x3000);

    core.wave_mut(id).unwrap().write_register(&mut process, RegisterId::Pc, 0, None, &0x3100u64.to_le_bytes(), true).unwrap();
    core.wave_mut(id).unwrap().read_register(&mut process, RegisterId::Pc, 0, None, &mut out, true).unwrap();
    assert_eq!(u64::from_le_bytes(out), 0x3100);

    mark_last_stop_processed(&core, &mut process, id);
    core.resume(id, ResumeMode::Normal, 0, &mut process).unwrap();

    assert!(!core.wave(id).unwrap().is_parked(), "resume unparks on the way out of STOP");
    let pc = core.wave_mut(id).unwrap().pc(&mut process, true).unwrap();
    assert_eq!(pc, 0x3100, "the client-set pc was written back into the CWSR record on unpark");
}
