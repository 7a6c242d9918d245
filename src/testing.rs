// Copyright (c) 2024 Leela Aurelia, git@elia.garden
//
// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL-2.0) or the
// GNU General Public License Version 3 (GPL-3).
// If a copy of these licenses was not distributed with this file, you can
// obtain them at https://mozilla.org/MPL/2.0/ and http://www.gnu.org/licenses/.

//! In-memory fakes for the collaborator traits, so this crate's own test
//! suite can exercise the core without a real driver underneath it.

use std::collections::HashMap;

use crate::{
    error::{Error, Result},
    events::Event,
    exceptions::OsExceptionMask,
    handles::{AgentId, EventId, QueueId},
    process::{AgentContext, ProcessContext, QueueContext},
};

/// A flat, sparsely-populated byte space standing in for a process's global
/// memory mapping.
#[derive(Default)]
pub struct FakeProcess {
    memory: HashMap<u64, u8>,
    events: HashMap<u32, Event>,
    next_event_index: u32,
    queues: HashMap<u32, FakeQueue>,
    agents: HashMap<u32, FakeAgent>,
    sent_exceptions: Vec<(OsExceptionMask, QueueId)>,
    /// Addresses beyond which reads/writes fail, simulating an unmapped
    /// region. `None` means unbounded.
    pub fail_beyond: Option<u64>,
}

impl FakeProcess {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_queue(mut self, id: QueueId, queue: FakeQueue) -> Self {
        self.queues.insert(id.index(), queue);
        self
    }

    pub fn with_agent(mut self, id: AgentId, agent: FakeAgent) -> Self {
        self.agents.insert(id.index(), agent);
        self
    }

    pub fn sent_exceptions(&self) -> &[(OsExceptionMask, QueueId)] {
        &self.sent_exceptions
    }

    fn mapped(&self, addr: u64, len: usize) -> bool {
        match self.fail_beyond {
            Some(limit) => addr.checked_add(len as u64).is_some_and(|end| end <= limit),
            None => true,
        }
    }
}

impl ProcessContext for FakeProcess {
    fn read_global_memory(&mut self, addr: u64, dst: &mut [u8]) -> Result<()> {
        if !self.mapped(addr, dst.len()) {
            return Err(Error::MemoryAccess);
        }
        for (i, byte) in dst.iter_mut().enumerate() {
            *byte = *self.memory.get(&(addr + i as u64)).unwrap_or(&0);
        }
        Ok(())
    }

    fn write_global_memory(&mut self, addr: u64, src: &[u8]) -> Result<()> {
        if !self.mapped(addr, src.len()) {
            return Err(Error::MemoryAccess);
        }
        for (i, byte) in src.iter().enumerate() {
            self.memory.insert(addr + i as u64, *byte);
        }
        Ok(())
    }

    fn read_global_memory_partial(&mut self, addr: u64, dst: &mut [u8]) -> Result<usize> {
        let limit = self.fail_beyond.unwrap_or(u64::MAX);
        let available = limit.saturating_sub(addr).min(dst.len() as u64) as usize;
        for (i, byte) in dst[..available].iter_mut().enumerate() {
            *byte = *self.memory.get(&(addr + i as u64)).unwrap_or(&0);
        }
        Ok(available)
    }

    fn write_global_memory_partial(&mut self, addr: u64, src: &[u8]) -> Result<usize> {
        let limit = self.fail_beyond.unwrap_or(u64::MAX);
        let available = limit.saturating_sub(addr).min(src.len() as u64) as usize;
        for (i, byte) in src[..available].iter().enumerate() {
            self.memory.insert(addr + i as u64, *byte);
        }
        Ok(available)
    }

    fn enqueue_event(&mut self, mut event: Event) -> EventId {
        let id = EventId::new(self.next_event_index, 0);
        self.next_event_index += 1;
        event.id = id;
        self.events.insert(id.index(), event);
        id
    }

    fn event(&self, id: EventId) -> Option<&Event> {
        self.events.get(&id.index())
    }

    fn event_mut(&mut self, id: EventId) -> Option<&mut Event> {
        self.events.get_mut(&id.index())
    }

    fn send_exceptions(&mut self, mask: OsExceptionMask, queue: QueueId) -> Result<()> {
        self.sent_exceptions.push((mask, queue));
        Ok(())
    }

    fn queue(&self, id: QueueId) -> &dyn QueueContext {
        self.queues.get(&id.index()).expect("unknown queue in FakeProcess")
    }

    fn queue_mut(&mut self, id: QueueId) -> &mut dyn QueueContext {
        self.queues.get_mut(&id.index()).expect("unknown queue in FakeProcess")
    }

    fn agent(&self, id: AgentId) -> &dyn AgentContext {
        self.agents.get(&id.index()).expect("unknown agent in FakeProcess")
    }

    fn agent_mut(&mut self, id: AgentId) -> &mut dyn AgentContext {
        self.agents.get_mut(&id.index()).expect("unknown agent in FakeProcess")
    }
}

/// A fake hardware queue: tracks suspension state only.
#[derive(Default, Clone, Copy)]
pub struct FakeQueue {
    pub suspended: bool,
    pub forward_progress_needed: bool,
}

impl QueueContext for FakeQueue {
    fn is_suspended(&self) -> bool {
        self.suspended
    }

    fn suspend(&mut self) -> Result<()> {
        self.suspended = true;
        Ok(())
    }

    fn resume(&mut self) -> Result<()> {
        self.suspended = false;
        Ok(())
    }

    fn forward_progress_needed(&self) -> bool {
        self.forward_progress_needed
    }
}

/// A fake agent: tracks the sticky device-memory-violation bit only.
#[derive(Default, Clone, Copy)]
pub struct FakeAgent {
    pub device_memory_violation: bool,
}

impl AgentContext for FakeAgent {
    fn device_memory_violation(&self) -> bool {
        self.device_memory_violation
    }

    fn clear_device_memory_violation(&mut self) {
        self.device_memory_violation = false;
    }
}
