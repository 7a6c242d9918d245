// Copyright (c) 2024 Leela Aurelia, git@elia.garden
//
// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL-2.0) or the
// GNU General Public License Version 3 (GPL-3).
// If a copy of these licenses was not distributed with this file, you can
// obtain them at https://mozilla.org/MPL/2.0/ and http://www.gnu.org/licenses/.

//! Contracts for the external collaborators named but not implemented by
//! the wave control core: the process/queue/agent object
//! model and the OS driver transport underneath it. A host crate implements
//! these once against its real KFD/driver plumbing; `testing` ships
//! in-memory fakes so the core's own test suite can run standalone.

use crate::{error::Result, events::Event, exceptions::OsExceptionMask, handles::QueueId};

/// `process.read/write_global_memory[_partial]`, `enqueue_event`,
/// `send_exceptions`.
pub trait ProcessContext {
    /// Read exactly `dst.len()` bytes at `addr`. Failure is surfaced to the
    /// client for query paths and is fatal for resume-mode state changes and
    /// cache flushes.
    fn read_global_memory(&mut self, addr: u64, dst: &mut [u8]) -> Result<()>;
    /// Write exactly `src.len()` bytes at `addr`.
    fn write_global_memory(&mut self, addr: u64, src: &[u8]) -> Result<()>;
    /// Best-effort read; returns the number of bytes actually transferred
    /// before hitting the end of the mapped range.
    fn read_global_memory_partial(&mut self, addr: u64, dst: &mut [u8]) -> Result<usize>;
    /// Best-effort write, mirroring `read_global_memory_partial`.
    fn write_global_memory_partial(&mut self, addr: u64, src: &[u8]) -> Result<usize>;

    /// Enqueue `event` on the process event queue, returning its assigned id.
    fn enqueue_event(&mut self, event: Event) -> crate::handles::EventId;
    /// Look up a previously enqueued event by id.
    fn event(&self, id: crate::handles::EventId) -> Option<&Event>;
    /// Mutable lookup, used by clients marking an event reported/processed.
    fn event_mut(&mut self, id: crate::handles::EventId) -> Option<&mut Event>;

    /// Translate and deliver `mask` to the driver for `queue`.
    fn send_exceptions(&mut self, mask: OsExceptionMask, queue: QueueId) -> Result<()>;

    fn queue(&self, id: QueueId) -> &dyn QueueContext;
    fn queue_mut(&mut self, id: QueueId) -> &mut dyn QueueContext;
    fn agent(&self, id: crate::handles::AgentId) -> &dyn AgentContext;
    fn agent_mut(&mut self, id: crate::handles::AgentId) -> &mut dyn AgentContext;
}

/// `queue.is_suspended` and the suspend/resume transport underneath it.
pub trait QueueContext {
    fn is_suspended(&self) -> bool;
    /// Suspend hardware execution of this queue. Idempotent: suspending an
    /// already-suspended queue is a no-op.
    fn suspend(&mut self) -> Result<()>;
    /// Resume hardware execution of this queue.
    fn resume(&mut self) -> Result<()>;
    /// Whether this queue has work that needs the hardware running to make
    /// progress, consulted by `list_waves` before resuming.
    fn forward_progress_needed(&self) -> bool;
}

/// `agent.exceptions`, `agent.clear_exceptions`, plus the sticky
/// `device_memory_violation` bit `set_state` consults on the way out of
/// `STOP`.
pub trait AgentContext {
    fn device_memory_violation(&self) -> bool;
    fn clear_device_memory_violation(&mut self);
}
