// Copyright (c) 2024 Leela Aurelia, git@elia.garden
//
// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL-2.0) or the
// GNU General Public License Version 3 (GPL-3).
// If a copy of these licenses was not distributed with this file, you can
// obtain them at https://mozilla.org/MPL/2.0/ and http://www.gnu.org/licenses/.

//! Displaced-stepping buffers, shared by every wave of a queue that hits
//! the same `from` pc.
//!
//! Modeled as an arena owned by the queue, with per-wave handles and
//! explicit `retain`/`release` rather than a reference-counted pointer:
//! an arena-of-buffers plus a per-wave index avoids interior-mutable
//! shared ownership.

use crate::handles::{DisplacedSteppingHandle, QueueId};

/// A single displaced-stepping buffer.
#[derive(Clone, Debug)]
pub struct DisplacedSteppingBuffer {
    pub queue: QueueId,
    /// Original pc where the breakpoint sits.
    pub from: u64,
    /// Scratch pc the instruction actually executes at. `None` when
    /// `is_simulated` — there is no scratch address in that case.
    pub to: Option<u64>,
    /// The reconstructed bytes of the instruction that would have executed
    /// at `from` had the breakpoint not been written over it.
    pub original_instruction: Vec<u8>,
    pub is_simulated: bool,
}

struct Slot {
    buffer: DisplacedSteppingBuffer,
    refcount: u32,
}

/// Per-queue arena of displaced-stepping buffers.
#[derive(Default)]
pub struct DisplacedSteppingArena {
    slots: Vec<Option<Slot>>,
}

impl DisplacedSteppingArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Find an existing buffer for `(queue, from)` and retain it.
    pub fn find_and_retain(&mut self, queue: QueueId, from: u64) -> Option<DisplacedSteppingHandle> {
        for (i, slot) in self.slots.iter_mut().enumerate() {
            if let Some(s) = slot {
                if s.buffer.queue == queue && s.buffer.from == from {
                    s.refcount += 1;
                    log::debug!(
                        "displaced stepping slot {i}: retained for queue {queue:?} from {from:#x}, refcount now {}",
                        s.refcount
                    );
                    return Some(DisplacedSteppingHandle { slot: i as u32 });
                }
            }
        }
        None
    }

    /// Insert a freshly-created buffer with refcount 1, reusing a freed slot
    /// if one is available.
    pub fn insert(&mut self, buffer: DisplacedSteppingBuffer) -> DisplacedSteppingHandle {
        let slot = Slot { buffer, refcount: 1 };
        for (i, s) in self.slots.iter_mut().enumerate() {
            if s.is_none() {
                *s = Some(slot);
                return DisplacedSteppingHandle { slot: i as u32 };
            }
        }
        self.slots.push(Some(slot));
        DisplacedSteppingHandle {
            slot: (self.slots.len() - 1) as u32,
        }
    }

    pub fn get(&self, handle: DisplacedSteppingHandle) -> &DisplacedSteppingBuffer {
        &self.slot(handle).buffer
    }

    pub fn refcount(&self, handle: DisplacedSteppingHandle) -> u32 {
        self.slot(handle).refcount
    }

    /// Release one reference. Returns `true` if this was the last one and
    /// the slot was freed.
    pub fn release(&mut self, handle: DisplacedSteppingHandle) -> bool {
        let idx = handle.slot as usize;
        let freed = {
            let slot = self.slots[idx]
                .as_mut()
                .expect("double release of displaced stepping buffer");
            slot.refcount -= 1;
            slot.refcount == 0
        };
        if freed {
            log::debug!("displaced stepping slot {idx}: refcount hit zero, freeing");
            self.slots[idx] = None;
        }
        freed
    }

    fn slot(&self, handle: DisplacedSteppingHandle) -> &Slot {
        self.slots[handle.slot as usize]
            .as_ref()
            .expect("dangling displaced stepping handle")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handles::QueueId;

    fn queue(i: u32) -> QueueId {
        QueueId::new(i, 0)
    }

    #[test]
    fn two_starts_at_same_pc_share_one_buffer() {
        let mut arena = DisplacedSteppingArena::new();
        let q = queue(1);
        assert!(arena.find_and_retain(q, 0x2000).is_none());

        let handle = arena.insert(DisplacedSteppingBuffer {
            queue: q,
            from: 0x2000,
            to: Some(0xF0000),
            original_instruction: vec![0; 4],
            is_simulated: false,
        });
        assert_eq!(arena.refcount(handle), 1);

        let same = arena
            .find_and_retain(q, 0x2000)
            .expect("second start should find the existing buffer");
        assert_eq!(same, handle);
        assert_eq!(arena.refcount(handle), 2);

        assert!(!arena.release(handle));
        assert_eq!(arena.refcount(handle), 1);
        assert!(arena.release(handle));
    }

    #[test]
    fn different_pc_gets_its_own_buffer() {
        let mut arena = DisplacedSteppingArena::new();
        let q = queue(1);
        let a = arena.insert(DisplacedSteppingBuffer {
            queue: q,
            from: 0x1000,
            to: Some(0x1),
            original_instruction: vec![],
            is_simulated: false,
        });
        assert!(arena.find_and_retain(q, 0x1004).is_none());
        let b = arena.insert(DisplacedSteppingBuffer {
            queue: q,
            from: 0x1004,
            to: Some(0x2),
            original_instruction: vec![],
            is_simulated: false,
        });
        assert_ne!(a, b);
    }
}
