// Copyright (c) 2024 Leela Aurelia, git@elia.garden
//
// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL-2.0) or the
// GNU General Public License Version 3 (GPL-3).
// If a copy of these licenses was not distributed with this file, you can
// obtain them at https://mozilla.org/MPL/2.0/ and http://www.gnu.org/licenses/.

//! Opaque handle types for the entities the core deals with. Each is an
//! arena index paired with a generation counter, so a handle outliving the
//! slot it pointed at is rejected instead of silently aliasing whatever
//! reused that slot.

use std::fmt;

macro_rules! handle {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, Hash)]
        #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
        pub struct $name {
            index: u32,
            generation: u32,
        }

        impl $name {
            /// Construct a handle for slot `index` at `generation`. Only the
            /// arena that owns the slot should call this.
            pub fn new(index: u32, generation: u32) -> Self {
                Self { index, generation }
            }

            pub fn index(self) -> u32 {
                self.index
            }

            pub fn generation(self) -> u32 {
                self.generation
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({}#{})", stringify!($name), self.index, self.generation)
            }
        }
    };
}

handle!(WaveId, "Opaque, stable handle to a wave.");
handle!(QueueId, "Opaque handle to the owning queue.");
handle!(AgentId, "Opaque handle to the owning agent (GPU).");
handle!(ProcessId, "Opaque handle to the owning process.");
handle!(DispatchId, "Opaque handle to the dispatch that launched a wave.");
handle!(ArchitectureId, "Opaque handle to an architecture descriptor.");
handle!(EventId, "Opaque handle to a client-visible event.");
handle!(WatchpointId, "Opaque handle to a watchpoint.");

/// Handle into a [`crate::components::displaced_stepping::DisplacedSteppingArena`].
/// Distinct from the other handles: it indexes an arena owned by the queue,
/// not a `process.create`d object, so it is kept separate.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct DisplacedSteppingHandle {
    pub(crate) slot: u32,
}
