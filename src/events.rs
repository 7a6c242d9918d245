// Copyright (c) 2024 Leela Aurelia, git@elia.garden
//
// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL-2.0) or the
// GNU General Public License Version 3 (GPL-3).
// If a copy of these licenses was not distributed with this file, you can
// obtain them at https://mozilla.org/MPL/2.0/ and http://www.gnu.org/licenses/.

//! Client-visible events and the three-state lifecycle `client_visible_state`
//! and `resume` depend on.

use crate::handles::{EventId, WaveId};

/// The two event kinds the wave control core ever creates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    WaveStop,
    WaveCommandTerminated,
}

/// Where an event sits in the client's consumption pipeline.
///
/// A stop is not "visible" to the client until the event reaches
/// [`EventState::Reported`]; it cannot be resumed past until the client has
/// additionally marked it [`EventState::Processed`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventState {
    Pending,
    Reported,
    Processed,
}

/// A single event enqueued on the process event queue.
#[derive(Clone, Copy, Debug)]
pub struct Event {
    pub id: EventId,
    pub wave: WaveId,
    pub kind: EventKind,
    pub state: EventState,
}

impl Event {
    pub fn new(id: EventId, wave: WaveId, kind: EventKind) -> Self {
        Self {
            id,
            wave,
            kind,
            state: EventState::Pending,
        }
    }

    /// Has the client observed this event at all?
    pub fn is_reported_or_later(&self) -> bool {
        matches!(self.state, EventState::Reported | EventState::Processed)
    }

    pub fn is_processed(&self) -> bool {
        self.state == EventState::Processed
    }
}
