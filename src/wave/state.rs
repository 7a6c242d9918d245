// Copyright (c) 2024 Leela Aurelia, git@elia.garden
//
// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL-2.0) or the
// GNU General Public License Version 3 (GPL-3).
// If a copy of these licenses was not distributed with this file, you can
// obtain them at https://mozilla.org/MPL/2.0/ and http://www.gnu.org/licenses/.

use bitflags::bitflags;

/// The three client-visible wave states.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum WaveState {
    Run,
    SingleStep,
    Stop,
}

/// Hidden sub-states orthogonal to [`WaveState`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Visibility {
    #[default]
    Visible,
    HiddenHaltedAtLaunch,
    HiddenAtTerminatingInstruction,
}

/// Resume mode requested by a client.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResumeMode {
    Normal,
    SingleStep,
}

impl ResumeMode {
    pub fn target_state(self) -> WaveState {
        match self {
            ResumeMode::Normal => WaveState::Run,
            ResumeMode::SingleStep => WaveState::SingleStep,
        }
    }
}

bitflags! {
    /// Why a wave stopped. More than one bit may be set at once.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct StopReason: u32 {
        const SINGLE_STEP             = 1 << 0;
        const BREAKPOINT              = 1 << 1;
        const MEMORY_VIOLATION        = 1 << 2;
        const MATH_ERROR              = 1 << 3;
        const ILLEGAL_INSTRUCTION     = 1 << 4;
        const APERTURE_VIOLATION      = 1 << 5;
        const TRAP                    = 1 << 6;
        const WATCHPOINT_COMBINATION  = 1 << 7;
        const WATCHPOINT              = 1 << 8;
    }
}

bitflags! {
    /// Exceptions a client may request be injected on resume.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct Exceptions: u32 {
        const ABORT               = 1 << 0;
        const TRAP                = 1 << 1;
        const MATH_ERROR          = 1 << 2;
        const ILLEGAL_INSTRUCTION = 1 << 3;
        const MEMORY_VIOLATION    = 1 << 4;
        const APERTURE_VIOLATION  = 1 << 5;
    }
}

/// Address-space kinds for memory transfer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddressSpace {
    Global,
    Local,
    PrivateSwizzled,
    PrivateUnswizzled,
}

/// Client-facing wave info queries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaveInfoQuery {
    State,
    StopReason,
    Dispatch,
    Queue,
    Agent,
    Process,
    Architecture,
    Pc,
    ExecMask,
    WorkGroupCoord,
    WaveNumberInWorkGroup,
    Watchpoints,
    LaneCount,
}

impl WaveInfoQuery {
    /// Queries that require `client_visible_state() == STOP`.
    pub fn requires_stopped(self) -> bool {
        matches!(
            self,
            WaveInfoQuery::Pc
                | WaveInfoQuery::ExecMask
                | WaveInfoQuery::StopReason
                | WaveInfoQuery::Watchpoints
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resume_mode_maps_to_expected_state() {
        assert_eq!(ResumeMode::Normal.target_state(), WaveState::Run);
        assert_eq!(ResumeMode::SingleStep.target_state(), WaveState::SingleStep);
    }

    #[test]
    fn stop_reason_bits_combine() {
        let r = StopReason::BREAKPOINT | StopReason::SINGLE_STEP;
        assert!(r.contains(StopReason::BREAKPOINT));
        assert!(r.contains(StopReason::SINGLE_STEP));
        assert!(!r.contains(StopReason::TRAP));
    }
}
