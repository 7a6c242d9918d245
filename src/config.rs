// Copyright (c) 2024 Leela Aurelia, git@elia.garden
//
// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL-2.0) or the
// GNU General Public License Version 3 (GPL-3).
// If a copy of these licenses was not distributed with this file, you can
// obtain them at https://mozilla.org/MPL/2.0/ and http://www.gnu.org/licenses/.

//! Process-wide tunables that gate core behavior without belonging to any
//! single wave.

/// Configuration shared by all waves of a process.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Config {
    /// If false, the first `update()` of a wave zero-initializes every TTMP
    /// instead of trusting whatever the trap handler left there.
    pub ttmps_setup_enabled: bool,
    /// Whether `WATCHPOINT_COMBINATION` is folded into a plain `WATCHPOINT`
    /// bit for clients that don't distinguish the two.
    pub watchpoint_combination_is_fatal: bool,
    /// Verbose per-flush logging of the register cache. Off by default;
    /// mirrors `Debugger::diagnostic_level` gating high-volume events.
    pub log_register_cache_flushes: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ttmps_setup_enabled: true,
            watchpoint_combination_is_fatal: false,
            log_register_cache_flushes: false,
        }
    }
}

impl Config {
    /// Applies `watchpoint_combination_is_fatal` to a raw stop reason:
    /// folds `WATCHPOINT_COMBINATION` into the plain `WATCHPOINT` bit for
    /// clients that don't distinguish the two.
    pub fn fold_stop_reason(&self, reason: crate::wave::state::StopReason) -> crate::wave::state::StopReason {
        use crate::wave::state::StopReason;
        if self.watchpoint_combination_is_fatal && reason.contains(StopReason::WATCHPOINT_COMBINATION) {
            (reason - StopReason::WATCHPOINT_COMBINATION) | StopReason::WATCHPOINT
        } else {
            reason
        }
    }
}
