// Copyright (c) 2024 Leela Aurelia, git@elia.garden
//
// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL-2.0) or the
// GNU General Public License Version 3 (GPL-3).
// If a copy of these licenses was not distributed with this file, you can
// obtain them at https://mozilla.org/MPL/2.0/ and http://www.gnu.org/licenses/.

use thiserror::Error;

use crate::handles::WaveId;

/// Result type used throughout the wave control core.
pub type Result<T> = std::result::Result<T, Error>;

/// Client-visible error taxonomy.
#[derive(Debug, Error)]
pub enum Error {
    #[error("library not initialized")]
    NotInitialized,

    #[error("wave {0:?} is unknown or has exited")]
    InvalidWaveId(WaveId),

    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("invalid argument compatibility: {0}")]
    InvalidArgumentCompatibility(&'static str),

    #[error("invalid lane id")]
    InvalidLaneId,

    #[error("wave is already stopped")]
    WaveStopped,

    #[error("operation requires the wave to be stopped")]
    WaveNotStopped,

    #[error("a stop is already pending for this wave")]
    WaveOutstandingStop,

    #[error("wave is not resumable: last stop event has not been processed")]
    WaveNotResumable,

    #[error("resume mode must be SINGLE_STEP while a displaced step is outstanding")]
    ResumeDisplacedStepping,

    #[error("instruction cannot be displaced-stepped or simulated")]
    IllegalInstruction,

    #[error("memory access out of range")]
    MemoryAccess,

    #[error("requested field is not available: {0}")]
    NotAvailable(&'static str),

    #[error("client callback failed")]
    ClientCallback,
}
