// Copyright (c) 2024 Leela Aurelia, git@elia.garden
//
// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL-2.0) or the
// GNU General Public License Version 3 (GPL-3).
// If a copy of these licenses was not distributed with this file, you can
// obtain them at https://mozilla.org/MPL/2.0/ and http://www.gnu.org/licenses/.

//! Translation between the client-visible [`Exceptions`] bitset and the OS
//! exception mask `process.send_exceptions` expects.

use crate::{error::Error, numutil::NumExt, wave::state::Exceptions};

/// Opaque OS-level exception mask, as understood by `process.send_exceptions`.
/// The bit layout is driver-defined; the core only needs to build one bit at
/// a time and OR them together.
pub type OsExceptionMask = u32;

fn os_bit(e: Exceptions) -> OsExceptionMask {
    match e {
        Exceptions::ABORT => 1 << 0,
        Exceptions::TRAP => 1 << 1,
        Exceptions::MATH_ERROR => 1 << 2,
        Exceptions::ILLEGAL_INSTRUCTION => 1 << 3,
        Exceptions::MEMORY_VIOLATION => 1 << 4,
        Exceptions::APERTURE_VIOLATION => 1 << 5,
        _ => unreachable!("os_bit called with a non-singleton flag"),
    }
}

/// Translate a client exception bitset into the OS mask the driver expects.
///
/// Peels the lowest set bit at a time (`x & -x`); every recognized bit must
/// be consumed by a match arm, and unknown bits must already have been
/// rejected at the API boundary — reaching the `_` arm below is a
/// core bug, not a client error.
pub fn translate(exceptions: Exceptions) -> OsExceptionMask {
    let mut remaining = exceptions;
    let mut mask = 0;
    while !remaining.is_empty() {
        let bit = remaining.bits().lowest_set_bit();
        let flag = Exceptions::from_bits_truncate(bit);
        mask |= os_bit(flag);
        remaining = Exceptions::from_bits_truncate(remaining.bits() & !bit);
    }
    mask
}

/// Validate that `bits` only contains recognized exception flags, per the
/// API-boundary rejection the peeling loop in [`translate`] relies on.
pub fn validate(bits: u32) -> Result<Exceptions, Error> {
    Exceptions::from_bits(bits)
        .ok_or(Error::InvalidArgument("unrecognized exception bits"))
}
