// Copyright (c) 2024 Leela Aurelia, git@elia.garden
//
// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL-2.0) or the
// GNU General Public License Version 3 (GPL-3).
// If a copy of these licenses was not distributed with this file, you can
// obtain them at https://mozilla.org/MPL/2.0/ and http://www.gnu.org/licenses/.

//! Address-space-aware memory transfer: global, local (LDS),
//! private swizzled, and private unswizzled.

use crate::{error::Error, process::ProcessContext};

/// `global`: a direct partial transfer to/from the process's global memory,
/// no local bounds logic of our own.
pub fn transfer_global(
    process: &mut dyn ProcessContext,
    addr: u64,
    buf: &mut [u8],
    write: bool,
) -> Result<usize, Error> {
    if write {
        process.write_global_memory_partial(addr, buf)
    } else {
        process.read_global_memory_partial(addr, buf)
    }
}

/// `local` (LDS): requires the owning queue to be suspended; bounds are the
/// wave group's LDS allocation size. Out-of-range is truncated; a zero-size
/// request within bounds succeeds trivially; a request entirely past the
/// end fails.
pub fn transfer_local(
    process: &mut dyn ProcessContext,
    queue_suspended: bool,
    lds_base: u64,
    lds_size: usize,
    addr: u32,
    buf: &mut [u8],
    write: bool,
) -> Result<usize, Error> {
    debug_assert!(queue_suspended, "LDS transfer requires the queue to be suspended");
    let addr = addr as usize;
    if addr > lds_size || (addr == lds_size && !buf.is_empty()) {
        return Err(Error::MemoryAccess);
    }
    let truncated_len = buf.len().min(lds_size - addr);
    if truncated_len == 0 {
        return Ok(0);
    }
    let global_addr = lds_base + addr as u64;
    let slice = &mut buf[..truncated_len];
    let transferred = if write {
        process.write_global_memory_partial(global_addr, slice)?
    } else {
        process.read_global_memory_partial(global_addr, slice)?
    };
    if transferred == 0 && !buf.is_empty() {
        return Err(Error::MemoryAccess);
    }
    Ok(transferred)
}

/// `private_swizzled`: per-lane scratch memory, interleaved across lanes so
/// consecutive bytes of one lane's private memory are `lane_count` dwords
/// apart in the backing global allocation.
///
/// Transfers proceed one dword-aligned chunk at a time: an initial partial
/// chunk to reach dword alignment, then whole dwords, then a final partial
/// chunk. Each chunk is bounds-checked independently; a short transfer on
/// any chunk ends the loop.
pub fn transfer_private_swizzled(
    process: &mut dyn ProcessContext,
    scratch_base: u64,
    scratch_size: usize,
    lane_id: Option<u32>,
    lane_count: u32,
    addr: u64,
    buf: &mut [u8],
    write: bool,
) -> Result<usize, Error> {
    let lane_id = lane_id.filter(|&l| l < lane_count).ok_or(Error::InvalidLaneId)?;

    let mut cur_addr = addr;
    let mut transferred_total = 0usize;
    let mut remaining = buf.len();
    let mut cursor = 0usize;

    while remaining > 0 {
        let misalignment = (cur_addr % 4) as usize;
        let chunk_len = if misalignment != 0 {
            (4 - misalignment).min(remaining)
        } else {
            remaining.min(4)
        };

        let dword_index = cur_addr / 4;
        let global_offset =
            (dword_index * u64::from(lane_count) * 4) + (u64::from(lane_id) * 4) + misalignment as u64;

        if global_offset as usize + chunk_len > scratch_size {
            break;
        }
        let global_addr = scratch_base + global_offset;
        let slice = &mut buf[cursor..cursor + chunk_len];
        let chunk_transferred = if write {
            process.write_global_memory_partial(global_addr, slice)?
        } else {
            process.read_global_memory_partial(global_addr, slice)?
        };

        cur_addr += chunk_transferred as u64;
        cursor += chunk_transferred;
        remaining -= chunk_transferred;
        transferred_total += chunk_transferred;

        if chunk_transferred < chunk_len {
            break;
        }
    }

    if transferred_total == 0 && !buf.is_empty() {
        return Err(Error::MemoryAccess);
    }
    Ok(transferred_total)
}

/// `private_unswizzled`: flat scratch memory, one partial transfer bounded
/// by `scratch_size`.
pub fn transfer_private_unswizzled(
    process: &mut dyn ProcessContext,
    scratch_base: u64,
    scratch_size: usize,
    addr: u64,
    buf: &mut [u8],
    write: bool,
) -> Result<usize, Error> {
    if addr as usize > scratch_size {
        return Err(Error::MemoryAccess);
    }
    let truncated_len = buf.len().min(scratch_size - addr as usize);
    let slice = &mut buf[..truncated_len];
    let transferred = if write {
        process.write_global_memory_partial(scratch_base + addr, slice)?
    } else {
        process.read_global_memory_partial(scratch_base + addr, slice)?
    };
    if transferred == 0 && !buf.is_empty() {
        return Err(Error::MemoryAccess);
    }
    Ok(transferred)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeProcess;

    #[test]
    fn swizzled_read_crossing_lane_boundary_matches_expected_offsets() {
        // lane_count=64, lane_id=7, 6-byte read at segment address 3
        let mut process = FakeProcess::new();
        let scratch_base = 0x8000;
        for i in 0..0x1000u64 {
            process.write_global_memory(scratch_base + i, &[i as u8]).unwrap();
        }

        let mut buf = [0u8; 6];
        let n = transfer_private_swizzled(
            &mut process,
            scratch_base,
            0x1000,
            Some(7),
            64,
            3,
            &mut buf,
            false,
        )
        .unwrap();
        assert_eq!(n, 6);

        let expect_byte = |offset: u64| -> u8 { offset as u8 };
        assert_eq!(buf[0], expect_byte(0 * 64 * 4 + 7 * 4 + 3));
        assert_eq!(buf[1], expect_byte(1 * 64 * 4 + 7 * 4 + 0));
        assert_eq!(buf[2], expect_byte(1 * 64 * 4 + 7 * 4 + 1));
        assert_eq!(buf[3], expect_byte(1 * 64 * 4 + 7 * 4 + 2));
        assert_eq!(buf[4], expect_byte(1 * 64 * 4 + 7 * 4 + 3));
        assert_eq!(buf[5], expect_byte(2 * 64 * 4 + 7 * 4 + 0));
    }

    #[test]
    fn swizzled_rejects_out_of_range_lane() {
        let mut process = FakeProcess::new();
        let mut buf = [0u8; 4];
        let err = transfer_private_swizzled(&mut process, 0, 0x1000, Some(64), 64, 0, &mut buf, false)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidLaneId));
    }

    #[test]
    fn local_zero_size_within_bounds_succeeds() {
        let mut process = FakeProcess::new();
        let n = transfer_local(&mut process, true, 0x9000, 0x100, 0x100, &mut [], false).unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn local_entirely_out_of_range_fails() {
        let mut process = FakeProcess::new();
        let mut buf = [0u8; 4];
        let err = transfer_local(&mut process, true, 0x9000, 0x100, 0x200, &mut buf, false).unwrap_err();
        assert!(matches!(err, Error::MemoryAccess));
    }

    #[test]
    fn local_truncates_partial_overrun() {
        let mut process = FakeProcess::new();
        process.write_global_memory(0x9000 + 0xfe, &[1, 2]).unwrap();
        let mut buf = [0u8; 4];
        let n = transfer_local(&mut process, true, 0x9000, 0x100, 0xfe, &mut buf, false).unwrap();
        assert_eq!(n, 2);
    }
}
