//! This file contains all the helper functions for the allocators.
//! This are functions that don't particularly belong to any concrete module of the program.

/// It aligns `to_be_aligned` using `aligment`.
///
/// This is used to round sizes up to a multiple of the page size and to place
/// pointers on the boundary an allocation asked for. `aligment` must be a power of two.
#[inline]
pub fn align(to_be_aligned: usize, aligment: usize) -> usize {
    debug_assert!(aligment.is_power_of_two());
    (to_be_aligned + aligment - 1) & !(aligment - 1)
}

/// Whether `addr` is a multiple of `aligment`.
#[inline]
pub fn is_aligned(addr: usize, aligment: usize) -> bool {
    addr & (aligment - 1) == 0
}

/// Number of bytes that have to be skipped from `addr` so that `addr + offset`
/// lands on an `aligment` boundary.
#[inline]
pub fn align_offset(addr: usize, offset: usize, aligment: usize) -> usize {
    align(addr + offset, aligment) - (addr + offset)
}

/// Panics if `aligment` is not a power of two. Offsets computed from a bad
/// alignment would be silently wrong, so this is treated as a caller bug.
#[inline]
#[track_caller]
pub(crate) fn check_align(aligment: usize) {
    assert!(
        aligment.is_power_of_two(),
        "alignment {aligment} is not a power of two"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem;

    #[test]
    fn align_pointer_size() {
        let aligments = vec![(1..8, 8), (9..16, 16), (17..24, 24), (25..32, 32)];

        for (sizes, expected) in aligments {
            for size in sizes {
                assert_eq!(expected, align(size, mem::size_of::<usize>()));
            }
        }
    }

    #[test]
    fn align_page_size() {
        // For testing purposes we are assuming the page size is 4096
        let aligments = vec![(1..4096, 4096), (4097..8192, 8192)];

        for (sizes, expected) in aligments {
            for size in sizes {
                assert_eq!(expected, align(size, 4096))
            }
        }
    }

    #[test]
    fn offset_lands_on_boundary() {
        for addr in [0x1000, 0x1001, 0x1007, 0x100f] {
            for offset in [0, 1, 8, 16] {
                let skip = align_offset(addr, offset, 16);
                assert!(skip < 16);
                assert!(is_aligned(addr + skip + offset, 16));
            }
        }
    }

    #[test]
    #[should_panic(expected = "not a power of two")]
    fn bad_alignment_panics() {
        check_align(24);
    }
}
