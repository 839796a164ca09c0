//! Rounding helpers shared by the block codec, the allocator and the memory sources.

/// Rounds `value` up to the next multiple of `alignment`, which must be a power of two.
///
/// Used both for request sizes (aligned to [`crate::tag::DSIZE`]) and for
/// reservation sizes of [`crate::kernel::MmapSource`] (aligned to the page size).
#[inline]
pub const fn align(value: usize, alignment: usize) -> usize {
    (value + alignment - 1) & !(alignment - 1)
}

/// Same as [`align`] but returns `None` instead of wrapping when `value` is
/// close to `usize::MAX`.
#[inline]
pub const fn checked_align(value: usize, alignment: usize) -> Option<usize> {
    match value.checked_add(alignment - 1) {
        Some(v) => Some(v & !(alignment - 1)),
        None => None,
    }
}

/// Rounds `value` down to a multiple of `alignment`.
#[inline]
pub const fn align_down(value: usize, alignment: usize) -> usize {
    value & !(alignment - 1)
}
