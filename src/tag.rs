use std::fmt;

use crate::utils::align_down;

/// Size of a tag word (header or footer) and of a free-list link.
pub const WSIZE: usize = 4;

/// Payload alignment. Every block size is a multiple of this, which leaves
/// the low three bits of a tag free for flags.
pub const DSIZE: usize = 8;

/// Smallest block that can hold its own header, footer and both free-list
/// links once it is freed.
pub const MIN_BLOCK_SIZE: usize = 2 * WSIZE + 2 * WSIZE;

/// Largest size a tag word can encode.
pub const MAX_BLOCK_SIZE: usize = align_down(u32::MAX as usize, DSIZE);

const ALLOCATED: u32 = 0b01;
const PREV_ALLOCATED: u32 = 0b10;
const FLAG_MASK: u32 = (DSIZE - 1) as u32;

/// A boundary tag: block size and two flags packed in one 32-bit word.
///
/// ```text
///  31                                   3   2   1   0
/// +---------------------------------------+---+---+---+
/// |              size (bits 3..)          | 0 | p | a |
/// +---------------------------------------+---+---+---+
///   a = this block is allocated
///   p = the physically preceding block is allocated
/// ```
///
/// This is the only type that touches the raw bit layout. Writers always
/// supply the full flag set, so rewriting a size never drops a flag.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tag(u32);

impl Tag {
    /// Tag of the end-of-heap sentinel when the last real block is allocated.
    pub const EPILOGUE: Tag = Tag(ALLOCATED | PREV_ALLOCATED);

    /// Packs a tag. `size` must be aligned and encodable; this is checked in
    /// debug builds only since every internal caller derives sizes from
    /// already valid tags.
    #[inline]
    pub fn new(size: usize, allocated: bool, prev_allocated: bool) -> Self {
        debug_assert!(size % DSIZE == 0, "unaligned block size {size}");
        debug_assert!(size <= MAX_BLOCK_SIZE, "block size {size} does not fit a tag");

        let mut raw = size as u32;
        if allocated {
            raw |= ALLOCATED;
        }
        if prev_allocated {
            raw |= PREV_ALLOCATED;
        }
        Tag(raw)
    }

    /// Packs a tag, returning `None` when `size` is misaligned or too large.
    pub fn checked(size: usize, allocated: bool, prev_allocated: bool) -> Option<Self> {
        if size % DSIZE != 0 || size > MAX_BLOCK_SIZE {
            return None;
        }
        Some(Self::new(size, allocated, prev_allocated))
    }

    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        Tag(raw)
    }

    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn size(self) -> usize {
        (self.0 & !FLAG_MASK) as usize
    }

    #[inline]
    pub const fn is_allocated(self) -> bool {
        self.0 & ALLOCATED != 0
    }

    #[inline]
    pub const fn is_prev_allocated(self) -> bool {
        self.0 & PREV_ALLOCATED != 0
    }

    /// Whether the reserved flag bit is clear.
    #[inline]
    pub const fn is_well_formed(self) -> bool {
        self.0 & FLAG_MASK & !(ALLOCATED | PREV_ALLOCATED) == 0
    }

    #[inline]
    pub const fn with_allocated(self, allocated: bool) -> Self {
        if allocated {
            Tag(self.0 | ALLOCATED)
        } else {
            Tag(self.0 & !ALLOCATED)
        }
    }

    #[inline]
    pub const fn with_prev_allocated(self, prev_allocated: bool) -> Self {
        if prev_allocated {
            Tag(self.0 | PREV_ALLOCATED)
        } else {
            Tag(self.0 & !PREV_ALLOCATED)
        }
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}{}",
            self.size(),
            if self.is_prev_allocated() { 'p' } else { '-' },
            if self.is_allocated() { 'a' } else { 'f' },
        )
    }
}
