use std::num::NonZeroU32;

use crate::tag::{DSIZE, WSIZE};

/// This is the structure of a block. A block is identified by the arena
/// offset of its payload, everything else is found from there by arithmetic
/// on the sizes stored in its tags.
///
/// ```text
///            allocated                              free
///
/// +---------------------+ <- header    +---------------------+ <- header
/// |   size | p | a=1    |              |   size | p | a=0    |
/// +---------------------+ <- payload   +---------------------+ <- payload
/// |                     |              |   prev link (u32)   |
/// |       payload       |              +---------------------+
/// |     (caller's)      |              |   next link (u32)   |
/// |                     |              +---------------------+
/// |                     |              |       unused        |
/// +---------------------+ <- footer    +---------------------+ <- footer
/// |   size | p | a=1    |              |   size | p | a=0    |
/// +---------------------+              +---------------------+
/// ```
///
/// `size` counts the header and footer, so the next block's payload is
/// always `payload + size` and the previous block's footer sits right before
/// our header. Payload offsets are multiples of [`DSIZE`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct Block(usize);

impl Block {
    #[inline]
    pub const fn at(payload: usize) -> Self {
        Block(payload)
    }

    #[inline]
    pub const fn payload(self) -> usize {
        self.0
    }

    #[inline]
    pub const fn header(self) -> usize {
        self.0 - WSIZE
    }

    /// Footer offset of this block, given its size.
    #[inline]
    pub const fn footer(self, size: usize) -> usize {
        self.0 + size - DSIZE
    }

    /// Footer offset of the physically preceding block.
    #[inline]
    pub const fn prev_footer(self) -> usize {
        self.0 - DSIZE
    }

    #[inline]
    pub const fn next(self, size: usize) -> Block {
        Block(self.0 + size)
    }

    #[inline]
    pub const fn prev(self, prev_size: usize) -> Block {
        Block(self.0 - prev_size)
    }
}

/// A block whose tag says it is free.
///
/// Only obtainable through [`crate::heap::Heap::classify`] (or from code that
/// just wrote a free tag), so the free-list code can only ever read links
/// out of payloads that really hold links.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct FreeBlock(Block);

impl FreeBlock {
    /// Caller guarantees the tag at `block` has its allocated bit clear.
    #[inline]
    pub(crate) const fn assume_free(block: Block) -> Self {
        FreeBlock(block)
    }

    #[inline]
    pub const fn block(self) -> Block {
        self.0
    }
}

/// What a block's header says about it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum BlockKind {
    Free(FreeBlock),
    Allocated(Block),
}

/// Handle to a live allocation: the arena offset of its payload.
///
/// Pointers are only produced by the allocator and are never zero since the
/// prologue occupies the start of the heap.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pointer(NonZeroU32);

impl Pointer {
    /// Only called for payloads past the prologue, which the heap extender
    /// keeps inside the 32-bit offset space.
    #[inline]
    pub(crate) fn from_block(block: Block) -> Self {
        debug_assert!(block.payload() <= u32::MAX as usize);

        match NonZeroU32::new(block.payload() as u32) {
            Some(offset) => Pointer(offset),
            None => unreachable!("offset zero belongs to the prologue"),
        }
    }

    #[inline]
    pub(crate) const fn block(self) -> Block {
        Block(self.0.get() as usize)
    }

    /// Offset of the payload from the start of the heap.
    #[inline]
    pub const fn offset(self) -> usize {
        self.0.get() as usize
    }
}
