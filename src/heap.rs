use log::{debug, warn};

use crate::{
    block::{Block, BlockKind, FreeBlock},
    error::{HeapError, HeapResult},
    freelist::NUM_CLASSES,
    source::MemorySource,
    tag::{DSIZE, MAX_BLOCK_SIZE, MIN_BLOCK_SIZE, Tag, WSIZE},
};

/// Payload offset of the first size-class sentinel.
pub(crate) const FIRST_SENTINEL: usize = DSIZE;

/// Payload offset of the first block after the prologue.
pub(crate) const FIRST_BLOCK: usize = FIRST_SENTINEL + NUM_CLASSES * MIN_BLOCK_SIZE;

/// Bytes taken by the heap before any block is handed out: the alignment
/// pad word, the sentinel blocks and the epilogue.
pub(crate) const PROLOGUE_SIZE: usize = FIRST_BLOCK;

/// The arena. Owns the memory source and is the only place where tag words
/// and free-list links are read from or written to raw bytes.
///
/// ```text
///  0     4          8                             FIRST_BLOCK - 4         len - 4
///  +-----+----------+------+-----+----------+-----+-----------+- ... -----+----------+
///  | pad | hdr s[0] | prev | next| ftr s[0] | ... |  block    |  blocks   | epilogue |
///  +-----+----------+------+-----+----------+-----+-----------+- ... -----+----------+
///        \_________ sentinel block 0 ______/       \__ first real block
/// ```
///
/// Every word access is bounds checked by slice indexing, so a wrong offset
/// panics instead of touching memory outside the heap.
pub(crate) struct Heap<S: MemorySource> {
    source: S,
}

impl<S: MemorySource> Heap<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.source.len()
    }

    #[inline]
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        self.source.bytes_mut()
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn into_source(self) -> S {
        self.source
    }

    /// Lays down an empty heap: pad word, one allocated sentinel block per
    /// size class (each anchoring an empty circular list) and the epilogue.
    pub fn format(&mut self) -> HeapResult<()> {
        self.source.reset();

        if self.source.grow(PROLOGUE_SIZE).is_none() {
            warn!("memory source cannot hold the {PROLOGUE_SIZE} byte prologue");
            return Err(HeapError::OutOfMemory {
                requested: PROLOGUE_SIZE,
                heap_size: 0,
            });
        }

        self.write_word(0, 0);

        for class in 0..NUM_CLASSES {
            let sentinel = Block::at(FIRST_SENTINEL + class * MIN_BLOCK_SIZE);

            self.set_tags(sentinel, Tag::new(MIN_BLOCK_SIZE, true, true));
            self.set_prev_link(sentinel, sentinel);
            self.set_next_link(sentinel, sentinel);
        }

        self.write_word(self.epilogue().header(), Tag::EPILOGUE.raw());

        debug!("formatted heap: {NUM_CLASSES} size classes, {PROLOGUE_SIZE} bytes of prologue");

        Ok(())
    }

    /// Grows the heap by `bytes` (a multiple of [`DSIZE`]) and formats the
    /// new space as one free block followed by a fresh epilogue.
    ///
    /// The returned block is not on any free list yet and may sit right after
    /// a free block, so the caller has to coalesce it.
    pub fn extend(&mut self, bytes: usize) -> HeapResult<FreeBlock> {
        debug_assert!(bytes % DSIZE == 0 && bytes >= MIN_BLOCK_SIZE);

        let heap_size = self.len();
        let old_epilogue = self.epilogue();
        let prev_allocated = self.tag(old_epilogue).is_prev_allocated();

        // Offsets and links are 32-bit, so the heap may never outgrow them.
        let addressable = heap_size.checked_add(bytes).is_some_and(|end| end <= MAX_BLOCK_SIZE);

        let Some(old_end) = addressable.then(|| self.source.grow(bytes)).flatten() else {
            warn!("out of memory: cannot grow {heap_size} byte heap by {bytes} bytes");
            return Err(HeapError::OutOfMemory {
                requested: bytes,
                heap_size,
            });
        };

        // The old epilogue header becomes the header of the new block.
        let block = Block::at(old_end);
        debug_assert_eq!(block, old_epilogue);

        self.set_tags(block, Tag::new(bytes, false, prev_allocated));
        self.write_word(block.next(bytes).header(), Tag::new(0, true, false).raw());

        debug!("extended heap by {bytes} bytes to {} bytes", self.len());

        Ok(FreeBlock::assume_free(block))
    }

    /// The epilogue, seen as a zero-size block whose header is the last word.
    #[inline]
    pub fn epilogue(&self) -> Block {
        Block::at(self.len())
    }

    #[inline]
    pub fn read_word(&self, offset: usize) -> u32 {
        let mut word = [0u8; WSIZE];
        word.copy_from_slice(&self.source.bytes()[offset..offset + WSIZE]);
        u32::from_ne_bytes(word)
    }

    #[inline]
    pub fn write_word(&mut self, offset: usize, value: u32) {
        self.source.bytes_mut()[offset..offset + WSIZE].copy_from_slice(&value.to_ne_bytes());
    }

    /// Header tag of `block`.
    #[inline]
    pub fn tag(&self, block: Block) -> Tag {
        Tag::from_raw(self.read_word(block.header()))
    }

    /// Footer tag of `block`, located through its header's size.
    #[inline]
    pub fn footer_tag(&self, block: Block) -> Tag {
        let size = self.tag(block).size();
        Tag::from_raw(self.read_word(block.footer(size)))
    }

    /// Writes `tag` to the header and, for blocks with a size, to the footer.
    #[inline]
    pub fn set_tags(&mut self, block: Block, tag: Tag) {
        self.write_word(block.header(), tag.raw());
        if tag.size() > 0 {
            self.write_word(block.footer(tag.size()), tag.raw());
        }
    }

    /// Updates the cached predecessor bit of `block` without touching the rest.
    #[inline]
    pub fn set_prev_allocated(&mut self, block: Block, prev_allocated: bool) {
        let tag = self.tag(block).with_prev_allocated(prev_allocated);
        self.set_tags(block, tag);
    }

    #[inline]
    pub fn next_block(&self, block: Block) -> Block {
        block.next(self.tag(block).size())
    }

    /// The physically preceding block, if it is free.
    ///
    /// Only a free predecessor is guaranteed to have a meaningful footer for
    /// this purpose, so the cached bit in our own header is consulted first.
    #[inline]
    pub fn free_prev_block(&self, block: Block) -> Option<FreeBlock> {
        if self.tag(block).is_prev_allocated() {
            return None;
        }

        let prev_size = Tag::from_raw(self.read_word(block.prev_footer())).size();
        Some(FreeBlock::assume_free(block.prev(prev_size)))
    }

    #[inline]
    pub fn classify(&self, block: Block) -> BlockKind {
        if self.tag(block).is_allocated() {
            BlockKind::Allocated(block)
        } else {
            BlockKind::Free(FreeBlock::assume_free(block))
        }
    }

    /// Payload bytes of an allocated block (size minus header and footer).
    #[inline]
    pub fn payload(&self, block: Block) -> &[u8] {
        let size = self.tag(block).size();
        &self.source.bytes()[block.payload()..block.payload() + size - DSIZE]
    }

    #[inline]
    pub fn payload_mut(&mut self, block: Block) -> &mut [u8] {
        let size = self.tag(block).size();
        &mut self.source.bytes_mut()[block.payload()..block.payload() + size - DSIZE]
    }

    /// Iterates over the real blocks in address order, stopping at the epilogue.
    pub fn blocks(&self) -> Blocks<'_, S> {
        Blocks {
            heap: self,
            current: Block::at(FIRST_BLOCK),
        }
    }
}

/// Address-ordered walk over the heap's blocks.
pub(crate) struct Blocks<'a, S: MemorySource> {
    heap: &'a Heap<S>,
    current: Block,
}

impl<S: MemorySource> Iterator for Blocks<'_, S> {
    type Item = (Block, Tag);

    fn next(&mut self) -> Option<Self::Item> {
        if self.current.payload() >= self.heap.len() {
            return None;
        }

        let tag = self.heap.tag(self.current);

        // A zero size would loop forever; the validator reports it.
        if tag.size() == 0 {
            return None;
        }

        let block = self.current;
        self.current = block.next(tag.size());
        Some((block, tag))
    }
}
