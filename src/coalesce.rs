use crate::{
    block::{BlockKind, FreeBlock},
    freelist::{FreeLists, class_of},
    heap::Heap,
    source::MemorySource,
    tag::Tag,
};

impl<S: MemorySource> Heap<S> {
    /// Merges the free, unlisted `block` with its free neighbours and puts
    /// the result on the list of its new size class.
    ///
    /// ```text
    ///  case 1:  | alloc |  blk  | alloc |   ->  no merge
    ///  case 2:  | free  |  blk  | alloc |   ->  | prev + blk        | alloc |
    ///  case 3:  | alloc |  blk  | free  |   ->  | alloc | blk + next        |
    ///  case 4:  | free  |  blk  | free  |   ->  | prev + blk + next         |
    /// ```
    ///
    /// The predecessor is located through the bit cached in `block`'s own
    /// header, the successor through its header (the epilogue guarantees there
    /// always is one). Neighbours are unlinked before their tags are rewritten.
    ///
    /// Returns the start of the merged region, which is the predecessor in
    /// cases 2 and 4.
    pub(crate) fn coalesce(&mut self, block: FreeBlock, lists: &FreeLists) -> FreeBlock {
        let merged = self.merge_with_next(block);
        let merged = self.merge_with_prev(merged);

        let size = self.tag(merged.block()).size();
        lists.insert(self, class_of(size), merged);

        merged
    }

    /// Absorbs the following block if it is free.
    fn merge_with_next(&mut self, block: FreeBlock) -> FreeBlock {
        let next = self.next_block(block.block());

        if let BlockKind::Free(next) = self.classify(next) {
            FreeLists::remove(self, next);

            let tag = self.tag(block.block());
            let size = tag.size() + self.tag(next.block()).size();
            self.set_tags(block.block(), Tag::new(size, false, tag.is_prev_allocated()));
        }

        block
    }

    /// Lets the preceding block absorb this one if it is free.
    fn merge_with_prev(&mut self, block: FreeBlock) -> FreeBlock {
        let Some(prev) = self.free_prev_block(block.block()) else {
            return block;
        };

        FreeLists::remove(self, prev);

        // The block before `prev` is allocated (no two free blocks are ever
        // adjacent), and `prev`'s header already caches that.
        let tag = self.tag(prev.block());
        let size = tag.size() + self.tag(block.block()).size();
        self.set_tags(prev.block(), Tag::new(size, false, tag.is_prev_allocated()));

        prev
    }
}
