use log::{debug, error, trace, warn};

use crate::{
    block::{Block, BlockKind, FreeBlock, Pointer},
    checker::HeapStats,
    config::HeapConfig,
    error::{Corruption, HeapError, HeapResult},
    freelist::{FreeLists, NUM_CLASSES, class_of},
    heap::Heap,
    kernel::MmapSource,
    source::{MemorySource, VecSource},
    tag::{DSIZE, MIN_BLOCK_SIZE, Tag},
    utils::checked_align,
};

/// One block as seen by [`SegAlloc::blocks`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    /// Payload offset, equal to [`Pointer::offset`] for allocated blocks.
    pub offset: usize,
    /// Block size including header and footer.
    pub size: usize,
    pub allocated: bool,
}

/// Segregated-fit allocator over a single growable heap.
///
/// Free blocks are kept on [`NUM_CLASSES`] circular lists by size class.
/// Allocation searches from the request's own class upwards and takes the
/// first block that is large enough, splitting off the tail when the
/// remainder can stand on its own. Freed blocks are merged with free
/// neighbours immediately, so the heap never holds two adjacent free blocks.
/// When nothing fits the heap grows by at least
/// [`HeapConfig::chunk_size`] bytes.
///
/// The allocator is single-threaded: every operation takes `&mut self`.
///
/// # Caller contract
///
/// Passing a [`Pointer`] that is not live in *this* allocator to
/// [`SegAlloc::deallocate`], [`SegAlloc::reallocate`] or any accessor (double
/// free, pointer from another heap, pointer from before [`SegAlloc::init`])
/// is not reliably detected. It cannot touch memory outside the heap, but it
/// can corrupt the heap, which [`SegAlloc::validate`] will report. Freeing a
/// block whose header already says free is ignored with a warning.
pub struct SegAlloc<S: MemorySource = VecSource> {
    heap: Heap<S>,
    lists: FreeLists,
    config: HeapConfig,
}

impl SegAlloc<VecSource> {
    /// Allocator over a [`VecSource`] with the default configuration.
    pub fn new() -> HeapResult<Self> {
        Self::with_config(HeapConfig::default())
    }

    /// Allocator over a [`VecSource`] limited to `config.max_heap` bytes.
    pub fn with_config(config: HeapConfig) -> HeapResult<Self> {
        config.validate()?;
        Self::with_source(VecSource::with_limit(config.max_heap), config)
    }
}

impl SegAlloc<MmapSource> {
    /// Allocator over an operating system reservation of `config.max_heap` bytes.
    pub fn mmap(config: HeapConfig) -> HeapResult<Self> {
        config.validate()?;
        Self::with_source(MmapSource::with_limit(config.max_heap)?, config)
    }
}

impl<S: MemorySource> SegAlloc<S> {
    /// Creates an allocator over `source` and initialises its heap.
    pub fn with_source(source: S, config: HeapConfig) -> HeapResult<Self> {
        config.validate()?;

        let mut allocator = Self {
            heap: Heap::new(source),
            lists: FreeLists::new(),
            config,
        };
        allocator.init()?;

        Ok(allocator)
    }

    /// Discards the current heap and lays down an empty one. Every pointer
    /// handed out before is invalid afterwards.
    pub fn init(&mut self) -> HeapResult<()> {
        self.heap.format()
    }

    pub fn config(&self) -> &HeapConfig {
        &self.config
    }

    /// Bytes currently obtained from the memory source.
    pub fn heap_size(&self) -> usize {
        self.heap.len()
    }

    pub fn source(&self) -> &S {
        self.heap.source()
    }

    pub fn into_source(self) -> S {
        self.heap.into_source()
    }

    /// Allocates at least `size` bytes. Returns `None` for a zero-size
    /// request and when the heap cannot grow.
    pub fn allocate(&mut self, size: usize) -> Option<Pointer> {
        self.try_allocate(size).ok().flatten()
    }

    /// Like [`SegAlloc::allocate`] but reports why an allocation failed.
    /// `Ok(None)` is the answer to a zero-size request.
    pub fn try_allocate(&mut self, size: usize) -> HeapResult<Option<Pointer>> {
        if size == 0 {
            return Ok(None);
        }

        let asize = Self::adjusted_size(size)?;

        let block = match self.lists.find_fit(&self.heap, asize) {
            Some(block) => block,
            None => {
                let fresh = self.heap.extend(asize.max(self.config.chunk_size))?;
                self.heap.coalesce(fresh, &self.lists)
            }
        };

        let block = self.place(block, asize);
        trace!("allocate({size}) -> 0x{:x} [{asize} byte block]", block.payload());
        self.after_mutation();

        Ok(Some(Pointer::from_block(block)))
    }

    /// Allocates room for `count` elements of `size` bytes and zeroes it.
    /// Returns `None` when the product is zero or overflows.
    pub fn allocate_zeroed(&mut self, count: usize, size: usize) -> Option<Pointer> {
        let bytes = count.checked_mul(size)?;
        let ptr = self.allocate(bytes)?;

        self.payload_mut(ptr).fill(0);
        Some(ptr)
    }

    /// Frees a block. `None` is accepted and ignored.
    pub fn deallocate(&mut self, ptr: impl Into<Option<Pointer>>) {
        let Some(ptr) = ptr.into() else {
            return;
        };

        let BlockKind::Allocated(block) = self.heap.classify(ptr.block()) else {
            warn!("ignoring free of block 0x{:x}, which is already free", ptr.offset());
            return;
        };

        let tag = self.heap.tag(block);
        self.heap.set_tags(block, tag.with_allocated(false));
        let next = self.heap.next_block(block);
        self.heap.set_prev_allocated(next, false);

        let merged = self.heap.coalesce(FreeBlock::assume_free(block), &self.lists);
        trace!(
            "deallocate(0x{:x}) -> free block 0x{:x} of {} bytes",
            ptr.offset(),
            merged.block().payload(),
            self.heap.tag(merged.block()).size()
        );
        self.after_mutation();
    }

    /// Resizes an allocation by moving it.
    ///
    /// A `None` pointer behaves like [`SegAlloc::allocate`], a zero `size`
    /// like [`SegAlloc::deallocate`] (returning `None`). Otherwise a new block
    /// is allocated, the first `min(usable_size, size)` bytes are copied and
    /// the old block is freed. If the new allocation fails the old block is
    /// left untouched and `None` is returned.
    pub fn reallocate(&mut self, ptr: Option<Pointer>, size: usize) -> Option<Pointer> {
        let Some(old) = ptr else {
            return self.allocate(size);
        };

        if size == 0 {
            self.deallocate(old);
            return None;
        }

        let new = self.allocate(size)?;
        let len = self.usable_size(old).min(size);

        self.heap
            .bytes_mut()
            .copy_within(old.offset()..old.offset() + len, new.offset());
        self.deallocate(old);

        Some(new)
    }

    /// Payload capacity of a live allocation, at least the size it was requested with.
    pub fn usable_size(&self, ptr: Pointer) -> usize {
        self.heap.tag(ptr.block()).size() - DSIZE
    }

    /// The bytes of a live allocation.
    pub fn payload(&self, ptr: Pointer) -> &[u8] {
        self.heap.payload(ptr.block())
    }

    pub fn payload_mut(&mut self, ptr: Pointer) -> &mut [u8] {
        self.heap.payload_mut(ptr.block())
    }

    /// All blocks between the prologue and the epilogue, in address order.
    pub fn blocks(&self) -> impl Iterator<Item = BlockInfo> + '_ {
        self.heap.blocks().map(|(block, tag)| BlockInfo {
            offset: block.payload(),
            size: tag.size(),
            allocated: tag.is_allocated(),
        })
    }

    /// Checks all heap invariants without side effects.
    pub fn validate(&self) -> Result<HeapStats, Corruption> {
        self.heap.validate(&self.lists)
    }

    /// Statistics of a heap that is assumed to be consistent.
    ///
    /// # Panics
    ///
    /// If the heap is corrupted.
    pub fn stats(&self) -> HeapStats {
        match self.validate() {
            Ok(stats) => stats,
            Err(corruption) => panic!("heap corruption: {corruption}"),
        }
    }

    /// Validates the heap and panics on the first violation. With `verbose`
    /// the whole heap is dumped at debug level first.
    pub fn check_heap(&self, verbose: bool) {
        if verbose {
            self.dump();
        }

        match self.validate() {
            Ok(stats) => {
                if verbose {
                    debug!("heap ok: {stats:?}");
                }
            }
            Err(corruption) => {
                error!("heap corruption: {corruption}");
                panic!("heap corruption: {corruption}");
            }
        }
    }

    /// Rounds a request up to a block size: payload plus header and footer,
    /// aligned, and never smaller than [`MIN_BLOCK_SIZE`].
    fn adjusted_size(size: usize) -> HeapResult<usize> {
        let asize = size
            .checked_add(DSIZE)
            .and_then(|padded| checked_align(padded, DSIZE))
            .map(|aligned| aligned.max(MIN_BLOCK_SIZE))
            .ok_or(HeapError::RequestTooLarge { requested: size })?;

        Tag::checked(asize, true, true)
            .map(Tag::size)
            .ok_or(HeapError::RequestTooLarge { requested: size })
    }

    /// Takes `block` off its list and allocates `asize` bytes at its start,
    /// returning the tail to the free lists when it can form its own block.
    fn place(&mut self, block: FreeBlock, asize: usize) -> Block {
        let tag = self.heap.tag(block.block());
        let size = tag.size();
        let start = block.block();

        FreeLists::remove(&mut self.heap, block);

        if size - asize <= MIN_BLOCK_SIZE {
            self.heap.set_tags(start, tag.with_allocated(true));
            let next = self.heap.next_block(start);
            self.heap.set_prev_allocated(next, true);
        } else {
            let rest_size = size - asize;
            let rest = start.next(asize);

            self.heap
                .set_tags(start, Tag::new(asize, true, tag.is_prev_allocated()));
            self.heap.set_tags(rest, Tag::new(rest_size, false, true));
            self.lists
                .insert(&mut self.heap, class_of(rest_size), FreeBlock::assume_free(rest));

            let after = rest.next(rest_size);
            self.heap.set_prev_allocated(after, false);
        }

        start
    }

    fn after_mutation(&self) {
        if self.config.check_on_mutation {
            self.check_heap(false);
        }
    }

    fn dump(&self) {
        debug!(
            "heap of {} bytes, epilogue at 0x{:x}",
            self.heap.len(),
            self.heap.epilogue().header()
        );

        for (block, tag) in self.heap.blocks() {
            if tag.is_allocated() {
                debug!("  block 0x{:x}: {tag:?}", block.payload());
            } else {
                debug!(
                    "  block 0x{:x}: {tag:?} footer {:?} prev 0x{:x} next 0x{:x}",
                    block.payload(),
                    self.heap.footer_tag(block),
                    self.heap.prev_link(block).payload(),
                    self.heap.next_link(block).payload(),
                );
            }
        }

        for class in 0..NUM_CLASSES {
            let list = self.lists.list(class);
            if !list.is_empty(&self.heap) {
                debug!("  class {class}: {} free blocks", self.lists.len(&self.heap, class));
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn heap_mut(&mut self) -> &mut Heap<S> {
        &mut self.heap
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::{FIRST_BLOCK, PROLOGUE_SIZE};

    fn allocator() -> SegAlloc {
        SegAlloc::with_config(HeapConfig::default().with_checks(true)).unwrap()
    }

    #[test]
    fn adjusted_sizes() {
        assert_eq!(SegAlloc::<VecSource>::adjusted_size(1).unwrap(), 16);
        assert_eq!(SegAlloc::<VecSource>::adjusted_size(8).unwrap(), 16);
        assert_eq!(SegAlloc::<VecSource>::adjusted_size(9).unwrap(), 24);
        assert_eq!(SegAlloc::<VecSource>::adjusted_size(16).unwrap(), 24);
        assert_eq!(SegAlloc::<VecSource>::adjusted_size(100).unwrap(), 112);
        assert_eq!(
            SegAlloc::<VecSource>::adjusted_size(usize::MAX),
            Err(HeapError::RequestTooLarge { requested: usize::MAX })
        );
        assert!(SegAlloc::<VecSource>::adjusted_size(u32::MAX as usize).is_err());
    }

    #[test]
    fn new_heap_is_just_prologue() {
        let heap = allocator();

        assert_eq!(heap.heap_size(), PROLOGUE_SIZE);
        assert_eq!(heap.blocks().count(), 0);
        assert_eq!(heap.stats().free_blocks, 0);
    }

    #[test]
    fn zero_size_is_not_an_error() {
        let mut heap = allocator();

        assert_eq!(heap.try_allocate(0), Ok(None));
        assert_eq!(heap.allocate(0), None);
        assert_eq!(heap.heap_size(), PROLOGUE_SIZE);
    }

    #[test]
    fn first_allocation_grows_by_a_chunk_and_splits() {
        let mut heap = allocator();

        let ptr = heap.allocate(16).unwrap();

        assert_eq!(ptr.offset(), FIRST_BLOCK);
        assert_eq!(heap.heap_size(), PROLOGUE_SIZE + 4096);
        assert_eq!(heap.usable_size(ptr), 16);

        let blocks: Vec<BlockInfo> = heap.blocks().collect();
        assert_eq!(
            blocks,
            vec![
                BlockInfo { offset: FIRST_BLOCK, size: 24, allocated: true },
                BlockInfo { offset: FIRST_BLOCK + 24, size: 4072, allocated: false },
            ]
        );
    }

    #[test]
    fn small_remainder_is_not_split() {
        let mut heap = SegAlloc::with_config(HeapConfig::default().with_chunk_size(32)).unwrap();

        // 24 byte block out of a 32 byte chunk leaves 8: too small to split.
        let ptr = heap.allocate(16).unwrap();

        assert_eq!(heap.usable_size(ptr), 24);
        assert_eq!(heap.blocks().count(), 1);
        assert!(heap.validate().is_ok());
    }

    #[test]
    fn remainder_of_exactly_min_block_is_not_split() {
        let mut heap = SegAlloc::with_config(HeapConfig::default().with_chunk_size(40)).unwrap();

        let ptr = heap.allocate(16).unwrap();

        assert_eq!(heap.usable_size(ptr), 32);
        assert_eq!(heap.blocks().count(), 1);
    }

    #[test]
    fn free_then_allocate_reuses_block() {
        let mut heap = allocator();

        let a = heap.allocate(16).unwrap();
        let b = heap.allocate(16).unwrap();
        assert_ne!(a, b);

        heap.deallocate(a);
        assert_eq!(heap.allocate(16), Some(a));
    }

    #[test]
    fn deallocate_none_is_noop() {
        let mut heap = allocator();
        let a = heap.allocate(32).unwrap();
        let before: Vec<BlockInfo> = heap.blocks().collect();

        heap.deallocate(None);

        assert_eq!(heap.blocks().collect::<Vec<_>>(), before);
        assert_eq!(heap.usable_size(a), 32);
    }

    #[test]
    fn double_free_is_ignored() {
        let mut heap = allocator();
        let a = heap.allocate(16).unwrap();
        let _b = heap.allocate(16).unwrap();

        heap.deallocate(a);
        heap.deallocate(a);

        assert_eq!(heap.stats().free_blocks, 2);
    }

    #[test]
    fn freeing_everything_leaves_one_free_block() {
        let mut heap = allocator();
        let ptrs: Vec<Pointer> = (1..20).map(|i| heap.allocate(i * 24).unwrap()).collect();

        for ptr in ptrs.iter().step_by(2) {
            heap.deallocate(*ptr);
        }
        for ptr in ptrs.iter().skip(1).step_by(2) {
            heap.deallocate(*ptr);
        }

        let stats = heap.stats();
        assert_eq!(stats.free_blocks, 1);
        assert_eq!(stats.allocated_blocks, 0);
        assert_eq!(stats.free_bytes + stats.overhead, stats.heap_size);
    }

    #[test]
    fn grows_when_no_block_fits() {
        let mut heap = allocator();
        heap.allocate(100).unwrap();
        let before = heap.heap_size();

        let big = heap.allocate(10_000).unwrap();

        assert!(heap.usable_size(big) >= 10_000);
        assert_eq!(heap.heap_size() - before, 10_008);
        // The free tail was merged into the new space, so the block starts there.
        assert_eq!(big.offset(), FIRST_BLOCK + 112);
    }

    #[test]
    fn out_of_memory_surfaces_as_none() {
        let mut heap = SegAlloc::with_config(HeapConfig::default().with_max_heap(8192)).unwrap();

        assert_eq!(heap.allocate(10_000), None);
        assert!(matches!(
            heap.try_allocate(10_000),
            Err(HeapError::OutOfMemory { requested: 10_008, .. })
        ));

        // The heap is still usable afterwards.
        let ptr = heap.allocate(64).unwrap();
        heap.deallocate(ptr);
        assert!(heap.validate().is_ok());
    }

    #[test]
    fn reallocate_copies_prefix() {
        let mut heap = allocator();
        let a = heap.allocate(100).unwrap();
        for (i, byte) in heap.payload_mut(a).iter_mut().enumerate() {
            *byte = i as u8;
        }

        let b = heap.reallocate(Some(a), 10).unwrap();
        assert_eq!(&heap.payload(b)[..10], &(0..10).collect::<Vec<u8>>()[..]);

        let c = heap.reallocate(Some(b), 300).unwrap();
        assert_eq!(&heap.payload(c)[..10], &(0..10).collect::<Vec<u8>>()[..]);
    }

    #[test]
    fn reallocate_edge_cases() {
        let mut heap = allocator();

        let a = heap.reallocate(None, 40).unwrap();
        assert!(heap.usable_size(a) >= 40);

        assert_eq!(heap.reallocate(Some(a), 0), None);
        assert_eq!(heap.stats().allocated_blocks, 0);

        assert_eq!(heap.reallocate(None, 0), None);
    }

    #[test]
    fn failed_reallocate_keeps_old_block() {
        let mut heap = SegAlloc::with_config(HeapConfig::default().with_max_heap(8192)).unwrap();
        let a = heap.allocate(64).unwrap();
        heap.payload_mut(a)[0] = 0x5A;

        assert_eq!(heap.reallocate(Some(a), 100_000), None);
        assert_eq!(heap.payload(a)[0], 0x5A);
        assert_eq!(heap.stats().allocated_blocks, 1);
    }

    #[test]
    fn allocate_zeroed_clears_reused_memory() {
        let mut heap = allocator();
        let a = heap.allocate(64).unwrap();
        heap.payload_mut(a).fill(0xFF);
        heap.deallocate(a);

        let z = heap.allocate_zeroed(8, 8).unwrap();

        assert_eq!(z, a);
        assert!(heap.payload(z).iter().all(|b| *b == 0));
        assert_eq!(heap.allocate_zeroed(usize::MAX, 2), None);
        assert_eq!(heap.allocate_zeroed(0, 8), None);
    }

    #[test]
    fn init_resets_heap() {
        let mut heap = allocator();
        heap.allocate(1000).unwrap();

        heap.init().unwrap();

        assert_eq!(heap.heap_size(), PROLOGUE_SIZE);
        assert_eq!(heap.blocks().count(), 0);
        assert_eq!(heap.allocate(8).map(Pointer::offset), Some(FIRST_BLOCK));
    }

    #[test]
    fn rejects_invalid_config() {
        let result = SegAlloc::with_config(HeapConfig::default().with_chunk_size(7));

        assert!(matches!(result, Err(HeapError::Config(_))));
    }

    #[test]
    fn mmap_backed_heap() {
        let mut heap = SegAlloc::mmap(HeapConfig::default().with_max_heap(1 << 20)).unwrap();

        let a = heap.allocate(512).unwrap();
        heap.payload_mut(a).fill(7);
        let b = heap.allocate(512).unwrap();
        heap.deallocate(a);

        assert!(heap.payload(b).len() >= 512);
        assert!(heap.validate().is_ok());
        assert!(heap.source().reserved() >= 1 << 20);
    }

    #[test]
    fn stale_prev_bit_is_detected() {
        let mut heap = allocator();
        let a = heap.allocate(16).unwrap();
        let _b = heap.allocate(16).unwrap();

        let next = heap.heap_mut().next_block(a.block());
        heap.heap_mut().set_prev_allocated(next, false);

        assert!(matches!(heap.validate(), Err(Corruption::StalePrevAllocated { .. })));
    }

    #[test]
    #[should_panic(expected = "heap corruption")]
    fn check_heap_panics_on_corruption() {
        let mut heap = allocator();
        let a = heap.allocate(16).unwrap();

        let footer = a.block().footer(24);
        heap.heap_mut().write_word(footer, 0xdead_bee8);

        heap.check_heap(true);
    }
}
