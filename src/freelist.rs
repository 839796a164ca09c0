use crate::{
    block::{Block, FreeBlock},
    heap::{FIRST_SENTINEL, Heap},
    list::List,
    source::MemorySource,
    tag::MIN_BLOCK_SIZE,
};

/// Number of segregated size classes.
pub const NUM_CLASSES: usize = 20;

/// Maps a block size to its size class.
///
/// Class `i` holds the sizes up to `(2^(i+1) - 1) * MIN_BLOCK_SIZE` that no
/// lower class holds, and the last class takes everything above:
///
/// ```text
/// | <= 16 | 17..=48 | 49..=112 | 113..=240 | ... | > (2^19 - 1) * 16 |
/// |   0   |    1    |    2     |     3     | ... |        19         |
/// ```
///
/// Insertion, removal and search all go through this one function.
pub fn class_of(size: usize) -> usize {
    let mut bound = 1usize;

    for class in 0..NUM_CLASSES - 1 {
        if size <= bound * MIN_BLOCK_SIZE {
            return class;
        }
        bound = bound * 2 + 1;
    }

    NUM_CLASSES - 1
}

/// Largest size that `class` holds, or `None` for the unbounded last class.
pub fn class_limit(class: usize) -> Option<usize> {
    (class < NUM_CLASSES - 1).then(|| ((1usize << (class + 1)) - 1) * MIN_BLOCK_SIZE)
}

/// Registry of free blocks: one circular [`List`] per size class, each
/// anchored at its sentinel block in the prologue.
///
/// ```text
///   class 0        class 1                      class 19
/// +----------+   +----------+                 +----------+
/// | sentinel |   | sentinel | <-> free <->    | sentinel | <-> free <-> free <->
/// +----------+   +----------+      ^   (cyc)  +----------+                  (cyc)
///                                  |
///                        most recently freed first
/// ```
///
/// A block must sit on the list of `class_of(its size)`; the validator is
/// the only thing that checks this.
pub(crate) struct FreeLists {
    lists: [List; NUM_CLASSES],
}

impl FreeLists {
    pub fn new() -> Self {
        Self {
            lists: std::array::from_fn(|class| {
                List::new(Block::at(FIRST_SENTINEL + class * MIN_BLOCK_SIZE))
            }),
        }
    }

    #[inline]
    pub fn list(&self, class: usize) -> List {
        self.lists[class]
    }

    /// Pushes `block` at the head of list `class`.
    #[inline]
    pub fn insert<S: MemorySource>(&self, heap: &mut Heap<S>, class: usize, block: FreeBlock) {
        self.lists[class].push_front(heap, block.block());
    }

    /// Takes `block` off its list using only its own links.
    #[inline]
    pub fn remove<S: MemorySource>(heap: &mut Heap<S>, block: FreeBlock) {
        List::remove(heap, block.block());
    }

    /// First fit within a class, scanning classes from `class_of(size)` up.
    pub fn find_fit<S: MemorySource>(&self, heap: &Heap<S>, size: usize) -> Option<FreeBlock> {
        self.lists[class_of(size)..].iter().find_map(|list| {
            list.iter(heap)
                .find(|node| heap.tag(*node).size() >= size)
                .map(|node| {
                    debug_assert!(!heap.tag(node).is_allocated());
                    FreeBlock::assume_free(node)
                })
        })
    }

    /// Number of blocks on list `class`.
    pub fn len<S: MemorySource>(&self, heap: &Heap<S>, class: usize) -> usize {
        self.lists[class].iter(heap).count()
    }
}
