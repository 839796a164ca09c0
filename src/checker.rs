//! Heap consistency checking.
//!
//! The validator re-derives every block boundary from headers alone and
//! cross-checks footers, cached flags and free-list links against them. It
//! never runs on the allocation path unless
//! [`crate::HeapConfig::check_on_mutation`] asks for it.

use crate::{
    block::Block,
    error::Corruption,
    freelist::{FreeLists, NUM_CLASSES, class_of},
    heap::{FIRST_BLOCK, FIRST_SENTINEL, Heap, PROLOGUE_SIZE},
    source::MemorySource,
    tag::{DSIZE, MIN_BLOCK_SIZE, Tag, WSIZE},
};

/// Summary of a heap that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapStats {
    /// Total bytes obtained from the memory source.
    pub heap_size: usize,
    /// Fixed bytes taken by the pad word, the sentinels and the epilogue.
    pub overhead: usize,
    pub allocated_blocks: usize,
    /// Sum of allocated block sizes, tags included.
    pub allocated_bytes: usize,
    pub free_blocks: usize,
    pub free_bytes: usize,
    pub largest_free: usize,
    /// Number of blocks on each size-class list.
    pub free_per_class: [usize; NUM_CLASSES],
}

impl HeapStats {
    fn empty(heap_size: usize) -> Self {
        Self {
            heap_size,
            overhead: PROLOGUE_SIZE,
            allocated_blocks: 0,
            allocated_bytes: 0,
            free_blocks: 0,
            free_bytes: 0,
            largest_free: 0,
            free_per_class: [0; NUM_CLASSES],
        }
    }
}

impl<S: MemorySource> Heap<S> {
    /// Checks every heap invariant, returning the first violation found.
    pub(crate) fn validate(&self, lists: &FreeLists) -> Result<HeapStats, Corruption> {
        let mut stats = HeapStats::empty(self.len());

        self.check_sentinels()?;
        self.check_blocks(&mut stats)?;
        self.check_lists(lists, &mut stats)?;

        let listed: usize = stats.free_per_class.iter().sum();
        if listed != stats.free_blocks {
            return Err(Corruption::FreeCountMismatch {
                in_heap: stats.free_blocks,
                in_lists: listed,
            });
        }

        Ok(stats)
    }

    fn check_sentinels(&self) -> Result<(), Corruption> {
        if self.len() < PROLOGUE_SIZE {
            return Err(Corruption::OutOfBounds { offset: 0 });
        }

        let expected = Tag::new(MIN_BLOCK_SIZE, true, true);

        for class in 0..NUM_CLASSES {
            let sentinel = Block::at(FIRST_SENTINEL + class * MIN_BLOCK_SIZE);

            if self.tag(sentinel) != expected || self.footer_tag(sentinel) != expected {
                return Err(Corruption::BadSentinel {
                    class,
                    offset: sentinel.payload(),
                });
            }
        }

        Ok(())
    }

    /// Walks blocks by header sizes from the first block to the epilogue.
    fn check_blocks(&self, stats: &mut HeapStats) -> Result<(), Corruption> {
        let len = self.len();
        let mut current = Block::at(FIRST_BLOCK);
        let mut prev_allocated = true;
        let mut prev_free: Option<Block> = None;

        loop {
            let offset = current.payload();

            if offset > len {
                return Err(Corruption::OutOfBounds { offset });
            }

            let tag = self.tag(current);

            if tag.size() == 0 {
                if offset != len || !tag.is_allocated() || !tag.is_well_formed() {
                    return Err(Corruption::BadEpilogue { offset });
                }
                if tag.is_prev_allocated() != prev_allocated {
                    return Err(Corruption::StalePrevAllocated { offset });
                }
                return Ok(());
            }

            if offset % DSIZE != 0 {
                return Err(Corruption::Misaligned { offset });
            }
            if tag.size() < MIN_BLOCK_SIZE || tag.size() % DSIZE != 0 || !tag.is_well_formed() {
                return Err(Corruption::BadSize {
                    offset,
                    size: tag.size(),
                });
            }
            if offset + tag.size() > len {
                return Err(Corruption::OutOfBounds { offset });
            }

            let footer = self.footer_tag(current);
            if footer != tag {
                return Err(Corruption::TagMismatch {
                    offset,
                    header: tag.raw(),
                    footer: footer.raw(),
                });
            }

            if tag.is_prev_allocated() != prev_allocated {
                return Err(Corruption::StalePrevAllocated { offset });
            }

            if tag.is_allocated() {
                stats.allocated_blocks += 1;
                stats.allocated_bytes += tag.size();
                prev_free = None;
            } else {
                if let Some(first) = prev_free {
                    return Err(Corruption::AdjacentFree {
                        first: first.payload(),
                        second: offset,
                    });
                }
                stats.free_blocks += 1;
                stats.free_bytes += tag.size();
                stats.largest_free = stats.largest_free.max(tag.size());
                prev_free = Some(current);
            }

            prev_allocated = tag.is_allocated();
            current = current.next(tag.size());
        }
    }

    /// Follows every size-class list around to its sentinel.
    fn check_lists(&self, lists: &FreeLists, stats: &mut HeapStats) -> Result<(), Corruption> {
        let max_nodes = self.len() / MIN_BLOCK_SIZE;

        for class in 0..NUM_CLASSES {
            let sentinel = lists.list(class).sentinel();
            let mut node = sentinel;
            let mut count = 0;

            loop {
                self.check_links(node)?;

                node = self.next_link(node);
                if node == sentinel {
                    break;
                }

                count += 1;
                if count > max_nodes {
                    return Err(Corruption::Cycle { class });
                }

                self.check_node(node)?;

                let tag = self.tag(node);
                if tag.is_allocated() {
                    return Err(Corruption::AllocatedInList {
                        class,
                        offset: node.payload(),
                    });
                }
                if class_of(tag.size()) != class {
                    return Err(Corruption::WrongClass {
                        offset: node.payload(),
                        expected: class_of(tag.size()),
                        found: class,
                    });
                }
            }

            stats.free_per_class[class] = count;
        }

        Ok(())
    }

    /// A list node must be a sentinel or lie inside the block area.
    fn check_node(&self, node: Block) -> Result<(), Corruption> {
        let offset = node.payload();
        let is_sentinel = (FIRST_SENTINEL..FIRST_BLOCK).contains(&offset)
            && (offset - FIRST_SENTINEL) % MIN_BLOCK_SIZE == 0;
        let in_blocks = offset >= FIRST_BLOCK && offset + MIN_BLOCK_SIZE - WSIZE <= self.len();

        if offset % DSIZE != 0 || !(is_sentinel || in_blocks) {
            return Err(Corruption::BrokenLink {
                offset,
                direction: "incoming",
            });
        }
        Ok(())
    }

    fn check_links(&self, node: Block) -> Result<(), Corruption> {
        let next = self.next_link(node);
        let prev = self.prev_link(node);

        self.check_node(next).map_err(|_| Corruption::BrokenLink {
            offset: node.payload(),
            direction: "next",
        })?;
        self.check_node(prev).map_err(|_| Corruption::BrokenLink {
            offset: node.payload(),
            direction: "prev",
        })?;

        if self.prev_link(next) != node {
            return Err(Corruption::BrokenLink {
                offset: node.payload(),
                direction: "next",
            });
        }
        if self.next_link(prev) != node {
            return Err(Corruption::BrokenLink {
                offset: node.payload(),
                direction: "prev",
            });
        }
        Ok(())
    }
}
