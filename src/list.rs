use crate::{block::Block, heap::Heap, source::MemorySource, tag::WSIZE};

/// Links are arena offsets of node payloads: `prev` in the first word of the
/// payload and `next` in the second.
const PREV: usize = 0;
const NEXT: usize = WSIZE;

/// Raw link access. Nodes are either sentinels or free blocks; both keep
/// their links in the first two payload words.
impl<S: MemorySource> Heap<S> {
    #[inline]
    pub(crate) fn prev_link(&self, node: Block) -> Block {
        Block::at(self.read_word(node.payload() + PREV) as usize)
    }

    #[inline]
    pub(crate) fn next_link(&self, node: Block) -> Block {
        Block::at(self.read_word(node.payload() + NEXT) as usize)
    }

    #[inline]
    pub(crate) fn set_prev_link(&mut self, node: Block, prev: Block) {
        self.write_word(node.payload() + PREV, prev.payload() as u32);
    }

    #[inline]
    pub(crate) fn set_next_link(&mut self, node: Block, next: Block) {
        self.write_word(node.payload() + NEXT, next.payload() as u32);
    }
}

/// A circular doubly linked list living inside the heap, anchored at a
/// sentinel node.
///
/// ```text
///          +-----------------------------------------------+
///          v                                               |
///   +------------+  next   +-------+  next   +-------+  next
///   |  sentinel  | ------> | node  | ------> | node  | ----+
///   +------------+ <------ +-------+ <------ +-------+
///          |        prev                         ^
///          +-------------------------------------+
///                          prev
/// ```
///
/// Because the sentinel is always present, pushing and unlinking never have
/// to special-case an empty list or the ends of the list. This type only
/// remembers where the sentinel is: all state lives in the heap bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct List {
    sentinel: Block,
}

impl List {
    pub const fn new(sentinel: Block) -> Self {
        Self { sentinel }
    }

    #[inline]
    pub fn sentinel(&self) -> Block {
        self.sentinel
    }

    #[inline]
    pub fn first<S: MemorySource>(&self, heap: &Heap<S>) -> Option<Block> {
        let first = heap.next_link(self.sentinel);
        (first != self.sentinel).then_some(first)
    }

    #[inline]
    pub fn is_empty<S: MemorySource>(&self, heap: &Heap<S>) -> bool {
        self.first(heap).is_none()
    }

    /// Inserts `node` right after the sentinel.
    pub fn push_front<S: MemorySource>(&self, heap: &mut Heap<S>, node: Block) {
        let first = heap.next_link(self.sentinel);

        heap.set_next_link(node, first);
        heap.set_prev_link(node, self.sentinel);
        heap.set_prev_link(first, node);
        heap.set_next_link(self.sentinel, node);
    }

    /// Unlinks `node` from whichever list it is on, using only its own links.
    pub fn remove<S: MemorySource>(heap: &mut Heap<S>, node: Block) {
        let prev = heap.prev_link(node);
        let next = heap.next_link(node);

        heap.set_prev_link(next, prev);
        heap.set_next_link(prev, next);
    }

    /// Walks from the head towards the sentinel.
    pub fn iter<'a, S: MemorySource>(&self, heap: &'a Heap<S>) -> Iter<'a, S> {
        Iter {
            heap,
            sentinel: self.sentinel,
            current: heap.next_link(self.sentinel),
        }
    }
}

pub(crate) struct Iter<'a, S: MemorySource> {
    heap: &'a Heap<S>,
    sentinel: Block,
    current: Block,
}

impl<S: MemorySource> Iterator for Iter<'_, S> {
    type Item = Block;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current == self.sentinel {
            return None;
        }

        let node = self.current;
        self.current = self.heap.next_link(node);
        Some(node)
    }
}
