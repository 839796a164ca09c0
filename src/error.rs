use thiserror::Error;

/// Result of fallible heap operations.
pub type HeapResult<T> = Result<T, HeapError>;

/// Recoverable allocator errors.
///
/// Out of memory is the only failure the allocator produces at run time. It is
/// never retried: the memory source is asked exactly once per growth.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HeapError {
    #[error("out of memory: could not grow heap by {requested} bytes (heap is {heap_size} bytes)")]
    OutOfMemory { requested: usize, heap_size: usize },

    #[error("request of {requested} bytes cannot be encoded in a block tag")]
    RequestTooLarge { requested: usize },

    #[error("invalid heap configuration: {0}")]
    Config(#[from] ConfigError),
}

/// Rejected [`crate::HeapConfig`] values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("chunk size {0} must be a non-zero multiple of 8")]
    ChunkSize(usize),

    #[error("heap limit {limit} is smaller than the {needed} bytes of fixed heap overhead")]
    LimitTooSmall { limit: usize, needed: usize },

    #[error("heap limit {0} exceeds the 32-bit offset space")]
    LimitTooLarge(usize),
}

/// A broken heap invariant found by the validator. Every variant carries the
/// arena offset at which the problem was seen.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Corruption {
    #[error("sentinel of class {class} at 0x{offset:x} has a bad tag")]
    BadSentinel { class: usize, offset: usize },

    #[error("epilogue at 0x{offset:x} is not a zero-size allocated tag")]
    BadEpilogue { offset: usize },

    #[error("block at 0x{offset:x} is misaligned")]
    Misaligned { offset: usize },

    #[error("block at 0x{offset:x} has invalid size {size}")]
    BadSize { offset: usize, size: usize },

    #[error("block at 0x{offset:x} runs past the end of the heap")]
    OutOfBounds { offset: usize },

    #[error("block at 0x{offset:x}: header 0x{header:x} and footer 0x{footer:x} disagree")]
    TagMismatch { offset: usize, header: u32, footer: u32 },

    #[error("block at 0x{offset:x} caches the wrong predecessor-allocated bit")]
    StalePrevAllocated { offset: usize },

    #[error("free blocks at 0x{first:x} and 0x{second:x} are adjacent")]
    AdjacentFree { first: usize, second: usize },

    #[error("free-list node 0x{offset:x} has a broken {direction} link")]
    BrokenLink { offset: usize, direction: &'static str },

    #[error("list of class {class} holds allocated block 0x{offset:x}")]
    AllocatedInList { class: usize, offset: usize },

    #[error("block 0x{offset:x} sits in class {found} but belongs to class {expected}")]
    WrongClass { offset: usize, expected: usize, found: usize },

    #[error("list of class {class} does not terminate")]
    Cycle { class: usize },

    #[error("{in_heap} free blocks in the heap but {in_lists} in the free lists")]
    FreeCountMismatch { in_heap: usize, in_lists: usize },
}
