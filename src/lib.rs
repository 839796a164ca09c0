//! A segregated-fit, boundary-tag memory allocator.
//!
//! [`SegAlloc`] manages one contiguous, growable heap obtained from a
//! [`MemorySource`]. Every block carries a 4 byte header and footer holding
//! its size and two flags, free blocks are threaded through one of
//! [`NUM_CLASSES`] circular lists chosen by size, and a freed block is merged
//! with its free neighbours right away.
//!
//! ```text
//! +-----+-----------------+---------+---------+-- ... --+----------+
//! | pad | class sentinels | block 0 | block 1 |         | epilogue |
//! +-----+-----------------+---------+---------+-- ... --+----------+
//! 0                       FIRST_BLOCK                    heap_size
//! ```
//!
//! Allocations are addressed by [`Pointer`], the payload offset inside the
//! heap, and their bytes are reached through [`SegAlloc::payload`] and
//! [`SegAlloc::payload_mut`]. Two memory sources are provided: [`VecSource`]
//! grows an owned buffer, [`MmapSource`] reserves address space from the
//! operating system and commits it page by page.
//!
//! ```
//! use segalloc::SegAlloc;
//!
//! let mut heap = SegAlloc::new().unwrap();
//!
//! let ptr = heap.allocate(13).unwrap();
//! heap.payload_mut(ptr)[..5].copy_from_slice(b"hello");
//!
//! let ptr = heap.reallocate(Some(ptr), 200).unwrap();
//! assert_eq!(&heap.payload(ptr)[..5], b"hello");
//!
//! heap.deallocate(ptr);
//! assert_eq!(heap.stats().allocated_blocks, 0);
//! ```

mod allocator;
mod block;
mod checker;
mod coalesce;
mod config;
mod error;
mod freelist;
mod heap;
mod kernel;
mod list;
mod source;
mod tag;
mod utils;

pub use allocator::{BlockInfo, SegAlloc};
pub use block::Pointer;
pub use checker::HeapStats;
pub use config::{DEFAULT_CHUNK_SIZE, HeapConfig};
pub use error::{ConfigError, Corruption, HeapError, HeapResult};
pub use freelist::{NUM_CLASSES, class_limit, class_of};
pub use kernel::MmapSource;
pub use source::{DEFAULT_MAX_HEAP, MemorySource, VecSource};
pub use tag::{DSIZE, MAX_BLOCK_SIZE, MIN_BLOCK_SIZE, WSIZE};

/// Bytes the heap occupies before the first block: pad word, size-class
/// sentinels and epilogue.
pub const HEAP_OVERHEAD: usize = heap::PROLOGUE_SIZE;
