use crate::{
    error::ConfigError,
    heap::PROLOGUE_SIZE,
    source::DEFAULT_MAX_HEAP,
    tag::{DSIZE, MAX_BLOCK_SIZE},
};

/// Default amount the heap grows by when no free block fits.
pub const DEFAULT_CHUNK_SIZE: usize = 1 << 12;

/// Tunables of an allocator instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapConfig {
    /// Minimum growth increment. Larger requests grow the heap by exactly
    /// their own block size.
    pub chunk_size: usize,
    /// Byte limit of the memory source the allocator creates by default.
    pub max_heap: usize,
    /// Run the heap validator after every place and free, panicking on the
    /// first corruption found. Slow; meant for debugging.
    pub check_on_mutation: bool,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_heap: DEFAULT_MAX_HEAP,
            check_on_mutation: false,
        }
    }
}

impl HeapConfig {
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_max_heap(mut self, max_heap: usize) -> Self {
        self.max_heap = max_heap;
        self
    }

    pub fn with_checks(mut self, check_on_mutation: bool) -> Self {
        self.check_on_mutation = check_on_mutation;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 || self.chunk_size % DSIZE != 0 {
            return Err(ConfigError::ChunkSize(self.chunk_size));
        }
        if self.max_heap < PROLOGUE_SIZE {
            return Err(ConfigError::LimitTooSmall {
                limit: self.max_heap,
                needed: PROLOGUE_SIZE,
            });
        }
        if self.max_heap > MAX_BLOCK_SIZE {
            return Err(ConfigError::LimitTooLarge(self.max_heap));
        }
        Ok(())
    }
}
