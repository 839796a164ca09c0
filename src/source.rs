//! The raw memory the allocator carves blocks out of.

/// Default limit of a memory source: 20 MiB.
pub const DEFAULT_MAX_HEAP: usize = 20 * (1 << 20);

/// A contiguous byte region that can only grow at its high end.
///
/// This is the allocator's single dependency on the outside world. The
/// allocator asks for more bytes with [`MemorySource::grow`] and from then on
/// addresses them as offsets from the start of [`MemorySource::bytes`], so a
/// source is free to move its storage as long as contents and offsets are
/// preserved.
pub trait MemorySource {
    /// Extends the region by exactly `increment` bytes and returns the offset
    /// of the first new byte (the previous length), or `None` when the source
    /// cannot grow any further. A failed call leaves the region unchanged.
    /// Contents of the new bytes are unspecified.
    fn grow(&mut self, increment: usize) -> Option<usize>;

    /// Current length of the region in bytes.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The whole region, `[0, len)`.
    fn bytes(&self) -> &[u8];

    fn bytes_mut(&mut self) -> &mut [u8];

    /// Shrinks the region back to zero bytes. Only used when a heap is
    /// initialised again from scratch.
    fn reset(&mut self);
}

/// A memory source backed by an owned `Vec<u8>` with a hard byte limit.
#[derive(Debug, Clone)]
pub struct VecSource {
    memory: Vec<u8>,
    limit: usize,
}

impl VecSource {
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_MAX_HEAP)
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            memory: Vec::new(),
            limit,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}

impl Default for VecSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySource for VecSource {
    fn grow(&mut self, increment: usize) -> Option<usize> {
        let old_len = self.memory.len();
        let new_len = old_len.checked_add(increment)?;

        if new_len > self.limit {
            return None;
        }

        self.memory.resize(new_len, 0);
        Some(old_len)
    }

    fn len(&self) -> usize {
        self.memory.len()
    }

    fn bytes(&self) -> &[u8] {
        &self.memory
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.memory
    }

    fn reset(&mut self) {
        self.memory.clear();
    }
}
