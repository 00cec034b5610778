use std::alloc::Layout;
use std::ptr::NonNull;

/// A contiguous block of raw memory handed out by a [`MemoryPool`][crate::MemoryPool].
///
/// The chunk does not own its memory. The memory belongs to the pool that produced the chunk
/// and remains valid until the chunk is released back to that pool or the pool is dropped.
#[derive(Debug, Eq, PartialEq)]
pub struct RawChunk {
    ptr: NonNull<u8>,
    len: usize,
}

impl RawChunk {
    /// Wraps a block of raw memory as a chunk.
    ///
    /// # Safety
    ///
    /// The caller must guarantee that `ptr` is valid for reads and writes of `len` bytes and
    /// that the memory stays valid and unaliased until the chunk is released back to the pool
    /// that produced it or that pool is dropped.
    ///
    /// A chunk produced by a [`MemoryPool`][crate::MemoryPool] must also start at an address
    /// aligned to the pool's [`chunk_alignment()`][crate::MemoryPool::chunk_alignment] and be
    /// at least [`chunk_size()`][crate::MemoryPool::chunk_size] bytes long. Free list sets
    /// verify both before using the chunk and hand back chunks that do not comply.
    #[must_use]
    pub unsafe fn new(ptr: NonNull<u8>, len: usize) -> Self {
        Self { ptr, len }
    }

    /// Address of the first byte of the chunk.
    #[must_use]
    #[inline]
    pub fn as_ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    /// Length of the chunk in bytes.
    #[must_use]
    #[inline]
    #[cfg_attr(test, mutants::skip)] // Trivial accessor.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the chunk has no usable memory.
    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Pointer to the slot at `index` when the chunk is carved into slots of `stride` bytes.
    ///
    /// # Panics
    ///
    /// Panics if the slot would extend past the end of the chunk.
    #[must_use]
    pub(crate) fn slot<T>(&self, index: usize, stride: usize) -> NonNull<T> {
        let offset = index
            .checked_mul(stride)
            .expect("slot offset cannot overflow for a slot that fits into the chunk");

        assert!(
            offset
                .checked_add(stride)
                .is_some_and(|end| end <= self.len),
            "slot {index} of {stride} bytes does not fit into a chunk of {} bytes",
            self.len
        );

        // SAFETY: We asserted above that the slot lies within the chunk.
        unsafe { self.ptr.add(offset).cast::<T>() }
    }
}

// SAFETY: A chunk is just a description of a memory block owned by a pool. The pool is shared
// between threads and the memory itself carries no thread affinity.
unsafe impl Send for RawChunk {}

// SAFETY: Shared references to a chunk only allow reading its address and length.
unsafe impl Sync for RawChunk {}

/// Rounds `value` up to the next multiple of `multiple`, which must be non-zero.
#[must_use]
pub(crate) fn round_up(value: usize, multiple: usize) -> Option<usize> {
    value.checked_next_multiple_of(multiple)
}

/// Layout of one chunk of `chunk_size` bytes aligned to the page size.
pub(crate) fn chunk_layout(chunk_size: usize, page_size: usize) -> Option<Layout> {
    Layout::from_size_align(chunk_size, page_size).ok()
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(RawChunk: Send, Sync);

    #[test]
    fn slots_are_stride_apart() {
        let mut backing = [0_u64; 8];
        let ptr = NonNull::new(backing.as_mut_ptr().cast::<u8>()).unwrap();

        // SAFETY: The backing array outlives the chunk and is 64 bytes long.
        let chunk = unsafe { RawChunk::new(ptr, 64) };

        let first = chunk.slot::<u64>(0, 16);
        let third = chunk.slot::<u64>(2, 16);

        assert_eq!(first.cast::<u8>(), ptr);
        assert_eq!(third.as_ptr() as usize - first.as_ptr() as usize, 32);
        assert_eq!(chunk.len(), 64);
        assert!(!chunk.is_empty());
    }

    #[test]
    #[should_panic]
    fn slot_past_end_panics() {
        let mut backing = [0_u64; 2];
        let ptr = NonNull::new(backing.as_mut_ptr().cast::<u8>()).unwrap();

        // SAFETY: The backing array outlives the chunk and is 16 bytes long.
        let chunk = unsafe { RawChunk::new(ptr, 16) };

        _ = chunk.slot::<u64>(2, 8);
    }

    #[test]
    fn round_up_to_pages() {
        assert_eq!(round_up(1, 4096), Some(4096));
        assert_eq!(round_up(4096, 4096), Some(4096));
        assert_eq!(round_up(4097, 4096), Some(8192));
        assert_eq!(round_up(usize::MAX, 4096), None);
    }
}
