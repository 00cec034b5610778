//! Memory shared between the participants of a messaging runtime.
//!
//! When a [`FreeListSet`][crate::FreeListSet] is built with a shared arena, its chunks are carved
//! from that arena instead of the process heap. The arena is injected by the caller; there is no
//! process-wide implicit arena.

use std::alloc::{Layout, alloc, dealloc};
use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;

use foldhash::HashSet;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::{Error, MemoryPool, RawChunk, Result, round_up};

/// A region of memory from which segments can be carved, typically shared between processes.
///
/// Segments are never individually freed; they live as long as the arena does.
///
/// # Safety
///
/// Implementations must guarantee that every segment returned by
/// [`get_segment()`][Self::get_segment] is valid for reads and writes of `size` bytes, is aligned
/// to `alignment`, does not overlap any other segment and stays valid until the arena is dropped.
pub unsafe trait SharedArena: Send + Sync {
    /// Carves a segment of `size` bytes aligned to `alignment` out of the arena.
    ///
    /// The `index` identifies the consumer the segment is for (e.g. a list or a peer process)
    /// and may be used by the arena to place the segment. Returns `None` if the arena cannot
    /// supply the segment.
    fn get_segment(&self, size: usize, alignment: usize, index: usize) -> Option<NonNull<u8>>;
}

/// A [`SharedArena`] over one contiguous region, handing out segments by bumping an offset.
///
/// # Example
///
/// ```
/// use free_lists::{BumpArena, SharedArena};
///
/// let arena = BumpArena::new(65536, 4096).unwrap();
///
/// let segment = arena.get_segment(100, 64, 0).unwrap();
/// assert_eq!(segment.as_ptr() as usize % 64, 0);
/// ```
pub struct BumpArena {
    base: NonNull<u8>,
    layout: Layout,
    used: Mutex<usize>,
}

impl BumpArena {
    /// Reserves a region of `capacity` bytes aligned to `alignment`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PoolConstruction`] if the region cannot be described or allocated.
    pub fn new(capacity: usize, alignment: usize) -> Result<Self> {
        let layout = Layout::from_size_align(capacity, alignment)
            .ok()
            .filter(|layout| layout.size() > 0)
            .ok_or_else(|| Error::PoolConstruction {
                problem: format!(
                    "arena of {capacity} bytes aligned to {alignment} cannot be laid out in memory"
                ),
            })?;

        // SAFETY: The layout has a non-zero size, checked above.
        let base =
            NonNull::new(unsafe { alloc(layout) }).ok_or_else(|| Error::PoolConstruction {
                problem: format!("failed to reserve {capacity} bytes of arena memory"),
            })?;

        debug!(capacity, alignment, "bump arena created");

        Ok(Self {
            base,
            layout,
            used: Mutex::new(0),
        })
    }

    /// Total size of the arena in bytes.
    #[must_use]
    #[cfg_attr(test, mutants::skip)] // Trivial accessor.
    pub fn capacity(&self) -> usize {
        self.layout.size()
    }

    /// Number of bytes already carved out, including alignment padding.
    #[must_use]
    pub fn used(&self) -> usize {
        *self.used.lock()
    }

    /// Whether the address lies within the arena.
    #[must_use]
    pub fn contains(&self, ptr: NonNull<u8>) -> bool {
        let start = self.base.as_ptr() as usize;
        let address = ptr.as_ptr() as usize;

        address >= start && address - start < self.layout.size()
    }
}

// SAFETY: Segments come from one allocation, are aligned by construction, never overlap because
// the offset only moves forward under a lock, and the allocation is only freed when we are dropped.
unsafe impl SharedArena for BumpArena {
    fn get_segment(&self, size: usize, alignment: usize, index: usize) -> Option<NonNull<u8>> {
        if !alignment.is_power_of_two() {
            return None;
        }

        let mut used = self.used.lock();

        let base_address = self.base.as_ptr() as usize;
        let start_address = base_address
            .checked_add(*used)
            .and_then(|address| round_up(address, alignment))?;
        let start = start_address.checked_sub(base_address)?;
        let end = start.checked_add(size)?;

        if end > self.layout.size() {
            trace!(index, size, used = *used, "bump arena exhausted");
            return None;
        }

        *used = end;

        // SAFETY: `start` lies within our allocation, checked above.
        Some(unsafe { self.base.add(start) })
    }
}

impl fmt::Debug for BumpArena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BumpArena")
            .field("capacity", &self.layout.size())
            .field("used", &*self.used.lock())
            .finish()
    }
}

impl Drop for BumpArena {
    fn drop(&mut self) {
        // SAFETY: We allocated the region with this exact layout and free it only once.
        unsafe {
            dealloc(self.base.as_ptr(), self.layout);
        }
    }
}

// SAFETY: The arena owns one plain memory region; all mutable state is behind a mutex.
unsafe impl Send for BumpArena {}

// SAFETY: See above.
unsafe impl Sync for BumpArena {}

/// A [`MemoryPool`] that carves its chunks from a [`SharedArena`].
///
/// Chunks released back to the pool are reused. Memory is never returned to the arena.
pub struct ArenaMemoryPool {
    arena: Arc<dyn SharedArena>,
    chunk_size: usize,
    alignment: usize,
    max_bytes: Option<usize>,
    state: Mutex<ArenaPoolState>,
}

struct ArenaPoolState {
    free: Vec<RawChunk>,
    owned: HashSet<usize>,
    total_bytes: usize,
}

impl ArenaMemoryPool {
    /// Creates a pool that takes chunks of at least `chunk_size` bytes from `arena`.
    ///
    /// The chunk size is rounded up to a multiple of `page_size` and chunks are aligned to
    /// `page_size`. Up to `initial_bytes` worth of chunks are carved out immediately.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PoolConstruction`] if the sizes do not describe a valid chunk or if the
    /// arena cannot supply the initial memory.
    pub fn new(
        arena: Arc<dyn SharedArena>,
        initial_bytes: usize,
        max_bytes: Option<usize>,
        chunk_size: usize,
        page_size: usize,
    ) -> Result<Self> {
        if !page_size.is_power_of_two() {
            return Err(Error::PoolConstruction {
                problem: format!("page size {page_size} is not a power of two"),
            });
        }

        let chunk_size = round_up(chunk_size, page_size)
            .filter(|size| *size > 0)
            .ok_or_else(|| Error::PoolConstruction {
                problem: format!(
                    "chunk size {chunk_size} cannot be rounded to a non-zero multiple of {page_size}"
                ),
            })?;

        let pool = Self {
            arena,
            chunk_size,
            alignment: page_size,
            max_bytes,
            state: Mutex::new(ArenaPoolState {
                free: Vec::new(),
                owned: HashSet::default(),
                total_bytes: 0,
            }),
        };

        let initial_bytes = max_bytes.map_or(initial_bytes, |max| initial_bytes.min(max));
        let initial_chunks = initial_bytes.checked_div(chunk_size).unwrap_or_default();

        {
            let mut state = pool.state.lock();

            for _ in 0..initial_chunks {
                let chunk = pool
                    .carve(&mut state, 0)
                    .ok_or_else(|| Error::PoolConstruction {
                        problem: format!(
                            "shared arena cannot supply {initial_bytes} bytes of initial memory"
                        ),
                    })?;

                state.free.push(chunk);
            }
        }

        debug!(chunk_size, initial_chunks, ?max_bytes, "arena memory pool created");

        Ok(pool)
    }

    /// Total number of bytes the pool has taken from the arena so far.
    #[must_use]
    pub fn total_bytes(&self) -> usize {
        self.state.lock().total_bytes
    }

    /// Upper limit on the bytes the pool may take from the arena, if any.
    #[must_use]
    #[cfg_attr(test, mutants::skip)] // Trivial accessor.
    pub fn max_bytes(&self) -> Option<usize> {
        self.max_bytes
    }

    fn carve(&self, state: &mut ArenaPoolState, index: usize) -> Option<RawChunk> {
        let new_total = state.total_bytes.checked_add(self.chunk_size)?;

        if self.max_bytes.is_some_and(|max| new_total > max) {
            return None;
        }

        let ptr = self
            .arena
            .get_segment(self.chunk_size, self.alignment, index)?;

        state.owned.insert(ptr.as_ptr() as usize);
        state.total_bytes = new_total;

        // SAFETY: The arena guarantees the segment is valid for `chunk_size` bytes until the
        // arena is dropped, and we hold the arena alive for as long as we exist.
        Some(unsafe { RawChunk::new(ptr, self.chunk_size) })
    }
}

impl MemoryPool for ArenaMemoryPool {
    #[cfg_attr(test, mutants::skip)] // Trivial accessor.
    fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    #[cfg_attr(test, mutants::skip)] // Trivial accessor.
    fn chunk_alignment(&self) -> usize {
        self.alignment
    }

    fn request_chunk(&self, list_index: usize) -> Option<RawChunk> {
        let mut state = self.state.lock();

        if let Some(chunk) = state.free.pop() {
            return Some(chunk);
        }

        self.carve(&mut state, list_index)
    }

    fn release_chunk(&self, chunk: RawChunk) {
        let mut state = self.state.lock();

        if !state.owned.contains(&(chunk.as_ptr().as_ptr() as usize)) {
            debug_assert!(false, "released a chunk that does not belong to this pool");
            return;
        }

        state.free.push(chunk);
    }
}

impl fmt::Debug for ArenaMemoryPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();

        f.debug_struct("ArenaMemoryPool")
            .field("chunk_size", &self.chunk_size)
            .field("max_bytes", &self.max_bytes)
            .field("total_bytes", &state.total_bytes)
            .field("free_chunks", &state.free.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(BumpArena: Send, Sync);
    assert_impl_all!(ArenaMemoryPool: Send, Sync);

    #[test]
    fn segments_do_not_overlap() {
        let arena = BumpArena::new(4096, 64).unwrap();

        let a = arena.get_segment(10, 8, 0).unwrap();
        let b = arena.get_segment(10, 8, 1).unwrap();

        let a_address = a.as_ptr() as usize;
        let b_address = b.as_ptr() as usize;

        assert!(b_address >= a_address + 10);
        assert_eq!(b_address % 8, 0);
    }

    #[test]
    fn exhausted_arena_refuses() {
        let arena = BumpArena::new(128, 64).unwrap();

        assert!(arena.get_segment(64, 64, 0).is_some());
        assert!(arena.get_segment(64, 64, 0).is_some());
        assert!(arena.get_segment(1, 1, 0).is_none());
        assert_eq!(arena.used(), arena.capacity());
    }

    #[test]
    fn contains_only_own_segments() {
        let arena = BumpArena::new(128, 64).unwrap();
        let other = BumpArena::new(128, 64).unwrap();

        let segment = arena.get_segment(64, 64, 0).unwrap();

        assert!(arena.contains(segment));
        assert!(!other.contains(segment));
    }

    #[test]
    fn non_power_of_two_alignment_refused() {
        let arena = BumpArena::new(128, 64).unwrap();

        assert!(arena.get_segment(8, 3, 0).is_none());
        assert_eq!(arena.used(), 0);
    }

    #[test]
    fn pool_takes_chunks_from_arena() {
        let arena = Arc::new(BumpArena::new(4 * 4096, 4096).unwrap());
        let shared: Arc<dyn SharedArena> = Arc::clone(&arena) as Arc<dyn SharedArena>;
        let pool = ArenaMemoryPool::new(shared, 4096, None, 100, 4096).unwrap();

        assert_eq!(pool.chunk_size(), 4096);
        assert_eq!(pool.total_bytes(), 4096);
        assert_eq!(arena.used(), 4096);

        let a = pool.request_chunk(0).unwrap();
        let b = pool.request_chunk(1).unwrap();
        assert_eq!(arena.used(), 2 * 4096);
        assert_ne!(a.as_ptr(), b.as_ptr());

        pool.release_chunk(a);
        pool.release_chunk(b);
    }

    #[test]
    fn pool_respects_max_bytes() {
        let arena = Arc::new(BumpArena::new(8 * 4096, 4096).unwrap());
        let pool = ArenaMemoryPool::new(arena, 0, Some(4096), 4096, 4096).unwrap();
        assert_eq!(pool.max_bytes(), Some(4096));

        let a = pool.request_chunk(0).unwrap();
        assert!(pool.request_chunk(0).is_none());

        pool.release_chunk(a);
        assert!(pool.request_chunk(0).is_some());
    }

    #[test]
    fn pool_construction_fails_when_arena_too_small() {
        let arena = Arc::new(BumpArena::new(4096, 4096).unwrap());

        assert!(matches!(
            ArenaMemoryPool::new(arena, 3 * 4096, None, 4096, 4096),
            Err(Error::PoolConstruction { .. })
        ));
    }
}
