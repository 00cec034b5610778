use std::alloc::{Layout, alloc, dealloc};
use std::fmt;
use std::ptr::NonNull;

use foldhash::HashSet;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::{Error, RawChunk, Result, chunk_layout, round_up};

/// A source of fixed-size chunks of raw memory.
///
/// A [`FreeListSet`][crate::FreeListSet] requests chunks from a pool whenever one of its lists
/// needs to grow, carves each chunk into elements and keeps the chunk until the set is dropped,
/// at which point the chunk is released back to the pool. One pool may be shared by several sets.
#[cfg_attr(test, mockall::automock)]
pub trait MemoryPool: Send + Sync {
    /// Size in bytes of every chunk handed out by the pool.
    ///
    /// This is authoritative: a pool may round the chunk size requested at construction time,
    /// so consumers must always read it back from the pool.
    fn chunk_size(&self) -> usize;

    /// Minimum alignment in bytes of every chunk handed out by the pool.
    fn chunk_alignment(&self) -> usize;

    /// Requests a chunk on behalf of the list with the given index.
    ///
    /// Returns `None` if the pool cannot supply a chunk right now.
    fn request_chunk(&self, list_index: usize) -> Option<RawChunk>;

    /// Releases a chunk previously obtained from [`request_chunk()`][Self::request_chunk]
    /// back to the pool, making it available for reuse.
    fn release_chunk(&self, chunk: RawChunk);
}

/// A [`MemoryPool`] that carves chunks from the process heap.
///
/// The pool allocates `initial_bytes` worth of chunks up front and grows on demand until it
/// holds `max_bytes`, after which requests are refused until chunks are released back to it.
/// All memory the pool ever allocated is freed when the pool is dropped.
///
/// # Example
///
/// ```
/// use free_lists::{HeapMemoryPool, MemoryPool};
///
/// let pool = HeapMemoryPool::new(16384, Some(32768), 4000, 4096).unwrap();
///
/// // The chunk size is rounded up to whole pages.
/// assert_eq!(pool.chunk_size(), 4096);
///
/// let chunk = pool.request_chunk(0).unwrap();
/// assert_eq!(chunk.len(), 4096);
/// pool.release_chunk(chunk);
/// ```
pub struct HeapMemoryPool {
    chunk_layout: Layout,
    max_bytes: Option<usize>,
    state: Mutex<HeapPoolState>,
}

struct HeapPoolState {
    /// Chunks that have been allocated but are not currently handed out.
    free: Vec<RawChunk>,

    /// Addresses of every chunk this pool has allocated, so we can tell our chunks from others.
    owned: HashSet<usize>,

    total_bytes: usize,
}

impl HeapMemoryPool {
    /// Creates a pool of chunks of at least `chunk_size` bytes each.
    ///
    /// The chunk size is rounded up to a multiple of `page_size` and every chunk is aligned to
    /// `page_size`. Initial memory beyond `max_bytes` is not allocated.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PoolConstruction`] if the sizes do not describe a valid chunk or if the
    /// initial memory cannot be allocated.
    pub fn new(
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

        let chunk_layout =
            chunk_layout(chunk_size, page_size).ok_or_else(|| Error::PoolConstruction {
                problem: format!("chunk of {chunk_size} bytes cannot be laid out in memory"),
            })?;

        let pool = Self {
            chunk_layout,
            max_bytes,
            state: Mutex::new(HeapPoolState {
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
                    .allocate(&mut state)
                    .ok_or_else(|| Error::PoolConstruction {
                        problem: format!(
                            "failed to allocate {initial_bytes} bytes of initial pool memory"
                        ),
                    })?;

                state.free.push(chunk);
            }
        }

        debug!(chunk_size, initial_chunks, ?max_bytes, "heap memory pool created");

        Ok(pool)
    }

    /// Total number of bytes the pool has allocated so far, whether handed out or not.
    #[must_use]
    pub fn total_bytes(&self) -> usize {
        self.state.lock().total_bytes
    }

    /// Upper limit on the bytes the pool may allocate, if any.
    #[must_use]
    #[cfg_attr(test, mutants::skip)] // Trivial accessor.
    pub fn max_bytes(&self) -> Option<usize> {
        self.max_bytes
    }

    /// Number of allocated chunks that are currently available for handing out.
    #[must_use]
    pub fn free_chunks(&self) -> usize {
        self.state.lock().free.len()
    }

    fn allocate(&self, state: &mut HeapPoolState) -> Option<RawChunk> {
        let chunk_size = self.chunk_layout.size();
        let new_total = state.total_bytes.checked_add(chunk_size)?;

        if self.max_bytes.is_some_and(|max| new_total > max) {
            return None;
        }

        // SAFETY: The layout has a non-zero size, guaranteed by the constructor.
        let ptr = NonNull::new(unsafe { alloc(self.chunk_layout) })?;

        state.owned.insert(ptr.as_ptr() as usize);
        state.total_bytes = new_total;

        // SAFETY: We just allocated `chunk_size` bytes at `ptr` and only free them when the pool
        // itself is dropped.
        Some(unsafe { RawChunk::new(ptr, chunk_size) })
    }
}

impl MemoryPool for HeapMemoryPool {
    #[cfg_attr(test, mutants::skip)] // Trivial accessor.
    fn chunk_size(&self) -> usize {
        self.chunk_layout.size()
    }

    #[cfg_attr(test, mutants::skip)] // Trivial accessor.
    fn chunk_alignment(&self) -> usize {
        self.chunk_layout.align()
    }

    fn request_chunk(&self, list_index: usize) -> Option<RawChunk> {
        let mut state = self.state.lock();

        if let Some(chunk) = state.free.pop() {
            return Some(chunk);
        }

        let chunk = self.allocate(&mut state);

        trace!(
            list_index,
            granted = chunk.is_some(),
            total_bytes = state.total_bytes,
            "heap memory pool grew"
        );

        chunk
    }

    fn release_chunk(&self, chunk: RawChunk) {
        let mut state = self.state.lock();

        // A chunk from some other pool would be freed by that pool, not us, so we must not
        // hand it out again.
        if !state.owned.contains(&(chunk.as_ptr().as_ptr() as usize)) {
            debug_assert!(false, "released a chunk that does not belong to this pool");
            return;
        }

        state.free.push(chunk);
    }
}

impl fmt::Debug for HeapMemoryPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();

        f.debug_struct("HeapMemoryPool")
            .field("chunk_size", &self.chunk_layout.size())
            .field("max_bytes", &self.max_bytes)
            .field("total_bytes", &state.total_bytes)
            .field("free_chunks", &state.free.len())
            .finish()
    }
}

impl Drop for HeapMemoryPool {
    fn drop(&mut self) {
        let state = self.state.get_mut();

        for address in state.owned.drain() {
            // SAFETY: Every owned address was allocated by us with this exact layout and is
            // only freed here, once.
            unsafe {
                dealloc(address as *mut u8, self.chunk_layout);
            }
        }
    }
}
