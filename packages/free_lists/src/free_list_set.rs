use std::any::type_name;
use std::fmt;
use std::mem::needs_drop;
use std::result::Result as StdResult;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, error, trace, warn};

use crate::metrics::{CHUNK_BYTES, CHUNKS_GRANTED, GROWTH_FAILURES, TEMPORARY_SHORTAGES};
use crate::segment_list::{Checkout, SegmentList};
use crate::{
    Affinity, AffinityBinder, AffinityFailurePolicy, ArenaMemoryPool, Constructible,
    DEFAULT_PAGES_PER_LIST, Element, Error, FreeListSetBuilder, HeapMemoryPool, ListProfile,
    MemoryPool, Profiling, RawChunk, Result, ReturnError, Shortage, SlotInfo,
    SystemAffinityBinder, round_up,
};

/// Source of process-unique set identities, used to recognize elements of other sets.
static NEXT_SET_ID: AtomicU64 = AtomicU64::new(0);

/// A set of independent free lists of fixed-size elements, all fed from one memory pool.
///
/// Each list (typically one per peer or per processor) holds elements that are constructed
/// once, in place, when the chunk of memory they live in is added to the list. Consumers check
/// elements out with [`get_elt()`][Self::get_elt] and hand them back with
/// [`return_elt()`][Self::return_elt]. Elements keep their state while they circulate and are
/// only destroyed when the set is dropped.
///
/// # Growth
///
/// When a list runs dry it can grow by requesting another chunk from the pool. Every list has a
/// memory budget (see [`FreeListSetBuilder::max_pages_per_list()`]) and counts how many growth
/// attempts in a row have failed. Isolated failures are reported as
/// [`Error::TemporaryShortage`] so the caller can back off and retry; once the number of
/// consecutive failures reaches [`FreeListSetBuilder::max_consecutive_failures()`], failures
/// are reported as [`Error::ResourceExhausted`].
///
/// Growth never holds the list lock while waiting for the pool, so consumers of a list are not
/// serialized behind a slow pool.
///
/// # Affinity
///
/// If the set is built with [`FreeListSetBuilder::affinity()`], every chunk is bound to the
/// processor or memory region of its list before any element is constructed in it.
///
/// # Thread safety
///
/// The set is thread-safe if `T: Send`. Every list has its own lock, held only for O(1)
/// bookkeeping. The lock also publishes the writes a consumer made to an element to whoever
/// checks the element out next.
///
/// # Example
///
/// ```
/// use free_lists::FreeListSet;
///
/// let set = FreeListSet::<[u8; 64]>::builder()
///     .lists(2)
///     .description("buffers")
///     .build()
///     .unwrap();
///
/// let mut buffer = set.get_elt(1).unwrap();
/// buffer[0] = 42;
/// set.return_elt(1, buffer).unwrap();
/// ```
pub struct FreeListSet<T> {
    id: u64,
    description: String,

    pool: Arc<dyn MemoryPool>,
    lists: Box<[SegmentList<T>]>,

    /// One entry per list if affinity is enforced.
    affinity: Option<Box<[Affinity]>>,
    affinity_binder: Arc<dyn AffinityBinder>,
    affinity_failure_policy: AffinityFailurePolicy,

    profiling: Profiling,

    /// The authoritative chunk size, as reported by the pool.
    chunk_size: usize,
    page_size: usize,
    element_size: usize,
    elements_per_chunk: usize,

    grow_threshold: usize,
    retry_for_more_resources: bool,
    is_shared: bool,
}

/// A chunk obtained for a list, with the budget reserved for it.
#[derive(Debug)]
pub(crate) struct GrantedChunk {
    chunk: RawChunk,
    reserved_bytes: usize,

    /// Sequence number of the chunk within its list.
    sequence: usize,
}

/// Byte limits of every list in a set.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct ListSizing {
    min_bytes: usize,
    max_bytes: Option<usize>,
}

impl ListSizing {
    /// Each list is guaranteed at least one chunk and a list maximum is never below the minimum.
    fn new(
        min_pages: usize,
        max_pages: Option<usize>,
        chunk_size: usize,
        page_size: usize,
    ) -> Result<Self> {
        let overflow = || Error::Configuration {
            problem: format!(
                "list limits of {min_pages}..{max_pages:?} pages of {page_size} bytes are too large"
            ),
        };

        let mut min_pages = min_pages;

        if min_pages.checked_mul(page_size).ok_or_else(overflow)? < chunk_size {
            min_pages = chunk_size.div_ceil(page_size);
        }

        let min_bytes = min_pages.checked_mul(page_size).ok_or_else(overflow)?;

        let max_bytes = max_pages
            .map(|max_pages| {
                max_pages
                    .max(min_pages)
                    .checked_mul(page_size)
                    .ok_or_else(overflow)
            })
            .transpose()?;

        Ok(Self {
            min_bytes,
            max_bytes,
        })
    }
}

impl<T: Constructible> FreeListSet<T> {
    /// Starts building a new set.
    ///
    /// This allocates nothing; see [`FreeListSetBuilder::build()`].
    pub fn builder() -> FreeListSetBuilder<T> {
        FreeListSetBuilder::new()
    }

    #[expect(
        clippy::too_many_lines,
        reason = "construction is one linear sequence of validation and setup steps"
    )]
    pub(crate) fn new_inner(builder: FreeListSetBuilder<T>) -> Result<Self> {
        let FreeListSetBuilder {
            lists,
            pages_per_list,
            chunk_size,
            page_size,
            element_size,
            min_pages_per_list,
            max_pages_per_list,
            max_consecutive_failures,
            description,
            retry_for_more_resources,
            affinity,
            affinity_binder,
            affinity_failure_policy,
            memory_pool,
            shared_arena,
            grow_threshold,
            profiling,
            ..
        } = builder;

        if lists == 0 {
            return Err(Error::Configuration {
                problem: "a free list set must have at least one list".to_string(),
            });
        }

        if !page_size.is_power_of_two() {
            return Err(Error::Configuration {
                problem: format!("page size {page_size} is not a power of two"),
            });
        }

        let element_size = element_size.unwrap_or(size_of::<T>());

        if element_size == 0 || element_size < size_of::<T>() {
            return Err(Error::Configuration {
                problem: format!(
                    "element size {element_size} cannot hold a {} of {} bytes",
                    type_name::<T>(),
                    size_of::<T>()
                ),
            });
        }

        if element_size
            .checked_rem(align_of::<T>())
            .is_none_or(|remainder| remainder != 0)
        {
            return Err(Error::Configuration {
                problem: format!(
                    "element size {element_size} is not a multiple of the {}-byte alignment of {}",
                    align_of::<T>(),
                    type_name::<T>()
                ),
            });
        }

        if let Some(affinity) = &affinity {
            if affinity.len() != lists {
                return Err(Error::Configuration {
                    problem: format!(
                        "{} affinity entries were given for {lists} lists",
                        affinity.len()
                    ),
                });
            }
        }

        let (pool, is_shared): (Arc<dyn MemoryPool>, bool) = match (memory_pool, shared_arena) {
            (Some(_), Some(_)) => {
                return Err(Error::Configuration {
                    problem: "an external memory pool cannot be combined with a shared arena"
                        .to_string(),
                });
            }
            (Some(pool), None) => (pool, false),
            (None, shared_arena) => {
                // A private pool rounds the chunk size up to whole pages, so we size it for that.
                let pool_chunk_size =
                    round_up(chunk_size, page_size).ok_or_else(|| Error::Configuration {
                        problem: format!("chunk size {chunk_size} is too large"),
                    })?;

                let sizing = ListSizing::new(
                    min_pages_per_list,
                    max_pages_per_list,
                    pool_chunk_size,
                    page_size,
                )?;

                let initial_bytes = pages_per_list
                    .unwrap_or(DEFAULT_PAGES_PER_LIST)
                    .checked_mul(lists)
                    .and_then(|pages| pages.checked_mul(page_size))
                    .ok_or_else(|| Error::Configuration {
                        problem: format!("initial pool size for {lists} lists is too large"),
                    })?;

                let max_bytes = sizing
                    .max_bytes
                    .map(|max| {
                        max.checked_mul(lists).ok_or_else(|| Error::Configuration {
                            problem: format!("maximum pool size for {lists} lists is too large"),
                        })
                    })
                    .transpose()?;

                match shared_arena {
                    Some(arena) => (
                        Arc::new(ArenaMemoryPool::new(
                            arena,
                            initial_bytes,
                            max_bytes,
                            pool_chunk_size,
                            page_size,
                        )?) as Arc<dyn MemoryPool>,
                        true,
                    ),
                    None => (
                        Arc::new(HeapMemoryPool::new(
                            initial_bytes,
                            max_bytes,
                            pool_chunk_size,
                            page_size,
                        )?) as Arc<dyn MemoryPool>,
                        false,
                    ),
                }
            }
        };

        // The pool may have adjusted the chunk size; from here on only its value counts.
        let chunk_size = pool.chunk_size();

        if align_of::<T>() > pool.chunk_alignment() {
            return Err(Error::Configuration {
                problem: format!(
                    "{} requires {}-byte alignment but the pool only guarantees {}",
                    type_name::<T>(),
                    align_of::<T>(),
                    pool.chunk_alignment()
                ),
            });
        }

        // Any remainder at the end of a chunk is left unused.
        let elements_per_chunk = chunk_size
            .checked_div(element_size)
            .filter(|count| *count > 0)
            .ok_or_else(|| Error::Configuration {
                problem: format!(
                    "element size {element_size} does not fit into a chunk of {chunk_size} bytes"
                ),
            })?;

        let sizing = ListSizing::new(
            min_pages_per_list,
            max_pages_per_list,
            chunk_size,
            page_size,
        )?;

        let segment_lists = (0..lists)
            .map(|_| {
                SegmentList::new(
                    sizing.min_bytes,
                    sizing.max_bytes,
                    max_consecutive_failures,
                )
            })
            .collect();

        let set = Self {
            id: NEXT_SET_ID.fetch_add(1, Ordering::Relaxed),
            description,
            pool,
            lists: segment_lists,
            affinity: affinity.map(Vec::into_boxed_slice),
            affinity_binder: affinity_binder
                .unwrap_or_else(|| Arc::new(SystemAffinityBinder::new())),
            affinity_failure_policy,
            profiling: Profiling::new(profiling, lists),
            chunk_size,
            page_size,
            element_size,
            elements_per_chunk,
            grow_threshold,
            retry_for_more_resources,
            is_shared,
        };

        // The set is not visible to anyone else yet, so nobody can contend for the lists while
        // we fill them. A failure here drops the set, which hands back what was already taken.
        for (index, list) in set.lists.iter().enumerate() {
            while list.bytes_pushed() < sizing.min_bytes {
                if let Err(source) = set.create_more_elements(index) {
                    error!(
                        description = %set.description,
                        list = index,
                        error = %source,
                        "failed to fill free list to its minimum size"
                    );

                    return Err(Error::Initialization {
                        description: set.description.clone(),
                        list: index,
                        source: Box::new(source),
                    });
                }
            }
        }

        debug!(
            description = %set.description,
            lists,
            chunk_size,
            element_size,
            elements_per_chunk,
            min_bytes_per_list = sizing.min_bytes,
            max_bytes_per_list = ?sizing.max_bytes,
            is_shared,
            "free list set created"
        );

        Ok(set)
    }

    /// Checks out an element from the list with the given index.
    ///
    /// If the list is empty, it is grown (subject to the configured grow threshold and
    /// [retry setting][FreeListSetBuilder::retry_for_more_resources]) until an element is
    /// available or growth fails. The element stays checked out until it is passed to
    /// [`return_elt()`][Self::return_elt].
    ///
    /// # Errors
    ///
    /// * [`Error::InvalidIndex`] if there is no list with the given index.
    /// * [`Error::TemporaryShortage`] if no element is available right now but retrying later
    ///   may succeed.
    /// * [`Error::ResourceExhausted`] if the list cannot grow any further.
    /// * [`Error::AffinityBinding`] if a new chunk could not be bound to the list's affinity.
    pub fn get_elt(&self, index: usize) -> Result<Element<'_, T>> {
        let list = self.list(index)?;

        loop {
            match list.checkout(self.grow_threshold) {
                Checkout::Hit(ptr) => {
                    self.profiling.element_checked_out(index);

                    // SAFETY: Every pointer in a list refers to a constructed element in a chunk
                    // that stays alive until the set is dropped. Popping it removed the only
                    // other reference to it, and the element borrows the set.
                    return Ok(unsafe { Element::new(ptr, self.id, index) });
                }
                Checkout::Absorbed => {
                    TEMPORARY_SHORTAGES.with(|event| event.observe_once());
                    return Err(Error::TemporaryShortage { list: index });
                }
                Checkout::Empty if !self.retry_for_more_resources => {
                    return Err(Error::ResourceExhausted {
                        list: index,
                        description: self.description.clone(),
                    });
                }
                Checkout::Empty => {
                    // A successful growth does not guarantee we get one of the new elements,
                    // as a concurrent consumer may take them first, so we check out again.
                    self.create_more_elements(index).inspect_err(|error| {
                        if error.is_temporary() {
                            TEMPORARY_SHORTAGES.with(|event| event.observe_once());
                        }
                    })?;
                }
            }
        }
    }

    /// Returns a checked-out element to the list with the given index.
    ///
    /// The element does not need to go back to the list it came from, as long as it came from
    /// this set. Any writes made to the element are visible to whoever checks it out next.
    /// [Profiling][Self::profile] counts the element as returned to the list it came from.
    ///
    /// # Errors
    ///
    /// * [`Error::InvalidIndex`] if there is no list with the given index.
    /// * [`Error::ForeignElement`] if the element was checked out from a different set.
    ///
    /// In both cases the element is handed back inside the error.
    pub fn return_elt<'a>(
        &'a self,
        index: usize,
        element: Element<'a, T>,
    ) -> StdResult<(), ReturnError<'a, T>> {
        let list = match self.list(index) {
            Ok(list) => list,
            Err(error) => return Err(ReturnError::new(error, element)),
        };

        if element.set_id() != self.id {
            return Err(ReturnError::new(
                Error::ForeignElement { list: index },
                element,
            ));
        }

        // Usage is charged to the list the element was checked out from.
        self.profiling.element_returned(element.list());
        list.push(element.into_ptr());

        Ok(())
    }

    /// Grows the list with the given index by one chunk.
    ///
    /// This happens automatically when [`get_elt()`][Self::get_elt] finds a list empty but can
    /// also be used to grow a list ahead of demand.
    ///
    /// # Errors
    ///
    /// * [`Error::InvalidIndex`] if there is no list with the given index.
    /// * [`Error::TemporaryShortage`] or [`Error::ResourceExhausted`] if the list is over budget
    ///   or the pool refused, depending on how many growth attempts in a row have failed.
    /// * [`Error::UnusableChunk`] if the pool supplied a chunk that is too short or misaligned
    ///   for the elements of the set. The chunk goes back to the pool.
    /// * [`Error::AffinityBinding`] if the chunk could not be bound to the list's affinity and
    ///   the [failure policy][AffinityFailurePolicy] says this is an error. The chunk goes back
    ///   to the pool.
    ///
    /// # Panics
    ///
    /// If constructing an element panics, the chunk and the elements constructed so far are
    /// leaked. The set remains usable.
    pub fn create_more_elements(&self, index: usize) -> Result<()> {
        let list = self.list(index)?;
        let GrantedChunk {
            chunk,
            reserved_bytes,
            sequence,
        } = self.get_mem_chunk(index)?;

        if let Err(problem) = self.check_chunk(&chunk) {
            warn!(
                description = %self.description,
                list = index,
                chunk_len = chunk.len(),
                %problem,
                "memory pool supplied an unusable chunk"
            );

            list.cancel(reserved_bytes);
            self.pool.release_chunk(chunk);

            return Err(Error::UnusableChunk {
                list: index,
                problem,
            });
        }

        if let Some(affinity) = self.affinity_of(index) {
            if let Err(source) = self
                .affinity_binder
                .bind(chunk.as_ptr(), chunk.len(), affinity)
            {
                warn!(
                    description = %self.description,
                    list = index,
                    ?affinity,
                    error = %source,
                    "failed to bind chunk memory to list affinity"
                );

                if self.affinity_failure_policy == AffinityFailurePolicy::Fail {
                    list.cancel(reserved_bytes);
                    self.pool.release_chunk(chunk);

                    return Err(Error::AffinityBinding {
                        list: index,
                        source,
                    });
                }
            }
        }

        let elements: Vec<_> = (0..self.elements_per_chunk)
            .map(|index_in_chunk| {
                let slot = chunk.slot::<T>(index_in_chunk, self.element_size);

                // SAFETY: The slot lies within the chunk and is aligned because `check_chunk()`
                // verified the chunk start and length and the element size is a multiple of the
                // alignment of `T`. The chunk was just handed to us, so nobody else uses it.
                unsafe {
                    slot.write(T::construct(SlotInfo::new(index, sequence, index_in_chunk)));
                }

                slot
            })
            .collect();

        trace!(
            description = %self.description,
            list = index,
            sequence,
            elements = elements.len(),
            "chunk added to free list"
        );

        list.append_chunk(chunk, elements);

        Ok(())
    }

    /// Obtains a chunk for the list with the given index, within the list's budget.
    ///
    /// The budget is reserved before the pool is asked, so concurrent growers of the same list
    /// can never jointly exceed it.
    pub(crate) fn get_mem_chunk(&self, index: usize) -> Result<GrantedChunk> {
        let list = self.list(index)?;
        let chunk_size = self.pool.chunk_size();

        self.profiling.chunk_requested(index);

        let sequence = list
            .reserve(chunk_size)
            .map_err(|shortage| self.growth_failed(index, list, shortage))?;

        let Some(chunk) = self.pool.request_chunk(index) else {
            let shortage = list.refuse(chunk_size);
            return Err(self.growth_failed(index, list, shortage));
        };

        list.grant();
        self.profiling.chunk_granted(index);

        CHUNKS_GRANTED.with(|event| event.observe_once());
        CHUNK_BYTES.with(|event| event.observe(chunk.len()));

        Ok(GrantedChunk {
            chunk,
            reserved_bytes: chunk_size,
            sequence,
        })
    }

    /// Verifies that every slot of a chunk fits into it and is aligned for `T`.
    fn check_chunk(&self, chunk: &RawChunk) -> StdResult<(), String> {
        if !chunk.as_ptr().cast::<T>().is_aligned() {
            return Err(format!(
                "chunk at {:p} is not aligned for {}",
                chunk.as_ptr(),
                type_name::<T>()
            ));
        }

        let required = self.elements_per_chunk.saturating_mul(self.element_size);

        if chunk.len() < required {
            return Err(format!(
                "chunk of {} bytes cannot hold {} elements of {} bytes",
                chunk.len(),
                self.elements_per_chunk,
                self.element_size
            ));
        }

        Ok(())
    }

    fn growth_failed(&self,index: usize, list: &SegmentList<T>, shortage: Shortage) -> Error {
        GROWTH_FAILURES.with(|event| event.observe_once());

        if shortage == Shortage::Permanent && list.consec_fail() == list.max_consec_fail() {
            warn!(
                description = %self.description,
                list = index,
                bytes_pushed = list.bytes_pushed(),
                max_bytes_pushed = ?list.max_bytes_pushed(),
                consecutive_failures = list.consec_fail(),
                "free list is out of resources"
            );
        }

        shortage.into_error(index, &self.description)
    }
}

impl<T> FreeListSet<T> {
    fn list(&self, index: usize) -> Result<&SegmentList<T>> {
        self.lists.get(index).ok_or(Error::InvalidIndex {
            index,
            list_count: self.lists.len(),
        })
    }

    fn affinity_of(&self, index: usize) -> Option<Affinity> {
        self.affinity
            .as_ref()
            .and_then(|affinity| affinity.get(index))
            .copied()
    }

    /// Number of lists in the set.
    #[must_use]
    pub fn list_count(&self) -> usize {
        self.lists.len()
    }

    /// Distance in bytes between consecutive elements in a chunk.
    #[must_use]
    #[cfg_attr(test, mutants::skip)] // Trivial accessor.
    pub fn element_size(&self) -> usize {
        self.element_size
    }

    /// Number of elements carved out of every chunk.
    #[must_use]
    #[cfg_attr(test, mutants::skip)] // Trivial accessor.
    pub fn elements_per_chunk(&self) -> usize {
        self.elements_per_chunk
    }

    /// Size in bytes of every chunk, as reported by the memory pool.
    #[must_use]
    #[cfg_attr(test, mutants::skip)] // Trivial accessor.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Page size in bytes that list limits are expressed in.
    #[must_use]
    #[cfg_attr(test, mutants::skip)] // Trivial accessor.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Human-readable label of the set.
    #[must_use]
    #[cfg_attr(test, mutants::skip)] // Trivial accessor.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Whether the elements live in a shared arena.
    #[must_use]
    #[cfg_attr(test, mutants::skip)] // Trivial accessor.
    pub fn is_shared(&self) -> bool {
        self.is_shared
    }

    /// Whether chunks are bound to the affinity of their list.
    #[must_use]
    pub fn enforces_affinity(&self) -> bool {
        self.affinity.is_some()
    }

    /// The affinity of the list with the given index, if affinity is enforced.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidIndex`] if there is no list with the given index.
    pub fn affinity(&self, index: usize) -> Result<Option<Affinity>> {
        self.list(index)?;
        Ok(self.affinity_of(index))
    }

    /// Bytes the list with the given index has received from the pool.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidIndex`] if there is no list with the given index.
    pub fn bytes_pushed(&self, index: usize) -> Result<usize> {
        Ok(self.list(index)?.bytes_pushed())
    }

    /// Bytes the list with the given index was filled with when the set was built.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidIndex`] if there is no list with the given index.
    pub fn min_bytes_pushed(&self, index: usize) -> Result<usize> {
        Ok(self.list(index)?.min_bytes_pushed())
    }

    /// Bytes the list with the given index may grow to, if limited.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidIndex`] if there is no list with the given index.
    pub fn max_bytes_pushed(&self, index: usize) -> Result<Option<usize>> {
        Ok(self.list(index)?.max_bytes_pushed())
    }

    /// Growth attempts in a row that have failed for the list with the given index.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidIndex`] if there is no list with the given index.
    pub fn consecutive_failures(&self, index: usize) -> Result<usize> {
        Ok(self.list(index)?.consec_fail())
    }

    /// Elements currently available for checkout from the list with the given index.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidIndex`] if there is no list with the given index.
    pub fn free_count(&self, index: usize) -> Result<usize> {
        Ok(self.list(index)?.free_count())
    }

    /// Usage counters of the list with the given index, if profiling is enabled.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidIndex`] if there is no list with the given index.
    pub fn profile(&self, index: usize) -> Result<Option<ListProfile>> {
        self.list(index)?;
        Ok(self.profiling.snapshot(index))
    }
}

impl<T> fmt::Debug for FreeListSet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FreeListSet")
            .field("element_type", &format_args!("{}", type_name::<T>()))
            .field("description", &self.description)
            .field("lists", &self.lists)
            .field("affinity", &self.affinity)
            .field("affinity_failure_policy", &self.affinity_failure_policy)
            .field("profiling", &self.profiling.is_enabled())
            .field("chunk_size", &self.chunk_size)
            .field("page_size", &self.page_size)
            .field("element_size", &self.element_size)
            .field("elements_per_chunk", &self.elements_per_chunk)
            .field("grow_threshold", &self.grow_threshold)
            .field("retry_for_more_resources", &self.retry_for_more_resources)
            .field("is_shared", &self.is_shared)
            .finish_non_exhaustive()
    }
}

impl<T> Drop for FreeListSet<T> {
    fn drop(&mut self) {
        let mut released_chunks: usize = 0;

        for list in self.lists.iter_mut() {
            for chunk in list.take_chunks() {
                if needs_drop::<T>() {
                    for index_in_chunk in 0..self.elements_per_chunk {
                        let element = chunk.slot::<T>(index_in_chunk, self.element_size);

                        // SAFETY: Every slot of a chunk that made it into a list holds a
                        // constructed element. None of them can be checked out because checked
                        // out elements borrow the set, and each chunk is taken out only once.
                        unsafe {
                            element.drop_in_place();
                        }
                    }
                }

                self.pool.release_chunk(chunk);
                released_chunks = released_chunks.wrapping_add(1);
            }
        }

        debug!(
            description = %self.description,
            released_chunks,
            "free list set dropped"
        );
    }
}
