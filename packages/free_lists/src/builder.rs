use std::any::type_name;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::{
    Affinity, AffinityBinder, AffinityFailurePolicy, Constructible, FreeListSet, MemoryPool,
    Result, SharedArena,
};

/// Number of pages each list contributes to a private pool when no explicit value is set.
pub const DEFAULT_PAGES_PER_LIST: usize = 8;

/// Page size assumed when no explicit value is set.
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Consecutive growth failures after which a list reports itself as exhausted, when no
/// explicit value is set.
pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: usize = 3;

/// Builder for creating an instance of [`FreeListSet`].
///
/// Creating the builder allocates nothing. All memory is obtained in
/// [`build()`][Self::build], which also fills every list to its minimum size.
///
/// # Examples
///
/// ```
/// use free_lists::FreeListSet;
///
/// let set = FreeListSet::<u64>::builder()
///     .lists(4)
///     .chunk_size(4096)
///     .max_pages_per_list(Some(16))
///     .description("descriptors")
///     .build()
///     .unwrap();
///
/// assert_eq!(set.list_count(), 4);
/// assert_eq!(set.elements_per_chunk(), 512);
/// ```
#[must_use]
pub struct FreeListSetBuilder<T> {
    pub(crate) lists: usize,
    pub(crate) pages_per_list: Option<usize>,
    pub(crate) chunk_size: usize,
    pub(crate) page_size: usize,
    pub(crate) element_size: Option<usize>,
    pub(crate) min_pages_per_list: usize,
    pub(crate) max_pages_per_list: Option<usize>,
    pub(crate) max_consecutive_failures: usize,
    pub(crate) description: String,
    pub(crate) retry_for_more_resources: bool,
    pub(crate) affinity: Option<Vec<Affinity>>,
    pub(crate) affinity_binder: Option<Arc<dyn AffinityBinder>>,
    pub(crate) affinity_failure_policy: AffinityFailurePolicy,
    pub(crate) memory_pool: Option<Arc<dyn MemoryPool>>,
    pub(crate) shared_arena: Option<Arc<dyn SharedArena>>,
    pub(crate) grow_threshold: usize,
    pub(crate) profiling: bool,

    _element: PhantomData<T>,
}

impl<T> fmt::Debug for FreeListSetBuilder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FreeListSetBuilder")
            .field("element_type", &format_args!("{}", type_name::<T>()))
            .field("lists", &self.lists)
            .field("pages_per_list", &self.pages_per_list)
            .field("chunk_size", &self.chunk_size)
            .field("page_size", &self.page_size)
            .field("element_size", &self.element_size)
            .field("min_pages_per_list", &self.min_pages_per_list)
            .field("max_pages_per_list", &self.max_pages_per_list)
            .field("max_consecutive_failures", &self.max_consecutive_failures)
            .field("description", &self.description)
            .field("retry_for_more_resources", &self.retry_for_more_resources)
            .field("affinity", &self.affinity)
            .field("affinity_failure_policy", &self.affinity_failure_policy)
            .field("external_pool", &self.memory_pool.is_some())
            .field("shared", &self.shared_arena.is_some())
            .field("grow_threshold", &self.grow_threshold)
            .field("profiling", &self.profiling)
            .finish_non_exhaustive()
    }
}

impl<T> FreeListSetBuilder<T> {
    pub(crate) fn new() -> Self {
        Self {
            lists: 1,
            pages_per_list: None,
            chunk_size: DEFAULT_PAGE_SIZE,
            page_size: DEFAULT_PAGE_SIZE,
            element_size: None,
            min_pages_per_list: 1,
            max_pages_per_list: None,
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
            description: String::from("free lists"),
            retry_for_more_resources: true,
            affinity: None,
            affinity_binder: None,
            affinity_failure_policy: AffinityFailurePolicy::default(),
            memory_pool: None,
            shared_arena: None,
            grow_threshold: 0,
            profiling: false,
            _element: PhantomData,
        }
    }

    /// Sets the number of independent lists in the set. Defaults to 1.
    pub fn lists(mut self, lists: usize) -> Self {
        self.lists = lists;
        self
    }

    /// Sets how many pages each list contributes to the initial size of a private pool.
    ///
    /// `None` (the default) uses [`DEFAULT_PAGES_PER_LIST`]. Ignored if an external memory
    /// pool is supplied.
    pub fn pages_per_list(mut self, pages: Option<usize>) -> Self {
        self.pages_per_list = pages;
        self
    }

    /// Sets the requested chunk size in bytes. Defaults to one page.
    ///
    /// The memory pool may adjust this (a private pool rounds it up to whole pages); the set
    /// always uses the size reported by the pool.
    pub fn chunk_size(mut self, bytes: usize) -> Self {
        self.chunk_size = bytes;
        self
    }

    /// Sets the page size in bytes, which must be a power of two.
    /// Defaults to [`DEFAULT_PAGE_SIZE`].
    pub fn page_size(mut self, bytes: usize) -> Self {
        self.page_size = bytes;
        self
    }

    /// Sets the distance in bytes between consecutive elements in a chunk.
    ///
    /// Defaults to `size_of::<T>()`. A larger value pads every element, for example to give
    /// each element its own cache line. It must be a multiple of `align_of::<T>()`.
    pub fn element_size(mut self, bytes: usize) -> Self {
        self.element_size = Some(bytes);
        self
    }

    /// Sets the number of pages every list is filled with during [`build()`][Self::build].
    ///
    /// Raised to at least one chunk. Defaults to 1.
    pub fn min_pages_per_list(mut self, pages: usize) -> Self {
        self.min_pages_per_list = pages;
        self
    }

    /// Sets the number of pages a list may grow to. `None` (the default) means unbounded.
    ///
    /// Raised to at least the minimum pages per list.
    pub fn max_pages_per_list(mut self, pages: Option<usize>) -> Self {
        self.max_pages_per_list = pages;
        self
    }

    /// Sets how many growth attempts in a row may fail before a list reports
    /// [`Error::ResourceExhausted`][crate::Error::ResourceExhausted] instead of
    /// [`Error::TemporaryShortage`][crate::Error::TemporaryShortage].
    ///
    /// Defaults to [`DEFAULT_MAX_CONSECUTIVE_FAILURES`]. Zero makes every failure permanent.
    pub fn max_consecutive_failures(mut self, failures: usize) -> Self {
        self.max_consecutive_failures = failures;
        self
    }

    /// Sets a human-readable label for the set, used in errors and logs.
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Sets whether [`get_elt()`][FreeListSet::get_elt] grows an empty list on demand.
    ///
    /// Defaults to `true`. When `false`, lists never grow beyond their initial size and an
    /// empty list reports [`Error::ResourceExhausted`][crate::Error::ResourceExhausted].
    pub fn retry_for_more_resources(mut self, retry: bool) -> Self {
        self.retry_for_more_resources = retry;
        self
    }

    /// Enforces memory affinity, one entry per list.
    ///
    /// Every chunk a list receives is bound to the list's affinity before its elements are
    /// constructed. The number of entries must equal the number of lists.
    pub fn affinity(mut self, affinity: Vec<Affinity>) -> Self {
        self.affinity = Some(affinity);
        self
    }

    /// Sets the mechanism used to bind chunks to their affinity.
    ///
    /// Defaults to [`SystemAffinityBinder`][crate::SystemAffinityBinder].
    pub fn affinity_binder(mut self, binder: Arc<dyn AffinityBinder>) -> Self {
        self.affinity_binder = Some(binder);
        self
    }

    /// Sets what happens when a chunk cannot be bound to its affinity.
    pub fn affinity_failure_policy(mut self, policy: AffinityFailurePolicy) -> Self {
        self.affinity_failure_policy = policy;
        self
    }

    /// Uses an existing memory pool instead of creating a private one.
    ///
    /// The pool may be shared with other sets.
    pub fn memory_pool(mut self, pool: Arc<dyn MemoryPool>) -> Self {
        self.memory_pool = Some(pool);
        self
    }

    /// Creates the private pool over a shared memory arena instead of the process heap.
    ///
    /// The elements then live in the arena. The bookkeeping of the lists themselves remains
    /// local to the process that built the set.
    pub fn shared_arena(mut self, arena: Arc<dyn SharedArena>) -> Self {
        self.shared_arena = Some(arena);
        self
    }

    /// Sets how many consecutive requests may find a list empty before the list is grown.
    ///
    /// Defaults to 0, which grows on the first miss. Absorbed misses report
    /// [`Error::TemporaryShortage`][crate::Error::TemporaryShortage], giving consumers a chance
    /// to return elements before more memory is taken from the pool.
    ///
    /// The threshold counts consecutive checkouts that found the list empty, not consecutive
    /// failed growth attempts; those are governed by
    /// [`max_consecutive_failures()`][Self::max_consecutive_failures].
    pub fn grow_threshold(mut self, misses: usize) -> Self {
        self.grow_threshold = misses;
        self
    }

    /// Enables per-list usage counters, readable via [`FreeListSet::profile()`].
    pub fn profiling(mut self, enabled: bool) -> Self {
        self.profiling = enabled;
        self
    }
}

impl<T: Constructible> FreeListSetBuilder<T> {
    /// Builds the set, creating or attaching to the memory pool and filling every list to its
    /// minimum size.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`][crate::Error::Configuration] if the parameters are
    /// inconsistent, [`Error::PoolConstruction`][crate::Error::PoolConstruction] if the private
    /// pool cannot be created and [`Error::Initialization`][crate::Error::Initialization] if a
    /// list cannot be filled to its minimum size.
    pub fn build(self) -> Result<FreeListSet<T>> {
        FreeListSet::new_inner(self)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let builder = FreeListSetBuilder::<u64>::new();

        assert_eq!(builder.lists, 1);
        assert_eq!(builder.page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(builder.element_size, None);
        assert!(builder.retry_for_more_resources);
        assert_eq!(builder.grow_threshold, 0);
        assert!(!builder.profiling);
    }

    #[test]
    fn setters_are_recorded() {
        let builder = FreeListSetBuilder::<u64>::new()
            .lists(3)
            .pages_per_list(Some(2))
            .element_size(64)
            .max_pages_per_list(Some(4))
            .description("peers")
            .retry_for_more_resources(false)
            .grow_threshold(2)
            .profiling(true);

        assert_eq!(builder.lists, 3);
        assert_eq!(builder.pages_per_list, Some(2));
        assert_eq!(builder.element_size, Some(64));
        assert_eq!(builder.max_pages_per_list, Some(4));
        assert_eq!(builder.description, "peers");
        assert!(!builder.retry_for_more_resources);
        assert_eq!(builder.grow_threshold, 2);
        assert!(builder.profiling);
    }

    #[test]
    fn debug_names_element_type() {
        let builder = FreeListSetBuilder::<u64>::new();

        assert!(format!("{builder:?}").contains("u64"));
    }
}
