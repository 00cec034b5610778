use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Per-list usage counters, either kept or not depending on how the set was built.
///
/// The counters are advisory. They never fail and never influence control flow, so relaxed
/// ordering is sufficient everywhere.
#[derive(Debug)]
pub(crate) enum Profiling {
    Disabled,
    Enabled(Box<[ListCounters]>),
}

#[derive(Debug, Default)]
pub(crate) struct ListCounters {
    outstanding: AtomicUsize,
    max_outstanding: AtomicUsize,
    outstanding_sum: AtomicU64,
    checkouts: AtomicU64,
    chunks_requested: AtomicU64,
    chunks_granted: AtomicU64,
}

impl Profiling {
    pub(crate) fn new(enabled: bool, list_count: usize) -> Self {
        if enabled {
            Self::Enabled((0..list_count).map(|_| ListCounters::default()).collect())
        } else {
            Self::Disabled
        }
    }

    fn counters(&self, list: usize) -> Option<&ListCounters> {
        match self {
            Self::Disabled => None,
            Self::Enabled(counters) => counters.get(list),
        }
    }

    /// Records that an element was checked out of the list.
    pub(crate) fn element_checked_out(&self, list: usize) {
        let Some(counters) = self.counters(list) else {
            return;
        };

        let outstanding = counters
            .outstanding
            .fetch_add(1, Ordering::Relaxed)
            .wrapping_add(1);

        counters
            .max_outstanding
            .fetch_max(outstanding, Ordering::Relaxed);
        counters
            .outstanding_sum
            .fetch_add(outstanding as u64, Ordering::Relaxed);
        counters.checkouts.fetch_add(1, Ordering::Relaxed);
    }

    /// Records that an element was returned to the list.
    pub(crate) fn element_returned(&self, list: usize) {
        let Some(counters) = self.counters(list) else {
            return;
        };

        // Saturates at zero if returns ever outpace checkouts.
        _ = counters
            .outstanding
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |value| {
                value.checked_sub(1)
            });
    }

    /// Records that the list asked its pool for a chunk.
    pub(crate) fn chunk_requested(&self, list: usize) {
        if let Some(counters) = self.counters(list) {
            counters.chunks_requested.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Records that the pool granted a chunk to the list.
    pub(crate) fn chunk_granted(&self, list: usize) {
        if let Some(counters) = self.counters(list) {
            counters.chunks_granted.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// A snapshot of the counters of the list, if profiling is enabled.
    pub(crate) fn snapshot(&self, list: usize) -> Option<ListProfile> {
        self.counters(list).map(|counters| ListProfile {
            outstanding: counters.outstanding.load(Ordering::Relaxed),
            max_outstanding: counters.max_outstanding.load(Ordering::Relaxed),
            outstanding_sum: counters.outstanding_sum.load(Ordering::Relaxed),
            checkouts: counters.checkouts.load(Ordering::Relaxed),
            chunks_requested: counters.chunks_requested.load(Ordering::Relaxed),
            chunks_granted: counters.chunks_granted.load(Ordering::Relaxed),
        })
    }

    pub(crate) fn is_enabled(&self) -> bool {
        matches!(self, Self::Enabled(_))
    }
}

/// Usage counters of one list, as returned by
/// [`FreeListSet::profile()`][crate::FreeListSet::profile].
///
/// The counters are captured individually, so a snapshot taken while other threads use the
/// list may be slightly inconsistent.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ListProfile {
    outstanding: usize,
    max_outstanding: usize,
    outstanding_sum: u64,
    checkouts: u64,
    chunks_requested: u64,
    chunks_granted: u64,
}

impl ListProfile {
    /// Number of elements currently checked out of the list.
    #[must_use]
    #[cfg_attr(test, mutants::skip)] // Trivial accessor.
    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    /// Highest number of elements that were checked out at the same time.
    #[must_use]
    #[cfg_attr(test, mutants::skip)] // Trivial accessor.
    pub fn max_outstanding(&self) -> usize {
        self.max_outstanding
    }

    /// Number of successful checkouts.
    #[must_use]
    #[cfg_attr(test, mutants::skip)] // Trivial accessor.
    pub fn checkouts(&self) -> u64 {
        self.checkouts
    }

    /// Average number of elements checked out, sampled at every checkout.
    ///
    /// Returns `None` if nothing has been checked out yet.
    #[must_use]
    pub fn mean_outstanding(&self) -> Option<f64> {
        if self.checkouts == 0 {
            return None;
        }

        #[expect(
            clippy::cast_precision_loss,
            reason = "an approximate average is all we promise"
        )]
        Some(self.outstanding_sum as f64 / self.checkouts as f64)
    }

    /// Number of chunks the list asked the pool for.
    #[must_use]
    #[cfg_attr(test, mutants::skip)] // Trivial accessor.
    pub fn chunks_requested(&self) -> u64 {
        self.chunks_requested
    }

    /// Number of chunks the pool granted to the list.
    #[must_use]
    #[cfg_attr(test, mutants::skip)] // Trivial accessor.
    pub fn chunks_granted(&self) -> u64 {
        self.chunks_granted
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(Profiling: Send, Sync);
    assert_impl_all!(ListProfile: Send, Sync, Copy);

    #[test]
    fn disabled_profiling_has_no_snapshot() {
        let profiling = Profiling::new(false, 4);

        profiling.element_checked_out(0);
        profiling.chunk_requested(0);

        assert!(!profiling.is_enabled());
        assert_eq!(profiling.snapshot(0), None);
    }

    #[test]
    fn tracks_outstanding_elements() {
        let profiling = Profiling::new(true, 2);

        profiling.element_checked_out(1);
        profiling.element_checked_out(1);
        profiling.element_checked_out(1);
        profiling.element_returned(1);

        let profile = profiling.snapshot(1).unwrap();
        assert_eq!(profile.outstanding(), 2);
        assert_eq!(profile.max_outstanding(), 3);
        assert_eq!(profile.checkouts(), 3);
        assert_eq!(profile.mean_outstanding(), Some(2.0));

        // Other lists are unaffected.
        assert_eq!(profiling.snapshot(0), Some(ListProfile::default()));
    }

    #[test]
    fn tracks_chunks() {
        let profiling = Profiling::new(true, 1);

        profiling.chunk_requested(0);
        profiling.chunk_requested(0);
        profiling.chunk_granted(0);

        let profile = profiling.snapshot(0).unwrap();
        assert_eq!(profile.chunks_requested(), 2);
        assert_eq!(profile.chunks_granted(), 1);
    }

    #[test]
    fn outstanding_never_underflows() {
        let profiling = Profiling::new(true, 1);

        profiling.element_returned(0);

        assert_eq!(profiling.snapshot(0).unwrap().outstanding(), 0);
    }

    #[test]
    fn mean_of_nothing_is_none() {
        assert_eq!(ListProfile::default().mean_outstanding(), None);
    }

    #[test]
    fn out_of_range_list_is_ignored() {
        let profiling = Profiling::new(true, 1);

        profiling.element_checked_out(5);

        assert_eq!(profiling.snapshot(5), None);
    }
}
