use std::fmt;
use std::ptr::NonNull;

use parking_lot::Mutex;

use crate::{RawChunk, Shortage};

/// The free elements of one list, together with the accounting that decides whether the list
/// may grow.
///
/// All state is behind one lock that is only ever held for O(1) bookkeeping. Growth itself
/// (talking to the memory pool, binding affinity, constructing elements) happens outside the
/// lock: the budget is reserved first, the chunk is prepared, then the finished chunk is
/// appended. This way concurrent growers can never jointly exceed the budget and consumers of
/// the list are never stuck behind a slow pool.
pub(crate) struct SegmentList<T> {
    state: Mutex<ListState<T>>,
}

struct ListState<T> {
    /// Elements currently available for checkout. No ordering is promised to consumers.
    free: Vec<NonNull<T>>,

    /// Every chunk this list has received, kept for teardown.
    chunks: Vec<RawChunk>,

    /// Sequence number handed to the next successful reservation.
    next_chunk_sequence: usize,

    /// Bytes this list has received (or reserved) from the pool.
    bytes_pushed: usize,

    min_bytes_pushed: usize,

    /// `None` means the list may grow without limit.
    max_bytes_pushed: Option<usize>,

    /// Growth attempts in a row that did not yield a chunk.
    consec_fail: usize,

    max_consec_fail: usize,

    /// Checkouts in a row that found the list empty.
    consec_misses: usize,
}

/// Outcome of trying to check out an element.
#[derive(Debug)]
pub(crate) enum Checkout<T> {
    Hit(NonNull<T>),

    /// The list was empty but the miss was absorbed by the growth threshold.
    Absorbed,

    /// The list was empty and the caller should consider growing it.
    Empty,
}

impl<T> SegmentList<T> {
    pub(crate) fn new(
        min_bytes_pushed: usize,
        max_bytes_pushed: Option<usize>,
        max_consec_fail: usize,
    ) -> Self {
        Self {
            state: Mutex::new(ListState {
                free: Vec::new(),
                chunks: Vec::new(),
                next_chunk_sequence: 0,
                bytes_pushed: 0,
                min_bytes_pushed,
                max_bytes_pushed,
                consec_fail: 0,
                max_consec_fail,
                consec_misses: 0,
            }),
        }
    }

    pub(crate) fn bytes_pushed(&self) -> usize {
        self.state.lock().bytes_pushed
    }

    pub(crate) fn min_bytes_pushed(&self) -> usize {
        self.state.lock().min_bytes_pushed
    }

    pub(crate) fn max_bytes_pushed(&self) -> Option<usize> {
        self.state.lock().max_bytes_pushed
    }

    pub(crate) fn consec_fail(&self) -> usize {
        self.state.lock().consec_fail
    }

    pub(crate) fn max_consec_fail(&self) -> usize {
        self.state.lock().max_consec_fail
    }

    pub(crate) fn free_count(&self) -> usize {
        self.state.lock().free.len()
    }

    #[cfg(test)]
    pub(crate) fn chunk_count(&self) -> usize {
        self.state.lock().chunks.len()
    }

    /// Reserves budget for a chunk of `chunk_size` bytes, returning the sequence number of the
    /// chunk within the list. Sequence numbers are unique but have gaps where growth failed.
    ///
    /// On failure the consecutive failure count is incremented and the shortage classified.
    pub(crate) fn reserve(&self, chunk_size: usize) -> Result<usize, Shortage> {
        self.state.lock().reserve(chunk_size)
    }

    /// Undoes a reservation because the pool could not supply the chunk. This counts as a
    /// failed growth attempt.
    pub(crate) fn refuse(&self, chunk_size: usize) -> Shortage {
        let mut state = self.state.lock();
        state.unreserve(chunk_size);
        state.fail()
    }

    /// Undoes a reservation without counting a failed growth attempt.
    pub(crate) fn cancel(&self, chunk_size: usize) {
        self.state.lock().unreserve(chunk_size);
    }

    /// Records that the pool supplied a chunk for a reservation.
    pub(crate) fn grant(&self) {
        let mut state = self.state.lock();
        state.consec_fail = 0;
    }

    /// Appends the constructed elements of a chunk to the list.
    pub(crate) fn append_chunk(&self, chunk: RawChunk, elements: impl IntoIterator<Item = NonNull<T>>) {
        let mut state = self.state.lock();
        state.chunks.push(chunk);
        state.free.extend(elements);
    }

    /// Checks out an element, or reports why none was available.
    ///
    /// Misses are absorbed (and counted) while fewer than `grow_threshold` consecutive misses
    /// have been seen; after that every miss asks the caller to grow the list.
    pub(crate) fn checkout(&self, grow_threshold: usize) -> Checkout<T> {
        let mut state = self.state.lock();

        if let Some(element) = state.free.pop() {
            state.consec_misses = 0;
            return Checkout::Hit(element);
        }

        if state.consec_misses < grow_threshold {
            state.consec_misses = state
                .consec_misses
                .checked_add(1)
                .expect("bounded by grow_threshold which is a usize");
            return Checkout::Absorbed;
        }

        Checkout::Empty
    }

    /// Makes an element available for checkout again.
    pub(crate) fn push(&self, element: NonNull<T>) {
        self.state.lock().free.push(element);
    }

    /// Takes every chunk out of the list, for teardown.
    pub(crate) fn take_chunks(&mut self) -> Vec<RawChunk> {
        let state = self.state.get_mut();
        state.free.clear();
        std::mem::take(&mut state.chunks)
    }
}

impl<T> ListState<T> {
    fn reserve(&mut self, chunk_size: usize) -> Result<usize, Shortage> {
        let Some(new_bytes_pushed) = self.bytes_pushed.checked_add(chunk_size) else {
            return Err(self.fail());
        };

        if self
            .max_bytes_pushed
            .is_some_and(|max| new_bytes_pushed > max)
        {
            return Err(self.fail());
        }

        self.bytes_pushed = new_bytes_pushed;

        let sequence = self.next_chunk_sequence;
        self.next_chunk_sequence = self.next_chunk_sequence.wrapping_add(1);
        Ok(sequence)
    }

    fn unreserve(&mut self, chunk_size: usize) {
        self.bytes_pushed = self
            .bytes_pushed
            .checked_sub(chunk_size)
            .expect("only reserved bytes are ever unreserved");
    }

    fn fail(&mut self) -> Shortage {
        self.consec_fail = self.consec_fail.saturating_add(1);

        if self.consec_fail >= self.max_consec_fail {
            Shortage::Permanent
        } else {
            Shortage::Temporary
        }
    }
}

impl<T> fmt::Debug for SegmentList<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();

        f.debug_struct("SegmentList")
            .field("free", &state.free.len())
            .field("chunks", &state.chunks.len())
            .field("bytes_pushed", &state.bytes_pushed)
            .field("min_bytes_pushed", &state.min_bytes_pushed)
            .field("max_bytes_pushed", &state.max_bytes_pushed)
            .field("consec_fail", &state.consec_fail)
            .field("max_consec_fail", &state.max_consec_fail)
            .finish_non_exhaustive()
    }
}

// SAFETY: The list holds pointers to elements that live in pool memory with no thread affinity.
// Handing them to another thread moves a `T` there, which is fine as long as `T: Send`.
unsafe impl<T: Send> Send for SegmentList<T> {}

// SAFETY: All access to the pointers goes through the mutex, and shared access to the list
// only ever moves elements between threads (never shares them), so `T: Send` is sufficient.
unsafe impl<T: Send> Sync for SegmentList<T> {}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    fn dangling_chunk() -> RawChunk {
        // SAFETY: Tests never dereference this chunk.
        unsafe { RawChunk::new(NonNull::dangling(), 0) }
    }

    #[test]
    fn reserve_within_budget() {
        let list = SegmentList::<u64>::new(4096, Some(8192), 3);

        assert_eq!(list.reserve(4096), Ok(0));
        assert_eq!(list.reserve(4096), Ok(1));

        assert_eq!(list.bytes_pushed(), 8192);
        assert_eq!(list.consec_fail(), 0);
    }

    #[test]
    fn reserve_beyond_budget_escalates() {
        let list = SegmentList::<u64>::new(4096, Some(4096), 3);

        list.reserve(4096).unwrap();

        assert_eq!(list.reserve(4096), Err(Shortage::Temporary));
        assert_eq!(list.reserve(4096), Err(Shortage::Temporary));
        assert_eq!(list.reserve(4096), Err(Shortage::Permanent));
        assert_eq!(list.reserve(4096), Err(Shortage::Permanent));

        assert_eq!(list.bytes_pushed(), 4096);
        assert_eq!(list.consec_fail(), 4);
    }

    #[test]
    fn unbounded_list_always_reserves() {
        let list = SegmentList::<u64>::new(0, None, 1);

        for _ in 0..100 {
            list.reserve(1 << 20).unwrap();
        }

        assert_eq!(list.bytes_pushed(), 100 << 20);
    }

    #[test]
    fn refusal_rolls_back_and_counts() {
        let list = SegmentList::<u64>::new(0, None, 2);

        list.reserve(4096).unwrap();
        assert_eq!(list.refuse(4096), Shortage::Temporary);
        assert_eq!(list.bytes_pushed(), 0);

        list.reserve(4096).unwrap();
        assert_eq!(list.refuse(4096), Shortage::Permanent);
        assert_eq!(list.consec_fail(), 2);
    }

    #[test]
    fn grant_resets_failures() {
        let list = SegmentList::<u64>::new(0, Some(0), 5);

        _ = list.reserve(4096);
        _ = list.reserve(4096);
        assert_eq!(list.consec_fail(), 2);

        list.grant();
        assert_eq!(list.consec_fail(), 0);
    }

    #[test]
    fn cancel_does_not_count_failure() {
        let list = SegmentList::<u64>::new(0, None, 5);

        list.reserve(4096).unwrap();
        list.cancel(4096);

        assert_eq!(list.bytes_pushed(), 0);
        assert_eq!(list.consec_fail(), 0);
    }

    #[test]
    fn checkout_respects_grow_threshold() {
        let list = SegmentList::<u64>::new(0, None, 5);

        assert!(matches!(list.checkout(2), Checkout::Absorbed));
        assert!(matches!(list.checkout(2), Checkout::Absorbed));
        assert!(matches!(list.checkout(2), Checkout::Empty));
        assert!(matches!(list.checkout(2), Checkout::Empty));

        let mut value = 5_u64;
        list.append_chunk(dangling_chunk(), [NonNull::from(&mut value)]);

        assert!(matches!(list.checkout(2), Checkout::Hit(_)));

        // A hit resets the miss streak.
        assert!(matches!(list.checkout(2), Checkout::Absorbed));
    }

    #[test]
    fn zero_threshold_never_absorbs() {
        let list = SegmentList::<u64>::new(0, None, 5);

        assert!(matches!(list.checkout(0), Checkout::Empty));
    }

    #[test]
    fn push_and_checkout_round_trip() {
        let list = SegmentList::<u64>::new(0, None, 5);
        let mut value = 5_u64;
        let ptr = NonNull::from(&mut value);

        list.push(ptr);
        assert_eq!(list.free_count(), 1);

        match list.checkout(0) {
            Checkout::Hit(element) => assert_eq!(element, ptr),
            other => panic!("unexpected checkout result: {other:?}"),
        }

        assert_eq!(list.free_count(), 0);
    }

    #[test]
    fn take_chunks_empties_list() {
        let mut list = SegmentList::<u64>::new(0, None, 5);
        let mut value = 5_u64;

        list.append_chunk(dangling_chunk(), [NonNull::from(&mut value)]);
        assert_eq!(list.chunk_count(), 1);

        let chunks = list.take_chunks();
        assert_eq!(chunks.len(), 1);
        assert_eq!(list.chunk_count(), 0);
        assert_eq!(list.free_count(), 0);
    }

    #[test]
    fn sequence_skips_failed_growth() {
        let list = SegmentList::<u64>::new(0, None, 5);

        assert_eq!(list.reserve(4096), Ok(0));
        _ = list.refuse(4096);
        assert_eq!(list.reserve(4096), Ok(1));
        list.grant();
        assert_eq!(list.reserve(4096), Ok(2));
    }
}
