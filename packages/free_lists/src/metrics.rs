//! Metrics for free list growth.
//!
//! These are process-wide and always on, independent of the per-list profiling a set may have
//! enabled. The events use per-thread instances to minimize contention.

use nm::{Event, Magnitude};

/// Histogram buckets for the size of chunks granted to lists, in bytes.
///
/// Chunks are whole pages, so we expect a small number of distinct page multiples.
const CHUNK_BYTES_BUCKETS: &[Magnitude] = &[
    4096,
    8192,
    16384,
    65536,
    262_144,
    1_048_576,
    2_097_152,
    16_777_216,
];

thread_local! {
    /// A list received a new chunk from its memory pool.
    pub(crate) static CHUNKS_GRANTED: Event = Event::builder()
        .name("free_lists_chunks_granted")
        .build();

    /// Size of every chunk granted to a list.
    ///
    /// The magnitude is the chunk size in bytes.
    pub(crate) static CHUNK_BYTES: Event = Event::builder()
        .name("free_lists_chunk_bytes")
        .histogram(CHUNK_BYTES_BUCKETS)
        .build();

    /// A list failed to grow, either due to its budget or because the pool refused.
    pub(crate) static GROWTH_FAILURES: Event = Event::builder()
        .name("free_lists_growth_failures")
        .build();

    /// An element was requested from a list that had none to give right now.
    pub(crate) static TEMPORARY_SHORTAGES: Event = Event::builder()
        .name("free_lists_temporary_shortages")
        .build();
}
