#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Segmented free lists of pre-constructed, fixed-size elements.
//!
//! A [`FreeListSet`] manages a number of independent lists (for example one per communication
//! peer or one per processor), each holding elements that consumers check out and return
//! without touching a general-purpose allocator on the hot path. Lists grow by requesting
//! large chunks from a [`MemoryPool`], carving each chunk into elements and constructing every
//! element in place exactly once.
//!
//! # Quick start
//!
//! ```rust
//! use free_lists::{Constructible, FreeListSet, SlotInfo};
//!
//! struct Descriptor {
//!     peer: usize,
//!     sequence: u64,
//! }
//!
//! impl Constructible for Descriptor {
//!     fn construct(slot: SlotInfo) -> Self {
//!         Self {
//!             peer: slot.list(),
//!             sequence: 0,
//!         }
//!     }
//! }
//!
//! let set = FreeListSet::<Descriptor>::builder()
//!     .lists(4)
//!     .description("descriptors")
//!     .build()
//!     .unwrap();
//!
//! let mut descriptor = set.get_elt(2).unwrap();
//! assert_eq!(descriptor.peer, 2);
//!
//! descriptor.sequence += 1;
//! set.return_elt(2, descriptor).unwrap();
//! ```
//!
//! # Key features
//!
//! - **Budgets and backpressure**: every list has a memory budget. Growth failures are reported
//!   as [`Error::TemporaryShortage`] until too many happen in a row, after which they become
//!   [`Error::ResourceExhausted`].
//! - **Memory affinity**: chunks can be bound to the processor or memory region that uses the
//!   list (see [`Affinity`]).
//! - **Shared memory**: elements can be carved from a caller-supplied [`SharedArena`] instead of
//!   the process heap.
//! - **Pluggable pools**: several sets may share one [`MemoryPool`], and custom pools can be
//!   supplied.
//!
//! # Observability
//!
//! The crate logs via `tracing` and publishes growth events via `nm`. Per-list usage counters
//! can be enabled with [`FreeListSetBuilder::profiling()`].

mod affinity;
mod builder;
mod chunk;
mod element;
mod error;
mod free_list_set;
mod memory_pool;
mod metrics;
mod profiling;
mod segment_list;
mod shared_arena;

pub use affinity::*;
pub use builder::*;
pub use chunk::RawChunk;
pub(crate) use chunk::{chunk_layout, round_up};
pub use element::*;
pub use error::{Error, Result, ReturnError};
pub(crate) use error::Shortage;
pub use free_list_set::*;
pub use memory_pool::{HeapMemoryPool, MemoryPool};
pub(crate) use profiling::Profiling;
pub use profiling::ListProfile;
pub use shared_arena::*;
