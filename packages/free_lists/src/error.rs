use std::fmt;
use std::io;

use thiserror::Error;

use crate::Element;

/// Errors that can occur when building or using a [`FreeListSet`][crate::FreeListSet].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The list has no free element right now. The caller is expected to back off and retry,
    /// for example after other consumers have returned some elements.
    #[error("list {list} has no free element right now, retry later")]
    TemporaryShortage {
        /// Index of the list that was short of elements.
        list: usize,
    },

    /// The list cannot grow any further: either its memory budget is spent or the memory pool
    /// has refused too many consecutive requests. Retrying will not help until the situation
    /// changes externally.
    #[error("list {list} of '{description}' is out of resources")]
    ResourceExhausted {
        /// Index of the exhausted list.
        list: usize,

        /// Human-readable label of the set the list belongs to.
        description: String,
    },

    /// A list index was outside the range of lists in the set. No state was modified.
    #[error("list index {index} is out of bounds for a set of {list_count} lists")]
    InvalidIndex {
        /// The index the caller supplied.
        index: usize,

        /// The number of lists in the set.
        list_count: usize,
    },

    /// The parameters supplied to the builder cannot describe a working set.
    #[error("invalid free list configuration: {problem}")]
    Configuration {
        /// A human-readable description of the problem.
        problem: String,
    },

    /// A list could not be filled to its minimum size while the set was being built.
    #[error("failed to set up initial free list {list} for '{description}'")]
    Initialization {
        /// Human-readable label of the set.
        description: String,

        /// Index of the list that could not be filled.
        list: usize,

        /// The growth failure that stopped initialization.
        #[source]
        source: Box<Error>,
    },

    /// The memory of a new chunk could not be bound to the affinity configured for its list.
    #[error("failed to bind memory of list {list} to its affinity")]
    AffinityBinding {
        /// Index of the list the chunk was meant for.
        list: usize,

        /// The error reported by the affinity binder.
        #[source]
        source: io::Error,
    },

    /// The memory pool supplied a chunk that is too short or misaligned for the elements of the
    /// set. The chunk was handed back to the pool and the list is unchanged.
    #[error("memory pool supplied an unusable chunk for list {list}: {problem}")]
    UnusableChunk {
        /// Index of the list the chunk was meant for.
        list: usize,

        /// A human-readable description of the problem.
        problem: String,
    },

    /// The memory pool could not be constructed.
    #[error("failed to construct memory pool: {problem}")]
    PoolConstruction {
        /// A human-readable description of the problem.
        problem: String,
    },

    /// The element returned to the set was acquired from a different set.
    #[error("element returned to list {list} does not belong to this set")]
    ForeignElement {
        /// Index of the list the element was returned to.
        list: usize,
    },
}

impl Error {
    /// Whether the caller may reasonably retry the failed operation later.
    #[must_use]
    pub fn is_temporary(&self) -> bool {
        matches!(self, Self::TemporaryShortage { .. })
    }
}

/// A specialized `Result` type for free list operations, returning the crate's
/// [`Error`] type as the error value.
pub type Result<T> = std::result::Result<T, Error>;

/// How a failed attempt to obtain a chunk for a list is classified.
///
/// The classification depends on how many growth attempts in a row have failed for the list:
/// isolated failures are temporary, while reaching the configured threshold of consecutive
/// failures makes them permanent.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Shortage {
    Temporary,
    Permanent,
}

impl Shortage {
    pub(crate) fn into_error(self, list: usize, description: &str) -> Error {
        match self {
            Self::Temporary => Error::TemporaryShortage { list },
            Self::Permanent => Error::ResourceExhausted {
                list,
                description: description.to_owned(),
            },
        }
    }
}

/// The error returned by [`FreeListSet::return_elt()`][crate::FreeListSet::return_elt].
///
/// The rejected element is handed back to the caller so it is not lost.
pub struct ReturnError<'a, T> {
    error: Error,
    element: Element<'a, T>,
}

impl<'a, T> ReturnError<'a, T> {
    pub(crate) fn new(error: Error, element: Element<'a, T>) -> Self {
        Self { error, element }
    }

    /// The reason the element was rejected.
    #[must_use]
    pub fn error(&self) -> &Error {
        &self.error
    }

    /// Splits the error into the reason and the rejected element.
    #[must_use]
    pub fn into_parts(self) -> (Error, Element<'a, T>) {
        (self.error, self.element)
    }
}

impl<T> fmt::Debug for ReturnError<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReturnError")
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

impl<T> fmt::Display for ReturnError<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.error, f)
    }
}

impl<T> std::error::Error for ReturnError<'_, T> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

impl<T> From<ReturnError<'_, T>> for Error {
    fn from(value: ReturnError<'_, T>) -> Self {
        value.error
    }
}
