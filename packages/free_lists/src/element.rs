use std::fmt;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;

/// A type whose values can be constructed directly in the slots of a chunk.
///
/// Elements are constructed exactly once, when the chunk they live in is added to a list, and
/// destroyed exactly once, when the [`FreeListSet`][crate::FreeListSet] is dropped. In between,
/// they circulate between the list and the consumers that check them out, keeping whatever
/// state the consumers leave in them.
///
/// # Example
///
/// ```
/// use free_lists::{Constructible, SlotInfo};
///
/// struct Descriptor {
///     home_list: usize,
///     payload: [u8; 48],
/// }
///
/// impl Constructible for Descriptor {
///     fn construct(slot: SlotInfo) -> Self {
///         Self {
///             home_list: slot.list(),
///             payload: [0; 48],
///         }
///     }
/// }
/// ```
pub trait Constructible: Sized {
    /// Creates the value that will occupy the described slot.
    fn construct(slot: SlotInfo) -> Self;
}

/// Describes the slot an element is being constructed in.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct SlotInfo {
    list: usize,
    chunk: usize,
    index_in_chunk: usize,
}

impl SlotInfo {
    #[must_use]
    pub(crate) fn new(list: usize, chunk: usize, index_in_chunk: usize) -> Self {
        Self {
            list,
            chunk,
            index_in_chunk,
        }
    }

    /// Index of the list the element is first added to.
    #[must_use]
    #[cfg_attr(test, mutants::skip)] // Trivial accessor.
    pub fn list(&self) -> usize {
        self.list
    }

    /// Sequence number of the chunk within the list, counting from zero.
    #[must_use]
    #[cfg_attr(test, mutants::skip)] // Trivial accessor.
    pub fn chunk(&self) -> usize {
        self.chunk
    }

    /// Position of the element within its chunk.
    #[must_use]
    #[cfg_attr(test, mutants::skip)] // Trivial accessor.
    pub fn index_in_chunk(&self) -> usize {
        self.index_in_chunk
    }
}

macro_rules! zero_constructible {
    ($($t:ty),*) => {
        $(
            impl Constructible for $t {
                fn construct(_slot: SlotInfo) -> Self {
                    0
                }
            }
        )*
    };
}

zero_constructible!(u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize);

impl<const N: usize> Constructible for [u8; N] {
    fn construct(_slot: SlotInfo) -> Self {
        [0; N]
    }
}

/// An element checked out of a [`FreeListSet`][crate::FreeListSet].
///
/// The holder has exclusive access to the element until it is handed back via
/// [`FreeListSet::return_elt()`][crate::FreeListSet::return_elt]. The element borrows the set,
/// so it can never outlive the memory it lives in.
///
/// Dropping an element instead of returning it takes it out of circulation until the set is
/// dropped. This is safe but wastes a slot.
#[must_use = "an element that is not returned is lost to its list until the set is dropped"]
pub struct Element<'a, T> {
    ptr: NonNull<T>,
    set_id: u64,
    list: usize,

    _set: PhantomData<&'a mut T>,
}

impl<T> Element<'_, T> {
    /// # Safety
    ///
    /// The pointer must refer to a constructed element that nobody else has access to and that
    /// stays valid for as long as the set identified by `set_id` is borrowed.
    pub(crate) unsafe fn new(ptr: NonNull<T>, set_id: u64, list: usize) -> Self {
        Self {
            ptr,
            set_id,
            list,
            _set: PhantomData,
        }
    }

    pub(crate) fn set_id(&self) -> u64 {
        self.set_id
    }

    /// Index of the list the element was checked out from.
    pub(crate) fn list(&self) -> usize {
        self.list
    }

    pub(crate) fn into_ptr(self) -> NonNull<T> {
        self.ptr
    }

    /// A pointer to the element.
    ///
    /// The pointer remains valid after the element is returned to the set, until the set is
    /// dropped. Accessing it after the element has been returned is only valid if the caller
    /// ensures there are no conflicting accesses by whoever checks the element out next.
    #[must_use]
    pub fn as_ptr(&self) -> NonNull<T> {
        self.ptr
    }
}

impl<T> Deref for Element<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        // SAFETY: The element is constructed and we have exclusive access to it, guaranteed
        // by the set that gave it to us.
        unsafe { self.ptr.as_ref() }
    }
}

impl<T> DerefMut for Element<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        // SAFETY: The element is constructed and we have exclusive access to it, guaranteed
        // by the set that gave it to us.
        unsafe { self.ptr.as_mut() }
    }
}

impl<T: fmt::Debug> fmt::Debug for Element<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Element")
            .field("ptr", &self.ptr)
            .field("list", &self.list)
            .field("value", &**self)
            .finish()
    }
}

// SAFETY: An element is an exclusive handle to a `T`, just like `&mut T`, so it may move to
// another thread whenever `T` may.
unsafe impl<T: Send> Send for Element<'_, T> {}

// SAFETY: Shared references to an element only give shared access to the `T`.
unsafe impl<T: Sync> Sync for Element<'_, T> {}
