use std::io;
use std::ptr::NonNull;

use many_cpus::{MemoryRegionId, ProcessorId, ProcessorSetBuilder};

/// Where the memory of a list should live.
///
/// Each list of a [`FreeListSet`][crate::FreeListSet] that enforces affinity has one of these.
/// Every chunk the list receives is bound accordingly before its elements are constructed.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum Affinity {
    /// Memory should be local to the memory region of the given processor.
    Processor(ProcessorId),

    /// Memory should live in the given memory region (NUMA node).
    MemoryRegion(MemoryRegionId),
}

/// What to do when the memory of a new chunk cannot be bound to its list's [`Affinity`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum AffinityFailurePolicy {
    /// Growth fails with [`Error::AffinityBinding`][crate::Error::AffinityBinding] and the chunk
    /// is handed back to the pool. This is the default in debug builds.
    Fail,

    /// The failure is logged and the chunk is used anyway. This is the default in release builds.
    Continue,
}

impl Default for AffinityFailurePolicy {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            Self::Fail
        } else {
            Self::Continue
        }
    }
}

/// Binds a range of memory to a processor or memory region.
#[cfg_attr(test, mockall::automock)]
pub trait AffinityBinder: Send + Sync {
    /// Binds `len` bytes starting at `memory` according to `affinity`.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform refuses or does not support the binding.
    fn bind(&self, memory: NonNull<u8>, len: usize, affinity: Affinity) -> io::Result<()>;
}

/// An [`AffinityBinder`] that asks the operating system to prefer allocating the physical pages
/// of the memory range in the requested memory region.
///
/// Processor affinity is translated into the memory region of that processor. Only Linux is
/// supported; on other platforms every binding attempt fails with
/// [`io::ErrorKind::Unsupported`].
#[derive(Debug, Default)]
#[non_exhaustive]
pub struct SystemAffinityBinder;

impl SystemAffinityBinder {
    /// Creates a binder for the current platform.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn memory_region_of(affinity: Affinity) -> io::Result<MemoryRegionId> {
        match affinity {
            Affinity::MemoryRegion(memory_region_id) => Ok(memory_region_id),
            Affinity::Processor(processor_id) => ProcessorSetBuilder::default()
                .filter(|p| p.id() == processor_id)
                .take_all()
                .map(|set| set.processors().first().memory_region_id())
                .ok_or_else(|| {
                    io::Error::new(
                        io::ErrorKind::NotFound,
                        format!("processor {processor_id} is not available to this process"),
                    )
                }),
        }
    }
}

impl AffinityBinder for SystemAffinityBinder {
    fn bind(&self, memory: NonNull<u8>, len: usize, affinity: Affinity) -> io::Result<()> {
        let memory_region_id = Self::memory_region_of(affinity)?;

        bind_to_memory_region(memory, len, memory_region_id)
    }
}

#[cfg(target_os = "linux")]
fn bind_to_memory_region(
    memory: NonNull<u8>,
    len: usize,
    memory_region_id: MemoryRegionId,
) -> io::Result<()> {
    // From <linux/mempolicy.h>, not exported by libc.
    const MPOL_PREFERRED: libc::c_int = 1;

    let bits_per_word = usize::try_from(libc::c_ulong::BITS)
        .expect("a machine word always fits into usize");

    let node = usize::try_from(memory_region_id)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "memory region out of range"))?;

    let word_count = node
        .checked_div(bits_per_word)
        .and_then(|word| word.checked_add(1))
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "memory region out of range"))?;

    let mut node_mask: Vec<libc::c_ulong> = vec![0; word_count];

    let word = node_mask
        .last_mut()
        .expect("we always allocate at least one word for the mask");
    *word |= 1 << node.checked_rem(bits_per_word).unwrap_or_default();

    // The kernel only looks at `max_node - 1` bits of the mask.
    let max_node = word_count
        .checked_mul(bits_per_word)
        .and_then(|bits| bits.checked_add(1))
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "memory region out of range"))?;

    // SAFETY: The memory range is owned by the caller and the node mask outlives the call.
    // The syscall does not retain any of the pointers.
    let result = unsafe {
        libc::syscall(
            libc::SYS_mbind,
            memory.as_ptr(),
            len,
            MPOL_PREFERRED,
            node_mask.as_ptr(),
            max_node,
            0_u32,
        )
    };

    if result == -1 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn bind_to_memory_region(
    _memory: NonNull<u8>,
    _len: usize,
    _memory_region_id: MemoryRegionId,
) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "memory affinity is only supported on Linux",
    ))
}
