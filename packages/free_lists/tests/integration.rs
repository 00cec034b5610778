//! Integration tests for free list sets used from many threads.
//!
//! They are ignored under Miri because they spawn many threads and touch a lot of memory.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use free_lists::{
    BumpArena, Constructible, Error, FreeListSet, HeapMemoryPool, MemoryPool, SharedArena,
    SlotInfo,
};

const THREADS: usize = 8;

#[cfg_attr(miri, ignore)]
#[test]
fn concurrent_get_and_return() {
    let set = FreeListSet::<u64>::builder().lists(4).build().unwrap();

    thread::scope(|s| {
        for thread_index in 0..THREADS {
            let set = &set;

            s.spawn(move || {
                let list = thread_index % 4;

                for _ in 0..10_000 {
                    let mut element = set.get_elt(list).unwrap();
                    *element = thread_index as u64;
                    set.return_elt(list, element).unwrap();
                }
            });
        }
    });

    let free: usize = (0..4).map(|list| set.free_count(list).unwrap()).sum();
    let pushed: usize = (0..4).map(|list| set.bytes_pushed(list).unwrap()).sum();

    assert_eq!(free, pushed / size_of::<u64>());
}

#[cfg_attr(miri, ignore)]
#[test]
fn concurrent_growth_stays_within_budget() {
    const MAX_PAGES: usize = 4;

    let set = FreeListSet::<[u8; 64]>::builder()
        .max_pages_per_list(Some(MAX_PAGES))
        .build()
        .unwrap();

    let acquired = AtomicUsize::new(0);

    thread::scope(|s| {
        for _ in 0..THREADS {
            let set = &set;
            let acquired = &acquired;

            s.spawn(move || {
                let mut held = Vec::new();

                loop {
                    match set.get_elt(0) {
                        Ok(element) => held.push(element),
                        Err(error) if error.is_temporary() => {}
                        Err(Error::ResourceExhausted { .. }) => break,
                        Err(error) => panic!("unexpected error: {error}"),
                    }
                }

                acquired.fetch_add(held.len(), Ordering::Relaxed);
            });
        }
    });

    let max_bytes = MAX_PAGES * 4096;

    assert_eq!(set.max_bytes_pushed(0).unwrap(), Some(max_bytes));
    assert_eq!(set.bytes_pushed(0).unwrap(), max_bytes);
    assert_eq!(
        acquired.load(Ordering::Relaxed),
        max_bytes / set.element_size()
    );
}

#[cfg_attr(miri, ignore)]
#[test]
fn writes_are_visible_to_next_holder() {
    struct Message {
        payload: [u64; 8],
    }

    impl Constructible for Message {
        fn construct(_slot: SlotInfo) -> Self {
            Self { payload: [0; 8] }
        }
    }

    let set = FreeListSet::<Message>::builder()
        .retry_for_more_resources(false)
        .build()
        .unwrap();

    thread::scope(|s| {
        for _ in 0..THREADS {
            let set = &set;

            s.spawn(move || {
                for _ in 0..10_000 {
                    let mut message = match set.get_elt(0) {
                        Ok(message) => message,
                        Err(Error::ResourceExhausted { .. }) => continue,
                        Err(error) => panic!("unexpected error: {error}"),
                    };

                    // Every holder leaves the message in a consistent state.
                    let first = message.payload[0];
                    assert!(message.payload.iter().all(|value| *value == first));

                    message.payload = [first + 1; 8];
                    set.return_elt(0, message).unwrap();
                }
            });
        }
    });
}

#[cfg_attr(miri, ignore)]
#[test]
fn sets_share_one_pool() {
    let pool = Arc::new(HeapMemoryPool::new(0, Some(64 * 4096), 4096, 4096).unwrap());

    thread::scope(|s| {
        for _ in 0..4 {
            let pool = Arc::clone(&pool);

            s.spawn(move || {
                let set = FreeListSet::<u64>::builder()
                    .lists(2)
                    .memory_pool(pool as Arc<dyn MemoryPool>)
                    .build()
                    .unwrap();

                for _ in 0..1000 {
                    let element = set.get_elt(1).unwrap();
                    set.return_elt(1, element).unwrap();
                }
            });
        }
    });

    // Every set has been dropped, so all memory is back in the pool.
    assert_eq!(pool.free_chunks() * pool.chunk_size(), pool.total_bytes());
}

#[cfg_attr(miri, ignore)]
#[test]
fn shared_arena_across_threads() {
    let arena = Arc::new(BumpArena::new(64 * 4096, 4096).unwrap());

    let set = FreeListSet::<[u8; 128]>::builder()
        .lists(THREADS)
        .pages_per_list(Some(1))
        .shared_arena(Arc::clone(&arena) as Arc<dyn SharedArena>)
        .build()
        .unwrap();

    assert!(set.is_shared());

    thread::scope(|s| {
        for list in 0..THREADS {
            let set = &set;
            let arena = &arena;

            s.spawn(move || {
                let held: Vec<_> = (0..100).map(|_| set.get_elt(list).unwrap()).collect();

                for element in held {
                    assert!(arena.contains(element.as_ptr().cast()));
                    set.return_elt(list, element).unwrap();
                }
            });
        }
    });

    assert!(arena.used() <= arena.capacity());
}
