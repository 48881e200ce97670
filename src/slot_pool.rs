//! A typed view over the contiguous slot sub-range owned by one
//! publisher.

use crate::slot::Slot;
use crate::types::{UintHalfT, INVALID};

/// View over one publisher's `[base, base + slots_per_publisher)`
/// sub-range of the shared slot array.
///
/// Holds a raw pointer to the owning `PublisherEntry::local_next_id`
/// field rather than a borrowed `&mut` — that field lives in shared
/// memory and is mutated in place by exactly one process (the
/// publisher that claimed this entry), matching how the rest of the
/// control block is accessed.
pub struct SlotPool<T: Copy> {
    slots_base: *const Slot<T>,
    publisher_base_offset: UintHalfT,
    wrap_mask: UintHalfT,
    local_next_id: *mut UintHalfT,
}

// SAFETY: a `SlotPool` is moved into the single thread driving its
// owning `Publisher`, never accessed concurrently from two threads —
// `next_free_slot` mutates `local_next_id` non-atomically and relies on
// that exclusivity, documented on the method itself.
unsafe impl<T: Copy> Send for SlotPool<T> {}

impl<T: Copy> SlotPool<T> {
    /// # Safety
    /// `slots_base` must point at the start of the full slot array for
    /// the buffer this pool belongs to, and `local_next_id` must point
    /// at the `local_next_id` field of the `PublisherEntry` this
    /// publisher claimed. Both pointers must remain valid for the
    /// lifetime of this `SlotPool`.
    pub unsafe fn new(
        slots_base: *const Slot<T>,
        publisher_base_offset: UintHalfT,
        slots_per_publisher: UintHalfT,
        local_next_id: *mut UintHalfT,
    ) -> Self {
        debug_assert!(
            slots_per_publisher.is_power_of_two() && slots_per_publisher >= 2,
            "slots_per_publisher must be a power of two >= 2 for the wrap mask to be valid"
        );
        Self {
            slots_base,
            publisher_base_offset,
            wrap_mask: slots_per_publisher - 1,
            local_next_id,
        }
    }

    /// `(local_id & wrap_mask) + publisher_base_offset`.
    #[inline]
    pub fn index_of(&self, local_id: UintHalfT) -> UintHalfT {
        (local_id & self.wrap_mask) + self.publisher_base_offset
    }

    #[inline]
    fn slot_at(&self, global_index: UintHalfT) -> &Slot<T> {
        unsafe { &*self.slots_base.add(global_index as usize) }
    }

    /// Resolve a previously-published global index back to its slot.
    /// Used by subscribers, which address slots purely by global index.
    #[inline]
    pub fn slot_at_global_index(&self, global_index: UintHalfT) -> &Slot<T> {
        self.slot_at(global_index)
    }

    /// Probe the publisher's sub-range for a free slot, advancing the
    /// owning `PublisherEntry::local_next_id` counter on every probe. A
    /// free slot is guaranteed to exist within one full scan as long as
    /// subscribers never pin more than `max_subscribers *
    /// max_concurrent_acquires` slots at once; exhausting the scan means
    /// that bound has been breached — a misconfiguration or a leak, not
    /// a condition this transport can recover from, so it panics.
    pub fn next_free_slot(&self) -> (&Slot<T>, UintHalfT) {
        let slots_per_publisher = self.wrap_mask + 1;
        for _ in 0..slots_per_publisher {
            // SAFETY: only the owning publisher process calls this, and
            // only ever from a single thread per publisher handle.
            let local_id = unsafe {
                let current = *self.local_next_id;
                *self.local_next_id = current.wrapping_add(1);
                current
            };
            let global_index = self.index_of(local_id);
            let slot = self.slot_at(global_index);
            if slot.stored_id() == INVALID {
                return (slot, global_index);
            }
        }
        panic!(
            "no free slot found after a full sub-range scan: subscribers are pinning \
             more than max_subscribers * max_concurrent_acquires slots"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::region::MappedRegion;

    fn make_pool(slots_per_publisher: UintHalfT) -> (Box<[u8]>, *mut UintHalfT, SlotPool<u64>) {
        let slot_bytes = std::mem::size_of::<Slot<u64>>();
        let mut storage = vec![0u8; slot_bytes * slots_per_publisher as usize].into_boxed_slice();
        let base = storage.as_mut_ptr() as *mut Slot<u64>;
        for i in 0..slots_per_publisher as usize {
            unsafe { Slot::init_free(base.add(i)) };
        }
        let mut local_next_id: Box<UintHalfT> = Box::new(0);
        let local_next_id_ptr = local_next_id.as_mut() as *mut UintHalfT;
        std::mem::forget(local_next_id);
        let pool = unsafe { SlotPool::new(base as *const _, 0, slots_per_publisher, local_next_id_ptr) };
        (storage, local_next_id_ptr, pool)
    }

    #[test]
    fn test_index_of_wraps() {
        let (_storage, local_next_id, pool) = make_pool(4);
        assert_eq!(pool.index_of(0), 0);
        assert_eq!(pool.index_of(3), 3);
        assert_eq!(pool.index_of(4), 0);
        assert_eq!(pool.index_of(5), 1);
        unsafe { drop(Box::from_raw(local_next_id)) };
    }

    #[test]
    fn test_next_free_slot_finds_all_then_panics() {
        let (_storage, local_next_id, pool) = make_pool(2);
        let region_name = format!("tempo-ipc-pool-test-{}", std::process::id());
        let region = Arc::new(MappedRegion::open_or_create(&region_name, 4096).unwrap());

        let (slot0, idx0) = pool.next_free_slot();
        assert_eq!(idx0, 0);
        unsafe { slot0.emplace(10, 1u64) };
        let access0 = crate::slot::Slot::acquire(slot0 as *const _, region.clone()).unwrap();

        let (slot1, idx1) = pool.next_free_slot();
        assert_eq!(idx1, 1);
        unsafe { slot1.emplace(11, 2u64) };
        let access1 = crate::slot::Slot::acquire(slot1 as *const _, region.clone()).unwrap();

        // Both slots pinned now; a third probe must panic.
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| pool.next_free_slot()));
        assert!(result.is_err(), "exhausting the sub-range without a free slot must panic");

        drop(access0);
        drop(access1);
        let _ = std::fs::remove_file(std::env::temp_dir().join(&region_name));
        unsafe { drop(Box::from_raw(local_next_id)) };
    }
}
