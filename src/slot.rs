//! One value cell plus metadata: a stored id marker, an active-reader
//! counter, and storage for the value.
//!
//! `MessageAccess` is a reference-counted access handle: construction
//! increments a shared counter, and destruction destroys the value iff
//! it was the last live access, generalized here to a cross-process
//! atomic counter rather than a single-process one.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::ops::Deref;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::region::MappedRegion;
use crate::types::{AtomicUintT, UintT, INVALID};

/// One cell in the slot array. `#[repr(C)]` so its layout is identical
/// in every process mapping the same region.
///
/// `T` must be trivially copyable and identically laid out everywhere
/// this transport runs — enforced here with a `Copy` bound, the weakest
/// bound that rules out types needing custom `Drop`/`Clone` glue a
/// naive `memcpy`-style emplace would skip.
#[repr(C)]
pub struct Slot<T: Copy> {
    /// Written non-atomically by the publisher during `emplace`, reset
    /// to `INVALID` by whichever release drops `active_references` to
    /// zero. Readers use this to detect recycling.
    message_id: UnsafeCell<UintT>,
    /// 0 when free. Acquire-increment, release-decrement.
    active_references: AtomicUintT,
    value: UnsafeCell<MaybeUninit<T>>,
}

// SAFETY: all mutation of `message_id`/`value` is gated by the
// `active_references` protocol documented on each method below; every
// field is `Sync`-safe to share across the processes that map this
// struct over the same shared memory.
unsafe impl<T: Copy> Sync for Slot<T> {}
unsafe impl<T: Copy> Send for Slot<T> {}

impl<T: Copy> Slot<T> {
    /// Construct a free slot in place. Called once per slot during
    /// `BufferHeader` initialization.
    ///
    /// # Safety
    /// `ptr` must point at writable, uninitialized memory at least
    /// `size_of::<Slot<T>>()` bytes long.
    pub unsafe fn init_free(ptr: *mut Slot<T>) {
        std::ptr::write(
            ptr,
            Slot {
                message_id: UnsafeCell::new(INVALID),
                active_references: AtomicUintT::new(0),
                value: UnsafeCell::new(MaybeUninit::uninit()),
            },
        );
    }

    /// Plain, non-atomic read of the stored id. Readers use this after a
    /// successful `acquire()` to detect that the slot was recycled
    /// between their load of `latest_published_idx` and the acquire.
    #[inline]
    pub fn stored_id(&self) -> UintT {
        // SAFETY: a read of a single aligned `UintT` races benignly with
        // the publisher's own write — the worst a reader observes is a
        // stale-but-valid prior id, which `acquire()`'s caller already
        // treats as "try again".
        unsafe { *self.message_id.get() }
    }

    /// **Publisher-only.** Caller must have already observed this slot
    /// free (`stored_id() == INVALID && active_references == 0`).
    /// Writes the value in place, then stores `message_id` last — no
    /// atomic ordering is required between the two writes because the
    /// slot only becomes observable to other processes once the
    /// publisher stores `latest_published_idx` with release ordering.
    ///
    /// # Safety
    /// Caller must hold exclusive (publisher) write access to this slot
    /// and must have verified it is free immediately beforehand.
    pub unsafe fn emplace(&self, message_id: UintT, value: T) {
        std::ptr::write((*self.value.get()).as_mut_ptr(), value);
        *self.message_id.get() = message_id;
    }

    /// Increment `active_references` and return a `MessageAccess` iff
    /// the slot wasn't concurrently recycled. Safe to call from any
    /// subscriber.
    pub fn acquire(self_ptr: *const Slot<T>, region: Arc<MappedRegion>) -> Option<MessageAccess<T>> {
        let this = unsafe { &*self_ptr };
        let prev = this.active_references.fetch_add(1, Ordering::Acquire);
        debug_assert!(prev.wrapping_add(1) >= 1, "active_references overflowed");

        if this.stored_id() == INVALID {
            // Slot was freed between our caller's index lookup and this
            // acquire; undo and report failure.
            this.release_raw();
            return None;
        }

        Some(MessageAccess { slot: self_ptr, _region: region })
    }

    /// **Publisher-only fast path**, called immediately after `emplace`.
    /// No subscriber can race this slot yet (it hasn't been published),
    /// so the increment is unconditional. This is how the publisher
    /// retains the just-published slot across subsequent `publish()`
    /// calls.
    ///
    /// # Safety
    /// Caller must have just emplaced this slot and must not have
    /// published it to other processes yet.
    pub unsafe fn acquire_unsafe(self_ptr: *const Slot<T>, region: Arc<MappedRegion>) -> MessageAccess<T> {
        let this = &*self_ptr;
        this.active_references.fetch_add(1, Ordering::Acquire);
        MessageAccess { slot: self_ptr, _region: region }
    }

    /// Decrement `active_references`. If this was the last reference,
    /// destroys the stored value and resets `message_id` to `INVALID`
    /// with release ordering, so a publisher that later observes
    /// `INVALID` also observes no torn state from the destroyed value.
    fn release_raw(&self) {
        let prev = self.active_references.fetch_sub(1, Ordering::Release);
        debug_assert!(prev >= 1, "active_references underflowed: release without a matching acquire");
        if prev == 1 {
            unsafe {
                std::ptr::drop_in_place((*self.value.get()).as_mut_ptr());
            }
            unsafe {
                *self.message_id.get() = INVALID;
            }
        }
    }

    #[inline]
    pub fn active_references(&self) -> UintT {
        self.active_references.load(Ordering::Acquire)
    }
}

/// A scoped handle pinning a slot's value against reuse (glossary).
/// Dropping it decrements the slot's reference count, destroying the
/// value if this was the last live access.
pub struct MessageAccess<T: Copy> {
    slot: *const Slot<T>,
    // Keeps the mapped region (and therefore `slot`) alive for as long
    // as any access to it is outstanding.
    _region: Arc<MappedRegion>,
}

// SAFETY: `MessageAccess` only ever dereferences `slot` through the
// `Slot<T>` methods, which are themselves `Sync`/`Send`-safe.
unsafe impl<T: Copy> Send for MessageAccess<T> {}
unsafe impl<T: Copy> Sync for MessageAccess<T> {}

impl<T: Copy> Deref for MessageAccess<T> {
    type Target = T;

    fn deref(&self) -> &T {
        let slot = unsafe { &*self.slot };
        // SAFETY: holding a `MessageAccess` means `active_references > 0`,
        // which guarantees the value storage is initialized.
        unsafe { &*(*slot.value.get()).as_ptr() }
    }
}

impl<T: Copy> Drop for MessageAccess<T> {
    fn drop(&mut self) {
        let slot = unsafe { &*self.slot };
        slot.release_raw();
    }
}
