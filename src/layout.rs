//! The process-shared control block placed at the start of the mapped
//! region, plus the participant-entry records and the bit-exact size
//! math that derives the region layout.
//!
//! `BufferHeader`/`PublisherEntry`/`SubscriberEntry` are `#[repr(C)]`
//! and placed directly over mapped bytes — every field a participating
//! process writes must have the same layout in every process, the same
//! trivially-copyable assumption applied to payload types extended to
//! the control structures themselves.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::constants::CACHE_LINE_SIZE;
use crate::options::Options;
use crate::types::{ceil_to_power_of_two, AtomicUintT, UintHalfT, UintT, INVALID};

/// `initialization_state`'s three legal values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum InitState {
    Uninitialized = 0,
    InProgress = 1,
    Initialized = 2,
}

impl InitState {
    fn from_raw(raw: UintT) -> Option<Self> {
        match raw {
            0 => Some(Self::Uninitialized),
            1 => Some(Self::InProgress),
            2 => Some(Self::Initialized),
            _ => None,
        }
    }
}

/// The control block at offset 0 of the mapped region.
///
/// Cache-line padded per field group so publishers and subscribers
/// hammering `next_message_id`/`latest_published_idx` don't false-share
/// a line with the read-mostly immutable configuration.
#[repr(C)]
pub struct BufferHeader {
    // Cache line: immutable configuration, written once during init.
    max_publishers: UintHalfT,
    max_subscribers: UintHalfT,
    max_concurrent_acquires: UintHalfT,
    history_size: UintHalfT,
    _pad_config: [u8; CACHE_LINE_SIZE - 4 * std::mem::size_of::<UintHalfT>()],

    // Cache line: initialization handshake.
    initialization_state: AtomicUintT,
    _pad_init: [u8; CACHE_LINE_SIZE - std::mem::size_of::<UintT>()],

    // Cache line: running message counter.
    next_message_id: AtomicUintT,
    _pad_counter: [u8; CACHE_LINE_SIZE - std::mem::size_of::<UintT>()],

    // Cache line: latest published slot index.
    latest_published_idx: AtomicUintT,
    _pad_latest: [u8; CACHE_LINE_SIZE - std::mem::size_of::<UintT>()],

    // Cache line: bookkeeping-only counters (not the source of truth for
    // liveness — the advisory locks are authoritative there).
    publisher_count: AtomicU32,
    subscriber_count: AtomicU32,
    _pad_counts: [u8; CACHE_LINE_SIZE - 2 * std::mem::size_of::<u32>()],
}

impl BufferHeader {
    /// Construct the immutable configuration fields and reset every
    /// atomic to its initial value. Called exactly once, by the process
    /// that wins the `Uninitialized -> InProgress` CAS.
    ///
    /// # Safety
    /// `ptr` must point at writable memory at least `size_of::<BufferHeader>()`
    /// bytes long, and must not be concurrently read as an initialized
    /// header until this call returns.
    pub unsafe fn init_config(ptr: *mut BufferHeader, options: &Options) {
        let header = &mut *ptr;
        header.max_publishers = options.max_publishers;
        header.max_subscribers = options.max_subscribers;
        header.max_concurrent_acquires = options.max_concurrent_acquires;
        header.history_size = options.history_size;
        header.next_message_id = AtomicUintT::new(INVALID);
        header.latest_published_idx = AtomicUintT::new(INVALID);
        header.publisher_count = AtomicU32::new(0);
        header.subscriber_count = AtomicU32::new(0);
        // initialization_state is handled by the CAS dance in buffer.rs,
        // not reset here, since the Uninitialized->InProgress transition
        // has already happened by the time this runs.
    }

    #[inline]
    pub fn max_publishers(&self) -> UintHalfT {
        self.max_publishers
    }

    #[inline]
    pub fn max_subscribers(&self) -> UintHalfT {
        self.max_subscribers
    }

    #[inline]
    pub fn max_concurrent_acquires(&self) -> UintHalfT {
        self.max_concurrent_acquires
    }

    #[inline]
    pub fn history_size(&self) -> UintHalfT {
        self.history_size
    }

    #[inline]
    pub fn slots_per_publisher(&self) -> UintHalfT {
        slots_per_publisher(self.max_subscribers, self.max_concurrent_acquires)
    }

    #[inline]
    pub fn load_init_state(&self, order: Ordering) -> InitState {
        InitState::from_raw(self.initialization_state.load(order))
            .expect("initialization_state holds an out-of-range value: memory corruption")
    }

    #[inline]
    pub fn compare_exchange_init_state(
        &self,
        current: InitState,
        new: InitState,
        success: Ordering,
        failure: Ordering,
    ) -> bool {
        self.initialization_state
            .compare_exchange(current as UintT, new as UintT, success, failure)
            .is_ok()
    }

    #[inline]
    pub fn store_init_state(&self, state: InitState, order: Ordering) {
        self.initialization_state.store(state as UintT, order);
    }

    #[inline]
    pub fn next_message_id(&self) -> &AtomicUintT {
        &self.next_message_id
    }

    #[inline]
    pub fn latest_published_idx(&self) -> &AtomicUintT {
        &self.latest_published_idx
    }

    #[inline]
    pub fn publisher_count(&self) -> &AtomicU32 {
        &self.publisher_count
    }

    #[inline]
    pub fn subscriber_count(&self) -> &AtomicU32 {
        &self.subscriber_count
    }
}

/// One entry per configured publisher slot in the directory.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct PublisherEntry {
    /// Owning OS process at join time. Diagnostics only — nothing
    /// currently reaps or revives an entry based on process liveness.
    pub process_id: u64,
    /// Monotonic nanoseconds at join time.
    pub creation_timestamp: i64,
    /// Non-atomic: only the owning publisher ever writes this. Used by
    /// `SlotPool::next_free_slot` to derive the next local id to probe.
    pub local_next_id: UintHalfT,
    /// This entry's own index in the `PublisherEntry` array.
    pub id: UintHalfT,
}

impl Default for PublisherEntry {
    fn default() -> Self {
        Self { process_id: 0, creation_timestamp: -1, local_next_id: 0, id: 0 }
    }
}

/// One entry per configured subscriber slot in the directory.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct SubscriberEntry {
    pub process_id: u64,
    pub creation_timestamp: i64,
    pub id: UintHalfT,
}

impl Default for SubscriberEntry {
    fn default() -> Self {
        Self { process_id: 0, creation_timestamp: -1, id: 0 }
    }
}

/// `slots_per_publisher = ceil_to_power_of_two(max_subscribers * max_concurrent_acquires + 2)`.
/// Power-of-two so `local_id & (slots_per_publisher - 1)` is a valid wrap.
pub fn slots_per_publisher(max_subscribers: UintHalfT, max_concurrent_acquires: UintHalfT) -> UintHalfT {
    let pinned = (max_subscribers as u64) * (max_concurrent_acquires as u64) + 2;
    let pinned = UintHalfT::try_from(pinned).expect("max_subscribers * max_concurrent_acquires overflows uint_half_t");
    ceil_to_power_of_two(pinned)
}

/// Byte size required for the whole mapped region: header, then
/// publisher entries, then subscriber entries, then the slot array.
pub fn required_region_size<T: Copy>(options: &Options) -> usize {
    let header_size = std::mem::size_of::<BufferHeader>();
    let publisher_entries_size = options.max_publishers as usize * std::mem::size_of::<PublisherEntry>();
    let subscriber_entries_size = options.max_subscribers as usize * std::mem::size_of::<SubscriberEntry>();
    let slots_per_pub = slots_per_publisher(options.max_subscribers, options.max_concurrent_acquires) as usize;
    let slot_array_size = options.max_publishers as usize * slots_per_pub * std::mem::size_of::<crate::slot::Slot<T>>();

    header_size + publisher_entries_size + subscriber_entries_size + slot_array_size
}

/// Offsets into the mapped region for each of the four layout sections.
pub struct Offsets {
    pub header: usize,
    pub publisher_entries: usize,
    pub subscriber_entries: usize,
    pub slots: usize,
}

pub fn offsets<T>(options: &Options) -> Offsets {
    let header_size = std::mem::size_of::<BufferHeader>();
    let publisher_entries_size = options.max_publishers as usize * std::mem::size_of::<PublisherEntry>();
    let subscriber_entries_size = options.max_subscribers as usize * std::mem::size_of::<SubscriberEntry>();

    Offsets {
        header: 0,
        publisher_entries: header_size,
        subscriber_entries: header_size + publisher_entries_size,
        slots: header_size + publisher_entries_size + subscriber_entries_size,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slots_per_publisher_is_power_of_two_and_at_least_two() {
        for subs in 1..8u32 {
            for acquires in 1..4u32 {
                let n = slots_per_publisher(subs, acquires);
                assert!(n.is_power_of_two());
                assert!(n >= 2);
                assert!(n as u64 >= (subs as u64) * (acquires as u64) + 2);
            }
        }
    }

    #[test]
    fn test_init_state_roundtrip() {
        assert_eq!(InitState::from_raw(0), Some(InitState::Uninitialized));
        assert_eq!(InitState::from_raw(1), Some(InitState::InProgress));
        assert_eq!(InitState::from_raw(2), Some(InitState::Initialized));
        assert_eq!(InitState::from_raw(3), None);
    }

    #[test]
    fn test_header_is_cache_line_multiple() {
        assert_eq!(std::mem::size_of::<BufferHeader>() % CACHE_LINE_SIZE, 0);
    }

    #[test]
    fn test_default_entries_are_unclaimed() {
        let p = PublisherEntry::default();
        assert_eq!(p.process_id, 0);
        assert_eq!(p.creation_timestamp, -1);
        let s = SubscriberEntry::default();
        assert_eq!(s.process_id, 0);
        assert_eq!(s.creation_timestamp, -1);
    }
}
