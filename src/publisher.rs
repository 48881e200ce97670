//! The write side of a topic: claims a publisher directory entry, then
//! emplaces and publishes messages into its own slot sub-range.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use crate::buffer::MessageBuffer;
use crate::constants::{DEFAULT_INIT_TIMEOUT, DEFAULT_JOIN_TIMEOUT};
use crate::directory;
use crate::error::Result;
use crate::named_lock::NamedLock;
use crate::options::Options;
use crate::region::MappedRegion;
use crate::slot::MessageAccess;
use crate::slot::Slot;
use crate::slot_pool::SlotPool;
use crate::topic::Role;
use crate::types::{UintHalfT, UintT};

/// A joined publisher endpoint for `T`-typed messages on a topic.
///
/// Not `Clone`: one `Publisher` owns one participant-directory entry
/// (and the advisory lock backing it) for its entire lifetime, released
/// on drop.
pub struct Publisher<T: Copy> {
    buffer: MessageBuffer<T>,
    region: Arc<MappedRegion>,
    pool: SlotPool<T>,
    entry_index: UintHalfT,
    // Held for its side effect (RAII release on drop); never read.
    _entry_lock: NamedLock,
    /// The access handle for the most recently published slot. Replacing
    /// it on every `publish()` drops the previous one, releasing that
    /// slot's pin once every subscriber that read it has also dropped
    /// its own access.
    prev_published_access: Option<MessageAccess<T>>,
}

impl<T: Copy> Publisher<T> {
    /// Join (creating the topic's shared region if necessary) using the
    /// default initialization and directory-join timeouts.
    pub fn create(topic: &str, options: Options) -> Result<Self> {
        Self::create_with_timeout(topic, options, DEFAULT_INIT_TIMEOUT, DEFAULT_JOIN_TIMEOUT)
    }

    /// Join with explicit timeouts for the buffer initialization
    /// handshake and the participant-directory scan.
    pub fn create_with_timeout(
        topic: &str,
        options: Options,
        init_timeout: Duration,
        join_timeout: Duration,
    ) -> Result<Self> {
        options.validate()?;

        let buffer = MessageBuffer::<T>::create_or_open(topic, options, init_timeout)?;
        let (entry_index, entry_lock) =
            directory::claim_entry(topic, Role::Publisher, options.max_publishers, join_timeout)?;

        let entry_ptr = buffer.publisher_entry(entry_index);
        // SAFETY: `entry_index` was just claimed exclusively via its
        // advisory lock, so no other publisher touches this entry.
        unsafe {
            (*entry_ptr).process_id = std::process::id() as u64;
            (*entry_ptr).creation_timestamp = now_nanos();
            (*entry_ptr).id = entry_index;
        }

        let slots_per_publisher = buffer.header().slots_per_publisher();
        let publisher_base_offset = buffer.publisher_base_offset(entry_index);
        let local_next_id_ptr = unsafe { std::ptr::addr_of_mut!((*entry_ptr).local_next_id) };

        // SAFETY: `slots_base` spans the whole region's slot array for
        // this buffer's lifetime, and `local_next_id_ptr` points at the
        // entry this publisher exclusively owns.
        let pool = unsafe { SlotPool::new(buffer.slots_base(), publisher_base_offset, slots_per_publisher, local_next_id_ptr) };

        buffer.header().publisher_count().fetch_add(1, Ordering::Relaxed);
        tracing::debug!(topic, entry_index, "publisher joined");

        let region = buffer.region();
        Ok(Self {
            buffer,
            region,
            pool,
            entry_index,
            _entry_lock: entry_lock,
            prev_published_access: None,
        })
    }

    /// This publisher's index in the `PublisherEntry` directory.
    #[inline]
    pub fn entry_index(&self) -> UintHalfT {
        self.entry_index
    }

    /// Publish one message: claim a free slot in this publisher's
    /// sub-range, write the value, then make it visible to subscribers.
    ///
    /// Never fails in a correctly configured buffer: `next_free_slot`
    /// always finds a slot as long as subscribers never pin more than
    /// `max_subscribers * max_concurrent_acquires` slots at once. A
    /// breach panics there rather than surfacing `Error::PublishFailure`,
    /// which is reserved for exhaustive-match callers (see `Error`'s
    /// docs).
    pub fn publish(&mut self, value: T) -> Result<()> {
        let (slot, global_index) = self.pool.next_free_slot();
        let header = self.buffer.header();

        // `next_message_id` is seeded to `INVALID` (`u64::MAX`) so the
        // first `fetch_add` wraps to 0 — the id assigned to this
        // message is the post-increment value, not the pre-increment
        // one `fetch_add` returns.
        let message_id = header.next_message_id().fetch_add(1, Ordering::Relaxed).wrapping_add(1);

        // SAFETY: `slot` was just returned free by `next_free_slot`, and
        // only this publisher writes into its own sub-range.
        unsafe { slot.emplace(message_id, value) };

        // SAFETY: this slot was just emplaced and not yet published, so
        // no subscriber can be racing it.
        let access = unsafe { Slot::acquire_unsafe(slot as *const _, self.region.clone()) };

        header.latest_published_idx().store(global_index as UintT, Ordering::Release);
        tracing::trace!(message_id, global_index, "published message");

        // Dropping the previous access releases that slot's publisher
        // pin; it becomes eligible for reuse once every subscriber that
        // read it has also dropped its own access.
        self.prev_published_access = Some(access);
        Ok(())
    }
}

impl<T: Copy> Drop for Publisher<T> {
    fn drop(&mut self) {
        self.buffer.header().publisher_count().fetch_sub(1, Ordering::Relaxed);
    }
}

fn now_nanos() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(-1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publisher_create_claims_entry_zero() {
        let topic = format!("tempo-ipc-publisher-test-{}", std::process::id());
        let publisher = Publisher::<u64>::create(&topic, Options::new(1, 1)).unwrap();
        assert_eq!(publisher.entry_index(), 0);
        assert_eq!(publisher.buffer.header().publisher_count().load(Ordering::Relaxed), 1);

        let _ = std::fs::remove_file(std::env::temp_dir().join(crate::topic::shm_region_name(&topic)));
    }

    #[test]
    fn test_publish_advances_latest_published_idx_and_message_id() {
        let topic = format!("tempo-ipc-publisher-publish-test-{}", std::process::id());
        let mut publisher = Publisher::<u64>::create(&topic, Options::new(1, 1)).unwrap();

        publisher.publish(111).unwrap();
        let header = publisher.buffer.header();
        let first_idx = header.latest_published_idx().load(Ordering::Acquire);
        assert_ne!(first_idx, crate::types::INVALID);
        assert_eq!(header.next_message_id().load(Ordering::Relaxed), 0);

        publisher.publish(222).unwrap();
        assert_eq!(header.next_message_id().load(Ordering::Relaxed), 1);

        let _ = std::fs::remove_file(std::env::temp_dir().join(crate::topic::shm_region_name(&topic)));
    }

    #[test]
    fn test_second_publisher_claims_distinct_entry() {
        let topic = format!("tempo-ipc-publisher-two-test-{}", std::process::id());
        let options = Options::new(2, 1);
        let p0 = Publisher::<u64>::create(&topic, options).unwrap();
        let p1 = Publisher::<u64>::create(&topic, options).unwrap();
        assert_ne!(p0.entry_index(), p1.entry_index());

        let _ = std::fs::remove_file(std::env::temp_dir().join(crate::topic::shm_region_name(&topic)));
    }
}
