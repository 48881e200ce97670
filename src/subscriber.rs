//! The read side of a topic: claims a subscriber directory entry, then
//! follows `latest_published_idx` to read whatever the publisher most
//! recently made visible.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam::utils::Backoff;

use crate::buffer::MessageBuffer;
use crate::constants::{DEFAULT_INIT_TIMEOUT, DEFAULT_JOIN_TIMEOUT};
use crate::directory;
use crate::error::{Error, Result};
use crate::named_lock::NamedLock;
use crate::region::MappedRegion;
use crate::slot::{MessageAccess, Slot};
use crate::topic::Role;
use crate::types::{UintHalfT, UintT, INVALID};

/// A joined subscriber endpoint for `T`-typed messages on a topic.
///
/// Delivery is latest-only: a slow subscriber skips directly to
/// whatever is newest when it next fetches, rather than draining every
/// intermediate publish.
pub struct Subscriber<T: Copy> {
    buffer: MessageBuffer<T>,
    region: Arc<MappedRegion>,
    entry_index: UintHalfT,
    _entry_lock: NamedLock,
    /// Lowest message id this subscriber will still accept. Messages
    /// older than this were already delivered (or skipped past) and are
    /// reported as `NoMessageAvailable`.
    next_expected: UintT,
    /// Shared with every live `MessageWrapper` so acquire-limit
    /// enforcement survives `MessageWrapper`s outliving the
    /// `try_fetch_message` call that produced them.
    active_acquires: Arc<AtomicU32>,
    max_concurrent_acquires: UintHalfT,
}

impl<T: Copy> Subscriber<T> {
    /// Join an existing topic using the default initialization-wait and
    /// directory-join timeouts. Unlike `Publisher::create`, this takes
    /// no `Options` — a subscriber learns the buffer's configuration
    /// from the header once it observes `Initialized`.
    pub fn create(topic: &str) -> Result<Self> {
        Self::create_with_timeout(topic, DEFAULT_INIT_TIMEOUT, DEFAULT_JOIN_TIMEOUT)
    }

    pub fn create_with_timeout(topic: &str, init_timeout: Duration, join_timeout: Duration) -> Result<Self> {
        let buffer = MessageBuffer::<T>::open_existing(topic, init_timeout)?;
        let header = buffer.header();
        let max_subscribers = header.max_subscribers();

        let (entry_index, entry_lock) = directory::claim_entry(topic, Role::Subscriber, max_subscribers, join_timeout)?;

        let entry_ptr = buffer.subscriber_entry(entry_index);
        // SAFETY: `entry_index` was just claimed exclusively via its
        // advisory lock, so no other subscriber touches this entry.
        unsafe {
            (*entry_ptr).process_id = std::process::id() as u64;
            (*entry_ptr).creation_timestamp = now_nanos();
            (*entry_ptr).id = entry_index;
        }

        // A message published before this subscriber joined is not
        // delivered: `next_expected` starts one past whatever id the
        // header already holds.
        let next_expected = header.next_message_id().load(Ordering::Acquire).wrapping_add(1);
        let max_concurrent_acquires = header.max_concurrent_acquires();
        header.subscriber_count().fetch_add(1, Ordering::Relaxed);
        tracing::debug!(topic, entry_index, "subscriber joined");

        let region = buffer.region();
        Ok(Self {
            buffer,
            region,
            entry_index,
            _entry_lock: entry_lock,
            next_expected,
            active_acquires: Arc::new(AtomicU32::new(0)),
            max_concurrent_acquires,
        })
    }

    /// This subscriber's index in the `SubscriberEntry` directory.
    #[inline]
    pub fn entry_index(&self) -> UintHalfT {
        self.entry_index
    }

    /// Return the newest message not yet seen by this subscriber,
    /// without blocking. `Err(NoMessageAvailable)` covers both "nothing
    /// published yet" and "nothing newer than what was already
    /// delivered".
    pub fn try_fetch_message(&mut self) -> Result<MessageWrapper<T>> {
        let header = self.buffer.header();
        let latest_idx = header.latest_published_idx().load(Ordering::Acquire);
        if latest_idx == INVALID {
            return Err(Error::NoMessageAvailable);
        }

        // SAFETY: `latest_idx` was published by some publisher, so it
        // indexes within the shared slot array for this buffer.
        let slot: &Slot<T> = unsafe { &*self.buffer.slots_base().add(latest_idx as usize) };

        let access = match Slot::acquire(slot as *const _, self.region.clone()) {
            Some(access) => access,
            // Recycled between our load of `latest_idx` and the
            // acquire; nothing stable to hand back this round.
            None => return Err(Error::NoMessageAvailable),
        };

        let message_id = slot.stored_id();
        if message_id == INVALID || message_id < self.next_expected {
            drop(access);
            return Err(Error::NoMessageAvailable);
        }

        // Only once we know there's a message newer than `next_expected`
        // does the acquire cap get to veto delivery — a subscriber with
        // nothing new to read must see `NoMessageAvailable`, never
        // `AcquireLimitExceeded`, regardless of how many wrappers it's
        // holding.
        if self.active_acquires.load(Ordering::Acquire) >= self.max_concurrent_acquires {
            drop(access);
            return Err(Error::AcquireLimitExceeded { limit: self.max_concurrent_acquires });
        }

        self.next_expected = message_id.wrapping_add(1);
        self.active_acquires.fetch_add(1, Ordering::AcqRel);
        tracing::trace!(message_id, latest_idx, "fetched message");

        Ok(MessageWrapper { access, active_acquires: self.active_acquires.clone() })
    }

    /// Block, retrying with a backoff, until a new message is available.
    /// Propagates `AcquireLimitExceeded` immediately rather than
    /// retrying it — that error means the caller must drop a held
    /// `MessageWrapper` first, which busy-waiting here cannot fix.
    pub fn await_message(&mut self) -> Result<MessageWrapper<T>> {
        let backoff = Backoff::new();
        loop {
            match self.try_fetch_message() {
                Ok(message) => return Ok(message),
                Err(Error::NoMessageAvailable) => backoff.snooze(),
                Err(other) => return Err(other),
            }
        }
    }

    /// Like `await_message`, but gives up at `deadline`, returning
    /// `Error::NoMessageAvailable`.
    pub fn await_message_until(&mut self, deadline: Instant) -> Result<MessageWrapper<T>> {
        let backoff = Backoff::new();
        loop {
            match self.try_fetch_message() {
                Ok(message) => return Ok(message),
                Err(Error::NoMessageAvailable) => {
                    if Instant::now() >= deadline {
                        return Err(Error::NoMessageAvailable);
                    }
                    backoff.snooze();
                }
                Err(other) => return Err(other),
            }
        }
    }
}

impl<T: Copy> Drop for Subscriber<T> {
    fn drop(&mut self) {
        self.buffer.header().subscriber_count().fetch_sub(1, Ordering::Relaxed);
    }
}

fn now_nanos() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(-1)
}

/// A scoped handle on one fetched message. Dropping it releases the
/// underlying slot reference and frees up one concurrent-acquire slot
/// on the `Subscriber` that produced it.
pub struct MessageWrapper<T: Copy> {
    access: MessageAccess<T>,
    active_acquires: Arc<AtomicU32>,
}

impl<T: Copy> std::ops::Deref for MessageWrapper<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.access
    }
}

impl<T: Copy> Drop for MessageWrapper<T> {
    fn drop(&mut self) {
        self.active_acquires.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::Options;
    use crate::publisher::Publisher;

    #[test]
    fn test_subscriber_waits_then_sees_published_message() {
        let topic = format!("tempo-ipc-subscriber-test-{}", std::process::id());
        let mut publisher = Publisher::<u64>::create(&topic, Options::new(1, 1)).unwrap();
        let mut subscriber = Subscriber::<u64>::create(&topic).unwrap();

        assert!(matches!(subscriber.try_fetch_message(), Err(Error::NoMessageAvailable)));

        publisher.publish(7).unwrap();
        let message = subscriber.try_fetch_message().unwrap();
        assert_eq!(*message, 7);
        drop(message);

        let _ = std::fs::remove_file(std::env::temp_dir().join(crate::topic::shm_region_name(&topic)));
    }

    #[test]
    fn test_subscriber_does_not_see_pre_join_history() {
        let topic = format!("tempo-ipc-subscriber-history-test-{}", std::process::id());
        let mut publisher = Publisher::<u64>::create(&topic, Options::new(1, 1)).unwrap();
        publisher.publish(1).unwrap();
        publisher.publish(2).unwrap();
        publisher.publish(3).unwrap();

        let mut subscriber = Subscriber::<u64>::create(&topic).unwrap();
        assert!(
            matches!(subscriber.try_fetch_message(), Err(Error::NoMessageAvailable)),
            "a subscriber joining after publishes must not see messages published before it joined"
        );

        publisher.publish(4).unwrap();
        let message = subscriber.try_fetch_message().unwrap();
        assert_eq!(*message, 4, "a message published after join must be delivered");

        let _ = std::fs::remove_file(std::env::temp_dir().join(crate::topic::shm_region_name(&topic)));
    }

    #[test]
    fn test_subscriber_skips_intermediate_messages_when_slow() {
        let topic = format!("tempo-ipc-subscriber-skip-test-{}", std::process::id());
        let mut publisher = Publisher::<u64>::create(&topic, Options::new(1, 1)).unwrap();
        let mut subscriber = Subscriber::<u64>::create(&topic).unwrap();

        publisher.publish(1).unwrap();
        publisher.publish(2).unwrap();
        publisher.publish(3).unwrap();

        let message = subscriber.try_fetch_message().unwrap();
        assert_eq!(*message, 3, "a slow subscriber must see only the latest message, not every intermediate one");

        let _ = std::fs::remove_file(std::env::temp_dir().join(crate::topic::shm_region_name(&topic)));
    }

    #[test]
    fn test_acquire_limit_enforced() {
        let topic = format!("tempo-ipc-subscriber-limit-test-{}", std::process::id());
        let mut publisher = Publisher::<u64>::create(&topic, Options::new(1, 1)).unwrap();
        let mut subscriber = Subscriber::<u64>::create(&topic).unwrap();

        publisher.publish(1).unwrap();
        let first = subscriber.try_fetch_message().unwrap();

        publisher.publish(2).unwrap();
        let second = subscriber.try_fetch_message();
        assert!(matches!(second, Err(Error::AcquireLimitExceeded { limit: 1 })));

        drop(first);
        publisher.publish(3).unwrap();
        let third = subscriber.try_fetch_message().unwrap();
        assert_eq!(*third, 3);

        let _ = std::fs::remove_file(std::env::temp_dir().join(crate::topic::shm_region_name(&topic)));
    }
}
