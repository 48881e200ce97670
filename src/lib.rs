//! # tempo-ipc
//!
//! Real-time shared-memory publish/subscribe transport for fixed-layout
//! message types.
//!
//! A topic is a named region of shared memory holding a fixed-size
//! array of slots, a small control block, and a directory of publisher
//! and subscriber entries. Publishers write into their own sub-range of
//! slots and publish a single "latest" index; subscribers follow that
//! index and always see the newest message available at the moment
//! they fetch, skipping any they missed — a "latest-only" delivery
//! guarantee rather than an at-least-once queue.
//!
//! ## Example
//!
//! ```no_run
//! use tempo_ipc::{Options, Publisher, Subscriber};
//!
//! let mut publisher = Publisher::<u64>::create("prices", Options::new(1, 4)).unwrap();
//! let mut subscriber = Subscriber::<u64>::create("prices").unwrap();
//!
//! publisher.publish(101).unwrap();
//! let message = subscriber.try_fetch_message().unwrap();
//! assert_eq!(*message, 101);
//! ```
//!
//! ## Architecture
//!
//! ```text
//! Process A (Publisher)            Shared Memory               Process B (Subscriber)
//! ┌──────────────────┐      ┌───────────────────────────┐      ┌──────────────────┐
//! │   Application     │      │ BufferHeader              │      │   Application     │
//! │        │          │      │ PublisherEntry[]          │      │        ▲          │
//! │        ▼          │      │ SubscriberEntry[]         │      │        │          │
//! │   Publisher ──────┼──────┼─► Slot[] (mmap-backed) ───┼──────┼── Subscriber      │
//! └──────────────────┘      └───────────────────────────┘      └──────────────────┘
//! ```
//!
//! `T` must be `Copy` and identically laid out in every participating
//! process — this transport moves bytes, not Rust ownership, across the
//! process boundary.

pub mod buffer;
pub mod constants;
pub mod directory;
pub mod error;
pub mod layout;
pub mod named_lock;
pub mod options;
pub mod publisher;
pub mod region;
pub mod slot;
pub mod slot_pool;
pub mod subscriber;
pub mod topic;
pub mod types;

pub use error::{Error, Result};
pub use options::Options;
pub use publisher::Publisher;
pub use slot::MessageAccess;
pub use subscriber::{MessageWrapper, Subscriber};

/// Crate version, for diagnostics.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_end_to_end_publish_and_fetch() {
        let topic = format!("tempo-ipc-lib-test-{}", std::process::id());
        let mut publisher = Publisher::<u64>::create(&topic, Options::new(1, 1)).unwrap();
        let mut subscriber = Subscriber::<u64>::create(&topic).unwrap();

        publisher.publish(999).unwrap();
        let message = subscriber.try_fetch_message().unwrap();
        assert_eq!(*message, 999);

        let _ = std::fs::remove_file(std::env::temp_dir().join(topic::shm_region_name(&topic)));
    }
}
