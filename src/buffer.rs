//! Single-writer cross-process initialization of the shared region, and
//! the typed view over it shared by every `Publisher`/`Subscriber`
//! handle.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam::utils::Backoff;

use crate::error::{Error, Result};
use crate::layout::{self, BufferHeader, InitState, Offsets, PublisherEntry, SubscriberEntry};
use crate::options::Options;
use crate::region::MappedRegion;
use crate::slot::Slot;
use crate::topic::shm_region_name;
use crate::types::UintHalfT;

/// Owns the mapped region and the typed pointers into it. Shared (via
/// `Arc`) between a `Publisher`/`Subscriber` and every `MessageAccess`/
/// `MessageWrapper` it hands out, so the mapping outlives any in-flight
/// access even if the endpoint itself is dropped first.
pub struct MessageBuffer<T: Copy> {
    region: Arc<MappedRegion>,
    offsets: Offsets,
    _marker: std::marker::PhantomData<T>,
}

// SAFETY: every pointer derived from `region` is only ever dereferenced
// through the atomic/interior-mutability discipline documented on
// `BufferHeader`/`Slot`.
unsafe impl<T: Copy> Send for MessageBuffer<T> {}
unsafe impl<T: Copy> Sync for MessageBuffer<T> {}

impl<T: Copy> MessageBuffer<T> {
    /// Publisher-side entry point: create the region if needed, and
    /// become the initializing process if we win the state CAS.
    pub fn create_or_open(topic: &str, options: Options, init_timeout: Duration) -> Result<Self> {
        options.validate()?;

        let region_name = shm_region_name(topic);
        let size = layout::required_region_size::<T>(&options);
        let region = Arc::new(MappedRegion::open_or_create(&region_name, size)?);
        let offsets = layout::offsets::<T>(&options);

        let header_ptr = region.base_ptr() as *mut BufferHeader;
        Self::ensure_initialized(header_ptr, &offsets, &options, init_timeout)?;

        Ok(Self { region, offsets, _marker: std::marker::PhantomData })
    }

    /// Subscriber-side entry point: wait for the region to exist and for
    /// its header to reach `Initialized`, without knowing `Options` in
    /// advance — `Subscriber::create` takes no options.
    pub fn open_existing(topic: &str, timeout: Duration) -> Result<Self> {
        let region_name = shm_region_name(topic);
        let deadline = Instant::now() + timeout;

        let region = loop {
            match MappedRegion::open(&region_name) {
                Ok(region) => break Arc::new(region),
                Err(_) if Instant::now() < deadline => {
                    std::thread::sleep(crate::constants::JOIN_POLL_INTERVAL);
                }
                Err(_) => return Err(Error::InitializationTimeout),
            }
        };

        let header_ptr = region.base_ptr() as *const BufferHeader;
        let header = unsafe { &*header_ptr };
        Self::spin_wait_initialized(header, deadline)?;

        let options = Options {
            max_publishers: header.max_publishers(),
            max_subscribers: header.max_subscribers(),
            max_concurrent_acquires: header.max_concurrent_acquires(),
            history_size: header.history_size(),
        };
        let offsets = layout::offsets::<T>(&options);

        Ok(Self { region, offsets, _marker: std::marker::PhantomData })
    }

    fn ensure_initialized(
        header_ptr: *mut BufferHeader,
        offsets: &Offsets,
        options: &Options,
        timeout: Duration,
    ) -> Result<()> {
        let header = unsafe { &*header_ptr };
        let deadline = Instant::now() + timeout;

        if header.load_init_state(Ordering::Acquire) == InitState::Initialized {
            return Ok(());
        }

        let won_race = header.compare_exchange_init_state(
            InitState::Uninitialized,
            InitState::InProgress,
            Ordering::AcqRel,
            Ordering::Acquire,
        );

        if !won_race {
            return Self::spin_wait_initialized(header, deadline);
        }

        tracing::debug!(?options, "won buffer initialization race, constructing control block");

        unsafe {
            BufferHeader::init_config(header_ptr, options);
            Self::init_entries_and_slots(header_ptr, offsets, options);
        }

        header.store_init_state(InitState::Initialized, Ordering::Release);
        Ok(())
    }

    unsafe fn init_entries_and_slots(header_ptr: *mut BufferHeader, offsets: &Offsets, options: &Options) {
        let base = header_ptr as *mut u8;

        let publisher_entries = base.add(offsets.publisher_entries) as *mut PublisherEntry;
        for i in 0..options.max_publishers as usize {
            std::ptr::write(publisher_entries.add(i), PublisherEntry::default());
        }

        let subscriber_entries = base.add(offsets.subscriber_entries) as *mut SubscriberEntry;
        for i in 0..options.max_subscribers as usize {
            std::ptr::write(subscriber_entries.add(i), SubscriberEntry::default());
        }

        let slots_per_publisher = layout::slots_per_publisher(options.max_subscribers, options.max_concurrent_acquires);
        let total_slots = options.max_publishers as usize * slots_per_publisher as usize;
        let slots = base.add(offsets.slots) as *mut Slot<T>;
        for i in 0..total_slots {
            Slot::init_free(slots.add(i));
        }
    }

    fn spin_wait_initialized(header: &BufferHeader, deadline: Instant) -> Result<()> {
        let backoff = Backoff::new();
        loop {
            if header.load_init_state(Ordering::Acquire) == InitState::Initialized {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(Error::InitializationTimeout);
            }
            backoff.snooze();
        }
    }

    #[inline]
    pub fn header(&self) -> &BufferHeader {
        unsafe { &*(self.region.base_ptr() as *const BufferHeader) }
    }

    /// Clone of the keep-alive handle to hand to `Slot::acquire`/
    /// `acquire_unsafe` so a `MessageAccess` keeps the mapping alive even
    /// after this `MessageBuffer` (or the endpoint owning it) is dropped.
    #[inline]
    pub fn region(&self) -> Arc<MappedRegion> {
        self.region.clone()
    }

    #[inline]
    pub fn publisher_entry(&self, idx: UintHalfT) -> *mut PublisherEntry {
        let base = self.region.base_ptr();
        unsafe { base.add(self.offsets.publisher_entries) as *mut PublisherEntry }.wrapping_add(idx as usize)
    }

    #[inline]
    pub fn subscriber_entry(&self, idx: UintHalfT) -> *mut SubscriberEntry {
        let base = self.region.base_ptr();
        unsafe { base.add(self.offsets.subscriber_entries) as *mut SubscriberEntry }.wrapping_add(idx as usize)
    }

    #[inline]
    pub fn slots_base(&self) -> *const Slot<T> {
        let base = self.region.base_ptr();
        unsafe { base.add(self.offsets.slots) as *const Slot<T> }
    }

    #[inline]
    pub fn publisher_base_offset(&self, publisher_idx: UintHalfT) -> UintHalfT {
        publisher_idx * self.header().slots_per_publisher()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_or_open_initializes_once() {
        let topic = format!("tempo-ipc-buffer-test-{}", std::process::id());
        let options = Options::new(1, 2);

        let buf1 = MessageBuffer::<u64>::create_or_open(&topic, options, Duration::from_millis(500)).unwrap();
        assert_eq!(buf1.header().max_publishers(), 1);
        assert_eq!(buf1.header().max_subscribers(), 2);

        // A second "publisher" joining the same topic must observe the
        // already-initialized header rather than re-running init.
        let buf2 = MessageBuffer::<u64>::create_or_open(&topic, options, Duration::from_millis(500)).unwrap();
        assert_eq!(buf2.header().max_publishers(), 1);

        let _ = std::fs::remove_file(std::env::temp_dir().join(shm_region_name(&topic)));
    }

    #[test]
    fn test_subscriber_open_waits_for_publisher_init() {
        let topic = format!("tempo-ipc-buffer-sub-test-{}", std::process::id());
        let options = Options::new(1, 1);

        let _buf = MessageBuffer::<u64>::create_or_open(&topic, options, Duration::from_millis(500)).unwrap();
        let sub_buf = MessageBuffer::<u64>::open_existing(&topic, Duration::from_millis(500)).unwrap();
        assert_eq!(sub_buf.header().max_publishers(), 1);
        assert_eq!(sub_buf.header().max_subscribers(), 1);

        let _ = std::fs::remove_file(std::env::temp_dir().join(shm_region_name(&topic)));
    }

    #[test]
    fn test_subscriber_open_times_out_without_publisher() {
        let topic = format!("tempo-ipc-buffer-missing-test-{}", std::process::id());
        let result = MessageBuffer::<u64>::open_existing(&topic, Duration::from_millis(50));
        assert!(matches!(result, Err(Error::InitializationTimeout)));
    }
}
