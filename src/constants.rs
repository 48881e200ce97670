//! tempo-ipc constants.
//!
//! Core sizing and timing defaults shared across the transport.

use std::time::Duration;

/// Cache line size used to pad shared atomics apart (prevents false
/// sharing between publisher/subscriber processes pounding adjacent
/// counters).
pub const CACHE_LINE_SIZE: usize = 64;

/// Default deadline for a joining process to observe
/// `initialization_state == Initialized` before giving up.
pub const DEFAULT_INIT_TIMEOUT: Duration = Duration::from_secs(1);

/// Default deadline for a participant-directory scan to claim a free
/// entry.
pub const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Default per-subscriber concurrent-acquire cap when `Options` doesn't
/// override it.
pub const DEFAULT_MAX_CONCURRENT_ACQUIRES: u32 = 1;

/// `history_size` default: reserved, has no consumer logic in v1.
pub const DEFAULT_HISTORY_SIZE: u32 = 0;

/// Sleep between polls while spin-waiting on the directory join scan.
pub const JOIN_POLL_INTERVAL: Duration = Duration::from_micros(200);
