//! Arrays of per-publisher and per-subscriber entries inside the shared
//! region, each guarded by a named cross-process advisory lock, used to
//! assign a new publisher or subscriber a free index at join time.

use std::time::{Duration, Instant};

use crate::constants::JOIN_POLL_INTERVAL;
use crate::error::{Error, Result};
use crate::named_lock::NamedLock;
use crate::topic::{entry_lock_name, Role};
use crate::types::UintHalfT;

/// Scan `[0, max_participants)` for a free directory slot, claiming the
/// first one whose named lock is uncontended. Identical algorithm for
/// publishers and subscribers — only `role` (and therefore the lock
/// name prefix) differs.
pub fn claim_entry(
    topic: &str,
    role: Role,
    max_participants: UintHalfT,
    timeout: Duration,
) -> Result<(UintHalfT, NamedLock)> {
    let deadline = Instant::now() + timeout;

    loop {
        for idx in 0..max_participants {
            let name = entry_lock_name(topic, role, idx);
            if let Some(lock) = NamedLock::try_claim(&name)? {
                tracing::debug!(topic, ?role, idx, "claimed participant directory entry");
                return Ok((idx, lock));
            }
        }

        if Instant::now() >= deadline {
            tracing::warn!(topic, ?role, max_participants, "participant directory scan timed out");
            return Err(Error::ParticipantLimitExceeded);
        }
        std::thread::sleep(JOIN_POLL_INTERVAL);
    }
}
