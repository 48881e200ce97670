//! Numeric types shared across the transport.
//!
//! `uint_t` is the largest lock-free unsigned integer the platform
//! supports; `uint_half_t` is half its width. Publisher/subscriber ids
//! and local message ids are `uint_half_t`; global message indices and
//! the running message counter are `uint_t`.

use static_assertions::const_assert;
use std::sync::atomic::AtomicU64;

/// The largest lock-free unsigned integer type in use by this transport.
/// `AtomicU64` is lock-free on every platform Rust's tier-1/tier-2 target
/// list supports, so `uint_t` is fixed at 64 bits rather than probed at
/// compile time.
pub type UintT = u64;

/// Half the width of [`UintT`]. Publisher ids, subscriber ids, and local
/// message ids live in this space.
pub type UintHalfT = u32;

/// Atomic counterpart of [`UintT`], used for every shared-memory atomic
/// field in `BufferHeader` and `Slot`.
pub type AtomicUintT = AtomicU64;

const_assert!(std::mem::size_of::<UintT>() == 2 * std::mem::size_of::<UintHalfT>());

/// Sentinel meaning "never published" / "no slot" / "free".
pub const INVALID: UintT = UintT::MAX;

/// Sentinel for an unassigned `uint_half_t` index.
pub const INVALID_HALF: UintHalfT = UintHalfT::MAX;

/// Round `value` up to the next power of two, with a floor of 2 — slot
/// pools are never narrower than 2, since a single-slot pool would give
/// `next_free_slot` nowhere to wrap to.
pub fn ceil_to_power_of_two(value: UintHalfT) -> UintHalfT {
    value.max(2).next_power_of_two()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ceil_to_power_of_two() {
        assert_eq!(ceil_to_power_of_two(0), 2);
        assert_eq!(ceil_to_power_of_two(1), 2);
        assert_eq!(ceil_to_power_of_two(2), 2);
        assert_eq!(ceil_to_power_of_two(3), 4);
        assert_eq!(ceil_to_power_of_two(4), 4);
        assert_eq!(ceil_to_power_of_two(5), 8);
        assert_eq!(ceil_to_power_of_two(1025), 2048);
    }

    #[test]
    fn test_invalid_sentinels_are_max() {
        assert_eq!(INVALID, UintT::MAX);
        assert_eq!(INVALID_HALF, UintHalfT::MAX);
    }
}
