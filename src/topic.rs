//! Derives deterministic shared-memory region and advisory-lock names
//! from an application-supplied topic identifier.
//!
//! The naming functions must produce identical strings in every
//! participating process — they are the only coordination the processes
//! have before the shared region even exists.

/// The named-shared-memory region backing a topic.
pub fn shm_region_name(topic: &str) -> String {
    format!("tempo-ipc_{topic}")
}

/// Which kind of participant-directory entry a lock name refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Publisher,
    Subscriber,
}

impl Role {
    fn prefix(self) -> &'static str {
        match self {
            Role::Publisher => "publisher",
            Role::Subscriber => "subscriber",
        }
    }
}

/// The advisory-lock name guarding participant entry `idx` of `role` for
/// `topic`, e.g. `"orders_publisher_entry_3"`.
pub fn entry_lock_name(topic: &str, role: Role, idx: u32) -> String {
    format!("{topic}_{}_entry_{idx}", role.prefix())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shm_region_name_is_deterministic() {
        assert_eq!(shm_region_name("orders"), shm_region_name("orders"));
        assert_ne!(shm_region_name("orders"), shm_region_name("quotes"));
    }

    #[test]
    fn test_entry_lock_name_format() {
        assert_eq!(
            entry_lock_name("orders", Role::Publisher, 3),
            "orders_publisher_entry_3"
        );
        assert_eq!(
            entry_lock_name("orders", Role::Subscriber, 0),
            "orders_subscriber_entry_0"
        );
    }
}
