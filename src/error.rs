//! Error types for tempo-ipc.

use thiserror::Error;

/// Result type alias for tempo-ipc operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the transport.
#[derive(Error, Debug)]
pub enum Error {
    /// The underlying named shared-memory region could not be opened or
    /// created, or an existing region is too small for the requested
    /// options.
    #[error("shared memory open failed: {message}")]
    ShmOpen {
        /// Description of the failure.
        message: String,
    },

    /// I/O errors surfaced while creating or mapping the shared-memory
    /// file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// `BufferHeader.initialization_state` did not reach `Initialized`
    /// before the configured deadline. Recoverable: the caller may retry.
    #[error("timed out waiting for buffer initialization")]
    InitializationTimeout,

    /// The participant directory scan could not claim a free entry
    /// within the configured deadline. Recoverable.
    #[error("no free participant entry available (max reached)")]
    ParticipantLimitExceeded,

    /// `try_fetch_message` found nothing newer than the subscriber's
    /// `next_expected` counter. Expected, non-fatal.
    #[error("no message available")]
    NoMessageAvailable,

    /// The subscriber already holds `max_concurrent_acquires` live
    /// `MessageWrapper`s. Caller must drop one before retrying.
    #[error("acquire limit exceeded ({limit} concurrent acquires already held)")]
    AcquireLimitExceeded {
        /// The configured per-subscriber cap that was hit.
        limit: u32,
    },

    /// Requested options fail validation (e.g. `max_publishers == 0`, or
    /// `history_size > 0`, which is reserved and not yet implemented).
    #[error("invalid options: {message}")]
    InvalidOptions {
        /// Description of the validation failure.
        message: String,
    },

    /// Reserved: not currently reachable. A correctly configured buffer
    /// guarantees `SlotPool::next_free_slot` always finds a free slot;
    /// a caller that somehow breaches the `max_subscribers *
    /// max_concurrent_acquires` pin budget hits a panic instead of this
    /// variant. Kept so callers can match exhaustively against the
    /// transport's full error surface.
    #[error("publish failed")]
    PublishFailure,
}

impl Error {
    pub(crate) fn shm_open(message: impl Into<String>) -> Self {
        Self::ShmOpen { message: message.into() }
    }

    pub(crate) fn invalid_options(message: impl Into<String>) -> Self {
        Self::InvalidOptions { message: message.into() }
    }

    /// Whether a caller can reasonably retry the operation that produced
    /// this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::InitializationTimeout
                | Self::ParticipantLimitExceeded
                | Self::NoMessageAvailable
                | Self::AcquireLimitExceeded { .. }
        )
    }
}
