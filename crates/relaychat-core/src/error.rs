//! Error types shared by the relaychat server and client.
//!
//! A closed peer is not an error: framing-level receives signal it with
//! `Ok(None)` so callers can distinguish orderly shutdown from damage.

use thiserror::Error;

/// Core error type for relaychat operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed PDU or payload. Carries the flag byte the payload claimed
    /// (0 when the damage is below the flag level).
    #[error("protocol error (flag {flag}): {reason}")]
    Protocol {
        /// Flag byte of the offending payload.
        flag: u8,
        /// What failed to parse.
        reason: String,
    },

    /// The payload carried a flag outside the protocol table. Engines drop
    /// these without closing the connection.
    #[error("unknown flag {0}")]
    UnknownFlag(u8),

    /// The transport reported an I/O error mid-stream.
    #[error("connection lost")]
    ConnectionLost(#[from] std::io::Error),

    /// An inbound PDU declared a payload larger than the receive limit.
    #[error("PDU payload of {len} bytes exceeds receive limit of {max}")]
    BufferTooSmall {
        /// Declared payload length.
        len: usize,
        /// Caller's receive limit.
        max: usize,
    },

    /// An outbound payload does not fit in a single PDU.
    #[error("payload of {0} bytes exceeds the PDU limit")]
    PayloadTooLarge(usize),

    /// The handle is already registered to another connection.
    #[error("handle already in use: {0}")]
    DuplicateHandle(String),

    /// The handle violates the length or content rules.
    #[error("invalid handle: {0}")]
    InvalidHandle(String),
}

/// Result type alias using the relaychat [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Shorthand for an [`Error::Protocol`] value.
    pub(crate) fn protocol(flag: u8, reason: impl Into<String>) -> Self {
        Error::Protocol {
            flag,
            reason: reason.into(),
        }
    }
}
