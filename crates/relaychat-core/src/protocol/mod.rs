//! Wire protocol for relaychat.
//!
//! A strict binary protocol over plain TCP streams. Every transmission is
//! one PDU; the payload's first byte selects the message kind.
//!
//! ## PDU Structure
//!
//! ```text
//! ┌──────────────┬──────┬─────────────────────┐
//! │ Total length │ Flag │     Flag-specific   │
//! │  (2 bytes,   │ (1   │        tail         │
//! │  big-endian) │ byte)│     (variable)      │
//! └──────────────┴──────┴─────────────────────┘
//! ```
//!
//! The total length includes the 2-byte header itself, so the payload of a
//! PDU declaring length N is N − 2 bytes. Text fields are NUL-terminated on
//! the wire; handles are length-prefixed and never longer than 100 bytes.

mod message;
mod pdu;

pub use message::{Flag, Handle, Message};
pub use pdu::{recv_pdu, send_pdu, PDU_HEADER_LEN};

/// Maximum number of destinations a client may name in one multicast.
pub const MAX_MULTICAST_DESTS: usize = 9;
