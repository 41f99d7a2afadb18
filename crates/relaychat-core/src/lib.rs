//! # relaychat Core Library
//!
//! The protocol engine shared by the relaychat server and client: a
//! length-prefixed, flag-tagged chat protocol over plain TCP. Clients
//! register a unique handle, then exchange unicast, multicast, and
//! broadcast text messages through a central relay that validates,
//! routes, and forwards but never synthesizes content.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │       chat-server  │  chat-client        │
//! ├──────────────────────────────────────────┤
//! │   registry   │   message codec           │
//! ├──────────────────────────────────────────┤
//! │           PDU framing (wire)             │
//! └──────────────────────────────────────────┘
//! ```
//!
//! The wire unit is a PDU: a 2-byte big-endian total length (header
//! included) followed by a payload whose first byte is the message flag.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, clippy::all)]
#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod error;
pub mod protocol;
pub mod registry;

pub use error::{Error, Result};
pub use protocol::{Handle, Message};
pub use registry::{ConnId, Registry};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Maximum handle length in bytes.
pub const MAX_HANDLE_LEN: usize = 100;

/// Maximum payload bytes carried by one PDU (65535 minus the header).
pub const MAX_PAYLOAD_LEN: usize = 65533;
