//! Flag-tagged message codec.
//!
//! Pure, stateless conversion between PDU payload bytes and the typed
//! [`Message`] variants. Decode is total: every malformed payload comes
//! back as a protocol error carrying the offending flag, and a flag
//! outside the table is reported separately so engines can drop it
//! without closing the connection.
//!
//! Text fields terminate in a NUL byte on the wire; bytes after that NUL
//! are ignored on decode. Fixed-shape payloads must consume the payload
//! exactly.

use std::fmt;

use crate::error::{Error, Result};
use crate::MAX_HANDLE_LEN;

/// Message kinds by their on-wire flag byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Flag {
    /// Client requests ownership of a handle.
    Register = 1,
    /// Server accepted the registration.
    RegisterAck = 2,
    /// Server rejected the registration (duplicate or invalid handle).
    RegisterNak = 3,
    /// Text to every registered client except the sender.
    Broadcast = 4,
    /// Text to a single named destination.
    Unicast = 5,
    /// Text to a list of named destinations.
    Multicast = 6,
    /// A named destination was not registered.
    UnknownDest = 7,
    /// Client asks for the roster.
    ListRequest = 10,
    /// Roster reply header carrying the entry count.
    ListCount = 11,
    /// One roster entry.
    ListHandle = 12,
    /// Roster reply terminator.
    ListDone = 13,
}

impl Flag {
    /// Parse a flag byte, reporting unlisted values as [`Error::UnknownFlag`].
    pub fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            1 => Ok(Self::Register),
            2 => Ok(Self::RegisterAck),
            3 => Ok(Self::RegisterNak),
            4 => Ok(Self::Broadcast),
            5 => Ok(Self::Unicast),
            6 => Ok(Self::Multicast),
            7 => Ok(Self::UnknownDest),
            10 => Ok(Self::ListRequest),
            11 => Ok(Self::ListCount),
            12 => Ok(Self::ListHandle),
            13 => Ok(Self::ListDone),
            other => Err(Error::UnknownFlag(other)),
        }
    }

    /// Convert to the on-wire byte.
    pub fn to_byte(self) -> u8 {
        self as u8
    }
}

/// A client's self-chosen identifier: 1..=100 bytes, no NUL, compared
/// byte-for-byte (case-sensitive).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(String);

impl Handle {
    /// Validate and wrap a handle string.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(Error::InvalidHandle("handle is empty".into()));
        }
        if name.len() > MAX_HANDLE_LEN {
            return Err(Error::InvalidHandle(format!(
                "handle longer than {MAX_HANDLE_LEN} bytes: {name}"
            )));
        }
        if name.bytes().any(|b| b == 0) {
            return Err(Error::InvalidHandle("handle contains a NUL byte".into()));
        }
        Ok(Self(name))
    }

    /// The handle as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Handle {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// One protocol message, covering every payload shape in the flag table.
///
/// Flags 5 and 6 share the destination-list wire shape, so both carry a
/// `dests` vector here. A conforming sender puts exactly one entry in a
/// unicast; the server drops unicasts with any other count rather than
/// treating them as malformed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Flag 1: `hlen · handle`.
    Register {
        /// Requested handle.
        handle: Handle,
    },
    /// Flag 2: bare flag.
    RegisterAck,
    /// Flag 3: bare flag.
    RegisterNak,
    /// Flag 4: `shlen · sender · text NUL`.
    Broadcast {
        /// Originating handle.
        sender: Handle,
        /// Message text (may be empty).
        text: String,
    },
    /// Flag 5: `shlen · sender · n · (dhlen · dest)×n · text NUL`.
    Unicast {
        /// Originating handle.
        sender: Handle,
        /// Destination handles; one entry for a well-formed unicast.
        dests: Vec<Handle>,
        /// Message text (may be empty).
        text: String,
    },
    /// Flag 6: `shlen · sender · n · (dhlen · dest)×n · text NUL`.
    Multicast {
        /// Originating handle.
        sender: Handle,
        /// Destination handles in request order.
        dests: Vec<Handle>,
        /// Message text (may be empty).
        text: String,
    },
    /// Flag 7: `hlen · handle` naming the unresolvable destination.
    UnknownDest {
        /// The handle that could not be resolved.
        handle: Handle,
    },
    /// Flag 10: bare flag.
    ListRequest,
    /// Flag 11: `count(4, big-endian)`.
    ListCount {
        /// Number of roster entries that follow.
        count: u32,
    },
    /// Flag 12: `hlen · handle`.
    ListHandle {
        /// One registered handle.
        handle: Handle,
    },
    /// Flag 13: bare flag.
    ListDone,
}

impl Message {
    /// The flag this message is tagged with on the wire.
    pub fn flag(&self) -> Flag {
        match self {
            Message::Register { .. } => Flag::Register,
            Message::RegisterAck => Flag::RegisterAck,
            Message::RegisterNak => Flag::RegisterNak,
            Message::Broadcast { .. } => Flag::Broadcast,
            Message::Unicast { .. } => Flag::Unicast,
            Message::Multicast { .. } => Flag::Multicast,
            Message::UnknownDest { .. } => Flag::UnknownDest,
            Message::ListRequest => Flag::ListRequest,
            Message::ListCount { .. } => Flag::ListCount,
            Message::ListHandle { .. } => Flag::ListHandle,
            Message::ListDone => Flag::ListDone,
        }
    }

    /// Serialize to a PDU payload.
    ///
    /// Infallible: handle invariants are guaranteed by [`Handle`], and the
    /// destination count fits a byte for every value the engines build.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![self.flag().to_byte()];
        match self {
            Message::Register { handle }
            | Message::UnknownDest { handle }
            | Message::ListHandle { handle } => {
                push_handle(&mut buf, handle);
            }
            Message::RegisterAck
            | Message::RegisterNak
            | Message::ListRequest
            | Message::ListDone => {}
            Message::Broadcast { sender, text } => {
                push_handle(&mut buf, sender);
                push_text(&mut buf, text);
            }
            Message::Unicast { sender, dests, text }
            | Message::Multicast { sender, dests, text } => {
                debug_assert!(!dests.is_empty() && dests.len() <= u8::MAX as usize);
                push_handle(&mut buf, sender);
                buf.push(dests.len() as u8);
                for dest in dests {
                    push_handle(&mut buf, dest);
                }
                push_text(&mut buf, text);
            }
            Message::ListCount { count } => {
                buf.extend_from_slice(&count.to_be_bytes());
            }
        }
        buf
    }

    /// Parse a PDU payload.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let (&flag_byte, tail) = payload
            .split_first()
            .ok_or_else(|| Error::protocol(0, "empty payload"))?;
        let flag = Flag::from_byte(flag_byte)?;
        let mut parser = Parser::new(flag_byte, tail);

        let message = match flag {
            Flag::Register => Message::Register {
                handle: parser.handle()?,
            },
            Flag::RegisterAck => Message::RegisterAck,
            Flag::RegisterNak => Message::RegisterNak,
            Flag::Broadcast => {
                let sender = parser.handle()?;
                let text = parser.text()?;
                Message::Broadcast { sender, text }
            }
            Flag::Unicast | Flag::Multicast => {
                let sender = parser.handle()?;
                let n = parser.byte("destination count")?;
                let mut dests = Vec::with_capacity(n as usize);
                for _ in 0..n {
                    dests.push(parser.handle()?);
                }
                let text = parser.text()?;
                if flag == Flag::Unicast {
                    Message::Unicast { sender, dests, text }
                } else {
                    Message::Multicast { sender, dests, text }
                }
            }
            Flag::UnknownDest => Message::UnknownDest {
                handle: parser.handle()?,
            },
            Flag::ListRequest => Message::ListRequest,
            Flag::ListCount => Message::ListCount {
                count: parser.u32_be()?,
            },
            Flag::ListHandle => Message::ListHandle {
                handle: parser.handle()?,
            },
            Flag::ListDone => Message::ListDone,
        };

        // Text-bearing shapes tolerate bytes after the terminating NUL;
        // everything else must account for the whole payload.
        if !message.carries_text() {
            parser.finish()?;
        }
        Ok(message)
    }

    fn carries_text(&self) -> bool {
        matches!(
            self,
            Message::Broadcast { .. } | Message::Unicast { .. } | Message::Multicast { .. }
        )
    }
}

fn push_handle(buf: &mut Vec<u8>, handle: &Handle) {
    let bytes = handle.as_str().as_bytes();
    buf.push(bytes.len() as u8);
    buf.extend_from_slice(bytes);
}

fn push_text(buf: &mut Vec<u8>, text: &str) {
    buf.extend_from_slice(text.as_bytes());
    buf.push(0);
}

/// Cursor over a payload tail. Every failure carries the payload's flag.
struct Parser<'a> {
    flag: u8,
    rest: &'a [u8],
}

impl<'a> Parser<'a> {
    fn new(flag: u8, rest: &'a [u8]) -> Self {
        Self { flag, rest }
    }

    fn byte(&mut self, what: &str) -> Result<u8> {
        let (&b, rest) = self
            .rest
            .split_first()
            .ok_or_else(|| Error::protocol(self.flag, format!("payload ends before {what}")))?;
        self.rest = rest;
        Ok(b)
    }

    fn take(&mut self, n: usize, what: &str) -> Result<&'a [u8]> {
        if self.rest.len() < n {
            return Err(Error::protocol(
                self.flag,
                format!("payload ends inside {what}"),
            ));
        }
        let (head, rest) = self.rest.split_at(n);
        self.rest = rest;
        Ok(head)
    }

    fn handle(&mut self) -> Result<Handle> {
        let len = self.byte("a handle length")? as usize;
        if len == 0 {
            return Err(Error::protocol(self.flag, "zero-length handle"));
        }
        if len > MAX_HANDLE_LEN {
            return Err(Error::protocol(
                self.flag,
                format!("handle length {len} exceeds {MAX_HANDLE_LEN}"),
            ));
        }
        let bytes = self.take(len, "a handle")?;
        let name = std::str::from_utf8(bytes)
            .map_err(|_| Error::protocol(self.flag, "handle is not valid UTF-8"))?;
        Handle::new(name).map_err(|e| Error::protocol(self.flag, e.to_string()))
    }

    /// Consume a NUL-terminated text field. The NUL is mandatory; bytes
    /// after it are left unconsumed and ignored.
    fn text(&mut self) -> Result<String> {
        let nul = self
            .rest
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| Error::protocol(self.flag, "text missing its NUL terminator"))?;
        let bytes = &self.rest[..nul];
        self.rest = &self.rest[nul + 1..];
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| Error::protocol(self.flag, "text is not valid UTF-8"))
    }

    fn u32_be(&mut self) -> Result<u32> {
        let bytes = self.take(4, "a 32-bit count")?;
        let mut raw = [0u8; 4];
        raw.copy_from_slice(bytes);
        Ok(u32::from_be_bytes(raw))
    }

    fn finish(&self) -> Result<()> {
        if self.rest.is_empty() {
            Ok(())
        } else {
            Err(Error::protocol(
                self.flag,
                format!("{} trailing bytes after the payload", self.rest.len()),
            ))
        }
    }
}
