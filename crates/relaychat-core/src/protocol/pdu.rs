//! PDU framing: length-prefixed records over a byte stream.
//!
//! One send call per PDU keeps the header inseparable from its payload
//! when several tasks share a connection; exact-length receives collapse
//! TCP fragmentation back into record boundaries.
//!
//! A cleanly closed peer is reported as `Ok(None)`, never as an error.
//! A short read inside a record means the stream died mid-PDU and is a
//! protocol error.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};
use crate::MAX_PAYLOAD_LEN;

/// Length of the total-length header prefixed to every PDU.
pub const PDU_HEADER_LEN: usize = 2;

/// Transmit one PDU carrying `payload`.
///
/// The header and payload are coalesced into a single buffer and written
/// with one `write_all`, so concurrent writers serialized on the same
/// stream can never interleave a header with a foreign payload.
pub async fn send_pdu<W>(writer: &mut W, payload: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if payload.is_empty() {
        return Err(Error::protocol(0, "refusing to send an empty PDU payload"));
    }
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(Error::PayloadTooLarge(payload.len()));
    }

    let total = (payload.len() + PDU_HEADER_LEN) as u16;
    let mut pdu = Vec::with_capacity(PDU_HEADER_LEN + payload.len());
    pdu.extend_from_slice(&total.to_be_bytes());
    pdu.extend_from_slice(payload);

    writer.write_all(&pdu).await?;
    writer.flush().await?;
    Ok(())
}

/// Receive one complete PDU payload, or `Ok(None)` when the peer has
/// closed the connection.
///
/// The declared payload length must fit in `max_payload`, must leave room
/// for a flag byte, and must arrive in full; anything else is an error.
pub async fn recv_pdu<R>(reader: &mut R, max_payload: usize) -> Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; PDU_HEADER_LEN];
    match read_full(reader, &mut header).await? {
        0 => return Ok(None),
        n if n < PDU_HEADER_LEN => {
            return Err(Error::protocol(0, "stream closed inside the length header"))
        }
        _ => {}
    }

    let total = u16::from_be_bytes(header) as usize;
    if total < PDU_HEADER_LEN + 1 {
        return Err(Error::protocol(
            0,
            format!("declared PDU length {total} leaves no room for a flag byte"),
        ));
    }

    let payload_len = total - PDU_HEADER_LEN;
    if payload_len > max_payload {
        return Err(Error::BufferTooSmall {
            len: payload_len,
            max: max_payload,
        });
    }

    let mut payload = vec![0u8; payload_len];
    match read_full(reader, &mut payload).await? {
        0 => Ok(None),
        n if n < payload_len => Err(Error::protocol(
            payload[0],
            format!("stream closed {n} bytes into a {payload_len}-byte payload"),
        )),
        _ => Ok(Some(payload)),
    }
}

/// Read until `buf` is full or the stream ends, returning how many bytes
/// landed. A connection reset counts as an orderly close, matching how the
/// rest of the protocol treats an abruptly vanished peer.
async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]).await {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted
                ) =>
            {
                return Ok(0)
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}
