//! Wire codec
//!
//! Both the process-pipe protocol (agent <-> child program) and the peer TCP
//! transport (agent <-> agent) frame integers the same way: 4 bytes,
//! little-endian.
//!
//! # Control stream
//!
//! The child writes requests on its stderr. Each request starts with one
//! control byte:
//!
//! ```text
//! SEND     [0][target: u32][length: u32][payload: length bytes]
//! RECEIVE  [1][source: u32]
//! DEBUG    [2][length: u32][text: length bytes]
//! ```
//!
//! A RECEIVE is answered on the child's stdin with
//! `[length: u32][source: u32][payload]`.
//!
//! # Peer connections
//!
//! One TCP connection per message: `[sender: u32][payload...]`, then the
//! sender closes. The receiver reads to end-of-stream for the payload length.

use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Width of every framed integer
pub const INT_WIDTH: usize = 4;

/// Default TCP port agents listen on
pub const DEFAULT_AGENT_PORT: u16 = 3456;

/// Request kinds on the child's control stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ControlOp {
    Send = 0,
    Receive = 1,
    Debug = 2,
}

impl ControlOp {
    /// Map a control byte to its request kind
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(ControlOp::Send),
            1 => Some(ControlOp::Receive),
            2 => Some(ControlOp::Debug),
            _ => None,
        }
    }
}

/// Encode an integer as 4 little-endian bytes
#[inline]
pub fn encode_int(value: u32) -> [u8; INT_WIDTH] {
    value.to_le_bytes()
}

/// Decode 4 little-endian bytes
///
/// Fails with `UnexpectedEof` when fewer than 4 bytes are available.
pub fn decode_int(buf: &[u8]) -> io::Result<u32> {
    if buf.len() < INT_WIDTH {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("need {} bytes for integer, got {}", INT_WIDTH, buf.len()),
        ));
    }
    Ok(u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]))
}

/// Read one framed integer from a stream
pub async fn read_int<R>(reader: &mut R) -> io::Result<u32>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; INT_WIDTH];
    reader.read_exact(&mut buf).await?;
    decode_int(&buf)
}

/// Write one framed integer to a stream
pub async fn write_int<W>(writer: &mut W, value: u32) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&encode_int(value)).await
}

/// Frame a RECEIVE reply: `[length][source][payload]`
pub fn encode_receive_reply(source: u32, payload: &[u8]) -> Vec<u8> {
    let mut framed = Vec::with_capacity(2 * INT_WIDTH + payload.len());
    framed.extend_from_slice(&encode_int(payload.len() as u32));
    framed.extend_from_slice(&encode_int(source));
    framed.extend_from_slice(payload);
    framed
}

/// Frame a peer message: `[sender][payload]`
pub fn encode_peer_message(sender: u32, payload: &[u8]) -> Vec<u8> {
    let mut framed = Vec::with_capacity(INT_WIDTH + payload.len());
    framed.extend_from_slice(&encode_int(sender));
    framed.extend_from_slice(payload);
    framed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_round_trip_edges() {
        for value in [0u32, 1, 255, 256, 65_535, 1 << 24, i32::MAX as u32, u32::MAX] {
            assert_eq!(decode_int(&encode_int(value)).unwrap(), value);
        }
    }

    #[test]
    fn test_int_is_little_endian() {
        assert_eq!(encode_int(10), [10, 0, 0, 0]);
        assert_eq!(encode_int(2 * 1024 * 1024), [0, 0, 0x20, 0]);
    }

    #[test]
    fn test_decode_short_buffer_is_framing_error() {
        let err = decode_int(&[1, 2, 3]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_control_op_bytes() {
        assert_eq!(ControlOp::from_byte(0), Some(ControlOp::Send));
        assert_eq!(ControlOp::from_byte(1), Some(ControlOp::Receive));
        assert_eq!(ControlOp::from_byte(2), Some(ControlOp::Debug));
        assert_eq!(ControlOp::from_byte(3), None);
        assert_eq!(ControlOp::from_byte(0xff), None);
    }

    #[test]
    fn test_receive_reply_layout() {
        let framed = encode_receive_reply(2, b"hello");
        assert_eq!(&framed[0..4], &[5, 0, 0, 0]);
        assert_eq!(&framed[4..8], &[2, 0, 0, 0]);
        assert_eq!(&framed[8..], b"hello");
    }

    #[tokio::test]
    async fn test_read_int_truncated_stream() {
        let mut reader: &[u8] = &[7, 0];
        let err = read_int(&mut reader).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn test_write_then_read_int() {
        let mut buf = Vec::new();
        write_int(&mut buf, 123_456).await.unwrap();
        let mut reader: &[u8] = &buf;
        assert_eq!(read_int(&mut reader).await.unwrap(), 123_456);
    }
}
