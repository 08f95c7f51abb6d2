use std::sync::Arc;

use anyhow::anyhow;
use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::trace;

use crate::alloc::BufAllocator;
use crate::buffer::{scan_var_uint, var_int_len, ByteBuf};
use crate::error::{DecodeError, DecodeResult};

/// Frame length prefixes are VarInts of at most three bytes.
pub const FRAME_LENGTH_MAX_GROUPS: usize = 3;

/// A length-prefixed frame stream over TCP.
///
/// Each frame is `VarInt(length) ++ payload`, where the payload is the
/// opcode followed by the packet body.
pub struct Connection {
    stream: TcpStream,
    read_buf: BytesMut,
    max_frame_len: usize,
    allocator: Arc<dyn BufAllocator>,
}

impl Connection {
    pub fn new(stream: TcpStream, max_frame_len: usize, allocator: Arc<dyn BufAllocator>) -> Self {
        Self {
            stream,
            read_buf: BytesMut::with_capacity(4096),
            max_frame_len,
            allocator,
        }
    }

    /// Read one frame. Fails when the peer closes the stream.
    pub async fn read_frame(&mut self) -> anyhow::Result<ByteBuf> {
        read_frame(&mut self.stream, &mut self.read_buf, self.max_frame_len).await
    }

    pub async fn write_frame(&mut self, payload: &ByteBuf) -> anyhow::Result<()> {
        let frame = build_frame(self.allocator.as_ref(), payload);
        self.stream.write_all(frame.readable()).await?;
        Ok(())
    }

    pub fn peer_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.stream.peer_addr()
    }

    /// Split into halves that can be driven from separate tasks. Bytes
    /// already buffered stay with the reader.
    pub fn into_split(self) -> (ConnectionReader, ConnectionWriter) {
        let (read_half, write_half) = self.stream.into_split();
        (
            ConnectionReader {
                stream: read_half,
                read_buf: self.read_buf,
                max_frame_len: self.max_frame_len,
            },
            ConnectionWriter {
                stream: write_half,
                allocator: self.allocator,
            },
        )
    }
}

/// Read half of a split connection.
pub struct ConnectionReader {
    stream: OwnedReadHalf,
    read_buf: BytesMut,
    max_frame_len: usize,
}

impl ConnectionReader {
    pub async fn read_frame(&mut self) -> anyhow::Result<ByteBuf> {
        read_frame(&mut self.stream, &mut self.read_buf, self.max_frame_len).await
    }
}

/// Write half of a split connection.
pub struct ConnectionWriter {
    stream: OwnedWriteHalf,
    allocator: Arc<dyn BufAllocator>,
}

impl ConnectionWriter {
    pub async fn write_frame(&mut self, payload: &ByteBuf) -> anyhow::Result<()> {
        let frame = build_frame(self.allocator.as_ref(), payload);
        self.stream.write_all(frame.readable()).await?;
        Ok(())
    }

    pub async fn shutdown(&mut self) -> anyhow::Result<()> {
        self.stream.shutdown().await?;
        Ok(())
    }
}

// === Shared helpers ===

async fn read_frame<R: AsyncRead + Unpin>(
    stream: &mut R,
    read_buf: &mut BytesMut,
    max_frame_len: usize,
) -> anyhow::Result<ByteBuf> {
    loop {
        if let Some(frame) = try_parse_frame(read_buf, max_frame_len)? {
            return Ok(ByteBuf::from(frame));
        }
        if stream.read_buf(read_buf).await? == 0 {
            return Err(anyhow!("Connection closed"));
        }
    }
}

/// Split one complete frame off the front of `read_buf`, or return `None`
/// if more input is needed. The declared length is checked against
/// `max_frame_len` before waiting for the body.
pub fn try_parse_frame(read_buf: &mut BytesMut, max_frame_len: usize) -> DecodeResult<Option<BytesMut>> {
    let Some((len, header)) = scan_var_uint(read_buf, FRAME_LENGTH_MAX_GROUPS, 32, "frame length")? else {
        return Ok(None);
    };
    let len = len as usize;
    if len > max_frame_len {
        return Err(DecodeError::TooLong {
            what: "frame",
            len,
            max: max_frame_len,
        });
    }
    if read_buf.len() < header + len {
        read_buf.reserve(header + len - read_buf.len());
        return Ok(None);
    }
    read_buf.advance(header);
    let frame = read_buf.split_to(len);
    trace!("Read frame len={}", len);
    Ok(Some(frame))
}

/// Prefix the readable bytes of `payload` with their VarInt length.
pub fn build_frame(allocator: &dyn BufAllocator, payload: &ByteBuf) -> ByteBuf {
    let len = payload.readable_bytes();
    let mut frame = allocator.buffer_with_capacity(var_int_len(len as i32) + len);
    frame.write_var_int(len as i32);
    frame.write_bytes(payload.readable());
    frame
}
