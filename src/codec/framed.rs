use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::channel::Role;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::protocol::{FrameHeader, FrameValidator, OpCode, apply_mask, encode_frame};

/// Generate a random seed for mask generation.
/// Falls back to system time if getrandom fails.
fn random_mask_seed() -> u32 {
    let mut buf = [0u8; 4];
    if getrandom::getrandom(&mut buf).is_ok() {
        u32::from_le_bytes(buf)
    } else {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.subsec_nanos() ^ d.as_secs() as u32)
            .unwrap_or(0x1234_5678)
    }
}

/// Read until the blank line that ends an HTTP head.
///
/// Bytes after the head stay in `buf` so frames pipelined behind the
/// upgrade are not lost.
///
/// # Errors
///
/// - `Error::HandshakeTooLarge` if no terminator shows up within `max` bytes
/// - `Error::ConnectionClosed` if the stream ends first
/// - `Error::Io` on transport failure
pub async fn read_http_head<T: AsyncRead + Unpin>(
    io: &mut T,
    buf: &mut BytesMut,
    max: usize,
) -> Result<BytesMut> {
    let mut scanned = 0;
    loop {
        if let Some(pos) = buf[scanned..].windows(4).position(|w| w == b"\r\n\r\n") {
            return Ok(buf.split_to(scanned + pos + 4));
        }
        scanned = buf.len().saturating_sub(3);
        if buf.len() > max {
            return Err(Error::HandshakeTooLarge {
                size: buf.len(),
                max,
            });
        }
        buf.reserve(1024);
        if io.read_buf(buf).await? == 0 {
            return Err(Error::ConnectionClosed(None));
        }
    }
}

/// Frame-level reader and writer for one channel.
///
/// Headers are decoded from a buffered read side; payloads are copied
/// straight into the caller's buffer.
pub struct WebSocketCodec<T> {
    io: T,
    read_buf: BytesMut,
    write_buf: BytesMut,
    role: Role,
    mask_counter: u32,
    validator: FrameValidator,
    mid_frame: bool,
}

impl<T> WebSocketCodec<T> {
    #[must_use]
    pub fn new(io: T, role: Role, config: &Config) -> Self {
        Self::with_read_buf(io, role, config, BytesMut::new())
    }

    /// Create a codec that first consumes bytes already read from `io`.
    #[must_use]
    pub fn with_read_buf(io: T, role: Role, config: &Config, mut read_buf: BytesMut) -> Self {
        let validator = FrameValidator::new(role, config.limits.clone())
            .with_accept_unmasked(config.accept_unmasked_frames);
        read_buf.reserve(config.read_buffer_size);
        Self {
            io,
            read_buf,
            write_buf: BytesMut::with_capacity(config.write_buffer_size),
            role,
            mask_counter: random_mask_seed(),
            validator,
            mid_frame: false,
        }
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Whether a header has been consumed without its payload.
    #[must_use]
    pub fn is_mid_frame(&self) -> bool {
        self.mid_frame
    }

    #[must_use]
    pub fn get_ref(&self) -> &T {
        &self.io
    }

    #[must_use]
    pub fn into_inner(self) -> T {
        self.io
    }

    fn generate_mask(&mut self) -> [u8; 4] {
        self.mask_counter = self.mask_counter.wrapping_add(0x9E37_79B9);
        let a = self.mask_counter;
        let b = a.wrapping_mul(0x85EB_CA6B);
        let c = b ^ (b >> 13);
        let d = c.wrapping_mul(0xC2B2_AE35);
        d.to_le_bytes()
    }
}

impl<T: AsyncRead + AsyncWrite + Unpin> WebSocketCodec<T> {
    /// Read more bytes into the read buffer. Returns `false` at end of stream.
    async fn fill(&mut self) -> Result<bool> {
        self.read_buf.reserve(4096);
        Ok(self.io.read_buf(&mut self.read_buf).await? > 0)
    }

    /// Read and validate the next frame header.
    ///
    /// The payload must be consumed with [`read_payload`](Self::read_payload)
    /// before the next header is read.
    pub async fn read_header(&mut self) -> Result<FrameHeader> {
        loop {
            match FrameHeader::parse(&self.read_buf) {
                Ok((header, consumed)) => {
                    self.validator.validate_incoming(&header)?;
                    self.read_buf.advance(consumed);
                    self.mid_frame = header.payload_len > 0;
                    return Ok(header);
                }
                Err(Error::IncompleteFrame { needed }) => {
                    if !self.fill().await? {
                        return Err(if self.read_buf.is_empty() {
                            Error::ConnectionClosed(None)
                        } else {
                            Error::IncompleteFrame { needed }
                        });
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Append the unmasked payload announced by `header` to `dst`.
    ///
    /// On error `dst` is restored to its previous length.
    pub async fn read_payload(&mut self, header: &FrameHeader, dst: &mut Vec<u8>) -> Result<()> {
        let len = header.payload_len;
        let start = dst.len();
        dst.resize(start + len, 0);

        let buffered = self.read_buf.len().min(len);
        dst[start..start + buffered].copy_from_slice(&self.read_buf[..buffered]);
        self.read_buf.advance(buffered);

        let mut filled = buffered;
        while filled < len {
            let n = match self.io.read(&mut dst[start + filled..]).await {
                Ok(n) => n,
                Err(e) => {
                    dst.truncate(start);
                    return Err(e.into());
                }
            };
            if n == 0 {
                dst.truncate(start);
                return Err(Error::IncompleteFrame {
                    needed: len - filled,
                });
            }
            filled += n;
        }

        if let Some(key) = header.mask {
            apply_mask(&mut dst[start..], key);
        }
        self.mid_frame = false;
        Ok(())
    }

    /// Encode and write one frame, masking it when the role requires.
    pub async fn write_frame(&mut self, fin: bool, opcode: OpCode, payload: &[u8]) -> Result<()> {
        let mask = self.role.must_mask().then(|| self.generate_mask());
        self.write_buf.clear();
        encode_frame(&mut self.write_buf, fin, opcode, payload, mask);
        self.io.write_all(&self.write_buf).await?;
        self.io.flush().await?;
        Ok(())
    }

    /// Shut down the write side of the stream.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.io.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockStream;

    #[tokio::test]
    async fn test_write_frame_masked() {
        let mut codec = WebSocketCodec::new(MockStream::new(vec![]), Role::Client, &Config::client());
        codec.write_frame(true, OpCode::Text, b"Hi").await.unwrap();

        let written = codec.get_ref().written();
        assert_eq!(written[0], 0x81);
        assert_eq!(written[1], 0x82);
        assert_eq!(written.len(), 8);
    }

    #[tokio::test]
    async fn test_write_frame_unmasked() {
        let mut codec = WebSocketCodec::new(MockStream::new(vec![]), Role::Server, &Config::server());
        codec.write_frame(true, OpCode::Text, b"Hi").await.unwrap();

        assert_eq!(codec.get_ref().written(), &[0x81, 0x02, b'H', b'i']);
    }

    #[tokio::test]
    async fn test_read_two_frames() {
        let data = vec![
            // Text "Hello", mask [0x37, 0xfa, 0x21, 0x3d]
            0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58,
            // Binary [1, 2, 3], mask [0x11, 0x22, 0x33, 0x44]
            0x82, 0x83, 0x11, 0x22, 0x33, 0x44, 0x10, 0x20, 0x30,
        ];
        let mut codec = WebSocketCodec::new(MockStream::new(data), Role::Server, &Config::server());

        let mut out = Vec::new();
        let h1 = codec.read_header().await.unwrap();
        assert!(codec.is_mid_frame());
        codec.read_payload(&h1, &mut out).await.unwrap();
        assert!(!codec.is_mid_frame());
        assert_eq!(out, b"Hello");

        let h2 = codec.read_header().await.unwrap();
        assert_eq!(h2.opcode, OpCode::Binary);
        codec.read_payload(&h2, &mut out).await.unwrap();
        assert_eq!(out, b"Hello\x01\x02\x03");
    }

    #[tokio::test]
    async fn test_read_connection_closed() {
        let mut codec = WebSocketCodec::new(MockStream::new(vec![]), Role::Server, &Config::server());
        assert_eq!(
            codec.read_header().await,
            Err(Error::ConnectionClosed(None))
        );
    }

    #[tokio::test]
    async fn test_truncated_payload_is_incomplete() {
        let data = vec![0x82, 0x05, 0x01, 0x02];
        let mut codec = WebSocketCodec::new(MockStream::new(data), Role::Client, &Config::client());
        let header = codec.read_header().await.unwrap();
        let mut out = vec![0xAA];
        assert_eq!(
            codec.read_payload(&header, &mut out).await,
            Err(Error::IncompleteFrame { needed: 3 })
        );
        assert_eq!(out, vec![0xAA]);
    }

    #[tokio::test]
    async fn test_truncated_header_is_incomplete() {
        let data = vec![0x82, 0x7E, 0x01];
        let mut codec = WebSocketCodec::new(MockStream::new(data), Role::Client, &Config::client());
        assert_eq!(
            codec.read_header().await,
            Err(Error::IncompleteFrame { needed: 1 })
        );
    }

    #[tokio::test]
    async fn test_read_http_head_keeps_leftover() {
        let mut stream = MockStream::new(b"GET / HTTP/1.1\r\nHost: a\r\n\r\n\x81\x00".to_vec());
        let mut buf = BytesMut::new();
        let head = read_http_head(&mut stream, &mut buf, 8192).await.unwrap();
        assert_eq!(&head[..], b"GET / HTTP/1.1\r\nHost: a\r\n\r\n");
        assert_eq!(&buf[..], b"\x81\x00");
    }

    #[tokio::test]
    async fn test_read_http_head_limit() {
        let mut stream = MockStream::new(vec![b'a'; 300]);
        let mut buf = BytesMut::new();
        assert!(matches!(
            read_http_head(&mut stream, &mut buf, 128).await,
            Err(Error::HandshakeTooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn test_masks_vary_between_frames() {
        let mut codec = WebSocketCodec::new(MockStream::new(vec![]), Role::Client, &Config::client());
        codec.write_frame(true, OpCode::Binary, b"x").await.unwrap();
        codec.write_frame(true, OpCode::Binary, b"x").await.unwrap();

        let written = codec.get_ref().written();
        assert_eq!(written.len(), 14);
        assert_ne!(&written[2..6], &written[9..13]);
    }
}
