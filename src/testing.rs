//! Test doubles shared by unit tests.

use std::io::Cursor;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// In-memory stream: reads from a fixed script, records writes.
pub struct MockStream {
    read_data: Cursor<Vec<u8>>,
    pub write_data: Vec<u8>,
    pub fail_writes_after: Option<usize>,
}

impl MockStream {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            read_data: Cursor::new(data),
            write_data: Vec::new(),
            fail_writes_after: None,
        }
    }

    pub fn written(&self) -> &[u8] {
        &self.write_data
    }
}

impl AsyncRead for MockStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let pos = self.read_data.position() as usize;
        let data = self.read_data.get_ref();
        if pos >= data.len() {
            return Poll::Ready(Ok(()));
        }
        let remaining = &data[pos..];
        let to_copy = std::cmp::min(remaining.len(), buf.remaining());
        buf.put_slice(&remaining[..to_copy]);
        self.read_data.set_position((pos + to_copy) as u64);
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for MockStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        if let Some(limit) = self.fail_writes_after {
            if self.write_data.len() + buf.len() > limit {
                return Poll::Ready(Err(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "peer went away",
                )));
            }
        }
        self.write_data.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
