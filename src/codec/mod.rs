//! Buffered frame I/O over an async byte stream.

mod framed;

pub use framed::{WebSocketCodec, read_http_head};
