//! The WebSocket channel: one upgraded connection, frame at a time.
//!
//! ## Lifecycle
//!
//! 1. **Open** - after `open_as_server` / `open_as_client` succeeds
//! 2. **Closing** - CLOSE sent by `close`
//! 3. **Closed** - CLOSE received, stream ended, or transport shut down
//! 4. **Broken** - a transport or framing failure left the stream unusable
//!
//! ## Example
//!
//! ```rust,ignore
//! use csap::{Config, ServerOpen, WebSocketChannel};
//!
//! let (stream, _) = listener.accept().await?;
//! if let ServerOpen::Established(mut channel) =
//!     WebSocketChannel::open_as_server(stream, Config::server()).await?
//! {
//!     let info = channel.receive_all(None).await?;
//!     channel.send(info.opcode, channel.data().to_vec().as_slice(), true).await?;
//!     channel.close(None).await?;
//! }
//! ```

mod role;
mod state;

#[allow(clippy::module_inception)]
mod channel;

pub(crate) use channel::with_timeout;
pub use channel::{CopyOut, FrameInfo, ServerOpen, WebSocketChannel};
pub use role::Role;
pub use state::ChannelState;
